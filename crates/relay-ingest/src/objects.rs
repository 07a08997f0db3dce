use serde_json::{Map, Value};
use tracing::debug;

use relay_proto::{ObjectTrack, Rect};

use crate::normalize::{number, text};

/// Parses the `objects` list of a detection frame. `None` if it is not a
/// list; detections missing required fields are skipped.
///
/// Each detection is either
/// `{"x", "y", "size", "id", "label"?, "data"?, "confidence"?}` (square
/// region) or `[x_min, y_min, x_max, y_max, confidence, id]`.
pub fn parse_objects(objects: &Value) -> Option<Vec<ObjectTrack>> {
    let items = objects.as_array()?;
    Some(items.iter().filter_map(parse_detection).collect())
}

fn parse_detection(item: &Value) -> Option<ObjectTrack> {
    let track = match item {
        Value::Object(obj) => square_form(obj),
        Value::Array(parts) if parts.len() == 6 => corner_form(parts),
        _ => None,
    };
    if track.is_none() {
        debug!("ingest: skipping detection {}", item);
    }
    track
}

fn square_form(obj: &Map<String, Value>) -> Option<ObjectTrack> {
    let x = number(obj.get("x")?)?;
    let y = number(obj.get("y")?)?;
    let size = number(obj.get("size")?)?;
    let id = track_id(obj.get("id")?)?;
    if size < 0.0 {
        return None;
    }
    Some(ObjectTrack {
        id,
        rect: Rect::square(x, y, size),
        label: obj.get("label").map(text).unwrap_or_default(),
        aux_data: obj.get("data").map(text).unwrap_or_default(),
        confidence: obj.get("confidence").and_then(number).map(|c| c as f32),
    })
}

fn corner_form(parts: &[Value]) -> Option<ObjectTrack> {
    let x_min = number(&parts[0])?;
    let y_min = number(&parts[1])?;
    let x_max = number(&parts[2])?;
    let y_max = number(&parts[3])?;
    let confidence = number(&parts[4])?;
    let id = track_id(&parts[5])?;
    if x_max < x_min || y_max < y_min {
        return None;
    }
    Some(ObjectTrack {
        id,
        rect: Rect::from_corners(x_min, y_min, x_max, y_max),
        label: String::new(),
        aux_data: String::new(),
        confidence: Some(confidence as f32),
    })
}

/// Integral ids only; detectors that emit floats get `3.0` accepted.
fn track_id(v: &Value) -> Option<i64> {
    if let Some(id) = v.as_i64() {
        return Some(id);
    }
    let f = number(v)?;
    (f.fract() == 0.0 && f.abs() < i64::MAX as f64).then_some(f as i64)
}
