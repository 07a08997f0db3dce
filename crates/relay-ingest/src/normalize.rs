//! Pin payload normalizer.
//!
//! Accepted shapes, tried in this order:
//!
//! 1. `{"pins": [[lat, lon, name?], ...]}`
//! 2. `{"lat": .., "lon": .., "name"|"label": ..}`
//! 3. `{"data": [[lat, lon, name?], ...]}`
//! 4. `[[lat, lon, name?], ...]`
//!
//! A bad element inside a list is skipped; the rest still come through.

use serde_json::{Map, Value};
use tracing::{debug, warn};

use relay_proto::PinRecord;

/// Name for list elements without one.
pub const DEFAULT_TUPLE_NAME: &str = "Pin";
/// Name for a single-object pin with neither `name` nor `label`.
pub const DEFAULT_SINGLE_NAME: &str = "pin";

#[derive(Debug, Clone, Copy, PartialEq)]
enum PinShape<'a> {
    PinList(&'a [Value]),
    Single(&'a Map<String, Value>),
    DataList(&'a [Value]),
    Bare(&'a [Value]),
}

fn pin_list(payload: &Value) -> Option<PinShape<'_>> {
    match payload.get("pins")? {
        Value::Array(items) => Some(PinShape::PinList(items)),
        _ => None,
    }
}

fn single(payload: &Value) -> Option<PinShape<'_>> {
    let obj = payload.as_object()?;
    (obj.contains_key("lat") && obj.contains_key("lon")).then_some(PinShape::Single(obj))
}

fn data_list(payload: &Value) -> Option<PinShape<'_>> {
    match payload.get("data")? {
        Value::Array(items) => Some(PinShape::DataList(items)),
        _ => None,
    }
}

fn bare(payload: &Value) -> Option<PinShape<'_>> {
    payload.as_array().map(|items| PinShape::Bare(items))
}

fn shape_of(payload: &Value) -> Option<PinShape<'_>> {
    pin_list(payload)
        .or_else(|| single(payload))
        .or_else(|| data_list(payload))
        .or_else(|| bare(payload))
}

/// Never fails: undecodable input yields no pins.
pub fn normalize(raw: &[u8]) -> Vec<PinRecord> {
    match serde_json::from_slice::<Value>(raw) {
        Ok(payload) => normalize_value(&payload),
        Err(e) => {
            warn!("ingest: pin payload decode error: {}", e);
            Vec::new()
        }
    }
}

pub fn normalize_value(payload: &Value) -> Vec<PinRecord> {
    match shape_of(payload) {
        Some(PinShape::PinList(items) | PinShape::DataList(items) | PinShape::Bare(items)) => {
            items.iter().filter_map(pin_from_tuple).collect()
        }
        Some(PinShape::Single(obj)) => pin_from_object(obj).into_iter().collect(),
        None => {
            debug!("ingest: payload matches no pin shape");
            Vec::new()
        }
    }
}

fn pin_from_tuple(item: &Value) -> Option<PinRecord> {
    let parts = match item.as_array() {
        Some(p) if p.len() >= 2 => p,
        _ => {
            debug!("ingest: skipping pin element {}", item);
            return None;
        }
    };
    let name = parts.get(2).map(text).unwrap_or_else(|| DEFAULT_TUPLE_NAME.to_string());
    checked_pin(&parts[0], &parts[1], name)
}

fn pin_from_object(obj: &Map<String, Value>) -> Option<PinRecord> {
    let name = obj
        .get("name")
        .or_else(|| obj.get("label"))
        .map(text)
        .unwrap_or_else(|| DEFAULT_SINGLE_NAME.to_string());
    checked_pin(&obj["lat"], &obj["lon"], name)
}

fn checked_pin(lat: &Value, lon: &Value, name: String) -> Option<PinRecord> {
    let (Some(lat), Some(lon)) = (number(lat), number(lon)) else {
        debug!("ingest: skipping pin {:?} with non-numeric coordinates", name);
        return None;
    };
    if !(-90.0..=90.0).contains(&lat) || !(-180.0..=180.0).contains(&lon) {
        debug!("ingest: skipping pin {:?} out of range ({}, {})", name, lat, lon);
        return None;
    }
    Some(PinRecord { lat, lon, name })
}

/// JSON number or numeric string, finite.
pub(crate) fn number(v: &Value) -> Option<f64> {
    let n = match v {
        Value::Number(n) => n.as_f64()?,
        Value::String(s) => s.trim().parse().ok()?,
        _ => return None,
    };
    n.is_finite().then_some(n)
}

/// Strings as-is, anything else in its JSON form.
pub(crate) fn text(v: &Value) -> String {
    match v {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}
