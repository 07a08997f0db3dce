use serde::{Deserialize, Serialize};

use crate::track::ObjectTrack;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GimbalAxes {
    pub roll: f32,
    pub pitch: f32,
    pub yaw: f32,
    pub zoom: f32,
}

impl GimbalAxes {
    /// Payload wire form: `roll,pitch,yaw,zoom`.
    pub fn to_wire(&self) -> String {
        format!("{},{},{},{}", self.roll, self.pitch, self.yaw, self.zoom)
    }
}

/// Operator intent, consumed once by the dispatcher.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum OutboundCommand {
    Arm,
    Disarm,
    SetMode(String),
    GimbalAxes(GimbalAxes),
    SelectTrack { id: i64, aux_data: String },
}

impl OutboundCommand {
    /// Selection command for a clicked track.
    pub fn select(track: &ObjectTrack) -> Self {
        Self::select_id(track.id, track.aux_data.as_str())
    }

    /// Selection by id alone. Empty auxiliary data is reported as `"selected"`.
    pub fn select_id(id: i64, aux_data: impl Into<String>) -> Self {
        let aux_data = aux_data.into();
        let aux_data = if aux_data.is_empty() { "selected".to_string() } else { aux_data };
        OutboundCommand::SelectTrack { id, aux_data }
    }

    pub fn gimbal(roll: f32, pitch: f32, yaw: f32, zoom: f32) -> Self {
        OutboundCommand::GimbalAxes(GimbalAxes { roll, pitch, yaw, zoom })
    }

    /// Whether this command travels over the vehicle link rather than UDP.
    pub fn needs_session(&self) -> bool {
        matches!(self, OutboundCommand::Arm | OutboundCommand::Disarm | OutboundCommand::SetMode(_))
    }
}
