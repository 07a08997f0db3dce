//! Telemetry frame decoder: one inbound MAVLink message in, at most one
//! partial snapshot update out. Pure; the worker owns the snapshot.

use mavlink::common::{MavAutopilot, MavMessage, MavType, HEARTBEAT_DATA};
use relay_proto::TelemetrySnapshot;

use crate::modes::ModeTable;

pub struct DecodeContext<'a> {
    pub modes: &'a ModeTable,
    pub armed_mask: u8,
}

#[derive(Debug, Clone, PartialEq)]
pub enum FrameUpdate {
    Position { lat: f64, lon: f64, relative_alt_m: f32 },
    Speed { ground_speed: f32 },
    Heartbeat { armed: bool, flight_mode: String },
    Battery { voltage: Option<f32>, remaining: Option<u8> },
}

impl FrameUpdate {
    /// Writes only the fields this frame carries.
    pub fn apply_to(self, snap: &mut TelemetrySnapshot) {
        match self {
            FrameUpdate::Position { lat, lon, relative_alt_m } => {
                snap.lat = lat;
                snap.lon = lon;
                snap.relative_alt_m = relative_alt_m;
            }
            FrameUpdate::Speed { ground_speed } => snap.ground_speed = ground_speed,
            FrameUpdate::Heartbeat { armed, flight_mode } => {
                snap.armed = armed;
                snap.flight_mode = flight_mode;
            }
            FrameUpdate::Battery { voltage, remaining } => {
                if let Some(v) = voltage {
                    snap.battery_voltage = v;
                }
                if let Some(r) = remaining {
                    snap.battery_remaining = r;
                }
            }
        }
    }
}

/// Heartbeats from ground stations and companion computers share the link
/// but say nothing about the vehicle.
pub fn is_vehicle_heartbeat(hb: &HEARTBEAT_DATA) -> bool {
    !matches!(
        hb.mavtype,
        MavType::MAV_TYPE_GCS | MavType::MAV_TYPE_ONBOARD_CONTROLLER
    ) && hb.autopilot != MavAutopilot::MAV_AUTOPILOT_INVALID
}

pub fn decode(msg: &MavMessage, ctx: &DecodeContext<'_>) -> Option<FrameUpdate> {
    match msg {
        // lat/lon in 1e7 degrees, relative_alt in millimeters above home
        MavMessage::GLOBAL_POSITION_INT(p) => Some(FrameUpdate::Position {
            lat: p.lat as f64 / 1e7,
            lon: p.lon as f64 / 1e7,
            relative_alt_m: p.relative_alt as f32 / 1000.0,
        }),
        MavMessage::VFR_HUD(hud) => Some(FrameUpdate::Speed { ground_speed: hud.groundspeed }),
        MavMessage::HEARTBEAT(hb) if is_vehicle_heartbeat(hb) => Some(FrameUpdate::Heartbeat {
            armed: hb.base_mode.bits() & ctx.armed_mask != 0,
            flight_mode: ctx.modes.name_for(hb.custom_mode),
        }),
        MavMessage::SYS_STATUS(status) => {
            // u16::MAX / -1 mean "not reported"
            let voltage = (status.voltage_battery != u16::MAX)
                .then(|| status.voltage_battery as f32 / 1000.0);
            let remaining = (0..=100)
                .contains(&status.battery_remaining)
                .then_some(status.battery_remaining as u8);
            if voltage.is_none() && remaining.is_none() {
                return None;
            }
            Some(FrameUpdate::Battery { voltage, remaining })
        }
        _ => None,
    }
}
