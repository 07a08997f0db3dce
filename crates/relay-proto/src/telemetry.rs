use serde::{Deserialize, Serialize};
use std::fmt;

/// Latest known vehicle state. Fields that have not been reported yet keep
/// their zero defaults; afterwards each field holds the most recent value.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TelemetrySnapshot {
    pub lat: f64,
    pub lon: f64,
    /// Meters above home.
    pub relative_alt_m: f32,
    /// m/s
    pub ground_speed: f32,
    /// Volts
    pub battery_voltage: f32,
    /// Percent 0-100
    pub battery_remaining: u8,
    pub flight_mode: String,
    pub armed: bool,
    // wall clock of the last applied frame
    pub updated_unix_ms: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SessionId(pub u64);

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Lifecycle of one connection session.
///
/// `Stopped` and `Failed` are terminal; a reconnect is a new session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConnectionStatus {
    Disconnected,
    Connecting,
    Connected(SessionId),
    Failed(String),
    Stopped,
}

impl ConnectionStatus {
    pub fn is_connected(&self) -> bool {
        matches!(self, ConnectionStatus::Connected(_))
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, ConnectionStatus::Failed(_) | ConnectionStatus::Stopped)
    }
}

impl fmt::Display for ConnectionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConnectionStatus::Disconnected => f.write_str("disconnected"),
            ConnectionStatus::Connecting => f.write_str("connecting"),
            ConnectionStatus::Connected(id) => write!(f, "connected {}", id),
            ConnectionStatus::Failed(reason) => write!(f, "failed: {}", reason),
            ConnectionStatus::Stopped => f.write_str("stopped"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn terminal_states() {
        assert!(!ConnectionStatus::Disconnected.is_terminal());
        assert!(!ConnectionStatus::Connecting.is_terminal());
        assert!(!ConnectionStatus::Connected(SessionId(3)).is_terminal());
        assert!(ConnectionStatus::Failed("timeout".into()).is_terminal());
        assert!(ConnectionStatus::Stopped.is_terminal());
        assert!(ConnectionStatus::Connected(SessionId(3)).is_connected());
    }

    #[test]
    fn status_display() {
        assert_eq!(ConnectionStatus::Connected(SessionId(7)).to_string(), "connected #7");
        assert_eq!(ConnectionStatus::Failed("heartbeat timeout".into()).to_string(), "failed: heartbeat timeout");
    }

    #[test]
    fn snapshot_defaults_are_zeroed() {
        let s = TelemetrySnapshot::default();
        assert_eq!(s.lat, 0.0);
        assert_eq!(s.battery_remaining, 0);
        assert!(s.flight_mode.is_empty());
        assert!(!s.armed);
    }
}
