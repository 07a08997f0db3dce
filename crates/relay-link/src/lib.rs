pub mod decode;
pub mod doctor;
pub mod endpoint;
pub mod mav;
pub mod modes;
pub mod worker;

#[cfg(any(test, feature = "mock"))]
pub mod mock;

use anyhow::Result;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::time::Duration;

pub use endpoint::{Endpoint, EndpointError, Transport};
pub use mav::{Connector, LinkError, MavlinkConnector, VehicleLink, VehicleTarget};
pub use modes::ModeTable;
pub use worker::{CommandError, ConnectionWorker, LinkEvent, SessionHandle};

#[derive(Debug, Clone, Deserialize)]
pub struct LinkConfig {
    pub enable: bool,

    /// Connection descriptor, e.g. "udp:127.0.0.1:14550" or
    /// "serial:/dev/ttyUSB0:57600".
    pub endpoint: String,

    /// Link speed for serial descriptors that do not carry one.
    pub baud: Option<u32>,

    /// Bounded wait for the first vehicle heartbeat. Default 5s.
    pub handshake_timeout_ms: Option<u64>,

    /// Per-frame receive wait; also the cancellation latency. Default 1s.
    pub recv_timeout_ms: Option<u64>,

    /// Pause after a frame that failed to decode. Default 100ms.
    pub decode_backoff_ms: Option<u64>,

    /// Rate requested for each telemetry stream after the handshake.
    pub stream_rate_hz: Option<u16>,

    /// MAVLink ids we use (ground station side)
    pub sys_id: Option<u8>,
    pub comp_id: Option<u8>,

    /// Command target. Learned from the handshake heartbeat when unset.
    pub target_sys: Option<u8>,
    pub target_comp: Option<u8>,

    /// HEARTBEAT base_mode bit(s) meaning "armed".
    pub armed_mask: Option<u8>,

    /// Optional: send our own heartbeat at this rate while connected.
    pub send_heartbeat_hz: Option<f32>,

    /// Custom-mode code -> name. Replaces the built-in table when present.
    pub modes: Option<BTreeMap<String, String>>,
}

impl Default for LinkConfig {
    fn default() -> Self {
        Self {
            enable: true,
            endpoint: "udp:127.0.0.1:14550".into(),
            baud: None,
            handshake_timeout_ms: None,
            recv_timeout_ms: None,
            decode_backoff_ms: None,
            stream_rate_hz: None,
            sys_id: None,
            comp_id: None,
            target_sys: None,
            target_comp: None,
            armed_mask: None,
            send_heartbeat_hz: None,
            modes: None,
        }
    }
}

impl LinkConfig {
    pub fn default_baud(&self) -> u32 {
        self.baud.unwrap_or(57600)
    }

    pub fn handshake_timeout(&self) -> Duration {
        Duration::from_millis(self.handshake_timeout_ms.unwrap_or(5000))
    }

    pub fn recv_timeout(&self) -> Duration {
        Duration::from_millis(self.recv_timeout_ms.unwrap_or(1000))
    }

    pub fn decode_backoff(&self) -> Duration {
        Duration::from_millis(self.decode_backoff_ms.unwrap_or(100))
    }

    pub fn stream_rate_hz(&self) -> u16 {
        self.stream_rate_hz.unwrap_or(2)
    }

    pub fn sys_id(&self) -> u8 {
        self.sys_id.unwrap_or(255)
    }

    pub fn comp_id(&self) -> u8 {
        self.comp_id.unwrap_or(190)
    }

    pub fn armed_mask(&self) -> u8 {
        self.armed_mask.unwrap_or(0b1000_0000)
    }

    pub fn heartbeat_interval(&self) -> Option<Duration> {
        self.send_heartbeat_hz
            .filter(|hz| *hz > 0.0)
            .map(|hz| Duration::from_secs_f32(1.0 / hz.max(0.2)))
    }

    pub fn mode_table(&self) -> Result<ModeTable> {
        match &self.modes {
            Some(m) => ModeTable::from_config(m),
            None => Ok(ModeTable::default()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_apply_to_missing_fields() {
        let cfg: LinkConfig = toml::from_str(
            r#"
            enable = true
            endpoint = "udp:0.0.0.0:14550"
            "#,
        )
        .unwrap();
        assert_eq!(cfg.handshake_timeout(), Duration::from_secs(5));
        assert_eq!(cfg.recv_timeout(), Duration::from_secs(1));
        assert_eq!(cfg.stream_rate_hz(), 2);
        assert_eq!(cfg.armed_mask(), 128);
        assert_eq!(cfg.default_baud(), 57600);
        assert!(cfg.heartbeat_interval().is_none());
        assert_eq!(cfg.mode_table().unwrap().name_for(4), "GUIDED");
    }

    #[test]
    fn modes_section_replaces_table() {
        let cfg: LinkConfig = toml::from_str(
            r#"
            enable = true
            endpoint = "serial:/dev/ttyACM0"
            send_heartbeat_hz = 1.0

            [modes]
            0 = "MANUAL"
            10 = "AUTO"
            "#,
        )
        .unwrap();
        let table = cfg.mode_table().unwrap();
        assert_eq!(table.name_for(10), "AUTO");
        assert_eq!(table.name_for(4), "4");
        assert_eq!(cfg.heartbeat_interval(), Some(Duration::from_secs(1)));
    }
}
