pub mod doctor;
pub mod normalize;
pub mod objects;
pub mod poller;
pub mod registry;

use serde::Deserialize;
use serde_json::Value;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::time::Duration;
use tracing::{debug, warn};

use relay_proto::{ObjectTrack, PinRecord};

pub use poller::IngestPoller;
pub use registry::TrackRegistry;

#[derive(Debug, Clone, Default, Deserialize)]
pub struct IngestConfig {
    /// Object/pin reports from the detection source. Default 5005.
    pub detection_port: Option<u16>,
    /// Pin/waypoint reports for the map overlay. Default 6007.
    pub pin_port: Option<u16>,
    pub bind_ip: Option<IpAddr>,
    /// Poll period. Default 100ms.
    pub tick_ms: Option<u64>,
}

impl IngestConfig {
    pub fn detection_addr(&self) -> SocketAddr {
        SocketAddr::new(self.bind_ip(), self.detection_port.unwrap_or(5005))
    }

    pub fn pin_addr(&self) -> SocketAddr {
        SocketAddr::new(self.bind_ip(), self.pin_port.unwrap_or(6007))
    }

    pub fn tick(&self) -> Duration {
        Duration::from_millis(self.tick_ms.unwrap_or(100))
    }

    fn bind_ip(&self) -> IpAddr {
        self.bind_ip.unwrap_or(IpAddr::V4(Ipv4Addr::UNSPECIFIED))
    }
}

/// One datagram's worth of normalized output.
#[derive(Debug, Clone, PartialEq)]
pub enum Ingested {
    Pins(Vec<PinRecord>),
    /// A full detection frame. Replaces every track in the registry.
    Objects(Vec<ObjectTrack>),
}

/// Routes a raw datagram: payloads carrying an `objects` list are detection
/// frames, everything else goes through the pin normalizer.
pub fn parse_datagram(raw: &[u8]) -> Option<Ingested> {
    let payload: Value = match serde_json::from_slice(raw) {
        Ok(v) => v,
        Err(e) => {
            warn!("ingest: dropping undecodable datagram ({} bytes): {}", raw.len(), e);
            return None;
        }
    };

    if let Some(objects) = payload.get("objects") {
        return match objects::parse_objects(objects) {
            Some(tracks) => Some(Ingested::Objects(tracks)),
            None => {
                warn!("ingest: 'objects' is not a list, datagram dropped");
                None
            }
        };
    }

    let pins = normalize::normalize_value(&payload);
    if pins.is_empty() {
        debug!("ingest: datagram carried no usable pins");
        return None;
    }
    Some(Ingested::Pins(pins))
}
