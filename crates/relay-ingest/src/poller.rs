use anyhow::{Context, Result};
use std::io;
use std::net::{SocketAddr, UdpSocket};
use tracing::{debug, info, warn};

use crate::registry::TrackRegistry;
use crate::{parse_datagram, Ingested};

const MAX_DATAGRAM: usize = 65_536;

/// Drains a non-blocking UDP socket on each `tick`. Detection frames are
/// applied to the registry; every batch is also returned, in receipt order,
/// for the overlay.
pub struct IngestPoller {
    name: String,
    socket: UdpSocket,
    registry: TrackRegistry,
    buf: Vec<u8>,
}

impl IngestPoller {
    pub fn bind(name: &str, addr: SocketAddr, registry: TrackRegistry) -> Result<Self> {
        let socket = UdpSocket::bind(addr).with_context(|| format!("bind {} socket {}", name, addr))?;
        let poller = Self::from_socket(name, socket, registry)?;
        info!("ingest: {} listening on {}", poller.name, addr);
        Ok(poller)
    }

    pub fn from_socket(name: &str, socket: UdpSocket, registry: TrackRegistry) -> Result<Self> {
        socket.set_nonblocking(true).context("set socket non-blocking")?;
        Ok(Self { name: name.to_string(), socket, registry, buf: vec![0u8; MAX_DATAGRAM] })
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.socket.local_addr()?)
    }

    pub fn registry(&self) -> &TrackRegistry {
        &self.registry
    }

    /// Receives until the socket would block. Never fails: socket errors
    /// end this tick and polling resumes on the next.
    pub fn tick(&mut self) -> Vec<Ingested> {
        let mut out = Vec::new();
        loop {
            match self.socket.recv_from(&mut self.buf) {
                Ok((n, from)) => {
                    if let Some(batch) = self.handle(&self.buf[..n], from) {
                        out.push(batch);
                    }
                }
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => break,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => {
                    warn!("ingest: {} recv error: {}", self.name, e);
                    break;
                }
            }
        }
        out
    }

    fn handle(&self, data: &[u8], from: SocketAddr) -> Option<Ingested> {
        let batch = parse_datagram(data)?;
        match &batch {
            Ingested::Objects(tracks) => {
                self.registry.replace_all(tracks.iter().cloned());
                debug!("ingest: {} {} objects from {}", self.name, tracks.len(), from);
            }
            Ingested::Pins(pins) => {
                debug!("ingest: {} {} pins from {}", self.name, pins.len(), from);
            }
        }
        Some(batch)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use relay_proto::PinRecord;
    use std::time::Duration;

    fn pair() -> (IngestPoller, UdpSocket) {
        let socket = UdpSocket::bind("127.0.0.1:0").unwrap();
        let poller = IngestPoller::from_socket("test", socket, TrackRegistry::new()).unwrap();
        let sender = UdpSocket::bind("127.0.0.1:0").unwrap();
        sender.connect(poller.local_addr().unwrap()).unwrap();
        (poller, sender)
    }

    #[test]
    fn empty_socket_is_not_an_error() {
        let (mut poller, _sender) = pair();
        assert!(poller.tick().is_empty());
        assert!(poller.tick().is_empty());
    }

    #[test]
    fn one_tick_drains_everything_in_order() {
        let (mut poller, sender) = pair();
        sender.send(br#"{"lat": 1.0, "lon": 1.0, "name": "first"}"#).unwrap();
        sender.send(br#"{"pins": [[2.0, 2.0, "second"]]}"#).unwrap();
        sender.send(br#"[[3.0, 3.0, "third"]]"#).unwrap();
        std::thread::sleep(Duration::from_millis(50));

        let got = poller.tick();
        assert_eq!(
            got,
            vec![
                Ingested::Pins(vec![PinRecord::new(1.0, 1.0, "first")]),
                Ingested::Pins(vec![PinRecord::new(2.0, 2.0, "second")]),
                Ingested::Pins(vec![PinRecord::new(3.0, 3.0, "third")]),
            ]
        );
        assert!(poller.tick().is_empty());
    }

    #[test]
    fn bad_datagram_does_not_stop_the_drain() {
        let (mut poller, sender) = pair();
        sender.send(b"\x00garbage").unwrap();
        sender.send(br#"{"objects": [{"x": 1, "y": 2, "size": 3, "id": 4}]}"#).unwrap();
        std::thread::sleep(Duration::from_millis(50));

        let got = poller.tick();
        assert_eq!(got.len(), 1);
        assert!(matches!(&got[0], Ingested::Objects(t) if t.len() == 1));
        assert_eq!(poller.registry().get(4).unwrap().rect.w, 3.0);
    }

    #[test]
    fn latest_detection_frame_wins() {
        let (mut poller, sender) = pair();
        sender.send(br#"{"objects": [{"x": 1, "y": 1, "size": 1, "id": 1}, {"x": 2, "y": 2, "size": 2, "id": 2}]}"#).unwrap();
        sender.send(br#"{"objects": [[0, 0, 10, 10, 0.9, 3]]}"#).unwrap();
        std::thread::sleep(Duration::from_millis(50));

        assert_eq!(poller.tick().len(), 2);
        let ids: Vec<_> = poller.registry().tracks().iter().map(|t| t.id).collect();
        assert_eq!(ids, [3]);
    }
}
