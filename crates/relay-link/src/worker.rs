//! Connection worker: one background thread per session running
//! connect -> handshake -> stream requests -> decode loop.
//!
//! The session thread owns the link and the telemetry snapshot. Everything
//! leaves it by value through a broadcast channel (`LinkEvent`) and a watch
//! channel holding the current status.

use anyhow::{Context, Result};
use mavlink::{
    common::{MavMessage, HEARTBEAT_DATA},
    MavHeader,
};
use relay_proto::{ConnectionStatus, SessionId, TelemetrySnapshot};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tokio::sync::{broadcast, watch};
use tracing::{debug, info, warn};

use crate::decode::{decode, is_vehicle_heartbeat, DecodeContext};
use crate::endpoint::Endpoint;
use crate::mav::{self, Connector, LinkError, MavlinkConnector, VehicleLink, VehicleTarget};
use crate::modes::ModeTable;
use crate::LinkConfig;

const EVENT_CAPACITY: usize = 256;

#[derive(Debug, Clone, PartialEq)]
pub enum LinkEvent {
    Status { session: SessionId, status: ConnectionStatus },
    Telemetry { session: SessionId, snapshot: TelemetrySnapshot },
}

#[derive(Debug, thiserror::Error)]
pub enum CommandError {
    #[error("session not connected ({0})")]
    NotConnected(ConnectionStatus),
    #[error(transparent)]
    Link(#[from] LinkError),
}

/// Long-lived; each `start` creates a new session.
pub struct ConnectionWorker {
    cfg: LinkConfig,
    modes: Arc<ModeTable>,
    connector: Arc<dyn Connector>,
    events: broadcast::Sender<LinkEvent>,
    next_session: AtomicU64,
}

impl ConnectionWorker {
    pub fn new(cfg: LinkConfig) -> Result<Self> {
        let connector = MavlinkConnector { sys_id: cfg.sys_id(), comp_id: cfg.comp_id() };
        Self::with_connector(cfg, Arc::new(connector))
    }

    pub fn with_connector(cfg: LinkConfig, connector: Arc<dyn Connector>) -> Result<Self> {
        let modes = Arc::new(cfg.mode_table().context("link mode table")?);
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Ok(Self { cfg, modes, connector, events, next_session: AtomicU64::new(1) })
    }

    /// Status transitions and snapshots of every session started from now on.
    pub fn subscribe(&self) -> broadcast::Receiver<LinkEvent> {
        self.events.subscribe()
    }

    pub fn modes(&self) -> &ModeTable {
        &self.modes
    }

    /// Starts a session against `endpoint` and returns at once. Transport
    /// and handshake failures are reported as `Failed` status, not here.
    pub fn start(&self, endpoint: &str) -> Result<SessionHandle> {
        let id = SessionId(self.next_session.fetch_add(1, Ordering::Relaxed));
        let (status_tx, status_rx) = watch::channel(ConnectionStatus::Disconnected);
        let cancel = Arc::new(AtomicBool::new(false));
        let uplink = Arc::new(Mutex::new(None));

        let session = Session {
            id,
            descriptor: endpoint.to_string(),
            cfg: self.cfg.clone(),
            modes: self.modes.clone(),
            connector: self.connector.clone(),
            events: self.events.clone(),
            status: status_tx,
            cancel: cancel.clone(),
            uplink: uplink.clone(),
            snapshot: TelemetrySnapshot::default(),
        };
        let thread = thread::Builder::new()
            .name(format!("link-session-{}", id.0))
            .spawn(move || session.run())
            .context("spawn link session")?;

        Ok(SessionHandle {
            id,
            status: status_rx,
            cancel,
            uplink,
            modes: self.modes.clone(),
            thread: Some(thread),
        })
    }

    pub fn stop(&self, handle: &SessionHandle) {
        handle.stop();
    }
}

#[derive(Clone)]
struct Uplink {
    link: Arc<dyn VehicleLink>,
    target: VehicleTarget,
}

pub struct SessionHandle {
    id: SessionId,
    status: watch::Receiver<ConnectionStatus>,
    cancel: Arc<AtomicBool>,
    uplink: Arc<Mutex<Option<Uplink>>>,
    modes: Arc<ModeTable>,
    thread: Option<JoinHandle<()>>,
}

impl SessionHandle {
    pub fn id(&self) -> SessionId {
        self.id
    }

    pub fn status(&self) -> ConnectionStatus {
        self.status.borrow().clone()
    }

    pub fn modes(&self) -> &ModeTable {
        &self.modes
    }

    pub fn target(&self) -> Option<VehicleTarget> {
        self.uplink().map(|u| u.target)
    }

    fn uplink(&self) -> Option<Uplink> {
        self.uplink.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    /// Cooperative: the session notices at its next receive timeout.
    pub fn stop(&self) {
        self.cancel.store(true, Ordering::Relaxed);
    }

    /// Polls the status until `pred` holds or `timeout` passes.
    pub fn wait_for(
        &self,
        timeout: Duration,
        pred: impl Fn(&ConnectionStatus) -> bool,
    ) -> Option<ConnectionStatus> {
        let deadline = Instant::now() + timeout;
        loop {
            let st = self.status();
            if pred(&st) {
                return Some(st);
            }
            if Instant::now() >= deadline {
                return None;
            }
            thread::sleep(Duration::from_millis(5));
        }
    }

    /// Waits for the session thread and returns its final status. The
    /// session's transport is closed by then.
    pub fn join(mut self) -> ConnectionStatus {
        if let Some(t) = self.thread.take() {
            if t.join().is_err() {
                warn!("link: session {} thread panicked", self.id);
            }
        }
        self.status()
    }

    /// Sends a frame built for the session's target. Only while connected.
    pub fn send_to_vehicle(
        &self,
        build: impl FnOnce(VehicleTarget) -> MavMessage,
    ) -> Result<(), CommandError> {
        let status = self.status();
        let uplink = match (&status, self.uplink()) {
            (ConnectionStatus::Connected(_), Some(u)) => u,
            _ => return Err(CommandError::NotConnected(status)),
        };
        uplink.link.send(&build(uplink.target))?;
        Ok(())
    }
}

impl Drop for SessionHandle {
    fn drop(&mut self) {
        self.cancel.store(true, Ordering::Relaxed);
    }
}

struct Session {
    id: SessionId,
    descriptor: String,
    cfg: LinkConfig,
    modes: Arc<ModeTable>,
    connector: Arc<dyn Connector>,
    events: broadcast::Sender<LinkEvent>,
    status: watch::Sender<ConnectionStatus>,
    cancel: Arc<AtomicBool>,
    uplink: Arc<Mutex<Option<Uplink>>>,
    snapshot: TelemetrySnapshot,
}

impl Session {
    fn run(mut self) {
        let end = self.session();
        // the link must be closed before a terminal status lets anyone reuse the endpoint
        self.uplink.lock().unwrap_or_else(PoisonError::into_inner).take();
        self.set_status(end);
    }

    /// Everything up to the terminal status. The link is dropped on return.
    fn session(&mut self) -> ConnectionStatus {
        self.set_status(ConnectionStatus::Connecting);

        let endpoint = match Endpoint::parse(&self.descriptor, self.cfg.default_baud()) {
            Ok(ep) => ep,
            Err(e) => return ConnectionStatus::Failed(e.to_string()),
        };
        let link = match self.connector.connect(&endpoint) {
            Ok(link) => link,
            Err(e) => return ConnectionStatus::Failed(format!("open {}: {:#}", endpoint, e)),
        };
        let (hdr, hb) = match self.handshake(link.as_ref()) {
            Ok(first) => first,
            Err(reason) => return ConnectionStatus::Failed(reason),
        };

        let target = VehicleTarget {
            system: self.cfg.target_sys.unwrap_or(hdr.system_id),
            component: self.cfg.target_comp.unwrap_or(hdr.component_id),
        };
        *self.uplink.lock().unwrap_or_else(PoisonError::into_inner) = Some(Uplink { link: link.clone(), target });
        self.set_status(ConnectionStatus::Connected(self.id));
        info!(
            "link: session {} vehicle sys={} comp={} on {}",
            self.id, target.system, target.component, endpoint
        );

        mav::request_streams(link.as_ref(), target, self.cfg.stream_rate_hz());
        self.apply(&MavMessage::HEARTBEAT(hb));

        self.decode_loop(link.as_ref())
    }

    /// Single bounded wait for a vehicle heartbeat. No retry.
    fn handshake(&self, link: &dyn VehicleLink) -> Result<(MavHeader, HEARTBEAT_DATA), String> {
        let timeout = self.cfg.handshake_timeout();
        let deadline = Instant::now() + timeout;
        loop {
            if self.cancel.load(Ordering::Relaxed) {
                return Err("stopped during handshake".into());
            }
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Err(format!("heartbeat timeout after {}ms", timeout.as_millis()));
            }
            match link.recv_timeout(remaining.min(self.cfg.recv_timeout())) {
                Ok(Some((hdr, MavMessage::HEARTBEAT(hb)))) if is_vehicle_heartbeat(&hb) => {
                    return Ok((hdr, hb))
                }
                Ok(_) => {}
                Err(LinkError::Closed) => return Err("link closed during handshake".into()),
                Err(e) => debug!("link: handshake skipped bad frame: {}", e),
            }
        }
    }

    fn decode_loop(&mut self, link: &dyn VehicleLink) -> ConnectionStatus {
        let hb_interval = self.cfg.heartbeat_interval();
        let mut last_hb = Instant::now();
        loop {
            if self.cancel.load(Ordering::Relaxed) {
                return ConnectionStatus::Stopped;
            }

            if let Some(iv) = hb_interval {
                if last_hb.elapsed() >= iv {
                    if let Err(e) = link.send(&mav::gcs_heartbeat_frame()) {
                        debug!("link: gcs heartbeat failed: {}", e);
                    }
                    last_hb = Instant::now();
                }
            }

            match link.recv_timeout(self.cfg.recv_timeout()) {
                Ok(Some((_hdr, msg))) => self.apply(&msg),
                Ok(None) => {}
                Err(LinkError::Closed) => return ConnectionStatus::Failed("link closed".into()),
                Err(e) => {
                    warn!("link: session {} dropped frame: {}", self.id, e);
                    thread::sleep(self.cfg.decode_backoff());
                }
            }
        }
    }

    /// Decodes one frame and republishes the whole snapshot if it changed
    /// anything we track.
    fn apply(&mut self, msg: &MavMessage) {
        let ctx = DecodeContext { modes: &self.modes, armed_mask: self.cfg.armed_mask() };
        let Some(update) = decode(msg, &ctx) else { return };
        update.apply_to(&mut self.snapshot);
        self.snapshot.updated_unix_ms =
            (time::OffsetDateTime::now_utc().unix_timestamp_nanos() / 1_000_000) as i64;
        let _ = self.events.send(LinkEvent::Telemetry {
            session: self.id,
            snapshot: self.snapshot.clone(),
        });
    }

    fn set_status(&self, status: ConnectionStatus) {
        match &status {
            ConnectionStatus::Failed(reason) => warn!("link: session {} failed: {}", self.id, reason),
            other => info!("link: session {} {}", self.id, other),
        }
        self.status.send_replace(status.clone());
        let _ = self.events.send(LinkEvent::Status { session: self.id, status });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::{vehicle_heartbeat, ScriptedConnector, ScriptedLink};
    use mavlink::common::{MavCmd, GLOBAL_POSITION_INT_DATA, VFR_HUD_DATA};

    fn fast_cfg() -> LinkConfig {
        LinkConfig {
            handshake_timeout_ms: Some(150),
            recv_timeout_ms: Some(10),
            decode_backoff_ms: Some(1),
            ..Default::default()
        }
    }

    fn worker_with(link: Arc<ScriptedLink>) -> ConnectionWorker {
        ConnectionWorker::with_connector(fast_cfg(), Arc::new(ScriptedConnector::new(link))).unwrap()
    }

    /// Collects events until a terminal status or the deadline.
    fn collect_until_terminal(rx: &mut broadcast::Receiver<LinkEvent>, timeout: Duration) -> Vec<LinkEvent> {
        let deadline = Instant::now() + timeout;
        let mut out = Vec::new();
        while Instant::now() < deadline {
            match rx.try_recv() {
                Ok(ev) => {
                    let done = matches!(&ev, LinkEvent::Status { status, .. } if status.is_terminal());
                    out.push(ev);
                    if done {
                        break;
                    }
                }
                Err(_) => thread::sleep(Duration::from_millis(2)),
            }
        }
        out
    }

    fn statuses(events: &[LinkEvent]) -> Vec<ConnectionStatus> {
        events
            .iter()
            .filter_map(|e| match e {
                LinkEvent::Status { status, .. } => Some(status.clone()),
                _ => None,
            })
            .collect()
    }

    fn snapshots(events: &[LinkEvent]) -> Vec<TelemetrySnapshot> {
        events
            .iter()
            .filter_map(|e| match e {
                LinkEvent::Telemetry { snapshot, .. } => Some(snapshot.clone()),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn silent_endpoint_fails_with_timeout_and_no_telemetry() {
        let link = ScriptedLink::new();
        let worker = worker_with(link);
        let mut rx = worker.subscribe();

        let handle = worker.start("udp:127.0.0.1:14550").unwrap();
        let events = collect_until_terminal(&mut rx, Duration::from_secs(3));

        let st = statuses(&events);
        assert_eq!(st.len(), 2, "{:?}", st);
        assert_eq!(st[0], ConnectionStatus::Connecting);
        match &st[1] {
            ConnectionStatus::Failed(reason) => assert!(reason.contains("timeout"), "{}", reason),
            other => panic!("unexpected {:?}", other),
        }
        assert!(snapshots(&events).is_empty());
        assert!(matches!(handle.join(), ConnectionStatus::Failed(_)));
    }

    #[test]
    fn bad_descriptor_fails_session() {
        let worker = worker_with(ScriptedLink::new());
        let handle = worker.start("carrier-pigeon").unwrap();
        let st = handle.join();
        assert!(matches!(st, ConnectionStatus::Failed(ref r) if r.contains("transport")), "{:?}", st);
    }

    #[test]
    fn connect_decode_and_stop() {
        let link = ScriptedLink::new();
        link.push_frame(vehicle_heartbeat(5, true));
        link.push_frame(MavMessage::GLOBAL_POSITION_INT(GLOBAL_POSITION_INT_DATA {
            lat: 401772000,
            lon: 445035000,
            relative_alt: 20_000,
            ..Default::default()
        }));
        link.push_garbage("bad crc");
        link.push_frame(MavMessage::VFR_HUD(VFR_HUD_DATA { groundspeed: 4.0, ..Default::default() }));

        let worker = worker_with(link.clone());
        let mut rx = worker.subscribe();
        let handle = worker.start("udp:127.0.0.1:14550").unwrap();

        // heartbeat + position + speed
        let deadline = Instant::now() + Duration::from_secs(3);
        let mut events = Vec::new();
        while snapshots(&events).len() < 3 && Instant::now() < deadline {
            match rx.try_recv() {
                Ok(ev) => events.push(ev),
                Err(_) => thread::sleep(Duration::from_millis(2)),
            }
        }
        handle.stop();
        events.extend(collect_until_terminal(&mut rx, Duration::from_secs(3)));

        assert_eq!(
            statuses(&events),
            vec![
                ConnectionStatus::Connecting,
                ConnectionStatus::Connected(handle.id()),
                ConnectionStatus::Stopped,
            ]
        );

        let snaps = snapshots(&events);
        assert_eq!(snaps.len(), 3);
        assert_eq!(snaps[0].flight_mode, "LOITER");
        assert!(snaps[0].armed);
        assert!((snaps[1].lat - 40.1772).abs() < 1e-9);
        assert!((snaps[1].relative_alt_m - 20.0).abs() < 1e-6);
        // full snapshot each time, earlier fields carried forward
        assert_eq!(snaps[2].ground_speed, 4.0);
        assert_eq!(snaps[2].flight_mode, "LOITER");
        assert!((snaps[2].lon - 44.5035).abs() < 1e-9);

        let requests = link
            .sent()
            .iter()
            .filter(|m| matches!(m, MavMessage::REQUEST_DATA_STREAM(_)))
            .count();
        assert_eq!(requests, mav::TELEMETRY_STREAMS.len());
        assert_eq!(handle.join(), ConnectionStatus::Stopped);
    }

    #[test]
    fn stream_request_failures_are_not_fatal() {
        let link = ScriptedLink::new();
        link.fail_sends(true);
        link.push_frame(vehicle_heartbeat(0, false));
        let worker = worker_with(link);
        let handle = worker.start("udp:127.0.0.1:14550").unwrap();
        assert!(handle.wait_for(Duration::from_secs(2), ConnectionStatus::is_connected).is_some());
        handle.stop();
        assert_eq!(handle.join(), ConnectionStatus::Stopped);
    }

    #[test]
    fn target_learned_from_handshake_header() {
        let link = ScriptedLink::new();
        link.push_frame_from(MavHeader { system_id: 7, component_id: 1, sequence: 0 }, vehicle_heartbeat(0, false));
        let worker = worker_with(link);
        let handle = worker.start("udp:127.0.0.1:14550").unwrap();
        handle.wait_for(Duration::from_secs(2), ConnectionStatus::is_connected).unwrap();
        assert_eq!(handle.target(), Some(VehicleTarget { system: 7, component: 1 }));
    }

    #[test]
    fn closed_link_fails_session() {
        let link = ScriptedLink::new();
        link.push_frame(vehicle_heartbeat(0, false));
        link.push_close();
        let worker = worker_with(link);
        let handle = worker.start("udp:127.0.0.1:14550").unwrap();
        assert_eq!(handle.join(), ConnectionStatus::Failed("link closed".into()));
    }

    #[test]
    fn commands_refused_unless_connected() {
        let worker = worker_with(ScriptedLink::new());
        let handle = worker.start("udp:127.0.0.1:14550").unwrap();
        let err = handle.send_to_vehicle(|t| mav::arm_disarm_frame(t, true)).unwrap_err();
        assert!(matches!(err, CommandError::NotConnected(_)));
    }

    #[test]
    fn connected_session_sends_commands() {
        let link = ScriptedLink::new();
        link.push_frame(vehicle_heartbeat(0, false));
        let worker = worker_with(link.clone());
        let handle = worker.start("udp:127.0.0.1:14550").unwrap();
        handle.wait_for(Duration::from_secs(2), ConnectionStatus::is_connected).unwrap();

        handle.send_to_vehicle(|t| mav::arm_disarm_frame(t, true)).unwrap();
        let cmds: Vec<_> = link
            .sent()
            .into_iter()
            .filter_map(|m| match m {
                MavMessage::COMMAND_LONG(c) => Some(c),
                _ => None,
            })
            .collect();
        assert_eq!(cmds.len(), 1);
        assert_eq!(cmds[0].command, MavCmd::MAV_CMD_COMPONENT_ARM_DISARM);
        assert_eq!(cmds[0].param1, 1.0);

        handle.stop();
        assert_eq!(handle.join(), ConnectionStatus::Stopped);
    }

    #[test]
    fn each_start_is_a_new_session() {
        let link = ScriptedLink::new();
        let worker = worker_with(link);
        let a = worker.start("udp:127.0.0.1:14550").unwrap();
        let b = worker.start("udp:127.0.0.1:14550").unwrap();
        assert_ne!(a.id(), b.id());
        a.stop();
        b.stop();
        assert!(a.join().is_terminal());
        assert!(b.join().is_terminal());
    }

    #[test]
    fn finished_session_releases_link_for_commands() {
        let link = ScriptedLink::new();
        link.push_frame(vehicle_heartbeat(0, false));
        let worker = worker_with(link.clone());
        let handle = worker.start("udp:127.0.0.1:14550").unwrap();
        handle.wait_for(Duration::from_secs(2), ConnectionStatus::is_connected).unwrap();
        handle.stop();
        handle.wait_for(Duration::from_secs(2), ConnectionStatus::is_terminal).unwrap();

        assert_eq!(handle.target(), None);
        let err = handle.send_to_vehicle(|t| mav::arm_disarm_frame(t, true)).unwrap_err();
        assert!(matches!(err, CommandError::NotConnected(ConnectionStatus::Stopped)));
        // worker's connector keeps one reference; the finished session holds none
        assert_eq!(Arc::strong_count(&link), 2);
    }

    #[test]
    fn udp_listener_can_be_restarted_on_same_port() {
        let port = std::net::UdpSocket::bind("127.0.0.1:0").unwrap().local_addr().unwrap().port();
        let worker = ConnectionWorker::new(LinkConfig {
            handshake_timeout_ms: Some(200),
            recv_timeout_ms: Some(20),
            ..Default::default()
        })
        .unwrap();
        let endpoint = format!("udp:127.0.0.1:{}", port);

        for round in 0..3 {
            let st = worker.start(&endpoint).unwrap().join();
            match st {
                ConnectionStatus::Failed(reason) => {
                    assert!(reason.contains("timeout"), "round {}: {}", round, reason)
                }
                other => panic!("round {}: unexpected {:?}", round, other),
            }
        }
    }
}
