use anyhow::{Context, Result};
use mavlink::{
    common::{
        MavAutopilot, MavCmd, MavDataStream, MavMessage, MavModeFlag, MavState, MavType,
        COMMAND_LONG_DATA, HEARTBEAT_DATA, REQUEST_DATA_STREAM_DATA,
    },
    error::MessageReadError,
    MavConnection, MavHeader, MavlinkVersion,
};
use std::io;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr, UdpSocket};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{mpsc, Arc, Mutex, PoisonError};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

use crate::endpoint::{Endpoint, Transport};

#[derive(Debug, thiserror::Error)]
pub enum LinkError {
    #[error("link i/o: {0}")]
    Io(#[from] io::Error),
    #[error("frame decode: {0}")]
    Decode(String),
    #[error("send failed: {0}")]
    Send(String),
    #[error("link closed")]
    Closed,
}

/// Transport seam between the connection worker and the wire.
pub trait VehicleLink: Send + Sync {
    /// Next inbound frame, or `Ok(None)` if nothing arrived within `timeout`.
    fn recv_timeout(&self, timeout: Duration) -> Result<Option<(MavHeader, MavMessage)>, LinkError>;

    fn send(&self, msg: &MavMessage) -> Result<(), LinkError>;
}

/// Opens a link for an endpoint. Called on the worker thread.
pub trait Connector: Send + Sync {
    fn connect(&self, endpoint: &Endpoint) -> Result<Arc<dyn VehicleLink>>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VehicleTarget {
    pub system: u8,
    pub component: u8,
}

#[derive(Debug, Clone)]
pub struct MavlinkConnector {
    pub sys_id: u8,
    pub comp_id: u8,
}

impl Connector for MavlinkConnector {
    fn connect(&self, endpoint: &Endpoint) -> Result<Arc<dyn VehicleLink>> {
        if endpoint.is_serial() {
            // quick validate device so a missing port fails with a clear reason
            let baud = endpoint.baud.unwrap_or(57600);
            let _ = tokio_serial::new(&endpoint.address, baud)
                .open()
                .with_context(|| format!("open serial device {}", endpoint.address))?;
        }

        let url = endpoint.mavlink_url();
        let conn = mavlink::connect::<MavMessage>(&url)
            .with_context(|| format!("mavlink connect {}", url))?;
        info!("link: transport open {}", url);

        let hdr = MavHeader { system_id: self.sys_id, component_id: self.comp_id, sequence: 0 };
        Ok(Arc::new(FcLink::spawn(Arc::from(conn), hdr, wake_addr(endpoint))?))
    }
}

/// Where to poke a listening UDP socket so its blocked reader returns.
fn wake_addr(endpoint: &Endpoint) -> Option<SocketAddr> {
    if endpoint.transport != Transport::UdpIn {
        return None;
    }
    let mut addr: SocketAddr = endpoint.address.parse().ok()?;
    if addr.ip().is_unspecified() {
        let loopback = match addr {
            SocketAddr::V4(_) => IpAddr::V4(Ipv4Addr::LOCALHOST),
            SocketAddr::V6(_) => IpAddr::V6(Ipv6Addr::LOCALHOST),
        };
        addr.set_ip(loopback);
    }
    Some(addr)
}

type Inbound = Result<(MavHeader, MavMessage), LinkError>;

const READER_EXIT_WAIT: Duration = Duration::from_millis(500);

/// MAVLink connection with a reader thread, so the worker can wait on
/// frames with a timeout even though `recv` blocks.
///
/// Dropping the link stops the reader. A listening UDP socket is woken with
/// one frame sent to itself and released before `drop` returns; other
/// transports let the reader go on its next frame or transport error.
pub struct FcLink {
    conn: Arc<dyn MavConnection<MavMessage> + Send + Sync>,
    hdr: Mutex<MavHeader>,
    rx: Mutex<mpsc::Receiver<Inbound>>,
    closing: Arc<AtomicBool>,
    reader: Option<JoinHandle<()>>,
    wake: Option<SocketAddr>,
}

impl FcLink {
    fn spawn(
        conn: Arc<dyn MavConnection<MavMessage> + Send + Sync>,
        hdr: MavHeader,
        wake: Option<SocketAddr>,
    ) -> Result<Self> {
        let (tx, rx) = mpsc::channel();
        let closing = Arc::new(AtomicBool::new(false));
        let reader = {
            let conn = conn.clone();
            let closing = closing.clone();
            std::thread::Builder::new()
                .name("mavlink-reader".into())
                .spawn(move || read_loop(conn, tx, closing))
                .context("spawn mavlink reader")?
        };
        Ok(Self { conn, hdr: Mutex::new(hdr), rx: Mutex::new(rx), closing, reader: Some(reader), wake })
    }
}

impl Drop for FcLink {
    fn drop(&mut self) {
        self.closing.store(true, Ordering::Relaxed);
        let (Some(reader), Some(addr)) = (self.reader.take(), self.wake) else { return };
        if let Err(e) = wake_reader(addr) {
            warn!("link: could not wake reader on {}: {:#}", addr, e);
            return;
        }
        let deadline = Instant::now() + READER_EXIT_WAIT;
        while !reader.is_finished() {
            if Instant::now() >= deadline {
                warn!("link: reader on {} still blocked, socket stays bound", addr);
                return;
            }
            std::thread::sleep(Duration::from_millis(2));
        }
        if reader.join().is_err() {
            warn!("link: mavlink reader panicked");
        }
    }
}

fn wake_reader(addr: SocketAddr) -> Result<()> {
    let mut frame = Vec::new();
    mavlink::write_versioned_msg(&mut frame, MavlinkVersion::V2, MavHeader::default(), &gcs_heartbeat_frame())
        .map_err(|e| anyhow::anyhow!("encode wake frame: {:?}", e))?;
    let local: SocketAddr = match addr {
        SocketAddr::V4(_) => (Ipv4Addr::UNSPECIFIED, 0).into(),
        SocketAddr::V6(_) => (Ipv6Addr::UNSPECIFIED, 0).into(),
    };
    UdpSocket::bind(local)?.send_to(&frame, addr)?;
    Ok(())
}

fn read_loop(
    conn: Arc<dyn MavConnection<MavMessage> + Send + Sync>,
    tx: mpsc::Sender<Inbound>,
    closing: Arc<AtomicBool>,
) {
    loop {
        let res = conn.recv();
        if closing.load(Ordering::Relaxed) {
            debug!("link: reader exiting, link dropped");
            return;
        }
        let item = res.map_err(read_error);
        let closed = matches!(item, Err(LinkError::Closed));
        if matches!(item, Err(LinkError::Io(_))) {
            std::thread::sleep(Duration::from_millis(50));
        }
        if tx.send(item).is_err() || closed {
            return;
        }
    }
}

fn read_error(e: MessageReadError) -> LinkError {
    match e {
        MessageReadError::Io(e) if is_closed(&e) => LinkError::Closed,
        MessageReadError::Io(e) => LinkError::Io(e),
        MessageReadError::Parse(e) => LinkError::Decode(format!("{:?}", e)),
    }
}

fn is_closed(e: &io::Error) -> bool {
    matches!(
        e.kind(),
        io::ErrorKind::UnexpectedEof
            | io::ErrorKind::ConnectionReset
            | io::ErrorKind::ConnectionAborted
            | io::ErrorKind::BrokenPipe
    )
}

impl VehicleLink for FcLink {
    fn recv_timeout(&self, timeout: Duration) -> Result<Option<(MavHeader, MavMessage)>, LinkError> {
        let rx = self.rx.lock().unwrap_or_else(PoisonError::into_inner);
        match rx.recv_timeout(timeout) {
            Ok(item) => item.map(Some),
            Err(mpsc::RecvTimeoutError::Timeout) => Ok(None),
            Err(mpsc::RecvTimeoutError::Disconnected) => Err(LinkError::Closed),
        }
    }

    fn send(&self, msg: &MavMessage) -> Result<(), LinkError> {
        let mut hdr = self.hdr.lock().unwrap_or_else(PoisonError::into_inner);
        hdr.sequence = hdr.sequence.wrapping_add(1);
        self.conn
            .send(&hdr, msg)
            .map_err(|e| LinkError::Send(format!("{:?}", e)))?;
        Ok(())
    }
}

// ----- Outbound frames -----

fn command_long(target: VehicleTarget, command: MavCmd, param1: f32, param2: f32) -> MavMessage {
    MavMessage::COMMAND_LONG(COMMAND_LONG_DATA {
        target_system: target.system,
        target_component: target.component,
        command,
        confirmation: 0,
        param1,
        param2,
        param3: 0.0,
        param4: 0.0,
        param5: 0.0,
        param6: 0.0,
        param7: 0.0,
    })
}

pub fn arm_disarm_frame(target: VehicleTarget, arm: bool) -> MavMessage {
    let p1 = if arm { 1.0 } else { 0.0 };
    command_long(target, MavCmd::MAV_CMD_COMPONENT_ARM_DISARM, p1, 0.0)
}

pub fn set_mode_frame(target: VehicleTarget, custom_mode: u32) -> MavMessage {
    command_long(
        target,
        MavCmd::MAV_CMD_DO_SET_MODE,
        MavModeFlag::MAV_MODE_FLAG_CUSTOM_MODE_ENABLED.bits() as f32,
        custom_mode as f32,
    )
}

pub fn stream_request_frame(target: VehicleTarget, stream: MavDataStream, rate_hz: u16) -> MavMessage {
    MavMessage::REQUEST_DATA_STREAM(REQUEST_DATA_STREAM_DATA {
        req_message_rate: rate_hz,
        target_system: target.system,
        target_component: target.component,
        req_stream_id: stream as u8,
        start_stop: 1,
    })
}

pub fn gcs_heartbeat_frame() -> MavMessage {
    MavMessage::HEARTBEAT(HEARTBEAT_DATA {
        custom_mode: 0,
        mavtype: MavType::MAV_TYPE_GCS,
        autopilot: MavAutopilot::MAV_AUTOPILOT_INVALID,
        base_mode: MavModeFlag::empty(),
        system_status: MavState::MAV_STATE_ACTIVE,
        mavlink_version: 3,
    })
}

/// Position, extended status, attitude and VFR HUD (ground speed).
pub const TELEMETRY_STREAMS: [MavDataStream; 4] = [
    MavDataStream::MAV_DATA_STREAM_POSITION,
    MavDataStream::MAV_DATA_STREAM_EXTENDED_STATUS,
    MavDataStream::MAV_DATA_STREAM_EXTRA1,
    MavDataStream::MAV_DATA_STREAM_EXTRA2,
];

/// Best effort: failures are logged and the session carries on.
pub fn request_streams(link: &dyn VehicleLink, target: VehicleTarget, rate_hz: u16) {
    for stream in TELEMETRY_STREAMS {
        match link.send(&stream_request_frame(target, stream, rate_hz)) {
            Ok(()) => debug!("link: requested {:?} at {} Hz", stream, rate_hz),
            Err(e) => warn!("link: stream request {:?} failed: {}", stream, e),
        }
    }
}
