pub mod doctor;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::net::{IpAddr, Ipv4Addr, SocketAddr, UdpSocket};
use tracing::{debug, info, warn};

use relay_link::{mav, CommandError, SessionHandle};
use relay_proto::{ConnectionStatus, GimbalAxes, OutboundCommand};

#[derive(Debug, Clone, Default, Deserialize)]
pub struct DispatchConfig {
    /// Detection source command port; receives track selections. Default 127.0.0.1:5006.
    pub detection_peer: Option<SocketAddr>,
    /// Payload gimbal control port. Default 127.0.0.1:6010.
    pub gimbal_peer: Option<SocketAddr>,
    pub camera_mode: Option<i64>,
    pub tracking_mode: Option<i64>,
}

impl DispatchConfig {
    pub fn detection_peer(&self) -> SocketAddr {
        self.detection_peer.unwrap_or(SocketAddr::new(LOCALHOST, 5006))
    }

    pub fn gimbal_peer(&self) -> SocketAddr {
        self.gimbal_peer.unwrap_or(SocketAddr::new(LOCALHOST, 6010))
    }

    pub fn camera_mode(&self) -> i64 {
        self.camera_mode.unwrap_or(1)
    }

    pub fn tracking_mode(&self) -> i64 {
        self.tracking_mode.unwrap_or(1)
    }
}

const LOCALHOST: IpAddr = IpAddr::V4(Ipv4Addr::LOCALHOST);

#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    #[error("no vehicle session")]
    NoSession,
    #[error("vehicle not connected ({0})")]
    NotConnected(ConnectionStatus),
    #[error("unknown flight mode '{name}' (known: {known})")]
    UnknownMode { name: String, known: String },
    #[error("vehicle link: {0}")]
    Link(String),
    #[error("socket: {0}")]
    Socket(#[from] std::io::Error),
    #[error("encode: {0}")]
    Encode(#[from] serde_json::Error),
}

impl From<CommandError> for DispatchError {
    fn from(e: CommandError) -> Self {
        match e {
            CommandError::NotConnected(st) => DispatchError::NotConnected(st),
            CommandError::Link(e) => DispatchError::Link(e.to_string()),
        }
    }
}

/// Selection envelope for the detection source.
#[derive(Debug, Serialize)]
struct SelectPayload<'a> {
    id: i64,
    data: &'a str,
    camera_mode: i64,
    tracking_mode: i64,
}

/// Turns operator intents into outbound traffic. Vehicle commands go over the
/// session's link; payload commands are single UDP datagrams. Nothing blocks
/// and nothing is retried.
pub struct CommandDispatcher {
    cfg: DispatchConfig,
    socket: UdpSocket,
}

impl CommandDispatcher {
    pub fn new(cfg: DispatchConfig) -> Result<Self> {
        let socket = UdpSocket::bind(SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), 0))
            .context("bind dispatch socket")?;
        socket.set_nonblocking(true).context("set dispatch socket non-blocking")?;
        Ok(Self { cfg, socket })
    }

    pub fn config(&self) -> &DispatchConfig {
        &self.cfg
    }

    /// Fire and forget. Failures are logged here; the returned error only
    /// tells the caller what happened.
    pub fn send(&self, cmd: OutboundCommand, session: Option<&SessionHandle>) -> Result<(), DispatchError> {
        let res = self.route(&cmd, session);
        let via = if cmd.needs_session() { "vehicle link" } else { "udp" };
        match &res {
            Ok(()) => info!("dispatch: sent {:?} via {}", cmd, via),
            Err(e) => warn!("dispatch: {:?} dropped ({}): {}", cmd, via, e),
        }
        res
    }

    fn route(&self, cmd: &OutboundCommand, session: Option<&SessionHandle>) -> Result<(), DispatchError> {
        match cmd {
            OutboundCommand::Arm => vehicle(session)?.send_to_vehicle(|t| mav::arm_disarm_frame(t, true))?,
            OutboundCommand::Disarm => vehicle(session)?.send_to_vehicle(|t| mav::arm_disarm_frame(t, false))?,
            OutboundCommand::SetMode(name) => {
                let session = vehicle(session)?;
                let code = session
                    .modes()
                    .code_for(name)
                    .ok_or_else(|| DispatchError::UnknownMode {
                        name: name.clone(),
                        known: session.modes().names().collect::<Vec<_>>().join(", "),
                    })?;
                session.send_to_vehicle(|t| mav::set_mode_frame(t, code))?;
            }
            OutboundCommand::GimbalAxes(axes) => self.send_gimbal(axes)?,
            OutboundCommand::SelectTrack { id, aux_data } => self.send_select(*id, aux_data)?,
        }
        Ok(())
    }

    fn send_gimbal(&self, axes: &GimbalAxes) -> Result<(), DispatchError> {
        let wire = axes.to_wire();
        let peer = self.cfg.gimbal_peer();
        self.socket.send_to(wire.as_bytes(), peer)?;
        debug!("dispatch: gimbal '{}' -> {}", wire, peer);
        Ok(())
    }

    fn send_select(&self, id: i64, aux_data: &str) -> Result<(), DispatchError> {
        let payload = serde_json::to_vec(&SelectPayload {
            id,
            data: aux_data,
            camera_mode: self.cfg.camera_mode(),
            tracking_mode: self.cfg.tracking_mode(),
        })?;
        let peer = self.cfg.detection_peer();
        self.socket.send_to(&payload, peer)?;
        debug!("dispatch: select {} -> {}", id, peer);
        Ok(())
    }
}

fn vehicle(session: Option<&SessionHandle>) -> Result<&SessionHandle, DispatchError> {
    session.ok_or(DispatchError::NoSession)
}
