//! Scripted in-memory vehicle link.

use anyhow::Result;
use mavlink::{
    common::{MavAutopilot, MavMessage, MavModeFlag, MavType, HEARTBEAT_DATA},
    MavHeader,
};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use crate::endpoint::Endpoint;
use crate::mav::{Connector, LinkError, VehicleLink};

enum Step {
    Frame(MavHeader, MavMessage),
    Garbage(String),
    Close,
}

/// Replays queued frames in order, then idles (each receive waits out its
/// timeout). Everything sent is recorded.
#[derive(Default)]
pub struct ScriptedLink {
    inbound: Mutex<VecDeque<Step>>,
    sent: Mutex<Vec<MavMessage>>,
    fail_sends: Mutex<bool>,
}

impl ScriptedLink {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn push_frame(&self, msg: MavMessage) {
        self.push_frame_from(MavHeader { system_id: 1, component_id: 1, sequence: 0 }, msg);
    }

    pub fn push_frame_from(&self, hdr: MavHeader, msg: MavMessage) {
        self.queue(Step::Frame(hdr, msg));
    }

    /// A frame that fails to decode.
    pub fn push_garbage(&self, why: &str) {
        self.queue(Step::Garbage(why.to_string()));
    }

    pub fn push_close(&self) {
        self.queue(Step::Close);
    }

    pub fn fail_sends(&self, fail: bool) {
        *self.fail_sends.lock().unwrap_or_else(PoisonError::into_inner) = fail;
    }

    pub fn sent(&self) -> Vec<MavMessage> {
        self.sent.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    fn queue(&self, step: Step) {
        self.inbound.lock().unwrap_or_else(PoisonError::into_inner).push_back(step);
    }
}

impl VehicleLink for ScriptedLink {
    fn recv_timeout(&self, timeout: Duration) -> Result<Option<(MavHeader, MavMessage)>, LinkError> {
        let next = self.inbound.lock().unwrap_or_else(PoisonError::into_inner).pop_front();
        match next {
            Some(Step::Frame(hdr, msg)) => Ok(Some((hdr, msg))),
            Some(Step::Garbage(why)) => Err(LinkError::Decode(why)),
            Some(Step::Close) => Err(LinkError::Closed),
            None => {
                std::thread::sleep(timeout);
                Ok(None)
            }
        }
    }

    fn send(&self, msg: &MavMessage) -> Result<(), LinkError> {
        if *self.fail_sends.lock().unwrap_or_else(PoisonError::into_inner) {
            return Err(LinkError::Send("scripted failure".into()));
        }
        self.sent.lock().unwrap_or_else(PoisonError::into_inner).push(msg.clone());
        Ok(())
    }
}

/// Hands out the same scripted link for every endpoint.
pub struct ScriptedConnector {
    link: Arc<ScriptedLink>,
}

impl ScriptedConnector {
    pub fn new(link: Arc<ScriptedLink>) -> Self {
        Self { link }
    }
}

impl Connector for ScriptedConnector {
    fn connect(&self, _endpoint: &Endpoint) -> Result<Arc<dyn VehicleLink>> {
        let link: Arc<dyn VehicleLink> = self.link.clone();
        Ok(link)
    }
}

/// An ArduPilot quadrotor heartbeat.
pub fn vehicle_heartbeat(custom_mode: u32, armed: bool) -> MavMessage {
    let mut base_mode = MavModeFlag::MAV_MODE_FLAG_CUSTOM_MODE_ENABLED;
    if armed {
        base_mode |= MavModeFlag::MAV_MODE_FLAG_SAFETY_ARMED;
    }
    MavMessage::HEARTBEAT(HEARTBEAT_DATA {
        custom_mode,
        mavtype: MavType::MAV_TYPE_QUADROTOR,
        autopilot: MavAutopilot::MAV_AUTOPILOT_ARDUPILOTMEGA,
        base_mode,
        ..Default::default()
    })
}
