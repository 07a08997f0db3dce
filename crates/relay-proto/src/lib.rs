//! Shared data model for the ground-control relay.
//!
//! Everything in here is plain data: the connection worker, the ingestion
//! pollers and the command dispatcher exchange these types by value.

pub mod command;
pub mod telemetry;
pub mod track;

pub use command::{GimbalAxes, OutboundCommand};
pub use telemetry::{ConnectionStatus, SessionId, TelemetrySnapshot};
pub use track::{ObjectTrack, PinRecord, Rect};
