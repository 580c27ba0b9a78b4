//! `motive-types` – shared vocabulary of the Motive workspace.
//!
//! - [`motion`] – [`MotionRequest`][motion::MotionRequest] and
//!   [`ResolvedCommand`][motion::ResolvedCommand], the per-cycle proposal and
//!   merged output of the priority arbiter.
//! - [`telemetry`] – [`Telemetry`][telemetry::Telemetry], the robot state
//!   snapshot decoded from controller status packets.
//! - [`Event`] / [`EventPayload`] – what the control cycle publishes on the
//!   event bus.
//! - [`MotiveError`] – the workspace-wide error type.

pub mod motion;
pub mod telemetry;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

pub use motion::{Directive, Limit, MotionRequest, ResolvedCommand, RotationRegime};
pub use telemetry::{Pose, RobotIdentity, Telemetry};

/// Unified event wrapper for the event bus.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    pub id: Uuid,
    pub timestamp: DateTime<Utc>,
    /// e.g., "motive-runtime::cycle"
    pub source: String,
    pub payload: EventPayload,
}

impl Event {
    /// Stamp `payload` with a fresh id and the current time.
    pub fn new(source: impl Into<String>, payload: EventPayload) -> Self {
        Self {
            id: Uuid::new_v4(),
            timestamp: Utc::now(),
            source: source.into(),
            payload,
        }
    }
}

/// Variants of data published by the control cycle.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum EventPayload {
    /// Telemetry snapshot taken at the end of a cycle.
    Telemetry(Telemetry),
    /// The command resolved (and sent) during `cycle`.
    Command { cycle: u64, command: ResolvedCommand },
    Alert(Alert),
}

/// Operational conditions worth surfacing to operators.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Alert {
    /// No valid frame arrived within the connection timeout.
    ConnectionLost { silent_ms: u64 },
    ConnectionRestored,
    /// A behavior panicked while producing its request.
    BehaviorFault { behavior: String, details: String },
    /// An iteration took longer than the cycle period.
    CycleOverrun { cycle: u64, elapsed_ms: u64 },
    /// A transport read or write failed.
    TransportFault { details: String },
}

/// Global error type spanning transport failures, protocol violations, and
/// configuration problems.
#[derive(Error, Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum MotiveError {
    #[error("Transport {endpoint}: connect failed: {details}")]
    Connect { endpoint: String, details: String },

    #[error("Transport {endpoint}: cannot resolve address: {details}")]
    Resolve { endpoint: String, details: String },

    #[error("Transport {endpoint}: connection refused")]
    Refused { endpoint: String },

    #[error("Transport {endpoint}: read failed: {details}")]
    Read { endpoint: String, details: String },

    #[error("Transport {endpoint}: write failed: {details}")]
    Write { endpoint: String, details: String },

    #[error("Transport {endpoint} is not open")]
    NotOpen { endpoint: String },

    #[error("Transport {endpoint}: no valid frame for {silent_ms} ms")]
    ConnectionLost { endpoint: String, silent_ms: u64 },

    #[error("Handshake failed: {0}")]
    Handshake(String),

    #[error("Malformed packet: {0}")]
    Malformed(String),

    #[error("Payload too long: {len} bytes (max {max})")]
    PayloadTooLong { len: usize, max: usize },

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Event bus error: {0}")]
    Channel(String),

    #[error("Thread error: {0}")]
    Thread(String),
}

impl MotiveError {
    /// `true` for errors raised by a transport read/write/connect.
    pub fn is_transport(&self) -> bool {
        matches!(
            self,
            MotiveError::Connect { .. }
                | MotiveError::Resolve { .. }
                | MotiveError::Refused { .. }
                | MotiveError::Read { .. }
                | MotiveError::Write { .. }
                | MotiveError::NotOpen { .. }
                | MotiveError::ConnectionLost { .. }
        )
    }
}
