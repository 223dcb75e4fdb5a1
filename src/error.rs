//! Error types for the session bridge.
//!
//! Four families reach the caller: argument errors and lifecycle errors are
//! returned synchronously from the submitting call, call failures arrive
//! through the call's continuation, and native protocol errors stay data
//! (`RspInfoField`) attached to notifications.

use crate::session::state::SessionState;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BridgeError {
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Invalid state: cannot {operation} while session is {state}")]
    InvalidState {
        operation: &'static str,
        state: SessionState,
    },

    #[error("Call failed (status {status}): {message}")]
    CallFailed { status: i32, message: String },

    #[error("Native call panicked: {0}")]
    NativePanic(String),

    #[error("Unknown event: {0}")]
    UnknownEvent(String),

    #[error("Host pump stopped before the call completed")]
    Disconnected,

    #[error("Configuration error: {0}")]
    Configuration(String),
}

impl BridgeError {
    /// Status code carried to the continuation. `0` is never used for errors.
    pub fn status(&self) -> i32 {
        match self {
            BridgeError::CallFailed { status, .. } => *status,
            _ => -1,
        }
    }

    pub fn is_lifecycle(&self) -> bool {
        matches!(self, BridgeError::InvalidState { .. })
    }
}

impl From<serde_json::Error> for BridgeError {
    fn from(error: serde_json::Error) -> Self {
        BridgeError::Configuration(format!("JSON error: {error}"))
    }
}

pub type Result<T> = std::result::Result<T, BridgeError>;
