use thiserror::Error;

use crate::domain::ConnectionState;

/// Error taxonomy of the synchronization layer.
///
/// `Protocol` errors are recovered locally (the offending frame or pair is
/// dropped); `Transport` and `State` errors surface to the subscription's
/// owner, which decides whether to rebuild.
#[derive(Debug, Clone, Error)]
pub enum SyncError {
    #[error("transport failure: {0}")]
    Transport(String),

    #[error("protocol violation: {0}")]
    Protocol(String),

    #[error("cannot send while connection is {state}")]
    State { state: ConnectionState },
}

impl SyncError {
    pub fn transport(err: impl std::fmt::Display) -> Self {
        SyncError::Transport(err.to_string())
    }

    pub fn protocol(err: impl std::fmt::Display) -> Self {
        SyncError::Protocol(err.to_string())
    }

    pub fn is_protocol(&self) -> bool {
        matches!(self, SyncError::Protocol(_))
    }
}
