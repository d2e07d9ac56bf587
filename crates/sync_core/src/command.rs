use shared::{domain::ConnectionState, error::SyncError, protocol::Command};
use tracing::debug;

use crate::connection::Connection;

/// Serializes operator commands and hands them to the connection.
///
/// Transmission is fire-and-forget: no queueing, no retry, no delivery
/// guarantee. A send attempted while the connection is not open fails
/// synchronously with a state error and transmits nothing.
#[derive(Clone)]
pub struct CommandSender {
    connection: Connection,
}

impl CommandSender {
    pub(crate) fn new(connection: Connection) -> Self {
        Self { connection }
    }

    pub async fn send(&self, command: &Command) -> Result<(), SyncError> {
        let state = self.connection.state();
        if state != ConnectionState::Open {
            return Err(SyncError::State { state });
        }
        let frame = serde_json::to_string(command).map_err(SyncError::protocol)?;
        debug!(command = command.name(), "sending operator command");
        self.connection.send_text(frame).await
    }
}
