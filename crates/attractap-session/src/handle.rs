//! Handle for talking to a running session from the UI side.

use crate::error::{Result, SessionError};
use crate::state::SessionState;
use attractap_core::{ConnectionStatus, ServerConfig};
use serde::Serialize;
use tokio::sync::{mpsc, watch};

/// Local intents queued for the session task.
#[derive(Debug)]
pub(crate) enum SessionCommand {
    /// The user dismissed the current prompt.
    Cancel,
    /// The user picked an option of a `SELECT_ITEM` dialog.
    SelectItem(String),
    SetServer(ServerConfig),
    Shutdown,
}

/// Session status as published to observers.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize)]
pub struct SessionStatus {
    pub state: SessionState,
    pub reader_name: Option<String>,
    /// Trust anchor in use for a secure server.
    pub certificate: Option<String>,
}

impl SessionStatus {
    pub fn is_authenticated(&self) -> bool {
        self.state == SessionState::Authenticated
    }
}

impl From<&SessionStatus> for ConnectionStatus {
    fn from(status: &SessionStatus) -> Self {
        ConnectionStatus {
            connected: status.state.is_connected(),
            authenticated: status.is_authenticated(),
            status: status.state.to_string(),
            reader_name: status.reader_name.clone(),
        }
    }
}

/// Cloneable handle to a [`SessionManager`](crate::SessionManager).
#[derive(Debug, Clone)]
pub struct SessionHandle {
    pub(crate) commands: mpsc::Sender<SessionCommand>,
    pub(crate) status: watch::Receiver<SessionStatus>,
}

impl SessionHandle {
    /// Dismiss the pending prompt and tell the server.
    pub async fn cancel(&self) -> Result<()> {
        self.send(SessionCommand::Cancel).await
    }

    /// Answer the open `SELECT_ITEM` dialog.
    pub async fn select_item(&self, id: impl Into<String>) -> Result<()> {
        self.send(SessionCommand::SelectItem(id.into())).await
    }

    /// Switch to another server. Identity and certificate memory of the
    /// old server are dropped.
    pub async fn set_server_config(&self, server: ServerConfig) -> Result<()> {
        self.send(SessionCommand::SetServer(server)).await
    }

    /// Ask the session loop to close the connection and return.
    pub async fn shutdown(&self) -> Result<()> {
        self.send(SessionCommand::Shutdown).await
    }

    pub fn status(&self) -> SessionStatus {
        self.status.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<SessionStatus> {
        self.status.clone()
    }

    async fn send(&self, command: SessionCommand) -> Result<()> {
        self.commands
            .send(command)
            .await
            .map_err(|_| SessionError::Stopped)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_connection_status_from_session_status() {
        let status = SessionStatus {
            state: SessionState::Authenticated,
            reader_name: Some("Workshop".to_string()),
            certificate: None,
        };
        let connection = ConnectionStatus::from(&status);
        assert!(connection.connected);
        assert!(connection.authenticated);
        assert_eq!(connection.status, "Authenticated");
        assert_eq!(connection.reader_name.as_deref(), Some("Workshop"));
    }

    #[tokio::test]
    async fn test_stopped_session() {
        let (commands, receiver) = mpsc::channel(1);
        let (_status_tx, status) = watch::channel(SessionStatus::default());
        drop(receiver);
        let handle = SessionHandle { commands, status };
        assert!(matches!(handle.cancel().await, Err(SessionError::Stopped)));
    }
}
