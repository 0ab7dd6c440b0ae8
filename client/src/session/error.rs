use super::machine::DisconnectReason;
use std::io;
use thiserror::Error;

/// Session errors
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("Not connected to the server")]
    NotConnected,

    #[error("Session already started")]
    AlreadyStarted,

    #[error("A tab completion request is already pending")]
    TabCompletePending,

    #[error("Session closed: {0}")]
    Closed(DisconnectReason),

    #[error("Transport error: {0}")]
    Transport(#[from] io::Error),
}
