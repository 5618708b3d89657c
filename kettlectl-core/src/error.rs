//! Core error types.

use crate::command::CommandState;
use kettlectl_protocol::ProtocolError;
use thiserror::Error;

/// Errors returned by the engine's command surface.
#[derive(Debug, Error)]
pub enum CoreError {
    #[error("send in progress: chunk {chunk_index}/{total_chunks} (awaiting write: {awaiting_write})")]
    Busy {
        chunk_index: usize,
        total_chunks: usize,
        awaiting_write: bool,
    },

    #[error("command sequence in progress: {0}")]
    SequenceInProgress(CommandState),

    #[error("kettle not connected")]
    NotConnected,

    #[error("handshake not sent; call hello or pair first")]
    HandshakeRequired,

    #[error("registration key not configured")]
    MissingRegistrationKey,

    #[error("transport error: {0}")]
    Transport(#[from] std::io::Error),

    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),
}

impl CoreError {
    /// Returns whether re-issuing the same command later may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            CoreError::Busy { .. } | CoreError::SequenceInProgress(_)
        )
    }

    /// Returns a stable code suitable for host-facing output.
    pub fn error_code(&self) -> &'static str {
        match self {
            CoreError::Busy { .. } => "BUSY",
            CoreError::SequenceInProgress(_) => "SEQUENCE_IN_PROGRESS",
            CoreError::NotConnected => "NOT_CONNECTED",
            CoreError::HandshakeRequired => "HANDSHAKE_REQUIRED",
            CoreError::MissingRegistrationKey => "MISSING_REGISTRATION_KEY",
            CoreError::Transport(_) => "TRANSPORT_ERROR",
            CoreError::Protocol(_) => "PROTOCOL_ERROR",
        }
    }
}
