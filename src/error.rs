use thiserror::Error;

use crate::config::ConfigError;
use crate::executor::ExecutorError;
use crate::protocol::crypto::CryptoError;
use crate::protocol::framing::FrameError;
use crate::protocol::messages::MessageError;
use crate::storage::StorageError;
use crate::transport::TransportError;

/// Errors that can occur during pairing operations
#[derive(Debug, Error)]
pub enum PairlinkError {
    /// Key generation, agreement or AEAD failure
    #[error("crypto error: {0}")]
    Crypto(#[from] CryptoError),

    /// Packet framing error
    #[error("framing error: {0}")]
    Frame(#[from] FrameError),

    /// Message codec error
    #[error("message error: {0}")]
    Message(#[from] MessageError),

    /// Transport error
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    /// Session store error
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    /// Task executor error
    #[error("executor error: {0}")]
    Executor(#[from] ExecutorError),

    /// Configuration error
    #[error("config error: {0}")]
    Config(#[from] ConfigError),

    /// General I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The connection driver stopped
    #[error("session closed")]
    SessionClosed,
}

impl PairlinkError {
    /// Check if this error is recoverable by retrying
    #[must_use]
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Self::Io(_)
                | Self::Storage(StorageError::Io(_))
                | Self::Transport(TransportError::Channel(_))
                | Self::Message(_)
        )
    }

    /// Check if this error means the connection is gone
    #[must_use]
    pub fn is_connection_lost(&self) -> bool {
        matches!(
            self,
            Self::SessionClosed | Self::Transport(TransportError::Closed)
        )
    }
}

/// Result type alias for pairing operations
pub type Result<T> = std::result::Result<T, PairlinkError>;
