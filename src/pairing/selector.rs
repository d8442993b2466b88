//! Picks the engine for the generation announced in the app's handshake

use thiserror::Error;

use super::engine::PairingEngine;
use crate::protocol::messages::{Handshake, MessageError};

/// Handshake failures; both end pairing for the connection
#[derive(Debug, Error)]
pub enum HandshakeError {
    /// Handshake bytes could not be parsed
    #[error("malformed handshake: {0}")]
    Malformed(#[from] MessageError),

    /// Version the robot does not speak
    #[error("unsupported protocol version {0}")]
    UnsupportedVersion(u32),
}

/// Build the engine for the app's handshake
///
/// # Errors
///
/// Returns `HandshakeError` if the message is not a handshake or announces a
/// generation this crate does not speak.
pub fn select_engine(message: &[u8]) -> Result<PairingEngine, HandshakeError> {
    let handshake = Handshake::decode(message)?;
    let version = handshake
        .supported_version()
        .ok_or(HandshakeError::UnsupportedVersion(handshake.version))?;

    tracing::info!(%version, "App handshake accepted");
    Ok(PairingEngine::new(version))
}
