//! Encrypted message transport over a raw BLE packet channel
//!
//! Outbound messages are optionally sealed with XChaCha20-Poly1305 and then
//! framed into packets. Inbound packets are reassembled and, once the
//! encrypted channel is established, opened with the receive key.


use thiserror::Error;

use crate::protocol::crypto::{CryptoError, Nonce, SessionKeys, XChaCha20Poly1305Cipher};
use crate::protocol::framing::{FrameDecoder, FrameEncoder, FrameError};

/// Transport errors
#[derive(Debug, Error)]
pub enum TransportError {
    /// The raw channel refused a packet
    #[error("channel send failed: {0}")]
    Channel(String),

    /// The raw channel is gone
    #[error("channel closed")]
    Closed,

    /// Encrypted send attempted before keys and nonces were installed
    #[error("encrypted channel not established")]
    NotEstablished,

    /// Framing configuration error
    #[error("framing error: {0}")]
    Frame(#[from] FrameError),

    /// Cipher failure on send
    #[error("crypto error: {0}")]
    Crypto(#[from] CryptoError),
}

/// Raw packet sink for one BLE connection
///
/// Implementations push a single framed packet to the peer.
pub trait RawChannel: Send {
    /// Send one packet
    ///
    /// # Errors
    ///
    /// Returns `TransportError` if the packet cannot be queued.
    fn send(&mut self, packet: &[u8]) -> Result<(), TransportError>;
}

/// A complete inbound message
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    /// Message received before the encrypted channel was established
    PlainText(Vec<u8>),
    /// Message decrypted with the session receive key
    Encrypted(Vec<u8>),
    /// Authentication tag did not verify
    DecryptionFailed,
}

/// Plaintext and encrypted messaging over a [`RawChannel`]
pub struct EncryptedTransport {
    channel: Box<dyn RawChannel>,
    encoder: FrameEncoder,
    decoder: FrameDecoder,
    keys: Option<SessionKeys>,
    encrypt_nonce: Nonce,
    decrypt_nonce: Nonce,
    established: bool,
}

impl EncryptedTransport {
    /// Wrap `channel`, framing with `max_packet_size` byte packets
    ///
    /// # Errors
    ///
    /// Returns `TransportError::Frame` for a packet size outside `2..=64`.
    pub fn new(channel: Box<dyn RawChannel>, max_packet_size: usize) -> Result<Self, TransportError> {
        Ok(Self {
            channel,
            encoder: FrameEncoder::new(max_packet_size)?,
            decoder: FrameDecoder::new(),
            keys: None,
            encrypt_nonce: Nonce::default(),
            decrypt_nonce: Nonce::default(),
            established: false,
        })
    }

    /// Send a message without encryption
    ///
    /// # Errors
    ///
    /// Returns `TransportError` if the channel rejects a packet.
    pub fn send_plain_text(&mut self, message: &[u8]) -> Result<(), TransportError> {
        self.send_framed(message)
    }

    /// Seal and send a message
    ///
    /// The send nonce advances once the message is sealed, even when the
    /// channel then fails partway through the packets.
    ///
    /// # Errors
    ///
    /// Returns `TransportError::NotEstablished` before the channel is up, or a
    /// cipher/channel error.
    pub fn send_encrypted(&mut self, message: &[u8]) -> Result<(), TransportError> {
        if !self.established {
            return Err(TransportError::NotEstablished);
        }
        let Some(keys) = &self.keys else {
            return Err(TransportError::NotEstablished);
        };

        let cipher = XChaCha20Poly1305Cipher::new(&keys.encrypt_key)?;
        let sealed = cipher.encrypt(&self.encrypt_nonce, message)?;
        self.encrypt_nonce.increment();
        self.send_framed(&sealed)
    }

    /// Feed one inbound packet
    ///
    /// Returns an event once a whole message has been reassembled.
    pub fn receive_packet(&mut self, packet: &[u8]) -> Option<TransportEvent> {
        let message = self.decoder.push(packet)?;

        if !self.established {
            return Some(TransportEvent::PlainText(message));
        }

        let Some(keys) = &self.keys else {
            tracing::warn!("Encrypted channel established without keys");
            return Some(TransportEvent::DecryptionFailed);
        };

        let opened = XChaCha20Poly1305Cipher::new(&keys.decrypt_key)
            .and_then(|cipher| cipher.decrypt(&self.decrypt_nonce, &message));

        match opened {
            Ok(plaintext) => {
                self.decrypt_nonce.increment();
                Some(TransportEvent::Encrypted(plaintext))
            }
            Err(e) => {
                tracing::warn!(len = message.len(), "Dropping undecryptable message: {}", e);
                Some(TransportEvent::DecryptionFailed)
            }
        }
    }

    /// Install session keys
    pub fn set_crypto_keys(&mut self, keys: SessionKeys) {
        self.keys = Some(keys);
    }

    /// Install the send and receive nonces
    pub fn set_nonces(&mut self, encrypt: Nonce, decrypt: Nonce) {
        self.encrypt_nonce = encrypt;
        self.decrypt_nonce = decrypt;
    }

    /// Switch inbound and outbound messages to the encrypted path
    pub fn set_encrypted_channel_established(&mut self, established: bool) {
        if established != self.established {
            tracing::debug!(established, "Encrypted channel state changed");
        }
        self.established = established;
    }

    /// Whether messages are currently sealed
    #[must_use]
    pub fn is_encrypted_channel_established(&self) -> bool {
        self.established
    }

    /// Negotiated maximum packet size
    #[must_use]
    pub fn max_packet_size(&self) -> usize {
        self.encoder.max_packet_size()
    }

    /// Zero keys and nonces, leave the plaintext path usable
    pub fn clear_secrets(&mut self) {
        // SessionKeys wipes itself on drop
        self.keys = None;
        self.encrypt_nonce.clear();
        self.decrypt_nonce.clear();
        self.established = false;
        self.decoder.reset();
    }

    fn send_framed(&mut self, message: &[u8]) -> Result<(), TransportError> {
        for packet in self.encoder.encode(message) {
            self.channel.send(&packet)?;
        }
        Ok(())
    }
}

impl std::fmt::Debug for EncryptedTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EncryptedTransport")
            .field("max_packet_size", &self.encoder.max_packet_size())
            .field("established", &self.established)
            .field("has_keys", &self.keys.is_some())
            .finish_non_exhaustive()
    }
}
