//! Companion app simulator
//!
//! Speaks the client side of the pairing protocol over its own
//! [`EncryptedTransport`]. The robot's outbound packets are fed in with
//! [`MockClient::receive`]; everything the client sends comes back as packets
//! for the robot.

use crate::error::Result;
use crate::protocol::crypto::{Nonce, Role, SessionKeys, X25519KeyPair, X25519PublicKey, kx};
use crate::protocol::messages::{
    Capabilities, ConnectionType, HANDSHAKE_LEN, HANDSHAKE_TAG, Handshake, MessageError,
    MessageTag, ProtocolVersion, RtsMessage,
};
use crate::transport::{EncryptedTransport, TransportError, TransportEvent};

use super::RecordingChannel;

/// What the client made of one robot message
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Inbound {
    /// Robot handshake carrying its version
    Handshake(u32),
    /// Decoded application message
    Message(RtsMessage),
    /// Message the client could not decode
    Malformed(MessageError),
    /// Encrypted message that failed to open
    DecryptionFailed,
}

impl Inbound {
    /// The decoded message, if any
    #[must_use]
    pub fn message(&self) -> Option<&RtsMessage> {
        match self {
            Self::Message(message) => Some(message),
            _ => None,
        }
    }
}

/// Client side of a pairing connection
pub struct MockClient {
    caps: Capabilities,
    identity: X25519KeyPair,
    transport: EncryptedTransport,
    wire: RecordingChannel,
    robot_public_key: Option<X25519PublicKey>,
    keys: Option<SessionKeys>,
    received: Vec<Inbound>,
}

impl MockClient {
    /// Client speaking `version` with a fresh identity
    ///
    /// # Errors
    ///
    /// Returns an error if `max_packet_size` is out of range.
    pub fn new(version: ProtocolVersion, max_packet_size: usize) -> Result<Self> {
        Self::with_identity(version, max_packet_size, X25519KeyPair::generate())
    }

    /// Client speaking `version` with `identity`
    ///
    /// # Errors
    ///
    /// Returns an error if `max_packet_size` is out of range.
    pub fn with_identity(
        version: ProtocolVersion,
        max_packet_size: usize,
        identity: X25519KeyPair,
    ) -> Result<Self> {
        let wire = RecordingChannel::new();
        let transport = EncryptedTransport::new(Box::new(wire.clone()), max_packet_size)?;
        Ok(Self {
            caps: version.capabilities(),
            identity,
            transport,
            wire,
            robot_public_key: None,
            keys: None,
            received: Vec::new(),
        })
    }

    /// Start over on a new connection, keeping identity and derived keys
    pub fn new_connection(&mut self) {
        self.transport.clear_secrets();
        self.robot_public_key = None;
        self.received.clear();
        let _ = self.wire.take_packets();
    }

    /// Negotiated feature set
    #[must_use]
    pub fn capabilities(&self) -> &Capabilities {
        &self.caps
    }

    /// Client public key
    #[must_use]
    pub fn public_key(&self) -> [u8; 32] {
        *self.identity.public_key().as_bytes()
    }

    /// Robot public key from the last connection request
    #[must_use]
    pub fn robot_public_key(&self) -> Option<[u8; 32]> {
        self.robot_public_key.map(|key| *key.as_bytes())
    }

    /// Whether keys from an earlier pairing are held
    #[must_use]
    pub fn has_keys(&self) -> bool {
        self.keys.is_some()
    }

    /// Everything received on this connection
    #[must_use]
    pub fn received(&self) -> &[Inbound] {
        &self.received
    }

    /// Handshake packets announcing the client's version
    ///
    /// # Errors
    ///
    /// Returns an error if the transport rejects the packets.
    pub fn handshake(&mut self) -> Result<Vec<Vec<u8>>> {
        self.handshake_with(self.caps.version.as_u32())
    }

    /// Handshake packets announcing an arbitrary version number
    ///
    /// # Errors
    ///
    /// Returns an error if the transport rejects the packets.
    pub fn handshake_with(&mut self, version: u32) -> Result<Vec<Vec<u8>>> {
        let handshake = Handshake { version }.encode();
        self.send_raw(&handshake)
    }

    /// First-time connection response
    ///
    /// # Errors
    ///
    /// Returns an error if the transport rejects the packets.
    pub fn first_time_response(&mut self) -> Result<Vec<Vec<u8>>> {
        self.send(&RtsMessage::ConnResponse {
            connection_type: ConnectionType::FirstTimePair,
            public_key: self.public_key(),
        })
    }

    /// Derive session keys from the PIN shown on the robot
    ///
    /// # Errors
    ///
    /// Returns an error if no robot key was received or the exchange fails.
    pub fn enter_pin(&mut self, pin: &str) -> Result<()> {
        let robot_key = self
            .robot_public_key
            .ok_or(TransportError::NotEstablished)?;
        let keys = kx::pin_bound_session_keys(
            Role::Client,
            &self.identity,
            &robot_key,
            pin.as_bytes(),
        )?;
        self.transport.set_crypto_keys(keys.clone());
        self.keys = Some(keys);
        Ok(())
    }

    /// Reconnect response using the keys from the last pairing
    ///
    /// # Errors
    ///
    /// Returns an error if the transport rejects the packets.
    pub fn reconnect_response(&mut self) -> Result<Vec<Vec<u8>>> {
        if let Some(keys) = &self.keys {
            self.transport.set_crypto_keys(keys.clone());
        }
        self.send(&RtsMessage::ConnResponse {
            connection_type: ConnectionType::Reconnection,
            public_key: self.public_key(),
        })
    }

    /// Acknowledge the nonces and switch to the encrypted channel
    ///
    /// # Errors
    ///
    /// Returns an error if the transport rejects the packets.
    pub fn ack_nonces(&mut self) -> Result<Vec<Vec<u8>>> {
        let packets = self.send(&RtsMessage::Ack {
            tag: MessageTag::Nonce as u8,
        })?;
        self.transport.set_encrypted_channel_established(true);
        Ok(packets)
    }

    /// Answer a challenge correctly
    ///
    /// # Errors
    ///
    /// Returns an error if the transport rejects the packets.
    pub fn answer_challenge(&mut self, challenge: u32) -> Result<Vec<Vec<u8>>> {
        self.send(&RtsMessage::Challenge {
            value: challenge.wrapping_add(1),
        })
    }

    /// Encode and send `message` on whichever path is live
    ///
    /// # Errors
    ///
    /// Returns an error if the message does not encode for this version.
    pub fn send(&mut self, message: &RtsMessage) -> Result<Vec<Vec<u8>>> {
        let bytes = message.encode(&self.caps)?;
        if self.transport.is_encrypted_channel_established() {
            self.transport.send_encrypted(&bytes)?;
            Ok(self.wire.take_packets())
        } else {
            self.send_raw(&bytes)
        }
    }

    /// Send raw bytes on the plaintext path
    ///
    /// # Errors
    ///
    /// Returns an error if the transport rejects the packets.
    pub fn send_raw(&mut self, bytes: &[u8]) -> Result<Vec<Vec<u8>>> {
        self.transport.send_plain_text(bytes)?;
        Ok(self.wire.take_packets())
    }

    /// Feed robot packets; returns the complete messages they carried
    pub fn receive(&mut self, packets: &[Vec<u8>]) -> Vec<Inbound> {
        let mut inbound = Vec::new();
        for packet in packets {
            let Some(event) = self.transport.receive_packet(packet) else {
                continue;
            };
            let item = match event {
                TransportEvent::PlainText(bytes) | TransportEvent::Encrypted(bytes) => {
                    self.interpret(&bytes)
                }
                TransportEvent::DecryptionFailed => Inbound::DecryptionFailed,
            };
            inbound.push(item);
        }
        self.received.extend(inbound.iter().cloned());
        inbound
    }

    fn interpret(&mut self, bytes: &[u8]) -> Inbound {
        if bytes.len() == HANDSHAKE_LEN && bytes[0] == HANDSHAKE_TAG {
            return match Handshake::decode(bytes) {
                Ok(handshake) => Inbound::Handshake(handshake.version),
                Err(e) => Inbound::Malformed(e),
            };
        }

        match RtsMessage::decode(bytes, &self.caps) {
            Ok(message) => {
                match &message {
                    RtsMessage::ConnRequest { public_key } => {
                        self.robot_public_key = Some(X25519PublicKey::from(*public_key));
                    }
                    RtsMessage::Nonce {
                        to_robot,
                        to_device,
                    } => self
                        .transport
                        .set_nonces(Nonce::from(*to_robot), Nonce::from(*to_device)),
                    _ => {}
                }
                Inbound::Message(message)
            }
            Err(e) => Inbound::Malformed(e),
        }
    }
}

impl std::fmt::Debug for MockClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MockClient")
            .field("version", &self.caps.version)
            .field("has_keys", &self.keys.is_some())
            .field("received", &self.received.len())
            .finish_non_exhaustive()
    }
}
