//! Protocol generations and the fixed handshake

use super::MessageError;

/// Tag byte of the handshake message
pub const HANDSHAKE_TAG: u8 = 0x01;

/// Handshake length: tag plus a little-endian `u32` version
pub const HANDSHAKE_LEN: usize = 5;

/// Wire-format generation negotiated once per connection
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ProtocolVersion {
    /// Generation shipped on factory firmware
    Factory = 2,
    /// Adds cloud sessions and WiFi forget
    V3 = 3,
    /// Adds app connection ids and explicit responses
    V4 = 4,
    /// Adds client name and app id to cloud sessions
    Current = 5,
}

impl ProtocolVersion {
    /// All generations this crate speaks, oldest first
    pub const SUPPORTED: [Self; 4] = [Self::Factory, Self::V3, Self::V4, Self::Current];

    /// Look up a generation by its wire number
    #[must_use]
    pub fn from_wire(version: u32) -> Option<Self> {
        match version {
            2 => Some(Self::Factory),
            3 => Some(Self::V3),
            4 => Some(Self::V4),
            5 => Some(Self::Current),
            _ => None,
        }
    }

    /// Wire number
    #[must_use]
    pub fn as_u32(self) -> u32 {
        self as u32
    }

    /// Envelope byte carried in every message of this generation
    #[must_use]
    pub fn as_u8(self) -> u8 {
        self as u8
    }

    /// Feature set of this generation
    #[must_use]
    pub fn capabilities(self) -> Capabilities {
        Capabilities::for_version(self)
    }
}

impl std::fmt::Display for ProtocolVersion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "v{}", self.as_u32())
    }
}

/// Which optional messages and fields a generation carries
///
/// One engine serves every generation; it consults this value instead of
/// branching on version numbers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[allow(clippy::struct_excessive_bools)]
pub struct Capabilities {
    /// Negotiated generation
    pub version: ProtocolVersion,
    /// Cloud session request/response messages
    pub cloud_session: bool,
    /// Cloud session request carries client name and app id
    pub cloud_client_identity: bool,
    /// WiFi forget request/response messages
    pub wifi_forget: bool,
    /// App connection id request/response messages
    pub app_connection_id: bool,
    /// Generic `Response` message for explicit rejections
    pub response_message: bool,
    /// Scan entries carry the `provisioned` flag
    pub scan_provisioned: bool,
    /// Connect responses carry the connect result code
    pub connect_result: bool,
    /// Status carries the owner flag
    pub status_owner: bool,
    /// Status carries the serial number
    pub status_serial: bool,
    /// Status carries the cloud-authorized flag
    pub status_cloud_authorized: bool,
    /// First-time pairs on an owned robot cannot be completed
    pub owner_blocks_first_pair: bool,
}

impl Capabilities {
    /// Capabilities of `version`
    #[must_use]
    pub fn for_version(version: ProtocolVersion) -> Self {
        let at_least = |v: ProtocolVersion| version >= v;
        Self {
            version,
            cloud_session: at_least(ProtocolVersion::V3),
            cloud_client_identity: at_least(ProtocolVersion::Current),
            wifi_forget: at_least(ProtocolVersion::V3),
            app_connection_id: at_least(ProtocolVersion::V4),
            response_message: at_least(ProtocolVersion::V4),
            scan_provisioned: at_least(ProtocolVersion::V3),
            connect_result: at_least(ProtocolVersion::V3),
            status_owner: at_least(ProtocolVersion::V3),
            status_serial: at_least(ProtocolVersion::V4),
            status_cloud_authorized: at_least(ProtocolVersion::Current),
            owner_blocks_first_pair: version == ProtocolVersion::Factory,
        }
    }

    /// App id reported to the cloud for generations that do not send one
    #[must_use]
    pub fn default_app_id(&self) -> &'static str {
        match self.version {
            ProtocolVersion::Factory => "bleV2",
            ProtocolVersion::V3 => "bleV3",
            ProtocolVersion::V4 => "bleV4",
            ProtocolVersion::Current => "bleV5",
        }
    }
}

/// The version handshake
///
/// This layout is the compatibility anchor between every robot and every app
/// ever shipped and must never change.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Handshake {
    /// Raw version number announced by the sender
    pub version: u32,
}

impl Handshake {
    /// Handshake announcing `version`
    #[must_use]
    pub fn new(version: ProtocolVersion) -> Self {
        Self {
            version: version.as_u32(),
        }
    }

    /// Serialize to the fixed five-byte layout
    #[must_use]
    pub fn encode(&self) -> [u8; HANDSHAKE_LEN] {
        let mut out = [0u8; HANDSHAKE_LEN];
        out[0] = HANDSHAKE_TAG;
        out[1..].copy_from_slice(&self.version.to_le_bytes());
        out
    }

    /// Parse a handshake; extra trailing bytes are ignored
    ///
    /// # Errors
    ///
    /// Returns `MessageError::NotHandshake` for a different tag and
    /// `MessageError::Truncated` for a short message.
    pub fn decode(bytes: &[u8]) -> Result<Self, MessageError> {
        match bytes.first() {
            Some(&HANDSHAKE_TAG) => {}
            Some(&tag) => return Err(MessageError::NotHandshake(tag)),
            None => {
                return Err(MessageError::Truncated {
                    needed: HANDSHAKE_LEN,
                    available: 0,
                });
            }
        }

        let Some(raw) = bytes.get(1..HANDSHAKE_LEN) else {
            return Err(MessageError::Truncated {
                needed: HANDSHAKE_LEN,
                available: bytes.len(),
            });
        };

        let mut version = [0u8; 4];
        version.copy_from_slice(raw);
        Ok(Self {
            version: u32::from_le_bytes(version),
        })
    }

    /// The announced generation, if this crate supports it
    #[must_use]
    pub fn supported_version(&self) -> Option<ProtocolVersion> {
        ProtocolVersion::from_wire(self.version)
    }
}
