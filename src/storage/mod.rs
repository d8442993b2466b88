//! Persistence for the robot identity and trusted client sessions

mod file;
mod format;
#[cfg(test)]
mod tests;

use zeroize::Zeroize;

pub use self::file::{FileStore, LEGACY_IMAGE_SIZE, migrate_legacy};
pub use self::format::{FORMAT_VERSION, MAGIC, MAX_NAME_LEN};
use crate::protocol::crypto::{CryptoError, X25519KeyPair};

/// Default cap on stored client records
pub const DEFAULT_MAX_CLIENTS: usize = 255;

/// Storage errors
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    /// Reading or replacing the file failed
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Image fails its length or layout checks
    #[error("corrupt session file: {0}")]
    Corrupt(&'static str),

    /// Image written by a newer format
    #[error("unsupported session file version {0}")]
    UnsupportedVersion(u32),

    /// Name does not fit the fixed-size field
    #[error("robot name too long: {0} bytes")]
    NameTooLong(usize),

    /// More clients than the format can hold
    #[error("too many client records: {0}")]
    TooManyClients(usize),

    /// Saved keypair failed validation
    #[error("stored identity is unusable: {0}")]
    InvalidIdentity(#[from] CryptoError),
}

/// Long-term X25519 identity of the robot
#[derive(Clone, PartialEq, Eq)]
pub struct IdentityRecord {
    /// Public key
    pub public_key: [u8; 32],
    /// Secret scalar
    pub secret_key: [u8; 32],
}

impl IdentityRecord {
    /// Capture a keypair
    #[must_use]
    pub fn from_keypair(keypair: &X25519KeyPair) -> Self {
        Self {
            public_key: *keypair.public_key().as_bytes(),
            secret_key: keypair.secret_bytes(),
        }
    }

    /// Rebuild the keypair
    ///
    /// # Errors
    ///
    /// Returns `CryptoError` if the secret cannot be loaded.
    pub fn to_keypair(&self) -> Result<X25519KeyPair, CryptoError> {
        X25519KeyPair::from_bytes(&self.secret_key)
    }
}

impl Drop for IdentityRecord {
    fn drop(&mut self) {
        self.secret_key.zeroize();
    }
}

impl std::fmt::Debug for IdentityRecord {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IdentityRecord")
            .field("public_key", &hex_prefix(&self.public_key))
            .finish_non_exhaustive()
    }
}

/// Session keys agreed with one trusted client
///
/// Keys are stored from the robot's point of view.
#[derive(Clone, PartialEq, Eq)]
pub struct ClientSessionRecord {
    /// Client public key, the lookup key on reconnect
    pub public_key: [u8; 32],
    /// Robot transmit key
    pub encrypt_key: [u8; 32],
    /// Robot receive key
    pub decrypt_key: [u8; 32],
}

impl Drop for ClientSessionRecord {
    fn drop(&mut self) {
        self.encrypt_key.zeroize();
        self.decrypt_key.zeroize();
    }
}

impl std::fmt::Debug for ClientSessionRecord {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientSessionRecord")
            .field("public_key", &hex_prefix(&self.public_key))
            .finish_non_exhaustive()
    }
}

/// Everything the store persists
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SavedSessions {
    /// Robot identity, absent on a fresh device
    pub identity: Option<IdentityRecord>,
    /// Robot name
    pub name: String,
    /// Trusted clients, oldest first
    pub clients: Vec<ClientSessionRecord>,
}

impl SavedSessions {
    /// Name-only image with no keys
    #[must_use]
    pub fn placeholder(name: impl Into<String>) -> Self {
        Self {
            identity: None,
            name: name.into(),
            clients: Vec::new(),
        }
    }

    /// Serialize to the file format
    ///
    /// # Errors
    ///
    /// Returns `StorageError` if the name or the record list do not fit.
    pub fn encode(&self) -> Result<Vec<u8>, StorageError> {
        format::encode(self)
    }

    /// Parse the file format
    ///
    /// # Errors
    ///
    /// Returns `StorageError` for a bad magic, version, name or record count.
    pub fn decode(data: &[u8]) -> Result<Self, StorageError> {
        format::decode(data)
    }

    /// Record for the client with `public_key`
    #[must_use]
    pub fn find_client(&self, public_key: &[u8; 32]) -> Option<&ClientSessionRecord> {
        self.clients.iter().find(|c| &c.public_key == public_key)
    }

    /// Insert or replace a client record, evicting the oldest above `max_clients`
    pub fn upsert_client(&mut self, record: ClientSessionRecord, max_clients: usize) {
        self.clients.retain(|c| c.public_key != record.public_key);
        self.clients.push(record);

        if self.clients.len() > max_clients {
            let excess = self.clients.len() - max_clients;
            tracing::info!(evicted = excess, "Client record cap reached, evicting oldest");
            self.clients.drain(..excess);
        }
    }

    /// Remove a client record; returns whether one existed
    pub fn forget_client(&mut self, public_key: &[u8; 32]) -> bool {
        let before = self.clients.len();
        self.clients.retain(|c| &c.public_key != public_key);
        before != self.clients.len()
    }
}

/// Backend for [`SavedSessions`]
///
/// Loading never fails: a missing or unreadable image is reported as `None`.
pub trait SessionStore: Send {
    /// Load the persisted sessions, `None` if absent or invalid
    fn load(&self) -> Option<SavedSessions>;

    /// Persist `sessions`, replacing the previous image atomically
    ///
    /// # Errors
    ///
    /// Returns `StorageError` if the image cannot be written.
    fn save(&mut self, sessions: &SavedSessions) -> Result<(), StorageError>;
}

/// In-memory store holding the encoded image
#[derive(Debug, Default, Clone)]
pub struct MemoryStore {
    image: Option<Vec<u8>>,
}

impl MemoryStore {
    /// Create an empty store
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Store seeded with a raw image
    #[must_use]
    pub fn with_image(image: Vec<u8>) -> Self {
        Self { image: Some(image) }
    }

    /// Raw image, if anything was saved
    #[must_use]
    pub fn image(&self) -> Option<&[u8]> {
        self.image.as_deref()
    }
}

impl SessionStore for MemoryStore {
    fn load(&self) -> Option<SavedSessions> {
        let image = self.image.as_deref()?;
        match SavedSessions::decode(image) {
            Ok(sessions) => Some(sessions),
            Err(e) => {
                tracing::warn!("Ignoring invalid in-memory session image: {}", e);
                None
            }
        }
    }

    fn save(&mut self, sessions: &SavedSessions) -> Result<(), StorageError> {
        self.image = Some(sessions.encode()?);
        Ok(())
    }
}

fn hex_prefix(key: &[u8; 32]) -> String {
    format!("{:02x}{:02x}{:02x}{:02x}..", key[0], key[1], key[2], key[3])
}
