//! Test doubles for pairing sessions
//!
//! [`MockClient`] plays the companion app, [`PairingHarness`] wires it to a
//! real [`PairingSession`](crate::pairing::PairingSession), and the mock
//! collaborators stand in for the robot's WiFi, cloud, OTA and diagnostics
//! services.

pub mod harness;
pub mod mock_client;
pub mod mock_collaborators;
#[cfg(test)]
mod tests;

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

pub use self::harness::PairingHarness;
pub use self::mock_client::{Inbound, MockClient};
pub use self::mock_collaborators::{MockCloud, MockDiagnostics, MockOta, MockWifi};

use crate::storage::{MemoryStore, SavedSessions, SessionStore, StorageError};
use crate::transport::{RawChannel, TransportError};

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Raw channel that records every packet sent through it
///
/// Clones share the same packet queue, so a test keeps one clone and hands
/// the other to a transport.
#[derive(Debug, Clone, Default)]
pub struct RecordingChannel {
    packets: Arc<Mutex<VecDeque<Vec<u8>>>>,
}

impl RecordingChannel {
    /// Create an empty channel
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Drain the packets recorded so far, oldest first
    #[must_use]
    pub fn take_packets(&self) -> Vec<Vec<u8>> {
        lock(&self.packets).drain(..).collect()
    }

    /// Whether nothing is queued
    #[must_use]
    pub fn is_empty(&self) -> bool {
        lock(&self.packets).is_empty()
    }
}

impl RawChannel for RecordingChannel {
    fn send(&mut self, packet: &[u8]) -> Result<(), TransportError> {
        lock(&self.packets).push_back(packet.to_vec());
        Ok(())
    }
}

/// In-memory store shared between sessions, for reconnect tests
///
/// Counts saves and can be told to fail them.
#[derive(Debug, Clone, Default)]
pub struct SharedStore {
    inner: Arc<Mutex<SharedStoreState>>,
}

#[derive(Debug, Default)]
struct SharedStoreState {
    store: MemoryStore,
    saves: usize,
    fail_saves: bool,
}

impl SharedStore {
    /// Empty store
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Current contents
    #[must_use]
    pub fn contents(&self) -> Option<SavedSessions> {
        lock(&self.inner).store.load()
    }

    /// Successful saves so far
    #[must_use]
    pub fn save_count(&self) -> usize {
        lock(&self.inner).saves
    }

    /// Make every following save fail
    pub fn set_fail_saves(&self, fail: bool) {
        lock(&self.inner).fail_saves = fail;
    }

    /// Boxed handle for a session
    #[must_use]
    pub fn boxed(&self) -> Box<dyn SessionStore> {
        Box::new(self.clone())
    }
}

impl SessionStore for SharedStore {
    fn load(&self) -> Option<SavedSessions> {
        lock(&self.inner).store.load()
    }

    fn save(&mut self, sessions: &SavedSessions) -> Result<(), StorageError> {
        let mut state = lock(&self.inner);
        if state.fail_saves {
            return Err(StorageError::Io(std::io::Error::other("injected save failure")));
        }
        state.store.save(sessions)?;
        state.saves += 1;
        Ok(())
    }
}
