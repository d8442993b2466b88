//! # pairlink
//!
//! Robot-side BLE pairing and secure session protocol.
//!
//! ## Features
//!
//! - Version handshake with four protocol generations
//! - X25519 key exchange bound to a displayed PIN
//! - XChaCha20-Poly1305 encrypted packet transport over small BLE frames
//! - Persistent trusted-client store with atomic writes
//! - Post-authentication commands for WiFi, OTA, logs and cloud sessions
//!
//! ## Example
//!
//! ```rust,no_run
//! use pairlink::{Collaborators, EventBus, PairingConfig};
//!
//! # async fn example() -> Result<(), pairlink::PairlinkError> {
//! let config = PairingConfig::builder()
//!     .robot_name("Vector-T3S7")
//!     .store_path("/data/ble/sessions")
//!     .build()?;
//!
//! let events = EventBus::new();
//! let mut link = pairlink::driver::open(config, Collaborators::new(), events)?;
//! link.handle.set_pairing_mode(true).await?;
//! link.handle.begin_pairing().await?;
//!
//! // Write `link.outbound` packets to the BLE characteristic and push
//! // received packets into `link.inbound`.
//! while let Some(packet) = link.outbound.recv().await {
//!     let _ = packet;
//! }
//! # Ok(())
//! # }
//! ```
//!
//! # Architecture
//!
//! - **Driver**: [`driver::ConnectionDriver`] runs one connection's event loop
//! - **Session**: [`PairingSession`] owns the transport, store and timer
//! - **Engine**: [`pairing::PairingEngine`] is the per-version state machine
//! - **Protocol**: framing, message codec and crypto primitives

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

/// Configuration
pub mod config;
pub mod driver;
/// Error types
pub mod error;
/// Pairing events
pub mod events;
pub mod executor;
pub mod pairing;
pub mod protocol;
/// Trusted-client persistence
pub mod storage;
/// Encrypted packet transport
pub mod transport;

/// Testing utilities
pub mod testing;

// Re-exports
pub use config::{ConfigError, PairingConfig, PairingConfigBuilder};
pub use driver::{BleLink, ConnectionDriver, SessionHandle, SessionSnapshot};
pub use error::{PairlinkError, Result};
pub use events::{ConnectionStatus, EventBus, PairingEvent};
pub use executor::{ExecutorError, TaskExecutor};
pub use pairing::{Collaborators, PairingPhase, PairingSession};
pub use protocol::messages::ProtocolVersion;
pub use storage::{FileStore, MemoryStore, SessionStore};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Prelude for common imports
pub mod prelude {
    pub use crate::{
        Collaborators, ConnectionStatus, EventBus, PairingConfig, PairingEvent, PairingPhase,
        PairingSession, PairlinkError, ProtocolVersion, SessionHandle,
    };
}
