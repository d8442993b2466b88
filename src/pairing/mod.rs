//! Pairing protocol: handshake, key exchange, challenge and command gating

pub mod collaborators;
pub mod engine;
pub mod jobs;
pub mod key_exchange;
mod phase;
pub mod selector;
pub mod session;

#[cfg(test)]
mod tests;

pub use self::collaborators::{
    AuthKind, AuthResponse, CloudAuthenticator, CollaboratorError, Collaborators,
    DiagnosticsProvider, IpAddresses, OtaController, OtaProgress, TokenError, WifiController,
    WifiCredentials, WifiStatus,
};
pub use self::engine::{EngineAction, EngineContext, PairingEngine, RobotState};
pub use self::jobs::{Job, JobOutcome, run_job};
pub use self::key_exchange::{
    derive_session_keys, generate_identity_keypair, generate_pin, validate_keypair,
};
pub use self::phase::{CommsState, PairingPhase};
pub use self::selector::{HandshakeError, select_engine};
pub use self::session::{DispatchedJob, PairingSession};
