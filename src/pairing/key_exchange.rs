//! Identity keys, PINs and per-session key derivation

use std::path::Path;

use rand::Rng;
use zeroize::Zeroizing;

use crate::protocol::crypto::{
    CryptoError, Role, SessionKeys, X25519KeyPair, X25519PublicKey, kx,
};
use crate::storage::{IdentityRecord, SavedSessions, SessionStore, StorageError};

/// Generate a fresh long-term identity
#[must_use]
pub fn generate_identity_keypair() -> X25519KeyPair {
    X25519KeyPair::generate()
}

/// Check that a stored keypair is usable
///
/// The secret must map to the public key, and session keys derived against
/// an ephemeral peer must agree in both roles.
#[must_use]
pub fn validate_keypair(public_key: &[u8; 32], secret_key: &[u8; 32]) -> bool {
    let Ok(local) = X25519KeyPair::from_bytes(secret_key) else {
        return false;
    };
    if local.public_key().as_bytes() != public_key {
        return false;
    }

    let peer = X25519KeyPair::generate();
    let (Ok(server), Ok(client)) = (
        kx::session_keys(Role::Server, &local, &peer.public_key()),
        kx::session_keys(Role::Client, &peer, &local.public_key()),
    ) else {
        return false;
    };

    server.encrypt_key == client.decrypt_key && server.decrypt_key == client.encrypt_key
}

/// Random numeric PIN of exactly `digits` digits
///
/// Drawn uniformly from `10^(digits-1)..10^digits` so there is no leading
/// zero. Zero digits yields an empty PIN.
#[must_use]
pub fn generate_pin(digits: usize) -> Zeroizing<String> {
    if digits == 0 {
        return Zeroizing::new(String::new());
    }
    // u64 holds up to 19 digits
    let digits = u32::try_from(digits.min(19)).unwrap_or(19);
    let low = 10u64.pow(digits - 1);
    let high = 10u64.saturating_pow(digits);

    let value = rand::rngs::OsRng.gen_range(low..high);
    Zeroizing::new(value.to_string())
}

/// Random numeric password of exactly `digits` digits
#[must_use]
pub fn generate_numeric_password(digits: usize) -> String {
    generate_pin(digits).to_string()
}

/// PIN from an override file, used on test robots
///
/// Only a file holding exactly `digits` ASCII digits (surrounding whitespace
/// aside) is honored.
#[must_use]
pub fn read_pin_override(path: &Path, digits: usize) -> Option<Zeroizing<String>> {
    let contents = Zeroizing::new(std::fs::read_to_string(path).ok()?);
    let pin = contents.trim();
    if pin.len() == digits && pin.bytes().all(|b| b.is_ascii_digit()) {
        tracing::debug!(path = %path.display(), "Using PIN override");
        Some(Zeroizing::new(pin.to_string()))
    } else {
        tracing::warn!(path = %path.display(), "Ignoring malformed PIN override");
        None
    }
}

/// Derive PIN-bound session keys for `role`
///
/// # Errors
///
/// Returns `CryptoError` for a non-contributory peer key or an oversized PIN.
pub fn derive_session_keys(
    role: Role,
    local: &X25519KeyPair,
    remote: &X25519PublicKey,
    pin: &str,
) -> Result<SessionKeys, CryptoError> {
    kx::pin_bound_session_keys(role, local, remote, pin.as_bytes())
}

/// Load the stored sessions, regenerating the identity when it is unusable
///
/// A missing or invalid identity discards every client record, since those
/// keys were agreed with the old identity.
///
/// # Errors
///
/// Returns `StorageError` if a regenerated identity cannot be saved.
pub fn load_or_create_identity(
    store: &mut dyn SessionStore,
    robot_name: &str,
) -> Result<(X25519KeyPair, SavedSessions), StorageError> {
    let mut sessions = store.load().unwrap_or_default();

    if let Some(identity) = &sessions.identity {
        if validate_keypair(&identity.public_key, &identity.secret_key) {
            let keypair = identity.to_keypair()?;
            tracing::debug!(clients = sessions.clients.len(), "Loaded robot identity");
            return Ok((keypair, sessions));
        }
        tracing::warn!("Stored identity failed validation, regenerating");
    } else {
        tracing::info!("No robot identity stored, generating one");
    }

    let keypair = generate_identity_keypair();
    sessions.identity = Some(IdentityRecord::from_keypair(&keypair));
    sessions.clients.clear();
    if sessions.name.is_empty() {
        robot_name.clone_into(&mut sessions.name);
    }
    store.save(&sessions)?;
    Ok((keypair, sessions))
}
