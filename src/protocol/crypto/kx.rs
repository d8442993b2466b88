//! Session key agreement compatible with libsodium's `crypto_kx`
//!
//! Both sides hash the X25519 shared point together with the client and
//! server public keys (in that order) using BLAKE2b-512. The server takes the
//! first half as its transmit key, the client takes it as its receive key.

use blake2::digest::Mac;
use blake2::digest::consts::U32;
use blake2::{Blake2b, Blake2b512, Blake2bMac, Digest};
use zeroize::Zeroize;

use super::{CryptoError, X25519KeyPair, X25519PublicKey, lengths};

/// Which side of the key exchange we are
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    /// The robot
    Server,
    /// The companion app
    Client,
}

/// Pair of 32-byte session keys
///
/// Keys are wiped when the value is dropped.
#[derive(Clone, PartialEq, Eq)]
pub struct SessionKeys {
    /// Key for messages we send
    pub encrypt_key: [u8; lengths::SESSION_KEY],
    /// Key for messages we receive
    pub decrypt_key: [u8; lengths::SESSION_KEY],
}

impl std::fmt::Debug for SessionKeys {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("SessionKeys(..)")
    }
}

impl Drop for SessionKeys {
    fn drop(&mut self) {
        self.encrypt_key.zeroize();
        self.decrypt_key.zeroize();
    }
}

/// Compute the raw `crypto_kx` session keys for `role`
///
/// # Errors
///
/// Returns `CryptoError::InvalidPublicKey` if the exchange is not contributory.
pub fn session_keys(
    role: Role,
    local: &X25519KeyPair,
    remote: &X25519PublicKey,
) -> Result<SessionKeys, CryptoError> {
    let shared = local.diffie_hellman(remote)?;
    let local_public = local.public_key();

    let (client_pk, server_pk) = match role {
        Role::Server => (remote.as_bytes(), local_public.as_bytes()),
        Role::Client => (local_public.as_bytes(), remote.as_bytes()),
    };

    let mut digest = Blake2b512::new()
        .chain_update(shared.as_bytes())
        .chain_update(client_pk)
        .chain_update(server_pk)
        .finalize();

    let mut first = [0u8; lengths::SESSION_KEY];
    let mut second = [0u8; lengths::SESSION_KEY];
    first.copy_from_slice(&digest[..lengths::SESSION_KEY]);
    second.copy_from_slice(&digest[lengths::SESSION_KEY..]);
    digest.as_mut_slice().zeroize();

    let keys = match role {
        Role::Server => SessionKeys {
            encrypt_key: first,
            decrypt_key: second,
        },
        Role::Client => SessionKeys {
            encrypt_key: second,
            decrypt_key: first,
        },
    };
    first.zeroize();
    second.zeroize();
    Ok(keys)
}

/// Re-hash a raw session key with the PIN as BLAKE2b key
///
/// An empty PIN means an unkeyed hash, matching `crypto_generichash` with a
/// zero-length key.
///
/// # Errors
///
/// Returns `CryptoError::PinTooLong` if the PIN exceeds the 64-byte BLAKE2b key limit.
pub fn bind_pin(
    key: &[u8; lengths::SESSION_KEY],
    pin: &[u8],
) -> Result<[u8; lengths::SESSION_KEY], CryptoError> {
    let mut out = [0u8; lengths::SESSION_KEY];

    if pin.is_empty() {
        let hash = Blake2b::<U32>::new().chain_update(key).finalize();
        out.copy_from_slice(&hash);
        return Ok(out);
    }

    if pin.len() > lengths::MAX_PIN_KEY {
        return Err(CryptoError::PinTooLong(pin.len()));
    }

    let mut mac = Blake2bMac::<U32>::new_with_salt_and_personal(pin, &[], &[])
        .map_err(|_| CryptoError::PinTooLong(pin.len()))?;
    mac.update(key);
    out.copy_from_slice(&mac.finalize().into_bytes());
    Ok(out)
}

/// Compute `crypto_kx` session keys and bind both to the PIN
///
/// # Errors
///
/// Propagates failures from [`session_keys`] and [`bind_pin`].
pub fn pin_bound_session_keys(
    role: Role,
    local: &X25519KeyPair,
    remote: &X25519PublicKey,
    pin: &[u8],
) -> Result<SessionKeys, CryptoError> {
    let raw = session_keys(role, local, remote)?;
    Ok(SessionKeys {
        encrypt_key: bind_pin(&raw.encrypt_key, pin)?,
        decrypt_key: bind_pin(&raw.decrypt_key, pin)?,
    })
}
