//! Cryptographic primitives for pairing and the encrypted BLE channel

#![allow(missing_docs)]

mod error;
pub mod kx;
#[cfg(test)]
mod tests;
mod x25519;
mod xchacha;

pub use self::error::CryptoError;
pub use self::kx::{Role, SessionKeys};
pub use self::x25519::{X25519KeyPair, X25519PublicKey, X25519SharedSecret};
pub use self::xchacha::{Nonce, XChaCha20Poly1305Cipher};

/// Length of various cryptographic values
pub mod lengths {
    /// X25519 public key length
    pub const X25519_PUBLIC_KEY: usize = 32;
    /// X25519 secret key length
    pub const X25519_SECRET_KEY: usize = 32;
    /// `crypto_kx` session key length
    pub const SESSION_KEY: usize = 32;
    /// XChaCha20-Poly1305 key length
    pub const XCHACHA_KEY: usize = 32;
    /// XChaCha20-Poly1305 nonce length
    pub const XCHACHA_NONCE: usize = 24;
    /// Poly1305 tag length
    pub const AEAD_TAG: usize = 16;
    /// Longest PIN usable as a BLAKE2b key
    pub const MAX_PIN_KEY: usize = 64;
}
