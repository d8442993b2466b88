use super::{CryptoError, lengths};
use chacha20poly1305::{
    XChaCha20Poly1305, XNonce,
    aead::{Aead, KeyInit},
};
use zeroize::Zeroize;

/// 24-byte nonce for XChaCha20-Poly1305
///
/// Nonces are random at key-exchange time and then advanced as a
/// little-endian counter.
#[derive(Clone, Copy, PartialEq, Eq, Default)]
pub struct Nonce([u8; lengths::XCHACHA_NONCE]);

impl Nonce {
    /// Create from bytes
    ///
    /// # Errors
    ///
    /// Returns `CryptoError::InvalidNonceLength` unless `bytes` is 24 bytes long.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, CryptoError> {
        let arr: [u8; lengths::XCHACHA_NONCE] =
            bytes
                .try_into()
                .map_err(|_| CryptoError::InvalidNonceLength {
                    expected: lengths::XCHACHA_NONCE,
                    actual: bytes.len(),
                })?;
        Ok(Self(arr))
    }

    /// Generate a random nonce from the OS RNG
    #[must_use]
    pub fn random() -> Self {
        use rand::RngCore;
        let mut arr = [0u8; lengths::XCHACHA_NONCE];
        rand::rngs::OsRng.fill_bytes(&mut arr);
        Self(arr)
    }

    /// Advance the nonce by one, treating it as a little-endian integer
    pub fn increment(&mut self) {
        let mut carry = 1u16;
        for byte in &mut self.0 {
            carry += u16::from(*byte);
            // Truncation keeps the low byte, the carry moves on
            #[allow(clippy::cast_possible_truncation)]
            {
                *byte = carry as u8;
            }
            carry >>= 8;
            if carry == 0 {
                break;
            }
        }
    }

    /// Get as bytes
    #[must_use]
    pub fn as_bytes(&self) -> &[u8; lengths::XCHACHA_NONCE] {
        &self.0
    }

    /// Overwrite with zeros
    pub fn clear(&mut self) {
        self.0.zeroize();
    }
}

impl From<[u8; lengths::XCHACHA_NONCE]> for Nonce {
    fn from(bytes: [u8; lengths::XCHACHA_NONCE]) -> Self {
        Self(bytes)
    }
}

impl std::fmt::Debug for Nonce {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Nonce({:02x}{:02x}..)", self.0[0], self.0[1])
    }
}

/// XChaCha20-Poly1305 AEAD cipher
pub struct XChaCha20Poly1305Cipher {
    cipher: XChaCha20Poly1305,
}

impl XChaCha20Poly1305Cipher {
    /// Create cipher with 32-byte key
    ///
    /// # Errors
    ///
    /// Returns `CryptoError::InvalidKeyLength` if `key` is not 32 bytes long.
    pub fn new(key: &[u8]) -> Result<Self, CryptoError> {
        if key.len() != lengths::XCHACHA_KEY {
            return Err(CryptoError::InvalidKeyLength {
                expected: lengths::XCHACHA_KEY,
                actual: key.len(),
            });
        }

        let cipher =
            XChaCha20Poly1305::new_from_slice(key).map_err(|_| CryptoError::InvalidKeyLength {
                expected: lengths::XCHACHA_KEY,
                actual: key.len(),
            })?;

        Ok(Self { cipher })
    }

    /// Encrypt with authentication
    ///
    /// Returns ciphertext with appended 16-byte tag
    ///
    /// # Errors
    ///
    /// Returns `CryptoError::EncryptionFailed` if the AEAD backend rejects the input.
    pub fn encrypt(&self, nonce: &Nonce, plaintext: &[u8]) -> Result<Vec<u8>, CryptoError> {
        self.cipher
            .encrypt(XNonce::from_slice(&nonce.0), plaintext)
            .map_err(|e| CryptoError::EncryptionFailed(e.to_string()))
    }

    /// Decrypt and verify authentication
    ///
    /// Input should be ciphertext with appended 16-byte tag
    ///
    /// # Errors
    ///
    /// Returns `CryptoError::DecryptionFailed` on a tag mismatch.
    pub fn decrypt(&self, nonce: &Nonce, ciphertext: &[u8]) -> Result<Vec<u8>, CryptoError> {
        self.cipher
            .decrypt(XNonce::from_slice(&nonce.0), ciphertext)
            .map_err(|e| CryptoError::DecryptionFailed(e.to_string()))
    }
}
