//! Symmetric sealing of catalog secrets.
//!
//! Sealed values carry the literal `enc:v1:` prefix followed by
//! base64(nonce ‖ ciphertext ‖ tag) so the envelope can be versioned later.
//! Values without the prefix pass through `decrypt` verbatim, which keeps
//! catalogs written before encryption was configured readable.

use aes_gcm::aead::rand_core::RngCore;
use aes_gcm::aead::{Aead, OsRng};
use aes_gcm::{Aes256Gcm, KeyInit, Nonce};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use thiserror::Error;

/// Version tag prepended to every sealed value.
const SEALED_PREFIX: &str = "enc:v1:";
/// AES-256-GCM key size.
const KEY_SIZE: usize = 32;
/// AES-GCM nonce size.
const NONCE_SIZE: usize = 12;

#[derive(Error, Debug)]
pub enum CipherError {
    #[error("cipher key must be exactly {KEY_SIZE} bytes")]
    KeyLength,
    /// Deliberately opaque: a wrong key and a mangled payload are
    /// indistinguishable to callers.
    #[error("unable to decrypt sealed value")]
    Decrypt,
    #[error("unable to encrypt value")]
    Encrypt,
}

/// Seals and opens secret strings. Constructed once at startup and shared.
///
/// Without a configured key the cipher operates in passthrough mode: values
/// are stored as given. Sealed values from an earlier keyed run then fail to
/// open with [`CipherError::Decrypt`] instead of being returned as garbage.
#[derive(Debug)]
pub struct SecretCipher {
    key: Option<[u8; KEY_SIZE]>,
}

impl SecretCipher {
    pub fn new(key: &[u8]) -> Result<Self, CipherError> {
        let key: [u8; KEY_SIZE] = key.try_into().map_err(|_| CipherError::KeyLength)?;
        Ok(Self { key: Some(key) })
    }

    /// Cipher that seals nothing; used when no `cipher_key` is configured.
    pub fn passthrough() -> Self {
        Self { key: None }
    }

    pub fn encrypt(&self, plaintext: &str) -> Result<String, CipherError> {
        let Some(key) = &self.key else {
            return Ok(plaintext.to_string());
        };

        let cipher = Aes256Gcm::new_from_slice(key).map_err(|_| CipherError::Encrypt)?;
        let mut nonce = [0u8; NONCE_SIZE];
        OsRng.fill_bytes(&mut nonce);
        let ciphertext = cipher
            .encrypt(Nonce::from_slice(&nonce), plaintext.as_bytes())
            .map_err(|_| CipherError::Encrypt)?;

        let mut sealed = Vec::with_capacity(NONCE_SIZE + ciphertext.len());
        sealed.extend_from_slice(&nonce);
        sealed.extend_from_slice(&ciphertext);
        Ok(format!("{SEALED_PREFIX}{}", BASE64.encode(sealed)))
    }

    pub fn decrypt(&self, value: &str) -> Result<String, CipherError> {
        let Some(encoded) = value.strip_prefix(SEALED_PREFIX) else {
            // Legacy passthrough: unprefixed values were never sealed.
            return Ok(value.to_string());
        };
        let key = self.key.as_ref().ok_or(CipherError::Decrypt)?;

        let sealed = BASE64.decode(encoded).map_err(|_| CipherError::Decrypt)?;
        if sealed.len() < NONCE_SIZE {
            return Err(CipherError::Decrypt);
        }
        let (nonce, ciphertext) = sealed.split_at(NONCE_SIZE);

        let cipher = Aes256Gcm::new_from_slice(key).map_err(|_| CipherError::Decrypt)?;
        let plaintext = cipher
            .decrypt(Nonce::from_slice(nonce), ciphertext)
            .map_err(|_| CipherError::Decrypt)?;
        String::from_utf8(plaintext).map_err(|_| CipherError::Decrypt)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn keyed() -> SecretCipher {
        SecretCipher::new(b"0123456789abcdef0123456789abcdef").unwrap()
    }

    #[test]
    fn test_round_trip() {
        let cipher = keyed();
        let sealed = cipher.encrypt("postgres-password").unwrap();
        assert!(sealed.starts_with("enc:v1:"));
        assert_eq!("postgres-password", cipher.decrypt(&sealed).unwrap());
    }

    #[test]
    fn test_two_encryptions_of_same_plaintext_differ() {
        let cipher = keyed();
        let first = cipher.encrypt("same").unwrap();
        let second = cipher.encrypt("same").unwrap();
        assert_ne!(first, second);
    }

    #[test]
    fn test_unprefixed_value_passes_through_decrypt() {
        assert_eq!("plain", keyed().decrypt("plain").unwrap());
    }

    #[test]
    fn test_wrong_key_fails_opaquely() {
        let sealed = keyed().encrypt("secret").unwrap();
        let other = SecretCipher::new(b"ffffffffffffffffffffffffffffffff").unwrap();
        assert!(matches!(
            other.decrypt(&sealed).unwrap_err(),
            CipherError::Decrypt
        ));
    }

    #[test]
    fn test_key_must_be_32_bytes() {
        assert!(matches!(
            SecretCipher::new(b"short").unwrap_err(),
            CipherError::KeyLength
        ));
    }

    #[test]
    fn test_passthrough_round_trip() {
        let cipher = SecretCipher::passthrough();
        let stored = cipher.encrypt("value").unwrap();
        assert_eq!("value", stored);
        assert_eq!("value", cipher.decrypt(&stored).unwrap());
    }

    #[test]
    fn test_passthrough_cannot_open_sealed_values() {
        let sealed = keyed().encrypt("secret").unwrap();
        assert!(matches!(
            SecretCipher::passthrough().decrypt(&sealed).unwrap_err(),
            CipherError::Decrypt
        ));
    }

    #[test]
    fn test_mangled_payload_fails() {
        assert!(matches!(
            keyed().decrypt("enc:v1:not-base64!!!").unwrap_err(),
            CipherError::Decrypt
        ));
    }
}
