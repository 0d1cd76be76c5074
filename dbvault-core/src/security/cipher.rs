//! AES-GCM encryption of individual secret strings.
//!
//! Tokens have the form `v1:` followed by base64 of `nonce ‖ ciphertext ‖ tag`.
//! The version prefix is what separates real ciphertext from legacy plaintext:
//!
//! - no prefix: the value predates encryption and is passed through
//! - prefix present: the value must decode and authenticate, otherwise the
//!   token is reported as corrupted and never passed through
//!
//! # Security Guarantees
//! - AES-GCM-256 authenticated encryption (NIST SP 800-38D)
//! - Fresh random 96-bit nonce for every encryption
//! - Plaintext results are held in `Zeroizing` containers

use super::key::{DerivedKey, KeyOrigin};
use aes_gcm::{
    Aes256Gcm, Key, Nonce,
    aead::{Aead, AeadCore, KeyInit, OsRng},
};
use base64::{Engine, engine::general_purpose::STANDARD as BASE64};
use tracing::debug;
use zeroize::Zeroizing;

/// Version prefix carried by every token produced by [`SecretCipher::encrypt`].
pub const TOKEN_PREFIX: &str = "v1:";

/// AES-GCM nonce size: 96 bits (12 bytes)
const AES_GCM_NONCE_SIZE: usize = 12;

/// AES-GCM authentication tag size: 128 bits (16 bytes)
const AES_GCM_TAG_SIZE: usize = 16;

const SELF_TEST_CANARY: &str = "dbvault-self-test";

/// Result of decrypting a stored secret.
///
/// `PassedThrough` marks a legacy plaintext value that should be re-encrypted.
pub enum DecryptedSecret {
    /// The value was a valid token and authenticated correctly
    Decrypted(Zeroizing<String>),
    /// The value was never encrypted
    PassedThrough(Zeroizing<String>),
}

impl DecryptedSecret {
    /// Returns the plaintext.
    pub fn expose(&self) -> &str {
        match self {
            DecryptedSecret::Decrypted(value) | DecryptedSecret::PassedThrough(value) => value,
        }
    }

    /// True when the stored form was a real cipher token.
    pub fn was_encrypted(&self) -> bool {
        matches!(self, DecryptedSecret::Decrypted(_))
    }

    /// Consumes the result, keeping the zeroizing container.
    pub fn into_inner(self) -> Zeroizing<String> {
        match self {
            DecryptedSecret::Decrypted(value) | DecryptedSecret::PassedThrough(value) => value,
        }
    }
}

impl std::fmt::Debug for DecryptedSecret {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DecryptedSecret::Decrypted(_) => f.write_str("Decrypted(<redacted>)"),
            DecryptedSecret::PassedThrough(_) => f.write_str("PassedThrough(<redacted>)"),
        }
    }
}

/// Encrypts and decrypts secret strings with the vault key.
#[derive(Clone)]
pub struct SecretCipher {
    cipher: Aes256Gcm,
    origin: KeyOrigin,
}

impl std::fmt::Debug for SecretCipher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SecretCipher")
            .field("key_origin", &self.origin)
            .finish_non_exhaustive()
    }
}

impl SecretCipher {
    /// Creates a cipher keyed by `key`.
    pub fn new(key: &DerivedKey) -> Self {
        Self {
            cipher: Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(key.as_bytes())),
            origin: key.origin(),
        }
    }

    /// Origin of the key this cipher was built with.
    pub fn key_origin(&self) -> KeyOrigin {
        self.origin
    }

    /// True when `value` carries the token version prefix.
    pub fn is_token(value: &str) -> bool {
        value.starts_with(TOKEN_PREFIX)
    }

    /// True when a stored value is legacy plaintext that should be re-encrypted.
    pub fn needs_reencryption(value: &str) -> bool {
        !value.is_empty() && !Self::is_token(value)
    }

    /// Encrypts a secret into a versioned token.
    ///
    /// # Example
    /// ```rust
    /// use dbvault_core::security::{DerivedKey, SecretCipher};
    ///
    /// let cipher = SecretCipher::new(&DerivedKey::from_bytes([42u8; 32]));
    /// let token = cipher.encrypt("p@ss")?;
    /// assert!(token.starts_with("v1:"));
    /// assert_eq!(cipher.decrypt(&token)?.expose(), "p@ss");
    /// # Ok::<(), Box<dyn std::error::Error>>(())
    /// ```
    pub fn encrypt(&self, plaintext: &str) -> crate::Result<String> {
        let nonce = Aes256Gcm::generate_nonce(&mut OsRng);

        let ciphertext = self
            .cipher
            .encrypt(&nonce, plaintext.as_bytes())
            .map_err(|e| crate::error::DbVaultError::encryption(format!("Encryption failed: {}", e)))?;

        let mut payload = Vec::with_capacity(AES_GCM_NONCE_SIZE.saturating_add(ciphertext.len()));
        payload.extend_from_slice(&nonce);
        payload.extend_from_slice(&ciphertext);

        Ok(format!("{}{}", TOKEN_PREFIX, BASE64.encode(payload)))
    }

    /// Decrypts a stored value.
    ///
    /// Values without the version prefix are returned unchanged as
    /// [`DecryptedSecret::PassedThrough`]. Prefixed values that fail to decode
    /// or authenticate are an error. Both paths log at debug level only.
    ///
    /// # Errors
    /// Returns `DbVaultError::Encryption` for corrupted or foreign tokens.
    pub fn decrypt(&self, value: &str) -> crate::Result<DecryptedSecret> {
        let Some(encoded) = value.strip_prefix(TOKEN_PREFIX) else {
            if !value.is_empty() {
                debug!("Stored secret is not a cipher token; passing through as legacy plaintext");
            }
            return Ok(DecryptedSecret::PassedThrough(Zeroizing::new(value.to_string())));
        };

        let payload = BASE64.decode(encoded).map_err(|e| {
            debug!("Cipher token failed base64 decoding");
            crate::error::DbVaultError::encryption(format!("Malformed cipher token: {}", e))
        })?;

        if payload.len() < AES_GCM_NONCE_SIZE.saturating_add(AES_GCM_TAG_SIZE) {
            debug!("Cipher token shorter than nonce and tag");
            return Err(crate::error::DbVaultError::encryption(format!(
                "Cipher token too short: {} bytes",
                payload.len()
            )));
        }

        let (nonce, ciphertext) = payload.split_at(AES_GCM_NONCE_SIZE);
        let plaintext = self
            .cipher
            .decrypt(Nonce::from_slice(nonce), ciphertext)
            .map_err(|_| {
                debug!("Cipher token failed authentication");
                crate::error::DbVaultError::encryption(
                    "Decryption failed (wrong key or corrupted token)",
                )
            })?;

        let plaintext = Zeroizing::new(plaintext);
        let text = std::str::from_utf8(&plaintext).map_err(|_| {
            crate::error::DbVaultError::encryption("Decrypted secret is not valid UTF-8")
        })?;

        Ok(DecryptedSecret::Decrypted(Zeroizing::new(text.to_string())))
    }

    /// Encrypts and decrypts a canary value.
    ///
    /// # Errors
    /// Returns an error when the key material cannot round-trip, which callers
    /// treat as unrecoverable at startup.
    pub fn self_test(&self) -> crate::Result<()> {
        let token = self.encrypt(SELF_TEST_CANARY)?;
        match self.decrypt(&token)? {
            DecryptedSecret::Decrypted(value) if value.as_str() == SELF_TEST_CANARY => Ok(()),
            _ => Err(crate::error::DbVaultError::encryption(
                "Cipher self-test failed: canary did not round-trip",
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cipher() -> SecretCipher {
        SecretCipher::new(&DerivedKey::from_bytes([0x42u8; 32]))
    }

    #[test]
    fn test_cipher_roundtrip() {
        let cipher = cipher();
        for secret in ["p@ss", "", "päss wörd ✓", &"x".repeat(4096)] {
            let token = cipher.encrypt(secret).unwrap();
            assert!(SecretCipher::is_token(&token));
            assert_ne!(token, secret);

            let decrypted = cipher.decrypt(&token).unwrap();
            assert!(decrypted.was_encrypted());
            assert_eq!(decrypted.expose(), secret);
        }
    }

    #[test]
    fn test_cipher_nonce_uniqueness() {
        let cipher = cipher();
        let first = cipher.encrypt("same").unwrap();
        let second = cipher.encrypt("same").unwrap();
        assert_ne!(first, second);
    }

    #[test]
    fn test_cipher_legacy_plaintext_passes_through() {
        let decrypted = cipher().decrypt("legacy-password").unwrap();
        assert!(!decrypted.was_encrypted());
        assert_eq!(decrypted.expose(), "legacy-password");
        assert!(SecretCipher::needs_reencryption("legacy-password"));
        assert!(!SecretCipher::needs_reencryption(""));
    }

    #[test]
    fn test_cipher_tampered_token_fails() {
        let cipher = cipher();
        let token = cipher.encrypt("secret").unwrap();
        let mut payload = BASE64.decode(&token[TOKEN_PREFIX.len()..]).unwrap();
        let last = payload.len() - 1;
        payload[last] ^= 1;
        let tampered = format!("{}{}", TOKEN_PREFIX, BASE64.encode(payload));

        let result = cipher.decrypt(&tampered);
        assert!(result.is_err());
        assert!(result.unwrap_err().to_string().contains("Decryption failed"));
    }

    #[test]
    fn test_cipher_wrong_key_fails() {
        let token = cipher().encrypt("secret").unwrap();
        let other = SecretCipher::new(&DerivedKey::from_bytes([0x07u8; 32]));
        assert!(other.decrypt(&token).is_err());
    }

    #[test]
    fn test_cipher_garbage_with_prefix_is_not_passed_through() {
        let cipher = cipher();
        assert!(cipher.decrypt("v1:not base64!").is_err());
        assert!(cipher.decrypt("v1:AAAA").is_err());
    }

    #[test]
    fn test_cipher_self_test() {
        assert!(cipher().self_test().is_ok());
    }

    #[test]
    fn test_cipher_debug_is_redacted() {
        let decrypted = cipher().decrypt("hunter2").unwrap();
        assert!(!format!("{:?}", decrypted).contains("hunter2"));
        assert!(!format!("{:?}", cipher()).contains("42"));
    }
}
