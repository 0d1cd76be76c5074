//! Argon2id key derivation for the secret cipher.
//!
//! The vault key is derived from process-wide passphrase components (database
//! host, name, user and an optional operator secret) so that records encrypted
//! before a restart remain readable afterwards.
//!
//! # Security Guarantees
//! - Argon2id (RFC 9106) with a fixed application salt, 64 MiB memory cost
//! - Key material lives in `Zeroizing` containers and is cleared on drop
//! - Empty inputs degrade to a random ephemeral key instead of a weak one

use argon2::{
    Argon2, Params, Version,
    password_hash::{PasswordHasher, SaltString},
};
use rand::RngCore;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};
use zeroize::Zeroizing;

/// AES key size: 256 bits (32 bytes)
pub const KEY_SIZE: usize = 32;

/// Fixed application-wide salt (16 bytes, RFC 9106 §4 minimum).
///
/// Derivation must be reproducible across restarts, so the salt cannot be
/// random per run. It is not user-controllable.
const APPLICATION_SALT: &[u8; 16] = b"dbvault.secrets1";

/// Argon2id memory cost: 64 MiB (65536 KiB)
const ARGON2_MEMORY_COST: u32 = 65536;

/// Argon2id time cost: 3 iterations
const ARGON2_TIME_COST: u32 = 3;

/// Argon2id parallelism: 4 lanes
const ARGON2_PARALLELISM: u32 = 4;

/// Separator placed between passphrase parts so that `["ab", "c"]` and
/// `["a", "bc"]` derive different keys.
const PART_SEPARATOR: &str = "\u{1f}";

/// Key derivation parameters for Argon2id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct KdfParams {
    /// Memory cost in KiB (64 MiB = 65536 KiB)
    pub memory_cost: u32,
    /// Time cost (iterations)
    pub time_cost: u32,
    /// Parallelism factor
    pub parallelism: u32,
}

impl Default for KdfParams {
    fn default() -> Self {
        Self {
            memory_cost: ARGON2_MEMORY_COST,
            time_cost: ARGON2_TIME_COST,
            parallelism: ARGON2_PARALLELISM,
        }
    }
}

impl KdfParams {
    /// Validates that KDF parameters meet security requirements.
    ///
    /// # Errors
    /// Returns error if parameters don't meet minimum security thresholds
    pub fn validate(&self) -> crate::Result<()> {
        if self.memory_cost < ARGON2_MEMORY_COST {
            return Err(crate::error::DbVaultError::configuration(format!(
                "Memory cost must be at least {} KiB (64 MiB)",
                ARGON2_MEMORY_COST
            )));
        }
        if self.time_cost < ARGON2_TIME_COST {
            return Err(crate::error::DbVaultError::configuration(format!(
                "Time cost must be at least {} iterations",
                ARGON2_TIME_COST
            )));
        }
        if self.parallelism < 1 {
            return Err(crate::error::DbVaultError::configuration(
                "Parallelism must be at least 1",
            ));
        }
        Ok(())
    }
}

/// Where a key came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyOrigin {
    /// Derived from passphrase components; stable across restarts
    Derived,
    /// Random key generated because no derivation input was available.
    /// Data encrypted under it is unreadable after the process exits.
    Ephemeral,
    /// Raw key material supplied by the caller
    Provided,
}

/// A 256-bit symmetric key with automatic zeroing.
pub struct DerivedKey {
    bytes: Zeroizing<[u8; KEY_SIZE]>,
    origin: KeyOrigin,
}

impl std::fmt::Debug for DerivedKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DerivedKey")
            .field("origin", &self.origin)
            .finish_non_exhaustive()
    }
}

impl DerivedKey {
    /// Wraps caller-supplied key material.
    pub fn from_bytes(bytes: [u8; KEY_SIZE]) -> Self {
        Self {
            bytes: Zeroizing::new(bytes),
            origin: KeyOrigin::Provided,
        }
    }

    /// Generates a random key.
    pub fn ephemeral() -> Self {
        let mut bytes = Zeroizing::new([0u8; KEY_SIZE]);
        rand::rng().fill_bytes(bytes.as_mut());
        Self {
            bytes,
            origin: KeyOrigin::Ephemeral,
        }
    }

    /// Origin of this key.
    pub fn origin(&self) -> KeyOrigin {
        self.origin
    }

    pub(crate) fn as_bytes(&self) -> &[u8; KEY_SIZE] {
        &self.bytes
    }
}

/// Turns passphrase components into the vault key.
#[derive(Debug, Clone, Default)]
pub struct KeyDeriver {
    params: KdfParams,
}

impl KeyDeriver {
    /// Creates a deriver after validating the parameters.
    pub fn new(params: KdfParams) -> crate::Result<Self> {
        params.validate()?;
        Ok(Self { params })
    }

    /// Derives a 32-byte key from the passphrase parts.
    ///
    /// Deterministic: the same parts always yield the same key. Parts are
    /// trimmed; when every part is blank a random ephemeral key is returned
    /// and a warning is logged, since anything encrypted under it cannot be
    /// decrypted after a restart.
    ///
    /// # Example
    /// ```rust,no_run
    /// use dbvault_core::security::{KeyDeriver, KeyOrigin};
    ///
    /// let deriver = KeyDeriver::default();
    /// let key = deriver.derive(&["db1.internal", "erp", "odoo"])?;
    /// assert_eq!(key.origin(), KeyOrigin::Derived);
    /// # Ok::<(), Box<dyn std::error::Error>>(())
    /// ```
    pub fn derive<S: AsRef<str>>(&self, parts: &[S]) -> crate::Result<DerivedKey> {
        let trimmed: Vec<&str> = parts.iter().map(|p| p.as_ref().trim()).collect();
        if trimmed.iter().all(|p| p.is_empty()) {
            warn!(
                "No key derivation inputs available; using an ephemeral key. \
                 Previously stored secrets will not be decryptable."
            );
            return Ok(DerivedKey::ephemeral());
        }

        let passphrase = Zeroizing::new(trimmed.join(PART_SEPARATOR));
        let bytes = derive_key(passphrase.as_bytes(), &self.params)?;
        debug!("Derived vault key from {} passphrase parts", trimmed.len());

        Ok(DerivedKey {
            bytes,
            origin: KeyOrigin::Derived,
        })
    }
}

fn derive_key(password: &[u8], kdf_params: &KdfParams) -> crate::Result<Zeroizing<[u8; KEY_SIZE]>> {
    let params = Params::new(
        kdf_params.memory_cost,
        kdf_params.time_cost,
        kdf_params.parallelism,
        Some(KEY_SIZE),
    )
    .map_err(|e| {
        crate::error::DbVaultError::configuration(format!("Invalid Argon2 parameters: {}", e))
    })?;

    let argon2 = Argon2::new(argon2::Algorithm::Argon2id, Version::V0x13, params);

    let salt_string = SaltString::encode_b64(APPLICATION_SALT)
        .map_err(|e| crate::error::DbVaultError::configuration(format!("Invalid salt: {}", e)))?;

    let password_hash = argon2
        .hash_password(password, &salt_string)
        .map_err(|e| crate::error::DbVaultError::encryption(format!("Key derivation failed: {}", e)))?;

    let hash_bytes = password_hash.hash.ok_or_else(|| {
        crate::error::DbVaultError::encryption("Key derivation produced no output")
    })?;

    if hash_bytes.as_bytes().len() != KEY_SIZE {
        return Err(crate::error::DbVaultError::encryption(format!(
            "Key derivation produced incorrect key length: expected {}, got {}",
            KEY_SIZE,
            hash_bytes.as_bytes().len()
        )));
    }

    let mut key = Zeroizing::new([0u8; KEY_SIZE]);
    key.copy_from_slice(hash_bytes.as_bytes());

    Ok(key)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kdf_params_validation() {
        assert!(KdfParams::default().validate().is_ok());

        let params = KdfParams {
            memory_cost: 32768,
            ..KdfParams::default()
        };
        assert!(params.validate().is_err());

        let params = KdfParams {
            time_cost: 2,
            ..KdfParams::default()
        };
        assert!(params.validate().is_err());

        let params = KdfParams {
            parallelism: 0,
            ..KdfParams::default()
        };
        assert!(params.validate().is_err());
        assert!(KeyDeriver::new(params).is_err());
    }

    #[test]
    fn test_derivation_is_deterministic() {
        let deriver = KeyDeriver::default();
        let first = deriver.derive(&["db1", "erp", "odoo"]).unwrap();
        let second = deriver.derive(&["db1", "erp", "odoo"]).unwrap();

        assert_eq!(first.origin(), KeyOrigin::Derived);
        assert_eq!(first.as_bytes(), second.as_bytes());
    }

    #[test]
    fn test_part_boundaries_matter() {
        let deriver = KeyDeriver::default();
        let joined = deriver.derive(&["ab", "c"]).unwrap();
        let split = deriver.derive(&["a", "bc"]).unwrap();

        assert_ne!(joined.as_bytes(), split.as_bytes());
    }

    #[test]
    fn test_blank_inputs_fall_back_to_ephemeral_key() {
        let deriver = KeyDeriver::default();
        let first = deriver.derive(&["", "  "]).unwrap();
        let second = deriver.derive::<&str>(&[]).unwrap();

        assert_eq!(first.origin(), KeyOrigin::Ephemeral);
        assert_eq!(second.origin(), KeyOrigin::Ephemeral);
        assert_ne!(first.as_bytes(), second.as_bytes());
    }

    #[test]
    fn test_key_debug_is_redacted() {
        let key = DerivedKey::from_bytes([7u8; KEY_SIZE]);
        let debug = format!("{:?}", key);
        assert!(debug.contains("Provided"));
        assert!(!debug.contains('7'));
    }
}
