//! Security utilities for secret protection and encryption.
//!
//! # Module Structure
//! - `key`: Argon2id key derivation from passphrase components
//! - `cipher`: AES-GCM encryption of individual secrets with legacy pass-through
//! - `credentials`: Secure credential container with automatic memory zeroing
//! - `connection`: Connection descriptor parsing and credential extraction
//!
//! # Security Guarantees
//! - Key material and plaintext secrets live in `Zeroizing` containers
//! - Secrets are redacted from every `Debug` implementation
//! - New ciphertext is always versioned so it cannot be mistaken for plaintext

mod cipher;
mod connection;
mod credentials;
mod key;

pub use cipher::{DecryptedSecret, SecretCipher, TOKEN_PREFIX};
pub use connection::{
    BackendFamily, ConnectionDescriptor, DEFAULT_MAX_OVERFLOW, DEFAULT_POOL_SIZE, PARAM_FIELD_PREFIX,
};
pub use credentials::Credentials;
pub use key::{DerivedKey, KEY_SIZE, KdfParams, KeyDeriver, KeyOrigin};
