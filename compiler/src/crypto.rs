//! Query-term encryption seam
//!
//! Encrypted concepts are sent as ciphertexts of their integer identifier.
//! The cryptosystem itself lives outside the compiler; lowering only calls
//! [`TermEncryptor::encrypt_integer`] and embeds the returned string as-is.

use thiserror::Error;

#[derive(Debug, Error, PartialEq)]
pub enum CryptoError {
    #[error("No encryptor configured, cannot encrypt concept id {0}")]
    Unavailable(i64),

    #[error("Encryption of concept id {id} failed: {reason}")]
    Failed { id: i64, reason: String },
}

/// Collaborator turning a plaintext integer into a ciphertext string
pub trait TermEncryptor {
    /// A short identifier for this encryptor, used in logs
    fn kind(&self) -> &'static str;

    fn encrypt_integer(&self, value: i64) -> Result<String, CryptoError>;
}

/// Encryptor for deployments without encrypted concepts
///
/// Any attempt to lower an encrypted concept fails loudly instead of leaking
/// the plaintext id.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoEncryption;

impl TermEncryptor for NoEncryption {
    fn kind(&self) -> &'static str {
        "none"
    }

    fn encrypt_integer(&self, value: i64) -> Result<String, CryptoError> {
        Err(CryptoError::Unavailable(value))
    }
}

/// Renders ids as `enc:<id>` so a lowered query can be inspected offline
///
/// Not a cipher; never send its output to a query engine.
#[derive(Debug, Clone, Copy, Default)]
pub struct TaggedEncryptor;

impl TermEncryptor for TaggedEncryptor {
    fn kind(&self) -> &'static str {
        "tagged"
    }

    fn encrypt_integer(&self, value: i64) -> Result<String, CryptoError> {
        Ok(format!("enc:{}", value))
    }
}
