//! Cryptographic primitives: wallet keypair generation and secret sealing.

pub mod encryption;
pub mod keys;

use thiserror::Error;

/// Errors from the crypto layer.
#[derive(Error, Debug)]
pub enum CryptoError {
    #[error("cipher initialization failed: {0}")]
    CipherInit(String),

    #[error("encryption failed: {0}")]
    EncryptionFailed(String),

    #[error("decryption failed: {0}")]
    DecryptionFailed(String),

    #[error("sealed blob too short: {actual} bytes, need at least {expected}")]
    BlobTooShort { expected: usize, actual: usize },

    #[error("key generation failed: {0}")]
    KeyGeneration(String),
}
