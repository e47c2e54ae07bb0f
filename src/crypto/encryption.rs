//! Secret sealing with ChaCha20Poly1305 AEAD.
//!
//! Escrow wallet signing keys are sealed with the process-wide master key
//! before persistence. Blob layout: 12-byte nonce followed by ciphertext.
//! AEAD authentication means a tampered blob fails to open rather than
//! yielding a corrupted signing key.

use chacha20poly1305::{
    aead::{Aead, KeyInit},
    ChaCha20Poly1305, Nonce,
};
use rand::RngCore;
use zeroize::Zeroizing;

use super::CryptoError;

/// ChaCha20Poly1305 nonce size.
pub const NONCE_SIZE: usize = 12;

/// Seal a secret under the given 32-byte key.
///
/// Returns `nonce ‖ ciphertext`. A fresh random nonce is drawn per call.
pub fn seal_secret(plaintext: &[u8], key: &[u8; 32]) -> Result<Vec<u8>, CryptoError> {
    let cipher = ChaCha20Poly1305::new_from_slice(key)
        .map_err(|e| CryptoError::CipherInit(e.to_string()))?;

    let mut nonce_bytes = [0u8; NONCE_SIZE];
    rand::rngs::OsRng.fill_bytes(&mut nonce_bytes);
    let nonce = Nonce::from_slice(&nonce_bytes);

    let ciphertext = cipher
        .encrypt(nonce, plaintext)
        .map_err(|e| CryptoError::EncryptionFailed(e.to_string()))?;

    let mut blob = Vec::with_capacity(NONCE_SIZE + ciphertext.len());
    blob.extend_from_slice(&nonce_bytes);
    blob.extend_from_slice(&ciphertext);
    Ok(blob)
}

/// Open a sealed blob produced by [`seal_secret`].
///
/// The plaintext is returned in a [`Zeroizing`] buffer so it is wiped when
/// the caller drops it.
pub fn open_secret(blob: &[u8], key: &[u8; 32]) -> Result<Zeroizing<Vec<u8>>, CryptoError> {
    if blob.len() <= NONCE_SIZE {
        return Err(CryptoError::BlobTooShort {
            expected: NONCE_SIZE + 1,
            actual: blob.len(),
        });
    }

    let cipher = ChaCha20Poly1305::new_from_slice(key)
        .map_err(|e| CryptoError::CipherInit(e.to_string()))?;

    let (nonce_bytes, ciphertext) = blob.split_at(NONCE_SIZE);
    let nonce = Nonce::from_slice(nonce_bytes);

    let plaintext = cipher
        .decrypt(nonce, ciphertext)
        .map_err(|e| CryptoError::DecryptionFailed(e.to_string()))?;

    Ok(Zeroizing::new(plaintext))
}
