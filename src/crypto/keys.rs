//! Escrow wallet keypair generation.
//!
//! One ed25519 keypair per deal. The address is the raw-form TON address of
//! a standard wallet controlled by the public key: `0:` followed by the hex
//! SHA-256 account id derived from the key.

use ed25519_dalek::SigningKey;
use rand::rngs::OsRng;
use sha2::{Digest, Sha256};
use zeroize::Zeroizing;

use super::CryptoError;

/// Freshly generated escrow wallet key material.
///
/// The secret is held in a [`Zeroizing`] buffer; it must be sealed and
/// persisted (or dropped) without ever being logged.
pub struct GeneratedKeypair {
    pub address: String,
    pub public_key_hex: String,
    pub secret: Zeroizing<[u8; 32]>,
}

/// Derive the raw-form address for a wallet controlled by this public key.
pub fn address_for_public_key(public_key: &[u8; 32]) -> String {
    let account_id = Sha256::digest(public_key);
    format!("0:{}", hex::encode(account_id))
}

/// Generate a new escrow wallet keypair.
pub fn generate_wallet_keypair() -> Result<GeneratedKeypair, CryptoError> {
    let signing_key = SigningKey::generate(&mut OsRng);
    let verifying_key = signing_key.verifying_key();

    let public_bytes = verifying_key.to_bytes();
    let secret = Zeroizing::new(signing_key.to_bytes());

    Ok(GeneratedKeypair {
        address: address_for_public_key(&public_bytes),
        public_key_hex: hex::encode(public_bytes),
        secret,
    })
}
