//! Key-encryption key (KEK) for escrow wallet secrets.
//!
//! Every escrow wallet's signing key is sealed with this process-wide key
//! before it touches the database. The key is loaded once at startup,
//! read-only afterwards, never logged and never sent to a client.

use std::env;

use rand::RngCore;
use tracing::{error, info, warn};
use zeroize::{Zeroize, ZeroizeOnDrop};

/// Required hex length for a 32-byte key.
const KEY_HEX_LEN: usize = 64;

/// Process-wide key-encryption key.
///
/// `Debug` is implemented manually so the key bytes can never leak through
/// diagnostic formatting.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct MasterKey([u8; 32]);

impl MasterKey {
    pub fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }
}

impl std::fmt::Debug for MasterKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("MasterKey(<redacted>)")
    }
}

fn is_mainnet() -> bool {
    env::var("TON_NETWORK")
        .map(|n| n.to_lowercase() == "mainnet")
        .unwrap_or(true)
}

/// Load the master key from `ESCROW_MASTER_KEY` (64 hex chars).
///
/// On mainnet a missing or malformed key is fatal: running with an ephemeral
/// key would strand every escrow wallet created during the session. On test
/// networks a random session key is generated with a warning.
///
/// # Panics
///
/// Panics when `TON_NETWORK` is mainnet and no valid key is configured.
pub fn load_master_key() -> MasterKey {
    match env::var("ESCROW_MASTER_KEY") {
        Ok(hex_key) => {
            if hex_key.len() != KEY_HEX_LEN {
                error!(
                    "ESCROW_MASTER_KEY has wrong length ({} chars, expected {})",
                    hex_key.len(),
                    KEY_HEX_LEN
                );
                panic!("ESCROW_MASTER_KEY must be {KEY_HEX_LEN} hex characters");
            }
            let bytes = hex::decode(&hex_key)
                .unwrap_or_else(|_| panic!("ESCROW_MASTER_KEY is not valid hex"));
            let mut key = [0u8; 32];
            key.copy_from_slice(&bytes);
            info!("Escrow master key loaded from environment");
            MasterKey(key)
        }
        Err(_) => {
            if is_mainnet() {
                error!("No ESCROW_MASTER_KEY configured for mainnet");
                error!("Wallets sealed with an ephemeral key are unrecoverable after restart.");
                panic!("ESCROW_MASTER_KEY is required when TON_NETWORK=mainnet");
            }
            warn!("No ESCROW_MASTER_KEY set; generating an ephemeral session key");
            warn!("Escrow wallets created this session will be unrecoverable after restart.");
            let mut key = [0u8; 32];
            rand::rngs::OsRng.fill_bytes(&mut key);
            MasterKey(key)
        }
    }
}
