//! Platform wallet configuration.
//!
//! The platform wallet receives the fee cut of released deals. It is a plain
//! destination address; the engine never holds its keys.

use std::env;

use tracing::{info, warn};

/// Minimum plausible length for a raw-form TON address (`0:` + 64 hex).
const RAW_ADDRESS_LEN: usize = 66;

/// Platform wallet address from `PLATFORM_WALLET_ADDRESS`.
pub fn get_platform_wallet_address() -> Option<String> {
    env::var("PLATFORM_WALLET_ADDRESS")
        .ok()
        .filter(|a| !a.is_empty())
}

/// Basic shape check for a raw-form address.
pub fn is_plausible_address(address: &str) -> bool {
    let Some((workchain, account)) = address.split_once(':') else {
        return false;
    };
    workchain.parse::<i32>().is_ok()
        && account.len() == RAW_ADDRESS_LEN - 2
        && account.chars().all(|c| c.is_ascii_hexdigit())
}

/// Validate the platform wallet at startup.
///
/// A missing address is allowed (fees are simply not collected) but logged;
/// a malformed address is fatal because release drains would fail at
/// settlement time, long after the misconfiguration.
///
/// # Panics
///
/// Panics when `PLATFORM_WALLET_ADDRESS` is set but not a raw-form address.
pub fn validate_platform_wallet_on_startup() {
    match get_platform_wallet_address() {
        Some(address) => {
            if !is_plausible_address(&address) {
                panic!("PLATFORM_WALLET_ADDRESS is not a raw-form TON address");
            }
            info!("Platform wallet configured: {}", crate::log_address!(&address));
        }
        None => {
            warn!("PLATFORM_WALLET_ADDRESS not set; platform fees will not be collected");
        }
    }
}
