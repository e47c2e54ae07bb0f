//! Fee and tolerance constants.
//!
//! All amounts are nano-TON. Display-denomination conversion never happens
//! inside the engine.

use std::env;

/// Reserve withheld from a drain to cover the outgoing transfer fee.
pub const DEFAULT_TRANSFER_FEE_NANO: i64 = 10_000_000; // 0.01 TON

/// Balances below this are dust and not worth a transfer.
pub const DEFAULT_DUST_THRESHOLD_NANO: i64 = 5_000_000; // 0.005 TON

/// Tolerance applied when comparing escrow balance to the agreed amount.
/// Covers the sender-side transfer fee some wallets deduct from the payload.
pub const DEFAULT_PAYMENT_TOLERANCE_NANO: i64 = 20_000_000; // 0.02 TON

/// Default platform cut on released deals, in basis points.
pub const DEFAULT_PLATFORM_FEE_BPS: i32 = 500; // 5%

fn env_i64(key: &str, default: i64) -> i64 {
    env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

pub fn get_transfer_fee_nano() -> i64 {
    env_i64("TRANSFER_FEE_NANO", DEFAULT_TRANSFER_FEE_NANO)
}

pub fn get_dust_threshold_nano() -> i64 {
    env_i64("DUST_THRESHOLD_NANO", DEFAULT_DUST_THRESHOLD_NANO)
}

pub fn get_payment_tolerance_nano() -> i64 {
    env_i64("PAYMENT_TOLERANCE_NANO", DEFAULT_PAYMENT_TOLERANCE_NANO)
}

/// Platform fee in basis points, fixed onto each deal at creation time.
pub fn get_platform_fee_bps() -> i32 {
    env_i64("PLATFORM_FEE_BPS", DEFAULT_PLATFORM_FEE_BPS as i64) as i32
}

/// Split a payable amount into the owner's share and the platform's cut.
///
/// Returns `(owner_share, platform_cut)`. The cut rounds down; the remainder
/// always goes to the owner.
pub fn split_release(payable_nano: i64, fee_bps: i32) -> (i64, i64) {
    let cut = payable_nano.saturating_mul(fee_bps as i64) / 10_000;
    (payable_nano - cut, cut)
}
