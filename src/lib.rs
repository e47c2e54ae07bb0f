//! Deal lifecycle and escrow settlement engine for Telegram channel ad
//! placements.
//!
//! A deal is created by an advertiser against a channel, funded through a
//! single-purpose escrow wallet on the TON chain, driven through creative
//! review and scheduled posting, verified for post survival, and settled by
//! draining the escrow wallet exactly once (release to the channel owner or
//! refund to the advertiser).

// Log sanitization macros. Exported before modules so module code can use them.
#[macro_export]
macro_rules! log_deal {
    ($id:expr) => {
        $crate::logging::sanitize::sanitize_deal_id($id)
    };
}

#[macro_export]
macro_rules! log_address {
    ($addr:expr) => {
        $crate::logging::sanitize::sanitize_address($addr)
    };
}

#[macro_export]
macro_rules! log_amount {
    ($amount:expr) => {
        $crate::logging::sanitize::sanitize_amount($amount)
    };
}

pub mod config;
pub mod crypto;
pub mod db;
pub mod error;
pub mod logging;
pub mod models;
pub mod schema;
pub mod services;
pub mod telegram;
pub mod ton;
pub mod wallet_manager;
