//! Configuration modules for the ad deal escrow engine.

pub mod admin;
pub mod fee;
pub mod master_key;
pub mod platform;
pub mod timeout;

pub use admin::AdminPolicy;
pub use fee::{
    get_dust_threshold_nano, get_payment_tolerance_nano, get_platform_fee_bps,
    get_transfer_fee_nano, DEFAULT_DUST_THRESHOLD_NANO, DEFAULT_PAYMENT_TOLERANCE_NANO,
    DEFAULT_TRANSFER_FEE_NANO,
};
pub use master_key::{load_master_key, MasterKey};
pub use platform::{get_platform_wallet_address, validate_platform_wallet_on_startup};
pub use timeout::TimeoutConfig;
