//! Engine error taxonomy.
//!
//! Every failure the engine can surface to a caller maps onto one of these
//! variants. The split matters operationally: transient variants are retried
//! (bounded, with backoff), caller errors are surfaced as-is, and the two
//! manual-intervention variants (`InsufficientBalance`, a drain that exhausted
//! its retries) are the only paths that require an admin.

use thiserror::Error;

/// Errors surfaced by the deal lifecycle and settlement engine.
#[derive(Error, Debug)]
pub enum EngineError {
    /// The requested event is not legal for the deal's current status.
    #[error("invalid transition: {event} not permitted from {status}")]
    InvalidTransition { status: String, event: String },

    /// Optimistic version check failed; the caller must re-read and retry.
    #[error("deal was modified concurrently, retry with refreshed record")]
    ConflictRetry,

    /// Chain RPC endpoint unreachable or timed out. The result of the
    /// attempted operation is unknown, never assumed.
    #[error("chain unavailable: {0}")]
    ChainUnavailable(String),

    /// Messaging gateway unreachable or timed out.
    #[error("messaging gateway unavailable: {0}")]
    GatewayUnavailable(String),

    /// Escrow balance is below the minimum transferable amount.
    #[error("insufficient balance: {available_nano} nano available")]
    InsufficientBalance { available_nano: i64 },

    /// Keypair generation or wallet persistence failed. Fatal to deal
    /// creation: no deal is ever persisted without a wallet.
    #[error("wallet creation failed: {0}")]
    WalletCreation(String),

    /// Caller is not in the configured admin policy.
    #[error("unauthorized: {0}")]
    Unauthorized(String),

    /// Malformed request payload (caller error).
    #[error("validation failed: {0}")]
    Validation(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("database error: {0}")]
    Database(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl EngineError {
    /// Transient errors are safe to retry after a delay.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            EngineError::ConflictRetry
                | EngineError::ChainUnavailable(_)
                | EngineError::GatewayUnavailable(_)
        )
    }

    /// Errors that stop automatic processing and wait for an admin.
    pub fn requires_manual_recovery(&self) -> bool {
        matches!(self, EngineError::InsufficientBalance { .. })
    }
}

impl From<diesel::result::Error> for EngineError {
    fn from(e: diesel::result::Error) -> Self {
        match e {
            diesel::result::Error::NotFound => EngineError::NotFound("record not found".into()),
            other => EngineError::Database(other.to_string()),
        }
    }
}

impl From<diesel::r2d2::PoolError> for EngineError {
    fn from(e: diesel::r2d2::PoolError) -> Self {
        EngineError::Database(format!("connection pool: {e}"))
    }
}

impl From<tokio::task::JoinError> for EngineError {
    fn from(e: tokio::task::JoinError) -> Self {
        EngineError::Internal(format!("blocking task panicked: {e}"))
    }
}
