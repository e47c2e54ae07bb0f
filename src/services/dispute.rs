//! Dispute resolution and out-of-band fund recovery.
//!
//! Both operations move other people's money on an operator's say-so, so
//! every call is gated on [`AdminPolicy`] and leaves an audit trail: the
//! resolution is recorded on the deal row, and recovery transfers get their
//! own table plus a dedicated log target.

use std::sync::Arc;

use tracing::{info, warn};

use crate::config::AdminPolicy;
use crate::db::DbPool;
use crate::error::EngineError;
use crate::models::deal::{Deal, DealStatus};
use crate::models::recovery::RecoveryTransfer;
use crate::services::lifecycle::{DealEvent, DealLifecycle};
use crate::wallet_manager::{DrainOutcome, DrainSplit, EscrowWalletManager};

/// Admin verdict on a disputed deal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resolution {
    /// Release escrow to the channel owner.
    Release,
    /// Refund escrow to the advertiser.
    Refund,
}

impl Resolution {
    fn terminal(&self) -> DealStatus {
        match self {
            Resolution::Release => DealStatus::Completed,
            Resolution::Refund => DealStatus::Refunded,
        }
    }
}

/// Outcome of an out-of-band recovery attempt.
#[derive(Debug, Clone)]
pub enum RecoveryOutcome {
    Transferred { amount_nano: i64, tx_hash: String },
    AlreadyDrained,
}

pub struct DisputeAuthority {
    db: DbPool,
    lifecycle: Arc<DealLifecycle>,
    wallets: Arc<EscrowWalletManager>,
    policy: AdminPolicy,
}

impl DisputeAuthority {
    pub fn new(
        db: DbPool,
        lifecycle: Arc<DealLifecycle>,
        wallets: Arc<EscrowWalletManager>,
        policy: AdminPolicy,
    ) -> Self {
        if policy.is_empty() {
            warn!("Admin policy is empty: disputes can only be resolved after ADMIN_IDS is set");
        }
        Self {
            db,
            lifecycle,
            wallets,
            policy,
        }
    }

    /// Resolve a disputed deal by releasing or refunding its escrow.
    ///
    /// Idempotent: repeating a resolution the deal already reached returns
    /// the deal unchanged; the drain-once guard means no second transfer can
    /// occur either way.
    pub async fn resolve_dispute(
        &self,
        admin_id: &str,
        deal_id: &str,
        resolution: Resolution,
        reason: String,
    ) -> Result<Deal, EngineError> {
        self.authorize(admin_id, "resolve_dispute")?;

        let deal = self.lifecycle.get_deal(deal_id).await?;
        if deal.status()? == resolution.terminal() {
            info!(
                deal_id = %crate::log_deal!(deal_id),
                admin_id,
                "Resolution already applied, no-op"
            );
            return Ok(deal);
        }

        let event = match resolution {
            Resolution::Release => DealEvent::ResolveRelease { reason },
            Resolution::Refund => DealEvent::ResolveRefund { reason },
        };
        let resolved = self.lifecycle.transition(deal_id, event).await?;
        info!(
            target: "audit",
            deal_id = %crate::log_deal!(deal_id),
            admin_id,
            resolution = ?resolution,
            "Dispute resolved"
        );
        Ok(resolved)
    }

    /// Move an escrow wallet's full balance to an arbitrary destination,
    /// independent of deal state. Last-resort tool for deals whose
    /// settlement drain failed permanently.
    pub async fn recover_funds(
        &self,
        admin_id: &str,
        escrow_address: &str,
        destination: &str,
    ) -> Result<RecoveryOutcome, EngineError> {
        self.authorize(admin_id, "recover_funds")?;

        info!(
            target: "fund_recovery",
            address = %crate::log_address!(escrow_address),
            destination = %crate::log_address!(destination),
            admin_id,
            "Fund recovery requested"
        );

        let outcome = self
            .wallets
            .drain(
                escrow_address,
                DrainSplit::Single {
                    destination: destination.to_string(),
                },
            )
            .await?;

        match outcome {
            DrainOutcome::Drained {
                amount_nano,
                tx_hash,
            } => {
                self.record_recovery(escrow_address, destination, amount_nano, &tx_hash, admin_id)
                    .await?;
                info!(
                    target: "fund_recovery",
                    address = %crate::log_address!(escrow_address),
                    amount = %crate::log_amount!(amount_nano),
                    admin_id,
                    "Fund recovery transferred"
                );
                Ok(RecoveryOutcome::Transferred {
                    amount_nano,
                    tx_hash,
                })
            }
            DrainOutcome::AlreadyDrained => {
                warn!(
                    target: "fund_recovery",
                    address = %crate::log_address!(escrow_address),
                    admin_id,
                    "Fund recovery requested for already-drained wallet"
                );
                Ok(RecoveryOutcome::AlreadyDrained)
            }
        }
    }

    /// Recovery transfer history for one escrow address.
    pub async fn recovery_history(
        &self,
        admin_id: &str,
        escrow_address: &str,
    ) -> Result<Vec<RecoveryTransfer>, EngineError> {
        self.authorize(admin_id, "recovery_history")?;
        let mut conn = self
            .db
            .get()
            .map_err(|e| EngineError::Database(e.to_string()))?;
        let address = escrow_address.to_string();
        tokio::task::spawn_blocking(move || RecoveryTransfer::for_address(&mut conn, &address))
            .await?
            .map_err(|e| EngineError::Database(e.to_string()))
    }

    fn authorize(&self, admin_id: &str, operation: &str) -> Result<(), EngineError> {
        if self.policy.is_admin(admin_id) {
            Ok(())
        } else {
            warn!(
                target: "audit",
                admin_id,
                operation,
                "Unauthorized admin operation rejected"
            );
            Err(EngineError::Unauthorized(format!(
                "user is not permitted to perform {operation}"
            )))
        }
    }

    async fn record_recovery(
        &self,
        escrow_address: &str,
        destination: &str,
        amount_nano: i64,
        tx_hash: &str,
        requested_by: &str,
    ) -> Result<(), EngineError> {
        let mut conn = self
            .db
            .get()
            .map_err(|e| EngineError::Database(e.to_string()))?;
        let address = escrow_address.to_string();
        let dest = destination.to_string();
        let hash = tx_hash.to_string();
        let admin = requested_by.to_string();
        tokio::task::spawn_blocking(move || {
            RecoveryTransfer::record(&mut conn, &address, &dest, amount_nano, &hash, &admin)
        })
        .await?
        .map_err(|e| EngineError::Database(e.to_string()))
    }
}
