//! Escrow wallet manager.
//!
//! Mints one keypair per deal and later drains it exactly once. The signing
//! key is sealed with the process master key at generation time and only
//! unsealed in memory for the duration of the signed transfer calls inside
//! [`EscrowWalletManager::drain`].

use std::sync::Arc;

use anyhow::Context;
use tracing::{info, warn};

use crate::config::{fee, MasterKey, TimeoutConfig};
use crate::crypto::{encryption, keys};
use crate::db::{db_load_wallet, DbPool};
use crate::error::EngineError;
use crate::models::wallet::{EscrowWallet, NewEscrowWallet};
use crate::ton::{TonClient, TransferDestination};

/// How a drain's payable amount is distributed.
#[derive(Debug, Clone)]
pub enum DrainSplit {
    /// Entire payable amount to one destination (refunds, recovery).
    Single { destination: String },
    /// Payout with the platform's cut carved out (release on completion).
    Release {
        payout: String,
        platform: Option<String>,
        fee_bps: i32,
    },
}

/// Result of a drain attempt that did not error.
#[derive(Debug, Clone)]
pub enum DrainOutcome {
    Drained { amount_nano: i64, tx_hash: String },
    /// The wallet's drain time was already set; no transfer was attempted.
    AlreadyDrained,
}

pub struct EscrowWalletManager {
    db: DbPool,
    chain: Arc<dyn TonClient>,
    master_key: MasterKey,
    config: TimeoutConfig,
}

impl EscrowWalletManager {
    pub fn new(
        db: DbPool,
        chain: Arc<dyn TonClient>,
        master_key: MasterKey,
        config: TimeoutConfig,
    ) -> Self {
        Self {
            db,
            chain,
            master_key,
            config,
        }
    }

    /// Generate wallet material for a new deal: fresh keypair, secret sealed
    /// under the master key. Pure with respect to the database so the caller
    /// can insert deal and wallet in one transaction (all-or-nothing: no
    /// deal is ever persisted without its wallet).
    pub fn generate(&self, deal_id: &str) -> Result<NewEscrowWallet, EngineError> {
        let keypair = keys::generate_wallet_keypair()
            .map_err(|e| EngineError::WalletCreation(e.to_string()))?;

        let secret_enc = encryption::seal_secret(keypair.secret.as_ref(), self.master_key.as_bytes())
            .map_err(|e| EngineError::WalletCreation(e.to_string()))?;

        info!(
            deal_id = %crate::log_deal!(deal_id),
            address = %crate::log_address!(&keypair.address),
            "Escrow wallet generated"
        );

        Ok(NewEscrowWallet {
            address: keypair.address,
            deal_id: deal_id.to_string(),
            public_key: keypair.public_key_hex,
            secret_enc,
            last_balance_nano: 0,
            created_at: chrono::Utc::now().naive_utc(),
        })
    }

    /// Drain the wallet's full observed balance minus the transfer fee.
    ///
    /// Safe under at-least-once callers: the drain time is re-checked first
    /// and recorded before the operation is considered complete, so a retry
    /// after a crash cannot double-spend. Chain unavailability is retried
    /// with exponential backoff up to the configured attempt bound, then
    /// surfaced for manual recovery.
    pub async fn drain(
        &self,
        address: &str,
        split: DrainSplit,
    ) -> Result<DrainOutcome, EngineError> {
        let wallet = db_load_wallet(&self.db, address)
            .await
            .map_err(|e| EngineError::NotFound(e.to_string()))?;

        if wallet.is_drained() {
            info!(
                address = %crate::log_address!(address),
                "Drain skipped: wallet already drained"
            );
            return Ok(DrainOutcome::AlreadyDrained);
        }

        let balance = self.balance_with_retry(address).await?;
        self.record_observed_balance(address, balance).await;

        let payable = balance - fee::get_transfer_fee_nano();
        if payable < fee::get_dust_threshold_nano() {
            return Err(EngineError::InsufficientBalance {
                available_nano: balance,
            });
        }

        let destinations = build_destinations(payable, &split);

        // Secret lives only for the duration of the transfer calls.
        let secret = encryption::open_secret(&wallet.secret_enc, self.master_key.as_bytes())
            .map_err(|e| EngineError::Internal(format!("failed to unseal wallet secret: {e}")))?;

        let mut last_tx = String::new();
        for destination in &destinations {
            last_tx = self.transfer_with_retry(&secret, destination).await?;
            info!(
                address = %crate::log_address!(address),
                to = %crate::log_address!(&destination.address),
                amount = %crate::log_amount!(destination.amount_nano),
                tx = %crate::logging::sanitize::sanitize_txid(&last_tx),
                "Escrow transfer sent"
            );
        }
        drop(secret);

        let recorded = self.record_drained(address, &last_tx, payable).await?;
        if !recorded {
            // A concurrent drain won the race after our transfers went out.
            // This cannot happen through the engine (status transitions
            // serialize settlement); surface loudly for the audit trail.
            warn!(
                address = %crate::log_address!(address),
                "Drain record lost a race; manual reconciliation required"
            );
        }

        Ok(DrainOutcome::Drained {
            amount_nano: payable,
            tx_hash: last_tx,
        })
    }

    async fn balance_with_retry(&self, address: &str) -> Result<i64, EngineError> {
        let mut attempt = 0;
        loop {
            match self.chain.get_balance(address).await {
                Ok(balance) => return Ok(balance),
                Err(e) if e.is_transient() && attempt + 1 < self.config.drain_max_attempts => {
                    warn!(
                        address = %crate::log_address!(address),
                        attempt,
                        "Balance query failed, backing off: {e}"
                    );
                    tokio::time::sleep(self.config.drain_backoff(attempt)).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }

    async fn transfer_with_retry(
        &self,
        secret: &[u8],
        destination: &TransferDestination,
    ) -> Result<String, EngineError> {
        let mut attempt = 0;
        loop {
            match self.chain.send_transfer(secret, destination).await {
                Ok(tx_hash) => return Ok(tx_hash),
                Err(e) if e.is_transient() && attempt + 1 < self.config.drain_max_attempts => {
                    warn!(
                        to = %crate::log_address!(&destination.address),
                        attempt,
                        "Transfer failed, backing off: {e}"
                    );
                    tokio::time::sleep(self.config.drain_backoff(attempt)).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }

    async fn record_observed_balance(&self, address: &str, balance: i64) {
        let Ok(mut conn) = self.db.get() else { return };
        let addr = address.to_string();
        let _ = tokio::task::spawn_blocking(move || {
            EscrowWallet::update_observed_balance(&mut conn, &addr, balance)
        })
        .await;
    }

    async fn record_drained(
        &self,
        address: &str,
        tx_hash: &str,
        amount_nano: i64,
    ) -> Result<bool, EngineError> {
        let mut conn = self
            .db
            .get()
            .context("Failed to get DB connection")
            .map_err(|e| EngineError::Database(e.to_string()))?;
        let addr = address.to_string();
        let tx = tx_hash.to_string();
        tokio::task::spawn_blocking(move || EscrowWallet::mark_drained(&mut conn, &addr, &tx, amount_nano))
            .await?
            .map_err(|e| EngineError::Database(e.to_string()))
    }
}

/// Compute the transfer legs for a drain. The payout leg goes first so a
/// partial failure favors the counterparty over the platform; a platform cut
/// below dust is folded into the payout.
fn build_destinations(payable: i64, split: &DrainSplit) -> Vec<TransferDestination> {
    match split {
        DrainSplit::Single { destination } => vec![TransferDestination {
            address: destination.clone(),
            amount_nano: payable,
        }],
        DrainSplit::Release {
            payout,
            platform,
            fee_bps,
        } => {
            let (owner_share, cut) = fee::split_release(payable, *fee_bps);
            match platform {
                Some(platform_addr) if cut >= fee::get_dust_threshold_nano() => vec![
                    TransferDestination {
                        address: payout.clone(),
                        amount_nano: owner_share,
                    },
                    TransferDestination {
                        address: platform_addr.clone(),
                        amount_nano: cut,
                    },
                ],
                _ => vec![TransferDestination {
                    address: payout.clone(),
                    amount_nano: payable,
                }],
            }
        }
    }
}
