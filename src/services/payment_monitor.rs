//! Payment reconciliation against the chain.
//!
//! Maps the escrow address's observed balance onto deal state. Runs two
//! ways: synchronously for client "check payment" requests, and in a
//! periodic sweep over every deal awaiting funding. A chain error is never
//! interpreted as "unfunded" — ambiguity must not cancel a paid deal.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::time::interval;
use tracing::{debug, error, info, warn};

use crate::config::{fee, TimeoutConfig};
use crate::db::DbPool;
use crate::error::EngineError;
use crate::models::deal::Deal;
use crate::models::wallet::EscrowWallet;
use crate::services::lifecycle::{DealEvent, DealLifecycle};
use crate::ton::TonClient;

/// Outcome of comparing escrow balance against the agreed amount.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PaymentStatus {
    Unfunded,
    Funded(i64),
    Overfunded(i64),
    Underfunded(i64),
}

/// Classify a balance against the agreed amount under the fee tolerance.
pub fn classify_balance(balance_nano: i64, amount_nano: i64, tolerance_nano: i64) -> PaymentStatus {
    if balance_nano <= 0 {
        PaymentStatus::Unfunded
    } else if balance_nano < amount_nano - tolerance_nano {
        PaymentStatus::Underfunded(balance_nano)
    } else if balance_nano > amount_nano + tolerance_nano {
        PaymentStatus::Overfunded(balance_nano)
    } else {
        PaymentStatus::Funded(balance_nano)
    }
}

/// Tracks consecutive reconciliation failures per deal for alerting.
#[derive(Debug, Clone)]
struct ConsecutiveFailure {
    count: u32,
    first_failure_at: DateTime<Utc>,
    last_error: String,
}

pub struct PaymentMonitor {
    db: DbPool,
    chain: Arc<dyn TonClient>,
    lifecycle: Arc<DealLifecycle>,
    config: TimeoutConfig,
    consecutive_failures: std::sync::Mutex<HashMap<String, ConsecutiveFailure>>,
}

impl PaymentMonitor {
    pub fn new(
        db: DbPool,
        chain: Arc<dyn TonClient>,
        lifecycle: Arc<DealLifecycle>,
        config: TimeoutConfig,
    ) -> Self {
        info!(
            "PaymentMonitor initialized with sweep_interval={}s, payment_timeout={}s",
            config.payment_sweep_interval_secs, config.payment_timeout_secs
        );
        Self {
            db,
            chain,
            lifecycle,
            config,
            consecutive_failures: std::sync::Mutex::new(HashMap::new()),
        }
    }

    /// Check one deal's funding status and advance it when funded.
    ///
    /// Idempotent: a deal already past `pending_payment` returns its current
    /// funding classification without firing any event.
    pub async fn check_payment(&self, deal: &Deal) -> Result<PaymentStatus, EngineError> {
        let address = deal.escrow_address.as_deref().ok_or_else(|| {
            EngineError::Internal(format!("deal {} has no escrow address", deal.id))
        })?;

        // Chain errors propagate: the caller retries, never assumes.
        let balance = self.chain.get_balance(address).await?;
        self.clear_failure(&deal.id);
        self.record_observed_balance(address, balance).await;

        let status = classify_balance(balance, deal.amount_nano, fee::get_payment_tolerance_nano());

        match status {
            PaymentStatus::Funded(received) | PaymentStatus::Overfunded(received) => {
                // The snapshot may be stale: a concurrent sweep or an
                // earlier check can already have reconciled this payment.
                // An invalid event against a fresher status is a no-op.
                match self
                    .lifecycle
                    .transition(&deal.id, DealEvent::PaymentReceived)
                    .await
                {
                    Ok(_) => info!(
                        deal_id = %crate::log_deal!(&deal.id),
                        received = %crate::log_amount!(received),
                        "Escrow funded, advancing deal"
                    ),
                    Err(EngineError::InvalidTransition { .. }) => debug!(
                        deal_id = %crate::log_deal!(&deal.id),
                        "Payment already reconciled"
                    ),
                    Err(e) => return Err(e),
                }
            }
            PaymentStatus::Underfunded(received) => {
                debug!(
                    deal_id = %crate::log_deal!(&deal.id),
                    received = %crate::log_amount!(received),
                    expected = %crate::log_amount!(deal.amount_nano),
                    "Escrow underfunded"
                );
            }
            PaymentStatus::Unfunded => {}
        }

        Ok(status)
    }

    /// Client-facing check by deal id.
    pub async fn check_payment_by_id(&self, deal_id: &str) -> Result<PaymentStatus, EngineError> {
        let deal = self.lifecycle.get_deal(deal_id).await?;
        self.check_payment(&deal).await
    }

    /// Background sweep over all deals awaiting payment. Runs until the
    /// process shuts down.
    pub async fn start_sweep(self: Arc<Self>) {
        let mut timer = interval(self.config.payment_sweep_interval());
        info!("Starting payment reconciliation sweep");
        loop {
            timer.tick().await;
            if let Err(e) = self.sweep_once().await {
                error!("Payment sweep iteration failed: {e}");
            }
        }
    }

    /// One sweep pass: reconcile every `pending_payment` deal, cancelling
    /// those whose funding window has elapsed.
    pub async fn sweep_once(&self) -> Result<(), EngineError> {
        let mut conn = self
            .db
            .get()
            .map_err(|e| EngineError::Database(e.to_string()))?;
        let pending = tokio::task::spawn_blocking(move || Deal::find_awaiting_payment(&mut conn))
            .await?
            .map_err(|e| EngineError::Database(e.to_string()))?;

        if pending.is_empty() {
            return Ok(());
        }
        debug!("Sweeping {} deals awaiting payment", pending.len());

        let now = chrono::Utc::now().naive_utc();
        for deal in pending {
            match self.check_payment(&deal).await {
                Ok(PaymentStatus::Funded(_)) | Ok(PaymentStatus::Overfunded(_)) => {}
                Ok(_) => {
                    if deal.seconds_awaiting_payment(now) > self.config.payment_timeout_secs as i64
                    {
                        info!(
                            deal_id = %crate::log_deal!(&deal.id),
                            "Payment timeout elapsed, cancelling deal"
                        );
                        if let Err(e) = self
                            .lifecycle
                            .cancel(&deal.id, "payment timeout elapsed".to_string())
                            .await
                        {
                            error!(
                                deal_id = %crate::log_deal!(&deal.id),
                                "Failed to cancel timed-out deal: {e}"
                            );
                        }
                    }
                }
                Err(e) => self.note_failure(&deal.id, &e),
            }
        }
        Ok(())
    }

    fn note_failure(&self, deal_id: &str, error: &EngineError) {
        let mut failures = match self.consecutive_failures.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        let entry = failures
            .entry(deal_id.to_string())
            .or_insert_with(|| ConsecutiveFailure {
                count: 0,
                first_failure_at: Utc::now(),
                last_error: String::new(),
            });
        entry.count += 1;
        entry.last_error = error.to_string();

        if entry.count >= self.config.failure_alert_threshold {
            warn!(
                deal_id = %crate::log_deal!(deal_id),
                consecutive_failures = entry.count,
                since = %entry.first_failure_at,
                "Payment reconciliation failing repeatedly: {}",
                entry.last_error
            );
        }
    }

    fn clear_failure(&self, deal_id: &str) {
        let mut failures = match self.consecutive_failures.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        failures.remove(deal_id);
    }

    async fn record_observed_balance(&self, address: &str, balance: i64) {
        let Ok(mut conn) = self.db.get() else { return };
        let addr = address.to_string();
        let _ = tokio::task::spawn_blocking(move || {
            EscrowWallet::update_observed_balance(&mut conn, &addr, balance)
        })
        .await;
    }
}
