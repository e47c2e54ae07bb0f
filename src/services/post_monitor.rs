//! Post-survival verification.
//!
//! While a deal sits in `posted`, the published post must stay up and stay
//! unmodified for the agreed duration. Each check appends an evidence row;
//! the accumulated rows decide whether the deal completes or goes to
//! dispute. A gateway failure yields no row and no transition: unknown is
//! not a verdict.

use std::sync::Arc;

use chrono::NaiveDateTime;
use tracing::{debug, info, warn};

use crate::config::TimeoutConfig;
use crate::db::DbPool;
use crate::error::EngineError;
use crate::models::deal::{Deal, DealStatus};
use crate::models::verification::VerificationCheck;
use crate::services::lifecycle::{DealEvent, DealLifecycle};
use crate::telegram::MessagingGateway;

/// What the scheduler should do after one verification pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VerifyOutcome {
    /// Window still open, check passed; run again at the given time.
    Reschedule(NaiveDateTime),
    /// Window elapsed with every check passing; deal completed.
    Completed,
    /// A check failed or the window closed without evidence; deal disputed.
    Disputed,
    /// Deal is no longer in `posted`; nothing to do.
    Skipped,
}

pub struct VerificationMonitor {
    db: DbPool,
    gateway: Arc<dyn MessagingGateway>,
    lifecycle: Arc<DealLifecycle>,
    config: TimeoutConfig,
}

impl VerificationMonitor {
    pub fn new(
        db: DbPool,
        gateway: Arc<dyn MessagingGateway>,
        lifecycle: Arc<DealLifecycle>,
        config: TimeoutConfig,
    ) -> Self {
        Self {
            db,
            gateway,
            lifecycle,
            config,
        }
    }

    /// Run one verification pass for a deal.
    ///
    /// Inside the window the snapshot is persisted before any transition
    /// fires, so the row that triggers a verdict is already on record. Once
    /// the window has elapsed no new snapshot is taken; the verdict rests
    /// entirely on the rows collected in-window.
    pub async fn run_check(&self, deal_id: &str) -> Result<VerifyOutcome, EngineError> {
        let deal = self.lifecycle.get_deal(deal_id).await?;
        if deal.status()? != DealStatus::Posted {
            debug!(
                deal_id = %crate::log_deal!(deal_id),
                status = %deal.status,
                "Skipping verification, deal not in posted"
            );
            return Ok(VerifyOutcome::Skipped);
        }

        let window_end = deal.verification_window_end().ok_or_else(|| {
            EngineError::Internal(format!("posted deal {deal_id} has no posted_at"))
        })?;
        let now = chrono::Utc::now().naive_utc();
        if now >= window_end {
            // Only rows observed inside [posted_at, window_end] count. The
            // owner is free to take the post down once the window closes, so
            // a snapshot taken now must not be evaluated.
            return self.close_window(&deal).await;
        }

        // Gateway failure propagates here: no evidence row, task retried.
        let check = self.snapshot_check(&deal).await?;

        if !check.is_pass() {
            let reason = if check.post_exists {
                "post was modified during the verification window"
            } else {
                "post was deleted during the verification window"
            };
            info!(
                deal_id = %crate::log_deal!(deal_id),
                "Verification failed: {reason}"
            );
            self.lifecycle
                .transition(
                    deal_id,
                    DealEvent::VerificationFailed {
                        reason: reason.to_string(),
                    },
                )
                .await?;
            return Ok(VerifyOutcome::Disputed);
        }

        let next = std::cmp::min(
            now + chrono::Duration::seconds(self.config.verify_interval_secs as i64),
            window_end,
        );
        Ok(VerifyOutcome::Reschedule(next))
    }

    /// Decide the deal's fate once the verification window has elapsed.
    async fn close_window(&self, deal: &Deal) -> Result<VerifyOutcome, EngineError> {
        let checks = self.load_checks(&deal.id).await?;

        if checks.is_empty() {
            // The window passed without a single observation. Funds must not
            // auto-release on zero evidence.
            warn!(
                deal_id = %crate::log_deal!(&deal.id),
                "Verification window elapsed with no evidence, raising dispute"
            );
            self.lifecycle
                .transition(
                    &deal.id,
                    DealEvent::Dispute {
                        reason: "no verification evidence collected during window".to_string(),
                    },
                )
                .await?;
            return Ok(VerifyOutcome::Disputed);
        }

        if checks.iter().all(VerificationCheck::is_pass) {
            info!(
                deal_id = %crate::log_deal!(&deal.id),
                checks = checks.len(),
                "Post survived the verification window"
            );
            self.lifecycle
                .transition(&deal.id, DealEvent::VerificationPassed)
                .await?;
            Ok(VerifyOutcome::Completed)
        } else {
            // A failing row normally disputes immediately; this covers rows
            // written by an operator or a crashed pass.
            self.lifecycle
                .transition(
                    &deal.id,
                    DealEvent::VerificationFailed {
                        reason: "failed verification check on record".to_string(),
                    },
                )
                .await?;
            Ok(VerifyOutcome::Disputed)
        }
    }

    /// Fetch the post and persist the observation.
    async fn snapshot_check(&self, deal: &Deal) -> Result<VerificationCheck, EngineError> {
        let post_ref = deal.post_ref.as_deref().ok_or_else(|| {
            EngineError::Internal(format!("posted deal {} has no post_ref", deal.id))
        })?;

        let snapshot = self.gateway.get_post(&deal.channel_id, post_ref).await?;
        // Unmodified means byte-for-byte equal to the approved creative.
        let unmodified = snapshot.exists
            && snapshot.content.as_deref() == deal.creative_text.as_deref();

        let mut conn = self
            .db
            .get()
            .map_err(|e| EngineError::Database(e.to_string()))?;
        let deal_id = deal.id.clone();
        let exists = snapshot.exists;
        tokio::task::spawn_blocking(move || {
            VerificationCheck::append(&mut conn, &deal_id, exists, unmodified)
        })
        .await?
        .map_err(|e| EngineError::Database(e.to_string()))
    }

    async fn load_checks(&self, deal_id: &str) -> Result<Vec<VerificationCheck>, EngineError> {
        let mut conn = self
            .db
            .get()
            .map_err(|e| EngineError::Database(e.to_string()))?;
        let id = deal_id.to_string();
        tokio::task::spawn_blocking(move || VerificationCheck::for_deal(&mut conn, &id))
            .await?
            .map_err(|e| EngineError::Database(e.to_string()))
    }
}
