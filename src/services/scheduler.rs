//! Persistent task scheduler.
//!
//! Polls the `scheduled_tasks` table for due work and dispatches by kind.
//! Firing is at-least-once: a crash between firing and completion re-runs
//! the task, so every handler re-reads deal state and treats a stale task
//! as a completed no-op.

use std::sync::Arc;

use chrono::NaiveDateTime;
use tokio::time::interval;
use tracing::{debug, error, info, warn};

use crate::config::TimeoutConfig;
use crate::db::DbPool;
use crate::error::EngineError;
use crate::models::deal::DealStatus;
use crate::models::task::{ScheduledTask, TaskKind};
use crate::services::lifecycle::{DealEvent, DealLifecycle};
use crate::services::payment_monitor::{PaymentMonitor, PaymentStatus};
use crate::services::post_monitor::{VerificationMonitor, VerifyOutcome};

pub struct Scheduler {
    db: DbPool,
    lifecycle: Arc<DealLifecycle>,
    payments: Arc<PaymentMonitor>,
    verifier: Arc<VerificationMonitor>,
    config: TimeoutConfig,
}

impl Scheduler {
    pub fn new(
        db: DbPool,
        lifecycle: Arc<DealLifecycle>,
        payments: Arc<PaymentMonitor>,
        verifier: Arc<VerificationMonitor>,
        config: TimeoutConfig,
    ) -> Self {
        Self {
            db,
            lifecycle,
            payments,
            verifier,
            config,
        }
    }

    /// Poll loop. Runs until the process shuts down.
    pub async fn run(self: Arc<Self>) {
        let mut timer = interval(self.config.poll_interval());
        info!(
            "Scheduler started, polling every {}s",
            self.config.poll_interval_secs
        );
        loop {
            timer.tick().await;
            if let Err(e) = self.tick().await {
                error!("Scheduler tick failed: {e}");
            }
        }
    }

    /// One poll: fire every due task.
    pub async fn tick(&self) -> Result<(), EngineError> {
        let now = chrono::Utc::now().naive_utc();
        let mut conn = self
            .db
            .get()
            .map_err(|e| EngineError::Database(e.to_string()))?;
        let due = tokio::task::spawn_blocking(move || ScheduledTask::find_due(&mut conn, now))
            .await?
            .map_err(|e| EngineError::Database(e.to_string()))?;

        for task in due {
            self.fire(task).await;
        }
        Ok(())
    }

    async fn fire(&self, task: ScheduledTask) {
        let Some(kind) = task.kind() else {
            error!(task_id = %task.id, kind = %task.kind, "Unknown task kind, dropping");
            self.complete(&task.id).await;
            return;
        };

        debug!(
            deal_id = %crate::log_deal!(&task.deal_id),
            kind = kind.as_str(),
            attempts = task.attempts,
            "Firing scheduled task"
        );
        self.with_conn(&task.id, ScheduledTask::bump_attempts).await;

        // State may have moved since the task was enqueued.
        let deal = match self.lifecycle.get_deal(&task.deal_id).await {
            Ok(deal) => deal,
            Err(e) => {
                error!(
                    deal_id = %crate::log_deal!(&task.deal_id),
                    "Task references unloadable deal, dropping: {e}"
                );
                self.complete(&task.id).await;
                return;
            }
        };
        let status = match deal.status() {
            Ok(status) => status,
            Err(e) => {
                error!(
                    deal_id = %crate::log_deal!(&task.deal_id),
                    "Task references corrupt deal row, dropping: {e}"
                );
                self.complete(&task.id).await;
                return;
            }
        };
        if status.is_terminal() {
            debug!(
                deal_id = %crate::log_deal!(&task.deal_id),
                "Deal already terminal, completing task"
            );
            self.complete(&task.id).await;
            return;
        }

        let result = match kind {
            TaskKind::AutoPost => self.fire_auto_post(&task).await,
            TaskKind::Verify => self.fire_verify(&task).await,
            TaskKind::TimeoutSweep => self.fire_timeout_sweep(&task).await,
        };

        match result {
            Ok(()) => {}
            Err(e) if e.is_transient() => {
                let retry_at = chrono::Utc::now().naive_utc()
                    + chrono::Duration::from_std(
                        self.config.drain_backoff(task.attempts.max(0) as u32),
                    )
                    .unwrap_or_else(|_| chrono::Duration::seconds(60));
                warn!(
                    deal_id = %crate::log_deal!(&task.deal_id),
                    kind = kind.as_str(),
                    "Task hit transient failure, retrying at {retry_at}: {e}"
                );
                self.reschedule(&task.id, retry_at).await;
            }
            Err(e) => {
                error!(
                    deal_id = %crate::log_deal!(&task.deal_id),
                    kind = kind.as_str(),
                    "Task failed permanently: {e}"
                );
                self.complete(&task.id).await;
            }
        }
    }

    /// Publish the approved creative at its scheduled time.
    async fn fire_auto_post(&self, task: &ScheduledTask) -> Result<(), EngineError> {
        let deal = self.lifecycle.get_deal(&task.deal_id).await?;
        if deal.status()? != DealStatus::Scheduled {
            // Posted manually or cancelled in the meantime.
            debug!(
                deal_id = %crate::log_deal!(&task.deal_id),
                status = %deal.status,
                "Auto-post task stale, completing"
            );
            self.complete(&task.id).await;
            return Ok(());
        }

        let post_ref = self.lifecycle.publish(&deal).await?;
        self.lifecycle
            .transition(&task.deal_id, DealEvent::MarkPosted { post_ref })
            .await?;
        self.complete(&task.id).await;
        Ok(())
    }

    /// Run a post-survival check; the outcome decides the task's fate.
    async fn fire_verify(&self, task: &ScheduledTask) -> Result<(), EngineError> {
        match self.verifier.run_check(&task.deal_id).await? {
            VerifyOutcome::Reschedule(next) => {
                self.reschedule(&task.id, next).await;
            }
            VerifyOutcome::Completed | VerifyOutcome::Disputed | VerifyOutcome::Skipped => {
                self.complete(&task.id).await;
            }
        }
        Ok(())
    }

    /// Cancel a deal that stayed unfunded past the payment window. A final
    /// balance check runs first so a last-minute payment is never cancelled.
    async fn fire_timeout_sweep(&self, task: &ScheduledTask) -> Result<(), EngineError> {
        let deal = self.lifecycle.get_deal(&task.deal_id).await?;
        if deal.status()? != DealStatus::PendingPayment {
            self.complete(&task.id).await;
            return Ok(());
        }

        match self.payments.check_payment(&deal).await? {
            PaymentStatus::Funded(_) | PaymentStatus::Overfunded(_) => {
                self.complete(&task.id).await;
            }
            _ => {
                info!(
                    deal_id = %crate::log_deal!(&task.deal_id),
                    "Funding window elapsed, cancelling deal"
                );
                self.lifecycle
                    .cancel(&task.deal_id, "payment timeout elapsed".to_string())
                    .await?;
                self.complete(&task.id).await;
            }
        }
        Ok(())
    }

    async fn complete(&self, task_id: &str) {
        self.with_conn(task_id, ScheduledTask::mark_completed).await;
    }

    async fn reschedule(&self, task_id: &str, due_at: NaiveDateTime) {
        self.with_conn(task_id, move |conn, id| {
            ScheduledTask::reschedule(conn, id, due_at)
        })
        .await;
    }

    async fn with_conn<F>(&self, task_id: &str, op: F)
    where
        F: FnOnce(&mut diesel::SqliteConnection, &str) -> anyhow::Result<()> + Send + 'static,
    {
        let Ok(mut conn) = self.db.get() else {
            error!("Failed to get DB connection for task bookkeeping");
            return;
        };
        let id = task_id.to_string();
        match tokio::task::spawn_blocking(move || op(&mut conn, &id)).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => error!(task_id, "Task bookkeeping failed: {e}"),
            Err(e) => error!(task_id, "Task bookkeeping panicked: {e}"),
        }
    }
}
