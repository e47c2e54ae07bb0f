//! Deal state machine and lifecycle orchestration.
//!
//! The single authority over deal status. Every mutation flows through
//! [`DealLifecycle::transition`]: a static table decides legality, an
//! optimistic version check serializes concurrent writers, and side effects
//! (task scheduling, notifications, settlement) run in a fixed order after
//! the new state is persisted.

use std::sync::Arc;

use chrono::NaiveDateTime;
use diesel::Connection;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::config::{fee, platform, TimeoutConfig};
use crate::db::{db_load_deal, DbPool};
use crate::error::EngineError;
use crate::models::deal::{Deal, DealChanges, DealStatus, NewDeal, RevisionEntry};
use crate::models::task::{ScheduledTask, TaskKind};
use crate::models::wallet::EscrowWallet;
use crate::telegram::MessagingGateway;
use crate::wallet_manager::{DrainOutcome, DrainSplit, EscrowWalletManager};

/// Bounded automatic retries for optimistic-concurrency conflicts.
const MAX_TRANSITION_RETRIES: u32 = 3;

/// Events the state machine accepts.
#[derive(Debug, Clone)]
pub enum DealEvent {
    Accept,
    Reject { reason: String },
    PaymentReceived,
    /// Internal follow-up: ask the owner for (new) creative.
    CreativeRequested,
    SubmitCreative {
        text: String,
        media: Vec<String>,
    },
    RequestRevision { feedback: String },
    ApproveCreative,
    Schedule { publish_at: NaiveDateTime },
    MarkPosted { post_ref: String },
    VerificationPassed,
    /// Internal follow-up from `verified`.
    Complete,
    VerificationFailed { reason: String },
    Cancel { reason: String },
    Dispute { reason: String },
    ResolveRelease { reason: String },
    ResolveRefund { reason: String },
}

impl DealEvent {
    pub fn name(&self) -> &'static str {
        use DealEvent::*;
        match self {
            Accept => "accept",
            Reject { .. } => "reject",
            PaymentReceived => "payment_received",
            CreativeRequested => "creative_requested",
            SubmitCreative { .. } => "submit_creative",
            RequestRevision { .. } => "request_revision",
            ApproveCreative => "approve_creative",
            Schedule { .. } => "schedule",
            MarkPosted { .. } => "mark_posted",
            VerificationPassed => "verification_passed",
            Complete => "complete",
            VerificationFailed { .. } => "verification_failed",
            Cancel { .. } => "cancel",
            Dispute { .. } => "dispute",
            ResolveRelease { .. } => "resolve_release",
            ResolveRefund { .. } => "resolve_refund",
        }
    }
}

/// Static transition table. Returns the next status when the event is legal
/// for the current one, `None` otherwise.
pub fn next_status(status: DealStatus, event: &DealEvent) -> Option<DealStatus> {
    use DealEvent as E;
    use DealStatus::*;
    Some(match (status, event) {
        (PendingAcceptance, E::Accept) => PendingPayment,
        (PendingAcceptance, E::Reject { .. }) => Cancelled,
        (PendingPayment, E::PaymentReceived) => PaymentReceived,
        (PaymentReceived, E::CreativeRequested) => CreativePending,
        (CreativePending, E::SubmitCreative { .. }) => CreativeSubmitted,
        (CreativeSubmitted, E::RequestRevision { .. }) => CreativeRevision,
        (CreativeRevision, E::CreativeRequested) => CreativePending,
        (CreativeSubmitted, E::ApproveCreative) => CreativeApproved,
        (CreativeApproved, E::Schedule { .. }) => Scheduled,
        // post-now skips the scheduled wait.
        (CreativeApproved, E::MarkPosted { .. }) => Posted,
        (Scheduled, E::MarkPosted { .. }) => Posted,
        (Posted, E::VerificationPassed) => Verified,
        (Verified, E::Complete) => Completed,
        (Posted, E::VerificationFailed { .. }) => Disputed,
        // Disputes are only raised while the post is live.
        (Posted, E::Dispute { .. }) => Disputed,
        (Disputed, E::ResolveRelease { .. }) => Completed,
        (Disputed, E::ResolveRefund { .. }) => Refunded,
        // Cancellation is permitted up to the moment the post goes live.
        (
            PendingAcceptance | PendingPayment | PaymentReceived | CreativePending
            | CreativeSubmitted | CreativeRevision | CreativeApproved | Scheduled,
            E::Cancel { .. },
        ) => Cancelled,
        _ => return None,
    })
}

/// Internal event automatically applied after the given one.
fn follow_up(event: &DealEvent) -> Option<DealEvent> {
    match event {
        DealEvent::PaymentReceived => Some(DealEvent::CreativeRequested),
        DealEvent::RequestRevision { .. } => Some(DealEvent::CreativeRequested),
        DealEvent::VerificationPassed => Some(DealEvent::Complete),
        _ => None,
    }
}

/// Request payload for deal creation.
#[derive(Debug, Clone)]
pub struct CreateDealRequest {
    pub advertiser_id: String,
    pub owner_id: String,
    pub channel_id: String,
    pub amount_nano: i64,
    pub brief: String,
    pub post_duration_hours: i32,
    pub advertiser_refund_address: String,
    pub owner_payout_address: String,
}

pub struct DealLifecycle {
    db: DbPool,
    wallets: Arc<EscrowWalletManager>,
    gateway: Arc<dyn MessagingGateway>,
    config: TimeoutConfig,
}

impl DealLifecycle {
    pub fn new(
        db: DbPool,
        wallets: Arc<EscrowWalletManager>,
        gateway: Arc<dyn MessagingGateway>,
        config: TimeoutConfig,
    ) -> Self {
        Self {
            db,
            wallets,
            gateway,
            config,
        }
    }

    // ========================================================================
    // Deal creation
    // ========================================================================

    /// Create a deal with its escrow wallet, atomically.
    ///
    /// Wallet generation happens first; deal and wallet rows are inserted in
    /// one transaction, so no deal can exist without a wallet.
    pub async fn create_deal(&self, req: CreateDealRequest) -> Result<Deal, EngineError> {
        if req.amount_nano <= 0 {
            return Err(EngineError::Validation("deal amount must be positive".into()));
        }
        if req.post_duration_hours <= 0 {
            return Err(EngineError::Validation("post duration must be positive".into()));
        }

        let deal_id = Uuid::new_v4().to_string();
        let wallet = self.wallets.generate(&deal_id)?;
        let escrow_address = wallet.address.clone();

        let now = chrono::Utc::now().naive_utc();
        let new_deal = NewDeal {
            id: deal_id.clone(),
            advertiser_id: req.advertiser_id,
            owner_id: req.owner_id.clone(),
            channel_id: req.channel_id,
            amount_nano: req.amount_nano,
            fee_bps: fee::get_platform_fee_bps(),
            escrow_address: None,
            status: DealStatus::PendingAcceptance.as_str().to_string(),
            brief: req.brief,
            revision_history_json: "[]".to_string(),
            post_duration_hours: req.post_duration_hours,
            advertiser_refund_address: req.advertiser_refund_address,
            owner_payout_address: req.owner_payout_address,
            archived: false,
            created_at: now,
            updated_at: now,
            version: 0,
        };

        let mut conn = self
            .db
            .get()
            .map_err(|e| EngineError::Database(e.to_string()))?;
        let deal = tokio::task::spawn_blocking(move || {
            conn.transaction(|conn| {
                let deal = Deal::create(conn, new_deal)?;
                EscrowWallet::create(conn, wallet)?;
                Deal::attach_escrow_address(conn, &deal.id, &escrow_address)?;
                Deal::find_by_id(conn, &deal.id)
            })
        })
        .await?
        .map_err(|e| EngineError::WalletCreation(e.to_string()))?;

        info!(
            deal_id = %crate::log_deal!(&deal.id),
            amount = %crate::log_amount!(deal.amount_nano),
            "Deal created"
        );

        self.notify(&req.owner_id, "New ad deal proposal awaiting your review.")
            .await;

        Ok(deal)
    }

    pub async fn get_deal(&self, deal_id: &str) -> Result<Deal, EngineError> {
        db_load_deal(&self.db, deal_id)
            .await
            .map_err(|e| EngineError::NotFound(e.to_string()))
    }

    // ========================================================================
    // Transition engine
    // ========================================================================

    /// Apply an event to a deal, then its automatic follow-ups.
    ///
    /// Concurrency: reads the deal, computes the transition, and writes it
    /// back guarded by the version read. A concurrent writer makes the write
    /// miss; the loop re-reads and retries up to `MAX_TRANSITION_RETRIES`
    /// before surfacing `ConflictRetry`.
    pub async fn transition(
        &self,
        deal_id: &str,
        event: DealEvent,
    ) -> Result<Deal, EngineError> {
        let mut current = event;
        loop {
            let deal = self.apply_with_retry(deal_id, &current).await?;
            self.side_effects(&deal, &current).await;
            match follow_up(&current) {
                Some(next) => current = next,
                None => return Ok(deal),
            }
        }
    }

    async fn apply_with_retry(
        &self,
        deal_id: &str,
        event: &DealEvent,
    ) -> Result<Deal, EngineError> {
        for _ in 0..MAX_TRANSITION_RETRIES {
            let deal = self.get_deal(deal_id).await?;
            let status = deal.status()?;

            let next = next_status(status, event).ok_or_else(|| {
                EngineError::InvalidTransition {
                    status: status.as_str().to_string(),
                    event: event.name().to_string(),
                }
            })?;

            let changes = build_changes(&deal, next, event);
            let read_version = deal.version;
            let id = deal_id.to_string();

            let mut conn = self
                .db
                .get()
                .map_err(|e| EngineError::Database(e.to_string()))?;
            let result = tokio::task::spawn_blocking(move || {
                Deal::apply_versioned(&mut conn, &id, read_version, changes)
            })
            .await?;

            match result {
                Ok(updated) => {
                    info!(
                        deal_id = %crate::log_deal!(deal_id),
                        from = status.as_str(),
                        to = next.as_str(),
                        version = updated.version,
                        "Deal transition applied"
                    );
                    return Ok(updated);
                }
                Err(EngineError::ConflictRetry) => {
                    debug!(
                        deal_id = %crate::log_deal!(deal_id),
                        "Transition conflict, re-reading"
                    );
                    continue;
                }
                Err(e) => return Err(e),
            }
        }
        Err(EngineError::ConflictRetry)
    }

    /// Side effects, in order: scheduling, notification, settlement.
    /// Persisted state is already the source of truth when these run, so
    /// every effect is safe to repeat after a crash.
    async fn side_effects(&self, deal: &Deal, event: &DealEvent) {
        let status = match deal.status() {
            Ok(status) => status,
            Err(e) => {
                error!(deal_id = %crate::log_deal!(&deal.id), "Skipping side effects: {e}");
                return;
            }
        };
        match status {
            DealStatus::PendingPayment => {
                let deadline = chrono::Utc::now().naive_utc()
                    + chrono::Duration::seconds(self.config.payment_timeout_secs as i64);
                self.enqueue(&deal.id, TaskKind::TimeoutSweep, deadline).await;
                if let Some(address) = &deal.escrow_address {
                    self.notify(
                        &deal.advertiser_id,
                        &format!("Deal accepted. Fund escrow address {address} to proceed."),
                    )
                    .await;
                }
            }
            DealStatus::CreativePending => {
                let text = match event {
                    DealEvent::RequestRevision { feedback } => {
                        format!("Revision requested: {feedback}")
                    }
                    _ => "Payment received. Please submit the post creative.".to_string(),
                };
                self.notify(&deal.owner_id, &text).await;
            }
            DealStatus::CreativeSubmitted => {
                self.notify(&deal.advertiser_id, "Creative submitted for your review.")
                    .await;
            }
            DealStatus::Scheduled => {
                if let Some(publish_at) = deal.scheduled_at {
                    self.enqueue(&deal.id, TaskKind::AutoPost, publish_at).await;
                }
            }
            DealStatus::Posted => {
                if let (Some(posted_at), Some(window_end)) =
                    (deal.posted_at, deal.verification_window_end())
                {
                    let first = posted_at
                        + chrono::Duration::seconds(self.config.verify_interval_secs as i64);
                    self.enqueue(&deal.id, TaskKind::Verify, first.min(window_end))
                        .await;
                }
                self.notify(&deal.advertiser_id, "Your ad has been posted.").await;
            }
            DealStatus::Disputed => {
                let reason = deal.dispute_reason.as_deref().unwrap_or("unspecified");
                warn!(
                    deal_id = %crate::log_deal!(&deal.id),
                    reason,
                    "Deal entered dispute"
                );
                self.notify(&deal.advertiser_id, "Deal is under dispute review.")
                    .await;
                self.notify(&deal.owner_id, "Deal is under dispute review.").await;
            }
            status if status.is_terminal() => {
                self.settle(deal).await;
                let text = match status {
                    DealStatus::Completed => "Deal completed. Escrow released.",
                    DealStatus::Refunded => "Deal refunded. Escrow returned to advertiser.",
                    _ => "Deal cancelled.",
                };
                self.notify(&deal.advertiser_id, text).await;
                self.notify(&deal.owner_id, text).await;
            }
            _ => {}
        }
    }

    /// Drain the escrow wallet on terminal entry. Idempotent: the wallet's
    /// drain time short-circuits repeats; a pre-funding cancellation has
    /// nothing to move and the dust check reports that as a quiet no-op.
    pub async fn settle(&self, deal: &Deal) {
        let Some(address) = &deal.escrow_address else {
            warn!(deal_id = %crate::log_deal!(&deal.id), "Terminal deal has no escrow address");
            return;
        };

        let status = match deal.status() {
            Ok(status) => status,
            Err(e) => {
                error!(deal_id = %crate::log_deal!(&deal.id), "Refusing to settle: {e}");
                return;
            }
        };
        let split = match status {
            DealStatus::Completed => DrainSplit::Release {
                payout: deal.owner_payout_address.clone(),
                platform: platform::get_platform_wallet_address(),
                fee_bps: deal.fee_bps,
            },
            DealStatus::Refunded | DealStatus::Cancelled => DrainSplit::Single {
                destination: deal.advertiser_refund_address.clone(),
            },
            other => {
                error!(
                    deal_id = %crate::log_deal!(&deal.id),
                    status = other.as_str(),
                    "Settlement requested for non-terminal deal"
                );
                return;
            }
        };

        match self.wallets.drain(address, split).await {
            Ok(DrainOutcome::Drained { amount_nano, .. }) => {
                info!(
                    deal_id = %crate::log_deal!(&deal.id),
                    amount = %crate::log_amount!(amount_nano),
                    "Escrow settled"
                );
            }
            Ok(DrainOutcome::AlreadyDrained) => {
                debug!(deal_id = %crate::log_deal!(&deal.id), "Escrow already settled");
            }
            Err(EngineError::InsufficientBalance { available_nano }) => {
                // Expected for never-funded deals; anything above dust on a
                // funded deal is a recovery case and stays in the log.
                debug!(
                    deal_id = %crate::log_deal!(&deal.id),
                    available_nano,
                    "Nothing to settle"
                );
            }
            Err(e) => {
                // The transition is already persisted; the wallet stays
                // undrained and the admin recovery path can retry safely.
                error!(
                    deal_id = %crate::log_deal!(&deal.id),
                    "Settlement drain failed, manual recovery required: {e}"
                );
            }
        }
    }

    // ========================================================================
    // Operations consumed by the request layer
    // ========================================================================

    pub async fn accept(&self, deal_id: &str) -> Result<Deal, EngineError> {
        self.transition(deal_id, DealEvent::Accept).await
    }

    pub async fn reject(&self, deal_id: &str, reason: String) -> Result<Deal, EngineError> {
        self.transition(deal_id, DealEvent::Reject { reason }).await
    }

    pub async fn submit_creative(
        &self,
        deal_id: &str,
        text: String,
        media: Vec<String>,
    ) -> Result<Deal, EngineError> {
        if text.trim().is_empty() {
            return Err(EngineError::Validation("creative text must not be empty".into()));
        }
        self.transition(deal_id, DealEvent::SubmitCreative { text, media })
            .await
    }

    pub async fn request_revision(
        &self,
        deal_id: &str,
        feedback: String,
    ) -> Result<Deal, EngineError> {
        self.transition(deal_id, DealEvent::RequestRevision { feedback })
            .await
    }

    pub async fn approve_creative(&self, deal_id: &str) -> Result<Deal, EngineError> {
        self.transition(deal_id, DealEvent::ApproveCreative).await
    }

    pub async fn schedule(
        &self,
        deal_id: &str,
        publish_at: NaiveDateTime,
    ) -> Result<Deal, EngineError> {
        if publish_at <= chrono::Utc::now().naive_utc() {
            return Err(EngineError::Validation("publish time must be in the future".into()));
        }
        self.transition(deal_id, DealEvent::Schedule { publish_at })
            .await
    }

    /// Publish immediately, skipping the scheduled wait.
    pub async fn post_now(&self, deal_id: &str) -> Result<Deal, EngineError> {
        let deal = self.get_deal(deal_id).await?;
        if deal.status()? != DealStatus::CreativeApproved {
            return Err(EngineError::InvalidTransition {
                status: deal.status.clone(),
                event: "post_now".to_string(),
            });
        }
        let post_ref = self.publish(&deal).await?;
        self.transition(deal_id, DealEvent::MarkPosted { post_ref })
            .await
    }

    pub async fn cancel(&self, deal_id: &str, reason: String) -> Result<Deal, EngineError> {
        self.transition(deal_id, DealEvent::Cancel { reason }).await
    }

    pub async fn dispute(&self, deal_id: &str, reason: String) -> Result<Deal, EngineError> {
        self.transition(deal_id, DealEvent::Dispute { reason }).await
    }

    /// Publish the approved creative to the deal's channel.
    pub async fn publish(&self, deal: &Deal) -> Result<String, EngineError> {
        let content = deal
            .creative_text
            .as_deref()
            .ok_or_else(|| EngineError::Internal("deal has no creative to publish".into()))?;
        self.gateway.publish_post(&deal.channel_id, content).await
    }

    async fn enqueue(&self, deal_id: &str, kind: TaskKind, due_at: NaiveDateTime) {
        let Ok(mut conn) = self.db.get() else {
            error!("Failed to get DB connection for task enqueue");
            return;
        };
        let id = deal_id.to_string();
        match tokio::task::spawn_blocking(move || {
            ScheduledTask::enqueue(&mut conn, &id, kind, due_at)
        })
        .await
        {
            Ok(Ok(())) => {}
            Ok(Err(e)) => error!(
                deal_id = %crate::log_deal!(deal_id),
                "Failed to enqueue {} task: {e}",
                kind.as_str()
            ),
            Err(e) => error!("Task enqueue task panicked: {e}"),
        }
    }

    /// Best-effort user notification; delivery failures are logged only.
    async fn notify(&self, user_id: &str, text: &str) {
        if let Err(e) = self.gateway.send_message(user_id, text).await {
            warn!("Notification to user failed: {e}");
        }
    }
}

fn build_changes(deal: &Deal, next: DealStatus, event: &DealEvent) -> DealChanges {
    let mut changes = DealChanges {
        status: Some(next.as_str().to_string()),
        ..Default::default()
    };
    if next.is_terminal() {
        changes.archived = Some(true);
    }

    match event {
        DealEvent::SubmitCreative { text, media } => {
            changes.creative_text = Some(text.clone());
            changes.creative_media_json =
                Some(serde_json::to_string(media).unwrap_or_else(|_| "[]".into()));
        }
        DealEvent::RequestRevision { feedback } => {
            let mut history = deal.revision_history();
            history.push(RevisionEntry {
                feedback: feedback.clone(),
                submitted_creative: deal.creative_text.clone(),
                timestamp: chrono::Utc::now().naive_utc(),
            });
            changes.revision_history_json =
                Some(serde_json::to_string(&history).unwrap_or_else(|_| "[]".into()));
        }
        DealEvent::Schedule { publish_at } => {
            changes.scheduled_at = Some(*publish_at);
        }
        DealEvent::MarkPosted { post_ref } => {
            changes.posted_at = Some(chrono::Utc::now().naive_utc());
            changes.post_ref = Some(post_ref.clone());
        }
        DealEvent::VerificationFailed { reason } | DealEvent::Dispute { reason } => {
            changes.dispute_reason = Some(reason.clone());
        }
        DealEvent::Reject { reason } | DealEvent::Cancel { reason } => {
            changes.resolution_reason = Some(reason.clone());
        }
        DealEvent::ResolveRelease { reason } => {
            changes.resolution = Some("release".to_string());
            changes.resolution_reason = Some(reason.clone());
        }
        DealEvent::ResolveRefund { reason } => {
            changes.resolution = Some("refund".to_string());
            changes.resolution_reason = Some(reason.clone());
        }
        _ => {}
    }

    changes
}
