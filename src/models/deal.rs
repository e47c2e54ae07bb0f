//! Deal model: the aggregate root of the lifecycle engine.
//!
//! Column order MUST match schema.rs exactly; diesel's Queryable maps fields
//! positionally.

use anyhow::{Context, Result};
use chrono::NaiveDateTime;
use diesel::prelude::*;
use serde::{Deserialize, Serialize};

use crate::error::EngineError;
use crate::schema::deals;

/// Deal workflow status.
///
/// The main path runs top to bottom; `Cancelled` and `Refunded` are side
/// terminals reachable from a restricted set of states, and `Disputed`
/// resolves only through the dispute resolution authority.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DealStatus {
    PendingAcceptance,
    PendingPayment,
    PaymentReceived,
    CreativePending,
    CreativeSubmitted,
    CreativeRevision,
    CreativeApproved,
    Scheduled,
    Posted,
    Verified,
    Completed,
    Disputed,
    Cancelled,
    Refunded,
}

impl DealStatus {
    pub fn as_str(&self) -> &'static str {
        use DealStatus::*;
        match self {
            PendingAcceptance => "pending_acceptance",
            PendingPayment => "pending_payment",
            PaymentReceived => "payment_received",
            CreativePending => "creative_pending",
            CreativeSubmitted => "creative_submitted",
            CreativeRevision => "creative_revision",
            CreativeApproved => "creative_approved",
            Scheduled => "scheduled",
            Posted => "posted",
            Verified => "verified",
            Completed => "completed",
            Disputed => "disputed",
            Cancelled => "cancelled",
            Refunded => "refunded",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        use DealStatus::*;
        Some(match s {
            "pending_acceptance" => PendingAcceptance,
            "pending_payment" => PendingPayment,
            "payment_received" => PaymentReceived,
            "creative_pending" => CreativePending,
            "creative_submitted" => CreativeSubmitted,
            "creative_revision" => CreativeRevision,
            "creative_approved" => CreativeApproved,
            "scheduled" => Scheduled,
            "posted" => Posted,
            "verified" => Verified,
            "completed" => Completed,
            "disputed" => Disputed,
            "cancelled" => Cancelled,
            "refunded" => Refunded,
            _ => return None,
        })
    }

    /// Terminal states admit no further transition.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            DealStatus::Completed | DealStatus::Cancelled | DealStatus::Refunded
        )
    }

    /// True once the escrow wallet may hold funds: from funding onward a
    /// terminal entry must settle the wallet.
    pub fn past_funding(&self) -> bool {
        !matches!(
            self,
            DealStatus::PendingAcceptance | DealStatus::PendingPayment
        )
    }
}

/// One entry of the creative revision history (stored as a JSON column).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RevisionEntry {
    pub feedback: String,
    pub submitted_creative: Option<String>,
    pub timestamp: NaiveDateTime,
}

#[derive(Debug, Clone, Serialize, Deserialize, Queryable)]
#[diesel(table_name = deals)]
pub struct Deal {
    pub id: String,
    pub advertiser_id: String,
    pub owner_id: String,
    pub channel_id: String,
    pub amount_nano: i64,
    pub fee_bps: i32,
    pub escrow_address: Option<String>,
    pub status: String,
    pub brief: String,
    pub creative_text: Option<String>,
    pub creative_media_json: Option<String>,
    pub revision_history_json: String,
    pub scheduled_at: Option<NaiveDateTime>,
    pub posted_at: Option<NaiveDateTime>,
    pub post_ref: Option<String>,
    pub post_duration_hours: i32,
    pub advertiser_refund_address: String,
    pub owner_payout_address: String,
    pub dispute_reason: Option<String>,
    pub resolution: Option<String>,
    pub resolution_reason: Option<String>,
    pub archived: bool,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
    pub version: i32,
}

#[derive(Insertable)]
#[diesel(table_name = deals)]
pub struct NewDeal {
    pub id: String,
    pub advertiser_id: String,
    pub owner_id: String,
    pub channel_id: String,
    pub amount_nano: i64,
    pub fee_bps: i32,
    pub escrow_address: Option<String>,
    pub status: String,
    pub brief: String,
    pub revision_history_json: String,
    pub post_duration_hours: i32,
    pub advertiser_refund_address: String,
    pub owner_payout_address: String,
    pub archived: bool,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
    pub version: i32,
}

/// Field updates carried by one state transition.
///
/// `None` fields are left untouched. Every applied transition bumps the
/// version and refreshes `updated_at`.
#[derive(Debug, Default, AsChangeset)]
#[diesel(table_name = deals)]
pub struct DealChanges {
    pub status: Option<String>,
    pub creative_text: Option<String>,
    pub creative_media_json: Option<String>,
    pub revision_history_json: Option<String>,
    pub scheduled_at: Option<NaiveDateTime>,
    pub posted_at: Option<NaiveDateTime>,
    pub post_ref: Option<String>,
    pub dispute_reason: Option<String>,
    pub resolution: Option<String>,
    pub resolution_reason: Option<String>,
    pub archived: Option<bool>,
}

impl Deal {
    /// Parse the persisted status string. Status strings are only ever
    /// written via `DealStatus::as_str`, so a parse failure means the row
    /// is corrupt; the engine refuses to act on it rather than guessing.
    pub fn status(&self) -> std::result::Result<DealStatus, EngineError> {
        DealStatus::parse(&self.status).ok_or_else(|| {
            EngineError::Internal(format!(
                "deal {} has unrecognized status {:?}",
                self.id, self.status
            ))
        })
    }

    pub fn revision_history(&self) -> Vec<RevisionEntry> {
        serde_json::from_str(&self.revision_history_json).unwrap_or_default()
    }

    /// End of the post-survival verification window.
    pub fn verification_window_end(&self) -> Option<NaiveDateTime> {
        self.posted_at
            .map(|posted| posted + chrono::Duration::hours(self.post_duration_hours as i64))
    }

    /// Seconds the deal has waited for funding. The funding window opens
    /// when the deal enters `pending_payment`, which is the last write to
    /// the row while it waits, so `updated_at` marks that entry.
    pub fn seconds_awaiting_payment(&self, now: NaiveDateTime) -> i64 {
        (now - self.updated_at).num_seconds()
    }

    pub fn create(conn: &mut SqliteConnection, new_deal: NewDeal) -> Result<Deal> {
        let deal_id = new_deal.id.clone();
        diesel::insert_into(deals::table)
            .values(&new_deal)
            .execute(conn)
            .context("Failed to insert deal")?;

        deals::table
            .filter(deals::id.eq(deal_id))
            .first(conn)
            .context("Failed to retrieve created deal")
    }

    pub fn find_by_id(conn: &mut SqliteConnection, deal_id: &str) -> Result<Deal> {
        deals::table
            .filter(deals::id.eq(deal_id))
            .first(conn)
            .context(format!("Deal {deal_id} not found"))
    }

    /// Apply a transition under optimistic concurrency control.
    ///
    /// The UPDATE only matches when the stored version still equals
    /// `read_version`; zero affected rows means a concurrent writer won and
    /// the caller must re-read and retry. This is the engine's sole
    /// same-deal serialization mechanism.
    pub fn apply_versioned(
        conn: &mut SqliteConnection,
        deal_id: &str,
        read_version: i32,
        changes: DealChanges,
    ) -> Result<Deal, EngineError> {
        let now = chrono::Utc::now().naive_utc();
        let affected = diesel::update(
            deals::table
                .filter(deals::id.eq(deal_id))
                .filter(deals::version.eq(read_version)),
        )
        .set((
            &changes,
            deals::version.eq(read_version + 1),
            deals::updated_at.eq(now),
        ))
        .execute(conn)?;

        if affected == 0 {
            return Err(EngineError::ConflictRetry);
        }

        deals::table
            .filter(deals::id.eq(deal_id))
            .first(conn)
            .map_err(EngineError::from)
    }

    /// Attach the escrow wallet address right after creation. Not versioned:
    /// runs inside the creation transaction before the deal is visible.
    pub fn attach_escrow_address(
        conn: &mut SqliteConnection,
        deal_id: &str,
        address: &str,
    ) -> Result<()> {
        diesel::update(deals::table.filter(deals::id.eq(deal_id)))
            .set(deals::escrow_address.eq(address))
            .execute(conn)
            .context(format!("Failed to attach escrow address to deal {deal_id}"))?;
        Ok(())
    }

    pub fn find_awaiting_payment(conn: &mut SqliteConnection) -> Result<Vec<Deal>> {
        deals::table
            .filter(deals::status.eq(DealStatus::PendingPayment.as_str()))
            .filter(deals::archived.eq(false))
            .load(conn)
            .context("Failed to load deals awaiting payment")
    }
}
