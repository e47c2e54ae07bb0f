//! Verification check records.
//!
//! Append-only evidence trail: one row per post-survival check. Rows are
//! never updated or deleted; they decide automatic completion and back
//! dispute resolution.

use anyhow::{Context, Result};
use chrono::NaiveDateTime;
use diesel::prelude::*;
use serde::Serialize;
use uuid::Uuid;

use crate::schema::verification_checks;

#[derive(Debug, Clone, Queryable, Serialize)]
#[diesel(table_name = verification_checks)]
pub struct VerificationCheck {
    pub id: String,
    pub deal_id: String,
    pub checked_at: NaiveDateTime,
    pub post_exists: bool,
    pub post_unmodified: bool,
}

#[derive(Insertable)]
#[diesel(table_name = verification_checks)]
pub struct NewVerificationCheck {
    pub id: String,
    pub deal_id: String,
    pub checked_at: NaiveDateTime,
    pub post_exists: bool,
    pub post_unmodified: bool,
}

impl VerificationCheck {
    pub fn is_pass(&self) -> bool {
        self.post_exists && self.post_unmodified
    }

    pub fn append(
        conn: &mut SqliteConnection,
        deal_id: &str,
        post_exists: bool,
        post_unmodified: bool,
    ) -> Result<VerificationCheck> {
        let record = NewVerificationCheck {
            id: Uuid::new_v4().to_string(),
            deal_id: deal_id.to_string(),
            checked_at: chrono::Utc::now().naive_utc(),
            post_exists,
            post_unmodified,
        };
        diesel::insert_into(verification_checks::table)
            .values(&record)
            .execute(conn)
            .context("Failed to append verification check")?;

        verification_checks::table
            .filter(verification_checks::id.eq(&record.id))
            .first(conn)
            .context("Failed to read back verification check")
    }

    pub fn for_deal(conn: &mut SqliteConnection, deal_id: &str) -> Result<Vec<VerificationCheck>> {
        verification_checks::table
            .filter(verification_checks::deal_id.eq(deal_id))
            .order(verification_checks::checked_at.asc())
            .load(conn)
            .context(format!("Failed to load checks for deal {deal_id}"))
    }
}
