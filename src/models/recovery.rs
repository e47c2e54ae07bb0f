//! Audit records for out-of-band fund recovery.
//!
//! Written only when `recover_funds` actually moved money; a failed or
//! zero-balance attempt persists nothing.

use anyhow::{Context, Result};
use chrono::NaiveDateTime;
use diesel::prelude::*;
use uuid::Uuid;

use crate::schema::recovery_transfers;

#[derive(Debug, Clone, Queryable)]
#[diesel(table_name = recovery_transfers)]
pub struct RecoveryTransfer {
    pub id: String,
    pub escrow_address: String,
    pub destination: String,
    pub amount_nano: i64,
    pub tx_hash: String,
    pub requested_by: String,
    pub created_at: NaiveDateTime,
}

#[derive(Insertable)]
#[diesel(table_name = recovery_transfers)]
struct NewRecoveryTransfer {
    id: String,
    escrow_address: String,
    destination: String,
    amount_nano: i64,
    tx_hash: String,
    requested_by: String,
    created_at: NaiveDateTime,
}

impl RecoveryTransfer {
    pub fn record(
        conn: &mut SqliteConnection,
        escrow_address: &str,
        destination: &str,
        amount_nano: i64,
        tx_hash: &str,
        requested_by: &str,
    ) -> Result<()> {
        let row = NewRecoveryTransfer {
            id: Uuid::new_v4().to_string(),
            escrow_address: escrow_address.to_string(),
            destination: destination.to_string(),
            amount_nano,
            tx_hash: tx_hash.to_string(),
            requested_by: requested_by.to_string(),
            created_at: chrono::Utc::now().naive_utc(),
        };
        diesel::insert_into(recovery_transfers::table)
            .values(&row)
            .execute(conn)
            .context("Failed to record recovery transfer")?;
        Ok(())
    }

    pub fn for_address(
        conn: &mut SqliteConnection,
        escrow_address: &str,
    ) -> Result<Vec<RecoveryTransfer>> {
        recovery_transfers::table
            .filter(recovery_transfers::escrow_address.eq(escrow_address))
            .order(recovery_transfers::created_at.asc())
            .load(conn)
            .context("Failed to load recovery transfers")
    }
}
