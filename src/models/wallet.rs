//! Escrow wallet model.
//!
//! One wallet per deal, keyed by address. The sealed signing key lives in
//! `secret_enc` and is only opened inside a drain operation. `drained_at`
//! is the drain-once guard: it is recorded before a drain is considered
//! complete, and every drain attempt re-checks it first.

use anyhow::{Context, Result};
use chrono::NaiveDateTime;
use diesel::prelude::*;
use serde::Serialize;

use crate::schema::escrow_wallets;

#[derive(Debug, Clone, Queryable, Serialize)]
#[diesel(table_name = escrow_wallets)]
pub struct EscrowWallet {
    pub address: String,
    pub deal_id: String,
    pub public_key: String,
    #[serde(skip_serializing)]
    pub secret_enc: Vec<u8>,
    pub last_balance_nano: i64,
    pub created_at: NaiveDateTime,
    pub drained_at: Option<NaiveDateTime>,
    pub drain_tx_hash: Option<String>,
    pub drained_amount_nano: Option<i64>,
}

#[derive(Insertable)]
#[diesel(table_name = escrow_wallets)]
pub struct NewEscrowWallet {
    pub address: String,
    pub deal_id: String,
    pub public_key: String,
    pub secret_enc: Vec<u8>,
    pub last_balance_nano: i64,
    pub created_at: NaiveDateTime,
}

impl EscrowWallet {
    pub fn is_drained(&self) -> bool {
        self.drained_at.is_some()
    }

    pub fn create(conn: &mut SqliteConnection, new_wallet: NewEscrowWallet) -> Result<()> {
        diesel::insert_into(escrow_wallets::table)
            .values(&new_wallet)
            .execute(conn)
            .context("Failed to insert escrow wallet")?;
        Ok(())
    }

    pub fn find_by_address(conn: &mut SqliteConnection, address: &str) -> Result<EscrowWallet> {
        escrow_wallets::table
            .filter(escrow_wallets::address.eq(address))
            .first(conn)
            .context("Escrow wallet not found")
    }

    pub fn find_by_deal(conn: &mut SqliteConnection, deal_id: &str) -> Result<EscrowWallet> {
        escrow_wallets::table
            .filter(escrow_wallets::deal_id.eq(deal_id))
            .first(conn)
            .context(format!("No escrow wallet bound to deal {deal_id}"))
    }

    pub fn update_observed_balance(
        conn: &mut SqliteConnection,
        address: &str,
        balance_nano: i64,
    ) -> Result<()> {
        diesel::update(escrow_wallets::table.filter(escrow_wallets::address.eq(address)))
            .set(escrow_wallets::last_balance_nano.eq(balance_nano))
            .execute(conn)
            .context("Failed to update observed balance")?;
        Ok(())
    }

    /// Record a completed drain. The WHERE clause re-checks `drained_at IS
    /// NULL` so a racing second drain cannot overwrite the first record;
    /// returns false when the wallet was already marked drained.
    pub fn mark_drained(
        conn: &mut SqliteConnection,
        address: &str,
        tx_hash: &str,
        amount_nano: i64,
    ) -> Result<bool> {
        let now = chrono::Utc::now().naive_utc();
        let affected = diesel::update(
            escrow_wallets::table
                .filter(escrow_wallets::address.eq(address))
                .filter(escrow_wallets::drained_at.is_null()),
        )
        .set((
            escrow_wallets::drained_at.eq(now),
            escrow_wallets::drain_tx_hash.eq(tx_hash),
            escrow_wallets::drained_amount_nano.eq(amount_nano),
        ))
        .execute(conn)
        .context("Failed to record wallet drain")?;
        Ok(affected == 1)
    }
}
