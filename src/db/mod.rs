//! Database pool and async access helpers.
//!
//! Diesel over SQLite behind an r2d2 pool. All blocking diesel work is run
//! through `tokio::task::spawn_blocking`; nothing in the engine holds a
//! connection across an await point.

use anyhow::{Context, Result};
use diesel::prelude::*;
use diesel::r2d2::{self, ConnectionManager, CustomizeConnection};
use diesel::sql_query;

use crate::models::deal::Deal;
use crate::models::wallet::EscrowWallet;
use crate::schema::{deals, escrow_wallets};

pub type DbPool = r2d2::Pool<ConnectionManager<SqliteConnection>>;

/// Applies SQLite pragmas on every acquired connection.
#[derive(Debug, Clone)]
struct SqlitePragmaCustomizer;

impl CustomizeConnection<SqliteConnection, diesel::r2d2::Error> for SqlitePragmaCustomizer {
    fn on_acquire(&self, conn: &mut SqliteConnection) -> Result<(), diesel::r2d2::Error> {
        // Wait for locks instead of failing immediately; monitors and
        // request handlers share the pool.
        sql_query("PRAGMA busy_timeout = 5000;")
            .execute(conn)
            .map_err(diesel::r2d2::Error::QueryError)?;

        sql_query("PRAGMA journal_mode = WAL;")
            .execute(conn)
            .map_err(diesel::r2d2::Error::QueryError)?;

        sql_query("PRAGMA foreign_keys = ON;")
            .execute(conn)
            .map_err(diesel::r2d2::Error::QueryError)?;

        Ok(())
    }
}

/// Create the connection pool and ensure the schema exists.
pub fn create_pool(database_url: &str) -> Result<DbPool> {
    let manager = ConnectionManager::<SqliteConnection>::new(database_url);
    let pool = r2d2::Pool::builder()
        .max_size(8)
        .connection_customizer(Box::new(SqlitePragmaCustomizer))
        .build(manager)
        .context("Failed to build database pool")?;

    let mut conn = pool.get().context("Failed to get initial connection")?;
    init_schema(&mut conn)?;

    Ok(pool)
}

/// Create all engine tables if they do not exist.
pub fn init_schema(conn: &mut SqliteConnection) -> Result<()> {
    const DDL: &[&str] = &[
        "CREATE TABLE IF NOT EXISTS deals (
            id TEXT PRIMARY KEY NOT NULL,
            advertiser_id TEXT NOT NULL,
            owner_id TEXT NOT NULL,
            channel_id TEXT NOT NULL,
            amount_nano BIGINT NOT NULL,
            fee_bps INTEGER NOT NULL,
            escrow_address TEXT UNIQUE,
            status TEXT NOT NULL,
            brief TEXT NOT NULL,
            creative_text TEXT,
            creative_media_json TEXT,
            revision_history_json TEXT NOT NULL DEFAULT '[]',
            scheduled_at TIMESTAMP,
            posted_at TIMESTAMP,
            post_ref TEXT,
            post_duration_hours INTEGER NOT NULL,
            advertiser_refund_address TEXT NOT NULL,
            owner_payout_address TEXT NOT NULL,
            dispute_reason TEXT,
            resolution TEXT,
            resolution_reason TEXT,
            archived BOOLEAN NOT NULL DEFAULT 0,
            created_at TIMESTAMP NOT NULL,
            updated_at TIMESTAMP NOT NULL,
            version INTEGER NOT NULL DEFAULT 0
        )",
        "CREATE TABLE IF NOT EXISTS escrow_wallets (
            address TEXT PRIMARY KEY NOT NULL,
            deal_id TEXT NOT NULL UNIQUE,
            public_key TEXT NOT NULL,
            secret_enc BLOB NOT NULL,
            last_balance_nano BIGINT NOT NULL DEFAULT 0,
            created_at TIMESTAMP NOT NULL,
            drained_at TIMESTAMP,
            drain_tx_hash TEXT,
            drained_amount_nano BIGINT
        )",
        "CREATE TABLE IF NOT EXISTS verification_checks (
            id TEXT PRIMARY KEY NOT NULL,
            deal_id TEXT NOT NULL,
            checked_at TIMESTAMP NOT NULL,
            post_exists BOOLEAN NOT NULL,
            post_unmodified BOOLEAN NOT NULL
        )",
        "CREATE TABLE IF NOT EXISTS scheduled_tasks (
            id TEXT PRIMARY KEY NOT NULL,
            deal_id TEXT NOT NULL,
            kind TEXT NOT NULL,
            due_at TIMESTAMP NOT NULL,
            attempts INTEGER NOT NULL DEFAULT 0,
            completed_at TIMESTAMP,
            created_at TIMESTAMP NOT NULL
        )",
        // One pending task per (deal, kind); completed rows stay for audit.
        "CREATE UNIQUE INDEX IF NOT EXISTS idx_tasks_pending
            ON scheduled_tasks (deal_id, kind) WHERE completed_at IS NULL",
        "CREATE TABLE IF NOT EXISTS recovery_transfers (
            id TEXT PRIMARY KEY NOT NULL,
            escrow_address TEXT NOT NULL,
            destination TEXT NOT NULL,
            amount_nano BIGINT NOT NULL,
            tx_hash TEXT NOT NULL,
            requested_by TEXT NOT NULL,
            created_at TIMESTAMP NOT NULL
        )",
        "CREATE INDEX IF NOT EXISTS idx_deals_status ON deals (status)",
        "CREATE INDEX IF NOT EXISTS idx_checks_deal ON verification_checks (deal_id)",
    ];

    for statement in DDL {
        sql_query(*statement)
            .execute(conn)
            .with_context(|| "Failed to apply schema statement")?;
    }
    Ok(())
}

pub async fn db_load_deal(pool: &DbPool, deal_id: &str) -> Result<Deal> {
    let mut conn = pool.get().context("Failed to get DB connection")?;
    let id = deal_id.to_string();
    tokio::task::spawn_blocking(move || {
        deals::table
            .filter(deals::id.eq(&id))
            .first(&mut conn)
            .context(format!("Deal {id} not found"))
    })
    .await?
}

pub async fn db_load_wallet(pool: &DbPool, address: &str) -> Result<EscrowWallet> {
    let mut conn = pool.get().context("Failed to get DB connection")?;
    let addr = address.to_string();
    tokio::task::spawn_blocking(move || {
        escrow_wallets::table
            .filter(escrow_wallets::address.eq(&addr))
            .first(&mut conn)
            .context(format!(
                "Escrow wallet {} not found",
                crate::logging::sanitize::sanitize_address(&addr)
            ))
    })
    .await?
}

pub async fn db_load_wallet_for_deal(pool: &DbPool, deal_id: &str) -> Result<EscrowWallet> {
    let mut conn = pool.get().context("Failed to get DB connection")?;
    let id = deal_id.to_string();
    tokio::task::spawn_blocking(move || {
        escrow_wallets::table
            .filter(escrow_wallets::deal_id.eq(&id))
            .first(&mut conn)
            .context(format!("No escrow wallet bound to deal {id}"))
    })
    .await?
}

pub async fn db_load_deals_with_status(pool: &DbPool, status: &str) -> Result<Vec<Deal>> {
    let mut conn = pool.get().context("Failed to get DB connection")?;
    let status = status.to_string();
    tokio::task::spawn_blocking(move || {
        deals::table
            .filter(deals::status.eq(&status))
            .filter(deals::archived.eq(false))
            .load(&mut conn)
            .context(format!("Failed to load deals with status {status}"))
    })
    .await?
}
