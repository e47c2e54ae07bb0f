//! Shared fixtures: in-memory database, fast timeouts, and a wired engine.

use std::sync::Arc;

use diesel::prelude::*;
use diesel::r2d2::{self, ConnectionManager};

use adbroker::config::{AdminPolicy, MasterKey, TimeoutConfig};
use adbroker::db::{init_schema, DbPool};
use adbroker::models::deal::{Deal, DealStatus};
use adbroker::models::task::TaskKind;
use adbroker::schema::{deals, scheduled_tasks};
use adbroker::services::dispute::DisputeAuthority;
use adbroker::services::lifecycle::{CreateDealRequest, DealLifecycle};
use adbroker::services::payment_monitor::PaymentMonitor;
use adbroker::services::post_monitor::VerificationMonitor;
use adbroker::services::scheduler::Scheduler;
use adbroker::wallet_manager::EscrowWalletManager;

use super::mock_chain::MockChain;
use super::mock_gateway::MockGateway;

pub const TEST_ADMIN: &str = "admin-1";
pub const DEAL_AMOUNT: i64 = 10_000_000_000; // 10 TON

/// In-memory SQLite pool. Capped at one connection: each `:memory:`
/// connection is its own database, so the pool must never open a second.
pub fn test_pool() -> DbPool {
    let manager = ConnectionManager::<SqliteConnection>::new(":memory:");
    let pool = r2d2::Pool::builder()
        .max_size(1)
        .build(manager)
        .expect("failed to build test pool");
    let mut conn = pool.get().expect("failed to get test connection");
    init_schema(&mut conn).expect("failed to init test schema");
    pool
}

/// Millisecond-scale backoffs so injected-failure tests stay fast.
pub fn test_config() -> TimeoutConfig {
    TimeoutConfig {
        poll_interval_secs: 1,
        payment_sweep_interval_secs: 1,
        payment_timeout_secs: 3600,
        verify_interval_secs: 60,
        drain_max_attempts: 3,
        drain_backoff_base_ms: 1,
        rpc_timeout_secs: 1,
        failure_alert_threshold: 3,
    }
}

pub fn test_master_key() -> MasterKey {
    MasterKey::from_bytes([7u8; 32])
}

/// The full engine wired against mocks and an in-memory database.
pub struct TestHarness {
    pub pool: DbPool,
    pub chain: Arc<MockChain>,
    pub gateway: Arc<MockGateway>,
    pub wallets: Arc<EscrowWalletManager>,
    pub lifecycle: Arc<DealLifecycle>,
    pub payments: Arc<PaymentMonitor>,
    pub verifier: Arc<VerificationMonitor>,
    pub scheduler: Arc<Scheduler>,
    pub disputes: Arc<DisputeAuthority>,
}

pub fn harness() -> TestHarness {
    let pool = test_pool();
    let config = test_config();
    let chain = Arc::new(MockChain::new());
    let gateway = Arc::new(MockGateway::new());

    let wallets = Arc::new(EscrowWalletManager::new(
        pool.clone(),
        chain.clone(),
        test_master_key(),
        config.clone(),
    ));
    let lifecycle = Arc::new(DealLifecycle::new(
        pool.clone(),
        wallets.clone(),
        gateway.clone(),
        config.clone(),
    ));
    let payments = Arc::new(PaymentMonitor::new(
        pool.clone(),
        chain.clone(),
        lifecycle.clone(),
        config.clone(),
    ));
    let verifier = Arc::new(VerificationMonitor::new(
        pool.clone(),
        gateway.clone(),
        lifecycle.clone(),
        config.clone(),
    ));
    let scheduler = Arc::new(Scheduler::new(
        pool.clone(),
        lifecycle.clone(),
        payments.clone(),
        verifier.clone(),
        config,
    ));
    let disputes = Arc::new(DisputeAuthority::new(
        pool.clone(),
        lifecycle.clone(),
        wallets.clone(),
        AdminPolicy::new([TEST_ADMIN.to_string()]),
    ));

    TestHarness {
        pool,
        chain,
        gateway,
        wallets,
        lifecycle,
        payments,
        verifier,
        scheduler,
        disputes,
    }
}

pub fn sample_request() -> CreateDealRequest {
    CreateDealRequest {
        advertiser_id: "adv-1".to_string(),
        owner_id: "owner-1".to_string(),
        channel_id: "chan-1".to_string(),
        amount_nano: DEAL_AMOUNT,
        brief: "24h pinned promo for a wallet app".to_string(),
        post_duration_hours: 24,
        advertiser_refund_address: "0:aaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa".to_string(),
        owner_payout_address: "0:bbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbb".to_string(),
    }
}

impl TestHarness {
    /// Create a deal and accept it, leaving it in `pending_payment`.
    pub async fn accepted_deal(&self) -> Deal {
        let deal = self
            .lifecycle
            .create_deal(sample_request())
            .await
            .expect("create_deal failed");
        self.lifecycle
            .accept(&deal.id)
            .await
            .expect("accept failed")
    }

    /// Fund the escrow exactly and reconcile; lands in `creative_pending`.
    pub async fn funded_deal(&self) -> Deal {
        let deal = self.accepted_deal().await;
        let address = deal.escrow_address.as_deref().expect("no escrow address");
        self.chain.set_balance(address, deal.amount_nano);
        self.payments
            .check_payment(&deal)
            .await
            .expect("check_payment failed");
        self.reload(&deal.id).await
    }

    /// Drive a funded deal through creative review and immediate posting.
    pub async fn posted_deal(&self) -> Deal {
        let deal = self.funded_deal().await;
        self.lifecycle
            .submit_creative(&deal.id, "Try the wallet today".to_string(), vec![])
            .await
            .expect("submit_creative failed");
        self.lifecycle
            .approve_creative(&deal.id)
            .await
            .expect("approve_creative failed");
        self.lifecycle
            .post_now(&deal.id)
            .await
            .expect("post_now failed")
    }

    pub async fn reload(&self, deal_id: &str) -> Deal {
        self.lifecycle.get_deal(deal_id).await.expect("deal vanished")
    }

    pub async fn status_of(&self, deal_id: &str) -> DealStatus {
        self.reload(deal_id).await.status().expect("unreadable status")
    }

    /// Move `posted_at` into the past so the verification window is closed.
    pub fn backdate_posted(&self, deal_id: &str, hours: i64) {
        let mut conn = self.pool.get().expect("pool exhausted");
        let then = chrono::Utc::now().naive_utc() - chrono::Duration::hours(hours);
        diesel::update(deals::table.filter(deals::id.eq(deal_id)))
            .set(deals::posted_at.eq(then))
            .execute(&mut conn)
            .expect("backdate_posted failed");
    }

    /// Age the deal so the payment timeout has elapsed.
    /// Pretend the deal entered `pending_payment` `secs` seconds ago.
    pub fn backdate_accepted(&self, deal_id: &str, secs: i64) {
        let mut conn = self.pool.get().expect("pool exhausted");
        let then = chrono::Utc::now().naive_utc() - chrono::Duration::seconds(secs);
        diesel::update(deals::table.filter(deals::id.eq(deal_id)))
            .set((deals::created_at.eq(then), deals::updated_at.eq(then)))
            .execute(&mut conn)
            .expect("backdate_accepted failed");
    }

    /// Force a pending task of the given kind to be due now.
    pub fn make_task_due(&self, deal_id: &str, kind: TaskKind) {
        let mut conn = self.pool.get().expect("pool exhausted");
        let past = chrono::Utc::now().naive_utc() - chrono::Duration::seconds(1);
        diesel::update(
            scheduled_tasks::table
                .filter(scheduled_tasks::deal_id.eq(deal_id))
                .filter(scheduled_tasks::kind.eq(kind.as_str()))
                .filter(scheduled_tasks::completed_at.is_null()),
        )
        .set(scheduled_tasks::due_at.eq(past))
        .execute(&mut conn)
        .expect("make_task_due failed");
    }
}
