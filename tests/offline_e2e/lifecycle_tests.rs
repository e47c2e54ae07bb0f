//! Deal creation and state machine behavior against the real database.

use adbroker::error::EngineError;
use adbroker::models::deal::{Deal, DealChanges, DealStatus};
use adbroker::models::task::{ScheduledTask, TaskKind};
use adbroker::models::wallet::EscrowWallet;

use crate::mock_infrastructure::{harness, sample_request};

#[tokio::test]
async fn create_deal_provisions_escrow_wallet() {
    let h = harness();
    let deal = h.lifecycle.create_deal(sample_request()).await.unwrap();

    assert_eq!(deal.status().unwrap(), DealStatus::PendingAcceptance);
    assert_eq!(deal.version, 0);

    let address = deal.escrow_address.clone().expect("deal has no escrow address");
    assert!(address.starts_with("0:"), "unexpected address format: {address}");

    let mut conn = h.pool.get().unwrap();
    let wallet = EscrowWallet::find_by_deal(&mut conn, &deal.id).unwrap();
    assert_eq!(wallet.address, address);
    assert!(!wallet.is_drained());
    // The signing key is sealed, never stored raw.
    assert!(wallet.secret_enc.len() > 32);
}

#[tokio::test]
async fn create_deal_rejects_non_positive_amount() {
    let h = harness();
    let mut req = sample_request();
    req.amount_nano = 0;
    assert!(matches!(
        h.lifecycle.create_deal(req).await,
        Err(EngineError::Validation(_))
    ));

    let mut req = sample_request();
    req.post_duration_hours = -1;
    assert!(matches!(
        h.lifecycle.create_deal(req).await,
        Err(EngineError::Validation(_))
    ));
}

#[tokio::test]
async fn accept_enqueues_payment_timeout_task() {
    let h = harness();
    let deal = h.accepted_deal().await;
    assert_eq!(deal.status().unwrap(), DealStatus::PendingPayment);

    let mut conn = h.pool.get().unwrap();
    let task = ScheduledTask::find_pending(&mut conn, &deal.id, TaskKind::TimeoutSweep)
        .unwrap()
        .expect("no timeout task enqueued");
    assert!(task.due_at > chrono::Utc::now().naive_utc());

    // The advertiser is told where to send funds.
    let escrow = deal.escrow_address.unwrap();
    assert!(h
        .gateway
        .messages()
        .iter()
        .any(|(user, text)| user == "adv-1" && text.contains(&escrow)));
}

#[tokio::test]
async fn reject_terminates_and_archives() {
    let h = harness();
    let deal = h.lifecycle.create_deal(sample_request()).await.unwrap();
    let rejected = h
        .lifecycle
        .reject(&deal.id, "rate too high".to_string())
        .await
        .unwrap();

    assert_eq!(rejected.status().unwrap(), DealStatus::Cancelled);
    assert!(rejected.archived);
    assert_eq!(rejected.resolution_reason.as_deref(), Some("rate too high"));
    // Nothing was funded, so nothing moves on-chain.
    assert!(h.chain.transfers().is_empty());
}

#[tokio::test]
async fn illegal_events_are_rejected() {
    let h = harness();
    let deal = h.lifecycle.create_deal(sample_request()).await.unwrap();

    // Creative approval before the deal is even accepted.
    let err = h.lifecycle.approve_creative(&deal.id).await.unwrap_err();
    assert!(matches!(err, EngineError::InvalidTransition { .. }));

    // Dispute before anything was posted.
    let err = h
        .lifecycle
        .dispute(&deal.id, "no reason".to_string())
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::InvalidTransition { .. }));

    // The failed events must not have touched the row.
    assert_eq!(h.reload(&deal.id).await.version, deal.version);
}

#[tokio::test]
async fn corrupted_status_string_is_an_error_not_a_verdict() {
    let h = harness();
    let deal = h.accepted_deal().await;

    // A status string nothing in the engine ever writes.
    {
        use adbroker::schema::deals;
        use diesel::prelude::*;
        let mut conn = h.pool.get().unwrap();
        diesel::update(deals::table.filter(deals::id.eq(&deal.id)))
            .set(deals::status.eq("pending-paymint"))
            .execute(&mut conn)
            .unwrap();
    }

    let row = h.reload(&deal.id).await;
    assert!(matches!(row.status(), Err(EngineError::Internal(_))));

    // The engine refuses to act on the row rather than treating the
    // garbage as some terminal state.
    let err = h.lifecycle.approve_creative(&deal.id).await.unwrap_err();
    assert!(matches!(err, EngineError::Internal(_)));
}

#[tokio::test]
async fn happy_path_reaches_posted_with_post_ref() {
    let h = harness();
    let deal = h.posted_deal().await;

    assert_eq!(deal.status().unwrap(), DealStatus::Posted);
    assert!(deal.posted_at.is_some());
    let post_ref = deal.post_ref.as_deref().expect("posted deal has no post_ref");
    assert!(post_ref.starts_with("msg-"));
    assert_eq!(h.gateway.post_count(), 1);

    // A verification task is waiting inside the window.
    let mut conn = h.pool.get().unwrap();
    let task = ScheduledTask::find_pending(&mut conn, &deal.id, TaskKind::Verify)
        .unwrap()
        .expect("no verify task enqueued");
    assert!(task.due_at <= deal.verification_window_end().unwrap());
}

#[tokio::test]
async fn revision_loop_preserves_history() {
    let h = harness();
    let deal = h.funded_deal().await;

    h.lifecycle
        .submit_creative(&deal.id, "first draft".to_string(), vec![])
        .await
        .unwrap();
    h.lifecycle
        .request_revision(&deal.id, "mention the discount code".to_string())
        .await
        .unwrap();

    let revised = h.reload(&deal.id).await;
    assert_eq!(revised.status().unwrap(), DealStatus::CreativePending);
    let history = revised.revision_history();
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].feedback, "mention the discount code");
    assert_eq!(history[0].submitted_creative.as_deref(), Some("first draft"));

    // Second round still works and appends.
    h.lifecycle
        .submit_creative(&deal.id, "second draft".to_string(), vec![])
        .await
        .unwrap();
    h.lifecycle
        .request_revision(&deal.id, "shorter".to_string())
        .await
        .unwrap();
    assert_eq!(h.reload(&deal.id).await.revision_history().len(), 2);
}

#[tokio::test]
async fn cancel_after_funding_refunds_advertiser() {
    let h = harness();
    let deal = h.funded_deal().await;

    let cancelled = h
        .lifecycle
        .cancel(&deal.id, "changed my mind".to_string())
        .await
        .unwrap();
    assert_eq!(cancelled.status().unwrap(), DealStatus::Cancelled);

    let transfers = h.chain.transfers();
    assert_eq!(transfers.len(), 1);
    assert_eq!(
        transfers[0].destination,
        sample_request().advertiser_refund_address
    );
    // Full balance minus the chain transfer fee.
    assert!(transfers[0].amount_nano > 0);
    assert!(transfers[0].amount_nano < deal.amount_nano);

    let mut conn = h.pool.get().unwrap();
    let wallet = EscrowWallet::find_by_deal(&mut conn, &deal.id).unwrap();
    assert!(wallet.is_drained());
}

#[tokio::test]
async fn cancel_blocked_after_posting() {
    let h = harness();
    let deal = h.posted_deal().await;

    let err = h
        .lifecycle
        .cancel(&deal.id, "too late".to_string())
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::InvalidTransition { .. }));
    assert_eq!(h.status_of(&deal.id).await, DealStatus::Posted);
}

#[tokio::test]
async fn stale_version_write_is_rejected() {
    let h = harness();
    let deal = h.accepted_deal().await;

    let mut conn = h.pool.get().unwrap();
    let changes = DealChanges {
        status: Some(DealStatus::PaymentReceived.as_str().to_string()),
        ..Default::default()
    };
    // accept() already bumped the version past 0.
    let result = Deal::apply_versioned(&mut conn, &deal.id, 0, changes);
    assert!(matches!(result, Err(EngineError::ConflictRetry)));
}
