//! Funding reconciliation: balance classification, idempotency, and the
//! unfunded-timeout path.

use adbroker::error::EngineError;
use adbroker::models::deal::DealStatus;
use adbroker::models::wallet::EscrowWallet;
use adbroker::services::payment_monitor::PaymentStatus;

use crate::mock_infrastructure::harness;

#[tokio::test]
async fn unfunded_deal_stays_pending() {
    let h = harness();
    let deal = h.accepted_deal().await;

    let status = h.payments.check_payment(&deal).await.unwrap();
    assert_eq!(status, PaymentStatus::Unfunded);
    assert_eq!(h.status_of(&deal.id).await, DealStatus::PendingPayment);
}

#[tokio::test]
async fn underfunded_deal_is_not_advanced() {
    let h = harness();
    let deal = h.accepted_deal().await;
    let address = deal.escrow_address.as_deref().unwrap();

    // Well below amount minus tolerance.
    h.chain.set_balance(address, deal.amount_nano / 2);
    let status = h.payments.check_payment(&deal).await.unwrap();
    assert_eq!(status, PaymentStatus::Underfunded(deal.amount_nano / 2));
    assert_eq!(h.status_of(&deal.id).await, DealStatus::PendingPayment);
}

#[tokio::test]
async fn exact_funding_advances_to_creative_pending() {
    let h = harness();
    let deal = h.accepted_deal().await;
    let address = deal.escrow_address.as_deref().unwrap();

    h.chain.set_balance(address, deal.amount_nano);
    let status = h.payments.check_payment(&deal).await.unwrap();
    assert_eq!(status, PaymentStatus::Funded(deal.amount_nano));

    // payment_received is momentary; the deal lands in creative_pending.
    assert_eq!(h.status_of(&deal.id).await, DealStatus::CreativePending);

    // Observed balance is written back to the wallet row.
    let mut conn = h.pool.get().unwrap();
    let wallet = EscrowWallet::find_by_address(&mut conn, address).unwrap();
    assert_eq!(wallet.last_balance_nano, deal.amount_nano);

    // The channel owner is asked for creative.
    assert!(h
        .gateway
        .messages()
        .iter()
        .any(|(user, text)| user == "owner-1" && text.contains("creative")));
}

#[tokio::test]
async fn overfunding_within_tolerance_counts_as_funded() {
    let h = harness();
    let deal = h.accepted_deal().await;
    let address = deal.escrow_address.as_deref().unwrap();

    // A hair over the agreed amount: sender rounded up.
    h.chain.set_balance(address, deal.amount_nano + 1_000_000);
    let status = h.payments.check_payment(&deal).await.unwrap();
    assert!(matches!(status, PaymentStatus::Funded(_)));
    assert_eq!(h.status_of(&deal.id).await, DealStatus::CreativePending);
}

#[tokio::test]
async fn chain_error_does_not_change_state() {
    let h = harness();
    let deal = h.accepted_deal().await;
    let address = deal.escrow_address.as_deref().unwrap();
    h.chain.set_balance(address, deal.amount_nano);
    h.chain.fail_next_balance_queries(1);

    let err = h.payments.check_payment(&deal).await.unwrap_err();
    assert!(matches!(err, EngineError::ChainUnavailable(_)));
    // An RPC failure is unknown, not "unfunded": the deal must not move.
    assert_eq!(h.status_of(&deal.id).await, DealStatus::PendingPayment);

    // Next check succeeds and advances.
    h.payments.check_payment(&deal).await.unwrap();
    assert_eq!(h.status_of(&deal.id).await, DealStatus::CreativePending);
}

#[tokio::test]
async fn repeated_checks_fire_payment_event_once() {
    let h = harness();
    let deal = h.accepted_deal().await;
    let address = deal.escrow_address.as_deref().unwrap();
    h.chain.set_balance(address, deal.amount_nano);

    h.payments.check_payment(&deal).await.unwrap();
    let after_first = h.reload(&deal.id).await;

    // Same stale snapshot again: must be a no-op, not an invalid event.
    let status = h.payments.check_payment(&deal).await.unwrap();
    assert!(matches!(status, PaymentStatus::Funded(_)));
    let after_second = h.reload(&deal.id).await;
    assert_eq!(after_first.status().unwrap(), after_second.status().unwrap());
    assert_eq!(after_first.version, after_second.version);
}

#[tokio::test]
async fn sweep_cancels_deal_past_payment_timeout() {
    let h = harness();
    let deal = h.accepted_deal().await;

    // Accepted two hours ago against a one-hour window, still unfunded.
    h.backdate_accepted(&deal.id, 2 * 3600);
    h.payments.sweep_once().await.unwrap();

    let cancelled = h.reload(&deal.id).await;
    assert_eq!(cancelled.status().unwrap(), DealStatus::Cancelled);
    assert!(cancelled.archived);
    // No funds ever arrived, so nothing is transferred.
    assert!(h.chain.transfers().is_empty());
}

#[tokio::test]
async fn sweep_measures_timeout_from_acceptance_not_creation() {
    let h = harness();
    let deal = h.accepted_deal().await;

    // The request sat unaccepted for two days; the owner accepted it just
    // now, so the one-hour funding window has barely started.
    {
        use adbroker::schema::deals;
        use diesel::prelude::*;
        let mut conn = h.pool.get().unwrap();
        let then = chrono::Utc::now().naive_utc() - chrono::Duration::days(2);
        diesel::update(deals::table.filter(deals::id.eq(&deal.id)))
            .set(deals::created_at.eq(then))
            .execute(&mut conn)
            .unwrap();
    }

    h.payments.sweep_once().await.unwrap();
    assert_eq!(h.status_of(&deal.id).await, DealStatus::PendingPayment);
}

#[tokio::test]
async fn sweep_spares_funded_deal_past_timeout() {
    let h = harness();
    let deal = h.accepted_deal().await;
    let address = deal.escrow_address.as_deref().unwrap();

    h.backdate_accepted(&deal.id, 2 * 3600);
    // Payment landed at the last minute, before the sweep ran.
    h.chain.set_balance(address, deal.amount_nano);
    h.payments.sweep_once().await.unwrap();

    assert_eq!(h.status_of(&deal.id).await, DealStatus::CreativePending);
}
