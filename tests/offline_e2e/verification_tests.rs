//! Post-survival verification: evidence rows, window evaluation, and the
//! gateway-unknown rule.

use adbroker::error::EngineError;
use adbroker::models::deal::DealStatus;
use adbroker::models::verification::VerificationCheck;
use adbroker::services::post_monitor::VerifyOutcome;

use crate::mock_infrastructure::harness;

#[tokio::test]
async fn passing_check_reschedules_inside_window() {
    let h = harness();
    let deal = h.posted_deal().await;

    let outcome = h.verifier.run_check(&deal.id).await.unwrap();
    let VerifyOutcome::Reschedule(next) = outcome else {
        panic!("expected reschedule, got {outcome:?}");
    };
    assert!(next > chrono::Utc::now().naive_utc());
    assert!(next <= deal.verification_window_end().unwrap());

    // One passing evidence row was appended.
    let mut conn = h.pool.get().unwrap();
    let checks = VerificationCheck::for_deal(&mut conn, &deal.id).unwrap();
    assert_eq!(checks.len(), 1);
    assert!(checks[0].is_pass());
    drop(conn);
    assert_eq!(h.status_of(&deal.id).await, DealStatus::Posted);
}

#[tokio::test]
async fn deleted_post_disputes_immediately() {
    let h = harness();
    let deal = h.posted_deal().await;
    h.gateway
        .delete_post(&deal.channel_id, deal.post_ref.as_deref().unwrap());

    let outcome = h.verifier.run_check(&deal.id).await.unwrap();
    assert_eq!(outcome, VerifyOutcome::Disputed);

    let disputed = h.reload(&deal.id).await;
    assert_eq!(disputed.status().unwrap(), DealStatus::Disputed);
    assert!(disputed.dispute_reason.unwrap().contains("deleted"));

    let mut conn = h.pool.get().unwrap();
    let checks = VerificationCheck::for_deal(&mut conn, &deal.id).unwrap();
    assert_eq!(checks.len(), 1);
    assert!(!checks[0].post_exists);
}

#[tokio::test]
async fn edited_post_disputes_immediately() {
    let h = harness();
    let deal = h.posted_deal().await;
    h.gateway.edit_post(
        &deal.channel_id,
        deal.post_ref.as_deref().unwrap(),
        "Try the wallet today -- now with my referral link",
    );

    let outcome = h.verifier.run_check(&deal.id).await.unwrap();
    assert_eq!(outcome, VerifyOutcome::Disputed);

    let disputed = h.reload(&deal.id).await;
    assert_eq!(disputed.status().unwrap(), DealStatus::Disputed);
    assert!(disputed.dispute_reason.unwrap().contains("modified"));

    let mut conn = h.pool.get().unwrap();
    let checks = VerificationCheck::for_deal(&mut conn, &deal.id).unwrap();
    assert!(checks[0].post_exists);
    assert!(!checks[0].post_unmodified);
}

#[tokio::test]
async fn gateway_outage_records_nothing_and_changes_nothing() {
    let h = harness();
    let deal = h.posted_deal().await;
    h.gateway.set_unavailable(true);

    let err = h.verifier.run_check(&deal.id).await.unwrap_err();
    assert!(matches!(err, EngineError::GatewayUnavailable(_)));

    // No verdict from an unknown: no row, no transition.
    let mut conn = h.pool.get().unwrap();
    let checks = VerificationCheck::for_deal(&mut conn, &deal.id).unwrap();
    assert!(checks.is_empty());
    drop(conn);
    assert_eq!(h.status_of(&deal.id).await, DealStatus::Posted);
}

#[tokio::test]
async fn surviving_window_completes_and_releases() {
    let h = harness();
    let deal = h.posted_deal().await;
    let address = deal.escrow_address.clone().unwrap();

    // A passing check mid-window, then the window closes.
    h.verifier.run_check(&deal.id).await.unwrap();
    h.backdate_posted(&deal.id, deal.post_duration_hours as i64 + 1);

    let outcome = h.verifier.run_check(&deal.id).await.unwrap();
    assert_eq!(outcome, VerifyOutcome::Completed);

    let completed = h.reload(&deal.id).await;
    assert_eq!(completed.status().unwrap(), DealStatus::Completed);
    assert!(completed.archived);

    // Escrow released to the channel owner.
    let transfers = h.chain.transfers();
    assert_eq!(transfers.len(), 1);
    assert_eq!(transfers[0].destination, completed.owner_payout_address);

    let mut conn = h.pool.get().unwrap();
    let wallet = adbroker::models::wallet::EscrowWallet::find_by_address(&mut conn, &address).unwrap();
    assert!(wallet.is_drained());
}

#[tokio::test]
async fn post_removed_after_window_still_completes() {
    let h = harness();
    let deal = h.posted_deal().await;

    // Clean in-window record, then the owner takes the post down as soon
    // as the agreed duration is over.
    h.verifier.run_check(&deal.id).await.unwrap();
    h.backdate_posted(&deal.id, deal.post_duration_hours as i64 + 1);
    h.gateway
        .delete_post(&deal.channel_id, deal.post_ref.as_deref().unwrap());

    let outcome = h.verifier.run_check(&deal.id).await.unwrap();
    assert_eq!(outcome, VerifyOutcome::Completed);
    assert_eq!(h.status_of(&deal.id).await, DealStatus::Completed);

    // No evidence row from outside the window.
    let mut conn = h.pool.get().unwrap();
    let checks = VerificationCheck::for_deal(&mut conn, &deal.id).unwrap();
    assert_eq!(checks.len(), 1);
}

#[tokio::test]
async fn window_without_evidence_disputes_instead_of_releasing() {
    let h = harness();
    let deal = h.posted_deal().await;

    // The gateway was down for the whole window; zero checks on record.
    h.backdate_posted(&deal.id, deal.post_duration_hours as i64 + 1);
    h.gateway.set_unavailable(true);

    let outcome = h.verifier.run_check(&deal.id).await.unwrap();
    assert_eq!(outcome, VerifyOutcome::Disputed);

    let disputed = h.reload(&deal.id).await;
    assert_eq!(disputed.status().unwrap(), DealStatus::Disputed);
    assert!(disputed
        .dispute_reason
        .unwrap()
        .contains("no verification evidence"));
    // Funds stay in escrow for the admin to resolve.
    assert!(h.chain.transfers().is_empty());
}

#[tokio::test]
async fn check_on_non_posted_deal_is_skipped() {
    let h = harness();
    let deal = h.funded_deal().await;

    let outcome = h.verifier.run_check(&deal.id).await.unwrap();
    assert_eq!(outcome, VerifyOutcome::Skipped);
    assert_eq!(h.status_of(&deal.id).await, DealStatus::CreativePending);
}
