mod common;

use common::{assert_ledger_consistent, TestApp};
use chrono::Utc;
use fee_payment_service::models::{FeeStatus, PaymentMethod, PaymentStatus};
use fee_payment_service::services::gateway::{GatewayError, GatewayStatus};
use fee_payment_service::services::notifications::PaymentEvent;
use fee_payment_service::services::{PaymentError, VerificationOutcome};
use rust_decimal_macros::dec;
use std::sync::Arc;

#[tokio::test]
async fn happy_path_marks_fee_paid() {
    let app = TestApp::spawn();
    let fee = app.seed_fee(dec!(1000)).await;

    let created = app
        .state
        .intents
        .create_intent(fee.fee_id, common::PAYER_ID)
        .await
        .unwrap();
    assert_eq!(created.intent.amount, dec!(1000));
    assert_eq!(created.intent.platform_fee, dec!(20));
    assert_eq!(created.intent.status, PaymentStatus::Pending);

    let txn = created.intent.transaction_id;
    app.gateway_reports_completed(&txn, "CARD");

    let result = app.state.engine.verify(&txn).await.unwrap();
    assert_eq!(result.outcome, VerificationOutcome::Completed);
    let balances = result.balances.unwrap();
    assert_eq!(balances.paid_amount, dec!(1000));
    assert_eq!(balances.status, FeeStatus::Paid);

    let intent = app.intent(&txn).await;
    assert_eq!(intent.status, PaymentStatus::Completed);
    assert_eq!(intent.payment_method, PaymentMethod::Card);
    assert!(intent.payment_date.is_some());

    let fee = app.fee(fee.fee_id).await;
    assert_eq!(fee.paid_amount, dec!(1000));
    assert_eq!(fee.pending_amount, dec!(0));
    assert_eq!(fee.status, FeeStatus::Paid);
}

#[tokio::test]
async fn partial_then_full_payment() {
    let app = TestApp::spawn();
    let fee = app.seed_fee(dec!(1000)).await;

    let first = app
        .insert_pending_intent(fee.fee_id, dec!(600), Utc::now())
        .await;
    app.gateway_reports_completed(&first.transaction_id, "UPI");
    app.state.engine.verify(&first.transaction_id).await.unwrap();

    let fee_after_first = app.fee(fee.fee_id).await;
    assert_eq!(fee_after_first.paid_amount, dec!(600));
    assert_eq!(fee_after_first.pending_amount, dec!(400));
    assert_eq!(fee_after_first.status, FeeStatus::Unpaid);

    let second = app
        .state
        .intents
        .create_intent(fee.fee_id, common::PAYER_ID)
        .await
        .unwrap();
    assert_eq!(second.intent.amount, dec!(400));

    app.gateway_reports_completed(&second.intent.transaction_id, "UPI");
    app.state
        .engine
        .verify(&second.intent.transaction_id)
        .await
        .unwrap();

    let fee = app.fee(fee.fee_id).await;
    assert_eq!(fee.paid_amount, dec!(1000));
    assert_eq!(fee.pending_amount, dec!(0));
    assert_eq!(fee.status, FeeStatus::Paid);
    assert_ledger_consistent(&app, fee.fee_id).await;
}

#[tokio::test]
async fn failure_then_retry_with_new_intent() {
    let app = TestApp::spawn();
    let fee = app.seed_fee(dec!(1000)).await;

    let first = app.initiate(fee.fee_id).await;
    app.gateway_reports_failed(&first);

    let result = app.state.engine.verify(&first).await.unwrap();
    assert_eq!(result.outcome, VerificationOutcome::Failed);
    assert_eq!(result.message.as_deref(), Some("Payment declined"));
    assert_eq!(app.intent(&first).await.status, PaymentStatus::Failed);

    let untouched = app.fee(fee.fee_id).await;
    assert_eq!(untouched.paid_amount, dec!(0));
    assert_eq!(untouched.status, FeeStatus::Unpaid);

    let second = app.initiate(fee.fee_id).await;
    assert_ne!(first, second);
    app.gateway_reports_completed(&second, "UPI");
    app.state.engine.verify(&second).await.unwrap();

    assert_eq!(app.fee(fee.fee_id).await.status, FeeStatus::Paid);
    assert_eq!(app.intent(&first).await.status, PaymentStatus::Failed);
    assert_ledger_consistent(&app, fee.fee_id).await;
}

#[tokio::test]
async fn ambiguous_state_changes_nothing_until_confirmed() {
    let app = TestApp::spawn();
    let fee = app.seed_fee(dec!(1000)).await;
    let txn = app.initiate(fee.fee_id).await;

    app.gateway
        .set_status(&txn, GatewayStatus::pending("PAYMENT_PENDING"));
    let result = app.state.engine.verify(&txn).await.unwrap();
    assert_eq!(result.outcome, VerificationOutcome::Pending);
    assert_eq!(app.intent(&txn).await.status, PaymentStatus::Pending);
    assert_eq!(app.fee(fee.fee_id).await.paid_amount, dec!(0));

    app.gateway_reports_completed(&txn, "UPI");
    let result = app.state.engine.verify(&txn).await.unwrap();
    assert_eq!(result.outcome, VerificationOutcome::Completed);
    assert_eq!(app.fee(fee.fee_id).await.status, FeeStatus::Paid);
}

#[tokio::test]
async fn repeated_verification_credits_once() {
    let app = TestApp::spawn();
    let fee = app.seed_fee(dec!(1000)).await;
    let txn = app.initiate(fee.fee_id).await;
    app.gateway_reports_completed(&txn, "UPI");

    for _ in 0..5 {
        let result = app.state.engine.verify(&txn).await.unwrap();
        assert_eq!(result.outcome, VerificationOutcome::Completed);
    }

    assert_eq!(app.fee(fee.fee_id).await.paid_amount, dec!(1000));
    // Only the first call reaches the gateway.
    assert_eq!(app.gateway.status_calls(), 1);
    assert_ledger_consistent(&app, fee.fee_id).await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_verifications_credit_exactly_once() {
    let app = TestApp::spawn();
    let fee = app.seed_fee(dec!(1000)).await;
    let txn = app.initiate(fee.fee_id).await;
    app.gateway_reports_completed(&txn, "UPI");

    let engine = app.state.engine.clone();
    let handles: Vec<_> = (0..8)
        .map(|_| {
            let engine = Arc::clone(&engine);
            let txn = txn.clone();
            tokio::spawn(async move { engine.verify(&txn).await })
        })
        .collect();

    for result in futures::future::join_all(handles).await {
        let result = result.unwrap().unwrap();
        assert_eq!(result.outcome, VerificationOutcome::Completed);
    }

    let fee = app.fee(fee.fee_id).await;
    assert_eq!(fee.paid_amount, dec!(1000));
    assert_eq!(fee.status, FeeStatus::Paid);
    assert_ledger_consistent(&app, fee.fee_id).await;

    let completions = app
        .notifier
        .wait_for(1)
        .await
        .into_iter()
        .filter(|n| n.event == PaymentEvent::PaymentCompleted)
        .count();
    assert_eq!(completions, 1);
}

#[tokio::test]
async fn terminal_intents_are_not_reopened() {
    let app = TestApp::spawn();
    let fee = app.seed_fee(dec!(1000)).await;
    let txn = app.initiate(fee.fee_id).await;

    app.gateway_reports_failed(&txn);
    app.state.engine.verify(&txn).await.unwrap();

    // A later success report must not resurrect a failed intent.
    app.gateway_reports_completed(&txn, "UPI");
    let result = app.state.engine.verify(&txn).await.unwrap();
    assert_eq!(result.outcome, VerificationOutcome::Failed);
    assert_eq!(app.intent(&txn).await.status, PaymentStatus::Failed);
    assert_eq!(app.fee(fee.fee_id).await.paid_amount, dec!(0));
    assert_eq!(app.gateway.status_calls(), 1);
}

#[tokio::test]
async fn store_failure_rolls_back_the_whole_transition() {
    let app = TestApp::spawn();
    let fee = app.seed_fee(dec!(1000)).await;
    let txn = app.initiate(fee.fee_id).await;
    app.gateway_reports_completed(&txn, "UPI");

    app.store.fail_fee_updates(true);
    let err = app.state.engine.verify(&txn).await.unwrap_err();
    assert!(matches!(err, PaymentError::Store(_)));
    assert!(!err.is_retryable());

    assert_eq!(app.intent(&txn).await.status, PaymentStatus::Pending);
    assert_eq!(app.fee(fee.fee_id).await.paid_amount, dec!(0));

    app.store.fail_fee_updates(false);
    let result = app.state.engine.verify(&txn).await.unwrap();
    assert_eq!(result.outcome, VerificationOutcome::Completed);
    assert_ledger_consistent(&app, fee.fee_id).await;
}

#[tokio::test]
async fn gateway_outage_is_retryable_and_leaves_intent_pending() {
    let app = TestApp::spawn();
    let fee = app.seed_fee(dec!(1000)).await;
    let txn = app.initiate(fee.fee_id).await;

    app.gateway.set_status_error(
        &txn,
        GatewayError::Unavailable("request timed out".to_string()),
    );
    let err = app.state.engine.verify(&txn).await.unwrap_err();
    assert!(matches!(err, PaymentError::Provider(_)));
    assert!(err.is_retryable());
    assert_eq!(app.intent(&txn).await.status, PaymentStatus::Pending);

    app.gateway_reports_completed(&txn, "UPI");
    let result = app.state.engine.verify(&txn).await.unwrap();
    assert_eq!(result.outcome, VerificationOutcome::Completed);
}

#[tokio::test]
async fn unknown_transaction_is_not_found() {
    let app = TestApp::spawn();
    let err = app.state.engine.verify("TXN_19700101_DEADBEEF").await.unwrap_err();
    assert!(matches!(err, PaymentError::IntentNotFound(_)));
}

#[tokio::test]
async fn notification_failure_does_not_undo_payment() {
    let app = TestApp::spawn();
    let fee = app.seed_fee(dec!(1000)).await;
    let txn = app.initiate(fee.fee_id).await;
    app.gateway_reports_completed(&txn, "UPI");
    app.notifier.fail(true);

    let result = app.state.engine.verify(&txn).await.unwrap();
    assert_eq!(result.outcome, VerificationOutcome::Completed);

    let sent = app.notifier.wait_for(1).await;
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].transaction_id, txn);
    assert_eq!(sent[0].payer_id, common::PAYER_ID);
    assert_eq!(app.fee(fee.fee_id).await.status, FeeStatus::Paid);
}
