#![allow(dead_code)]

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use fee_payment_service::config::PaymentPolicyConfig;
use fee_payment_service::models::{Fee, PaymentIntent, PaymentMethod, PaymentStatus};
use fee_payment_service::services::gateway::GatewayStatus;
use fee_payment_service::services::ids;
use fee_payment_service::services::notifications::NotifyError;
use fee_payment_service::services::{
    InMemoryStore, MockGateway, NotificationDispatcher, PaymentNotification, PaymentStore,
};
use fee_payment_service::AppState;
use rust_decimal::Decimal;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use uuid::Uuid;

pub const PAYER_ID: &str = "parent-1";
pub const CASHIER_ID: &str = "cashier-1";

/// Keeps every notification it is asked to send.
#[derive(Clone, Default)]
pub struct RecordingDispatcher {
    sent: Arc<Mutex<Vec<PaymentNotification>>>,
    fail: Arc<AtomicBool>,
}

impl RecordingDispatcher {
    pub fn fail(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }

    pub fn sent(&self) -> Vec<PaymentNotification> {
        self.sent.lock().unwrap().clone()
    }

    /// Notifications go out on a spawned task; poll until `count` arrived.
    pub async fn wait_for(&self, count: usize) -> Vec<PaymentNotification> {
        for _ in 0..100 {
            let sent = self.sent();
            if sent.len() >= count {
                return sent;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        self.sent()
    }
}

#[async_trait]
impl NotificationDispatcher for RecordingDispatcher {
    async fn send(&self, notification: &PaymentNotification) -> Result<(), NotifyError> {
        self.sent.lock().unwrap().push(notification.clone());
        if self.fail.load(Ordering::SeqCst) {
            return Err(NotifyError::Rejected {
                status: 503,
                body: "notification service down".to_string(),
            });
        }
        Ok(())
    }
}

pub struct TestApp {
    pub store: InMemoryStore,
    pub gateway: MockGateway,
    pub notifier: RecordingDispatcher,
    pub state: AppState,
}

impl TestApp {
    pub fn spawn() -> Self {
        Self::with_policy(PaymentPolicyConfig::default())
    }

    pub fn with_policy(policy: PaymentPolicyConfig) -> Self {
        let store = InMemoryStore::new();
        let gateway = MockGateway::new();
        let notifier = RecordingDispatcher::default();

        let state = AppState::new(
            Arc::new(store.clone()),
            Arc::new(gateway.clone()),
            Arc::new(notifier.clone()),
            policy,
        );

        Self {
            store,
            gateway,
            notifier,
            state,
        }
    }

    pub async fn seed_fee(&self, total_fee: Decimal) -> Fee {
        let fee = Fee::assigned(
            "org-1",
            "student-1",
            "tuition",
            total_fee,
            NaiveDate::from_ymd_opt(2026, 6, 30).unwrap(),
        );
        self.store.insert_fee(fee.clone()).await;
        fee
    }

    pub async fn fee(&self, fee_id: Uuid) -> Fee {
        self.store.find_fee(fee_id).await.unwrap().unwrap()
    }

    /// Create an intent for the fee and return its transaction id.
    pub async fn initiate(&self, fee_id: Uuid) -> String {
        self.state
            .intents
            .create_intent(fee_id, PAYER_ID)
            .await
            .expect("Failed to create intent")
            .intent
            .transaction_id
    }

    /// Store a PENDING intent directly, bypassing the gateway.
    pub async fn insert_pending_intent(
        &self,
        fee_id: Uuid,
        amount: Decimal,
        created_at: DateTime<Utc>,
    ) -> PaymentIntent {
        let intent = PaymentIntent {
            intent_id: Uuid::new_v4(),
            fee_id,
            amount,
            platform_fee: Decimal::ZERO,
            payment_method: PaymentMethod::Upi,
            status: PaymentStatus::Pending,
            transaction_id: ids::transaction_id(created_at),
            receipt_number: ids::receipt_number(),
            payment_date: None,
            payer_id: PAYER_ID.to_string(),
            recorded_by: None,
            note: None,
            failure_reason: None,
            created_at,
            updated_at: created_at,
        };
        self.store.create_payment_intent(&intent).await.unwrap();
        intent
    }

    pub async fn intent(&self, transaction_id: &str) -> PaymentIntent {
        self.store
            .find_payment_intent(transaction_id)
            .await
            .unwrap()
            .unwrap()
    }

    pub fn gateway_reports_completed(&self, transaction_id: &str, instrument: &str) {
        self.gateway
            .set_status(transaction_id, GatewayStatus::completed(Some(instrument)));
    }

    pub fn gateway_reports_failed(&self, transaction_id: &str) {
        self.gateway
            .set_status(transaction_id, GatewayStatus::failed("Payment declined"));
    }
}

/// `paid + pending == total` and `paid` equals the completed intents.
pub async fn assert_ledger_consistent(app: &TestApp, fee_id: Uuid) {
    let fee = app.fee(fee_id).await;
    let completed: Decimal = app
        .store
        .intents_for_fee(fee_id)
        .await
        .iter()
        .filter(|i| i.status == PaymentStatus::Completed)
        .map(|i| i.amount)
        .sum();

    assert_eq!(fee.paid_amount, completed);
    assert_eq!(fee.paid_amount + fee.pending_amount, fee.total_fee);
}
