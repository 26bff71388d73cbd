//! Payment reconciliation engine.
//!
//! Moves a payment intent out of PENDING once the gateway has given a
//! definitive answer and, on success, recomputes the fee ledger in the same
//! transaction. Every transition is a compare-and-set on the intent's status,
//! and the success path re-reads the intent under the fee lock, so concurrent
//! verifications of one transaction credit the fee exactly once.

use super::error::PaymentError;
use super::gateway::{GatewayState, GatewayStatus, PaymentGateway};
use super::ids;
use super::ledger::FeeLedger;
use super::metrics::{INTENTS_EXPIRED_TOTAL, OFFLINE_PAYMENTS_TOTAL, VERIFICATIONS_TOTAL};
use super::notifications::{
    dispatch_in_background, NotificationDispatcher, PaymentEvent, PaymentNotification,
};
use super::store::{PaymentStore, PendingCursor};
use crate::config::PaymentPolicyConfig;
use crate::models::{
    FeeBalances, FeeStatus, PaymentIntent, PaymentMethod, PaymentStatus, StatusTransition,
};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::Serialize;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::instrument;
use uuid::Uuid;

/// Reason stored on intents failed by the expiry sweep.
pub const EXPIRED_REASON: &str = "expired";

/// Page size used when walking stale intents.
pub const EXPIRY_BATCH_SIZE: i64 = 100;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum VerificationOutcome {
    Completed,
    Failed,
    /// The gateway has no definitive answer yet. Nothing was changed.
    Pending,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct VerificationResult {
    pub transaction_id: String,
    pub outcome: VerificationOutcome,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    /// Fee balances after the payment, present for completed payments.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub balances: Option<FeeBalances>,
}

impl VerificationResult {
    fn new(transaction_id: &str, outcome: VerificationOutcome) -> Self {
        Self {
            transaction_id: transaction_id.to_string(),
            outcome,
            message: None,
            balances: None,
        }
    }

    fn with_message(mut self, message: Option<String>) -> Self {
        self.message = message;
        self
    }

    fn with_balances(mut self, balances: Option<FeeBalances>) -> Self {
        self.balances = balances;
        self
    }
}

/// A payment taken at the counter.
#[derive(Debug, Clone)]
pub struct OfflinePayment {
    pub fee_id: Uuid,
    pub amount: Decimal,
    pub method: PaymentMethod,
    /// Cheque number, bank reference and so on. Generated when absent.
    pub reference: Option<String>,
    pub payer_id: String,
    pub recorded_by: String,
    pub note: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct RecordedPayment {
    pub intent: PaymentIntent,
    pub balances: FeeBalances,
}

/// What one expiry run did.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ExpiryReport {
    pub examined: usize,
    /// Late confirmations found while checking with the gateway.
    pub completed: usize,
    pub failed: usize,
    pub expired: usize,
    /// Left PENDING because the gateway or store could not be reached.
    pub skipped: usize,
}

#[derive(Clone)]
pub struct ReconciliationEngine {
    store: Arc<dyn PaymentStore>,
    gateway: Arc<dyn PaymentGateway>,
    notifier: Arc<dyn NotificationDispatcher>,
    policy: PaymentPolicyConfig,
}

impl ReconciliationEngine {
    pub fn new(
        store: Arc<dyn PaymentStore>,
        gateway: Arc<dyn PaymentGateway>,
        notifier: Arc<dyn NotificationDispatcher>,
        policy: PaymentPolicyConfig,
    ) -> Self {
        Self {
            store,
            gateway,
            notifier,
            policy,
        }
    }

    /// Confirm a payment's outcome with the gateway and apply it.
    ///
    /// Safe to call any number of times: terminal intents are answered from
    /// the store without contacting the gateway.
    #[instrument(skip(self))]
    pub async fn verify(&self, transaction_id: &str) -> Result<VerificationResult, PaymentError> {
        let intent = self
            .store
            .find_payment_intent(transaction_id)
            .await?
            .ok_or_else(|| PaymentError::IntentNotFound(transaction_id.to_string()))?;

        if intent.status.is_terminal() {
            let label = match intent.status {
                PaymentStatus::Completed => "already_completed",
                _ => "already_failed",
            };
            VERIFICATIONS_TOTAL.with_label_values(&[label]).inc();
            return self.terminal_result(&intent).await;
        }

        let status = self
            .gateway
            .query_status(transaction_id)
            .await
            .map_err(|e| {
                VERIFICATIONS_TOTAL
                    .with_label_values(&["provider_error"])
                    .inc();
                tracing::warn!(error = %e, "Gateway status query failed, intent left pending");
                PaymentError::Provider(e)
            })?;

        self.apply_gateway_status(&intent, status).await
    }

    async fn apply_gateway_status(
        &self,
        intent: &PaymentIntent,
        status: GatewayStatus,
    ) -> Result<VerificationResult, PaymentError> {
        match status.state {
            GatewayState::Completed => {
                let method = PaymentMethod::from_instrument(status.instrument_type.as_deref());
                self.complete(intent, method).await
            }
            GatewayState::Failed => {
                let reason = status
                    .message
                    .unwrap_or_else(|| "declined by gateway".to_string());
                self.fail(intent, reason).await
            }
            GatewayState::Pending(state) => {
                VERIFICATIONS_TOTAL.with_label_values(&["pending"]).inc();
                tracing::info!(
                    transaction_id = %intent.transaction_id,
                    gateway_state = %state,
                    "Payment still processing"
                );
                Ok(
                    VerificationResult::new(&intent.transaction_id, VerificationOutcome::Pending)
                        .with_message(status.message.or(Some(state))),
                )
            }
        }
    }

    /// PENDING -> COMPLETED plus ledger recompute, all or nothing.
    async fn complete(
        &self,
        intent: &PaymentIntent,
        method: PaymentMethod,
    ) -> Result<VerificationResult, PaymentError> {
        let mut tx = self.store.begin().await?;

        tx.lock_fee(intent.fee_id)
            .await?
            .ok_or(PaymentError::FeeNotFound(intent.fee_id))?;

        let current = tx
            .find_payment_intent_by_id(intent.intent_id)
            .await?
            .ok_or_else(|| PaymentError::IntentNotFound(intent.transaction_id.clone()))?;

        let paid_at = Utc::now();
        let transition = StatusTransition::completed(method, paid_at);

        let applied = current.status == PaymentStatus::Pending
            && tx
                .update_payment_intent_status(
                    intent.intent_id,
                    &transition,
                    PaymentStatus::Pending,
                )
                .await?;

        if !applied {
            // Another verifier (or the expiry sweep) got there first.
            tx.rollback().await?;
            tracing::info!(
                transaction_id = %intent.transaction_id,
                status = %current.status,
                "Intent already resolved concurrently"
            );
            let label = match current.status {
                PaymentStatus::Failed => "already_failed",
                _ => "already_completed",
            };
            VERIFICATIONS_TOTAL.with_label_values(&[label]).inc();
            return self.terminal_result(&current).await;
        }

        let balances = FeeLedger::recompute_balances(tx.as_mut(), intent.fee_id).await?;
        tx.commit().await?;

        VERIFICATIONS_TOTAL.with_label_values(&["completed"]).inc();
        tracing::info!(
            transaction_id = %intent.transaction_id,
            fee_id = %intent.fee_id,
            amount = %intent.amount,
            payment_method = %method,
            fee_status = %balances.status,
            "Payment completed"
        );

        let mut completed = current;
        completed.apply(&transition, paid_at);
        self.notify(PaymentEvent::PaymentCompleted, &completed);

        Ok(
            VerificationResult::new(&intent.transaction_id, VerificationOutcome::Completed)
                .with_balances(Some(balances)),
        )
    }

    /// PENDING -> FAILED. The ledger is never touched.
    async fn fail(
        &self,
        intent: &PaymentIntent,
        reason: String,
    ) -> Result<VerificationResult, PaymentError> {
        let transition = StatusTransition::failed(reason.clone());
        let applied = self
            .store
            .update_payment_intent_status(intent.intent_id, &transition, PaymentStatus::Pending)
            .await?;

        if !applied {
            return self.current_result(&intent.transaction_id).await;
        }

        VERIFICATIONS_TOTAL.with_label_values(&["failed"]).inc();
        tracing::info!(
            transaction_id = %intent.transaction_id,
            reason = %reason,
            "Payment failed"
        );

        let mut failed = intent.clone();
        failed.apply(&transition, Utc::now());
        self.notify(PaymentEvent::PaymentFailed, &failed);

        Ok(
            VerificationResult::new(&intent.transaction_id, VerificationOutcome::Failed)
                .with_message(Some(reason)),
        )
    }

    async fn current_result(&self, transaction_id: &str) -> Result<VerificationResult, PaymentError> {
        let intent = self
            .store
            .find_payment_intent(transaction_id)
            .await?
            .ok_or_else(|| PaymentError::IntentNotFound(transaction_id.to_string()))?;
        self.terminal_result(&intent).await
    }

    async fn terminal_result(
        &self,
        intent: &PaymentIntent,
    ) -> Result<VerificationResult, PaymentError> {
        let result = match intent.status {
            PaymentStatus::Completed => {
                let balances = self
                    .store
                    .find_fee(intent.fee_id)
                    .await?
                    .map(|fee| fee.balances());
                VerificationResult::new(&intent.transaction_id, VerificationOutcome::Completed)
                    .with_balances(balances)
            }
            PaymentStatus::Failed => {
                VerificationResult::new(&intent.transaction_id, VerificationOutcome::Failed)
                    .with_message(intent.failure_reason.clone())
            }
            PaymentStatus::Pending => {
                VerificationResult::new(&intent.transaction_id, VerificationOutcome::Pending)
            }
        };
        Ok(result)
    }

    /// Record a payment collected outside the gateway as COMPLETED and
    /// credit it to the fee in one transaction.
    #[instrument(skip(self, payment), fields(fee_id = %payment.fee_id, method = %payment.method))]
    pub async fn record_offline_payment(
        &self,
        payment: OfflinePayment,
    ) -> Result<RecordedPayment, PaymentError> {
        if payment.amount <= Decimal::ZERO {
            return Err(PaymentError::InvalidAmount(
                "amount must be greater than zero".to_string(),
            ));
        }
        if payment.amount.normalize().scale() > 2 {
            return Err(PaymentError::InvalidAmount(
                "amount cannot have more than two decimal places".to_string(),
            ));
        }

        let mut tx = self.store.begin().await?;

        let fee = tx
            .lock_fee(payment.fee_id)
            .await?
            .ok_or(PaymentError::FeeNotFound(payment.fee_id))?;

        if fee.status == FeeStatus::Paid {
            return Err(PaymentError::AlreadyPaid(fee.fee_id));
        }
        let pending = fee.outstanding();
        if pending <= Decimal::ZERO {
            return Err(PaymentError::NothingDue(fee.fee_id));
        }
        if payment.amount > pending {
            return Err(PaymentError::AmountExceedsBalance {
                amount: payment.amount,
                pending,
            });
        }

        let now = Utc::now();
        let intent = PaymentIntent {
            intent_id: Uuid::new_v4(),
            fee_id: fee.fee_id,
            amount: payment.amount,
            platform_fee: Decimal::ZERO,
            payment_method: payment.method,
            status: PaymentStatus::Completed,
            transaction_id: payment
                .reference
                .as_deref()
                .map(str::trim)
                .filter(|r| !r.is_empty())
                .map(str::to_string)
                .unwrap_or_else(|| ids::transaction_id(now)),
            receipt_number: ids::receipt_number(),
            payment_date: Some(now),
            payer_id: payment.payer_id,
            recorded_by: Some(payment.recorded_by),
            note: payment.note,
            failure_reason: None,
            created_at: now,
            updated_at: now,
        };

        tx.create_payment_intent(&intent).await?;
        let balances = FeeLedger::recompute_balances(tx.as_mut(), fee.fee_id).await?;
        tx.commit().await?;

        OFFLINE_PAYMENTS_TOTAL
            .with_label_values(&[intent.payment_method.as_str()])
            .inc();
        tracing::info!(
            transaction_id = %intent.transaction_id,
            receipt_number = %intent.receipt_number,
            amount = %intent.amount,
            fee_status = %balances.status,
            "Offline payment recorded"
        );

        self.notify(PaymentEvent::OfflinePaymentRecorded, &intent);

        Ok(RecordedPayment { intent, balances })
    }

    /// Resolve PENDING intents older than the configured expiry.
    ///
    /// Each one is checked with the gateway first so a late success is still
    /// credited. Intents the gateway cannot answer for are left for the next run.
    /// A run walks every stale intent in `(created_at, intent_id)` order, so
    /// skipped intents never hide newer ones.
    #[instrument(skip(self))]
    pub async fn expire_stale(&self, now: DateTime<Utc>) -> Result<ExpiryReport, PaymentError> {
        let expiry = chrono::Duration::from_std(self.policy.pending_expiry)
            .unwrap_or_else(|_| chrono::Duration::hours(24));
        let cutoff = now - expiry;

        let mut report = ExpiryReport::default();
        let mut cursor = None;

        loop {
            let page = self
                .store
                .list_pending_intents(cutoff, cursor, EXPIRY_BATCH_SIZE)
                .await?;
            let Some(last) = page.last() else {
                break;
            };
            cursor = Some(PendingCursor::of(last));
            let full_page = page.len() as i64 == EXPIRY_BATCH_SIZE;

            report.examined += page.len();
            for intent in &page {
                let label = self.expire_one(intent, &mut report).await;
                INTENTS_EXPIRED_TOTAL.with_label_values(&[label]).inc();
            }

            if !full_page {
                break;
            }
        }

        if report.examined > 0 {
            tracing::info!(
                examined = report.examined,
                completed = report.completed,
                failed = report.failed,
                expired = report.expired,
                skipped = report.skipped,
                "Expiry sweep finished"
            );
        }
        Ok(report)
    }

    async fn expire_one(&self, intent: &PaymentIntent, report: &mut ExpiryReport) -> &'static str {
        let status = match self.gateway.query_status(&intent.transaction_id).await {
            Ok(status) => status,
            Err(e) => {
                tracing::warn!(
                    transaction_id = %intent.transaction_id,
                    error = %e,
                    "Skipping expiry, gateway unavailable"
                );
                report.skipped += 1;
                return "skipped";
            }
        };

        let outcome = match status.state {
            GatewayState::Pending(_) => self
                .fail(intent, EXPIRED_REASON.to_string())
                .await
                .map(|result| (result, true)),
            _ => self
                .apply_gateway_status(intent, status)
                .await
                .map(|result| (result, false)),
        };

        match outcome {
            Ok((result, expired)) => match result.outcome {
                VerificationOutcome::Completed => {
                    report.completed += 1;
                    "completed"
                }
                VerificationOutcome::Failed if expired => {
                    report.expired += 1;
                    "expired"
                }
                VerificationOutcome::Failed => {
                    report.failed += 1;
                    "failed"
                }
                VerificationOutcome::Pending => {
                    report.skipped += 1;
                    "skipped"
                }
            },
            Err(e) => {
                tracing::error!(
                    transaction_id = %intent.transaction_id,
                    error = %e,
                    "Failed to resolve stale intent"
                );
                report.skipped += 1;
                "skipped"
            }
        }
    }

    /// Run `expire_stale` on the configured interval. `None` when disabled.
    pub fn spawn_expiry_sweep(self: Arc<Self>) -> Option<JoinHandle<()>> {
        let period = self.policy.sweep_interval;
        if period.is_zero() {
            return None;
        }

        tracing::info!(interval_secs = period.as_secs(), "Starting expiry sweep");
        Some(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                if let Err(e) = self.expire_stale(Utc::now()).await {
                    tracing::error!(error = %e, "Expiry sweep failed");
                }
            }
        }))
    }

    fn notify(&self, event: PaymentEvent, intent: &PaymentIntent) {
        dispatch_in_background(
            self.notifier.clone(),
            PaymentNotification::for_intent(event, intent),
        );
    }
}
