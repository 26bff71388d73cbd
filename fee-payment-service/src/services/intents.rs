//! Payment intent creation and lookup.

use super::error::PaymentError;
use super::gateway::{to_minor_units, InitiateRequest, PaymentGateway};
use super::ids;
use super::metrics::INTENTS_CREATED_TOTAL;
use super::store::PaymentStore;
use crate::config::PaymentPolicyConfig;
use crate::models::{FeeStatus, PaymentIntent, PaymentMethod, PaymentStatus};
use chrono::Utc;
use rust_decimal::{Decimal, RoundingStrategy};
use std::sync::Arc;
use tracing::instrument;
use uuid::Uuid;

/// A persisted PENDING intent and the hosted page the payer must visit.
#[derive(Debug, Clone)]
pub struct CreatedIntent {
    pub intent: PaymentIntent,
    pub redirect_url: String,
}

#[derive(Clone)]
pub struct IntentTracker {
    store: Arc<dyn PaymentStore>,
    gateway: Arc<dyn PaymentGateway>,
    policy: PaymentPolicyConfig,
}

/// Surcharge on `amount`, rounded half away from zero to paise.
pub fn platform_fee(amount: Decimal, percent: Decimal) -> Decimal {
    (amount * percent / Decimal::ONE_HUNDRED)
        .round_dp_with_strategy(2, RoundingStrategy::MidpointAwayFromZero)
}

impl IntentTracker {
    pub fn new(
        store: Arc<dyn PaymentStore>,
        gateway: Arc<dyn PaymentGateway>,
        policy: PaymentPolicyConfig,
    ) -> Self {
        Self {
            store,
            gateway,
            policy,
        }
    }

    fn callback_url(&self, transaction_id: &str) -> String {
        format!(
            "{}/callbacks/phonepe/{}",
            self.policy.public_url.trim_end_matches('/'),
            transaction_id
        )
    }

    /// Start a payment for everything currently due on the fee.
    ///
    /// The intent is stored only once the gateway has accepted the request,
    /// so an unreachable gateway leaves nothing behind.
    #[instrument(skip(self))]
    pub async fn create_intent(
        &self,
        fee_id: Uuid,
        payer_id: &str,
    ) -> Result<CreatedIntent, PaymentError> {
        let fee = self
            .store
            .find_fee(fee_id)
            .await?
            .ok_or(PaymentError::FeeNotFound(fee_id))?;

        if fee.status == FeeStatus::Paid {
            return Err(PaymentError::AlreadyPaid(fee_id));
        }

        let pending = fee.outstanding();
        if pending <= Decimal::ZERO {
            return Err(PaymentError::NothingDue(fee_id));
        }

        let now = Utc::now();
        let intent = PaymentIntent {
            intent_id: Uuid::new_v4(),
            fee_id,
            amount: pending,
            platform_fee: platform_fee(pending, self.policy.platform_fee_percent),
            payment_method: PaymentMethod::Upi,
            status: PaymentStatus::Pending,
            transaction_id: ids::transaction_id(now),
            receipt_number: ids::receipt_number(),
            payment_date: None,
            payer_id: payer_id.to_string(),
            recorded_by: None,
            note: None,
            failure_reason: None,
            created_at: now,
            updated_at: now,
        };

        let gross = intent.gross_amount();
        let amount_in_minor_units = to_minor_units(gross)
            .ok_or_else(|| PaymentError::InvalidAmount(format!("{} is out of range", gross)))?;
        let callback_url = self.callback_url(&intent.transaction_id);

        let response = self
            .gateway
            .initiate(InitiateRequest {
                merchant_transaction_id: intent.transaction_id.clone(),
                amount_in_minor_units,
                redirect_url: callback_url.clone(),
                callback_url,
            })
            .await
            .map_err(|e| {
                INTENTS_CREATED_TOTAL
                    .with_label_values(&["provider_error"])
                    .inc();
                tracing::warn!(error = %e, "Gateway refused payment initiation");
                PaymentError::ProviderUnavailable(e)
            })?;

        self.store.create_payment_intent(&intent).await?;
        INTENTS_CREATED_TOTAL.with_label_values(&["ok"]).inc();

        tracing::info!(
            transaction_id = %intent.transaction_id,
            amount = %intent.amount,
            platform_fee = %intent.platform_fee,
            "Payment intent created"
        );

        Ok(CreatedIntent {
            intent,
            redirect_url: response.redirect_url,
        })
    }

    /// Lookup scoped to the payer who created the intent.
    pub async fn get_intent(
        &self,
        transaction_id: &str,
        payer_id: &str,
    ) -> Result<Option<PaymentIntent>, PaymentError> {
        Ok(self
            .store
            .find_payment_intent_for_payer(transaction_id, payer_id)
            .await?)
    }
}
