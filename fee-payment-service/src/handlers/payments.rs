use axum::{
    extract::{Path, State},
    Json,
};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::Serialize;
use service_core::error::AppError;
use uuid::Uuid;

use crate::middleware::PayerContext;
use crate::models::{PaymentIntent, PaymentMethod, PaymentStatus};
use crate::services::{PaymentError, VerificationResult};
use crate::startup::AppState;

#[derive(Debug, Serialize)]
pub struct PaymentResponse {
    pub transaction_id: String,
    pub fee_id: Uuid,
    pub receipt_number: String,
    pub amount: Decimal,
    pub platform_fee: Decimal,
    pub payment_method: PaymentMethod,
    pub status: PaymentStatus,
    pub payment_date: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure_reason: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl From<PaymentIntent> for PaymentResponse {
    fn from(intent: PaymentIntent) -> Self {
        Self {
            transaction_id: intent.transaction_id,
            fee_id: intent.fee_id,
            receipt_number: intent.receipt_number,
            amount: intent.amount,
            platform_fee: intent.platform_fee,
            payment_method: intent.payment_method,
            status: intent.status,
            payment_date: intent.payment_date,
            failure_reason: intent.failure_reason,
            created_at: intent.created_at,
        }
    }
}

/// Other payers' intents are reported as not found.
#[tracing::instrument(skip(state, payer), fields(user_id = %payer.user_id))]
pub async fn get_payment(
    State(state): State<AppState>,
    payer: PayerContext,
    Path(transaction_id): Path<String>,
) -> Result<Json<PaymentResponse>, AppError> {
    let intent = state
        .intents
        .get_intent(&transaction_id, &payer.user_id)
        .await?
        .ok_or(PaymentError::IntentNotFound(transaction_id))?;

    Ok(Json(intent.into()))
}

#[tracing::instrument(skip(state))]
pub async fn verify_payment(
    State(state): State<AppState>,
    Path(transaction_id): Path<String>,
) -> Result<Json<VerificationResult>, AppError> {
    Ok(Json(state.engine.verify(&transaction_id).await?))
}

/// PhonePe redirect and server-to-server callback.
///
/// The body is ignored; the outcome always comes from the status API.
#[tracing::instrument(skip(state))]
pub async fn phonepe_callback(
    State(state): State<AppState>,
    Path(transaction_id): Path<String>,
) -> Result<Json<VerificationResult>, AppError> {
    tracing::info!("PhonePe callback received");
    Ok(Json(state.engine.verify(&transaction_id).await?))
}
