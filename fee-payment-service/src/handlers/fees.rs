use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use service_core::error::AppError;
use uuid::Uuid;
use validator::Validate;

use crate::middleware::PayerContext;
use crate::models::{Fee, FeeBalances, FeeStatus, PaymentIntent, PaymentMethod, PaymentStatus};
use crate::services::{CreatedIntent, OfflinePayment};
use crate::startup::AppState;

#[derive(Debug, Serialize)]
pub struct FeeResponse {
    pub fee_id: Uuid,
    pub student_id: String,
    pub category_id: String,
    pub total_fee: Decimal,
    pub paid_amount: Decimal,
    pub pending_amount: Decimal,
    pub due_date: NaiveDate,
    pub status: FeeStatus,
}

impl From<Fee> for FeeResponse {
    fn from(fee: Fee) -> Self {
        Self {
            fee_id: fee.fee_id,
            student_id: fee.student_id,
            category_id: fee.category_id,
            total_fee: fee.total_fee,
            paid_amount: fee.paid_amount,
            pending_amount: fee.pending_amount,
            due_date: fee.due_date,
            status: fee.status,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct CreatePaymentResponse {
    pub transaction_id: String,
    pub receipt_number: String,
    pub amount: Decimal,
    pub platform_fee: Decimal,
    pub gross_amount: Decimal,
    pub status: PaymentStatus,
    pub redirect_url: String,
}

impl From<CreatedIntent> for CreatePaymentResponse {
    fn from(created: CreatedIntent) -> Self {
        let gross_amount = created.intent.gross_amount();
        let intent = created.intent;
        Self {
            transaction_id: intent.transaction_id,
            receipt_number: intent.receipt_number,
            amount: intent.amount,
            platform_fee: intent.platform_fee,
            gross_amount,
            status: intent.status,
            redirect_url: created.redirect_url,
        }
    }
}

#[derive(Debug, Deserialize, Validate)]
pub struct RecordOfflinePaymentRequest {
    pub amount: Decimal,
    pub method: PaymentMethod,
    #[validate(length(min = 1, max = 64, message = "Reference must be 1-64 characters"))]
    pub reference: Option<String>,
    #[validate(length(min = 1, max = 64, message = "Payer id must be 1-64 characters"))]
    pub payer_id: String,
    #[validate(length(max = 500, message = "Note cannot exceed 500 characters"))]
    pub note: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct RecordOfflinePaymentResponse {
    pub transaction_id: String,
    pub receipt_number: String,
    pub amount: Decimal,
    pub payment_method: PaymentMethod,
    pub payment_date: Option<DateTime<Utc>>,
    pub balances: FeeBalances,
}

impl RecordOfflinePaymentResponse {
    fn new(intent: PaymentIntent, balances: FeeBalances) -> Self {
        Self {
            transaction_id: intent.transaction_id,
            receipt_number: intent.receipt_number,
            amount: intent.amount,
            payment_method: intent.payment_method,
            payment_date: intent.payment_date,
            balances,
        }
    }
}

/// Fee balances for an authenticated caller. Which fees a caller may see is
/// decided by the gateway in front, where fees are assigned to students.
#[tracing::instrument(skip(state, caller), fields(user_id = %caller.user_id))]
pub async fn get_fee(
    State(state): State<AppState>,
    caller: PayerContext,
    Path(fee_id): Path<Uuid>,
) -> Result<Json<FeeResponse>, AppError> {
    let fee = state.ledger.fee(fee_id).await?;
    Ok(Json(FeeResponse::from(fee)))
}

/// Start an online payment for what is currently due.
#[tracing::instrument(skip(state, payer), fields(user_id = %payer.user_id))]
pub async fn create_payment(
    State(state): State<AppState>,
    payer: PayerContext,
    Path(fee_id): Path<Uuid>,
) -> Result<(StatusCode, Json<CreatePaymentResponse>), AppError> {
    let created = state.intents.create_intent(fee_id, &payer.user_id).await?;
    Ok((StatusCode::CREATED, Json(created.into())))
}

/// Record a cash, cheque or bank transfer payment taken by staff.
#[tracing::instrument(skip(state, recorder, request), fields(recorded_by = %recorder.user_id))]
pub async fn record_offline_payment(
    State(state): State<AppState>,
    recorder: PayerContext,
    Path(fee_id): Path<Uuid>,
    Json(request): Json<RecordOfflinePaymentRequest>,
) -> Result<(StatusCode, Json<RecordOfflinePaymentResponse>), AppError> {
    request.validate()?;

    let recorded = state
        .engine
        .record_offline_payment(OfflinePayment {
            fee_id,
            amount: request.amount,
            method: request.method,
            reference: request.reference,
            payer_id: request.payer_id,
            recorded_by: recorder.user_id,
            note: request.note,
        })
        .await?;

    Ok((
        StatusCode::CREATED,
        Json(RecordOfflinePaymentResponse::new(
            recorded.intent,
            recorded.balances,
        )),
    ))
}
