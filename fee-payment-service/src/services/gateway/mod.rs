//! Payment gateway abstractions and implementations.
//!
//! The engine only needs two calls from a gateway: start a hosted payment and
//! ask for the authoritative state of one transaction.

pub mod mock;
pub mod phonepe;

pub use mock::MockGateway;
pub use phonepe::PhonePeClient;

use async_trait::async_trait;
use rust_decimal::Decimal;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum GatewayError {
    #[error("Gateway not configured: {0}")]
    NotConfigured(String),

    /// Transport failure or timeout. Nothing is known about the payment.
    #[error("Gateway unreachable: {0}")]
    Unavailable(String),

    /// The gateway answered with a non-success payload.
    #[error("Gateway rejected request: {code} - {message}")]
    Rejected { code: String, message: String },

    #[error("Invalid gateway response: {0}")]
    InvalidResponse(String),
}

/// Request to start a hosted payment.
#[derive(Debug, Clone, PartialEq)]
pub struct InitiateRequest {
    pub merchant_transaction_id: String,
    /// Gross amount in paise.
    pub amount_in_minor_units: i64,
    pub redirect_url: String,
    pub callback_url: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct InitiateResponse {
    /// Hosted payment page the payer must be sent to.
    pub redirect_url: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GatewayState {
    Completed,
    Failed,
    /// Anything else, e.g. `PENDING` or `PAYMENT_INITIATED`.
    Pending(String),
}

#[derive(Debug, Clone, PartialEq)]
pub struct GatewayStatus {
    pub state: GatewayState,
    pub instrument_type: Option<String>,
    pub message: Option<String>,
}

impl GatewayStatus {
    pub fn completed(instrument_type: Option<&str>) -> Self {
        Self {
            state: GatewayState::Completed,
            instrument_type: instrument_type.map(str::to_string),
            message: None,
        }
    }

    pub fn failed(message: impl Into<String>) -> Self {
        Self {
            state: GatewayState::Failed,
            instrument_type: None,
            message: Some(message.into()),
        }
    }

    pub fn pending(state: impl Into<String>) -> Self {
        Self {
            state: GatewayState::Pending(state.into()),
            instrument_type: None,
            message: None,
        }
    }
}

#[async_trait]
pub trait PaymentGateway: Send + Sync {
    async fn initiate(&self, request: InitiateRequest) -> Result<InitiateResponse, GatewayError>;

    async fn query_status(
        &self,
        merchant_transaction_id: &str,
    ) -> Result<GatewayStatus, GatewayError>;
}

/// Rupees to paise, rounding half away from zero.
pub fn to_minor_units(amount: Decimal) -> Option<i64> {
    use rust_decimal::prelude::ToPrimitive;
    (amount * Decimal::ONE_HUNDRED)
        .round_dp_with_strategy(0, rust_decimal::RoundingStrategy::MidpointAwayFromZero)
        .to_i64()
}
