use super::gateway::GatewayError;
use super::store::StoreError;
use rust_decimal::Decimal;
use service_core::error::AppError;
use thiserror::Error;
use uuid::Uuid;

#[derive(Error, Debug)]
pub enum PaymentError {
    #[error("Fee {0} not found")]
    FeeNotFound(Uuid),

    #[error("Payment {0} not found")]
    IntentNotFound(String),

    #[error("Fee {0} is already paid")]
    AlreadyPaid(Uuid),

    #[error("Nothing is due on fee {0}")]
    NothingDue(Uuid),

    #[error("Invalid amount: {0}")]
    InvalidAmount(String),

    #[error("Amount {amount} exceeds the pending balance of {pending}")]
    AmountExceedsBalance { amount: Decimal, pending: Decimal },

    /// Initiation failed. No intent was persisted.
    #[error("Payment provider unavailable: {0}")]
    ProviderUnavailable(GatewayError),

    /// Status query failed. The intent is untouched.
    #[error("Payment provider error: {0}")]
    Provider(GatewayError),

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl PaymentError {
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            PaymentError::ProviderUnavailable(_) | PaymentError::Provider(_)
        )
    }
}

impl From<PaymentError> for AppError {
    fn from(err: PaymentError) -> Self {
        match err {
            PaymentError::FeeNotFound(_) | PaymentError::IntentNotFound(_) => {
                AppError::NotFound(anyhow::anyhow!(err))
            }
            PaymentError::AlreadyPaid(_) | PaymentError::NothingDue(_) => {
                AppError::Conflict(anyhow::anyhow!(err))
            }
            PaymentError::InvalidAmount(_) | PaymentError::AmountExceedsBalance { .. } => {
                AppError::BadRequest(anyhow::anyhow!(err))
            }
            PaymentError::ProviderUnavailable(e) | PaymentError::Provider(e) => {
                AppError::BadGateway(e.to_string())
            }
            PaymentError::Store(StoreError::Conflict(msg)) => {
                AppError::Conflict(anyhow::anyhow!(msg))
            }
            PaymentError::Store(e) => AppError::DatabaseError(anyhow::Error::new(e)),
        }
    }
}
