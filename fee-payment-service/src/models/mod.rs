//! Domain models for fee-payment-service.

mod fee;
mod payment;

pub use fee::{Fee, FeeBalances, FeeStatus};
pub use payment::{PaymentIntent, PaymentMethod, PaymentStatus, StatusTransition};
