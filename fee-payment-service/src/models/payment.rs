//! Payment intent model: one attempt to pay against a fee.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PaymentStatus {
    Pending,
    Completed,
    Failed,
}

impl PaymentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "PENDING",
            Self::Completed => "COMPLETED",
            Self::Failed => "FAILED",
        }
    }

    /// COMPLETED and FAILED never change again.
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Pending)
    }

    /// The only legal moves are PENDING -> COMPLETED and PENDING -> FAILED.
    pub fn can_transition_to(&self, next: PaymentStatus) -> bool {
        matches!(
            (self, next),
            (Self::Pending, Self::Completed) | (Self::Pending, Self::Failed)
        )
    }
}

impl FromStr for PaymentStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "PENDING" => Ok(Self::Pending),
            "COMPLETED" => Ok(Self::Completed),
            "FAILED" => Ok(Self::Failed),
            other => Err(format!("unknown payment status '{}'", other)),
        }
    }
}

impl std::fmt::Display for PaymentStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PaymentMethod {
    Upi,
    Card,
    Online,
    Cash,
    Cheque,
    BankTransfer,
}

impl PaymentMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Upi => "UPI",
            Self::Card => "CARD",
            Self::Online => "ONLINE",
            Self::Cash => "CASH",
            Self::Cheque => "CHEQUE",
            Self::BankTransfer => "BANK_TRANSFER",
        }
    }

    /// Map the gateway's reported instrument type onto our payment methods.
    pub fn from_instrument(instrument: Option<&str>) -> Self {
        match instrument.map(|t| t.to_ascii_uppercase()).as_deref() {
            Some("UPI") => Self::Upi,
            Some("CARD") => Self::Card,
            _ => Self::Online,
        }
    }
}

impl FromStr for PaymentMethod {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "UPI" => Ok(Self::Upi),
            "CARD" => Ok(Self::Card),
            "ONLINE" => Ok(Self::Online),
            "CASH" => Ok(Self::Cash),
            "CHEQUE" => Ok(Self::Cheque),
            "BANK_TRANSFER" => Ok(Self::BankTransfer),
            other => Err(format!("unknown payment method '{}'", other)),
        }
    }
}

impl std::fmt::Display for PaymentMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PaymentIntent {
    pub intent_id: Uuid,
    pub fee_id: Uuid,
    /// Outstanding balance captured when the intent was created.
    pub amount: Decimal,
    /// Surcharge paid on top of `amount`; never credited to the fee.
    pub platform_fee: Decimal,
    pub payment_method: PaymentMethod,
    pub status: PaymentStatus,
    pub transaction_id: String,
    pub receipt_number: String,
    pub payment_date: Option<DateTime<Utc>>,
    pub payer_id: String,
    pub recorded_by: Option<String>,
    pub note: Option<String>,
    pub failure_reason: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl PaymentIntent {
    /// What the payer is charged by the gateway.
    pub fn gross_amount(&self) -> Decimal {
        self.amount + self.platform_fee
    }

    /// Apply a transition to an in-memory copy. Returns false when the move
    /// is not allowed from the current status.
    pub fn apply(&mut self, transition: &StatusTransition, at: DateTime<Utc>) -> bool {
        if !self.status.can_transition_to(transition.to) {
            return false;
        }

        self.status = transition.to;
        if let Some(method) = transition.payment_method {
            self.payment_method = method;
        }
        if transition.payment_date.is_some() {
            self.payment_date = transition.payment_date;
        }
        if transition.failure_reason.is_some() {
            self.failure_reason = transition.failure_reason.clone();
        }
        self.updated_at = at;
        true
    }
}

/// A requested move out of PENDING plus the fields that move sets.
#[derive(Debug, Clone, PartialEq)]
pub struct StatusTransition {
    pub to: PaymentStatus,
    pub payment_method: Option<PaymentMethod>,
    pub payment_date: Option<DateTime<Utc>>,
    pub failure_reason: Option<String>,
}

impl StatusTransition {
    pub fn completed(method: PaymentMethod, paid_at: DateTime<Utc>) -> Self {
        Self {
            to: PaymentStatus::Completed,
            payment_method: Some(method),
            payment_date: Some(paid_at),
            failure_reason: None,
        }
    }

    pub fn failed(reason: impl Into<String>) -> Self {
        Self {
            to: PaymentStatus::Failed,
            payment_method: None,
            payment_date: None,
            failure_reason: Some(reason.into()),
        }
    }
}
