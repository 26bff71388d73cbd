//! Persistence for fees and payment intents.
//!
//! Reads that need no isolation go through [`PaymentStore`]. Anything that
//! changes a fee's balances runs inside a [`StoreTransaction`] obtained from
//! [`PaymentStore::begin`], which holds the fee row for its whole lifetime.

mod memory;
mod postgres;

pub use memory::InMemoryStore;
pub use postgres::PgStore;

use crate::models::{Fee, FeeBalances, PaymentIntent, PaymentStatus, StatusTransition};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use thiserror::Error;
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum StoreError {
    /// A unique key (transaction id, receipt number) is already taken.
    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Stored data is invalid: {0}")]
    InvalidData(String),

    #[error("Store unavailable: {0}")]
    Unavailable(String),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),
}

#[async_trait]
pub trait PaymentStore: Send + Sync {
    async fn find_fee(&self, fee_id: Uuid) -> Result<Option<Fee>, StoreError>;

    async fn create_payment_intent(&self, intent: &PaymentIntent) -> Result<(), StoreError>;

    async fn find_payment_intent(
        &self,
        transaction_id: &str,
    ) -> Result<Option<PaymentIntent>, StoreError>;

    /// Lookup restricted to intents created by `payer_id`.
    async fn find_payment_intent_for_payer(
        &self,
        transaction_id: &str,
        payer_id: &str,
    ) -> Result<Option<PaymentIntent>, StoreError>;

    /// Compare-and-set outside a transaction. Returns whether the row still had
    /// `expected` status and was updated.
    async fn update_payment_intent_status(
        &self,
        intent_id: Uuid,
        transition: &StatusTransition,
        expected: PaymentStatus,
    ) -> Result<bool, StoreError>;

    /// PENDING intents created before `created_before`, ordered by
    /// `(created_at, intent_id)` and starting strictly after `after`.
    async fn list_pending_intents(
        &self,
        created_before: DateTime<Utc>,
        after: Option<PendingCursor>,
        limit: i64,
    ) -> Result<Vec<PaymentIntent>, StoreError>;

    async fn begin(&self) -> Result<Box<dyn StoreTransaction>, StoreError>;

    async fn health_check(&self) -> Result<(), StoreError>;
}

/// Keyset position in the pending-intent listing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PendingCursor {
    pub created_at: DateTime<Utc>,
    pub intent_id: Uuid,
}

impl PendingCursor {
    pub fn of(intent: &PaymentIntent) -> Self {
        Self {
            created_at: intent.created_at,
            intent_id: intent.intent_id,
        }
    }
}

/// One all-or-nothing unit of work. Dropping it without `commit` discards
/// every write made through it.
#[async_trait]
pub trait StoreTransaction: Send {
    /// Read and lock the fee row until the transaction ends.
    async fn lock_fee(&mut self, fee_id: Uuid) -> Result<Option<Fee>, StoreError>;

    async fn find_payment_intent_by_id(
        &mut self,
        intent_id: Uuid,
    ) -> Result<Option<PaymentIntent>, StoreError>;

    async fn create_payment_intent(&mut self, intent: &PaymentIntent) -> Result<(), StoreError>;

    async fn update_payment_intent_status(
        &mut self,
        intent_id: Uuid,
        transition: &StatusTransition,
        expected: PaymentStatus,
    ) -> Result<bool, StoreError>;

    async fn sum_completed_payment_amounts(&mut self, fee_id: Uuid)
        -> Result<Decimal, StoreError>;

    async fn update_fee_balances(
        &mut self,
        fee_id: Uuid,
        balances: &FeeBalances,
    ) -> Result<(), StoreError>;

    async fn commit(self: Box<Self>) -> Result<(), StoreError>;

    async fn rollback(self: Box<Self>) -> Result<(), StoreError>;
}
