//! Fee balances.
//!
//! `recompute_balances` is the only writer of a fee's paid/pending/status
//! fields. It always runs inside the caller's transaction so the balances move
//! together with the intent transition that caused them.

use super::error::PaymentError;
use super::store::{PaymentStore, StoreTransaction};
use crate::models::{Fee, FeeBalances};
use rust_decimal::Decimal;
use std::sync::Arc;
use tracing::instrument;
use uuid::Uuid;

#[derive(Clone)]
pub struct FeeLedger {
    store: Arc<dyn PaymentStore>,
}

impl FeeLedger {
    pub fn new(store: Arc<dyn PaymentStore>) -> Self {
        Self { store }
    }

    pub async fn fee(&self, fee_id: Uuid) -> Result<Fee, PaymentError> {
        self.store
            .find_fee(fee_id)
            .await?
            .ok_or(PaymentError::FeeNotFound(fee_id))
    }

    /// `total_fee - paid_amount`, never negative.
    pub async fn pending_amount(&self, fee_id: Uuid) -> Result<Decimal, PaymentError> {
        Ok(self.fee(fee_id).await?.outstanding())
    }

    /// Sum COMPLETED intents for the fee and write the derived balances.
    #[instrument(skip(tx))]
    pub async fn recompute_balances(
        tx: &mut dyn StoreTransaction,
        fee_id: Uuid,
    ) -> Result<FeeBalances, PaymentError> {
        let fee = tx
            .lock_fee(fee_id)
            .await?
            .ok_or(PaymentError::FeeNotFound(fee_id))?;

        let paid = tx.sum_completed_payment_amounts(fee_id).await?;
        let balances = FeeBalances::from_totals(fee.total_fee, paid);
        tx.update_fee_balances(fee_id, &balances).await?;

        tracing::debug!(
            paid_amount = %balances.paid_amount,
            pending_amount = %balances.pending_amount,
            status = %balances.status,
            "Fee balances recomputed"
        );
        Ok(balances)
    }
}
