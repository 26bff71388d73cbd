//! In-process store backing the test harness.
//!
//! A transaction takes the single lock and works on a copy of the state,
//! so it is serialisable and its writes only become visible on commit.

use super::{PaymentStore, PendingCursor, StoreError, StoreTransaction};
use crate::models::{Fee, FeeBalances, PaymentIntent, PaymentStatus, StatusTransition};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};
use uuid::Uuid;

#[derive(Debug, Clone, Default)]
struct State {
    fees: HashMap<Uuid, Fee>,
    intents: HashMap<Uuid, PaymentIntent>,
}

impl State {
    fn intent_by_transaction(&self, transaction_id: &str) -> Option<&PaymentIntent> {
        self.intents
            .values()
            .find(|i| i.transaction_id == transaction_id)
    }

    fn insert_intent(&mut self, intent: &PaymentIntent) -> Result<(), StoreError> {
        let duplicate = self.intents.values().any(|existing| {
            existing.intent_id == intent.intent_id
                || existing.transaction_id == intent.transaction_id
                || existing.receipt_number == intent.receipt_number
        });
        if duplicate {
            return Err(StoreError::Conflict(format!(
                "payment intent {} already exists",
                intent.transaction_id
            )));
        }
        if !self.fees.contains_key(&intent.fee_id) {
            return Err(StoreError::InvalidData(format!(
                "fee {} does not exist",
                intent.fee_id
            )));
        }

        self.intents.insert(intent.intent_id, intent.clone());
        Ok(())
    }

    fn transition(
        &mut self,
        intent_id: Uuid,
        transition: &StatusTransition,
        expected: PaymentStatus,
    ) -> bool {
        match self.intents.get_mut(&intent_id) {
            Some(intent) if intent.status == expected => intent.apply(transition, Utc::now()),
            _ => false,
        }
    }
}

#[derive(Clone, Default)]
pub struct InMemoryStore {
    state: Arc<Mutex<State>>,
    fail_fee_updates: Arc<AtomicBool>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed a fee. Fee assignment itself lives outside this service.
    pub async fn insert_fee(&self, fee: Fee) {
        self.state.lock().await.fees.insert(fee.fee_id, fee);
    }

    /// Make every `update_fee_balances` fail, to exercise rollback paths.
    pub fn fail_fee_updates(&self, fail: bool) {
        self.fail_fee_updates.store(fail, Ordering::SeqCst);
    }

    pub async fn intents_for_fee(&self, fee_id: Uuid) -> Vec<PaymentIntent> {
        let state = self.state.lock().await;
        let mut intents: Vec<_> = state
            .intents
            .values()
            .filter(|i| i.fee_id == fee_id)
            .cloned()
            .collect();
        intents.sort_by_key(|i| i.created_at);
        intents
    }
}

#[async_trait]
impl PaymentStore for InMemoryStore {
    async fn find_fee(&self, fee_id: Uuid) -> Result<Option<Fee>, StoreError> {
        Ok(self.state.lock().await.fees.get(&fee_id).cloned())
    }

    async fn create_payment_intent(&self, intent: &PaymentIntent) -> Result<(), StoreError> {
        self.state.lock().await.insert_intent(intent)
    }

    async fn find_payment_intent(
        &self,
        transaction_id: &str,
    ) -> Result<Option<PaymentIntent>, StoreError> {
        Ok(self
            .state
            .lock()
            .await
            .intent_by_transaction(transaction_id)
            .cloned())
    }

    async fn find_payment_intent_for_payer(
        &self,
        transaction_id: &str,
        payer_id: &str,
    ) -> Result<Option<PaymentIntent>, StoreError> {
        Ok(self
            .state
            .lock()
            .await
            .intent_by_transaction(transaction_id)
            .filter(|i| i.payer_id == payer_id)
            .cloned())
    }

    async fn update_payment_intent_status(
        &self,
        intent_id: Uuid,
        transition: &StatusTransition,
        expected: PaymentStatus,
    ) -> Result<bool, StoreError> {
        Ok(self
            .state
            .lock()
            .await
            .transition(intent_id, transition, expected))
    }

    async fn list_pending_intents(
        &self,
        created_before: DateTime<Utc>,
        after: Option<PendingCursor>,
        limit: i64,
    ) -> Result<Vec<PaymentIntent>, StoreError> {
        let state = self.state.lock().await;
        let mut pending: Vec<_> = state
            .intents
            .values()
            .filter(|i| i.status == PaymentStatus::Pending && i.created_at < created_before)
            .filter(|i| match after {
                Some(cursor) => (i.created_at, i.intent_id) > (cursor.created_at, cursor.intent_id),
                None => true,
            })
            .cloned()
            .collect();
        pending.sort_by_key(|i| (i.created_at, i.intent_id));
        pending.truncate(limit.max(0) as usize);
        Ok(pending)
    }

    async fn begin(&self) -> Result<Box<dyn StoreTransaction>, StoreError> {
        let guard = self.state.clone().lock_owned().await;
        let working = guard.clone();

        Ok(Box::new(InMemoryTransaction {
            guard,
            working,
            fail_fee_updates: self.fail_fee_updates.load(Ordering::SeqCst),
        }))
    }

    async fn health_check(&self) -> Result<(), StoreError> {
        Ok(())
    }
}

struct InMemoryTransaction {
    guard: OwnedMutexGuard<State>,
    working: State,
    fail_fee_updates: bool,
}

#[async_trait]
impl StoreTransaction for InMemoryTransaction {
    async fn lock_fee(&mut self, fee_id: Uuid) -> Result<Option<Fee>, StoreError> {
        Ok(self.working.fees.get(&fee_id).cloned())
    }

    async fn find_payment_intent_by_id(
        &mut self,
        intent_id: Uuid,
    ) -> Result<Option<PaymentIntent>, StoreError> {
        Ok(self.working.intents.get(&intent_id).cloned())
    }

    async fn create_payment_intent(&mut self, intent: &PaymentIntent) -> Result<(), StoreError> {
        self.working.insert_intent(intent)
    }

    async fn update_payment_intent_status(
        &mut self,
        intent_id: Uuid,
        transition: &StatusTransition,
        expected: PaymentStatus,
    ) -> Result<bool, StoreError> {
        Ok(self.working.transition(intent_id, transition, expected))
    }

    async fn sum_completed_payment_amounts(
        &mut self,
        fee_id: Uuid,
    ) -> Result<Decimal, StoreError> {
        Ok(self
            .working
            .intents
            .values()
            .filter(|i| i.fee_id == fee_id && i.status == PaymentStatus::Completed)
            .map(|i| i.amount)
            .sum())
    }

    async fn update_fee_balances(
        &mut self,
        fee_id: Uuid,
        balances: &FeeBalances,
    ) -> Result<(), StoreError> {
        if self.fail_fee_updates {
            return Err(StoreError::Unavailable("injected fee update failure".to_string()));
        }

        let fee = self
            .working
            .fees
            .get_mut(&fee_id)
            .ok_or_else(|| StoreError::InvalidData(format!("fee {} does not exist", fee_id)))?;
        fee.paid_amount = balances.paid_amount;
        fee.pending_amount = balances.pending_amount;
        fee.status = balances.status;
        fee.updated_at = Utc::now();
        Ok(())
    }

    async fn commit(self: Box<Self>) -> Result<(), StoreError> {
        let InMemoryTransaction {
            mut guard, working, ..
        } = *self;
        *guard = working;
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> Result<(), StoreError> {
        Ok(())
    }
}
