//! Scriptable gateway for tests. Answers without any network calls.

use super::{
    GatewayError, GatewayStatus, InitiateRequest, InitiateResponse, PaymentGateway,
};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

#[derive(Default)]
struct Script {
    initiate_error: Option<GatewayError>,
    statuses: HashMap<String, Result<GatewayStatus, GatewayError>>,
    initiated: Vec<InitiateRequest>,
}

/// Unscripted transactions report `PENDING`.
#[derive(Clone, Default)]
pub struct MockGateway {
    script: Arc<Mutex<Script>>,
    status_calls: Arc<AtomicUsize>,
}

impl MockGateway {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every `initiate` call fail with `error` (`None` restores success).
    pub fn fail_initiate(&self, error: Option<GatewayError>) {
        if let Ok(mut script) = self.script.lock() {
            script.initiate_error = error;
        }
    }

    pub fn set_status(&self, transaction_id: &str, status: GatewayStatus) {
        if let Ok(mut script) = self.script.lock() {
            script
                .statuses
                .insert(transaction_id.to_string(), Ok(status));
        }
    }

    pub fn set_status_error(&self, transaction_id: &str, error: GatewayError) {
        if let Ok(mut script) = self.script.lock() {
            script
                .statuses
                .insert(transaction_id.to_string(), Err(error));
        }
    }

    pub fn initiated(&self) -> Vec<InitiateRequest> {
        self.script
            .lock()
            .map(|s| s.initiated.clone())
            .unwrap_or_default()
    }

    pub fn status_calls(&self) -> usize {
        self.status_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl PaymentGateway for MockGateway {
    async fn initiate(&self, request: InitiateRequest) -> Result<InitiateResponse, GatewayError> {
        let mut script = self
            .script
            .lock()
            .map_err(|_| GatewayError::Unavailable("mock gateway poisoned".to_string()))?;

        if let Some(error) = script.initiate_error.clone() {
            return Err(error);
        }

        let redirect_url = format!(
            "https://mock.gateway.local/pay/{}",
            request.merchant_transaction_id
        );
        script.initiated.push(request);
        Ok(InitiateResponse { redirect_url })
    }

    async fn query_status(
        &self,
        merchant_transaction_id: &str,
    ) -> Result<GatewayStatus, GatewayError> {
        self.status_calls.fetch_add(1, Ordering::SeqCst);

        let script = self
            .script
            .lock()
            .map_err(|_| GatewayError::Unavailable("mock gateway poisoned".to_string()))?;

        script
            .statuses
            .get(merchant_transaction_id)
            .cloned()
            .unwrap_or_else(|| Ok(GatewayStatus::pending("PENDING")))
    }
}
