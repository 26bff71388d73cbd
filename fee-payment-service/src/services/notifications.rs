//! Payer notifications.
//!
//! Dispatch never affects a payment: it runs on its own task after the
//! transaction has committed and failures are only logged.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::Client;
use rust_decimal::Decimal;
use serde::Serialize;
use service_core::observability::trace_headers;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use uuid::Uuid;

use crate::models::{PaymentIntent, PaymentMethod};

#[derive(Error, Debug)]
pub enum NotifyError {
    #[error("Notification transport error: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("Notification service returned {status}: {body}")]
    Rejected { status: u16, body: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentEvent {
    PaymentCompleted,
    PaymentFailed,
    OfflinePaymentRecorded,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PaymentNotification {
    pub event: PaymentEvent,
    pub payer_id: String,
    pub fee_id: Uuid,
    pub transaction_id: String,
    pub receipt_number: String,
    pub amount: Decimal,
    pub payment_method: PaymentMethod,
    pub occurred_at: DateTime<Utc>,
}

impl PaymentNotification {
    pub fn for_intent(event: PaymentEvent, intent: &PaymentIntent) -> Self {
        Self {
            event,
            payer_id: intent.payer_id.clone(),
            fee_id: intent.fee_id,
            transaction_id: intent.transaction_id.clone(),
            receipt_number: intent.receipt_number.clone(),
            amount: intent.amount,
            payment_method: intent.payment_method,
            occurred_at: intent.payment_date.unwrap_or(intent.updated_at),
        }
    }
}

#[async_trait]
pub trait NotificationDispatcher: Send + Sync {
    async fn send(&self, notification: &PaymentNotification) -> Result<(), NotifyError>;
}

/// Fire and forget on a separate task.
pub fn dispatch_in_background(
    dispatcher: Arc<dyn NotificationDispatcher>,
    notification: PaymentNotification,
) {
    tokio::spawn(async move {
        if let Err(e) = dispatcher.send(&notification).await {
            tracing::warn!(
                error = %e,
                transaction_id = %notification.transaction_id,
                event = ?notification.event,
                "Failed to deliver payment notification"
            );
        }
    });
}

/// Posts events to the notification service.
#[derive(Clone)]
pub struct HttpNotificationDispatcher {
    client: Client,
    endpoint: String,
}

impl HttpNotificationDispatcher {
    pub fn new(service_url: &str) -> Result<Self, NotifyError> {
        let client = Client::builder().timeout(Duration::from_secs(5)).build()?;
        Ok(Self {
            client,
            endpoint: format!("{}/events/payments", service_url.trim_end_matches('/')),
        })
    }
}

#[async_trait]
impl NotificationDispatcher for HttpNotificationDispatcher {
    async fn send(&self, notification: &PaymentNotification) -> Result<(), NotifyError> {
        let response = self
            .client
            .post(&self.endpoint)
            .headers(trace_headers())
            .json(notification)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            return Err(NotifyError::Rejected { status, body });
        }

        tracing::debug!(transaction_id = %notification.transaction_id, "Notification delivered");
        Ok(())
    }
}

/// Used when no notification service is configured.
#[derive(Clone, Default)]
pub struct LogDispatcher;

#[async_trait]
impl NotificationDispatcher for LogDispatcher {
    async fn send(&self, notification: &PaymentNotification) -> Result<(), NotifyError> {
        tracing::info!(
            event = ?notification.event,
            payer_id = %notification.payer_id,
            transaction_id = %notification.transaction_id,
            amount = %notification.amount,
            "Payment notification"
        );
        Ok(())
    }
}
