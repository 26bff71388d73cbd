pub mod error;
pub mod gateway;
pub mod ids;
pub mod intents;
pub mod ledger;
pub mod metrics;
pub mod notifications;
pub mod reconciliation;
pub mod store;

pub use error::PaymentError;
pub use gateway::{MockGateway, PaymentGateway, PhonePeClient};
pub use intents::{CreatedIntent, IntentTracker};
pub use ledger::FeeLedger;
pub use metrics::{get_metrics, init_metrics};
pub use notifications::{
    HttpNotificationDispatcher, LogDispatcher, NotificationDispatcher, PaymentNotification,
};
pub use reconciliation::{
    ExpiryReport, OfflinePayment, ReconciliationEngine, RecordedPayment, VerificationOutcome,
    VerificationResult,
};
pub use store::{InMemoryStore, PaymentStore, PgStore, StoreError};
