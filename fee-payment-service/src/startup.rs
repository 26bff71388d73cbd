//! Application startup and lifecycle management.

use crate::config::{FeePaymentConfig, PaymentPolicyConfig};
use crate::handlers;
use crate::services::{
    FeeLedger, HttpNotificationDispatcher, IntentTracker, LogDispatcher, NotificationDispatcher,
    PaymentGateway, PaymentStore, PgStore, PhonePeClient, ReconciliationEngine,
};
use axum::{
    middleware::from_fn,
    routing::{get, post},
    Router,
};
use secrecy::ExposeSecret;
use service_core::error::AppError;
use service_core::middleware::{http_trace_layer, request_id_middleware};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tower::ServiceBuilder;
use tower_http::timeout::TimeoutLayer;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn PaymentStore>,
    pub ledger: FeeLedger,
    pub intents: IntentTracker,
    pub engine: Arc<ReconciliationEngine>,
}

impl AppState {
    /// Wire the services over the given collaborators.
    pub fn new(
        store: Arc<dyn PaymentStore>,
        gateway: Arc<dyn PaymentGateway>,
        notifier: Arc<dyn NotificationDispatcher>,
        policy: PaymentPolicyConfig,
    ) -> Self {
        Self {
            ledger: FeeLedger::new(store.clone()),
            intents: IntentTracker::new(store.clone(), gateway.clone(), policy.clone()),
            engine: Arc::new(ReconciliationEngine::new(
                store.clone(),
                gateway,
                notifier,
                policy,
            )),
            store,
        }
    }
}

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(handlers::health_check))
        .route("/ready", get(handlers::readiness_check))
        .route("/metrics", get(handlers::metrics_endpoint))
        .route("/fees/:fee_id", get(handlers::fees::get_fee))
        .route("/fees/:fee_id/payments", post(handlers::fees::create_payment))
        .route(
            "/fees/:fee_id/offline-payments",
            post(handlers::fees::record_offline_payment),
        )
        .route(
            "/payments/:transaction_id",
            get(handlers::payments::get_payment),
        )
        .route(
            "/payments/:transaction_id/verify",
            post(handlers::payments::verify_payment),
        )
        .route(
            "/callbacks/phonepe/:transaction_id",
            get(handlers::payments::phonepe_callback).post(handlers::payments::phonepe_callback),
        )
        .layer(
            ServiceBuilder::new()
                .layer(from_fn(request_id_middleware))
                .layer(http_trace_layer())
                .layer(TimeoutLayer::new(REQUEST_TIMEOUT)),
        )
        .with_state(state)
}

/// Application container for managing server lifecycle.
pub struct Application {
    port: u16,
    listener: TcpListener,
    state: AppState,
}

impl Application {
    /// Connect to Postgres, apply migrations and bind the listener.
    pub async fn build(config: FeePaymentConfig) -> Result<Self, AppError> {
        let store = PgStore::connect(
            config.database.url.expose_secret(),
            config.database.max_connections,
            config.database.min_connections,
        )
        .await
        .map_err(|e| {
            tracing::error!("Failed to connect to Postgres: {}", e);
            AppError::DatabaseError(e.into())
        })?;

        store.run_migrations().await.map_err(|e| {
            tracing::error!("Failed to run database migrations: {}", e);
            AppError::from(e)
        })?;

        let gateway = PhonePeClient::new(config.phonepe.clone())
            .map_err(|e| AppError::ConfigError(e.into()))?;
        if gateway.is_configured() {
            tracing::info!("PhonePe client initialized");
        } else {
            tracing::warn!("PhonePe credentials not configured - online payments will fail");
        }

        let notifier: Arc<dyn NotificationDispatcher> = match &config.notifications.service_url {
            Some(url) => Arc::new(
                HttpNotificationDispatcher::new(url)
                    .map_err(|e| AppError::ConfigError(e.into()))?,
            ),
            None => {
                tracing::info!("NOTIFICATION_SERVICE_URL not set, notifications are logged only");
                Arc::new(LogDispatcher)
            }
        };

        let state = AppState::new(
            Arc::new(store),
            Arc::new(gateway),
            notifier,
            config.payments.clone(),
        );

        let host: std::net::IpAddr = config.common.host.parse().map_err(|e| {
            AppError::ConfigError(anyhow::anyhow!("Invalid host '{}': {}", config.common.host, e))
        })?;
        let addr = SocketAddr::new(host, config.common.port);
        let listener = TcpListener::bind(addr).await.map_err(|e| {
            tracing::error!("Failed to bind HTTP listener to {}: {}", addr, e);
            AppError::from(e)
        })?;
        let port = listener.local_addr()?.port();

        tracing::info!("Fee payment service listening on port {}", port);

        Ok(Self {
            port,
            listener,
            state,
        })
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn state(&self) -> AppState {
        self.state.clone()
    }

    /// Serve HTTP and run the expiry sweep (when enabled) until stopped.
    pub async fn run_until_stopped(self) -> std::io::Result<()> {
        let sweep = self.state.engine.clone().spawn_expiry_sweep();
        let router = build_router(self.state);

        let result = axum::serve(self.listener, router).await;

        if let Some(handle) = sweep {
            handle.abort();
        }
        result.map_err(|e| {
            tracing::error!("HTTP server error: {}", e);
            std::io::Error::other(format!("HTTP server error: {}", e))
        })
    }
}
