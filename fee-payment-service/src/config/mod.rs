//! Configuration module for fee-payment-service.

use rust_decimal::Decimal;
use secrecy::Secret;
use service_core::config as core_config;
use service_core::error::AppError;
use std::env;
use std::str::FromStr;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct FeePaymentConfig {
    pub common: core_config::Config,
    pub service_name: String,
    pub log_level: String,
    pub otlp_endpoint: Option<String>,
    pub database: DatabaseConfig,
    pub phonepe: PhonePeConfig,
    pub payments: PaymentPolicyConfig,
    pub notifications: NotificationConfig,
}

#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    pub url: Secret<String>,
    pub max_connections: u32,
    pub min_connections: u32,
}

#[derive(Debug, Clone)]
pub struct PhonePeConfig {
    pub merchant_id: String,
    pub salt_key: Secret<String>,
    pub salt_index: String,
    pub host_url: String,
    pub request_timeout: Duration,
}

#[derive(Debug, Clone)]
pub struct PaymentPolicyConfig {
    /// Public base URL the gateway redirects and calls back to.
    pub public_url: String,
    /// Surcharge as a percentage of the outstanding amount.
    pub platform_fee_percent: Decimal,
    /// PENDING intents older than this are swept to FAILED.
    pub pending_expiry: Duration,
    /// Zero disables the background sweep.
    pub sweep_interval: Duration,
}

#[derive(Debug, Clone)]
pub struct NotificationConfig {
    pub service_url: Option<String>,
}

impl Default for PaymentPolicyConfig {
    fn default() -> Self {
        Self {
            public_url: "http://localhost:3003".to_string(),
            platform_fee_percent: Decimal::TWO,
            pending_expiry: Duration::from_secs(24 * 60 * 60),
            sweep_interval: Duration::ZERO,
        }
    }
}

impl FeePaymentConfig {
    pub fn from_env() -> Result<Self, AppError> {
        let common = core_config::Config::load()?;
        let defaults = PaymentPolicyConfig::default();

        Ok(Self {
            common,
            service_name: env::var("SERVICE_NAME")
                .unwrap_or_else(|_| "fee-payment-service".to_string()),
            log_level: env::var("LOG_LEVEL")
                .unwrap_or_else(|_| "info,fee_payment_service=debug,sqlx=warn".to_string()),
            otlp_endpoint: env::var("OTLP_ENDPOINT").ok().filter(|s| !s.is_empty()),
            database: DatabaseConfig {
                url: Secret::new(required("DATABASE_URL")?),
                max_connections: parsed("DATABASE_MAX_CONNECTIONS", 10)?,
                min_connections: parsed("DATABASE_MIN_CONNECTIONS", 2)?,
            },
            phonepe: PhonePeConfig::from_env()?,
            payments: PaymentPolicyConfig {
                public_url: env::var("APP_PUBLIC_URL").unwrap_or(defaults.public_url),
                platform_fee_percent: parsed(
                    "PLATFORM_FEE_PERCENT",
                    defaults.platform_fee_percent,
                )?,
                pending_expiry: Duration::from_secs(
                    parsed::<u64>("PENDING_EXPIRY_HOURS", 24)? * 60 * 60,
                ),
                sweep_interval: Duration::from_secs(parsed("EXPIRY_SWEEP_INTERVAL_SECS", 0)?),
            },
            notifications: NotificationConfig {
                service_url: env::var("NOTIFICATION_SERVICE_URL")
                    .ok()
                    .filter(|s| !s.is_empty()),
            },
        })
    }
}

impl PhonePeConfig {
    /// Missing credentials leave the client unconfigured; it then refuses
    /// every call with `GatewayError::NotConfigured`.
    pub fn from_env() -> Result<Self, AppError> {
        Ok(Self {
            merchant_id: env::var("PHONEPE_MERCHANT_ID").unwrap_or_default(),
            salt_key: Secret::new(env::var("PHONEPE_SALT_KEY").unwrap_or_default()),
            salt_index: env::var("PHONEPE_SALT_INDEX").unwrap_or_default(),
            host_url: env::var("PHONEPE_HOST_URL")
                .unwrap_or_else(|_| "https://api-preprod.phonepe.com/apis/pg-sandbox".to_string()),
            request_timeout: Duration::from_secs(parsed("PHONEPE_TIMEOUT_SECS", 15)?),
        })
    }
}

fn required(key: &str) -> Result<String, AppError> {
    env::var(key).map_err(|_| AppError::ConfigError(anyhow::anyhow!("{} is required", key)))
}

fn parsed<T: FromStr>(key: &str, default: T) -> Result<T, AppError>
where
    T::Err: std::fmt::Display,
{
    match env::var(key) {
        Ok(raw) => parse_value(key, &raw),
        Err(_) => Ok(default),
    }
}

fn parse_value<T: FromStr>(key: &str, raw: &str) -> Result<T, AppError>
where
    T::Err: std::fmt::Display,
{
    raw.trim().parse().map_err(|e| {
        AppError::ConfigError(anyhow::anyhow!("{} has invalid value '{}': {}", key, raw, e))
    })
}
