//! PhonePe payment gateway client.
//!
//! Implements the hosted pay page (`/pg/v1/pay`) for initiation and the
//! transaction status API (`/pg/v1/status`) for verification. Every request
//! carries an `X-VERIFY` checksum:
//! `SHA256(payload + salt_key) + "###" + salt_index`.

use super::{
    GatewayError, GatewayStatus, InitiateRequest, InitiateResponse, PaymentGateway,
};
use crate::config::PhonePeConfig;
use crate::services::metrics::GATEWAY_REQUEST_DURATION;
use async_trait::async_trait;
use base64::{engine::general_purpose, Engine as _};
use reqwest::{Client, StatusCode};
use secrecy::ExposeSecret;
use serde::{Deserialize, Serialize};
use service_core::observability::trace_headers;
use sha2::{Digest, Sha256};
use tracing::instrument;
use uuid::Uuid;

const PAY_PATH: &str = "/pg/v1/pay";

/// Response codes that mean the payment will not succeed.
const FAILURE_CODES: &[&str] = &["PAYMENT_ERROR", "PAYMENT_DECLINED", "TIMED_OUT"];

#[derive(Clone)]
pub struct PhonePeClient {
    client: Client,
    config: PhonePeConfig,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct PayPayload<'a> {
    merchant_id: &'a str,
    merchant_transaction_id: &'a str,
    merchant_user_id: String,
    /// Amount in paise.
    amount: i64,
    redirect_url: &'a str,
    redirect_mode: &'static str,
    callback_url: &'a str,
    payment_instrument: PaymentInstrument,
}

#[derive(Debug, Serialize)]
struct PaymentInstrument {
    #[serde(rename = "type")]
    kind: &'static str,
}

#[derive(Debug, Serialize)]
struct PayRequestBody {
    request: String,
}

#[derive(Debug, Deserialize)]
pub struct PhonePeResponse<T> {
    #[serde(default)]
    pub success: bool,
    #[serde(default)]
    pub code: Option<String>,
    #[serde(default)]
    pub message: Option<String>,
    pub data: Option<T>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PayData {
    pub instrument_response: Option<InstrumentResponse>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InstrumentResponse {
    pub redirect_info: Option<RedirectInfo>,
}

#[derive(Debug, Deserialize)]
pub struct RedirectInfo {
    pub url: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusData {
    pub state: Option<String>,
    pub payment_instrument: Option<ReportedInstrument>,
}

#[derive(Debug, Deserialize)]
pub struct ReportedInstrument {
    #[serde(rename = "type")]
    pub kind: Option<String>,
}

impl PhonePeClient {
    pub fn new(config: PhonePeConfig) -> Result<Self, GatewayError> {
        let client = Client::builder()
            .timeout(config.request_timeout)
            .build()
            .map_err(|e| GatewayError::NotConfigured(format!("HTTP client: {}", e)))?;

        Ok(Self { client, config })
    }

    /// Check if PhonePe is configured (merchant credentials are set).
    pub fn is_configured(&self) -> bool {
        !self.config.merchant_id.is_empty()
            && !self.config.salt_key.expose_secret().is_empty()
            && !self.config.salt_index.is_empty()
    }

    /// `X-VERIFY` header value for a payload.
    pub fn checksum(&self, payload: &str) -> String {
        let mut hasher = Sha256::new();
        hasher.update(payload.as_bytes());
        hasher.update(self.config.salt_key.expose_secret().as_bytes());
        format!("{}###{}", hex::encode(hasher.finalize()), self.config.salt_index)
    }

    fn status_path(&self, merchant_transaction_id: &str) -> String {
        format!(
            "/pg/v1/status/{}/{}",
            self.config.merchant_id, merchant_transaction_id
        )
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.config.host_url.trim_end_matches('/'), path)
    }
}

fn transport_error(e: reqwest::Error) -> GatewayError {
    if e.is_timeout() {
        GatewayError::Unavailable(format!("request timed out: {}", e))
    } else {
        GatewayError::Unavailable(e.to_string())
    }
}

fn http_error(status: StatusCode, body: &str) -> GatewayError {
    if status.is_server_error() || status == StatusCode::TOO_MANY_REQUESTS {
        return GatewayError::Unavailable(format!("HTTP {}", status));
    }

    match serde_json::from_str::<PhonePeResponse<serde_json::Value>>(body) {
        Ok(parsed) => GatewayError::Rejected {
            code: parsed.code.unwrap_or_else(|| status.as_u16().to_string()),
            message: parsed.message.unwrap_or_else(|| body.to_string()),
        },
        Err(_) => GatewayError::Rejected {
            code: status.as_u16().to_string(),
            message: body.to_string(),
        },
    }
}

/// Decide what a status response means for the intent.
pub fn interpret_status(response: PhonePeResponse<StatusData>) -> GatewayStatus {
    let state = response.data.as_ref().and_then(|d| d.state.clone());
    let instrument = response
        .data
        .as_ref()
        .and_then(|d| d.payment_instrument.as_ref())
        .and_then(|p| p.kind.clone());

    if response.success && state.as_deref() == Some("COMPLETED") {
        return GatewayStatus::completed(instrument.as_deref());
    }

    let failed_code = response
        .code
        .as_deref()
        .map(|code| FAILURE_CODES.contains(&code))
        .unwrap_or(false);
    if state.as_deref() == Some("FAILED") || (!response.success && failed_code) {
        let message = response
            .message
            .or(response.code)
            .unwrap_or_else(|| "payment failed".to_string());
        return GatewayStatus::failed(message);
    }

    let mut status = GatewayStatus::pending(
        state
            .or(response.code)
            .unwrap_or_else(|| "UNKNOWN".to_string()),
    );
    status.message = response.message;
    status
}

#[async_trait]
impl PaymentGateway for PhonePeClient {
    #[instrument(skip(self, request), fields(merchant_transaction_id = %request.merchant_transaction_id))]
    async fn initiate(&self, request: InitiateRequest) -> Result<InitiateResponse, GatewayError> {
        if !self.is_configured() {
            return Err(GatewayError::NotConfigured(
                "PhonePe credentials not configured".to_string(),
            ));
        }

        let payload = PayPayload {
            merchant_id: &self.config.merchant_id,
            merchant_transaction_id: &request.merchant_transaction_id,
            merchant_user_id: format!("MUID-{}", &Uuid::new_v4().simple().to_string()[..8]),
            amount: request.amount_in_minor_units,
            redirect_url: &request.redirect_url,
            redirect_mode: "REDIRECT",
            callback_url: &request.callback_url,
            payment_instrument: PaymentInstrument { kind: "PAY_PAGE" },
        };

        let encoded = serde_json::to_vec(&payload)
            .map(|json| general_purpose::STANDARD.encode(json))
            .map_err(|e| GatewayError::InvalidResponse(format!("encode payload: {}", e)))?;
        let checksum = self.checksum(&format!("{}{}", encoded, PAY_PATH));

        let timer = GATEWAY_REQUEST_DURATION
            .with_label_values(&["initiate"])
            .start_timer();

        let response = self
            .client
            .post(self.url(PAY_PATH))
            .headers(trace_headers())
            .header("Accept", "application/json")
            .header("X-VERIFY", checksum)
            .header("X-MERCHANT-ID", &self.config.merchant_id)
            .json(&PayRequestBody { request: encoded })
            .send()
            .await
            .map_err(transport_error)?;

        let status = response.status();
        let body = response.text().await.map_err(transport_error)?;
        timer.observe_duration();

        tracing::debug!(status = %status, "PhonePe pay response");

        if !status.is_success() {
            let error = http_error(status, &body);
            tracing::error!(error = %error, "PhonePe payment initiation failed");
            return Err(error);
        }

        let parsed: PhonePeResponse<PayData> = serde_json::from_str(&body)
            .map_err(|e| GatewayError::InvalidResponse(e.to_string()))?;

        let redirect_url = parsed
            .data
            .and_then(|d| d.instrument_response)
            .and_then(|i| i.redirect_info)
            .map(|r| r.url);

        match redirect_url {
            Some(redirect_url) if parsed.success => {
                tracing::info!("PhonePe payment initiated");
                Ok(InitiateResponse { redirect_url })
            }
            _ => Err(GatewayError::Rejected {
                code: parsed.code.unwrap_or_else(|| "UNKNOWN".to_string()),
                message: parsed
                    .message
                    .unwrap_or_else(|| "Payment initialization failed".to_string()),
            }),
        }
    }

    #[instrument(skip(self))]
    async fn query_status(
        &self,
        merchant_transaction_id: &str,
    ) -> Result<GatewayStatus, GatewayError> {
        if !self.is_configured() {
            return Err(GatewayError::NotConfigured(
                "PhonePe credentials not configured".to_string(),
            ));
        }

        let path = self.status_path(merchant_transaction_id);
        let checksum = self.checksum(&path);

        let timer = GATEWAY_REQUEST_DURATION
            .with_label_values(&["query_status"])
            .start_timer();

        let response = self
            .client
            .get(self.url(&path))
            .headers(trace_headers())
            .header("Content-Type", "application/json")
            .header("X-VERIFY", checksum)
            .header("X-MERCHANT-ID", &self.config.merchant_id)
            .send()
            .await
            .map_err(transport_error)?;

        let status = response.status();
        let body = response.text().await.map_err(transport_error)?;
        timer.observe_duration();

        if !status.is_success() {
            let error = http_error(status, &body);
            tracing::error!(error = %error, "PhonePe status API error");
            return Err(error);
        }

        let parsed: PhonePeResponse<StatusData> = serde_json::from_str(&body)
            .map_err(|e| GatewayError::InvalidResponse(e.to_string()))?;

        let outcome = interpret_status(parsed);
        tracing::debug!(state = ?outcome.state, "PhonePe status interpreted");
        Ok(outcome)
    }
}
