//! Caller identity extracted from request headers.
//!
//! `X-User-ID` is set by the gateway in front of this service after it has
//! authenticated the user. Authentication itself happens upstream.

use axum::async_trait;
use axum::extract::FromRequestParts;
use axum::http::request::Parts;
use service_core::error::AppError;

pub const USER_ID_HEADER: &str = "X-User-ID";

/// The authenticated user making the request (payer or cashier).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PayerContext {
    pub user_id: String,
}

#[async_trait]
impl<S> FromRequestParts<S> for PayerContext
where
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let user_id = parts
            .headers
            .get(USER_ID_HEADER)
            .and_then(|v| v.to_str().ok())
            .map(str::trim)
            .filter(|v| !v.is_empty())
            .ok_or_else(|| {
                AppError::Unauthorized(anyhow::anyhow!("Missing {} header", USER_ID_HEADER))
            })?;

        tracing::Span::current().record("user_id", user_id);

        Ok(PayerContext {
            user_id: user_id.to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::Request;

    async fn extract(request: Request<()>) -> Result<PayerContext, AppError> {
        let (mut parts, _) = request.into_parts();
        PayerContext::from_request_parts(&mut parts, &()).await
    }

    #[tokio::test]
    async fn reads_user_from_header() {
        let request = Request::builder()
            .header(USER_ID_HEADER, "parent-42")
            .body(())
            .unwrap();
        assert_eq!(extract(request).await.unwrap().user_id, "parent-42");
    }

    #[tokio::test]
    async fn rejects_missing_or_blank_header() {
        let missing = Request::builder().body(()).unwrap();
        assert!(matches!(extract(missing).await, Err(AppError::Unauthorized(_))));

        let blank = Request::builder()
            .header(USER_ID_HEADER, "  ")
            .body(())
            .unwrap();
        assert!(matches!(extract(blank).await, Err(AppError::Unauthorized(_))));
    }
}
