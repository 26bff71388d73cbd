//! W3C trace context for outbound HTTP calls (payment gateway, notification
//! service), so their spans join the request that triggered them.

use opentelemetry::trace::TraceContextExt;
use reqwest::header::{HeaderMap, HeaderValue};
use tracing::Span;
use tracing_opentelemetry::OpenTelemetrySpanExt;

pub const TRACEPARENT_HEADER: &str = "traceparent";

/// Headers describing the current span, empty when no OpenTelemetry context
/// is active.
pub fn trace_headers() -> HeaderMap {
    let mut headers = HeaderMap::new();

    let context = Span::current().context();
    let otel_span = context.span();
    let span_context = otel_span.span_context();

    if span_context.is_valid() {
        let traceparent = format!(
            "00-{}-{}-{:02x}",
            span_context.trace_id(),
            span_context.span_id(),
            span_context.trace_flags().to_u8()
        );
        if let Ok(value) = HeaderValue::from_str(&traceparent) {
            headers.insert(TRACEPARENT_HEADER, value);
        }
    }

    headers
}
