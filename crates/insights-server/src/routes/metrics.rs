//! `GET /metrics`: Prometheus text exposition of the process-wide
//! registry (C11).

use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use insights_core::metrics::METRICS;
use prometheus::{Encoder, TextEncoder};

pub async fn metrics() -> Response {
    let encoder = TextEncoder::new();
    let families = METRICS.registry.gather();
    let mut buffer = Vec::new();
    if let Err(err) = encoder.encode(&families, &mut buffer) {
        tracing::error!(error = %err, "failed to encode metrics");
        return (StatusCode::INTERNAL_SERVER_ERROR, "failed to encode metrics").into_response();
    }
    (
        StatusCode::OK,
        [(header::CONTENT_TYPE, encoder.format_type().to_string())],
        buffer,
    )
        .into_response()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn metrics_response_is_prometheus_text() {
        let response = metrics().await;
        assert_eq!(response.status(), StatusCode::OK);
        let content_type = response
            .headers()
            .get(header::CONTENT_TYPE)
            .expect("content-type header")
            .to_str()
            .unwrap()
            .to_string();
        assert!(content_type.starts_with("text/plain"));
    }
}
