//! HTTP transport adapter.
//!
//! A deliberately thin axum layer: one POST route that reframes the HTTP
//! request as a [`WebhookRequest`], hands it to the [`Pipeline`], and
//! frames the [`WebhookResponse`] back out. No pipeline logic lives here —
//! the same pipeline runs unchanged behind any transport that can produce
//! a header map and a body.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Context;
use axum::body::Bytes;
use axum::extract::State;
use axum::http::header::CONTENT_TYPE;
use axum::http::{HeaderMap, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::post;
use axum::Router;
use tracing::{info, warn};

use crate::webhook::{Pipeline, WebhookRequest, WebhookResponse};

/// Build the single-route webhook router.
pub fn router(pipeline: Arc<Pipeline>) -> Router {
    Router::new()
        .route("/", post(handle_webhook))
        .with_state(pipeline)
}

/// Serve the pipeline on `0.0.0.0:{port}` until interrupted.
///
/// # Errors
///
/// Returns an error when the listener cannot bind or the server fails.
pub async fn serve(pipeline: Arc<Pipeline>, port: u16) -> anyhow::Result<()> {
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;
    info!(%addr, "listening for Slack events");

    axum::serve(listener, router(pipeline))
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("webhook server failed")
}

async fn shutdown_signal() {
    match tokio::signal::ctrl_c().await {
        Ok(()) => info!("shutdown signal received"),
        Err(e) => warn!(error = %e, "failed to listen for shutdown signal"),
    }
}

async fn handle_webhook(
    State(pipeline): State<Arc<Pipeline>>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    // Signing happens over exact bytes; reject rather than lossily convert.
    let Ok(body) = String::from_utf8(body.to_vec()) else {
        return (StatusCode::BAD_REQUEST, "request body is not valid UTF-8").into_response();
    };

    let headers: HashMap<String, String> = headers
        .iter()
        .filter_map(|(name, value)| {
            value
                .to_str()
                .ok()
                .map(|v| (name.as_str().to_owned(), v.to_owned()))
        })
        .collect();

    let request = WebhookRequest {
        headers,
        body,
        is_base64: false,
    };
    into_response(pipeline.handle(&request).await)
}

fn into_response(reply: WebhookResponse) -> Response {
    let status = StatusCode::from_u16(reply.status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    let mut response = (status, reply.body).into_response();
    if let Some(content_type) = reply.content_type {
        if let Ok(value) = HeaderValue::from_str(&content_type) {
            response.headers_mut().insert(CONTENT_TYPE, value);
        }
    }
    response
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn into_response_maps_status_and_content_type() {
        let reply = WebhookResponse {
            status: 200,
            body: "abc123".to_owned(),
            content_type: Some("text".to_owned()),
        };
        let response = into_response(reply);

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            response.headers().get(CONTENT_TYPE).map(|v| v.as_bytes()),
            Some(b"text".as_slice())
        );
    }

    #[test]
    fn into_response_defaults_content_type_to_axum() {
        let reply = WebhookResponse {
            status: 401,
            body: "no".to_owned(),
            content_type: None,
        };
        let response = into_response(reply);
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[test]
    fn invalid_status_code_falls_back_to_500() {
        let reply = WebhookResponse {
            status: 9999,
            body: String::new(),
            content_type: None,
        };
        let response = into_response(reply);
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }
}
