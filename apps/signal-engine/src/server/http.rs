//! Webhook endpoint implementation.
//!
//! `POST /webhook` is the engine's only driving interface: the gate
//! decides admission, privileged alert ids force workflows independent of
//! the action field, plain price updates refresh the price state, and
//! buy/sell actions run the corresponding workflow. Per-account workflow
//! failures are logged, not surfaced; the response communicates coarse
//! success/failure only.

use std::sync::Arc;

use axum::http::{HeaderValue, Method, StatusCode, header};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router, extract::State};
use chrono::Utc;
use rust_decimal::Decimal;
use serde::Serialize;
use tower_http::cors::{AllowOrigin, CorsLayer};

use crate::gateway::GatewayClient;
use crate::models::{SignalAction, WebhookPayload};
use crate::signal::{Admission, PriceState, SignalGate};
use crate::workflow::WorkflowEngine;

/// Shared state for the HTTP server.
pub struct AppState<G> {
    engine: Arc<WorkflowEngine<G>>,
    gate: Arc<SignalGate>,
    prices: Arc<PriceState>,
}

impl<G> AppState<G> {
    /// Bundle the webhook dependencies.
    #[must_use]
    pub const fn new(
        engine: Arc<WorkflowEngine<G>>,
        gate: Arc<SignalGate>,
        prices: Arc<PriceState>,
    ) -> Self {
        Self {
            engine,
            gate,
            prices,
        }
    }
}

impl<G> Clone for AppState<G> {
    fn clone(&self) -> Self {
        Self {
            engine: Arc::clone(&self.engine),
            gate: Arc::clone(&self.gate),
            prices: Arc::clone(&self.prices),
        }
    }
}

/// Create the Axum router with all endpoints.
#[must_use]
pub fn create_router<G: GatewayClient>(state: AppState<G>, allowed_origins: &[String]) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route("/webhook", post(webhook::<G>))
        .layer(cors_layer(allowed_origins))
        .with_state(state)
}

fn cors_layer(allowed_origins: &[String]) -> CorsLayer {
    let origins: Vec<HeaderValue> = allowed_origins
        .iter()
        .filter_map(|origin| origin.parse().ok())
        .collect();
    CorsLayer::new()
        .allow_origin(AllowOrigin::list(origins))
        .allow_methods([Method::GET, Method::POST])
        .allow_headers([header::CONTENT_TYPE])
}

/// Health check endpoint.
async fn health_check() -> &'static str {
    "OK"
}

/// Acknowledgment body for processed signals.
#[derive(Debug, Serialize)]
pub struct WebhookResponse {
    /// Coarse outcome.
    pub status: String,
    /// Human-readable detail.
    pub detail: String,
}

fn ok(detail: &str) -> Json<WebhookResponse> {
    Json(WebhookResponse {
        status: "ok".to_string(),
        detail: detail.to_string(),
    })
}

/// Error response with an HTTP status.
#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    message: String,
}

impl ApiError {
    /// Client error: invalid price or unrecognized action.
    #[must_use]
    pub fn bad_request(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            message: message.into(),
        }
    }

    /// The signal gate rejected the signal.
    #[must_use]
    pub fn locked(reason: impl Into<String>) -> Self {
        Self {
            status: StatusCode::TOO_MANY_REQUESTS,
            message: reason.into(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = Json(serde_json::json!({ "error": self.message }));
        (self.status, body).into_response()
    }
}

/// Webhook endpoint.
async fn webhook<G: GatewayClient>(
    State(state): State<AppState<G>>,
    Json(payload): Json<WebhookPayload>,
) -> Result<Json<WebhookResponse>, ApiError> {
    tracing::info!(
        action = ?payload.action,
        price = ?payload.price,
        alert_id = ?payload.alert_id,
        received_at = %Utc::now(),
        "webhook signal received"
    );

    match state.gate.admit(&payload) {
        Admission::Rejected { reason } => {
            tracing::info!(reason = %reason, "signal rejected: lock held");
            return Err(ApiError::locked(reason));
        }
        Admission::Admitted | Admission::Bypassed => {}
    }

    // Privileged alerts trigger workflows independent of the action field.
    if payload.action.as_deref() != Some("buy") && state.gate.is_open_alert(&payload) {
        let price = state.prices.marked_up_buy_price();
        tracing::info!(alert_id = ?payload.alert_id, price = %price, "privileged open-position alert");
        state.engine.open_if_flat(price).await;
        return Ok(ok("open-position pass processed"));
    }
    if payload.action.as_deref() != Some("sell") && state.gate.is_liquidate_alert(&payload) {
        tracing::info!(alert_id = ?payload.alert_id, "privileged liquidation alert");
        state.engine.liquidate_all().await;
        return Ok(ok("liquidation processed"));
    }

    if let Some(price) = payload.price {
        state.prices.update(price);
    }

    let reference_price = state.prices.reference();
    if reference_price <= Decimal::ZERO {
        tracing::warn!(price = %reference_price, "cannot place orders with invalid price");
        return Err(ApiError::bad_request("invalid stock price"));
    }

    match payload.parsed_action() {
        Some(Ok(SignalAction::Buy)) => {
            state.engine.open_all(reference_price).await;
            Ok(ok("buy signal processed"))
        }
        Some(Ok(SignalAction::Sell)) => {
            state.engine.liquidate_all().await;
            Ok(ok("sell signal processed"))
        }
        Some(Err(e)) => {
            tracing::info!(action = ?payload.action, "unknown action");
            Err(ApiError::bad_request(e.to_string()))
        }
        None => Err(ApiError::bad_request("unknown action")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cors_layer_ignores_malformed_origins() {
        // Parse failures drop the origin instead of panicking at startup.
        let _ = cors_layer(&["https://ok.example".to_string(), "\u{0}bad".to_string()]);
    }

    #[test]
    fn api_error_statuses() {
        assert_eq!(
            ApiError::bad_request("x").status,
            StatusCode::BAD_REQUEST
        );
        assert_eq!(ApiError::locked("y").status, StatusCode::TOO_MANY_REQUESTS);
    }
}
