//! HTTP surface.

pub mod payments;
pub mod webhooks;

use crate::health::HealthChecker;
use crate::middleware::error::get_request_id_from_headers;
use crate::middleware::logging::{request_logging_middleware, UuidRequestId};
use crate::services::payment_orchestrator::{PaymentOrchestrator, RequestContext};
use crate::services::webhook_processor::WebhookProcessor;
use crate::workers::payment_intake::PaymentIntake;
use axum::{
    extract::{FromRequestParts, State},
    http::{header, request::Parts, StatusCode},
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use std::convert::Infallible;
use std::sync::Arc;
use tower::ServiceBuilder;
use tower_http::request_id::{PropagateRequestIdLayer, SetRequestIdLayer};

#[derive(Clone)]
pub struct AppState {
    pub orchestrator: Arc<PaymentOrchestrator>,
    pub webhooks: Arc<WebhookProcessor>,
    pub intake: PaymentIntake,
    pub health: HealthChecker,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/payment/initiate", post(payments::initiate_payment))
        .route(
            "/payment/initiate/async",
            post(payments::initiate_payment_async),
        )
        .route("/payment/verify", post(payments::verify_payment))
        .route(
            "/payment/gateways/select",
            get(payments::select_gateway),
        )
        .route(
            "/payment/booking/{booking_id}",
            get(payments::payments_for_booking),
        )
        .route("/payment/webhook", post(webhooks::handle_webhook))
        .route(
            "/payment/webhook/{gateway}",
            post(webhooks::handle_gateway_webhook),
        )
        .route("/payment/{id}", get(payments::payment_status))
        .route("/payment/{id}/refund", post(payments::refund_payment))
        .with_state(state)
        .layer(
            ServiceBuilder::new()
                .layer(SetRequestIdLayer::x_request_id(UuidRequestId))
                .layer(axum::middleware::from_fn(request_logging_middleware))
                .layer(PropagateRequestIdLayer::x_request_id()),
        )
}

async fn health(State(state): State<AppState>) -> impl IntoResponse {
    let status = state.health.check_health().await;
    let code = if matches!(status.status, crate::health::HealthState::Unhealthy) {
        StatusCode::SERVICE_UNAVAILABLE
    } else {
        StatusCode::OK
    };
    (code, Json(status))
}

impl<S> FromRequestParts<S> for RequestContext
where
    S: Send + Sync,
{
    type Rejection = Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let auth_token = parts
            .headers
            .get(header::AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.strip_prefix("Bearer ").or_else(|| v.strip_prefix("bearer ")))
            .map(|t| t.trim().to_string())
            .filter(|t| !t.is_empty());

        let actor = parts
            .headers
            .get("x-user-id")
            .and_then(|v| v.to_str().ok())
            .filter(|v| !v.trim().is_empty())
            .map(|v| format!("user:{}", v.trim()))
            .unwrap_or_else(|| "api".to_string());

        Ok(RequestContext {
            auth_token,
            actor,
            request_id: get_request_id_from_headers(&parts.headers),
        })
    }
}
