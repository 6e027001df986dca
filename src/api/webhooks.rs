use axum::{
    body::Bytes,
    extract::{Path, State},
    http::{HeaderMap, StatusCode},
    response::IntoResponse,
    Json,
};
use tracing::{info, warn};

use crate::api::AppState;
use crate::payments::types::GatewayName;
use crate::services::webhook_processor::{WebhookHeaders, WebhookOutcome, WebhookProcessor};

fn header_value(headers: &HeaderMap, name: Option<&str>) -> Option<String> {
    name.and_then(|n| headers.get(n))
        .and_then(|v| v.to_str().ok())
        .map(|s| s.to_string())
}

fn webhook_headers(headers: &HeaderMap, gateway: Option<GatewayName>) -> WebhookHeaders {
    match gateway {
        Some(gateway) => WebhookHeaders {
            signature: header_value(headers, Some(gateway.signature_header())),
            timestamp: header_value(headers, gateway.timestamp_header()),
            event_id: header_value(headers, gateway.event_id_header()),
        },
        None => WebhookHeaders::default(),
    }
}

fn acknowledge(outcome: WebhookOutcome) -> impl IntoResponse {
    let mut body = serde_json::to_value(&outcome).unwrap_or_else(|_| serde_json::json!({}));
    if let Some(map) = body.as_object_mut() {
        map.insert("received".to_string(), serde_json::Value::Bool(true));
    }
    (StatusCode::OK, Json(body))
}

/// POST /payment/webhook/{gateway}
pub async fn handle_gateway_webhook(
    State(state): State<AppState>,
    Path(gateway): Path<String>,
    headers: HeaderMap,
    body: Bytes,
) -> impl IntoResponse {
    info!(gateway = %gateway, bytes = body.len(), "Received webhook");

    let parsed = gateway.parse::<GatewayName>().ok();
    let outcome = state
        .webhooks
        .process(&gateway, &webhook_headers(&headers, parsed), &body)
        .await;

    info!(gateway = %gateway, outcome = outcome.label(), "Webhook handled");
    acknowledge(outcome)
}

/// POST /payment/webhook, gateway inferred from the signature header
pub async fn handle_webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> impl IntoResponse {
    let Some(gateway) = WebhookProcessor::infer_gateway(headers.keys().map(|k| k.as_str())) else {
        warn!(bytes = body.len(), "Webhook without a recognisable signature header");
        return acknowledge(WebhookOutcome::UnknownGateway);
    };

    let outcome = state
        .webhooks
        .process(gateway.as_str(), &webhook_headers(&headers, Some(gateway)), &body)
        .await;

    info!(gateway = %gateway, outcome = outcome.label(), "Webhook handled");
    acknowledge(outcome)
}
