//! Inbound gateway webhooks.
//!
//! Every delivery is acknowledged; the outcome only decides what gets logged and
//! whether the stored payment moves.

use crate::database::repository::PaymentStore;
use crate::payments::factory::GatewayRegistry;
use crate::payments::types::{GatewayName, WebhookSignature};
use crate::payments::utils::payload_digest;
use crate::services::notification::PaymentNotifier;
use crate::services::payment_state::{GatewayOutcome, PaymentReconciler, ReconcileOutcome};
use serde::Serialize;
use std::sync::Arc;
use tracing::{error, info, warn};
use uuid::Uuid;

/// Header values a webhook delivery may carry
#[derive(Debug, Clone, Default)]
pub struct WebhookHeaders {
    pub signature: Option<String>,
    pub timestamp: Option<String>,
    pub event_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum WebhookOutcome {
    Processed { payment_id: Uuid, status: String },
    Duplicate { payment_id: Uuid },
    Logged { payment_id: Uuid },
    Rejected { payment_id: Uuid },
    UnknownGateway,
    InvalidSignature,
    Unparseable,
    PaymentNotFound,
    Failed,
}

impl WebhookOutcome {
    pub fn label(&self) -> &'static str {
        match self {
            WebhookOutcome::Processed { .. } => "processed",
            WebhookOutcome::Duplicate { .. } => "duplicate",
            WebhookOutcome::Logged { .. } => "logged",
            WebhookOutcome::Rejected { .. } => "rejected",
            WebhookOutcome::UnknownGateway => "unknown_gateway",
            WebhookOutcome::InvalidSignature => "invalid_signature",
            WebhookOutcome::Unparseable => "unparseable",
            WebhookOutcome::PaymentNotFound => "payment_not_found",
            WebhookOutcome::Failed => "failed",
        }
    }
}

pub struct WebhookProcessor {
    gateways: Arc<GatewayRegistry>,
    store: Arc<dyn PaymentStore>,
    reconciler: PaymentReconciler,
    notifier: PaymentNotifier,
}

impl WebhookProcessor {
    pub fn new(
        gateways: Arc<GatewayRegistry>,
        store: Arc<dyn PaymentStore>,
        reconciler: PaymentReconciler,
        notifier: PaymentNotifier,
    ) -> Self {
        Self {
            gateways,
            store,
            reconciler,
            notifier,
        }
    }

    /// Infers the gateway from whichever signature header is present.
    pub fn infer_gateway<'a>(header_names: impl IntoIterator<Item = &'a str>) -> Option<GatewayName> {
        let names: Vec<String> = header_names
            .into_iter()
            .map(|n| n.to_ascii_lowercase())
            .collect();
        GatewayName::ALL
            .into_iter()
            .find(|gateway| names.iter().any(|n| n == gateway.signature_header()))
    }

    pub async fn process(
        &self,
        gateway_name: &str,
        headers: &WebhookHeaders,
        body: &[u8],
    ) -> WebhookOutcome {
        let Some(gateway) = self.gateways.resolve(gateway_name) else {
            warn!(gateway = %gateway_name, "webhook for unknown gateway discarded");
            return WebhookOutcome::UnknownGateway;
        };
        let name = gateway.name();

        let Some(signature) = headers.signature.as_deref().filter(|s| !s.is_empty()) else {
            warn!(gateway = %name, "webhook without signature discarded");
            return WebhookOutcome::InvalidSignature;
        };
        let mut signature = WebhookSignature::new(signature);
        if let Some(timestamp) = headers.timestamp.as_deref() {
            signature = signature.with_timestamp(timestamp);
        }

        match gateway.verify_webhook(body, &signature) {
            Ok(result) if result.valid => {}
            Ok(result) => {
                warn!(gateway = %name, reason = ?result.reason, "webhook signature rejected");
                return WebhookOutcome::InvalidSignature;
            }
            Err(e) => {
                warn!(gateway = %name, error = %e, "webhook signature check failed");
                return WebhookOutcome::InvalidSignature;
            }
        }

        let event = match gateway.parse_webhook_event(body) {
            Ok(event) => event,
            Err(e) => {
                warn!(gateway = %name, error = %e, "webhook payload could not be parsed");
                return WebhookOutcome::Unparseable;
            }
        };

        let event_id = headers
            .event_id
            .clone()
            .filter(|id| !id.is_empty())
            .or_else(|| event.event_id.clone())
            .unwrap_or_else(|| payload_digest(body));

        let Some(order_id) = event.gateway_order_id.as_deref() else {
            info!(
                gateway = %name,
                event_id = %event_id,
                event_type = %event.event_type,
                "webhook carries no order id; nothing to update"
            );
            return WebhookOutcome::PaymentNotFound;
        };

        let payment = match self.store.find_by_gateway_order_id(name, order_id).await {
            Ok(Some(payment)) => payment,
            Ok(None) => {
                info!(
                    gateway = %name,
                    gateway_order_id = %order_id,
                    event_id = %event_id,
                    "webhook for unknown order acknowledged"
                );
                return WebhookOutcome::PaymentNotFound;
            }
            Err(e) => {
                error!(gateway = %name, gateway_order_id = %order_id, error = %e, "payment lookup failed");
                return WebhookOutcome::Failed;
            }
        };

        let actor = format!("webhook:{}", name);
        let outcome = GatewayOutcome {
            event_id: Some(event_id.clone()),
            event: event.event_type.clone(),
            status: event.status,
            gateway_payment_id: event.gateway_payment_id.clone(),
            payment_mode: event.payment_mode,
            failure_reason: None,
            payload: event.payload.clone(),
        };

        match self.reconciler.apply(&payment, outcome, &actor).await {
            Ok(ReconcileOutcome::Transitioned(updated)) => {
                info!(
                    payment_id = %updated.id,
                    gateway = %name,
                    event_id = %event_id,
                    status = %updated.status,
                    "webhook applied"
                );
                let status = updated.status.to_string();
                let payment_id = updated.id;
                self.notifier.spawn(updated, None);
                WebhookOutcome::Processed { payment_id, status }
            }
            Ok(ReconcileOutcome::Duplicate(p)) => {
                info!(payment_id = %p.id, event_id = %event_id, "duplicate webhook skipped");
                WebhookOutcome::Duplicate { payment_id: p.id }
            }
            Ok(ReconcileOutcome::Logged(p)) => WebhookOutcome::Logged { payment_id: p.id },
            Ok(ReconcileOutcome::Rejected { payment, .. }) => WebhookOutcome::Rejected {
                payment_id: payment.id,
            },
            Err(e) => {
                error!(
                    payment_id = %payment.id,
                    event_id = %event_id,
                    error = %e,
                    "webhook could not be applied"
                );
                WebhookOutcome::Failed
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn gateway_is_inferred_from_signature_header() {
        assert_eq!(
            WebhookProcessor::infer_gateway(["content-type", "X-Razorpay-Signature"]),
            Some(GatewayName::Razorpay)
        );
        assert_eq!(
            WebhookProcessor::infer_gateway(["stripe-signature"]),
            Some(GatewayName::Stripe)
        );
        assert_eq!(
            WebhookProcessor::infer_gateway(["x-webhook-signature", "x-webhook-timestamp"]),
            Some(GatewayName::Cashfree)
        );
        assert_eq!(WebhookProcessor::infer_gateway(["content-type"]), None);
    }

    #[test]
    fn outcome_serializes_with_tag() {
        let body = serde_json::to_value(WebhookOutcome::UnknownGateway).unwrap();
        assert_eq!(body, serde_json::json!({"outcome": "unknown_gateway"}));
    }
}
