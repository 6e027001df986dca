use crate::payments::config::GatewayConfig;
use crate::payments::error::{PaymentError, PaymentResult};
use crate::payments::provider::PaymentGateway;
use crate::payments::types::{
    CreateOrderRequest, EventCategory, GatewayName, Money, NormalizedStatus, OrderResponse,
    PaymentMode, RefundRequest, RefundResponse, RefundStatus, StatusQuery, StatusResponse,
    WebhookEvent, WebhookSignature, WebhookVerificationResult,
};
use crate::payments::utils::{
    decode, from_minor_units, secure_eq, sign_hmac_sha256_hex, to_minor_units, HttpAuth,
    PaymentHttpClient, RequestBody,
};
use async_trait::async_trait;
use reqwest::Method;
use serde::Deserialize;
use serde_json::Value as JsonValue;
use std::time::Duration;
use tracing::info;

pub struct StripeGateway {
    config: GatewayConfig,
    http: PaymentHttpClient,
}

/// Parsed `Stripe-Signature` header: `t=<unix>,v1=<hex>[,v1=<hex>...]`.
#[derive(Debug, PartialEq, Eq)]
pub struct StripeSignatureHeader {
    pub timestamp: i64,
    pub signatures: Vec<String>,
}

impl StripeSignatureHeader {
    pub fn parse(header: &str) -> Option<Self> {
        let mut timestamp = None;
        let mut signatures = Vec::new();
        for part in header.split(',') {
            match part.trim().split_once('=') {
                Some(("t", value)) => timestamp = value.parse::<i64>().ok(),
                Some(("v1", value)) => signatures.push(value.to_string()),
                _ => {}
            }
        }
        match timestamp {
            Some(timestamp) if !signatures.is_empty() => Some(Self {
                timestamp,
                signatures,
            }),
            _ => None,
        }
    }
}

impl StripeGateway {
    pub fn new(config: GatewayConfig) -> PaymentResult<Self> {
        let http = PaymentHttpClient::new(
            GatewayName::Stripe,
            Duration::from_secs(config.timeout_secs),
            config.max_retries,
        )?;
        Ok(Self { config, http })
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}{}", self.config.base_url, path)
    }

    fn auth(&self) -> HttpAuth<'_> {
        HttpAuth::Bearer(&self.config.credentials.key_secret)
    }

    fn status_from_intent(status: &str) -> NormalizedStatus {
        match status {
            "succeeded" => NormalizedStatus::Success,
            "canceled" => NormalizedStatus::Failed,
            "processing" | "requires_payment_method" | "requires_confirmation"
            | "requires_action" | "requires_capture" => NormalizedStatus::Pending,
            _ => NormalizedStatus::Unknown,
        }
    }

    fn mode_from_object(object: &JsonValue) -> Option<PaymentMode> {
        if let Some(kind) = object
            .pointer("/payment_method_details/type")
            .and_then(|v| v.as_str())
        {
            return Some(PaymentMode::from_gateway_method(kind));
        }
        match object.get("payment_method_types").and_then(|v| v.as_array()) {
            Some(types) if types.len() == 1 => types[0].as_str().map(PaymentMode::from_gateway_method),
            _ => None,
        }
    }

    fn signed_payload(timestamp: i64, payload: &[u8]) -> Vec<u8> {
        let mut signed = format!("{}.", timestamp).into_bytes();
        signed.extend_from_slice(payload);
        signed
    }
}

#[async_trait]
impl PaymentGateway for StripeGateway {
    fn name(&self) -> GatewayName {
        GatewayName::Stripe
    }

    fn config(&self) -> &GatewayConfig {
        &self.config
    }

    async fn create_order(&self, request: CreateOrderRequest) -> PaymentResult<OrderResponse> {
        request.validate()?;
        let amount = to_minor_units(&request.amount)?;

        let mut form = vec![
            ("amount".to_string(), amount.to_string()),
            ("currency".to_string(), request.amount.currency.to_lowercase()),
            ("automatic_payment_methods[enabled]".to_string(), "true".to_string()),
            ("metadata[order_ref]".to_string(), request.order_ref.clone()),
        ];
        if let Some(email) = request.customer.email.as_deref().filter(|e| !e.is_empty()) {
            form.push(("receipt_email".to_string(), email.to_string()));
        }
        if let Some(JsonValue::Object(metadata)) = &request.metadata {
            for (key, value) in metadata {
                let text = match value {
                    JsonValue::String(s) => s.clone(),
                    other => other.to_string(),
                };
                form.push((format!("metadata[{}]", key), text));
            }
        }

        let raw = self
            .http
            .request_value(
                Method::POST,
                &self.endpoint("/v1/payment_intents"),
                self.auth(),
                RequestBody::Form(&form),
                &[("Idempotency-Key", request.order_ref.as_str())],
            )
            .await?;
        let intent: StripePaymentIntent = decode(GatewayName::Stripe, &raw)?;
        info!(
            order_ref = %request.order_ref,
            payment_intent = %intent.id,
            amount_minor = amount,
            "stripe payment intent created"
        );

        Ok(OrderResponse {
            gateway: GatewayName::Stripe,
            gateway_order_id: intent.id,
            payment_link: None,
            checkout_token: intent.client_secret,
            checkout_key: Some(self.config.credentials.key_id.clone()),
            raw_response: raw,
        })
    }

    async fn fetch_status(&self, query: StatusQuery) -> PaymentResult<StatusResponse> {
        let intent_id = query
            .gateway_payment_id
            .or(query.gateway_order_id)
            .filter(|v| !v.trim().is_empty())
            .ok_or_else(|| {
                PaymentError::validation("payment intent id is required", "gateway_order_id")
            })?;

        let raw = self
            .http
            .request_value(
                Method::GET,
                &self.endpoint(&format!("/v1/payment_intents/{}", intent_id)),
                self.auth(),
                RequestBody::Empty,
                &[],
            )
            .await?;
        let intent: StripePaymentIntent = decode(GatewayName::Stripe, &raw)?;

        Ok(StatusResponse {
            status: Self::status_from_intent(&intent.status),
            gateway_order_id: Some(intent.id.clone()),
            gateway_payment_id: Some(intent.id),
            payment_mode: Self::mode_from_object(&raw),
            amount: Some(Money::new(
                from_minor_units(intent.amount, &intent.currency),
                intent.currency,
            )),
            failure_reason: raw
                .pointer("/last_payment_error/message")
                .and_then(|v| v.as_str())
                .map(str::to_string),
            raw_response: raw,
        })
    }

    async fn initiate_refund(&self, request: RefundRequest) -> PaymentResult<RefundResponse> {
        request.amount.validate_positive("amount")?;
        let amount = to_minor_units(&request.amount)?;
        let form = vec![
            ("payment_intent".to_string(), request.gateway_payment_id.clone()),
            ("amount".to_string(), amount.to_string()),
            (
                "metadata[refund_reference]".to_string(),
                request.refund_reference.clone(),
            ),
        ];

        let raw = self
            .http
            .request_value(
                Method::POST,
                &self.endpoint("/v1/refunds"),
                self.auth(),
                RequestBody::Form(&form),
                &[("Idempotency-Key", request.refund_reference.as_str())],
            )
            .await?;
        let refund: StripeRefund = decode(GatewayName::Stripe, &raw)?;

        Ok(RefundResponse {
            refund_id: refund.id,
            status: RefundStatus::from_gateway(&refund.status),
            amount: Money::new(
                from_minor_units(refund.amount, &request.amount.currency),
                request.amount.currency.clone(),
            ),
            raw_response: raw,
        })
    }

    fn verify_webhook(
        &self,
        payload: &[u8],
        signature: &WebhookSignature,
    ) -> PaymentResult<WebhookVerificationResult> {
        let Some(header) = StripeSignatureHeader::parse(&signature.signature) else {
            return Ok(WebhookVerificationResult::from_check(
                false,
                "malformed stripe-signature header",
            ));
        };

        let tolerance = self.config.webhook_tolerance_secs;
        if tolerance > 0 && (chrono::Utc::now().timestamp() - header.timestamp).abs() > tolerance {
            return Ok(WebhookVerificationResult::from_check(
                false,
                "stripe signature timestamp outside tolerance",
            ));
        }

        let expected = sign_hmac_sha256_hex(
            &Self::signed_payload(header.timestamp, payload),
            self.config.webhook_secret(),
        );
        let valid = !self.config.webhook_secret().is_empty()
            && header
                .signatures
                .iter()
                .any(|candidate| secure_eq(expected.as_bytes(), candidate.as_bytes()));
        Ok(WebhookVerificationResult::from_check(
            valid,
            "invalid stripe signature",
        ))
    }

    fn parse_webhook_event(&self, payload: &[u8]) -> PaymentResult<WebhookEvent> {
        let parsed: JsonValue = serde_json::from_slice(payload).map_err(|e| {
            PaymentError::WebhookVerificationError {
                message: format!("invalid webhook JSON payload: {}", e),
            }
        })?;

        let event_type = parsed
            .get("type")
            .and_then(|v| v.as_str())
            .ok_or_else(|| PaymentError::WebhookVerificationError {
                message: "stripe event has no type".to_string(),
            })?
            .to_string();
        let object = parsed
            .pointer("/data/object")
            .cloned()
            .unwrap_or(JsonValue::Null);
        let str_field = |key: &str| object.get(key).and_then(|v| v.as_str()).map(str::to_string);

        let (category, status, intent_id) = match event_type.as_str() {
            "payment_intent.succeeded" => (
                EventCategory::Payment,
                NormalizedStatus::Success,
                str_field("id"),
            ),
            "payment_intent.payment_failed" | "payment_intent.canceled" => (
                EventCategory::Payment,
                NormalizedStatus::Failed,
                str_field("id"),
            ),
            "payment_intent.processing" | "payment_intent.created" => (
                EventCategory::Payment,
                NormalizedStatus::Pending,
                str_field("id"),
            ),
            "charge.refunded" => {
                let amount = object.get("amount").and_then(|v| v.as_i64());
                let refunded = object.get("amount_refunded").and_then(|v| v.as_i64());
                let status = match (amount, refunded) {
                    (Some(a), Some(r)) if r >= a => NormalizedStatus::Refunded,
                    _ => NormalizedStatus::Success,
                };
                (EventCategory::Refund, status, str_field("payment_intent"))
            }
            t if t.starts_with("payment_intent.") => (
                EventCategory::Payment,
                NormalizedStatus::Unknown,
                str_field("id"),
            ),
            t if t.starts_with("charge.") => (
                EventCategory::Payment,
                NormalizedStatus::Unknown,
                str_field("payment_intent"),
            ),
            _ => (EventCategory::Other, NormalizedStatus::Unknown, None),
        };

        Ok(WebhookEvent {
            gateway: GatewayName::Stripe,
            event_id: parsed.get("id").and_then(|v| v.as_str()).map(str::to_string),
            event_type,
            category,
            gateway_order_id: intent_id.clone(),
            gateway_payment_id: intent_id,
            status,
            payment_mode: Self::mode_from_object(&object),
            payload: parsed,
            received_at: chrono::Utc::now(),
        })
    }
}

#[derive(Debug, Deserialize)]
struct StripePaymentIntent {
    id: String,
    status: String,
    amount: i64,
    currency: String,
    #[serde(default)]
    client_secret: Option<String>,
}

#[derive(Debug, Deserialize)]
struct StripeRefund {
    id: String,
    amount: i64,
    status: String,
}
