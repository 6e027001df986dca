use crate::payments::config::GatewayConfig;
use crate::payments::error::{PaymentError, PaymentResult};
use crate::payments::provider::PaymentGateway;
use crate::payments::types::{
    CreateOrderRequest, EventCategory, GatewayName, Money, NormalizedStatus, OrderResponse,
    PaymentMode, RefundRequest, RefundResponse, RefundStatus, StatusQuery, StatusResponse,
    WebhookEvent, WebhookSignature, WebhookVerificationResult,
};
use crate::payments::utils::{
    decode, from_minor_units, to_minor_units, verify_hmac_sha256_hex, HttpAuth,
    PaymentHttpClient, RequestBody,
};
use async_trait::async_trait;
use reqwest::Method;
use serde::Deserialize;
use serde_json::{Map, Value as JsonValue};
use std::time::Duration;
use tracing::info;

pub struct RazorpayGateway {
    config: GatewayConfig,
    http: PaymentHttpClient,
}

impl RazorpayGateway {
    pub fn new(config: GatewayConfig) -> PaymentResult<Self> {
        let http = PaymentHttpClient::new(
            GatewayName::Razorpay,
            Duration::from_secs(config.timeout_secs),
            config.max_retries,
        )?;
        Ok(Self { config, http })
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}{}", self.config.base_url, path)
    }

    fn auth(&self) -> HttpAuth<'_> {
        HttpAuth::Basic {
            username: &self.config.credentials.key_id,
            password: &self.config.credentials.key_secret,
        }
    }

    /// Razorpay notes are a flat string map.
    fn notes(request: &CreateOrderRequest) -> JsonValue {
        let mut notes = Map::new();
        notes.insert(
            "order_ref".to_string(),
            JsonValue::String(request.order_ref.clone()),
        );
        if let Some(JsonValue::Object(metadata)) = &request.metadata {
            for (key, value) in metadata.iter().take(14) {
                let text = match value {
                    JsonValue::String(s) => s.clone(),
                    other => other.to_string(),
                };
                notes.insert(key.clone(), JsonValue::String(text));
            }
        }
        JsonValue::Object(notes)
    }

    fn status_from_entity(status: &str) -> NormalizedStatus {
        match status {
            "captured" => NormalizedStatus::Success,
            "authorized" | "created" => NormalizedStatus::Pending,
            "failed" => NormalizedStatus::Failed,
            "refunded" => NormalizedStatus::Refunded,
            _ => NormalizedStatus::Unknown,
        }
    }

    fn status_response(payment: RazorpayPayment, raw: JsonValue) -> StatusResponse {
        StatusResponse {
            status: Self::status_from_entity(&payment.status),
            gateway_order_id: payment.order_id,
            gateway_payment_id: Some(payment.id),
            payment_mode: payment.method.as_deref().map(PaymentMode::from_gateway_method),
            amount: Some(Money::new(
                from_minor_units(payment.amount, &payment.currency),
                payment.currency,
            )),
            failure_reason: payment.error_description,
            raw_response: raw,
        }
    }
}

#[async_trait]
impl PaymentGateway for RazorpayGateway {
    fn name(&self) -> GatewayName {
        GatewayName::Razorpay
    }

    fn config(&self) -> &GatewayConfig {
        &self.config
    }

    async fn create_order(&self, request: CreateOrderRequest) -> PaymentResult<OrderResponse> {
        request.validate()?;
        let amount = to_minor_units(&request.amount)?;

        let payload = serde_json::json!({
            "amount": amount,
            "currency": request.amount.currency,
            "receipt": request.order_ref,
            "notes": Self::notes(&request),
        });

        let raw = self
            .http
            .request_value(
                Method::POST,
                &self.endpoint("/v1/orders"),
                self.auth(),
                RequestBody::Json(&payload),
                &[],
            )
            .await?;
        let order: RazorpayOrder = decode(GatewayName::Razorpay, &raw)?;
        info!(
            order_ref = %request.order_ref,
            gateway_order_id = %order.id,
            amount_minor = amount,
            "razorpay order created"
        );

        Ok(OrderResponse {
            gateway: GatewayName::Razorpay,
            gateway_order_id: order.id,
            payment_link: None,
            checkout_token: None,
            checkout_key: Some(self.config.credentials.key_id.clone()),
            raw_response: raw,
        })
    }

    async fn fetch_status(&self, query: StatusQuery) -> PaymentResult<StatusResponse> {
        if let Some(payment_id) = query.gateway_payment_id.as_deref().filter(|v| !v.is_empty()) {
            let raw = self
                .http
                .request_value(
                    Method::GET,
                    &self.endpoint(&format!("/v1/payments/{}", payment_id)),
                    self.auth(),
                    RequestBody::Empty,
                    &[],
                )
                .await?;
            let payment: RazorpayPayment = decode(GatewayName::Razorpay, &raw)?;
            return Ok(Self::status_response(payment, raw));
        }

        let order_id = query
            .gateway_order_id
            .filter(|v| !v.trim().is_empty())
            .ok_or_else(|| {
                PaymentError::validation(
                    "gateway_order_id or gateway_payment_id is required",
                    "gateway_order_id",
                )
            })?;
        let raw = self
            .http
            .request_value(
                Method::GET,
                &self.endpoint(&format!("/v1/orders/{}/payments", order_id)),
                self.auth(),
                RequestBody::Empty,
                &[],
            )
            .await?;
        let collection: RazorpayCollection = decode(GatewayName::Razorpay, &raw)?;

        let chosen = collection
            .items
            .iter()
            .position(|p| p.status == "captured")
            .or_else(|| collection.items.iter().position(|p| p.status == "refunded"))
            .or_else(|| collection.items.iter().position(|p| p.status == "authorized"))
            .or(if collection.items.is_empty() { None } else { Some(0) });

        match chosen {
            Some(index) => {
                let payment = collection.items[index].clone();
                Ok(Self::status_response(payment, raw))
            }
            None => Ok(StatusResponse {
                status: NormalizedStatus::Pending,
                gateway_order_id: Some(order_id),
                gateway_payment_id: None,
                payment_mode: None,
                amount: None,
                failure_reason: None,
                raw_response: raw,
            }),
        }
    }

    async fn initiate_refund(&self, request: RefundRequest) -> PaymentResult<RefundResponse> {
        request.amount.validate_positive("amount")?;
        let amount = to_minor_units(&request.amount)?;
        let payload = serde_json::json!({
            "amount": amount,
            "receipt": request.refund_reference,
        });

        let raw = self
            .http
            .request_value(
                Method::POST,
                &self.endpoint(&format!(
                    "/v1/payments/{}/refund",
                    request.gateway_payment_id
                )),
                self.auth(),
                RequestBody::Json(&payload),
                &[],
            )
            .await?;
        let refund: RazorpayRefund = decode(GatewayName::Razorpay, &raw)?;

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
        let valid =
            verify_hmac_sha256_hex(payload, self.config.webhook_secret(), &signature.signature);
        Ok(WebhookVerificationResult::from_check(
            valid,
            "invalid razorpay signature",
        ))
    }

    /// Hex HMAC-SHA256 of `order_id|payment_id` keyed with the API secret.
    fn verify_checkout_signature(
        &self,
        order_id: &str,
        payment_id: &str,
        signature: &str,
    ) -> PaymentResult<bool> {
        let message = format!("{}|{}", order_id, payment_id);
        Ok(verify_hmac_sha256_hex(
            message.as_bytes(),
            &self.config.credentials.key_secret,
            signature,
        ))
    }

    fn parse_webhook_event(&self, payload: &[u8]) -> PaymentResult<WebhookEvent> {
        let parsed: JsonValue = serde_json::from_slice(payload).map_err(|e| {
            PaymentError::WebhookVerificationError {
                message: format!("invalid webhook JSON payload: {}", e),
            }
        })?;

        let event_type = parsed
            .get("event")
            .and_then(|v| v.as_str())
            .ok_or_else(|| PaymentError::WebhookVerificationError {
                message: "razorpay webhook has no event type".to_string(),
            })?
            .to_string();
        let payment = parsed.pointer("/payload/payment/entity");
        let order = parsed.pointer("/payload/order/entity");
        let refund = parsed.pointer("/payload/refund/entity");
        let str_field = |entity: Option<&JsonValue>, key: &str| {
            entity
                .and_then(|e| e.get(key))
                .and_then(|v| v.as_str())
                .map(str::to_string)
        };

        let category = match event_type.split('.').next().unwrap_or_default() {
            "payment" => EventCategory::Payment,
            "order" => EventCategory::Order,
            "refund" => EventCategory::Refund,
            _ => EventCategory::Other,
        };

        let status = match event_type.as_str() {
            "order.paid" => NormalizedStatus::Success,
            _ if category == EventCategory::Refund => match str_field(payment, "status") {
                Some(s) if s == "refunded" => NormalizedStatus::Refunded,
                _ => NormalizedStatus::Unknown,
            },
            _ => str_field(payment, "status")
                .map(|s| Self::status_from_entity(&s))
                .unwrap_or(NormalizedStatus::Unknown),
        };

        let gateway_order_id = str_field(payment, "order_id").or_else(|| str_field(order, "id"));
        let gateway_payment_id =
            str_field(payment, "id").or_else(|| str_field(refund, "payment_id"));

        Ok(WebhookEvent {
            gateway: GatewayName::Razorpay,
            event_id: None,
            event_type,
            category,
            gateway_order_id,
            gateway_payment_id,
            status,
            payment_mode: str_field(payment, "method")
                .map(|m| PaymentMode::from_gateway_method(&m)),
            payload: parsed,
            received_at: chrono::Utc::now(),
        })
    }
}

#[derive(Debug, Deserialize)]
struct RazorpayOrder {
    id: String,
}

#[derive(Debug, Clone, Deserialize)]
struct RazorpayPayment {
    id: String,
    #[serde(default)]
    order_id: Option<String>,
    status: String,
    amount: i64,
    currency: String,
    #[serde(default)]
    method: Option<String>,
    #[serde(default)]
    error_description: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RazorpayCollection {
    #[serde(default)]
    items: Vec<RazorpayPayment>,
}

#[derive(Debug, Deserialize)]
struct RazorpayRefund {
    id: String,
    amount: i64,
    status: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::payments::config::GatewayCredentials;
    use crate::payments::utils::sign_hmac_sha256_hex;

    fn gateway() -> RazorpayGateway {
        let mut config = GatewayConfig::with_defaults(
            GatewayName::Razorpay,
            GatewayCredentials {
                key_id: "rzp_test_key".to_string(),
                key_secret: "rzp_test_secret".to_string(),
                webhook_secret: Some("rzp_whsec".to_string()),
            },
        );
        config.max_retries = 0;
        RazorpayGateway::new(config).expect("gateway init should succeed")
    }

    const CAPTURED: &str = r#"{"entity":"event","event":"payment.captured","contains":["payment"],"payload":{"payment":{"entity":{"id":"pay_123","order_id":"order_abc","status":"captured","method":"upi","amount":100000,"currency":"INR"}}},"created_at":1700000000}"#;

    #[test]
    fn webhook_signature_is_checked_over_raw_body() {
        let gateway = gateway();
        let signature = sign_hmac_sha256_hex(CAPTURED.as_bytes(), "rzp_whsec");
        let ok = gateway
            .verify_webhook(CAPTURED.as_bytes(), &WebhookSignature::new(signature.clone()))
            .unwrap();
        assert!(ok.valid);

        let tampered = CAPTURED.replace("100000", "100001");
        let bad = gateway
            .verify_webhook(tampered.as_bytes(), &WebhookSignature::new(signature))
            .unwrap();
        assert!(!bad.valid);
        assert_eq!(bad.reason.as_deref(), Some("invalid razorpay signature"));
    }

    #[test]
    fn checkout_signature_uses_order_and_payment_ids() {
        let gateway = gateway();
        let signature = sign_hmac_sha256_hex(b"order_abc|pay_123", "rzp_test_secret");
        assert!(gateway
            .verify_checkout_signature("order_abc", "pay_123", &signature)
            .unwrap());
        assert!(!gateway
            .verify_checkout_signature("order_abc", "pay_124", &signature)
            .unwrap());
        assert!(!gateway
            .verify_checkout_signature("order_abc", "pay_123", "deadbeef")
            .unwrap());
    }

    #[test]
    fn payment_captured_maps_to_success() {
        let event = gateway().parse_webhook_event(CAPTURED.as_bytes()).unwrap();
        assert_eq!(event.category, EventCategory::Payment);
        assert_eq!(event.status, NormalizedStatus::Success);
        assert_eq!(event.gateway_order_id.as_deref(), Some("order_abc"));
        assert_eq!(event.gateway_payment_id.as_deref(), Some("pay_123"));
        assert_eq!(event.payment_mode, Some(PaymentMode::Upi));
    }

    #[test]
    fn native_statuses_map_to_normalized_vocabulary() {
        let gateway = gateway();
        for (native, expected) in [
            ("authorized", NormalizedStatus::Pending),
            ("failed", NormalizedStatus::Failed),
            ("captured", NormalizedStatus::Success),
        ] {
            let body = CAPTURED.replace("\"captured\"", &format!("\"{}\"", native));
            let event = gateway.parse_webhook_event(body.as_bytes()).unwrap();
            assert_eq!(event.status, expected, "status {}", native);
        }
    }

    #[test]
    fn order_paid_reads_order_entity() {
        let body = r#"{"event":"order.paid","payload":{"order":{"entity":{"id":"order_abc","status":"paid"}}}}"#;
        let event = gateway().parse_webhook_event(body.as_bytes()).unwrap();
        assert_eq!(event.category, EventCategory::Order);
        assert_eq!(event.status, NormalizedStatus::Success);
        assert_eq!(event.gateway_order_id.as_deref(), Some("order_abc"));
    }

    #[test]
    fn partial_refund_event_carries_no_status_change() {
        let body = r#"{"event":"refund.processed","payload":{"refund":{"entity":{"id":"rfnd_1","payment_id":"pay_123","amount":100}},"payment":{"entity":{"id":"pay_123","order_id":"order_abc","status":"captured","amount":100000,"currency":"INR"}}}}"#;
        let event = gateway().parse_webhook_event(body.as_bytes()).unwrap();
        assert_eq!(event.category, EventCategory::Refund);
        assert_eq!(event.status, NormalizedStatus::Unknown);
    }

    #[test]
    fn malformed_payload_is_rejected() {
        assert!(gateway().parse_webhook_event(b"not json").is_err());
        assert!(gateway().parse_webhook_event(br#"{"payload":{}}"#).is_err());
    }

    #[tokio::test]
    async fn create_order_fails_fast_without_customer_identity() {
        let result = gateway()
            .create_order(CreateOrderRequest {
                order_ref: "PAY-1".to_string(),
                amount: Money::new(bigdecimal::BigDecimal::from(1000), "INR"),
                customer: Default::default(),
                return_url: None,
                notify_url: None,
                metadata: None,
            })
            .await;
        assert!(matches!(result, Err(PaymentError::ValidationError { .. })));
    }

    #[test]
    fn notes_flatten_metadata_to_strings() {
        let request = CreateOrderRequest {
            order_ref: "PAY-1".to_string(),
            amount: Money::new(bigdecimal::BigDecimal::from(1000), "INR"),
            customer: Default::default(),
            return_url: None,
            notify_url: None,
            metadata: Some(serde_json::json!({"booking_id": "bk_1", "nights": 2})),
        };
        let notes = RazorpayGateway::notes(&request);
        assert_eq!(notes["order_ref"], "PAY-1");
        assert_eq!(notes["booking_id"], "bk_1");
        assert_eq!(notes["nights"], "2");
    }
}
