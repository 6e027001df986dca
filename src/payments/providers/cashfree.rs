use crate::payments::config::GatewayConfig;
use crate::payments::error::{PaymentError, PaymentResult};
use crate::payments::provider::PaymentGateway;
use crate::payments::types::{
    decimal_amount, CreateOrderRequest, CustomerDetails, EventCategory, GatewayName, Money,
    NormalizedStatus, OrderResponse, PaymentMode, RefundRequest, RefundResponse, RefundStatus,
    StatusQuery, StatusResponse, WebhookEvent, WebhookSignature, WebhookVerificationResult,
};
use crate::payments::utils::{
    decode, minor_unit_exponent, verify_hmac_sha256_base64, HttpAuth, PaymentHttpClient,
    RequestBody,
};
use async_trait::async_trait;
use bigdecimal::{BigDecimal, RoundingMode, ToPrimitive};
use reqwest::Method;
use serde::Deserialize;
use serde_json::Value as JsonValue;
use std::time::Duration;
use tracing::info;

const API_VERSION: &str = "2023-08-01";

pub struct CashfreeGateway {
    config: GatewayConfig,
    http: PaymentHttpClient,
}

impl CashfreeGateway {
    pub fn new(config: GatewayConfig) -> PaymentResult<Self> {
        let http = PaymentHttpClient::new(
            GatewayName::Cashfree,
            Duration::from_secs(config.timeout_secs),
            config.max_retries,
        )?;
        Ok(Self { config, http })
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}{}", self.config.base_url, path)
    }

    fn headers(&self) -> [(&str, &str); 3] {
        [
            ("x-client-id", self.config.credentials.key_id.as_str()),
            ("x-client-secret", self.config.credentials.key_secret.as_str()),
            ("x-api-version", API_VERSION),
        ]
    }

    /// Cashfree takes amounts in major units, rounded to the currency's minor-unit precision.
    fn major_amount(money: &Money) -> PaymentResult<f64> {
        let exponent = minor_unit_exponent(&money.currency) as i64;
        money
            .amount
            .with_scale_round(exponent, RoundingMode::HalfUp)
            .to_f64()
            .ok_or_else(|| {
                PaymentError::validation(format!("amount {} is out of range", money.amount), "amount")
            })
    }

    /// Customer ids may only contain letters, digits, `_` and `-`.
    fn customer_id(customer: &CustomerDetails) -> Option<String> {
        [&customer.id, &customer.phone, &customer.email]
            .into_iter()
            .flatten()
            .map(|v| v.trim())
            .find(|v| !v.is_empty())
            .map(|v| {
                v.chars()
                    .map(|c| if c.is_ascii_alphanumeric() || c == '-' { c } else { '_' })
                    .collect()
            })
    }

    fn status_from_payment(status: &str) -> NormalizedStatus {
        match status.to_uppercase().as_str() {
            "SUCCESS" => NormalizedStatus::Success,
            "FAILED" | "USER_DROPPED" | "CANCELLED" | "VOID" => NormalizedStatus::Failed,
            "PENDING" | "NOT_ATTEMPTED" => NormalizedStatus::Pending,
            _ => NormalizedStatus::Unknown,
        }
    }

    fn require_order_id(value: Option<&str>) -> PaymentResult<&str> {
        value.filter(|v| !v.trim().is_empty()).ok_or_else(|| {
            PaymentError::validation("cashfree requires gateway_order_id", "gateway_order_id")
        })
    }
}

#[async_trait]
impl PaymentGateway for CashfreeGateway {
    fn name(&self) -> GatewayName {
        GatewayName::Cashfree
    }

    fn config(&self) -> &GatewayConfig {
        &self.config
    }

    async fn create_order(&self, request: CreateOrderRequest) -> PaymentResult<OrderResponse> {
        request.validate()?;
        let customer_phone = request
            .customer
            .phone
            .as_deref()
            .map(str::trim)
            .filter(|v| !v.is_empty())
            .ok_or_else(|| {
                PaymentError::validation(
                    "customer.phone is required for cashfree orders",
                    "customer.phone",
                )
            })?;
        let customer_id = Self::customer_id(&request.customer).ok_or_else(|| {
            PaymentError::validation("customer id is required", "customer.id")
        })?;

        let tags = match &request.metadata {
            Some(JsonValue::Object(map)) => JsonValue::Object(
                map.iter()
                    .map(|(k, v)| {
                        let text = match v {
                            JsonValue::String(s) => s.clone(),
                            other => other.to_string(),
                        };
                        (k.clone(), JsonValue::String(text))
                    })
                    .collect(),
            ),
            _ => JsonValue::Null,
        };

        let payload = serde_json::json!({
            "order_id": request.order_ref,
            "order_amount": Self::major_amount(&request.amount)?,
            "order_currency": request.amount.currency,
            "customer_details": {
                "customer_id": customer_id,
                "customer_phone": customer_phone,
                "customer_email": request.customer.email,
                "customer_name": request.customer.name,
            },
            "order_meta": {
                "return_url": request.return_url,
                "notify_url": request.notify_url,
            },
            "order_tags": tags,
        });

        let raw = self
            .http
            .request_value(
                Method::POST,
                &self.endpoint("/orders"),
                HttpAuth::None,
                RequestBody::Json(&payload),
                &self.headers(),
            )
            .await?;
        let order: CashfreeOrder = decode(GatewayName::Cashfree, &raw)?;
        info!(
            order_ref = %request.order_ref,
            cf_order_id = ?order.cf_order_id,
            "cashfree order created"
        );

        Ok(OrderResponse {
            gateway: GatewayName::Cashfree,
            gateway_order_id: order.order_id,
            payment_link: order.payment_link,
            checkout_token: order.payment_session_id,
            checkout_key: None,
            raw_response: raw,
        })
    }

    async fn fetch_status(&self, query: StatusQuery) -> PaymentResult<StatusResponse> {
        let order_id = Self::require_order_id(query.gateway_order_id.as_deref())?.to_string();

        let (raw, payments): (JsonValue, Vec<CashfreePayment>) = match query
            .gateway_payment_id
            .as_deref()
            .filter(|v| !v.is_empty())
        {
            Some(payment_id) => {
                let raw = self
                    .http
                    .request_value(
                        Method::GET,
                        &self.endpoint(&format!("/orders/{}/payments/{}", order_id, payment_id)),
                        HttpAuth::None,
                        RequestBody::Empty,
                        &self.headers(),
                    )
                    .await?;
                let payment = decode(GatewayName::Cashfree, &raw)?;
                (raw, vec![payment])
            }
            None => {
                let raw = self
                    .http
                    .request_value(
                        Method::GET,
                        &self.endpoint(&format!("/orders/{}/payments", order_id)),
                        HttpAuth::None,
                        RequestBody::Empty,
                        &self.headers(),
                    )
                    .await?;
                let payments = decode(GatewayName::Cashfree, &raw)?;
                (raw, payments)
            }
        };

        let chosen = payments
            .iter()
            .find(|p| p.payment_status.eq_ignore_ascii_case("SUCCESS"))
            .or_else(|| payments.first());

        let Some(payment) = chosen else {
            return Ok(StatusResponse {
                status: NormalizedStatus::Pending,
                gateway_order_id: Some(order_id),
                gateway_payment_id: None,
                payment_mode: None,
                amount: None,
                failure_reason: None,
                raw_response: raw,
            });
        };

        Ok(StatusResponse {
            status: Self::status_from_payment(&payment.payment_status),
            gateway_order_id: Some(order_id),
            gateway_payment_id: payment.cf_payment_id.as_ref().map(id_text),
            payment_mode: payment
                .payment_group
                .as_deref()
                .map(PaymentMode::from_gateway_method),
            amount: match (&payment.payment_amount, &payment.payment_currency) {
                (Some(amount), Some(currency)) => Some(Money::new(amount.clone(), currency.clone())),
                _ => None,
            },
            failure_reason: payment.payment_message.clone(),
            raw_response: raw,
        })
    }

    async fn initiate_refund(&self, request: RefundRequest) -> PaymentResult<RefundResponse> {
        request.amount.validate_positive("amount")?;
        let order_id = Self::require_order_id(request.gateway_order_id.as_deref())?;
        let payload = serde_json::json!({
            "refund_amount": Self::major_amount(&request.amount)?,
            "refund_id": request.refund_reference,
        });

        let raw = self
            .http
            .request_value(
                Method::POST,
                &self.endpoint(&format!("/orders/{}/refunds", order_id)),
                HttpAuth::None,
                RequestBody::Json(&payload),
                &self.headers(),
            )
            .await?;
        let refund: CashfreeRefund = decode(GatewayName::Cashfree, &raw)?;

        Ok(RefundResponse {
            refund_id: refund
                .cf_refund_id
                .as_ref()
                .map(id_text)
                .unwrap_or(refund.refund_id),
            status: RefundStatus::from_gateway(&refund.refund_status),
            amount: request.amount,
            raw_response: raw,
        })
    }

    fn verify_webhook(
        &self,
        payload: &[u8],
        signature: &WebhookSignature,
    ) -> PaymentResult<WebhookVerificationResult> {
        let Some(timestamp) = signature.timestamp.as_deref() else {
            return Ok(WebhookVerificationResult::from_check(
                false,
                "missing x-webhook-timestamp header",
            ));
        };
        let valid = verify_hmac_sha256_base64(
            &[timestamp.as_bytes(), payload],
            self.config.webhook_secret(),
            &signature.signature,
        );
        Ok(WebhookVerificationResult::from_check(
            valid,
            "invalid cashfree signature",
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
                message: "cashfree webhook has no type".to_string(),
            })?
            .to_string();

        let (category, status) = match event_type.as_str() {
            "PAYMENT_SUCCESS_WEBHOOK" => (EventCategory::Payment, NormalizedStatus::Success),
            "PAYMENT_FAILED_WEBHOOK" | "PAYMENT_USER_DROPPED_WEBHOOK" => {
                (EventCategory::Payment, NormalizedStatus::Failed)
            }
            t if t.starts_with("REFUND") => (EventCategory::Refund, NormalizedStatus::Unknown),
            t if t.starts_with("PAYMENT") => (EventCategory::Payment, NormalizedStatus::Unknown),
            _ => (EventCategory::Other, NormalizedStatus::Unknown),
        };

        let gateway_order_id = parsed
            .pointer("/data/order/order_id")
            .or_else(|| parsed.pointer("/data/refund/order_id"))
            .and_then(|v| v.as_str())
            .map(str::to_string);
        let gateway_payment_id = parsed
            .pointer("/data/payment/cf_payment_id")
            .or_else(|| parsed.pointer("/data/refund/cf_payment_id"))
            .filter(|v| !v.is_null())
            .map(id_text);
        let payment_mode = parsed
            .pointer("/data/payment/payment_group")
            .and_then(|v| v.as_str())
            .map(PaymentMode::from_gateway_method);

        Ok(WebhookEvent {
            gateway: GatewayName::Cashfree,
            event_id: None,
            event_type,
            category,
            gateway_order_id,
            gateway_payment_id,
            status,
            payment_mode,
            payload: parsed,
            received_at: chrono::Utc::now(),
        })
    }
}

/// Cashfree sends numeric ids as JSON numbers in some responses and strings in others.
fn id_text(value: &JsonValue) -> String {
    match value {
        JsonValue::String(s) => s.clone(),
        other => other.to_string(),
    }
}

#[derive(Debug, Deserialize)]
struct CashfreeOrder {
    order_id: String,
    #[serde(default)]
    cf_order_id: Option<JsonValue>,
    #[serde(default)]
    payment_session_id: Option<String>,
    #[serde(default)]
    payment_link: Option<String>,
}

#[derive(Debug, Deserialize)]
struct CashfreePayment {
    #[serde(default)]
    cf_payment_id: Option<JsonValue>,
    payment_status: String,
    #[serde(default, with = "decimal_amount::option")]
    payment_amount: Option<BigDecimal>,
    #[serde(default)]
    payment_currency: Option<String>,
    #[serde(default)]
    payment_group: Option<String>,
    #[serde(default)]
    payment_message: Option<String>,
}

#[derive(Debug, Deserialize)]
struct CashfreeRefund {
    #[serde(default)]
    cf_refund_id: Option<JsonValue>,
    refund_id: String,
    refund_status: String,
}
