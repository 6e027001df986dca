use crate::payments::error::PaymentError;
use bigdecimal::{BigDecimal, Zero};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum GatewayName {
    Razorpay,
    Cashfree,
    Stripe,
}

impl GatewayName {
    pub const ALL: [GatewayName; 3] = [
        GatewayName::Razorpay,
        GatewayName::Cashfree,
        GatewayName::Stripe,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            GatewayName::Razorpay => "razorpay",
            GatewayName::Cashfree => "cashfree",
            GatewayName::Stripe => "stripe",
        }
    }

    /// Header carrying the webhook signature for this gateway.
    pub fn signature_header(&self) -> &'static str {
        match self {
            GatewayName::Razorpay => "x-razorpay-signature",
            GatewayName::Cashfree => "x-webhook-signature",
            GatewayName::Stripe => "stripe-signature",
        }
    }

    pub fn timestamp_header(&self) -> Option<&'static str> {
        match self {
            GatewayName::Cashfree => Some("x-webhook-timestamp"),
            _ => None,
        }
    }

    pub fn event_id_header(&self) -> Option<&'static str> {
        match self {
            GatewayName::Razorpay => Some("x-razorpay-event-id"),
            GatewayName::Cashfree => Some("x-idempotency-key"),
            GatewayName::Stripe => None,
        }
    }

    /// Environment variable prefix for this gateway's settings.
    pub fn env_prefix(&self) -> &'static str {
        match self {
            GatewayName::Razorpay => "RAZORPAY",
            GatewayName::Cashfree => "CASHFREE",
            GatewayName::Stripe => "STRIPE",
        }
    }
}

impl std::fmt::Display for GatewayName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for GatewayName {
    type Err = PaymentError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_lowercase().as_str() {
            "razorpay" => Ok(GatewayName::Razorpay),
            "cashfree" => Ok(GatewayName::Cashfree),
            "stripe" => Ok(GatewayName::Stripe),
            _ => Err(PaymentError::ValidationError {
                message: format!("unsupported gateway: {}", value),
                field: Some("gateway".to_string()),
            }),
        }
    }
}

/// Serde helpers for exact decimal amounts.
///
/// Amounts serialize as strings. On input both JSON strings and JSON numbers are accepted;
/// numbers are parsed from their textual form so that `499.99` stays exactly `499.99`.
pub mod decimal_amount {
    use bigdecimal::BigDecimal;
    use serde::de::Error as _;
    use serde::{Deserialize, Deserializer, Serializer};
    use serde_json::Value as JsonValue;
    use std::str::FromStr;

    pub fn parse_value(value: &JsonValue) -> Result<BigDecimal, String> {
        match value {
            JsonValue::Number(number) => BigDecimal::from_str(&number.to_string())
                .map_err(|e| format!("invalid decimal amount {}: {}", number, e)),
            JsonValue::String(text) => BigDecimal::from_str(text.trim())
                .map_err(|e| format!("invalid decimal amount {}: {}", text, e)),
            other => Err(format!("expected decimal amount, found {}", other)),
        }
    }

    pub fn serialize<S: Serializer>(value: &BigDecimal, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&value.to_string())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<BigDecimal, D::Error> {
        let raw = JsonValue::deserialize(deserializer)?;
        parse_value(&raw).map_err(D::Error::custom)
    }

    pub mod option {
        use super::parse_value;
        use bigdecimal::BigDecimal;
        use serde::de::Error as _;
        use serde::{Deserialize, Deserializer, Serializer};
        use serde_json::Value as JsonValue;

        pub fn serialize<S: Serializer>(
            value: &Option<BigDecimal>,
            serializer: S,
        ) -> Result<S::Ok, S::Error> {
            match value {
                Some(amount) => serializer.serialize_some(&amount.to_string()),
                None => serializer.serialize_none(),
            }
        }

        pub fn deserialize<'de, D: Deserializer<'de>>(
            deserializer: D,
        ) -> Result<Option<BigDecimal>, D::Error> {
            match Option::<JsonValue>::deserialize(deserializer)? {
                None | Some(JsonValue::Null) => Ok(None),
                Some(raw) => parse_value(&raw).map(Some).map_err(D::Error::custom),
            }
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Money {
    #[serde(with = "decimal_amount")]
    pub amount: BigDecimal,
    pub currency: String,
}

/// Decimal places a stored amount keeps
pub const MAX_AMOUNT_SCALE: i64 = 4;

impl Money {
    pub fn new(amount: BigDecimal, currency: impl Into<String>) -> Self {
        Self {
            amount,
            currency: currency.into().trim().to_uppercase(),
        }
    }

    pub fn validate_positive(&self, field: &str) -> Result<(), PaymentError> {
        if self.amount <= BigDecimal::zero() {
            return Err(PaymentError::ValidationError {
                message: "amount must be greater than zero".to_string(),
                field: Some(field.to_string()),
            });
        }
        let (_, scale) = self.amount.normalized().as_bigint_and_exponent();
        if scale > MAX_AMOUNT_SCALE {
            return Err(PaymentError::ValidationError {
                message: format!("amount has more than {} decimal places", MAX_AMOUNT_SCALE),
                field: Some(field.to_string()),
            });
        }
        let currency = self.currency.trim();
        if currency.len() != 3 || !currency.chars().all(|c| c.is_ascii_alphabetic()) {
            return Err(PaymentError::ValidationError {
                message: format!("invalid currency code: {:?}", self.currency),
                field: Some("currency".to_string()),
            });
        }
        Ok(())
    }
}

impl std::fmt::Display for Money {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} {}", self.amount, self.currency)
    }
}

/// Gateway-independent payment status.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum NormalizedStatus {
    Pending,
    Success,
    Failed,
    Refunded,
    Unknown,
}

impl NormalizedStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            NormalizedStatus::Pending => "PENDING",
            NormalizedStatus::Success => "SUCCESS",
            NormalizedStatus::Failed => "FAILED",
            NormalizedStatus::Refunded => "REFUNDED",
            NormalizedStatus::Unknown => "UNKNOWN",
        }
    }
}

impl std::fmt::Display for NormalizedStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PaymentMode {
    Unknown,
    Upi,
    Card,
    NetBanking,
    Wallet,
    BankTransfer,
    PayLater,
    Emi,
    Other,
}

impl PaymentMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentMode::Unknown => "UNKNOWN",
            PaymentMode::Upi => "UPI",
            PaymentMode::Card => "CARD",
            PaymentMode::NetBanking => "NET_BANKING",
            PaymentMode::Wallet => "WALLET",
            PaymentMode::BankTransfer => "BANK_TRANSFER",
            PaymentMode::PayLater => "PAY_LATER",
            PaymentMode::Emi => "EMI",
            PaymentMode::Other => "OTHER",
        }
    }

    /// Maps a gateway's payment method / group name onto a payment mode.
    pub fn from_gateway_method(method: &str) -> Self {
        match method.trim().to_lowercase().as_str() {
            "upi" => PaymentMode::Upi,
            "card" | "credit_card" | "debit_card" | "prepaid_card" | "link" => PaymentMode::Card,
            "netbanking" | "net_banking" => PaymentMode::NetBanking,
            "wallet" | "app" => PaymentMode::Wallet,
            "bank_transfer" | "emandate" | "nach" | "us_bank_account" | "sepa_debit" => {
                PaymentMode::BankTransfer
            }
            "paylater" | "pay_later" | "klarna" | "afterpay_clearpay" => PaymentMode::PayLater,
            "emi" | "cardless_emi" | "credit_card_emi" | "debit_card_emi" => PaymentMode::Emi,
            "" | "unknown" => PaymentMode::Unknown,
            _ => PaymentMode::Other,
        }
    }
}

impl FromStr for PaymentMode {
    type Err = PaymentError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "UNKNOWN" => Ok(PaymentMode::Unknown),
            "UPI" => Ok(PaymentMode::Upi),
            "CARD" => Ok(PaymentMode::Card),
            "NET_BANKING" => Ok(PaymentMode::NetBanking),
            "WALLET" => Ok(PaymentMode::Wallet),
            "BANK_TRANSFER" => Ok(PaymentMode::BankTransfer),
            "PAY_LATER" => Ok(PaymentMode::PayLater),
            "EMI" => Ok(PaymentMode::Emi),
            "OTHER" => Ok(PaymentMode::Other),
            other => Err(PaymentError::validation(
                format!("unknown payment mode: {}", other),
                "payment_mode",
            )),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CustomerDetails {
    pub id: Option<String>,
    pub name: Option<String>,
    pub email: Option<String>,
    pub phone: Option<String>,
}

impl CustomerDetails {
    pub fn has_identity(&self) -> bool {
        [&self.id, &self.email, &self.phone]
            .iter()
            .any(|v| v.as_deref().map(|s| !s.trim().is_empty()).unwrap_or(false))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateOrderRequest {
    pub order_ref: String,
    pub amount: Money,
    pub customer: CustomerDetails,
    pub return_url: Option<String>,
    pub notify_url: Option<String>,
    pub metadata: Option<JsonValue>,
}

impl CreateOrderRequest {
    /// Checks the fields every gateway needs before any network call is made.
    pub fn validate(&self) -> Result<(), PaymentError> {
        if self.order_ref.trim().is_empty() {
            return Err(PaymentError::validation("order_ref is required", "order_ref"));
        }
        self.amount.validate_positive("amount")?;
        if !self.customer.has_identity() {
            return Err(PaymentError::validation(
                "customer id, email or phone is required",
                "customer",
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderResponse {
    pub gateway: GatewayName,
    pub gateway_order_id: String,
    pub payment_link: Option<String>,
    /// Client-side checkout handle (payment session id, client secret).
    pub checkout_token: Option<String>,
    /// Public key the checkout widget needs, when the gateway has one.
    pub checkout_key: Option<String>,
    pub raw_response: JsonValue,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StatusQuery {
    pub gateway_order_id: Option<String>,
    pub gateway_payment_id: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusResponse {
    pub status: NormalizedStatus,
    pub gateway_order_id: Option<String>,
    pub gateway_payment_id: Option<String>,
    pub payment_mode: Option<PaymentMode>,
    pub amount: Option<Money>,
    pub failure_reason: Option<String>,
    pub raw_response: JsonValue,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RefundRequest {
    pub gateway_order_id: Option<String>,
    pub gateway_payment_id: String,
    pub amount: Money,
    pub refund_reference: String,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RefundStatus {
    Pending,
    Processed,
    Failed,
}

impl RefundStatus {
    pub fn from_gateway(value: &str) -> Self {
        match value.trim().to_lowercase().as_str() {
            "processed" | "success" | "succeeded" => RefundStatus::Processed,
            "failed" | "cancelled" | "canceled" => RefundStatus::Failed,
            _ => RefundStatus::Pending,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RefundResponse {
    pub refund_id: String,
    pub status: RefundStatus,
    pub amount: Money,
    pub raw_response: JsonValue,
}

/// Signature material taken from webhook headers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebhookSignature {
    pub signature: String,
    pub timestamp: Option<String>,
}

impl WebhookSignature {
    pub fn new(signature: impl Into<String>) -> Self {
        Self {
            signature: signature.into(),
            timestamp: None,
        }
    }

    pub fn with_timestamp(mut self, timestamp: impl Into<String>) -> Self {
        self.timestamp = Some(timestamp.into());
        self
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebhookVerificationResult {
    pub valid: bool,
    pub reason: Option<String>,
}

impl WebhookVerificationResult {
    pub fn from_check(valid: bool, failure_reason: &str) -> Self {
        Self {
            valid,
            reason: if valid {
                None
            } else {
                Some(failure_reason.to_string())
            },
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum EventCategory {
    Payment,
    Order,
    Refund,
    Other,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebhookEvent {
    pub gateway: GatewayName,
    pub event_id: Option<String>,
    pub event_type: String,
    pub category: EventCategory,
    pub gateway_order_id: Option<String>,
    pub gateway_payment_id: Option<String>,
    pub status: NormalizedStatus,
    pub payment_mode: Option<PaymentMode>,
    pub payload: JsonValue,
    pub received_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn money_deserializes_json_numbers_exactly() {
        let parsed: Money =
            serde_json::from_value(serde_json::json!({"amount": 499.99, "currency": "INR"}))
                .expect("deserialization should succeed");
        assert_eq!(parsed.amount, BigDecimal::from_str("499.99").unwrap());

        let json = serde_json::to_value(&parsed).expect("serialization should succeed");
        assert_eq!(json["amount"], "499.99");
    }

    #[test]
    fn money_accepts_string_amounts() {
        let parsed: Money =
            serde_json::from_value(serde_json::json!({"amount": "1000", "currency": "INR"}))
                .expect("deserialization should succeed");
        assert_eq!(parsed.amount, BigDecimal::from(1000));
    }

    #[test]
    fn money_rejects_non_numeric_amounts() {
        let parsed = serde_json::from_value::<Money>(
            serde_json::json!({"amount": "ten", "currency": "INR"}),
        );
        assert!(parsed.is_err());
    }

    #[test]
    fn validate_positive_rejects_zero_and_bad_currency() {
        assert!(Money::new(BigDecimal::zero(), "INR")
            .validate_positive("amount")
            .is_err());
        assert!(Money::new(BigDecimal::from(10), "RUPEES")
            .validate_positive("amount")
            .is_err());
        assert!(Money::new(BigDecimal::from(10), "inr")
            .validate_positive("amount")
            .is_ok());
    }

    #[test]
    fn validate_positive_rejects_amounts_finer_than_storage() {
        let amount = |s: &str| Money::new(BigDecimal::from_str(s).unwrap(), "INR");
        assert!(amount("499.9999").validate_positive("amount").is_ok());
        assert!(amount("499.99990000").validate_positive("amount").is_ok());
        assert!(amount("1000").validate_positive("amount").is_ok());
        assert!(amount("499.99999").validate_positive("amount").is_err());
    }

    #[test]
    fn gateway_names_parse_case_insensitively() {
        assert_eq!(GatewayName::from_str("RAZORPAY").unwrap(), GatewayName::Razorpay);
        assert_eq!(GatewayName::from_str(" Cashfree ").unwrap(), GatewayName::Cashfree);
        assert!(GatewayName::from_str("unknowngw").is_err());
    }

    #[test]
    fn payment_modes_map_from_gateway_vocabulary() {
        assert_eq!(PaymentMode::from_gateway_method("upi"), PaymentMode::Upi);
        assert_eq!(PaymentMode::from_gateway_method("credit_card"), PaymentMode::Card);
        assert_eq!(PaymentMode::from_gateway_method("netbanking"), PaymentMode::NetBanking);
        assert_eq!(PaymentMode::from_gateway_method("cardless_emi"), PaymentMode::Emi);
        assert_eq!(PaymentMode::from_gateway_method("crypto"), PaymentMode::Other);
        assert_eq!(PaymentMode::from_str("NET_BANKING").unwrap(), PaymentMode::NetBanking);
    }

    #[test]
    fn create_order_request_requires_customer_identity() {
        let request = CreateOrderRequest {
            order_ref: "PAY-1".to_string(),
            amount: Money::new(BigDecimal::from(1000), "INR"),
            customer: CustomerDetails::default(),
            return_url: None,
            notify_url: None,
            metadata: None,
        };
        assert!(request.validate().is_err());
    }
}
