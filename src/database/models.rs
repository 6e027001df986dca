//! Payment and transaction records as the rest of the service sees them.

use crate::payments::types::{
    decimal_amount, GatewayName, NormalizedStatus, PaymentMode, RefundStatus,
};
use bigdecimal::BigDecimal;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PaymentStatus {
    Pending,
    Success,
    Failed,
    Refunded,
}

impl PaymentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentStatus::Pending => "PENDING",
            PaymentStatus::Success => "SUCCESS",
            PaymentStatus::Failed => "FAILED",
            PaymentStatus::Refunded => "REFUNDED",
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, PaymentStatus::Pending)
    }

    /// `PENDING → SUCCESS | FAILED` and `SUCCESS → REFUNDED`; nothing else.
    pub fn can_transition_to(&self, next: PaymentStatus) -> bool {
        matches!(
            (self, next),
            (PaymentStatus::Pending, PaymentStatus::Success)
                | (PaymentStatus::Pending, PaymentStatus::Failed)
                | (PaymentStatus::Success, PaymentStatus::Refunded)
        )
    }

    /// Statuses from which `target` may be reached.
    pub fn predecessors(target: PaymentStatus) -> &'static [PaymentStatus] {
        match target {
            PaymentStatus::Success | PaymentStatus::Failed => &[PaymentStatus::Pending],
            PaymentStatus::Refunded => &[PaymentStatus::Success],
            PaymentStatus::Pending => &[],
        }
    }

    pub fn from_normalized(status: NormalizedStatus) -> Option<Self> {
        match status {
            NormalizedStatus::Pending => Some(PaymentStatus::Pending),
            NormalizedStatus::Success => Some(PaymentStatus::Success),
            NormalizedStatus::Failed => Some(PaymentStatus::Failed),
            NormalizedStatus::Refunded => Some(PaymentStatus::Refunded),
            NormalizedStatus::Unknown => None,
        }
    }
}

impl fmt::Display for PaymentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PaymentStatus {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "PENDING" => Ok(PaymentStatus::Pending),
            "SUCCESS" => Ok(PaymentStatus::Success),
            "FAILED" => Ok(PaymentStatus::Failed),
            "REFUNDED" => Ok(PaymentStatus::Refunded),
            other => Err(format!("unknown payment status: {}", other)),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PaymentPurpose {
    #[default]
    Booking,
    Investment,
    Subscription,
    WalletTopup,
    Other,
}

impl PaymentPurpose {
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentPurpose::Booking => "BOOKING",
            PaymentPurpose::Investment => "INVESTMENT",
            PaymentPurpose::Subscription => "SUBSCRIPTION",
            PaymentPurpose::WalletTopup => "WALLET_TOPUP",
            PaymentPurpose::Other => "OTHER",
        }
    }
}

impl FromStr for PaymentPurpose {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "BOOKING" => Ok(PaymentPurpose::Booking),
            "INVESTMENT" => Ok(PaymentPurpose::Investment),
            "SUBSCRIPTION" => Ok(PaymentPurpose::Subscription),
            "WALLET_TOPUP" => Ok(PaymentPurpose::WalletTopup),
            "OTHER" => Ok(PaymentPurpose::Other),
            other => Err(format!("unknown payment purpose: {}", other)),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PartyType {
    User,
    Guest,
    Business,
    Platform,
}

impl PartyType {
    pub fn as_str(&self) -> &'static str {
        match self {
            PartyType::User => "USER",
            PartyType::Guest => "GUEST",
            PartyType::Business => "BUSINESS",
            PartyType::Platform => "PLATFORM",
        }
    }
}

impl FromStr for PartyType {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "USER" => Ok(PartyType::User),
            "GUEST" => Ok(PartyType::Guest),
            "BUSINESS" => Ok(PartyType::Business),
            "PLATFORM" => Ok(PartyType::Platform),
            other => Err(format!("unknown party type: {}", other)),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RefundEntry {
    pub refund_id: String,
    pub reference: String,
    #[serde(with = "decimal_amount")]
    pub amount: BigDecimal,
    pub status: RefundStatus,
    pub created_by: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaymentRecord {
    pub id: Uuid,
    /// Reference sent to the gateway as receipt / merchant order id
    pub order_ref: String,
    pub purpose: PaymentPurpose,
    pub booking_id: Option<String>,
    #[serde(with = "decimal_amount")]
    pub amount: BigDecimal,
    pub currency: String,
    pub payer_ref: Option<String>,
    pub payer_type: Option<PartyType>,
    pub receiver_ref: Option<String>,
    pub receiver_type: Option<PartyType>,
    pub gateway: GatewayName,
    pub gateway_order_id: String,
    pub gateway_payment_id: Option<String>,
    pub status: PaymentStatus,
    pub transaction_id: Option<Uuid>,
    #[serde(with = "decimal_amount")]
    pub refunded_amount: BigDecimal,
    pub refunds: Vec<RefundEntry>,
    pub idempotency_key: Option<String>,
    pub payment_link: Option<String>,
    pub checkout_token: Option<String>,
    pub failure_reason: Option<String>,
    pub metadata: JsonValue,
    pub created_by: String,
    pub updated_by: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl PaymentRecord {
    pub fn refundable_amount(&self) -> BigDecimal {
        &self.amount - &self.refunded_amount
    }
}

/// Everything needed to insert a new `PENDING` payment.
#[derive(Debug, Clone)]
pub struct NewPayment {
    pub order_ref: String,
    pub purpose: PaymentPurpose,
    pub booking_id: Option<String>,
    pub amount: BigDecimal,
    pub currency: String,
    pub payer_ref: Option<String>,
    pub payer_type: Option<PartyType>,
    pub receiver_ref: Option<String>,
    pub receiver_type: Option<PartyType>,
    pub gateway: GatewayName,
    pub gateway_order_id: String,
    pub idempotency_key: Option<String>,
    pub payment_link: Option<String>,
    pub checkout_token: Option<String>,
    pub metadata: JsonValue,
    pub created_by: String,
}

/// Fields written together with a status change.
#[derive(Debug, Clone)]
pub struct StatusUpdate {
    pub gateway_payment_id: Option<String>,
    pub failure_reason: Option<String>,
    pub refunded_amount: Option<BigDecimal>,
    pub updated_by: String,
}

impl StatusUpdate {
    pub fn by(actor: impl Into<String>) -> Self {
        Self {
            gateway_payment_id: None,
            failure_reason: None,
            refunded_amount: None,
            updated_by: actor.into(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct GatewayLogEntry {
    pub event_id: Option<String>,
    pub event: String,
    pub status: NormalizedStatus,
    pub payload: JsonValue,
    pub recorded_at: DateTime<Utc>,
}

impl GatewayLogEntry {
    pub fn new(
        event_id: Option<String>,
        event: impl Into<String>,
        status: NormalizedStatus,
        payload: JsonValue,
    ) -> Self {
        Self {
            event_id,
            event: event.into(),
            status,
            payload,
            recorded_at: Utc::now(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransactionRecord {
    pub id: Uuid,
    pub payment_id: Uuid,
    pub gateway: GatewayName,
    pub payment_mode: PaymentMode,
    /// Append-only log of gateway interaction
    pub gateway_response: Vec<GatewayLogEntry>,
    pub created_by: String,
    pub updated_by: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl TransactionRecord {
    pub fn has_event(&self, event_id: &str) -> bool {
        self.gateway_response
            .iter()
            .any(|entry| entry.event_id.as_deref() == Some(event_id))
    }
}
