//! Client for the booking service.
//!
//! Bookings are owned by a separate HTTP API. The payments service reads the
//! authoritative booking amount before creating an order and reports the payment
//! outcome back once a payment settles.

use crate::config::BookingServiceConfig;
use crate::database::models::PaymentStatus;
use crate::error::{AppError, AppErrorKind, DomainError, ExternalError};
use crate::payments::types::{decimal_amount, GatewayName};
use async_trait::async_trait;
use bigdecimal::BigDecimal;
use reqwest::{Client, StatusCode};
use serde::Serialize;
use serde_json::Value as JsonValue;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, warn};
use uuid::Uuid;

#[derive(Debug, Clone, Error)]
pub enum BookingError {
    #[error("booking {booking_id} not found")]
    NotFound { booking_id: String },

    #[error("booking service timed out after {timeout_secs}s")]
    Timeout { timeout_secs: u64 },

    #[error("booking service unavailable: {message}")]
    Unavailable { message: String },

    #[error("booking service rejected the request with HTTP {status}: {message}")]
    Rejected { status: u16, message: String },

    #[error("unexpected booking payload: {message}")]
    InvalidResponse { message: String },
}

impl From<BookingError> for AppError {
    fn from(err: BookingError) -> Self {
        match err {
            BookingError::NotFound { booking_id } => {
                AppError::domain(DomainError::BookingNotFound { booking_id })
            }
            BookingError::Timeout { timeout_secs } => {
                AppError::new(AppErrorKind::External(ExternalError::Timeout {
                    service: "booking_service".to_string(),
                    timeout_secs,
                }))
            }
            BookingError::Unavailable { ref message } => {
                AppError::new(AppErrorKind::External(ExternalError::BookingService {
                    message: message.clone(),
                    is_retryable: true,
                }))
            }
            other => AppError::new(AppErrorKind::External(ExternalError::BookingService {
                message: other.to_string(),
                is_retryable: false,
            })),
        }
    }
}

/// The parts of a booking the payments service relies on
#[derive(Debug, Clone, Serialize)]
pub struct Booking {
    pub id: String,
    #[serde(with = "decimal_amount")]
    pub total_amount: BigDecimal,
    pub currency: Option<String>,
    pub status: Option<String>,
}

impl Booking {
    /// Accepts `{data: {...}}` envelopes and both camelCase and snake_case field names.
    fn from_payload(booking_id: &str, payload: &JsonValue) -> Result<Self, BookingError> {
        let body = payload
            .get("data")
            .filter(|d| d.is_object())
            .unwrap_or(payload);

        let field = |names: &[&str]| names.iter().find_map(|n| body.get(*n)).cloned();

        let total = field(&["totalAmount", "total_amount", "amount"]).ok_or_else(|| {
            BookingError::InvalidResponse {
                message: "booking has no total amount".to_string(),
            }
        })?;
        let total_amount = decimal_amount::parse_value(&total)
            .map_err(|message| BookingError::InvalidResponse { message })?;

        let text = |value: Option<JsonValue>| match value {
            Some(JsonValue::String(s)) => Some(s),
            Some(JsonValue::Number(n)) => Some(n.to_string()),
            _ => None,
        };

        Ok(Booking {
            id: text(field(&["id", "_id", "bookingId"])).unwrap_or_else(|| booking_id.to_string()),
            total_amount,
            currency: text(field(&["currency"])).map(|c| c.to_uppercase()),
            status: text(field(&["status", "bookingStatus"])),
        })
    }
}

/// Payment outcome pushed to the booking service
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BookingPaymentUpdate {
    pub payment_id: Uuid,
    pub payment_status: PaymentStatus,
    pub gateway: GatewayName,
    pub gateway_order_id: String,
    pub gateway_payment_id: Option<String>,
    #[serde(with = "decimal_amount")]
    pub amount: BigDecimal,
    pub currency: String,
}

#[async_trait]
pub trait BookingService: Send + Sync {
    async fn get_booking(
        &self,
        booking_id: &str,
        auth_token: Option<&str>,
    ) -> Result<Booking, BookingError>;

    async fn mark_payment(
        &self,
        booking_id: &str,
        update: &BookingPaymentUpdate,
        auth_token: Option<&str>,
    ) -> Result<(), BookingError>;
}

pub struct HttpBookingClient {
    client: Client,
    base_url: String,
    service_key: Option<String>,
    timeout_secs: u64,
}

impl HttpBookingClient {
    pub fn new(config: &BookingServiceConfig) -> Result<Self, BookingError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| BookingError::Unavailable {
                message: format!("failed to initialize HTTP client: {}", e),
            })?;

        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            service_key: config.service_key.clone(),
            timeout_secs: config.timeout_secs,
        })
    }

    fn authorize(
        &self,
        mut request: reqwest::RequestBuilder,
        auth_token: Option<&str>,
    ) -> reqwest::RequestBuilder {
        if let Some(token) = auth_token {
            request = request.bearer_auth(token);
        }
        if let Some(key) = &self.service_key {
            request = request.header("x-service-key", key);
        }
        request
    }

    fn transport_error(&self, err: reqwest::Error) -> BookingError {
        if err.is_timeout() {
            BookingError::Timeout {
                timeout_secs: self.timeout_secs,
            }
        } else {
            BookingError::Unavailable {
                message: err.to_string(),
            }
        }
    }

    async fn rejection(booking_id: &str, response: reqwest::Response) -> BookingError {
        let status = response.status();
        if status == StatusCode::NOT_FOUND {
            return BookingError::NotFound {
                booking_id: booking_id.to_string(),
            };
        }
        let message = response.text().await.unwrap_or_default();
        if status.is_server_error() {
            BookingError::Unavailable {
                message: format!("HTTP {}: {}", status.as_u16(), message),
            }
        } else {
            BookingError::Rejected {
                status: status.as_u16(),
                message,
            }
        }
    }
}

#[async_trait]
impl BookingService for HttpBookingClient {
    async fn get_booking(
        &self,
        booking_id: &str,
        auth_token: Option<&str>,
    ) -> Result<Booking, BookingError> {
        let url = format!("{}/api/bookings/{}", self.base_url, booking_id);
        let response = self
            .authorize(self.client.get(&url), auth_token)
            .send()
            .await
            .map_err(|e| self.transport_error(e))?;

        if !response.status().is_success() {
            return Err(Self::rejection(booking_id, response).await);
        }

        let payload: JsonValue =
            response
                .json()
                .await
                .map_err(|e| BookingError::InvalidResponse {
                    message: e.to_string(),
                })?;
        let booking = Booking::from_payload(booking_id, &payload)?;
        debug!(booking_id = %booking.id, total = %booking.total_amount, "booking fetched");
        Ok(booking)
    }

    async fn mark_payment(
        &self,
        booking_id: &str,
        update: &BookingPaymentUpdate,
        auth_token: Option<&str>,
    ) -> Result<(), BookingError> {
        let url = format!("{}/api/bookings/{}/payment", self.base_url, booking_id);
        let response = self
            .authorize(self.client.patch(&url), auth_token)
            .json(update)
            .send()
            .await
            .map_err(|e| self.transport_error(e))?;

        if !response.status().is_success() {
            let err = Self::rejection(booking_id, response).await;
            warn!(booking_id = %booking_id, error = %err, "booking payment update rejected");
            return Err(err);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    #[test]
    fn booking_payload_accepts_envelope_and_camel_case() {
        let payload = serde_json::json!({
            "success": true,
            "data": {"_id": "bk_1", "totalAmount": 499.99, "currency": "inr", "status": "HOLD"}
        });
        let booking = Booking::from_payload("bk_1", &payload).unwrap();
        assert_eq!(booking.id, "bk_1");
        assert_eq!(booking.total_amount, BigDecimal::from_str("499.99").unwrap());
        assert_eq!(booking.currency.as_deref(), Some("INR"));
    }

    #[test]
    fn booking_payload_accepts_string_amounts() {
        let payload = serde_json::json!({"id": 42, "total_amount": "1000.00"});
        let booking = Booking::from_payload("42", &payload).unwrap();
        assert_eq!(booking.id, "42");
        assert_eq!(booking.total_amount, BigDecimal::from(1000));
    }

    #[test]
    fn booking_without_amount_is_invalid() {
        let payload = serde_json::json!({"id": "bk_1"});
        assert!(matches!(
            Booking::from_payload("bk_1", &payload),
            Err(BookingError::InvalidResponse { .. })
        ));
    }

    #[test]
    fn booking_errors_map_to_http_statuses() {
        let not_found: AppError = BookingError::NotFound {
            booking_id: "bk_1".to_string(),
        }
        .into();
        assert_eq!(not_found.status_code(), 404);

        let timeout: AppError = BookingError::Timeout { timeout_secs: 15 }.into();
        assert_eq!(timeout.status_code(), 504);

        let rejected: AppError = BookingError::Rejected {
            status: 401,
            message: "unauthorized".to_string(),
        }
        .into();
        assert_eq!(rejected.status_code(), 502);
    }
}
