//! Unified error handling for the payments service
//!
//! Every layer error (gateway, store, booking collaborator, configuration) converts into
//! [`AppError`], which carries the HTTP status, a machine-readable code and a user message.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Error codes for programmatic handling
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub enum ErrorCode {
    // Domain errors (4xx)
    #[serde(rename = "PAYMENT_NOT_FOUND")]
    PaymentNotFound,
    #[serde(rename = "BOOKING_NOT_FOUND")]
    BookingNotFound,
    #[serde(rename = "GATEWAY_NOT_FOUND")]
    GatewayNotFound,
    #[serde(rename = "AMOUNT_MISMATCH")]
    AmountMismatch,
    #[serde(rename = "SIGNATURE_MISMATCH")]
    SignatureMismatch,
    #[serde(rename = "INVALID_STATUS_TRANSITION")]
    InvalidStatusTransition,
    #[serde(rename = "REFUND_NOT_ALLOWED")]
    RefundNotAllowed,
    #[serde(rename = "NO_GATEWAY_AVAILABLE")]
    NoGatewayAvailable,
    #[serde(rename = "DUPLICATE_PAYMENT")]
    DuplicatePayment,

    // Infrastructure errors (5xx)
    #[serde(rename = "DATABASE_ERROR")]
    DatabaseError,
    #[serde(rename = "CONFIGURATION_ERROR")]
    ConfigurationError,

    // External errors (502, 503, 504)
    #[serde(rename = "PAYMENT_GATEWAY_ERROR")]
    PaymentGatewayError,
    #[serde(rename = "BOOKING_SERVICE_ERROR")]
    BookingServiceError,
    #[serde(rename = "RATE_LIMIT_ERROR")]
    RateLimitError,
    #[serde(rename = "EXTERNAL_SERVICE_TIMEOUT")]
    ExternalServiceTimeout,

    // Generic
    #[serde(rename = "INTERNAL_ERROR")]
    InternalError,
    #[serde(rename = "VALIDATION_ERROR")]
    ValidationError,
}

/// Payment business-rule errors
#[derive(Debug, Clone)]
pub enum DomainError {
    PaymentNotFound { payment_id: String },
    BookingNotFound { booking_id: String },
    /// Gateway name is unknown or not configured
    GatewayNotFound { gateway: String },
    /// Requested amount differs from the authoritative booking amount
    AmountMismatch { expected: String, received: String },
    /// Checkout or webhook signature did not verify
    SignatureMismatch { context: String },
    InvalidStatusTransition {
        payment_id: String,
        from: String,
        to: String,
    },
    RefundNotAllowed { payment_id: String, reason: String },
    NoGatewayAvailable {
        country: String,
        currency: String,
        amount: String,
    },
    DuplicatePayment { reference: String },
}

/// Infrastructure-level errors (database, configuration)
#[derive(Debug, Clone)]
pub enum InfrastructureError {
    Database { message: String, is_retryable: bool },
    Configuration { message: String },
    Internal { message: String },
}

/// External service errors (payment gateways, booking service)
#[derive(Debug, Clone)]
pub enum ExternalError {
    PaymentGateway {
        gateway: String,
        message: String,
        is_retryable: bool,
    },
    BookingService { message: String, is_retryable: bool },
    RateLimit {
        service: String,
        retry_after: Option<u64>,
    },
    Timeout { service: String, timeout_secs: u64 },
}

/// Input validation errors
#[derive(Debug, Clone)]
pub enum ValidationError {
    InvalidField { field: String, reason: String },
    MissingField { field: String },
    InvalidAmount { amount: String, reason: String },
    InvalidCurrency { currency: String, reason: String },
}

/// Unified application error type
#[derive(Debug, Clone)]
pub struct AppError {
    pub kind: AppErrorKind,
    pub request_id: Option<String>,
    pub context: Option<String>,
}

#[derive(Debug, Clone)]
pub enum AppErrorKind {
    Domain(DomainError),
    Infrastructure(InfrastructureError),
    External(ExternalError),
    Validation(ValidationError),
}

impl AppError {
    pub fn new(kind: AppErrorKind) -> Self {
        Self {
            kind,
            request_id: None,
            context: None,
        }
    }

    pub fn domain(err: DomainError) -> Self {
        Self::new(AppErrorKind::Domain(err))
    }

    pub fn validation(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::new(AppErrorKind::Validation(ValidationError::InvalidField {
            field: field.into(),
            reason: reason.into(),
        }))
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(AppErrorKind::Infrastructure(InfrastructureError::Internal {
            message: message.into(),
        }))
    }

    pub fn with_request_id(mut self, request_id: impl Into<String>) -> Self {
        self.request_id = Some(request_id.into());
        self
    }

    pub fn with_context(mut self, context: impl Into<String>) -> Self {
        self.context = Some(context.into());
        self
    }

    /// Map error to HTTP status code
    pub fn status_code(&self) -> u16 {
        match &self.kind {
            AppErrorKind::Domain(err) => match err {
                DomainError::PaymentNotFound { .. } => 404,
                DomainError::BookingNotFound { .. } => 404,
                DomainError::GatewayNotFound { .. } => 404,
                DomainError::AmountMismatch { .. } => 400,
                DomainError::SignatureMismatch { .. } => 400,
                DomainError::InvalidStatusTransition { .. } => 409, // Conflict
                DomainError::RefundNotAllowed { .. } => 409,
                DomainError::NoGatewayAvailable { .. } => 422, // Unprocessable Entity
                DomainError::DuplicatePayment { .. } => 409,
            },
            AppErrorKind::Infrastructure(_) => 500,
            AppErrorKind::External(err) => match err {
                ExternalError::PaymentGateway { .. } => 502, // Bad Gateway
                ExternalError::BookingService { .. } => 502,
                ExternalError::RateLimit { .. } => 429, // Too Many Requests
                ExternalError::Timeout { .. } => 504,   // Gateway Timeout
            },
            AppErrorKind::Validation(_) => 400,
        }
    }

    /// Get error code for client handling
    pub fn error_code(&self) -> ErrorCode {
        match &self.kind {
            AppErrorKind::Domain(err) => match err {
                DomainError::PaymentNotFound { .. } => ErrorCode::PaymentNotFound,
                DomainError::BookingNotFound { .. } => ErrorCode::BookingNotFound,
                DomainError::GatewayNotFound { .. } => ErrorCode::GatewayNotFound,
                DomainError::AmountMismatch { .. } => ErrorCode::AmountMismatch,
                DomainError::SignatureMismatch { .. } => ErrorCode::SignatureMismatch,
                DomainError::InvalidStatusTransition { .. } => ErrorCode::InvalidStatusTransition,
                DomainError::RefundNotAllowed { .. } => ErrorCode::RefundNotAllowed,
                DomainError::NoGatewayAvailable { .. } => ErrorCode::NoGatewayAvailable,
                DomainError::DuplicatePayment { .. } => ErrorCode::DuplicatePayment,
            },
            AppErrorKind::Infrastructure(err) => match err {
                InfrastructureError::Database { .. } => ErrorCode::DatabaseError,
                InfrastructureError::Configuration { .. } => ErrorCode::ConfigurationError,
                InfrastructureError::Internal { .. } => ErrorCode::InternalError,
            },
            AppErrorKind::External(err) => match err {
                ExternalError::PaymentGateway { .. } => ErrorCode::PaymentGatewayError,
                ExternalError::BookingService { .. } => ErrorCode::BookingServiceError,
                ExternalError::RateLimit { .. } => ErrorCode::RateLimitError,
                ExternalError::Timeout { .. } => ErrorCode::ExternalServiceTimeout,
            },
            AppErrorKind::Validation(_) => ErrorCode::ValidationError,
        }
    }

    /// Get user-friendly error message
    pub fn user_message(&self) -> String {
        match &self.kind {
            AppErrorKind::Domain(err) => match err {
                DomainError::PaymentNotFound { payment_id } => {
                    format!("Payment '{}' not found", payment_id)
                }
                DomainError::BookingNotFound { booking_id } => {
                    format!("Booking '{}' not found", booking_id)
                }
                DomainError::GatewayNotFound { gateway } => {
                    format!("Payment gateway '{}' is not available", gateway)
                }
                DomainError::AmountMismatch { expected, received } => format!(
                    "Payment amount {} does not match the booking amount {}",
                    received, expected
                ),
                DomainError::SignatureMismatch { .. } => {
                    "Payment signature verification failed".to_string()
                }
                DomainError::InvalidStatusTransition { from, to, .. } => {
                    format!("Payment cannot move from {} to {}", from, to)
                }
                DomainError::RefundNotAllowed { reason, .. } => {
                    format!("Refund not allowed: {}", reason)
                }
                DomainError::NoGatewayAvailable {
                    country,
                    currency,
                    amount,
                } => format!(
                    "No payment gateway available for {} {} in {}",
                    amount, currency, country
                ),
                DomainError::DuplicatePayment { reference } => {
                    format!("Payment '{}' already exists", reference)
                }
            },
            AppErrorKind::Infrastructure(_) => {
                "Service temporarily unavailable. Please try again later".to_string()
            }
            AppErrorKind::External(err) => match err {
                ExternalError::PaymentGateway {
                    gateway,
                    message,
                    is_retryable,
                } => {
                    if *is_retryable {
                        format!(
                            "Payment gateway ({}) is temporarily unavailable. Please try again",
                            gateway
                        )
                    } else {
                        format!("Payment gateway ({}) rejected the request: {}", gateway, message)
                    }
                }
                ExternalError::BookingService { .. } => {
                    "Booking service is unavailable. Please try again".to_string()
                }
                ExternalError::RateLimit {
                    service,
                    retry_after,
                } => {
                    if let Some(secs) = retry_after {
                        format!(
                            "Rate limit exceeded for {}. Please try again in {} seconds",
                            service, secs
                        )
                    } else {
                        format!("Rate limit exceeded for {}. Please try again later", service)
                    }
                }
                ExternalError::Timeout {
                    service,
                    timeout_secs,
                } => format!(
                    "{} request timed out after {} seconds. Please try again",
                    service, timeout_secs
                ),
            },
            AppErrorKind::Validation(err) => match err {
                ValidationError::InvalidField { field, reason } => {
                    format!("Invalid field '{}': {}", field, reason)
                }
                ValidationError::MissingField { field } => {
                    format!("Required field '{}' is missing", field)
                }
                ValidationError::InvalidAmount { amount, reason } => {
                    format!("Invalid amount '{}': {}", amount, reason)
                }
                ValidationError::InvalidCurrency { currency, reason } => {
                    format!("Invalid currency '{}': {}", currency, reason)
                }
            },
        }
    }

    /// Check if error is retryable
    pub fn is_retryable(&self) -> bool {
        match &self.kind {
            AppErrorKind::Domain(_) => false,
            AppErrorKind::Infrastructure(err) => match err {
                InfrastructureError::Database { is_retryable, .. } => *is_retryable,
                InfrastructureError::Configuration { .. } => false,
                InfrastructureError::Internal { .. } => false,
            },
            AppErrorKind::External(err) => match err {
                ExternalError::PaymentGateway { is_retryable, .. } => *is_retryable,
                ExternalError::BookingService { is_retryable, .. } => *is_retryable,
                ExternalError::RateLimit { .. } => true,
                ExternalError::Timeout { .. } => true,
            },
            AppErrorKind::Validation(_) => false,
        }
    }
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.user_message())
    }
}

impl std::error::Error for AppError {}

// From<DatabaseError>, From<PaymentError> and From<BookingError> live beside their error types.

/// Result type for operations that can fail with AppError
pub type AppResult<T> = Result<T, AppError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_amount_mismatch_error() {
        let error = AppError::domain(DomainError::AmountMismatch {
            expected: "499.99".to_string(),
            received: "500".to_string(),
        });

        assert_eq!(error.status_code(), 400);
        assert_eq!(error.error_code(), ErrorCode::AmountMismatch);
        assert!(error.user_message().contains("499.99"));
        assert!(!error.is_retryable());
    }

    #[test]
    fn test_refund_guard_is_conflict() {
        let error = AppError::domain(DomainError::RefundNotAllowed {
            payment_id: "p1".to_string(),
            reason: "payment is PENDING".to_string(),
        });
        assert_eq!(error.status_code(), 409);
        assert_eq!(error.error_code(), ErrorCode::RefundNotAllowed);
    }

    #[test]
    fn test_no_gateway_is_unprocessable() {
        let error = AppError::domain(DomainError::NoGatewayAvailable {
            country: "JP".to_string(),
            currency: "JPY".to_string(),
            amount: "1000".to_string(),
        });
        assert_eq!(error.status_code(), 422);
    }

    #[test]
    fn test_rate_limit_error() {
        let error = AppError::new(AppErrorKind::External(ExternalError::RateLimit {
            service: "razorpay".to_string(),
            retry_after: Some(60),
        }));

        assert_eq!(error.status_code(), 429);
        assert_eq!(error.error_code(), ErrorCode::RateLimitError);
        assert!(error.is_retryable());
    }

    #[test]
    fn test_timeout_is_gateway_timeout() {
        let error = AppError::new(AppErrorKind::External(ExternalError::Timeout {
            service: "booking".to_string(),
            timeout_secs: 15,
        }));
        assert_eq!(error.status_code(), 504);
        assert!(error.user_message().contains("15 seconds"));
    }

    #[test]
    fn test_validation_error() {
        let error = AppError::validation("amount", "must be greater than zero");

        assert_eq!(error.status_code(), 400);
        assert_eq!(error.error_code(), ErrorCode::ValidationError);
        assert!(!error.is_retryable());
    }

    #[test]
    fn error_code_serializes_screaming_case() {
        let json = serde_json::to_string(&ErrorCode::NoGatewayAvailable).unwrap();
        assert_eq!(json, "\"NO_GATEWAY_AVAILABLE\"");
    }
}
