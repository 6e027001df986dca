use thiserror::Error;

pub type PaymentResult<T> = Result<T, PaymentError>;

#[derive(Debug, Clone, Error)]
pub enum PaymentError {
    #[error("Validation error: {message}")]
    ValidationError {
        message: String,
        field: Option<String>,
    },

    #[error("Network error: {message}")]
    NetworkError { message: String },

    #[error("Rate limit exceeded: {message}")]
    RateLimitError {
        message: String,
        retry_after_seconds: Option<u64>,
    },

    #[error("Webhook verification failed: {message}")]
    WebhookVerificationError { message: String },

    #[error("Gateway error: gateway={gateway}, message={message}")]
    ProviderError {
        gateway: String,
        message: String,
        provider_code: Option<String>,
        retryable: bool,
    },
}

impl PaymentError {
    pub fn validation(message: impl Into<String>, field: &str) -> Self {
        PaymentError::ValidationError {
            message: message.into(),
            field: Some(field.to_string()),
        }
    }

    pub fn provider(gateway: &str, message: impl Into<String>) -> Self {
        PaymentError::ProviderError {
            gateway: gateway.to_string(),
            message: message.into(),
            provider_code: None,
            retryable: false,
        }
    }

    pub fn is_retryable(&self) -> bool {
        match self {
            PaymentError::ValidationError { .. } => false,
            PaymentError::NetworkError { .. } => true,
            PaymentError::RateLimitError { .. } => true,
            PaymentError::WebhookVerificationError { .. } => false,
            PaymentError::ProviderError { retryable, .. } => *retryable,
        }
    }

    pub fn http_status_code(&self) -> u16 {
        match self {
            PaymentError::ValidationError { .. } => 400,
            PaymentError::NetworkError { .. } => 503,
            PaymentError::RateLimitError { .. } => 429,
            PaymentError::WebhookVerificationError { .. } => 400,
            PaymentError::ProviderError { .. } => 502,
        }
    }

    pub fn user_message(&self) -> String {
        match self {
            PaymentError::ValidationError { message, .. } => message.clone(),
            PaymentError::NetworkError { .. } => {
                "Payment gateway is temporarily unavailable".to_string()
            }
            PaymentError::RateLimitError { .. } => {
                "Too many requests to payment gateway. Please retry shortly".to_string()
            }
            PaymentError::WebhookVerificationError { .. } => "Invalid signature".to_string(),
            PaymentError::ProviderError { .. } => "Payment gateway returned an error".to_string(),
        }
    }
}

impl From<PaymentError> for crate::error::AppError {
    fn from(err: PaymentError) -> Self {
        use crate::error::{AppError, AppErrorKind, DomainError, ExternalError, ValidationError};

        match err {
            PaymentError::ValidationError { message, field } => {
                AppError::new(AppErrorKind::Validation(ValidationError::InvalidField {
                    field: field.unwrap_or_else(|| "request".to_string()),
                    reason: message,
                }))
            }
            PaymentError::WebhookVerificationError { message } => {
                AppError::new(AppErrorKind::Domain(DomainError::SignatureMismatch {
                    context: message,
                }))
            }
            PaymentError::RateLimitError {
                retry_after_seconds,
                ..
            } => AppError::new(AppErrorKind::External(ExternalError::RateLimit {
                service: "payment_gateway".to_string(),
                retry_after: retry_after_seconds,
            })),
            PaymentError::NetworkError { ref message } => {
                AppError::new(AppErrorKind::External(ExternalError::PaymentGateway {
                    gateway: "network".to_string(),
                    message: message.clone(),
                    is_retryable: true,
                }))
            }
            PaymentError::ProviderError {
                gateway,
                message,
                retryable,
                ..
            } => AppError::new(AppErrorKind::External(ExternalError::PaymentGateway {
                gateway,
                message,
                is_retryable: retryable,
            })),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_http_status_mapping_is_correct() {
        assert_eq!(
            PaymentError::ValidationError {
                message: "bad".to_string(),
                field: None
            }
            .http_status_code(),
            400
        );
        assert_eq!(
            PaymentError::RateLimitError {
                message: "limited".to_string(),
                retry_after_seconds: Some(30)
            }
            .http_status_code(),
            429
        );
        assert_eq!(
            PaymentError::provider("razorpay", "boom").http_status_code(),
            502
        );
    }

    #[test]
    fn retryable_flags_are_set() {
        assert!(PaymentError::NetworkError {
            message: "timeout".to_string()
        }
        .is_retryable());
        assert!(!PaymentError::validation("amount is required", "amount").is_retryable());
    }

    #[test]
    fn validation_error_converts_to_bad_request() {
        let app: crate::error::AppError =
            PaymentError::validation("customer.email is required", "customer.email").into();
        assert_eq!(app.status_code(), 400);
    }

    #[test]
    fn provider_error_converts_to_bad_gateway() {
        let app: crate::error::AppError = PaymentError::provider("stripe", "HTTP 500").into();
        assert_eq!(app.status_code(), 502);
    }
}
