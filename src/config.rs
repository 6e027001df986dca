//! Application configuration module
//! Handles environment variable loading, configuration validation, and application settings

use std::env;

/// Main application configuration
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub server: ServerConfig,
    /// `None` when running with `SKIP_EXTERNALS=true`
    pub database: Option<DatabaseConfig>,
    pub logging: LoggingConfig,
    pub booking: BookingServiceConfig,
    pub payments: PaymentsConfig,
    pub skip_externals: bool,
}

/// Server configuration
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

/// Database configuration
#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub min_connections: u32,
    pub connection_timeout: u64,   // seconds
    pub idle_timeout: Option<u64>, // seconds
}

/// Logging configuration
#[derive(Debug, Clone)]
pub struct LoggingConfig {
    pub level: String,
    pub format: LogFormat,
}

/// Log format options
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Json,
    Plain,
}

/// Booking service collaborator
#[derive(Debug, Clone)]
pub struct BookingServiceConfig {
    pub base_url: String,
    pub service_key: Option<String>,
    pub timeout_secs: u64,
}

/// Orchestration defaults and intake queue sizing
#[derive(Debug, Clone)]
pub struct PaymentsConfig {
    pub default_currency: String,
    pub default_region: String,
    pub intake_max_deliveries: u32,
    pub intake_queue_capacity: usize,
}

fn parse_var<T: std::str::FromStr>(name: &str, default: &str) -> Result<T, ConfigError> {
    env::var(name)
        .unwrap_or_else(|_| default.to_string())
        .trim()
        .parse()
        .map_err(|_| ConfigError::InvalidValue(name.to_string()))
}

fn flag(name: &str) -> bool {
    env::var(name)
        .map(|v| matches!(v.trim().to_lowercase().as_str(), "true" | "1" | "yes"))
        .unwrap_or(false)
}

impl AppConfig {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        // Load .env file if it exists
        let _ = dotenv::dotenv().ok();

        let skip_externals = flag("SKIP_EXTERNALS");
        let database = if skip_externals {
            None
        } else {
            Some(DatabaseConfig::from_env()?)
        };

        Ok(AppConfig {
            server: ServerConfig::from_env()?,
            database,
            logging: LoggingConfig::from_env()?,
            booking: BookingServiceConfig::from_env()?,
            payments: PaymentsConfig::from_env()?,
            skip_externals,
        })
    }

    /// Validate the entire configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.server.validate()?;
        if let Some(database) = &self.database {
            database.validate()?;
        }
        self.logging.validate()?;
        self.booking.validate()?;
        self.payments.validate()?;

        Ok(())
    }
}

impl ServerConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Ok(ServerConfig {
            host: env::var("SERVER_HOST").unwrap_or_else(|_| "127.0.0.1".to_string()),
            port: parse_var("SERVER_PORT", "8000")?,
        })
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.port == 0 {
            return Err(ConfigError::InvalidValue(
                "SERVER_PORT cannot be 0".to_string(),
            ));
        }

        if self.host.is_empty() {
            return Err(ConfigError::InvalidValue(
                "SERVER_HOST cannot be empty".to_string(),
            ));
        }

        Ok(())
    }

    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

impl DatabaseConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Ok(DatabaseConfig {
            url: env::var("DATABASE_URL")
                .map_err(|_| ConfigError::MissingVariable("DATABASE_URL".to_string()))?,
            max_connections: parse_var("DB_MAX_CONNECTIONS", "20")?,
            min_connections: parse_var("DB_MIN_CONNECTIONS", "5")?,
            connection_timeout: parse_var("DB_CONNECTION_TIMEOUT", "30")?,
            idle_timeout: env::var("DB_IDLE_TIMEOUT")
                .ok()
                .and_then(|val| val.parse().ok()),
        })
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.url.is_empty() {
            return Err(ConfigError::InvalidValue("DATABASE_URL".to_string()));
        }

        if self.max_connections == 0 {
            return Err(ConfigError::InvalidValue("DB_MAX_CONNECTIONS".to_string()));
        }

        if self.min_connections > self.max_connections {
            return Err(ConfigError::InvalidValue(
                "DB_MIN_CONNECTIONS must be <= DB_MAX_CONNECTIONS".to_string(),
            ));
        }

        Ok(())
    }
}

impl LoggingConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Ok(LoggingConfig {
            level: env::var("LOG_LEVEL").unwrap_or_else(|_| "INFO".to_string()),
            format: match env::var("LOG_FORMAT")
                .unwrap_or_else(|_| "plain".to_string())
                .to_lowercase()
                .as_str()
            {
                "json" => LogFormat::Json,
                _ => LogFormat::Plain,
            },
        })
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let valid_levels = ["TRACE", "DEBUG", "INFO", "WARN", "ERROR"];
        if !valid_levels.contains(&self.level.to_uppercase().as_str()) {
            return Err(ConfigError::InvalidValue("LOG_LEVEL".to_string()));
        }

        Ok(())
    }
}

impl BookingServiceConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Ok(BookingServiceConfig {
            base_url: env::var("BOOKING_SERVICE_URL")
                .unwrap_or_else(|_| "http://127.0.0.1:4000".to_string())
                .trim_end_matches('/')
                .to_string(),
            service_key: env::var("BOOKING_SERVICE_KEY")
                .ok()
                .filter(|k| !k.trim().is_empty()),
            timeout_secs: parse_var("BOOKING_TIMEOUT_SECS", "15")?,
        })
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if !self.base_url.starts_with("http://") && !self.base_url.starts_with("https://") {
            return Err(ConfigError::InvalidValue(
                "BOOKING_SERVICE_URL must be a valid URL".to_string(),
            ));
        }

        if self.timeout_secs == 0 {
            return Err(ConfigError::InvalidValue("BOOKING_TIMEOUT_SECS".to_string()));
        }

        Ok(())
    }
}

/// Upper bound for `INTAKE_MAX_DELIVERIES`
pub const MAX_INTAKE_DELIVERIES: u32 = 20;

impl Default for PaymentsConfig {
    fn default() -> Self {
        Self {
            default_currency: "INR".to_string(),
            default_region: "IN".to_string(),
            intake_max_deliveries: 3,
            intake_queue_capacity: 256,
        }
    }
}

impl PaymentsConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Ok(PaymentsConfig {
            default_currency: env::var("DEFAULT_CURRENCY")
                .unwrap_or_else(|_| "INR".to_string())
                .trim()
                .to_uppercase(),
            default_region: env::var("DEFAULT_REGION")
                .unwrap_or_else(|_| "IN".to_string())
                .trim()
                .to_uppercase(),
            intake_max_deliveries: parse_var("INTAKE_MAX_DELIVERIES", "3")?,
            intake_queue_capacity: parse_var("INTAKE_QUEUE_CAPACITY", "256")?,
        })
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.default_currency.len() != 3 {
            return Err(ConfigError::InvalidValue("DEFAULT_CURRENCY".to_string()));
        }

        if self.intake_max_deliveries == 0 || self.intake_max_deliveries > MAX_INTAKE_DELIVERIES {
            return Err(ConfigError::InvalidValue("INTAKE_MAX_DELIVERIES".to_string()));
        }

        if self.intake_queue_capacity == 0 {
            return Err(ConfigError::InvalidValue("INTAKE_QUEUE_CAPACITY".to_string()));
        }

        Ok(())
    }
}

/// Configuration error types
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing environment variable: {0}")]
    MissingVariable(String),

    #[error("Invalid value for configuration: {0}")]
    InvalidValue(String),

    #[error("Validation failed: {0}")]
    ValidationFailed(String),
}

impl From<crate::payments::error::PaymentError> for ConfigError {
    fn from(err: crate::payments::error::PaymentError) -> Self {
        ConfigError::ValidationFailed(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_server_config_validation() {
        let config = ServerConfig {
            host: "127.0.0.1".to_string(),
            port: 8000,
        };

        assert!(config.validate().is_ok());
        assert_eq!(config.bind_address(), "127.0.0.1:8000");
    }

    #[test]
    fn test_invalid_port_validation() {
        let config = ServerConfig {
            host: "127.0.0.1".to_string(),
            port: 0, // Invalid port
        };

        assert!(config.validate().is_err());
    }

    #[test]
    fn test_empty_host_validation() {
        let config = ServerConfig {
            host: "".to_string(),
            port: 8000,
        };

        assert!(config.validate().is_err());
    }

    #[test]
    fn test_pool_bounds_validation() {
        let config = DatabaseConfig {
            url: "postgres://localhost/payments".to_string(),
            max_connections: 2,
            min_connections: 5,
            connection_timeout: 30,
            idle_timeout: None,
        };

        assert!(config.validate().is_err());
    }

    #[test]
    fn test_booking_url_must_be_http() {
        let config = BookingServiceConfig {
            base_url: "bookings.internal".to_string(),
            service_key: None,
            timeout_secs: 15,
        };

        assert!(config.validate().is_err());
    }

    #[test]
    fn test_payments_defaults_are_valid() {
        let config = PaymentsConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.default_currency, "INR");
    }

    #[test]
    fn test_intake_deliveries_are_bounded() {
        let mut config = PaymentsConfig::default();
        config.intake_max_deliveries = MAX_INTAKE_DELIVERIES;
        assert!(config.validate().is_ok());

        config.intake_max_deliveries = 34;
        assert!(config.validate().is_err());

        config.intake_max_deliveries = 0;
        assert!(config.validate().is_err());
    }
}
