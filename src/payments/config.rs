//! Per-gateway configuration.
//!
//! Each adapter receives its `GatewayConfig` at construction; nothing reads gateway
//! credentials from the environment after startup.

use crate::payments::error::{PaymentError, PaymentResult};
use crate::payments::types::{GatewayName, PaymentMode};
use bigdecimal::BigDecimal;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GatewayMode {
    Sandbox,
    Production,
}

impl FromStr for GatewayMode {
    type Err = PaymentError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_lowercase().as_str() {
            "sandbox" | "test" => Ok(GatewayMode::Sandbox),
            "production" | "live" => Ok(GatewayMode::Production),
            other => Err(PaymentError::validation(
                format!("unknown gateway mode: {}", other),
                "mode",
            )),
        }
    }
}

#[derive(Debug, Clone)]
pub struct GatewayCredentials {
    /// Public key id (Razorpay key id, Cashfree client id, Stripe publishable key).
    pub key_id: String,
    /// Secret used for API authentication and checkout signatures.
    pub key_secret: String,
    /// Secret used for webhook signatures. Falls back to `key_secret` when unset.
    pub webhook_secret: Option<String>,
}

/// Amount bounds for one payment method, in major units.
#[derive(Debug, Clone)]
pub struct MethodLimits {
    pub method: PaymentMode,
    pub min_amount: BigDecimal,
    pub max_amount: BigDecimal,
}

impl MethodLimits {
    pub fn allows(&self, amount: &BigDecimal) -> bool {
        amount >= &self.min_amount && amount <= &self.max_amount
    }
}

#[derive(Debug, Clone)]
pub struct GatewayConfig {
    pub gateway: GatewayName,
    pub enabled: bool,
    pub mode: GatewayMode,
    pub credentials: GatewayCredentials,
    pub base_url: String,
    pub regions: Vec<String>,
    pub currencies: Vec<String>,
    pub methods: Vec<MethodLimits>,
    /// Lower numbers win.
    pub priority: u32,
    pub timeout_secs: u64,
    pub max_retries: u32,
    /// Maximum webhook age in seconds (Stripe); 0 disables the check.
    pub webhook_tolerance_secs: i64,
}

impl GatewayConfig {
    pub fn webhook_secret(&self) -> &str {
        self.credentials
            .webhook_secret
            .as_deref()
            .unwrap_or(&self.credentials.key_secret)
    }

    pub fn supports_region(&self, country: &str) -> bool {
        let country = country.trim();
        self.regions.iter().any(|r| r == "*" || r.eq_ignore_ascii_case(country))
    }

    pub fn supports_currency(&self, currency: &str) -> bool {
        let currency = currency.trim();
        self.currencies.iter().any(|c| c.eq_ignore_ascii_case(currency))
    }

    /// True when at least one configured payment method accepts the amount.
    pub fn accepts_amount(&self, amount: &BigDecimal) -> bool {
        self.methods.iter().any(|m| m.allows(amount))
    }

    /// Sandbox configuration with the gateway's default regions, currencies and limits.
    pub fn with_defaults(gateway: GatewayName, credentials: GatewayCredentials) -> Self {
        Self {
            gateway,
            enabled: true,
            mode: GatewayMode::Sandbox,
            credentials,
            base_url: Self::default_base_url(gateway, GatewayMode::Sandbox).to_string(),
            regions: split_list(Self::default_regions(gateway)),
            currencies: split_list(Self::default_currencies(gateway)),
            methods: parse_method_limits(Self::default_methods(gateway)).unwrap_or_default(),
            priority: Self::default_priority(gateway),
            timeout_secs: 15,
            max_retries: 2,
            webhook_tolerance_secs: if gateway == GatewayName::Stripe { 300 } else { 0 },
        }
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    fn default_base_url(gateway: GatewayName, mode: GatewayMode) -> &'static str {
        match (gateway, mode) {
            (GatewayName::Razorpay, _) => "https://api.razorpay.com",
            (GatewayName::Cashfree, GatewayMode::Sandbox) => "https://sandbox.cashfree.com/pg",
            (GatewayName::Cashfree, GatewayMode::Production) => "https://api.cashfree.com/pg",
            (GatewayName::Stripe, _) => "https://api.stripe.com",
        }
    }

    fn default_regions(gateway: GatewayName) -> &'static str {
        match gateway {
            GatewayName::Razorpay | GatewayName::Cashfree => "IN",
            GatewayName::Stripe => "US,GB,AE,SG,AU,CA,DE,FR,NL,IE",
        }
    }

    fn default_currencies(gateway: GatewayName) -> &'static str {
        match gateway {
            GatewayName::Razorpay | GatewayName::Cashfree => "INR",
            GatewayName::Stripe => "USD,EUR,GBP,AED,SGD,AUD,CAD",
        }
    }

    fn default_methods(gateway: GatewayName) -> &'static str {
        match gateway {
            GatewayName::Razorpay => {
                "upi:1:100000,card:1:500000,net_banking:1:1000000,wallet:1:20000"
            }
            GatewayName::Cashfree => "upi:1:100000,card:1:500000,net_banking:1:1000000",
            GatewayName::Stripe => "card:0.5:999999",
        }
    }

    fn default_priority(gateway: GatewayName) -> u32 {
        match gateway {
            GatewayName::Razorpay => 1,
            GatewayName::Cashfree => 2,
            GatewayName::Stripe => 3,
        }
    }

    /// Reads `<PREFIX>_*` variables. Returns `Ok(None)` for gateways without credentials.
    pub fn from_env(gateway: GatewayName) -> PaymentResult<Option<Self>> {
        let prefix = gateway.env_prefix();
        let var = |name: &str| std::env::var(format!("{}_{}", prefix, name)).ok();

        let enabled = var("ENABLED")
            .map(|v| v.trim().eq_ignore_ascii_case("true"))
            .unwrap_or(true);
        let (key_id, key_secret) = match (var("KEY_ID"), var("KEY_SECRET")) {
            (Some(id), Some(secret)) if !secret.trim().is_empty() => (id, secret),
            _ => return Ok(None),
        };

        let mode = match var("MODE") {
            Some(raw) => GatewayMode::from_str(&raw)?,
            None => GatewayMode::Sandbox,
        };
        let methods = parse_method_limits(
            &var("METHODS").unwrap_or_else(|| Self::default_methods(gateway).to_string()),
        )?;

        Ok(Some(Self {
            gateway,
            enabled,
            mode,
            credentials: GatewayCredentials {
                key_id,
                key_secret,
                webhook_secret: var("WEBHOOK_SECRET"),
            },
            base_url: var("BASE_URL")
                .unwrap_or_else(|| Self::default_base_url(gateway, mode).to_string()),
            regions: split_list(
                &var("REGIONS").unwrap_or_else(|| Self::default_regions(gateway).to_string()),
            ),
            currencies: split_list(
                &var("CURRENCIES").unwrap_or_else(|| Self::default_currencies(gateway).to_string()),
            ),
            methods,
            priority: var("PRIORITY")
                .and_then(|v| v.parse::<u32>().ok())
                .unwrap_or_else(|| Self::default_priority(gateway)),
            timeout_secs: var("TIMEOUT_SECS")
                .and_then(|v| v.parse::<u64>().ok())
                .unwrap_or(15),
            max_retries: var("MAX_RETRIES")
                .and_then(|v| v.parse::<u32>().ok())
                .unwrap_or(2),
            webhook_tolerance_secs: var("WEBHOOK_TOLERANCE_SECS")
                .and_then(|v| v.parse::<i64>().ok())
                .unwrap_or(if gateway == GatewayName::Stripe { 300 } else { 0 }),
        }))
    }
}

fn split_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(|s| s.trim().to_uppercase())
        .filter(|s| !s.is_empty())
        .collect()
}

/// Parses `method:min:max` entries separated by commas.
pub fn parse_method_limits(raw: &str) -> PaymentResult<Vec<MethodLimits>> {
    let mut limits = Vec::new();
    for entry in raw.split(',').map(str::trim).filter(|e| !e.is_empty()) {
        let parts: Vec<&str> = entry.split(':').map(str::trim).collect();
        if parts.len() != 3 {
            return Err(PaymentError::validation(
                format!("payment method limit must be method:min:max, got {}", entry),
                "methods",
            ));
        }
        let parse_bound = |value: &str| {
            BigDecimal::from_str(value).map_err(|_| {
                PaymentError::validation(format!("invalid amount bound: {}", value), "methods")
            })
        };
        let min_amount = parse_bound(parts[1])?;
        let max_amount = parse_bound(parts[2])?;
        if min_amount > max_amount {
            return Err(PaymentError::validation(
                format!("min exceeds max for {}", parts[0]),
                "methods",
            ));
        }
        limits.push(MethodLimits {
            method: PaymentMode::from_gateway_method(parts[0]),
            min_amount,
            max_amount,
        });
    }
    Ok(limits)
}
