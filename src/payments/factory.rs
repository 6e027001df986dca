use crate::payments::config::GatewayConfig;
use crate::payments::error::PaymentResult;
use crate::payments::provider::PaymentGateway;
use crate::payments::providers::{CashfreeGateway, RazorpayGateway, StripeGateway};
use crate::payments::types::GatewayName;
use bigdecimal::BigDecimal;
use std::collections::HashMap;
use std::str::FromStr;
use std::sync::Arc;
use tracing::info;

/// Gateway name → adapter, built once at startup.
#[derive(Clone, Default)]
pub struct GatewayRegistry {
    gateways: HashMap<GatewayName, Arc<dyn PaymentGateway>>,
}

impl GatewayRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn build(config: GatewayConfig) -> PaymentResult<Arc<dyn PaymentGateway>> {
        Ok(match config.gateway {
            GatewayName::Razorpay => Arc::new(RazorpayGateway::new(config)?),
            GatewayName::Cashfree => Arc::new(CashfreeGateway::new(config)?),
            GatewayName::Stripe => Arc::new(StripeGateway::new(config)?),
        })
    }

    pub fn from_configs(configs: Vec<GatewayConfig>) -> PaymentResult<Self> {
        let mut registry = Self::new();
        for config in configs {
            registry.register(Self::build(config)?);
        }
        Ok(registry)
    }

    /// Registers every gateway that has credentials in the environment.
    pub fn from_env() -> PaymentResult<Self> {
        let mut configs = Vec::new();
        for gateway in GatewayName::ALL {
            match GatewayConfig::from_env(gateway)? {
                Some(config) => {
                    info!(
                        gateway = %gateway,
                        enabled = config.enabled,
                        mode = ?config.mode,
                        priority = config.priority,
                        "payment gateway configured"
                    );
                    configs.push(config);
                }
                None => info!(gateway = %gateway, "payment gateway not configured"),
            }
        }
        Self::from_configs(configs)
    }

    pub fn register(&mut self, gateway: Arc<dyn PaymentGateway>) {
        self.gateways.insert(gateway.name(), gateway);
    }

    pub fn get(&self, name: GatewayName) -> Option<Arc<dyn PaymentGateway>> {
        self.gateways.get(&name).cloned()
    }

    /// Looks a gateway up by its route/header name. Unknown names are a plain miss.
    pub fn resolve(&self, name: &str) -> Option<Arc<dyn PaymentGateway>> {
        GatewayName::from_str(name)
            .ok()
            .and_then(|gateway| self.get(gateway))
    }

    pub fn names(&self) -> Vec<GatewayName> {
        let mut names: Vec<GatewayName> = self.gateways.keys().copied().collect();
        names.sort_by_key(|n| n.as_str());
        names
    }

    pub fn enabled(&self) -> Vec<Arc<dyn PaymentGateway>> {
        let mut enabled: Vec<Arc<dyn PaymentGateway>> = self
            .gateways
            .values()
            .filter(|gateway| gateway.config().enabled)
            .cloned()
            .collect();
        enabled.sort_by_key(|gateway| (gateway.config().priority, gateway.name().as_str()));
        enabled
    }

    /// Enabled gateways serving the region, currency and amount, best priority first.
    pub fn candidates(
        &self,
        country: &str,
        currency: &str,
        amount: &BigDecimal,
    ) -> Vec<Arc<dyn PaymentGateway>> {
        let mut matches: Vec<Arc<dyn PaymentGateway>> = self
            .gateways
            .values()
            .filter(|gateway| {
                let config = gateway.config();
                config.enabled
                    && config.supports_region(country)
                    && config.supports_currency(currency)
                    && config.accepts_amount(amount)
            })
            .cloned()
            .collect();
        matches.sort_by_key(|gateway| (gateway.config().priority, gateway.name().as_str()));
        matches
    }

    pub fn select_for_region(
        &self,
        country: &str,
        currency: &str,
        amount: &BigDecimal,
    ) -> Option<Arc<dyn PaymentGateway>> {
        self.candidates(country, currency, amount).into_iter().next()
    }
}
