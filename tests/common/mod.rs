#![allow(dead_code)]

use async_trait::async_trait;
use axum::Router;
use bigdecimal::BigDecimal;
use booking_payments::api::{router, AppState};
use booking_payments::config::PaymentsConfig;
use booking_payments::database::InMemoryPaymentStore;
use booking_payments::health::HealthChecker;
use booking_payments::payments::config::{GatewayConfig, GatewayCredentials};
use booking_payments::payments::factory::GatewayRegistry;
use booking_payments::payments::types::{CustomerDetails, GatewayName};
use booking_payments::services::booking_client::{
    Booking, BookingError, BookingPaymentUpdate, BookingService,
};
use booking_payments::services::notification::PaymentNotifier;
use booking_payments::services::payment_orchestrator::{
    InitiatePaymentRequest, PaymentOrchestrator,
};
use booking_payments::services::webhook_processor::WebhookProcessor;
use booking_payments::workers::PaymentIntake;
use std::collections::HashMap;
use std::str::FromStr;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use wiremock::MockServer;

pub const RAZORPAY_SECRET: &str = "rzp_test_secret";
pub const RAZORPAY_WEBHOOK_SECRET: &str = "rzp_whsec";

/// Booking service double that records every payment update it receives.
#[derive(Default)]
pub struct MockBookingService {
    bookings: Mutex<HashMap<String, Booking>>,
    updates: Mutex<Vec<(String, BookingPaymentUpdate)>>,
    fail_updates: bool,
}

impl MockBookingService {
    pub fn failing_updates() -> Self {
        Self {
            fail_updates: true,
            ..Self::default()
        }
    }

    pub fn with_booking(self, id: &str, total: &str) -> Self {
        self.bookings.lock().unwrap().insert(
            id.to_string(),
            Booking {
                id: id.to_string(),
                total_amount: BigDecimal::from_str(total).unwrap(),
                currency: Some("INR".to_string()),
                status: Some("PENDING_PAYMENT".to_string()),
            },
        );
        self
    }

    pub fn updates(&self) -> Vec<(String, BookingPaymentUpdate)> {
        self.updates.lock().unwrap().clone()
    }

    /// Waits for spawned notifications to land.
    pub async fn wait_for_updates(&self, count: usize) -> Vec<(String, BookingPaymentUpdate)> {
        for _ in 0..50 {
            if self.updates.lock().unwrap().len() >= count {
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        // Give any extra, unexpected notification a chance to show up too.
        tokio::time::sleep(Duration::from_millis(50)).await;
        self.updates()
    }
}

#[async_trait]
impl BookingService for MockBookingService {
    async fn get_booking(
        &self,
        booking_id: &str,
        _auth_token: Option<&str>,
    ) -> Result<Booking, BookingError> {
        self.bookings
            .lock()
            .unwrap()
            .get(booking_id)
            .cloned()
            .ok_or_else(|| BookingError::NotFound {
                booking_id: booking_id.to_string(),
            })
    }

    async fn mark_payment(
        &self,
        booking_id: &str,
        update: &BookingPaymentUpdate,
        _auth_token: Option<&str>,
    ) -> Result<(), BookingError> {
        if self.fail_updates {
            return Err(BookingError::Unavailable {
                message: "booking service down".to_string(),
            });
        }
        self.updates
            .lock()
            .unwrap()
            .push((booking_id.to_string(), update.clone()));
        Ok(())
    }
}

pub fn razorpay_config(base_url: &str) -> GatewayConfig {
    let mut config = GatewayConfig::with_defaults(
        GatewayName::Razorpay,
        GatewayCredentials {
            key_id: "rzp_test_key".to_string(),
            key_secret: RAZORPAY_SECRET.to_string(),
            webhook_secret: Some(RAZORPAY_WEBHOOK_SECRET.to_string()),
        },
    )
    .with_base_url(base_url);
    config.max_retries = 0;
    config.timeout_secs = 5;
    config
}

pub struct TestApp {
    pub server: MockServer,
    pub store: Arc<InMemoryPaymentStore>,
    pub booking: Arc<MockBookingService>,
    pub orchestrator: Arc<PaymentOrchestrator>,
    pub webhooks: Arc<WebhookProcessor>,
    pub router: Router,
}

impl TestApp {
    pub async fn new(booking: MockBookingService) -> Self {
        let server = MockServer::start().await;
        let gateways = Arc::new(
            GatewayRegistry::from_configs(vec![razorpay_config(&server.uri())]).unwrap(),
        );
        let store = Arc::new(InMemoryPaymentStore::new());
        let booking = Arc::new(booking);

        let orchestrator = Arc::new(PaymentOrchestrator::new(
            gateways.clone(),
            store.clone(),
            booking.clone(),
            PaymentsConfig::default(),
        ));
        let webhooks = Arc::new(WebhookProcessor::new(
            gateways.clone(),
            store.clone(),
            orchestrator.reconciler().clone(),
            PaymentNotifier::new(booking.clone()),
        ));
        let (intake, _receiver) = PaymentIntake::channel(8);

        let router = router(AppState {
            orchestrator: orchestrator.clone(),
            webhooks: webhooks.clone(),
            intake,
            health: HealthChecker::new(store.clone(), gateways),
        });

        Self {
            server,
            store,
            booking,
            orchestrator,
            webhooks,
            router,
        }
    }
}

pub fn booking_request(booking_id: &str, amount: &str) -> InitiatePaymentRequest {
    InitiatePaymentRequest {
        purpose: Default::default(),
        booking_id: Some(booking_id.to_string()),
        amount: BigDecimal::from_str(amount).unwrap(),
        currency: Some("INR".to_string()),
        gateway: None,
        country: Some("IN".to_string()),
        customer: CustomerDetails {
            id: Some("user_1".to_string()),
            name: Some("Asha".to_string()),
            email: Some("asha@example.com".to_string()),
            phone: Some("9999999999".to_string()),
        },
        payer_ref: None,
        payer_type: None,
        receiver_ref: None,
        receiver_type: None,
        return_url: None,
        notify_url: None,
        metadata: None,
        idempotency_key: None,
    }
}

pub fn captured_webhook(order_id: &str, payment_id: &str, amount_minor: i64) -> String {
    serde_json::json!({
        "entity": "event",
        "event": "payment.captured",
        "contains": ["payment"],
        "payload": {
            "payment": {
                "entity": {
                    "id": payment_id,
                    "order_id": order_id,
                    "status": "captured",
                    "method": "upi",
                    "amount": amount_minor,
                    "currency": "INR"
                }
            }
        },
        "created_at": 1700000000
    })
    .to_string()
}
