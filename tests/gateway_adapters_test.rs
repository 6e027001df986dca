use bigdecimal::BigDecimal;
use booking_payments::payments::config::{GatewayConfig, GatewayCredentials};
use booking_payments::payments::factory::GatewayRegistry;
use booking_payments::payments::types::{
    CreateOrderRequest, CustomerDetails, GatewayName, Money, NormalizedStatus, PaymentMode,
    StatusQuery,
};
use booking_payments::payments::PaymentGateway;
use serde_json::json;
use std::str::FromStr;
use std::sync::Arc;
use wiremock::matchers::{body_partial_json, body_string_contains, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn gateway(name: GatewayName, base_url: &str, max_retries: u32) -> Arc<dyn PaymentGateway> {
    let mut config = GatewayConfig::with_defaults(
        name,
        GatewayCredentials {
            key_id: format!("{}_key", name),
            key_secret: format!("{}_secret", name),
            webhook_secret: None,
        },
    )
    .with_base_url(base_url);
    config.max_retries = max_retries;
    config.timeout_secs = 5;
    GatewayRegistry::build(config).unwrap()
}

fn order(amount: &str, currency: &str) -> CreateOrderRequest {
    CreateOrderRequest {
        order_ref: "pay_ref_1".to_string(),
        amount: Money::new(BigDecimal::from_str(amount).unwrap(), currency),
        customer: CustomerDetails {
            id: Some("user_1".to_string()),
            name: Some("Asha".to_string()),
            email: Some("asha@example.com".to_string()),
            phone: Some("9999999999".to_string()),
        },
        return_url: None,
        notify_url: None,
        metadata: Some(json!({"booking_id": "bk_1"})),
    }
}

#[tokio::test]
async fn razorpay_order_is_created_in_minor_units() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/orders"))
        .and(body_partial_json(json!({
            "amount": 49900,
            "currency": "INR",
            "receipt": "pay_ref_1",
            "notes": {"booking_id": "bk_1"}
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"id": "order_abc"})))
        .expect(1)
        .mount(&server)
        .await;

    let razorpay = gateway(GatewayName::Razorpay, &server.uri(), 0);
    let response = razorpay.create_order(order("499.00", "INR")).await.unwrap();
    assert_eq!(response.gateway_order_id, "order_abc");
    assert_eq!(response.checkout_key.as_deref(), Some("razorpay_key"));
}

#[tokio::test]
async fn order_creation_is_never_retried() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/orders"))
        .respond_with(ResponseTemplate::new(503).set_body_json(json!({
            "error": {"description": "temporarily unavailable"}
        })))
        .expect(1)
        .mount(&server)
        .await;

    let razorpay = gateway(GatewayName::Razorpay, &server.uri(), 2);
    assert!(razorpay.create_order(order("499.00", "INR")).await.is_err());
}

#[tokio::test]
async fn status_lookups_retry_server_errors() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/v1/payments/pay_123"))
        .respond_with(ResponseTemplate::new(503))
        .up_to_n_times(1)
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/v1/payments/pay_123"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "id": "pay_123",
            "order_id": "order_abc",
            "status": "captured",
            "method": "netbanking",
            "amount": 49900,
            "currency": "INR"
        })))
        .mount(&server)
        .await;

    let razorpay = gateway(GatewayName::Razorpay, &server.uri(), 1);
    let status = razorpay
        .fetch_status(StatusQuery {
            gateway_order_id: Some("order_abc".to_string()),
            gateway_payment_id: Some("pay_123".to_string()),
        })
        .await
        .unwrap();
    assert_eq!(status.status, NormalizedStatus::Success);
    assert_eq!(status.payment_mode, Some(PaymentMode::NetBanking));
    assert_eq!(
        status.amount.unwrap().amount,
        BigDecimal::from_str("499").unwrap()
    );
}

#[tokio::test]
async fn cashfree_order_uses_major_units_and_client_headers() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/orders"))
        .and(header("x-client-id", "cashfree_key"))
        .and(header("x-client-secret", "cashfree_secret"))
        .and(body_partial_json(json!({
            "order_id": "pay_ref_1",
            "order_amount": 499.5,
            "order_currency": "INR"
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "order_id": "pay_ref_1",
            "cf_order_id": 2149460581u64,
            "payment_session_id": "session_abc",
            "order_status": "ACTIVE"
        })))
        .expect(1)
        .mount(&server)
        .await;

    let cashfree = gateway(GatewayName::Cashfree, &server.uri(), 0);
    let response = cashfree.create_order(order("499.50", "INR")).await.unwrap();
    assert_eq!(response.gateway_order_id, "pay_ref_1");
    assert_eq!(response.checkout_token.as_deref(), Some("session_abc"));
    assert!(response.checkout_key.is_none());
}

#[tokio::test]
async fn cashfree_status_prefers_successful_attempt() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/orders/pay_ref_1/payments"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            {"cf_payment_id": 1, "payment_status": "FAILED", "payment_amount": 499.5, "payment_currency": "INR", "payment_group": "card"},
            {"cf_payment_id": 2, "payment_status": "SUCCESS", "payment_amount": 499.5, "payment_currency": "INR", "payment_group": "upi"}
        ])))
        .mount(&server)
        .await;

    let cashfree = gateway(GatewayName::Cashfree, &server.uri(), 0);
    let status = cashfree
        .fetch_status(StatusQuery {
            gateway_order_id: Some("pay_ref_1".to_string()),
            gateway_payment_id: None,
        })
        .await
        .unwrap();
    assert_eq!(status.status, NormalizedStatus::Success);
    assert_eq!(status.gateway_payment_id.as_deref(), Some("2"));
    assert_eq!(status.payment_mode, Some(PaymentMode::Upi));
}

#[tokio::test]
async fn stripe_intent_is_created_with_form_body() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/payment_intents"))
        .and(header("idempotency-key", "pay_ref_1"))
        .and(body_string_contains("amount=4999"))
        .and(body_string_contains("currency=usd"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "id": "pi_123",
            "status": "requires_payment_method",
            "amount": 4999,
            "currency": "usd",
            "client_secret": "pi_123_secret_abc"
        })))
        .expect(1)
        .mount(&server)
        .await;

    let stripe = gateway(GatewayName::Stripe, &server.uri(), 0);
    let response = stripe.create_order(order("49.99", "USD")).await.unwrap();
    assert_eq!(response.gateway_order_id, "pi_123");
    assert_eq!(response.checkout_token.as_deref(), Some("pi_123_secret_abc"));
}

#[tokio::test]
async fn gateway_errors_carry_the_provider_message() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/v1/payment_intents/pi_missing"))
        .respond_with(ResponseTemplate::new(404).set_body_json(json!({
            "error": {"message": "No such payment_intent"}
        })))
        .mount(&server)
        .await;

    let stripe = gateway(GatewayName::Stripe, &server.uri(), 0);
    let err = stripe
        .fetch_status(StatusQuery {
            gateway_order_id: Some("pi_missing".to_string()),
            gateway_payment_id: None,
        })
        .await
        .unwrap_err();
    assert!(err.to_string().contains("404"), "{err}");
}

#[test]
fn only_razorpay_checks_checkout_signatures() {
    let razorpay = gateway(GatewayName::Razorpay, "http://localhost", 0);
    assert!(razorpay
        .verify_checkout_signature("order_abc", "pay_123", "deadbeef")
        .is_ok());

    for name in [GatewayName::Cashfree, GatewayName::Stripe] {
        let adapter = gateway(name, "http://localhost", 0);
        let err = adapter
            .verify_checkout_signature("order_abc", "pay_123", "deadbeef")
            .unwrap_err();
        assert_eq!(err.http_status_code(), 400);
        assert!(err.to_string().contains("checkout signatures"), "{err}");
    }
}
