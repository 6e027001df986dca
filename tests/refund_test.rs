mod common;

use bigdecimal::BigDecimal;
use booking_payments::database::models::{PaymentRecord, PaymentStatus};
use booking_payments::database::PaymentStore;
use booking_payments::payments::types::{NormalizedStatus, PaymentMode};
use booking_payments::services::payment_orchestrator::{RefundPaymentRequest, RequestContext};
use booking_payments::services::payment_state::GatewayOutcome;
use common::{booking_request, MockBookingService, TestApp};
use serde_json::json;
use std::str::FromStr;
use wiremock::matchers::{method, path};
use wiremock::{Mock, ResponseTemplate};

async fn pending_payment(app: &TestApp) -> PaymentRecord {
    Mock::given(method("POST"))
        .and(path("/v1/orders"))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(json!({"id": "order_abc", "status": "created"})),
        )
        .mount(&app.server)
        .await;

    let ctx = RequestContext::system("test");
    let initiated = app
        .orchestrator
        .initiate_payment(booking_request("bk_1", "1000"), &ctx)
        .await
        .unwrap();
    app.store
        .find_payment(initiated.payment_id)
        .await
        .unwrap()
        .unwrap()
}

async fn settle(app: &TestApp, payment: &PaymentRecord, status: NormalizedStatus) -> PaymentRecord {
    app.orchestrator
        .reconciler()
        .apply(
            payment,
            GatewayOutcome {
                event_id: Some(format!("evt_{}", status)),
                event: "payment.captured".to_string(),
                status,
                gateway_payment_id: Some("pay_123".to_string()),
                payment_mode: Some(PaymentMode::Upi),
                failure_reason: None,
                payload: json!({}),
            },
            "webhook:razorpay",
        )
        .await
        .unwrap()
        .payment()
        .clone()
}

async fn mount_refund(app: &TestApp) {
    Mock::given(method("POST"))
        .and(path("/v1/payments/pay_123/refund"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "id": "rfnd_1",
            "amount": 40000,
            "status": "processed"
        })))
        .mount(&app.server)
        .await;
}

fn refund(amount: Option<&str>) -> RefundPaymentRequest {
    RefundPaymentRequest {
        amount: amount.map(|a| BigDecimal::from_str(a).unwrap()),
        reason: Some("customer cancelled".to_string()),
    }
}

#[tokio::test]
async fn pending_payment_cannot_be_refunded() {
    let app = TestApp::new(MockBookingService::default().with_booking("bk_1", "1000")).await;
    let payment = pending_payment(&app).await;

    let err = app
        .orchestrator
        .initiate_refund(payment.id, refund(None), &RequestContext::system("admin"))
        .await
        .unwrap_err();
    assert_eq!(err.status_code(), 409);
}

#[tokio::test]
async fn failed_payment_cannot_be_refunded() {
    let app = TestApp::new(MockBookingService::default().with_booking("bk_1", "1000")).await;
    let payment = pending_payment(&app).await;
    let failed = settle(&app, &payment, NormalizedStatus::Failed).await;
    assert_eq!(failed.status, PaymentStatus::Failed);

    let err = app
        .orchestrator
        .initiate_refund(payment.id, refund(Some("100")), &RequestContext::system("admin"))
        .await
        .unwrap_err();
    assert_eq!(err.status_code(), 409);
}

#[tokio::test]
async fn full_refund_marks_payment_refunded() {
    let app = TestApp::new(MockBookingService::default().with_booking("bk_1", "1000")).await;
    let payment = pending_payment(&app).await;
    settle(&app, &payment, NormalizedStatus::Success).await;
    mount_refund(&app).await;

    let result = app
        .orchestrator
        .initiate_refund(payment.id, refund(None), &RequestContext::system("admin"))
        .await
        .unwrap();
    assert_eq!(result.payment.status, PaymentStatus::Refunded);
    assert_eq!(result.payment.refunded_amount, BigDecimal::from(1000));
    assert_eq!(result.refund.refund_id, "rfnd_1");

    let txn = app.store.find_transaction(payment.id).await.unwrap().unwrap();
    assert!(txn.has_event("refund:rfnd_1"));
}

#[tokio::test]
async fn partial_refund_keeps_payment_successful() {
    let app = TestApp::new(MockBookingService::default().with_booking("bk_1", "1000")).await;
    let payment = pending_payment(&app).await;
    settle(&app, &payment, NormalizedStatus::Success).await;
    mount_refund(&app).await;

    let result = app
        .orchestrator
        .initiate_refund(payment.id, refund(Some("400")), &RequestContext::system("admin"))
        .await
        .unwrap();
    assert_eq!(result.payment.status, PaymentStatus::Success);
    assert_eq!(result.payment.refunds.len(), 1);
    assert_eq!(result.payment.refunded_amount, BigDecimal::from(400));

    // Only 600 remains refundable.
    let err = app
        .orchestrator
        .initiate_refund(payment.id, refund(Some("700")), &RequestContext::system("admin"))
        .await
        .unwrap_err();
    assert_eq!(err.status_code(), 409);
}
