mod common;

use booking_payments::database::PaymentStore;
use booking_payments::services::payment_orchestrator::RequestContext;
use booking_payments::workers::{IntakeWorkerConfig, PaymentIntake, PaymentIntakeWorker};
use common::{booking_request, MockBookingService, TestApp};
use serde_json::json;
use std::time::Duration;
use tokio::sync::watch;
use wiremock::matchers::{method, path};
use wiremock::{Mock, ResponseTemplate};

#[tokio::test]
async fn queued_request_is_redelivered_after_a_gateway_outage() {
    let app = TestApp::new(MockBookingService::default().with_booking("bk_1", "1000")).await;
    Mock::given(method("POST"))
        .and(path("/v1/orders"))
        .respond_with(ResponseTemplate::new(503))
        .up_to_n_times(1)
        .expect(1)
        .mount(&app.server)
        .await;
    Mock::given(method("POST"))
        .and(path("/v1/orders"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"id": "order_q1"})))
        .expect(1)
        .mount(&app.server)
        .await;

    let (intake, receiver) = PaymentIntake::channel(4);
    let worker = PaymentIntakeWorker::new(
        app.orchestrator.clone(),
        &intake,
        receiver,
        IntakeWorkerConfig {
            max_deliveries: 3,
            redelivery_delay: Duration::from_millis(10),
        },
    );
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let handle = tokio::spawn(worker.run(shutdown_rx));

    let queued = intake
        .enqueue(booking_request("bk_1", "1000"), RequestContext::system("test"))
        .unwrap();

    let mut stored = None;
    for _ in 0..100 {
        stored = app
            .store
            .find_by_idempotency_key(&queued.idempotency_key)
            .await
            .unwrap();
        if stored.is_some() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    let stored = stored.expect("queued payment should eventually be created");
    assert_eq!(stored.gateway_order_id, "order_q1");

    shutdown_tx.send(true).unwrap();
    tokio::time::timeout(Duration::from_secs(2), handle)
        .await
        .unwrap()
        .unwrap();
}
