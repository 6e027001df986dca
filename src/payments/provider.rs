use crate::payments::config::GatewayConfig;
use crate::payments::error::{PaymentError, PaymentResult};
use crate::payments::types::{
    CreateOrderRequest, GatewayName, OrderResponse, RefundRequest, RefundResponse, StatusQuery,
    StatusResponse, WebhookEvent, WebhookSignature, WebhookVerificationResult,
};
use async_trait::async_trait;

/// Uniform contract over one payment gateway.
///
/// Implementations only talk to their gateway; persisting results is the caller's job.
#[async_trait]
pub trait PaymentGateway: Send + Sync {
    fn name(&self) -> GatewayName;

    fn config(&self) -> &GatewayConfig;

    async fn create_order(&self, request: CreateOrderRequest) -> PaymentResult<OrderResponse>;

    async fn fetch_status(&self, query: StatusQuery) -> PaymentResult<StatusResponse>;

    async fn initiate_refund(&self, request: RefundRequest) -> PaymentResult<RefundResponse>;

    /// Verifies a webhook signature over the exact bytes received.
    fn verify_webhook(
        &self,
        payload: &[u8],
        signature: &WebhookSignature,
    ) -> PaymentResult<WebhookVerificationResult>;

    fn parse_webhook_event(&self, payload: &[u8]) -> PaymentResult<WebhookEvent>;

    /// Checks the signature a checkout widget returns on completion.
    ///
    /// Only gateways whose checkout hands such a signature to the client override
    /// this; the rest settle through webhooks and status polling.
    fn verify_checkout_signature(
        &self,
        _order_id: &str,
        _payment_id: &str,
        _signature: &str,
    ) -> PaymentResult<bool> {
        Err(PaymentError::validation(
            format!(
                "{} does not issue checkout signatures; payment status arrives by webhook or status lookup",
                self.name()
            ),
            "gateway",
        ))
    }
}
