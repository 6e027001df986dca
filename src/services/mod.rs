//! Services module for business logic and integrations

pub mod booking_client;
pub mod notification;
pub mod payment_orchestrator;
pub mod payment_state;
pub mod webhook_processor;

pub use booking_client::{Booking, BookingError, BookingService, HttpBookingClient};
pub use notification::PaymentNotifier;
pub use payment_orchestrator::{
    GatewaySelection, InitiatePaymentRequest, InitiatedPayment, PaymentOrchestrator,
    PaymentStatusView, RefundPaymentRequest, RefundResult, RequestContext, VerifiedPayment,
    VerifyPaymentRequest,
};
pub use payment_state::{GatewayOutcome, PaymentReconciler, ReconcileOutcome};
pub use webhook_processor::{WebhookHeaders, WebhookOutcome, WebhookProcessor};
