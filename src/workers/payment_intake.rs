//! Asynchronous payment intake.
//!
//! `POST /payment/initiate/async` hands requests to an in-process queue; this
//! worker drains it through the orchestrator and redelivers retryable failures a
//! bounded number of times. Every queued request carries an idempotency key, so
//! a redelivery after a partial success returns the stored payment instead of
//! creating a second one.

use crate::error::{AppError, AppErrorKind, ExternalError, InfrastructureError};
use crate::services::payment_orchestrator::{
    InitiatePaymentRequest, PaymentOrchestrator, RequestContext,
};
use bigdecimal::{BigDecimal, Zero};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tracing::{error, info, warn};
use uuid::Uuid;

#[derive(Debug, thiserror::Error)]
pub enum IntakeError {
    #[error("payment intake queue is full")]
    QueueFull,

    #[error("payment intake queue is closed")]
    Closed,

    #[error("invalid request: {0}")]
    Invalid(String),
}

impl From<IntakeError> for AppError {
    fn from(err: IntakeError) -> Self {
        match err {
            IntakeError::QueueFull => AppError::new(AppErrorKind::External(ExternalError::RateLimit {
                service: "payment_intake".to_string(),
                retry_after: Some(1),
            })),
            IntakeError::Closed => {
                AppError::new(AppErrorKind::Infrastructure(InfrastructureError::Internal {
                    message: err.to_string(),
                }))
            }
            IntakeError::Invalid(reason) => AppError::validation("amount", reason),
        }
    }
}

#[derive(Debug)]
pub struct IntakeMessage {
    pub request: InitiatePaymentRequest,
    pub context: RequestContext,
    pub deliveries: u32,
}

/// Receipt returned to the caller of the async endpoint
#[derive(Debug, Clone, Serialize)]
pub struct QueuedPayment {
    pub idempotency_key: String,
    pub status: &'static str,
}

/// Producer side of the intake queue
#[derive(Clone)]
pub struct PaymentIntake {
    sender: mpsc::Sender<IntakeMessage>,
}

impl PaymentIntake {
    pub fn channel(capacity: usize) -> (Self, mpsc::Receiver<IntakeMessage>) {
        let (sender, receiver) = mpsc::channel(capacity.max(1));
        (Self { sender }, receiver)
    }

    pub fn enqueue(
        &self,
        mut request: InitiatePaymentRequest,
        context: RequestContext,
    ) -> Result<QueuedPayment, IntakeError> {
        if request.amount <= BigDecimal::zero() {
            return Err(IntakeError::Invalid(
                "amount must be greater than zero".to_string(),
            ));
        }

        let key = request
            .idempotency_key
            .clone()
            .filter(|k| !k.trim().is_empty())
            .unwrap_or_else(|| format!("intake_{}", Uuid::new_v4().simple()));
        request.idempotency_key = Some(key.clone());

        self.sender
            .try_send(IntakeMessage {
                request,
                context,
                deliveries: 0,
            })
            .map_err(|e| match e {
                mpsc::error::TrySendError::Full(_) => IntakeError::QueueFull,
                mpsc::error::TrySendError::Closed(_) => IntakeError::Closed,
            })?;

        info!(idempotency_key = %key, "payment request queued");
        Ok(QueuedPayment {
            idempotency_key: key,
            status: "queued",
        })
    }

    fn sender(&self) -> mpsc::Sender<IntakeMessage> {
        self.sender.clone()
    }
}

#[derive(Debug, Clone)]
pub struct IntakeWorkerConfig {
    pub max_deliveries: u32,
    /// Base delay before a redelivery; doubles per attempt
    pub redelivery_delay: Duration,
}

impl Default for IntakeWorkerConfig {
    fn default() -> Self {
        Self {
            max_deliveries: 3,
            redelivery_delay: Duration::from_secs(1),
        }
    }
}

/// Doubling stops after this many redeliveries
const MAX_BACKOFF_DOUBLINGS: u32 = 10;

impl IntakeWorkerConfig {
    /// Delay before redelivering a message that has been tried `deliveries` times.
    pub fn backoff(&self, deliveries: u32) -> Duration {
        let doublings = deliveries.saturating_sub(1).min(MAX_BACKOFF_DOUBLINGS);
        self.redelivery_delay.saturating_mul(1 << doublings)
    }
}

pub struct PaymentIntakeWorker {
    orchestrator: Arc<PaymentOrchestrator>,
    receiver: mpsc::Receiver<IntakeMessage>,
    requeue: mpsc::Sender<IntakeMessage>,
    config: IntakeWorkerConfig,
}

impl PaymentIntakeWorker {
    pub fn new(
        orchestrator: Arc<PaymentOrchestrator>,
        intake: &PaymentIntake,
        receiver: mpsc::Receiver<IntakeMessage>,
        config: IntakeWorkerConfig,
    ) -> Self {
        Self {
            orchestrator,
            receiver,
            requeue: intake.sender(),
            config,
        }
    }

    pub async fn run(mut self, mut shutdown_rx: watch::Receiver<bool>) {
        info!(
            max_deliveries = self.config.max_deliveries,
            "payment intake worker started"
        );

        loop {
            tokio::select! {
                _ = shutdown_rx.changed() => {
                    if *shutdown_rx.borrow() {
                        info!("payment intake worker stopping");
                        break;
                    }
                }
                message = self.receiver.recv() => {
                    match message {
                        Some(message) => self.handle(message).await,
                        None => break,
                    }
                }
            }
        }

        info!("payment intake worker stopped");
    }

    async fn handle(&self, mut message: IntakeMessage) {
        message.deliveries += 1;
        let key = message
            .request
            .idempotency_key
            .clone()
            .unwrap_or_default();

        match self
            .orchestrator
            .initiate_payment(message.request.clone(), &message.context)
            .await
        {
            Ok(payment) => {
                info!(
                    idempotency_key = %key,
                    payment_id = %payment.payment_id,
                    gateway = %payment.gateway,
                    deliveries = message.deliveries,
                    "queued payment initiated"
                );
            }
            Err(e) if e.is_retryable() && message.deliveries < self.config.max_deliveries => {
                let delay = self.config.backoff(message.deliveries);
                warn!(
                    idempotency_key = %key,
                    deliveries = message.deliveries,
                    delay_ms = delay.as_millis() as u64,
                    error = %e,
                    "queued payment failed, redelivering"
                );
                let requeue = self.requeue.clone();
                tokio::spawn(async move {
                    tokio::time::sleep(delay).await;
                    if requeue.send(message).await.is_err() {
                        error!("payment intake queue closed before redelivery");
                    }
                });
            }
            Err(e) => {
                error!(
                    idempotency_key = %key,
                    deliveries = message.deliveries,
                    error = %e,
                    "queued payment dropped"
                );
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::models::PaymentPurpose;
    use crate::payments::types::CustomerDetails;

    fn request(amount: i64) -> InitiatePaymentRequest {
        InitiatePaymentRequest {
            purpose: PaymentPurpose::Other,
            booking_id: None,
            amount: BigDecimal::from(amount),
            currency: Some("INR".to_string()),
            gateway: None,
            country: None,
            customer: CustomerDetails::default(),
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

    #[tokio::test]
    async fn enqueue_assigns_an_idempotency_key() {
        let (intake, mut receiver) = PaymentIntake::channel(4);
        let queued = intake
            .enqueue(request(100), RequestContext::system("test"))
            .unwrap();
        assert!(queued.idempotency_key.starts_with("intake_"));

        let message = receiver.recv().await.unwrap();
        assert_eq!(
            message.request.idempotency_key.as_deref(),
            Some(queued.idempotency_key.as_str())
        );
        assert_eq!(message.deliveries, 0);
    }

    #[tokio::test]
    async fn full_queue_is_reported() {
        let (intake, _receiver) = PaymentIntake::channel(1);
        intake
            .enqueue(request(100), RequestContext::system("test"))
            .unwrap();
        let err = intake
            .enqueue(request(100), RequestContext::system("test"))
            .unwrap_err();
        assert!(matches!(err, IntakeError::QueueFull));
        assert_eq!(AppError::from(err).status_code(), 429);
    }

    #[test]
    fn backoff_doubles_then_levels_off() {
        let config = IntakeWorkerConfig {
            max_deliveries: u32::MAX,
            redelivery_delay: Duration::from_millis(10),
        };
        assert_eq!(config.backoff(1), Duration::from_millis(10));
        assert_eq!(config.backoff(2), Duration::from_millis(20));
        assert_eq!(config.backoff(4), Duration::from_millis(80));
        assert_eq!(config.backoff(11), Duration::from_millis(10_240));
        assert_eq!(config.backoff(40), Duration::from_millis(10_240));
        assert_eq!(config.backoff(u32::MAX), Duration::from_millis(10_240));
    }

    #[test]
    fn non_positive_amounts_are_refused() {
        let (intake, _receiver) = PaymentIntake::channel(1);
        let err = intake
            .enqueue(request(0), RequestContext::system("test"))
            .unwrap_err();
        assert!(matches!(err, IntakeError::Invalid(_)));
    }
}
