use crate::database::models::PaymentRecord;
use crate::services::booking_client::{BookingPaymentUpdate, BookingService};
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{error, info};

/// Relays settled payment outcomes to the booking service.
///
/// Failures are logged and never undo the payment state.
#[derive(Clone)]
pub struct PaymentNotifier {
    booking: Arc<dyn BookingService>,
}

impl PaymentNotifier {
    pub fn new(booking: Arc<dyn BookingService>) -> Self {
        Self { booking }
    }

    /// Updates the booking inline. Returns whether the booking service accepted it.
    pub async fn notify(&self, payment: &PaymentRecord, auth_token: Option<&str>) -> bool {
        let Some(booking_id) = payment.booking_id.as_deref() else {
            return false;
        };

        let update = BookingPaymentUpdate {
            payment_id: payment.id,
            payment_status: payment.status,
            gateway: payment.gateway,
            gateway_order_id: payment.gateway_order_id.clone(),
            gateway_payment_id: payment.gateway_payment_id.clone(),
            amount: payment.amount.clone(),
            currency: payment.currency.clone(),
        };

        match self
            .booking
            .mark_payment(booking_id, &update, auth_token)
            .await
        {
            Ok(()) => {
                info!(
                    payment_id = %payment.id,
                    booking_id = %booking_id,
                    status = %payment.status,
                    "booking notified of payment outcome"
                );
                true
            }
            Err(e) => {
                error!(
                    payment_id = %payment.id,
                    booking_id = %booking_id,
                    status = %payment.status,
                    error = %e,
                    "booking update failed; payment requires manual reconciliation"
                );
                false
            }
        }
    }

    /// Fires the booking update in a background task.
    pub fn spawn(&self, payment: PaymentRecord, auth_token: Option<String>) -> Option<JoinHandle<bool>> {
        payment.booking_id.as_ref()?;
        let notifier = self.clone();
        Some(tokio::spawn(async move {
            notifier.notify(&payment, auth_token.as_deref()).await
        }))
    }
}
