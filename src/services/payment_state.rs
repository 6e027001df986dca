//! Applies gateway-reported outcomes to stored payments.
//!
//! Webhooks, checkout verification and status polling all funnel through
//! [`PaymentReconciler::apply`], so every path obeys the same transition table
//! and the same duplicate handling.

use crate::database::models::{GatewayLogEntry, PaymentRecord, PaymentStatus, StatusUpdate};
use crate::database::repository::PaymentStore;
use crate::error::{AppError, AppResult, DomainError};
use crate::payments::types::{NormalizedStatus, PaymentMode};
use serde_json::Value as JsonValue;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// A status observation from a gateway, whatever channel it arrived through
#[derive(Debug, Clone)]
pub struct GatewayOutcome {
    pub event_id: Option<String>,
    pub event: String,
    pub status: NormalizedStatus,
    pub gateway_payment_id: Option<String>,
    pub payment_mode: Option<PaymentMode>,
    pub failure_reason: Option<String>,
    pub payload: JsonValue,
}

#[derive(Debug, Clone)]
pub enum ReconcileOutcome {
    /// The stored status moved to a new value
    Transitioned(PaymentRecord),
    /// Already applied: same terminal status or a known event id
    Duplicate(PaymentRecord),
    /// Recorded in the log without a status change
    Logged(PaymentRecord),
    /// The observed status is not reachable from the stored one
    Rejected {
        payment: PaymentRecord,
        attempted: PaymentStatus,
    },
}

impl ReconcileOutcome {
    pub fn payment(&self) -> &PaymentRecord {
        match self {
            ReconcileOutcome::Transitioned(p)
            | ReconcileOutcome::Duplicate(p)
            | ReconcileOutcome::Logged(p) => p,
            ReconcileOutcome::Rejected { payment, .. } => payment,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            ReconcileOutcome::Transitioned(_) => "transitioned",
            ReconcileOutcome::Duplicate(_) => "duplicate",
            ReconcileOutcome::Logged(_) => "logged",
            ReconcileOutcome::Rejected { .. } => "rejected",
        }
    }
}

#[derive(Clone)]
pub struct PaymentReconciler {
    store: Arc<dyn PaymentStore>,
}

impl PaymentReconciler {
    pub fn new(store: Arc<dyn PaymentStore>) -> Self {
        Self { store }
    }

    pub async fn apply(
        &self,
        payment: &PaymentRecord,
        outcome: GatewayOutcome,
        actor: &str,
    ) -> AppResult<ReconcileOutcome> {
        let target = PaymentStatus::from_normalized(outcome.status);

        match target {
            Some(target) if target == payment.status && target.is_terminal() => {
                debug!(
                    payment_id = %payment.id,
                    status = %target,
                    event = %outcome.event,
                    "status already applied"
                );
                Ok(ReconcileOutcome::Duplicate(payment.clone()))
            }
            Some(target) if payment.status.can_transition_to(target) => {
                self.transition(payment, target, outcome, actor).await
            }
            Some(target) if target != PaymentStatus::Pending => {
                self.log(payment, &outcome, actor).await?;
                if payment.status == PaymentStatus::Failed && target == PaymentStatus::Success {
                    warn!(
                        payment_id = %payment.id,
                        gateway = %payment.gateway,
                        "gateway reports success for a failed payment; requires manual reconciliation"
                    );
                } else {
                    warn!(
                        payment_id = %payment.id,
                        from = %payment.status,
                        to = %target,
                        "status transition rejected"
                    );
                }
                Ok(ReconcileOutcome::Rejected {
                    payment: payment.clone(),
                    attempted: target,
                })
            }
            _ => {
                if self.log(payment, &outcome, actor).await? {
                    Ok(ReconcileOutcome::Logged(payment.clone()))
                } else {
                    Ok(ReconcileOutcome::Duplicate(payment.clone()))
                }
            }
        }
    }

    async fn transition(
        &self,
        payment: &PaymentRecord,
        target: PaymentStatus,
        outcome: GatewayOutcome,
        actor: &str,
    ) -> AppResult<ReconcileOutcome> {
        let mut update = StatusUpdate::by(actor);
        update.gateway_payment_id = outcome.gateway_payment_id.clone();
        if target == PaymentStatus::Failed {
            update.failure_reason = outcome
                .failure_reason
                .clone()
                .or_else(|| Some(outcome.event.clone()));
        }
        if target == PaymentStatus::Refunded {
            update.refunded_amount = Some(payment.amount.clone());
        }

        let updated = self
            .store
            .transition_status(
                payment.id,
                PaymentStatus::predecessors(target),
                target,
                update,
            )
            .await?;

        match updated {
            Some(updated) => {
                self.log(&updated, &outcome, actor).await?;
                info!(
                    payment_id = %updated.id,
                    gateway = %updated.gateway,
                    from = %payment.status,
                    to = %target,
                    event = %outcome.event,
                    "payment status updated"
                );
                Ok(ReconcileOutcome::Transitioned(updated))
            }
            None => {
                // Lost the race; decide from what is stored now.
                let current = self.store.find_payment(payment.id).await?.ok_or_else(|| {
                    AppError::domain(DomainError::PaymentNotFound {
                        payment_id: payment.id.to_string(),
                    })
                })?;
                if current.status == target {
                    Ok(ReconcileOutcome::Duplicate(current))
                } else {
                    self.log(&current, &outcome, actor).await?;
                    warn!(
                        payment_id = %current.id,
                        stored = %current.status,
                        attempted = %target,
                        "concurrent update changed payment status"
                    );
                    Ok(ReconcileOutcome::Rejected {
                        payment: current,
                        attempted: target,
                    })
                }
            }
        }
    }

    async fn log(
        &self,
        payment: &PaymentRecord,
        outcome: &GatewayOutcome,
        actor: &str,
    ) -> AppResult<bool> {
        let entry = GatewayLogEntry::new(
            outcome.event_id.clone(),
            outcome.event.clone(),
            outcome.status,
            outcome.payload.clone(),
        );
        let appended = self
            .store
            .append_gateway_log(payment, entry, outcome.payment_mode, actor)
            .await?;
        if !appended {
            debug!(
                payment_id = %payment.id,
                event_id = ?outcome.event_id,
                "gateway event already logged"
            );
        }
        Ok(appended)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::memory_store::InMemoryPaymentStore;
    use crate::database::models::{NewPayment, PaymentPurpose};
    use crate::payments::types::GatewayName;
    use bigdecimal::BigDecimal;

    async fn pending_payment(store: &Arc<InMemoryPaymentStore>) -> PaymentRecord {
        let new_payment = NewPayment {
            order_ref: "ref-1".to_string(),
            purpose: PaymentPurpose::Booking,
            booking_id: Some("bk_1".to_string()),
            amount: BigDecimal::from(1000),
            currency: "INR".to_string(),
            payer_ref: None,
            payer_type: None,
            receiver_ref: None,
            receiver_type: None,
            gateway: GatewayName::Razorpay,
            gateway_order_id: "order_abc".to_string(),
            idempotency_key: None,
            payment_link: None,
            checkout_token: None,
            metadata: serde_json::json!({}),
            created_by: "test".to_string(),
        };
        let initial = GatewayLogEntry::new(
            None,
            "order.created",
            NormalizedStatus::Pending,
            serde_json::json!({}),
        );
        store.create_payment(new_payment, initial).await.unwrap().0
    }

    fn outcome(event_id: &str, status: NormalizedStatus) -> GatewayOutcome {
        GatewayOutcome {
            event_id: Some(event_id.to_string()),
            event: "payment.captured".to_string(),
            status,
            gateway_payment_id: Some("pay_1".to_string()),
            payment_mode: Some(PaymentMode::Upi),
            failure_reason: None,
            payload: serde_json::json!({"id": event_id}),
        }
    }

    #[tokio::test]
    async fn success_transitions_once_and_logs_once() {
        let store = Arc::new(InMemoryPaymentStore::new());
        let payment = pending_payment(&store).await;
        let reconciler = PaymentReconciler::new(store.clone());

        let first = reconciler
            .apply(&payment, outcome("evt_1", NormalizedStatus::Success), "webhook:razorpay")
            .await
            .unwrap();
        let ReconcileOutcome::Transitioned(updated) = first else {
            panic!("expected a transition");
        };
        assert_eq!(updated.status, PaymentStatus::Success);
        assert_eq!(updated.gateway_payment_id.as_deref(), Some("pay_1"));

        let second = reconciler
            .apply(&updated, outcome("evt_1", NormalizedStatus::Success), "webhook:razorpay")
            .await
            .unwrap();
        assert!(matches!(second, ReconcileOutcome::Duplicate(_)));

        // A stale snapshot still cannot apply the transition twice.
        let stale = reconciler
            .apply(&payment, outcome("evt_2", NormalizedStatus::Success), "webhook:razorpay")
            .await
            .unwrap();
        assert!(matches!(stale, ReconcileOutcome::Duplicate(_)));

        let txn = store.find_transaction(payment.id).await.unwrap().unwrap();
        let success_entries = txn
            .gateway_response
            .iter()
            .filter(|e| e.status == NormalizedStatus::Success)
            .count();
        assert_eq!(success_entries, 1);
        assert_eq!(txn.payment_mode, PaymentMode::Upi);
    }

    #[tokio::test]
    async fn failed_payment_cannot_become_successful() {
        let store = Arc::new(InMemoryPaymentStore::new());
        let payment = pending_payment(&store).await;
        let reconciler = PaymentReconciler::new(store.clone());

        let failed = reconciler
            .apply(&payment, outcome("evt_1", NormalizedStatus::Failed), "poll")
            .await
            .unwrap();
        let failed = failed.payment().clone();
        assert_eq!(failed.status, PaymentStatus::Failed);
        assert!(failed.failure_reason.is_some());

        let late = reconciler
            .apply(&failed, outcome("evt_2", NormalizedStatus::Success), "poll")
            .await
            .unwrap();
        assert!(matches!(
            late,
            ReconcileOutcome::Rejected {
                attempted: PaymentStatus::Success,
                ..
            }
        ));
        let stored = store.find_payment(payment.id).await.unwrap().unwrap();
        assert_eq!(stored.status, PaymentStatus::Failed);
    }

    #[tokio::test]
    async fn unknown_status_is_logged_without_transition() {
        let store = Arc::new(InMemoryPaymentStore::new());
        let payment = pending_payment(&store).await;
        let reconciler = PaymentReconciler::new(store.clone());

        let logged = reconciler
            .apply(&payment, outcome("evt_r", NormalizedStatus::Unknown), "webhook:cashfree")
            .await
            .unwrap();
        assert_eq!(logged.label(), "logged");

        let again = reconciler
            .apply(&payment, outcome("evt_r", NormalizedStatus::Unknown), "webhook:cashfree")
            .await
            .unwrap();
        assert_eq!(again.label(), "duplicate");

        let stored = store.find_payment(payment.id).await.unwrap().unwrap();
        assert_eq!(stored.status, PaymentStatus::Pending);
    }
}
