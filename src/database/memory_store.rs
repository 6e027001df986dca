//! In-process payment store used when `SKIP_EXTERNALS` is set and in tests.
//!
//! Mirrors the conditional-write semantics of the Postgres store: every mutation
//! checks the current state under the write lock and reports a mismatch instead
//! of overwriting.

use crate::database::error::{DatabaseError, DatabaseErrorKind};
use crate::database::models::{
    GatewayLogEntry, NewPayment, PaymentRecord, PaymentStatus, RefundEntry, StatusUpdate,
    TransactionRecord,
};
use crate::database::repository::PaymentStore;
use crate::payments::types::{GatewayName, PaymentMode};
use async_trait::async_trait;
use bigdecimal::BigDecimal;
use chrono::Utc;
use std::collections::HashMap;
use tokio::sync::RwLock;
use uuid::Uuid;

#[derive(Default)]
struct Tables {
    payments: HashMap<Uuid, PaymentRecord>,
    transactions: HashMap<Uuid, TransactionRecord>,
}

impl Tables {
    fn unique_violation(&self, payment: &NewPayment) -> Option<&'static str> {
        self.payments.values().find_map(|existing| {
            if existing.order_ref == payment.order_ref {
                Some("payments_order_ref_key")
            } else if existing.gateway == payment.gateway
                && existing.gateway_order_id == payment.gateway_order_id
            {
                Some("payments_gateway_order_key")
            } else if payment.idempotency_key.is_some()
                && existing.idempotency_key == payment.idempotency_key
            {
                Some("payments_idempotency_key_key")
            } else {
                None
            }
        })
    }
}

#[derive(Default)]
pub struct InMemoryPaymentStore {
    tables: RwLock<Tables>,
}

impl InMemoryPaymentStore {
    pub fn new() -> Self {
        Self::default()
    }
}

fn not_found(id: Uuid) -> DatabaseError {
    DatabaseError::new(DatabaseErrorKind::NotFound {
        entity: "Payment".to_string(),
        id: id.to_string(),
    })
}

fn new_transaction(
    id: Uuid,
    payment_id: Uuid,
    gateway: GatewayName,
    entries: Vec<GatewayLogEntry>,
    actor: &str,
) -> TransactionRecord {
    let now = Utc::now();
    TransactionRecord {
        id,
        payment_id,
        gateway,
        payment_mode: PaymentMode::Unknown,
        gateway_response: entries,
        created_by: actor.to_string(),
        updated_by: actor.to_string(),
        created_at: now,
        updated_at: now,
    }
}

#[async_trait]
impl PaymentStore for InMemoryPaymentStore {
    async fn create_payment(
        &self,
        payment: NewPayment,
        initial_entry: GatewayLogEntry,
    ) -> Result<(PaymentRecord, TransactionRecord), DatabaseError> {
        let mut tables = self.tables.write().await;
        if let Some(constraint) = tables.unique_violation(&payment) {
            return Err(DatabaseError::new(DatabaseErrorKind::UniqueViolation {
                constraint: constraint.to_string(),
            }));
        }

        let now = Utc::now();
        let payment_id = Uuid::new_v4();
        let transaction = new_transaction(
            Uuid::new_v4(),
            payment_id,
            payment.gateway,
            vec![initial_entry],
            &payment.created_by,
        );
        let record = PaymentRecord {
            id: payment_id,
            order_ref: payment.order_ref,
            purpose: payment.purpose,
            booking_id: payment.booking_id,
            amount: payment.amount,
            currency: payment.currency,
            payer_ref: payment.payer_ref,
            payer_type: payment.payer_type,
            receiver_ref: payment.receiver_ref,
            receiver_type: payment.receiver_type,
            gateway: payment.gateway,
            gateway_order_id: payment.gateway_order_id,
            gateway_payment_id: None,
            status: PaymentStatus::Pending,
            transaction_id: Some(transaction.id),
            refunded_amount: BigDecimal::from(0),
            refunds: Vec::new(),
            idempotency_key: payment.idempotency_key,
            payment_link: payment.payment_link,
            checkout_token: payment.checkout_token,
            failure_reason: None,
            metadata: payment.metadata,
            updated_by: payment.created_by.clone(),
            created_by: payment.created_by,
            created_at: now,
            updated_at: now,
        };

        tables.payments.insert(payment_id, record.clone());
        tables.transactions.insert(payment_id, transaction.clone());
        Ok((record, transaction))
    }

    async fn find_payment(&self, id: Uuid) -> Result<Option<PaymentRecord>, DatabaseError> {
        Ok(self.tables.read().await.payments.get(&id).cloned())
    }

    async fn find_by_order_ref(
        &self,
        order_ref: &str,
    ) -> Result<Option<PaymentRecord>, DatabaseError> {
        let tables = self.tables.read().await;
        Ok(tables
            .payments
            .values()
            .find(|p| p.order_ref == order_ref)
            .cloned())
    }

    async fn find_by_gateway_order_id(
        &self,
        gateway: GatewayName,
        gateway_order_id: &str,
    ) -> Result<Option<PaymentRecord>, DatabaseError> {
        let tables = self.tables.read().await;
        Ok(tables
            .payments
            .values()
            .find(|p| p.gateway == gateway && p.gateway_order_id == gateway_order_id)
            .cloned())
    }

    async fn find_by_idempotency_key(
        &self,
        key: &str,
    ) -> Result<Option<PaymentRecord>, DatabaseError> {
        let tables = self.tables.read().await;
        Ok(tables
            .payments
            .values()
            .find(|p| p.idempotency_key.as_deref() == Some(key))
            .cloned())
    }

    async fn find_by_booking(&self, booking_id: &str) -> Result<Vec<PaymentRecord>, DatabaseError> {
        let tables = self.tables.read().await;
        let mut found: Vec<PaymentRecord> = tables
            .payments
            .values()
            .filter(|p| p.booking_id.as_deref() == Some(booking_id))
            .cloned()
            .collect();
        found.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(found)
    }

    async fn transition_status(
        &self,
        id: Uuid,
        expected: &[PaymentStatus],
        to: PaymentStatus,
        update: StatusUpdate,
    ) -> Result<Option<PaymentRecord>, DatabaseError> {
        let mut tables = self.tables.write().await;
        let Some(record) = tables.payments.get_mut(&id) else {
            return Ok(None);
        };
        if !expected.contains(&record.status) {
            return Ok(None);
        }

        record.status = to;
        if let Some(payment_id) = update.gateway_payment_id {
            record.gateway_payment_id = Some(payment_id);
        }
        if let Some(reason) = update.failure_reason {
            record.failure_reason = Some(reason);
        }
        if let Some(refunded) = update.refunded_amount {
            record.refunded_amount = refunded;
        }
        record.updated_by = update.updated_by;
        record.updated_at = Utc::now();
        Ok(Some(record.clone()))
    }

    async fn record_refund(
        &self,
        id: Uuid,
        expected_refunded: &BigDecimal,
        entry: RefundEntry,
        new_status: PaymentStatus,
        updated_by: &str,
    ) -> Result<Option<PaymentRecord>, DatabaseError> {
        let mut tables = self.tables.write().await;
        let Some(record) = tables.payments.get_mut(&id) else {
            return Ok(None);
        };
        if record.status != PaymentStatus::Success || &record.refunded_amount != expected_refunded
        {
            return Ok(None);
        }

        record.refunded_amount = &record.refunded_amount + &entry.amount;
        record.refunds.push(entry);
        record.status = new_status;
        record.updated_by = updated_by.to_string();
        record.updated_at = Utc::now();
        Ok(Some(record.clone()))
    }

    async fn find_transaction(
        &self,
        payment_id: Uuid,
    ) -> Result<Option<TransactionRecord>, DatabaseError> {
        Ok(self.tables.read().await.transactions.get(&payment_id).cloned())
    }

    async fn append_gateway_log(
        &self,
        payment: &PaymentRecord,
        entry: GatewayLogEntry,
        payment_mode: Option<PaymentMode>,
        actor: &str,
    ) -> Result<bool, DatabaseError> {
        let mut guard = self.tables.write().await;
        let tables = &mut *guard;
        let Some(record) = tables.payments.get_mut(&payment.id) else {
            return Err(not_found(payment.id));
        };

        let transaction = tables.transactions.entry(payment.id).or_insert_with(|| {
            new_transaction(Uuid::new_v4(), payment.id, payment.gateway, Vec::new(), actor)
        });
        if record.transaction_id.is_none() {
            record.transaction_id = Some(transaction.id);
        }

        if let Some(event_id) = entry.event_id.as_deref() {
            if transaction.has_event(event_id) {
                return Ok(false);
            }
        }

        if let Some(mode) = payment_mode {
            if transaction.payment_mode == PaymentMode::Unknown {
                transaction.payment_mode = mode;
            }
        }
        transaction.gateway_response.push(entry);
        transaction.updated_by = actor.to_string();
        transaction.updated_at = Utc::now();
        Ok(true)
    }

    async fn ping(&self) -> Result<(), DatabaseError> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::models::PaymentPurpose;
    use crate::payments::types::{NormalizedStatus, RefundStatus};
    use std::str::FromStr;

    fn new_payment(order_ref: &str, gateway_order_id: &str) -> NewPayment {
        NewPayment {
            order_ref: order_ref.to_string(),
            purpose: PaymentPurpose::Booking,
            booking_id: Some("booking-1".to_string()),
            amount: BigDecimal::from_str("499.00").unwrap(),
            currency: "INR".to_string(),
            payer_ref: None,
            payer_type: None,
            receiver_ref: None,
            receiver_type: None,
            gateway: GatewayName::Razorpay,
            gateway_order_id: gateway_order_id.to_string(),
            idempotency_key: None,
            payment_link: None,
            checkout_token: None,
            metadata: serde_json::json!({}),
            created_by: "api".to_string(),
        }
    }

    fn entry(event_id: Option<&str>) -> GatewayLogEntry {
        GatewayLogEntry::new(
            event_id.map(str::to_string),
            "payment.captured",
            NormalizedStatus::Success,
            serde_json::json!({}),
        )
    }

    #[tokio::test]
    async fn duplicate_gateway_order_is_a_unique_violation() {
        let store = InMemoryPaymentStore::new();
        store
            .create_payment(new_payment("ref-1", "order_abc"), entry(None))
            .await
            .unwrap();
        let err = store
            .create_payment(new_payment("ref-2", "order_abc"), entry(None))
            .await
            .unwrap_err();
        assert!(err.is_unique_violation());
    }

    #[tokio::test]
    async fn transition_requires_expected_status() {
        let store = InMemoryPaymentStore::new();
        let (payment, _) = store
            .create_payment(new_payment("ref-1", "order_abc"), entry(None))
            .await
            .unwrap();

        let updated = store
            .transition_status(
                payment.id,
                &[PaymentStatus::Pending],
                PaymentStatus::Success,
                StatusUpdate::by("test"),
            )
            .await
            .unwrap();
        assert_eq!(updated.unwrap().status, PaymentStatus::Success);

        let again = store
            .transition_status(
                payment.id,
                &[PaymentStatus::Pending],
                PaymentStatus::Failed,
                StatusUpdate::by("test"),
            )
            .await
            .unwrap();
        assert!(again.is_none());
    }

    #[tokio::test]
    async fn log_append_skips_known_event_ids() {
        let store = InMemoryPaymentStore::new();
        let (payment, _) = store
            .create_payment(new_payment("ref-1", "order_abc"), entry(None))
            .await
            .unwrap();

        assert!(store
            .append_gateway_log(&payment, entry(Some("evt_1")), Some(PaymentMode::Upi), "w")
            .await
            .unwrap());
        assert!(!store
            .append_gateway_log(&payment, entry(Some("evt_1")), None, "w")
            .await
            .unwrap());

        let txn = store.find_transaction(payment.id).await.unwrap().unwrap();
        assert_eq!(txn.gateway_response.len(), 2);
        assert_eq!(txn.payment_mode, PaymentMode::Upi);
    }

    #[tokio::test]
    async fn refund_guard_rejects_stale_total() {
        let store = InMemoryPaymentStore::new();
        let (payment, _) = store
            .create_payment(new_payment("ref-1", "order_abc"), entry(None))
            .await
            .unwrap();
        store
            .transition_status(
                payment.id,
                &[PaymentStatus::Pending],
                PaymentStatus::Success,
                StatusUpdate::by("test"),
            )
            .await
            .unwrap();

        let refund = RefundEntry {
            refund_id: "rfnd_1".to_string(),
            reference: "r1".to_string(),
            amount: BigDecimal::from(100),
            status: RefundStatus::Processed,
            created_by: "test".to_string(),
            created_at: Utc::now(),
        };
        let zero = BigDecimal::from(0);
        let first = store
            .record_refund(payment.id, &zero, refund.clone(), PaymentStatus::Success, "test")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(first.refunded_amount, BigDecimal::from(100));

        let stale = store
            .record_refund(payment.id, &zero, refund, PaymentStatus::Success, "test")
            .await
            .unwrap();
        assert!(stale.is_none());
    }
}
