use crate::database::error::DatabaseError;
use crate::database::models::{
    GatewayLogEntry, NewPayment, PaymentRecord, PaymentStatus, RefundEntry, StatusUpdate,
    TransactionRecord,
};
use crate::payments::types::{GatewayName, PaymentMode};
use async_trait::async_trait;
use bigdecimal::BigDecimal;
use uuid::Uuid;

/// Persistence for payment and transaction records.
///
/// Every mutation is conditional on the current stored state so that concurrent
/// webhook deliveries, polls and verifications cannot overwrite each other.
#[async_trait]
pub trait PaymentStore: Send + Sync {
    /// Inserts a `PENDING` payment and its transaction record together.
    async fn create_payment(
        &self,
        payment: NewPayment,
        initial_entry: GatewayLogEntry,
    ) -> Result<(PaymentRecord, TransactionRecord), DatabaseError>;

    async fn find_payment(&self, id: Uuid) -> Result<Option<PaymentRecord>, DatabaseError>;

    async fn find_by_order_ref(&self, order_ref: &str)
        -> Result<Option<PaymentRecord>, DatabaseError>;

    async fn find_by_gateway_order_id(
        &self,
        gateway: GatewayName,
        gateway_order_id: &str,
    ) -> Result<Option<PaymentRecord>, DatabaseError>;

    async fn find_by_idempotency_key(
        &self,
        key: &str,
    ) -> Result<Option<PaymentRecord>, DatabaseError>;

    /// All payments for a booking, newest first.
    async fn find_by_booking(&self, booking_id: &str) -> Result<Vec<PaymentRecord>, DatabaseError>;

    /// Sets `to` only if the current status is one of `expected`.
    /// Returns `None` when the stored status did not match.
    async fn transition_status(
        &self,
        id: Uuid,
        expected: &[PaymentStatus],
        to: PaymentStatus,
        update: StatusUpdate,
    ) -> Result<Option<PaymentRecord>, DatabaseError>;

    /// Adds a refund entry if the payment is still `SUCCESS` with `expected_refunded` refunded.
    async fn record_refund(
        &self,
        id: Uuid,
        expected_refunded: &BigDecimal,
        entry: RefundEntry,
        new_status: PaymentStatus,
        updated_by: &str,
    ) -> Result<Option<PaymentRecord>, DatabaseError>;

    async fn find_transaction(
        &self,
        payment_id: Uuid,
    ) -> Result<Option<TransactionRecord>, DatabaseError>;

    /// Appends to the transaction log, creating the transaction record when it is missing.
    /// Returns `false` when an entry with the same event id is already present.
    async fn append_gateway_log(
        &self,
        payment: &PaymentRecord,
        entry: GatewayLogEntry,
        payment_mode: Option<PaymentMode>,
        actor: &str,
    ) -> Result<bool, DatabaseError>;

    async fn ping(&self) -> Result<(), DatabaseError>;
}
