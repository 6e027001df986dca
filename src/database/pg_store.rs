use crate::database::error::DatabaseError;
use crate::database::models::{
    GatewayLogEntry, NewPayment, PaymentRecord, PaymentStatus, RefundEntry, StatusUpdate,
    TransactionRecord,
};
use crate::database::payment_repository::PaymentRepository;
use crate::database::repository::PaymentStore;
use crate::database::transaction_repository::TransactionRepository;
use crate::payments::types::{GatewayName, PaymentMode};
use async_trait::async_trait;
use bigdecimal::BigDecimal;
use sqlx::PgPool;
use tracing::debug;
use uuid::Uuid;

/// Postgres-backed payment store
#[derive(Clone)]
pub struct PgPaymentStore {
    pool: PgPool,
    payments: PaymentRepository,
    transactions: TransactionRepository,
}

impl PgPaymentStore {
    pub fn new(pool: PgPool) -> Self {
        Self {
            payments: PaymentRepository::new(pool.clone()),
            transactions: TransactionRepository::new(pool.clone()),
            pool,
        }
    }
}

#[async_trait]
impl PaymentStore for PgPaymentStore {
    async fn create_payment(
        &self,
        payment: NewPayment,
        initial_entry: GatewayLogEntry,
    ) -> Result<(PaymentRecord, TransactionRecord), DatabaseError> {
        let payment_id = Uuid::new_v4();
        let transaction_id = Uuid::new_v4();

        let mut tx = self.pool.begin().await.map_err(DatabaseError::from_sqlx)?;
        let record =
            PaymentRepository::insert(&mut *tx, payment_id, transaction_id, &payment).await?;
        let transaction = TransactionRepository::create(
            &mut *tx,
            transaction_id,
            payment_id,
            payment.gateway,
            vec![initial_entry],
            &payment.created_by,
        )
        .await?;
        tx.commit().await.map_err(DatabaseError::from_sqlx)?;

        debug!(payment_id = %record.id, order_ref = %record.order_ref, "payment persisted");
        Ok((record, transaction))
    }

    async fn find_payment(&self, id: Uuid) -> Result<Option<PaymentRecord>, DatabaseError> {
        self.payments.find_by_id(id).await
    }

    async fn find_by_order_ref(
        &self,
        order_ref: &str,
    ) -> Result<Option<PaymentRecord>, DatabaseError> {
        self.payments.find_by_order_ref(order_ref).await
    }

    async fn find_by_gateway_order_id(
        &self,
        gateway: GatewayName,
        gateway_order_id: &str,
    ) -> Result<Option<PaymentRecord>, DatabaseError> {
        self.payments
            .find_by_gateway_order_id(gateway.as_str(), gateway_order_id)
            .await
    }

    async fn find_by_idempotency_key(
        &self,
        key: &str,
    ) -> Result<Option<PaymentRecord>, DatabaseError> {
        self.payments.find_by_idempotency_key(key).await
    }

    async fn find_by_booking(&self, booking_id: &str) -> Result<Vec<PaymentRecord>, DatabaseError> {
        self.payments.find_by_booking(booking_id).await
    }

    async fn transition_status(
        &self,
        id: Uuid,
        expected: &[PaymentStatus],
        to: PaymentStatus,
        update: StatusUpdate,
    ) -> Result<Option<PaymentRecord>, DatabaseError> {
        self.payments.update_status(id, expected, to, &update).await
    }

    async fn record_refund(
        &self,
        id: Uuid,
        expected_refunded: &BigDecimal,
        entry: RefundEntry,
        new_status: PaymentStatus,
        updated_by: &str,
    ) -> Result<Option<PaymentRecord>, DatabaseError> {
        self.payments
            .add_refund(id, expected_refunded, &entry, new_status, updated_by)
            .await
    }

    async fn find_transaction(
        &self,
        payment_id: Uuid,
    ) -> Result<Option<TransactionRecord>, DatabaseError> {
        self.transactions.find_by_payment_id(payment_id).await
    }

    async fn append_gateway_log(
        &self,
        payment: &PaymentRecord,
        entry: GatewayLogEntry,
        payment_mode: Option<PaymentMode>,
        actor: &str,
    ) -> Result<bool, DatabaseError> {
        if self.transactions.find_by_payment_id(payment.id).await?.is_none() {
            let mut conn = self.pool.acquire().await.map_err(DatabaseError::from_sqlx)?;
            let created = TransactionRepository::create(
                &mut *conn,
                Uuid::new_v4(),
                payment.id,
                payment.gateway,
                Vec::new(),
                actor,
            )
            .await?;
            self.payments.link_transaction(payment.id, created.id).await?;
            debug!(payment_id = %payment.id, transaction_id = %created.id, "transaction record created lazily");
        }

        self.transactions
            .append_entry(payment.id, &entry, payment_mode, actor)
            .await
    }

    async fn ping(&self) -> Result<(), DatabaseError> {
        crate::database::health_check(&self.pool).await
    }
}
