use crate::database::error::{DatabaseError, DatabaseErrorKind};
use crate::database::models::{
    NewPayment, PaymentRecord, PaymentStatus, RefundEntry, StatusUpdate,
};
use sqlx::{types::BigDecimal, FromRow, PgConnection, PgPool};
use std::str::FromStr;
use uuid::Uuid;

const PAYMENT_COLUMNS: &str = "id, order_ref, purpose, booking_id, amount, currency, payer_ref, \
     payer_type, receiver_ref, receiver_type, gateway, gateway_order_id, gateway_payment_id, \
     status, transaction_id, refunded_amount, refunds, idempotency_key, payment_link, \
     checkout_token, failure_reason, metadata, created_by, updated_by, created_at, updated_at";

/// Row shape of the `payments` table
#[derive(Debug, Clone, FromRow)]
pub struct PaymentRow {
    pub id: Uuid,
    pub order_ref: String,
    pub purpose: String,
    pub booking_id: Option<String>,
    pub amount: BigDecimal,
    pub currency: String,
    pub payer_ref: Option<String>,
    pub payer_type: Option<String>,
    pub receiver_ref: Option<String>,
    pub receiver_type: Option<String>,
    pub gateway: String,
    pub gateway_order_id: String,
    pub gateway_payment_id: Option<String>,
    pub status: String,
    pub transaction_id: Option<Uuid>,
    pub refunded_amount: BigDecimal,
    pub refunds: serde_json::Value,
    pub idempotency_key: Option<String>,
    pub payment_link: Option<String>,
    pub checkout_token: Option<String>,
    pub failure_reason: Option<String>,
    pub metadata: serde_json::Value,
    pub created_by: String,
    pub updated_by: String,
    pub created_at: chrono::DateTime<chrono::Utc>,
    pub updated_at: chrono::DateTime<chrono::Utc>,
}

impl TryFrom<PaymentRow> for PaymentRecord {
    type Error = DatabaseError;

    fn try_from(row: PaymentRow) -> Result<Self, Self::Error> {
        let parse_party = |value: Option<String>| {
            value
                .map(|v| v.parse().map_err(DatabaseError::serialization))
                .transpose()
        };

        Ok(PaymentRecord {
            id: row.id,
            order_ref: row.order_ref,
            purpose: row.purpose.parse().map_err(DatabaseError::serialization)?,
            booking_id: row.booking_id,
            amount: row.amount,
            currency: row.currency,
            payer_ref: row.payer_ref,
            payer_type: parse_party(row.payer_type)?,
            receiver_ref: row.receiver_ref,
            receiver_type: parse_party(row.receiver_type)?,
            gateway: row
                .gateway
                .parse()
                .map_err(|e: crate::payments::error::PaymentError| {
                    DatabaseError::serialization(e.to_string())
                })?,
            gateway_order_id: row.gateway_order_id,
            gateway_payment_id: row.gateway_payment_id,
            status: PaymentStatus::from_str(&row.status).map_err(DatabaseError::serialization)?,
            transaction_id: row.transaction_id,
            refunded_amount: row.refunded_amount,
            refunds: serde_json::from_value::<Vec<RefundEntry>>(row.refunds)
                .map_err(|e| DatabaseError::serialization(e.to_string()))?,
            idempotency_key: row.idempotency_key,
            payment_link: row.payment_link,
            checkout_token: row.checkout_token,
            failure_reason: row.failure_reason,
            metadata: row.metadata,
            created_by: row.created_by,
            updated_by: row.updated_by,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

fn into_record(row: Option<PaymentRow>) -> Result<Option<PaymentRecord>, DatabaseError> {
    row.map(PaymentRecord::try_from).transpose()
}

/// Repository for the `payments` table
#[derive(Clone)]
pub struct PaymentRepository {
    pool: PgPool,
}

impl PaymentRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Insert a new pending payment inside the caller's transaction
    pub async fn insert(
        conn: &mut PgConnection,
        id: Uuid,
        transaction_id: Uuid,
        payment: &NewPayment,
    ) -> Result<PaymentRecord, DatabaseError> {
        let row = sqlx::query_as::<_, PaymentRow>(&format!(
            "INSERT INTO payments
             (id, order_ref, purpose, booking_id, amount, currency, payer_ref, payer_type,
              receiver_ref, receiver_type, gateway, gateway_order_id, status, transaction_id,
              idempotency_key, payment_link, checkout_token, metadata, created_by, updated_by)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, 'PENDING', $13,
                     $14, $15, $16, $17, $18, $18)
             RETURNING {}",
            PAYMENT_COLUMNS
        ))
        .bind(id)
        .bind(&payment.order_ref)
        .bind(payment.purpose.as_str())
        .bind(&payment.booking_id)
        .bind(&payment.amount)
        .bind(&payment.currency)
        .bind(&payment.payer_ref)
        .bind(payment.payer_type.map(|t| t.as_str()))
        .bind(&payment.receiver_ref)
        .bind(payment.receiver_type.map(|t| t.as_str()))
        .bind(payment.gateway.as_str())
        .bind(&payment.gateway_order_id)
        .bind(transaction_id)
        .bind(&payment.idempotency_key)
        .bind(&payment.payment_link)
        .bind(&payment.checkout_token)
        .bind(&payment.metadata)
        .bind(&payment.created_by)
        .fetch_one(&mut *conn)
        .await
        .map_err(DatabaseError::from_sqlx)?;

        PaymentRecord::try_from(row)
    }

    pub async fn find_by_id(&self, id: Uuid) -> Result<Option<PaymentRecord>, DatabaseError> {
        let row = sqlx::query_as::<_, PaymentRow>(&format!(
            "SELECT {} FROM payments WHERE id = $1",
            PAYMENT_COLUMNS
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(DatabaseError::from_sqlx)?;
        into_record(row)
    }

    pub async fn find_by_order_ref(
        &self,
        order_ref: &str,
    ) -> Result<Option<PaymentRecord>, DatabaseError> {
        let row = sqlx::query_as::<_, PaymentRow>(&format!(
            "SELECT {} FROM payments WHERE order_ref = $1",
            PAYMENT_COLUMNS
        ))
        .bind(order_ref)
        .fetch_optional(&self.pool)
        .await
        .map_err(DatabaseError::from_sqlx)?;
        into_record(row)
    }

    pub async fn find_by_gateway_order_id(
        &self,
        gateway: &str,
        gateway_order_id: &str,
    ) -> Result<Option<PaymentRecord>, DatabaseError> {
        let row = sqlx::query_as::<_, PaymentRow>(&format!(
            "SELECT {} FROM payments WHERE gateway = $1 AND gateway_order_id = $2",
            PAYMENT_COLUMNS
        ))
        .bind(gateway)
        .bind(gateway_order_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(DatabaseError::from_sqlx)?;
        into_record(row)
    }

    pub async fn find_by_idempotency_key(
        &self,
        key: &str,
    ) -> Result<Option<PaymentRecord>, DatabaseError> {
        let row = sqlx::query_as::<_, PaymentRow>(&format!(
            "SELECT {} FROM payments WHERE idempotency_key = $1",
            PAYMENT_COLUMNS
        ))
        .bind(key)
        .fetch_optional(&self.pool)
        .await
        .map_err(DatabaseError::from_sqlx)?;
        into_record(row)
    }

    pub async fn find_by_booking(
        &self,
        booking_id: &str,
    ) -> Result<Vec<PaymentRecord>, DatabaseError> {
        let rows = sqlx::query_as::<_, PaymentRow>(&format!(
            "SELECT {} FROM payments WHERE booking_id = $1 ORDER BY created_at DESC",
            PAYMENT_COLUMNS
        ))
        .bind(booking_id)
        .fetch_all(&self.pool)
        .await
        .map_err(DatabaseError::from_sqlx)?;
        rows.into_iter().map(PaymentRecord::try_from).collect()
    }

    /// Conditional status update
    ///
    /// The `status = ANY($expected)` predicate makes the check and the write a single
    /// statement; zero affected rows means another writer got there first.
    pub async fn update_status(
        &self,
        id: Uuid,
        expected: &[PaymentStatus],
        to: PaymentStatus,
        update: &StatusUpdate,
    ) -> Result<Option<PaymentRecord>, DatabaseError> {
        let expected: Vec<String> = expected.iter().map(|s| s.as_str().to_string()).collect();
        let row = sqlx::query_as::<_, PaymentRow>(&format!(
            "UPDATE payments
             SET status = $2,
                 gateway_payment_id = COALESCE($3, gateway_payment_id),
                 failure_reason = COALESCE($4, failure_reason),
                 refunded_amount = COALESCE($5, refunded_amount),
                 updated_by = $6,
                 updated_at = NOW()
             WHERE id = $1 AND status = ANY($7)
             RETURNING {}",
            PAYMENT_COLUMNS
        ))
        .bind(id)
        .bind(to.as_str())
        .bind(&update.gateway_payment_id)
        .bind(&update.failure_reason)
        .bind(&update.refunded_amount)
        .bind(&update.updated_by)
        .bind(expected)
        .fetch_optional(&self.pool)
        .await
        .map_err(DatabaseError::from_sqlx)?;
        into_record(row)
    }

    /// Appends a refund entry, guarded by the refunded total the caller last saw
    pub async fn add_refund(
        &self,
        id: Uuid,
        expected_refunded: &BigDecimal,
        entry: &RefundEntry,
        new_status: PaymentStatus,
        updated_by: &str,
    ) -> Result<Option<PaymentRecord>, DatabaseError> {
        let entry_json = serde_json::to_value(entry)
            .map_err(|e| DatabaseError::serialization(e.to_string()))?;
        let row = sqlx::query_as::<_, PaymentRow>(&format!(
            "UPDATE payments
             SET refunded_amount = refunded_amount + $2,
                 refunds = refunds || jsonb_build_array($3::jsonb),
                 status = $4,
                 updated_by = $5,
                 updated_at = NOW()
             WHERE id = $1 AND status = 'SUCCESS' AND refunded_amount = $6
             RETURNING {}",
            PAYMENT_COLUMNS
        ))
        .bind(id)
        .bind(&entry.amount)
        .bind(entry_json)
        .bind(new_status.as_str())
        .bind(updated_by)
        .bind(expected_refunded)
        .fetch_optional(&self.pool)
        .await
        .map_err(DatabaseError::from_sqlx)?;
        into_record(row)
    }

    /// Links a lazily created transaction record
    pub async fn link_transaction(
        &self,
        id: Uuid,
        transaction_id: Uuid,
    ) -> Result<(), DatabaseError> {
        let result = sqlx::query(
            "UPDATE payments
             SET transaction_id = COALESCE(transaction_id, $2), updated_at = NOW()
             WHERE id = $1",
        )
        .bind(id)
        .bind(transaction_id)
        .execute(&self.pool)
        .await
        .map_err(DatabaseError::from_sqlx)?;

        if result.rows_affected() == 0 {
            return Err(DatabaseError::new(DatabaseErrorKind::NotFound {
                entity: "Payment".to_string(),
                id: id.to_string(),
            }));
        }
        Ok(())
    }
}
