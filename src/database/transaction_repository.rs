use crate::database::error::DatabaseError;
use crate::database::models::{GatewayLogEntry, TransactionRecord};
use crate::payments::types::{GatewayName, PaymentMode};
use sqlx::{FromRow, PgConnection, PgPool};
use std::str::FromStr;
use uuid::Uuid;

const TRANSACTION_COLUMNS: &str = "id, payment_id, gateway, payment_mode, gateway_response, \
     created_by, updated_by, created_at, updated_at";

/// Row shape of the `payment_transactions` table
#[derive(Debug, Clone, FromRow)]
pub struct TransactionRow {
    pub id: Uuid,
    pub payment_id: Uuid,
    pub gateway: String,
    pub payment_mode: String,
    pub gateway_response: serde_json::Value,
    pub created_by: String,
    pub updated_by: String,
    pub created_at: chrono::DateTime<chrono::Utc>,
    pub updated_at: chrono::DateTime<chrono::Utc>,
}

impl TryFrom<TransactionRow> for TransactionRecord {
    type Error = DatabaseError;

    fn try_from(row: TransactionRow) -> Result<Self, Self::Error> {
        Ok(TransactionRecord {
            id: row.id,
            payment_id: row.payment_id,
            gateway: GatewayName::from_str(&row.gateway)
                .map_err(|e| DatabaseError::serialization(e.to_string()))?,
            payment_mode: PaymentMode::from_str(&row.payment_mode)
                .map_err(|e| DatabaseError::serialization(e.to_string()))?,
            gateway_response: serde_json::from_value(row.gateway_response)
                .map_err(|e| DatabaseError::serialization(e.to_string()))?,
            created_by: row.created_by,
            updated_by: row.updated_by,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

/// Repository for gateway transaction logs
#[derive(Clone)]
pub struct TransactionRepository {
    pool: PgPool,
}

impl TransactionRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Create the transaction record for a payment.
    ///
    /// `ON CONFLICT DO NOTHING` makes lazy creation from concurrent webhooks safe; the
    /// existing row is returned in that case.
    pub async fn create(
        conn: &mut PgConnection,
        id: Uuid,
        payment_id: Uuid,
        gateway: GatewayName,
        initial_entries: Vec<GatewayLogEntry>,
        created_by: &str,
    ) -> Result<TransactionRecord, DatabaseError> {
        let log = serde_json::to_value(initial_entries)
            .map_err(|e| DatabaseError::serialization(e.to_string()))?;

        sqlx::query(
            "INSERT INTO payment_transactions
             (id, payment_id, gateway, payment_mode, gateway_response, created_by, updated_by)
             VALUES ($1, $2, $3, 'UNKNOWN', $4, $5, $5)
             ON CONFLICT (payment_id) DO NOTHING",
        )
        .bind(id)
        .bind(payment_id)
        .bind(gateway.as_str())
        .bind(log)
        .bind(created_by)
        .execute(&mut *conn)
        .await
        .map_err(DatabaseError::from_sqlx)?;

        let row = sqlx::query_as::<_, TransactionRow>(&format!(
            "SELECT {} FROM payment_transactions WHERE payment_id = $1",
            TRANSACTION_COLUMNS
        ))
        .bind(payment_id)
        .fetch_one(&mut *conn)
        .await
        .map_err(DatabaseError::from_sqlx)?;

        TransactionRecord::try_from(row)
    }

    pub async fn find_by_payment_id(
        &self,
        payment_id: Uuid,
    ) -> Result<Option<TransactionRecord>, DatabaseError> {
        sqlx::query_as::<_, TransactionRow>(&format!(
            "SELECT {} FROM payment_transactions WHERE payment_id = $1",
            TRANSACTION_COLUMNS
        ))
        .bind(payment_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(DatabaseError::from_sqlx)?
        .map(TransactionRecord::try_from)
        .transpose()
    }

    /// Append a log entry unless one with the same event id is already present.
    ///
    /// The payment mode is only overwritten while it is still `UNKNOWN`.
    pub async fn append_entry(
        &self,
        payment_id: Uuid,
        entry: &GatewayLogEntry,
        payment_mode: Option<PaymentMode>,
        updated_by: &str,
    ) -> Result<bool, DatabaseError> {
        let entry_json = serde_json::to_value(entry)
            .map_err(|e| DatabaseError::serialization(e.to_string()))?;

        let result = sqlx::query(
            "UPDATE payment_transactions
             SET gateway_response = gateway_response || jsonb_build_array($2::jsonb),
                 payment_mode = CASE
                     WHEN payment_mode = 'UNKNOWN' AND $3::text IS NOT NULL THEN $3::text
                     ELSE payment_mode
                 END,
                 updated_by = $4,
                 updated_at = NOW()
             WHERE payment_id = $1
               AND ($5::text IS NULL
                    OR NOT gateway_response @> jsonb_build_array(jsonb_build_object('event_id', $5::text)))",
        )
        .bind(payment_id)
        .bind(entry_json)
        .bind(payment_mode.map(|m| m.as_str()))
        .bind(updated_by)
        .bind(&entry.event_id)
        .execute(&self.pool)
        .await
        .map_err(DatabaseError::from_sqlx)?;

        Ok(result.rows_affected() > 0)
    }
}
