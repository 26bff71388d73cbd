//! PostgreSQL store.

use super::{PaymentStore, PendingCursor, StoreError, StoreTransaction};
use crate::models::{
    Fee, FeeBalances, FeeStatus, PaymentIntent, PaymentMethod, PaymentStatus, StatusTransition,
};
use crate::services::metrics::DB_QUERY_DURATION;
use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use sqlx::postgres::{PgPool, PgPoolOptions};
use sqlx::{FromRow, PgConnection, Postgres, Transaction};
use std::time::Duration;
use tracing::{info, instrument};
use uuid::Uuid;

const FEE_COLUMNS: &str = "fee_id, organization_id, student_id, category_id, total_fee, \
     paid_amount, pending_amount, due_date, status, created_at, updated_at";

const INTENT_COLUMNS: &str = "intent_id, fee_id, amount, platform_fee, payment_method, status, \
     transaction_id, receipt_number, payment_date, payer_id, recorded_by, note, \
     failure_reason, created_at, updated_at";

#[derive(FromRow)]
struct FeeRow {
    fee_id: Uuid,
    organization_id: String,
    student_id: String,
    category_id: String,
    total_fee: Decimal,
    paid_amount: Decimal,
    pending_amount: Decimal,
    due_date: NaiveDate,
    status: String,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<FeeRow> for Fee {
    type Error = StoreError;

    fn try_from(row: FeeRow) -> Result<Self, Self::Error> {
        Ok(Fee {
            fee_id: row.fee_id,
            organization_id: row.organization_id,
            student_id: row.student_id,
            category_id: row.category_id,
            total_fee: row.total_fee,
            paid_amount: row.paid_amount,
            pending_amount: row.pending_amount,
            due_date: row.due_date,
            status: row
                .status
                .parse::<FeeStatus>()
                .map_err(StoreError::InvalidData)?,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

#[derive(FromRow)]
struct IntentRow {
    intent_id: Uuid,
    fee_id: Uuid,
    amount: Decimal,
    platform_fee: Decimal,
    payment_method: String,
    status: String,
    transaction_id: String,
    receipt_number: String,
    payment_date: Option<DateTime<Utc>>,
    payer_id: String,
    recorded_by: Option<String>,
    note: Option<String>,
    failure_reason: Option<String>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<IntentRow> for PaymentIntent {
    type Error = StoreError;

    fn try_from(row: IntentRow) -> Result<Self, Self::Error> {
        Ok(PaymentIntent {
            intent_id: row.intent_id,
            fee_id: row.fee_id,
            amount: row.amount,
            platform_fee: row.platform_fee,
            payment_method: row
                .payment_method
                .parse::<PaymentMethod>()
                .map_err(StoreError::InvalidData)?,
            status: row
                .status
                .parse::<PaymentStatus>()
                .map_err(StoreError::InvalidData)?,
            transaction_id: row.transaction_id,
            receipt_number: row.receipt_number,
            payment_date: row.payment_date,
            payer_id: row.payer_id,
            recorded_by: row.recorded_by,
            note: row.note,
            failure_reason: row.failure_reason,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

fn map_insert_error(e: sqlx::Error, transaction_id: &str) -> StoreError {
    match e {
        sqlx::Error::Database(ref db_err) if db_err.is_unique_violation() => StoreError::Conflict(
            format!("payment intent {} already exists", transaction_id),
        ),
        other => StoreError::Database(other),
    }
}

/// Database connection pool wrapper.
#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    #[instrument(skip(database_url), fields(service = "fee-payment-service"))]
    pub async fn connect(
        database_url: &str,
        max_connections: u32,
        min_connections: u32,
    ) -> Result<Self, StoreError> {
        info!(
            max_connections = max_connections,
            min_connections = min_connections,
            "Connecting to PostgreSQL"
        );

        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .min_connections(min_connections)
            .acquire_timeout(Duration::from_secs(30))
            .idle_timeout(Duration::from_secs(600))
            .connect(database_url)
            .await?;

        info!("PostgreSQL connection pool established");

        Ok(Self { pool })
    }

    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    #[instrument(skip(self))]
    pub async fn run_migrations(&self) -> Result<(), sqlx::migrate::MigrateError> {
        info!("Running database migrations");
        sqlx::migrate!("./migrations").run(&self.pool).await?;
        info!("Database migrations completed");
        Ok(())
    }

    /// Seed a fee. Fee assignment itself lives outside this service.
    #[instrument(skip(self, fee), fields(fee_id = %fee.fee_id))]
    pub async fn insert_fee(&self, fee: &Fee) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO fees (fee_id, organization_id, student_id, category_id, total_fee,
                              paid_amount, pending_amount, due_date, status, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
            "#,
        )
        .bind(fee.fee_id)
        .bind(&fee.organization_id)
        .bind(&fee.student_id)
        .bind(&fee.category_id)
        .bind(fee.total_fee)
        .bind(fee.paid_amount)
        .bind(fee.pending_amount)
        .bind(fee.due_date)
        .bind(fee.status.as_str())
        .bind(fee.created_at)
        .bind(fee.updated_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

async fn insert_intent(conn: &mut PgConnection, intent: &PaymentIntent) -> Result<(), StoreError> {
    let timer = DB_QUERY_DURATION
        .with_label_values(&["create_payment_intent"])
        .start_timer();

    sqlx::query(
        r#"
        INSERT INTO payment_intents (intent_id, fee_id, amount, platform_fee, payment_method,
                                     status, transaction_id, receipt_number, payment_date,
                                     payer_id, recorded_by, note, failure_reason,
                                     created_at, updated_at)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15)
        "#,
    )
    .bind(intent.intent_id)
    .bind(intent.fee_id)
    .bind(intent.amount)
    .bind(intent.platform_fee)
    .bind(intent.payment_method.as_str())
    .bind(intent.status.as_str())
    .bind(&intent.transaction_id)
    .bind(&intent.receipt_number)
    .bind(intent.payment_date)
    .bind(&intent.payer_id)
    .bind(&intent.recorded_by)
    .bind(&intent.note)
    .bind(&intent.failure_reason)
    .bind(intent.created_at)
    .bind(intent.updated_at)
    .execute(conn)
    .await
    .map_err(|e| map_insert_error(e, &intent.transaction_id))?;

    timer.observe_duration();
    Ok(())
}

async fn conditional_update(
    conn: &mut PgConnection,
    intent_id: Uuid,
    transition: &StatusTransition,
    expected: PaymentStatus,
) -> Result<bool, StoreError> {
    if !expected.can_transition_to(transition.to) {
        return Ok(false);
    }

    let timer = DB_QUERY_DURATION
        .with_label_values(&["update_payment_intent_status"])
        .start_timer();

    let result = sqlx::query(
        r#"
        UPDATE payment_intents
        SET status = $2,
            payment_method = COALESCE($3, payment_method),
            payment_date = COALESCE($4, payment_date),
            failure_reason = COALESCE($5, failure_reason),
            updated_at = now()
        WHERE intent_id = $1 AND status = $6
        "#,
    )
    .bind(intent_id)
    .bind(transition.to.as_str())
    .bind(transition.payment_method.map(|m| m.as_str()))
    .bind(transition.payment_date)
    .bind(&transition.failure_reason)
    .bind(expected.as_str())
    .execute(conn)
    .await?;

    timer.observe_duration();
    Ok(result.rows_affected() == 1)
}

#[async_trait]
impl PaymentStore for PgStore {
    #[instrument(skip(self))]
    async fn find_fee(&self, fee_id: Uuid) -> Result<Option<Fee>, StoreError> {
        let timer = DB_QUERY_DURATION.with_label_values(&["find_fee"]).start_timer();

        let row = sqlx::query_as::<_, FeeRow>(&format!(
            "SELECT {} FROM fees WHERE fee_id = $1",
            FEE_COLUMNS
        ))
        .bind(fee_id)
        .fetch_optional(&self.pool)
        .await?;

        timer.observe_duration();
        row.map(Fee::try_from).transpose()
    }

    #[instrument(skip(self, intent), fields(transaction_id = %intent.transaction_id))]
    async fn create_payment_intent(&self, intent: &PaymentIntent) -> Result<(), StoreError> {
        let mut conn = self.pool.acquire().await?;
        insert_intent(&mut conn, intent).await
    }

    #[instrument(skip(self))]
    async fn find_payment_intent(
        &self,
        transaction_id: &str,
    ) -> Result<Option<PaymentIntent>, StoreError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["find_payment_intent"])
            .start_timer();

        let row = sqlx::query_as::<_, IntentRow>(&format!(
            "SELECT {} FROM payment_intents WHERE transaction_id = $1",
            INTENT_COLUMNS
        ))
        .bind(transaction_id)
        .fetch_optional(&self.pool)
        .await?;

        timer.observe_duration();
        row.map(PaymentIntent::try_from).transpose()
    }

    #[instrument(skip(self))]
    async fn find_payment_intent_for_payer(
        &self,
        transaction_id: &str,
        payer_id: &str,
    ) -> Result<Option<PaymentIntent>, StoreError> {
        let row = sqlx::query_as::<_, IntentRow>(&format!(
            "SELECT {} FROM payment_intents WHERE transaction_id = $1 AND payer_id = $2",
            INTENT_COLUMNS
        ))
        .bind(transaction_id)
        .bind(payer_id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(PaymentIntent::try_from).transpose()
    }

    #[instrument(skip(self, transition), fields(to = %transition.to))]
    async fn update_payment_intent_status(
        &self,
        intent_id: Uuid,
        transition: &StatusTransition,
        expected: PaymentStatus,
    ) -> Result<bool, StoreError> {
        let mut conn = self.pool.acquire().await?;
        conditional_update(&mut conn, intent_id, transition, expected).await
    }

    #[instrument(skip(self))]
    async fn list_pending_intents(
        &self,
        created_before: DateTime<Utc>,
        after: Option<PendingCursor>,
        limit: i64,
    ) -> Result<Vec<PaymentIntent>, StoreError> {
        let rows = sqlx::query_as::<_, IntentRow>(&format!(
            "SELECT {} FROM payment_intents \
             WHERE status = 'PENDING' AND created_at < $1 \
               AND ($2::timestamptz IS NULL OR (created_at, intent_id) > ($2, $3::uuid)) \
             ORDER BY created_at, intent_id \
             LIMIT $4",
            INTENT_COLUMNS
        ))
        .bind(created_before)
        .bind(after.map(|c| c.created_at))
        .bind(after.map(|c| c.intent_id))
        .bind(limit.clamp(1, 1000))
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(PaymentIntent::try_from).collect()
    }

    async fn begin(&self) -> Result<Box<dyn StoreTransaction>, StoreError> {
        let tx = self.pool.begin().await?;
        Ok(Box::new(PgStoreTransaction { tx }))
    }

    async fn health_check(&self) -> Result<(), StoreError> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }
}

struct PgStoreTransaction {
    tx: Transaction<'static, Postgres>,
}

#[async_trait]
impl StoreTransaction for PgStoreTransaction {
    async fn lock_fee(&mut self, fee_id: Uuid) -> Result<Option<Fee>, StoreError> {
        let timer = DB_QUERY_DURATION.with_label_values(&["lock_fee"]).start_timer();

        let row = sqlx::query_as::<_, FeeRow>(&format!(
            "SELECT {} FROM fees WHERE fee_id = $1 FOR UPDATE",
            FEE_COLUMNS
        ))
        .bind(fee_id)
        .fetch_optional(&mut *self.tx)
        .await?;

        timer.observe_duration();
        row.map(Fee::try_from).transpose()
    }

    async fn find_payment_intent_by_id(
        &mut self,
        intent_id: Uuid,
    ) -> Result<Option<PaymentIntent>, StoreError> {
        let row = sqlx::query_as::<_, IntentRow>(&format!(
            "SELECT {} FROM payment_intents WHERE intent_id = $1",
            INTENT_COLUMNS
        ))
        .bind(intent_id)
        .fetch_optional(&mut *self.tx)
        .await?;

        row.map(PaymentIntent::try_from).transpose()
    }

    async fn create_payment_intent(&mut self, intent: &PaymentIntent) -> Result<(), StoreError> {
        insert_intent(&mut self.tx, intent).await
    }

    async fn update_payment_intent_status(
        &mut self,
        intent_id: Uuid,
        transition: &StatusTransition,
        expected: PaymentStatus,
    ) -> Result<bool, StoreError> {
        conditional_update(&mut self.tx, intent_id, transition, expected).await
    }

    async fn sum_completed_payment_amounts(
        &mut self,
        fee_id: Uuid,
    ) -> Result<Decimal, StoreError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["sum_completed_payment_amounts"])
            .start_timer();

        let total: Decimal = sqlx::query_scalar(
            r#"
            SELECT COALESCE(SUM(amount), 0)
            FROM payment_intents
            WHERE fee_id = $1 AND status = 'COMPLETED'
            "#,
        )
        .bind(fee_id)
        .fetch_one(&mut *self.tx)
        .await?;

        timer.observe_duration();
        Ok(total)
    }

    async fn update_fee_balances(
        &mut self,
        fee_id: Uuid,
        balances: &FeeBalances,
    ) -> Result<(), StoreError> {
        let result = sqlx::query(
            r#"
            UPDATE fees
            SET paid_amount = $2, pending_amount = $3, status = $4, updated_at = now()
            WHERE fee_id = $1
            "#,
        )
        .bind(fee_id)
        .bind(balances.paid_amount)
        .bind(balances.pending_amount)
        .bind(balances.status.as_str())
        .execute(&mut *self.tx)
        .await?;

        if result.rows_affected() != 1 {
            return Err(StoreError::InvalidData(format!(
                "fee {} does not exist",
                fee_id
            )));
        }
        Ok(())
    }

    async fn commit(self: Box<Self>) -> Result<(), StoreError> {
        self.tx.commit().await?;
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> Result<(), StoreError> {
        self.tx.rollback().await?;
        Ok(())
    }
}
