//! Database service for metering-service.

use async_trait::async_trait;
use chrono::{DateTime, Datelike, Duration, NaiveDate, NaiveTime, Utc};
use rust_decimal::Decimal;
use serde_json::json;
use sqlx::postgres::{PgPool, PgPoolOptions};
use sqlx::{Postgres, Transaction};
use tracing::{info, instrument};
use uuid::Uuid;

use crate::error::AppError;
use crate::models::{
    BillableInstance, BillingCycleRecord, BillingSummary, CreateInstance, CreatePlan,
    CreditWallet, CycleStatus, FailureReason, InstancePlan, LedgerEntry, ListCycleRecordsFilter,
    PaymentMethod, PaymentStatus, Wallet,
};
use crate::services::metrics::DB_QUERY_DURATION;
use crate::services::rates::HOURS_PER_BILLING_MONTH;
use crate::services::store::{DebitOutcome, DebitRequest, FailedCycle, MeteringStore};

const WALLET_COLUMNS: &str = "organization_id, balance, currency, created_utc, updated_utc";
const ENTRY_COLUMNS: &str = "entry_id, organization_id, amount, currency, method, status, description, metadata, related_instance_id, created_utc";
const INSTANCE_COLUMNS: &str =
    "instance_id, organization_id, label, plan_id, hourly_rate, anchor_utc, created_utc";
const RECORD_COLUMNS: &str = "record_id, instance_id, organization_id, period_start, period_end, hourly_rate, total_amount, status, failure_reason, ledger_entry_id, metadata, created_utc";

/// Database connection pool wrapper.
#[derive(Clone)]
pub struct Database {
    pool: PgPool,
}

impl Database {
    /// Create a new database connection pool.
    #[instrument(skip(database_url), fields(service = "metering-service"))]
    pub async fn new(
        database_url: &str,
        max_connections: u32,
        min_connections: u32,
    ) -> Result<Self, AppError> {
        info!(
            max_connections = max_connections,
            min_connections = min_connections,
            "Connecting to PostgreSQL"
        );

        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .min_connections(min_connections)
            .acquire_timeout(std::time::Duration::from_secs(30))
            .idle_timeout(std::time::Duration::from_secs(600))
            .connect(database_url)
            .await
            .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to connect: {}", e)))?;

        info!("PostgreSQL connection pool established");

        Ok(Self { pool })
    }

    /// Get a reference to the connection pool.
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Check database health.
    #[instrument(skip(self))]
    pub async fn health_check(&self) -> Result<(), AppError> {
        sqlx::query("SELECT 1")
            .execute(&self.pool)
            .await
            .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Health check failed: {}", e)))?;
        Ok(())
    }

    /// Run database migrations. The engine assumes its schema exists and
    /// fails fast otherwise; there is no runtime self-healing.
    #[instrument(skip(self))]
    pub async fn run_migrations(&self) -> Result<(), AppError> {
        info!("Running database migrations");
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Migration failed: {}", e)))?;
        info!("Database migrations completed");
        Ok(())
    }

    /// Insert a cycle record inside an open transaction.
    async fn insert_cycle_record(
        tx: &mut Transaction<'_, Postgres>,
        req: &DebitRequest,
        status: CycleStatus,
        failure_reason: Option<FailureReason>,
        ledger_entry_id: Option<Uuid>,
    ) -> Result<Uuid, AppError> {
        let record_id = Uuid::new_v4();
        let metadata = json!({ "rate_fallback": req.rate_fallback, "hours": req.hours });

        sqlx::query(
            r#"
            INSERT INTO billing_cycle_records (record_id, instance_id, organization_id, period_start, period_end, hourly_rate, total_amount, status, failure_reason, ledger_entry_id, metadata)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
            "#,
        )
        .bind(record_id)
        .bind(req.instance_id)
        .bind(req.organization_id)
        .bind(req.period_start)
        .bind(req.period_end)
        .bind(req.hourly_rate)
        .bind(req.amount)
        .bind(status.as_str())
        .bind(failure_reason.map(|r| r.as_str()))
        .bind(ledger_entry_id)
        .bind(&metadata)
        .execute(&mut **tx)
        .await
        .map_err(|e| {
            AppError::DatabaseError(anyhow::anyhow!("Failed to insert cycle record: {}", e))
        })?;

        Ok(record_id)
    }
}

#[async_trait]
impl MeteringStore for Database {
    // -------------------------------------------------------------------------
    // Wallet Operations
    // -------------------------------------------------------------------------

    #[instrument(skip(self), fields(organization_id = %organization_id))]
    async fn create_wallet(
        &self,
        organization_id: Uuid,
        currency: &str,
    ) -> Result<Wallet, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["create_wallet"])
            .start_timer();

        let wallet = sqlx::query_as::<_, Wallet>(&format!(
            "INSERT INTO wallets (organization_id, currency) VALUES ($1, $2) RETURNING {WALLET_COLUMNS}"
        ))
        .bind(organization_id)
        .bind(currency)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| match e {
            sqlx::Error::Database(ref db_err) if db_err.is_unique_violation() => {
                AppError::Conflict(anyhow::anyhow!(
                    "Wallet already exists for organization {}",
                    organization_id
                ))
            }
            _ => AppError::DatabaseError(anyhow::anyhow!("Failed to create wallet: {}", e)),
        })?;

        timer.observe_duration();
        info!("Wallet created");

        Ok(wallet)
    }

    #[instrument(skip(self), fields(organization_id = %organization_id))]
    async fn get_wallet(&self, organization_id: Uuid) -> Result<Option<Wallet>, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["get_wallet"])
            .start_timer();

        let wallet = sqlx::query_as::<_, Wallet>(&format!(
            "SELECT {WALLET_COLUMNS} FROM wallets WHERE organization_id = $1"
        ))
        .bind(organization_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to get wallet: {}", e)))?;

        timer.observe_duration();

        Ok(wallet)
    }

    #[instrument(skip(self, input), fields(organization_id = %input.organization_id, amount = %input.amount))]
    async fn credit_wallet(&self, input: &CreditWallet) -> Result<LedgerEntry, AppError> {
        if input.amount <= Decimal::ZERO {
            return Err(AppError::BadRequest(anyhow::anyhow!(
                "Credit amount must be positive"
            )));
        }

        let timer = DB_QUERY_DURATION
            .with_label_values(&["credit_wallet"])
            .start_timer();

        let mut tx = self.pool.begin().await.map_err(|e| {
            AppError::DatabaseError(anyhow::anyhow!("Failed to begin transaction: {}", e))
        })?;

        let wallet = sqlx::query_as::<_, Wallet>(&format!(
            "SELECT {WALLET_COLUMNS} FROM wallets WHERE organization_id = $1 FOR UPDATE"
        ))
        .bind(input.organization_id)
        .fetch_optional(&mut *tx)
        .await
        .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to lock wallet: {}", e)))?
        .ok_or_else(|| {
            AppError::NotFound(anyhow::anyhow!(
                "No wallet for organization {}",
                input.organization_id
            ))
        })?;

        let balance_after = wallet.balance + input.amount;

        sqlx::query("UPDATE wallets SET balance = $2, updated_utc = now() WHERE organization_id = $1")
            .bind(input.organization_id)
            .bind(balance_after)
            .execute(&mut *tx)
            .await
            .map_err(|e| {
                AppError::DatabaseError(anyhow::anyhow!("Failed to update balance: {}", e))
            })?;

        let entry_id = Uuid::new_v4();
        let metadata = match &input.metadata {
            Some(extra) => json!({
                "balance_before": wallet.balance,
                "balance_after": balance_after,
                "extra": extra,
            }),
            None => json!({
                "balance_before": wallet.balance,
                "balance_after": balance_after,
            }),
        };

        let entry = sqlx::query_as::<_, LedgerEntry>(&format!(
            r#"
            INSERT INTO ledger_entries (entry_id, organization_id, amount, currency, method, status, description, metadata)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            RETURNING {ENTRY_COLUMNS}
            "#
        ))
        .bind(entry_id)
        .bind(input.organization_id)
        .bind(input.amount)
        .bind(&wallet.currency)
        .bind(input.method.as_str())
        .bind(PaymentStatus::Completed.as_str())
        .bind(&input.description)
        .bind(&metadata)
        .fetch_one(&mut *tx)
        .await
        .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to insert entry: {}", e)))?;

        tx.commit().await.map_err(|e| {
            AppError::DatabaseError(anyhow::anyhow!("Failed to commit transaction: {}", e))
        })?;

        timer.observe_duration();
        info!(balance_after = %balance_after, "Wallet credited");

        Ok(entry)
    }

    #[instrument(skip(self), fields(organization_id = %organization_id))]
    async fn get_wallet_balance(
        &self,
        organization_id: Uuid,
    ) -> Result<Option<Decimal>, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["get_wallet_balance"])
            .start_timer();

        let balance: Option<Decimal> =
            sqlx::query_scalar("SELECT balance FROM wallets WHERE organization_id = $1")
                .bind(organization_id)
                .fetch_optional(&self.pool)
                .await
                .map_err(|e| {
                    AppError::DatabaseError(anyhow::anyhow!("Failed to get balance: {}", e))
                })?;

        timer.observe_duration();

        Ok(balance)
    }

    // -------------------------------------------------------------------------
    // Debit Primitive
    // -------------------------------------------------------------------------

    /// Atomic debit: wallet row lock serializes concurrent billing
    /// for the same organization; the anchor re-check makes a raced window
    /// a no-op instead of a double charge. Balance is always read fresh
    /// inside the transaction, never cached.
    #[instrument(skip(self, req), fields(instance_id = %req.instance_id, organization_id = %req.organization_id, amount = %req.amount))]
    async fn debit_for_window(&self, req: &DebitRequest) -> Result<DebitOutcome, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["debit_for_window"])
            .start_timer();

        let mut tx = self.pool.begin().await.map_err(|e| {
            AppError::DatabaseError(anyhow::anyhow!("Failed to begin transaction: {}", e))
        })?;

        sqlx::query("SET LOCAL statement_timeout = '30s'")
            .execute(&mut *tx)
            .await
            .map_err(|e| {
                AppError::DatabaseError(anyhow::anyhow!("Failed to set statement timeout: {}", e))
            })?;

        let wallet = sqlx::query_as::<_, Wallet>(&format!(
            "SELECT {WALLET_COLUMNS} FROM wallets WHERE organization_id = $1 FOR UPDATE"
        ))
        .bind(req.organization_id)
        .fetch_optional(&mut *tx)
        .await
        .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to lock wallet: {}", e)))?;

        let Some(wallet) = wallet else {
            let record_id = Self::insert_cycle_record(
                &mut tx,
                req,
                CycleStatus::Failed,
                Some(FailureReason::MissingWallet),
                None,
            )
            .await?;
            tx.commit().await.map_err(|e| {
                AppError::DatabaseError(anyhow::anyhow!("Failed to commit transaction: {}", e))
            })?;
            timer.observe_duration();
            return Ok(DebitOutcome::MissingWallet { record_id });
        };

        let anchor: Option<DateTime<Utc>> = sqlx::query_scalar(
            "SELECT anchor_utc FROM billable_instances WHERE instance_id = $1 FOR UPDATE",
        )
        .bind(req.instance_id)
        .fetch_optional(&mut *tx)
        .await
        .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to lock instance: {}", e)))?;

        match anchor {
            Some(anchor) if anchor == req.expected_anchor => {}
            _ => {
                tx.rollback().await.ok();
                timer.observe_duration();
                return Ok(DebitOutcome::AnchorMoved);
            }
        }

        if wallet.balance < req.amount {
            let record_id = Self::insert_cycle_record(
                &mut tx,
                req,
                CycleStatus::Failed,
                Some(FailureReason::InsufficientBalance),
                None,
            )
            .await?;
            tx.commit().await.map_err(|e| {
                AppError::DatabaseError(anyhow::anyhow!("Failed to commit transaction: {}", e))
            })?;
            timer.observe_duration();
            return Ok(DebitOutcome::InsufficientBalance {
                record_id,
                balance: wallet.balance,
            });
        }

        let balance_after = wallet.balance - req.amount;

        sqlx::query("UPDATE wallets SET balance = $2, updated_utc = now() WHERE organization_id = $1")
            .bind(req.organization_id)
            .bind(balance_after)
            .execute(&mut *tx)
            .await
            .map_err(|e| {
                AppError::DatabaseError(anyhow::anyhow!("Failed to update balance: {}", e))
            })?;

        let entry_id = Uuid::new_v4();
        let metadata = json!({
            "balance_before": wallet.balance,
            "balance_after": balance_after,
            "hours": req.hours,
            "rate_fallback": req.rate_fallback,
        });

        sqlx::query(
            r#"
            INSERT INTO ledger_entries (entry_id, organization_id, amount, currency, method, status, description, metadata, related_instance_id)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            "#,
        )
        .bind(entry_id)
        .bind(req.organization_id)
        .bind(-req.amount)
        .bind(&wallet.currency)
        .bind(PaymentMethod::WalletDebit.as_str())
        .bind(PaymentStatus::Completed.as_str())
        .bind(&req.description)
        .bind(&metadata)
        .bind(req.instance_id)
        .execute(&mut *tx)
        .await
        .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to insert entry: {}", e)))?;

        let record_id =
            Self::insert_cycle_record(&mut tx, req, CycleStatus::Billed, None, Some(entry_id))
                .await?;

        sqlx::query("UPDATE billable_instances SET anchor_utc = $2 WHERE instance_id = $1")
            .bind(req.instance_id)
            .bind(req.period_end)
            .execute(&mut *tx)
            .await
            .map_err(|e| {
                AppError::DatabaseError(anyhow::anyhow!("Failed to advance anchor: {}", e))
            })?;

        tx.commit().await.map_err(|e| {
            AppError::DatabaseError(anyhow::anyhow!("Failed to commit transaction: {}", e))
        })?;

        timer.observe_duration();

        Ok(DebitOutcome::Billed {
            ledger_entry_id: entry_id,
            record_id,
            balance_after,
            currency: wallet.currency,
        })
    }

    #[instrument(skip(self, input), fields(instance_id = %input.instance_id))]
    async fn record_failed_cycle(
        &self,
        input: &FailedCycle,
    ) -> Result<BillingCycleRecord, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["record_failed_cycle"])
            .start_timer();

        let record_id = Uuid::new_v4();
        let record = sqlx::query_as::<_, BillingCycleRecord>(&format!(
            r#"
            INSERT INTO billing_cycle_records (record_id, instance_id, organization_id, period_start, period_end, hourly_rate, total_amount, status, failure_reason)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            RETURNING {RECORD_COLUMNS}
            "#
        ))
        .bind(record_id)
        .bind(input.instance_id)
        .bind(input.organization_id)
        .bind(input.period_start)
        .bind(input.period_end)
        .bind(input.hourly_rate)
        .bind(input.total_amount)
        .bind(CycleStatus::Failed.as_str())
        .bind(input.reason.as_str())
        .fetch_one(&self.pool)
        .await
        .map_err(|e| {
            AppError::DatabaseError(anyhow::anyhow!("Failed to record failed cycle: {}", e))
        })?;

        timer.observe_duration();

        Ok(record)
    }

    // -------------------------------------------------------------------------
    // Billable Instances
    // -------------------------------------------------------------------------

    #[instrument(skip(self, input), fields(instance_id = %input.instance_id, organization_id = %input.organization_id))]
    async fn create_instance(
        &self,
        input: &CreateInstance,
    ) -> Result<BillableInstance, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["create_instance"])
            .start_timer();

        let instance = sqlx::query_as::<_, BillableInstance>(&format!(
            r#"
            INSERT INTO billable_instances (instance_id, organization_id, label, plan_id, hourly_rate, anchor_utc, created_utc)
            VALUES ($1, $2, $3, $4, $5, $6, $6)
            RETURNING {INSTANCE_COLUMNS}
            "#
        ))
        .bind(input.instance_id)
        .bind(input.organization_id)
        .bind(&input.label)
        .bind(input.plan_id)
        .bind(input.hourly_rate)
        .bind(input.created_utc)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| match e {
            sqlx::Error::Database(ref db_err) if db_err.is_unique_violation() => {
                AppError::Conflict(anyhow::anyhow!(
                    "Instance {} is already metered",
                    input.instance_id
                ))
            }
            _ => AppError::DatabaseError(anyhow::anyhow!("Failed to create instance: {}", e)),
        })?;

        timer.observe_duration();
        info!(anchor = %instance.anchor_utc, "Billable instance created");

        Ok(instance)
    }

    #[instrument(skip(self), fields(instance_id = %instance_id))]
    async fn get_instance(
        &self,
        instance_id: Uuid,
    ) -> Result<Option<BillableInstance>, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["get_instance"])
            .start_timer();

        let instance = sqlx::query_as::<_, BillableInstance>(&format!(
            "SELECT {INSTANCE_COLUMNS} FROM billable_instances WHERE instance_id = $1"
        ))
        .bind(instance_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to get instance: {}", e)))?;

        timer.observe_duration();

        Ok(instance)
    }

    #[instrument(skip(self), fields(instance_id = %instance_id))]
    async fn delete_instance(&self, instance_id: Uuid) -> Result<bool, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["delete_instance"])
            .start_timer();

        let result = sqlx::query("DELETE FROM billable_instances WHERE instance_id = $1")
            .bind(instance_id)
            .execute(&self.pool)
            .await
            .map_err(|e| {
                AppError::DatabaseError(anyhow::anyhow!("Failed to delete instance: {}", e))
            })?;

        timer.observe_duration();

        Ok(result.rows_affected() > 0)
    }

    #[instrument(skip(self), fields(now = %now))]
    async fn list_due_instances(
        &self,
        now: DateTime<Utc>,
    ) -> Result<Vec<BillableInstance>, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["list_due_instances"])
            .start_timer();

        let cutoff = now - Duration::hours(1);
        let instances = sqlx::query_as::<_, BillableInstance>(&format!(
            r#"
            SELECT {INSTANCE_COLUMNS}
            FROM billable_instances
            WHERE anchor_utc <= $1
            ORDER BY created_utc ASC
            "#
        ))
        .bind(cutoff)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| {
            AppError::DatabaseError(anyhow::anyhow!("Failed to list due instances: {}", e))
        })?;

        timer.observe_duration();

        Ok(instances)
    }

    // -------------------------------------------------------------------------
    // Plans
    // -------------------------------------------------------------------------

    #[instrument(skip(self, input), fields(name = %input.name))]
    async fn create_plan(&self, input: &CreatePlan) -> Result<InstancePlan, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["create_plan"])
            .start_timer();

        let plan_id = Uuid::new_v4();
        let plan = sqlx::query_as::<_, InstancePlan>(
            r#"
            INSERT INTO instance_plans (plan_id, name, base_price, markup_price, currency)
            VALUES ($1, $2, $3, $4, $5)
            RETURNING plan_id, name, base_price, markup_price, currency, is_active, created_utc
            "#,
        )
        .bind(plan_id)
        .bind(&input.name)
        .bind(input.base_price)
        .bind(input.markup_price)
        .bind(&input.currency)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to create plan: {}", e)))?;

        timer.observe_duration();

        Ok(plan)
    }

    #[instrument(skip(self), fields(plan_id = %plan_id))]
    async fn get_plan(&self, plan_id: Uuid) -> Result<Option<InstancePlan>, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["get_plan"])
            .start_timer();

        let plan = sqlx::query_as::<_, InstancePlan>(
            r#"
            SELECT plan_id, name, base_price, markup_price, currency, is_active, created_utc
            FROM instance_plans
            WHERE plan_id = $1
            "#,
        )
        .bind(plan_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to get plan: {}", e)))?;

        timer.observe_duration();

        Ok(plan)
    }

    // -------------------------------------------------------------------------
    // Reporting
    // -------------------------------------------------------------------------

    #[instrument(skip(self, filter), fields(organization_id = %organization_id))]
    async fn get_billing_history(
        &self,
        organization_id: Uuid,
        filter: &ListCycleRecordsFilter,
    ) -> Result<Vec<BillingCycleRecord>, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["get_billing_history"])
            .start_timer();

        let limit = filter.page_size.clamp(1, 100) as i64;

        let records = if let Some(cursor) = filter.page_token {
            sqlx::query_as::<_, BillingCycleRecord>(&format!(
                r#"
                SELECT {RECORD_COLUMNS}
                FROM billing_cycle_records
                WHERE organization_id = $1
                  AND record_id > $2
                ORDER BY record_id
                LIMIT $3
                "#
            ))
            .bind(organization_id)
            .bind(cursor)
            .bind(limit)
            .fetch_all(&self.pool)
            .await
        } else {
            sqlx::query_as::<_, BillingCycleRecord>(&format!(
                r#"
                SELECT {RECORD_COLUMNS}
                FROM billing_cycle_records
                WHERE organization_id = $1
                ORDER BY record_id
                LIMIT $2
                "#
            ))
            .bind(organization_id)
            .bind(limit)
            .fetch_all(&self.pool)
            .await
        }
        .map_err(|e| {
            AppError::DatabaseError(anyhow::anyhow!("Failed to get billing history: {}", e))
        })?;

        timer.observe_duration();

        Ok(records)
    }

    #[instrument(skip(self), fields(organization_id = %organization_id))]
    async fn get_billing_summary(
        &self,
        organization_id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<BillingSummary, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["get_billing_summary"])
            .start_timer();

        let today = now.date_naive();
        let month_start = NaiveDate::from_ymd_opt(today.year(), today.month(), 1)
            .unwrap_or(today)
            .and_time(NaiveTime::MIN)
            .and_utc();

        let spent_this_month: Option<Decimal> = sqlx::query_scalar(
            r#"
            SELECT COALESCE(-SUM(amount), 0)
            FROM ledger_entries
            WHERE organization_id = $1
              AND method = 'wallet_debit'
              AND status = 'completed'
              AND created_utc >= $2
            "#,
        )
        .bind(organization_id)
        .bind(month_start)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| {
            AppError::DatabaseError(anyhow::anyhow!("Failed to aggregate monthly spend: {}", e))
        })?;

        let spent_all_time: Option<Decimal> = sqlx::query_scalar(
            r#"
            SELECT COALESCE(-SUM(amount), 0)
            FROM ledger_entries
            WHERE organization_id = $1
              AND method = 'wallet_debit'
              AND status = 'completed'
            "#,
        )
        .bind(organization_id)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| {
            AppError::DatabaseError(anyhow::anyhow!("Failed to aggregate total spend: {}", e))
        })?;

        let (active_count, rate_sum): (i64, Option<Decimal>) = sqlx::query_as(
            r#"
            SELECT COUNT(*), SUM(hourly_rate)
            FROM billable_instances
            WHERE organization_id = $1
            "#,
        )
        .bind(organization_id)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| {
            AppError::DatabaseError(anyhow::anyhow!("Failed to aggregate instances: {}", e))
        })?;

        timer.observe_duration();

        Ok(BillingSummary {
            organization_id,
            spent_this_month: spent_this_month.unwrap_or(Decimal::ZERO),
            spent_all_time: spent_all_time.unwrap_or(Decimal::ZERO),
            active_count,
            monthly_estimate: rate_sum.unwrap_or(Decimal::ZERO)
                * Decimal::from(HOURS_PER_BILLING_MONTH),
        })
    }
}
