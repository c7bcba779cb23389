//! Storage seam for the metering engine.
//!
//! `MeteringStore` is the transactional boundary the engine, scheduler, and
//! provisioning handler are injected with: wallet balances and ledger entries,
//! the billable-instance repository, and the atomic debit primitive that ties
//! them together. The production implementation is the PostgreSQL `Database`;
//! tests drive the same contract through an in-memory store and a manual
//! clock.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use uuid::Uuid;

use crate::error::AppError;
use crate::models::{
    BillableInstance, BillingCycleRecord, BillingSummary, CreateInstance, CreatePlan,
    CreditWallet, FailureReason, InstancePlan, LedgerEntry, ListCycleRecordsFilter, Wallet,
};

/// One whole-hour debit, executed atomically: wallet row lock, balance
/// check, balance decrement + completed ledger entry + billed cycle record +
/// anchor advance, all committed together or not at all. Insufficient
/// balance and missing wallet commit only a failed cycle record and leave
/// the anchor unmoved.
#[derive(Debug, Clone)]
pub struct DebitRequest {
    pub instance_id: Uuid,
    pub organization_id: Uuid,
    pub period_start: DateTime<Utc>,
    pub period_end: DateTime<Utc>,
    pub hourly_rate: Decimal,
    pub hours: i64,
    pub amount: Decimal,
    pub description: String,
    /// Anchor value the window was computed from. If the stored anchor no
    /// longer matches, a concurrent run already billed this window and the
    /// debit must become a no-op.
    pub expected_anchor: DateTime<Utc>,
    /// Whether the rate came from the fallback constant rather than a
    /// resolvable plan; recorded in the cycle metadata for reconciliation.
    pub rate_fallback: bool,
}

/// Result of the atomic debit primitive.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DebitOutcome {
    Billed {
        ledger_entry_id: Uuid,
        record_id: Uuid,
        balance_after: Decimal,
        currency: String,
    },
    InsufficientBalance {
        record_id: Uuid,
        balance: Decimal,
    },
    MissingWallet {
        record_id: Uuid,
    },
    /// The instance anchor moved (or the instance was deleted) between
    /// selection and billing; nothing was written.
    AnchorMoved,
}

/// Input for recording a failed attempt outside the aborted transaction
/// (used for `debit_error` records, best-effort).
#[derive(Debug, Clone)]
pub struct FailedCycle {
    pub instance_id: Uuid,
    pub organization_id: Uuid,
    pub period_start: DateTime<Utc>,
    pub period_end: DateTime<Utc>,
    pub hourly_rate: Decimal,
    pub total_amount: Decimal,
    pub reason: FailureReason,
}

/// Durable state behind the metering engine.
#[async_trait]
pub trait MeteringStore: Send + Sync {
    // -------------------------------------------------------------------------
    // Wallet Operations
    // -------------------------------------------------------------------------

    async fn create_wallet(
        &self,
        organization_id: Uuid,
        currency: &str,
    ) -> Result<Wallet, AppError>;

    async fn get_wallet(&self, organization_id: Uuid) -> Result<Option<Wallet>, AppError>;

    /// Atomically credit a wallet and write the matching ledger entry.
    /// This is the payment collaborator's boundary.
    async fn credit_wallet(&self, input: &CreditWallet) -> Result<LedgerEntry, AppError>;

    async fn get_wallet_balance(
        &self,
        organization_id: Uuid,
    ) -> Result<Option<Decimal>, AppError>;

    // -------------------------------------------------------------------------
    // Debit Primitive
    // -------------------------------------------------------------------------

    async fn debit_for_window(&self, req: &DebitRequest) -> Result<DebitOutcome, AppError>;

    /// Record a failed attempt in its own transaction. Used after
    /// `debit_for_window` aborts, so the attempt still leaves an audit row.
    async fn record_failed_cycle(
        &self,
        input: &FailedCycle,
    ) -> Result<BillingCycleRecord, AppError>;

    // -------------------------------------------------------------------------
    // Billable Instances
    // -------------------------------------------------------------------------

    async fn create_instance(
        &self,
        input: &CreateInstance,
    ) -> Result<BillableInstance, AppError>;

    async fn get_instance(
        &self,
        instance_id: Uuid,
    ) -> Result<Option<BillableInstance>, AppError>;

    /// Remove an instance from metering. Returns false if it was not known.
    async fn delete_instance(&self, instance_id: Uuid) -> Result<bool, AppError>;

    /// Instances whose anchor is at least one hour old at `now`, oldest
    /// first. A cheap pre-filter; the engine re-derives the exact floor-hour
    /// math before charging.
    async fn list_due_instances(
        &self,
        now: DateTime<Utc>,
    ) -> Result<Vec<BillableInstance>, AppError>;

    // -------------------------------------------------------------------------
    // Plans
    // -------------------------------------------------------------------------

    async fn create_plan(&self, input: &CreatePlan) -> Result<InstancePlan, AppError>;

    async fn get_plan(&self, plan_id: Uuid) -> Result<Option<InstancePlan>, AppError>;

    // -------------------------------------------------------------------------
    // Reporting (read-only collaborator surface)
    // -------------------------------------------------------------------------

    async fn get_billing_history(
        &self,
        organization_id: Uuid,
        filter: &ListCycleRecordsFilter,
    ) -> Result<Vec<BillingCycleRecord>, AppError>;

    async fn get_billing_summary(
        &self,
        organization_id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<BillingSummary, AppError>;
}
