//! Test helper module for metering-service integration tests.
//!
//! Provides an in-memory `MeteringStore` with the same transactional
//! semantics as the PostgreSQL store, plus a manually advanced clock, so
//! engine/scheduler behavior can be driven without a database or real
//! timers.

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{DateTime, Datelike, Duration, NaiveDate, NaiveTime, TimeZone, Utc};
use rust_decimal::Decimal;
use serde_json::json;
use uuid::Uuid;

use metering_service::error::AppError;
use metering_service::models::{
    BillableInstance, BillingCycleRecord, BillingSummary, CreateInstance, CreatePlan,
    CreditWallet, CycleStatus, FailureReason, InstancePlan, LedgerEntry, ListCycleRecordsFilter,
    PaymentMethod, PaymentStatus, Wallet,
};
use metering_service::services::clock::Clock;
use metering_service::services::rates::{fallback_hourly_rate, HourlyRateResolver};
use metering_service::services::scheduler::BillingScheduler;
use metering_service::services::store::{DebitOutcome, DebitRequest, FailedCycle, MeteringStore};
use metering_service::services::MeteringEngine;

/// Base timestamp most tests anchor on.
pub fn t0() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2025, 3, 1, 0, 0, 0).unwrap()
}

/// Money helper: dollars-and-cents.
pub fn money(cents: i64) -> Decimal {
    Decimal::new(cents, 2)
}

/// Rate helper: four decimal places.
pub fn rate(ten_thousandths: i64) -> Decimal {
    Decimal::new(ten_thousandths, 4)
}

/// Manually advanced clock.
pub struct ManualClock {
    now: Mutex<DateTime<Utc>>,
}

impl ManualClock {
    pub fn at(start: DateTime<Utc>) -> Arc<Self> {
        Arc::new(Self {
            now: Mutex::new(start),
        })
    }

    pub fn set(&self, now: DateTime<Utc>) {
        *self.now.lock().unwrap() = now;
    }

    pub fn advance(&self, by: Duration) {
        let mut now = self.now.lock().unwrap();
        *now += by;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock().unwrap()
    }
}

#[derive(Default)]
struct State {
    wallets: HashMap<Uuid, Wallet>,
    entries: Vec<LedgerEntry>,
    plans: HashMap<Uuid, InstancePlan>,
    instances: HashMap<Uuid, BillableInstance>,
    cycles: Vec<BillingCycleRecord>,
}

/// In-memory store. A single mutex over the whole state makes every
/// operation atomic, mirroring the database transaction boundaries.
#[derive(Default)]
pub struct MemoryStore {
    state: Mutex<State>,
    /// When set, `debit_for_window` fails as if the transaction aborted.
    pub fail_debits: std::sync::atomic::AtomicBool,
}

impl MemoryStore {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn set_fail_debits(&self, fail: bool) {
        self.fail_debits
            .store(fail, std::sync::atomic::Ordering::SeqCst);
    }

    /// All ledger entries for an organization.
    pub fn entries_for(&self, organization_id: Uuid) -> Vec<LedgerEntry> {
        self.state
            .lock()
            .unwrap()
            .entries
            .iter()
            .filter(|e| e.organization_id == organization_id)
            .cloned()
            .collect()
    }

    /// All cycle records for an instance, oldest first.
    pub fn cycles_for(&self, instance_id: Uuid) -> Vec<BillingCycleRecord> {
        self.state
            .lock()
            .unwrap()
            .cycles
            .iter()
            .filter(|c| c.instance_id == instance_id)
            .cloned()
            .collect()
    }

    fn insert_cycle(
        state: &mut State,
        req: &DebitRequest,
        status: CycleStatus,
        failure_reason: Option<FailureReason>,
        ledger_entry_id: Option<Uuid>,
        now: DateTime<Utc>,
    ) -> Uuid {
        let record_id = Uuid::new_v4();
        state.cycles.push(BillingCycleRecord {
            record_id,
            instance_id: req.instance_id,
            organization_id: req.organization_id,
            period_start: req.period_start,
            period_end: req.period_end,
            hourly_rate: req.hourly_rate,
            total_amount: req.amount,
            status: status.as_str().to_string(),
            failure_reason: failure_reason.map(|r| r.as_str().to_string()),
            ledger_entry_id,
            metadata: Some(json!({ "rate_fallback": req.rate_fallback, "hours": req.hours })),
            created_utc: now,
        });
        record_id
    }
}

#[async_trait]
impl MeteringStore for MemoryStore {
    async fn create_wallet(
        &self,
        organization_id: Uuid,
        currency: &str,
    ) -> Result<Wallet, AppError> {
        let mut state = self.state.lock().unwrap();
        if state.wallets.contains_key(&organization_id) {
            return Err(AppError::Conflict(anyhow::anyhow!(
                "Wallet already exists for organization {}",
                organization_id
            )));
        }
        let wallet = Wallet {
            organization_id,
            balance: Decimal::ZERO,
            currency: currency.to_string(),
            created_utc: Utc::now(),
            updated_utc: Utc::now(),
        };
        state.wallets.insert(organization_id, wallet.clone());
        Ok(wallet)
    }

    async fn get_wallet(&self, organization_id: Uuid) -> Result<Option<Wallet>, AppError> {
        Ok(self
            .state
            .lock()
            .unwrap()
            .wallets
            .get(&organization_id)
            .cloned())
    }

    async fn credit_wallet(&self, input: &CreditWallet) -> Result<LedgerEntry, AppError> {
        if input.amount <= Decimal::ZERO {
            return Err(AppError::BadRequest(anyhow::anyhow!(
                "Credit amount must be positive"
            )));
        }
        let mut state = self.state.lock().unwrap();
        let wallet = state.wallets.get_mut(&input.organization_id).ok_or_else(|| {
            AppError::NotFound(anyhow::anyhow!(
                "No wallet for organization {}",
                input.organization_id
            ))
        })?;
        let balance_before = wallet.balance;
        wallet.balance += input.amount;
        let currency = wallet.currency.clone();
        let balance_after = wallet.balance;

        let entry = LedgerEntry {
            entry_id: Uuid::new_v4(),
            organization_id: input.organization_id,
            amount: input.amount,
            currency,
            method: input.method.as_str().to_string(),
            status: PaymentStatus::Completed.as_str().to_string(),
            description: input.description.clone(),
            metadata: Some(json!({
                "balance_before": balance_before,
                "balance_after": balance_after,
            })),
            related_instance_id: None,
            created_utc: Utc::now(),
        };
        state.entries.push(entry.clone());
        Ok(entry)
    }

    async fn get_wallet_balance(
        &self,
        organization_id: Uuid,
    ) -> Result<Option<Decimal>, AppError> {
        Ok(self
            .state
            .lock()
            .unwrap()
            .wallets
            .get(&organization_id)
            .map(|w| w.balance))
    }

    async fn debit_for_window(&self, req: &DebitRequest) -> Result<DebitOutcome, AppError> {
        if self.fail_debits.load(std::sync::atomic::Ordering::SeqCst) {
            return Err(AppError::DatabaseError(anyhow::anyhow!(
                "simulated transaction failure"
            )));
        }

        let mut state = self.state.lock().unwrap();
        let now = req.period_end;

        let Some(wallet) = state.wallets.get(&req.organization_id).cloned() else {
            let record_id = Self::insert_cycle(
                &mut state,
                req,
                CycleStatus::Failed,
                Some(FailureReason::MissingWallet),
                None,
                now,
            );
            return Ok(DebitOutcome::MissingWallet { record_id });
        };

        match state.instances.get(&req.instance_id) {
            Some(instance) if instance.anchor_utc == req.expected_anchor => {}
            _ => return Ok(DebitOutcome::AnchorMoved),
        }

        if wallet.balance < req.amount {
            let record_id = Self::insert_cycle(
                &mut state,
                req,
                CycleStatus::Failed,
                Some(FailureReason::InsufficientBalance),
                None,
                now,
            );
            return Ok(DebitOutcome::InsufficientBalance {
                record_id,
                balance: wallet.balance,
            });
        }

        let balance_after = wallet.balance - req.amount;
        let entry_id = Uuid::new_v4();
        state.entries.push(LedgerEntry {
            entry_id,
            organization_id: req.organization_id,
            amount: -req.amount,
            currency: wallet.currency.clone(),
            method: PaymentMethod::WalletDebit.as_str().to_string(),
            status: PaymentStatus::Completed.as_str().to_string(),
            description: req.description.clone(),
            metadata: Some(json!({
                "balance_before": wallet.balance,
                "balance_after": balance_after,
                "hours": req.hours,
                "rate_fallback": req.rate_fallback,
            })),
            related_instance_id: Some(req.instance_id),
            created_utc: now,
        });

        let record_id = Self::insert_cycle(
            &mut state,
            req,
            CycleStatus::Billed,
            None,
            Some(entry_id),
            now,
        );

        if let Some(wallet) = state.wallets.get_mut(&req.organization_id) {
            wallet.balance = balance_after;
            wallet.updated_utc = now;
        }
        if let Some(instance) = state.instances.get_mut(&req.instance_id) {
            instance.anchor_utc = req.period_end;
        }

        Ok(DebitOutcome::Billed {
            ledger_entry_id: entry_id,
            record_id,
            balance_after,
            currency: wallet.currency,
        })
    }

    async fn record_failed_cycle(
        &self,
        input: &FailedCycle,
    ) -> Result<BillingCycleRecord, AppError> {
        let mut state = self.state.lock().unwrap();
        let record = BillingCycleRecord {
            record_id: Uuid::new_v4(),
            instance_id: input.instance_id,
            organization_id: input.organization_id,
            period_start: input.period_start,
            period_end: input.period_end,
            hourly_rate: input.hourly_rate,
            total_amount: input.total_amount,
            status: CycleStatus::Failed.as_str().to_string(),
            failure_reason: Some(input.reason.as_str().to_string()),
            ledger_entry_id: None,
            metadata: None,
            created_utc: Utc::now(),
        };
        state.cycles.push(record.clone());
        Ok(record)
    }

    async fn create_instance(
        &self,
        input: &CreateInstance,
    ) -> Result<BillableInstance, AppError> {
        let mut state = self.state.lock().unwrap();
        if state.instances.contains_key(&input.instance_id) {
            return Err(AppError::Conflict(anyhow::anyhow!(
                "Instance {} is already metered",
                input.instance_id
            )));
        }
        let instance = BillableInstance {
            instance_id: input.instance_id,
            organization_id: input.organization_id,
            label: input.label.clone(),
            plan_id: input.plan_id,
            hourly_rate: input.hourly_rate,
            anchor_utc: input.created_utc,
            created_utc: input.created_utc,
        };
        state.instances.insert(input.instance_id, instance.clone());
        Ok(instance)
    }

    async fn get_instance(
        &self,
        instance_id: Uuid,
    ) -> Result<Option<BillableInstance>, AppError> {
        Ok(self
            .state
            .lock()
            .unwrap()
            .instances
            .get(&instance_id)
            .cloned())
    }

    async fn delete_instance(&self, instance_id: Uuid) -> Result<bool, AppError> {
        Ok(self
            .state
            .lock()
            .unwrap()
            .instances
            .remove(&instance_id)
            .is_some())
    }

    async fn list_due_instances(
        &self,
        now: DateTime<Utc>,
    ) -> Result<Vec<BillableInstance>, AppError> {
        let cutoff = now - Duration::hours(1);
        let mut due: Vec<BillableInstance> = self
            .state
            .lock()
            .unwrap()
            .instances
            .values()
            .filter(|i| i.anchor_utc <= cutoff)
            .cloned()
            .collect();
        due.sort_by_key(|i| i.created_utc);
        Ok(due)
    }

    async fn create_plan(&self, input: &CreatePlan) -> Result<InstancePlan, AppError> {
        let mut state = self.state.lock().unwrap();
        let plan = InstancePlan {
            plan_id: Uuid::new_v4(),
            name: input.name.clone(),
            base_price: input.base_price,
            markup_price: input.markup_price,
            currency: input.currency.clone(),
            is_active: true,
            created_utc: Utc::now(),
        };
        state.plans.insert(plan.plan_id, plan.clone());
        Ok(plan)
    }

    async fn get_plan(&self, plan_id: Uuid) -> Result<Option<InstancePlan>, AppError> {
        Ok(self.state.lock().unwrap().plans.get(&plan_id).cloned())
    }

    async fn get_billing_history(
        &self,
        organization_id: Uuid,
        filter: &ListCycleRecordsFilter,
    ) -> Result<Vec<BillingCycleRecord>, AppError> {
        let limit = filter.page_size.clamp(1, 100) as usize;
        let state = self.state.lock().unwrap();
        let mut records: Vec<BillingCycleRecord> = state
            .cycles
            .iter()
            .filter(|c| c.organization_id == organization_id)
            .cloned()
            .collect();
        records.sort_by_key(|c| c.record_id);
        if let Some(cursor) = filter.page_token {
            records.retain(|c| c.record_id > cursor);
        }
        records.truncate(limit);
        Ok(records)
    }

    async fn get_billing_summary(
        &self,
        organization_id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<BillingSummary, AppError> {
        let today = now.date_naive();
        let month_start = NaiveDate::from_ymd_opt(today.year(), today.month(), 1)
            .unwrap_or(today)
            .and_time(NaiveTime::MIN)
            .and_utc();

        let state = self.state.lock().unwrap();
        let debits = state.entries.iter().filter(|e| {
            e.organization_id == organization_id
                && e.method == PaymentMethod::WalletDebit.as_str()
                && e.status == PaymentStatus::Completed.as_str()
        });

        let mut spent_this_month = Decimal::ZERO;
        let mut spent_all_time = Decimal::ZERO;
        for entry in debits {
            spent_all_time -= entry.amount;
            if entry.created_utc >= month_start {
                spent_this_month -= entry.amount;
            }
        }

        let active: Vec<&BillableInstance> = state
            .instances
            .values()
            .filter(|i| i.organization_id == organization_id)
            .collect();
        let rate_sum: Decimal = active.iter().map(|i| i.hourly_rate).sum();

        Ok(BillingSummary {
            organization_id,
            spent_this_month,
            spent_all_time,
            active_count: active.len() as i64,
            monthly_estimate: rate_sum * Decimal::from(730),
        })
    }
}

/// Assembled engine + store harness.
pub struct Harness {
    pub store: Arc<MemoryStore>,
    pub engine: Arc<MeteringEngine>,
}

impl Harness {
    pub fn new() -> Self {
        let store = MemoryStore::new();
        let engine = Arc::new(MeteringEngine::new(
            store.clone(),
            HourlyRateResolver::new(store.clone(), fallback_hourly_rate()),
        ));
        Self { store, engine }
    }

    pub fn scheduler(&self, clock: Arc<ManualClock>) -> Arc<BillingScheduler> {
        Arc::new(BillingScheduler::new(
            self.store.clone(),
            self.engine.clone(),
            clock,
            std::time::Duration::from_secs(3600),
        ))
    }

    /// Create a funded wallet.
    pub async fn wallet_with(&self, organization_id: Uuid, balance: Decimal) {
        self.store
            .create_wallet(organization_id, "USD")
            .await
            .expect("create wallet");
        if balance > Decimal::ZERO {
            self.store
                .credit_wallet(&CreditWallet {
                    organization_id,
                    amount: balance,
                    method: PaymentMethod::ExternalPayment,
                    description: "Test top-up".to_string(),
                    metadata: None,
                })
                .await
                .expect("credit wallet");
        }
    }

    /// Top up an existing wallet.
    pub async fn wallet_with_topup(&self, organization_id: Uuid, amount: Decimal) {
        self.store
            .credit_wallet(&CreditWallet {
                organization_id,
                amount,
                method: PaymentMethod::ExternalPayment,
                description: "Test top-up".to_string(),
                metadata: None,
            })
            .await
            .expect("credit wallet");
    }

    /// Bare instance input for tests that tweak fields before creation.
    pub fn instance_input(
        &self,
        organization_id: Uuid,
        hourly_rate: Decimal,
        anchor: DateTime<Utc>,
    ) -> CreateInstance {
        CreateInstance {
            instance_id: Uuid::new_v4(),
            organization_id,
            label: "test-instance".to_string(),
            plan_id: None,
            hourly_rate,
            created_utc: anchor,
        }
    }

    /// Register an instance whose anchor is `anchor`, without charging.
    pub async fn instance_at(
        &self,
        organization_id: Uuid,
        hourly_rate: Decimal,
        anchor: DateTime<Utc>,
    ) -> BillableInstance {
        self.store
            .create_instance(&CreateInstance {
                instance_id: Uuid::new_v4(),
                organization_id,
                label: "test-instance".to_string(),
                plan_id: None,
                hourly_rate,
                created_utc: anchor,
            })
            .await
            .expect("create instance")
    }
}

impl Default for Harness {
    fn default() -> Self {
        Self::new()
    }
}
