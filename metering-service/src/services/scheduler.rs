//! Recurring billing driver.

use std::sync::Arc;
use std::time::Instant;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::Serialize;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, instrument, warn};
use uuid::Uuid;

use crate::error::AppError;
use crate::models::CycleOutcome;
use crate::services::clock::Clock;
use crate::services::metering::MeteringEngine;
use crate::services::metrics::{observe_run_duration, record_billing_run};
use crate::services::store::MeteringStore;

/// Aggregated result of one billing run, the observability surface for the
/// run as a whole (per-attempt audit lives in the cycle records).
#[derive(Debug, Clone, Serialize)]
pub struct RunSummary {
    pub started_utc: DateTime<Utc>,
    pub billed_count: u32,
    pub failed_count: u32,
    pub total_amount: Decimal,
    pub total_hours: i64,
    pub failed_instance_ids: Vec<Uuid>,
    pub errors: Vec<String>,
}

impl RunSummary {
    fn new(started_utc: DateTime<Utc>) -> Self {
        Self {
            started_utc,
            billed_count: 0,
            failed_count: 0,
            total_amount: Decimal::ZERO,
            total_hours: 0,
            failed_instance_ids: Vec::new(),
            errors: Vec::new(),
        }
    }
}

/// Periodic driver that enumerates due instances and bills each through the
/// metering engine. Owns its own lifecycle: `start` spawns the loop (one
/// immediate catch-up run, then a fixed interval), `stop` cancels it.
///
/// A run never overlaps another run in the same process; cross-process
/// overlap is already harmless because the debit primitive serializes on
/// the wallet row lock. Instances are billed sequentially, so billing is
/// never concurrent within one organization.
pub struct BillingScheduler {
    store: Arc<dyn MeteringStore>,
    engine: Arc<MeteringEngine>,
    clock: Arc<dyn Clock>,
    interval: std::time::Duration,
    run_lock: Mutex<()>,
    shutdown: CancellationToken,
}

impl BillingScheduler {
    pub fn new(
        store: Arc<dyn MeteringStore>,
        engine: Arc<MeteringEngine>,
        clock: Arc<dyn Clock>,
        interval: std::time::Duration,
    ) -> Self {
        Self {
            store,
            engine,
            clock,
            interval,
            run_lock: Mutex::new(()),
            shutdown: CancellationToken::new(),
        }
    }

    /// Spawn the scheduling loop. The first tick fires immediately so
    /// anchors that aged past an hour while the process was down are
    /// caught up shortly after start.
    pub fn start(self: Arc<Self>) -> JoinHandle<()> {
        info!(interval_secs = self.interval.as_secs(), "Billing scheduler started");
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(self.interval);
            loop {
                tokio::select! {
                    _ = self.shutdown.cancelled() => {
                        info!("Billing scheduler stopped");
                        break;
                    }
                    _ = ticker.tick() => {
                        let now = self.clock.now();
                        match self.run_once(now).await {
                            Ok(Some(_)) | Ok(None) => {}
                            Err(e) => {
                                error!(error = %e, "Billing run failed, retrying next tick");
                            }
                        }
                    }
                }
            }
        })
    }

    /// Request the loop to stop after the in-flight tick, if any.
    pub fn stop(&self) {
        self.shutdown.cancel();
    }

    /// Execute one billing run at `now`. Returns `None` when another run is
    /// already in flight in this process. A single instance's failure never
    /// aborts the run; failures are collected into the summary.
    #[instrument(skip(self), fields(now = %now))]
    pub async fn run_once(&self, now: DateTime<Utc>) -> Result<Option<RunSummary>, AppError> {
        let _guard = match self.run_lock.try_lock() {
            Ok(guard) => guard,
            Err(_) => {
                warn!("Billing run already in progress, skipping tick");
                record_billing_run("skipped");
                return Ok(None);
            }
        };

        let started = Instant::now();
        let instances = match self.store.list_due_instances(now).await {
            Ok(instances) => instances,
            Err(e) => {
                record_billing_run("failed");
                return Err(e);
            }
        };

        let mut summary = RunSummary::new(now);
        for instance in &instances {
            match self.engine.bill(instance, now).await {
                Ok(CycleOutcome::Billed { hours, amount, .. }) => {
                    summary.billed_count += 1;
                    summary.total_amount += amount;
                    summary.total_hours += hours;
                }
                Ok(CycleOutcome::Failed { reason, .. }) => {
                    summary.failed_count += 1;
                    summary.failed_instance_ids.push(instance.instance_id);
                    summary.errors.push(format!(
                        "{}: {}",
                        instance.instance_id,
                        reason.as_str()
                    ));
                }
                Ok(CycleOutcome::NoOp) => {}
                Err(e) => {
                    summary.failed_count += 1;
                    summary.failed_instance_ids.push(instance.instance_id);
                    summary.errors.push(format!("{}: {}", instance.instance_id, e));
                }
            }
        }

        record_billing_run("completed");
        observe_run_duration(started.elapsed().as_secs_f64());
        info!(
            candidates = instances.len(),
            billed = summary.billed_count,
            failed = summary.failed_count,
            total_amount = %summary.total_amount,
            total_hours = summary.total_hours,
            "Billing run completed"
        );

        Ok(Some(summary))
    }
}
