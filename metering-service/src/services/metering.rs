//! Metering engine: exactly-once whole-hour billing for one instance.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use tracing::{debug, error, info, instrument, warn};

use crate::error::AppError;
use crate::models::{BillableInstance, CycleOutcome, FailureReason};
use crate::services::metrics::{record_charged_amount, record_cycle};
use crate::services::rates::HourlyRateResolver;
use crate::services::store::{DebitOutcome, DebitRequest, FailedCycle, MeteringStore};

/// Decimal places charged amounts are rounded to.
pub const CURRENCY_SCALE: u32 = 2;

/// Whole hours elapsed since the anchor, floored. Clamped to zero if the
/// anchor is in the future (clock skew must never produce a negative charge).
pub fn elapsed_whole_hours(anchor: DateTime<Utc>, now: DateTime<Utc>) -> i64 {
    (now - anchor).num_hours().max(0)
}

/// Charge for a whole-hour window, rounded to currency precision.
pub fn charge_amount(hourly_rate: Decimal, hours: i64) -> Decimal {
    (hourly_rate * Decimal::from(hours)).round_dp(CURRENCY_SCALE)
}

enum ChargeKind {
    Usage,
    Initial,
}

impl ChargeKind {
    fn description(&self, instance: &BillableInstance, hours: i64) -> String {
        match self {
            ChargeKind::Usage => format!(
                "Usage charge: {} hour(s) for instance {}",
                hours, instance.instance_id
            ),
            ChargeKind::Initial => {
                format!("Initial hour charge for instance {}", instance.instance_id)
            }
        }
    }
}

/// Computes the owed whole-hour window for an instance and performs the
/// atomic debit against the store. Business-level failures come back as
/// `CycleOutcome` values; only transactional store failures are errors,
/// and those leave the anchor unmoved so the same window is retried on the
/// next scheduler tick.
pub struct MeteringEngine {
    store: Arc<dyn MeteringStore>,
    rates: HourlyRateResolver,
}

impl MeteringEngine {
    pub fn new(store: Arc<dyn MeteringStore>, rates: HourlyRateResolver) -> Self {
        Self { store, rates }
    }

    /// Bill all whole hours elapsed since the instance's anchor.
    ///
    /// Less than one whole hour is a no-op with no cycle record, which is
    /// what lets the scheduler run far more often than hourly without
    /// creating charge noise. The period end lands on the hour boundary
    /// `anchor + hours`, never on `now`, so partial minutes carry forward
    /// instead of being dropped or double-counted.
    #[instrument(skip(self, instance), fields(instance_id = %instance.instance_id, organization_id = %instance.organization_id))]
    pub async fn bill(
        &self,
        instance: &BillableInstance,
        now: DateTime<Utc>,
    ) -> Result<CycleOutcome, AppError> {
        let hours = elapsed_whole_hours(instance.anchor_utc, now);
        if hours < 1 {
            return Ok(CycleOutcome::NoOp);
        }
        self.charge_window(instance, hours, ChargeKind::Usage).await
    }

    /// Charge exactly one hour starting at the instance's anchor. Used by
    /// the provisioning boundary at creation time; on success the anchor
    /// lands at `created + 1h`, so the first scheduler run does not re-bill
    /// the same hour.
    #[instrument(skip(self, instance), fields(instance_id = %instance.instance_id, organization_id = %instance.organization_id))]
    pub async fn charge_first_hour(
        &self,
        instance: &BillableInstance,
    ) -> Result<CycleOutcome, AppError> {
        self.charge_window(instance, 1, ChargeKind::Initial).await
    }

    async fn charge_window(
        &self,
        instance: &BillableInstance,
        hours: i64,
        kind: ChargeKind,
    ) -> Result<CycleOutcome, AppError> {
        let resolved = self.rates.resolve(instance).await?;
        let period_end = instance.anchor_utc + Duration::hours(hours);
        let amount = charge_amount(resolved.rate, hours);

        let req = DebitRequest {
            instance_id: instance.instance_id,
            organization_id: instance.organization_id,
            period_start: instance.anchor_utc,
            period_end,
            hourly_rate: resolved.rate,
            hours,
            amount,
            description: kind.description(instance, hours),
            expected_anchor: instance.anchor_utc,
            rate_fallback: resolved.fallback,
        };

        match self.store.debit_for_window(&req).await {
            Ok(DebitOutcome::Billed {
                ledger_entry_id,
                record_id,
                balance_after,
                currency,
            }) => {
                record_cycle("billed", "");
                record_charged_amount(&currency, amount.to_f64().unwrap_or(0.0));
                info!(
                    hours = hours,
                    amount = %amount,
                    balance_after = %balance_after,
                    period_end = %period_end,
                    "Instance billed"
                );
                Ok(CycleOutcome::Billed {
                    hours,
                    amount,
                    record_id,
                    ledger_entry_id,
                })
            }
            Ok(DebitOutcome::InsufficientBalance { record_id, balance }) => {
                record_cycle("failed", FailureReason::InsufficientBalance.as_str());
                warn!(
                    hours = hours,
                    amount = %amount,
                    balance = %balance,
                    "Insufficient balance, cycle failed; anchor unchanged"
                );
                Ok(CycleOutcome::Failed {
                    reason: FailureReason::InsufficientBalance,
                    hours,
                    amount,
                    record_id,
                })
            }
            Ok(DebitOutcome::MissingWallet { record_id }) => {
                record_cycle("failed", FailureReason::MissingWallet.as_str());
                error!("Organization has no wallet, cycle failed");
                Ok(CycleOutcome::Failed {
                    reason: FailureReason::MissingWallet,
                    hours,
                    amount,
                    record_id,
                })
            }
            Ok(DebitOutcome::AnchorMoved) => {
                debug!("Anchor moved under a concurrent run, window already billed");
                Ok(CycleOutcome::NoOp)
            }
            Err(e) => {
                record_cycle("failed", FailureReason::DebitError.as_str());
                error!(error = %e, "Debit transaction failed, will retry next tick");
                self.record_debit_error(&req).await;
                Err(e)
            }
        }
    }

    /// Best-effort audit row for an aborted debit. The failed transaction
    /// wrote nothing, so the attempt would otherwise be invisible.
    async fn record_debit_error(&self, req: &DebitRequest) {
        let failed = FailedCycle {
            instance_id: req.instance_id,
            organization_id: req.organization_id,
            period_start: req.period_start,
            period_end: req.period_end,
            hourly_rate: req.hourly_rate,
            total_amount: req.amount,
            reason: FailureReason::DebitError,
        };
        if let Err(e) = self.store.record_failed_cycle(&failed).await {
            warn!(error = %e, instance_id = %req.instance_id, "Could not record debit_error cycle");
        }
    }
}
