//! Hourly rate resolution.

use std::sync::Arc;

use rust_decimal::Decimal;
use tracing::warn;

use crate::error::AppError;
use crate::models::BillableInstance;
use crate::services::store::MeteringStore;

/// Calendar-hour average of a month, used to convert monthly plan prices to
/// hourly rates.
pub const HOURS_PER_BILLING_MONTH: i64 = 730;

/// Decimal places carried on hourly rates.
pub const RATE_SCALE: u32 = 4;

/// Rate applied when an assigned plan cannot be resolved: 0.0068/h,
/// roughly a 5.00/month plan at 730 hours. A missing plan must never block
/// metering, only degrade pricing accuracy.
pub fn fallback_hourly_rate() -> Decimal {
    Decimal::new(68, 4)
}

/// An instance's effective hourly rate plus whether the fallback constant
/// had to be used (flagged into the cycle record metadata).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResolvedRate {
    pub rate: Decimal,
    pub fallback: bool,
}

/// Computes an instance's effective hourly rate from its assigned plan.
///
/// Instances without a plan bill at the rate supplied when they were
/// provisioned; instances whose plan is deleted or inactive bill at the
/// fallback rate so a catalog mishap degrades pricing instead of halting
/// metering.
pub struct HourlyRateResolver {
    store: Arc<dyn MeteringStore>,
    fallback_rate: Decimal,
}

impl HourlyRateResolver {
    pub fn new(store: Arc<dyn MeteringStore>, fallback_rate: Decimal) -> Self {
        Self {
            store,
            fallback_rate,
        }
    }

    /// Hourly rate for a monthly plan price: `(base + markup) / 730`.
    pub fn rate_from_monthly(base_price: Decimal, markup_price: Decimal) -> Decimal {
        ((base_price + markup_price) / Decimal::from(HOURS_PER_BILLING_MONTH))
            .round_dp(RATE_SCALE)
    }

    pub async fn resolve(&self, instance: &BillableInstance) -> Result<ResolvedRate, AppError> {
        let Some(plan_id) = instance.plan_id else {
            return Ok(ResolvedRate {
                rate: instance.hourly_rate,
                fallback: false,
            });
        };

        match self.store.get_plan(plan_id).await? {
            Some(plan) if plan.is_active => Ok(ResolvedRate {
                rate: Self::rate_from_monthly(plan.base_price, plan.markup_price),
                fallback: false,
            }),
            _ => {
                warn!(
                    instance_id = %instance.instance_id,
                    plan_id = %plan_id,
                    fallback_rate = %self.fallback_rate,
                    "Plan not resolvable, billing at fallback rate"
                );
                Ok(ResolvedRate {
                    rate: self.fallback_rate,
                    fallback: true,
                })
            }
        }
    }
}
