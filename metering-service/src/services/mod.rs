//! Services module for metering-service.

pub mod clock;
pub mod database;
pub mod metering;
pub mod metrics;
pub mod provisioning;
pub mod rates;
pub mod scheduler;
pub mod store;

pub use clock::{Clock, SystemClock};
pub use database::Database;
pub use metering::MeteringEngine;
pub use metrics::{
    get_metrics, init_metrics, observe_run_duration, record_billing_run, record_charged_amount,
    record_cycle,
};
pub use provisioning::InstanceLifecycle;
pub use rates::HourlyRateResolver;
pub use scheduler::{BillingScheduler, RunSummary};
pub use store::{DebitOutcome, DebitRequest, FailedCycle, MeteringStore};
