//! Domain models for metering-service.

mod cycle;
mod instance;
mod plan;
mod wallet;

pub use cycle::{
    BillingCycleRecord, CycleOutcome, CycleStatus, FailureReason, ListCycleRecordsFilter,
};
pub use instance::{BillableInstance, CreateInstance};
pub use plan::{CreatePlan, InstancePlan};
pub use wallet::{
    BillingSummary, CreditWallet, LedgerEntry, PaymentMethod, PaymentStatus, Wallet,
};
