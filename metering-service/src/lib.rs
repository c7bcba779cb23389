//! Prepaid wallet metering and ledger engine.
//!
//! Metes hourly usage of provisioned compute instances against a prepaid
//! organizational wallet, producing an auditable, non-double-counting ledger
//! of charges: exactly-once billing per elapsed hour per instance, wallet
//! balance always equal to the sum of recorded ledger entries, and failed
//! attempts that never lose billable hours.

pub mod config;
pub mod error;
pub mod models;
pub mod observability;
pub mod services;
pub mod startup;
