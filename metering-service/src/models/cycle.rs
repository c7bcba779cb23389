//! Billing cycle record model.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// Outcome of a single metering attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CycleStatus {
    Billed,
    Failed,
}

impl CycleStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            CycleStatus::Billed => "billed",
            CycleStatus::Failed => "failed",
        }
    }

    pub fn from_string(s: &str) -> Self {
        match s {
            "billed" => CycleStatus::Billed,
            _ => CycleStatus::Failed,
        }
    }
}

/// Why a metering attempt failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureReason {
    InsufficientBalance,
    MissingWallet,
    DebitError,
}

impl FailureReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            FailureReason::InsufficientBalance => "insufficient_balance",
            FailureReason::MissingWallet => "missing_wallet",
            FailureReason::DebitError => "debit_error",
        }
    }

    pub fn from_string(s: &str) -> Self {
        match s {
            "insufficient_balance" => FailureReason::InsufficientBalance,
            "missing_wallet" => FailureReason::MissingWallet,
            _ => FailureReason::DebitError,
        }
    }
}

/// Audit row for one metering attempt, successful or failed, covering a
/// specific whole-hour window. A failed attempt never advances the anchor,
/// so the same unbilled window is retried on the next run.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct BillingCycleRecord {
    pub record_id: Uuid,
    pub instance_id: Uuid,
    pub organization_id: Uuid,
    pub period_start: DateTime<Utc>,
    pub period_end: DateTime<Utc>,
    pub hourly_rate: Decimal,
    pub total_amount: Decimal,
    pub status: String,
    pub failure_reason: Option<String>,
    pub ledger_entry_id: Option<Uuid>,
    pub metadata: Option<serde_json::Value>,
    pub created_utc: DateTime<Utc>,
}

impl BillingCycleRecord {
    /// Get parsed status.
    pub fn parsed_status(&self) -> CycleStatus {
        CycleStatus::from_string(&self.status)
    }

    /// Get parsed failure reason, if any.
    pub fn parsed_failure_reason(&self) -> Option<FailureReason> {
        self.failure_reason
            .as_deref()
            .map(FailureReason::from_string)
    }
}

/// Result of metering one instance at one point in time. Business-level
/// failures (insufficient funds, missing wallet) are values, not errors;
/// only transactional store failures propagate as errors.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CycleOutcome {
    /// Less than one whole hour elapsed, or the window was already billed
    /// by a concurrent run. Nothing was written.
    NoOp,
    Billed {
        hours: i64,
        amount: Decimal,
        record_id: Uuid,
        ledger_entry_id: Uuid,
    },
    Failed {
        reason: FailureReason,
        hours: i64,
        amount: Decimal,
        record_id: Uuid,
    },
}

impl CycleOutcome {
    /// Whether this attempt produced a completed charge.
    pub fn is_billed(&self) -> bool {
        matches!(self, CycleOutcome::Billed { .. })
    }
}

/// Filter parameters for listing billing cycle records.
#[derive(Debug, Clone, Default)]
pub struct ListCycleRecordsFilter {
    pub page_size: i32,
    pub page_token: Option<Uuid>,
}
