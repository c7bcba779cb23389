//! Wallet and ledger entry models.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// How a ledger entry came to be.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentMethod {
    ExternalPayment,
    WalletDebit,
    WalletCredit,
}

impl PaymentMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentMethod::ExternalPayment => "external_payment",
            PaymentMethod::WalletDebit => "wallet_debit",
            PaymentMethod::WalletCredit => "wallet_credit",
        }
    }

    pub fn from_string(s: &str) -> Self {
        match s {
            "external_payment" => PaymentMethod::ExternalPayment,
            "wallet_debit" => PaymentMethod::WalletDebit,
            _ => PaymentMethod::WalletCredit,
        }
    }
}

/// Ledger entry status. Metering-originated entries are written already
/// completed or failed; only gateway-originated entries transition
/// pending -> completed/failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentStatus {
    Pending,
    Completed,
    Failed,
    Cancelled,
}

impl PaymentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentStatus::Pending => "pending",
            PaymentStatus::Completed => "completed",
            PaymentStatus::Failed => "failed",
            PaymentStatus::Cancelled => "cancelled",
        }
    }

    pub fn from_string(s: &str) -> Self {
        match s {
            "completed" => PaymentStatus::Completed,
            "failed" => PaymentStatus::Failed,
            "cancelled" => PaymentStatus::Cancelled,
            _ => PaymentStatus::Pending,
        }
    }
}

/// Prepaid wallet, one per organization. The balance is mutated only inside
/// a transaction that also writes a ledger entry, so it always equals the
/// running sum of that organization's entry amounts.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Wallet {
    pub organization_id: Uuid,
    pub balance: Decimal,
    pub currency: String,
    pub created_utc: DateTime<Utc>,
    pub updated_utc: DateTime<Utc>,
}

/// Immutable financial record. Credits carry positive amounts, debits
/// negative ones; `metadata` records balance before/after for audit.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct LedgerEntry {
    pub entry_id: Uuid,
    pub organization_id: Uuid,
    pub amount: Decimal,
    pub currency: String,
    pub method: String,
    pub status: String,
    pub description: String,
    pub metadata: Option<serde_json::Value>,
    pub related_instance_id: Option<Uuid>,
    pub created_utc: DateTime<Utc>,
}

impl LedgerEntry {
    /// Get parsed payment method.
    pub fn parsed_method(&self) -> PaymentMethod {
        PaymentMethod::from_string(&self.method)
    }

    /// Get parsed status.
    pub fn parsed_status(&self) -> PaymentStatus {
        PaymentStatus::from_string(&self.status)
    }
}

/// Input for crediting a wallet (payment collaborator boundary).
#[derive(Debug, Clone)]
pub struct CreditWallet {
    pub organization_id: Uuid,
    pub amount: Decimal,
    pub method: PaymentMethod,
    pub description: String,
    pub metadata: Option<serde_json::Value>,
}

/// Spend summary for the reporting collaborator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BillingSummary {
    pub organization_id: Uuid,
    pub spent_this_month: Decimal,
    pub spent_all_time: Decimal,
    pub active_count: i64,
    pub monthly_estimate: Decimal,
}
