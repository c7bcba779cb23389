//! Billable instance model (metering view of a provisioned instance).

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// Metering view of a provisioned compute instance. `anchor_utc` is the
/// instant up to which billing is caught up; it equals creation time until
/// the first charge and is advanced in whole-hour increments exclusively by
/// the metering engine. The row is deleted only when the instance is
/// permanently destroyed - suspending does not pause billing, since reserved
/// capacity remains allocated.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct BillableInstance {
    pub instance_id: Uuid,
    pub organization_id: Uuid,
    pub label: String,
    pub plan_id: Option<Uuid>,
    pub hourly_rate: Decimal,
    pub anchor_utc: DateTime<Utc>,
    pub created_utc: DateTime<Utc>,
}

/// Input for registering an instance with the metering engine.
#[derive(Debug, Clone)]
pub struct CreateInstance {
    pub instance_id: Uuid,
    pub organization_id: Uuid,
    pub label: String,
    pub plan_id: Option<Uuid>,
    pub hourly_rate: Decimal,
    pub created_utc: DateTime<Utc>,
}
