//! Instance plan model.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// Monthly-priced plan an instance can be assigned to. The effective hourly
/// rate is derived from `base_price + markup_price`.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct InstancePlan {
    pub plan_id: Uuid,
    pub name: String,
    pub base_price: Decimal,
    pub markup_price: Decimal,
    pub currency: String,
    pub is_active: bool,
    pub created_utc: DateTime<Utc>,
}

/// Input for creating a plan.
#[derive(Debug, Clone)]
pub struct CreatePlan {
    pub name: String,
    pub base_price: Decimal,
    pub markup_price: Decimal,
    pub currency: String,
}
