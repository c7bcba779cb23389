//! Provisioning collaborator boundary.
//!
//! The surrounding panel calls `instance_created` right after the provider
//! instance exists, and `instance_deleted` on permanent destruction. This
//! module only meters; it never creates or tears down provider resources,
//! and it never unwinds provisioning when the initial charge fails - the
//! caller decides that from the reported outcome.

use std::sync::Arc;

use rust_decimal::Decimal;
use tracing::{info, instrument, warn};
use uuid::Uuid;

use crate::error::AppError;
use crate::models::{BillableInstance, CreateInstance, CycleOutcome};
use crate::services::clock::Clock;
use crate::services::metering::MeteringEngine;
use crate::services::store::MeteringStore;

pub struct InstanceLifecycle {
    store: Arc<dyn MeteringStore>,
    engine: Arc<MeteringEngine>,
    clock: Arc<dyn Clock>,
}

impl InstanceLifecycle {
    pub fn new(
        store: Arc<dyn MeteringStore>,
        engine: Arc<MeteringEngine>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            store,
            engine,
            clock,
        }
    }

    /// Register a freshly provisioned instance and charge its first hour.
    ///
    /// The instance row starts with anchor = creation time; a successful
    /// initial charge advances it to creation + 1h so the very first
    /// scheduler run does not re-bill the same hour. If the charge fails,
    /// the anchor stays at creation time and the first hour is retried by
    /// the scheduler once funds exist.
    #[instrument(skip(self), fields(instance_id = %instance_id, organization_id = %organization_id))]
    pub async fn instance_created(
        &self,
        instance_id: Uuid,
        organization_id: Uuid,
        label: &str,
        plan_id: Option<Uuid>,
        hourly_rate: Decimal,
    ) -> Result<(BillableInstance, CycleOutcome), AppError> {
        let now = self.clock.now();
        let input = CreateInstance {
            instance_id,
            organization_id,
            label: label.to_string(),
            plan_id,
            hourly_rate,
            created_utc: now,
        };
        let instance = self.store.create_instance(&input).await?;
        info!(anchor = %instance.anchor_utc, "Instance registered for metering");

        let outcome = self.engine.charge_first_hour(&instance).await?;
        if !outcome.is_billed() {
            warn!("Initial charge did not complete; first hour will be retried by the scheduler");
        }

        Ok((instance, outcome))
    }

    /// Stop metering a permanently destroyed instance.
    #[instrument(skip(self), fields(instance_id = %instance_id))]
    pub async fn instance_deleted(&self, instance_id: Uuid) -> Result<bool, AppError> {
        let removed = self.store.delete_instance(instance_id).await?;
        if removed {
            info!("Instance removed from metering");
        } else {
            warn!("Instance was not registered for metering");
        }
        Ok(removed)
    }
}
