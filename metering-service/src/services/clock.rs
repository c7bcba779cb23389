//! Injectable wall-clock source.
//!
//! The scheduler, engine, and provisioning handler never call `Utc::now()`
//! directly; they take the clock as a dependency so tests can drive ticks
//! with a manual clock.

use chrono::{DateTime, Utc};

pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

/// Production clock.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}
