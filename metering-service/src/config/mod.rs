use anyhow::Result;
use dotenvy::dotenv;
use rust_decimal::Decimal;
use secrecy::Secret;
use serde::Deserialize;
use std::env;
use std::str::FromStr;

use crate::services::rates::fallback_hourly_rate;

#[derive(Deserialize, Clone, Debug)]
pub struct MeteringConfig {
    pub service_name: String,
    pub port: u16,
    pub log_level: String,
    pub otlp_endpoint: Option<String>,
    pub database: DatabaseConfig,
    pub scheduler: SchedulerConfig,
}

#[derive(Deserialize, Clone, Debug)]
pub struct DatabaseConfig {
    pub url: Secret<String>,
    pub max_connections: u32,
    pub min_connections: u32,
}

#[derive(Deserialize, Clone, Debug)]
pub struct SchedulerConfig {
    /// Seconds between billing runs. Whole-hour flooring makes runs far
    /// more frequent than hourly harmless, so the default is one hour.
    pub interval_secs: u64,
    /// Rate used when an assigned plan cannot be resolved.
    pub fallback_hourly_rate: Decimal,
}

impl MeteringConfig {
    pub fn from_env() -> Result<Self> {
        dotenv().ok();

        let port = env::var("METERING_SERVICE_PORT")
            .unwrap_or_else(|_| "3010".to_string())
            .parse()?;

        let log_level = env::var("METERING_LOG_LEVEL").unwrap_or_else(|_| "info".to_string());
        let otlp_endpoint = env::var("METERING_OTLP_ENDPOINT").ok();

        let db_url = env::var("METERING_DATABASE_URL")
            .map_err(|_| anyhow::anyhow!("METERING_DATABASE_URL must be set"))?;
        let max_connections = env::var("METERING_DB_MAX_CONNECTIONS")
            .unwrap_or_else(|_| "10".to_string())
            .parse()?;
        let min_connections = env::var("METERING_DB_MIN_CONNECTIONS")
            .unwrap_or_else(|_| "1".to_string())
            .parse()?;

        let interval_secs = env::var("METERING_SCHEDULER_INTERVAL_SECS")
            .unwrap_or_else(|_| "3600".to_string())
            .parse()?;
        let fallback = match env::var("METERING_FALLBACK_HOURLY_RATE") {
            Ok(raw) => Decimal::from_str(&raw)
                .map_err(|e| anyhow::anyhow!("Invalid METERING_FALLBACK_HOURLY_RATE: {}", e))?,
            Err(_) => fallback_hourly_rate(),
        };
        if fallback <= Decimal::ZERO {
            anyhow::bail!("METERING_FALLBACK_HOURLY_RATE must be positive");
        }

        Ok(Self {
            service_name: "metering-service".to_string(),
            port,
            log_level,
            otlp_endpoint,
            database: DatabaseConfig {
                url: Secret::new(db_url),
                max_connections,
                min_connections,
            },
            scheduler: SchedulerConfig {
                interval_secs,
                fallback_hourly_rate: fallback,
            },
        })
    }
}
