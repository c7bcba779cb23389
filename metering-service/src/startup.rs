//! Application startup and lifecycle management.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::{extract::State, http::StatusCode, response::IntoResponse, routing::get, Json, Router};
use secrecy::ExposeSecret;
use serde_json::json;
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;

use crate::config::MeteringConfig;
use crate::error::AppError;
use crate::services::{
    get_metrics, init_metrics, BillingScheduler, Database, HourlyRateResolver, InstanceLifecycle,
    MeteringEngine, MeteringStore, SystemClock,
};

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    pub db: Arc<Database>,
    pub lifecycle: Arc<InstanceLifecycle>,
    pub scheduler: Arc<BillingScheduler>,
}

/// State for health check endpoints.
#[derive(Clone)]
struct HealthState {
    db: Arc<Database>,
}

/// Health check endpoint for Docker/K8s liveness probes.
async fn health_check(State(state): State<HealthState>) -> impl IntoResponse {
    match state.db.health_check().await {
        Ok(_) => (
            StatusCode::OK,
            Json(json!({
                "status": "ok",
                "service": "metering-service",
                "version": env!("CARGO_PKG_VERSION")
            })),
        ),
        Err(e) => {
            tracing::warn!(error = %e, "Health check failed - database unavailable");
            (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(json!({
                    "status": "unhealthy",
                    "service": "metering-service",
                    "error": e.to_string()
                })),
            )
        }
    }
}

/// Readiness check endpoint for K8s readiness probes.
async fn readiness_check(State(state): State<HealthState>) -> impl IntoResponse {
    match state.db.health_check().await {
        Ok(_) => StatusCode::OK,
        Err(e) => {
            tracing::warn!(error = %e, "Readiness check failed");
            StatusCode::SERVICE_UNAVAILABLE
        }
    }
}

/// Metrics endpoint for Prometheus scraping.
async fn metrics_handler() -> impl IntoResponse {
    let metrics = get_metrics();
    (
        StatusCode::OK,
        [("content-type", "text/plain; charset=utf-8")],
        metrics,
    )
}

/// Application container for managing server lifecycle.
pub struct Application {
    port: u16,
    listener: TcpListener,
    state: AppState,
}

impl Application {
    /// Build the application with the given configuration: connect to the
    /// database, apply migrations, and wire store -> engine -> scheduler.
    pub async fn build(config: MeteringConfig) -> Result<Self, AppError> {
        init_metrics();

        let db = Database::new(
            config.database.url.expose_secret(),
            config.database.max_connections,
            config.database.min_connections,
        )
        .await
        .map_err(|e| {
            tracing::error!(error = %e, "Failed to connect to PostgreSQL");
            e
        })?;

        db.run_migrations().await.map_err(|e| {
            tracing::error!(error = %e, "Failed to run migrations");
            e
        })?;

        let db = Arc::new(db);
        let store: Arc<dyn MeteringStore> = db.clone();
        let clock = Arc::new(SystemClock);

        let rates = HourlyRateResolver::new(store.clone(), config.scheduler.fallback_hourly_rate);
        let engine = Arc::new(MeteringEngine::new(store.clone(), rates));
        let lifecycle = Arc::new(InstanceLifecycle::new(
            store.clone(),
            engine.clone(),
            clock.clone(),
        ));
        let scheduler = Arc::new(BillingScheduler::new(
            store,
            engine,
            clock,
            std::time::Duration::from_secs(config.scheduler.interval_secs),
        ));

        let state = AppState {
            db,
            lifecycle,
            scheduler,
        };

        let addr = SocketAddr::from(([0, 0, 0, 0], config.port));
        let listener = TcpListener::bind(addr).await.map_err(|e| {
            tracing::error!(error = %e, addr = %addr, "Failed to bind listener");
            AppError::from(e)
        })?;
        let port = listener
            .local_addr()
            .map(|a| a.port())
            .unwrap_or(config.port);

        Ok(Self {
            port,
            listener,
            state,
        })
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn state(&self) -> &AppState {
        &self.state
    }

    /// Run the probe/metrics server and the billing scheduler until the
    /// server exits; the scheduler is stopped on the way out.
    pub async fn run_until_stopped(self) -> std::io::Result<()> {
        let scheduler = self.state.scheduler.clone();
        let scheduler_handle = scheduler.clone().start();

        let health_state = HealthState {
            db: self.state.db.clone(),
        };
        let router = Router::new()
            .route("/health", get(health_check))
            .route("/ready", get(readiness_check))
            .route("/metrics", get(metrics_handler))
            .layer(TraceLayer::new_for_http())
            .with_state(health_state);

        tracing::info!(port = self.port, "Listening");
        let result = axum::serve(self.listener, router).await;

        scheduler.stop();
        scheduler_handle.await.ok();

        result
    }
}
