//! HTTP endpoints for orchestrators and Prometheus
//!
//! `/alive` answers whether the consumers (or the UDP receiver) are still
//! running, `/ready` adds storage and broker reachability, `/health` returns
//! the full component report and `/metrics` is the scrape target.

use crate::metrics::collector::MetricsCollector;
use crate::service::app::AppState;
use crate::service::health::{HealthCheck, HealthStatus};
use anyhow::{Context, Result};
use axum::{
    extract::State,
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use prometheus::{Encoder, TextEncoder};
use serde_json::json;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tracing::{debug, error, info};

#[derive(Debug, Clone)]
pub struct HealthServerConfig {
    pub port: u16,
    pub host: String,
}

impl Default for HealthServerConfig {
    fn default() -> Self {
        Self {
            port: 9090,
            host: "0.0.0.0".to_string(),
        }
    }
}

impl HealthServerConfig {
    fn addr(&self) -> Result<SocketAddr> {
        format!("{}:{}", self.host, self.port)
            .parse()
            .with_context(|| format!("Invalid health address {}:{}", self.host, self.port))
    }
}

#[derive(Clone)]
struct Endpoints {
    metrics: Arc<MetricsCollector>,
    app: Option<Arc<AppState>>,
}

/// Serves the monitoring endpoints until [`HealthServer::stop`] is called
pub struct HealthServer {
    config: HealthServerConfig,
    endpoints: Endpoints,
    stopped: watch::Sender<bool>,
}

impl HealthServer {
    pub fn new(config: HealthServerConfig, metrics: Arc<MetricsCollector>) -> Self {
        let (stopped, _) = watch::channel(false);
        Self {
            config,
            endpoints: Endpoints { metrics, app: None },
            stopped,
        }
    }

    /// Answer health requests from `app`; without it every check reports 503
    pub fn with_app_state(mut self, app: Arc<AppState>) -> Self {
        self.endpoints.app = Some(app);
        self
    }

    /// Bind and serve until stopped
    pub async fn start(&self) -> Result<()> {
        let addr = self.config.addr()?;
        let listener = TcpListener::bind(addr)
            .await
            .with_context(|| format!("Failed to bind health endpoints on {}", addr))?;
        info!("📡 Health endpoints listening on http://{}", addr);

        let mut stopped = self.stopped.subscribe();
        axum::serve(listener, self.router())
            .with_graceful_shutdown(async move {
                let _ = stopped.wait_for(|stopped| *stopped).await;
            })
            .await?;

        info!("Health endpoints stopped");
        Ok(())
    }

    pub async fn stop(&self) -> Result<()> {
        self.stopped.send_replace(true);
        Ok(())
    }

    fn router(&self) -> Router {
        Router::new()
            .route("/alive", get(alive))
            .route("/ready", get(ready))
            .route("/health", get(report))
            .route("/metrics", get(scrape))
            .with_state(self.endpoints.clone())
    }
}

fn status_code(status: &HealthStatus) -> StatusCode {
    match status {
        HealthStatus::Healthy | HealthStatus::Degraded => StatusCode::OK,
        HealthStatus::Unhealthy => StatusCode::SERVICE_UNAVAILABLE,
    }
}

fn not_initialized() -> Response {
    (StatusCode::SERVICE_UNAVAILABLE, "Service not initialized").into_response()
}

async fn alive(State(endpoints): State<Endpoints>) -> Response {
    let Some(app) = endpoints.app else {
        return not_initialized();
    };
    let status = HealthCheck::liveness_check(app).await;
    (status_code(&status), status.to_string()).into_response()
}

async fn ready(State(endpoints): State<Endpoints>) -> Response {
    let Some(app) = endpoints.app else {
        return not_initialized();
    };
    let status = HealthCheck::readiness_check(app).await;
    if status == HealthStatus::Unhealthy {
        debug!("Readiness check failed");
    }
    (status_code(&status), status.to_string()).into_response()
}

async fn report(State(endpoints): State<Endpoints>) -> Response {
    let Some(app) = endpoints.app else {
        return not_initialized();
    };
    let health = HealthCheck::check(app).await;
    (status_code(&health.status), Json(health)).into_response()
}

async fn scrape(State(endpoints): State<Endpoints>) -> Response {
    let encoder = TextEncoder::new();
    match encoder.encode_to_string(&endpoints.metrics.registry().gather()) {
        Ok(body) => (
            StatusCode::OK,
            [(header::CONTENT_TYPE, encoder.format_type().to_string())],
            body,
        )
            .into_response(),
        Err(e) => {
            error!("Failed to encode metrics: {}", e);
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({ "error": "metrics encoding failed" })),
            )
                .into_response()
        }
    }
}
