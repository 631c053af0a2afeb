//! Health check evaluation
//!
//! Liveness only asks whether the workload is running. Readiness also needs
//! storage and the broker to answer.

use crate::lifecycle::TrackerStats;
use crate::pipeline::PipelineStats;
use crate::service::app::{AppState, ServiceRole};
use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Instant;

/// Health check status
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Healthy,
    Degraded,
    Unhealthy,
}

impl std::fmt::Display for HealthStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            HealthStatus::Healthy => write!(f, "✅ healthy"),
            HealthStatus::Degraded => write!(f, "⚠️  degraded"),
            HealthStatus::Unhealthy => write!(f, "❌ unhealthy"),
        }
    }
}

impl HealthStatus {
    /// The worse of two statuses
    fn worst(self, other: HealthStatus) -> HealthStatus {
        match (self, other) {
            (HealthStatus::Unhealthy, _) | (_, HealthStatus::Unhealthy) => HealthStatus::Unhealthy,
            (HealthStatus::Degraded, _) | (_, HealthStatus::Degraded) => HealthStatus::Degraded,
            _ => HealthStatus::Healthy,
        }
    }
}

/// Health check response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthCheck {
    /// Overall service status
    pub status: HealthStatus,
    /// Service name
    pub service: String,
    pub version: String,
    pub timestamp: chrono::DateTime<chrono::Utc>,
    /// Detailed component checks
    pub checks: Vec<ComponentCheck>,
    pub stats: ServiceStats,
}

/// Individual component health check
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComponentCheck {
    pub name: String,
    pub status: HealthStatus,
    /// Optional error message if not healthy
    pub message: Option<String>,
    /// Check duration in milliseconds
    pub duration_ms: u64,
}

/// Service statistics for health reporting
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceStats {
    pub role: ServiceRole,
    pub uptime_seconds: u64,
    /// Delivery counts, while the pipeline runs
    pub pipeline: Option<PipelineStats>,
    /// Match lifecycle counts, in the process role
    pub matches: Option<TrackerStats>,
    pub uptime_info: String,
}

impl HealthCheck {
    /// Every component check plus service statistics
    pub async fn check(app_state: Arc<AppState>) -> Self {
        let checks = vec![
            Self::check_service_running(&app_state).await,
            Self::check_workload(&app_state).await,
            Self::check_storage(&app_state).await,
            Self::check_broker(&app_state),
        ];

        let status = checks
            .iter()
            .fold(HealthStatus::Healthy, |overall, check| {
                overall.worst(check.status.clone())
            });

        let stats = Self::gather_service_stats(&app_state).await;

        HealthCheck {
            status,
            service: app_state.config().service.name.clone(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            timestamp: chrono::Utc::now(),
            checks,
            stats,
        }
    }

    /// Running, with at least one consumer (or the UDP receiver) alive
    pub async fn liveness_check(app_state: Arc<AppState>) -> HealthStatus {
        if !app_state.is_running().await {
            return HealthStatus::Unhealthy;
        }
        match Self::check_workload(&app_state).await.status {
            HealthStatus::Unhealthy => HealthStatus::Unhealthy,
            _ => HealthStatus::Healthy,
        }
    }

    /// Liveness plus storage and broker reachability
    pub async fn readiness_check(app_state: Arc<AppState>) -> HealthStatus {
        if !app_state.is_running().await {
            return HealthStatus::Unhealthy;
        }

        Self::check_workload(&app_state)
            .await
            .status
            .worst(Self::check_storage(&app_state).await.status)
            .worst(Self::check_broker(&app_state).status)
    }

    async fn check_service_running(app_state: &AppState) -> ComponentCheck {
        let start = Instant::now();

        let (status, message) = if app_state.is_running().await {
            (HealthStatus::Healthy, None)
        } else {
            (
                HealthStatus::Unhealthy,
                Some("Service is not running".to_string()),
            )
        };

        ComponentCheck {
            name: "service_running".to_string(),
            status,
            message,
            duration_ms: start.elapsed().as_millis() as u64,
        }
    }

    /// Pipeline consumers or the UDP receiver, depending on role
    async fn check_workload(app_state: &AppState) -> ComponentCheck {
        let start = Instant::now();

        let (name, status, message) = match app_state.role() {
            ServiceRole::Process => {
                let (status, message) = match app_state.consumer_status().await {
                    Some((active, total)) if active == total && total > 0 => {
                        (HealthStatus::Healthy, None)
                    }
                    Some((0, _)) => (
                        HealthStatus::Unhealthy,
                        Some("No topic consumers running".to_string()),
                    ),
                    Some((active, total)) => (
                        HealthStatus::Degraded,
                        Some(format!("{} of {} topic consumers running", active, total)),
                    ),
                    None => (
                        HealthStatus::Unhealthy,
                        Some("Pipeline not started".to_string()),
                    ),
                };
                ("pipeline", status, message)
            }
            ServiceRole::Collect => {
                let (status, message) = match app_state.collector_running().await {
                    Some(true) => (HealthStatus::Healthy, None),
                    Some(false) => (
                        HealthStatus::Unhealthy,
                        Some("UDP receiver stopped".to_string()),
                    ),
                    None => (
                        HealthStatus::Unhealthy,
                        Some("Collector not started".to_string()),
                    ),
                };
                ("collector", status, message)
            }
        };

        ComponentCheck {
            name: name.to_string(),
            status,
            message,
            duration_ms: start.elapsed().as_millis() as u64,
        }
    }

    async fn check_storage(app_state: &AppState) -> ComponentCheck {
        let start = Instant::now();

        let (status, message) = match app_state.processor() {
            Some(processor) => match processor.storage().ping().await {
                Ok(()) => (HealthStatus::Healthy, None),
                Err(e) => (
                    HealthStatus::Unhealthy,
                    Some(format!("Storage unreachable: {}", e)),
                ),
            },
            None => (
                HealthStatus::Healthy,
                Some("Collectors do not use storage".to_string()),
            ),
        };

        ComponentCheck {
            name: "storage".to_string(),
            status,
            message,
            duration_ms: start.elapsed().as_millis() as u64,
        }
    }

    fn check_broker(app_state: &AppState) -> ComponentCheck {
        let start = Instant::now();

        let (status, message) = match app_state.amqp_connection() {
            Some(connection) if connection.is_open() => (HealthStatus::Healthy, None),
            Some(_) => (
                HealthStatus::Unhealthy,
                Some("AMQP connection closed".to_string()),
            ),
            None => (
                HealthStatus::Healthy,
                Some("In-process delivery channel".to_string()),
            ),
        };

        ComponentCheck {
            name: "broker".to_string(),
            status,
            message,
            duration_ms: start.elapsed().as_millis() as u64,
        }
    }

    async fn gather_service_stats(app_state: &AppState) -> ServiceStats {
        let uptime_seconds = app_state.uptime().as_secs();
        let pipeline = app_state.pipeline_stats().await;
        let matches = app_state.tracker_stats();

        let uptime_info = match (&pipeline, &matches) {
            (Some(pipeline), Some(matches)) => format!(
                "Up {}s, events processed: {}, matches closed: {}",
                uptime_seconds, pipeline.processed, matches.matches_closed
            ),
            _ => format!("Up {}s", uptime_seconds),
        };

        ServiceStats {
            role: app_state.role(),
            uptime_seconds,
            pipeline,
            matches,
            uptime_info,
        }
    }
}

/// Convert health check to JSON string
impl HealthCheck {
    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string_pretty(self)
            .map_err(|e| anyhow::anyhow!("Failed to serialize health check: {}", e))
    }
}
