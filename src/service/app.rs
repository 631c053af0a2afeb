//! Main application state and service coordination
//!
//! This module contains the production AppState that wires the delivery
//! channel, storage, lifecycle tracker and rating engine together, and owns
//! the running workload, the health server and background tasks.

use crate::amqp::{AmqpConnection, AmqpSubscriber, AmqpTelemetryPublisher};
use crate::collector::{DatagramSummary, UdpCollector};
use crate::config::AppConfig;
use crate::delivery::{Publisher, Subscriber};
use crate::error::Result as PipelineResult;
use crate::lifecycle::TrackerStats;
use crate::metrics::health::HealthServerConfig;
use crate::metrics::{HealthServer, MetricsCollector};
use crate::pipeline::{EventProcessor, PipelineCoordinator, PipelineStats};
use crate::rating::EloRatingCalculator;
use crate::service::health::{HealthCheck, HealthStatus};
use crate::storage::{InMemoryStorage, Storage};
use std::sync::Arc;
use std::time::Instant;
use thiserror::Error;
use tokio::sync::{watch, Mutex, RwLock};
use tokio::task::JoinHandle;
use tokio::time::Duration;
use tracing::{debug, error, info, warn};

/// How often the health gauges are refreshed
const HEALTH_METRICS_INTERVAL: Duration = Duration::from_secs(30);

/// Service-level errors
#[derive(Error, Debug)]
pub enum ServiceError {
    #[error("Configuration error: {message}")]
    Configuration { message: String },

    #[error("AMQP connection error: {message}")]
    AmqpConnection { message: String },

    #[error("Service initialization error: {message}")]
    Initialization { message: String },

    #[error("Background task error: {message}")]
    BackgroundTask { message: String },
}

/// Which half of the system this process runs
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ServiceRole {
    /// Consume event topics and maintain matches and ratings
    Process,
    /// Receive UDP telemetry and publish it to the delivery channel
    Collect,
}

impl std::fmt::Display for ServiceRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ServiceRole::Process => write!(f, "process"),
            ServiceRole::Collect => write!(f, "collect"),
        }
    }
}

enum Workload {
    Pipeline {
        subscriber: Arc<dyn Subscriber>,
        processor: Arc<EventProcessor>,
    },
    Collector {
        publisher: Arc<dyn Publisher>,
    },
}

struct RunningCollector {
    shutdown_tx: watch::Sender<bool>,
    handle: JoinHandle<PipelineResult<DatagramSummary>>,
}

/// Main application state containing all service components
pub struct AppState {
    /// Application configuration
    config: AppConfig,

    /// What this process does, and the components it needs for it
    workload: Workload,

    /// Present when the delivery channel is AMQP
    amqp_connection: Option<Arc<AmqpConnection>>,

    metrics_collector: Arc<MetricsCollector>,

    /// Running consumers (process role)
    coordinator: RwLock<Option<PipelineCoordinator>>,

    /// Running UDP receiver (collect role)
    collector: Mutex<Option<RunningCollector>>,

    health_server: Mutex<Option<Arc<HealthServer>>>,

    /// Background task handles
    background_tasks: Mutex<Vec<JoinHandle<()>>>,

    /// Service status
    is_running: Arc<RwLock<bool>>,

    started_at: Instant,
}

impl AppState {
    /// Initialize the application against the configured AMQP broker
    pub async fn new(config: AppConfig, role: ServiceRole) -> Result<Arc<Self>, ServiceError> {
        info!("Initializing killfeed service ({})", role);
        info!(
            "Configuration: service={}, amqp_url={}",
            config.service.name, config.amqp.url
        );

        let metrics_collector = Self::initialize_metrics(&config)?;
        let amqp_connection = Self::initialize_amqp(&config).await?;

        let workload = match role {
            ServiceRole::Process => {
                let subscriber: Arc<dyn Subscriber> = Arc::new(AmqpSubscriber::new(
                    amqp_connection.clone(),
                    config.amqp.clone(),
                ));
                Self::pipeline_workload(&config, subscriber, metrics_collector.clone())?
            }
            ServiceRole::Collect => {
                let publisher = AmqpTelemetryPublisher::new(&amqp_connection, &config.amqp)
                    .await
                    .map_err(|e| ServiceError::Initialization {
                        message: format!("Failed to initialize publisher: {}", e),
                    })?
                    .with_metrics(metrics_collector.clone());
                Workload::Collector {
                    publisher: Arc::new(publisher),
                }
            }
        };

        Ok(Self::assemble(
            config,
            workload,
            metrics_collector,
            Some(amqp_connection),
        ))
    }

    /// Pipeline service consuming from an arbitrary delivery channel
    pub fn with_subscriber(
        config: AppConfig,
        subscriber: Arc<dyn Subscriber>,
    ) -> Result<Arc<Self>, ServiceError> {
        let metrics_collector = Self::initialize_metrics(&config)?;
        let workload = Self::pipeline_workload(&config, subscriber, metrics_collector.clone())?;
        Ok(Self::assemble(config, workload, metrics_collector, None))
    }

    /// Collector service publishing to an arbitrary delivery channel
    pub fn with_publisher(
        config: AppConfig,
        publisher: Arc<dyn Publisher>,
    ) -> Result<Arc<Self>, ServiceError> {
        let metrics_collector = Self::initialize_metrics(&config)?;
        Ok(Self::assemble(
            config,
            Workload::Collector { publisher },
            metrics_collector,
            None,
        ))
    }

    fn assemble(
        config: AppConfig,
        workload: Workload,
        metrics_collector: Arc<MetricsCollector>,
        amqp_connection: Option<Arc<AmqpConnection>>,
    ) -> Arc<Self> {
        Arc::new(Self {
            config,
            workload,
            amqp_connection,
            metrics_collector,
            coordinator: RwLock::new(None),
            collector: Mutex::new(None),
            health_server: Mutex::new(None),
            background_tasks: Mutex::new(Vec::new()),
            is_running: Arc::new(RwLock::new(false)),
            started_at: Instant::now(),
        })
    }

    /// Build storage, tracker and rating engine for the pipeline role
    fn pipeline_workload(
        config: &AppConfig,
        subscriber: Arc<dyn Subscriber>,
        metrics_collector: Arc<MetricsCollector>,
    ) -> Result<Workload, ServiceError> {
        info!("Initializing pipeline components");

        let calculator = EloRatingCalculator::new(config.rating.clone()).map_err(|e| {
            ServiceError::Initialization {
                message: format!("Failed to initialize rating calculator: {}", e),
            }
        })?;
        let storage: Arc<dyn Storage> =
            Arc::new(InMemoryStorage::new(config.rating.initial_rating));

        let processor = EventProcessor::new(
            storage,
            Arc::new(calculator),
            config.pipeline.team_sides,
        )
        .with_metrics(metrics_collector);

        Ok(Workload::Pipeline {
            subscriber,
            processor: Arc::new(processor),
        })
    }

    /// Start the health server, the workload and background tasks
    pub async fn start(self: &Arc<Self>) -> Result<(), ServiceError> {
        info!("Starting killfeed service ({})", self.role());

        *self.is_running.write().await = true;

        self.start_health_server().await?;

        match &self.workload {
            Workload::Pipeline {
                subscriber,
                processor,
            } => {
                let coordinator = PipelineCoordinator::start(
                    subscriber.clone(),
                    processor.clone(),
                    &self.config.pipeline,
                    Some(self.metrics_collector.clone()),
                )
                .await
                .map_err(|e| ServiceError::Initialization {
                    message: format!("Failed to start pipeline: {}", e),
                })?;
                *self.coordinator.write().await = Some(coordinator);
                info!("✅ Pipeline consumers started");
            }
            Workload::Collector { publisher } => {
                let collector = UdpCollector::bind(&self.config.collector, publisher.clone())
                    .await
                    .map_err(|e| ServiceError::Initialization {
                        message: format!("Failed to start collector: {}", e),
                    })?
                    .with_metrics(self.metrics_collector.clone());

                let (shutdown_tx, shutdown_rx) = watch::channel(false);
                let handle = tokio::spawn(async move { collector.run(shutdown_rx).await });
                *self.collector.lock().await = Some(RunningCollector {
                    shutdown_tx,
                    handle,
                });
                info!("✅ UDP collector started");
            }
        }

        self.start_background_tasks().await;

        info!("✅ Killfeed service started successfully");
        Ok(())
    }

    /// Perform graceful shutdown.
    ///
    /// Returns the final pipeline counts when this process ran the pipeline.
    pub async fn shutdown(&self) -> Result<Option<PipelineStats>, ServiceError> {
        info!("Starting graceful shutdown of killfeed service");

        *self.is_running.write().await = false;

        let timeout = self.config.shutdown_timeout();
        let mut final_stats = None;

        if let Some(coordinator) = self.coordinator.write().await.take() {
            match tokio::time::timeout(timeout, coordinator.shutdown()).await {
                Ok(stats) => {
                    info!("✅ Pipeline stopped");
                    final_stats = Some(stats);
                }
                Err(_) => warn!("⚠️  Pipeline did not stop within {:?}", timeout),
            }
        }

        if let Some(running) = self.collector.lock().await.take() {
            let _ = running.shutdown_tx.send(true);
            match tokio::time::timeout(timeout, running.handle).await {
                Ok(Ok(Ok(totals))) => info!("✅ UDP collector stopped: {:?}", totals),
                Ok(Ok(Err(e))) => warn!("UDP collector ended with error: {}", e),
                Ok(Err(e)) => warn!("UDP collector task failed: {}", e),
                Err(_) => warn!("⚠️  UDP collector did not stop within {:?}", timeout),
            }
        }

        if let Some(health_server) = self.health_server.lock().await.take() {
            info!("Stopping health server...");
            if let Err(e) = health_server.stop().await {
                warn!("Failed to stop health server: {}", e);
            }
        }

        self.stop_background_tasks().await;

        if let Some(connection) = &self.amqp_connection {
            match connection.close().await {
                Ok(()) => info!("✅ AMQP connection closed"),
                Err(e) => warn!("Failed to close AMQP connection: {}", e),
            }
        }

        if let Some(stats) = &final_stats {
            info!("Final pipeline statistics: {:?}", stats);
        }
        info!("✅ Killfeed service shutdown completed");

        Ok(final_stats)
    }

    /// Get service configuration
    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    pub fn role(&self) -> ServiceRole {
        match self.workload {
            Workload::Pipeline { .. } => ServiceRole::Process,
            Workload::Collector { .. } => ServiceRole::Collect,
        }
    }

    /// Check if service is running
    pub async fn is_running(&self) -> bool {
        *self.is_running.read().await
    }

    pub fn uptime(&self) -> Duration {
        self.started_at.elapsed()
    }

    /// Event processor, in the process role
    pub fn processor(&self) -> Option<Arc<EventProcessor>> {
        match &self.workload {
            Workload::Pipeline { processor, .. } => Some(processor.clone()),
            Workload::Collector { .. } => None,
        }
    }

    pub fn metrics_collector(&self) -> Arc<MetricsCollector> {
        self.metrics_collector.clone()
    }

    /// Get AMQP connection for health checks
    pub fn amqp_connection(&self) -> Option<Arc<AmqpConnection>> {
        self.amqp_connection.clone()
    }

    /// Delivery counts while the pipeline is running
    pub async fn pipeline_stats(&self) -> Option<PipelineStats> {
        self.coordinator
            .read()
            .await
            .as_ref()
            .map(|coordinator| coordinator.stats())
    }

    /// `(running, total)` topic consumers while the pipeline is running
    pub async fn consumer_status(&self) -> Option<(usize, usize)> {
        self.coordinator.read().await.as_ref().map(|coordinator| {
            (
                coordinator.active_consumers(),
                coordinator.consumer_count(),
            )
        })
    }

    /// Whether the UDP receiver task is alive, in the collect role
    pub async fn collector_running(&self) -> Option<bool> {
        self.collector
            .lock()
            .await
            .as_ref()
            .map(|running| !running.handle.is_finished())
    }

    pub fn tracker_stats(&self) -> Option<TrackerStats> {
        self.processor()
            .map(|processor| processor.tracker().stats())
    }

    /// Initialize the metrics registry
    fn initialize_metrics(config: &AppConfig) -> Result<Arc<MetricsCollector>, ServiceError> {
        debug!(
            "Initializing metrics collector for {}",
            config.service.name
        );

        let collector = MetricsCollector::new().map_err(|e| ServiceError::Initialization {
            message: format!("Failed to create metrics collector: {}", e),
        })?;

        Ok(Arc::new(collector))
    }

    /// Initialize AMQP connection with retry logic
    async fn initialize_amqp(config: &AppConfig) -> Result<Arc<AmqpConnection>, ServiceError> {
        info!("Connecting to AMQP broker: {}", config.amqp.url);

        let connection = AmqpConnection::connect(&config.amqp)
            .await
            .map_err(|e| ServiceError::AmqpConnection {
                message: format!("Failed to connect to AMQP: {}", e),
            })?;

        Ok(Arc::new(connection))
    }

    /// Serve health and metrics endpoints in the background
    async fn start_health_server(self: &Arc<Self>) -> Result<(), ServiceError> {
        let port = self.config.service.metrics_port;
        info!("Starting metrics and health endpoints on port {}", port);

        let health_config = HealthServerConfig {
            port,
            host: "0.0.0.0".to_string(),
        };
        let health_server = Arc::new(
            HealthServer::new(health_config, self.metrics_collector.clone())
                .with_app_state(self.clone()),
        );

        let server = health_server.clone();
        let handle = tokio::spawn(async move {
            if let Err(e) = server.start().await {
                error!("Health server failed: {}", e);
            } else {
                info!("Health server task completed");
            }
        });

        *self.health_server.lock().await = Some(health_server);
        self.background_tasks.lock().await.push(handle);

        Ok(())
    }

    /// Start background maintenance tasks
    async fn start_background_tasks(self: &Arc<Self>) {
        info!(
            "Starting health metrics task ({}s interval)...",
            HEALTH_METRICS_INTERVAL.as_secs()
        );

        let health_metrics_task = {
            let app_state = self.clone();
            let is_running = self.is_running.clone();

            tokio::spawn(async move {
                let mut interval = tokio::time::interval(HEALTH_METRICS_INTERVAL);
                info!("Health metrics task started");

                while *is_running.read().await {
                    interval.tick().await;
                    app_state.refresh_health_metrics().await;
                }

                info!("Health metrics task stopped");
            })
        };

        self.background_tasks.lock().await.push(health_metrics_task);
    }

    /// Push the current health check into the service gauges
    pub async fn refresh_health_metrics(self: &Arc<Self>) {
        let metrics = &self.metrics_collector;
        metrics
            .service()
            .uptime_seconds
            .set(self.uptime().as_secs() as i64);

        let health = HealthCheck::check(self.clone()).await;
        metrics.update_health_status(match health.status {
            HealthStatus::Healthy => 2,
            HealthStatus::Degraded => 1,
            HealthStatus::Unhealthy => 0,
        });
        for check in &health.checks {
            metrics.update_component_health(&check.name, check.status != HealthStatus::Unhealthy);
        }
        debug!(
            "Health check: {} - uptime {}s",
            health.status,
            self.uptime().as_secs()
        );
    }

    /// Stop all background tasks
    async fn stop_background_tasks(&self) {
        let tasks: Vec<JoinHandle<()>> = self.background_tasks.lock().await.drain(..).collect();
        let task_count = tasks.len();
        if task_count == 0 {
            info!("No background tasks to stop");
            return;
        }

        info!("Stopping {} background tasks...", task_count);

        for (i, task) in tasks.into_iter().enumerate() {
            debug!("Aborting background task {}/{}", i + 1, task_count);
            task.abort();
            let _ = task.await;
        }

        info!("✅ All {} background tasks stopped", task_count);
    }
}
