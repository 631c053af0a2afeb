//! Metrics collection using Prometheus
//!
//! All metrics are registered on a private registry under the `killfeed_` prefix.

use crate::events::EventKind;
use anyhow::Result;
use prometheus::{
    Histogram, HistogramOpts, HistogramVec, IntCounter, IntCounterVec, IntGauge, IntGaugeVec,
    Opts, Registry,
};
use std::sync::Arc;
use std::time::Duration;

/// Main metrics collector for the pipeline
#[derive(Clone)]
pub struct MetricsCollector {
    registry: Arc<Registry>,
    service_metrics: ServiceMetrics,
    pipeline_metrics: PipelineMetrics,
    match_metrics: MatchMetrics,
    rating_metrics: RatingMetrics,
}

/// Service-level metrics
#[derive(Clone)]
pub struct ServiceMetrics {
    /// Service uptime in seconds
    pub uptime_seconds: IntGauge,

    /// AMQP operations by outcome
    pub amqp_operations_total: IntCounterVec,

    /// AMQP operation durations
    pub amqp_operation_duration: HistogramVec,

    /// Health check status (0=unhealthy, 1=degraded, 2=healthy)
    pub health_status: IntGauge,

    /// Component health status
    pub component_health: IntGaugeVec,
}

/// Delivery and decode metrics
#[derive(Clone)]
pub struct PipelineMetrics {
    /// Settled deliveries by topic and outcome
    pub deliveries_total: IntCounterVec,

    /// Events decoded and routed, by kind
    pub events_processed_total: IntCounterVec,

    /// Lines that were neither events nor errors (comments, unknown kinds)
    pub events_skipped_total: IntCounter,

    /// Lines rejected by the decoder
    pub decode_errors_total: IntCounter,

    /// Time from delivery to settlement, by kind
    pub processing_duration: HistogramVec,

    /// Lines seen by the UDP collector, by status
    pub collector_lines_total: IntCounterVec,
}

/// Match lifecycle metrics
#[derive(Clone)]
pub struct MatchMetrics {
    /// Matches opened, by how they were opened
    pub matches_opened_total: IntCounterVec,

    pub matches_closed_total: IntCounter,

    /// Match ends received for a server with no open match
    pub orphan_ends_total: IntCounter,

    /// Gameplay events attributed to an already closed match
    pub late_events_total: IntCounter,

    pub match_duration_seconds: Histogram,
}

/// Rating metrics
#[derive(Clone)]
pub struct RatingMetrics {
    /// Matches whose ratings were applied
    pub matches_rated_total: IntCounter,

    /// Closes that did not move ratings, by reason
    pub rating_skipped_total: IntCounterVec,

    /// Per-player rating change
    pub rating_change: Histogram,

    /// Ratings after a match
    pub rating_distribution: Histogram,

    pub rating_calculation_duration: Histogram,
}

impl MetricsCollector {
    /// Create a new metrics collector with its own registry
    pub fn new() -> Result<Self> {
        let registry = Arc::new(Registry::new());
        Self::with_registry(registry)
    }

    /// Create a new metrics collector with custom registry
    pub fn with_registry(registry: Arc<Registry>) -> Result<Self> {
        let service_metrics = ServiceMetrics::new(&registry)?;
        let pipeline_metrics = PipelineMetrics::new(&registry)?;
        let match_metrics = MatchMetrics::new(&registry)?;
        let rating_metrics = RatingMetrics::new(&registry)?;

        Ok(Self {
            registry,
            service_metrics,
            pipeline_metrics,
            match_metrics,
            rating_metrics,
        })
    }

    pub fn registry(&self) -> Arc<Registry> {
        self.registry.clone()
    }

    pub fn service(&self) -> &ServiceMetrics {
        &self.service_metrics
    }

    pub fn pipeline(&self) -> &PipelineMetrics {
        &self.pipeline_metrics
    }

    pub fn matches(&self) -> &MatchMetrics {
        &self.match_metrics
    }

    pub fn rating(&self) -> &RatingMetrics {
        &self.rating_metrics
    }

    /// Record how a delivery was settled (`acked`, `dead_lettered`, `requeued`, `rejected`)
    pub fn record_delivery(&self, topic: &str, outcome: &str) {
        self.pipeline_metrics
            .deliveries_total
            .with_label_values(&[topic, outcome])
            .inc();
    }

    pub fn record_event_processed(&self, kind: EventKind, duration: Duration) {
        self.pipeline_metrics
            .events_processed_total
            .with_label_values(&[kind.token()])
            .inc();

        self.pipeline_metrics
            .processing_duration
            .with_label_values(&[kind.token()])
            .observe(duration.as_secs_f64());
    }

    pub fn record_event_skipped(&self) {
        self.pipeline_metrics.events_skipped_total.inc();
    }

    pub fn record_decode_error(&self) {
        self.pipeline_metrics.decode_errors_total.inc();
    }

    /// Record a line handled by the collector (`published`, `skipped`, `invalid`, `failed`)
    pub fn record_collector_line(&self, status: &str) {
        self.pipeline_metrics
            .collector_lines_total
            .with_label_values(&[status])
            .inc();
    }

    /// Record a match being opened (`start` or `implicit`)
    pub fn record_match_opened(&self, reason: &str) {
        self.match_metrics
            .matches_opened_total
            .with_label_values(&[reason])
            .inc();
    }

    pub fn record_match_closed(&self, duration_seconds: Option<i64>) {
        self.match_metrics.matches_closed_total.inc();
        if let Some(seconds) = duration_seconds {
            self.match_metrics
                .match_duration_seconds
                .observe(seconds as f64);
        }
    }

    pub fn record_orphan_end(&self) {
        self.match_metrics.orphan_ends_total.inc();
    }

    pub fn record_late_event(&self) {
        self.match_metrics.late_events_total.inc();
    }

    /// Record one rated match as `(exact change, rating after)` per player
    pub fn record_match_rated(&self, ratings: &[(f64, i32)], duration: Duration) {
        self.rating_metrics.matches_rated_total.inc();
        self.rating_metrics
            .rating_calculation_duration
            .observe(duration.as_secs_f64());

        for (change, rating_after) in ratings {
            self.rating_metrics.rating_change.observe(*change);
            self.rating_metrics
                .rating_distribution
                .observe(*rating_after as f64);
        }
    }

    /// Record a close that did not move ratings (`no_winner`, `empty_roster`, `already_rated`)
    pub fn record_rating_skipped(&self, reason: &str) {
        self.rating_metrics
            .rating_skipped_total
            .with_label_values(&[reason])
            .inc();
    }

    pub fn record_amqp_operation(&self, operation: &str, success: bool, duration: Duration) {
        let status = if success { "success" } else { "error" };

        self.service_metrics
            .amqp_operations_total
            .with_label_values(&[operation, status])
            .inc();

        self.service_metrics
            .amqp_operation_duration
            .with_label_values(&[operation, status])
            .observe(duration.as_secs_f64());
    }

    /// Update health status
    pub fn update_health_status(&self, status: u8) {
        self.service_metrics.health_status.set(status as i64);
    }

    /// Update component health
    pub fn update_component_health(&self, component: &str, healthy: bool) {
        let status = if healthy { 1 } else { 0 };
        self.service_metrics
            .component_health
            .with_label_values(&[component])
            .set(status);
    }
}

impl ServiceMetrics {
    fn new(registry: &Registry) -> Result<Self> {
        let uptime_seconds = IntGauge::new("killfeed_uptime_seconds", "Service uptime in seconds")?;
        registry.register(Box::new(uptime_seconds.clone()))?;

        let amqp_operations_total = IntCounterVec::new(
            Opts::new("killfeed_amqp_operations_total", "Total AMQP operations"),
            &["operation", "status"],
        )?;
        registry.register(Box::new(amqp_operations_total.clone()))?;

        let amqp_operation_duration = HistogramVec::new(
            HistogramOpts::new(
                "killfeed_amqp_operation_duration_seconds",
                "AMQP operation duration",
            )
            .buckets(vec![0.001, 0.005, 0.01, 0.05, 0.1, 0.5, 1.0, 5.0]),
            &["operation", "status"],
        )?;
        registry.register(Box::new(amqp_operation_duration.clone()))?;

        let health_status = IntGauge::new(
            "killfeed_health_status",
            "Health status (0=unhealthy, 1=degraded, 2=healthy)",
        )?;
        registry.register(Box::new(health_status.clone()))?;

        let component_health = IntGaugeVec::new(
            Opts::new("killfeed_component_health", "Component health status"),
            &["component"],
        )?;
        registry.register(Box::new(component_health.clone()))?;

        Ok(Self {
            uptime_seconds,
            amqp_operations_total,
            amqp_operation_duration,
            health_status,
            component_health,
        })
    }
}

impl PipelineMetrics {
    fn new(registry: &Registry) -> Result<Self> {
        let deliveries_total = IntCounterVec::new(
            Opts::new("killfeed_deliveries_total", "Settled deliveries"),
            &["topic", "outcome"],
        )?;
        registry.register(Box::new(deliveries_total.clone()))?;

        let events_processed_total = IntCounterVec::new(
            Opts::new("killfeed_events_processed_total", "Events processed"),
            &["kind"],
        )?;
        registry.register(Box::new(events_processed_total.clone()))?;

        let events_skipped_total =
            IntCounter::new("killfeed_events_skipped_total", "Lines skipped by the decoder")?;
        registry.register(Box::new(events_skipped_total.clone()))?;

        let decode_errors_total =
            IntCounter::new("killfeed_decode_errors_total", "Lines rejected by the decoder")?;
        registry.register(Box::new(decode_errors_total.clone()))?;

        let processing_duration = HistogramVec::new(
            HistogramOpts::new(
                "killfeed_event_processing_duration_seconds",
                "Event processing time",
            )
            .buckets(vec![0.0005, 0.001, 0.005, 0.01, 0.05, 0.1, 0.5, 1.0]),
            &["kind"],
        )?;
        registry.register(Box::new(processing_duration.clone()))?;

        let collector_lines_total = IntCounterVec::new(
            Opts::new("killfeed_collector_lines_total", "Lines seen by the collector"),
            &["status"],
        )?;
        registry.register(Box::new(collector_lines_total.clone()))?;

        Ok(Self {
            deliveries_total,
            events_processed_total,
            events_skipped_total,
            decode_errors_total,
            processing_duration,
            collector_lines_total,
        })
    }
}

impl MatchMetrics {
    fn new(registry: &Registry) -> Result<Self> {
        let matches_opened_total = IntCounterVec::new(
            Opts::new("killfeed_matches_opened_total", "Matches opened"),
            &["reason"],
        )?;
        registry.register(Box::new(matches_opened_total.clone()))?;

        let matches_closed_total =
            IntCounter::new("killfeed_matches_closed_total", "Matches closed")?;
        registry.register(Box::new(matches_closed_total.clone()))?;

        let orphan_ends_total = IntCounter::new(
            "killfeed_orphan_match_ends_total",
            "Match ends with no open match",
        )?;
        registry.register(Box::new(orphan_ends_total.clone()))?;

        let late_events_total = IntCounter::new(
            "killfeed_late_events_total",
            "Gameplay events attributed to a closed match",
        )?;
        registry.register(Box::new(late_events_total.clone()))?;

        let match_duration_seconds = Histogram::with_opts(
            HistogramOpts::new("killfeed_match_duration_seconds", "Match duration")
                .buckets(vec![60.0, 300.0, 600.0, 900.0, 1200.0, 1800.0, 2700.0, 3600.0]),
        )?;
        registry.register(Box::new(match_duration_seconds.clone()))?;

        Ok(Self {
            matches_opened_total,
            matches_closed_total,
            orphan_ends_total,
            late_events_total,
            match_duration_seconds,
        })
    }
}

impl RatingMetrics {
    fn new(registry: &Registry) -> Result<Self> {
        let matches_rated_total =
            IntCounter::new("killfeed_matches_rated_total", "Matches with applied ratings")?;
        registry.register(Box::new(matches_rated_total.clone()))?;

        let rating_skipped_total = IntCounterVec::new(
            Opts::new(
                "killfeed_rating_skipped_total",
                "Match closes that did not move ratings",
            ),
            &["reason"],
        )?;
        registry.register(Box::new(rating_skipped_total.clone()))?;

        let rating_change = Histogram::with_opts(
            HistogramOpts::new("killfeed_rating_change", "Per-player rating change")
                .buckets(vec![-40.0, -25.0, -15.0, -5.0, 0.0, 5.0, 15.0, 25.0, 40.0]),
        )?;
        registry.register(Box::new(rating_change.clone()))?;

        let rating_distribution = Histogram::with_opts(
            HistogramOpts::new("killfeed_rating_distribution", "Player rating distribution")
                .buckets(vec![
                    500.0, 800.0, 1000.0, 1200.0, 1400.0, 1600.0, 1800.0, 2000.0, 2500.0,
                ]),
        )?;
        registry.register(Box::new(rating_distribution.clone()))?;

        let rating_calculation_duration = Histogram::with_opts(
            HistogramOpts::new(
                "killfeed_rating_calculation_duration_seconds",
                "Rating calculation time",
            )
            .buckets(vec![0.0001, 0.001, 0.005, 0.01, 0.05, 0.1]),
        )?;
        registry.register(Box::new(rating_calculation_duration.clone()))?;

        Ok(Self {
            matches_rated_total,
            rating_skipped_total,
            rating_change,
            rating_distribution,
            rating_calculation_duration,
        })
    }
}
