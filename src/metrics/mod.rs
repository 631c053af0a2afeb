//! Metrics and monitoring for the killfeed pipeline
//!
//! This module provides Prometheus metrics collection and the HTTP server
//! exposing health checks and the metrics endpoint.

pub mod collector;
pub mod health;

pub use collector::{MatchMetrics, MetricsCollector, PipelineMetrics, RatingMetrics, ServiceMetrics};
pub use health::{HealthServer, HealthServerConfig};
