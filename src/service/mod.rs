//! Service layer for the killfeed pipeline
//!
//! This module contains the main application state, service coordination,
//! and background task management for the production service.

pub mod app;
pub mod health;

pub use app::{AppState, ServiceError, ServiceRole};
pub use health::{HealthCheck, HealthStatus};
