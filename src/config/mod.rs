//! Configuration management for the killfeed pipeline
//!
//! This module handles configuration loading from environment variables and
//! TOML files, validation, and default values.

pub mod app;
pub mod rating;

// Re-export commonly used types
pub use app::{
    validate_config, AmqpSettings, AppConfig, CollectorSettings, PipelineSettings,
    ServiceSettings,
};
pub use rating::{KFactorTier, RatingConfig};
