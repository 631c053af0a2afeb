//! Killfeed - game server telemetry ingestion and match rating
//!
//! This crate receives combat telemetry from game servers, decodes the legacy
//! `|`-delimited and JSON line formats, tracks match lifecycles per server and
//! applies Elo rating changes when matches end. Lines flow through an AMQP
//! delivery channel with one topic per event kind.

pub mod amqp;
pub mod collector;
pub mod config;
pub mod decoder;
pub mod delivery;
pub mod error;
pub mod events;
pub mod lifecycle;
pub mod metrics;
pub mod pipeline;
pub mod rating;
pub mod service;
pub mod storage;
pub mod types;
pub mod utils;

// Re-export commonly used types and traits
pub use error::{DecodeError, PipelineError, Result, StorageError};
pub use events::{Event, EventKind};
pub use types::*;

// Re-export key components
pub use delivery::{Delivery, Publisher, Subscriber, Subscription};
pub use pipeline::{EventProcessor, PipelineCoordinator};
pub use storage::Storage;

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
