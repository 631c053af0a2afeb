//! Per-topic consumption, routing and settlement of telemetry deliveries

pub mod consumer;
pub mod coordinator;
pub mod processor;

pub use consumer::{ConsumerSettings, TopicConsumer};
pub use coordinator::PipelineCoordinator;
pub use processor::{EventProcessor, ProcessOutcome, Settlement};

use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};

/// Delivery counts across all consumers
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PipelineStats {
    pub processed: u64,
    pub skipped: u64,
    pub dead_lettered: u64,
    pub failed: u64,
}

/// Shared counters behind [`PipelineStats`]
#[derive(Debug, Default)]
pub struct PipelineCounters {
    processed: AtomicU64,
    skipped: AtomicU64,
    dead_lettered: AtomicU64,
    failed: AtomicU64,
}

impl PipelineCounters {
    pub fn record_processed(&self) {
        self.processed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_skipped(&self) {
        self.skipped.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_dead_lettered(&self) {
        self.dead_lettered.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_failed(&self) {
        self.failed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> PipelineStats {
        PipelineStats {
            processed: self.processed.load(Ordering::Relaxed),
            skipped: self.skipped.load(Ordering::Relaxed),
            dead_lettered: self.dead_lettered.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
        }
    }
}
