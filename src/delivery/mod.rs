//! Delivery channel abstraction
//!
//! The coordinator consumes from a [`Subscriber`] and the collector publishes
//! to a [`Publisher`]. Every delivery must be settled exactly once with
//! [`Delivery::ack`] or [`Delivery::nack`]. The AMQP binding lives in
//! [`crate::amqp`]; [`memory::InMemoryBroker`] backs tests and local runs.

pub mod memory;

use crate::error::Result;
use crate::events::EventKind;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub use memory::{InMemoryBroker, SettleOutcome, Settlement};

/// Transport metadata travelling with each payload
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageMetadata {
    /// Kind sniffed at the collector, when known
    pub event_kind: Option<EventKind>,
    /// Address of the game server that sent the line
    pub source_addr: Option<String>,
    pub received_at: DateTime<Utc>,
}

impl MessageMetadata {
    pub fn new(event_kind: Option<EventKind>, source_addr: Option<String>) -> Self {
        Self {
            event_kind,
            source_addr,
            received_at: Utc::now(),
        }
    }
}

/// A single message awaiting settlement
#[async_trait]
pub trait Delivery: Send + Sync {
    fn payload(&self) -> &[u8];

    fn metadata(&self) -> &MessageMetadata;

    /// Confirm the message was handled
    async fn ack(&self) -> Result<()>;

    /// Reject the message; with `requeue` it will be delivered again
    async fn nack(&self, requeue: bool) -> Result<()>;
}

/// Stream of deliveries for one topic
#[async_trait]
pub trait Subscription: Send + Sync {
    /// Next delivery, or `None` once the channel has closed
    async fn next_delivery(&mut self) -> Result<Option<Box<dyn Delivery>>>;
}

#[async_trait]
pub trait Subscriber: Send + Sync {
    async fn subscribe(&self, topic: &str) -> Result<Box<dyn Subscription>>;
}

#[async_trait]
pub trait Publisher: Send + Sync {
    async fn publish(&self, topic: &str, payload: &[u8], metadata: MessageMetadata) -> Result<()>;
}
