//! In-process broker with an ack ledger

use crate::delivery::{Delivery, MessageMetadata, Publisher, Subscriber, Subscription};
use crate::error::{PipelineError, Result};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tracing::debug;

/// How a delivery was settled
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SettleOutcome {
    Acked,
    Nacked { requeue: bool },
}

/// Ledger entry for one settled delivery
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Settlement {
    pub topic: String,
    pub delivery_tag: u64,
    pub payload: Vec<u8>,
    pub outcome: SettleOutcome,
}

#[derive(Debug, Clone)]
struct Envelope {
    delivery_tag: u64,
    payload: Vec<u8>,
    metadata: MessageMetadata,
}

struct Topic {
    sender: UnboundedSender<Envelope>,
    receiver: Option<UnboundedReceiver<Envelope>>,
}

impl Topic {
    fn new() -> Self {
        let (sender, receiver) = mpsc::unbounded_channel();
        Self {
            sender,
            receiver: Some(receiver),
        }
    }
}

#[derive(Default)]
struct BrokerState {
    topics: Mutex<HashMap<String, Topic>>,
    ledger: Mutex<Vec<Settlement>>,
    next_tag: AtomicU64,
}

impl BrokerState {
    fn sender(&self, topic: &str) -> Result<UnboundedSender<Envelope>> {
        let mut topics = self.topics.lock().map_err(|_| PipelineError::InternalError {
            message: "Failed to acquire broker topics lock".to_string(),
        })?;
        Ok(topics
            .entry(topic.to_string())
            .or_insert_with(Topic::new)
            .sender
            .clone())
    }

    fn enqueue(&self, topic: &str, envelope: Envelope) -> Result<()> {
        self.sender(topic)?
            .send(envelope)
            .map_err(|_| PipelineError::DeliveryFailed {
                topic: topic.to_string(),
                message: "subscription has been dropped".to_string(),
            })?;
        Ok(())
    }

    fn settle(&self, settlement: Settlement) -> Result<()> {
        self.ledger
            .lock()
            .map_err(|_| PipelineError::InternalError {
                message: "Failed to acquire broker ledger lock".to_string(),
            })?
            .push(settlement);
        Ok(())
    }
}

/// Broker keeping one queue per topic in memory.
///
/// Messages published before anyone subscribes are buffered. Each topic
/// supports a single subscription.
#[derive(Clone, Default)]
pub struct InMemoryBroker {
    state: Arc<BrokerState>,
}

impl InMemoryBroker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every settlement so far, in settlement order
    pub fn settlements(&self) -> Vec<Settlement> {
        self.state
            .ledger
            .lock()
            .map(|ledger| ledger.clone())
            .unwrap_or_default()
    }

    pub fn count(&self, outcome: SettleOutcome) -> usize {
        self.settlements()
            .iter()
            .filter(|settlement| settlement.outcome == outcome)
            .count()
    }

    /// Wait until at least `expected` deliveries are settled.
    /// Returns false if `timeout` elapses first.
    pub async fn wait_for_settlements(&self, expected: usize, timeout: Duration) -> bool {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            if self.settlements().len() >= expected {
                return true;
            }
            if tokio::time::Instant::now() >= deadline {
                return false;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    }
}

#[async_trait]
impl Publisher for InMemoryBroker {
    async fn publish(&self, topic: &str, payload: &[u8], metadata: MessageMetadata) -> Result<()> {
        let envelope = Envelope {
            delivery_tag: self.state.next_tag.fetch_add(1, Ordering::SeqCst) + 1,
            payload: payload.to_vec(),
            metadata,
        };
        debug!("Queued delivery {} on {}", envelope.delivery_tag, topic);
        self.state.enqueue(topic, envelope)
    }
}

#[async_trait]
impl Subscriber for InMemoryBroker {
    async fn subscribe(&self, topic: &str) -> Result<Box<dyn Subscription>> {
        let mut topics = self
            .state
            .topics
            .lock()
            .map_err(|_| PipelineError::InternalError {
                message: "Failed to acquire broker topics lock".to_string(),
            })?;

        let receiver = topics
            .entry(topic.to_string())
            .or_insert_with(Topic::new)
            .receiver
            .take()
            .ok_or_else(|| PipelineError::DeliveryFailed {
                topic: topic.to_string(),
                message: "topic already has a subscriber".to_string(),
            })?;

        Ok(Box::new(InMemorySubscription {
            topic: topic.to_string(),
            receiver,
            state: self.state.clone(),
        }))
    }
}

struct InMemorySubscription {
    topic: String,
    receiver: UnboundedReceiver<Envelope>,
    state: Arc<BrokerState>,
}

#[async_trait]
impl Subscription for InMemorySubscription {
    async fn next_delivery(&mut self) -> Result<Option<Box<dyn Delivery>>> {
        Ok(self.receiver.recv().await.map(|envelope| {
            Box::new(InMemoryDelivery {
                topic: self.topic.clone(),
                envelope,
                state: self.state.clone(),
                settled: AtomicBool::new(false),
            }) as Box<dyn Delivery>
        }))
    }
}

struct InMemoryDelivery {
    topic: String,
    envelope: Envelope,
    state: Arc<BrokerState>,
    settled: AtomicBool,
}

impl InMemoryDelivery {
    fn settle(&self, outcome: SettleOutcome) -> Result<()> {
        if self.settled.swap(true, Ordering::SeqCst) {
            return Err(PipelineError::DeliveryFailed {
                topic: self.topic.clone(),
                message: format!(
                    "delivery {} was already settled",
                    self.envelope.delivery_tag
                ),
            }
            .into());
        }

        self.state.settle(Settlement {
            topic: self.topic.clone(),
            delivery_tag: self.envelope.delivery_tag,
            payload: self.envelope.payload.clone(),
            outcome,
        })
    }
}

#[async_trait]
impl Delivery for InMemoryDelivery {
    fn payload(&self) -> &[u8] {
        &self.envelope.payload
    }

    fn metadata(&self) -> &MessageMetadata {
        &self.envelope.metadata
    }

    async fn ack(&self) -> Result<()> {
        self.settle(SettleOutcome::Acked)
    }

    async fn nack(&self, requeue: bool) -> Result<()> {
        self.settle(SettleOutcome::Nacked { requeue })?;
        if requeue {
            self.state.enqueue(&self.topic, self.envelope.clone())?;
        }
        Ok(())
    }
}
