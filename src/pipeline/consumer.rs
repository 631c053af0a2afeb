//! Sequential consumption of one topic

use crate::delivery::{Delivery, Subscription};
use crate::error::DecodeError;
use crate::metrics::MetricsCollector;
use crate::pipeline::processor::{EventProcessor, ProcessOutcome};
use crate::pipeline::PipelineCounters;
use crate::utils::payload_preview;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

/// Bytes of a failing payload included in log lines
const PREVIEW_BYTES: usize = 120;

/// Settlement policy for a consumer
#[derive(Debug, Clone, Copy)]
pub struct ConsumerSettings {
    /// Pause after the subscription itself fails
    pub poll_interval: Duration,
    /// Requeue messages that failed after decoding
    pub requeue_on_failure: bool,
}

/// Pulls deliveries for one topic and settles each before taking the next
pub struct TopicConsumer {
    topic: String,
    subscription: Box<dyn Subscription>,
    processor: Arc<EventProcessor>,
    settings: ConsumerSettings,
    counters: Arc<PipelineCounters>,
    metrics: Option<Arc<MetricsCollector>>,
    shutdown: watch::Receiver<bool>,
}

impl TopicConsumer {
    pub fn new(
        topic: impl Into<String>,
        subscription: Box<dyn Subscription>,
        processor: Arc<EventProcessor>,
        settings: ConsumerSettings,
        counters: Arc<PipelineCounters>,
        shutdown: watch::Receiver<bool>,
    ) -> Self {
        Self {
            topic: topic.into(),
            subscription,
            processor,
            settings,
            counters,
            metrics: None,
            shutdown,
        }
    }

    pub fn with_metrics(mut self, metrics: Arc<MetricsCollector>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Run until shutdown is signalled or the subscription closes.
    ///
    /// A delivery that has been received is always settled before the
    /// shutdown signal is looked at again.
    pub async fn run(mut self) {
        info!("Consumer started for topic {}", self.topic);

        loop {
            if *self.shutdown.borrow() {
                break;
            }

            tokio::select! {
                changed = self.shutdown.changed() => {
                    if changed.is_err() || *self.shutdown.borrow() {
                        break;
                    }
                }
                next = self.subscription.next_delivery() => match next {
                    Ok(Some(delivery)) => self.handle(delivery).await,
                    Ok(None) => {
                        warn!("Subscription for {} closed", self.topic);
                        break;
                    }
                    Err(e) => {
                        error!("Failed to receive from {}: {}", self.topic, e);
                        tokio::time::sleep(self.settings.poll_interval).await;
                    }
                },
            }
        }

        info!("Consumer stopped for topic {}", self.topic);
    }

    async fn handle(&self, delivery: Box<dyn Delivery>) {
        let started = Instant::now();

        match self.processor.process_payload(delivery.payload()).await {
            Ok(ProcessOutcome::Processed(kind)) => {
                self.ack(delivery.as_ref()).await;
                self.counters.record_processed();
                if let Some(metrics) = &self.metrics {
                    metrics.record_event_processed(kind, started.elapsed());
                }
            }
            Ok(ProcessOutcome::Skipped) => {
                debug!("Skipped delivery on {}", self.topic);
                self.ack(delivery.as_ref()).await;
                self.counters.record_skipped();
                if let Some(metrics) = &self.metrics {
                    metrics.record_event_skipped();
                }
            }
            Err(e) if e.downcast_ref::<DecodeError>().is_some() => {
                warn!("Dead-lettering undecodable delivery on {}: {}", self.topic, e);
                self.nack(delivery.as_ref(), false, "dead_lettered").await;
                self.counters.record_dead_lettered();
                if let Some(metrics) = &self.metrics {
                    metrics.record_decode_error();
                }
            }
            Err(e) => {
                let requeue = self.settings.requeue_on_failure;
                error!(
                    "Failed to process delivery on {} (requeue: {}): {:#} (payload: {:?})",
                    self.topic,
                    requeue,
                    e,
                    payload_preview(delivery.payload(), PREVIEW_BYTES)
                );
                let outcome = if requeue { "requeued" } else { "rejected" };
                self.nack(delivery.as_ref(), requeue, outcome).await;
                self.counters.record_failed();
            }
        }
    }

    async fn ack(&self, delivery: &dyn Delivery) {
        match delivery.ack().await {
            Ok(()) => self.record_delivery("acked"),
            Err(e) => error!("Failed to ack delivery on {}: {}", self.topic, e),
        }
    }

    async fn nack(&self, delivery: &dyn Delivery, requeue: bool, outcome: &str) {
        match delivery.nack(requeue).await {
            Ok(()) => self.record_delivery(outcome),
            Err(e) => error!("Failed to nack delivery on {}: {}", self.topic, e),
        }
    }

    fn record_delivery(&self, outcome: &str) {
        if let Some(metrics) = &self.metrics {
            metrics.record_delivery(&self.topic, outcome);
        }
    }
}
