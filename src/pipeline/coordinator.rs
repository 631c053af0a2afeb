//! One consumer per event topic, started and stopped together

use crate::config::PipelineSettings;
use crate::delivery::Subscriber;
use crate::error::Result;
use crate::events::EventKind;
use crate::metrics::MetricsCollector;
use crate::pipeline::consumer::{ConsumerSettings, TopicConsumer};
use crate::pipeline::processor::EventProcessor;
use crate::pipeline::{PipelineCounters, PipelineStats};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{error, info};

/// Running set of topic consumers
pub struct PipelineCoordinator {
    processor: Arc<EventProcessor>,
    counters: Arc<PipelineCounters>,
    shutdown_tx: watch::Sender<bool>,
    consumers: Vec<(String, JoinHandle<()>)>,
}

impl PipelineCoordinator {
    /// Subscribe to every event topic and spawn a consumer for each
    pub async fn start(
        subscriber: Arc<dyn Subscriber>,
        processor: Arc<EventProcessor>,
        settings: &PipelineSettings,
        metrics: Option<Arc<MetricsCollector>>,
    ) -> Result<Self> {
        let counters = Arc::new(PipelineCounters::default());
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let consumer_settings = ConsumerSettings {
            poll_interval: Duration::from_millis(settings.poll_interval_ms),
            requeue_on_failure: settings.requeue_on_failure,
        };

        let mut consumers = Vec::with_capacity(EventKind::ALL.len());
        for kind in EventKind::ALL {
            let topic = kind.topic();
            let subscription = subscriber.subscribe(&topic).await?;

            let mut consumer = TopicConsumer::new(
                topic.clone(),
                subscription,
                processor.clone(),
                consumer_settings,
                counters.clone(),
                shutdown_rx.clone(),
            );
            if let Some(metrics) = &metrics {
                consumer = consumer.with_metrics(metrics.clone());
            }

            consumers.push((topic, tokio::spawn(consumer.run())));
        }

        info!("Pipeline started with {} topic consumers", consumers.len());

        Ok(Self {
            processor,
            counters,
            shutdown_tx,
            consumers,
        })
    }

    pub fn processor(&self) -> Arc<EventProcessor> {
        self.processor.clone()
    }

    pub fn stats(&self) -> PipelineStats {
        self.counters.snapshot()
    }

    pub fn consumer_count(&self) -> usize {
        self.consumers.len()
    }

    /// Number of consumers still running
    pub fn active_consumers(&self) -> usize {
        self.consumers
            .iter()
            .filter(|(_, handle)| !handle.is_finished())
            .count()
    }

    /// Signal every consumer to stop and wait for in-flight deliveries to settle
    pub async fn shutdown(self) -> PipelineStats {
        info!("Stopping {} topic consumers...", self.consumers.len());
        let _ = self.shutdown_tx.send(true);

        for (topic, handle) in self.consumers {
            if let Err(e) = handle.await {
                error!("Consumer for {} ended abnormally: {}", topic, e);
            }
        }

        let stats = self.counters.snapshot();
        info!("Pipeline stopped: {:?}", stats);
        stats
    }
}
