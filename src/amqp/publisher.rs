//! AMQP binding of the delivery channel's publishing side

use crate::amqp::connection::AmqpConnection;
use crate::amqp::messages;
use crate::amqp::subscriber::declare_exchange;
use crate::config::AmqpSettings;
use crate::delivery::{MessageMetadata, Publisher};
use crate::error::{PipelineError, Result};
use crate::metrics::MetricsCollector;
use amqprs::channel::{BasicPublishArguments, Channel};
use async_trait::async_trait;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::time::sleep;
use tracing::{debug, error, warn};

/// Retry policy for publishing
#[derive(Debug, Clone)]
pub struct PublisherConfig {
    pub max_retries: u32,
    pub retry_delay_ms: u64,
}

impl Default for PublisherConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            retry_delay_ms: 500,
        }
    }
}

impl From<&AmqpSettings> for PublisherConfig {
    fn from(settings: &AmqpSettings) -> Self {
        Self {
            max_retries: settings.max_retry_attempts,
            retry_delay_ms: settings.retry_delay_ms,
        }
    }
}

/// Publishes telemetry lines to the topic exchange, routed by topic
pub struct AmqpTelemetryPublisher {
    channel: Channel,
    exchange: String,
    config: PublisherConfig,
    metrics: Option<Arc<MetricsCollector>>,
}

impl AmqpTelemetryPublisher {
    /// Open a publishing channel and declare the exchange
    pub async fn new(connection: &AmqpConnection, settings: &AmqpSettings) -> Result<Self> {
        let channel = connection.open_channel().await?;
        declare_exchange(&channel, &settings.exchange_name).await?;

        Ok(Self {
            channel,
            exchange: settings.exchange_name.clone(),
            config: PublisherConfig::from(settings),
            metrics: None,
        })
    }

    pub fn with_metrics(mut self, metrics: Arc<MetricsCollector>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Single publish attempt
    async fn try_publish(
        &self,
        topic: &str,
        payload: &[u8],
        metadata: &MessageMetadata,
    ) -> Result<()> {
        let properties = messages::to_properties(metadata);
        let args = BasicPublishArguments::new(&self.exchange, topic);
        let started = Instant::now();

        let result = self
            .channel
            .basic_publish(properties, payload.to_vec(), args)
            .await;

        if let Some(metrics) = &self.metrics {
            metrics.record_amqp_operation("publish", result.is_ok(), started.elapsed());
        }

        result.map_err(|e| PipelineError::AmqpConnectionFailed {
            message: format!("Failed to publish message: {}", e),
        })?;

        Ok(())
    }
}

#[async_trait]
impl Publisher for AmqpTelemetryPublisher {
    async fn publish(&self, topic: &str, payload: &[u8], metadata: MessageMetadata) -> Result<()> {
        let mut retry_count = 0;
        let mut delay = Duration::from_millis(self.config.retry_delay_ms);

        loop {
            match self.try_publish(topic, payload, &metadata).await {
                Ok(()) => {
                    debug!(
                        "Published {} bytes to {} with routing key {}",
                        payload.len(),
                        self.exchange,
                        topic
                    );
                    return Ok(());
                }
                Err(e) => {
                    retry_count += 1;
                    if retry_count > self.config.max_retries {
                        error!(
                            "Failed to publish to {} after {} retries: {}",
                            topic, self.config.max_retries, e
                        );
                        return Err(e);
                    }

                    warn!(
                        "Publish attempt {} failed for {}: {}. Retrying in {:?}",
                        retry_count, topic, e, delay
                    );

                    sleep(delay).await;
                    delay = Duration::from_millis((delay.as_millis() as u64 * 2).min(5000));
                }
            }
        }
    }
}
