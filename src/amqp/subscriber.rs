//! AMQP binding of the delivery channel's consuming side
//!
//! Every topic gets its own channel and a durable queue named
//! `<queue_prefix>.<topic>`, bound to the telemetry exchange with the topic as
//! routing key. Consumption uses manual acknowledgement with a bounded
//! prefetch so a slow consumer never holds more than `prefetch_count` lines.

use crate::amqp::connection::AmqpConnection;
use crate::amqp::messages::{self, queue_name};
use crate::config::AmqpSettings;
use crate::delivery::{Delivery, MessageMetadata, Subscriber, Subscription};
use crate::error::{PipelineError, Result};
use amqprs::channel::{
    BasicAckArguments, BasicCancelArguments, BasicConsumeArguments, BasicNackArguments,
    BasicQosArguments, Channel, ConsumerMessage, ExchangeDeclareArguments, QueueBindArguments,
    QueueDeclareArguments,
};
use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc::UnboundedReceiver;
use tracing::{debug, info, warn};

/// Declare the durable topic exchange telemetry is published to
pub(crate) async fn declare_exchange(channel: &Channel, exchange: &str) -> Result<()> {
    let args = ExchangeDeclareArguments::new(exchange, "topic")
        .durable(true)
        .finish();
    channel.exchange_declare(args).await.map_err(|e| {
        PipelineError::AmqpConnectionFailed {
            message: format!("Failed to declare exchange {}: {}", exchange, e),
        }
    })?;
    Ok(())
}

/// Opens one consuming channel per subscribed topic
pub struct AmqpSubscriber {
    connection: Arc<AmqpConnection>,
    settings: AmqpSettings,
}

impl AmqpSubscriber {
    pub fn new(connection: Arc<AmqpConnection>, settings: AmqpSettings) -> Self {
        Self {
            connection,
            settings,
        }
    }

    fn failed(topic: &str, message: String) -> PipelineError {
        PipelineError::DeliveryFailed {
            topic: topic.to_string(),
            message,
        }
    }
}

#[async_trait]
impl Subscriber for AmqpSubscriber {
    async fn subscribe(&self, topic: &str) -> Result<Box<dyn Subscription>> {
        let channel = self.connection.open_channel().await?;
        let exchange = &self.settings.exchange_name;
        let queue = queue_name(&self.settings.queue_prefix, topic);

        declare_exchange(&channel, exchange).await?;

        let declare_args = QueueDeclareArguments::durable_client_named(&queue);
        channel
            .queue_declare(declare_args)
            .await
            .map_err(|e| Self::failed(topic, format!("Failed to declare queue {}: {}", queue, e)))?;

        channel
            .queue_bind(QueueBindArguments::new(&queue, exchange, topic))
            .await
            .map_err(|e| Self::failed(topic, format!("Failed to bind queue {}: {}", queue, e)))?;

        channel
            .basic_qos(BasicQosArguments::new(0, self.settings.prefetch_count, false))
            .await
            .map_err(|e| Self::failed(topic, format!("Failed to set prefetch: {}", e)))?;

        let consumer_tag = format!("killfeed-{}-{}", topic, uuid::Uuid::new_v4());
        let consume_args = BasicConsumeArguments::new(&queue, &consumer_tag);
        let (consumer_tag, receiver) = channel
            .basic_consume_rx(consume_args)
            .await
            .map_err(|e| Self::failed(topic, format!("Failed to start consuming: {}", e)))?;

        info!(
            "Consuming {} from queue {} (prefetch {})",
            topic, queue, self.settings.prefetch_count
        );

        Ok(Box::new(AmqpSubscription {
            topic: topic.to_string(),
            channel,
            consumer_tag,
            receiver,
        }))
    }
}

/// Deliveries arriving on one queue
pub struct AmqpSubscription {
    topic: String,
    channel: Channel,
    consumer_tag: String,
    receiver: UnboundedReceiver<ConsumerMessage>,
}

impl AmqpSubscription {
    /// Stop consuming; unacknowledged deliveries return to the queue
    pub async fn cancel(self) -> Result<()> {
        self.channel
            .basic_cancel(BasicCancelArguments::new(&self.consumer_tag))
            .await
            .map_err(|e| PipelineError::DeliveryFailed {
                topic: self.topic.clone(),
                message: format!("Failed to stop consuming: {}", e),
            })?;
        info!("Stopped consuming {}", self.topic);
        Ok(())
    }
}

#[async_trait]
impl Subscription for AmqpSubscription {
    async fn next_delivery(&mut self) -> Result<Option<Box<dyn Delivery>>> {
        loop {
            let Some(message) = self.receiver.recv().await else {
                return Ok(None);
            };

            let Some(deliver) = message.deliver else {
                warn!("Discarding message without delivery info on {}", self.topic);
                continue;
            };

            let delivery_tag = deliver.delivery_tag();
            debug!(
                "AMQP message received - delivery_tag: {}, routing_key: '{}'",
                delivery_tag,
                deliver.routing_key()
            );

            return Ok(Some(Box::new(AmqpDelivery {
                topic: self.topic.clone(),
                channel: self.channel.clone(),
                delivery_tag,
                metadata: messages::from_properties(message.basic_properties.as_ref()),
                payload: message.content.unwrap_or_default(),
                settled: AtomicBool::new(false),
            })));
        }
    }
}

/// A received message awaiting ack or nack
pub struct AmqpDelivery {
    topic: String,
    channel: Channel,
    delivery_tag: u64,
    payload: Vec<u8>,
    metadata: MessageMetadata,
    settled: AtomicBool,
}

impl AmqpDelivery {
    fn claim(&self) -> Result<()> {
        if self.settled.swap(true, Ordering::SeqCst) {
            return Err(PipelineError::DeliveryFailed {
                topic: self.topic.clone(),
                message: format!("delivery {} already settled", self.delivery_tag),
            }
            .into());
        }
        Ok(())
    }
}

#[async_trait]
impl Delivery for AmqpDelivery {
    fn payload(&self) -> &[u8] {
        &self.payload
    }

    fn metadata(&self) -> &MessageMetadata {
        &self.metadata
    }

    async fn ack(&self) -> Result<()> {
        self.claim()?;
        self.channel
            .basic_ack(BasicAckArguments::new(self.delivery_tag, false))
            .await
            .map_err(|e| PipelineError::DeliveryFailed {
                topic: self.topic.clone(),
                message: format!("Failed to ack {}: {}", self.delivery_tag, e),
            })?;
        Ok(())
    }

    async fn nack(&self, requeue: bool) -> Result<()> {
        self.claim()?;
        self.channel
            .basic_nack(BasicNackArguments::new(self.delivery_tag, false, requeue))
            .await
            .map_err(|e| PipelineError::DeliveryFailed {
                topic: self.topic.clone(),
                message: format!("Failed to nack {}: {}", self.delivery_tag, e),
            })?;
        Ok(())
    }
}
