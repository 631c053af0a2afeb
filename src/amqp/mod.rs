//! AMQP integration for the telemetry pipeline
//!
//! This module binds the delivery channel traits to an AMQP broker: a topic
//! exchange carries lines from the collector, and one durable queue per event
//! topic feeds the pipeline's consumers.

pub mod connection;
pub mod messages;
pub mod publisher;
pub mod subscriber;

// Re-export commonly used types
pub use connection::{parse_amqp_url, AmqpConnection, AmqpEndpoint};
pub use publisher::{AmqpTelemetryPublisher, PublisherConfig};
pub use subscriber::{AmqpDelivery, AmqpSubscriber, AmqpSubscription};
