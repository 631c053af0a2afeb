//! AMQP naming and message property mapping
//!
//! Telemetry lines travel unchanged as the message body. The transport
//! metadata rides in the basic properties: the event kind as
//! `message_type`, the sending game server's address as `app_id`, and the
//! receive time as `timestamp`.

use crate::delivery::MessageMetadata;
use crate::events::EventKind;
use crate::utils;
use amqprs::BasicProperties;

/// Body content type; lines are forwarded verbatim
pub const CONTENT_TYPE: &str = "text/plain";

/// Persistent delivery
pub const PERSISTENT: u8 = 2;

/// Name of the durable queue bound to `topic`
pub fn queue_name(prefix: &str, topic: &str) -> String {
    if prefix.is_empty() {
        topic.to_string()
    } else {
        format!("{}.{}", prefix, topic)
    }
}

/// Build the properties for an outgoing telemetry line
pub fn to_properties(metadata: &MessageMetadata) -> BasicProperties {
    let mut properties = BasicProperties::default();
    properties
        .with_content_type(CONTENT_TYPE)
        .with_delivery_mode(PERSISTENT)
        .with_message_id(&uuid::Uuid::new_v4().to_string())
        .with_timestamp(metadata.received_at.timestamp().max(0) as u64);

    if let Some(kind) = metadata.event_kind {
        properties.with_message_type(kind.token());
    }

    if let Some(source) = &metadata.source_addr {
        properties.with_app_id(source);
    }

    properties
}

/// Recover transport metadata from a received message.
///
/// Properties that are absent or unreadable leave the matching field unset;
/// a missing timestamp falls back to the time of receipt.
pub fn from_properties(properties: Option<&BasicProperties>) -> MessageMetadata {
    let Some(properties) = properties else {
        return MessageMetadata::new(None, None);
    };

    let event_kind = properties
        .message_type()
        .and_then(|token| EventKind::from_token(&token.to_string()));

    let source_addr = properties.app_id().map(|source| source.to_string());

    let received_at = properties
        .timestamp()
        .and_then(|seconds| i64::try_from(seconds).ok())
        .and_then(utils::timestamp_from_unix)
        .unwrap_or_else(utils::current_timestamp);

    MessageMetadata {
        event_kind,
        source_addr,
        received_at,
    }
}
