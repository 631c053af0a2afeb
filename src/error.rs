//! Error types for the telemetry pipeline
//!
//! Service operations return `anyhow::Result`; the typed enums below are carried
//! inside it and recovered with `downcast_ref` where handling depends on the
//! category (decode failures are dead-lettered, open-match conflicts are retried).

use crate::events::EventKind;

/// Result type alias for convenience
pub type Result<T> = anyhow::Result<T>;

/// Custom error types for pipeline scenarios
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error("AMQP connection failed: {message}")]
    AmqpConnectionFailed { message: String },

    #[error("Delivery channel error on topic {topic}: {message}")]
    DeliveryFailed { topic: String, message: String },

    #[error("Storage operation failed: {message}")]
    StorageFailed { message: String },

    #[error("Match lifecycle error for server {server}: {message}")]
    LifecycleFailed { server: String, message: String },

    #[error("Rating calculation failed: {reason}")]
    RatingCalculationFailed { reason: String },

    #[error("Configuration error: {message}")]
    ConfigurationError { message: String },

    #[error("Internal service error: {message}")]
    InternalError { message: String },
}

/// Storage-level constraint violations
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum StorageError {
    #[error("server {server} already has an open match ({match_id})")]
    OpenMatchExists {
        server: String,
        match_id: uuid::Uuid,
    },

    #[error("match not found: {match_id}")]
    MatchNotFound { match_id: uuid::Uuid },

    #[error("player not found: {player_id}")]
    PlayerNotFound { player_id: uuid::Uuid },

    #[error("raw event not found: {event_id}")]
    RawEventNotFound { event_id: uuid::Uuid },

    #[error("match {match_id} already has rating deltas")]
    AlreadyRated { match_id: uuid::Uuid },
}

/// A line that could not be turned into an event
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[error("failed to decode line: {reason} (line: {line:?})")]
pub struct DecodeError {
    /// The offending input, trimmed
    pub line: String,
    pub reason: DecodeFailure,
}

impl DecodeError {
    pub fn new(line: impl Into<String>, reason: DecodeFailure) -> Self {
        Self {
            line: line.into(),
            reason,
        }
    }
}

/// Why a line failed to decode
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum DecodeFailure {
    #[error("line is not valid UTF-8")]
    InvalidUtf8,

    #[error("expected at least {minimum} fields, found {found}")]
    TooFewFields { found: usize, minimum: usize },

    #[error("{kind} requires {required} fields, found {found}")]
    MissingFields {
        kind: EventKind,
        required: usize,
        found: usize,
    },

    #[error("malformed event tag {tag:?}")]
    MalformedTag { tag: String },

    #[error("field '{field}' is not numeric: {value:?}")]
    NotNumeric { field: &'static str, value: String },

    #[error("invalid timestamp {value:?}")]
    InvalidTimestamp { value: String },

    #[error("missing required field '{field}'")]
    MissingField { field: &'static str },

    #[error("malformed structured record: {message}")]
    Malformed { message: String },

    #[error("invalid {kind} record: {message}")]
    InvalidRecord { kind: EventKind, message: String },
}
