//! The JSON line format
//!
//! Each line is one object whose `event_type` names the kind. Base fields are
//! checked by hand so failures name the field; kind-specific fields are read
//! through the serde layout of the event structs.

use crate::error::{DecodeError, DecodeFailure};
use crate::events::*;
use crate::utils::{parse_event_timestamp, timestamp_from_unix};
use serde::de::DeserializeOwned;
use serde_json::{Map, Value};
use tracing::debug;

const EVENT_TYPE: &str = "event_type";

fn parse_object(line: &str) -> Result<Map<String, Value>, DecodeFailure> {
    match serde_json::from_str::<Value>(line) {
        Ok(Value::Object(object)) => Ok(object),
        Ok(_) => Err(DecodeFailure::Malformed {
            message: "expected a JSON object".to_string(),
        }),
        Err(e) => Err(DecodeFailure::Malformed {
            message: e.to_string(),
        }),
    }
}

fn event_type(object: &Map<String, Value>) -> Result<&str, DecodeFailure> {
    match object.get(EVENT_TYPE) {
        Some(Value::String(tag)) => Ok(tag),
        Some(_) => Err(DecodeFailure::Malformed {
            message: "event_type must be a string".to_string(),
        }),
        None => Err(DecodeFailure::MissingField { field: EVENT_TYPE }),
    }
}

/// Kind named by a line's `event_type`, without decoding the rest
pub fn sniff(line: &str) -> Result<Option<EventKind>, DecodeError> {
    let object = parse_object(line).map_err(|reason| DecodeError::new(line, reason))?;
    let tag = event_type(&object).map_err(|reason| DecodeError::new(line, reason))?;
    Ok(EventKind::from_token(tag))
}

/// Decode one trimmed, non-empty structured line
pub fn decode(line: &str) -> Result<Option<Event>, DecodeError> {
    decode_object(line).map_err(|reason| DecodeError::new(line, reason))
}

fn decode_object(line: &str) -> Result<Option<Event>, DecodeFailure> {
    let object = parse_object(line)?;
    let tag = event_type(&object)?;
    let Some(kind) = EventKind::from_token(tag) else {
        debug!("Skipping structured line with unknown event_type '{}'", tag);
        return Ok(None);
    };

    check_base(&object)?;

    let value = Value::Object(object);
    let event = match kind {
        EventKind::Kill => Event::Kill(payload(kind, value)?),
        EventKind::Airshot => Event::Airshot(payload(kind, value)?),
        EventKind::Deflect => Event::Deflect(payload(kind, value)?),
        EventKind::Stun => Event::Stun(payload(kind, value)?),
        EventKind::Healed => Event::Healed(payload(kind, value)?),
        EventKind::Jarate => Event::Jarate(payload(kind, value)?),
        EventKind::ShieldBlocked => Event::ShieldBlocked(payload(kind, value)?),
        EventKind::RocketJump => Event::RocketJump(payload(kind, value)?),
        EventKind::StickyJump => Event::StickyJump(payload(kind, value)?),
        EventKind::RocketJumpKill => Event::RocketJumpKill(payload(kind, value)?),
        EventKind::StickyJumpKill => Event::StickyJumpKill(payload(kind, value)?),
        EventKind::Teleport => Event::Teleport(payload(kind, value)?),
        EventKind::TeleportUsed => Event::TeleportUsed(payload(kind, value)?),
        EventKind::BuiltObject => Event::BuiltObject(payload(kind, value)?),
        EventKind::KilledObject => Event::KilledObject(payload(kind, value)?),
        EventKind::UberDeployed => Event::UberDeployed(payload(kind, value)?),
        EventKind::UberDropped => Event::UberDropped(payload(kind, value)?),
        EventKind::DefendedMedic => Event::DefendedMedic(payload(kind, value)?),
        EventKind::BuffDeployed => Event::BuffDeployed(payload(kind, value)?),
        EventKind::Sandvich => Event::Sandvich(payload(kind, value)?),
        EventKind::Dalokohs => Event::Dalokohs(payload(kind, value)?),
        EventKind::Steak => Event::Steak(payload(kind, value)?),
        EventKind::Mvp1 => Event::Mvp1(payload(kind, value)?),
        EventKind::Mvp2 => Event::Mvp2(payload(kind, value)?),
        EventKind::Mvp3 => Event::Mvp3(payload(kind, value)?),
        EventKind::PlayerLoadout => Event::PlayerLoadout(payload(kind, value)?),
        EventKind::WeaponStats => Event::WeaponStats(payload(kind, value)?),
        EventKind::ClassChange => Event::ClassChange(payload(kind, value)?),
        EventKind::MatchStart => Event::MatchStart(payload(kind, value)?),
        EventKind::RoundStart => Event::RoundStart(payload(kind, value)?),
        EventKind::MatchEnd => Event::MatchEnd(payload(kind, value)?),
        EventKind::RoundEnd => Event::RoundEnd(payload(kind, value)?),
    };

    if let Some(player) = event.players().into_iter().find(|p| p.steam_id.is_empty()) {
        return Err(DecodeFailure::InvalidRecord {
            kind,
            message: format!("player {:?} has an empty steam_id", player.name),
        });
    }

    Ok(Some(event))
}

fn check_base(object: &Map<String, Value>) -> Result<(), DecodeFailure> {
    match object.get("timestamp") {
        None => return Err(DecodeFailure::MissingField { field: "timestamp" }),
        Some(Value::String(text)) if parse_event_timestamp(text).is_some() => {}
        Some(Value::Number(n)) if n.as_i64().and_then(timestamp_from_unix).is_some() => {}
        Some(other) => {
            return Err(DecodeFailure::InvalidTimestamp {
                value: match other {
                    Value::String(text) => text.clone(),
                    other => other.to_string(),
                },
            })
        }
    }

    for field in ["gamemode", "server_ip"] {
        if !matches!(object.get(field), Some(Value::String(_))) {
            return Err(DecodeFailure::MissingField { field });
        }
    }

    Ok(())
}

fn payload<T: DeserializeOwned>(kind: EventKind, value: Value) -> Result<T, DecodeFailure> {
    serde_json::from_value(value).map_err(|e| DecodeFailure::InvalidRecord {
        kind,
        message: e.to_string(),
    })
}

/// Encode an event as a structured record
pub fn encode(event: &Event) -> serde_json::Result<Value> {
    let mut value = match event {
        Event::Kill(e) => serde_json::to_value(e)?,
        Event::Airshot(e) => serde_json::to_value(e)?,
        Event::Deflect(e) => serde_json::to_value(e)?,
        Event::Stun(e) => serde_json::to_value(e)?,
        Event::Healed(e) => serde_json::to_value(e)?,
        Event::Jarate(e) => serde_json::to_value(e)?,
        Event::ShieldBlocked(e) => serde_json::to_value(e)?,
        Event::RocketJump(e) | Event::StickyJump(e) => serde_json::to_value(e)?,
        Event::RocketJumpKill(e) | Event::StickyJumpKill(e) => serde_json::to_value(e)?,
        Event::Teleport(e) | Event::TeleportUsed(e) => serde_json::to_value(e)?,
        Event::BuiltObject(e) => serde_json::to_value(e)?,
        Event::KilledObject(e) => serde_json::to_value(e)?,
        Event::UberDeployed(e) | Event::UberDropped(e) => serde_json::to_value(e)?,
        Event::DefendedMedic(e) => serde_json::to_value(e)?,
        Event::BuffDeployed(e) => serde_json::to_value(e)?,
        Event::Sandvich(e) | Event::Dalokohs(e) | Event::Steak(e) => serde_json::to_value(e)?,
        Event::Mvp1(e) | Event::Mvp2(e) | Event::Mvp3(e) => serde_json::to_value(e)?,
        Event::PlayerLoadout(e) => serde_json::to_value(e)?,
        Event::WeaponStats(e) => serde_json::to_value(e)?,
        Event::ClassChange(e) => serde_json::to_value(e)?,
        Event::MatchStart(e) | Event::RoundStart(e) => serde_json::to_value(e)?,
        Event::MatchEnd(e) | Event::RoundEnd(e) => serde_json::to_value(e)?,
    };

    if let Value::Object(object) = &mut value {
        object.insert(
            EVENT_TYPE.to_string(),
            Value::String(event.kind().token().to_string()),
        );
    }

    Ok(value)
}
