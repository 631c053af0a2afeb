//! Payload types for each event kind
//!
//! The serde layout of these structs is the structured wire format: field
//! names match the plugin's JSON keys, optional sub-structures are `Option`
//! and wire booleans default to `false` when omitted.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Fields every event carries
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BaseEvent {
    #[serde(with = "event_timestamp")]
    pub timestamp: DateTime<Utc>,
    pub gamemode: String,
    /// Address of the reporting game server
    #[serde(rename = "server_ip")]
    pub server: String,
}

/// A player as seen by the game server
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PlayerRef {
    pub steam_id: String,
    pub name: String,
    /// Team designator; 0 when the plugin did not report one
    #[serde(default)]
    pub team: i32,
}

impl PlayerRef {
    pub fn new(steam_id: impl Into<String>, name: impl Into<String>, team: i32) -> Self {
        Self {
            steam_id: steam_id.into(),
            name: name.into(),
            team,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Weapon {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub item_def_index: Option<i32>,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KillEvent {
    #[serde(flatten)]
    pub base: BaseEvent,
    pub killer: PlayerRef,
    pub victim: PlayerRef,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub assister: Option<PlayerRef>,
    pub weapon: Weapon,
    #[serde(default)]
    pub crit: bool,
    #[serde(default)]
    pub airborne: bool,
    #[serde(default)]
    pub headshot: bool,
    #[serde(default)]
    pub backstab: bool,
    #[serde(default)]
    pub first_blood: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub killer_pos: Option<Position>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub victim_pos: Option<Position>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AirshotEvent {
    #[serde(flatten)]
    pub base: BaseEvent,
    pub player: PlayerRef,
    pub victim: PlayerRef,
    pub weapon: Weapon,
    #[serde(default)]
    pub air2air: bool,
    /// Victim height above ground, in hammer units
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub height: Option<f64>,
}

/// A reflected projectile; every measurement is optional and 0.0 is a real value
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeflectEvent {
    #[serde(flatten)]
    pub base: BaseEvent,
    pub player: PlayerRef,
    /// Whoever fired the projectile
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub owner: Option<PlayerRef>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub projectile_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rocket_speed: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deflect_angle: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timing_ms: Option<i32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub distance: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StunEvent {
    #[serde(flatten)]
    pub base: BaseEvent,
    pub player: PlayerRef,
    pub victim: PlayerRef,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration: Option<f64>,
    #[serde(default)]
    pub big_stun: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HealEvent {
    #[serde(flatten)]
    pub base: BaseEvent,
    pub healer: PlayerRef,
    pub target: PlayerRef,
    pub amount: i32,
}

/// Shared by uber deployed and uber dropped
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MedicEvent {
    #[serde(flatten)]
    pub base: BaseEvent,
    pub medic: PlayerRef,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target: Option<PlayerRef>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub medigun: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassChangeEvent {
    #[serde(flatten)]
    pub base: BaseEvent,
    pub player: PlayerRef,
    pub class: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub previous_class: Option<String>,
}

/// Jarate or Mad Milk landing on an enemy
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JarateEvent {
    #[serde(flatten)]
    pub base: BaseEvent,
    pub player: PlayerRef,
    pub victim: PlayerRef,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub item: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ShieldBlockEvent {
    #[serde(flatten)]
    pub base: BaseEvent,
    pub player: PlayerRef,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub attacker: Option<PlayerRef>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub damage: Option<i32>,
}

/// Shared by rocket jump and sticky jump
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JumpEvent {
    #[serde(flatten)]
    pub base: BaseEvent,
    pub player: PlayerRef,
    /// Peak height above the take-off point, in hammer units
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub height: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub distance: Option<f64>,
}

/// A kill made while blast jumping
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JumpKillEvent {
    #[serde(flatten)]
    pub base: BaseEvent,
    pub killer: PlayerRef,
    pub victim: PlayerRef,
    pub weapon: Weapon,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub height: Option<f64>,
}

/// Shared by teleport (arrival) and teleport used (entrance)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TeleportEvent {
    #[serde(flatten)]
    pub base: BaseEvent,
    pub player: PlayerRef,
    /// Engineer who owns the teleporter
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub builder: Option<PlayerRef>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BuildingEvent {
    #[serde(flatten)]
    pub base: BaseEvent,
    pub player: PlayerRef,
    pub object: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub position: Option<Position>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KilledObjectEvent {
    #[serde(flatten)]
    pub base: BaseEvent,
    pub attacker: PlayerRef,
    pub object: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub owner: Option<PlayerRef>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub weapon: Option<Weapon>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DefendedMedicEvent {
    #[serde(flatten)]
    pub base: BaseEvent,
    /// The defender
    pub player: PlayerRef,
    pub medic: PlayerRef,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BuffEvent {
    #[serde(flatten)]
    pub base: BaseEvent,
    pub player: PlayerRef,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub buff_type: Option<String>,
}

/// Shared by sandvich, dalokohs and steak
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FoodEvent {
    #[serde(flatten)]
    pub base: BaseEvent,
    pub player: PlayerRef,
    /// Health restored
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub amount: Option<i32>,
    /// Teammate the food was thrown to
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target: Option<PlayerRef>,
}

/// Shared by the three end-of-round MVP slots
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MvpEvent {
    #[serde(flatten)]
    pub base: BaseEvent,
    pub player: PlayerRef,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub score: Option<i32>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlayerLoadoutEvent {
    #[serde(flatten)]
    pub base: BaseEvent,
    pub player: PlayerRef,
    pub class: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub items: Vec<Weapon>,
}

/// Per-life weapon accuracy; missing counters are zero
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WeaponStatsEvent {
    #[serde(flatten)]
    pub base: BaseEvent,
    pub player: PlayerRef,
    pub weapon: Weapon,
    #[serde(default)]
    pub shots: i32,
    #[serde(default)]
    pub hits: i32,
    #[serde(default)]
    pub damage: i32,
}

/// Shared by match start and round start
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MatchStartEvent {
    #[serde(flatten)]
    pub base: BaseEvent,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub map: Option<String>,
}

/// Shared by match end and round end
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MatchEndEvent {
    #[serde(flatten)]
    pub base: BaseEvent,
    /// Winning side code; 0 for a tie
    pub winner_team: i32,
    /// Match length in seconds as reported by the plugin
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration: Option<i32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub red_score: Option<i32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub blu_score: Option<i32>,
}

/// Accepts RFC 3339, the plugin's offset-less layout, or Unix seconds.
/// Always writes RFC 3339 in UTC.
pub(crate) mod event_timestamp {
    use crate::utils::{parse_event_timestamp, timestamp_from_unix};
    use chrono::{DateTime, SecondsFormat, Utc};
    use serde::{de, Deserialize, Deserializer, Serializer};

    #[derive(Deserialize)]
    #[serde(untagged)]
    enum RawTimestamp {
        Text(String),
        Seconds(i64),
    }

    pub fn serialize<S: Serializer>(value: &DateTime<Utc>, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&value.to_rfc3339_opts(SecondsFormat::AutoSi, true))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<DateTime<Utc>, D::Error> {
        match RawTimestamp::deserialize(deserializer)? {
            RawTimestamp::Text(text) => parse_event_timestamp(&text)
                .ok_or_else(|| de::Error::custom(format!("invalid timestamp {:?}", text))),
            RawTimestamp::Seconds(seconds) => timestamp_from_unix(seconds)
                .ok_or_else(|| de::Error::custom(format!("timestamp out of range: {}", seconds))),
        }
    }
}
