//! Core types for the telemetry pipeline
//!
//! Records kept by storage and shared between the lifecycle tracker, the
//! rating engine and the coordinator.

use crate::events::{EventKind, Position};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub type PlayerId = Uuid;
pub type MatchId = Uuid;
pub type RawEventId = Uuid;

/// Side code meaning "no side" or, for a winner, a tie
pub const NO_SIDE: i32 = 0;

/// The two opposing side codes used by the game
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TeamSides {
    pub red: i32,
    pub blu: i32,
}

impl Default for TeamSides {
    fn default() -> Self {
        Self { red: 2, blu: 3 }
    }
}

impl TeamSides {
    pub fn contains(&self, side: i32) -> bool {
        side == self.red || side == self.blu
    }

    /// The side opposing `side`, if `side` is one of the pair
    pub fn opponent_of(&self, side: i32) -> Option<i32> {
        if side == self.red {
            Some(self.blu)
        } else if side == self.blu {
            Some(self.red)
        } else {
            None
        }
    }
}

/// Durable player record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlayerRecord {
    pub id: PlayerId,
    pub steam_id: String,
    /// Most recently seen display name
    pub name: String,
    pub rating: i32,
    pub peak_rating: i32,
    pub matches_played: u32,
    pub last_seen: DateTime<Utc>,
}

/// A match on one server
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MatchRecord {
    pub id: MatchId,
    pub server: String,
    pub map: Option<String>,
    pub gamemode: String,
    pub started_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
    /// Winning side code, 0 for a tie; `None` while open
    pub winner_side: Option<i32>,
    pub duration_seconds: Option<i64>,
    pub red_score: Option<i32>,
    pub blu_score: Option<i32>,
}

impl MatchRecord {
    pub fn is_open(&self) -> bool {
        self.ended_at.is_none()
    }

    /// Whether `at` falls inside this match's time span
    pub fn covers(&self, at: DateTime<Utc>) -> bool {
        at >= self.started_at && self.ended_at.map_or(true, |end| at <= end)
    }
}

/// Parameters for opening a match
#[derive(Debug, Clone, PartialEq)]
pub struct NewMatch {
    pub server: String,
    pub map: Option<String>,
    pub gamemode: String,
    pub started_at: DateTime<Utc>,
}

/// How a match ended, as reported by its end signal
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MatchResult {
    pub ended_at: DateTime<Utc>,
    /// Winning side code, 0 for a tie
    pub winner_side: i32,
    pub red_score: Option<i32>,
    pub blu_score: Option<i32>,
}

impl MatchResult {
    pub fn new(ended_at: DateTime<Utc>, winner_side: i32) -> Self {
        Self {
            ended_at,
            winner_side,
            red_score: None,
            blu_score: None,
        }
    }

    pub fn with_scores(mut self, red_score: Option<i32>, blu_score: Option<i32>) -> Self {
        self.red_score = red_score;
        self.blu_score = blu_score;
        self
    }
}

/// Result of a close request
#[derive(Debug, Clone, PartialEq)]
pub enum CloseOutcome {
    Closed(MatchRecord),
    /// The match had already been closed; nothing changed
    AlreadyClosed(MatchRecord),
}

impl CloseOutcome {
    pub fn record(&self) -> &MatchRecord {
        match self {
            CloseOutcome::Closed(record) | CloseOutcome::AlreadyClosed(record) => record,
        }
    }
}

/// Every decoded event, stored before routing
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawEventRecord {
    pub id: RawEventId,
    pub kind: EventKind,
    pub server: String,
    pub gamemode: String,
    pub occurred_at: DateTime<Utc>,
    pub received_at: DateTime<Utc>,
    /// Normalized structured form of the event
    pub payload: serde_json::Value,
    pub processed: bool,
}

/// A player's standing as read for a rating computation
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RosterEntry {
    pub player_id: PlayerId,
    pub rating: i32,
    pub matches_played: u32,
}

/// How one match moved one player's rating
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RatingDeltaRecord {
    pub match_id: MatchId,
    pub player_id: PlayerId,
    pub rating_before: i32,
    pub rating_after: i32,
    pub change: i32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KillDetail {
    pub event_id: RawEventId,
    pub match_id: MatchId,
    pub killer_id: PlayerId,
    pub victim_id: PlayerId,
    pub assister_id: Option<PlayerId>,
    pub weapon: String,
    pub item_def_index: Option<i32>,
    pub crit: bool,
    pub airborne: bool,
    pub headshot: bool,
    pub backstab: bool,
    pub first_blood: bool,
    pub killer_pos: Option<Position>,
    pub victim_pos: Option<Position>,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AirshotDetail {
    pub event_id: RawEventId,
    pub match_id: MatchId,
    pub player_id: PlayerId,
    pub victim_id: PlayerId,
    pub weapon: String,
    pub air2air: bool,
    pub height: Option<f64>,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeflectDetail {
    pub event_id: RawEventId,
    pub match_id: MatchId,
    pub player_id: PlayerId,
    pub owner_id: Option<PlayerId>,
    pub projectile_type: Option<String>,
    pub rocket_speed: Option<f64>,
    pub deflect_angle: Option<f64>,
    pub timing_ms: Option<i32>,
    pub distance: Option<f64>,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StunDetail {
    pub event_id: RawEventId,
    pub match_id: MatchId,
    pub player_id: PlayerId,
    pub victim_id: PlayerId,
    pub duration: Option<f64>,
    pub big_stun: bool,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HealDetail {
    pub event_id: RawEventId,
    pub match_id: MatchId,
    pub healer_id: PlayerId,
    pub target_id: PlayerId,
    pub amount: i32,
    pub occurred_at: DateTime<Utc>,
}

/// Kind-specific rows written alongside the raw event
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum DetailRecord {
    Kill(KillDetail),
    Airshot(AirshotDetail),
    Deflect(DeflectDetail),
    Stun(StunDetail),
    Heal(HealDetail),
}

impl DetailRecord {
    pub fn match_id(&self) -> MatchId {
        match self {
            DetailRecord::Kill(d) => d.match_id,
            DetailRecord::Airshot(d) => d.match_id,
            DetailRecord::Deflect(d) => d.match_id,
            DetailRecord::Stun(d) => d.match_id,
            DetailRecord::Heal(d) => d.match_id,
        }
    }

    pub fn event_id(&self) -> RawEventId {
        match self {
            DetailRecord::Kill(d) => d.event_id,
            DetailRecord::Airshot(d) => d.event_id,
            DetailRecord::Deflect(d) => d.event_id,
            DetailRecord::Stun(d) => d.event_id,
            DetailRecord::Heal(d) => d.event_id,
        }
    }
}
