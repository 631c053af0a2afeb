//! Typed telemetry events
//!
//! Every kind the game server plugin emits is a variant of [`Event`], so the
//! tag and the payload can never disagree. Events are built once by the
//! decoder and never mutated afterwards.

pub mod schema;

pub use schema::*;

use serde::{Deserialize, Serialize};
use std::fmt;

/// Prefix shared by every delivery topic
pub const TOPIC_PREFIX: &str = "events.";

/// The kind tag of an event
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    Kill,
    Airshot,
    Deflect,
    Stun,
    Healed,
    Jarate,
    ShieldBlocked,
    RocketJump,
    StickyJump,
    RocketJumpKill,
    StickyJumpKill,
    Teleport,
    TeleportUsed,
    BuiltObject,
    KilledObject,
    UberDeployed,
    UberDropped,
    DefendedMedic,
    BuffDeployed,
    Sandvich,
    Dalokohs,
    Steak,
    Mvp1,
    Mvp2,
    Mvp3,
    PlayerLoadout,
    WeaponStats,
    ClassChange,
    MatchStart,
    RoundStart,
    MatchEnd,
    RoundEnd,
}

/// How the coordinator routes a kind
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventCategory {
    /// Happens inside a match; needs an open match to attach to
    Gameplay,
    /// Opens or refreshes the server's match
    Start,
    /// Closes the server's match and settles ratings
    End,
}

impl EventKind {
    pub const ALL: [EventKind; 32] = [
        EventKind::Kill,
        EventKind::Airshot,
        EventKind::Deflect,
        EventKind::Stun,
        EventKind::Healed,
        EventKind::Jarate,
        EventKind::ShieldBlocked,
        EventKind::RocketJump,
        EventKind::StickyJump,
        EventKind::RocketJumpKill,
        EventKind::StickyJumpKill,
        EventKind::Teleport,
        EventKind::TeleportUsed,
        EventKind::BuiltObject,
        EventKind::KilledObject,
        EventKind::UberDeployed,
        EventKind::UberDropped,
        EventKind::DefendedMedic,
        EventKind::BuffDeployed,
        EventKind::Sandvich,
        EventKind::Dalokohs,
        EventKind::Steak,
        EventKind::Mvp1,
        EventKind::Mvp2,
        EventKind::Mvp3,
        EventKind::PlayerLoadout,
        EventKind::WeaponStats,
        EventKind::ClassChange,
        EventKind::MatchStart,
        EventKind::RoundStart,
        EventKind::MatchEnd,
        EventKind::RoundEnd,
    ];

    /// The `event_type` value used by the structured format
    pub fn token(&self) -> &'static str {
        match self {
            EventKind::Kill => "kill",
            EventKind::Airshot => "airshot",
            EventKind::Deflect => "deflect",
            EventKind::Stun => "stun",
            EventKind::Healed => "healed",
            EventKind::Jarate => "jarate",
            EventKind::ShieldBlocked => "shield_blocked",
            EventKind::RocketJump => "rocket_jump",
            EventKind::StickyJump => "sticky_jump",
            EventKind::RocketJumpKill => "rocket_jump_kill",
            EventKind::StickyJumpKill => "sticky_jump_kill",
            EventKind::Teleport => "teleport",
            EventKind::TeleportUsed => "teleport_used",
            EventKind::BuiltObject => "built_object",
            EventKind::KilledObject => "killed_object",
            EventKind::UberDeployed => "uber_deployed",
            EventKind::UberDropped => "uber_dropped",
            EventKind::DefendedMedic => "defended_medic",
            EventKind::BuffDeployed => "buff_deployed",
            EventKind::Sandvich => "sandvich",
            EventKind::Dalokohs => "dalokohs",
            EventKind::Steak => "steak",
            EventKind::Mvp1 => "mvp1",
            EventKind::Mvp2 => "mvp2",
            EventKind::Mvp3 => "mvp3",
            EventKind::PlayerLoadout => "player_loadout",
            EventKind::WeaponStats => "weapon_stats",
            EventKind::ClassChange => "class_change",
            EventKind::MatchStart => "match_start",
            EventKind::RoundStart => "round_start",
            EventKind::MatchEnd => "match_end",
            EventKind::RoundEnd => "round_end",
        }
    }

    /// The upper-case tag used as field 0 of the legacy format
    pub fn mnemonic(&self) -> &'static str {
        match self {
            EventKind::Kill => "KILL",
            EventKind::Airshot => "AIRSHOT",
            EventKind::Deflect => "DEFLECT",
            EventKind::Stun => "STUN",
            EventKind::Healed => "HEALED",
            EventKind::Jarate => "JARATE",
            EventKind::ShieldBlocked => "SHIELD_BLOCKED",
            EventKind::RocketJump => "ROCKET_JUMP",
            EventKind::StickyJump => "STICKY_JUMP",
            EventKind::RocketJumpKill => "ROCKET_JUMP_KILL",
            EventKind::StickyJumpKill => "STICKY_JUMP_KILL",
            EventKind::Teleport => "TELEPORT",
            EventKind::TeleportUsed => "TELEPORT_USED",
            EventKind::BuiltObject => "BUILT_OBJECT",
            EventKind::KilledObject => "KILLED_OBJECT",
            EventKind::UberDeployed => "UBER_DEPLOYED",
            EventKind::UberDropped => "UBER_DROPPED",
            EventKind::DefendedMedic => "DEFENDED_MEDIC",
            EventKind::BuffDeployed => "BUFF_DEPLOYED",
            EventKind::Sandvich => "SANDVICH",
            EventKind::Dalokohs => "DALOKOHS",
            EventKind::Steak => "STEAK",
            EventKind::Mvp1 => "MVP1",
            EventKind::Mvp2 => "MVP2",
            EventKind::Mvp3 => "MVP3",
            EventKind::PlayerLoadout => "PLAYER_LOADOUT",
            EventKind::WeaponStats => "WEAPON_STATS",
            EventKind::ClassChange => "CLASS_CHANGE",
            EventKind::MatchStart => "MATCH_START",
            EventKind::RoundStart => "ROUND_START",
            EventKind::MatchEnd => "MATCH_END",
            EventKind::RoundEnd => "ROUND_END",
        }
    }

    /// Delivery topic carrying this kind
    pub fn topic(&self) -> String {
        format!("{}{}", TOPIC_PREFIX, self.token())
    }

    pub fn from_token(token: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|kind| kind.token() == token)
    }

    pub fn from_mnemonic(mnemonic: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|kind| kind.mnemonic() == mnemonic)
    }

    pub fn from_topic(topic: &str) -> Option<Self> {
        topic
            .strip_prefix(TOPIC_PREFIX)
            .and_then(Self::from_token)
    }

    pub fn category(&self) -> EventCategory {
        match self {
            EventKind::MatchStart | EventKind::RoundStart => EventCategory::Start,
            EventKind::MatchEnd | EventKind::RoundEnd => EventCategory::End,
            _ => EventCategory::Gameplay,
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.mnemonic())
    }
}

/// A decoded telemetry event
#[derive(Debug, Clone, PartialEq)]
pub enum Event {
    Kill(KillEvent),
    Airshot(AirshotEvent),
    Deflect(DeflectEvent),
    Stun(StunEvent),
    Healed(HealEvent),
    Jarate(JarateEvent),
    ShieldBlocked(ShieldBlockEvent),
    RocketJump(JumpEvent),
    StickyJump(JumpEvent),
    RocketJumpKill(JumpKillEvent),
    StickyJumpKill(JumpKillEvent),
    Teleport(TeleportEvent),
    TeleportUsed(TeleportEvent),
    BuiltObject(BuildingEvent),
    KilledObject(KilledObjectEvent),
    UberDeployed(MedicEvent),
    UberDropped(MedicEvent),
    DefendedMedic(DefendedMedicEvent),
    BuffDeployed(BuffEvent),
    Sandvich(FoodEvent),
    Dalokohs(FoodEvent),
    Steak(FoodEvent),
    Mvp1(MvpEvent),
    Mvp2(MvpEvent),
    Mvp3(MvpEvent),
    PlayerLoadout(PlayerLoadoutEvent),
    WeaponStats(WeaponStatsEvent),
    ClassChange(ClassChangeEvent),
    MatchStart(MatchStartEvent),
    RoundStart(MatchStartEvent),
    MatchEnd(MatchEndEvent),
    RoundEnd(MatchEndEvent),
}

impl Event {
    pub fn kind(&self) -> EventKind {
        match self {
            Event::Kill(_) => EventKind::Kill,
            Event::Airshot(_) => EventKind::Airshot,
            Event::Deflect(_) => EventKind::Deflect,
            Event::Stun(_) => EventKind::Stun,
            Event::Healed(_) => EventKind::Healed,
            Event::Jarate(_) => EventKind::Jarate,
            Event::ShieldBlocked(_) => EventKind::ShieldBlocked,
            Event::RocketJump(_) => EventKind::RocketJump,
            Event::StickyJump(_) => EventKind::StickyJump,
            Event::RocketJumpKill(_) => EventKind::RocketJumpKill,
            Event::StickyJumpKill(_) => EventKind::StickyJumpKill,
            Event::Teleport(_) => EventKind::Teleport,
            Event::TeleportUsed(_) => EventKind::TeleportUsed,
            Event::BuiltObject(_) => EventKind::BuiltObject,
            Event::KilledObject(_) => EventKind::KilledObject,
            Event::UberDeployed(_) => EventKind::UberDeployed,
            Event::UberDropped(_) => EventKind::UberDropped,
            Event::DefendedMedic(_) => EventKind::DefendedMedic,
            Event::BuffDeployed(_) => EventKind::BuffDeployed,
            Event::Sandvich(_) => EventKind::Sandvich,
            Event::Dalokohs(_) => EventKind::Dalokohs,
            Event::Steak(_) => EventKind::Steak,
            Event::Mvp1(_) => EventKind::Mvp1,
            Event::Mvp2(_) => EventKind::Mvp2,
            Event::Mvp3(_) => EventKind::Mvp3,
            Event::PlayerLoadout(_) => EventKind::PlayerLoadout,
            Event::WeaponStats(_) => EventKind::WeaponStats,
            Event::ClassChange(_) => EventKind::ClassChange,
            Event::MatchStart(_) => EventKind::MatchStart,
            Event::RoundStart(_) => EventKind::RoundStart,
            Event::MatchEnd(_) => EventKind::MatchEnd,
            Event::RoundEnd(_) => EventKind::RoundEnd,
        }
    }

    pub fn base(&self) -> &BaseEvent {
        match self {
            Event::Kill(e) => &e.base,
            Event::Airshot(e) => &e.base,
            Event::Deflect(e) => &e.base,
            Event::Stun(e) => &e.base,
            Event::Healed(e) => &e.base,
            Event::Jarate(e) => &e.base,
            Event::ShieldBlocked(e) => &e.base,
            Event::RocketJump(e) | Event::StickyJump(e) => &e.base,
            Event::RocketJumpKill(e) | Event::StickyJumpKill(e) => &e.base,
            Event::Teleport(e) | Event::TeleportUsed(e) => &e.base,
            Event::BuiltObject(e) => &e.base,
            Event::KilledObject(e) => &e.base,
            Event::UberDeployed(e) | Event::UberDropped(e) => &e.base,
            Event::DefendedMedic(e) => &e.base,
            Event::BuffDeployed(e) => &e.base,
            Event::Sandvich(e) | Event::Dalokohs(e) | Event::Steak(e) => &e.base,
            Event::Mvp1(e) | Event::Mvp2(e) | Event::Mvp3(e) => &e.base,
            Event::PlayerLoadout(e) => &e.base,
            Event::WeaponStats(e) => &e.base,
            Event::ClassChange(e) => &e.base,
            Event::MatchStart(e) | Event::RoundStart(e) => &e.base,
            Event::MatchEnd(e) | Event::RoundEnd(e) => &e.base,
        }
    }

    /// Every player the event mentions, primary actor first
    pub fn players(&self) -> Vec<&PlayerRef> {
        match self {
            Event::Kill(e) => {
                let mut players = vec![&e.killer, &e.victim];
                players.extend(e.assister.as_ref());
                players
            }
            Event::Airshot(e) => vec![&e.player, &e.victim],
            Event::Deflect(e) => {
                let mut players = vec![&e.player];
                players.extend(e.owner.as_ref());
                players
            }
            Event::Stun(e) => vec![&e.player, &e.victim],
            Event::Healed(e) => vec![&e.healer, &e.target],
            Event::Jarate(e) => vec![&e.player, &e.victim],
            Event::ShieldBlocked(e) => {
                let mut players = vec![&e.player];
                players.extend(e.attacker.as_ref());
                players
            }
            Event::RocketJump(e) | Event::StickyJump(e) => vec![&e.player],
            Event::RocketJumpKill(e) | Event::StickyJumpKill(e) => vec![&e.killer, &e.victim],
            Event::Teleport(e) | Event::TeleportUsed(e) => {
                let mut players = vec![&e.player];
                players.extend(e.builder.as_ref());
                players
            }
            Event::BuiltObject(e) => vec![&e.player],
            Event::KilledObject(e) => {
                let mut players = vec![&e.attacker];
                players.extend(e.owner.as_ref());
                players
            }
            Event::DefendedMedic(e) => vec![&e.player, &e.medic],
            Event::BuffDeployed(e) => vec![&e.player],
            Event::Sandvich(e) | Event::Dalokohs(e) | Event::Steak(e) => {
                let mut players = vec![&e.player];
                players.extend(e.target.as_ref());
                players
            }
            Event::Mvp1(e) | Event::Mvp2(e) | Event::Mvp3(e) => vec![&e.player],
            Event::PlayerLoadout(e) => vec![&e.player],
            Event::WeaponStats(e) => vec![&e.player],
            Event::UberDeployed(e) | Event::UberDropped(e) => {
                let mut players = vec![&e.medic];
                players.extend(e.target.as_ref());
                players
            }
            Event::ClassChange(e) => vec![&e.player],
            Event::MatchStart(_) | Event::RoundStart(_) => Vec::new(),
            Event::MatchEnd(_) | Event::RoundEnd(_) => Vec::new(),
        }
    }
}
