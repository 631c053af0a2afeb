//! The original `|`-delimited line format
//!
//! Layout: `TAG|unix_seconds|gamemode|server|<kind fields...>`. String fields
//! are escaped so they can contain the delimiter; numeric booleans are `0`/`1`
//! and an empty optional field means "absent".

use crate::error::{DecodeError, DecodeFailure};
use crate::events::*;
use crate::utils::timestamp_from_unix;
use tracing::debug;

pub const DELIMITER: char = '|';

/// Tag, timestamp, gamemode and server
pub const BASE_FIELD_COUNT: usize = 4;

/// First item field of a loadout line; every later field is one item
const LOADOUT_ITEMS: usize = 8;

/// Minimum field count for each kind, including the four base fields
pub fn required_fields(kind: EventKind) -> usize {
    match kind {
        EventKind::Kill => 11,
        EventKind::Airshot => 10,
        EventKind::Deflect => 10,
        EventKind::Stun => 10,
        EventKind::Healed => 9,
        EventKind::Jarate => 8,
        EventKind::ShieldBlocked => 6,
        EventKind::RocketJump | EventKind::StickyJump => 6,
        EventKind::RocketJumpKill | EventKind::StickyJumpKill => 9,
        EventKind::Teleport | EventKind::TeleportUsed => 6,
        EventKind::BuiltObject => 7,
        EventKind::KilledObject => 7,
        EventKind::UberDeployed | EventKind::UberDropped => 6,
        EventKind::DefendedMedic => 8,
        EventKind::BuffDeployed => 6,
        EventKind::Sandvich | EventKind::Dalokohs | EventKind::Steak => 6,
        EventKind::Mvp1 | EventKind::Mvp2 | EventKind::Mvp3 => 6,
        EventKind::PlayerLoadout => 7,
        EventKind::WeaponStats => 7,
        EventKind::ClassChange => 7,
        EventKind::MatchStart | EventKind::RoundStart => 5,
        EventKind::MatchEnd | EventKind::RoundEnd => 6,
    }
}

/// Undo field escaping.
///
/// The four replacements run over the whole string in this fixed order. A
/// literal backslash followed by `p`, `n` or `r` does not survive an
/// escape/unescape cycle; existing capture files depend on this behaviour.
pub fn unescape(value: &str) -> String {
    value
        .replace("\\p", "|")
        .replace("\\n", "\n")
        .replace("\\r", "\r")
        .replace("\\\\", "\\")
}

/// Escape a string field for the delimited format
pub fn escape(value: &str) -> String {
    value
        .replace('\\', "\\\\")
        .replace('\n', "\\n")
        .replace('\r', "\\r")
        .replace('|', "\\p")
}

fn is_well_formed_tag(tag: &str) -> bool {
    let mut chars = tag.chars();
    matches!(chars.next(), Some(first) if first.is_ascii_uppercase())
        && chars.all(|c| c.is_ascii_uppercase() || c.is_ascii_digit() || c == '_')
}

/// Kind named by a line's tag, without decoding the rest
pub fn sniff(line: &str) -> Result<Option<EventKind>, DecodeError> {
    let tag = line.split(DELIMITER).next().unwrap_or_default();
    if !is_well_formed_tag(tag) {
        return Err(DecodeError::new(
            line,
            DecodeFailure::MalformedTag {
                tag: tag.to_string(),
            },
        ));
    }
    Ok(EventKind::from_mnemonic(tag))
}

/// Decode one trimmed, non-empty legacy line
pub fn decode(line: &str) -> Result<Option<Event>, DecodeError> {
    let raw: Vec<&str> = line.split(DELIMITER).collect();
    if raw.len() < BASE_FIELD_COUNT {
        return Err(DecodeError::new(
            line,
            DecodeFailure::TooFewFields {
                found: raw.len(),
                minimum: BASE_FIELD_COUNT,
            },
        ));
    }

    let Some(kind) = sniff(line)? else {
        debug!("Skipping legacy line with unknown tag '{}'", raw[0]);
        return Ok(None);
    };

    let fields = Fields { kind, raw };
    fields
        .event()
        .map(Some)
        .map_err(|reason| DecodeError::new(line, reason))
}

/// Positional access to a split line
struct Fields<'a> {
    kind: EventKind,
    raw: Vec<&'a str>,
}

impl<'a> Fields<'a> {
    fn event(&self) -> Result<Event, DecodeFailure> {
        let required = required_fields(self.kind);
        if self.raw.len() < required {
            return Err(DecodeFailure::MissingFields {
                kind: self.kind,
                required,
                found: self.raw.len(),
            });
        }

        let base = self.base()?;
        let event = match self.kind {
            EventKind::Kill => Event::Kill(KillEvent {
                base,
                killer: self.player(4, 5, Some(11), "killer_id")?,
                victim: self.player(6, 7, Some(12), "victim_id")?,
                assister: self.optional_player(15, 16),
                weapon: Weapon {
                    name: self.text(8),
                    item_def_index: None,
                },
                crit: self.flag(9, "crit")?,
                airborne: self.flag(10, "airborne")?,
                headshot: self.optional_flag(13, "headshot")?,
                backstab: self.optional_flag(14, "backstab")?,
                first_blood: false,
                killer_pos: None,
                victim_pos: None,
            }),
            EventKind::Airshot => Event::Airshot(AirshotEvent {
                base,
                player: self.player(4, 5, Some(11), "player_id")?,
                victim: self.player(6, 7, Some(12), "victim_id")?,
                weapon: Weapon {
                    name: self.text(8),
                    item_def_index: None,
                },
                air2air: self.flag(9, "air2air")?,
                height: self.optional_float(10, "height")?,
            }),
            EventKind::Deflect => Event::Deflect(DeflectEvent {
                base,
                player: self.player(4, 5, Some(13), "player_id")?,
                rocket_speed: self.optional_float(6, "rocket_speed")?,
                deflect_angle: self.optional_float(7, "deflect_angle")?,
                timing_ms: self.optional_int(8, "timing_ms")?,
                distance: self.optional_float(9, "distance")?,
                projectile_type: self.optional_text(10),
                owner: self.optional_player(11, 12),
            }),
            EventKind::Stun => Event::Stun(StunEvent {
                base,
                player: self.player(4, 5, None, "player_id")?,
                victim: self.player(6, 7, None, "victim_id")?,
                duration: self.optional_float(8, "duration")?,
                big_stun: self.flag(9, "big_stun")?,
            }),
            EventKind::Healed => Event::Healed(HealEvent {
                base,
                healer: self.player(4, 5, None, "healer_id")?,
                target: self.player(6, 7, None, "target_id")?,
                amount: self.int(8, "amount")?,
            }),
            EventKind::Jarate => Event::Jarate(JarateEvent {
                base,
                player: self.player(4, 5, None, "player_id")?,
                victim: self.player(6, 7, None, "victim_id")?,
                item: self.optional_text(8),
            }),
            EventKind::ShieldBlocked => Event::ShieldBlocked(ShieldBlockEvent {
                base,
                player: self.player(4, 5, None, "player_id")?,
                damage: self.optional_int(6, "damage")?,
                attacker: self.optional_player(7, 8),
            }),
            EventKind::RocketJump => Event::RocketJump(self.jump(base)?),
            EventKind::StickyJump => Event::StickyJump(self.jump(base)?),
            EventKind::RocketJumpKill => Event::RocketJumpKill(self.jump_kill(base)?),
            EventKind::StickyJumpKill => Event::StickyJumpKill(self.jump_kill(base)?),
            EventKind::Teleport => Event::Teleport(self.teleport(base)?),
            EventKind::TeleportUsed => Event::TeleportUsed(self.teleport(base)?),
            EventKind::BuiltObject => Event::BuiltObject(BuildingEvent {
                base,
                player: self.player(4, 5, Some(7), "player_id")?,
                object: self.text(6),
                position: None,
            }),
            EventKind::KilledObject => Event::KilledObject(KilledObjectEvent {
                base,
                attacker: self.player(4, 5, None, "attacker_id")?,
                object: self.text(6),
                owner: self.optional_player(7, 8),
                weapon: self.optional_text(9).map(|name| Weapon {
                    name,
                    item_def_index: None,
                }),
            }),
            EventKind::UberDeployed => Event::UberDeployed(self.medic(base)?),
            EventKind::UberDropped => Event::UberDropped(self.medic(base)?),
            EventKind::DefendedMedic => Event::DefendedMedic(DefendedMedicEvent {
                base,
                player: self.player(4, 5, Some(8), "player_id")?,
                medic: self.player(6, 7, Some(8), "medic_id")?,
            }),
            EventKind::BuffDeployed => Event::BuffDeployed(BuffEvent {
                base,
                player: self.player(4, 5, Some(7), "player_id")?,
                buff_type: self.optional_text(6),
            }),
            EventKind::Sandvich => Event::Sandvich(self.food(base)?),
            EventKind::Dalokohs => Event::Dalokohs(self.food(base)?),
            EventKind::Steak => Event::Steak(self.food(base)?),
            EventKind::Mvp1 => Event::Mvp1(self.mvp(base)?),
            EventKind::Mvp2 => Event::Mvp2(self.mvp(base)?),
            EventKind::Mvp3 => Event::Mvp3(self.mvp(base)?),
            EventKind::PlayerLoadout => Event::PlayerLoadout(PlayerLoadoutEvent {
                base,
                player: self.player(4, 5, Some(7), "player_id")?,
                class: self.text(6),
                items: self
                    .raw
                    .iter()
                    .skip(LOADOUT_ITEMS)
                    .filter(|item| !item.trim().is_empty())
                    .map(|item| Weapon {
                        name: unescape(item),
                        item_def_index: None,
                    })
                    .collect(),
            }),
            EventKind::WeaponStats => Event::WeaponStats(WeaponStatsEvent {
                base,
                player: self.player(4, 5, Some(10), "player_id")?,
                weapon: Weapon {
                    name: self.text(6),
                    item_def_index: None,
                },
                shots: self.optional_int(7, "shots")?.unwrap_or(0),
                hits: self.optional_int(8, "hits")?.unwrap_or(0),
                damage: self.optional_int(9, "damage")?.unwrap_or(0),
            }),
            EventKind::ClassChange => Event::ClassChange(ClassChangeEvent {
                base,
                player: self.player(4, 5, Some(7), "player_id")?,
                class: self.text(6),
                previous_class: None,
            }),
            EventKind::MatchStart => Event::MatchStart(self.match_start(base)),
            EventKind::RoundStart => Event::RoundStart(self.match_start(base)),
            EventKind::MatchEnd => Event::MatchEnd(self.match_end(base)?),
            EventKind::RoundEnd => Event::RoundEnd(self.match_end(base)?),
        };

        Ok(event)
    }

    fn base(&self) -> Result<BaseEvent, DecodeFailure> {
        let value = self.raw[1].trim();
        let timestamp = value
            .parse::<i64>()
            .ok()
            .and_then(timestamp_from_unix)
            .ok_or_else(|| DecodeFailure::InvalidTimestamp {
                value: value.to_string(),
            })?;

        Ok(BaseEvent {
            timestamp,
            gamemode: self.text(2),
            server: self.text(3),
        })
    }

    fn medic(&self, base: BaseEvent) -> Result<MedicEvent, DecodeFailure> {
        Ok(MedicEvent {
            base,
            medic: self.player(4, 5, None, "medic_id")?,
            medigun: self.optional_text(6),
            target: self.optional_player(7, 8),
        })
    }

    fn jump(&self, base: BaseEvent) -> Result<JumpEvent, DecodeFailure> {
        Ok(JumpEvent {
            base,
            player: self.player(4, 5, Some(8), "player_id")?,
            height: self.optional_float(6, "height")?,
            distance: self.optional_float(7, "distance")?,
        })
    }

    fn jump_kill(&self, base: BaseEvent) -> Result<JumpKillEvent, DecodeFailure> {
        Ok(JumpKillEvent {
            base,
            killer: self.player(4, 5, Some(10), "killer_id")?,
            victim: self.player(6, 7, Some(11), "victim_id")?,
            weapon: Weapon {
                name: self.text(8),
                item_def_index: None,
            },
            height: self.optional_float(9, "height")?,
        })
    }

    fn teleport(&self, base: BaseEvent) -> Result<TeleportEvent, DecodeFailure> {
        Ok(TeleportEvent {
            base,
            player: self.player(4, 5, None, "player_id")?,
            builder: self.optional_player(6, 7),
        })
    }

    fn food(&self, base: BaseEvent) -> Result<FoodEvent, DecodeFailure> {
        Ok(FoodEvent {
            base,
            player: self.player(4, 5, None, "player_id")?,
            amount: self.optional_int(6, "amount")?,
            target: self.optional_player(7, 8),
        })
    }

    fn mvp(&self, base: BaseEvent) -> Result<MvpEvent, DecodeFailure> {
        Ok(MvpEvent {
            base,
            player: self.player(4, 5, Some(7), "player_id")?,
            score: self.optional_int(6, "score")?,
        })
    }

    fn match_start(&self, base: BaseEvent) -> MatchStartEvent {
        MatchStartEvent {
            base,
            map: self.optional_text(4),
        }
    }

    fn match_end(&self, base: BaseEvent) -> Result<MatchEndEvent, DecodeFailure> {
        Ok(MatchEndEvent {
            base,
            winner_team: self.int(4, "winner_team")?,
            duration: self.optional_int(5, "duration")?,
            red_score: self.optional_int(6, "red_score")?,
            blu_score: self.optional_int(7, "blu_score")?,
        })
    }

    fn value(&self, index: usize) -> &'a str {
        self.raw.get(index).copied().unwrap_or_default()
    }

    fn text(&self, index: usize) -> String {
        unescape(self.value(index))
    }

    fn optional_text(&self, index: usize) -> Option<String> {
        let value = self.value(index);
        (!value.is_empty()).then(|| unescape(value))
    }

    fn player(
        &self,
        id_index: usize,
        name_index: usize,
        team_index: Option<usize>,
        field: &'static str,
    ) -> Result<PlayerRef, DecodeFailure> {
        let steam_id = self.text(id_index);
        if steam_id.is_empty() {
            return Err(DecodeFailure::MissingField { field });
        }
        let team = match team_index {
            Some(index) => self.optional_int(index, "team")?.unwrap_or_default(),
            None => 0,
        };
        Ok(PlayerRef::new(steam_id, self.text(name_index), team))
    }

    fn optional_player(&self, id_index: usize, name_index: usize) -> Option<PlayerRef> {
        self.optional_text(id_index)
            .map(|steam_id| PlayerRef::new(steam_id, self.text(name_index), 0))
    }

    fn int(&self, index: usize, field: &'static str) -> Result<i32, DecodeFailure> {
        let value = self.value(index);
        value
            .trim()
            .parse()
            .map_err(|_| DecodeFailure::NotNumeric {
                field,
                value: value.to_string(),
            })
    }

    fn optional_int(&self, index: usize, field: &'static str) -> Result<Option<i32>, DecodeFailure> {
        if self.value(index).trim().is_empty() {
            return Ok(None);
        }
        self.int(index, field).map(Some)
    }

    fn optional_float(
        &self,
        index: usize,
        field: &'static str,
    ) -> Result<Option<f64>, DecodeFailure> {
        let value = self.value(index);
        if value.trim().is_empty() {
            return Ok(None);
        }
        value
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| DecodeFailure::NotNumeric {
                field,
                value: value.to_string(),
            })
    }

    fn flag(&self, index: usize, field: &'static str) -> Result<bool, DecodeFailure> {
        self.int(index, field).map(|value| value != 0)
    }

    fn optional_flag(&self, index: usize, field: &'static str) -> Result<bool, DecodeFailure> {
        Ok(self.optional_int(index, field)?.unwrap_or(0) != 0)
    }
}

/// Encode an event in the delimited format.
///
/// Fields the layout has no slot for (positions, item indices, first blood,
/// previous class, team of optional players) are dropped, and timestamps
/// are truncated to whole seconds.
pub fn encode(event: &Event) -> String {
    let base = event.base();
    let mut fields = vec![
        event.kind().mnemonic().to_string(),
        base.timestamp.timestamp().to_string(),
        escape(&base.gamemode),
        escape(&base.server),
    ];

    match event {
        Event::Kill(e) => {
            push_player(&mut fields, &e.killer);
            push_player(&mut fields, &e.victim);
            fields.push(escape(&e.weapon.name));
            fields.push(flag(e.crit));
            fields.push(flag(e.airborne));
            fields.push(e.killer.team.to_string());
            fields.push(e.victim.team.to_string());
            fields.push(flag(e.headshot));
            fields.push(flag(e.backstab));
            push_optional_player(&mut fields, e.assister.as_ref());
        }
        Event::Airshot(e) => {
            push_player(&mut fields, &e.player);
            push_player(&mut fields, &e.victim);
            fields.push(escape(&e.weapon.name));
            fields.push(flag(e.air2air));
            fields.push(optional(e.height));
            fields.push(e.player.team.to_string());
            fields.push(e.victim.team.to_string());
        }
        Event::Deflect(e) => {
            push_player(&mut fields, &e.player);
            fields.push(optional(e.rocket_speed));
            fields.push(optional(e.deflect_angle));
            fields.push(optional(e.timing_ms));
            fields.push(optional(e.distance));
            fields.push(e.projectile_type.as_deref().map(escape).unwrap_or_default());
            push_optional_player(&mut fields, e.owner.as_ref());
            fields.push(e.player.team.to_string());
        }
        Event::Stun(e) => {
            push_player(&mut fields, &e.player);
            push_player(&mut fields, &e.victim);
            fields.push(optional(e.duration));
            fields.push(flag(e.big_stun));
        }
        Event::Healed(e) => {
            push_player(&mut fields, &e.healer);
            push_player(&mut fields, &e.target);
            fields.push(e.amount.to_string());
        }
        Event::Jarate(e) => {
            push_player(&mut fields, &e.player);
            push_player(&mut fields, &e.victim);
            fields.push(e.item.as_deref().map(escape).unwrap_or_default());
        }
        Event::ShieldBlocked(e) => {
            push_player(&mut fields, &e.player);
            fields.push(optional(e.damage));
            push_optional_player(&mut fields, e.attacker.as_ref());
        }
        Event::RocketJump(e) | Event::StickyJump(e) => {
            push_player(&mut fields, &e.player);
            fields.push(optional(e.height));
            fields.push(optional(e.distance));
            fields.push(e.player.team.to_string());
        }
        Event::RocketJumpKill(e) | Event::StickyJumpKill(e) => {
            push_player(&mut fields, &e.killer);
            push_player(&mut fields, &e.victim);
            fields.push(escape(&e.weapon.name));
            fields.push(optional(e.height));
            fields.push(e.killer.team.to_string());
            fields.push(e.victim.team.to_string());
        }
        Event::Teleport(e) | Event::TeleportUsed(e) => {
            push_player(&mut fields, &e.player);
            push_optional_player(&mut fields, e.builder.as_ref());
        }
        Event::BuiltObject(e) => {
            push_player(&mut fields, &e.player);
            fields.push(escape(&e.object));
            fields.push(e.player.team.to_string());
        }
        Event::KilledObject(e) => {
            push_player(&mut fields, &e.attacker);
            fields.push(escape(&e.object));
            push_optional_player(&mut fields, e.owner.as_ref());
            fields.push(
                e.weapon
                    .as_ref()
                    .map(|weapon| escape(&weapon.name))
                    .unwrap_or_default(),
            );
        }
        Event::DefendedMedic(e) => {
            push_player(&mut fields, &e.player);
            push_player(&mut fields, &e.medic);
            fields.push(e.player.team.to_string());
        }
        Event::BuffDeployed(e) => {
            push_player(&mut fields, &e.player);
            fields.push(e.buff_type.as_deref().map(escape).unwrap_or_default());
            fields.push(e.player.team.to_string());
        }
        Event::Sandvich(e) | Event::Dalokohs(e) | Event::Steak(e) => {
            push_player(&mut fields, &e.player);
            fields.push(optional(e.amount));
            push_optional_player(&mut fields, e.target.as_ref());
        }
        Event::Mvp1(e) | Event::Mvp2(e) | Event::Mvp3(e) => {
            push_player(&mut fields, &e.player);
            fields.push(optional(e.score));
            fields.push(e.player.team.to_string());
        }
        Event::PlayerLoadout(e) => {
            push_player(&mut fields, &e.player);
            fields.push(escape(&e.class));
            fields.push(e.player.team.to_string());
            fields.extend(e.items.iter().map(|item| escape(&item.name)));
        }
        Event::WeaponStats(e) => {
            push_player(&mut fields, &e.player);
            fields.push(escape(&e.weapon.name));
            fields.push(e.shots.to_string());
            fields.push(e.hits.to_string());
            fields.push(e.damage.to_string());
            fields.push(e.player.team.to_string());
        }
        Event::UberDeployed(e) | Event::UberDropped(e) => {
            push_player(&mut fields, &e.medic);
            fields.push(e.medigun.as_deref().map(escape).unwrap_or_default());
            push_optional_player(&mut fields, e.target.as_ref());
        }
        Event::ClassChange(e) => {
            push_player(&mut fields, &e.player);
            fields.push(escape(&e.class));
            fields.push(e.player.team.to_string());
        }
        Event::MatchStart(e) | Event::RoundStart(e) => {
            fields.push(e.map.as_deref().map(escape).unwrap_or_default());
        }
        Event::MatchEnd(e) | Event::RoundEnd(e) => {
            fields.push(e.winner_team.to_string());
            fields.push(optional(e.duration));
            fields.push(optional(e.red_score));
            fields.push(optional(e.blu_score));
        }
    }

    fields.join("|")
}

fn push_player(fields: &mut Vec<String>, player: &PlayerRef) {
    fields.push(escape(&player.steam_id));
    fields.push(escape(&player.name));
}

fn push_optional_player(fields: &mut Vec<String>, player: Option<&PlayerRef>) {
    match player {
        Some(player) => push_player(fields, player),
        None => fields.extend([String::new(), String::new()]),
    }
}

fn flag(value: bool) -> String {
    let digit = if value { "1" } else { "0" };
    digit.to_string()
}

fn optional<T: ToString>(value: Option<T>) -> String {
    value.map(|v| v.to_string()).unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    const KILL_LINE: &str =
        "KILL|1706788800|default|192.168.1.100|76561198000000001|Scout\\pMain|76561198000000002|Victim|scattergun|1|0";

    fn decode_ok(line: &str) -> Event {
        decode(line).unwrap().unwrap()
    }

    #[test]
    fn test_kill_line_with_escaped_delimiter() {
        let Event::Kill(kill) = decode_ok(KILL_LINE) else {
            panic!("expected a kill");
        };
        assert_eq!(kill.base.timestamp, Utc.with_ymd_and_hms(2024, 2, 1, 12, 0, 0).unwrap());
        assert_eq!(kill.base.gamemode, "default");
        assert_eq!(kill.base.server, "192.168.1.100");
        assert_eq!(kill.killer.name, "Scout|Main");
        assert_eq!(kill.victim.steam_id, "76561198000000002");
        assert_eq!(kill.weapon.name, "scattergun");
        assert!(kill.crit);
        assert!(!kill.airborne);
        assert_eq!(kill.assister, None);
        assert_eq!(kill.killer.team, 0);
    }

    #[test]
    fn test_kill_optional_tail() {
        let line = format!("{}|2|3|1|0|76561198000000003|Medic", KILL_LINE);
        let Event::Kill(kill) = decode_ok(&line) else {
            panic!("expected a kill");
        };
        assert_eq!(kill.killer.team, 2);
        assert_eq!(kill.victim.team, 3);
        assert!(kill.headshot);
        assert!(!kill.backstab);
        assert_eq!(
            kill.assister,
            Some(PlayerRef::new("76561198000000003", "Medic", 0))
        );
    }

    #[test]
    fn test_too_few_fields() {
        let err = decode("KILL|1706788800|default").unwrap_err();
        assert_eq!(
            err.reason,
            DecodeFailure::TooFewFields {
                found: 3,
                minimum: 4
            }
        );
    }

    #[test]
    fn test_kind_specific_count() {
        let err = decode("KILL|1706788800|default|srv|1|A|2|B").unwrap_err();
        assert_eq!(
            err.reason,
            DecodeFailure::MissingFields {
                kind: EventKind::Kill,
                required: 11,
                found: 8
            }
        );
    }

    #[test]
    fn test_non_numeric_field_is_named() {
        let line = KILL_LINE.replace("|1|0", "|yes|0");
        let err = decode(&line).unwrap_err();
        assert_eq!(
            err.reason,
            DecodeFailure::NotNumeric {
                field: "crit",
                value: "yes".to_string()
            }
        );
    }

    #[test]
    fn test_bad_timestamp() {
        let err = decode("MATCH_START|noon|default|srv|cp_badlands").unwrap_err();
        assert!(matches!(err.reason, DecodeFailure::InvalidTimestamp { .. }));
    }

    #[test]
    fn test_unknown_tag_is_skipped() {
        assert_eq!(decode("CHAT_MESSAGE|1706788800|default|srv|x").unwrap(), None);
    }

    #[test]
    fn test_malformed_tag_is_an_error() {
        let err = decode("kill me|1706788800|default|srv").unwrap_err();
        assert!(matches!(err.reason, DecodeFailure::MalformedTag { .. }));
    }

    #[test]
    fn test_deflect_empty_measurements_are_absent() {
        let Event::Deflect(deflect) = decode_ok("DEFLECT|1706788800|mge|srv|7|Pyro|1500.5||50|0") else {
            panic!("expected a deflect");
        };
        assert_eq!(deflect.rocket_speed, Some(1500.5));
        assert_eq!(deflect.deflect_angle, None);
        assert_eq!(deflect.timing_ms, Some(50));
        assert_eq!(deflect.distance, Some(0.0));
        assert_eq!(deflect.owner, None);
    }

    #[test]
    fn test_blank_numeric_fields_are_absent() {
        let Event::Deflect(deflect) = decode_ok("DEFLECT|1706788800|mge|srv|7|Pyro|  | \t|50|") else {
            panic!("expected a deflect");
        };
        assert_eq!(deflect.rocket_speed, None);
        assert_eq!(deflect.deflect_angle, None);
        assert_eq!(deflect.distance, None);

        let Event::MatchEnd(end) = decode_ok("MATCH_END|1706789400|default|srv|3| |2| ") else {
            panic!("expected a match end");
        };
        assert_eq!(end.duration, None);
        assert_eq!(end.red_score, Some(2));
        assert_eq!(end.blu_score, None);
    }

    #[test]
    fn test_jump_kill_line() {
        let line = "STICKY_JUMP_KILL|1706788800|default|srv|5|Demo|6|Medic|ullapool_caber|220.5|2|3";
        let Event::StickyJumpKill(kill) = decode_ok(line) else {
            panic!("expected a sticky jump kill");
        };
        assert_eq!(kill.killer.team, 2);
        assert_eq!(kill.victim.team, 3);
        assert_eq!(kill.weapon.name, "ullapool_caber");
        assert_eq!(kill.height, Some(220.5));
        assert_eq!(encode(&Event::StickyJumpKill(kill)), line);
    }

    #[test]
    fn test_loadout_items_run_to_end_of_line() {
        let line = "PLAYER_LOADOUT|1706788800|default|srv|9|Heavy|heavy|3|minigun|sandvich||fists";
        let Event::PlayerLoadout(loadout) = decode_ok(line) else {
            panic!("expected a loadout");
        };
        assert_eq!(loadout.player.team, 3);
        let names: Vec<&str> = loadout.items.iter().map(|item| item.name.as_str()).collect();
        assert_eq!(names, ["minigun", "sandvich", "fists"]);
    }

    #[test]
    fn test_weapon_stats_and_food() {
        let Event::WeaponStats(stats) = decode_ok("WEAPON_STATS|1706788800|default|srv|4|Sniper|sniperrifle|10|6") else {
            panic!("expected weapon stats");
        };
        assert_eq!((stats.shots, stats.hits, stats.damage), (10, 6, 0));

        let Event::Sandvich(food) = decode_ok("SANDVICH|1706788800|default|srv|9|Heavy|150|4|Sniper") else {
            panic!("expected a sandvich");
        };
        assert_eq!(food.amount, Some(150));
        assert_eq!(food.target.map(|p| p.name), Some("Sniper".to_string()));

        let err = decode("MVP1|1706788800|default|srv|9").unwrap_err();
        assert_eq!(
            err.reason,
            DecodeFailure::MissingFields {
                kind: EventKind::Mvp1,
                required: 6,
                found: 5
            }
        );
    }

    #[test]
    fn test_match_end() {
        let Event::MatchEnd(end) = decode_ok("MATCH_END|1706789400|default|srv|2|600|3|1") else {
            panic!("expected a match end");
        };
        assert_eq!(end.winner_team, 2);
        assert_eq!(end.duration, Some(600));
        assert_eq!(end.red_score, Some(3));
        assert_eq!(end.blu_score, Some(1));
    }

    #[test]
    fn test_round_start_without_map() {
        let event = decode_ok("ROUND_START|1706788800|default|srv|");
        assert_eq!(event.kind(), EventKind::RoundStart);
        let Event::RoundStart(start) = event else {
            unreachable!()
        };
        assert_eq!(start.map, None);
    }

    #[test]
    fn test_missing_player_id() {
        let err = decode("HEALED|1706788800|default|srv||Medic|5|Heavy|120").unwrap_err();
        assert_eq!(err.reason, DecodeFailure::MissingField { field: "healer_id" });
    }

    #[test]
    fn test_unescape_order() {
        assert_eq!(unescape("a\\pb"), "a|b");
        assert_eq!(unescape("line\\nbreak"), "line\nbreak");
        assert_eq!(unescape("back\\\\slash"), "back\\slash");
        // literal backslash + p is read back as an escaped delimiter
        assert_eq!(unescape(&escape("\\p")), "\\|");
    }

    #[test]
    fn test_encode_reproduces_line() {
        let event = decode_ok(KILL_LINE);
        let encoded = encode(&event);
        assert!(encoded.starts_with(KILL_LINE));
        assert_eq!(decode_ok(&encoded), event);
    }
}
