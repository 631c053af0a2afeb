//! Routing of decoded events into storage, the lifecycle tracker and the rating engine

use crate::decoder;
use crate::error::{PipelineError, Result, StorageError};
use crate::events::{Event, EventCategory, EventKind, MatchEndEvent, PlayerRef};
use crate::lifecycle::{Attribution, MatchTracker};
use crate::metrics::MetricsCollector;
use crate::rating::{MatchOutcome, RatingCalculator};
use crate::storage::Storage;
use crate::types::{
    AirshotDetail, DeflectDetail, DetailRecord, HealDetail, KillDetail, MatchId, MatchRecord,
    MatchResult, PlayerId, RatingDeltaRecord, RawEventId, RosterEntry, StunDetail, TeamSides,
    NO_SIDE,
};
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

/// What happened to a payload
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessOutcome {
    /// Comment, blank line or unknown kind; nothing stored
    Skipped,
    Processed(EventKind),
}

/// How a match close affected ratings
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Settlement {
    Rated { players: usize },
    AlreadyRated,
    NoWinner,
    EmptyRoster,
}

/// Applies decoded events to storage.
///
/// Shared by every topic consumer; all cross-topic coordination goes through
/// the tracker's per-server slots and the rating gate.
pub struct EventProcessor {
    storage: Arc<dyn Storage>,
    tracker: MatchTracker,
    calculator: Arc<dyn RatingCalculator>,
    /// Serializes roster capture, rating and write-back across match closes
    rating_gate: Mutex<()>,
    sides: TeamSides,
    metrics: Option<Arc<MetricsCollector>>,
}

impl EventProcessor {
    pub fn new(
        storage: Arc<dyn Storage>,
        calculator: Arc<dyn RatingCalculator>,
        sides: TeamSides,
    ) -> Self {
        Self {
            tracker: MatchTracker::new(storage.clone()),
            storage,
            calculator,
            rating_gate: Mutex::new(()),
            sides,
            metrics: None,
        }
    }

    pub fn with_metrics(mut self, metrics: Arc<MetricsCollector>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn storage(&self) -> Arc<dyn Storage> {
        self.storage.clone()
    }

    pub fn tracker(&self) -> &MatchTracker {
        &self.tracker
    }

    /// Decode and apply one delivery payload.
    ///
    /// Decode failures come back as a [`DecodeError`](crate::error::DecodeError)
    /// inside the returned error so callers can dead-letter them.
    pub async fn process_payload(&self, payload: &[u8]) -> Result<ProcessOutcome> {
        match decoder::decode(payload)? {
            Some(event) => {
                self.process_event(&event, Utc::now()).await?;
                Ok(ProcessOutcome::Processed(event.kind()))
            }
            None => Ok(ProcessOutcome::Skipped),
        }
    }

    /// Store an event, route it by kind, then mark it processed
    pub async fn process_event(&self, event: &Event, received_at: DateTime<Utc>) -> Result<()> {
        let event_id = self.storage.insert_raw_event(event, received_at).await?;

        match event.kind().category() {
            EventCategory::Gameplay => self.handle_gameplay(event, event_id).await?,
            EventCategory::Start => self.handle_start(event).await?,
            EventCategory::End => self.handle_end(event).await?,
        }

        self.storage.mark_event_processed(event_id).await
    }

    async fn handle_gameplay(&self, event: &Event, event_id: RawEventId) -> Result<()> {
        let base = event.base();

        let (record, attribution) = self
            .tracker
            .acquire(&base.server)
            .await?
            .match_for_event(&base.gamemode, base.timestamp)
            .await?;

        if let Some(metrics) = &self.metrics {
            match attribution {
                Attribution::Late => metrics.record_late_event(),
                Attribution::Implicit => metrics.record_match_opened("implicit"),
                Attribution::Open => {}
            }
        }

        let players = self
            .register_players(event.players(), record.id, base.timestamp)
            .await?;

        if let Some(detail) = detail_record(event, event_id, record.id, &players)? {
            self.storage.insert_detail(detail).await?;
        }

        debug!(
            "{} on {} recorded against match {}",
            event.kind(),
            base.server,
            record.id
        );
        Ok(())
    }

    /// Resolve every mentioned player and register those with a known team
    async fn register_players(
        &self,
        players: Vec<&PlayerRef>,
        match_id: MatchId,
        seen_at: DateTime<Utc>,
    ) -> Result<HashMap<String, PlayerId>> {
        let mut ids = HashMap::with_capacity(players.len());

        for player in players {
            let record = self.storage.get_or_create_player(player, seen_at).await?;
            if player.team != NO_SIDE {
                self.storage
                    .add_match_participant(match_id, record.id, player.team)
                    .await?;
            }
            ids.insert(player.steam_id.clone(), record.id);
        }

        Ok(ids)
    }

    async fn handle_start(&self, event: &Event) -> Result<()> {
        let start = match event {
            Event::MatchStart(start) | Event::RoundStart(start) => start,
            _ => return Ok(()),
        };

        let slot = self.tracker.acquire(&start.base.server).await?;
        let opening = slot.current_match().await?.is_none();
        let record = slot
            .begin(start.map.clone(), &start.base.gamemode, start.base.timestamp)
            .await?;

        if opening {
            if let Some(metrics) = &self.metrics {
                metrics.record_match_opened("start");
            }
        }
        debug!("{} on {} -> match {}", event.kind(), slot.server(), record.id);
        Ok(())
    }

    async fn handle_end(&self, event: &Event) -> Result<()> {
        let end = match event {
            Event::MatchEnd(end) | Event::RoundEnd(end) => end,
            _ => return Ok(()),
        };

        let slot = self.tracker.acquire(&end.base.server).await?;

        let Some(open) = slot.current_match().await? else {
            match slot.last_closed_match().await? {
                Some(closed) => info!(
                    "Duplicate {} on {}: match {} is already closed",
                    event.kind(),
                    slot.server(),
                    closed.id
                ),
                None => info!(
                    "{} on {} with no open match, ignoring",
                    event.kind(),
                    slot.server()
                ),
            }
            if let Some(metrics) = &self.metrics {
                metrics.record_orphan_end();
            }
            return Ok(());
        };

        let settlement = self.settle_ratings(&open, end).await?;
        debug!("Match {} settlement: {:?}", open.id, settlement);

        let result = MatchResult::new(end.base.timestamp, end.winner_team)
            .with_scores(end.red_score, end.blu_score);
        let outcome = slot.close(open.id, result).await?;

        if let (Some(metrics), crate::types::CloseOutcome::Closed(record)) =
            (&self.metrics, &outcome)
        {
            metrics.record_match_closed(record.duration_seconds);
        }

        Ok(())
    }

    /// Apply ratings for a match that is about to close.
    ///
    /// Both rosters are read once under the rating gate and the deltas are
    /// computed against that snapshot. New ratings and deltas are written in
    /// one storage call, so a match with recorded deltas is never rated again
    /// even when an earlier attempt failed after settling.
    pub async fn settle_ratings(
        &self,
        record: &MatchRecord,
        end: &MatchEndEvent,
    ) -> Result<Settlement> {
        let _gate = self.rating_gate.lock().await;

        if !self.storage.fetch_rating_deltas(record.id).await?.is_empty() {
            warn!("Match {} already has rating deltas, skipping", record.id);
            self.record_skip("already_rated");
            return Ok(Settlement::AlreadyRated);
        }

        let red = self
            .storage
            .fetch_team_roster(record.id, self.sides.red)
            .await?;
        let blu = self
            .storage
            .fetch_team_roster(record.id, self.sides.blu)
            .await?;

        let outcome = if end.winner_team == self.sides.red {
            Some(MatchOutcome::TeamAWins)
        } else if end.winner_team == self.sides.blu {
            Some(MatchOutcome::TeamBWins)
        } else {
            None
        };

        let Some(outcome) = outcome else {
            info!(
                "Match {} ended without a winning side ({}), ratings unchanged",
                record.id, end.winner_team
            );
            self.record_unchanged(record.id, red.iter().chain(blu.iter()))
                .await?;
            self.record_skip("no_winner");
            return Ok(Settlement::NoWinner);
        };

        if red.is_empty() || blu.is_empty() {
            info!(
                "Match {} has an empty roster (red: {}, blu: {}), ratings unchanged",
                record.id,
                red.len(),
                blu.len()
            );
            self.record_unchanged(record.id, red.iter().chain(blu.iter()))
                .await?;
            self.record_skip("empty_roster");
            return Ok(Settlement::EmptyRoster);
        }

        let started = Instant::now();
        let changes = self.calculator.rate(&red, &blu, outcome).map_err(|e| {
            PipelineError::RatingCalculationFailed {
                reason: format!("match {}: {}", record.id, e),
            }
        })?;

        let records = changes
            .all()
            .map(|delta| RatingDeltaRecord {
                match_id: record.id,
                player_id: delta.player_id,
                rating_before: delta.rating_before,
                rating_after: delta.rating_after,
                change: delta.applied_change(),
            })
            .collect();
        if !self.apply(record.id, records, true).await? {
            return Ok(Settlement::AlreadyRated);
        }

        let applied: Vec<(f64, i32)> = changes
            .all()
            .map(|delta| (delta.change, delta.rating_after))
            .collect();

        if let Some(metrics) = &self.metrics {
            metrics.record_match_rated(&applied, started.elapsed());
        }
        info!(
            "Rated match {} ({} vs {} players, winner: {})",
            record.id,
            red.len(),
            blu.len(),
            end.winner_team
        );

        Ok(Settlement::Rated {
            players: applied.len(),
        })
    }

    async fn record_unchanged<'a>(
        &self,
        match_id: MatchId,
        roster: impl Iterator<Item = &'a RosterEntry>,
    ) -> Result<()> {
        let records: Vec<RatingDeltaRecord> = roster
            .map(|entry| RatingDeltaRecord {
                match_id,
                player_id: entry.player_id,
                rating_before: entry.rating,
                rating_after: entry.rating,
                change: 0,
            })
            .collect();
        if !records.is_empty() {
            self.apply(match_id, records, false).await?;
        }
        Ok(())
    }

    /// Write a settlement; `false` if the match was settled in the meantime
    async fn apply(
        &self,
        match_id: MatchId,
        records: Vec<RatingDeltaRecord>,
        update_players: bool,
    ) -> Result<bool> {
        match self
            .storage
            .apply_match_ratings(match_id, records, update_players)
            .await
        {
            Ok(()) => Ok(true),
            Err(e) => match e.downcast_ref::<StorageError>() {
                Some(StorageError::AlreadyRated { .. }) => {
                    warn!("Match {} was settled concurrently, skipping", match_id);
                    self.record_skip("already_rated");
                    Ok(false)
                }
                _ => Err(e),
            },
        }
    }

    fn record_skip(&self, reason: &str) {
        if let Some(metrics) = &self.metrics {
            metrics.record_rating_skipped(reason);
        }
    }
}

fn lookup(players: &HashMap<String, PlayerId>, player: &PlayerRef) -> Result<PlayerId> {
    players.get(&player.steam_id).copied().ok_or_else(|| {
        PipelineError::InternalError {
            message: format!("player {} was not resolved", player.steam_id),
        }
        .into()
    })
}

fn lookup_optional(
    players: &HashMap<String, PlayerId>,
    player: Option<&PlayerRef>,
) -> Result<Option<PlayerId>> {
    player.map(|p| lookup(players, p)).transpose()
}

/// Kind-specific row for the event, if the kind has one
fn detail_record(
    event: &Event,
    event_id: RawEventId,
    match_id: MatchId,
    players: &HashMap<String, PlayerId>,
) -> Result<Option<DetailRecord>> {
    let detail = match event {
        Event::Kill(e) => DetailRecord::Kill(KillDetail {
            event_id,
            match_id,
            killer_id: lookup(players, &e.killer)?,
            victim_id: lookup(players, &e.victim)?,
            assister_id: lookup_optional(players, e.assister.as_ref())?,
            weapon: e.weapon.name.clone(),
            item_def_index: e.weapon.item_def_index,
            crit: e.crit,
            airborne: e.airborne,
            headshot: e.headshot,
            backstab: e.backstab,
            first_blood: e.first_blood,
            killer_pos: e.killer_pos,
            victim_pos: e.victim_pos,
            occurred_at: e.base.timestamp,
        }),
        Event::Airshot(e) => DetailRecord::Airshot(AirshotDetail {
            event_id,
            match_id,
            player_id: lookup(players, &e.player)?,
            victim_id: lookup(players, &e.victim)?,
            weapon: e.weapon.name.clone(),
            air2air: e.air2air,
            height: e.height,
            occurred_at: e.base.timestamp,
        }),
        Event::Deflect(e) => DetailRecord::Deflect(DeflectDetail {
            event_id,
            match_id,
            player_id: lookup(players, &e.player)?,
            owner_id: lookup_optional(players, e.owner.as_ref())?,
            projectile_type: e.projectile_type.clone(),
            rocket_speed: e.rocket_speed,
            deflect_angle: e.deflect_angle,
            timing_ms: e.timing_ms,
            distance: e.distance,
            occurred_at: e.base.timestamp,
        }),
        Event::Stun(e) => DetailRecord::Stun(StunDetail {
            event_id,
            match_id,
            player_id: lookup(players, &e.player)?,
            victim_id: lookup(players, &e.victim)?,
            duration: e.duration,
            big_stun: e.big_stun,
            occurred_at: e.base.timestamp,
        }),
        Event::Healed(e) => DetailRecord::Heal(HealDetail {
            event_id,
            match_id,
            healer_id: lookup(players, &e.healer)?,
            target_id: lookup(players, &e.target)?,
            amount: e.amount,
            occurred_at: e.base.timestamp,
        }),
        _ => return Ok(None),
    };

    Ok(Some(detail))
}
