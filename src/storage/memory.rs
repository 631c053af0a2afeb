//! In-memory storage implementation

use crate::decoder::structured;
use crate::error::{PipelineError, Result, StorageError};
use crate::events::{Event, PlayerRef};
use crate::storage::Storage;
use crate::types::{
    CloseOutcome, DetailRecord, MatchId, MatchRecord, MatchResult, NewMatch, PlayerId,
    PlayerRecord, RatingDeltaRecord, RawEventId, RawEventRecord, RosterEntry,
};
use crate::utils::{generate_match_id, generate_player_id};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};
use tracing::debug;
use uuid::Uuid;

#[derive(Debug, Default)]
struct Inner {
    players: HashMap<PlayerId, PlayerRecord>,
    players_by_steam_id: HashMap<String, PlayerId>,
    matches: HashMap<MatchId, MatchRecord>,
    raw_events: HashMap<RawEventId, RawEventRecord>,
    details: Vec<DetailRecord>,
    /// (player, side) in registration order
    participants: HashMap<MatchId, Vec<(PlayerId, i32)>>,
    rating_deltas: HashMap<MatchId, Vec<RatingDeltaRecord>>,
}

/// Storage backed by process memory; used by tests and the `decode` tooling
#[derive(Debug)]
pub struct InMemoryStorage {
    inner: RwLock<Inner>,
    initial_rating: i32,
}

impl InMemoryStorage {
    /// Create an empty store; new players start at `initial_rating`
    pub fn new(initial_rating: i32) -> Self {
        Self {
            inner: RwLock::new(Inner::default()),
            initial_rating,
        }
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, Inner>> {
        self.inner.read().map_err(|_| {
            PipelineError::InternalError {
                message: "Failed to acquire storage read lock".to_string(),
            }
            .into()
        })
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, Inner>> {
        self.inner.write().map_err(|_| {
            PipelineError::InternalError {
                message: "Failed to acquire storage write lock".to_string(),
            }
            .into()
        })
    }

    /// Player by Steam ID (for inspection)
    pub fn player_by_steam_id(&self, steam_id: &str) -> Result<Option<PlayerRecord>> {
        let inner = self.read()?;
        Ok(inner
            .players_by_steam_id
            .get(steam_id)
            .and_then(|id| inner.players.get(id))
            .cloned())
    }

    /// All matches ever opened on `server`, oldest first
    pub fn matches_for_server(&self, server: &str) -> Result<Vec<MatchRecord>> {
        let inner = self.read()?;
        let mut matches: Vec<MatchRecord> = inner
            .matches
            .values()
            .filter(|record| record.server == server)
            .cloned()
            .collect();
        matches.sort_by_key(|record| record.started_at);
        Ok(matches)
    }

    pub fn raw_events(&self) -> Result<Vec<RawEventRecord>> {
        let inner = self.read()?;
        let mut events: Vec<RawEventRecord> = inner.raw_events.values().cloned().collect();
        events.sort_by_key(|event| event.received_at);
        Ok(events)
    }

    pub fn details_for_match(&self, match_id: MatchId) -> Result<Vec<DetailRecord>> {
        let inner = self.read()?;
        Ok(inner
            .details
            .iter()
            .filter(|detail| detail.match_id() == match_id)
            .cloned()
            .collect())
    }

    pub fn participants(&self, match_id: MatchId) -> Result<Vec<(PlayerId, i32)>> {
        let inner = self.read()?;
        Ok(inner
            .participants
            .get(&match_id)
            .cloned()
            .unwrap_or_default())
    }
}

impl Default for InMemoryStorage {
    fn default() -> Self {
        Self::new(1000)
    }
}

fn match_not_found(match_id: MatchId) -> anyhow::Error {
    StorageError::MatchNotFound { match_id }.into()
}

fn apply_rating(player: &mut PlayerRecord, new_rating: i32) {
    player.rating = new_rating.max(0);
    player.peak_rating = player.peak_rating.max(player.rating);
    player.matches_played += 1;
}

#[async_trait]
impl Storage for InMemoryStorage {
    async fn get_or_create_player(
        &self,
        player: &PlayerRef,
        seen_at: DateTime<Utc>,
    ) -> Result<PlayerRecord> {
        let mut inner = self.write()?;

        if let Some(id) = inner.players_by_steam_id.get(&player.steam_id).copied() {
            if let Some(record) = inner.players.get_mut(&id) {
                record.name = player.name.clone();
                if seen_at > record.last_seen {
                    record.last_seen = seen_at;
                }
                return Ok(record.clone());
            }
        }

        let record = PlayerRecord {
            id: generate_player_id(),
            steam_id: player.steam_id.clone(),
            name: player.name.clone(),
            rating: self.initial_rating,
            peak_rating: self.initial_rating,
            matches_played: 0,
            last_seen: seen_at,
        };
        debug!("Created player {} ({})", record.steam_id, record.id);

        inner
            .players_by_steam_id
            .insert(record.steam_id.clone(), record.id);
        inner.players.insert(record.id, record.clone());

        Ok(record)
    }

    async fn get_player(&self, player_id: PlayerId) -> Result<Option<PlayerRecord>> {
        Ok(self.read()?.players.get(&player_id).cloned())
    }

    async fn find_open_match(&self, server: &str) -> Result<Option<MatchRecord>> {
        Ok(self
            .read()?
            .matches
            .values()
            .find(|record| record.server == server && record.is_open())
            .cloned())
    }

    async fn find_last_closed_match(&self, server: &str) -> Result<Option<MatchRecord>> {
        Ok(self
            .read()?
            .matches
            .values()
            .filter(|record| record.server == server && !record.is_open())
            .max_by_key(|record| record.ended_at)
            .cloned())
    }

    async fn open_match(&self, new_match: NewMatch) -> Result<MatchRecord> {
        let mut inner = self.write()?;

        if let Some(existing) = inner
            .matches
            .values()
            .find(|record| record.server == new_match.server && record.is_open())
        {
            return Err(StorageError::OpenMatchExists {
                server: new_match.server,
                match_id: existing.id,
            }
            .into());
        }

        let record = MatchRecord {
            id: generate_match_id(),
            server: new_match.server,
            map: new_match.map,
            gamemode: new_match.gamemode,
            started_at: new_match.started_at,
            ended_at: None,
            winner_side: None,
            duration_seconds: None,
            red_score: None,
            blu_score: None,
        };
        inner.matches.insert(record.id, record.clone());

        Ok(record)
    }

    async fn refresh_match(
        &self,
        match_id: MatchId,
        map: Option<String>,
        gamemode: String,
    ) -> Result<MatchRecord> {
        let mut inner = self.write()?;
        let record = inner
            .matches
            .get_mut(&match_id)
            .ok_or_else(|| match_not_found(match_id))?;

        if map.is_some() {
            record.map = map;
        }
        record.gamemode = gamemode;

        Ok(record.clone())
    }

    async fn close_match(&self, match_id: MatchId, result: MatchResult) -> Result<CloseOutcome> {
        let mut inner = self.write()?;
        let record = inner
            .matches
            .get_mut(&match_id)
            .ok_or_else(|| match_not_found(match_id))?;

        if !record.is_open() {
            return Ok(CloseOutcome::AlreadyClosed(record.clone()));
        }

        record.ended_at = Some(result.ended_at);
        record.winner_side = Some(result.winner_side);
        record.duration_seconds =
            Some((result.ended_at - record.started_at).num_seconds().max(0));
        record.red_score = result.red_score;
        record.blu_score = result.blu_score;

        Ok(CloseOutcome::Closed(record.clone()))
    }

    async fn insert_raw_event(
        &self,
        event: &Event,
        received_at: DateTime<Utc>,
    ) -> Result<RawEventId> {
        let payload =
            structured::encode(event).map_err(|e| PipelineError::StorageFailed {
                message: format!("Failed to normalize {} event: {}", event.kind(), e),
            })?;

        let base = event.base();
        let record = RawEventRecord {
            id: Uuid::new_v4(),
            kind: event.kind(),
            server: base.server.clone(),
            gamemode: base.gamemode.clone(),
            occurred_at: base.timestamp,
            received_at,
            payload,
            processed: false,
        };
        let id = record.id;

        self.write()?.raw_events.insert(id, record);
        Ok(id)
    }

    async fn mark_event_processed(&self, event_id: RawEventId) -> Result<()> {
        let mut inner = self.write()?;
        let record = inner
            .raw_events
            .get_mut(&event_id)
            .ok_or(StorageError::RawEventNotFound { event_id })?;
        record.processed = true;
        Ok(())
    }

    async fn insert_detail(&self, detail: DetailRecord) -> Result<()> {
        let mut inner = self.write()?;
        if !inner.matches.contains_key(&detail.match_id()) {
            return Err(match_not_found(detail.match_id()));
        }
        inner.details.push(detail);
        Ok(())
    }

    async fn add_match_participant(
        &self,
        match_id: MatchId,
        player_id: PlayerId,
        side: i32,
    ) -> Result<()> {
        let mut inner = self.write()?;
        if !inner.matches.contains_key(&match_id) {
            return Err(match_not_found(match_id));
        }
        if !inner.players.contains_key(&player_id) {
            return Err(StorageError::PlayerNotFound { player_id }.into());
        }

        let participants = inner.participants.entry(match_id).or_default();
        if !participants.iter().any(|(id, _)| *id == player_id) {
            participants.push((player_id, side));
        }
        Ok(())
    }

    async fn fetch_team_roster(&self, match_id: MatchId, side: i32) -> Result<Vec<RosterEntry>> {
        let inner = self.read()?;
        let Some(participants) = inner.participants.get(&match_id) else {
            return Ok(Vec::new());
        };

        let roster = participants
            .iter()
            .filter(|(_, participant_side)| *participant_side == side)
            .filter_map(|(player_id, _)| inner.players.get(player_id))
            .map(|player| RosterEntry {
                player_id: player.id,
                rating: player.rating,
                matches_played: player.matches_played,
            })
            .collect();

        Ok(roster)
    }

    async fn update_player_rating(
        &self,
        player_id: PlayerId,
        new_rating: i32,
    ) -> Result<PlayerRecord> {
        let mut inner = self.write()?;
        let player = inner
            .players
            .get_mut(&player_id)
            .ok_or(StorageError::PlayerNotFound { player_id })?;

        apply_rating(player, new_rating);
        Ok(player.clone())
    }

    async fn record_rating_delta(&self, delta: RatingDeltaRecord) -> Result<()> {
        self.write()?
            .rating_deltas
            .entry(delta.match_id)
            .or_default()
            .push(delta);
        Ok(())
    }

    async fn apply_match_ratings(
        &self,
        match_id: MatchId,
        deltas: Vec<RatingDeltaRecord>,
        update_players: bool,
    ) -> Result<()> {
        let mut inner = self.write()?;

        if !inner.matches.contains_key(&match_id) {
            return Err(match_not_found(match_id));
        }
        if inner
            .rating_deltas
            .get(&match_id)
            .is_some_and(|existing| !existing.is_empty())
        {
            return Err(StorageError::AlreadyRated { match_id }.into());
        }
        // validate before touching anything
        if let Some(missing) = deltas
            .iter()
            .find(|delta| !inner.players.contains_key(&delta.player_id))
        {
            return Err(StorageError::PlayerNotFound {
                player_id: missing.player_id,
            }
            .into());
        }

        if update_players {
            for delta in &deltas {
                if let Some(player) = inner.players.get_mut(&delta.player_id) {
                    apply_rating(player, delta.rating_after);
                }
            }
        }
        inner
            .rating_deltas
            .entry(match_id)
            .or_default()
            .extend(deltas);

        Ok(())
    }

    async fn fetch_rating_deltas(&self, match_id: MatchId) -> Result<Vec<RatingDeltaRecord>> {
        Ok(self
            .read()?
            .rating_deltas
            .get(&match_id)
            .cloned()
            .unwrap_or_default())
    }

    async fn ping(&self) -> Result<()> {
        self.read().map(|_| ())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::{BaseEvent, KillEvent, Weapon};
    use chrono::Duration;

    fn new_match(server: &str, started_at: DateTime<Utc>) -> NewMatch {
        NewMatch {
            server: server.to_string(),
            map: None,
            gamemode: "default".to_string(),
            started_at,
        }
    }

    #[tokio::test]
    async fn test_player_created_once() {
        let storage = InMemoryStorage::new(1200);
        let now = Utc::now();

        let first = storage
            .get_or_create_player(&PlayerRef::new("STEAM_1", "old", 2), now)
            .await
            .unwrap();
        let second = storage
            .get_or_create_player(&PlayerRef::new("STEAM_1", "new", 3), now)
            .await
            .unwrap();

        assert_eq!(first.id, second.id);
        assert_eq!(first.rating, 1200);
        assert_eq!(second.name, "new");
    }

    #[tokio::test]
    async fn test_second_open_match_conflicts() {
        let storage = InMemoryStorage::default();
        let now = Utc::now();

        let open = storage.open_match(new_match("a", now)).await.unwrap();
        let err = storage.open_match(new_match("a", now)).await.unwrap_err();

        assert_eq!(
            err.downcast_ref::<StorageError>(),
            Some(&StorageError::OpenMatchExists {
                server: "a".to_string(),
                match_id: open.id
            })
        );

        // other servers are unaffected
        assert!(storage.open_match(new_match("b", now)).await.is_ok());
    }

    #[tokio::test]
    async fn test_close_is_idempotent() {
        let storage = InMemoryStorage::default();
        let start = Utc::now();
        let record = storage.open_match(new_match("a", start)).await.unwrap();

        let end = start + Duration::seconds(90);
        let closed = storage.close_match(record.id, MatchResult::new(end, 2)).await.unwrap();
        assert!(matches!(closed, CloseOutcome::Closed(_)));
        assert_eq!(closed.record().duration_seconds, Some(90));

        let again = storage
            .close_match(record.id, MatchResult::new(end + Duration::seconds(5), 3))
            .await
            .unwrap();
        assert!(matches!(again, CloseOutcome::AlreadyClosed(_)));
        assert_eq!(again.record().winner_side, Some(2));
        assert_eq!(again.record().ended_at, Some(end));
    }

    #[tokio::test]
    async fn test_duration_clamped_at_zero() {
        let storage = InMemoryStorage::default();
        let start = Utc::now();
        let record = storage.open_match(new_match("a", start)).await.unwrap();

        let closed = storage
            .close_match(record.id, MatchResult::new(start - Duration::seconds(30), 0))
            .await
            .unwrap();
        assert_eq!(closed.record().duration_seconds, Some(0));
    }

    #[tokio::test]
    async fn test_refresh_keeps_known_map() {
        let storage = InMemoryStorage::default();
        let record = storage
            .open_match(new_match("a", Utc::now()))
            .await
            .unwrap();

        let refreshed = storage
            .refresh_match(record.id, Some("cp_badlands".to_string()), "koth".to_string())
            .await
            .unwrap();
        assert_eq!(refreshed.map.as_deref(), Some("cp_badlands"));

        let refreshed = storage
            .refresh_match(record.id, None, "koth".to_string())
            .await
            .unwrap();
        assert_eq!(refreshed.map.as_deref(), Some("cp_badlands"));
    }

    #[tokio::test]
    async fn test_first_side_wins_for_participants() {
        let storage = InMemoryStorage::default();
        let now = Utc::now();
        let record = storage.open_match(new_match("a", now)).await.unwrap();
        let player = storage
            .get_or_create_player(&PlayerRef::new("STEAM_1", "p", 2), now)
            .await
            .unwrap();

        storage
            .add_match_participant(record.id, player.id, 2)
            .await
            .unwrap();
        storage
            .add_match_participant(record.id, player.id, 3)
            .await
            .unwrap();

        assert_eq!(storage.fetch_team_roster(record.id, 2).await.unwrap().len(), 1);
        assert!(storage.fetch_team_roster(record.id, 3).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_rating_update_tracks_peak() {
        let storage = InMemoryStorage::default();
        let player = storage
            .get_or_create_player(&PlayerRef::new("STEAM_1", "p", 2), Utc::now())
            .await
            .unwrap();

        storage.update_player_rating(player.id, 1040).await.unwrap();
        let updated = storage.update_player_rating(player.id, 990).await.unwrap();

        assert_eq!(updated.rating, 990);
        assert_eq!(updated.peak_rating, 1040);
        assert_eq!(updated.matches_played, 2);

        let match_id = Uuid::new_v4();
        storage
            .record_rating_delta(RatingDeltaRecord {
                match_id,
                player_id: player.id,
                rating_before: 1040,
                rating_after: 990,
                change: -50,
            })
            .await
            .unwrap();
        assert_eq!(storage.fetch_rating_deltas(match_id).await.unwrap()[0].change, -50);
    }

    #[tokio::test]
    async fn test_close_keeps_final_scores() {
        let storage = InMemoryStorage::default();
        let start = Utc::now();
        let record = storage.open_match(new_match("a", start)).await.unwrap();
        assert_eq!(record.red_score, None);

        let result =
            MatchResult::new(start + Duration::minutes(30), 3).with_scores(Some(1), Some(3));
        storage.close_match(record.id, result).await.unwrap();

        let closed = storage.find_last_closed_match("a").await.unwrap().unwrap();
        assert_eq!(closed.winner_side, Some(3));
        assert_eq!(closed.red_score, Some(1));
        assert_eq!(closed.blu_score, Some(3));
    }

    fn delta(match_id: MatchId, player: &PlayerRecord, rating_after: i32) -> RatingDeltaRecord {
        RatingDeltaRecord {
            match_id,
            player_id: player.id,
            rating_before: player.rating,
            rating_after,
            change: rating_after - player.rating,
        }
    }

    #[tokio::test]
    async fn test_match_ratings_apply_once() {
        let storage = InMemoryStorage::default();
        let now = Utc::now();
        let record = storage.open_match(new_match("a", now)).await.unwrap();
        let winner = storage
            .get_or_create_player(&PlayerRef::new("STEAM_1", "w", 2), now)
            .await
            .unwrap();
        let loser = storage
            .get_or_create_player(&PlayerRef::new("STEAM_2", "l", 3), now)
            .await
            .unwrap();

        let deltas = vec![delta(record.id, &winner, 1025), delta(record.id, &loser, 975)];
        storage
            .apply_match_ratings(record.id, deltas.clone(), true)
            .await
            .unwrap();

        let err = storage
            .apply_match_ratings(record.id, deltas, true)
            .await
            .unwrap_err();
        assert_eq!(
            err.downcast_ref::<StorageError>(),
            Some(&StorageError::AlreadyRated {
                match_id: record.id
            })
        );

        let winner = storage.get_player(winner.id).await.unwrap().unwrap();
        assert_eq!(winner.rating, 1025);
        assert_eq!(winner.matches_played, 1);
        assert_eq!(storage.fetch_rating_deltas(record.id).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_match_ratings_write_nothing_on_failure() {
        let storage = InMemoryStorage::default();
        let now = Utc::now();
        let record = storage.open_match(new_match("a", now)).await.unwrap();
        let known = storage
            .get_or_create_player(&PlayerRef::new("STEAM_1", "k", 2), now)
            .await
            .unwrap();
        let mut unknown = known.clone();
        unknown.id = Uuid::new_v4();

        let deltas = vec![delta(record.id, &known, 1025), delta(record.id, &unknown, 975)];
        assert!(storage
            .apply_match_ratings(record.id, deltas, true)
            .await
            .is_err());

        let known = storage.get_player(known.id).await.unwrap().unwrap();
        assert_eq!(known.rating, 1000);
        assert_eq!(known.matches_played, 0);
        assert!(storage.fetch_rating_deltas(record.id).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_unchanged_ratings_do_not_count_matches() {
        let storage = InMemoryStorage::default();
        let now = Utc::now();
        let record = storage.open_match(new_match("a", now)).await.unwrap();
        let player = storage
            .get_or_create_player(&PlayerRef::new("STEAM_1", "p", 2), now)
            .await
            .unwrap();

        storage
            .apply_match_ratings(record.id, vec![delta(record.id, &player, 1000)], false)
            .await
            .unwrap();

        let player = storage.get_player(player.id).await.unwrap().unwrap();
        assert_eq!(player.matches_played, 0);
        assert_eq!(storage.fetch_rating_deltas(record.id).await.unwrap()[0].change, 0);
    }

    #[tokio::test]
    async fn test_raw_event_is_normalized() {
        let storage = InMemoryStorage::default();
        let event = Event::Kill(KillEvent {
            base: BaseEvent {
                timestamp: Utc::now(),
                gamemode: "default".to_string(),
                server: "10.0.0.1:27015".to_string(),
            },
            killer: PlayerRef::new("STEAM_1", "a", 2),
            victim: PlayerRef::new("STEAM_2", "b", 3),
            assister: None,
            weapon: Weapon {
                name: "tf_projectile_rocket".to_string(),
                item_def_index: None,
            },
            crit: false,
            airborne: true,
            headshot: false,
            backstab: false,
            first_blood: false,
            killer_pos: None,
            victim_pos: None,
        });

        let id = storage.insert_raw_event(&event, Utc::now()).await.unwrap();
        storage.mark_event_processed(id).await.unwrap();

        let stored = storage.raw_events().unwrap();
        assert_eq!(stored.len(), 1);
        assert!(stored[0].processed);
        assert_eq!(stored[0].payload["event_type"], "kill");
        assert_eq!(stored[0].server, "10.0.0.1:27015");
    }
}
