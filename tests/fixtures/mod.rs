//! Test fixtures and mock implementations for integration testing

#![allow(dead_code)]

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use killfeed::config::{PipelineSettings, RatingConfig};
use killfeed::delivery::{InMemoryBroker, MessageMetadata, Publisher};
use killfeed::error::{PipelineError, Result};
use killfeed::events::{Event, EventKind, PlayerRef};
use killfeed::pipeline::{EventProcessor, PipelineCoordinator};
use killfeed::rating::EloRatingCalculator;
use killfeed::storage::{InMemoryStorage, Storage};
use killfeed::types::{
    CloseOutcome, DetailRecord, MatchId, MatchRecord, MatchResult, NewMatch, PlayerId,
    PlayerRecord, RatingDeltaRecord, RawEventId, RosterEntry, TeamSides,
};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// 2024-02-01 12:00:00 UTC
pub const MATCH_START_TS: i64 = 1_706_788_800;
/// Ten minutes after [`MATCH_START_TS`]
pub const MATCH_END_TS: i64 = MATCH_START_TS + 600;

pub const RED: i32 = 2;
pub const BLU: i32 = 3;

pub const SETTLE_TIMEOUT: Duration = Duration::from_secs(5);

/// Builders for legacy telemetry lines
pub mod lines {
    pub fn match_start(ts: i64, server: &str, map: &str) -> String {
        format!("MATCH_START|{}|default|{}|{}", ts, server, map)
    }

    pub fn match_end_with_scores(ts: i64, server: &str, winner: i32, red: i32, blu: i32) -> String {
        format!("{}|{}|{}", match_end(ts, server, winner), red, blu)
    }

    pub fn match_end(ts: i64, server: &str, winner: i32) -> String {
        format!(
            "MATCH_END|{}|default|{}|{}|{}",
            ts,
            server,
            winner,
            super::MATCH_END_TS - super::MATCH_START_TS
        )
    }

    /// Kill with both sides known
    pub fn kill(ts: i64, server: &str, killer: (&str, i32), victim: (&str, i32)) -> String {
        format!(
            "KILL|{}|default|{}|{}|{}|{}|{}|scattergun|0|0|{}|{}",
            ts,
            server,
            steam_id(killer.0),
            killer.0,
            steam_id(victim.0),
            victim.0,
            killer.1,
            victim.1
        )
    }

    pub fn healed(ts: i64, server: &str, healer: &str, target: &str, amount: i32) -> String {
        format!(
            "HEALED|{}|default|{}|{}|{}|{}|{}|{}",
            ts,
            server,
            steam_id(healer),
            healer,
            steam_id(target),
            target,
            amount
        )
    }

    /// Kill in the JSON line format
    pub fn structured_kill(ts: i64, server: &str, killer: (&str, i32), victim: (&str, i32)) -> String {
        serde_json::json!({
            "event_type": "kill",
            "timestamp": rfc3339(ts),
            "gamemode": "default",
            "server_ip": server,
            "killer": {"steam_id": steam_id(killer.0), "name": killer.0, "team": killer.1},
            "victim": {"steam_id": steam_id(victim.0), "name": victim.0, "team": victim.1},
            "weapon": {"name": "rocketlauncher"},
            "crit": false,
            "airborne": true
        })
        .to_string()
    }

    pub fn rfc3339(ts: i64) -> String {
        chrono::DateTime::from_timestamp(ts, 0)
            .expect("timestamp in range")
            .to_rfc3339()
    }

    /// Stable fake Steam ID derived from a player name
    pub fn steam_id(name: &str) -> String {
        format!("[U:1:{}]", name)
    }
}

/// Publisher that records every call instead of sending anything
#[derive(Debug, Default)]
pub struct RecordingPublisher {
    published: Arc<Mutex<Vec<(String, Vec<u8>, MessageMetadata)>>>,
}

impl RecordingPublisher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Get all published messages (for testing)
    pub fn get_published(&self) -> Vec<(String, Vec<u8>, MessageMetadata)> {
        self.published
            .lock()
            .map(|published| published.clone())
            .unwrap_or_default()
    }

    /// Count messages published to `kind`'s topic
    pub fn count_for_kind(&self, kind: EventKind) -> usize {
        let topic = kind.topic();
        self.get_published()
            .iter()
            .filter(|(published_topic, _, _)| *published_topic == topic)
            .count()
    }
}

#[async_trait]
impl Publisher for RecordingPublisher {
    async fn publish(&self, topic: &str, payload: &[u8], metadata: MessageMetadata) -> Result<()> {
        if let Ok(mut published) = self.published.lock() {
            published.push((topic.to_string(), payload.to_vec(), metadata));
        }
        Ok(())
    }
}

/// In-memory storage whose next close or rating settlement can be made to fail once
#[derive(Debug, Default)]
pub struct FlakyStorage {
    pub inner: Arc<InMemoryStorage>,
    fail_next_close: AtomicBool,
    fail_next_settlement: AtomicBool,
}

impl FlakyStorage {
    pub fn new(inner: Arc<InMemoryStorage>) -> Self {
        Self {
            inner,
            ..Self::default()
        }
    }

    pub fn fail_next_close(&self) {
        self.fail_next_close.store(true, Ordering::SeqCst);
    }

    pub fn fail_next_settlement(&self) {
        self.fail_next_settlement.store(true, Ordering::SeqCst);
    }

    fn trip(flag: &AtomicBool, operation: &str) -> Result<()> {
        if flag.swap(false, Ordering::SeqCst) {
            return Err(PipelineError::StorageFailed {
                message: format!("injected {} failure", operation),
            }
            .into());
        }
        Ok(())
    }
}

#[async_trait]
impl Storage for FlakyStorage {
    async fn get_or_create_player(
        &self,
        player: &PlayerRef,
        seen_at: DateTime<Utc>,
    ) -> Result<PlayerRecord> {
        self.inner.get_or_create_player(player, seen_at).await
    }

    async fn get_player(&self, player_id: PlayerId) -> Result<Option<PlayerRecord>> {
        self.inner.get_player(player_id).await
    }

    async fn find_open_match(&self, server: &str) -> Result<Option<MatchRecord>> {
        self.inner.find_open_match(server).await
    }

    async fn find_last_closed_match(&self, server: &str) -> Result<Option<MatchRecord>> {
        self.inner.find_last_closed_match(server).await
    }

    async fn open_match(&self, new_match: NewMatch) -> Result<MatchRecord> {
        self.inner.open_match(new_match).await
    }

    async fn refresh_match(
        &self,
        match_id: MatchId,
        map: Option<String>,
        gamemode: String,
    ) -> Result<MatchRecord> {
        self.inner.refresh_match(match_id, map, gamemode).await
    }

    async fn close_match(&self, match_id: MatchId, result: MatchResult) -> Result<CloseOutcome> {
        Self::trip(&self.fail_next_close, "close")?;
        self.inner.close_match(match_id, result).await
    }

    async fn insert_raw_event(
        &self,
        event: &Event,
        received_at: DateTime<Utc>,
    ) -> Result<RawEventId> {
        self.inner.insert_raw_event(event, received_at).await
    }

    async fn mark_event_processed(&self, event_id: RawEventId) -> Result<()> {
        self.inner.mark_event_processed(event_id).await
    }

    async fn insert_detail(&self, detail: DetailRecord) -> Result<()> {
        self.inner.insert_detail(detail).await
    }

    async fn add_match_participant(
        &self,
        match_id: MatchId,
        player_id: PlayerId,
        side: i32,
    ) -> Result<()> {
        self.inner.add_match_participant(match_id, player_id, side).await
    }

    async fn fetch_team_roster(&self, match_id: MatchId, side: i32) -> Result<Vec<RosterEntry>> {
        self.inner.fetch_team_roster(match_id, side).await
    }

    async fn update_player_rating(
        &self,
        player_id: PlayerId,
        new_rating: i32,
    ) -> Result<PlayerRecord> {
        self.inner.update_player_rating(player_id, new_rating).await
    }

    async fn record_rating_delta(&self, delta: RatingDeltaRecord) -> Result<()> {
        self.inner.record_rating_delta(delta).await
    }

    async fn apply_match_ratings(
        &self,
        match_id: MatchId,
        deltas: Vec<RatingDeltaRecord>,
        update_players: bool,
    ) -> Result<()> {
        Self::trip(&self.fail_next_settlement, "settlement")?;
        self.inner
            .apply_match_ratings(match_id, deltas, update_players)
            .await
    }

    async fn fetch_rating_deltas(&self, match_id: MatchId) -> Result<Vec<RatingDeltaRecord>> {
        self.inner.fetch_rating_deltas(match_id).await
    }
}

/// Everything a pipeline test needs, wired over an in-memory broker
pub struct TestPipeline {
    pub broker: InMemoryBroker,
    pub storage: Arc<InMemoryStorage>,
    pub processor: Arc<EventProcessor>,
    pub coordinator: PipelineCoordinator,
}

impl TestPipeline {
    /// Start a pipeline with default Elo settings and red=2 / blu=3
    pub async fn start() -> Self {
        let settings = PipelineSettings {
            poll_interval_ms: 10,
            requeue_on_failure: false,
            team_sides: TeamSides { red: RED, blu: BLU },
        };
        Self::start_with(settings, RatingConfig::default()).await
    }

    pub async fn start_with(settings: PipelineSettings, rating: RatingConfig) -> Self {
        let broker = InMemoryBroker::new();
        let storage = Arc::new(InMemoryStorage::new(rating.initial_rating));
        let calculator =
            Arc::new(EloRatingCalculator::new(rating).expect("valid rating config"));
        let processor = Arc::new(EventProcessor::new(
            storage.clone(),
            calculator,
            settings.team_sides,
        ));

        let coordinator = PipelineCoordinator::start(
            Arc::new(broker.clone()),
            processor.clone(),
            &settings,
            None,
        )
        .await
        .expect("pipeline starts");

        Self {
            broker,
            storage,
            processor,
            coordinator,
        }
    }

    /// Publish a line to the topic its kind routes to
    pub async fn send(&self, line: &str) {
        let kind = killfeed::decoder::sniff_kind(line)
            .expect("line sniffs")
            .expect("line has a known kind");
        self.send_to(&kind.topic(), line).await;
    }

    /// Publish raw text to an explicit topic
    pub async fn send_to(&self, topic: &str, line: &str) {
        self.broker
            .publish(
                topic,
                line.as_bytes(),
                MessageMetadata::new(None, Some("127.0.0.1:27015".to_string())),
            )
            .await
            .expect("publish to in-memory broker");
    }

    /// Publish lines and wait until all of them, plus earlier ones, are settled
    pub async fn send_and_settle(&self, lines: &[String]) {
        let expected = self.broker.settlements().len() + lines.len();
        for line in lines {
            self.send(line).await;
        }
        assert!(
            self.broker.wait_for_settlements(expected, SETTLE_TIMEOUT).await,
            "timed out waiting for {} settlements",
            expected
        );
    }

    pub fn rating_of(&self, name: &str) -> i32 {
        self.storage
            .player_by_steam_id(&lines::steam_id(name))
            .expect("storage readable")
            .map(|player| player.rating)
            .expect("player exists")
    }
}
