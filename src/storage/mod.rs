//! Durable state behind the pipeline
//!
//! The coordinator and the lifecycle tracker only talk to the [`Storage`]
//! trait. `open_match` is the storage-level half of the one-open-match-per-server
//! rule: it refuses with [`StorageError::OpenMatchExists`](crate::error::StorageError)
//! and the tracker retries against the winner.

pub mod memory;

use crate::error::Result;
use crate::events::{Event, PlayerRef};
use crate::types::{
    CloseOutcome, DetailRecord, MatchId, MatchRecord, MatchResult, NewMatch, PlayerId,
    PlayerRecord, RatingDeltaRecord, RawEventId, RosterEntry,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};

pub use memory::InMemoryStorage;

/// Persistence operations used by the pipeline
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Storage: Send + Sync {
    /// Look a player up by Steam ID, creating them at the initial rating on first sight.
    /// The stored name and last-seen time are refreshed either way.
    async fn get_or_create_player(
        &self,
        player: &PlayerRef,
        seen_at: DateTime<Utc>,
    ) -> Result<PlayerRecord>;

    async fn get_player(&self, player_id: PlayerId) -> Result<Option<PlayerRecord>>;

    async fn find_open_match(&self, server: &str) -> Result<Option<MatchRecord>>;

    /// The closed match on `server` with the latest end time
    async fn find_last_closed_match(&self, server: &str) -> Result<Option<MatchRecord>>;

    /// Open a match; fails with `StorageError::OpenMatchExists` if the server has one
    async fn open_match(&self, new_match: NewMatch) -> Result<MatchRecord>;

    /// Update an open match's details. A known map is never replaced by `None`.
    async fn refresh_match(
        &self,
        match_id: MatchId,
        map: Option<String>,
        gamemode: String,
    ) -> Result<MatchRecord>;

    /// Close a match. Closing an already closed match changes nothing.
    async fn close_match(&self, match_id: MatchId, result: MatchResult) -> Result<CloseOutcome>;

    /// Store a decoded event in its normalized structured form
    async fn insert_raw_event(&self, event: &Event, received_at: DateTime<Utc>)
        -> Result<RawEventId>;

    async fn mark_event_processed(&self, event_id: RawEventId) -> Result<()>;

    async fn insert_detail(&self, detail: DetailRecord) -> Result<()>;

    /// Register a player on a side; the first side recorded for a player wins
    async fn add_match_participant(
        &self,
        match_id: MatchId,
        player_id: PlayerId,
        side: i32,
    ) -> Result<()>;

    /// Current standing of every participant on `side`, in registration order
    async fn fetch_team_roster(&self, match_id: MatchId, side: i32) -> Result<Vec<RosterEntry>>;

    /// Set a player's rating after a rated match; raises the peak and counts the match
    async fn update_player_rating(&self, player_id: PlayerId, new_rating: i32)
        -> Result<PlayerRecord>;

    async fn record_rating_delta(&self, delta: RatingDeltaRecord) -> Result<()>;

    /// Settle a match's ratings in one step: store every delta and, when
    /// `update_players` is set, move each player to their `rating_after` the
    /// way [`Storage::update_player_rating`] does.
    ///
    /// Either everything is written or nothing is. A match that already has
    /// deltas is refused with `StorageError::AlreadyRated`.
    async fn apply_match_ratings(
        &self,
        match_id: MatchId,
        deltas: Vec<RatingDeltaRecord>,
        update_players: bool,
    ) -> Result<()>;

    async fn fetch_rating_deltas(&self, match_id: MatchId) -> Result<Vec<RatingDeltaRecord>>;

    /// Cheap round trip used by the readiness check
    async fn ping(&self) -> Result<()> {
        Ok(())
    }
}
