//! Per-server match tracking
//!
//! All match state changes for a server happen while holding that server's
//! [`ServerSlot`]. The slot is an async mutex keyed by server, so two topics
//! delivering events for the same server cannot both open a match, and a close
//! cannot interleave with an open. A server's slot is dropped from the table
//! once its match closes and nobody is waiting on it.

use crate::error::{PipelineError, Result, StorageError};
use crate::storage::Storage;
use crate::types::{CloseOutcome, MatchId, MatchRecord, MatchResult, NewMatch};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};
use tracing::{debug, info, warn};

/// Attempts at opening a match before giving up on repeated conflicts
const MAX_OPEN_ATTEMPTS: usize = 3;

/// How a gameplay event was tied to a match
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Attribution {
    /// The server's open match
    Open,
    /// A closed match whose time span covers the event
    Late,
    /// No match existed; one was opened for the event
    Implicit,
}

/// Counters for lifecycle decisions
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrackerStats {
    pub matches_opened: u64,
    pub matches_refreshed: u64,
    pub matches_closed: u64,
    pub implicit_opens: u64,
    pub late_attributions: u64,
    pub duplicate_closes: u64,
    pub open_conflicts: u64,
}

/// Tracks the open match of every server
pub struct MatchTracker {
    storage: Arc<dyn Storage>,
    slots: Mutex<HashMap<String, Arc<AsyncMutex<()>>>>,
    stats: RwLock<TrackerStats>,
}

impl MatchTracker {
    pub fn new(storage: Arc<dyn Storage>) -> Self {
        Self {
            storage,
            slots: Mutex::new(HashMap::new()),
            stats: RwLock::new(TrackerStats::default()),
        }
    }

    /// Wait for exclusive access to `server`'s match state
    pub async fn acquire(&self, server: &str) -> Result<ServerSlot<'_>> {
        let slot = {
            let mut slots = self
                .slots
                .lock()
                .map_err(|_| PipelineError::InternalError {
                    message: "Failed to acquire server slot table".to_string(),
                })?;
            slots
                .entry(server.to_string())
                .or_insert_with(|| Arc::new(AsyncMutex::new(())))
                .clone()
        };

        let guard = slot.clone().lock_owned().await;
        Ok(ServerSlot {
            tracker: self,
            server: server.to_string(),
            slot,
            guard: Some(guard),
            release: AtomicBool::new(false),
        })
    }

    /// Servers that currently have a slot in the table
    pub fn tracked_servers(&self) -> usize {
        self.slots.lock().map(|slots| slots.len()).unwrap_or(0)
    }

    /// Return the open match for `server`, opening one if there is none
    pub async fn get_or_open_match(
        &self,
        server: &str,
        map: Option<String>,
        gamemode: &str,
        started_at: DateTime<Utc>,
    ) -> Result<MatchRecord> {
        self.acquire(server)
            .await?
            .get_or_open(map, gamemode, started_at)
            .await
    }

    pub async fn close_match(
        &self,
        server: &str,
        match_id: MatchId,
        result: MatchResult,
    ) -> Result<CloseOutcome> {
        self.acquire(server).await?.close(match_id, result).await
    }

    pub fn stats(&self) -> TrackerStats {
        self.stats
            .read()
            .map(|stats| stats.clone())
            .unwrap_or_default()
    }

    fn record(&self, update: impl FnOnce(&mut TrackerStats)) {
        if let Ok(mut stats) = self.stats.write() {
            update(&mut stats);
        }
    }
}

/// Exclusive access to one server's match state, released on drop
pub struct ServerSlot<'a> {
    tracker: &'a MatchTracker,
    server: String,
    slot: Arc<AsyncMutex<()>>,
    guard: Option<OwnedMutexGuard<()>>,
    /// Set once this slot closed a match
    release: AtomicBool,
}

impl Drop for ServerSlot<'_> {
    fn drop(&mut self) {
        drop(self.guard.take());
        if !self.release.load(Ordering::Acquire) {
            return;
        }

        // waiters clone the mutex under the table lock, so a count of two
        // (the table and this slot) means nobody else wants it
        if let Ok(mut slots) = self.tracker.slots.lock() {
            let idle = slots
                .get(&self.server)
                .is_some_and(|entry| Arc::ptr_eq(entry, &self.slot))
                && Arc::strong_count(&self.slot) == 2;
            if idle {
                slots.remove(&self.server);
                debug!("Released slot for {}", self.server);
            }
        }
    }
}

impl ServerSlot<'_> {
    pub fn server(&self) -> &str {
        &self.server
    }

    pub async fn current_match(&self) -> Result<Option<MatchRecord>> {
        self.tracker.storage.find_open_match(&self.server).await
    }

    pub async fn last_closed_match(&self) -> Result<Option<MatchRecord>> {
        self.tracker
            .storage
            .find_last_closed_match(&self.server)
            .await
    }

    /// Return the open match, opening one if there is none.
    ///
    /// A storage conflict means another writer got there first, so the open
    /// match is looked up again.
    pub async fn get_or_open(
        &self,
        map: Option<String>,
        gamemode: &str,
        started_at: DateTime<Utc>,
    ) -> Result<MatchRecord> {
        for _ in 0..MAX_OPEN_ATTEMPTS {
            if let Some(open) = self.current_match().await? {
                return Ok(open);
            }

            let request = NewMatch {
                server: self.server.clone(),
                map: map.clone(),
                gamemode: gamemode.to_string(),
                started_at,
            };

            match self.tracker.storage.open_match(request).await {
                Ok(record) => {
                    info!(
                        "Opened match {} on {} (map: {})",
                        record.id,
                        self.server,
                        record.map.as_deref().unwrap_or("unknown")
                    );
                    self.tracker.record(|stats| stats.matches_opened += 1);
                    return Ok(record);
                }
                Err(e) => match e.downcast_ref::<StorageError>() {
                    Some(StorageError::OpenMatchExists { match_id, .. }) => {
                        debug!(
                            "Open match {} already exists on {}, retrying lookup",
                            match_id, self.server
                        );
                        self.tracker.record(|stats| stats.open_conflicts += 1);
                    }
                    _ => return Err(e),
                },
            }
        }

        Err(PipelineError::LifecycleFailed {
            server: self.server.clone(),
            message: format!(
                "could not open or find a match after {} attempts",
                MAX_OPEN_ATTEMPTS
            ),
        }
        .into())
    }

    /// Match a gameplay event at `occurred_at` belongs to.
    ///
    /// Prefers the open match. With none open, an event inside the last closed
    /// match's span is a late arrival for that match. Otherwise a match is
    /// opened at the event's own timestamp.
    pub async fn match_for_event(
        &self,
        gamemode: &str,
        occurred_at: DateTime<Utc>,
    ) -> Result<(MatchRecord, Attribution)> {
        if let Some(open) = self.current_match().await? {
            return Ok((open, Attribution::Open));
        }

        if let Some(closed) = self.last_closed_match().await? {
            if closed.covers(occurred_at) {
                debug!(
                    "Late event at {} attributed to closed match {} on {}",
                    occurred_at, closed.id, self.server
                );
                self.tracker.record(|stats| stats.late_attributions += 1);
                return Ok((closed, Attribution::Late));
            }
        }

        let record = self.get_or_open(None, gamemode, occurred_at).await?;
        info!(
            "Implicitly opened match {} on {} for a gameplay event",
            record.id, self.server
        );
        self.tracker.record(|stats| stats.implicit_opens += 1);
        Ok((record, Attribution::Implicit))
    }

    /// Handle a match or round start: refresh the open match or open a new one
    pub async fn begin(
        &self,
        map: Option<String>,
        gamemode: &str,
        started_at: DateTime<Utc>,
    ) -> Result<MatchRecord> {
        match self.current_match().await? {
            Some(open) => {
                let record = self
                    .tracker
                    .storage
                    .refresh_match(open.id, map, gamemode.to_string())
                    .await?;
                debug!("Refreshed open match {} on {}", record.id, self.server);
                self.tracker.record(|stats| stats.matches_refreshed += 1);
                Ok(record)
            }
            None => self.get_or_open(map, gamemode, started_at).await,
        }
    }

    /// Close a match. A repeated close leaves the first result in place.
    pub async fn close(&self, match_id: MatchId, result: MatchResult) -> Result<CloseOutcome> {
        let outcome = self.tracker.storage.close_match(match_id, result).await?;

        match &outcome {
            CloseOutcome::Closed(record) => {
                info!(
                    "Closed match {} on {} (winner: {}, duration: {}s)",
                    record.id,
                    self.server,
                    result.winner_side,
                    record.duration_seconds.unwrap_or(0)
                );
                self.tracker.record(|stats| stats.matches_closed += 1);
                self.release.store(true, Ordering::Release);
            }
            CloseOutcome::AlreadyClosed(record) => {
                warn!(
                    "Match {} on {} was already closed, ignoring duplicate close",
                    record.id, self.server
                );
                self.tracker.record(|stats| stats.duplicate_closes += 1);
            }
        }

        Ok(outcome)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::{InMemoryStorage, MockStorage};
    use crate::utils::current_timestamp;
    use chrono::Duration;

    fn tracker() -> MatchTracker {
        MatchTracker::new(Arc::new(InMemoryStorage::default()))
    }

    #[tokio::test]
    async fn test_get_or_open_reuses_open_match() {
        let tracker = tracker();
        let now = current_timestamp();

        let first = tracker
            .get_or_open_match("srv", Some("koth_product".to_string()), "koth", now)
            .await
            .unwrap();
        let second = tracker
            .get_or_open_match("srv", None, "koth", now + Duration::seconds(5))
            .await
            .unwrap();

        assert_eq!(first.id, second.id);
        assert_eq!(tracker.stats().matches_opened, 1);
    }

    #[tokio::test]
    async fn test_begin_refreshes_instead_of_duplicating() {
        let tracker = tracker();
        let now = current_timestamp();
        let slot = tracker.acquire("srv").await.unwrap();

        let opened = slot.begin(None, "default", now).await.unwrap();
        let refreshed = slot
            .begin(Some("cp_process".to_string()), "5cp", now)
            .await
            .unwrap();

        assert_eq!(opened.id, refreshed.id);
        assert_eq!(refreshed.map.as_deref(), Some("cp_process"));
        assert_eq!(refreshed.gamemode, "5cp");
        assert_eq!(tracker.stats().matches_refreshed, 1);
    }

    #[tokio::test]
    async fn test_late_event_goes_to_closed_match() {
        let tracker = tracker();
        let start = current_timestamp();
        let slot = tracker.acquire("srv").await.unwrap();

        let record = slot.begin(None, "default", start).await.unwrap();
        slot.close(record.id, MatchResult::new(start + Duration::minutes(10), 2))
            .await
            .unwrap();

        let (late, attribution) = slot
            .match_for_event("default", start + Duration::minutes(9))
            .await
            .unwrap();
        assert_eq!(late.id, record.id);
        assert_eq!(attribution, Attribution::Late);

        let (fresh, attribution) = slot
            .match_for_event("default", start + Duration::minutes(11))
            .await
            .unwrap();
        assert_ne!(fresh.id, record.id);
        assert_eq!(attribution, Attribution::Implicit);
        assert_eq!(fresh.started_at, start + Duration::minutes(11));
    }

    #[tokio::test]
    async fn test_duplicate_close_is_counted() {
        let tracker = tracker();
        let now = current_timestamp();
        let record = tracker
            .get_or_open_match("srv", None, "default", now)
            .await
            .unwrap();

        tracker
            .close_match("srv", record.id, MatchResult::new(now, 3))
            .await
            .unwrap();
        let again = tracker
            .close_match("srv", record.id, MatchResult::new(now, 2))
            .await
            .unwrap();

        assert!(matches!(again, CloseOutcome::AlreadyClosed(_)));
        assert_eq!(tracker.stats().matches_closed, 1);
        assert_eq!(tracker.stats().duplicate_closes, 1);
    }

    #[tokio::test]
    async fn test_closed_server_leaves_slot_table() {
        let tracker = tracker();
        let now = current_timestamp();
        let record = tracker
            .get_or_open_match("a", None, "default", now)
            .await
            .unwrap();
        tracker
            .get_or_open_match("b", None, "default", now)
            .await
            .unwrap();
        assert_eq!(tracker.tracked_servers(), 2);

        tracker
            .close_match("a", record.id, MatchResult::new(now, 2))
            .await
            .unwrap();
        assert_eq!(tracker.tracked_servers(), 1);

        let next = tracker
            .get_or_open_match("a", None, "default", now + Duration::minutes(1))
            .await
            .unwrap();
        assert_ne!(next.id, record.id);
        assert_eq!(tracker.tracked_servers(), 2);
    }

    #[tokio::test]
    async fn test_slot_with_waiter_survives_close() {
        let tracker = tracker();
        let now = current_timestamp();
        let first = tracker.acquire("a").await.unwrap();
        let record = first.begin(None, "default", now).await.unwrap();

        let closer = async move {
            first
                .close(record.id, MatchResult::new(now, 3))
                .await
                .unwrap();
            // let the waiter queue up before the slot is released
            tokio::task::yield_now().await;
            drop(first);
        };
        let (_, waiter) = tokio::join!(closer, tracker.acquire("a"));

        let waiter = waiter.unwrap();
        assert_eq!(tracker.tracked_servers(), 1);
        assert!(waiter.current_match().await.unwrap().is_none());
        drop(waiter);

        // the waiter closed nothing, so the slot stays
        assert_eq!(tracker.tracked_servers(), 1);
    }

    #[tokio::test]
    async fn test_conflict_retries_lookup() {
        let now = current_timestamp();
        let existing = MatchRecord {
            id: uuid::Uuid::new_v4(),
            server: "srv".to_string(),
            map: None,
            gamemode: "default".to_string(),
            started_at: now,
            ended_at: None,
            winner_side: None,
            duration_seconds: None,
            red_score: None,
            blu_score: None,
        };

        let mut storage = MockStorage::new();
        let mut lookups = 0;
        let found = existing.clone();
        storage.expect_find_open_match().returning(move |_| {
            lookups += 1;
            Ok(if lookups == 1 { None } else { Some(found.clone()) })
        });
        let conflict_id = existing.id;
        storage.expect_open_match().times(1).returning(move |request| {
            Err(StorageError::OpenMatchExists {
                server: request.server,
                match_id: conflict_id,
            }
            .into())
        });

        let tracker = MatchTracker::new(Arc::new(storage));
        let record = tracker
            .get_or_open_match("srv", None, "default", now)
            .await
            .unwrap();

        assert_eq!(record.id, existing.id);
        assert_eq!(tracker.stats().open_conflicts, 1);
    }

    #[tokio::test]
    async fn test_storage_failure_is_not_retried() {
        let mut storage = MockStorage::new();
        storage.expect_find_open_match().returning(|_| Ok(None));
        storage.expect_open_match().times(1).returning(|_| {
            Err(PipelineError::StorageFailed {
                message: "disk full".to_string(),
            }
            .into())
        });

        let tracker = MatchTracker::new(Arc::new(storage));
        let result = tracker
            .get_or_open_match("srv", None, "default", current_timestamp())
            .await;

        assert!(result.is_err());
    }
}
