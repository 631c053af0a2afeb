//! Match lifecycle tests against the tracker and processor directly

use crate::fixtures::{lines, FlakyStorage, BLU, MATCH_END_TS, MATCH_START_TS, RED};
use chrono::{DateTime, Utc};
use futures::future::join_all;
use killfeed::config::RatingConfig;
use killfeed::decoder;
use killfeed::lifecycle::MatchTracker;
use killfeed::pipeline::EventProcessor;
use killfeed::rating::EloRatingCalculator;
use killfeed::storage::{InMemoryStorage, Storage};
use killfeed::types::{CloseOutcome, MatchResult, TeamSides};
use std::sync::Arc;
use tokio_test::assert_ok;

fn at(seconds: i64) -> DateTime<Utc> {
    DateTime::from_timestamp(seconds, 0).unwrap()
}

fn create_processor() -> (Arc<InMemoryStorage>, EventProcessor) {
    let storage = Arc::new(InMemoryStorage::new(1000));
    let calculator = Arc::new(EloRatingCalculator::new(RatingConfig::default()).unwrap());
    let processor = EventProcessor::new(
        storage.clone(),
        calculator,
        TeamSides { red: RED, blu: BLU },
    );
    (storage, processor)
}

async fn apply(processor: &EventProcessor, line: &str) {
    let event = decoder::decode_line(line).unwrap().unwrap();
    assert_ok!(processor.process_event(&event, Utc::now()).await);
}

#[tokio::test]
async fn test_concurrent_opens_share_one_match() {
    let storage = Arc::new(InMemoryStorage::new(1000));
    let tracker = Arc::new(MatchTracker::new(storage.clone()));

    let opens = (0..16).map(|i| {
        let tracker = tracker.clone();
        async move {
            tracker
                .get_or_open_match("srv", None, "default", at(MATCH_START_TS + i))
                .await
        }
    });
    let results = join_all(opens).await;

    let first = results[0].as_ref().unwrap().id;
    for result in &results {
        assert_eq!(result.as_ref().unwrap().id, first);
    }
    assert_eq!(storage.matches_for_server("srv").unwrap().len(), 1);
    assert_eq!(tracker.stats().matches_opened, 1);
}

#[tokio::test]
async fn test_close_is_idempotent() {
    let storage = Arc::new(InMemoryStorage::new(1000));
    let tracker = MatchTracker::new(storage.clone());

    let record = assert_ok!(
        tracker
            .get_or_open_match("srv", Some("pl_upward".to_string()), "default", at(MATCH_START_TS))
            .await
    );

    let first = assert_ok!(
        tracker
            .close_match("srv", record.id, MatchResult::new(at(MATCH_END_TS), RED))
            .await
    );
    let second = assert_ok!(
        tracker
            .close_match("srv", record.id, MatchResult::new(at(MATCH_END_TS + 30), BLU))
            .await
    );

    let CloseOutcome::Closed(closed) = first else {
        panic!("first close should close the match");
    };
    assert!(matches!(second, CloseOutcome::AlreadyClosed(_)));
    assert_eq!(second.record(), &closed);
    assert_eq!(closed.winner_side, Some(RED));
    assert_eq!(closed.duration_seconds, Some(600));

    let stats = tracker.stats();
    assert_eq!(stats.matches_closed, 1);
    assert_eq!(stats.duplicate_closes, 1);
    assert!(assert_ok!(storage.find_open_match("srv").await).is_none());
}

#[tokio::test]
async fn test_servers_are_tracked_independently() {
    let storage = Arc::new(InMemoryStorage::new(1000));
    let tracker = MatchTracker::new(storage.clone());

    let first = assert_ok!(
        tracker
            .get_or_open_match("a", None, "default", at(MATCH_START_TS))
            .await
    );
    let second = assert_ok!(
        tracker
            .get_or_open_match("b", None, "default", at(MATCH_START_TS))
            .await
    );
    assert_ne!(first.id, second.id);

    assert_ok!(
        tracker
            .close_match("a", first.id, MatchResult::new(at(MATCH_END_TS), RED))
            .await
    );
    let still_open = assert_ok!(storage.find_open_match("b").await);
    assert_eq!(still_open.map(|record| record.id), Some(second.id));
}

#[tokio::test]
async fn test_second_start_refreshes_open_match() {
    let (storage, processor) = create_processor();

    apply(&processor, &format!("MATCH_START|{}|default|srv|", MATCH_START_TS)).await;
    apply(&processor, &lines::match_start(MATCH_START_TS + 5, "srv", "cp_process_final")).await;

    let matches = storage.matches_for_server("srv").unwrap();
    assert_eq!(matches.len(), 1);
    assert_eq!(matches[0].map.as_deref(), Some("cp_process_final"));
    assert_eq!(matches[0].started_at, at(MATCH_START_TS));

    let stats = processor.tracker().stats();
    assert_eq!(stats.matches_opened, 1);
    assert_eq!(stats.matches_refreshed, 1);
}

#[tokio::test]
async fn test_end_without_rosters_closes_unrated() {
    let (storage, processor) = create_processor();

    apply(&processor, &lines::match_start(MATCH_START_TS, "srv", "mge_training")).await;
    apply(&processor, &lines::healed(MATCH_START_TS + 10, "srv", "Medic", "Heavy", 80)).await;
    apply(&processor, &lines::match_end(MATCH_END_TS, "srv", RED)).await;

    let matches = storage.matches_for_server("srv").unwrap();
    assert_eq!(matches[0].winner_side, Some(RED));
    assert!(assert_ok!(storage.fetch_rating_deltas(matches[0].id).await).is_empty());

    let medic = storage
        .player_by_steam_id(&lines::steam_id("Medic"))
        .unwrap()
        .unwrap();
    assert_eq!(medic.rating, 1000);
    assert_eq!(medic.matches_played, 0);
}

#[tokio::test]
async fn test_end_with_no_open_match_is_ignored() {
    let (storage, processor) = create_processor();

    apply(&processor, &lines::match_end(MATCH_END_TS, "srv", RED)).await;

    assert!(storage.matches_for_server("srv").unwrap().is_empty());
    assert_eq!(processor.tracker().stats().matches_closed, 0);
    // The event itself is still recorded
    assert_eq!(storage.raw_events().unwrap().len(), 1);
}

#[tokio::test]
async fn test_rated_players_gain_experience() {
    let (storage, processor) = create_processor();

    apply(&processor, &lines::match_start(MATCH_START_TS, "srv", "cp_gullywash")).await;
    apply(
        &processor,
        &lines::kill(MATCH_START_TS + 20, "srv", ("Sniper", RED), ("Spy", BLU)),
    )
    .await;
    apply(&processor, &lines::match_end(MATCH_END_TS, "srv", RED)).await;

    let sniper = storage
        .player_by_steam_id(&lines::steam_id("Sniper"))
        .unwrap()
        .unwrap();
    let spy = storage
        .player_by_steam_id(&lines::steam_id("Spy"))
        .unwrap()
        .unwrap();

    // 1v1 at K=50: +25 / -25
    assert_eq!(sniper.rating, 1025);
    assert_eq!(sniper.peak_rating, 1025);
    assert_eq!(sniper.matches_played, 1);
    assert_eq!(spy.rating, 975);
    assert_eq!(spy.peak_rating, 1000);
    assert_eq!(spy.matches_played, 1);
}

fn create_flaky_processor() -> (Arc<FlakyStorage>, EventProcessor) {
    let storage = Arc::new(FlakyStorage::new(Arc::new(InMemoryStorage::new(1000))));
    let calculator = Arc::new(EloRatingCalculator::new(RatingConfig::default()).unwrap());
    let processor = EventProcessor::new(
        storage.clone(),
        calculator,
        TeamSides { red: RED, blu: BLU },
    );
    (storage, processor)
}

async fn play_duel(processor: &EventProcessor) {
    apply(processor, &lines::match_start(MATCH_START_TS, "srv", "cp_gullywash")).await;
    apply(
        processor,
        &lines::kill(MATCH_START_TS + 20, "srv", ("Sniper", RED), ("Spy", BLU)),
    )
    .await;
}

#[tokio::test]
async fn test_redelivered_end_after_failed_close_rates_once() {
    let (storage, processor) = create_flaky_processor();
    play_duel(&processor).await;

    let end = lines::match_end(MATCH_END_TS, "srv", RED);
    storage.fail_next_close();
    assert!(processor.process_payload(end.as_bytes()).await.is_err());

    // ratings were settled before the close failed; the match is still open
    let open = assert_ok!(storage.find_open_match("srv").await).unwrap();
    assert_eq!(assert_ok!(storage.fetch_rating_deltas(open.id).await).len(), 2);

    assert_ok!(processor.process_payload(end.as_bytes()).await);

    let sniper = storage
        .inner
        .player_by_steam_id(&lines::steam_id("Sniper"))
        .unwrap()
        .unwrap();
    assert_eq!(sniper.rating, 1025);
    assert_eq!(sniper.matches_played, 1);
    assert_eq!(assert_ok!(storage.fetch_rating_deltas(open.id).await).len(), 2);

    let closed = assert_ok!(storage.find_last_closed_match("srv").await).unwrap();
    assert_eq!(closed.id, open.id);
    assert_eq!(closed.winner_side, Some(RED));
}

#[tokio::test]
async fn test_failed_settlement_leaves_ratings_untouched() {
    let (storage, processor) = create_flaky_processor();
    play_duel(&processor).await;

    let end = lines::match_end(MATCH_END_TS, "srv", RED);
    storage.fail_next_settlement();
    assert!(processor.process_payload(end.as_bytes()).await.is_err());

    let spy = storage
        .inner
        .player_by_steam_id(&lines::steam_id("Spy"))
        .unwrap()
        .unwrap();
    assert_eq!(spy.rating, 1000);
    assert_eq!(spy.matches_played, 0);
    assert!(assert_ok!(storage.find_open_match("srv").await).is_some());

    assert_ok!(processor.process_payload(end.as_bytes()).await);

    let spy = storage
        .inner
        .player_by_steam_id(&lines::steam_id("Spy"))
        .unwrap()
        .unwrap();
    assert_eq!(spy.rating, 975);
    assert_eq!(spy.matches_played, 1);
}

#[tokio::test]
async fn test_final_scores_are_stored() {
    let (storage, processor) = create_processor();
    play_duel(&processor).await;

    apply(
        &processor,
        &lines::match_end_with_scores(MATCH_END_TS, "srv", BLU, 2, 3),
    )
    .await;

    let closed = storage.matches_for_server("srv").unwrap().remove(0);
    assert_eq!(closed.winner_side, Some(BLU));
    assert_eq!(closed.red_score, Some(2));
    assert_eq!(closed.blu_score, Some(3));
    assert_eq!(closed.duration_seconds, Some(600));
}
