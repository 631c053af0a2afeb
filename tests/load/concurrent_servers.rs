//! Many game servers reporting through one pipeline at the same time
//!
//! Every server plays its own match; per-server serialization must keep
//! each match isolated while all topics are consumed concurrently.

use crate::fixtures::{lines, TestPipeline, BLU, MATCH_END_TS, MATCH_START_TS, RED, SETTLE_TIMEOUT};
use futures::future::join_all;
use std::time::{Duration, Instant};

const SERVER_COUNT: usize = 24;
const KILLS_PER_MATCH: i64 = 10;

fn server(index: usize) -> String {
    format!("10.0.{}.1:27015", index)
}

fn player(index: usize, role: &str) -> String {
    format!("{}_{}", role, index)
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_matches_stay_isolated() {
    let pipeline = TestPipeline::start().await;
    let started = Instant::now();

    let starts: Vec<String> = (0..SERVER_COUNT)
        .map(|i| lines::match_start(MATCH_START_TS, &server(i), "cp_snakewater"))
        .collect();
    pipeline.send_and_settle(&starts).await;

    // Interleave kills from every server so the kill consumer sees them mixed
    let mut kills = Vec::new();
    for n in 0..KILLS_PER_MATCH {
        for i in 0..SERVER_COUNT {
            kills.push(lines::kill(
                MATCH_START_TS + 10 + n,
                &server(i),
                (&player(i, "red"), RED),
                (&player(i, "blu"), BLU),
            ));
        }
    }
    let sends = kills.iter().map(|line| pipeline.send(line));
    join_all(sends).await;

    let expected = SERVER_COUNT + kills.len();
    assert!(
        pipeline.broker.wait_for_settlements(expected, SETTLE_TIMEOUT).await,
        "kills did not settle in time"
    );

    // Odd servers are won by blu
    let ends: Vec<String> = (0..SERVER_COUNT)
        .map(|i| {
            let winner = if i % 2 == 0 { RED } else { BLU };
            lines::match_end(MATCH_END_TS, &server(i), winner)
        })
        .collect();
    pipeline.send_and_settle(&ends).await;

    let elapsed = started.elapsed();
    println!(
        "Processed {} deliveries across {} servers in {:?}",
        expected + ends.len(),
        SERVER_COUNT,
        elapsed
    );
    assert!(elapsed < Duration::from_secs(10));

    for i in 0..SERVER_COUNT {
        let matches = pipeline.storage.matches_for_server(&server(i)).unwrap();
        assert_eq!(matches.len(), 1, "server {} should have one match", i);
        assert_eq!(
            pipeline.storage.details_for_match(matches[0].id).unwrap().len(),
            KILLS_PER_MATCH as usize
        );

        let (winner, loser) = if i % 2 == 0 { ("red", "blu") } else { ("blu", "red") };
        assert_eq!(pipeline.rating_of(&player(i, winner)), 1025);
        assert_eq!(pipeline.rating_of(&player(i, loser)), 975);
    }

    let tracker = pipeline.processor.tracker().stats();
    assert_eq!(tracker.matches_opened, SERVER_COUNT as u64);
    assert_eq!(tracker.matches_closed, SERVER_COUNT as u64);
    assert_eq!(tracker.implicit_opens, 0);

    let stats = pipeline.coordinator.shutdown().await;
    assert_eq!(stats.processed as usize, expected + ends.len());
    assert_eq!(stats.failed, 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_gameplay_racing_match_start_opens_one_match() {
    let pipeline = TestPipeline::start().await;

    // No ordering between the start topic and the gameplay topics
    let mut burst = vec![lines::match_start(MATCH_START_TS, "race", "koth_product")];
    for n in 0..20 {
        burst.push(lines::kill(
            MATCH_START_TS + 1 + n,
            "race",
            ("Scout", RED),
            ("Sniper", BLU),
        ));
        burst.push(lines::healed(MATCH_START_TS + 1 + n, "race", "Medic", "Scout", 25));
    }
    pipeline.send_and_settle(&burst).await;

    let matches = pipeline.storage.matches_for_server("race").unwrap();
    assert_eq!(matches.len(), 1);
    assert!(matches[0].is_open());
    assert_eq!(matches[0].map.as_deref(), Some("koth_product"));
    assert_eq!(pipeline.storage.details_for_match(matches[0].id).unwrap().len(), 40);

    pipeline.coordinator.shutdown().await;
}
