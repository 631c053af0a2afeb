//! UDP collection feeding the pipeline

use crate::fixtures::{lines, RecordingPublisher, TestPipeline, BLU, MATCH_END_TS, MATCH_START_TS, RED, SETTLE_TIMEOUT};
use killfeed::collector::UdpCollector;
use killfeed::config::CollectorSettings;
use killfeed::delivery::Publisher;
use killfeed::events::EventKind;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::UdpSocket;
use tokio::sync::watch;

fn collector_settings() -> CollectorSettings {
    CollectorSettings {
        bind_addr: "127.0.0.1:0".to_string(),
        max_datagram_bytes: 65507,
        read_timeout_ms: 20,
    }
}

async fn send_datagram(target: SocketAddr, lines: &[String]) {
    let socket = UdpSocket::bind("127.0.0.1:0").await.unwrap();
    let payload = lines.join("\n");
    socket.send_to(payload.as_bytes(), target).await.unwrap();
}

#[tokio::test]
async fn test_collector_routes_lines_by_kind() {
    let publisher = Arc::new(RecordingPublisher::new());
    let collector = UdpCollector::bind(&collector_settings(), publisher.clone())
        .await
        .unwrap();
    let source: SocketAddr = "10.0.0.5:27015".parse().unwrap();

    let datagram = [
        lines::match_start(MATCH_START_TS, "srv", "cp_sunshine"),
        "# map change".to_string(),
        lines::kill(MATCH_START_TS + 10, "srv", ("Scout", RED), ("Spy", BLU)),
        lines::structured_kill(MATCH_START_TS + 11, "srv", ("Spy", BLU), ("Scout", RED)),
        "CHAT_MESSAGE|1706788800|default|srv|x".to_string(),
        "MVP2|1706789400|default|srv|[U:1:Scout]|Scout|14|2".to_string(),
        "not a telemetry line".to_string(),
    ]
    .join("\r\n");

    let summary = collector.handle_datagram(datagram.as_bytes(), source).await;
    assert_eq!(summary.published, 4);
    assert_eq!(summary.skipped, 2);
    assert_eq!(summary.invalid, 1);
    assert_eq!(summary.failed, 0);

    assert_eq!(publisher.count_for_kind(EventKind::MatchStart), 1);
    assert_eq!(publisher.count_for_kind(EventKind::Kill), 2);
    assert_eq!(publisher.count_for_kind(EventKind::Mvp2), 1);

    let published = publisher.get_published();
    let (_, payload, metadata) = &published[0];
    assert_eq!(payload.as_slice(), lines::match_start(MATCH_START_TS, "srv", "cp_sunshine").as_bytes());
    assert_eq!(metadata.event_kind, Some(EventKind::MatchStart));
    assert_eq!(metadata.source_addr.as_deref(), Some("10.0.0.5:27015"));
}

#[tokio::test]
async fn test_udp_telemetry_is_rated_end_to_end() {
    let pipeline = TestPipeline::start().await;
    let publisher: Arc<dyn Publisher> = Arc::new(pipeline.broker.clone());
    let collector = Arc::new(
        UdpCollector::bind(&collector_settings(), publisher)
            .await
            .unwrap(),
    );
    let target = collector.local_addr().unwrap();

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let handle = {
        let collector = collector.clone();
        tokio::spawn(async move { collector.run(shutdown_rx).await })
    };

    // Each phase must settle before the next so topics cannot race
    let phases = [
        vec![lines::match_start(MATCH_START_TS, "srv", "cp_granary")],
        vec![
            lines::kill(MATCH_START_TS + 30, "srv", ("Scout", RED), ("Spy", BLU)),
            lines::kill(MATCH_START_TS + 45, "srv", ("Scout", RED), ("Spy", BLU)),
        ],
        vec![lines::match_end(MATCH_END_TS, "srv", RED)],
    ];

    let mut expected = 0;
    for phase in phases {
        expected += phase.len();
        send_datagram(target, &phase).await;
        assert!(
            pipeline
                .broker
                .wait_for_settlements(expected, SETTLE_TIMEOUT)
                .await,
            "pipeline did not settle {} deliveries",
            expected
        );
    }

    assert_eq!(pipeline.rating_of("Scout"), 1025);
    assert_eq!(pipeline.rating_of("Spy"), 975);

    shutdown_tx.send(true).unwrap();
    let summary = tokio::time::timeout(Duration::from_secs(2), handle)
        .await
        .unwrap()
        .unwrap()
        .unwrap();
    assert_eq!(summary.published, 4);

    let stats = pipeline.coordinator.shutdown().await;
    assert_eq!(stats.processed, 4);
}
