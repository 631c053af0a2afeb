//! UDP ingress
//!
//! Each datagram may carry several newline-separated lines. Every line is
//! sniffed for its kind and published unchanged to `events.<kind>`; full
//! decoding happens in the pipeline.

use crate::config::CollectorSettings;
use crate::decoder;
use crate::delivery::{MessageMetadata, Publisher};
use crate::error::{PipelineError, Result};
use crate::metrics::MetricsCollector;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::UdpSocket;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

/// What happened to the lines of one datagram
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DatagramSummary {
    pub published: usize,
    /// Blank, comment or unknown-kind lines
    pub skipped: usize,
    /// Lines that could not be sniffed
    pub invalid: usize,
    /// Lines the publisher refused
    pub failed: usize,
}

impl DatagramSummary {
    fn absorb(&mut self, other: DatagramSummary) {
        self.published += other.published;
        self.skipped += other.skipped;
        self.invalid += other.invalid;
        self.failed += other.failed;
    }
}

/// Receives telemetry datagrams and forwards each line to the delivery channel
pub struct UdpCollector {
    socket: UdpSocket,
    publisher: Arc<dyn Publisher>,
    max_datagram_bytes: usize,
    read_timeout: Duration,
    metrics: Option<Arc<MetricsCollector>>,
}

impl UdpCollector {
    /// Bind the collector's socket
    pub async fn bind(settings: &CollectorSettings, publisher: Arc<dyn Publisher>) -> Result<Self> {
        let socket = UdpSocket::bind(&settings.bind_addr).await.map_err(|e| {
            PipelineError::ConfigurationError {
                message: format!("Failed to bind UDP collector to {}: {}", settings.bind_addr, e),
            }
        })?;

        info!("UDP collector listening on {}", socket.local_addr()?);

        Ok(Self {
            socket,
            publisher,
            max_datagram_bytes: settings.max_datagram_bytes,
            read_timeout: Duration::from_millis(settings.read_timeout_ms),
            metrics: None,
        })
    }

    pub fn with_metrics(mut self, metrics: Arc<MetricsCollector>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.socket.local_addr()?)
    }

    /// Receive until shutdown is signalled; returns the totals
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) -> Result<DatagramSummary> {
        let mut buffer = vec![0u8; self.max_datagram_bytes];
        let mut totals = DatagramSummary::default();

        loop {
            if *shutdown.borrow() {
                break;
            }

            tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
                received = tokio::time::timeout(self.read_timeout, self.socket.recv_from(&mut buffer)) => {
                    match received {
                        // read timeout; loop around to look at the shutdown flag
                        Err(_) => continue,
                        Ok(Ok((len, source))) => {
                            let summary = self.handle_datagram(&buffer[..len], source).await;
                            totals.absorb(summary);
                        }
                        Ok(Err(e)) => error!("Failed to read UDP datagram: {}", e),
                    }
                }
            }
        }

        info!("UDP collector stopped: {:?}", totals);
        Ok(totals)
    }

    /// Split a datagram into lines and publish each recognised one
    pub async fn handle_datagram(&self, data: &[u8], source: SocketAddr) -> DatagramSummary {
        let mut summary = DatagramSummary::default();

        let Ok(text) = std::str::from_utf8(data) else {
            warn!("Dropping non UTF-8 datagram from {}", source);
            summary.invalid += 1;
            self.record("invalid");
            return summary;
        };

        for line in text.lines().map(str::trim) {
            if line.is_empty() || line.starts_with('#') {
                summary.skipped += 1;
                self.record("skipped");
                continue;
            }

            let kind = match decoder::sniff_kind(line) {
                Ok(Some(kind)) => kind,
                Ok(None) => {
                    debug!("Skipping line of unknown kind from {}", source);
                    summary.skipped += 1;
                    self.record("skipped");
                    continue;
                }
                Err(e) => {
                    warn!("Dropping line from {}: {}", source, e);
                    summary.invalid += 1;
                    self.record("invalid");
                    continue;
                }
            };

            let metadata = MessageMetadata::new(Some(kind), Some(source.to_string()));
            match self
                .publisher
                .publish(&kind.topic(), line.as_bytes(), metadata)
                .await
            {
                Ok(()) => {
                    summary.published += 1;
                    self.record("published");
                }
                Err(e) => {
                    error!("Failed to publish {} from {}: {}", kind, source, e);
                    summary.failed += 1;
                    self.record("failed");
                }
            }
        }

        summary
    }

    fn record(&self, status: &str) {
        if let Some(metrics) = &self.metrics {
            metrics.record_collector_line(status);
        }
    }
}
