//! Network ingress for game server telemetry

pub mod udp;

pub use udp::{DatagramSummary, UdpCollector};
