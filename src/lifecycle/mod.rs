//! Match lifecycle: opening, refreshing, attributing and closing matches per server

pub mod tracker;

pub use tracker::{Attribution, MatchTracker, ServerSlot, TrackerStats};
