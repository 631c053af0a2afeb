//! Skill rating for completed matches
//!
//! The calculator is pure: it takes one snapshot of both rosters and returns
//! deltas. Reading rosters and writing results is the coordinator's job.

pub mod calculator;
pub mod elo;

// Re-export commonly used types
pub use calculator::{
    MatchOutcome, MockRatingCalculator, RatingCalculator, RatingDelta, TeamRatingChanges,
};
pub use elo::EloRatingCalculator;
