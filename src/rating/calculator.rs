//! Rating calculator trait and shared result types

use crate::error::{PipelineError, Result};
use crate::types::{PlayerId, RosterEntry};
use serde::{Deserialize, Serialize};

/// Which roster won
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MatchOutcome {
    TeamAWins,
    TeamBWins,
}

/// One player's movement for one match
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RatingDelta {
    pub player_id: PlayerId,
    pub rating_before: i32,
    /// Exact change before rounding and the zero floor
    pub change: f64,
    /// `round(rating_before + change)`, never below zero
    pub rating_after: i32,
}

impl RatingDelta {
    pub fn new(player_id: PlayerId, rating_before: i32, change: f64) -> Self {
        let rating_after = (f64::from(rating_before) + change).round().max(0.0) as i32;
        Self {
            player_id,
            rating_before,
            change,
            rating_after,
        }
    }

    /// Change actually applied to the stored rating
    pub fn applied_change(&self) -> i32 {
        self.rating_after - self.rating_before
    }
}

/// Deltas for both rosters, in roster order
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TeamRatingChanges {
    pub team_a: Vec<RatingDelta>,
    pub team_b: Vec<RatingDelta>,
}

impl TeamRatingChanges {
    pub fn all(&self) -> impl Iterator<Item = &RatingDelta> {
        self.team_a.iter().chain(self.team_b.iter())
    }
}

/// Trait for calculating rating changes after a match
pub trait RatingCalculator: Send + Sync {
    /// Compute deltas for a finished match from a single snapshot of both rosters.
    ///
    /// Both rosters must be non-empty.
    fn rate(
        &self,
        team_a: &[RosterEntry],
        team_b: &[RosterEntry],
        outcome: MatchOutcome,
    ) -> Result<TeamRatingChanges>;

    /// Rating for a player seen for the first time
    fn initial_rating(&self) -> i32;
}

pub(crate) fn ensure_rosters(team_a: &[RosterEntry], team_b: &[RosterEntry]) -> Result<()> {
    if team_a.is_empty() || team_b.is_empty() {
        return Err(PipelineError::RatingCalculationFailed {
            reason: format!(
                "both rosters need players (got {} and {})",
                team_a.len(),
                team_b.len()
            ),
        }
        .into());
    }
    Ok(())
}

/// Mock rating calculator for testing; returns unchanged ratings
#[derive(Debug, Default)]
pub struct MockRatingCalculator {
    calculation_calls: std::sync::Mutex<Vec<(Vec<RosterEntry>, Vec<RosterEntry>, MatchOutcome)>>,
}

impl MockRatingCalculator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Get all calculation calls made (for testing)
    pub fn get_calculation_calls(&self) -> Vec<(Vec<RosterEntry>, Vec<RosterEntry>, MatchOutcome)> {
        self.calculation_calls
            .lock()
            .map(|calls| calls.clone())
            .unwrap_or_default()
    }
}

impl RatingCalculator for MockRatingCalculator {
    fn rate(
        &self,
        team_a: &[RosterEntry],
        team_b: &[RosterEntry],
        outcome: MatchOutcome,
    ) -> Result<TeamRatingChanges> {
        if let Ok(mut calls) = self.calculation_calls.lock() {
            calls.push((team_a.to_vec(), team_b.to_vec(), outcome));
        }

        ensure_rosters(team_a, team_b)?;

        let unchanged = |entry: &RosterEntry| RatingDelta::new(entry.player_id, entry.rating, 0.0);

        Ok(TeamRatingChanges {
            team_a: team_a.iter().map(unchanged).collect(),
            team_b: team_b.iter().map(unchanged).collect(),
        })
    }

    fn initial_rating(&self) -> i32 {
        1000
    }
}
