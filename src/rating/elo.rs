//! Team Elo with experience-tiered K and team-size dampening
//!
//! Each player is rated against the average of the opposing roster:
//!
//! ```text
//! expected = 1 / (1 + 10^((opponent_avg - rating) / 400))
//! change   = K(matches_played) * (actual - expected) / sqrt(team_size)
//! new      = max(0, round(rating + change))
//! ```

use crate::config::RatingConfig;
use crate::error::Result;
use crate::rating::calculator::{
    ensure_rosters, MatchOutcome, RatingCalculator, RatingDelta, TeamRatingChanges,
};
use crate::types::RosterEntry;
use skillratings::elo::{expected_score, EloRating};

/// Elo rating calculator
#[derive(Debug, Clone)]
pub struct EloRatingCalculator {
    config: RatingConfig,
}

impl EloRatingCalculator {
    /// Create a calculator; the configuration is validated first
    pub fn new(config: RatingConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self { config })
    }

    pub fn config(&self) -> &RatingConfig {
        &self.config
    }

    /// Probability that `rating` beats `opponent_rating`
    pub fn expected_score(rating: f64, opponent_rating: f64) -> f64 {
        let (expected, _) = expected_score(
            &EloRating { rating },
            &EloRating {
                rating: opponent_rating,
            },
        );
        expected
    }

    /// Unrounded change for one player
    pub fn rating_change(
        &self,
        rating: f64,
        opponent_rating: f64,
        won: bool,
        team_size: usize,
        k_factor: f64,
    ) -> f64 {
        let actual = if won { 1.0 } else { 0.0 };
        let change = k_factor * (actual - Self::expected_score(rating, opponent_rating));

        if self.config.team_dampening && team_size > 1 {
            change / (team_size as f64).sqrt()
        } else {
            change
        }
    }

    fn average(team: &[RosterEntry]) -> f64 {
        team.iter().map(|entry| entry.rating as f64).sum::<f64>() / team.len() as f64
    }

    fn rate_team(&self, team: &[RosterEntry], opponent_average: f64, won: bool) -> Vec<RatingDelta> {
        team.iter()
            .map(|entry| {
                let change = self.rating_change(
                    entry.rating as f64,
                    opponent_average,
                    won,
                    team.len(),
                    self.config.k_factor(entry.matches_played),
                );
                RatingDelta::new(entry.player_id, entry.rating, change)
            })
            .collect()
    }
}

impl RatingCalculator for EloRatingCalculator {
    fn rate(
        &self,
        team_a: &[RosterEntry],
        team_b: &[RosterEntry],
        outcome: MatchOutcome,
    ) -> Result<TeamRatingChanges> {
        ensure_rosters(team_a, team_b)?;

        let a_won = outcome == MatchOutcome::TeamAWins;
        let average_a = Self::average(team_a);
        let average_b = Self::average(team_b);

        Ok(TeamRatingChanges {
            team_a: self.rate_team(team_a, average_b, a_won),
            team_b: self.rate_team(team_b, average_a, !a_won),
        })
    }

    fn initial_rating(&self) -> i32 {
        self.config.initial_rating
    }
}
