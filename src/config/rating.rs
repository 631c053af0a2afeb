//! Rating system configuration

use crate::error::{PipelineError, Result};
use serde::{Deserialize, Serialize};

/// K-factor used while a player has fewer than `max_matches` rated matches
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct KFactorTier {
    pub max_matches: u32,
    pub k_factor: f64,
}

/// Elo parameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RatingConfig {
    /// Rating given to players on first sight
    pub initial_rating: i32,
    /// Experience tiers, ordered by `max_matches`
    pub k_factor_tiers: Vec<KFactorTier>,
    /// K-factor once a player is past every tier
    pub veteran_k_factor: f64,
    /// Scale each player's change by 1/sqrt(team size) in team matches
    pub team_dampening: bool,
}

impl Default for RatingConfig {
    fn default() -> Self {
        Self {
            initial_rating: 1000,
            k_factor_tiers: vec![
                KFactorTier {
                    max_matches: 10,
                    k_factor: 50.0,
                },
                KFactorTier {
                    max_matches: 30,
                    k_factor: 40.0,
                },
                KFactorTier {
                    max_matches: 100,
                    k_factor: 32.0,
                },
            ],
            veteran_k_factor: 24.0,
            team_dampening: true,
        }
    }
}

impl RatingConfig {
    /// Single K-factor for everyone
    pub fn fixed(k_factor: f64) -> Self {
        Self {
            k_factor_tiers: Vec::new(),
            veteran_k_factor: k_factor,
            ..Self::default()
        }
    }

    /// K-factor for a player with `matches_played` rated matches
    pub fn k_factor(&self, matches_played: u32) -> f64 {
        self.k_factor_tiers
            .iter()
            .find(|tier| matches_played < tier.max_matches)
            .map(|tier| tier.k_factor)
            .unwrap_or(self.veteran_k_factor)
    }

    /// Tiers must be ordered and K must never grow with experience
    pub fn validate(&self) -> Result<()> {
        if self.initial_rating < 0 {
            return Err(config_error("Initial rating cannot be negative"));
        }

        let mut previous: Option<KFactorTier> = None;
        for tier in &self.k_factor_tiers {
            if tier.k_factor <= 0.0 || !tier.k_factor.is_finite() {
                return Err(config_error("K-factor tiers must be positive"));
            }
            if let Some(prev) = previous {
                if tier.max_matches <= prev.max_matches {
                    return Err(config_error(
                        "K-factor tiers must be ordered by increasing match count",
                    ));
                }
                if tier.k_factor > prev.k_factor {
                    return Err(config_error(
                        "K-factor must not increase with matches played",
                    ));
                }
            }
            previous = Some(*tier);
        }

        if self.veteran_k_factor <= 0.0 || !self.veteran_k_factor.is_finite() {
            return Err(config_error("Veteran K-factor must be positive"));
        }
        if let Some(last) = previous {
            if self.veteran_k_factor > last.k_factor {
                return Err(config_error(
                    "Veteran K-factor must not exceed the last tier",
                ));
            }
        }

        Ok(())
    }
}

fn config_error(message: &str) -> anyhow::Error {
    PipelineError::ConfigurationError {
        message: message.to_string(),
    }
    .into()
}
