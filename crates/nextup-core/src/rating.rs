//! Pairwise comparison rating and the tier-banded effective priority.
//!
//! Ratings follow the Elo expected-score formula. They only refine order
//! inside a tier: `effective_priority` clamps the normalised rating into the
//! task's band, so a Low task can never outrank a Medium one on rating alone.

use serde::{Deserialize, Serialize};

use crate::storage::config::RatingConfig;
use crate::task::Task;

/// Map a task's rating into its tier band.
///
/// Tier 3 -> [2.0, 3.0], tier 2 -> [1.0, 2.0], tier 1 -> [0.0, 1.0].
pub fn effective_priority(task: &Task, cfg: &RatingConfig) -> f64 {
    let span = (cfg.range_max - cfg.range_min).max(f64::EPSILON);
    let normalized = ((task.rating - cfg.range_min) / span).clamp(0.0, 1.0);
    let normalized = if normalized.is_nan() { 0.5 } else { normalized };
    task.tier.band_floor() + normalized
}

/// Probability that a player rated `own` beats one rated `opponent`.
pub fn expected_score(own: f64, opponent: f64) -> f64 {
    1.0 / (1.0 + 10f64.powf((opponent - own) / 400.0))
}

/// Provisional ratings move faster.
pub fn k_factor(comparison_count: u32, cfg: &RatingConfig) -> f64 {
    if comparison_count < cfg.provisional_comparisons {
        cfg.k_provisional
    } else {
        cfg.k_established
    }
}

/// Rating movement from one comparison.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RatingUpdate {
    pub winner_before: f64,
    pub winner_after: f64,
    pub loser_before: f64,
    pub loser_after: f64,
}

/// Apply a comparison result to both tasks in place.
///
/// Both expected scores are taken from the ratings before either side moves.
pub fn apply_comparison(winner: &mut Task, loser: &mut Task, cfg: &RatingConfig) -> RatingUpdate {
    let winner_before = winner.rating;
    let loser_before = loser.rating;

    let winner_expected = expected_score(winner_before, loser_before);
    let loser_expected = expected_score(loser_before, winner_before);

    winner.rating = winner_before + k_factor(winner.comparison_count, cfg) * (1.0 - winner_expected);
    loser.rating = loser_before + k_factor(loser.comparison_count, cfg) * (0.0 - loser_expected);
    winner.comparison_count = winner.comparison_count.saturating_add(1);
    loser.comparison_count = loser.comparison_count.saturating_add(1);

    RatingUpdate {
        winner_before,
        winner_after: winner.rating,
        loser_before,
        loser_after: loser.rating,
    }
}

/// Put a task back at the default rating with no comparison history.
pub fn reset_rating(task: &mut Task, cfg: &RatingConfig) {
    task.rating = cfg.default_rating;
    task.comparison_count = 0;
}
