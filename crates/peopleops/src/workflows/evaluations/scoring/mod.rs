//! Deterministic mapping from categorical answers to scores and verdicts.

mod bands;
mod verdict;

pub use bands::{Band, BandedScore};
pub use verdict::VerdictTally;

use super::domain::{Rating, Verdict};
use serde::Serialize;

/// Stateless scorer shared by the external evaluation and internal inspection flows.
#[derive(Debug, Clone, Copy, Default)]
pub struct ScoringEngine;

/// Tri-state result for external evaluations; `score` is the sum of answer weights.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct VerdictScore {
    pub verdict: Verdict,
    pub score: u32,
    pub tally: VerdictTally,
}

impl ScoringEngine {
    pub fn new() -> Self {
        Self
    }

    pub fn score<'a>(&self, ratings: impl IntoIterator<Item = &'a Rating>) -> VerdictScore {
        let ratings: Vec<&Rating> = ratings.into_iter().collect();
        let tally = VerdictTally::from_ratings(ratings.iter().copied());
        let score = ratings.iter().map(|rating| rating.weight()).sum();

        VerdictScore {
            verdict: tally.verdict(),
            score,
            tally,
        }
    }

    pub fn banded<'a>(&self, ratings: impl IntoIterator<Item = &'a Rating>) -> BandedScore {
        bands::banded(ratings)
    }
}
