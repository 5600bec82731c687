use serde::Serialize;

use super::super::domain::{Rating, RatingTier, Verdict};

/// Per-tier answer counts behind a verdict.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct VerdictTally {
    pub positive: usize,
    pub neutral: usize,
    pub negative: usize,
}

impl VerdictTally {
    pub(crate) fn from_ratings<'a>(ratings: impl IntoIterator<Item = &'a Rating>) -> Self {
        ratings
            .into_iter()
            .fold(Self::default(), |mut tally, rating| {
                match rating.tier() {
                    RatingTier::Positive => tally.positive += 1,
                    RatingTier::Neutral => tally.neutral += 1,
                    RatingTier::Negative => tally.negative += 1,
                }
                tally
            })
    }

    /// Positive needs a strict majority over both other tiers; any tie that is not a
    /// positive win, including positive == negative, resolves to neutral.
    pub fn verdict(&self) -> Verdict {
        if self.positive > self.negative && self.positive > self.neutral {
            Verdict::Positive
        } else if self.negative > self.positive {
            Verdict::Negative
        } else {
            Verdict::Neutral
        }
    }
}
