use serde::Serialize;

use super::super::domain::Rating;

/// Five-level classification of an averaged score, used by structured inspections.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Band {
    Excellent,
    VeryGood,
    Good,
    Regular,
    Poor,
    NoAssessment,
}

impl Band {
    pub fn from_average(average: f64) -> Self {
        if average >= 4.5 {
            Self::Excellent
        } else if average >= 3.5 {
            Self::VeryGood
        } else if average >= 2.5 {
            Self::Good
        } else if average >= 1.5 {
            Self::Regular
        } else {
            Self::Poor
        }
    }

    pub const fn label(self) -> &'static str {
        match self {
            Self::Excellent => "Excellent",
            Self::VeryGood => "Very Good",
            Self::Good => "Good",
            Self::Regular => "Regular",
            Self::Poor => "Poor",
            Self::NoAssessment => "No Assessment",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct BandedScore {
    pub band: Band,
    pub average: Option<f64>,
    pub score: u32,
    pub answered: usize,
}

pub(crate) fn banded<'a>(ratings: impl IntoIterator<Item = &'a Rating>) -> BandedScore {
    let (total, answered) = ratings
        .into_iter()
        .fold((0u32, 0usize), |(total, count), rating| {
            (total + rating.weight(), count + 1)
        });

    if answered == 0 {
        return BandedScore {
            band: Band::NoAssessment,
            average: None,
            score: 0,
            answered,
        };
    }

    let average = f64::from(total) / answered as f64;
    BandedScore {
        band: Band::from_average(average),
        average: Some(average),
        score: total,
        answered,
    }
}
