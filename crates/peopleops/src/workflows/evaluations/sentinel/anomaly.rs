//! Heuristics that tag a submission for manual review without rejecting it.

use std::sync::OnceLock;
use std::time::Duration;

use regex::Regex;
use serde::Serialize;

use super::super::domain::{EvaluationSubmission, Rating};
use super::super::questions::CompletedAnswers;

const UNIFORM_MIN_ANSWERS: usize = 3;
const REPEATED_RUN: usize = 5;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "signal", rename_all = "snake_case")]
pub enum SuspicionSignal {
    FastCompletion { seconds: u64 },
    UniformAnswers { rating: Rating },
    PlaceholderText { field: String },
}

impl SuspicionSignal {
    pub fn describe(&self) -> String {
        match self {
            Self::FastCompletion { seconds } => format!("completed in {seconds}s"),
            Self::UniformAnswers { rating } => format!("all answers {}", rating.label()),
            Self::PlaceholderText { field } => format!("placeholder text in {field}"),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SuspicionReport {
    pub signals: Vec<SuspicionSignal>,
}

impl SuspicionReport {
    pub fn is_suspicious(&self) -> bool {
        !self.signals.is_empty()
    }
}

fn placeholder_patterns() -> &'static [Regex] {
    static PATTERNS: OnceLock<Vec<Regex>> = OnceLock::new();
    PATTERNS.get_or_init(|| {
        [
            r"(?i)\blorem\s+ipsum\b",
            r"(?i)\b(asdf|qwerty|zxcv)\w*",
            r"(?i)^\s*(test(ing)?|teste|xxx+|n/?a|-+|\.+)\s*$",
            r"(?i)^\s*https?://\S+\s*$",
        ]
        .iter()
        .filter_map(|pattern| Regex::new(pattern).ok())
        .collect()
    })
}

/// True for a run of `REPEATED_RUN` identical non-space characters or text made of one
/// repeated character.
fn has_repeated_run(text: &str) -> bool {
    let trimmed = text.trim();
    let mut chars = trimmed.chars();
    if let Some(first) = chars.next() {
        if trimmed.chars().count() > 1 && chars.all(|ch| ch == first) {
            return true;
        }
    }

    let mut previous = None;
    let mut run = 0;
    for ch in trimmed.chars() {
        if ch.is_whitespace() {
            previous = None;
            run = 0;
            continue;
        }
        if Some(ch) == previous {
            run += 1;
        } else {
            previous = Some(ch);
            run = 1;
        }
        if run >= REPEATED_RUN {
            return true;
        }
    }
    false
}

pub(crate) fn looks_like_placeholder(text: &str) -> bool {
    if text.trim().is_empty() {
        return false;
    }
    has_repeated_run(text) || placeholder_patterns().iter().any(|re| re.is_match(text))
}

pub(crate) fn inspect(
    submission: &EvaluationSubmission,
    answers: &CompletedAnswers,
    elapsed: Option<Duration>,
    min_completion: Duration,
) -> SuspicionReport {
    let mut signals = Vec::new();

    if let Some(elapsed) = elapsed {
        if elapsed < min_completion {
            signals.push(SuspicionSignal::FastCompletion {
                seconds: elapsed.as_secs(),
            });
        }
    }

    if answers.len() >= UNIFORM_MIN_ANSWERS {
        let mut ratings = answers.ratings();
        if let Some(first) = ratings.next() {
            if ratings.all(|rating| rating == first) {
                signals.push(SuspicionSignal::UniformAnswers { rating: *first });
            }
        }
    }

    let free_text = submission
        .free_text
        .iter()
        .map(|(key, text)| (key.as_str(), text.as_str()));
    let feedback = submission
        .general_feedback
        .as_deref()
        .map(|text| ("general_feedback", text));
    for (field, text) in free_text.chain(feedback) {
        if looks_like_placeholder(text) {
            signals.push(SuspicionSignal::PlaceholderText {
                field: field.to_string(),
            });
        }
    }

    SuspicionReport { signals }
}
