use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use rand::distributions::Alphanumeric;
use rand::Rng;
use serde::{Deserialize, Serialize};

use super::questions::CompletedAnswers;
use super::sentinel::SuspicionSignal;

/// Number of base62 characters in a link token (about 190 bits of entropy).
pub const TOKEN_LENGTH: usize = 32;

/// Path segment under which shareable evaluation links are served.
pub const EXTERNAL_EVALUATION_PATH: &str = "/external-evaluation";

/// Employee identifier as issued by the HR system of record.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct SubjectId(pub String);

/// Identifier wrapper for persisted evaluations.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EvaluationId(pub String);

impl EvaluationId {
    pub fn generate() -> Self {
        Self(format!("eval-{}", uuid::Uuid::new_v4()))
    }
}

/// Relationship of the external evaluator to the subject.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EvaluationType {
    #[serde(alias = "colleague")]
    Peer,
    Manager,
    #[serde(alias = "supervisor")]
    Sponsor,
}

impl EvaluationType {
    pub const ALL: [EvaluationType; 3] = [Self::Peer, Self::Manager, Self::Sponsor];

    pub const fn label(self) -> &'static str {
        match self {
            Self::Peer => "peer",
            Self::Manager => "manager",
            Self::Sponsor => "sponsor",
        }
    }

    pub const fn display_name(self) -> &'static str {
        match self {
            Self::Peer => "Peer",
            Self::Manager => "Manager",
            Self::Sponsor => "Sponsor",
        }
    }
}

impl fmt::Display for EvaluationType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Opaque single-use capability token carried in the shareable URL.
#[derive(Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct LinkToken(String);

impl LinkToken {
    /// Mint a fresh token from the thread-local CSPRNG.
    pub fn generate() -> Self {
        let token: String = rand::thread_rng()
            .sample_iter(&Alphanumeric)
            .take(TOKEN_LENGTH)
            .map(char::from)
            .collect();
        Self(token)
    }

    /// Shape check only; says nothing about whether the token was ever issued.
    pub fn parse(raw: &str) -> Result<Self, MalformedToken> {
        if raw.len() == TOKEN_LENGTH && raw.bytes().all(|byte| byte.is_ascii_alphanumeric()) {
            Ok(Self(raw.to_string()))
        } else {
            Err(MalformedToken { length: raw.len() })
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Prefix safe to write into logs and security events.
    pub fn redacted(&self) -> String {
        format!("{}…", &self.0[..8])
    }
}

impl fmt::Debug for LinkToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("LinkToken").field(&self.redacted()).finish()
    }
}

impl TryFrom<String> for LinkToken {
    type Error = MalformedToken;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<LinkToken> for String {
    fn from(value: LinkToken) -> Self {
        value.0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("token does not match the issued format ({length} bytes)")]
pub struct MalformedToken {
    pub length: usize,
}

/// Persisted single-use link. `used` flips false->true once and `expires_at` never moves.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EvaluationLink {
    pub token: LinkToken,
    pub subject_id: SubjectId,
    pub subject_name: String,
    pub evaluation_type: EvaluationType,
    pub issuer_name: String,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub used: bool,
    pub bound_evaluation_id: Option<EvaluationId>,
}

impl EvaluationLink {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now > self.expires_at
    }

    pub fn shareable_url(&self, origin: &str) -> String {
        format!(
            "{}{}/{}",
            origin.trim_end_matches('/'),
            EXTERNAL_EVALUATION_PATH,
            self.token.as_str()
        )
    }

    /// The subset revealed to the external evaluator.
    pub fn info(&self) -> LinkInfo {
        LinkInfo {
            subject_name: self.subject_name.clone(),
            evaluation_type: self.evaluation_type,
            issuer_name: self.issuer_name.clone(),
            expires_at: self.expires_at,
        }
    }
}

/// Link returned to the issuer together with the URL to share.
#[derive(Debug, Clone, Serialize)]
pub struct IssuedLink {
    pub link: EvaluationLink,
    pub url: String,
}

/// Public view of a resolved link.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LinkInfo {
    pub subject_name: String,
    pub evaluation_type: EvaluationType,
    pub issuer_name: String,
    pub expires_at: DateTime<Utc>,
}

/// Five-point ordinal answer scale. "Very Poor" only appears on legacy forms.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Rating {
    #[serde(rename = "Excellent", alias = "Excelente", alias = "excellent")]
    Excellent,
    #[serde(rename = "Very Good", alias = "Muito Bom", alias = "very_good")]
    VeryGood,
    #[serde(rename = "Good", alias = "Bom", alias = "good")]
    Good,
    #[serde(rename = "Regular", alias = "regular")]
    Regular,
    #[serde(rename = "Poor", alias = "Ruim", alias = "poor")]
    Poor,
    #[serde(rename = "Very Poor", alias = "Muito Ruim", alias = "very_poor")]
    VeryPoor,
}

/// Grouping used by the tri-state verdict.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RatingTier {
    Positive,
    Neutral,
    Negative,
}

impl Rating {
    pub fn parse(raw: &str) -> Option<Self> {
        let normalized = raw
            .trim()
            .to_lowercase()
            .replace(['_', '-'], " ");
        match normalized.as_str() {
            "excellent" | "excelente" => Some(Self::Excellent),
            "very good" | "muito bom" => Some(Self::VeryGood),
            "good" | "bom" => Some(Self::Good),
            "regular" => Some(Self::Regular),
            "poor" | "ruim" => Some(Self::Poor),
            "very poor" | "muito ruim" => Some(Self::VeryPoor),
            _ => None,
        }
    }

    /// Numeric weight on the 1..=5 scale.
    pub const fn weight(self) -> u32 {
        match self {
            Self::Excellent => 5,
            Self::VeryGood => 4,
            Self::Good => 3,
            Self::Regular => 2,
            Self::Poor | Self::VeryPoor => 1,
        }
    }

    pub const fn tier(self) -> RatingTier {
        match self {
            Self::Excellent | Self::VeryGood => RatingTier::Positive,
            Self::Good | Self::Regular => RatingTier::Neutral,
            Self::Poor | Self::VeryPoor => RatingTier::Negative,
        }
    }

    pub const fn label(self) -> &'static str {
        match self {
            Self::Excellent => "Excellent",
            Self::VeryGood => "Very Good",
            Self::Good => "Good",
            Self::Regular => "Regular",
            Self::Poor => "Poor",
            Self::VeryPoor => "Very Poor",
        }
    }
}

/// Qualitative outcome of an external evaluation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Verdict {
    Positive,
    Negative,
    Neutral,
}

impl Verdict {
    pub const fn label(self) -> &'static str {
        match self {
            Self::Positive => "POSITIVE",
            Self::Negative => "NEGATIVE",
            Self::Neutral => "NEUTRAL",
        }
    }
}

/// Raw payload posted by the external evaluator.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct EvaluationSubmission {
    pub evaluator_name: String,
    #[serde(default)]
    pub answers: BTreeMap<String, Rating>,
    #[serde(default)]
    pub free_text: BTreeMap<String, String>,
    #[serde(default)]
    pub general_feedback: Option<String>,
}

/// Immutable record created once per consumed link.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Evaluation {
    pub id: EvaluationId,
    pub link_token: LinkToken,
    pub subject_id: SubjectId,
    pub subject_name: String,
    pub evaluation_type: EvaluationType,
    pub evaluator_name: String,
    pub submitted_at: DateTime<Utc>,
    pub answers: CompletedAnswers,
    pub free_text: BTreeMap<String, String>,
    pub general_feedback: Option<String>,
    pub verdict: Verdict,
    pub score: u32,
    pub flagged_for_review: bool,
    pub review_signals: Vec<SuspicionSignal>,
}

/// Entry appended to the subject's employment history after a successful submission.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub subject_id: SubjectId,
    pub title: String,
    pub description: String,
    pub category: String,
    pub actor: String,
    pub recorded_at: DateTime<Utc>,
}

pub const HISTORY_CATEGORY: &str = "performance_evaluation";

impl HistoryEntry {
    pub fn for_evaluation(evaluation: &Evaluation) -> Self {
        Self {
            subject_id: evaluation.subject_id.clone(),
            title: "External evaluation received".to_string(),
            description: format!(
                "{} evaluation by {}: {} (score {})",
                evaluation.evaluation_type.display_name(),
                evaluation.evaluator_name,
                evaluation.verdict.label(),
                evaluation.score
            ),
            category: HISTORY_CATEGORY.to_string(),
            actor: evaluation.evaluator_name.clone(),
            recorded_at: evaluation.submitted_at,
        }
    }
}
