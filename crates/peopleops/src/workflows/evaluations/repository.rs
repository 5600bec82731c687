use std::time::Duration;

use async_trait::async_trait;

use super::domain::{
    Evaluation, EvaluationId, EvaluationLink, EvaluationType, HistoryEntry, LinkToken, SubjectId,
};

/// Link store. `consume` must be a single compare-and-set on the `used` flag.
#[async_trait]
pub trait LinkRepository: Send + Sync {
    /// Fails with `Conflict` when the token already exists.
    async fn insert(&self, link: EvaluationLink) -> Result<EvaluationLink, RepositoryError>;

    async fn fetch(&self, token: &LinkToken) -> Result<Option<EvaluationLink>, RepositoryError>;

    /// Flip `used` false->true and bind `evaluation_id` atomically.
    async fn consume(
        &self,
        token: &LinkToken,
        evaluation_id: &EvaluationId,
    ) -> Result<ConsumeOutcome, RepositoryError>;
}

/// Result of the used-flag compare-and-set.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConsumeOutcome {
    Consumed,
    /// Someone already flipped the flag; `bound` is the evaluation they bound.
    AlreadyUsed { bound: Option<EvaluationId> },
    Missing,
}

/// Append-only evaluation store.
#[async_trait]
pub trait EvaluationRepository: Send + Sync {
    /// Fails with `Conflict` when the id already exists.
    async fn insert(&self, evaluation: Evaluation) -> Result<(), RepositoryError>;

    async fn fetch(&self, id: &EvaluationId) -> Result<Option<Evaluation>, RepositoryError>;

    /// Most recent evaluation of `kind` for `subject` by `submitted_at`.
    async fn latest_for(
        &self,
        subject: &SubjectId,
        kind: EvaluationType,
    ) -> Result<Option<Evaluation>, RepositoryError>;
}

/// Write-only sink for the subject's employment history.
#[async_trait]
pub trait EvaluationHistoryStore: Send + Sync {
    async fn append(&self, entry: HistoryEntry) -> Result<(), RepositoryError>;
}

/// Error enumeration for store failures.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RepositoryError {
    #[error("record already exists")]
    Conflict,
    #[error("record not found")]
    NotFound,
    #[error("repository unavailable: {0}")]
    Unavailable(String),
    #[error("repository call exceeded {0:?}")]
    Timeout(Duration),
}

impl RepositoryError {
    /// Whether another attempt may succeed.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Unavailable(_) | Self::Timeout(_))
    }

    pub fn poisoned(store: &str) -> Self {
        Self::Unavailable(format!("{store} lock poisoned"))
    }
}
