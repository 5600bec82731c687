//! Tokenized external performance evaluations: single-use links, guarded access,
//! anti-forgery and review heuristics, deterministic scoring, and durable submission.

pub mod clock;
pub mod coordinator;
pub mod domain;
pub mod eligibility;
pub mod gateway;
pub mod issuer;
pub mod questions;
pub mod rate_limit;
pub mod repository;
pub mod retry;
pub mod router;
pub mod scoring;
pub mod sentinel;
pub mod service;

#[cfg(test)]
mod tests;

pub use clock::{Clock, SystemClock};
pub use coordinator::{SubmissionCoordinator, SubmissionError};
pub use domain::{
    Evaluation, EvaluationId, EvaluationLink, EvaluationSubmission, EvaluationType, HistoryEntry,
    IssuedLink, LinkInfo, LinkToken, Rating, SubjectId, Verdict, TOKEN_LENGTH,
};
pub use eligibility::{Eligibility, EligibilityChecker};
pub use gateway::{AccessError, AccessGateway, UNAVAILABLE_MESSAGE};
pub use issuer::{IssueError, IssueLinkRequest, LinkIssuer};
pub use questions::{CompletedAnswers, Question, QuestionSet, ValidationFailure};
pub use rate_limit::{ClientKey, InMemoryRateLimitStore, RateDecision, RateLimitStore, RateLimiter};
pub use repository::{
    ConsumeOutcome, EvaluationHistoryStore, EvaluationRepository, LinkRepository, RepositoryError,
};
pub use retry::{RetryError, RetryPolicy};
pub use router::{evaluation_router, SESSION_HEADER};
pub use scoring::{Band, BandedScore, ScoringEngine, VerdictScore};
pub use sentinel::{
    FormToken, InMemoryFormTokenStore, InMemorySecurityLog, SecurityEvent, SecurityEventSink,
    SecurityEventType, SecuritySentinel, SecuritySeverity, SessionId, SuspicionSignal,
};
pub use service::{EvaluationForm, EvaluationStores, ExternalEvaluationService};
