use std::sync::Arc;

use tracing::{error, info};

use super::clock::Clock;
use super::domain::{Evaluation, EvaluationId, EvaluationSubmission, HistoryEntry, LinkToken};
use super::gateway::{AccessError, AccessGateway, UNAVAILABLE_MESSAGE};
use super::questions::{QuestionSet, ValidationFailure};
use super::rate_limit::ClientKey;
use super::repository::{
    ConsumeOutcome, EvaluationHistoryStore, EvaluationRepository, LinkRepository, RepositoryError,
};
use super::retry::{RetryError, RetryPolicy};
use super::scoring::ScoringEngine;
use super::sentinel::{context, SecurityEventType, SecuritySentinel, SessionId};

const SAVE_FAILED_MESSAGE: &str =
    "your evaluation could not be saved; please contact the person who shared this link";

/// Drives a submission from CSRF check to persisted evaluation and history entry.
pub struct SubmissionCoordinator<L, E, H> {
    gateway: Arc<AccessGateway<L>>,
    links: Arc<L>,
    evaluations: Arc<E>,
    history: Arc<H>,
    sentinel: Arc<SecuritySentinel>,
    engine: ScoringEngine,
    clock: Arc<dyn Clock>,
    policy: RetryPolicy,
}

impl<L, E, H> SubmissionCoordinator<L, E, H>
where
    L: LinkRepository + 'static,
    E: EvaluationRepository + 'static,
    H: EvaluationHistoryStore + 'static,
{
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        gateway: Arc<AccessGateway<L>>,
        links: Arc<L>,
        evaluations: Arc<E>,
        history: Arc<H>,
        sentinel: Arc<SecuritySentinel>,
        engine: ScoringEngine,
        clock: Arc<dyn Clock>,
        policy: RetryPolicy,
    ) -> Self {
        Self {
            gateway,
            links,
            evaluations,
            history,
            sentinel,
            engine,
            clock,
            policy,
        }
    }

    pub async fn submit(
        &self,
        raw_token: &str,
        client: &ClientKey,
        form_token: &str,
        session: &SessionId,
        submission: EvaluationSubmission,
    ) -> Result<EvaluationId, SubmissionError> {
        if !self.sentinel.validate(form_token, session) {
            let token = LinkToken::parse(raw_token).ok();
            self.sentinel.log(
                SecurityEventType::CsrfMismatch,
                token.as_ref(),
                context([("session_present", (!session.0.is_empty()).to_string())]),
            );
            return Err(SubmissionError::CsrfMismatch);
        }

        let link = self.gateway.resolve(raw_token, client).await?;

        let questions = QuestionSet::for_type(link.evaluation_type);
        let answers = match questions.validate_submission(&submission) {
            Ok(answers) => answers,
            Err(failure) => {
                self.sentinel.log(
                    SecurityEventType::ValidationFailed,
                    Some(&link.token),
                    context([("field", failure.field().to_string())]),
                );
                return Err(SubmissionError::ValidationFailed(failure));
            }
        };

        let report = self
            .sentinel
            .flag_if_suspicious(&link.token, session, &submission, &answers);
        let outcome = self.engine.score(answers.ratings());

        let evaluation = Evaluation {
            id: EvaluationId::generate(),
            link_token: link.token.clone(),
            subject_id: link.subject_id.clone(),
            subject_name: link.subject_name.clone(),
            evaluation_type: link.evaluation_type,
            evaluator_name: submission.evaluator_name.trim().to_string(),
            submitted_at: self.clock.now(),
            answers,
            free_text: submission.free_text,
            general_feedback: submission.general_feedback,
            verdict: outcome.verdict,
            score: outcome.score,
            flagged_for_review: report.is_suspicious(),
            review_signals: report.signals,
        };

        // Consumption and persistence run detached so a dropped request cannot leave a
        // consumed link half-written.
        let task = Finalize {
            links: self.links.clone(),
            evaluations: self.evaluations.clone(),
            history: self.history.clone(),
            sentinel: self.sentinel.clone(),
            policy: self.policy,
        };
        let finalized = tokio::spawn(task.run(evaluation))
            .await
            .unwrap_or_else(|join| {
                Err(SubmissionError::PersistenceFailure {
                    attempts: 0,
                    detail: join.to_string(),
                })
            });

        if finalized.is_ok() {
            self.sentinel.retire(session);
        }
        finalized
    }
}

struct Finalize<L, E, H> {
    links: Arc<L>,
    evaluations: Arc<E>,
    history: Arc<H>,
    sentinel: Arc<SecuritySentinel>,
    policy: RetryPolicy,
}

impl<L, E, H> Finalize<L, E, H>
where
    L: LinkRepository + 'static,
    E: EvaluationRepository + 'static,
    H: EvaluationHistoryStore + 'static,
{
    async fn run(self, evaluation: Evaluation) -> Result<EvaluationId, SubmissionError> {
        let token = evaluation.link_token.clone();
        let id = evaluation.id.clone();

        let consumed = self
            .policy
            .run("consume link", || self.links.consume(&token, &id))
            .await;
        match consumed {
            Ok(ConsumeOutcome::Consumed) => {}
            Ok(ConsumeOutcome::AlreadyUsed { bound: Some(bound) }) if bound == id => {}
            Ok(ConsumeOutcome::AlreadyUsed { .. }) => {
                self.sentinel.log(
                    SecurityEventType::TokenAlreadyUsed,
                    Some(&token),
                    context([("stage", "consume".to_string())]),
                );
                return Err(AccessError::TokenAlreadyUsed.into());
            }
            Ok(ConsumeOutcome::Missing) => {
                self.sentinel.log(
                    SecurityEventType::TokenNotFound,
                    Some(&token),
                    context([("stage", "consume".to_string())]),
                );
                return Err(AccessError::TokenNotFound.into());
            }
            Err(err) => return Err(self.persistence_failure(&token, err)),
        }

        let summary = (evaluation.verdict, evaluation.score, evaluation.flagged_for_review);
        let entry = HistoryEntry::for_evaluation(&evaluation);
        if let Err(err) = self.persist(evaluation, entry).await {
            return Err(self.persistence_failure(&token, err));
        }

        let (verdict, score, flagged) = summary;
        info!(
            evaluation_id = %id.0,
            verdict = verdict.label(),
            score,
            flagged,
            "external evaluation recorded"
        );
        self.sentinel.log(
            SecurityEventType::EvaluationSubmitted,
            Some(&token),
            context([
                ("evaluation_id", id.0.clone()),
                ("verdict", verdict.label().to_string()),
                ("flagged_for_review", flagged.to_string()),
            ]),
        );
        Ok(id)
    }

    async fn persist(&self, evaluation: Evaluation, entry: HistoryEntry) -> Result<(), RetryError> {
        let store = self.evaluations.as_ref();
        let mut attempt = 0;
        self.policy
            .run("insert evaluation", move || {
                attempt += 1;
                let replay = attempt > 1;
                let evaluation = evaluation.clone();
                async move {
                    match store.insert(evaluation).await {
                        // A retry after a lost acknowledgement finds its own row.
                        Err(RepositoryError::Conflict) if replay => Ok(()),
                        other => other,
                    }
                }
            })
            .await?;

        let history = self.history.as_ref();
        self.policy
            .run("append history", move || history.append(entry.clone()))
            .await
    }

    fn persistence_failure(&self, token: &LinkToken, err: RetryError) -> SubmissionError {
        error!(
            operation = err.operation,
            attempts = err.attempts,
            error = %err.last,
            "evaluation persistence exhausted retries"
        );
        self.sentinel.log(
            SecurityEventType::PersistenceFailure,
            Some(token),
            context([
                ("operation", err.operation.to_string()),
                ("attempts", err.attempts.to_string()),
                ("error", err.last.to_string()),
            ]),
        );
        SubmissionError::PersistenceFailure {
            attempts: err.attempts,
            detail: err.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SubmissionError {
    #[error("form token does not match this session")]
    CsrfMismatch,
    #[error(transparent)]
    Access(#[from] AccessError),
    #[error(transparent)]
    ValidationFailed(ValidationFailure),
    #[error("evaluation could not be persisted: {detail}")]
    PersistenceFailure { attempts: u32, detail: String },
}

impl SubmissionError {
    /// What the evaluator is told. Only validation failures name the offending field.
    pub fn public_message(&self) -> String {
        match self {
            Self::ValidationFailed(failure) => failure.to_string(),
            Self::PersistenceFailure { .. } => SAVE_FAILED_MESSAGE.to_string(),
            Self::CsrfMismatch | Self::Access(_) => UNAVAILABLE_MESSAGE.to_string(),
        }
    }
}
