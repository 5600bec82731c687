use std::collections::BTreeSet;
use std::sync::Arc;

use serde::Serialize;

use super::clock::Clock;
use super::coordinator::{SubmissionCoordinator, SubmissionError};
use super::domain::{
    Evaluation, EvaluationId, EvaluationSubmission, EvaluationType, IssuedLink, LinkInfo, Rating,
    SubjectId,
};
use super::eligibility::{Eligibility, EligibilityChecker};
use super::gateway::{AccessError, AccessGateway};
use super::issuer::{IssueError, IssueLinkRequest, LinkIssuer};
use super::questions::QuestionSet;
use super::rate_limit::{ClientKey, RateLimitStore, RateLimiter};
use super::repository::{
    EvaluationHistoryStore, EvaluationRepository, LinkRepository, RepositoryError,
};
use super::retry::RetryPolicy;
use super::scoring::{BandedScore, ScoringEngine, VerdictScore};
use super::sentinel::{FormToken, FormTokenStore, SecurityEventSink, SecuritySentinel, SessionId};
use crate::config::EvaluationLinkConfig;
use crate::workflows::directory::{
    DirectoryError, EmployeeDirectory, EmployeeStatus, SubjectSummary,
};

/// Storage and collaborator handles the service is assembled from.
pub struct EvaluationStores<L, E, H> {
    pub links: Arc<L>,
    pub evaluations: Arc<E>,
    pub history: Arc<H>,
    pub directory: Arc<dyn EmployeeDirectory>,
    pub rate_limits: Arc<dyn RateLimitStore>,
    pub form_tokens: Arc<dyn FormTokenStore>,
    pub security_log: Arc<dyn SecurityEventSink>,
    pub clock: Arc<dyn Clock>,
}

/// What the external evaluator receives when opening a link.
#[derive(Debug, Clone, Serialize)]
pub struct EvaluationForm {
    pub link: LinkInfo,
    pub questions: &'static QuestionSet,
    pub form_token: FormToken,
}

/// Facade composing issuance, access, submission, and scoring for the external
/// evaluation flow.
pub struct ExternalEvaluationService<L, E, H> {
    directory: Arc<dyn EmployeeDirectory>,
    evaluations: Arc<E>,
    eligibility: Arc<EligibilityChecker<E>>,
    issuer: LinkIssuer<L, E>,
    gateway: Arc<AccessGateway<L>>,
    coordinator: SubmissionCoordinator<L, E, H>,
    sentinel: Arc<SecuritySentinel>,
    limiter: Arc<RateLimiter>,
    engine: ScoringEngine,
    policy: RetryPolicy,
    clock: Arc<dyn Clock>,
}

impl<L, E, H> ExternalEvaluationService<L, E, H>
where
    L: LinkRepository + 'static,
    E: EvaluationRepository + 'static,
    H: EvaluationHistoryStore + 'static,
{
    pub fn new(stores: EvaluationStores<L, E, H>, config: &EvaluationLinkConfig) -> Self {
        let EvaluationStores {
            links,
            evaluations,
            history,
            directory,
            rate_limits,
            form_tokens,
            security_log,
            clock,
        } = stores;

        let policy = RetryPolicy::from_config(config);
        let engine = ScoringEngine::new();
        let sentinel = Arc::new(SecuritySentinel::new(
            form_tokens,
            security_log,
            clock.clone(),
            config,
        ));
        let limiter = Arc::new(RateLimiter::new(rate_limits, config));
        let eligibility = Arc::new(EligibilityChecker::new(
            evaluations.clone(),
            clock.clone(),
            config,
        ));
        let issuer = LinkIssuer::new(
            links.clone(),
            eligibility.clone(),
            directory.clone(),
            sentinel.clone(),
            clock.clone(),
            config,
        );
        let gateway = Arc::new(AccessGateway::new(
            links.clone(),
            limiter.clone(),
            sentinel.clone(),
            clock.clone(),
            config,
        ));
        let coordinator = SubmissionCoordinator::new(
            gateway.clone(),
            links,
            evaluations.clone(),
            history,
            sentinel.clone(),
            engine,
            clock.clone(),
            policy,
        );

        Self {
            directory,
            evaluations,
            eligibility,
            issuer,
            gateway,
            coordinator,
            sentinel,
            limiter,
            engine,
            policy,
            clock,
        }
    }

    /// Subjects for the picker; `None` applies the active-like default.
    pub fn list_subjects(
        &self,
        statuses: Option<BTreeSet<EmployeeStatus>>,
    ) -> Result<Vec<SubjectSummary>, DirectoryError> {
        let statuses = statuses.unwrap_or_else(EmployeeStatus::active_like);
        self.directory.list_eligible_subjects(&statuses)
    }

    pub async fn eligibility(
        &self,
        subject: &SubjectId,
        kind: EvaluationType,
    ) -> Result<Eligibility, RepositoryError> {
        self.eligibility.eligibility(subject, kind).await
    }

    pub async fn issue_link(&self, request: IssueLinkRequest) -> Result<IssuedLink, IssueError> {
        self.issuer.issue_link(request).await
    }

    pub async fn resolve_link(&self, raw: &str, client: &ClientKey) -> Result<LinkInfo, AccessError> {
        self.gateway.resolve_link(raw, client).await
    }

    /// Resolve the link and hand out the form with the session's anti-forgery token.
    pub async fn open_form(
        &self,
        raw: &str,
        client: &ClientKey,
        session: &SessionId,
    ) -> Result<EvaluationForm, AccessError> {
        let link = self.gateway.resolve(raw, client).await?;
        let form_token = self
            .sentinel
            .issue_form_token(session)
            .map_err(AccessError::Unavailable)?;
        Ok(EvaluationForm {
            questions: QuestionSet::for_type(link.evaluation_type),
            link: link.info(),
            form_token,
        })
    }

    pub async fn submit(
        &self,
        raw: &str,
        client: &ClientKey,
        form_token: &str,
        session: &SessionId,
        submission: EvaluationSubmission,
    ) -> Result<EvaluationId, SubmissionError> {
        self.coordinator
            .submit(raw, client, form_token, session, submission)
            .await
    }

    pub async fn evaluation(&self, id: &EvaluationId) -> Result<Option<Evaluation>, RepositoryError> {
        self.policy
            .run("fetch evaluation", || self.evaluations.fetch(id))
            .await
            .map_err(|err| err.last)
    }

    /// Reclaim rate-limit buckets whose window has elapsed.
    pub async fn sweep_rate_limits(&self) -> Result<usize, RepositoryError> {
        self.limiter.sweep(self.clock.now()).await
    }

    /// Drop anti-forgery tokens for forms whose link lifetime has passed.
    pub fn sweep_form_tokens(&self) -> Result<usize, RepositoryError> {
        self.sentinel.sweep_form_tokens()
    }

    /// Banded scoring used by internal inspections.
    pub fn score_inspection(&self, ratings: &[Rating]) -> BandedScore {
        self.engine.banded(ratings)
    }

    pub fn score_answers(&self, ratings: &[Rating]) -> VerdictScore {
        self.engine.score(ratings)
    }
}
