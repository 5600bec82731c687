use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};

use crate::config::EvaluationLinkConfig;
use crate::workflows::directory::{EmployeeRecord, EmployeeStatus, RosterDirectory};
use crate::workflows::evaluations::clock::Clock;
use crate::workflows::evaluations::domain::{
    Evaluation, EvaluationId, EvaluationLink, EvaluationSubmission, EvaluationType, HistoryEntry,
    IssuedLink, LinkToken, Rating, SubjectId,
};
use crate::workflows::evaluations::issuer::IssueLinkRequest;
use crate::workflows::evaluations::questions::QuestionSet;
use crate::workflows::evaluations::rate_limit::{
    ClientKey, InMemoryRateLimitStore, RateDecision, RateLimitStore,
};
use crate::workflows::evaluations::repository::{
    ConsumeOutcome, EvaluationHistoryStore, EvaluationRepository, LinkRepository, RepositoryError,
};
use crate::workflows::evaluations::sentinel::{
    InMemoryFormTokenStore, InMemorySecurityLog, SessionId,
};
use crate::workflows::evaluations::service::{EvaluationStores, ExternalEvaluationService};

pub(super) fn start() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2025, 3, 3, 9, 0, 0).unwrap()
}

pub(super) struct ManualClock {
    now: Mutex<DateTime<Utc>>,
}

impl ManualClock {
    pub(super) fn at(now: DateTime<Utc>) -> Self {
        Self {
            now: Mutex::new(now),
        }
    }

    pub(super) fn advance(&self, by: chrono::Duration) {
        let mut guard = self.now.lock().expect("clock lock");
        *guard += by;
    }

    pub(super) fn set(&self, to: DateTime<Utc>) {
        *self.now.lock().expect("clock lock") = to;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock().expect("clock lock")
    }
}

#[derive(Default)]
pub(super) struct MemoryLinks {
    links: Mutex<HashMap<String, EvaluationLink>>,
}

impl MemoryLinks {
    pub(super) fn get(&self, token: &LinkToken) -> Option<EvaluationLink> {
        self.links
            .lock()
            .expect("links lock")
            .get(token.as_str())
            .cloned()
    }

    pub(super) fn len(&self) -> usize {
        self.links.lock().expect("links lock").len()
    }
}

#[async_trait]
impl LinkRepository for MemoryLinks {
    async fn insert(&self, link: EvaluationLink) -> Result<EvaluationLink, RepositoryError> {
        let mut guard = self.links.lock().expect("links lock");
        if guard.contains_key(link.token.as_str()) {
            return Err(RepositoryError::Conflict);
        }
        guard.insert(link.token.as_str().to_string(), link.clone());
        Ok(link)
    }

    async fn fetch(&self, token: &LinkToken) -> Result<Option<EvaluationLink>, RepositoryError> {
        Ok(self.get(token))
    }

    async fn consume(
        &self,
        token: &LinkToken,
        evaluation_id: &EvaluationId,
    ) -> Result<ConsumeOutcome, RepositoryError> {
        let mut guard = self.links.lock().expect("links lock");
        match guard.get_mut(token.as_str()) {
            None => Ok(ConsumeOutcome::Missing),
            Some(link) if link.used => Ok(ConsumeOutcome::AlreadyUsed {
                bound: link.bound_evaluation_id.clone(),
            }),
            Some(link) => {
                link.used = true;
                link.bound_evaluation_id = Some(evaluation_id.clone());
                Ok(ConsumeOutcome::Consumed)
            }
        }
    }
}

/// Rejects the first insert as a duplicate token, then behaves like `MemoryLinks`.
#[derive(Default)]
pub(super) struct CollidingLinks {
    pub(super) inner: MemoryLinks,
    collided: AtomicU32,
}

#[async_trait]
impl LinkRepository for CollidingLinks {
    async fn insert(&self, link: EvaluationLink) -> Result<EvaluationLink, RepositoryError> {
        if self.collided.fetch_add(1, Ordering::SeqCst) == 0 {
            return Err(RepositoryError::Conflict);
        }
        self.inner.insert(link).await
    }

    async fn fetch(&self, token: &LinkToken) -> Result<Option<EvaluationLink>, RepositoryError> {
        self.inner.fetch(token).await
    }

    async fn consume(
        &self,
        token: &LinkToken,
        evaluation_id: &EvaluationId,
    ) -> Result<ConsumeOutcome, RepositoryError> {
        self.inner.consume(token, evaluation_id).await
    }
}

#[derive(Default)]
pub(super) struct MemoryEvaluations {
    evaluations: Mutex<Vec<Evaluation>>,
}

impl MemoryEvaluations {
    pub(super) fn all(&self) -> Vec<Evaluation> {
        self.evaluations.lock().expect("evaluations lock").clone()
    }

    fn store(&self, evaluation: Evaluation) -> Result<(), RepositoryError> {
        let mut guard = self.evaluations.lock().expect("evaluations lock");
        if guard.iter().any(|existing| existing.id == evaluation.id) {
            return Err(RepositoryError::Conflict);
        }
        guard.push(evaluation);
        Ok(())
    }
}

#[async_trait]
impl EvaluationRepository for MemoryEvaluations {
    async fn insert(&self, evaluation: Evaluation) -> Result<(), RepositoryError> {
        self.store(evaluation)
    }

    async fn fetch(&self, id: &EvaluationId) -> Result<Option<Evaluation>, RepositoryError> {
        Ok(self
            .evaluations
            .lock()
            .expect("evaluations lock")
            .iter()
            .find(|evaluation| &evaluation.id == id)
            .cloned())
    }

    async fn latest_for(
        &self,
        subject: &SubjectId,
        kind: EvaluationType,
    ) -> Result<Option<Evaluation>, RepositoryError> {
        Ok(self
            .evaluations
            .lock()
            .expect("evaluations lock")
            .iter()
            .filter(|evaluation| &evaluation.subject_id == subject && evaluation.evaluation_type == kind)
            .max_by_key(|evaluation| evaluation.submitted_at)
            .cloned())
    }
}

/// Fails the first `failures` inserts. With `commit_before_failing` the row is written
/// before the error, modelling a lost acknowledgement.
pub(super) struct FlakyEvaluations {
    pub(super) inner: MemoryEvaluations,
    failures: u32,
    commit_before_failing: bool,
    calls: AtomicU32,
}

impl FlakyEvaluations {
    pub(super) fn failing(failures: u32) -> Self {
        Self {
            inner: MemoryEvaluations::default(),
            failures,
            commit_before_failing: false,
            calls: AtomicU32::new(0),
        }
    }

    pub(super) fn losing_first_ack() -> Self {
        Self {
            commit_before_failing: true,
            ..Self::failing(1)
        }
    }

    pub(super) fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl EvaluationRepository for FlakyEvaluations {
    async fn insert(&self, evaluation: Evaluation) -> Result<(), RepositoryError> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        if call < self.failures {
            if self.commit_before_failing {
                self.inner.store(evaluation)?;
            }
            return Err(RepositoryError::Unavailable("connection reset".to_string()));
        }
        self.inner.insert(evaluation).await
    }

    async fn fetch(&self, id: &EvaluationId) -> Result<Option<Evaluation>, RepositoryError> {
        self.inner.fetch(id).await
    }

    async fn latest_for(
        &self,
        subject: &SubjectId,
        kind: EvaluationType,
    ) -> Result<Option<Evaluation>, RepositoryError> {
        self.inner.latest_for(subject, kind).await
    }
}

#[derive(Default)]
pub(super) struct MemoryHistory {
    entries: Mutex<Vec<HistoryEntry>>,
}

impl MemoryHistory {
    pub(super) fn entries(&self) -> Vec<HistoryEntry> {
        self.entries.lock().expect("history lock").clone()
    }
}

#[async_trait]
impl EvaluationHistoryStore for MemoryHistory {
    async fn append(&self, entry: HistoryEntry) -> Result<(), RepositoryError> {
        self.entries.lock().expect("history lock").push(entry);
        Ok(())
    }
}

pub(super) struct UnavailableHistory;

#[async_trait]
impl EvaluationHistoryStore for UnavailableHistory {
    async fn append(&self, _entry: HistoryEntry) -> Result<(), RepositoryError> {
        Err(RepositoryError::Unavailable("history service offline".to_string()))
    }
}

/// Rate-limit store slower than any sane timeout.
pub(super) struct StalledRateLimits;

#[async_trait]
impl RateLimitStore for StalledRateLimits {
    async fn hit(
        &self,
        _key: &ClientKey,
        _now: DateTime<Utc>,
        _window: Duration,
        _ceiling: u32,
    ) -> Result<RateDecision, RepositoryError> {
        tokio::time::sleep(Duration::from_secs(5)).await;
        Ok(RateDecision::Allowed { attempt: 1 })
    }

    async fn sweep(&self, _now: DateTime<Utc>, _window: Duration) -> Result<usize, RepositoryError> {
        Ok(0)
    }
}

pub(super) fn roster() -> RosterDirectory {
    RosterDirectory::new(vec![
        EmployeeRecord {
            id: SubjectId("emp-1".to_string()),
            name: "Ana Souza".to_string(),
            status: EmployeeStatus::Active,
        },
        EmployeeRecord {
            id: SubjectId("emp-2".to_string()),
            name: "Bruno Lima".to_string(),
            status: EmployeeStatus::Probation,
        },
        EmployeeRecord {
            id: SubjectId("emp-3".to_string()),
            name: "Carla Dias".to_string(),
            status: EmployeeStatus::Terminated,
        },
    ])
}

pub(super) fn config() -> EvaluationLinkConfig {
    EvaluationLinkConfig {
        public_origin: "https://people.example.com".to_string(),
        rate_limit_max_attempts: 5,
        store_timeout: Duration::from_millis(200),
        persist_backoff: Duration::from_millis(1),
        ..EvaluationLinkConfig::default()
    }
}

pub(super) struct Harness<L, E, H> {
    pub(super) service: Arc<ExternalEvaluationService<L, E, H>>,
    pub(super) links: Arc<L>,
    pub(super) evaluations: Arc<E>,
    pub(super) history: Arc<H>,
    pub(super) log: Arc<InMemorySecurityLog>,
    pub(super) rate_limits: Arc<InMemoryRateLimitStore>,
    pub(super) form_tokens: Arc<InMemoryFormTokenStore>,
    pub(super) clock: Arc<ManualClock>,
}

pub(super) fn harness() -> Harness<MemoryLinks, MemoryEvaluations, MemoryHistory> {
    harness_with(
        MemoryLinks::default(),
        MemoryEvaluations::default(),
        MemoryHistory::default(),
    )
}

pub(super) fn harness_with<L, E, H>(links: L, evaluations: E, history: H) -> Harness<L, E, H>
where
    L: LinkRepository + 'static,
    E: EvaluationRepository + 'static,
    H: EvaluationHistoryStore + 'static,
{
    harness_configured(links, evaluations, history, &config())
}

pub(super) fn harness_configured<L, E, H>(
    links: L,
    evaluations: E,
    history: H,
    config: &EvaluationLinkConfig,
) -> Harness<L, E, H>
where
    L: LinkRepository + 'static,
    E: EvaluationRepository + 'static,
    H: EvaluationHistoryStore + 'static,
{
    let links = Arc::new(links);
    let evaluations = Arc::new(evaluations);
    let history = Arc::new(history);
    let log = Arc::new(InMemorySecurityLog::default());
    let rate_limits = Arc::new(InMemoryRateLimitStore::default());
    let form_tokens = Arc::new(InMemoryFormTokenStore::default());
    let clock = Arc::new(ManualClock::at(start()));

    let service = ExternalEvaluationService::new(
        EvaluationStores {
            links: links.clone(),
            evaluations: evaluations.clone(),
            history: history.clone(),
            directory: Arc::new(roster()),
            rate_limits: rate_limits.clone(),
            form_tokens: form_tokens.clone(),
            security_log: log.clone(),
            clock: clock.clone(),
        },
        config,
    );

    Harness {
        service: Arc::new(service),
        links,
        evaluations,
        history,
        log,
        rate_limits,
        form_tokens,
        clock,
    }
}

pub(super) fn request(subject: &str, kind: EvaluationType) -> IssueLinkRequest {
    IssueLinkRequest {
        subject_id: SubjectId(subject.to_string()),
        evaluation_type: kind,
        issuer_name: "Helena HR".to_string(),
    }
}

pub(super) fn client() -> ClientKey {
    ClientKey::derive("203.0.113.7", "any")
}

pub(super) fn session() -> SessionId {
    SessionId("session-1".to_string())
}

/// Complete answers cycling through `pattern`, with believable free text.
pub(super) fn submission(kind: EvaluationType, pattern: &[Rating]) -> EvaluationSubmission {
    let answers = QuestionSet::for_type(kind)
        .questions
        .iter()
        .zip(pattern.iter().cycle())
        .map(|(question, rating)| (question.key.to_string(), *rating))
        .collect();
    EvaluationSubmission {
        evaluator_name: "Marcos Pereira".to_string(),
        answers,
        free_text: [(
            "strengths".to_string(),
            "Explains trade-offs clearly and unblocks the team.".to_string(),
        )]
        .into_iter()
        .collect(),
        general_feedback: Some("Glad to have worked together on the billing migration.".to_string()),
    }
}

pub(super) const MOSTLY_POSITIVE: [Rating; 3] = [Rating::Excellent, Rating::VeryGood, Rating::Good];

impl<L, E, H> Harness<L, E, H>
where
    L: LinkRepository + 'static,
    E: EvaluationRepository + 'static,
    H: EvaluationHistoryStore + 'static,
{
    pub(super) async fn issue(&self, subject: &str, kind: EvaluationType) -> IssuedLink {
        self.service
            .issue_link(request(subject, kind))
            .await
            .expect("link issued")
    }

    /// Open the form, let the evaluator take a few minutes, and return the CSRF token.
    pub(super) async fn open(&self, token: &LinkToken) -> String {
        let form = self
            .service
            .open_form(token.as_str(), &client(), &session())
            .await
            .expect("form opens");
        self.clock.advance(chrono::Duration::minutes(6));
        form.form_token.as_str().to_string()
    }

    pub(super) async fn complete(&self, subject: &str, kind: EvaluationType) -> EvaluationId {
        let issued = self.issue(subject, kind).await;
        let csrf = self.open(&issued.link.token).await;
        self.service
            .submit(
                issued.link.token.as_str(),
                &client(),
                &csrf,
                &session(),
                submission(kind, &MOSTLY_POSITIVE),
            )
            .await
            .expect("submission accepted")
    }
}
