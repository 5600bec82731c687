use async_trait::async_trait;
use metrics_exporter_prometheus::PrometheusHandle;
use peopleops::config::{DirectoryConfig, EvaluationLinkConfig};
use peopleops::error::AppError;
use peopleops::workflows::directory::{
    EmployeeDirectory, EmployeeRecord, EmployeeStatus, RosterDirectory,
};
use peopleops::workflows::evaluations::{
    Clock, ConsumeOutcome, Evaluation, EvaluationHistoryStore, EvaluationId, EvaluationLink,
    EvaluationRepository, EvaluationStores, EvaluationType, ExternalEvaluationService,
    HistoryEntry, InMemoryFormTokenStore, InMemoryRateLimitStore, InMemorySecurityLog,
    LinkRepository, LinkToken, RepositoryError, SubjectId, SystemClock,
};
use std::collections::HashMap;
use std::sync::atomic::AtomicBool;
use std::sync::{Arc, Mutex};
use tracing::info;

pub(crate) type EvaluationService =
    ExternalEvaluationService<InMemoryLinkRepository, InMemoryEvaluationRepository, InMemoryHistoryStore>;

#[derive(Clone)]
pub(crate) struct AppState {
    pub(crate) readiness: Arc<AtomicBool>,
    pub(crate) metrics: Arc<PrometheusHandle>,
}

#[derive(Default)]
pub(crate) struct InMemoryLinkRepository {
    links: Mutex<HashMap<String, EvaluationLink>>,
}

#[async_trait]
impl LinkRepository for InMemoryLinkRepository {
    async fn insert(&self, link: EvaluationLink) -> Result<EvaluationLink, RepositoryError> {
        let mut guard = self
            .links
            .lock()
            .map_err(|_| RepositoryError::poisoned("link"))?;
        if guard.contains_key(link.token.as_str()) {
            return Err(RepositoryError::Conflict);
        }
        guard.insert(link.token.as_str().to_string(), link.clone());
        Ok(link)
    }

    async fn fetch(&self, token: &LinkToken) -> Result<Option<EvaluationLink>, RepositoryError> {
        let guard = self
            .links
            .lock()
            .map_err(|_| RepositoryError::poisoned("link"))?;
        Ok(guard.get(token.as_str()).cloned())
    }

    async fn consume(
        &self,
        token: &LinkToken,
        evaluation_id: &EvaluationId,
    ) -> Result<ConsumeOutcome, RepositoryError> {
        let mut guard = self
            .links
            .lock()
            .map_err(|_| RepositoryError::poisoned("link"))?;
        let outcome = match guard.get_mut(token.as_str()) {
            None => ConsumeOutcome::Missing,
            Some(link) if link.used => ConsumeOutcome::AlreadyUsed {
                bound: link.bound_evaluation_id.clone(),
            },
            Some(link) => {
                link.used = true;
                link.bound_evaluation_id = Some(evaluation_id.clone());
                ConsumeOutcome::Consumed
            }
        };
        Ok(outcome)
    }
}

#[derive(Default)]
pub(crate) struct InMemoryEvaluationRepository {
    records: Mutex<HashMap<EvaluationId, Evaluation>>,
}

#[async_trait]
impl EvaluationRepository for InMemoryEvaluationRepository {
    async fn insert(&self, evaluation: Evaluation) -> Result<(), RepositoryError> {
        let mut guard = self
            .records
            .lock()
            .map_err(|_| RepositoryError::poisoned("evaluation"))?;
        if guard.contains_key(&evaluation.id) {
            return Err(RepositoryError::Conflict);
        }
        guard.insert(evaluation.id.clone(), evaluation);
        Ok(())
    }

    async fn fetch(&self, id: &EvaluationId) -> Result<Option<Evaluation>, RepositoryError> {
        let guard = self
            .records
            .lock()
            .map_err(|_| RepositoryError::poisoned("evaluation"))?;
        Ok(guard.get(id).cloned())
    }

    async fn latest_for(
        &self,
        subject: &SubjectId,
        kind: EvaluationType,
    ) -> Result<Option<Evaluation>, RepositoryError> {
        let guard = self
            .records
            .lock()
            .map_err(|_| RepositoryError::poisoned("evaluation"))?;
        Ok(guard
            .values()
            .filter(|evaluation| {
                &evaluation.subject_id == subject && evaluation.evaluation_type == kind
            })
            .max_by_key(|evaluation| evaluation.submitted_at)
            .cloned())
    }
}

#[derive(Default)]
pub(crate) struct InMemoryHistoryStore {
    entries: Mutex<Vec<HistoryEntry>>,
}

impl InMemoryHistoryStore {
    pub(crate) fn entries(&self) -> Vec<HistoryEntry> {
        self.entries
            .lock()
            .map(|guard| guard.clone())
            .unwrap_or_default()
    }
}

#[async_trait]
impl EvaluationHistoryStore for InMemoryHistoryStore {
    async fn append(&self, entry: HistoryEntry) -> Result<(), RepositoryError> {
        self.entries
            .lock()
            .map_err(|_| RepositoryError::poisoned("history"))?
            .push(entry);
        Ok(())
    }
}

/// Handles kept by callers that want to inspect what the service wrote.
pub(crate) struct ServiceHandles {
    pub(crate) service: Arc<EvaluationService>,
    pub(crate) rate_limits: Arc<InMemoryRateLimitStore>,
    pub(crate) history: Arc<InMemoryHistoryStore>,
    pub(crate) security_log: Arc<InMemorySecurityLog>,
}

pub(crate) fn build_service(
    directory: Arc<dyn EmployeeDirectory>,
    config: &EvaluationLinkConfig,
) -> ServiceHandles {
    let rate_limits = Arc::new(InMemoryRateLimitStore::default());
    let history = Arc::new(InMemoryHistoryStore::default());
    let security_log = Arc::new(InMemorySecurityLog::default());
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);

    let service = ExternalEvaluationService::new(
        EvaluationStores {
            links: Arc::new(InMemoryLinkRepository::default()),
            evaluations: Arc::new(InMemoryEvaluationRepository::default()),
            history: history.clone(),
            directory,
            rate_limits: rate_limits.clone(),
            form_tokens: Arc::new(InMemoryFormTokenStore::default()),
            security_log: security_log.clone(),
            clock,
        },
        config,
    );

    ServiceHandles {
        service: Arc::new(service),
        rate_limits,
        history,
        security_log,
    }
}

/// Roster from `APP_ROSTER_CSV` when configured, otherwise the built-in demo roster.
pub(crate) fn load_directory(config: &DirectoryConfig) -> Result<RosterDirectory, AppError> {
    match &config.roster_csv {
        Some(path) => {
            let directory = RosterDirectory::from_path(path)?;
            info!(
                path = %path.display(),
                employees = directory.employees().len(),
                "employee roster loaded"
            );
            Ok(directory)
        }
        None => Ok(demo_directory()),
    }
}

pub(crate) fn demo_directory() -> RosterDirectory {
    let employee = |id: &str, name: &str, status| EmployeeRecord {
        id: SubjectId(id.to_string()),
        name: name.to_string(),
        status,
    };
    RosterDirectory::new(vec![
        employee("emp-100", "Ana Souza", EmployeeStatus::Active),
        employee("emp-101", "Bruno Lima", EmployeeStatus::Probation),
        employee("emp-102", "Carla Mendes", EmployeeStatus::OnLeave),
        employee("emp-103", "Diego Rocha", EmployeeStatus::Terminated),
    ])
}
