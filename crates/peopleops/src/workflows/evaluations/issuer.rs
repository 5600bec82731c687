use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Deserialize;
use tracing::info;

use super::clock::Clock;
use super::domain::{EvaluationLink, EvaluationType, IssuedLink, LinkToken, SubjectId};
use super::eligibility::{Eligibility, EligibilityChecker};
use super::repository::{EvaluationRepository, LinkRepository, RepositoryError};
use super::retry::RetryPolicy;
use super::sentinel::{context, SecurityEventType, SecuritySentinel};
use crate::config::EvaluationLinkConfig;
use crate::workflows::directory::{DirectoryError, EmployeeDirectory, EmployeeStatus};

const TOKEN_MINT_ATTEMPTS: u32 = 3;

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct IssueLinkRequest {
    pub subject_id: SubjectId,
    pub evaluation_type: EvaluationType,
    pub issuer_name: String,
}

/// Mints single-use links after checking the subject and the cooldown window.
pub struct LinkIssuer<L, E> {
    links: Arc<L>,
    eligibility: Arc<EligibilityChecker<E>>,
    directory: Arc<dyn EmployeeDirectory>,
    sentinel: Arc<SecuritySentinel>,
    clock: Arc<dyn Clock>,
    ttl: chrono::Duration,
    public_origin: String,
    policy: RetryPolicy,
}

impl<L, E> LinkIssuer<L, E>
where
    L: LinkRepository + 'static,
    E: EvaluationRepository + 'static,
{
    pub fn new(
        links: Arc<L>,
        eligibility: Arc<EligibilityChecker<E>>,
        directory: Arc<dyn EmployeeDirectory>,
        sentinel: Arc<SecuritySentinel>,
        clock: Arc<dyn Clock>,
        config: &EvaluationLinkConfig,
    ) -> Self {
        Self {
            links,
            eligibility,
            directory,
            sentinel,
            clock,
            ttl: chrono::Duration::days(i64::from(config.link_ttl_days)),
            public_origin: config.public_origin.clone(),
            policy: RetryPolicy::from_config(config),
        }
    }

    pub async fn issue_link(&self, request: IssueLinkRequest) -> Result<IssuedLink, IssueError> {
        let subject_id = SubjectId(request.subject_id.0.trim().to_string());
        let issuer_name = request.issuer_name.trim().to_string();
        if subject_id.0.is_empty() {
            return Err(IssueError::InvalidRequest { field: "subject_id" });
        }
        if issuer_name.is_empty() {
            return Err(IssueError::InvalidRequest {
                field: "issuer_name",
            });
        }

        let subject = self
            .directory
            .subject(&subject_id)?
            .ok_or_else(|| IssueError::UnknownSubject(subject_id.0.clone()))?;
        if !EmployeeStatus::active_like().contains(&subject.status) {
            return Err(IssueError::InactiveSubject {
                subject: subject_id.0,
                status: subject.status.label(),
            });
        }

        if let Eligibility::CoolingDown {
            last_submitted_at,
            next_eligible_at,
        } = self
            .eligibility
            .eligibility(&subject_id, request.evaluation_type)
            .await?
        {
            return Err(IssueError::EligibilityWindowViolation {
                kind: request.evaluation_type,
                last_submitted_at,
                next_eligible_at,
            });
        }

        let created_at = self.clock.now();
        let mut link = EvaluationLink {
            token: LinkToken::generate(),
            subject_id,
            subject_name: subject.name,
            evaluation_type: request.evaluation_type,
            issuer_name,
            created_at,
            expires_at: created_at
                .checked_add_signed(self.ttl)
                .unwrap_or(DateTime::<Utc>::MAX_UTC),
            used: false,
            bound_evaluation_id: None,
        };

        let mut minted = 0;
        let stored = loop {
            minted += 1;
            let candidate = link.clone();
            let result = self
                .policy
                .run("insert link", || self.links.insert(candidate.clone()))
                .await;
            match result {
                Ok(stored) => break stored,
                Err(err) if err.last == RepositoryError::Conflict && minted < TOKEN_MINT_ATTEMPTS => {
                    link.token = LinkToken::generate();
                }
                Err(err) => return Err(IssueError::Repository(err.last)),
            }
        };

        info!(
            subject = %stored.subject_id.0,
            evaluation_type = %stored.evaluation_type,
            expires_at = %stored.expires_at,
            "evaluation link issued"
        );
        self.sentinel.log(
            SecurityEventType::LinkIssued,
            Some(&stored.token),
            context([
                ("subject_id", stored.subject_id.0.clone()),
                ("evaluation_type", stored.evaluation_type.label().to_string()),
                ("issuer", stored.issuer_name.clone()),
            ]),
        );

        let url = stored.shareable_url(&self.public_origin);
        Ok(IssuedLink { link: stored, url })
    }
}

#[derive(Debug, thiserror::Error)]
pub enum IssueError {
    #[error("{field} is required")]
    InvalidRequest { field: &'static str },
    #[error("subject {0} is not in the employee directory")]
    UnknownSubject(String),
    #[error("subject {subject} is {status} and cannot be evaluated")]
    InactiveSubject {
        subject: String,
        status: &'static str,
    },
    #[error(
        "a {kind} evaluation was submitted at {last_submitted_at}; a new link may be issued from {next_eligible_at}"
    )]
    EligibilityWindowViolation {
        kind: EvaluationType,
        last_submitted_at: DateTime<Utc>,
        next_eligible_at: DateTime<Utc>,
    },
    #[error(transparent)]
    Directory(#[from] DirectoryError),
    #[error(transparent)]
    Repository(#[from] RepositoryError),
}
