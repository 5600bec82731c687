use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;

use super::clock::Clock;
use super::domain::{EvaluationType, SubjectId};
use super::repository::{EvaluationRepository, RepositoryError};
use super::retry::RetryPolicy;
use crate::config::EvaluationLinkConfig;

/// Whether a new link of a given type may be issued for a subject right now.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum Eligibility {
    Eligible,
    CoolingDown {
        last_submitted_at: DateTime<Utc>,
        next_eligible_at: DateTime<Utc>,
    },
}

impl Eligibility {
    pub fn is_eligible(&self) -> bool {
        matches!(self, Self::Eligible)
    }
}

/// Rolling cooldown rule over the evaluation history. Never cached: every call reads the
/// latest evaluation from the store.
pub struct EligibilityChecker<E> {
    evaluations: Arc<E>,
    clock: Arc<dyn Clock>,
    cooldown: chrono::Duration,
    policy: RetryPolicy,
}

impl<E> EligibilityChecker<E>
where
    E: EvaluationRepository + 'static,
{
    pub fn new(evaluations: Arc<E>, clock: Arc<dyn Clock>, config: &EvaluationLinkConfig) -> Self {
        Self {
            evaluations,
            clock,
            cooldown: chrono::Duration::days(i64::from(config.cooldown_days)),
            policy: RetryPolicy::from_config(config),
        }
    }

    pub async fn eligibility(
        &self,
        subject: &SubjectId,
        kind: EvaluationType,
    ) -> Result<Eligibility, RepositoryError> {
        let latest = self
            .policy
            .run("latest evaluation", || self.evaluations.latest_for(subject, kind))
            .await
            .map_err(|err| err.last)?;

        let Some(latest) = latest else {
            return Ok(Eligibility::Eligible);
        };

        let next_eligible_at = latest
            .submitted_at
            .checked_add_signed(self.cooldown)
            .unwrap_or(DateTime::<Utc>::MAX_UTC);
        if self.clock.now() < next_eligible_at {
            Ok(Eligibility::CoolingDown {
                last_submitted_at: latest.submitted_at,
                next_eligible_at,
            })
        } else {
            Ok(Eligibility::Eligible)
        }
    }

    pub async fn can_issue(
        &self,
        subject: &SubjectId,
        kind: EvaluationType,
    ) -> Result<bool, RepositoryError> {
        Ok(self.eligibility(subject, kind).await?.is_eligible())
    }
}
