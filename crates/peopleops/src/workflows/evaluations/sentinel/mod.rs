//! Cross-cutting defenses for the external evaluation flow: anti-forgery form tokens,
//! review heuristics over submitted payloads, and the security event log.

mod anomaly;
mod csrf;
mod events;

pub use anomaly::{SuspicionReport, SuspicionSignal};
pub use csrf::{FormToken, FormTokenRecord, FormTokenStore, InMemoryFormTokenStore, SessionId};
pub use events::{
    InMemorySecurityLog, SecurityEvent, SecurityEventSink, SecurityEventType, SecuritySeverity,
};

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tracing::error;

use super::clock::Clock;
use super::domain::{EvaluationSubmission, LinkToken};
use super::questions::CompletedAnswers;
use super::repository::RepositoryError;
use crate::config::EvaluationLinkConfig;

pub struct SecuritySentinel {
    forms: Arc<dyn FormTokenStore>,
    sink: Arc<dyn SecurityEventSink>,
    clock: Arc<dyn Clock>,
    min_completion: Duration,
    form_ttl: Duration,
}

impl SecuritySentinel {
    pub fn new(
        forms: Arc<dyn FormTokenStore>,
        sink: Arc<dyn SecurityEventSink>,
        clock: Arc<dyn Clock>,
        config: &EvaluationLinkConfig,
    ) -> Self {
        Self {
            forms,
            sink,
            clock,
            min_completion: config.min_completion,
            // A form cannot outlive the link it was rendered for.
            form_ttl: Duration::from_secs(u64::from(config.link_ttl_days) * 86_400),
        }
    }

    /// Token for the form rendered in `session`. A session keeps its first live token so
    /// re-rendering does not invalidate a form already open in another tab.
    pub fn issue_form_token(&self, session: &SessionId) -> Result<FormToken, RepositoryError> {
        let now = self.clock.now();
        if let Some(existing) = self.forms.get(session)? {
            if !existing.is_live(now, self.form_ttl) {
                self.forms.remove(session)?;
            }
        }
        let candidate = FormTokenRecord {
            token: FormToken::generate(),
            issued_at: now,
        };
        Ok(self.forms.insert_if_absent(session, candidate)?.token)
    }

    /// Exact match against the live token issued to `session`. Store failures reject.
    pub fn validate(&self, presented: &str, session: &SessionId) -> bool {
        match self.forms.get(session) {
            Ok(Some(record)) => {
                record.is_live(self.clock.now(), self.form_ttl) && record.token.matches(presented)
            }
            Ok(None) => false,
            Err(err) => {
                error!(error = %err, "form token store unavailable");
                false
            }
        }
    }

    pub(crate) fn form_issued_at(&self, session: &SessionId) -> Option<DateTime<Utc>> {
        self.forms
            .get(session)
            .ok()
            .flatten()
            .map(|record| record.issued_at)
    }

    pub(crate) fn retire(&self, session: &SessionId) {
        if let Err(err) = self.forms.remove(session) {
            error!(error = %err, "failed to retire form token");
        }
    }

    /// Reclaim form tokens whose link lifetime has passed.
    pub fn sweep_form_tokens(&self) -> Result<usize, RepositoryError> {
        self.forms.sweep(self.clock.now(), self.form_ttl)
    }

    /// Run the review heuristics. A suspicious report is logged but never blocks.
    pub fn flag_if_suspicious(
        &self,
        token: &LinkToken,
        session: &SessionId,
        submission: &EvaluationSubmission,
        answers: &CompletedAnswers,
    ) -> SuspicionReport {
        let elapsed = self
            .form_issued_at(session)
            .and_then(|issued_at| (self.clock.now() - issued_at).to_std().ok());
        let report = anomaly::inspect(submission, answers, elapsed, self.min_completion);

        if report.is_suspicious() {
            let signals = report
                .signals
                .iter()
                .map(SuspicionSignal::describe)
                .collect::<Vec<_>>()
                .join("; ");
            self.log(
                SecurityEventType::SuspiciousActivity,
                Some(token),
                context([("signals", signals)]),
            );
        }
        report
    }

    /// Append to the audit log. Sink failures are reported to tracing and swallowed.
    pub fn log(
        &self,
        event_type: SecurityEventType,
        token: Option<&LinkToken>,
        context: BTreeMap<String, String>,
    ) {
        let mut event = SecurityEvent::new(event_type, self.clock.now()).with_context(context);
        if let Some(token) = token {
            event = event.with_token(token.redacted());
        }
        event.trace();
        if let Err(err) = self.sink.append(event) {
            error!(event = event_type.label(), error = %err, "security event sink rejected event");
        }
    }
}

pub(crate) fn context<const N: usize>(pairs: [(&str, String); N]) -> BTreeMap<String, String> {
    pairs
        .into_iter()
        .map(|(key, value)| (key.to_string(), value))
        .collect()
}
