use std::collections::BTreeMap;
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{error, info, warn};

use super::super::repository::RepositoryError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum SecuritySeverity {
    Critical,
    High,
    Medium,
    Low,
}

impl SecuritySeverity {
    pub const fn label(self) -> &'static str {
        match self {
            Self::Critical => "critical",
            Self::High => "high",
            Self::Medium => "medium",
            Self::Low => "low",
        }
    }
}

/// Everything the external evaluation flow records for audit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SecurityEventType {
    LinkIssued,
    TokenMalformed,
    TokenNotFound,
    TokenExpired,
    TokenAlreadyUsed,
    RateLimited,
    RateLimiterUnavailable,
    CsrfMismatch,
    ValidationFailed,
    SuspiciousActivity,
    PersistenceFailure,
    EvaluationSubmitted,
}

impl SecurityEventType {
    pub const fn default_severity(self) -> SecuritySeverity {
        match self {
            Self::PersistenceFailure => SecuritySeverity::Critical,
            Self::CsrfMismatch | Self::RateLimited | Self::RateLimiterUnavailable => {
                SecuritySeverity::High
            }
            Self::TokenMalformed
            | Self::TokenNotFound
            | Self::TokenAlreadyUsed
            | Self::SuspiciousActivity => SecuritySeverity::Medium,
            Self::TokenExpired
            | Self::ValidationFailed
            | Self::LinkIssued
            | Self::EvaluationSubmitted => SecuritySeverity::Low,
        }
    }

    pub const fn label(self) -> &'static str {
        match self {
            Self::LinkIssued => "link_issued",
            Self::TokenMalformed => "token_malformed",
            Self::TokenNotFound => "token_not_found",
            Self::TokenExpired => "token_expired",
            Self::TokenAlreadyUsed => "token_already_used",
            Self::RateLimited => "rate_limited",
            Self::RateLimiterUnavailable => "rate_limiter_unavailable",
            Self::CsrfMismatch => "csrf_mismatch",
            Self::ValidationFailed => "validation_failed",
            Self::SuspiciousActivity => "suspicious_activity",
            Self::PersistenceFailure => "persistence_failure",
            Self::EvaluationSubmitted => "evaluation_submitted",
        }
    }
}

/// Append-only audit record. `token` only ever holds a redacted prefix.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SecurityEvent {
    pub event_type: SecurityEventType,
    pub severity: SecuritySeverity,
    pub token: Option<String>,
    pub timestamp: DateTime<Utc>,
    pub context: BTreeMap<String, String>,
}

impl SecurityEvent {
    pub fn new(event_type: SecurityEventType, timestamp: DateTime<Utc>) -> Self {
        Self {
            event_type,
            severity: event_type.default_severity(),
            token: None,
            timestamp,
            context: BTreeMap::new(),
        }
    }

    pub fn with_token(mut self, redacted: String) -> Self {
        self.token = Some(redacted);
        self
    }

    pub fn with_context(mut self, context: BTreeMap<String, String>) -> Self {
        self.context = context;
        self
    }

    /// Mirror the event into the process log.
    pub(crate) fn trace(&self) {
        let event = self.event_type.label();
        let severity = self.severity.label();
        let token = self.token.as_deref().unwrap_or("-");
        let detail = self
            .context
            .iter()
            .map(|(key, value)| format!("{key}={value}"))
            .collect::<Vec<_>>()
            .join(" ");

        match self.severity {
            SecuritySeverity::Critical => error!(event, severity, token, detail, "security event"),
            SecuritySeverity::High | SecuritySeverity::Medium => {
                warn!(event, severity, token, detail, "security event")
            }
            SecuritySeverity::Low => info!(event, severity, token, detail, "security event"),
        }
    }
}

/// Durable destination for security events.
pub trait SecurityEventSink: Send + Sync {
    fn append(&self, event: SecurityEvent) -> Result<(), RepositoryError>;
}

#[derive(Debug, Default)]
pub struct InMemorySecurityLog {
    events: Mutex<Vec<SecurityEvent>>,
}

impl InMemorySecurityLog {
    pub fn events(&self) -> Vec<SecurityEvent> {
        self.events
            .lock()
            .map(|guard| guard.clone())
            .unwrap_or_default()
    }

    pub fn of_type(&self, event_type: SecurityEventType) -> Vec<SecurityEvent> {
        self.events()
            .into_iter()
            .filter(|event| event.event_type == event_type)
            .collect()
    }
}

impl SecurityEventSink for InMemorySecurityLog {
    fn append(&self, event: SecurityEvent) -> Result<(), RepositoryError> {
        self.events
            .lock()
            .map_err(|_| RepositoryError::poisoned("security log"))?
            .push(event);
        Ok(())
    }
}
