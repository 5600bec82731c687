use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use chrono::{DateTime, Utc};
use rand::distributions::Alphanumeric;
use rand::Rng;
use serde::{Deserialize, Serialize};

use super::super::repository::RepositoryError;

const FORM_TOKEN_LENGTH: usize = 43;

/// Identity of the browser session that rendered the form.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SessionId(pub String);

/// Anti-forgery token embedded in the rendered form.
#[derive(Clone, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct FormToken(String);

impl FormToken {
    pub(crate) fn generate() -> Self {
        let token: String = rand::thread_rng()
            .sample_iter(&Alphanumeric)
            .take(FORM_TOKEN_LENGTH)
            .map(char::from)
            .collect();
        Self(token)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Constant-time comparison against a presented value.
    pub fn matches(&self, presented: &str) -> bool {
        let expected = self.0.as_bytes();
        let presented = presented.as_bytes();
        if expected.len() != presented.len() {
            return false;
        }
        expected
            .iter()
            .zip(presented)
            .fold(0u8, |diff, (a, b)| diff | (a ^ b))
            == 0
    }
}

impl std::fmt::Debug for FormToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("FormToken(..)")
    }
}

/// Issued token plus the render time used to measure completion speed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FormTokenRecord {
    pub token: FormToken,
    pub issued_at: DateTime<Utc>,
}

impl FormTokenRecord {
    /// Live until `ttl` has elapsed since issue.
    pub fn is_live(&self, now: DateTime<Utc>, ttl: Duration) -> bool {
        match (now - self.issued_at).to_std() {
            Ok(age) => age <= ttl,
            Err(_) => true,
        }
    }
}

/// Per-session token store. `insert_if_absent` must keep an existing live token.
pub trait FormTokenStore: Send + Sync {
    fn get(&self, session: &SessionId) -> Result<Option<FormTokenRecord>, RepositoryError>;

    fn insert_if_absent(
        &self,
        session: &SessionId,
        record: FormTokenRecord,
    ) -> Result<FormTokenRecord, RepositoryError>;

    fn remove(&self, session: &SessionId) -> Result<(), RepositoryError>;

    /// Drop records older than `ttl`; returns how many were removed.
    fn sweep(&self, now: DateTime<Utc>, ttl: Duration) -> Result<usize, RepositoryError>;
}

#[derive(Debug, Default)]
pub struct InMemoryFormTokenStore {
    tokens: Mutex<HashMap<SessionId, FormTokenRecord>>,
}

impl InMemoryFormTokenStore {
    pub fn len(&self) -> usize {
        self.tokens.lock().map(|guard| guard.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl FormTokenStore for InMemoryFormTokenStore {
    fn get(&self, session: &SessionId) -> Result<Option<FormTokenRecord>, RepositoryError> {
        let guard = self
            .tokens
            .lock()
            .map_err(|_| RepositoryError::poisoned("form token"))?;
        Ok(guard.get(session).cloned())
    }

    fn insert_if_absent(
        &self,
        session: &SessionId,
        record: FormTokenRecord,
    ) -> Result<FormTokenRecord, RepositoryError> {
        let mut guard = self
            .tokens
            .lock()
            .map_err(|_| RepositoryError::poisoned("form token"))?;
        Ok(guard.entry(session.clone()).or_insert(record).clone())
    }

    fn remove(&self, session: &SessionId) -> Result<(), RepositoryError> {
        let mut guard = self
            .tokens
            .lock()
            .map_err(|_| RepositoryError::poisoned("form token"))?;
        guard.remove(session);
        Ok(())
    }

    fn sweep(&self, now: DateTime<Utc>, ttl: Duration) -> Result<usize, RepositoryError> {
        let mut guard = self
            .tokens
            .lock()
            .map_err(|_| RepositoryError::poisoned("form token"))?;
        let before = guard.len();
        guard.retain(|_, record| record.is_live(now, ttl));
        Ok(before - guard.len())
    }
}
