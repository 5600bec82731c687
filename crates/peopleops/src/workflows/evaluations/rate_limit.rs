//! Fixed-window attempt counters keyed by client identity.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use sha2::{Digest, Sha256};

use super::clock::to_chrono;
use super::repository::RepositoryError;
use crate::config::EvaluationLinkConfig;

/// Opaque limiter key; a digest of the requester origin and the token it presented.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct ClientKey(String);

impl ClientKey {
    pub fn derive(origin: &str, token: &str) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(origin.trim().as_bytes());
        hasher.update(b"|");
        hasher.update(token.as_bytes());
        Self(hex::encode(hasher.finalize()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RateLimitBucket {
    pub client_key: ClientKey,
    pub window_start: DateTime<Utc>,
    pub attempt_count: u32,
}

impl RateLimitBucket {
    fn is_stale(&self, now: DateTime<Utc>, window: Duration) -> bool {
        now > self.window_start + to_chrono(window)
    }
}

/// Outcome of recording one attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RateDecision {
    Allowed { attempt: u32 },
    Limited { retry_after: DateTime<Utc> },
}

/// Counter store. `hit` must increment-or-reset atomically.
#[async_trait]
pub trait RateLimitStore: Send + Sync {
    async fn hit(
        &self,
        key: &ClientKey,
        now: DateTime<Utc>,
        window: Duration,
        ceiling: u32,
    ) -> Result<RateDecision, RepositoryError>;

    /// Drop buckets whose window has elapsed; returns how many were reclaimed.
    async fn sweep(&self, now: DateTime<Utc>, window: Duration) -> Result<usize, RepositoryError>;
}

#[derive(Debug, Default)]
pub struct InMemoryRateLimitStore {
    buckets: Mutex<HashMap<ClientKey, RateLimitBucket>>,
}

impl InMemoryRateLimitStore {
    pub fn bucket(&self, key: &ClientKey) -> Option<RateLimitBucket> {
        self.buckets.lock().ok()?.get(key).cloned()
    }

    pub fn len(&self) -> usize {
        self.buckets.lock().map(|guard| guard.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl RateLimitStore for InMemoryRateLimitStore {
    async fn hit(
        &self,
        key: &ClientKey,
        now: DateTime<Utc>,
        window: Duration,
        ceiling: u32,
    ) -> Result<RateDecision, RepositoryError> {
        let mut guard = self
            .buckets
            .lock()
            .map_err(|_| RepositoryError::poisoned("rate limit"))?;

        let bucket = guard
            .entry(key.clone())
            .or_insert_with(|| RateLimitBucket {
                client_key: key.clone(),
                window_start: now,
                attempt_count: 0,
            });

        if bucket.is_stale(now, window) {
            bucket.window_start = now;
            bucket.attempt_count = 0;
        }

        bucket.attempt_count = bucket.attempt_count.saturating_add(1);
        if bucket.attempt_count > ceiling {
            Ok(RateDecision::Limited {
                retry_after: bucket.window_start + to_chrono(window),
            })
        } else {
            Ok(RateDecision::Allowed {
                attempt: bucket.attempt_count,
            })
        }
    }

    async fn sweep(&self, now: DateTime<Utc>, window: Duration) -> Result<usize, RepositoryError> {
        let mut guard = self
            .buckets
            .lock()
            .map_err(|_| RepositoryError::poisoned("rate limit"))?;
        let before = guard.len();
        guard.retain(|_, bucket| !bucket.is_stale(now, window));
        Ok(before - guard.len())
    }
}

/// Applies the configured ceiling and window over an injected store.
pub struct RateLimiter {
    store: Arc<dyn RateLimitStore>,
    ceiling: u32,
    window: Duration,
    timeout: Duration,
}

impl RateLimiter {
    pub fn new(store: Arc<dyn RateLimitStore>, config: &EvaluationLinkConfig) -> Self {
        Self {
            store,
            ceiling: config.rate_limit_max_attempts,
            window: config.rate_limit_window,
            timeout: config.store_timeout,
        }
    }

    pub fn window(&self) -> Duration {
        self.window
    }

    /// Record an attempt. A store slower than the timeout fails instead of stalling the caller.
    pub async fn check(
        &self,
        key: &ClientKey,
        now: DateTime<Utc>,
    ) -> Result<RateDecision, RepositoryError> {
        tokio::time::timeout(
            self.timeout,
            self.store.hit(key, now, self.window, self.ceiling),
        )
        .await
        .unwrap_or(Err(RepositoryError::Timeout(self.timeout)))
    }

    pub async fn sweep(&self, now: DateTime<Utc>) -> Result<usize, RepositoryError> {
        tokio::time::timeout(self.timeout, self.store.sweep(now, self.window))
            .await
            .unwrap_or(Err(RepositoryError::Timeout(self.timeout)))
    }
}
