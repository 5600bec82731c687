use std::sync::Arc;

use chrono::{DateTime, Utc};

use super::clock::Clock;
use super::domain::{EvaluationLink, LinkInfo, LinkToken};
use super::rate_limit::{ClientKey, RateDecision, RateLimiter};
use super::repository::{LinkRepository, RepositoryError};
use super::retry::RetryPolicy;
use super::sentinel::{context, SecurityEventType, SecuritySentinel};
use crate::config::EvaluationLinkConfig;

/// Message shown to the evaluator for every security-sensitive failure.
pub const UNAVAILABLE_MESSAGE: &str = "this evaluation link is unavailable";

/// Checks run on every external access, cheapest first. Each failure is recorded with its
/// precise cause before the caller sees the generic message.
pub struct AccessGateway<L> {
    links: Arc<L>,
    limiter: Arc<RateLimiter>,
    sentinel: Arc<SecuritySentinel>,
    clock: Arc<dyn Clock>,
    policy: RetryPolicy,
}

impl<L> AccessGateway<L>
where
    L: LinkRepository + 'static,
{
    pub fn new(
        links: Arc<L>,
        limiter: Arc<RateLimiter>,
        sentinel: Arc<SecuritySentinel>,
        clock: Arc<dyn Clock>,
        config: &EvaluationLinkConfig,
    ) -> Self {
        Self {
            links,
            limiter,
            sentinel,
            clock,
            policy: RetryPolicy::from_config(config),
        }
    }

    pub async fn resolve_link(&self, raw: &str, client: &ClientKey) -> Result<LinkInfo, AccessError> {
        self.resolve(raw, client).await.map(|link| link.info())
    }

    pub(crate) async fn resolve(
        &self,
        raw: &str,
        client: &ClientKey,
    ) -> Result<EvaluationLink, AccessError> {
        let token = match LinkToken::parse(raw) {
            Ok(token) => token,
            Err(malformed) => {
                self.sentinel.log(
                    SecurityEventType::TokenMalformed,
                    None,
                    context([("length", malformed.length.to_string())]),
                );
                return Err(AccessError::TokenMalformed);
            }
        };

        let now = self.clock.now();
        match self.limiter.check(client, now).await {
            Ok(RateDecision::Allowed { .. }) => {}
            Ok(RateDecision::Limited { retry_after }) => {
                self.sentinel.log(
                    SecurityEventType::RateLimited,
                    Some(&token),
                    context([
                        ("client", client.as_str()[..12].to_string()),
                        ("retry_after", retry_after.to_rfc3339()),
                    ]),
                );
                return Err(AccessError::RateLimited { retry_after });
            }
            Err(err) => {
                self.sentinel.log(
                    SecurityEventType::RateLimiterUnavailable,
                    Some(&token),
                    context([("error", err.to_string())]),
                );
                return Err(AccessError::Unavailable(err));
            }
        }

        let fetched = self
            .policy
            .run("fetch link", || self.links.fetch(&token))
            .await;
        let link = match fetched {
            Ok(Some(link)) => link,
            Ok(None) => {
                self.sentinel
                    .log(SecurityEventType::TokenNotFound, Some(&token), Default::default());
                return Err(AccessError::TokenNotFound);
            }
            Err(err) => {
                self.sentinel.log(
                    SecurityEventType::PersistenceFailure,
                    Some(&token),
                    context([
                        ("operation", err.operation.to_string()),
                        ("error", err.last.to_string()),
                    ]),
                );
                return Err(AccessError::Unavailable(err.last));
            }
        };

        if link.is_expired(now) {
            self.sentinel.log(
                SecurityEventType::TokenExpired,
                Some(&token),
                context([("expired_at", link.expires_at.to_rfc3339())]),
            );
            return Err(AccessError::TokenExpired);
        }
        if link.used {
            self.sentinel
                .log(SecurityEventType::TokenAlreadyUsed, Some(&token), Default::default());
            return Err(AccessError::TokenAlreadyUsed);
        }

        Ok(link)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AccessError {
    #[error("token is malformed")]
    TokenMalformed,
    #[error("too many attempts; retry after {retry_after}")]
    RateLimited { retry_after: DateTime<Utc> },
    #[error("token not found")]
    TokenNotFound,
    #[error("token expired")]
    TokenExpired,
    #[error("token already used")]
    TokenAlreadyUsed,
    #[error("link store unavailable: {0}")]
    Unavailable(RepositoryError),
}

impl AccessError {
    /// What the evaluator is told. The precise cause only goes to the security log.
    pub fn public_message(&self) -> &'static str {
        UNAVAILABLE_MESSAGE
    }
}
