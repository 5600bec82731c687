use std::sync::Arc;

use super::common::*;

use crate::workflows::directory::RosterDirectory;
use crate::workflows::evaluations::clock::SystemClock;
use crate::workflows::evaluations::domain::{EvaluationType, LinkToken};
use crate::workflows::evaluations::gateway::{AccessError, UNAVAILABLE_MESSAGE};
use crate::workflows::evaluations::rate_limit::ClientKey;
use crate::workflows::evaluations::sentinel::{
    InMemoryFormTokenStore, InMemorySecurityLog, SecurityEventType,
};
use crate::workflows::evaluations::service::{EvaluationStores, ExternalEvaluationService};

#[tokio::test]
async fn valid_link_resolves_to_public_info() {
    let harness = harness();
    let issued = harness.issue("emp-1", EvaluationType::Peer).await;

    let info = harness
        .service
        .resolve_link(issued.link.token.as_str(), &client())
        .await
        .expect("link resolves");
    assert_eq!(info.subject_name, "Ana Souza");
    assert_eq!(info.evaluation_type, EvaluationType::Peer);
    assert_eq!(info.expires_at, issued.link.expires_at);
}

#[tokio::test]
async fn malformed_token_is_rejected_before_rate_limit_or_lookup() {
    let harness = harness();
    let err = harness
        .service
        .resolve_link("../../etc/passwd", &client())
        .await
        .expect_err("malformed");

    assert_eq!(err, AccessError::TokenMalformed);
    assert_eq!(err.public_message(), UNAVAILABLE_MESSAGE);
    assert!(harness.rate_limits.is_empty());
    let events = harness.log.of_type(SecurityEventType::TokenMalformed);
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].token, None);
}

#[tokio::test]
async fn unknown_token_is_not_found_and_logged() {
    let harness = harness();
    let token = LinkToken::generate();
    let err = harness
        .service
        .resolve_link(token.as_str(), &client())
        .await
        .expect_err("unknown");

    assert_eq!(err, AccessError::TokenNotFound);
    let events = harness.log.of_type(SecurityEventType::TokenNotFound);
    assert_eq!(events[0].token.as_deref(), Some(token.redacted().as_str()));
}

#[tokio::test]
async fn link_past_expiry_is_rejected_even_if_never_used() {
    let harness = harness();
    let issued = harness.issue("emp-1", EvaluationType::Manager).await;

    harness.clock.set(issued.link.expires_at);
    assert!(harness
        .service
        .resolve_link(issued.link.token.as_str(), &client())
        .await
        .is_ok());

    harness.clock.advance(chrono::Duration::seconds(1));
    assert_eq!(
        harness
            .service
            .resolve_link(issued.link.token.as_str(), &client())
            .await,
        Err(AccessError::TokenExpired)
    );
    assert_eq!(harness.log.of_type(SecurityEventType::TokenExpired).len(), 1);
}

#[tokio::test]
async fn used_link_is_rejected() {
    let harness = harness();
    harness.complete("emp-1", EvaluationType::Sponsor).await;
    let token = harness.evaluations.all()[0].link_token.clone();

    assert_eq!(
        harness.service.resolve_link(token.as_str(), &client()).await,
        Err(AccessError::TokenAlreadyUsed)
    );
}

#[tokio::test]
async fn attempt_beyond_ceiling_is_rate_limited_until_window_resets() {
    let harness = harness();
    let issued = harness.issue("emp-1", EvaluationType::Peer).await;
    let token = issued.link.token.as_str();
    let key = ClientKey::derive("198.51.100.4", token);

    for _ in 0..config().rate_limit_max_attempts {
        harness
            .service
            .resolve_link(token, &key)
            .await
            .expect("within ceiling");
    }
    let err = harness
        .service
        .resolve_link(token, &key)
        .await
        .expect_err("ceiling exceeded");
    assert!(matches!(err, AccessError::RateLimited { .. }));
    assert_eq!(err.public_message(), UNAVAILABLE_MESSAGE);
    assert_eq!(harness.log.of_type(SecurityEventType::RateLimited).len(), 1);

    harness.clock.advance(chrono::Duration::minutes(61));
    assert!(harness.service.resolve_link(token, &key).await.is_ok());
}

#[tokio::test]
async fn rate_limited_client_never_reaches_the_link_store() {
    let harness = harness();
    let token = LinkToken::generate();
    let key = ClientKey::derive("198.51.100.4", token.as_str());

    for _ in 0..config().rate_limit_max_attempts {
        let _ = harness.service.resolve_link(token.as_str(), &key).await;
    }
    let _ = harness.service.resolve_link(token.as_str(), &key).await;

    let not_found = harness.log.of_type(SecurityEventType::TokenNotFound).len();
    assert_eq!(not_found as u32, config().rate_limit_max_attempts);
}

#[tokio::test]
async fn sweep_reclaims_buckets_after_window() {
    let harness = harness();
    let issued = harness.issue("emp-1", EvaluationType::Peer).await;
    harness
        .service
        .resolve_link(issued.link.token.as_str(), &client())
        .await
        .expect("resolves");
    assert_eq!(harness.rate_limits.len(), 1);

    harness.clock.advance(chrono::Duration::hours(2));
    assert_eq!(harness.service.sweep_rate_limits().await, Ok(1));
    assert!(harness.rate_limits.is_empty());
}

#[tokio::test]
async fn stalled_rate_limiter_fails_closed() {
    let log = Arc::new(InMemorySecurityLog::default());
    let service = ExternalEvaluationService::new(
        EvaluationStores {
            links: Arc::new(MemoryLinks::default()),
            evaluations: Arc::new(MemoryEvaluations::default()),
            history: Arc::new(MemoryHistory::default()),
            directory: Arc::new(RosterDirectory::default()),
            rate_limits: Arc::new(StalledRateLimits),
            form_tokens: Arc::new(InMemoryFormTokenStore::default()),
            security_log: log.clone(),
            clock: Arc::new(SystemClock),
        },
        &config(),
    );

    let err = service
        .resolve_link(LinkToken::generate().as_str(), &client())
        .await
        .expect_err("limiter timeout");
    assert!(matches!(err, AccessError::Unavailable(_)));
    assert_eq!(
        log.of_type(SecurityEventType::RateLimiterUnavailable).len(),
        1
    );
}
