//! Integration tests for per-actor rate limiting through the repositories.

use std::sync::Arc;
use std::time::Duration;

use keystone_core::{AuditStatus, Operation, RateLimit, RateLimitPolicy, Resource};
use keystone_repo::{LayerConfig, RepoError};
use keystone_test_utils::{assertions, FailingCounterStore, HarnessOptions, TestHarness, TEST_ACTOR};
use serde_json::json;

#[path = "support/harness.rs"]
mod test_harness_support;
use test_harness_support::{seed_user, test_harness};

#[tokio::test]
async fn test_find_by_id_allows_one_hundred_calls_per_minute() {
    let h = test_harness();
    seed_user(&h, "user-1", "ada@example.com");
    let users = h.layer.users();

    for _ in 0..100 {
        assert!(users.find_by_id("user-1", TEST_ACTOR).await.is_ok());
    }
    let rejected = users.find_by_id("user-1", TEST_ACTOR).await;
    match rejected {
        Err(RepoError::RateLimitExceeded {
            resource,
            ref operation,
            limit,
            window_ms,
            ..
        }) => {
            assert_eq!(resource, Resource::Users);
            assert_eq!(operation, "findById");
            assert_eq!(limit, 100);
            assert_eq!(window_ms, 60_000);
        }
        other => panic!("Expected RateLimitExceeded, got: {:?}", other),
    }

    // One miss, then served from cache.
    assert_eq!(h.executor.executed_count(), 1);
    let events = h.audit_events();
    assert_eq!(events.len(), 101);
    let hits = events
        .iter()
        .filter(|e| e.details["cache_hit"] == json!(true))
        .count();
    assert_eq!(hits, 99);
    assertions::assert_last_audit(&h.audit, "findById", AuditStatus::Failure);
    assert_eq!(
        events[100].details["error_code"],
        json!("RATE_LIMIT_EXCEEDED")
    );
    assert_eq!(
        h.layer
            .metrics()
            .rate_limit_rejections_total
            .with_label_values(&["users", "findById"])
            .get(),
        1.0
    );
}

#[tokio::test]
async fn test_limits_are_per_actor() {
    let h = test_harness();
    seed_user(&h, "user-1", "ada@example.com");
    let users = h.layer.users();

    for _ in 0..100 {
        users.find_by_id("user-1", "actor-a").await.expect("allowed");
    }
    assertions::assert_rate_limited(&users.find_by_id("user-1", "actor-a").await);
    assert!(users.find_by_id("user-1", "actor-b").await.is_ok());
}

#[tokio::test]
async fn test_new_window_starts_a_fresh_count() {
    let h = test_harness();
    let units = h.layer.units();

    for _ in 0..10 {
        let _ = units.delete("unit-404", TEST_ACTOR).await;
    }
    assertions::assert_rate_limited(&units.delete("unit-404", TEST_ACTOR).await);

    h.advance(Duration::from_secs(60));
    let result = units.delete("unit-404", TEST_ACTOR).await;
    assertions::assert_not_found(&result, Resource::Units);
}

#[tokio::test]
async fn test_named_finders_inherit_their_base_limit() {
    let h = test_harness();
    seed_user(&h, "user-1", "ada@example.com");
    let users = h.layer.users();

    for _ in 0..100 {
        users
            .find_by_email("ada@example.com", TEST_ACTOR)
            .await
            .expect("allowed");
    }
    assertions::assert_rate_limited(&users.find_by_email("ada@example.com", TEST_ACTOR).await);
    // Separate counter from findById.
    assert!(users.find_by_id("user-1", TEST_ACTOR).await.is_ok());
}

#[tokio::test]
async fn test_named_finder_override() {
    let policy = RateLimitPolicy::default()
        .with_limit("findByEmail", RateLimit::new(2, Duration::from_secs(1)));
    let h = TestHarness::with_config(LayerConfig {
        rate_limits: policy,
        ..LayerConfig::default()
    })
    .expect("harness");
    let users = h.layer.users();

    for _ in 0..2 {
        users
            .find_by_email("ada@example.com", TEST_ACTOR)
            .await
            .expect("allowed");
    }
    match users.find_by_email("ada@example.com", TEST_ACTOR).await {
        Err(RepoError::RateLimitExceeded { limit, window_ms, .. }) => {
            assert_eq!((limit, window_ms), (2, 1_000));
        }
        other => panic!("Expected RateLimitExceeded, got: {:?}", other),
    }

    h.advance(Duration::from_secs(1));
    assert!(users.find_by_email("ada@example.com", TEST_ACTOR).await.is_ok());
}

#[tokio::test]
async fn test_reset_clears_every_window_of_the_key() {
    let h = test_harness();
    let users = h.layer.users();

    for _ in 0..11 {
        let _ = users.delete("user-404", TEST_ACTOR).await;
    }
    assertions::assert_rate_limited(&users.delete("user-404", TEST_ACTOR).await);

    let cleared = h
        .layer
        .reset_rate_limit(Resource::Users, Operation::Delete, TEST_ACTOR)
        .await;
    assert_eq!(cleared, Ok(1));
    assertions::assert_not_found(&users.delete("user-404", TEST_ACTOR).await, Resource::Users);
}

#[tokio::test]
async fn test_reset_is_scoped_to_one_actor() {
    let h = test_harness();
    seed_user(&h, "user-1", "ada@example.com");
    let users = h.layer.users();
    users.find_by_id("user-1", "a").await.expect("actor a");
    users.find_by_id("user-1", "a:b").await.expect("actor a:b");

    let cleared = h
        .layer
        .reset_rate_limit(Resource::Users, Operation::FindById, "a")
        .await;
    assert_eq!(cleared, Ok(1));
    assert_eq!(h.counters.len(), 1);
}

#[tokio::test]
async fn test_disabled_policy_never_counts() {
    let h = TestHarness::with_config(LayerConfig {
        rate_limits: RateLimitPolicy::disabled(),
        ..LayerConfig::default()
    })
    .expect("harness");
    seed_user(&h, "user-1", "ada@example.com");

    for _ in 0..150 {
        h.layer
            .users()
            .find_by_id("user-1", TEST_ACTOR)
            .await
            .expect("unlimited");
    }
    assert!(h.counters.is_empty());
}

#[tokio::test]
async fn test_unavailable_counter_store_fails_open() {
    let h = TestHarness::with_options(HarnessOptions {
        counters: Some(Arc::new(FailingCounterStore)),
        ..HarnessOptions::default()
    })
    .expect("harness");
    seed_user(&h, "user-1", "ada@example.com");

    for _ in 0..150 {
        h.layer
            .users()
            .find_by_id("user-1", TEST_ACTOR)
            .await
            .expect("fail open");
    }
    assert_eq!(h.audit.with_status(AuditStatus::Failure).len(), 0);
}
