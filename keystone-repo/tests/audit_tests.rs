//! Audit trail tests: one event per call, sink failures, JSON-lines output.
//!
//! **Property: Audit Completeness**
//!
//! For any sequence of repository calls, successful or not, the audit trail
//! holds exactly one event per call, in call order.

use std::io::Read;
use std::sync::Arc;

use keystone_core::{AuditStatus, NewUser, UserPatch, ValidationError};
use keystone_repo::{AuditEvent, RepoError, WriterAuditSink};
use keystone_test_utils::{
    assertions, fixtures, generators, FailingAuditSink, HarnessOptions, TestHarness, TEST_ACTOR,
};
use proptest::prelude::*;
use tokio::runtime::Runtime;

#[path = "support/harness.rs"]
mod test_harness_support;
use test_harness_support::{seed_user, test_harness};

fn test_runtime() -> Result<Runtime, TestCaseError> {
    Runtime::new().map_err(|e| TestCaseError::fail(format!("Failed to create runtime: {}", e)))
}

// ============================================================================
// EVENT CONTENT
// ============================================================================

#[tokio::test]
async fn test_success_event_fields() {
    let h = test_harness();
    seed_user(&h, "user-1", "ada@example.com");
    h.layer
        .users()
        .find_by_id("user-1", TEST_ACTOR)
        .await
        .expect("find");

    let events = h.audit_events();
    assert_eq!(events.len(), 1);
    let event = &events[0];
    assert_eq!(event.actor_id, TEST_ACTOR);
    assert_eq!(event.action, "findById");
    assert_eq!(event.resource_type, "user");
    assert_eq!(event.resource_id.as_deref(), Some("user-1"));
    assert_eq!(event.status, AuditStatus::Success);
    assert_eq!(event.timestamp, h.now());
    assert_eq!(event.details["table"], "users");
    assert_eq!(event.details["cache_hit"], false);
}

#[tokio::test]
async fn test_create_event_carries_new_id() {
    let h = test_harness();
    let user = h
        .layer
        .users()
        .create(fixtures::new_user("ada@example.com"), TEST_ACTOR)
        .await
        .expect("create");

    let event = h.audit_events().pop().expect("audit event");
    assert_eq!(event.action, "create");
    assert_eq!(event.resource_id, Some(user.id));
}

#[tokio::test]
async fn test_failure_event_records_error_code() {
    let h = test_harness();
    let result = h.layer.sales().delete("sale-404", TEST_ACTOR).await;
    assert!(result.is_err());

    assertions::assert_last_audit(&h.audit, "delete", AuditStatus::Failure);
    let event = h.audit_events().pop().expect("audit event");
    assert_eq!(event.resource_type, "sale");
    assert_eq!(event.details["error_code"], "NOT_FOUND");
}

// ============================================================================
// SINKS
// ============================================================================

#[tokio::test]
async fn test_failing_sink_does_not_fail_the_call() {
    let h = TestHarness::with_options(HarnessOptions {
        extra_sinks: vec![Arc::new(FailingAuditSink)],
        ..HarnessOptions::default()
    })
    .expect("harness");
    seed_user(&h, "user-1", "ada@example.com");

    let found = h.layer.users().find_by_id("user-1", TEST_ACTOR).await;
    assert!(matches!(found, Ok(Some(_))));

    // The other sink still received the event.
    assert_eq!(h.audit.len(), 1);
    assert_eq!(h.layer.audit().dropped(), 1);
    assert_eq!(h.layer.metrics().audit_dropped_total.get(), 1);
}

#[tokio::test]
async fn test_writer_sink_appends_json_lines() {
    let file = tempfile::NamedTempFile::new().expect("temp file");
    let writer = file.reopen().expect("reopen temp file");
    let h = TestHarness::with_options(HarnessOptions {
        extra_sinks: vec![Arc::new(WriterAuditSink::new(writer))],
        ..HarnessOptions::default()
    })
    .expect("harness");
    seed_user(&h, "user-1", "ada@example.com");

    let users = h.layer.users();
    users.find_by_id("user-1", TEST_ACTOR).await.expect("find");
    let _ = users.find_by_id("bad id", TEST_ACTOR).await;

    let mut contents = String::new();
    file.reopen()
        .expect("reopen for read")
        .read_to_string(&mut contents)
        .expect("read audit log");
    let events: Vec<AuditEvent> = contents
        .lines()
        .map(|line| serde_json::from_str(line).expect("valid JSON line"))
        .collect();
    assert_eq!(events, h.audit_events());
    assert_eq!(events[1].status, AuditStatus::Failure);
}

#[tokio::test]
async fn test_recent_audit_buffer_is_optional() {
    let h = test_harness();
    assert!(h.layer.recent_audit().is_none());
}

// ============================================================================
// PROPERTY: ONE EVENT PER CALL
// ============================================================================

#[derive(Debug, Clone)]
enum Call {
    FindSeeded,
    FindMissing(String),
    FindInvalid(String),
    Create(NewUser),
    UpdateMissing(String),
    DeleteMissing(String),
    BlankActor,
}

fn call_strategy() -> impl Strategy<Value = Call> {
    prop_oneof![
        Just(Call::FindSeeded),
        generators::arb_entity_id().prop_map(Call::FindMissing),
        generators::arb_invalid_entity_id().prop_map(Call::FindInvalid),
        generators::arb_new_user().prop_map(Call::Create),
        generators::arb_entity_id().prop_map(Call::UpdateMissing),
        generators::arb_entity_id().prop_map(Call::DeleteMissing),
        Just(Call::BlankActor),
    ]
}

async fn perform(h: &TestHarness, call: &Call) -> (&'static str, bool) {
    let users = h.layer.users();
    match call {
        Call::FindSeeded => ("findById", users.find_by_id("seeded", TEST_ACTOR).await.is_ok()),
        Call::FindMissing(id) => {
            let id = format!("missing-{id}");
            ("findById", users.find_by_id(&id, TEST_ACTOR).await.is_ok())
        }
        Call::FindInvalid(id) => ("findById", users.find_by_id(id, TEST_ACTOR).await.is_ok()),
        Call::Create(draft) => ("create", users.create(draft.clone(), TEST_ACTOR).await.is_ok()),
        Call::UpdateMissing(id) => {
            let id = format!("missing-{id}");
            let patch = UserPatch {
                full_name: Some("Renamed".to_string()),
                ..Default::default()
            };
            ("update", users.update(&id, patch, TEST_ACTOR).await.is_ok())
        }
        Call::DeleteMissing(id) => {
            let id = format!("missing-{id}");
            ("delete", users.delete(&id, TEST_ACTOR).await.is_ok())
        }
        Call::BlankActor => {
            let result = users.find_by_id("seeded", "").await;
            let blank = matches!(
                result,
                Err(RepoError::Validation(
                    ValidationError::RequiredFieldMissing { .. }
                ))
            );
            ("findById", !blank)
        }
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(40))]

    #[test]
    fn prop_every_call_is_audited_exactly_once(
        calls in prop::collection::vec(call_strategy(), 1..30)
    ) {
        let rt = test_runtime()?;
        rt.block_on(async {
            let h = TestHarness::new()
                .map_err(|e| TestCaseError::fail(format!("harness: {}", e)))?;
            seed_user(&h, "seeded", "seeded@example.com");

            let mut expected = Vec::with_capacity(calls.len());
            for call in &calls {
                let (action, ok) = perform(&h, call).await;
                let status = if ok { AuditStatus::Success } else { AuditStatus::Failure };
                expected.push((action, status));
            }

            let recorded: Vec<_> = h
                .audit_events()
                .into_iter()
                .map(|e| (e.action, e.status))
                .collect();
            prop_assert_eq!(recorded.len(), calls.len());
            for ((action, status), (want_action, want_status)) in recorded.iter().zip(&expected) {
                prop_assert_eq!(action.as_str(), *want_action);
                prop_assert_eq!(status, want_status);
            }
            Ok::<(), TestCaseError>(())
        })?;
    }

    #[test]
    fn prop_created_user_reads_back_equal(draft in generators::arb_new_user()) {
        let rt = test_runtime()?;
        rt.block_on(async {
            let h = TestHarness::new()
                .map_err(|e| TestCaseError::fail(format!("harness: {}", e)))?;
            let users = h.layer.users();
            let created = users
                .create(draft.clone(), TEST_ACTOR)
                .await
                .map_err(|e| TestCaseError::fail(format!("create: {}", e)))?;
            prop_assert_eq!(&created.email, &draft.email);
            prop_assert_eq!(&created.full_name, &draft.full_name);
            prop_assert_eq!(created.role, draft.role);
            prop_assert_eq!(&created.phone, &draft.phone);

            let found = users
                .find_by_id(&created.id, TEST_ACTOR)
                .await
                .map_err(|e| TestCaseError::fail(format!("find: {}", e)))?;
            prop_assert_eq!(found, Some(created));
            Ok::<(), TestCaseError>(())
        })?;
    }
}
