//! Integration tests for the protected repositories over the in-memory
//! executor: CRUD, caching, pagination, child rows and error mapping.

use std::sync::Arc;
use std::time::Duration;

use keystone_core::{
    DevelopmentStatus, Pagination, QueryError, Resource, UnitFilter, UnitPatch, UnitStatus,
    User, UserPatch, ValidationError,
};
use keystone_repo::{CustomizationOptionMapper, RoomMapper};
use keystone_test_utils::{assertions, fixtures, TEST_ACTOR};
use serde_json::json;

#[path = "support/harness.rs"]
mod test_harness_support;
use test_harness_support::{seed_user, test_harness};

// ============================================================================
// CRUD
// ============================================================================

#[tokio::test]
async fn test_create_then_find_returns_same_entity() {
    let h = test_harness();
    let users = h.layer.users();

    let created = users
        .create(fixtures::new_user("Mixed@Example.COM"), TEST_ACTOR)
        .await
        .expect("create");
    assert_eq!(created.email, "mixed@example.com");
    assert_eq!(created.created_at, h.now());
    assert_eq!(created.created_at, created.updated_at);

    let found = users.find_by_id(&created.id, TEST_ACTOR).await.expect("find");
    assert_eq!(found, Some(created));
}

#[tokio::test]
async fn test_find_missing_returns_none_and_is_not_cached() {
    let h = test_harness();
    let users = h.layer.users();

    assert_eq!(users.find_by_id("user-404", TEST_ACTOR).await, Ok(None));
    assert_eq!(users.find_by_id("user-404", TEST_ACTOR).await, Ok(None));
    assert_eq!(h.executor.executed_count(), 2);
}

#[tokio::test]
async fn test_update_invalidates_cached_entity() {
    let h = test_harness();
    let units = h.layer.units();

    let unit = units
        .create(fixtures::new_unit("dev-1", "A-101"), TEST_ACTOR)
        .await
        .expect("create");
    assert_eq!(
        units.find_by_id(&unit.id, TEST_ACTOR).await,
        Ok(Some(unit.clone()))
    );

    h.advance(Duration::from_secs(5));
    let patch = UnitPatch {
        price_cents: Some(30_000_000),
        status: Some(UnitStatus::Reserved),
        ..UnitPatch::default()
    };
    let updated = units
        .update(&unit.id, patch, TEST_ACTOR)
        .await
        .expect("update");
    assert_eq!(updated.price_cents, 30_000_000);
    assert_eq!(updated.status, UnitStatus::Reserved);
    assert_eq!(updated.created_at, unit.created_at);
    assert_eq!(updated.updated_at, h.now());

    assert_eq!(units.find_by_id(&unit.id, TEST_ACTOR).await, Ok(Some(updated)));
}

#[tokio::test]
async fn test_update_missing_is_not_found() {
    let h = test_harness();
    let patch = UnitPatch {
        bedrooms: Some(3),
        ..UnitPatch::default()
    };
    let result = h.layer.units().update("unit-404", patch, TEST_ACTOR).await;
    assertions::assert_not_found(&result, Resource::Units);
}

#[tokio::test]
async fn test_empty_patch_is_rejected_before_execution() {
    let h = test_harness();
    let user = seed_user(&h, "user-1", "ada@example.com");

    let result = h
        .layer
        .users()
        .update(&user.id, UserPatch::default(), TEST_ACTOR)
        .await;
    assert_eq!(assertions::assert_validation_error(&result), ValidationError::NoUpdates);
    assert_eq!(h.executor.executed_count(), 0);
}

#[tokio::test]
async fn test_delete_removes_row_and_cache_entry() {
    let h = test_harness();
    let users = h.layer.users();
    let user = seed_user(&h, "user-1", "ada@example.com");

    assert!(users.find_by_id(&user.id, TEST_ACTOR).await.expect("find").is_some());
    users.delete(&user.id, TEST_ACTOR).await.expect("delete");
    assert_eq!(users.find_by_id(&user.id, TEST_ACTOR).await, Ok(None));

    let again = users.delete(&user.id, TEST_ACTOR).await;
    assertions::assert_not_found(&again, Resource::Users);
}

// ============================================================================
// VALIDATION
// ============================================================================

#[tokio::test]
async fn test_malformed_id_never_reaches_executor() {
    let h = test_harness();
    let result = h
        .layer
        .users()
        .find_by_id("1 OR 1=1; DROP TABLE users", TEST_ACTOR)
        .await;
    assertions::assert_validation_error(&result);
    assert_eq!(h.executor.executed_count(), 0);
    assert!(h.counters.is_empty(), "invalid input must not consume quota");
}

#[tokio::test]
async fn test_blank_actor_is_rejected() {
    let h = test_harness();
    seed_user(&h, "user-1", "ada@example.com");
    let result = h.layer.users().find_by_id("user-1", "  ").await;
    assert_eq!(
        assertions::assert_validation_error(&result),
        ValidationError::RequiredFieldMissing {
            field: "actor_id".to_string()
        }
    );
}

#[tokio::test]
async fn test_invalid_draft_is_rejected() {
    let h = test_harness();
    let mut draft = fixtures::new_unit("dev-1", "A-101");
    draft.floor_area_sqm = f64::NAN;
    let result = h.layer.units().create(draft, TEST_ACTOR).await;
    assertions::assert_validation_error(&result);
    assert!(h.executor.rows(Resource::Units).is_empty());
}

#[tokio::test]
async fn test_pagination_bounds_are_enforced() {
    let h = test_harness();
    let users = h.layer.users();
    for pagination in [Pagination::new(0, 10), Pagination::new(1, 0), Pagination::new(1, 101)] {
        let result = users.find_all(TEST_ACTOR, pagination).await;
        assertions::assert_validation_error(&result);
    }
}

// ============================================================================
// FINDERS
// ============================================================================

#[tokio::test]
async fn test_find_by_email_ignores_case_and_whitespace() {
    let h = test_harness();
    let user = seed_user(&h, "user-1", "ada@example.com");

    let found = h
        .layer
        .users()
        .find_by_email("  ADA@Example.com ", TEST_ACTOR)
        .await;
    assert_eq!(found, Ok(Some(user)));

    let bad = h.layer.users().find_by_email("not-an-email", TEST_ACTOR).await;
    assertions::assert_validation_error(&bad);
}

#[tokio::test]
async fn test_find_all_pages_newest_first() {
    let h = test_harness();
    let users = h.layer.users();
    let mut ids = Vec::new();
    for n in 0..3 {
        let user = users
            .create(fixtures::new_user(&format!("user{n}@example.com")), TEST_ACTOR)
            .await
            .expect("create");
        ids.push(user.id);
        h.advance(Duration::from_secs(1));
    }

    let first = users
        .find_all(TEST_ACTOR, Pagination::new(1, 2))
        .await
        .expect("page 1");
    let second = users
        .find_all(TEST_ACTOR, Pagination::new(2, 2))
        .await
        .expect("page 2");
    let listed: Vec<_> = first.iter().chain(&second).map(|u| u.id.clone()).collect();
    ids.reverse();
    assert_eq!(listed, ids);
}

#[tokio::test]
async fn test_development_units_page_counts_are_cached_and_invalidated() {
    let h = test_harness();
    let units = h.layer.units();
    for n in 0..5 {
        units
            .create(fixtures::new_unit("dev-1", &format!("A-{n}")), TEST_ACTOR)
            .await
            .expect("create");
    }
    units
        .create(fixtures::new_unit("dev-2", "B-1"), TEST_ACTOR)
        .await
        .expect("create");

    let first = units
        .find_by_development("dev-1", UnitFilter::default(), Pagination::new(1, 2), TEST_ACTOR)
        .await
        .expect("page 1");
    assert_eq!(first.items.len(), 2);
    assert_eq!(first.total, 5);
    assert_eq!(first.total_pages, 3);

    // The count is shared across pages; only the items query runs.
    let before = h.executor.executed_count();
    let third = units
        .find_by_development("dev-1", UnitFilter::default(), Pagination::new(3, 2), TEST_ACTOR)
        .await
        .expect("page 3");
    assert_eq!(third.items.len(), 1);
    assert_eq!(h.executor.executed_count(), before + 1);

    // Fully cached.
    let again = units
        .find_by_development("dev-1", UnitFilter::default(), Pagination::new(1, 2), TEST_ACTOR)
        .await
        .expect("page 1 again");
    assert_eq!(again, first);
    assert_eq!(h.executor.executed_count(), before + 1);

    units
        .create(fixtures::new_unit("dev-1", "A-9"), TEST_ACTOR)
        .await
        .expect("create");
    let refreshed = units
        .find_by_development("dev-1", UnitFilter::default(), Pagination::new(1, 2), TEST_ACTOR)
        .await
        .expect("page 1 refreshed");
    assert_eq!(refreshed.total, 6);
    assert_eq!(refreshed.total_pages, 3);
}

#[tokio::test]
async fn test_unit_count_shares_the_page_count_and_is_invalidated() {
    let h = test_harness();
    let units = h.layer.units();
    for n in 0..3 {
        units
            .create(fixtures::new_unit("dev-1", &format!("A-{n}")), TEST_ACTOR)
            .await
            .expect("create");
    }

    let page = units
        .find_by_development("dev-1", UnitFilter::default(), Pagination::new(1, 2), TEST_ACTOR)
        .await
        .expect("page");
    assert_eq!(page.total, 3);

    // Same filters as the page: the count comes from the cache.
    let before = h.executor.executed_count();
    let total = units
        .count_by_development("dev-1", UnitFilter::default(), TEST_ACTOR)
        .await;
    assert_eq!(total, Ok(3));
    assert_eq!(h.executor.executed_count(), before);
    let event = h.audit_events().pop().expect("audit event");
    assert_eq!(event.action, "countByDevelopment");
    assert_eq!(event.resource_id.as_deref(), Some("dev-1"));
    assert_eq!(event.details["cache_hit"], json!(true));

    units
        .create(fixtures::new_unit("dev-1", "A-9"), TEST_ACTOR)
        .await
        .expect("create");
    let refreshed = units
        .count_by_development("dev-1", UnitFilter::default(), TEST_ACTOR)
        .await;
    assert_eq!(refreshed, Ok(4));
    assert_eq!(h.executor.executed_count(), before + 2);
    let event = h.audit_events().pop().expect("audit event");
    assert_eq!(event.details["cache_hit"], json!(false));

    let sold = UnitFilter {
        status: Some(UnitStatus::Sold),
        ..UnitFilter::default()
    };
    assert_eq!(
        units.count_by_development("dev-1", sold, TEST_ACTOR).await,
        Ok(0)
    );
    let invalid = units
        .count_by_development("dev 1", UnitFilter::default(), TEST_ACTOR)
        .await;
    assertions::assert_validation_error(&invalid);
}

#[tokio::test]
async fn test_unit_filter_narrows_results() {
    let h = test_harness();
    let units = h.layer.units();
    let specs = [
        ("A-1", 1, 20_000_000),
        ("A-2", 2, 30_000_000),
        ("A-3", 3, 45_000_000),
    ];
    for (number, bedrooms, price) in specs {
        let mut draft = fixtures::new_unit("dev-1", number);
        draft.bedrooms = bedrooms;
        draft.price_cents = price;
        units.create(draft, TEST_ACTOR).await.expect("create");
    }

    let filter = UnitFilter {
        min_bedrooms: Some(2),
        max_price_cents: Some(40_000_000),
        ..UnitFilter::default()
    };
    let page = units
        .find_by_development("dev-1", filter, Pagination::default(), TEST_ACTOR)
        .await
        .expect("filtered page");
    assert_eq!(page.total, 1);
    assert_eq!(page.items[0].unit_number, "A-2");

    let inverted = UnitFilter {
        min_price_cents: Some(5),
        max_price_cents: Some(1),
        ..UnitFilter::default()
    };
    let result = units
        .find_by_development("dev-1", inverted, Pagination::default(), TEST_ACTOR)
        .await;
    assertions::assert_validation_error(&result);
}

#[tokio::test]
async fn test_rooms_and_options_are_read_through_units() {
    let h = test_harness();
    h.seed::<RoomMapper>(&[
        fixtures::room("room-2", "unit-1", "Kitchen"),
        fixtures::room("room-1", "unit-1", "Bedroom"),
        fixtures::room("room-3", "unit-2", "Bathroom"),
    ]);
    h.seed::<CustomizationOptionMapper>(&[
        fixtures::customization_option("opt-2", "unit-1", "worktop", "Quartz"),
        fixtures::customization_option("opt-1", "unit-1", "flooring", "Oak"),
    ]);

    let rooms = h.layer.units().get_rooms("unit-1", TEST_ACTOR).await.expect("rooms");
    let names: Vec<_> = rooms.iter().map(|r| r.name.as_str()).collect();
    assert_eq!(names, vec!["Bedroom", "Kitchen"]);

    let options = h
        .layer
        .units()
        .get_customization_options("unit-1", TEST_ACTOR)
        .await
        .expect("options");
    let categories: Vec<_> = options.iter().map(|o| o.category.as_str()).collect();
    assert_eq!(categories, vec!["flooring", "worktop"]);

    let events = h.audit_events();
    assert!(events.iter().all(|e| e.resource_type == "unit"));
    assert_eq!(events[0].action, "getRooms");
    assert_eq!(events[1].action, "getCustomizationOptions");
}

#[tokio::test]
async fn test_sales_and_finance_finders() {
    let h = test_harness();
    let sale = h
        .layer
        .sales()
        .create(fixtures::new_sale("unit-1", "user-1"), TEST_ACTOR)
        .await
        .expect("sale");
    let record = h
        .layer
        .finance()
        .create(fixtures::new_finance_record(&sale.id, "user-1"), TEST_ACTOR)
        .await
        .expect("finance record");

    let by_unit = h.layer.sales().find_by_unit_id("unit-1", TEST_ACTOR).await;
    assert_eq!(by_unit, Ok(vec![sale.clone()]));

    let by_buyer = h
        .layer
        .sales()
        .find_by_buyer_id("user-1", Pagination::default(), TEST_ACTOR)
        .await
        .expect("by buyer");
    assert_eq!(by_buyer.total, 1);

    let records = h
        .layer
        .finance()
        .find_by_sale_id(&sale.id, Pagination::default(), TEST_ACTOR)
        .await
        .expect("by sale");
    assert_eq!(records.items, vec![record]);
}

#[tokio::test]
async fn test_developments_and_documents_finders() {
    let h = test_harness();
    let development = h
        .layer
        .developments()
        .create(fixtures::new_development("dev-user-1"), TEST_ACTOR)
        .await
        .expect("development");
    let selling = h
        .layer
        .developments()
        .find_by_status(DevelopmentStatus::Selling, Pagination::default(), TEST_ACTOR)
        .await
        .expect("by status");
    assert_eq!(selling.items, vec![development.clone()]);

    let document = h
        .layer
        .documents()
        .create(
            fixtures::new_document("dev-user-1", Some(&development.id)),
            TEST_ACTOR,
        )
        .await
        .expect("document");
    let attached = h
        .layer
        .documents()
        .find_by_development_id(&development.id, TEST_ACTOR)
        .await;
    assert_eq!(attached, Ok(vec![document.clone()]));

    let owned = h
        .layer
        .documents()
        .find_by_owner_id("dev-user-1", Pagination::default(), TEST_ACTOR)
        .await
        .expect("by owner");
    assert_eq!(owned.items, vec![document]);
}

// ============================================================================
// CACHE
// ============================================================================

#[tokio::test]
async fn test_cached_entity_expires_after_ttl() {
    let h = test_harness();
    let users = h.layer.users();
    seed_user(&h, "user-1", "ada@example.com");

    users.find_by_id("user-1", TEST_ACTOR).await.expect("miss");
    users.find_by_id("user-1", TEST_ACTOR).await.expect("hit");
    assert_eq!(h.executor.executed_count(), 1);

    h.advance(Duration::from_secs(301));
    users.find_by_id("user-1", TEST_ACTOR).await.expect("expired");
    assert_eq!(h.executor.executed_count(), 2);
}

#[tokio::test]
async fn test_unreadable_cache_entry_degrades_to_miss() {
    let h = test_harness();
    let users = h.layer.users();
    let user = seed_user(&h, "user-1", "ada@example.com");
    users
        .cache()
        .set("id:user-1", "not a user", Duration::from_secs(60))
        .expect("cache set");

    assert_eq!(users.find_by_id("user-1", TEST_ACTOR).await, Ok(Some(user.clone())));
    assert_eq!(h.executor.executed_count(), 1);
    assert_eq!(
        h.layer
            .metrics()
            .cache_lookups_total
            .with_label_values(&["user", "error"])
            .get(),
        1.0
    );

    // The good row replaced the bad entry.
    assert_eq!(users.find_by_id("user-1", TEST_ACTOR).await, Ok(Some(user)));
    assert_eq!(h.executor.executed_count(), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_misses_populate_one_entry() {
    let h = Arc::new(test_harness());
    let user = seed_user(&h, "user-1", "ada@example.com");

    let mut tasks = Vec::new();
    for n in 0..8 {
        let h = Arc::clone(&h);
        tasks.push(tokio::spawn(async move {
            let actor = format!("actor-{n}");
            h.layer.users().find_by_id("user-1", &actor).await
        }));
    }
    for task in tasks {
        let found = task.await.expect("task panicked");
        assert_eq!(found, Ok(Some(user.clone())));
    }

    let cache = h.layer.users().cache();
    assert_eq!(cache.len(), 1);
    assert_eq!(cache.get::<User>("id:user-1"), Ok(Some(user)));
    assert_eq!(h.audit_events().len(), 8);
}

#[tokio::test]
async fn test_finance_namespace_uses_shorter_ttl() {
    let h = test_harness();
    assert_eq!(h.layer.finance().cache().default_ttl(), Duration::from_secs(60));
    assert_eq!(h.layer.users().cache().default_ttl(), Duration::from_secs(300));
}

#[tokio::test]
async fn test_shutdown_drops_cached_data() {
    let h = test_harness();
    seed_user(&h, "user-1", "ada@example.com");
    h.layer.users().find_by_id("user-1", TEST_ACTOR).await.expect("find");
    assert!(!h.layer.users().cache().is_empty());

    assert!(h.layer.start_background_tasks());
    assert!(!h.layer.start_background_tasks());
    h.layer.shutdown();
    assert!(h.layer.users().cache().is_empty());
}

// ============================================================================
// EXECUTOR FAILURES
// ============================================================================

#[tokio::test]
async fn test_executor_error_is_wrapped_with_context() {
    let h = test_harness();
    h.executor.fail_next(QueryError::Timeout {
        reason: "statement timeout".to_string(),
    });

    let result = h.layer.users().find_by_id("user-1", TEST_ACTOR).await;
    assertions::assert_error_code(&result, "QUERY_TIMEOUT");
    let event = h.audit_events().pop().expect("audit event");
    assert_eq!(event.details["error_code"], json!("QUERY_TIMEOUT"));

    // The injected failure is one-shot.
    assert_eq!(h.layer.users().find_by_id("user-1", TEST_ACTOR).await, Ok(None));
}

#[tokio::test]
async fn test_malformed_row_is_a_mapping_error() {
    let h = test_harness();
    let row = json!({
        "id": "unit-1",
        "development_id": "dev-1",
        "unit_number": "A-1",
        "unit_type": "apartment",
        "bedrooms": 2,
        "bathrooms": 1,
        "floor_area_sqm": 60.0,
        "price_cents": 100,
        "status": "demolished",
        "created_at": "2025-01-01T00:00:00.000000Z",
        "updated_at": "2025-01-01T00:00:00.000000Z"
    });
    h.seed_rows(Resource::Units, row.as_object().cloned().into_iter().collect());

    let result = h.layer.units().find_by_id("unit-1", TEST_ACTOR).await;
    assertions::assert_error_code(&result, "ROW_MAPPING");
}
