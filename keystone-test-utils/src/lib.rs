//! Keystone Test Utilities
//!
//! Shared test infrastructure for the Keystone crates:
//! - A [`TestHarness`] wiring a [`DataLayer`] to in-memory collaborators
//! - Failing collaborators for the degraded-dependency paths
//! - Proptest generators for ids, emails and drafts
//! - Fixtures for seeded rows
//! - Assertions over [`RepoError`] and the audit trail

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use keystone_core::{
    AuditError, AuditStatus, Clock, CounterStoreError, CustomizationOption, DevelopmentStatus,
    DocumentKind, FinanceRecordType, ManualClock, NewDevelopment, NewDocument, NewFinanceRecord,
    NewSale, NewUnit, NewUser, PaymentStatus, Resource, Room, Row, SaleStatus, Timestamp,
    UnitStatus, UnitType, UserRole, ValidationError,
};
use keystone_repo::{
    AuditEvent, AuditSink, DataLayer, LayerConfig, LayerError, MemoryAuditSink, RepoError,
    RepoResult, RowMapper,
};
use keystone_storage::CounterStore;

// Re-export the in-memory collaborators so tests need a single import.
pub use keystone_storage::{InMemoryCounterStore, InMemoryExecutor};

/// Actor used by tests that do not care who is calling.
pub const TEST_ACTOR: &str = "actor-1";

// ============================================================================
// HARNESS
// ============================================================================

/// Overrides for [`TestHarness::with_options`].
#[derive(Default)]
pub struct HarnessOptions {
    pub config: LayerConfig,
    /// Replaces the in-memory counter store.
    pub counters: Option<Arc<dyn CounterStore>>,
    /// Sinks registered in addition to the harness' memory sink.
    pub extra_sinks: Vec<Arc<dyn AuditSink>>,
}

/// A data layer over in-memory collaborators, with handles to each of them.
pub struct TestHarness {
    pub layer: DataLayer,
    pub executor: Arc<InMemoryExecutor>,
    pub counters: Arc<InMemoryCounterStore>,
    pub audit: Arc<MemoryAuditSink>,
    pub clock: Arc<ManualClock>,
}

impl TestHarness {
    /// Harness with the default configuration.
    pub fn new() -> Result<Self, LayerError> {
        Self::with_options(HarnessOptions::default())
    }

    /// Harness with a custom configuration.
    pub fn with_config(config: LayerConfig) -> Result<Self, LayerError> {
        Self::with_options(HarnessOptions {
            config,
            ..HarnessOptions::default()
        })
    }

    pub fn with_options(options: HarnessOptions) -> Result<Self, LayerError> {
        let clock = Arc::new(ManualClock::default());
        let executor = Arc::new(InMemoryExecutor::new());
        let counters = Arc::new(InMemoryCounterStore::new(clock.clone()));
        let audit = Arc::new(MemoryAuditSink::new(options.config.audit_capacity));

        let store = options
            .counters
            .unwrap_or_else(|| counters.clone() as Arc<dyn CounterStore>);
        let mut builder = DataLayer::builder(executor.clone())
            .with_config(options.config)
            .with_clock(clock.clone())
            .with_counter_store(store)
            .with_audit_sink(audit.clone());
        for sink in options.extra_sinks {
            builder = builder.with_audit_sink(sink);
        }

        Ok(Self {
            layer: builder.build()?,
            executor,
            counters,
            audit,
            clock,
        })
    }

    /// Seed rows for an entity table, bypassing the layer.
    pub fn seed<M: RowMapper>(&self, entities: &[M::Entity]) {
        self.executor
            .seed(M::RESOURCE, entities.iter().map(fixtures::row_of::<M>));
    }

    /// Seed raw rows for any table.
    pub fn seed_rows(&self, table: Resource, rows: Vec<Row>) {
        self.executor.seed(table, rows);
    }

    /// Move the harness clock forward.
    pub fn advance(&self, by: Duration) {
        self.clock.advance(by);
    }

    pub fn now(&self) -> Timestamp {
        self.clock.now()
    }

    /// Audit events recorded so far.
    pub fn audit_events(&self) -> Vec<AuditEvent> {
        self.audit.events()
    }
}

// ============================================================================
// FAILING COLLABORATORS
// ============================================================================

/// Counter store whose every call fails with `Unavailable`.
#[derive(Debug, Default, Clone, Copy)]
pub struct FailingCounterStore;

#[async_trait]
impl CounterStore for FailingCounterStore {
    async fn incr(&self, _key: &str) -> Result<i64, CounterStoreError> {
        Err(unavailable())
    }

    async fn expire(&self, _key: &str, _ttl: Duration) -> Result<bool, CounterStoreError> {
        Err(unavailable())
    }

    async fn keys(&self, _pattern: &str) -> Result<Vec<String>, CounterStoreError> {
        Err(unavailable())
    }

    async fn del(&self, _keys: &[String]) -> Result<u64, CounterStoreError> {
        Err(unavailable())
    }
}

fn unavailable() -> CounterStoreError {
    CounterStoreError::Unavailable {
        reason: "counter store offline".to_string(),
    }
}

/// Audit sink that rejects every event.
#[derive(Debug, Default, Clone, Copy)]
pub struct FailingAuditSink;

impl AuditSink for FailingAuditSink {
    fn record(&self, _event: &AuditEvent) -> Result<(), AuditError> {
        Err(AuditError::SinkUnavailable {
            reason: "audit sink offline".to_string(),
        })
    }
}

// ============================================================================
// PROPTEST GENERATORS
// ============================================================================

pub mod generators {
    //! Proptest strategies for Keystone inputs.

    use super::*;
    use proptest::prelude::*;

    /// Opaque ids the layer accepts.
    pub fn arb_entity_id() -> impl Strategy<Value = String> {
        "[a-z0-9][a-z0-9_-]{0,35}"
    }

    /// Ids that must fail id validation.
    pub fn arb_invalid_entity_id() -> impl Strategy<Value = String> {
        prop_oneof![
            Just(String::new()),
            Just("   ".to_string()),
            "[a-z]{1,8}[ ;'\"]{1,3}[a-z]{0,8}",
            "-[a-z0-9]{1,10}",
            "[a-z]{65,80}",
        ]
    }

    /// Syntactically valid, lower-case email addresses.
    pub fn arb_email() -> impl Strategy<Value = String> {
        ("[a-z][a-z0-9.]{0,15}", "[a-z]{2,12}", prop_oneof!["com", "org", "estate"])
            .prop_map(|(local, domain, tld)| format!("{local}@{domain}.{tld}"))
    }

    /// Table or column names that must be rejected.
    pub fn arb_invalid_identifier() -> impl Strategy<Value = String> {
        prop_oneof![
            Just(String::new()),
            "[0-9][a-z_]{0,10}",
            "[a-z_]{1,10}[ ;\\-'\"().*]{1,4}[a-z_]{0,10}",
            "[a-z_]{64,80}",
            Just("users; DROP TABLE users".to_string()),
        ]
    }

    /// Table or column names that must be accepted unchanged.
    pub fn arb_valid_identifier() -> impl Strategy<Value = String> {
        "[a-z_][a-z0-9_]{0,62}"
    }

    pub fn arb_user_role() -> impl Strategy<Value = UserRole> {
        prop::sample::select(UserRole::ALL.to_vec())
    }

    pub fn arb_unit_type() -> impl Strategy<Value = UnitType> {
        prop::sample::select(UnitType::ALL.to_vec())
    }

    pub fn arb_unit_status() -> impl Strategy<Value = UnitStatus> {
        prop::sample::select(UnitStatus::ALL.to_vec())
    }

    /// A valid user draft.
    pub fn arb_new_user() -> impl Strategy<Value = NewUser> {
        (
            arb_email(),
            "[A-Z][a-z]{1,12} [A-Z][a-z]{1,12}",
            arb_user_role(),
            proptest::option::of("\\+44 [0-9]{4} [0-9]{6}"),
        )
            .prop_map(|(email, full_name, role, phone)| NewUser {
                email,
                full_name,
                role,
                phone,
                company_name: None,
            })
    }

    /// A valid unit draft for `development_id`.
    pub fn arb_new_unit(development_id: String) -> impl Strategy<Value = NewUnit> {
        (
            "[A-F]-[0-9]{1,4}",
            arb_unit_type(),
            0i64..=6,
            1i64..=4,
            (200u32..=50_000).prop_map(|tenths| f64::from(tenths) / 10.0),
            1i64..=500_000_000,
            arb_unit_status(),
        )
            .prop_map(
                move |(unit_number, unit_type, bedrooms, bathrooms, area, price, status)| NewUnit {
                    development_id: development_id.clone(),
                    unit_number,
                    unit_type,
                    bedrooms,
                    bathrooms,
                    floor_area_sqm: area,
                    price_cents: price,
                    status,
                },
            )
    }
}

// ============================================================================
// TEST FIXTURES
// ============================================================================

pub mod fixtures {
    //! Pre-built drafts and rows for common scenarios.

    use super::*;

    /// Row form of an entity, as an executor would return it.
    pub fn row_of<M: RowMapper>(entity: &M::Entity) -> Row {
        M::map_to_record(entity)
            .into_iter()
            .map(|(column, value)| (column.to_string(), value.to_json()))
            .collect()
    }

    pub fn new_user(email: &str) -> NewUser {
        NewUser {
            email: email.to_string(),
            full_name: "Test Buyer".to_string(),
            role: UserRole::Buyer,
            phone: Some("+44 7700 900123".to_string()),
            company_name: None,
        }
    }

    pub fn new_development(developer_id: &str) -> NewDevelopment {
        NewDevelopment {
            developer_id: developer_id.to_string(),
            name: "Harbour View".to_string(),
            description: Some("Waterfront apartments".to_string()),
            city: "Bristol".to_string(),
            address: "1 Quay Street".to_string(),
            status: DevelopmentStatus::Selling,
            total_units: 40,
            completion_date: None,
        }
    }

    pub fn new_unit(development_id: &str, unit_number: &str) -> NewUnit {
        NewUnit {
            development_id: development_id.to_string(),
            unit_number: unit_number.to_string(),
            unit_type: UnitType::Apartment,
            bedrooms: 2,
            bathrooms: 1,
            floor_area_sqm: 68.5,
            price_cents: 32_500_000,
            status: UnitStatus::Available,
        }
    }

    pub fn new_sale(unit_id: &str, buyer_id: &str) -> NewSale {
        NewSale {
            unit_id: unit_id.to_string(),
            buyer_id: buyer_id.to_string(),
            agreed_price_cents: 31_000_000,
            status: SaleStatus::Reserved,
        }
    }

    pub fn new_document(owner_id: &str, development_id: Option<&str>) -> NewDocument {
        NewDocument {
            owner_id: owner_id.to_string(),
            development_id: development_id.map(str::to_string),
            sale_id: None,
            title: "Floor plan".to_string(),
            kind: DocumentKind::FloorPlan,
            storage_key: "docs/floor-plan.pdf".to_string(),
            mime_type: "application/pdf".to_string(),
            size_bytes: 245_760,
        }
    }

    pub fn new_finance_record(sale_id: &str, buyer_id: &str) -> NewFinanceRecord {
        NewFinanceRecord {
            sale_id: sale_id.to_string(),
            buyer_id: buyer_id.to_string(),
            record_type: FinanceRecordType::Deposit,
            amount_cents: 1_000_000,
            currency: "GBP".to_string(),
            status: PaymentStatus::Pending,
            due_date: None,
        }
    }

    pub fn room(id: &str, unit_id: &str, name: &str) -> Room {
        Room {
            id: id.to_string(),
            unit_id: unit_id.to_string(),
            name: name.to_string(),
            room_type: "bedroom".to_string(),
            area_sqm: 12.5,
        }
    }

    pub fn customization_option(
        id: &str,
        unit_id: &str,
        category: &str,
        name: &str,
    ) -> CustomizationOption {
        CustomizationOption {
            id: id.to_string(),
            unit_id: unit_id.to_string(),
            category: category.to_string(),
            name: name.to_string(),
            price_delta_cents: 0,
            is_default: true,
        }
    }
}

// ============================================================================
// ASSERTIONS
// ============================================================================

pub mod assertions {
    //! Assertions over repository results and the audit trail.

    use super::*;

    /// Assert that a result is a `NotFound` for `resource`.
    #[track_caller]
    pub fn assert_not_found<T: std::fmt::Debug>(result: &RepoResult<T>, resource: Resource) {
        match result {
            Err(RepoError::NotFound { resource: r, .. }) => {
                assert_eq!(*r, resource, "Wrong resource in NotFound error");
            }
            other => panic!("Expected NotFound, got: {:?}", other),
        }
    }

    /// Assert that a result is a rate-limit rejection.
    #[track_caller]
    pub fn assert_rate_limited<T: std::fmt::Debug>(result: &RepoResult<T>) {
        match result {
            Err(RepoError::RateLimitExceeded { .. }) => {}
            other => panic!("Expected RateLimitExceeded, got: {:?}", other),
        }
    }

    /// Assert that a result is a validation failure and return it.
    #[track_caller]
    pub fn assert_validation_error<T: std::fmt::Debug>(
        result: &RepoResult<T>,
    ) -> ValidationError {
        match result {
            Err(RepoError::Validation(e)) => e.clone(),
            other => panic!("Expected Validation error, got: {:?}", other),
        }
    }

    /// Assert that a result failed with the given error code.
    #[track_caller]
    pub fn assert_error_code<T: std::fmt::Debug>(result: &RepoResult<T>, code: &str) {
        match result {
            Err(e) => assert_eq!(e.code(), code, "Unexpected error: {e}"),
            Ok(value) => panic!("Expected error {code}, got Ok({:?})", value),
        }
    }

    /// Assert the last audit event's action and status.
    #[track_caller]
    pub fn assert_last_audit(sink: &MemoryAuditSink, action: &str, status: AuditStatus) {
        let events = sink.events();
        let last = events
            .last()
            .unwrap_or_else(|| panic!("Expected an audit event for {action}, found none"));
        assert_eq!(last.action, action, "Unexpected audited action");
        assert_eq!(last.status, status, "Unexpected audit status for {action}");
    }
}

// ============================================================================
// TESTS
// ============================================================================
