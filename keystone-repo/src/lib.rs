//! Keystone Repo - Protected Data Access
//!
//! Every entity read and write goes through a [`Repository`], which applies
//! identifier allow-lists, input validation, per-actor rate limits, a
//! namespaced cache and an audit trail around a pluggable
//! [`QueryExecutor`](keystone_storage::QueryExecutor). The [`DataLayer`]
//! wires the collaborators together and hands out the concrete repositories.

pub mod audit;
pub mod config;
pub mod db;
pub mod error;
pub mod layer;
pub mod mapper;
pub mod metrics;
pub mod repositories;
pub mod repository;
pub mod telemetry;

pub use audit::{AuditEvent, AuditLog, AuditSink, MemoryAuditSink, TracingAuditSink, WriterAuditSink};
pub use config::LayerConfig;
pub use db::{DbConfig, PgCounterStore, PgExecutor};
pub use error::{LayerError, RepoError, RepoResult};
pub use layer::{DataLayer, DataLayerBuilder};
pub use mapper::{EntityMapper, RowMapper};
pub use metrics::LayerMetrics;
pub use repositories::{
    CustomizationOptionMapper, DevelopmentMapper, DevelopmentRepository, DocumentMapper,
    DocumentRepository, FinanceRecordMapper, FinanceRepository, RoomMapper, SaleMapper,
    SaleRepository, UnitMapper, UnitRepository, UserMapper, UserRepository,
};
pub use repository::{Collaborators, Lookup, Repository};
pub use telemetry::{init_tracing, LogFormat, TelemetryConfig};
