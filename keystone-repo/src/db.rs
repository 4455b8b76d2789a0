//! Postgres adapters.
//!
//! [`PgExecutor`] runs builder statements on a deadpool-postgres pool and
//! returns every row as `row_to_json` output, so mappers see the same
//! [`Row`] shape as with the in-memory executor. [`PgCounterStore`] keeps
//! rate-limit windows in a table shared by every process.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use deadpool_postgres::{
    Config, ManagerConfig, Pool, PoolConfig, PoolError, RecyclingMethod, Runtime,
};
use keystone_core::{CounterStoreError, QueryError, Row, SqlValue};
use keystone_storage::{CounterStore, QueryExecutor, QueryResult, Statement};
use serde_json::Value as JsonValue;
use tokio_postgres::error::SqlState;
use tokio_postgres::types::{ToSql, Type};
use tokio_postgres::NoTls;
use tracing::{debug, error};
use uuid::Uuid;

use crate::error::LayerError;

// ============================================================================
// CONNECTION POOL CONFIGURATION
// ============================================================================

/// Database connection pool configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DbConfig {
    /// PostgreSQL host
    pub host: String,
    /// PostgreSQL port
    pub port: u16,
    /// Database name
    pub dbname: String,
    /// Database user
    pub user: String,
    /// Database password
    pub password: String,
    /// Maximum pool size
    pub max_size: usize,
    /// Per-statement timeout, including waiting for a connection
    pub timeout: Duration,
}

impl Default for DbConfig {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 5432,
            dbname: "keystone".to_string(),
            user: "postgres".to_string(),
            password: String::new(),
            max_size: 16,
            timeout: Duration::from_secs(30),
        }
    }
}

impl DbConfig {
    /// Create a new database configuration from environment variables.
    ///
    /// `KEYSTONE_DB_HOST`, `KEYSTONE_DB_PORT`, `KEYSTONE_DB_NAME`,
    /// `KEYSTONE_DB_USER`, `KEYSTONE_DB_PASSWORD`, `KEYSTONE_DB_POOL_SIZE`,
    /// `KEYSTONE_DB_TIMEOUT` (seconds).
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            host: std::env::var("KEYSTONE_DB_HOST").unwrap_or(defaults.host),
            port: std::env::var("KEYSTONE_DB_PORT")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults.port),
            dbname: std::env::var("KEYSTONE_DB_NAME").unwrap_or(defaults.dbname),
            user: std::env::var("KEYSTONE_DB_USER").unwrap_or(defaults.user),
            password: std::env::var("KEYSTONE_DB_PASSWORD").unwrap_or_default(),
            max_size: std::env::var("KEYSTONE_DB_POOL_SIZE")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults.max_size),
            timeout: std::env::var("KEYSTONE_DB_TIMEOUT")
                .ok()
                .and_then(|s| s.parse().ok())
                .map(Duration::from_secs)
                .unwrap_or(defaults.timeout),
        }
    }

    /// Create a connection pool from this configuration.
    pub fn create_pool(&self) -> Result<Pool, LayerError> {
        let mut cfg = Config::new();
        cfg.host = Some(self.host.clone());
        cfg.port = Some(self.port);
        cfg.dbname = Some(self.dbname.clone());
        cfg.user = Some(self.user.clone());
        cfg.password = Some(self.password.clone());
        cfg.pool = Some(PoolConfig::new(self.max_size));

        cfg.manager = Some(ManagerConfig {
            recycling_method: RecyclingMethod::Fast,
        });

        cfg.create_pool(Some(Runtime::Tokio1), NoTls)
            .map_err(|e| LayerError::Pool {
                reason: format!("Failed to create pool: {e}"),
            })
    }
}

/// Tables read and written by the repositories.
pub const ENTITY_SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS users (
    id TEXT PRIMARY KEY,
    email TEXT NOT NULL UNIQUE,
    full_name TEXT NOT NULL,
    role TEXT NOT NULL,
    phone TEXT,
    company_name TEXT,
    created_at TIMESTAMPTZ NOT NULL,
    updated_at TIMESTAMPTZ NOT NULL
);
CREATE TABLE IF NOT EXISTS developments (
    id TEXT PRIMARY KEY,
    developer_id TEXT NOT NULL,
    name TEXT NOT NULL,
    description TEXT,
    city TEXT NOT NULL,
    address TEXT NOT NULL,
    status TEXT NOT NULL,
    total_units BIGINT NOT NULL,
    completion_date TIMESTAMPTZ,
    created_at TIMESTAMPTZ NOT NULL,
    updated_at TIMESTAMPTZ NOT NULL
);
CREATE TABLE IF NOT EXISTS units (
    id TEXT PRIMARY KEY,
    development_id TEXT NOT NULL,
    unit_number TEXT NOT NULL,
    unit_type TEXT NOT NULL,
    bedrooms BIGINT NOT NULL,
    bathrooms BIGINT NOT NULL,
    floor_area_sqm DOUBLE PRECISION NOT NULL,
    price_cents BIGINT NOT NULL,
    status TEXT NOT NULL,
    created_at TIMESTAMPTZ NOT NULL,
    updated_at TIMESTAMPTZ NOT NULL
);
CREATE TABLE IF NOT EXISTS unit_rooms (
    id TEXT PRIMARY KEY,
    unit_id TEXT NOT NULL,
    name TEXT NOT NULL,
    room_type TEXT NOT NULL,
    area_sqm DOUBLE PRECISION NOT NULL
);
CREATE TABLE IF NOT EXISTS unit_customization_options (
    id TEXT PRIMARY KEY,
    unit_id TEXT NOT NULL,
    category TEXT NOT NULL,
    name TEXT NOT NULL,
    price_delta_cents BIGINT NOT NULL,
    is_default BOOLEAN NOT NULL
);
CREATE TABLE IF NOT EXISTS sales (
    id TEXT PRIMARY KEY,
    unit_id TEXT NOT NULL,
    buyer_id TEXT NOT NULL,
    agreed_price_cents BIGINT NOT NULL,
    status TEXT NOT NULL,
    completed_at TIMESTAMPTZ,
    created_at TIMESTAMPTZ NOT NULL,
    updated_at TIMESTAMPTZ NOT NULL
);
CREATE TABLE IF NOT EXISTS documents (
    id TEXT PRIMARY KEY,
    owner_id TEXT NOT NULL,
    development_id TEXT,
    sale_id TEXT,
    title TEXT NOT NULL,
    kind TEXT NOT NULL,
    storage_key TEXT NOT NULL,
    mime_type TEXT NOT NULL,
    size_bytes BIGINT NOT NULL,
    created_at TIMESTAMPTZ NOT NULL,
    updated_at TIMESTAMPTZ NOT NULL
);
CREATE TABLE IF NOT EXISTS finance_records (
    id TEXT PRIMARY KEY,
    sale_id TEXT NOT NULL,
    buyer_id TEXT NOT NULL,
    record_type TEXT NOT NULL,
    amount_cents BIGINT NOT NULL,
    currency TEXT NOT NULL,
    status TEXT NOT NULL,
    due_date TIMESTAMPTZ,
    paid_at TIMESTAMPTZ,
    created_at TIMESTAMPTZ NOT NULL,
    updated_at TIMESTAMPTZ NOT NULL
);
"#;

/// Rate-limit windows shared across processes.
pub const COUNTER_SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS keystone_rate_limits (
    key TEXT PRIMARY KEY,
    count BIGINT NOT NULL,
    expires_at TIMESTAMPTZ
);
CREATE INDEX IF NOT EXISTS keystone_rate_limits_expires_at_idx
    ON keystone_rate_limits (expires_at);
"#;

async fn get_conn(pool: &Pool) -> Result<deadpool_postgres::Object, PoolError> {
    pool.get().await
}

async fn apply_schema(pool: &Pool, schema: &str) -> Result<(), LayerError> {
    let conn = get_conn(pool).await.map_err(|e| LayerError::Pool {
        reason: e.to_string(),
    })?;
    conn.batch_execute(schema)
        .await
        .map_err(|e| LayerError::Schema {
            reason: e.to_string(),
        })
}

// ============================================================================
// QUERY EXECUTOR
// ============================================================================

/// Executes builder statements on Postgres.
#[derive(Clone)]
pub struct PgExecutor {
    pool: Pool,
    timeout: Duration,
}

impl std::fmt::Debug for PgExecutor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PgExecutor")
            .field("pool_size", &self.pool.status().size)
            .field("timeout", &self.timeout)
            .finish()
    }
}

impl PgExecutor {
    pub fn new(pool: Pool, timeout: Duration) -> Self {
        Self { pool, timeout }
    }

    pub fn from_config(config: &DbConfig) -> Result<Self, LayerError> {
        Ok(Self::new(config.create_pool()?, config.timeout))
    }

    pub fn pool(&self) -> &Pool {
        &self.pool
    }

    /// Create the entity tables if they do not exist.
    pub async fn ensure_schema(&self) -> Result<(), LayerError> {
        apply_schema(&self.pool, ENTITY_SCHEMA).await
    }

    async fn run(&self, statement: &Statement) -> Result<QueryResult, QueryError> {
        let sql = json_wrapped(statement);
        let conn = get_conn(&self.pool).await.map_err(map_pool_error)?;
        let prepared = conn.prepare(&sql).await.map_err(map_db_error)?;

        if prepared.params().len() != statement.params.len() {
            return Err(QueryError::Execution {
                reason: format!(
                    "statement expects {} parameters, got {}",
                    prepared.params().len(),
                    statement.params.len()
                ),
            });
        }
        let bound = prepared
            .params()
            .iter()
            .zip(&statement.params)
            .map(|(ty, value)| bind(value, ty))
            .collect::<Result<Vec<_>, _>>()?;
        let params: Vec<&(dyn ToSql + Sync)> = bound
            .iter()
            .map(|p| p.as_ref() as &(dyn ToSql + Sync))
            .collect();

        let rows = conn.query(&prepared, &params).await.map_err(map_db_error)?;
        let rows = rows
            .iter()
            .map(|row| {
                let json: JsonValue = row
                    .try_get(0)
                    .map_err(|e| QueryError::mapping("row_to_json", e.to_string()))?;
                match json {
                    JsonValue::Object(map) => Ok(map),
                    other => Err(QueryError::mapping(
                        "row_to_json",
                        format!("expected object, got {other}"),
                    )),
                }
            })
            .collect::<Result<Vec<Row>, _>>()?;
        Ok(QueryResult::from_rows(rows))
    }
}

#[async_trait]
impl QueryExecutor for PgExecutor {
    async fn execute(&self, statement: &Statement) -> Result<QueryResult, QueryError> {
        debug!(sql = %statement.sql, params = statement.params.len(), "Executing on Postgres");
        match tokio::time::timeout(self.timeout, self.run(statement)).await {
            Ok(result) => result,
            Err(_) => Err(QueryError::Timeout {
                reason: format!("statement exceeded {}ms", self.timeout.as_millis()),
            }),
        }
    }
}

/// Wrap a statement so each returned row is a single JSON object.
fn json_wrapped(statement: &Statement) -> String {
    let inner = statement.sql.trim_end_matches(';');
    if statement.shape.is_mutation() {
        format!("WITH q AS ({inner}) SELECT row_to_json(q) FROM q")
    } else {
        format!("SELECT row_to_json(q) FROM ({inner}) AS q")
    }
}

type Param = Box<dyn ToSql + Sync + Send>;

fn mismatch(value: &SqlValue, ty: &Type) -> QueryError {
    QueryError::Unsupported {
        reason: format!("cannot bind {} to a {} parameter", value.type_name(), ty.name()),
    }
}

/// Convert a value into the Rust type the prepared statement expects.
fn bind(value: &SqlValue, ty: &Type) -> Result<Param, QueryError> {
    let param: Param = match value {
        SqlValue::Null => return null_of(ty),
        SqlValue::Bool(b) if *ty == Type::BOOL => Box::new(*b),
        SqlValue::Int(i) if *ty == Type::INT8 => Box::new(*i),
        SqlValue::Int(i) if *ty == Type::INT4 => {
            Box::new(i32::try_from(*i).map_err(|_| mismatch(value, ty))?)
        }
        SqlValue::Int(i) if *ty == Type::INT2 => {
            Box::new(i16::try_from(*i).map_err(|_| mismatch(value, ty))?)
        }
        SqlValue::Int(i) if *ty == Type::FLOAT8 => Box::new(*i as f64),
        SqlValue::Float(f) if *ty == Type::FLOAT8 => Box::new(*f),
        SqlValue::Float(f) if *ty == Type::FLOAT4 => Box::new(*f as f32),
        SqlValue::Text(s) if *ty == Type::UUID => {
            Box::new(Uuid::parse_str(s).map_err(|_| mismatch(value, ty))?)
        }
        SqlValue::Text(s)
            if *ty == Type::TEXT || *ty == Type::VARCHAR || *ty == Type::BPCHAR || *ty == Type::NAME =>
        {
            Box::new(s.clone())
        }
        SqlValue::Timestamp(ts) if *ty == Type::TIMESTAMPTZ => Box::new(*ts),
        SqlValue::Timestamp(ts) if *ty == Type::TIMESTAMP => Box::new(ts.naive_utc()),
        SqlValue::Json(v) if *ty == Type::JSONB || *ty == Type::JSON => Box::new(v.clone()),
        _ => return Err(mismatch(value, ty)),
    };
    Ok(param)
}

fn null_of(ty: &Type) -> Result<Param, QueryError> {
    let param: Param = if *ty == Type::BOOL {
        Box::new(None::<bool>)
    } else if *ty == Type::INT8 {
        Box::new(None::<i64>)
    } else if *ty == Type::INT4 {
        Box::new(None::<i32>)
    } else if *ty == Type::INT2 {
        Box::new(None::<i16>)
    } else if *ty == Type::FLOAT8 {
        Box::new(None::<f64>)
    } else if *ty == Type::FLOAT4 {
        Box::new(None::<f32>)
    } else if *ty == Type::UUID {
        Box::new(None::<Uuid>)
    } else if *ty == Type::TIMESTAMPTZ {
        Box::new(None::<DateTime<Utc>>)
    } else if *ty == Type::TIMESTAMP {
        Box::new(None::<chrono::NaiveDateTime>)
    } else if *ty == Type::JSON || *ty == Type::JSONB {
        Box::new(None::<JsonValue>)
    } else {
        Box::new(None::<String>)
    };
    Ok(param)
}

fn map_pool_error(err: PoolError) -> QueryError {
    error!(error = ?err, "Connection pool error");
    match err {
        PoolError::Timeout(_) => QueryError::Timeout {
            reason: "timed out waiting for a connection".to_string(),
        },
        PoolError::Closed => QueryError::Connection {
            reason: "connection pool is closed".to_string(),
        },
        other => QueryError::Connection {
            reason: other.to_string(),
        },
    }
}

fn map_db_error(err: tokio_postgres::Error) -> QueryError {
    if err.is_closed() {
        return QueryError::Connection {
            reason: err.to_string(),
        };
    }
    let Some(db) = err.as_db_error() else {
        return QueryError::Execution {
            reason: err.to_string(),
        };
    };
    let code = db.code();
    if *code == SqlState::UNIQUE_VIOLATION
        || *code == SqlState::FOREIGN_KEY_VIOLATION
        || *code == SqlState::NOT_NULL_VIOLATION
        || *code == SqlState::CHECK_VIOLATION
    {
        QueryError::ConstraintViolation {
            constraint: db.constraint().unwrap_or("unknown").to_string(),
            reason: db.message().to_string(),
        }
    } else if *code == SqlState::QUERY_CANCELED {
        QueryError::Timeout {
            reason: db.message().to_string(),
        }
    } else {
        QueryError::Execution {
            reason: db.message().to_string(),
        }
    }
}

// ============================================================================
// COUNTER STORE
// ============================================================================

/// Rate-limit counters in `keystone_rate_limits`.
///
/// `incr` is a single upsert, so concurrent increments from any number of
/// processes never lose an update. Expiry uses the database clock.
#[derive(Clone)]
pub struct PgCounterStore {
    pool: Pool,
}

impl std::fmt::Debug for PgCounterStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PgCounterStore").finish_non_exhaustive()
    }
}

impl PgCounterStore {
    pub fn new(pool: Pool) -> Self {
        Self { pool }
    }

    pub async fn ensure_schema(&self) -> Result<(), LayerError> {
        apply_schema(&self.pool, COUNTER_SCHEMA).await
    }

    /// Delete windows whose expiry has passed.
    pub async fn purge_expired(&self) -> Result<u64, CounterStoreError> {
        let conn = self.conn().await?;
        conn.execute(
            "DELETE FROM keystone_rate_limits WHERE expires_at IS NOT NULL AND expires_at <= now()",
            &[],
        )
        .await
        .map_err(store_error)
    }

    async fn conn(&self) -> Result<deadpool_postgres::Object, CounterStoreError> {
        get_conn(&self.pool).await.map_err(|e| match e {
            PoolError::Timeout(_) => CounterStoreError::Timeout {
                reason: e.to_string(),
            },
            other => CounterStoreError::Unavailable {
                reason: other.to_string(),
            },
        })
    }
}

fn store_error(err: tokio_postgres::Error) -> CounterStoreError {
    CounterStoreError::Unavailable {
        reason: err.to_string(),
    }
}

const INCR_SQL: &str = "\
INSERT INTO keystone_rate_limits AS r (key, count, expires_at) VALUES ($1, 1, NULL) \
ON CONFLICT (key) DO UPDATE SET \
count = CASE WHEN r.expires_at IS NOT NULL AND r.expires_at <= now() THEN 1 ELSE r.count + 1 END, \
expires_at = CASE WHEN r.expires_at IS NOT NULL AND r.expires_at <= now() THEN NULL ELSE r.expires_at END \
RETURNING count";

const EXPIRE_SQL: &str = "\
UPDATE keystone_rate_limits \
SET expires_at = now() + make_interval(secs => $2::float8 / 1000.0) \
WHERE key = $1 AND (expires_at IS NULL OR expires_at > now())";

const KEYS_SQL: &str = "\
SELECT key FROM keystone_rate_limits \
WHERE key LIKE $1 ESCAPE '\\' AND (expires_at IS NULL OR expires_at > now())";

#[async_trait]
impl CounterStore for PgCounterStore {
    async fn incr(&self, key: &str) -> Result<i64, CounterStoreError> {
        let conn = self.conn().await?;
        let row = conn.query_one(INCR_SQL, &[&key]).await.map_err(store_error)?;
        row.try_get(0).map_err(store_error)
    }

    async fn expire(&self, key: &str, ttl: Duration) -> Result<bool, CounterStoreError> {
        let conn = self.conn().await?;
        let ttl_ms = ttl.as_millis() as f64;
        let updated = conn
            .execute(EXPIRE_SQL, &[&key, &ttl_ms])
            .await
            .map_err(store_error)?;
        Ok(updated > 0)
    }

    async fn keys(&self, pattern: &str) -> Result<Vec<String>, CounterStoreError> {
        let like = glob_to_like(pattern)?;
        let conn = self.conn().await?;
        let rows = conn.query(KEYS_SQL, &[&like]).await.map_err(store_error)?;
        rows.iter()
            .map(|row| row.try_get::<_, String>(0).map_err(store_error))
            .collect()
    }

    async fn del(&self, keys: &[String]) -> Result<u64, CounterStoreError> {
        if keys.is_empty() {
            return Ok(0);
        }
        let conn = self.conn().await?;
        let keys = keys.to_vec();
        conn.execute("DELETE FROM keystone_rate_limits WHERE key = ANY($1)", &[&keys])
            .await
            .map_err(store_error)
    }
}

/// Translate a glob (`*`, `?`, `\` escapes) into a LIKE pattern with `\`
/// as the escape character.
pub fn glob_to_like(pattern: &str) -> Result<String, CounterStoreError> {
    let invalid = || CounterStoreError::InvalidPattern {
        pattern: pattern.to_string(),
    };
    if pattern.is_empty() {
        return Err(invalid());
    }
    let mut like = String::with_capacity(pattern.len() + 8);
    let mut chars = pattern.chars();
    while let Some(c) = chars.next() {
        match c {
            '*' => like.push('%'),
            '?' => like.push('_'),
            '\\' => {
                let escaped = chars.next().ok_or_else(invalid)?;
                push_literal(&mut like, escaped);
            }
            other => push_literal(&mut like, other),
        }
    }
    Ok(like)
}

fn push_literal(like: &mut String, c: char) {
    if matches!(c, '%' | '_' | '\\') {
        like.push('\\');
    }
    like.push(c);
}
