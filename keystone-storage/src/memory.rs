//! In-memory query executor for tests and local development.
//!
//! Interprets [`StatementShape`] against per-table row vectors. Rows are kept
//! in the same JSON form `row_to_json` produces, so mappers see identical
//! input from both executors.

use std::cmp::Ordering as CmpOrdering;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, RwLock};

use async_trait::async_trait;
use keystone_core::{QueryError, Resource, Row, SqlValue};
use serde_json::Value as JsonValue;

use crate::query::{FilterOp, QueryExecutor, QueryResult, SortOrder, Statement, StatementShape};

/// Executor backed by process memory.
#[derive(Debug, Default)]
pub struct InMemoryExecutor {
    tables: RwLock<HashMap<Resource, Vec<Row>>>,
    executed: AtomicU64,
    fail_next: Mutex<Option<QueryError>>,
}

impl InMemoryExecutor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert rows directly, bypassing statements.
    pub fn seed(&self, table: Resource, rows: impl IntoIterator<Item = Row>) {
        if let Ok(mut tables) = self.tables.write() {
            tables.entry(table).or_default().extend(rows);
        }
    }

    /// Snapshot of a table.
    pub fn rows(&self, table: Resource) -> Vec<Row> {
        self.tables
            .read()
            .ok()
            .and_then(|tables| tables.get(&table).cloned())
            .unwrap_or_default()
    }

    /// Number of statements executed so far, failed ones included.
    pub fn executed_count(&self) -> u64 {
        self.executed.load(Ordering::SeqCst)
    }

    /// Make the next statement fail with `error`.
    pub fn fail_next(&self, error: QueryError) {
        if let Ok(mut slot) = self.fail_next.lock() {
            *slot = Some(error);
        }
    }

    /// Remove all rows from every table.
    pub fn clear(&self) {
        if let Ok(mut tables) = self.tables.write() {
            tables.clear();
        }
    }

    fn run(&self, statement: &Statement) -> Result<QueryResult, QueryError> {
        let params = &statement.params;
        match &statement.shape {
            StatementShape::Select {
                table,
                filters,
                order_by,
                paged,
            } => {
                let expected = filters.len() + if *paged { 2 } else { 0 };
                check_arity(params, expected)?;
                let tables = self.read_tables()?;
                let mut rows: Vec<Row> = tables
                    .get(table)
                    .map(|rows| {
                        rows.iter()
                            .filter(|row| matches_filters(row, filters, params))
                            .cloned()
                            .collect()
                    })
                    .unwrap_or_default();
                drop(tables);

                rows.sort_by(|a, b| compare_rows(a, b, order_by));
                if *paged {
                    let limit = param_usize(params, filters.len())?;
                    let offset = param_usize(params, filters.len() + 1)?;
                    rows = rows.into_iter().skip(offset).take(limit).collect();
                }
                Ok(QueryResult::from_rows(rows))
            }
            StatementShape::Count { table, filters } => {
                check_arity(params, filters.len())?;
                let tables = self.read_tables()?;
                let count = tables
                    .get(table)
                    .map(|rows| {
                        rows.iter()
                            .filter(|row| matches_filters(row, filters, params))
                            .count()
                    })
                    .unwrap_or(0);
                let mut row = Row::new();
                row.insert("count".to_string(), JsonValue::from(count as u64));
                Ok(QueryResult::from_rows(vec![row]))
            }
            StatementShape::Insert { table, columns } => {
                check_arity(params, columns.len())?;
                let row: Row = columns
                    .iter()
                    .zip(params)
                    .map(|(column, value)| (column.clone(), value.to_json()))
                    .collect();
                let mut tables = self.write_tables()?;
                let rows = tables.entry(*table).or_default();
                if let Some(id) = row.get("id") {
                    if rows.iter().any(|existing| existing.get("id") == Some(id)) {
                        return Err(QueryError::ConstraintViolation {
                            constraint: format!("{}_pkey", table.table_name()),
                            reason: format!("duplicate key id={id}"),
                        });
                    }
                }
                rows.push(row.clone());
                Ok(QueryResult::from_rows(vec![row]))
            }
            StatementShape::Update { table, columns } => {
                check_arity(params, columns.len() + 1)?;
                let id = params[columns.len()].to_json();
                let mut tables = self.write_tables()?;
                let mut updated = Vec::new();
                if let Some(rows) = tables.get_mut(table) {
                    for row in rows.iter_mut().filter(|row| row.get("id") == Some(&id)) {
                        for (column, value) in columns.iter().zip(params) {
                            row.insert(column.clone(), value.to_json());
                        }
                        updated.push(row.clone());
                    }
                }
                Ok(QueryResult::from_rows(updated))
            }
            StatementShape::Delete { table } => {
                check_arity(params, 1)?;
                let id = params[0].to_json();
                let mut tables = self.write_tables()?;
                let mut removed = Vec::new();
                if let Some(rows) = tables.get_mut(table) {
                    rows.retain(|row| {
                        if row.get("id") == Some(&id) {
                            let mut gone = Row::new();
                            gone.insert("id".to_string(), id.clone());
                            removed.push(gone);
                            false
                        } else {
                            true
                        }
                    });
                }
                Ok(QueryResult::from_rows(removed))
            }
        }
    }

    fn read_tables(
        &self,
    ) -> Result<std::sync::RwLockReadGuard<'_, HashMap<Resource, Vec<Row>>>, QueryError> {
        self.tables.read().map_err(|_| QueryError::Connection {
            reason: "in-memory table lock poisoned".to_string(),
        })
    }

    fn write_tables(
        &self,
    ) -> Result<std::sync::RwLockWriteGuard<'_, HashMap<Resource, Vec<Row>>>, QueryError> {
        self.tables.write().map_err(|_| QueryError::Connection {
            reason: "in-memory table lock poisoned".to_string(),
        })
    }
}

#[async_trait]
impl QueryExecutor for InMemoryExecutor {
    async fn execute(&self, statement: &Statement) -> Result<QueryResult, QueryError> {
        self.executed.fetch_add(1, Ordering::SeqCst);
        let injected = self.fail_next.lock().ok().and_then(|mut slot| slot.take());
        if let Some(error) = injected {
            return Err(error);
        }
        self.run(statement)
    }
}

fn check_arity(params: &[SqlValue], expected: usize) -> Result<(), QueryError> {
    if params.len() != expected {
        return Err(QueryError::Execution {
            reason: format!(
                "statement expects {expected} parameters, got {}",
                params.len()
            ),
        });
    }
    Ok(())
}

fn param_usize(params: &[SqlValue], index: usize) -> Result<usize, QueryError> {
    match params.get(index) {
        Some(SqlValue::Int(n)) if *n >= 0 => Ok(usize::try_from(*n).unwrap_or(usize::MAX)),
        other => Err(QueryError::Execution {
            reason: format!("expected non-negative integer parameter, got {other:?}"),
        }),
    }
}

fn matches_filters(row: &Row, filters: &[(String, FilterOp)], params: &[SqlValue]) -> bool {
    filters.iter().zip(params).all(|((column, op), value)| {
        let actual = row.get(column).unwrap_or(&JsonValue::Null);
        let expected = value.to_json();
        // SQL comparisons with NULL are never true.
        if actual.is_null() || expected.is_null() {
            return false;
        }
        match (op, compare_json(actual, &expected)) {
            (FilterOp::Eq, Some(CmpOrdering::Equal)) => true,
            (FilterOp::Gte, Some(CmpOrdering::Equal | CmpOrdering::Greater)) => true,
            (FilterOp::Lte, Some(CmpOrdering::Equal | CmpOrdering::Less)) => true,
            _ => false,
        }
    })
}

fn compare_rows(a: &Row, b: &Row, order_by: &[(String, SortOrder)]) -> CmpOrdering {
    for (column, order) in order_by {
        let left = a.get(column).unwrap_or(&JsonValue::Null);
        let right = b.get(column).unwrap_or(&JsonValue::Null);
        let ord = compare_json(left, right).unwrap_or(CmpOrdering::Equal);
        let ord = match order {
            SortOrder::Asc => ord,
            SortOrder::Desc => ord.reverse(),
        };
        if ord != CmpOrdering::Equal {
            return ord;
        }
    }
    CmpOrdering::Equal
}

/// Ordering between JSON scalars of the same kind. Timestamps are stored as
/// fixed-width RFC 3339 strings and compare correctly as text.
fn compare_json(a: &JsonValue, b: &JsonValue) -> Option<CmpOrdering> {
    match (a, b) {
        (JsonValue::Null, JsonValue::Null) => Some(CmpOrdering::Equal),
        (JsonValue::Null, _) => Some(CmpOrdering::Less),
        (_, JsonValue::Null) => Some(CmpOrdering::Greater),
        (JsonValue::Bool(x), JsonValue::Bool(y)) => Some(x.cmp(y)),
        (JsonValue::Number(x), JsonValue::Number(y)) => match (x.as_i64(), y.as_i64()) {
            (Some(x), Some(y)) => Some(x.cmp(&y)),
            _ => x.as_f64()?.partial_cmp(&y.as_f64()?),
        },
        (JsonValue::String(x), JsonValue::String(y)) => Some(x.cmp(y)),
        _ => None,
    }
}
