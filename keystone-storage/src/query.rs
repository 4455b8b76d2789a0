//! Statements, the query builder and the executor seam.
//!
//! A [`Statement`] carries normalized SQL text, positional parameters and a
//! [`StatementShape`]. Postgres runs the SQL; executors that do not parse SQL
//! (the in-memory one) interpret the shape. Both describe the same query and
//! are produced together by [`QueryBuilder`], so they cannot drift apart.

use async_trait::async_trait;
use keystone_core::{
    sanitize_identifier, sanitize_query_text, sanitize_value, Pagination, QueryError, Resource,
    Row, SanitizeError, SqlValue,
};

/// Column name and value pairs written by an insert or update.
pub type Record = Vec<(&'static str, SqlValue)>;

// ============================================================================
// SHAPE
// ============================================================================

/// Comparison applied by a filter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterOp {
    Eq,
    Gte,
    Lte,
}

impl FilterOp {
    fn sql(&self) -> &'static str {
        match self {
            FilterOp::Eq => "=",
            FilterOp::Gte => ">=",
            FilterOp::Lte => "<=",
        }
    }
}

/// A `WHERE` condition. The compared value travels as a parameter.
#[derive(Debug, Clone, PartialEq)]
pub struct Filter {
    pub column: &'static str,
    pub op: FilterOp,
    pub value: SqlValue,
}

impl Filter {
    pub fn eq(column: &'static str, value: impl Into<SqlValue>) -> Self {
        Self {
            column,
            op: FilterOp::Eq,
            value: value.into(),
        }
    }

    pub fn gte(column: &'static str, value: impl Into<SqlValue>) -> Self {
        Self {
            column,
            op: FilterOp::Gte,
            value: value.into(),
        }
    }

    pub fn lte(column: &'static str, value: impl Into<SqlValue>) -> Self {
        Self {
            column,
            op: FilterOp::Lte,
            value: value.into(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortOrder {
    Asc,
    Desc,
}

/// Structured description of a statement.
///
/// Parameter layout: filter values in order, then `LIMIT` and `OFFSET` when
/// `paged`; for inserts the column values; for updates the set values and
/// then the id; for deletes the id alone.
#[derive(Debug, Clone, PartialEq)]
pub enum StatementShape {
    Select {
        table: Resource,
        filters: Vec<(String, FilterOp)>,
        order_by: Vec<(String, SortOrder)>,
        paged: bool,
    },
    Count {
        table: Resource,
        filters: Vec<(String, FilterOp)>,
    },
    Insert {
        table: Resource,
        columns: Vec<String>,
    },
    Update {
        table: Resource,
        columns: Vec<String>,
    },
    Delete {
        table: Resource,
    },
}

impl StatementShape {
    pub fn table(&self) -> Resource {
        match self {
            StatementShape::Select { table, .. }
            | StatementShape::Count { table, .. }
            | StatementShape::Insert { table, .. }
            | StatementShape::Update { table, .. }
            | StatementShape::Delete { table } => *table,
        }
    }

    pub fn is_mutation(&self) -> bool {
        matches!(
            self,
            StatementShape::Insert { .. } | StatementShape::Update { .. } | StatementShape::Delete { .. }
        )
    }
}

/// A ready-to-run statement.
#[derive(Debug, Clone, PartialEq)]
pub struct Statement {
    pub sql: String,
    pub params: Vec<SqlValue>,
    pub shape: StatementShape,
}

impl Statement {
    /// Render the statement with literals inlined, for logs and diagnostics.
    ///
    /// Never executed: values are always bound as parameters.
    pub fn render(&self) -> Result<String, SanitizeError> {
        let literals = self
            .params
            .iter()
            .map(sanitize_value)
            .collect::<Result<Vec<_>, _>>()?;

        // Single pass over the SQL, so inlined literals are never rescanned.
        let mut text = String::with_capacity(self.sql.len());
        let mut rest = self.sql.as_str();
        while let Some(at) = rest.find('$') {
            text.push_str(&rest[..at]);
            let after = &rest[at + 1..];
            let digits = after.bytes().take_while(u8::is_ascii_digit).count();
            let literal = after[..digits]
                .parse::<usize>()
                .ok()
                .and_then(|n| n.checked_sub(1))
                .and_then(|index| literals.get(index));
            match literal {
                Some(literal) => text.push_str(literal),
                None => text.push_str(&rest[at..=at + digits]),
            }
            rest = &after[digits..];
        }
        text.push_str(rest);
        Ok(text)
    }
}

// ============================================================================
// BUILDER
// ============================================================================

/// Builds statements for one table, checking every name it interpolates.
#[derive(Debug, Clone)]
pub struct QueryBuilder {
    table: Resource,
    table_name: String,
    columns: &'static [&'static str],
    order_by: &'static [(&'static str, SortOrder)],
}

impl QueryBuilder {
    /// Create a builder for `table` restricted to `columns`.
    pub fn new(
        table: Resource,
        columns: &'static [&'static str],
        order_by: &'static [(&'static str, SortOrder)],
    ) -> Result<Self, SanitizeError> {
        let table_name = sanitize_identifier(table.table_name())?;
        let builder = Self {
            table,
            table_name,
            columns,
            order_by,
        };
        for (column, _) in order_by {
            builder.column(column)?;
        }
        Ok(builder)
    }

    pub fn table(&self) -> Resource {
        self.table
    }

    /// Resolve a column against the allow-list and the identifier sanitizer.
    pub fn column(&self, name: &str) -> Result<String, SanitizeError> {
        if !self.columns.contains(&name) {
            return Err(SanitizeError::InvalidIdentifier {
                identifier: name.to_string(),
                reason: format!("is not a column of {}", self.table_name),
            });
        }
        sanitize_identifier(name)
    }

    fn where_clause(
        &self,
        filters: &[Filter],
        sql: &mut String,
        params: &mut Vec<SqlValue>,
    ) -> Result<Vec<(String, FilterOp)>, SanitizeError> {
        let mut shape = Vec::with_capacity(filters.len());
        for (i, filter) in filters.iter().enumerate() {
            let column = self.column(filter.column)?;
            sql.push_str(if i == 0 { " WHERE " } else { " AND " });
            params.push(filter.value.clone());
            sql.push_str(&format!("{column} {} ${}", filter.op.sql(), params.len()));
            shape.push((column, filter.op));
        }
        Ok(shape)
    }

    /// `SELECT *` with filters, the default ordering and optional paging.
    pub fn select(
        &self,
        filters: &[Filter],
        page: Option<Pagination>,
    ) -> Result<Statement, SanitizeError> {
        let mut sql = format!("SELECT * FROM {}", self.table_name);
        let mut params = Vec::new();
        let filter_shape = self.where_clause(filters, &mut sql, &mut params)?;

        let mut order_by = Vec::with_capacity(self.order_by.len());
        for (i, (column, order)) in self.order_by.iter().enumerate() {
            let column = self.column(column)?;
            sql.push_str(if i == 0 { " ORDER BY " } else { ", " });
            sql.push_str(&column);
            sql.push_str(match order {
                SortOrder::Asc => " ASC",
                SortOrder::Desc => " DESC",
            });
            order_by.push((column, *order));
        }

        if let Some(page) = page {
            params.push(SqlValue::Int(i64::from(page.limit)));
            let limit_at = params.len();
            params.push(SqlValue::Int(i64::try_from(page.offset()).unwrap_or(i64::MAX)));
            sql.push_str(&format!(" LIMIT ${limit_at} OFFSET ${}", params.len()));
        }

        Ok(Statement {
            sql: sanitize_query_text(&sql),
            params,
            shape: StatementShape::Select {
                table: self.table,
                filters: filter_shape,
                order_by,
                paged: page.is_some(),
            },
        })
    }

    /// Single row by primary key.
    pub fn select_by_id(&self, id: &str) -> Result<Statement, SanitizeError> {
        self.select(&[Filter::eq("id", id)], None)
    }

    /// `SELECT COUNT(*) AS count` with filters.
    pub fn count(&self, filters: &[Filter]) -> Result<Statement, SanitizeError> {
        let mut sql = format!("SELECT COUNT(*) AS count FROM {}", self.table_name);
        let mut params = Vec::new();
        let filter_shape = self.where_clause(filters, &mut sql, &mut params)?;
        Ok(Statement {
            sql: sanitize_query_text(&sql),
            params,
            shape: StatementShape::Count {
                table: self.table,
                filters: filter_shape,
            },
        })
    }

    /// `INSERT ... RETURNING *`.
    pub fn insert(&self, record: Record) -> Result<Statement, SanitizeError> {
        if record.is_empty() {
            return Err(SanitizeError::InvalidIdentifier {
                identifier: self.table_name.clone(),
                reason: "insert without columns".to_string(),
            });
        }
        let mut columns = Vec::with_capacity(record.len());
        let mut params = Vec::with_capacity(record.len());
        for (column, value) in record {
            columns.push(self.column(column)?);
            params.push(value);
        }
        let placeholders: Vec<String> = (1..=params.len()).map(|i| format!("${i}")).collect();
        let sql = format!(
            "INSERT INTO {} ({}) VALUES ({}) RETURNING *",
            self.table_name,
            columns.join(", "),
            placeholders.join(", ")
        );
        Ok(Statement {
            sql: sanitize_query_text(&sql),
            params,
            shape: StatementShape::Insert {
                table: self.table,
                columns,
            },
        })
    }

    /// `UPDATE ... WHERE id = $n RETURNING *`.
    pub fn update(&self, id: &str, record: Record) -> Result<Statement, SanitizeError> {
        if record.is_empty() {
            return Err(SanitizeError::InvalidIdentifier {
                identifier: self.table_name.clone(),
                reason: "update without columns".to_string(),
            });
        }
        let mut columns = Vec::with_capacity(record.len());
        let mut params = Vec::with_capacity(record.len() + 1);
        let mut assignments = Vec::with_capacity(record.len());
        for (column, value) in record {
            let column = self.column(column)?;
            params.push(value);
            assignments.push(format!("{column} = ${}", params.len()));
            columns.push(column);
        }
        params.push(SqlValue::from(id));
        let sql = format!(
            "UPDATE {} SET {} WHERE id = ${} RETURNING *",
            self.table_name,
            assignments.join(", "),
            params.len()
        );
        Ok(Statement {
            sql: sanitize_query_text(&sql),
            params,
            shape: StatementShape::Update {
                table: self.table,
                columns,
            },
        })
    }

    /// `DELETE ... WHERE id = $1 RETURNING id`.
    pub fn delete(&self, id: &str) -> Result<Statement, SanitizeError> {
        let sql = format!("DELETE FROM {} WHERE id = $1 RETURNING id", self.table_name);
        Ok(Statement {
            sql: sanitize_query_text(&sql),
            params: vec![SqlValue::from(id)],
            shape: StatementShape::Delete { table: self.table },
        })
    }
}

// ============================================================================
// EXECUTOR
// ============================================================================

/// Rows produced by a statement.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct QueryResult {
    pub rows: Vec<Row>,
    pub row_count: u64,
}

impl QueryResult {
    pub fn from_rows(rows: Vec<Row>) -> Self {
        let row_count = rows.len() as u64;
        Self { rows, row_count }
    }
}

/// Runs statements against the backing store.
#[async_trait]
pub trait QueryExecutor: Send + Sync {
    async fn execute(&self, statement: &Statement) -> Result<QueryResult, QueryError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    const COLUMNS: &[&str] = &["id", "development_id", "price_cents", "status", "created_at"];
    const ORDER: &[(&str, SortOrder)] = &[("created_at", SortOrder::Desc), ("id", SortOrder::Asc)];

    fn units() -> QueryBuilder {
        match QueryBuilder::new(Resource::Units, COLUMNS, ORDER) {
            Ok(builder) => builder,
            Err(e) => panic!("builder: {e}"),
        }
    }

    #[test]
    fn test_select_with_filters_and_paging() {
        let stmt = units()
            .select(
                &[
                    Filter::eq("development_id", "dev-1"),
                    Filter::gte("price_cents", 100_i64),
                ],
                Some(Pagination::new(2, 10)),
            )
            .unwrap_or_else(|e| panic!("{e}"));
        assert_eq!(
            stmt.sql,
            "SELECT * FROM units WHERE development_id = $1 AND price_cents >= $2 \
             ORDER BY created_at DESC, id ASC LIMIT $3 OFFSET $4;"
        );
        assert_eq!(
            stmt.params,
            vec![
                SqlValue::from("dev-1"),
                SqlValue::Int(100),
                SqlValue::Int(10),
                SqlValue::Int(10)
            ]
        );
        assert!(matches!(stmt.shape, StatementShape::Select { paged: true, .. }));
    }

    #[test]
    fn test_unknown_column_is_rejected() {
        let err = units().select(&[Filter::eq("password", "x")], None);
        assert!(matches!(err, Err(SanitizeError::InvalidIdentifier { .. })));
    }

    #[test]
    fn test_update_binds_id_last() {
        let stmt = units()
            .update("unit-1", vec![("status", SqlValue::from("sold"))])
            .unwrap_or_else(|e| panic!("{e}"));
        assert_eq!(stmt.sql, "UPDATE units SET status = $1 WHERE id = $2 RETURNING *;");
        assert_eq!(stmt.params[1], SqlValue::from("unit-1"));
    }

    #[test]
    fn test_insert_and_delete_text() {
        let stmt = units()
            .insert(vec![("id", SqlValue::from("u-1")), ("status", SqlValue::from("available"))])
            .unwrap_or_else(|e| panic!("{e}"));
        assert_eq!(
            stmt.sql,
            "INSERT INTO units (id, status) VALUES ($1, $2) RETURNING *;"
        );
        assert!(stmt.shape.is_mutation());

        let stmt = units().delete("u-1").unwrap_or_else(|e| panic!("{e}"));
        assert_eq!(stmt.sql, "DELETE FROM units WHERE id = $1 RETURNING id;");
        assert!(units().insert(Vec::new()).is_err());
    }

    #[test]
    fn test_render_inlines_escaped_literals() {
        let stmt = units()
            .select(&[Filter::eq("status", "o'hara")], None)
            .unwrap_or_else(|e| panic!("{e}"));
        let rendered = stmt.render().unwrap_or_default();
        assert!(rendered.contains("status = 'o\\'hara'"));
    }

    #[test]
    fn test_render_does_not_rescan_inlined_literals() {
        let stmt = units()
            .insert(vec![("id", SqlValue::from("u-1")), ("status", SqlValue::from("$1"))])
            .unwrap_or_else(|e| panic!("{e}"));
        assert_eq!(
            stmt.render().as_deref(),
            Ok("INSERT INTO units (id, status) VALUES ('u-1', '$1') RETURNING *;")
        );
    }

    #[test]
    fn test_count_statement() {
        let stmt = units()
            .count(&[Filter::eq("development_id", "dev-1")])
            .unwrap_or_else(|e| panic!("{e}"));
        assert_eq!(
            stmt.sql,
            "SELECT COUNT(*) AS count FROM units WHERE development_id = $1;"
        );
        assert_eq!(stmt.shape.table(), Resource::Units);
    }
}
