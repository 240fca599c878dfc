//! The batch query builder.
//!
//! [`BatchQuery`] renders the two statements pgbatch runs, both driven by a
//! single `$1` parameter holding a JSON array of row objects:
//!
//! - **upsert**: unpack the array into typed rows, `INSERT ... ON CONFLICT
//!   (unique columns) DO UPDATE`, then join the written rows back onto the
//!   unpacked input so the output has one row per input row, in input order.
//! - **select**: unpack the unique columns only and `LEFT JOIN` the table on
//!   them, again one output row per input row, in input order.
//!
//! The N-th value of every output row corresponds to the N-th entry of
//! [`BatchQuery::returning_columns`], for both statements and for every
//! [`Returning`] variant. Each returned cell is serialized by the server with
//! `to_jsonb`, so every column type comes back as a JSON value.
//!
//! Rows sharing a key are written once (the last one wins). A row with a NULL
//! key part never conflicts, so it is written on its own and gets nulls back.
//!
//! Building and rendering are pure; nothing here touches a connection.
//!
//! # Example
//!
//! ```ignore
//! use pgbatch::{BatchQuery, QueryParts, Returning};
//!
//! let query = BatchQuery::new(QueryParts {
//!     table: "test_items".into(),
//!     primary_key: "id".into(),
//!     input_columns: vec!["unique_field".into(), "data".into()],
//!     column_types: schema.column_types()?,
//!     unique_columns: vec!["unique_field".into()],
//!     now_on_insert: vec!["created_at".into(), "updated_at".into()],
//!     now_on_update: vec!["updated_at".into()],
//!     returning: Returning::from("id"),
//! })?;
//!
//! let sql = query.upsert_sql();
//! ```

use crate::error::{BatchError, BatchResult};
use crate::ident::Ident;
use crate::returning::Returning;
use crate::schema::{ColumnTypes, SqlType};

/// Name of the CTE holding the unpacked JSON rows.
pub const INPUT_CTE: &str = "batch_input";
/// Name of the ordinality column added to the unpacked rows.
pub const ORDINAL_COLUMN: &str = "batch_ordinal";

const ROWS_ALIAS: &str = "batch_rows";
const UPSERTED_CTE: &str = "upserted";
const SELECTED_ALIAS: &str = "selected";
const NOW: &str = "CURRENT_TIMESTAMP";

/// Everything needed to build a [`BatchQuery`].
#[derive(Debug, Clone, Default)]
pub struct QueryParts {
    /// Target table, optionally schema qualified.
    pub table: String,
    /// Primary key column.
    pub primary_key: String,
    /// Keys of the batch rows (taken from the first row).
    pub input_columns: Vec<String>,
    /// Every table column with its SQL type, in natural order.
    pub column_types: ColumnTypes,
    /// Conflict target for upsert, join key for select.
    pub unique_columns: Vec<String>,
    /// Columns set to the current time when a row is inserted.
    pub now_on_insert: Vec<String>,
    /// Columns set to the current time when a conflicting row is updated.
    pub now_on_update: Vec<String>,
    /// Requested projection.
    pub returning: Returning,
}

#[derive(Debug, Clone)]
struct Column {
    name: String,
    ident: Ident,
    sql_type: SqlType,
}

/// A validated, immutable batch statement pair.
#[derive(Debug, Clone)]
pub struct BatchQuery {
    table: Ident,
    primary_key: String,
    input: Vec<Column>,
    unique: Vec<Column>,
    now_on_insert: Vec<(String, Ident)>,
    now_on_update: Vec<(String, Ident)>,
    returning: Returning,
    returning_columns: Vec<String>,
    returning_idents: Vec<Ident>,
}

impl BatchQuery {
    /// Validate the parts and freeze them.
    ///
    /// Fails with:
    /// - [`BatchError::Validation`] for malformed identifiers or SQL types,
    /// - [`BatchError::InvalidInput`] for an empty input or unique column set,
    ///   or a unique column that is not an input column,
    /// - [`BatchError::UnknownColumn`] for any column missing from `column_types`.
    pub fn new(parts: QueryParts) -> BatchResult<Self> {
        let QueryParts {
            table,
            primary_key,
            input_columns,
            column_types,
            unique_columns,
            now_on_insert,
            now_on_update,
            returning,
        } = parts;

        let table_ident = Ident::parse(&table)?;

        if input_columns.is_empty() {
            return Err(BatchError::invalid_input(
                "batch has no input columns to build a query from",
            ));
        }
        if unique_columns.is_empty() {
            return Err(BatchError::invalid_input("unique_by must name at least one column"));
        }

        let lookup = |name: &str| -> BatchResult<Column> {
            let sql_type = column_types
                .get(name)
                .ok_or_else(|| BatchError::unknown_column(&table, name))?;
            Ok(Column {
                name: name.to_string(),
                ident: Ident::column(name)?,
                sql_type: sql_type.clone(),
            })
        };

        let input = input_columns
            .iter()
            .map(|name| {
                if name == ORDINAL_COLUMN {
                    return Err(BatchError::invalid_input(format!(
                        "input column name {ORDINAL_COLUMN:?} is reserved"
                    )));
                }
                lookup(name)
            })
            .collect::<BatchResult<Vec<_>>>()?;

        let mut unique: Vec<Column> = Vec::with_capacity(unique_columns.len());
        for name in &unique_columns {
            if unique.iter().any(|c| &c.name == name) {
                continue;
            }
            if !input_columns.contains(name) {
                return Err(BatchError::invalid_input(format!(
                    "unique_by column {name:?} is not among the input columns {input_columns:?}"
                )));
            }
            unique.push(lookup(name)?);
        }

        let stamp = |names: Vec<String>| -> BatchResult<Vec<(String, Ident)>> {
            names
                .into_iter()
                .map(|name| {
                    if !column_types.contains(&name) {
                        return Err(BatchError::unknown_column(&table, name));
                    }
                    let ident = Ident::column(&name)?;
                    Ok((name, ident))
                })
                .collect()
        };
        let now_on_insert = stamp(now_on_insert)?;
        let now_on_update = stamp(now_on_update)?;

        let returning = match returning {
            Returning::Columns(columns) if columns.is_empty() => Returning::None,
            other => other,
        };
        let returning_columns: Vec<String> = match &returning {
            Returning::None => Vec::new(),
            Returning::Scalar(column) => vec![column.clone()],
            Returning::Columns(columns) => columns.clone(),
            Returning::All => column_types.names().map(str::to_string).collect(),
        };
        let returning_idents = returning_columns
            .iter()
            .map(|name| {
                if !column_types.contains(name) {
                    return Err(BatchError::unknown_column(&table, name));
                }
                Ident::column(name)
            })
            .collect::<BatchResult<Vec<_>>>()?;

        tracing::trace!(
            target: "pgbatch.query",
            table = %table_ident,
            input_columns = input.len(),
            unique_columns = unique.len(),
            returning = returning_columns.len(),
            "built batch query"
        );

        Ok(Self {
            table: table_ident,
            primary_key,
            input,
            unique,
            now_on_insert,
            now_on_update,
            returning,
            returning_columns,
            returning_idents,
        })
    }

    /// The target table.
    pub fn table(&self) -> &Ident {
        &self.table
    }

    pub fn primary_key(&self) -> &str {
        &self.primary_key
    }

    pub fn returning(&self) -> &Returning {
        &self.returning
    }

    /// Column names the output rows hold, positionally.
    pub fn returning_columns(&self) -> &[String] {
        &self.returning_columns
    }

    pub fn input_columns(&self) -> impl Iterator<Item = &str> {
        self.input.iter().map(|c| c.name.as_str())
    }

    pub fn unique_columns(&self) -> impl Iterator<Item = &str> {
        self.unique.iter().map(|c| c.name.as_str())
    }

    /// Render the insert-or-update statement.
    pub fn upsert_sql(&self) -> String {
        let mut sql = String::with_capacity(512);
        write_input_cte(&mut sql, &self.input);

        let insert_columns: Vec<&Column> = self
            .input
            .iter()
            .filter(|c| !self.stamped_on_insert(&c.name))
            .collect();

        let returns = !self.returning_idents.is_empty();
        if returns {
            sql.push_str(", ");
            sql.push_str(UPSERTED_CTE);
            sql.push_str(" AS (");
        } else {
            sql.push(' ');
        }

        sql.push_str("INSERT INTO ");
        self.table.write_sql(&mut sql);
        sql.push_str(" (");
        let mut first = true;
        for ident in insert_columns
            .iter()
            .map(|c| &c.ident)
            .chain(self.now_on_insert.iter().map(|(_, ident)| ident))
        {
            if !first {
                sql.push_str(", ");
            }
            first = false;
            ident.write_sql(&mut sql);
        }

        sql.push_str(") SELECT DISTINCT ON (");
        self.write_distinct_key(&mut sql);
        sql.push_str(") ");
        let mut first = true;
        for column in &insert_columns {
            if !first {
                sql.push_str(", ");
            }
            first = false;
            column.ident.write_sql(&mut sql);
        }
        for _ in &self.now_on_insert {
            if !first {
                sql.push_str(", ");
            }
            first = false;
            sql.push_str(NOW);
        }

        sql.push_str(" FROM ");
        sql.push_str(INPUT_CTE);
        sql.push_str(" ORDER BY ");
        self.write_distinct_key(&mut sql);
        sql.push_str(", ");
        sql.push_str(ORDINAL_COLUMN);
        sql.push_str(" DESC ON CONFLICT (");
        write_idents(&mut sql, self.unique.iter().map(|c| &c.ident));
        sql.push_str(") DO UPDATE SET ");
        self.write_conflict_assignments(&mut sql);

        if returns {
            sql.push_str(" RETURNING *) SELECT ");
            write_json_projection(&mut sql, UPSERTED_CTE, &self.returning_idents);
            sql.push_str(" FROM ");
            sql.push_str(INPUT_CTE);
            sql.push_str(" LEFT JOIN ");
            sql.push_str(UPSERTED_CTE);
            sql.push_str(" ON ");
            self.write_join_predicate(&mut sql, UPSERTED_CTE);
            write_order_by_ordinal(&mut sql);
        }

        sql
    }

    /// Render the lookup statement.
    ///
    /// Fails with [`BatchError::InvalidInput`] when nothing is to be returned.
    pub fn select_sql(&self) -> BatchResult<String> {
        if self.returning_idents.is_empty() {
            return Err(BatchError::invalid_input(
                "select requires a returning column, column list or \"*\"",
            ));
        }

        let mut sql = String::with_capacity(384);
        write_input_cte(&mut sql, &self.unique);
        sql.push_str(" SELECT ");
        write_json_projection(&mut sql, SELECTED_ALIAS, &self.returning_idents);
        sql.push_str(" FROM ");
        sql.push_str(INPUT_CTE);
        sql.push_str(" LEFT JOIN ");
        self.table.write_sql(&mut sql);
        sql.push_str(" AS ");
        sql.push_str(SELECTED_ALIAS);
        sql.push_str(" ON ");
        self.write_join_predicate(&mut sql, SELECTED_ALIAS);
        write_order_by_ordinal(&mut sql);
        Ok(sql)
    }

    fn write_conflict_assignments(&self, sql: &mut String) {
        let mut first = true;
        let mut sep = |sql: &mut String| {
            if !first {
                sql.push_str(", ");
            }
            first = false;
        };

        for column in &self.input {
            let untouched = self.unique.iter().any(|u| u.name == column.name)
                || self.stamped_on_insert(&column.name)
                || self.now_on_update.iter().any(|(name, _)| name == &column.name);
            if untouched {
                continue;
            }
            sep(sql);
            column.ident.write_sql(sql);
            sql.push_str(" = EXCLUDED.");
            column.ident.write_sql(sql);
        }

        for (_, ident) in &self.now_on_update {
            sep(sql);
            ident.write_sql(sql);
            sql.push_str(" = ");
            sql.push_str(NOW);
        }

        if first {
            // Nothing to overwrite: reassign the key to itself so RETURNING
            // still yields the existing row.
            let key = &self.unique[0].ident;
            key.write_sql(sql);
            sql.push_str(" = EXCLUDED.");
            key.write_sql(sql);
        }
    }

    /// `DISTINCT ON` key: the unique columns, plus the ordinal for rows with a
    /// NULL key part. NULL keys never conflict, so those rows must not collapse.
    fn write_distinct_key(&self, sql: &mut String) {
        write_idents(sql, self.unique.iter().map(|c| &c.ident));
        sql.push_str(", CASE WHEN ");
        for (i, column) in self.unique.iter().enumerate() {
            if i > 0 {
                sql.push_str(" OR ");
            }
            column.ident.write_sql(sql);
            sql.push_str(" IS NULL");
        }
        sql.push_str(" THEN ");
        sql.push_str(ORDINAL_COLUMN);
        sql.push_str(" END");
    }

    fn stamped_on_insert(&self, column: &str) -> bool {
        self.now_on_insert.iter().any(|(name, _)| name == column)
    }

    fn write_join_predicate(&self, sql: &mut String, target: &str) {
        for (i, column) in self.unique.iter().enumerate() {
            if i > 0 {
                sql.push_str(" AND ");
            }
            sql.push_str(target);
            sql.push('.');
            column.ident.write_sql(sql);
            sql.push_str(" = ");
            sql.push_str(INPUT_CTE);
            sql.push('.');
            column.ident.write_sql(sql);
        }
    }
}

/// `WITH batch_input AS (...)` unpacking `$1` into typed rows plus their ordinal.
fn write_input_cte(sql: &mut String, columns: &[Column]) {
    sql.push_str("WITH ");
    sql.push_str(INPUT_CTE);
    sql.push_str(" AS (SELECT ");
    write_idents(sql, columns.iter().map(|c| &c.ident));
    sql.push_str(", ");
    sql.push_str(ORDINAL_COLUMN);
    sql.push_str(" FROM ROWS FROM (jsonb_to_recordset($1::jsonb) AS (");
    for (i, column) in columns.iter().enumerate() {
        if i > 0 {
            sql.push_str(", ");
        }
        column.ident.write_sql(sql);
        sql.push(' ');
        sql.push_str(column.sql_type.as_str());
    }
    sql.push_str(")) WITH ORDINALITY AS ");
    sql.push_str(ROWS_ALIAS);
    sql.push('(');
    write_idents(sql, columns.iter().map(|c| &c.ident));
    sql.push_str(", ");
    sql.push_str(ORDINAL_COLUMN);
    sql.push_str("))");
}

fn write_order_by_ordinal(sql: &mut String) {
    sql.push_str(" ORDER BY ");
    sql.push_str(INPUT_CTE);
    sql.push('.');
    sql.push_str(ORDINAL_COLUMN);
}

/// `to_jsonb(source."c") AS "c", ...`: the server serializes every returned
/// cell, whatever its column type.
fn write_json_projection(sql: &mut String, source: &str, idents: &[Ident]) {
    for (i, ident) in idents.iter().enumerate() {
        if i > 0 {
            sql.push_str(", ");
        }
        sql.push_str("to_jsonb(");
        sql.push_str(source);
        sql.push('.');
        ident.write_sql(sql);
        sql.push_str(") AS ");
        ident.write_sql(sql);
    }
}

fn write_idents<'a>(sql: &mut String, idents: impl Iterator<Item = &'a Ident>) {
    for (i, ident) in idents.enumerate() {
        if i > 0 {
            sql.push_str(", ");
        }
        ident.write_sql(sql);
    }
}
