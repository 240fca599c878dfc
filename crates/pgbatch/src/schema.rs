//! Table metadata consumed by the batch builder.
//!
//! pgbatch does not introspect the database. Callers hand it a static
//! snapshot of the table: its name, primary key, and the ordered list of
//! columns with their SQL types. The snapshot can be built in code, derived
//! from a type implementing [`TableMeta`], or deserialized (it is plain serde
//! data).
//!
//! # Example
//!
//! ```ignore
//! use pgbatch::TableSchema;
//!
//! let items = TableSchema::new("test_items", "id")
//!     .column("id", "bigint")
//!     .column("unique_field", "integer")
//!     .column("data", "text")
//!     .column("created_at", "timestamp(6) without time zone")
//!     .column("updated_at", "timestamp(6) without time zone");
//!
//! let batch = items.batch();
//! ```

use crate::error::{BatchError, BatchResult};
use crate::interface::BatchInterface;
use serde::{Deserialize, Serialize};

/// Column stamped with the current time when a row is inserted.
pub const CREATED_AT: &str = "created_at";
/// Column stamped with the current time when a row is inserted or updated.
pub const UPDATED_AT: &str = "updated_at";

/// Metadata for a table type.
///
/// Implement this on a model type to get a ready [`BatchInterface`] via
/// [`TableMeta::batch`].
pub trait TableMeta {
    /// The database table name (may be schema qualified).
    fn table_name() -> &'static str;

    /// The primary key column name.
    fn primary_key() -> &'static str {
        "id"
    }

    /// `(column name, SQL type)` pairs in the table's natural column order.
    fn columns() -> &'static [(&'static str, &'static str)];

    /// Snapshot the metadata as a [`TableSchema`].
    fn table_schema() -> TableSchema {
        Self::columns()
            .iter()
            .fold(
                TableSchema::new(Self::table_name(), Self::primary_key()),
                |schema, (name, sql_type)| schema.column(*name, *sql_type),
            )
    }

    /// Build a batch interface bound to this table.
    fn batch() -> BatchInterface {
        BatchInterface::new(Self::table_schema())
    }
}

/// Column information.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnMeta {
    /// Column name.
    pub name: String,
    /// Declared SQL type, used to cast values unpacked from JSON.
    pub sql_type: String,
}

/// Static snapshot of a table's structure.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableSchema {
    /// Table name, optionally schema qualified (`public.items`).
    pub name: String,
    /// Primary key column name.
    pub primary_key: String,
    /// Columns in natural order.
    pub columns: Vec<ColumnMeta>,
}

impl TableSchema {
    /// Create a table schema without columns.
    pub fn new(name: impl Into<String>, primary_key: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            primary_key: primary_key.into(),
            columns: Vec::new(),
        }
    }

    /// Add a column (builder style).
    pub fn column(mut self, name: impl Into<String>, sql_type: impl Into<String>) -> Self {
        self.add_column(name, sql_type);
        self
    }

    /// Add a column to this table schema.
    pub fn add_column(&mut self, name: impl Into<String>, sql_type: impl Into<String>) {
        self.columns.push(ColumnMeta {
            name: name.into(),
            sql_type: sql_type.into(),
        });
    }

    /// Check if this table has a column with the given name.
    pub fn has_column(&self, name: &str) -> bool {
        self.columns.iter().any(|c| c.name == name)
    }

    /// Validate every SQL type and return the ordered column/type map.
    pub fn column_types(&self) -> BatchResult<ColumnTypes> {
        let entries = self
            .columns
            .iter()
            .map(|c| Ok((c.name.clone(), SqlType::new(&c.sql_type)?)))
            .collect::<BatchResult<Vec<_>>>()?;
        Ok(ColumnTypes { entries })
    }

    /// Timestamp columns stamped on insert: `created_at` and `updated_at`, when present.
    pub fn now_on_insert(&self) -> Vec<String> {
        [CREATED_AT, UPDATED_AT]
            .into_iter()
            .filter(|c| self.has_column(c))
            .map(str::to_string)
            .collect()
    }

    /// Timestamp columns stamped on conflict update: `updated_at`, when present.
    pub fn now_on_update(&self) -> Vec<String> {
        if self.has_column(UPDATED_AT) {
            vec![UPDATED_AT.to_string()]
        } else {
            Vec::new()
        }
    }

    /// Build a batch interface bound to this table.
    pub fn batch(self) -> BatchInterface {
        BatchInterface::new(self)
    }
}

/// A validated SQL type name such as `integer` or `timestamp(6) with time zone`.
///
/// Allowed characters are ASCII letters, digits, `_`, space, `(`, `)`, `,`,
/// `[`, `]` and `.`; the first character must be a letter or `_`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SqlType(String);

impl SqlType {
    pub fn new(sql_type: &str) -> BatchResult<Self> {
        let trimmed = sql_type.trim();
        let mut chars = trimmed.chars();
        match chars.next() {
            Some(c) if c == '_' || c.is_ascii_alphabetic() => {}
            Some(c) => {
                return Err(BatchError::validation(format!(
                    "Invalid SQL type start character '{c}' in {sql_type:?}"
                )));
            }
            None => return Err(BatchError::validation("SQL type cannot be empty")),
        }
        let allowed = |c: char| {
            c.is_ascii_alphanumeric() || matches!(c, '_' | ' ' | '(' | ')' | ',' | '[' | ']' | '.')
        };
        if let Some(c) = chars.find(|c| !allowed(*c)) {
            return Err(BatchError::validation(format!(
                "Invalid character '{c}' in SQL type {sql_type:?}"
            )));
        }
        Ok(Self(trimmed.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for SqlType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Ordered mapping of column name to [`SqlType`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ColumnTypes {
    entries: Vec<(String, SqlType)>,
}

impl ColumnTypes {
    pub fn get(&self, column: &str) -> Option<&SqlType> {
        self.entries
            .iter()
            .find(|(name, _)| name == column)
            .map(|(_, ty)| ty)
    }

    pub fn contains(&self, column: &str) -> bool {
        self.get(column).is_some()
    }

    /// Column names in natural order.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|(name, _)| name.as_str())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl<N: Into<String>> FromIterator<(N, SqlType)> for ColumnTypes {
    fn from_iter<I: IntoIterator<Item = (N, SqlType)>>(iter: I) -> Self {
        Self {
            entries: iter.into_iter().map(|(n, t)| (n.into(), t)).collect(),
        }
    }
}
