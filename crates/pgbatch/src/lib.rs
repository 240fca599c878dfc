//! # pgbatch
//!
//! Set-based batch upsert and select for PostgreSQL.
//!
//! Every operation takes a whole batch of rows (JSON objects) and runs it as
//! **one** statement with **one** bind parameter: the rows are sent as a JSON
//! array, unpacked server side with `jsonb_to_recordset ... WITH ORDINALITY`,
//! cast to the table's declared column types, and joined back so the result
//! has exactly one entry per input row, in input order.
//!
//! ## Features
//!
//! - **Positional results**: output `i` always belongs to input row `i`, even
//!   when rows share a key or have no match
//! - **Duplicate-tolerant upsert**: rows sharing a key are written once (last
//!   one wins) instead of failing the statement
//! - **Automatic timestamps**: `created_at`/`updated_at` are stamped when present
//! - **Injection safe**: identifiers and SQL type names are validated; values
//!   never appear in the SQL text
//! - **Transaction-friendly**: run batches on a client, a transaction, or a pool
//!
//! ## Example
//!
//! ```ignore
//! use pgbatch::prelude::*;
//! use serde_json::json;
//!
//! let batch = TableSchema::new("test_items", "id")
//!     .column("id", "bigint")
//!     .column("unique_field", "integer")
//!     .column("data", "text")
//!     .column("created_at", "timestamp(6) without time zone")
//!     .column("updated_at", "timestamp(6) without time zone")
//!     .batch();
//!
//! let rows: Vec<Record> = serde_json::from_value(json!([
//!     {"unique_field": 1, "data": "1"},
//!     {"unique_field": 2, "data": "2"},
//! ]))?;
//!
//! let ids = batch.upsert(&client, &rows, &["unique_field"], &[], "id").await?;
//! let found = batch.select(&client, &rows, &["unique_field"], ["id", "data"]).await?;
//! ```

pub mod config;
pub mod error;
pub mod executor;
pub mod ident;
pub mod interface;
pub mod query;
pub mod returning;
pub mod row;
pub mod schema;
pub mod transform;

pub use config::BatchConfig;
pub use error::{BatchError, BatchResult};
pub use executor::BatchExecutor;
pub use ident::{Ident, IdentPart};
pub use interface::{BatchInterface, BatchKind, PreparedBatch};
pub use query::{BatchQuery, QueryParts};
pub use returning::{BatchOutput, Record, Returning};
pub use schema::{ColumnMeta, ColumnTypes, SqlType, TableMeta, TableSchema};

#[cfg(feature = "pool")]
pub mod pool;

#[cfg(feature = "pool")]
pub use pool::{create_pool, create_pool_with_config};

pub mod prelude;
