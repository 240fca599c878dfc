//! The caller-facing batch API.
//!
//! A [`BatchInterface`] is bound to one table. Each public operation validates
//! the batch, renders one statement through [`BatchQuery`], executes it once on
//! the given [`BatchExecutor`], and reshapes the result rows.
//!
//! # Example
//!
//! ```ignore
//! use pgbatch::{Record, TableSchema};
//! use serde_json::json;
//!
//! let batch = TableSchema::new("test_items", "id")
//!     .column("id", "bigint")
//!     .column("unique_field", "integer")
//!     .column("data", "text")
//!     .batch();
//!
//! let rows: Vec<Record> = serde_json::from_value(json!([
//!     {"unique_field": 1, "data": "1"},
//!     {"unique_field": 2, "data": "2"},
//! ]))?;
//!
//! // [1, 2] on an empty table
//! let ids = batch.upsert(&client, &rows, &["unique_field"], &[], "id").await?;
//!
//! // [{"id": 1, "data": "1"}, {"id": 2, "data": "2"}]
//! let found = batch.select(&client, &rows, &["unique_field"], ["id", "data"]).await?;
//! ```

use crate::config::BatchConfig;
use crate::error::{BatchError, BatchResult};
use crate::executor::BatchExecutor;
use crate::query::{BatchQuery, QueryParts};
use crate::returning::{BatchOutput, Record, Returning};
use crate::schema::{ColumnTypes, TableSchema};
use crate::transform;
use serde_json::Value;
use std::sync::{Arc, OnceLock};
use tracing::Level;

/// Which statement a [`PreparedBatch`] runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BatchKind {
    Upsert,
    Select,
}

impl BatchKind {
    pub fn as_str(self) -> &'static str {
        match self {
            BatchKind::Upsert => "upsert",
            BatchKind::Select => "select",
        }
    }
}

/// A rendered statement and its JSON payload, ready to execute.
#[derive(Debug, Clone)]
pub struct PreparedBatch {
    kind: BatchKind,
    query: BatchQuery,
    sql: String,
    payload: Value,
}

impl PreparedBatch {
    pub fn kind(&self) -> BatchKind {
        self.kind
    }

    pub fn query(&self) -> &BatchQuery {
        &self.query
    }

    pub fn sql(&self) -> &str {
        &self.sql
    }

    /// The value bound to `$1`: a JSON array with one object per row.
    pub fn payload(&self) -> &Value {
        &self.payload
    }

    /// Number of rows in the payload.
    pub fn len(&self) -> usize {
        self.payload.as_array().map_or(0, Vec::len)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Metadata derived once per interface.
#[derive(Debug)]
struct Derived {
    column_types: ColumnTypes,
    now_on_insert: Vec<String>,
    now_on_update: Vec<String>,
}

#[derive(Debug)]
struct Inner {
    schema: TableSchema,
    derived: OnceLock<Derived>,
}

/// Batch upsert/select bound to one table.
///
/// Cheap to clone and safe to share between tasks.
#[derive(Debug, Clone)]
pub struct BatchInterface {
    inner: Arc<Inner>,
    config: BatchConfig,
}

impl BatchInterface {
    /// Bind a new interface to a table.
    pub fn new(schema: TableSchema) -> Self {
        Self {
            inner: Arc::new(Inner {
                schema,
                derived: OnceLock::new(),
            }),
            config: BatchConfig::default(),
        }
    }

    /// Replace the logging/diagnostics configuration.
    pub fn with_config(mut self, config: BatchConfig) -> Self {
        self.config = config;
        self
    }

    pub fn config(&self) -> &BatchConfig {
        &self.config
    }

    pub fn schema(&self) -> &TableSchema {
        &self.inner.schema
    }

    pub fn primary_key(&self) -> &str {
        &self.inner.schema.primary_key
    }

    fn derived(&self) -> BatchResult<&Derived> {
        if let Some(derived) = self.inner.derived.get() {
            return Ok(derived);
        }
        let schema = &self.inner.schema;
        let derived = Derived {
            column_types: schema.column_types()?,
            now_on_insert: schema.now_on_insert(),
            now_on_update: schema.now_on_update(),
        };
        // A concurrent caller may have won; both computed the same value.
        Ok(self.inner.derived.get_or_init(|| derived))
    }

    /// Build a [`BatchQuery`] for this table.
    pub fn query(
        &self,
        input_columns: Vec<String>,
        unique_by: &[&str],
        returning: Returning,
    ) -> BatchResult<BatchQuery> {
        let derived = self.derived()?;
        BatchQuery::new(QueryParts {
            table: self.inner.schema.name.clone(),
            primary_key: self.primary_key().to_string(),
            input_columns,
            column_types: derived.column_types.clone(),
            unique_columns: unique_by.iter().map(|c| c.to_string()).collect(),
            now_on_insert: derived.now_on_insert.clone(),
            now_on_update: derived.now_on_update.clone(),
            returning,
        })
    }

    /// Render an upsert without executing it.
    ///
    /// `except` keys are dropped from copies of the rows before anything else.
    pub fn build_upsert(
        &self,
        rows: &[Record],
        unique_by: &[&str],
        except: &[&str],
        returning: impl Into<Returning>,
    ) -> BatchResult<PreparedBatch> {
        let rows = if except.is_empty() {
            rows.to_vec()
        } else {
            transform::slice_except(rows, except)
        };
        let input_columns = transform::assert_inputs_ok(&rows, unique_by)?;
        let query = self.query(input_columns, unique_by, returning.into())?;
        let sql = query.upsert_sql();
        Ok(PreparedBatch {
            kind: BatchKind::Upsert,
            query,
            sql,
            payload: transform::payload(rows),
        })
    }

    /// Render a select without executing it.
    ///
    /// Rows are projected down to their `unique_by` columns.
    pub fn build_select(
        &self,
        rows: &[Record],
        unique_by: &[&str],
        returning: impl Into<Returning>,
    ) -> BatchResult<PreparedBatch> {
        let returning = returning.into();
        if returning.is_none() {
            return Err(BatchError::invalid_input(
                "select requires a returning column, column list or \"*\"",
            ));
        }
        transform::assert_inputs_ok(rows, unique_by)?;
        let rows = transform::project(rows, unique_by);
        let input_columns = transform::assert_inputs_ok(&rows, unique_by)?;
        let query = self.query(input_columns, unique_by, returning)?;
        let sql = query.select_sql()?;
        Ok(PreparedBatch {
            kind: BatchKind::Select,
            query,
            sql,
            payload: transform::payload(rows),
        })
    }

    /// Execute a prepared batch and reshape its result.
    pub async fn execute<C: BatchExecutor>(
        &self,
        conn: &C,
        prepared: &PreparedBatch,
    ) -> BatchResult<BatchOutput> {
        self.log(prepared);
        let rows = conn
            .exec_batch(&prepared.sql, &prepared.payload)
            .await
            .map_err(|err| {
                if self.config.sql_in_errors {
                    err.with_sql(&prepared.sql)
                } else {
                    err
                }
            })?;
        // One result row per input row, or the positional pairing is lost.
        if !prepared.query.returning().is_none() && rows.len() != prepared.len() {
            let column = prepared.query.returning_columns().first();
            return Err(BatchError::decode(
                column.map_or("", String::as_str),
                format!(
                    "{} returned {} rows for a batch of {}",
                    prepared.kind.as_str(),
                    rows.len(),
                    prepared.len()
                ),
            ));
        }
        transform::build_return(&prepared.query, rows)
    }

    /// Insert or update every row, keyed by `unique_by`.
    ///
    /// Returns one scalar or record per input row, in input order, according
    /// to `returning`. Rows that share a key are written once (the last one
    /// wins) and each gets the written row back.
    pub async fn upsert<C: BatchExecutor>(
        &self,
        conn: &C,
        rows: &[Record],
        unique_by: &[&str],
        except: &[&str],
        returning: impl Into<Returning>,
    ) -> BatchResult<BatchOutput> {
        let prepared = self.build_upsert(rows, unique_by, except, returning)?;
        self.execute(conn, &prepared).await
    }

    /// Look up every row by its `unique_by` columns.
    ///
    /// The output has one entry per input row, in input order; rows without a
    /// match yield nulls. `returning` must not be empty.
    pub async fn select<C: BatchExecutor>(
        &self,
        conn: &C,
        rows: &[Record],
        unique_by: &[&str],
        returning: impl Into<Returning>,
    ) -> BatchResult<BatchOutput> {
        let prepared = self.build_select(rows, unique_by, returning)?;
        self.execute(conn, &prepared).await
    }

    /// Upsert and pair each input row with its primary key.
    pub async fn with_upserted_pk<'r, C: BatchExecutor>(
        &self,
        conn: &C,
        rows: &'r [Record],
        unique_by: &[&str],
        except: &[&str],
    ) -> BatchResult<Vec<(&'r Record, Option<Value>)>> {
        let keys = self
            .upsert(conn, rows, unique_by, except, self.primary_key_returning())
            .await?;
        Ok(zip_keys(rows, self.primary_keys(keys, rows.len())?))
    }

    /// Select and pair each input row with its primary key (`None` when not found).
    pub async fn with_selected_pk<'r, C: BatchExecutor>(
        &self,
        conn: &C,
        rows: &'r [Record],
        unique_by: &[&str],
    ) -> BatchResult<Vec<(&'r Record, Option<Value>)>> {
        let keys = self
            .select(conn, rows, unique_by, self.primary_key_returning())
            .await?;
        Ok(zip_keys(rows, self.primary_keys(keys, rows.len())?))
    }

    /// Upsert, then write each row's primary key into the row itself.
    ///
    /// **Mutates the caller's rows**: the key is stored under the primary-key
    /// field name. Running it again on the same rows yields the same keys.
    pub async fn set_upserted_pk<C: BatchExecutor>(
        &self,
        conn: &C,
        rows: &mut [Record],
        unique_by: &[&str],
        except: &[&str],
    ) -> BatchResult<()> {
        let keys = self
            .upsert(conn, rows, unique_by, except, self.primary_key_returning())
            .await?;
        self.store_keys(rows, keys)
    }

    /// Select, then write each row's primary key (or null) into the row itself.
    ///
    /// **Mutates the caller's rows**, like [`BatchInterface::set_upserted_pk`].
    pub async fn set_selected_pk<C: BatchExecutor>(
        &self,
        conn: &C,
        rows: &mut [Record],
        unique_by: &[&str],
    ) -> BatchResult<()> {
        let keys = self
            .select(conn, rows, unique_by, self.primary_key_returning())
            .await?;
        self.store_keys(rows, keys)
    }

    fn primary_key_returning(&self) -> Returning {
        Returning::scalar(self.primary_key())
    }

    /// Unwrap one primary key per row from a scalar output.
    fn primary_keys(&self, output: BatchOutput, expected: usize) -> BatchResult<Vec<Value>> {
        let keys = output
            .into_scalars()
            .ok_or_else(|| BatchError::decode(self.primary_key(), "expected one key per row"))?;
        if keys.len() != expected {
            return Err(BatchError::decode(
                self.primary_key(),
                format!("got {} keys for {expected} rows", keys.len()),
            ));
        }
        Ok(keys)
    }

    fn store_keys(&self, rows: &mut [Record], output: BatchOutput) -> BatchResult<()> {
        let keys = self.primary_keys(output, rows.len())?;
        let primary_key = self.primary_key();
        for (row, key) in rows.iter_mut().zip(keys) {
            row.insert(primary_key.to_string(), key);
        }
        Ok(())
    }

    fn log(&self, prepared: &PreparedBatch) {
        /// Dispatch a tracing event at a runtime-determined level.
        macro_rules! emit_at_level {
            ($level:expr, $($field:tt)*) => {
                match $level {
                    Level::ERROR => tracing::error!($($field)*),
                    Level::WARN  => tracing::warn!($($field)*),
                    Level::INFO  => tracing::info!($($field)*),
                    Level::DEBUG => tracing::debug!($($field)*),
                    Level::TRACE => tracing::trace!($($field)*),
                }
            };
        }

        let sql = self.config.truncate_sql(&prepared.sql);
        emit_at_level!(
            self.config.log_level,
            target: "pgbatch.sql",
            operation = prepared.kind.as_str(),
            table = %prepared.query.table(),
            rows = prepared.len(),
            sql = %sql,
        );
    }
}

fn zip_keys(rows: &[Record], keys: Vec<Value>) -> Vec<(&Record, Option<Value>)> {
    rows.iter()
        .zip(keys)
        .map(|(row, key)| (row, Some(key).filter(|key| !key.is_null())))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::Mutex;

    /// Records every call and answers with canned rows.
    #[derive(Default)]
    struct FakeExecutor {
        calls: Mutex<Vec<(String, Value)>>,
        rows: Vec<Vec<Value>>,
    }

    impl FakeExecutor {
        fn answering(rows: Vec<Vec<Value>>) -> Self {
            Self {
                rows,
                ..Self::default()
            }
        }

        fn calls(&self) -> Vec<(String, Value)> {
            self.calls.lock().unwrap().clone()
        }
    }

    impl BatchExecutor for FakeExecutor {
        async fn exec_batch(&self, sql: &str, payload: &Value) -> BatchResult<Vec<Vec<Value>>> {
            self.calls
                .lock()
                .unwrap()
                .push((sql.to_string(), payload.clone()));
            Ok(self.rows.clone())
        }
    }

    fn batch() -> BatchInterface {
        TableSchema::new("test_items", "id")
            .column("id", "bigint")
            .column("created_at", "timestamp(6) without time zone")
            .column("data", "text")
            .column("unique_field", "integer")
            .column("updated_at", "timestamp(6) without time zone")
            .batch()
    }

    fn data() -> Vec<Record> {
        serde_json::from_value(json!([
            {"unique_field": 1, "data": "1"},
            {"unique_field": 2, "data": "2"},
            {"unique_field": 3, "data": "3"},
        ]))
        .unwrap()
    }

    fn ids(values: &[i64]) -> Vec<Vec<Value>> {
        values.iter().map(|v| vec![json!(v)]).collect()
    }

    #[tokio::test]
    async fn upsert_sends_one_statement_with_the_rows_as_payload() {
        let conn = FakeExecutor::answering(ids(&[1, 2, 3]));
        let out = batch()
            .upsert(&conn, &data(), &["unique_field"], &[], "id")
            .await
            .unwrap();
        assert_eq!(out, BatchOutput::Scalars(vec![json!(1), json!(2), json!(3)]));

        let calls = conn.calls();
        assert_eq!(calls.len(), 1);
        assert!(calls[0].0.contains("ON CONFLICT (\"unique_field\")"));
        assert_eq!(calls[0].1, json!(data()));
    }

    #[tokio::test]
    async fn upsert_without_returning_yields_none() {
        let conn = FakeExecutor::default();
        let out = batch()
            .upsert(&conn, &data(), &["unique_field"], &[], Returning::None)
            .await
            .unwrap();
        assert!(out.is_none());
        assert!(!conn.calls()[0].0.contains("RETURNING"));
    }

    #[tokio::test]
    async fn except_is_stripped_from_a_copy() {
        let conn = FakeExecutor::default();
        let mut rows = data();
        for row in &mut rows {
            row.insert("transient".into(), json!(true));
        }
        batch()
            .upsert(&conn, &rows, &["unique_field"], &["transient"], Returning::None)
            .await
            .unwrap();
        assert_eq!(conn.calls()[0].1, json!(data()));
        assert!(rows.iter().all(|r| r.contains_key("transient")));
    }

    #[tokio::test]
    async fn select_projects_rows_to_unique_columns() {
        let conn = FakeExecutor::answering(vec![
            vec![json!(1), json!("1")],
            vec![Value::Null, Value::Null],
        ]);
        let out = batch()
            .select(&conn, &data()[..2], &["unique_field"], ["id", "data"])
            .await
            .unwrap();
        let records = out.into_records().unwrap();
        assert_eq!(Value::Object(records[0].clone()), json!({"id": 1, "data": "1"}));
        assert_eq!(Value::Object(records[1].clone()), json!({"id": null, "data": null}));
        assert_eq!(
            conn.calls()[0].1,
            json!([{"unique_field": 1}, {"unique_field": 2}])
        );
    }

    #[tokio::test]
    async fn select_without_returning_fails_before_execution() {
        let conn = FakeExecutor::default();
        for returning in [Returning::None, Returning::from(Vec::<String>::new())] {
            let err = batch()
                .select(&conn, &data(), &["unique_field"], returning)
                .await
                .unwrap_err();
            assert!(err.is_invalid_input());
        }
        assert!(conn.calls().is_empty());
    }

    #[tokio::test]
    async fn missing_unique_by_fails_before_execution() {
        let conn = FakeExecutor::default();
        let err = batch()
            .select(&conn, &data(), &["id"], "id")
            .await
            .unwrap_err();
        assert!(err.to_string().contains("[\"id\"] was missing from"));
        let err = batch()
            .upsert(&conn, &[], &["unique_field"], &[], "id")
            .await
            .unwrap_err();
        assert!(err.is_invalid_input());
        assert!(conn.calls().is_empty());
    }

    #[tokio::test]
    async fn with_selected_pk_pairs_positionally() {
        let conn = FakeExecutor::answering(vec![vec![json!(10)], vec![Value::Null], vec![json!(30)]]);
        let rows = data();
        let pairs = batch()
            .with_selected_pk(&conn, &rows, &["unique_field"])
            .await
            .unwrap();
        assert_eq!(pairs.len(), 3);
        assert!(std::ptr::eq(pairs[1].0, &rows[1]));
        assert_eq!(pairs[0].1, Some(json!(10)));
        assert_eq!(pairs[1].1, None);
        assert_eq!(pairs[2].1, Some(json!(30)));
    }

    #[tokio::test]
    async fn set_upserted_pk_mutates_rows() {
        let conn = FakeExecutor::answering(ids(&[1, 2, 3]));
        let mut rows = data();
        batch()
            .set_upserted_pk(&conn, &mut rows, &["unique_field"], &[])
            .await
            .unwrap();
        let got: Vec<&Value> = rows.iter().map(|r| &r["id"]).collect();
        assert_eq!(got, [&json!(1), &json!(2), &json!(3)]);
    }

    #[tokio::test]
    async fn set_selected_pk_writes_null_for_misses() {
        let conn = FakeExecutor::answering(vec![vec![json!(1)], vec![Value::Null]]);
        let mut rows = data();
        rows.truncate(2);
        batch()
            .set_selected_pk(&conn, &mut rows, &["unique_field"])
            .await
            .unwrap();
        assert_eq!(rows[0]["id"], json!(1));
        assert_eq!(rows[1]["id"], Value::Null);
        // The select only ever sends the key.
        assert_eq!(conn.calls()[0].1, json!([{"unique_field": 1}, {"unique_field": 2}]));
    }

    #[tokio::test]
    async fn short_result_is_a_decode_error() {
        let conn = FakeExecutor::answering(ids(&[1, 2]));
        let err = batch()
            .upsert(&conn, &data(), &["unique_field"], &[], "id")
            .await
            .unwrap_err();
        assert!(matches!(err, BatchError::Decode { .. }), "{err}");
        assert!(err.to_string().contains("2 rows for a batch of 3"), "{err}");
    }

    #[tokio::test]
    async fn short_result_leaves_rows_untouched() {
        let conn = FakeExecutor::answering(ids(&[1]));
        let mut rows = data();
        let err = batch()
            .set_upserted_pk(&conn, &mut rows, &["unique_field"], &[])
            .await
            .unwrap_err();
        assert!(matches!(err, BatchError::Decode { .. }));
        assert!(rows.iter().all(|row| !row.contains_key("id")));

        let err = batch()
            .with_selected_pk(&conn, &rows, &["unique_field"])
            .await
            .unwrap_err();
        assert!(matches!(err, BatchError::Decode { .. }));
    }

    #[tokio::test]
    async fn ignored_result_rows_need_no_count() {
        let conn = FakeExecutor::answering(ids(&[1]));
        let out = batch()
            .upsert(&conn, &data(), &["unique_field"], &[], Returning::None)
            .await
            .unwrap();
        assert!(out.is_none());
    }

    #[test]
    fn derived_metadata_is_memoized() {
        let batch = batch();
        let first = batch.derived().unwrap() as *const Derived;
        let second = batch.derived().unwrap() as *const Derived;
        assert_eq!(first, second);
        assert_eq!(batch.derived().unwrap().now_on_update, ["updated_at"]);
    }

    #[test]
    fn bad_sql_type_surfaces_on_first_use() {
        let batch = TableSchema::new("t", "id")
            .column("id", "bigint; DROP TABLE t")
            .batch();
        let rows: Vec<Record> = serde_json::from_value(json!([{"id": 1}])).unwrap();
        let err = batch.build_upsert(&rows, &["id"], &[], "id").unwrap_err();
        assert!(matches!(err, BatchError::Validation(_)));
    }
}
