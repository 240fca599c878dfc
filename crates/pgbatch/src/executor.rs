//! The execution seam between pgbatch and a database connection.
//!
//! A [`BatchExecutor`] runs one statement with exactly one parameter (the JSON
//! array of rows) and returns the result rows as positional JSON values. It is
//! implemented for plain `tokio_postgres` clients and transactions, pooled
//! `deadpool_postgres` clients, and the pool itself (which checks out a
//! connection for the duration of the call).
//!
//! Errors are passed through as [`BatchError::Query`]; nothing is retried.

use crate::error::BatchResult;
use crate::row::row_values;
use serde_json::Value;
use tokio_postgres::Row;
use tokio_postgres::types::ToSql;

/// Anything that can run a batch statement.
pub trait BatchExecutor: Send + Sync {
    /// Execute `sql` with `payload` bound to `$1` and return every row's values.
    fn exec_batch(
        &self,
        sql: &str,
        payload: &Value,
    ) -> impl std::future::Future<Output = BatchResult<Vec<Vec<Value>>>> + Send;
}

fn decode_rows(rows: &[Row]) -> BatchResult<Vec<Vec<Value>>> {
    rows.iter().map(row_values).collect()
}

impl BatchExecutor for tokio_postgres::Client {
    async fn exec_batch(&self, sql: &str, payload: &Value) -> BatchResult<Vec<Vec<Value>>> {
        let params: [&(dyn ToSql + Sync); 1] = [payload];
        let rows = tokio_postgres::Client::query(self, sql, &params).await?;
        decode_rows(&rows)
    }
}

impl BatchExecutor for tokio_postgres::Transaction<'_> {
    async fn exec_batch(&self, sql: &str, payload: &Value) -> BatchResult<Vec<Vec<Value>>> {
        let params: [&(dyn ToSql + Sync); 1] = [payload];
        let rows = tokio_postgres::Transaction::query(self, sql, &params).await?;
        decode_rows(&rows)
    }
}

#[cfg(feature = "pool")]
impl BatchExecutor for deadpool_postgres::Client {
    async fn exec_batch(&self, sql: &str, payload: &Value) -> BatchResult<Vec<Vec<Value>>> {
        let client: &tokio_postgres::Client = self;
        client.exec_batch(sql, payload).await
    }
}

#[cfg(feature = "pool")]
impl BatchExecutor for deadpool_postgres::Transaction<'_> {
    async fn exec_batch(&self, sql: &str, payload: &Value) -> BatchResult<Vec<Vec<Value>>> {
        let tx: &tokio_postgres::Transaction<'_> = self;
        tx.exec_batch(sql, payload).await
    }
}

/// Checks out a pooled connection for the one statement.
#[cfg(feature = "pool")]
impl BatchExecutor for deadpool_postgres::Pool {
    async fn exec_batch(&self, sql: &str, payload: &Value) -> BatchResult<Vec<Vec<Value>>> {
        let client = self.get().await?;
        client.exec_batch(sql, payload).await
    }
}

impl<C: BatchExecutor> BatchExecutor for &C {
    fn exec_batch(
        &self,
        sql: &str,
        payload: &Value,
    ) -> impl std::future::Future<Output = BatchResult<Vec<Vec<Value>>>> + Send {
        (*self).exec_batch(sql, payload)
    }
}
