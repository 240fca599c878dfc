//! Input normalization and output reshaping around a [`BatchQuery`].
//!
//! A batch is a slice of [`Record`]s sharing one key set. The first row's keys
//! are the input columns; [`assert_inputs_ok`] checks the rest of the batch
//! against them once, before any SQL is rendered.

use crate::error::{BatchError, BatchResult};
use crate::query::BatchQuery;
use crate::returning::{BatchOutput, Record, Returning};
use serde_json::Value;

/// Validate a batch and return its input columns (the first row's keys).
///
/// Fails with [`BatchError::InvalidInput`] when the batch is empty, a row's
/// key set differs from the first row's, or a `unique_by` column is missing.
pub fn assert_inputs_ok(rows: &[Record], unique_by: &[&str]) -> BatchResult<Vec<String>> {
    let Some(first) = rows.first() else {
        return Err(BatchError::invalid_input(
            "batch is empty; at least one row is needed to infer the input columns",
        ));
    };
    if unique_by.is_empty() {
        return Err(BatchError::invalid_input("unique_by must name at least one column"));
    }

    let keys: Vec<String> = first.keys().cloned().collect();
    let missing: Vec<&str> = unique_by
        .iter()
        .copied()
        .filter(|column| !first.contains_key(*column))
        .collect();
    if !missing.is_empty() {
        return Err(BatchError::invalid_input(format!(
            "All unique_by columns must be in the given data, but {missing:?} was missing from {keys:?}."
        )));
    }

    for (index, row) in rows.iter().enumerate().skip(1) {
        let same = row.len() == first.len() && row.keys().all(|k| first.contains_key(k));
        if !same {
            let row_keys: Vec<&String> = row.keys().collect();
            return Err(BatchError::invalid_input(format!(
                "All rows must have the same keys, but row {index} has {row_keys:?} instead of {keys:?}."
            )));
        }
    }

    Ok(keys)
}

/// Copy the rows without the `except` keys. Caller rows are left untouched.
pub fn slice_except(rows: &[Record], except: &[&str]) -> Vec<Record> {
    rows.iter()
        .map(|row| {
            row.iter()
                .filter(|(key, _)| !except.contains(&key.as_str()))
                .map(|(key, value)| (key.clone(), value.clone()))
                .collect()
        })
        .collect()
}

/// Copy the rows keeping only the `unique_by` keys.
pub fn project(rows: &[Record], unique_by: &[&str]) -> Vec<Record> {
    rows.iter()
        .map(|row| {
            row.iter()
                .filter(|(key, _)| unique_by.contains(&key.as_str()))
                .map(|(key, value)| (key.clone(), value.clone()))
                .collect()
        })
        .collect()
}

/// The single bind parameter: a JSON array of row objects.
pub fn payload(rows: Vec<Record>) -> Value {
    Value::Array(rows.into_iter().map(Value::Object).collect())
}

/// Reshape raw result rows according to the query's returning request.
///
/// Records are keyed by [`BatchQuery::returning_columns`], the order the SQL
/// declared, not the order a caller might have expected.
pub fn build_return(query: &BatchQuery, rows: Vec<Vec<Value>>) -> BatchResult<BatchOutput> {
    match query.returning() {
        Returning::None => Ok(BatchOutput::None),
        Returning::Scalar(column) => rows
            .into_iter()
            .map(|row| {
                row.into_iter()
                    .next()
                    .ok_or_else(|| BatchError::decode(column, "result row has no values"))
            })
            .collect::<BatchResult<Vec<_>>>()
            .map(BatchOutput::Scalars),
        Returning::Columns(_) | Returning::All => {
            hash_rows(query.returning_columns(), rows).map(BatchOutput::Records)
        }
    }
}

/// Zip every result row with the column names, positionally.
pub fn hash_rows(columns: &[String], rows: Vec<Vec<Value>>) -> BatchResult<Vec<Record>> {
    rows.into_iter()
        .map(|row| {
            if row.len() != columns.len() {
                return Err(BatchError::decode(
                    columns.get(row.len()).map_or("?", String::as_str),
                    format!(
                        "result row has {} values, expected {} ({columns:?})",
                        row.len(),
                        columns.len()
                    ),
                ));
            }
            Ok(columns.iter().cloned().zip(row).collect())
        })
        .collect()
}
