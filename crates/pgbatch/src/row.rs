//! Decoding Postgres result rows into JSON values.
//!
//! Batch results are positional tuples of [`serde_json::Value`]s, whatever the
//! column types are. Each column is decoded according to its Postgres type:
//!
//! | Postgres                         | JSON                           |
//! |----------------------------------|--------------------------------|
//! | `bool`                           | bool                           |
//! | `int2`/`int4`/`int8`/`oid`       | number                         |
//! | `float4`/`float8`                | number (NaN/inf become null)   |
//! | text-like, enums                 | string                         |
//! | `json`/`jsonb`                   | the document                   |
//! | `uuid`                           | string                         |
//! | `date`/`time`/`timestamp`        | ISO 8601 string                |
//! | `timestamptz`                    | RFC 3339 string, UTC           |
//! | `numeric` (feature `rust_decimal`) | string                       |
//!
//! SQL `NULL` is always JSON `null`.
//!
//! Batch statements wrap every returned column in `to_jsonb`, so their cells
//! take the `jsonb` path whatever the table's column types are. The other
//! branches serve statements run directly through a [`BatchExecutor`](crate::BatchExecutor).

use crate::error::{BatchError, BatchResult};
use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, SecondsFormat, Utc};
use serde_json::Value;
use std::error::Error;
use tokio_postgres::Row;
use tokio_postgres::types::{FromSql, Kind, Type};

/// Decode every column of a row, in column order.
pub fn row_values(row: &Row) -> BatchResult<Vec<Value>> {
    (0..row.len()).map(|idx| column_value(row, idx)).collect()
}

/// Decode a single column.
pub fn column_value(row: &Row, idx: usize) -> BatchResult<Value> {
    let column = &row.columns()[idx];
    let ty = column.type_();
    let err = |e: tokio_postgres::Error| BatchError::decode(column.name(), e.to_string());

    macro_rules! get {
        ($t:ty, $conv:expr) => {
            row.try_get::<_, Option<$t>>(idx)
                .map_err(err)?
                .map($conv)
                .unwrap_or(Value::Null)
        };
    }

    let value = if *ty == Type::BOOL {
        get!(bool, Value::Bool)
    } else if *ty == Type::INT2 {
        get!(i16, Value::from)
    } else if *ty == Type::INT4 {
        get!(i32, Value::from)
    } else if *ty == Type::INT8 {
        get!(i64, Value::from)
    } else if *ty == Type::OID {
        get!(u32, Value::from)
    } else if *ty == Type::FLOAT4 {
        get!(f32, |v| Value::from(f64::from(v)))
    } else if *ty == Type::FLOAT8 {
        get!(f64, Value::from)
    } else if <Value as FromSql>::accepts(ty) {
        get!(Value, std::convert::identity)
    } else if <String as FromSql>::accepts(ty) {
        get!(String, Value::String)
    } else if *ty == Type::UUID {
        get!(uuid::Uuid, |v| Value::String(v.to_string()))
    } else if *ty == Type::DATE {
        get!(NaiveDate, date_to_json)
    } else if *ty == Type::TIME {
        get!(NaiveTime, time_to_json)
    } else if *ty == Type::TIMESTAMP {
        get!(NaiveDateTime, timestamp_to_json)
    } else if *ty == Type::TIMESTAMPTZ {
        get!(DateTime<Utc>, timestamptz_to_json)
    } else if matches!(ty.kind(), Kind::Enum(_)) {
        get!(EnumLabel, |v| Value::String(v.0))
    } else {
        return decode_extra(row, idx, ty);
    };

    Ok(value)
}

#[cfg(feature = "rust_decimal")]
fn decode_extra(row: &Row, idx: usize, ty: &Type) -> BatchResult<Value> {
    let column = &row.columns()[idx];
    if *ty == Type::NUMERIC {
        return row
            .try_get::<_, Option<rust_decimal::Decimal>>(idx)
            .map(|v| v.map_or(Value::Null, |d| Value::String(d.to_string())))
            .map_err(|e| BatchError::decode(column.name(), e.to_string()));
    }
    Err(unsupported(column.name(), ty))
}

#[cfg(not(feature = "rust_decimal"))]
fn decode_extra(row: &Row, idx: usize, ty: &Type) -> BatchResult<Value> {
    Err(unsupported(row.columns()[idx].name(), ty))
}

fn unsupported(column: &str, ty: &Type) -> BatchError {
    BatchError::decode(
        column,
        format!("unsupported column type '{}' in batch results", ty.name()),
    )
}

fn date_to_json(v: NaiveDate) -> Value {
    Value::String(v.format("%Y-%m-%d").to_string())
}

fn time_to_json(v: NaiveTime) -> Value {
    Value::String(v.format("%H:%M:%S%.f").to_string())
}

fn timestamp_to_json(v: NaiveDateTime) -> Value {
    Value::String(v.format("%Y-%m-%dT%H:%M:%S%.f").to_string())
}

fn timestamptz_to_json(v: DateTime<Utc>) -> Value {
    Value::String(v.to_rfc3339_opts(SecondsFormat::AutoSi, true))
}

/// Label of a Postgres enum value (sent as its text in binary format).
struct EnumLabel(String);

impl<'a> FromSql<'a> for EnumLabel {
    fn from_sql(_: &Type, raw: &'a [u8]) -> Result<Self, Box<dyn Error + Sync + Send>> {
        Ok(Self(std::str::from_utf8(raw)?.to_string()))
    }

    fn accepts(ty: &Type) -> bool {
        matches!(ty.kind(), Kind::Enum(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn temporal_values_render_iso_8601() {
        let date = NaiveDate::from_ymd_opt(2025, 4, 12).unwrap();
        assert_eq!(date_to_json(date), Value::from("2025-04-12"));

        let ts = date.and_hms_micro_opt(22, 44, 30, 120_000).unwrap();
        assert_eq!(timestamp_to_json(ts), Value::from("2025-04-12T22:44:30.120"));
        assert_eq!(
            time_to_json(NaiveTime::from_hms_opt(8, 0, 0).unwrap()),
            Value::from("08:00:00")
        );

        let tz = Utc.with_ymd_and_hms(2025, 4, 12, 22, 44, 30).unwrap();
        assert_eq!(timestamptz_to_json(tz), Value::from("2025-04-12T22:44:30Z"));
    }

    #[test]
    fn enum_label_decodes_raw_text() {
        let label = EnumLabel::from_sql(&Type::TEXT, b"happy").unwrap();
        assert_eq!(label.0, "happy");
        assert!(!<EnumLabel as FromSql>::accepts(&Type::TEXT));
    }

    #[test]
    fn unsupported_message_names_the_type() {
        let err = unsupported("shape", &Type::POINT);
        assert_eq!(
            err.to_string(),
            "Decode error on column 'shape': unsupported column type 'point' in batch results"
        );
    }
}
