//! What a batch operation hands back.
//!
//! [`Returning`] is the requested projection, [`BatchOutput`] the reshaped
//! result. The tag of the request decides the shape of the output:
//!
//! | request                 | output                           |
//! |-------------------------|----------------------------------|
//! | `Returning::None`       | `BatchOutput::None`              |
//! | `Returning::Scalar(c)`  | `BatchOutput::Scalars` (one per row) |
//! | `Returning::Columns(cs)`| `BatchOutput::Records` with `cs` |
//! | `Returning::All`        | `BatchOutput::Records`, all columns |

use serde::Serialize;
use serde_json::Value;

/// One input or output row: column name to value, in insertion order.
pub type Record = serde_json::Map<String, Value>;

/// Requested projection of a batch operation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum Returning {
    /// Return nothing.
    #[default]
    None,
    /// Return a flat list with this column's value for each row.
    Scalar(String),
    /// Return a record per row restricted to these columns.
    Columns(Vec<String>),
    /// Return a record per row with every table column.
    All,
}

impl Returning {
    /// Wildcard marker accepted by the `&str` conversion.
    pub const WILDCARD: &'static str = "*";

    pub fn scalar(column: impl Into<String>) -> Self {
        Self::Scalar(column.into())
    }

    /// Explicit column list. An empty list means [`Returning::None`].
    pub fn columns<I, S>(columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let columns: Vec<String> = columns.into_iter().map(Into::into).collect();
        if columns.is_empty() {
            Self::None
        } else {
            Self::Columns(columns)
        }
    }

    /// True when nothing is to be returned, including an empty column list.
    pub fn is_none(&self) -> bool {
        match self {
            Self::None => true,
            Self::Columns(columns) => columns.is_empty(),
            Self::Scalar(_) | Self::All => false,
        }
    }
}

impl From<&str> for Returning {
    fn from(value: &str) -> Self {
        if value == Self::WILDCARD {
            Self::All
        } else {
            Self::Scalar(value.to_string())
        }
    }
}

impl From<String> for Returning {
    fn from(value: String) -> Self {
        Self::from(value.as_str())
    }
}

impl From<&[&str]> for Returning {
    fn from(value: &[&str]) -> Self {
        Self::columns(value.iter().copied())
    }
}

impl<const N: usize> From<[&str; N]> for Returning {
    fn from(value: [&str; N]) -> Self {
        Self::columns(value)
    }
}

impl From<Vec<String>> for Returning {
    fn from(value: Vec<String>) -> Self {
        Self::columns(value)
    }
}

impl From<Vec<&str>> for Returning {
    fn from(value: Vec<&str>) -> Self {
        Self::columns(value)
    }
}

impl<T: Into<Returning>> From<Option<T>> for Returning {
    fn from(value: Option<T>) -> Self {
        value.map_or(Self::None, Into::into)
    }
}

/// Result of a batch operation, shaped by the [`Returning`] request.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum BatchOutput {
    /// Nothing was requested.
    None,
    /// One value per input row.
    Scalars(Vec<Value>),
    /// One record per input row.
    Records(Vec<Record>),
}

impl BatchOutput {
    pub fn is_none(&self) -> bool {
        matches!(self, Self::None)
    }

    /// Number of rows in the output (0 for `None`).
    pub fn len(&self) -> usize {
        match self {
            Self::None => 0,
            Self::Scalars(values) => values.len(),
            Self::Records(records) => records.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// The scalar values, if this is a scalar output.
    pub fn into_scalars(self) -> Option<Vec<Value>> {
        match self {
            Self::Scalars(values) => Some(values),
            _ => None,
        }
    }

    /// The records, if this is a record output.
    pub fn into_records(self) -> Option<Vec<Record>> {
        match self {
            Self::Records(records) => Some(records),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn conversions_pick_the_right_tag() {
        assert_eq!(Returning::from("*"), Returning::All);
        assert_eq!(Returning::from("id"), Returning::scalar("id"));
        assert_eq!(
            Returning::from(["id", "data"]),
            Returning::Columns(vec!["id".into(), "data".into()])
        );
        assert_eq!(Returning::from(["id"]), Returning::Columns(vec!["id".into()]));
        assert_eq!(Returning::from(Vec::<String>::new()), Returning::None);
        assert_eq!(Returning::from(None::<&str>), Returning::None);
        assert_eq!(Returning::from(Some("id")), Returning::scalar("id"));
    }

    #[test]
    fn empty_column_list_counts_as_none() {
        assert!(Returning::Columns(Vec::new()).is_none());
        assert!(!Returning::All.is_none());
        assert!(!Returning::scalar("id").is_none());
    }

    #[test]
    fn output_serializes_without_tags() {
        let out = BatchOutput::Scalars(vec![json!(1), json!(2)]);
        assert_eq!(serde_json::to_value(&out).unwrap(), json!([1, 2]));
        assert_eq!(serde_json::to_value(BatchOutput::None).unwrap(), json!(null));
    }

    #[test]
    fn output_accessors() {
        let out = BatchOutput::Scalars(vec![json!(1)]);
        assert_eq!(out.len(), 1);
        assert!(out.clone().into_records().is_none());
        assert_eq!(out.into_scalars(), Some(vec![json!(1)]));
        assert!(BatchOutput::None.is_empty());
    }
}
