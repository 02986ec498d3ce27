use crate::store::{StoreError, StoreResult};
use serde::{Deserialize, Serialize};

pub type RowId = i64;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum SqlValue {
    Null,
    Bool(bool),
    Integer(i64),
    Real(f64),
    Text(String),
}

impl SqlValue {
    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Self::Integer(value) => Some(*value),
            Self::Bool(value) => Some(i64::from(*value)),
            Self::Real(value) => Some(*value as i64),
            Self::Text(value) => value.parse().ok(),
            Self::Null => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Text(value) => Some(value.as_str()),
            _ => None,
        }
    }

    /// Loose equality used for key matching: integers and booleans compare by value
    /// so that a bool flag and its stored 0/1 representation match.
    pub fn matches(&self, other: &SqlValue) -> bool {
        match (self, other) {
            (Self::Null, Self::Null) => true,
            (Self::Text(a), Self::Text(b)) => a == b,
            (Self::Real(a), Self::Real(b)) => a == b,
            (a, b) => match (a.as_integer_like(), b.as_integer_like()) {
                (Some(a), Some(b)) => a == b,
                _ => false,
            },
        }
    }

    fn as_integer_like(&self) -> Option<i64> {
        match self {
            Self::Integer(value) => Some(*value),
            Self::Bool(value) => Some(i64::from(*value)),
            _ => None,
        }
    }
}

impl From<&str> for SqlValue {
    fn from(value: &str) -> Self {
        Self::Text(value.to_string())
    }
}

impl From<String> for SqlValue {
    fn from(value: String) -> Self {
        Self::Text(value)
    }
}

impl From<i64> for SqlValue {
    fn from(value: i64) -> Self {
        Self::Integer(value)
    }
}

impl From<u32> for SqlValue {
    fn from(value: u32) -> Self {
        Self::Integer(i64::from(value))
    }
}

impl From<bool> for SqlValue {
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}

impl From<f64> for SqlValue {
    fn from(value: f64) -> Self {
        Self::Real(value)
    }
}

impl<T> From<Option<T>> for SqlValue
where
    T: Into<SqlValue>,
{
    fn from(value: Option<T>) -> Self {
        value.map(Into::into).unwrap_or(Self::Null)
    }
}

/// An ordered column/value list. Column order is preserved into generated SQL.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Record {
    columns: Vec<(String, SqlValue)>,
}

impl Record {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, column: &str, value: impl Into<SqlValue>) -> Self {
        self.set(column, value);
        self
    }

    pub fn set(&mut self, column: &str, value: impl Into<SqlValue>) {
        let value = value.into();
        match self.columns.iter_mut().find(|(name, _)| name == column) {
            Some(slot) => slot.1 = value,
            None => self.columns.push((column.to_string(), value)),
        }
    }

    pub fn get(&self, column: &str) -> Option<&SqlValue> {
        self.columns
            .iter()
            .find(|(name, _)| name == column)
            .map(|(_, value)| value)
    }

    pub fn columns(&self) -> impl Iterator<Item = &str> {
        self.columns.iter().map(|(name, _)| name.as_str())
    }

    pub fn values(&self) -> impl Iterator<Item = &SqlValue> {
        self.columns.iter().map(|(_, value)| value)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &SqlValue)> {
        self.columns.iter().map(|(name, value)| (name.as_str(), value))
    }

    pub fn len(&self) -> usize {
        self.columns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }

    /// Projects the record onto `key_fields`, failing when a key column is absent.
    pub fn project(&self, key_fields: &[&str]) -> Option<Record> {
        let mut projected = Record::new();
        for key in key_fields {
            projected.set(key, self.get(key)?.clone());
        }
        Some(projected)
    }

    /// True when every column of `filter` is present here with a matching value.
    pub fn satisfies(&self, filter: &Record) -> bool {
        filter.iter().all(|(column, expected)| {
            self.get(column)
                .map(|actual| actual.matches(expected))
                .unwrap_or_else(|| expected.is_null())
        })
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct StoredRow {
    pub id: RowId,
    pub record: Record,
}

/// Encodes a string list the way list-valued columns are stored.
pub fn encode_list(values: &[String]) -> String {
    serde_json::to_string(values).unwrap_or_else(|_| "[]".to_string())
}

pub fn decode_list(raw: &str) -> StoreResult<Vec<String>> {
    serde_json::from_str(raw)
        .map_err(|error| StoreError::Serialization(format!("stored list '{raw}': {error}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn record_set_existing_column_expected_value_replaced_in_place() {
        let mut record = Record::new().with("name", "a").with("status", "PASS");
        record.set("name", "b");

        assert_eq!(record.columns().collect::<Vec<_>>(), vec!["name", "status"]);
        assert_eq!(record.get("name"), Some(&SqlValue::from("b")));
    }

    #[test]
    fn record_project_missing_key_expected_none() {
        let record = Record::new().with("full_name", "Suite");

        assert!(record.project(&["repository", "full_name"]).is_none());
        assert_eq!(
            record.project(&["full_name"]),
            Some(Record::new().with("full_name", "Suite"))
        );
    }

    #[test]
    fn sql_value_bool_and_integer_expected_matching_keys() {
        assert!(SqlValue::Bool(true).matches(&SqlValue::Integer(1)));
        assert!(!SqlValue::Text("1".to_string()).matches(&SqlValue::Integer(1)));
        assert!(SqlValue::from(None::<i64>).matches(&SqlValue::Null));
    }

    #[test]
    fn list_encoding_expected_json_array_text() {
        let encoded = encode_list(&["${x}".to_string(), "1".to_string()]);

        assert_eq!(encoded, r#"["${x}","1"]"#);
        assert_eq!(
            decode_list(&encoded).expect("decode"),
            vec!["${x}".to_string(), "1".to_string()]
        );
    }
}
