use crate::types::{Record, RowId, SqlValue};
use std::sync::Arc;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("resource not found: {resource} ({id})")]
    NotFound { resource: &'static str, id: String },

    #[error("integrity violation on '{table}': {message}")]
    Integrity { table: String, message: String },

    #[error("schema incompatibility: {0}")]
    SchemaCompatibility(String),

    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("serialization failed: {0}")]
    Serialization(String),

    #[error("backend failure: {0}")]
    Backend(String),
}

impl StoreError {
    pub fn is_integrity(&self) -> bool {
        matches!(self, Self::Integrity { .. })
    }
}

pub type StoreResult<T> = Result<T, StoreError>;

pub type SharedArchiveStore = Arc<dyn ArchiveStore>;

/// Key-based persistence primitives consumed by the archiving engine.
///
/// Every operation names a table and works on ordered column/value records. Key field lists
/// name the columns that identify a row for upsert and lookup purposes.
pub trait ArchiveStore: Send + Sync {
    /// Inserts `record` unless a row with the same `key_fields` exists, then returns the id of
    /// the stored row. With no key fields the id of the freshly inserted row is returned.
    fn insert_and_return_id(
        &self,
        table: &str,
        record: &Record,
        key_fields: &[&str],
    ) -> StoreResult<RowId>;

    /// Looks the row up by `key_fields` first and only inserts when it is missing.
    fn return_id_or_insert_and_return_id(
        &self,
        table: &str,
        record: &Record,
        key_fields: &[&str],
    ) -> StoreResult<RowId>;

    fn insert_or_ignore(&self, table: &str, record: &Record, key_fields: &[&str])
    -> StoreResult<()>;

    /// Plain insert. Unique and not-null violations surface as [`StoreError::Integrity`].
    fn insert(&self, table: &str, record: &Record) -> StoreResult<RowId>;

    /// Sets `values` on every row matching `key_values`; returns the affected row count.
    fn update(&self, table: &str, values: &Record, key_values: &Record) -> StoreResult<usize>;

    fn max_value(&self, table: &str, column: &str, filter: &Record) -> StoreResult<Option<i64>>;

    fn fetch_one_value(
        &self,
        table: &str,
        column: &str,
        filter: &Record,
    ) -> StoreResult<Option<SqlValue>>;

    /// Read-side accessor returning the requested columns of matching rows, ordered by
    /// `order_by` when given.
    fn fetch_rows(
        &self,
        table: &str,
        columns: &[&str],
        filter: &Record,
        order_by: Option<&str>,
    ) -> StoreResult<Vec<Record>>;

    fn begin(&self) -> StoreResult<()>;

    fn commit(&self) -> StoreResult<()>;

    fn rollback(&self) -> StoreResult<()>;

    /// Schema version the store currently carries.
    fn schema_version(&self) -> StoreResult<u32>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn store_error_not_found_expected_metadata() {
        let error = StoreError::NotFound {
            resource: "suite",
            id: "42".to_string(),
        };

        assert!(matches!(
            error,
            StoreError::NotFound {
                resource: "suite",
                ..
            }
        ));
        assert_eq!(error.to_string(), "resource not found: suite (42)");
    }

    #[test]
    fn store_error_integrity_expected_distinguished() {
        let error = StoreError::Integrity {
            table: "suite_result".to_string(),
            message: "UNIQUE constraint failed".to_string(),
        };

        assert!(error.is_integrity());
        assert!(!StoreError::Backend("io".to_string()).is_integrity());
    }
}
