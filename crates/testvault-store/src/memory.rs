use crate::schema::{self, TableSpec};
use crate::store::{ArchiveStore, StoreError, StoreResult};
use crate::types::{Record, RowId, SqlValue, StoredRow};
use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard};

#[derive(Clone, Debug, Default)]
pub(crate) struct MemoryTable {
    next_id: RowId,
    rows: Vec<StoredRow>,
}

impl MemoryTable {
    fn allocate_id(&mut self) -> RowId {
        if self.next_id == 0 {
            self.next_id = 1;
        }
        let id = self.next_id;
        self.next_id += 1;
        id
    }

    fn find(&self, filter: &Record) -> Option<&StoredRow> {
        self.rows.iter().find(|row| row_matches(row, filter))
    }
}

#[derive(Clone, Debug, Default)]
pub(crate) struct MemoryState {
    tables: BTreeMap<String, MemoryTable>,
    savepoint: Option<BTreeMap<String, MemoryTable>>,
}

impl MemoryState {
    fn spec(table: &str) -> StoreResult<&'static TableSpec> {
        schema::table_spec(table)
            .ok_or_else(|| StoreError::InvalidInput(format!("unknown table '{table}'")))
    }

    fn table(&self, table: &str) -> StoreResult<Option<&MemoryTable>> {
        Self::spec(table)?;
        Ok(self.tables.get(table))
    }

    fn lookup(&self, table: &str, record: &Record, key_fields: &[&str]) -> StoreResult<Option<RowId>> {
        let Some(key) = record.project(key_fields) else {
            return Err(StoreError::InvalidInput(format!(
                "record for '{table}' is missing key fields {key_fields:?}"
            )));
        };
        Ok(self
            .table(table)?
            .and_then(|rows| rows.find(&key))
            .map(|row| row.id))
    }

    fn insert(&mut self, table: &str, record: &Record) -> StoreResult<RowId> {
        let spec = Self::spec(table)?;
        for column in spec.required {
            if record.get(column).is_none_or(SqlValue::is_null) {
                return Err(StoreError::Integrity {
                    table: table.to_string(),
                    message: format!("NOT NULL constraint failed: {table}.{column}"),
                });
            }
        }

        for (column, parent) in spec.references {
            let Some(value) = record.get(column).filter(|value| !value.is_null()) else {
                continue;
            };
            let exists = value.as_i64().is_some_and(|id| {
                self.tables
                    .get(*parent)
                    .is_some_and(|rows| rows.rows.iter().any(|row| row.id == id))
            });
            if !exists {
                return Err(StoreError::Integrity {
                    table: table.to_string(),
                    message: format!("FOREIGN KEY constraint failed: {table}.{column} -> {parent}"),
                });
            }
        }

        let rows = self.tables.entry(table.to_string()).or_default();
        for unique in spec.unique_keys {
            // NULL never collides with NULL in a unique index.
            let Some(key) = record.project(unique) else {
                continue;
            };
            if key.values().any(SqlValue::is_null) {
                continue;
            }
            if rows.find(&key).is_some() {
                return Err(StoreError::Integrity {
                    table: table.to_string(),
                    message: format!("UNIQUE constraint failed: {table}({})", unique.join(", ")),
                });
            }
        }

        let id = rows.allocate_id();
        rows.rows.push(StoredRow {
            id,
            record: record.clone(),
        });
        Ok(id)
    }
}

/// Process-local [`ArchiveStore`] used for tests and throwaway archives.
///
/// Enforces the same unique keys, required columns and foreign keys as the SQLite schema.
#[derive(Clone, Debug, Default)]
pub struct MemoryArchiveStore {
    inner: Arc<Mutex<MemoryState>>,
}

impl MemoryArchiveStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> StoreResult<MutexGuard<'_, MemoryState>> {
        self.inner
            .lock()
            .map_err(|_| StoreError::Backend("memory archive store mutex poisoned".to_string()))
    }

    /// All rows of `table` in insertion order.
    pub fn rows(&self, table: &str) -> StoreResult<Vec<StoredRow>> {
        let state = self.state()?;
        Ok(state
            .table(table)?
            .map(|rows| rows.rows.clone())
            .unwrap_or_default())
    }

    pub fn row_count(&self, table: &str) -> StoreResult<usize> {
        let state = self.state()?;
        Ok(state.table(table)?.map(|rows| rows.rows.len()).unwrap_or(0))
    }
}

impl ArchiveStore for MemoryArchiveStore {
    fn insert_and_return_id(
        &self,
        table: &str,
        record: &Record,
        key_fields: &[&str],
    ) -> StoreResult<RowId> {
        let mut state = self.state()?;
        if key_fields.is_empty() {
            return state.insert(table, record);
        }
        match state.lookup(table, record, key_fields)? {
            Some(id) => Ok(id),
            None => state.insert(table, record),
        }
    }

    fn return_id_or_insert_and_return_id(
        &self,
        table: &str,
        record: &Record,
        key_fields: &[&str],
    ) -> StoreResult<RowId> {
        let mut state = self.state()?;
        if let Some(id) = state.lookup(table, record, key_fields)? {
            return Ok(id);
        }
        state.insert(table, record)
    }

    fn insert_or_ignore(
        &self,
        table: &str,
        record: &Record,
        key_fields: &[&str],
    ) -> StoreResult<()> {
        let mut state = self.state()?;
        if !key_fields.is_empty() && state.lookup(table, record, key_fields)?.is_some() {
            return Ok(());
        }
        match state.insert(table, record) {
            Ok(_) => Ok(()),
            Err(error) if error.is_integrity() => Ok(()),
            Err(error) => Err(error),
        }
    }

    fn insert(&self, table: &str, record: &Record) -> StoreResult<RowId> {
        self.state()?.insert(table, record)
    }

    fn update(&self, table: &str, values: &Record, key_values: &Record) -> StoreResult<usize> {
        let mut state = self.state()?;
        MemoryState::spec(table)?;
        let Some(rows) = state.tables.get_mut(table) else {
            return Ok(0);
        };
        let mut updated = 0;
        for row in rows
            .rows
            .iter_mut()
            .filter(|row| row_matches(row, key_values))
        {
            for (column, value) in values.iter() {
                row.record.set(column, value.clone());
            }
            updated += 1;
        }
        Ok(updated)
    }

    fn max_value(&self, table: &str, column: &str, filter: &Record) -> StoreResult<Option<i64>> {
        let state = self.state()?;
        Ok(state.table(table)?.and_then(|rows| {
            rows.rows
                .iter()
                .filter(|row| row_matches(row, filter))
                .filter_map(|row| row.record.get(column).and_then(SqlValue::as_i64))
                .max()
        }))
    }

    fn fetch_one_value(
        &self,
        table: &str,
        column: &str,
        filter: &Record,
    ) -> StoreResult<Option<SqlValue>> {
        let state = self.state()?;
        Ok(state.table(table)?.and_then(|rows| rows.find(filter))
            .map(|row| column_value(row, column)))
    }

    fn fetch_rows(
        &self,
        table: &str,
        columns: &[&str],
        filter: &Record,
        order_by: Option<&str>,
    ) -> StoreResult<Vec<Record>> {
        let state = self.state()?;
        let Some(rows) = state.table(table)? else {
            return Ok(Vec::new());
        };
        let mut matching: Vec<&StoredRow> = rows
            .rows
            .iter()
            .filter(|row| row_matches(row, filter))
            .collect();
        if let Some(order_column) = order_by {
            matching.sort_by(|left, right| {
                compare_values(
                    &column_value(left, order_column),
                    &column_value(right, order_column),
                )
            });
        }
        Ok(matching
            .into_iter()
            .map(|row| {
                columns.iter().fold(Record::new(), |record, column| {
                    record.with(column, column_value(row, column))
                })
            })
            .collect())
    }

    fn begin(&self) -> StoreResult<()> {
        let mut state = self.state()?;
        if state.savepoint.is_some() {
            return Err(StoreError::InvalidInput(
                "transaction already in progress".to_string(),
            ));
        }
        state.savepoint = Some(state.tables.clone());
        Ok(())
    }

    fn commit(&self) -> StoreResult<()> {
        self.state()?.savepoint = None;
        Ok(())
    }

    fn rollback(&self) -> StoreResult<()> {
        let mut state = self.state()?;
        if let Some(tables) = state.savepoint.take() {
            state.tables = tables;
        }
        Ok(())
    }

    fn schema_version(&self) -> StoreResult<u32> {
        Ok(schema::current_schema_version())
    }
}

fn row_matches(row: &StoredRow, filter: &Record) -> bool {
    filter.iter().all(|(column, expected)| {
        if column == "id" {
            expected.matches(&SqlValue::Integer(row.id))
        } else {
            row.record
                .get(column)
                .map(|actual| actual.matches(expected))
                .unwrap_or_else(|| expected.is_null())
        }
    })
}

fn column_value(row: &StoredRow, column: &str) -> SqlValue {
    if column == "id" {
        return SqlValue::Integer(row.id);
    }
    row.record.get(column).cloned().unwrap_or(SqlValue::Null)
}

/// SQLite ordering: NULL sorts first, numbers before text.
fn compare_values(left: &SqlValue, right: &SqlValue) -> Ordering {
    fn rank(value: &SqlValue) -> u8 {
        match value {
            SqlValue::Null => 0,
            SqlValue::Bool(_) | SqlValue::Integer(_) | SqlValue::Real(_) => 1,
            SqlValue::Text(_) => 2,
        }
    }
    match (left, right) {
        (SqlValue::Text(a), SqlValue::Text(b)) => a.cmp(b),
        (SqlValue::Real(a), SqlValue::Real(b)) => a.partial_cmp(b).unwrap_or(Ordering::Equal),
        (a, b) if rank(a) == 1 && rank(b) == 1 => {
            a.as_i64().unwrap_or_default().cmp(&b.as_i64().unwrap_or_default())
        }
        (a, b) => rank(a).cmp(&rank(b)),
    }
}
