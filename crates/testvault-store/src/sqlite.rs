use crate::schema::{self, SchemaPolicy};
use crate::store::{ArchiveStore, StoreError, StoreResult};
use crate::types::{Record, RowId, SqlValue};
use rusqlite::types::Value;
use rusqlite::{Connection, ErrorCode, OptionalExtension, params_from_iter};
use std::path::Path;
use std::sync::{Mutex, MutexGuard};

/// SQLite-backed [`ArchiveStore`].
///
/// The connection sits behind a mutex so one store can be shared across listeners; every
/// gateway call holds the lock for the duration of its statements.
#[derive(Debug)]
pub struct SqliteArchiveStore {
    connection: Mutex<Connection>,
}

impl SqliteArchiveStore {
    pub fn open(path: impl AsRef<Path>) -> StoreResult<Self> {
        let connection = Connection::open(path.as_ref()).map_err(|error| {
            StoreError::Backend(format!(
                "failed to open archive database {}: {error}",
                path.as_ref().display()
            ))
        })?;
        Self::from_connection(connection)
    }

    pub fn open_in_memory() -> StoreResult<Self> {
        let connection = Connection::open_in_memory().map_err(backend_error)?;
        Self::from_connection(connection)
    }

    fn from_connection(connection: Connection) -> StoreResult<Self> {
        connection
            .execute_batch("PRAGMA foreign_keys = ON;")
            .map_err(backend_error)?;
        connection
            .execute_batch(schema::SCHEMA_UPDATES_TABLE_SQL)
            .map_err(backend_error)?;
        Ok(Self {
            connection: Mutex::new(connection),
        })
    }

    fn connection(&self) -> StoreResult<MutexGuard<'_, Connection>> {
        self.connection
            .lock()
            .map_err(|_| StoreError::Backend("sqlite archive store mutex poisoned".to_string()))
    }

    /// Brings the database up to the current schema version.
    ///
    /// A fresh database receives every update. Pending updates on an existing database run
    /// only when `policy` permits all of them; a database written by a newer archiver is
    /// rejected outright. Returns the schema version in effect afterwards.
    pub fn check_and_update_schema(&self, policy: SchemaPolicy, applied_by: &str) -> StoreResult<u32> {
        let current = schema::current_schema_version();
        let mut connection = self.connection()?;
        let latest: Option<u32> = connection
            .query_row("SELECT MAX(schema_version) FROM schema_updates", [], |row| {
                row.get(0)
            })
            .map_err(backend_error)?;

        let fresh = latest.is_none();
        let latest = latest.unwrap_or(0);
        if latest > current {
            let required: Option<String> = connection
                .query_row(
                    "SELECT applied_by FROM schema_updates WHERE schema_version = ?1",
                    [latest],
                    |row| row.get(0),
                )
                .optional()
                .map_err(backend_error)?
                .flatten();
            return Err(StoreError::SchemaCompatibility(format!(
                "database schema version {latest} is newer than supported version {current}; \
                 archive with {} or newer",
                required.unwrap_or_else(|| "a newer archiver".to_string())
            )));
        }

        let pending: Vec<_> = schema::SCHEMA_UPDATES_LIST
            .iter()
            .filter(|update| update.version > latest)
            .collect();
        if pending.is_empty() {
            return Ok(latest);
        }
        if !fresh {
            if let Some(blocked) = pending.iter().find(|update| !policy.permits(update)) {
                let flag = if blocked.minor {
                    "--allow-minor-schema-updates"
                } else {
                    "--allow-major-schema-updates"
                };
                return Err(StoreError::SchemaCompatibility(format!(
                    "database schema version {latest} requires update {} ({}); rerun with {flag}",
                    blocked.version, blocked.description
                )));
            }
        }

        let transaction = connection.transaction().map_err(backend_error)?;
        for update in pending {
            tracing::info!(
                version = update.version,
                minor = update.minor,
                description = update.description,
                "applying archive schema update"
            );
            transaction
                .execute_batch(update.sql)
                .map_err(backend_error)?;
            transaction
                .execute(
                    "INSERT INTO schema_updates (schema_version, initial_update, applied_by) \
                     VALUES (?1, ?2, ?3)",
                    rusqlite::params![update.version, fresh, applied_by],
                )
                .map_err(backend_error)?;
        }
        transaction.commit().map_err(backend_error)?;
        Ok(current)
    }

    fn lookup(
        connection: &Connection,
        table: &str,
        record: &Record,
        key_fields: &[&str],
    ) -> StoreResult<Option<RowId>> {
        let key = record.project(key_fields).ok_or_else(|| {
            StoreError::InvalidInput(format!(
                "record for '{table}' is missing key fields {key_fields:?}"
            ))
        })?;
        let (clause, params) = where_clause(&key)?;
        let sql = format!("SELECT id FROM {} {clause} ORDER BY id LIMIT 1", ident(table)?);
        connection
            .query_row(&sql, params_from_iter(params), |row| row.get(0))
            .optional()
            .map_err(|error| map_error(table, error))
    }

    fn insert_with(connection: &Connection, table: &str, record: &Record) -> StoreResult<RowId> {
        if record.is_empty() {
            return Err(StoreError::InvalidInput(format!(
                "cannot insert an empty record into '{table}'"
            )));
        }
        let columns = record
            .columns()
            .map(ident)
            .collect::<StoreResult<Vec<_>>>()?;
        let placeholders: Vec<String> = (1..=columns.len()).map(|n| format!("?{n}")).collect();
        let sql = format!(
            "INSERT INTO {} ({}) VALUES ({})",
            ident(table)?,
            columns.join(", "),
            placeholders.join(", ")
        );
        connection
            .execute(&sql, params_from_iter(record.values().map(to_value)))
            .map_err(|error| map_error(table, error))?;
        Ok(connection.last_insert_rowid())
    }
}

impl ArchiveStore for SqliteArchiveStore {
    fn insert_and_return_id(
        &self,
        table: &str,
        record: &Record,
        key_fields: &[&str],
    ) -> StoreResult<RowId> {
        let connection = self.connection()?;
        if key_fields.is_empty() {
            return Self::insert_with(&connection, table, record);
        }
        match Self::insert_with(&connection, table, record) {
            Ok(id) => Ok(id),
            Err(error) if error.is_integrity() => {
                Self::lookup(&connection, table, record, key_fields)?.ok_or(error)
            }
            Err(error) => Err(error),
        }
    }

    fn return_id_or_insert_and_return_id(
        &self,
        table: &str,
        record: &Record,
        key_fields: &[&str],
    ) -> StoreResult<RowId> {
        let connection = self.connection()?;
        if let Some(id) = Self::lookup(&connection, table, record, key_fields)? {
            return Ok(id);
        }
        Self::insert_with(&connection, table, record)
    }

    fn insert_or_ignore(
        &self,
        table: &str,
        record: &Record,
        key_fields: &[&str],
    ) -> StoreResult<()> {
        let connection = self.connection()?;
        if !key_fields.is_empty()
            && Self::lookup(&connection, table, record, key_fields)?.is_some()
        {
            return Ok(());
        }
        match Self::insert_with(&connection, table, record) {
            Ok(_) => Ok(()),
            Err(error) if error.is_integrity() => Ok(()),
            Err(error) => Err(error),
        }
    }

    fn insert(&self, table: &str, record: &Record) -> StoreResult<RowId> {
        let connection = self.connection()?;
        Self::insert_with(&connection, table, record)
    }

    fn update(&self, table: &str, values: &Record, key_values: &Record) -> StoreResult<usize> {
        if values.is_empty() {
            return Ok(0);
        }
        let mut assignments = Vec::with_capacity(values.len());
        let mut params: Vec<Value> = Vec::with_capacity(values.len() + key_values.len());
        for (column, value) in values.iter() {
            params.push(to_value(value));
            assignments.push(format!("{} = ?{}", ident(column)?, params.len()));
        }
        let mut conditions = Vec::with_capacity(key_values.len());
        for (column, value) in key_values.iter() {
            params.push(to_value(value));
            conditions.push(format!("{} IS ?{}", ident(column)?, params.len()));
        }
        let mut sql = format!("UPDATE {} SET {}", ident(table)?, assignments.join(", "));
        if !conditions.is_empty() {
            sql.push_str(" WHERE ");
            sql.push_str(&conditions.join(" AND "));
        }

        let connection = self.connection()?;
        connection
            .execute(&sql, params_from_iter(params))
            .map_err(|error| map_error(table, error))
    }

    fn max_value(&self, table: &str, column: &str, filter: &Record) -> StoreResult<Option<i64>> {
        let (clause, params) = where_clause(filter)?;
        let sql = format!("SELECT MAX({}) FROM {} {clause}", ident(column)?, ident(table)?);
        let connection = self.connection()?;
        connection
            .query_row(&sql, params_from_iter(params), |row| row.get(0))
            .map_err(|error| map_error(table, error))
    }

    fn fetch_one_value(
        &self,
        table: &str,
        column: &str,
        filter: &Record,
    ) -> StoreResult<Option<SqlValue>> {
        let (clause, params) = where_clause(filter)?;
        let sql = format!(
            "SELECT {} FROM {} {clause} ORDER BY id LIMIT 1",
            ident(column)?,
            ident(table)?
        );
        let connection = self.connection()?;
        connection
            .query_row(&sql, params_from_iter(params), |row| {
                row.get::<_, Value>(0).map(from_value)
            })
            .optional()
            .map_err(|error| map_error(table, error))
    }

    fn fetch_rows(
        &self,
        table: &str,
        columns: &[&str],
        filter: &Record,
        order_by: Option<&str>,
    ) -> StoreResult<Vec<Record>> {
        if columns.is_empty() {
            return Ok(Vec::new());
        }
        let selected = columns
            .iter()
            .map(|column| ident(column))
            .collect::<StoreResult<Vec<_>>>()?;
        let (clause, params) = where_clause(filter)?;
        let order = match order_by {
            Some(column) => format!("ORDER BY {}, id", ident(column)?),
            None => "ORDER BY id".to_string(),
        };
        let sql = format!(
            "SELECT {} FROM {} {clause} {order}",
            selected.join(", "),
            ident(table)?
        );

        let connection = self.connection()?;
        let mut statement = connection
            .prepare(&sql)
            .map_err(|error| map_error(table, error))?;
        let rows = statement
            .query_map(params_from_iter(params), |row| {
                let mut record = Record::new();
                for (index, column) in columns.iter().enumerate() {
                    record.set(column, from_value(row.get::<_, Value>(index)?));
                }
                Ok(record)
            })
            .map_err(|error| map_error(table, error))?;
        rows.collect::<Result<Vec<_>, _>>()
            .map_err(|error| map_error(table, error))
    }

    fn begin(&self) -> StoreResult<()> {
        self.connection()?
            .execute_batch("BEGIN")
            .map_err(backend_error)
    }

    fn commit(&self) -> StoreResult<()> {
        let connection = self.connection()?;
        if connection.is_autocommit() {
            return Ok(());
        }
        connection.execute_batch("COMMIT").map_err(backend_error)
    }

    fn rollback(&self) -> StoreResult<()> {
        let connection = self.connection()?;
        if connection.is_autocommit() {
            return Ok(());
        }
        connection.execute_batch("ROLLBACK").map_err(backend_error)
    }

    fn schema_version(&self) -> StoreResult<u32> {
        let connection = self.connection()?;
        let latest: Option<u32> = connection
            .query_row("SELECT MAX(schema_version) FROM schema_updates", [], |row| {
                row.get(0)
            })
            .map_err(backend_error)?;
        Ok(latest.unwrap_or(0))
    }
}

/// Quotes a table or column name, rejecting anything that is not a plain identifier.
fn ident(name: &str) -> StoreResult<String> {
    let valid = !name.is_empty()
        && name
            .chars()
            .all(|ch| ch.is_ascii_alphanumeric() || ch == '_');
    if !valid {
        return Err(StoreError::InvalidInput(format!(
            "invalid identifier '{name}'"
        )));
    }
    Ok(format!("\"{name}\""))
}

fn where_clause(filter: &Record) -> StoreResult<(String, Vec<Value>)> {
    if filter.is_empty() {
        return Ok((String::new(), Vec::new()));
    }
    let mut conditions = Vec::with_capacity(filter.len());
    let mut params = Vec::with_capacity(filter.len());
    for (column, value) in filter.iter() {
        params.push(to_value(value));
        conditions.push(format!("{} IS ?{}", ident(column)?, params.len()));
    }
    Ok((format!("WHERE {}", conditions.join(" AND ")), params))
}

fn to_value(value: &SqlValue) -> Value {
    match value {
        SqlValue::Null => Value::Null,
        SqlValue::Bool(flag) => Value::Integer(i64::from(*flag)),
        SqlValue::Integer(number) => Value::Integer(*number),
        SqlValue::Real(number) => Value::Real(*number),
        SqlValue::Text(text) => Value::Text(text.clone()),
    }
}

fn from_value(value: Value) -> SqlValue {
    match value {
        Value::Null => SqlValue::Null,
        Value::Integer(number) => SqlValue::Integer(number),
        Value::Real(number) => SqlValue::Real(number),
        Value::Text(text) => SqlValue::Text(text),
        Value::Blob(bytes) => SqlValue::Text(String::from_utf8_lossy(&bytes).into_owned()),
    }
}

fn map_error(table: &str, error: rusqlite::Error) -> StoreError {
    match &error {
        rusqlite::Error::SqliteFailure(failure, message)
            if failure.code == ErrorCode::ConstraintViolation =>
        {
            StoreError::Integrity {
                table: table.to_string(),
                message: message.clone().unwrap_or_else(|| error.to_string()),
            }
        }
        _ => StoreError::Backend(format!("{table}: {error}")),
    }
}

fn backend_error(error: rusqlite::Error) -> StoreError {
    StoreError::Backend(error.to_string())
}
