// ============================================================================
// SQLite Driver
// ============================================================================
//
// Isolation levels map onto SQLite's transaction behaviours:
//
//   read_uncommitted / read_committed / snapshot  -> BEGIN DEFERRED
//   repeatable_read                                -> BEGIN IMMEDIATE
//   serializable                                   -> BEGIN EXCLUSIVE
//
// SQLITE_BUSY and SQLITE_LOCKED are reported as transient conflicts, so a
// write that loses a lock race is retried by `RetryingExecutor`.
//
// ============================================================================

use super::Driver;
use crate::command::{Command, CommandKind, Execution};
use crate::connection::config::ConnectionConfig;
use crate::connection::{Connection, IsolationLevel};
use crate::core::value::TIMESTAMP_FORMAT;
use crate::core::{DbError, FailureKind, Result, Value};
use crate::reader::{BufferedCursor, RowCursor};
use rusqlite::types::{Value as SqlValue, ValueRef};
use rusqlite::{ErrorCode, InterruptHandle, OpenFlags, Statement};
use tracing::{debug, warn};

#[derive(Debug, Clone, Copy, Default)]
pub struct SqliteDriver;

impl SqliteDriver {
    pub fn new() -> Self {
        Self
    }
}

impl Driver for SqliteDriver {
    type Connection = SqliteConnection;

    fn name(&self) -> &'static str {
        "sqlite"
    }

    fn create_connection(&self, config: &ConnectionConfig) -> Result<SqliteConnection> {
        config.validate()?;
        Ok(SqliteConnection::new(config.clone()))
    }
}

/// A single SQLite connection
///
/// # Examples
///
/// ```ignore
/// let mut conn = SqliteConnection::new(ConnectionConfig::new("app.db").busy_timeout_ms(0));
/// conn.open()?;
/// conn.non_query("CREATE TABLE IF NOT EXISTS kv (k TEXT PRIMARY KEY, v TEXT)")?;
/// ```
pub struct SqliteConnection {
    config: ConnectionConfig,
    conn: Option<rusqlite::Connection>,
    transaction: Option<IsolationLevel>,
}

impl SqliteConnection {
    pub fn new(config: ConnectionConfig) -> Self {
        Self {
            config,
            conn: None,
            transaction: None,
        }
    }

    pub fn config(&self) -> &ConnectionConfig {
        &self.config
    }

    /// Handle that interrupts this connection's running statement from any thread
    pub fn interrupt_handle(&self) -> Result<InterruptHandle> {
        Ok(self.connection()?.get_interrupt_handle())
    }

    fn connection(&self) -> Result<&rusqlite::Connection> {
        self.conn
            .as_ref()
            .ok_or_else(|| DbError::ConnectionError("Connection is not open".into()))
    }

    fn open_flags(&self) -> OpenFlags {
        let access = if self.config.read_only {
            OpenFlags::SQLITE_OPEN_READ_ONLY
        } else if self.config.create_if_missing {
            OpenFlags::SQLITE_OPEN_READ_WRITE | OpenFlags::SQLITE_OPEN_CREATE
        } else {
            OpenFlags::SQLITE_OPEN_READ_WRITE
        };
        access | OpenFlags::SQLITE_OPEN_URI | OpenFlags::SQLITE_OPEN_NO_MUTEX
    }

    fn prepare<'c>(conn: &'c rusqlite::Connection, command: &Command) -> Result<Statement<'c>> {
        if command.kind() == CommandKind::StoredProcedure {
            return Err(DbError::UnsupportedOperation(
                "SQLite does not support stored procedures".into(),
            ));
        }

        if let Some(param) = command.parameters().iter().find(|p| p.direction.is_output()) {
            return Err(DbError::UnsupportedOperation(format!(
                "SQLite does not support output parameter '{}'",
                param.name
            )));
        }

        let mut stmt = conn.prepare(command.command_text()).map_err(map_error)?;
        for param in command.parameters() {
            let index = parameter_index(&stmt, &param.name)?;
            stmt.raw_bind_parameter(index, to_sql_value(&param.value))
                .map_err(map_error)?;
        }
        Ok(stmt)
    }
}

fn begin_statement(level: IsolationLevel) -> &'static str {
    match level {
        IsolationLevel::ReadUncommitted | IsolationLevel::ReadCommitted | IsolationLevel::Snapshot => {
            "BEGIN DEFERRED"
        }
        IsolationLevel::RepeatableRead => "BEGIN IMMEDIATE",
        IsolationLevel::Serializable => "BEGIN EXCLUSIVE",
    }
}

/// Find a named placeholder; a bare name matches `:name`, `@name` or `$name`
fn parameter_index(stmt: &Statement<'_>, name: &str) -> Result<usize> {
    let candidates: Vec<String> = if name.starts_with([':', '@', '$']) {
        vec![name.to_string()]
    } else {
        [':', '@', '$'].iter().map(|prefix| format!("{}{}", prefix, name)).collect()
    };

    for candidate in &candidates {
        if let Some(index) = stmt.parameter_index(candidate).map_err(map_error)? {
            return Ok(index);
        }
    }

    Err(DbError::ParameterNotFound(name.to_string()))
}

fn to_sql_value(value: &Value) -> SqlValue {
    match value {
        Value::Null => SqlValue::Null,
        Value::Integer(i) => SqlValue::Integer(*i),
        Value::Float(f) => SqlValue::Real(*f),
        Value::Text(s) => SqlValue::Text(s.clone()),
        Value::Boolean(b) => SqlValue::Integer(i64::from(*b)),
        Value::Blob(bytes) => SqlValue::Blob(bytes.clone()),
        Value::Timestamp(ts) => SqlValue::Text(ts.format(TIMESTAMP_FORMAT).to_string()),
        Value::Uuid(id) => SqlValue::Text(id.to_string()),
    }
}

fn from_sql_ref(value: ValueRef<'_>) -> Value {
    match value {
        ValueRef::Null => Value::Null,
        ValueRef::Integer(i) => Value::Integer(i),
        ValueRef::Real(f) => Value::Float(f),
        ValueRef::Text(bytes) => Value::Text(String::from_utf8_lossy(bytes).into_owned()),
        ValueRef::Blob(bytes) => Value::Blob(bytes.to_vec()),
    }
}

/// Classify a rusqlite failure; the extended result code becomes the error code
fn map_error(err: rusqlite::Error) -> DbError {
    match err {
        rusqlite::Error::SqliteFailure(failure, message) => {
            let kind = match failure.code {
                ErrorCode::DatabaseBusy | ErrorCode::DatabaseLocked => FailureKind::TransientConflict,
                _ => FailureKind::Other,
            };
            let message = message.unwrap_or_else(|| failure.to_string());
            DbError::database(failure.extended_code, message, kind)
        }
        other => DbError::ExecutionError(other.to_string()),
    }
}

impl Connection for SqliteConnection {
    fn open(&mut self) -> Result<()> {
        if self.conn.is_some() {
            return Ok(());
        }

        let conn = if self.config.is_in_memory() {
            rusqlite::Connection::open_in_memory()
        } else {
            rusqlite::Connection::open_with_flags(&self.config.database, self.open_flags())
        }
        .map_err(|e| DbError::ConnectionError(format!("{}: {}", self.config.database, e)))?;

        conn.busy_timeout(self.config.busy_timeout()).map_err(map_error)?;

        debug!(database = %self.config.database, read_only = self.config.read_only, "sqlite connection opened");
        self.conn = Some(conn);
        Ok(())
    }

    fn close(&mut self) -> Result<()> {
        let Some(conn) = self.conn.take() else {
            return Ok(());
        };

        if self.transaction.take().is_some() && !conn.is_autocommit() {
            if let Err(e) = conn.execute_batch("ROLLBACK") {
                warn!(error = %e, "rollback on close failed");
            }
        }

        conn.close().map_err(|(_, e)| map_error(e))?;
        debug!(database = %self.config.database, "sqlite connection closed");
        Ok(())
    }

    fn is_open(&self) -> bool {
        self.conn.is_some()
    }

    fn default_isolation_level(&self) -> IsolationLevel {
        self.config
            .default_isolation
            .unwrap_or(IsolationLevel::ReadCommitted)
    }

    fn begin_transaction(&mut self, level: IsolationLevel) -> Result<()> {
        if self.transaction.is_some() {
            return Err(DbError::InvalidOperation("Transaction already active".into()));
        }
        self.connection()?
            .execute_batch(begin_statement(level))
            .map_err(map_error)?;
        self.transaction = Some(level);
        Ok(())
    }

    fn commit(&mut self) -> Result<()> {
        if self.transaction.is_none() {
            return Err(DbError::InvalidOperation("No active transaction".into()));
        }
        self.connection()?.execute_batch("COMMIT").map_err(map_error)?;
        self.transaction = None;
        Ok(())
    }

    fn rollback(&mut self) -> Result<()> {
        if self.transaction.take().is_none() {
            return Err(DbError::InvalidOperation("No active transaction".into()));
        }
        let conn = self.connection()?;
        // SQLite may already have rolled back on its own after certain errors
        if conn.is_autocommit() {
            return Ok(());
        }
        conn.execute_batch("ROLLBACK").map_err(map_error)
    }

    fn in_transaction(&self) -> bool {
        self.transaction.is_some()
    }

    fn execute_non_query(&mut self, command: &Command) -> Result<Execution> {
        let mut stmt = Self::prepare(self.connection()?, command)?;
        let rows = stmt.raw_execute().map_err(map_error)?;
        Ok(Execution::new(rows as u64))
    }

    fn execute_scalar(&mut self, command: &Command) -> Result<Option<Value>> {
        let mut stmt = Self::prepare(self.connection()?, command)?;
        if stmt.column_count() == 0 {
            stmt.raw_execute().map_err(map_error)?;
            return Ok(None);
        }

        let mut rows = stmt.raw_query();
        match rows.next().map_err(map_error)? {
            Some(row) => Ok(Some(from_sql_ref(row.get_ref(0).map_err(map_error)?))),
            None => Ok(None),
        }
    }

    fn execute_reader(&mut self, command: &Command) -> Result<Box<dyn RowCursor + '_>> {
        let mut stmt = Self::prepare(self.connection()?, command)?;
        let columns: Vec<String> = stmt.column_names().into_iter().map(String::from).collect();
        let width = columns.len();

        let mut rows = stmt.raw_query();
        let mut buffered = Vec::new();
        while let Some(row) = rows.next().map_err(map_error)? {
            let values = (0..width)
                .map(|i| row.get_ref(i).map(from_sql_ref))
                .collect::<rusqlite::Result<Vec<_>>>()
                .map_err(map_error)?;
            buffered.push(values);
        }

        Ok(Box::new(BufferedCursor::new(columns, buffered)))
    }

    fn cancel(&mut self) -> Result<()> {
        if let Some(conn) = &self.conn {
            conn.get_interrupt_handle().interrupt();
        }
        Ok(())
    }
}

impl Drop for SqliteConnection {
    fn drop(&mut self) {
        if let Err(e) = Connection::close(self) {
            warn!(error = %e, "failed to close sqlite connection");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::ConnectionExt;
    use crate::core::DbType;
    use crate::request::CommandRequest;
    use chrono::NaiveDate;
    use tempfile::TempDir;

    fn memory() -> SqliteConnection {
        let mut conn = SqliteDriver::new()
            .create_connection(&ConnectionConfig::in_memory())
            .unwrap();
        conn.open().unwrap();
        conn.non_query("CREATE TABLE users (id INTEGER PRIMARY KEY, name TEXT NOT NULL, active INTEGER, joined TEXT)")
            .unwrap();
        conn
    }

    fn insert(conn: &mut SqliteConnection, id: i64, name: &str) -> Result<u64> {
        conn.non_query(
            CommandRequest::text("INSERT INTO users (id, name) VALUES (@id, @name)").with_setup(|cmd| {
                cmd.add_in_param("@id", DbType::Integer, id)?;
                cmd.add_in_param("@name", DbType::Text, name)
            }),
        )
    }

    #[test]
    fn test_insert_and_query() {
        let mut conn = memory();
        assert_eq!(insert(&mut conn, 1, "alice").unwrap(), 1);
        assert_eq!(insert(&mut conn, 2, "bob").unwrap(), 1);

        let count: i64 = conn.scalar("SELECT COUNT(*) FROM users").unwrap();
        assert_eq!(count, 2);

        let names: Vec<String> = conn
            .select("SELECT name FROM users ORDER BY id")
            .unwrap()
            .map_records(|r| r.get("name"))
            .collect::<Result<_>>()
            .unwrap();
        assert_eq!(names, vec!["alice", "bob"]);
    }

    #[test]
    fn test_parameter_prefixes() {
        let mut conn = memory();
        let rows = conn
            .non_query(
                CommandRequest::text("INSERT INTO users (id, name, active) VALUES (:id, $name, @active)")
                    .with_setup(|cmd| {
                        cmd.add_in_param("id", DbType::Integer, 5)?;
                        cmd.add_in_param("name", DbType::Text, "eve")?;
                        cmd.add_in_param("active", DbType::Boolean, true)
                    }),
            )
            .unwrap();
        assert_eq!(rows, 1);

        let active: bool = conn.scalar("SELECT active FROM users WHERE id = 5").unwrap();
        assert!(active);
    }

    #[test]
    fn test_unknown_parameter() {
        let mut conn = memory();
        let err = conn
            .non_query(
                CommandRequest::text("DELETE FROM users WHERE id = @id")
                    .with_setup(|cmd| cmd.add_in_param("@other", DbType::Integer, 1)),
            )
            .unwrap_err();
        assert!(matches!(err, DbError::ParameterNotFound(_)));
    }

    #[test]
    fn test_timestamp_round_trip() {
        let mut conn = memory();
        let joined = NaiveDate::from_ymd_opt(2024, 3, 1)
            .unwrap()
            .and_hms_opt(9, 30, 0)
            .unwrap();

        conn.non_query(
            CommandRequest::text("INSERT INTO users (id, name, joined) VALUES (1, 'a', @joined)")
                .with_setup(|cmd| cmd.add_in_param("@joined", DbType::DateTime, joined)),
        )
        .unwrap();

        let stored: chrono::NaiveDateTime = conn.scalar("SELECT joined FROM users").unwrap();
        assert_eq!(stored, joined);
    }

    #[test]
    fn test_scalar_or_default_on_empty_and_null() {
        let mut conn = memory();
        assert_eq!(
            conn.scalar_or_default("SELECT name FROM users WHERE id = 99", "nobody".to_string())
                .unwrap(),
            "nobody"
        );
        assert_eq!(conn.scalar_or_default("SELECT MAX(id) FROM users", -1i64).unwrap(), -1);
    }

    #[test]
    fn test_constraint_violation_is_not_transient() {
        let mut conn = memory();
        insert(&mut conn, 1, "alice").unwrap();

        let err = insert(&mut conn, 1, "again").unwrap_err();
        assert_eq!(err.failure_kind(), FailureKind::Other);
        assert!(err.code().is_some());
    }

    #[test]
    fn test_transaction_rollback_discards_writes() {
        let mut conn = memory();
        {
            let mut tx = conn.begin(IsolationLevel::Serializable).unwrap();
            tx.non_query("INSERT INTO users (id, name) VALUES (1, 'ghost')").unwrap();
        }
        let count: i64 = conn.scalar("SELECT COUNT(*) FROM users").unwrap();
        assert_eq!(count, 0);

        conn.within_transaction(|tx| tx.non_query("INSERT INTO users (id, name) VALUES (2, 'kept')"))
            .unwrap();
        let count: i64 = conn.scalar("SELECT COUNT(*) FROM users").unwrap();
        assert_eq!(count, 1);
    }

    #[test]
    fn test_unsupported_features() {
        let mut conn = memory();
        let err = conn.non_query(CommandRequest::stored_procedure("usp_anything")).unwrap_err();
        assert!(matches!(err, DbError::UnsupportedOperation(_)));

        let err = conn
            .non_query(
                CommandRequest::text("UPDATE users SET name = 'x'")
                    .with_setup(|cmd| cmd.add_out_param("@count", DbType::Integer)),
            )
            .unwrap_err();
        assert!(matches!(err, DbError::UnsupportedOperation(_)));
    }

    #[test]
    fn test_closed_connection() {
        let mut conn = memory();
        conn.close().unwrap();
        assert!(!conn.is_open());
        assert!(matches!(
            conn.non_query("SELECT 1"),
            Err(DbError::ConnectionError(_))
        ));
        conn.open().unwrap();
        assert!(conn.is_open());
    }

    #[test]
    fn test_busy_database_is_transient_conflict() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("busy.db");
        let config = ConnectionConfig::new(path.to_str().unwrap()).busy_timeout_ms(0);

        let mut holder = SqliteConnection::new(config.clone());
        holder.open().unwrap();
        holder.non_query("CREATE TABLE t (x INTEGER)").unwrap();
        holder.begin_transaction(IsolationLevel::RepeatableRead).unwrap();
        holder.non_query("INSERT INTO t VALUES (1)").unwrap();

        let mut contender = SqliteConnection::new(config);
        contender.open().unwrap();
        let err = contender
            .within_transaction_at(IsolationLevel::ReadCommitted, |tx| {
                tx.non_query("INSERT INTO t VALUES (2)")
            })
            .unwrap_err();

        assert!(err.is_transient_conflict());
        assert!(!contender.in_transaction());
        holder.rollback().unwrap();
    }

    #[test]
    fn test_default_isolation_from_config() {
        let conn = SqliteConnection::new(
            ConnectionConfig::in_memory().default_isolation(IsolationLevel::Serializable),
        );
        assert_eq!(conn.default_isolation_level(), IsolationLevel::Serializable);
        assert_eq!(
            SqliteConnection::new(ConnectionConfig::in_memory()).default_isolation_level(),
            IsolationLevel::ReadCommitted
        );
    }
}
