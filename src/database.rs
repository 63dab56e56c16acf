// ============================================================================
// Database Facade
// ============================================================================
//
// `SqlDatabase` opens a fresh connection per call and closes it on every
// exit path, including unwinding. Nothing that borrows the connection can
// escape a call, so `select` collects its results before returning.
//
// ============================================================================

use crate::command::Command;
use crate::connection::config::ConnectionConfig;
use crate::connection::{Connection, ConnectionExt};
use crate::core::{FromValue, Result};
use crate::dispose::Scoped;
use crate::driver::Driver;
use crate::reader::Record;
use crate::request::CommandRequest;
use crate::retry::{Isolation, RetryingExecutor};
use crate::transaction::Transaction;
use tracing::debug;

/// Connection factory plus one-shot helpers
///
/// # Examples
///
/// ```ignore
/// let db = SqlDatabase::sqlite(ConnectionConfig::from_url("sqlite://app.db?busy_timeout_ms=0")?)?;
///
/// db.non_query("CREATE TABLE IF NOT EXISTS users (id INTEGER PRIMARY KEY, name TEXT)")?;
/// let names: Vec<String> = db.select("SELECT name FROM users", |r| r.get("name"))?;
///
/// db.within_transaction(|tx| {
///     tx.non_query("UPDATE users SET name = upper(name)")?;
///     tx.non_query("DELETE FROM users WHERE name IS NULL")
/// })?;
/// ```
pub struct SqlDatabase<D: Driver> {
    driver: D,
    config: ConnectionConfig,
}

impl<D: Driver> SqlDatabase<D> {
    pub fn new(driver: D, config: ConnectionConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self { driver, config })
    }

    pub fn config(&self) -> &ConnectionConfig {
        &self.config
    }

    pub fn driver(&self) -> &D {
        &self.driver
    }

    /// A connection that has not been opened yet
    pub fn create_connection(&self) -> Result<D::Connection> {
        self.driver.create_connection(&self.config)
    }

    pub fn create_and_open_connection(&self) -> Result<D::Connection> {
        let mut conn = self.create_connection()?;
        conn.open()?;
        debug!(driver = self.driver.name(), database = %self.config.database, "connection opened");
        Ok(conn)
    }

    pub fn text_command(&self, sql: &str) -> Command {
        Command::text(sql)
    }

    pub fn stored_procedure_command(&self, name: &str) -> Command {
        Command::stored_procedure(name)
    }

    /// Run `f` on a freshly opened connection, closing it afterwards
    pub fn with_connection<T, F>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&mut D::Connection) -> Result<T>,
    {
        let mut conn = Scoped::new(self.create_and_open_connection()?);
        let value = f(&mut *conn)?;
        conn.close()?;
        Ok(value)
    }

    /// Execute an already built command once on its own connection
    pub fn execute_command(&self, command: &Command) -> Result<u64> {
        self.with_connection(|conn| Ok(conn.execute_non_query(command)?.rows_affected))
    }

    /// Run `f` in a transaction at the configured default level
    pub fn within_transaction<T, F>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&mut Transaction<'_, D::Connection>) -> Result<T>,
    {
        self.with_connection(|conn| conn.within_transaction(f))
    }

    pub fn scalar<'a, T: FromValue>(&self, request: impl Into<CommandRequest<'a>>) -> Result<T> {
        self.with_connection(|conn| conn.scalar(request))
    }

    pub fn scalar_or_default<'a, T: FromValue>(
        &self,
        request: impl Into<CommandRequest<'a>>,
        default: T,
    ) -> Result<T> {
        self.with_connection(|conn| conn.scalar_or_default(request, default))
    }

    pub fn non_query<'a>(&self, request: impl Into<CommandRequest<'a>>) -> Result<u64> {
        self.with_connection(|conn| conn.non_query(request))
    }

    /// Write with the configured retry policy
    pub fn non_query_with_retry<'a>(
        &self,
        request: impl Into<CommandRequest<'a>>,
        isolation: impl Into<Isolation>,
    ) -> Result<u64> {
        let command = request.into().build(None)?;
        self.execute_with_retry(&command, isolation)
    }

    pub fn execute_with_retry(&self, command: &Command, isolation: impl Into<Isolation>) -> Result<u64> {
        let executor = RetryingExecutor::new(self.config.retry.clone()).isolation(isolation);
        self.with_connection(|conn| executor.execute(conn, command))
    }

    pub fn for_each_record<'a, F>(&self, request: impl Into<CommandRequest<'a>>, action: F) -> Result<()>
    where
        F: FnMut(&Record) -> Result<()>,
    {
        self.with_connection(|conn| conn.for_each_record(request, action))
    }

    /// Map every record through `selector` and collect the results
    pub fn select<'a, T, F>(&self, request: impl Into<CommandRequest<'a>>, mut selector: F) -> Result<Vec<T>>
    where
        F: FnMut(&Record) -> Result<T>,
    {
        self.with_connection(|conn| {
            let mut items = Vec::new();
            conn.for_each_record(request, |record| {
                items.push(selector(record)?);
                Ok(())
            })?;
            Ok(items)
        })
    }
}

#[cfg(feature = "sqlite")]
impl SqlDatabase<crate::driver::SqliteDriver> {
    pub fn sqlite(config: ConnectionConfig) -> Result<Self> {
        Self::new(crate::driver::SqliteDriver::new(), config)
    }
}

#[cfg(all(test, feature = "sqlite"))]
mod tests {
    use super::*;
    use crate::core::DbError;
    use tempfile::TempDir;

    fn database(dir: &TempDir) -> SqlDatabase<crate::driver::SqliteDriver> {
        let path = dir.path().join("facade.db");
        SqlDatabase::sqlite(ConnectionConfig::new(path.to_str().unwrap())).unwrap()
    }

    #[test]
    fn test_new_validates_config() {
        assert!(matches!(
            SqlDatabase::sqlite(ConnectionConfig::new("")),
            Err(DbError::ConfigError(_))
        ));
    }

    #[test]
    fn test_one_shot_helpers() {
        let dir = TempDir::new().unwrap();
        let db = database(&dir);

        db.non_query("CREATE TABLE t (x INTEGER)").unwrap();
        db.non_query("INSERT INTO t VALUES (1), (2)").unwrap();

        assert_eq!(db.scalar::<i64>("SELECT SUM(x) FROM t").unwrap(), 3);
        let values = db.select("SELECT x FROM t ORDER BY x", |r| r.get::<i64>("x")).unwrap();
        assert_eq!(values, vec![1, 2]);
    }

    #[test]
    fn test_with_connection_error_passes_through() {
        let dir = TempDir::new().unwrap();
        let db = database(&dir);

        let err = db
            .with_connection(|_conn| -> Result<()> { Err(DbError::ExecutionError("boom".into())) })
            .unwrap_err();
        assert!(matches!(err, DbError::ExecutionError(_)));
    }
}
