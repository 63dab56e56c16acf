pub mod config;

use crate::command::{Command, Execution};
use crate::core::{FromValue, Result, Value, convert_or_default, convert_to};
use crate::reader::{Reader, Record, RowCursor};
use crate::request::CommandRequest;
use crate::retry::{Isolation, RetryPolicy, RetryingExecutor};
use crate::transaction::Transaction;
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IsolationLevel {
    ReadUncommitted,
    ReadCommitted,
    RepeatableRead,
    Snapshot,
    Serializable,
}

impl fmt::Display for IsolationLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::ReadUncommitted => "read_uncommitted",
            Self::ReadCommitted => "read_committed",
            Self::RepeatableRead => "repeatable_read",
            Self::Snapshot => "snapshot",
            Self::Serializable => "serializable",
        };
        f.write_str(name)
    }
}

impl std::str::FromStr for IsolationLevel {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().replace(['-', ' '], "_").as_str() {
            "read_uncommitted" => Ok(Self::ReadUncommitted),
            "read_committed" => Ok(Self::ReadCommitted),
            "repeatable_read" => Ok(Self::RepeatableRead),
            "snapshot" => Ok(Self::Snapshot),
            "serializable" => Ok(Self::Serializable),
            other => Err(format!("Unknown isolation level '{}'", other)),
        }
    }
}

/// Database connection capability implemented by drivers
///
/// A connection owns at most one open transaction. Transaction control is
/// normally done through [`Transaction`], which guarantees the transaction
/// is resolved on every exit path.
pub trait Connection {
    fn open(&mut self) -> Result<()>;

    fn close(&mut self) -> Result<()>;

    fn is_open(&self) -> bool;

    /// Level used when a transaction is started without an explicit one
    fn default_isolation_level(&self) -> IsolationLevel;

    fn begin_transaction(&mut self, level: IsolationLevel) -> Result<()>;

    fn commit(&mut self) -> Result<()>;

    fn rollback(&mut self) -> Result<()>;

    fn in_transaction(&self) -> bool;

    fn execute_non_query(&mut self, command: &Command) -> Result<Execution>;

    /// First column of the first row; `None` when no row came back
    fn execute_scalar(&mut self, command: &Command) -> Result<Option<Value>>;

    fn execute_reader(&mut self, command: &Command) -> Result<Box<dyn RowCursor + '_>>;

    /// Abort whatever the connection is currently executing
    fn cancel(&mut self) -> Result<()>;
}

/// Convenience helpers available on every [`Connection`]
///
/// # Examples
///
/// ```ignore
/// conn.non_query("CREATE TABLE users (id INTEGER, name TEXT)")?;
///
/// let added = conn.non_query(
///     CommandRequest::text("INSERT INTO users VALUES (@id, @name)").with_setup(|cmd| {
///         cmd.add_in_param("@id", DbType::Integer, 1)?;
///         cmd.add_in_param("@name", DbType::Text, "Alice")
///     }),
/// )?;
///
/// let total: i64 = conn.scalar("SELECT COUNT(*) FROM users")?;
/// ```
pub trait ConnectionExt: Connection {
    fn create_text_command(&self, sql: &str) -> Command {
        Command::text(sql)
    }

    fn create_stored_procedure_command(&self, name: &str) -> Command {
        Command::stored_procedure(name)
    }

    fn scalar<'a, T: FromValue>(&mut self, request: impl Into<CommandRequest<'a>>) -> Result<T> {
        let command = request.into().build(None)?;
        let value = self.execute_scalar(&command)?;
        convert_to(value.unwrap_or(Value::Null))
    }

    /// Like [`scalar`](Self::scalar) but a missing row or NULL yields `default`
    fn scalar_or_default<'a, T: FromValue>(
        &mut self,
        request: impl Into<CommandRequest<'a>>,
        default: T,
    ) -> Result<T> {
        let command = request.into().build(None)?;
        match self.execute_scalar(&command)? {
            Some(value) => convert_or_default(value, default),
            None => Ok(default),
        }
    }

    fn non_query<'a>(&mut self, request: impl Into<CommandRequest<'a>>) -> Result<u64> {
        let command = request.into().build(None)?;
        Ok(self.execute_non_query(&command)?.rows_affected)
    }

    /// Run a write through [`RetryingExecutor`]
    fn non_query_with_retry<'a>(
        &mut self,
        request: impl Into<CommandRequest<'a>>,
        isolation: Isolation,
        policy: &RetryPolicy,
    ) -> Result<u64> {
        let command = request.into().build(None)?;
        RetryingExecutor::new(policy.clone())
            .isolation(isolation)
            .execute(self, &command)
    }

    fn select<'a>(&mut self, request: impl Into<CommandRequest<'a>>) -> Result<Reader<'_>> {
        let command = request.into().build(None)?;
        Ok(Reader::new(self.execute_reader(&command)?))
    }

    fn for_each_record<'a, F>(&mut self, request: impl Into<CommandRequest<'a>>, action: F) -> Result<()>
    where
        F: FnMut(&Record) -> Result<()>,
    {
        self.select(request)?.for_each_record(action)
    }

    fn begin(&mut self, level: IsolationLevel) -> Result<Transaction<'_, Self>> {
        Transaction::begin(self, level)
    }

    /// Run `f` in a transaction at the connection's default level
    ///
    /// Commits when `f` succeeds, rolls back when it fails.
    fn within_transaction<T, F>(&mut self, f: F) -> Result<T>
    where
        F: FnOnce(&mut Transaction<'_, Self>) -> Result<T>,
    {
        let level = self.default_isolation_level();
        self.within_transaction_at(level, f)
    }

    fn within_transaction_at<T, F>(&mut self, level: IsolationLevel, f: F) -> Result<T>
    where
        F: FnOnce(&mut Transaction<'_, Self>) -> Result<T>,
    {
        let mut transaction = Transaction::begin(self, level)?;
        match f(&mut transaction) {
            Ok(value) => {
                transaction.commit()?;
                Ok(value)
            }
            Err(e) => {
                transaction.rollback_quietly();
                Err(e)
            }
        }
    }
}

impl<C: Connection + ?Sized> ConnectionExt for C {}
