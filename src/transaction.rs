// ============================================================================
// Transaction Scope
// ============================================================================
//
// A `Transaction` exclusively borrows its connection for as long as it is
// open. It ends in exactly one of two ways:
//
//   Active ──commit──> Committed
//     │
//     └──rollback / drop──> RolledBack
//
// Dropping an unresolved transaction rolls it back.
//
// ============================================================================

use crate::command::{Command, Execution, OutputValues, TransactionBinding};
use crate::connection::{Connection, IsolationLevel};
use crate::core::{FromValue, Result, Value, convert_or_default, convert_to};
use crate::reader::{Reader, Record};
use crate::request::CommandRequest;
use tracing::{debug, warn};

pub struct Transaction<'c, C: Connection + ?Sized> {
    conn: &'c mut C,
    isolation_level: IsolationLevel,
    finished: bool,
}

impl<'c, C: Connection + ?Sized> Transaction<'c, C> {
    /// Begin a transaction on `conn` at `level`
    pub fn begin(conn: &'c mut C, level: IsolationLevel) -> Result<Self> {
        conn.begin_transaction(level)?;
        debug!(isolation = %level, "transaction started");
        Ok(Self {
            conn,
            isolation_level: level,
            finished: false,
        })
    }

    pub fn isolation_level(&self) -> IsolationLevel {
        self.isolation_level
    }

    fn binding(&self) -> TransactionBinding {
        TransactionBinding::new(self.isolation_level)
    }

    pub fn commit(mut self) -> Result<()> {
        self.conn.commit()?;
        self.finished = true;
        debug!(isolation = %self.isolation_level, "transaction committed");
        Ok(())
    }

    pub fn rollback(mut self) -> Result<()> {
        self.finished = true;
        self.conn.rollback()?;
        debug!(isolation = %self.isolation_level, "transaction rolled back");
        Ok(())
    }

    /// Roll back, logging instead of returning a failed rollback
    pub(crate) fn rollback_quietly(self) {
        if let Err(e) = self.rollback() {
            warn!(error = %e, "rollback failed");
        }
    }

    /// Cancel the statement currently running on the connection
    pub fn cancel(&mut self) -> Result<()> {
        self.conn.cancel()
    }

    /// A text command bound to this transaction
    pub fn create_text_command(&self, sql: &str) -> Command {
        Command::text(sql).bind(self.binding())
    }

    /// A stored procedure command bound to this transaction
    pub fn create_stored_procedure_command(&self, name: &str) -> Command {
        Command::stored_procedure(name).bind(self.binding())
    }

    pub fn execute(&mut self, command: &Command) -> Result<Execution> {
        self.conn.execute_non_query(command)
    }

    pub fn execute_non_query(&mut self, command: &Command) -> Result<u64> {
        Ok(self.execute(command)?.rows_affected)
    }

    pub fn non_query<'a>(&mut self, request: impl Into<CommandRequest<'a>>) -> Result<u64> {
        let command = request.into().build(Some(self.binding()))?;
        self.execute_non_query(&command)
    }

    /// Execute a write and read its output parameters
    ///
    /// ```ignore
    /// let new_id: i64 = tx.non_query_with_output(
    ///     CommandRequest::stored_procedure("usp_create_user").with_setup(|cmd| {
    ///         cmd.add_in_param("@name", DbType::Text, "Alice")?;
    ///         cmd.add_out_param("@id", DbType::Integer)
    ///     }),
    ///     |outputs| outputs.get("@id"),
    /// )?;
    /// ```
    pub fn non_query_with_output<'a, T, F>(
        &mut self,
        request: impl Into<CommandRequest<'a>>,
        output: F,
    ) -> Result<T>
    where
        F: FnOnce(&OutputValues) -> Result<T>,
    {
        let command = request.into().build(Some(self.binding()))?;
        let execution = self.execute(&command)?;
        output(&execution.outputs)
    }

    pub fn scalar<'a, T: FromValue>(&mut self, request: impl Into<CommandRequest<'a>>) -> Result<T> {
        let command = request.into().build(Some(self.binding()))?;
        let value = self.conn.execute_scalar(&command)?;
        convert_to(value.unwrap_or(Value::Null))
    }

    pub fn scalar_or_default<'a, T: FromValue>(
        &mut self,
        request: impl Into<CommandRequest<'a>>,
        default: T,
    ) -> Result<T> {
        let command = request.into().build(Some(self.binding()))?;
        match self.conn.execute_scalar(&command)? {
            Some(value) => convert_or_default(value, default),
            None => Ok(default),
        }
    }

    pub fn select<'a>(&mut self, request: impl Into<CommandRequest<'a>>) -> Result<Reader<'_>> {
        let command = request.into().build(Some(self.binding()))?;
        Ok(Reader::new(self.conn.execute_reader(&command)?))
    }

    pub fn for_each_record<'a, F>(&mut self, request: impl Into<CommandRequest<'a>>, action: F) -> Result<()>
    where
        F: FnMut(&Record) -> Result<()>,
    {
        self.select(request)?.for_each_record(action)
    }
}

impl<C: Connection + ?Sized> Drop for Transaction<'_, C> {
    fn drop(&mut self) {
        if self.finished {
            return;
        }
        self.finished = true;
        if let Err(e) = self.conn.rollback() {
            warn!(error = %e, "rollback of abandoned transaction failed");
        }
    }
}
