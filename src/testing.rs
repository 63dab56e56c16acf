//! Scripted in-memory connection for unit tests

use crate::command::{Command, Execution};
use crate::connection::{Connection, IsolationLevel};
use crate::core::{DbError, FailureKind, Result, Value};
use crate::reader::{BufferedCursor, RowCursor};
use std::cell::Cell;
use std::collections::VecDeque;
use std::rc::Rc;

/// SQL Server's "chosen as deadlock victim" error
pub fn deadlock() -> DbError {
    DbError::database(
        1205,
        "Transaction was deadlocked on lock resources with another process and has been chosen as the deadlock victim",
        FailureKind::TransientConflict,
    )
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    Begin(IsolationLevel),
    Execute,
    Query,
    Commit,
    Rollback,
    Cancel,
}

pub struct ScriptedConnection {
    events: Vec<Event>,
    executions: VecDeque<Result<Execution>>,
    scalars: VecDeque<Option<Value>>,
    rowsets: VecDeque<(Vec<String>, Vec<Vec<Value>>)>,
    commands: Vec<Command>,
    open: bool,
    in_transaction: bool,
    fail_begin: Option<DbError>,
    fail_commit: Option<DbError>,
    fail_rollback: Option<DbError>,
    cursor_closes: Rc<Cell<usize>>,
    connection_closes: Rc<Cell<usize>>,
}

impl ScriptedConnection {
    pub fn new() -> Self {
        Self {
            events: Vec::new(),
            executions: VecDeque::new(),
            scalars: VecDeque::new(),
            rowsets: VecDeque::new(),
            commands: Vec::new(),
            open: true,
            in_transaction: false,
            fail_begin: None,
            fail_commit: None,
            fail_rollback: None,
            cursor_closes: Rc::new(Cell::new(0)),
            connection_closes: Rc::new(Cell::new(0)),
        }
    }

    pub fn push_outcome(&mut self, outcome: Result<u64>) {
        self.executions.push_back(outcome.map(Execution::new));
    }

    pub fn push_execution(&mut self, outcome: Result<Execution>) {
        self.executions.push_back(outcome);
    }

    pub fn push_scalar(&mut self, value: Option<Value>) {
        self.scalars.push_back(value);
    }

    pub fn push_rows(&mut self, columns: Vec<String>, rows: Vec<Vec<Value>>) {
        self.rowsets.push_back((columns, rows));
    }

    pub fn fail_next_begin(&mut self, err: DbError) {
        self.fail_begin = Some(err);
    }

    pub fn fail_next_commit(&mut self, err: DbError) {
        self.fail_commit = Some(err);
    }

    pub fn fail_next_rollback(&mut self, err: DbError) {
        self.fail_rollback = Some(err);
    }

    pub fn events(&self) -> Vec<Event> {
        self.events.clone()
    }

    pub fn count(&self, event: &Event) -> usize {
        self.events.iter().filter(|e| *e == event).count()
    }

    pub fn clear_events(&mut self) {
        self.events.clear();
    }

    pub fn executed_commands(&self) -> &[Command] {
        &self.commands
    }

    pub fn cursor_closes(&self) -> usize {
        self.cursor_closes.get()
    }

    /// Shared counter of `close` calls, observable after the connection is gone
    pub fn close_counter(&self) -> Rc<Cell<usize>> {
        Rc::clone(&self.connection_closes)
    }

    fn ensure_open(&self) -> Result<()> {
        if self.open {
            Ok(())
        } else {
            Err(DbError::ConnectionError("Connection is not open".into()))
        }
    }
}

struct TrackingCursor {
    inner: BufferedCursor,
    closes: Rc<Cell<usize>>,
}

impl RowCursor for TrackingCursor {
    fn columns(&self) -> &[String] {
        self.inner.columns()
    }

    fn next_row(&mut self) -> Result<Option<Vec<Value>>> {
        self.inner.next_row()
    }

    fn close(&mut self) -> Result<()> {
        self.closes.set(self.closes.get() + 1);
        self.inner.close()
    }
}

impl Connection for ScriptedConnection {
    fn open(&mut self) -> Result<()> {
        self.open = true;
        Ok(())
    }

    fn close(&mut self) -> Result<()> {
        self.connection_closes.set(self.connection_closes.get() + 1);
        if self.in_transaction {
            self.rollback()?;
        }
        self.open = false;
        Ok(())
    }

    fn is_open(&self) -> bool {
        self.open
    }

    fn default_isolation_level(&self) -> IsolationLevel {
        IsolationLevel::ReadCommitted
    }

    fn begin_transaction(&mut self, level: IsolationLevel) -> Result<()> {
        self.ensure_open()?;
        if let Some(err) = self.fail_begin.take() {
            return Err(err);
        }
        if self.in_transaction {
            return Err(DbError::InvalidOperation("Transaction already active".into()));
        }
        self.events.push(Event::Begin(level));
        self.in_transaction = true;
        Ok(())
    }

    fn commit(&mut self) -> Result<()> {
        if !self.in_transaction {
            return Err(DbError::InvalidOperation("No active transaction".into()));
        }
        self.events.push(Event::Commit);
        if let Some(err) = self.fail_commit.take() {
            return Err(err);
        }
        self.in_transaction = false;
        Ok(())
    }

    fn rollback(&mut self) -> Result<()> {
        if !self.in_transaction {
            return Err(DbError::InvalidOperation("No active transaction".into()));
        }
        self.events.push(Event::Rollback);
        self.in_transaction = false;
        match self.fail_rollback.take() {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    fn in_transaction(&self) -> bool {
        self.in_transaction
    }

    fn execute_non_query(&mut self, command: &Command) -> Result<Execution> {
        self.ensure_open()?;
        self.events.push(Event::Execute);
        self.commands.push(command.clone());
        self.executions
            .pop_front()
            .unwrap_or_else(|| Ok(Execution::new(0)))
    }

    fn execute_scalar(&mut self, command: &Command) -> Result<Option<Value>> {
        self.ensure_open()?;
        self.events.push(Event::Query);
        self.commands.push(command.clone());
        Ok(self.scalars.pop_front().flatten())
    }

    fn execute_reader(&mut self, command: &Command) -> Result<Box<dyn RowCursor + '_>> {
        self.ensure_open()?;
        self.events.push(Event::Query);
        self.commands.push(command.clone());
        let (columns, rows) = self.rowsets.pop_front().unwrap_or_default();
        Ok(Box::new(TrackingCursor {
            inner: BufferedCursor::new(columns, rows),
            closes: Rc::clone(&self.cursor_closes),
        }))
    }

    fn cancel(&mut self) -> Result<()> {
        self.events.push(Event::Cancel);
        Ok(())
    }
}
