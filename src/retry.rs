//! Deadlock-aware execution of write commands
//!
//! [`RetryingExecutor`] runs one non-query command inside a transaction and
//! retries it when the database reports a transient conflict (for example
//! being chosen as a deadlock victim). Every other failure is terminal.
//!
//! `max_retries` counts retries after the first attempt, so a command is
//! attempted at most `max_retries + 1` times.

use crate::command::Command;
use crate::connection::{Connection, IsolationLevel};
use crate::core::{DbError, Result};
use crate::transaction::Transaction;
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Condvar, Mutex};
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// Delay between attempts when none is configured
pub const DEFAULT_RETRY_DELAY_MS: u64 = 3000;

// ============================================================================
// Retry Policy
// ============================================================================

/// Retry budget for a single execution
///
/// # Example
/// ```ignore
/// let policy = RetryPolicy::new(5).with_delay_ms(250);
/// assert_eq!(policy.max_attempts(), 6);
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    /// Retries allowed after the first attempt (0 = no retries)
    pub max_retries: u32,
    /// Fixed delay between attempts in milliseconds
    pub delay_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            delay_ms: DEFAULT_RETRY_DELAY_MS,
        }
    }
}

impl RetryPolicy {
    /// Policy with `max_retries` and the default delay
    pub fn new(max_retries: u32) -> Self {
        Self {
            max_retries,
            delay_ms: DEFAULT_RETRY_DELAY_MS,
        }
    }

    pub fn no_retry() -> Self {
        Self::new(0)
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    pub fn with_delay_ms(mut self, delay_ms: u64) -> Self {
        self.delay_ms = delay_ms;
        self
    }

    pub fn delay(&self) -> Duration {
        Duration::from_millis(self.delay_ms)
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_retries.saturating_add(1)
    }
}

// ============================================================================
// Isolation Choice
// ============================================================================

/// Which transaction, if any, wraps each attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Isolation {
    /// No transaction: execute once, never retry
    Unspecified,
    /// The level of the command's bound transaction, else `Unspecified`
    #[default]
    Ambient,
    /// A fresh transaction at this level per attempt
    Level(IsolationLevel),
}

impl Isolation {
    fn resolve(self, command: &Command) -> Option<IsolationLevel> {
        match self {
            Self::Unspecified => None,
            Self::Ambient => command.transaction().map(|b| b.isolation_level()),
            Self::Level(level) => Some(level),
        }
    }
}

impl From<IsolationLevel> for Isolation {
    fn from(level: IsolationLevel) -> Self {
        Self::Level(level)
    }
}

impl From<Option<IsolationLevel>> for Isolation {
    fn from(level: Option<IsolationLevel>) -> Self {
        level.map_or(Self::Unspecified, Self::Level)
    }
}

// ============================================================================
// Cancellation
// ============================================================================

/// Shared flag that stops a retry sequence before its next attempt
///
/// Cloning shares the flag. Cancelling wakes an executor that is waiting
/// out its retry delay.
#[derive(Debug, Clone, Default)]
pub struct CancellationToken {
    inner: Arc<(Mutex<bool>, Condvar)>,
}

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        let (flag, signal) = &*self.inner;
        match flag.lock() {
            Ok(mut cancelled) => *cancelled = true,
            Err(poisoned) => *poisoned.into_inner() = true,
        }
        signal.notify_all();
    }

    pub fn is_cancelled(&self) -> bool {
        let (flag, _) = &*self.inner;
        match flag.lock() {
            Ok(cancelled) => *cancelled,
            Err(poisoned) => *poisoned.into_inner(),
        }
    }

    /// Block for up to `timeout`; returns `true` if cancelled meanwhile
    pub fn wait_timeout(&self, timeout: Duration) -> Result<bool> {
        let (flag, signal) = &*self.inner;
        let deadline = Instant::now() + timeout;
        let mut cancelled = flag.lock()?;
        while !*cancelled {
            let now = Instant::now();
            if now >= deadline {
                break;
            }
            cancelled = signal.wait_timeout(cancelled, deadline - now)?.0;
        }
        Ok(*cancelled)
    }
}

// ============================================================================
// Attempt Context
// ============================================================================

/// One attempt: the caller's command plus a transaction begun for it alone
struct AttemptContext<'a, 'c, C: Connection + ?Sized> {
    command: &'a Command,
    transaction: Transaction<'c, C>,
}

impl<'a, 'c, C: Connection + ?Sized> AttemptContext<'a, 'c, C> {
    fn begin(conn: &'c mut C, command: &'a Command, level: IsolationLevel) -> Result<Self> {
        Ok(Self {
            command,
            transaction: Transaction::begin(conn, level)?,
        })
    }

    /// Execute and commit; on failure the transaction is rolled back before
    /// the original error is returned
    fn run(self) -> Result<u64> {
        let Self {
            command,
            mut transaction,
        } = self;

        match transaction.execute_non_query(command) {
            Ok(rows) => {
                // A failed commit drops the guard, which rolls back
                transaction.commit()?;
                Ok(rows)
            }
            Err(e) => {
                transaction.rollback_quietly();
                Err(e)
            }
        }
    }
}

// ============================================================================
// Retrying Executor
// ============================================================================

/// Executes a write command, retrying on transient conflicts
///
/// # Example
/// ```ignore
/// let mut cmd = Command::text("UPDATE accounts SET balance = balance - @amount WHERE id = @id");
/// cmd.add_in_param("@amount", DbType::Integer, 100)?;
/// cmd.add_in_param("@id", DbType::Integer, 7)?;
///
/// let rows = RetryingExecutor::new(RetryPolicy::new(3).with_delay_ms(500))
///     .isolation(IsolationLevel::Serializable)
///     .execute(&mut conn, &cmd)?;
/// ```
#[derive(Debug, Clone, Default)]
pub struct RetryingExecutor {
    policy: RetryPolicy,
    isolation: Isolation,
    cancellation: Option<CancellationToken>,
}

impl RetryingExecutor {
    pub fn new(policy: RetryPolicy) -> Self {
        Self {
            policy,
            isolation: Isolation::Ambient,
            cancellation: None,
        }
    }

    pub fn isolation(mut self, isolation: impl Into<Isolation>) -> Self {
        self.isolation = isolation.into();
        self
    }

    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancellation = Some(token);
        self
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Run `command` on `conn`, returning the affected row count
    ///
    /// Fails with [`DbError::InvalidOperation`] before doing anything if the
    /// command is bound to a transaction. With no isolation level the
    /// command runs once, outside any transaction, with no retry. Otherwise
    /// each attempt gets its own transaction; a transient conflict with
    /// budget left is rolled back, the connection is cancelled, and the
    /// next attempt starts after the policy delay. A conflict raised while
    /// beginning the transaction counts as a failed attempt. Any other
    /// failure, or a conflict on the last attempt, is rolled back and
    /// returned unchanged.
    pub fn execute<C: Connection + ?Sized>(&self, conn: &mut C, command: &Command) -> Result<u64> {
        let level = self.isolation.resolve(command);

        if command.is_bound() {
            return Err(DbError::InvalidOperation(
                "Command should not be associated with an existing transaction".into(),
            ));
        }

        if self.is_cancelled() {
            return Err(DbError::Cancelled);
        }

        let Some(level) = level else {
            debug!("no isolation level; executing without transaction");
            return Ok(conn.execute_non_query(command)?.rows_affected);
        };

        let mut retries: u32 = 0;
        loop {
            debug!(attempt = retries + 1, isolation = %level, "executing write");

            // Locking drivers can report the conflict at BEGIN
            let outcome = match AttemptContext::begin(conn, command, level) {
                Ok(attempt) => attempt.run(),
                Err(e) if e.is_transient_conflict() => Err(e),
                Err(e) => return Err(e),
            };

            let error = match outcome {
                Ok(rows) => return Ok(rows),
                Err(e) => e,
            };

            if !error.is_transient_conflict() || retries >= self.policy.max_retries {
                debug!(attempt = retries + 1, error = %error, "write failed; not retrying");
                return Err(error);
            }

            warn!(
                attempt = retries + 1,
                max_retries = self.policy.max_retries,
                delay_ms = self.policy.delay_ms,
                code = ?error.code(),
                "transient conflict; retrying"
            );

            if let Err(e) = conn.cancel() {
                warn!(error = %e, "cancel after transient conflict failed");
            }

            if self.wait_before_retry()? {
                debug!("retry sequence cancelled");
                return Err(error);
            }

            retries += 1;
        }
    }

    fn is_cancelled(&self) -> bool {
        self.cancellation
            .as_ref()
            .is_some_and(CancellationToken::is_cancelled)
    }

    /// Sleep out the delay; `true` when cancellation cut it short
    fn wait_before_retry(&self) -> Result<bool> {
        match &self.cancellation {
            Some(token) => token.wait_timeout(self.policy.delay()),
            None => {
                std::thread::sleep(self.policy.delay());
                Ok(false)
            }
        }
    }
}
