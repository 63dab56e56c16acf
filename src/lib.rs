// ============================================================================
// dbext Library
// ============================================================================
//
// Convenience layer over a relational database client: parameterised
// commands, lazy record readers, scoped transactions, and a write executor
// that retries transient conflicts such as deadlocks.
//
// ============================================================================

pub mod command;
pub mod compression;
pub mod connection;
pub mod core;
pub mod database;
pub mod dispose;
pub mod driver;
pub mod reader;
pub mod request;
pub mod retry;
pub mod transaction;

#[cfg(test)]
pub(crate) mod testing;

// Re-export main types for convenience
pub use command::{
    Command, CommandKind, Execution, OutputValues, Parameter, ParameterDirection, TransactionBinding,
};
pub use connection::{Connection, ConnectionExt, IsolationLevel, config::ConnectionConfig};
pub use core::{DbError, DbType, FailureKind, FromValue, Result, Value, convert_or_default, convert_to};
pub use database::SqlDatabase;
pub use dispose::{Dispose, Scoped};
pub use driver::Driver;
pub use reader::{BufferedCursor, Reader, Record, RowCursor};
pub use request::CommandRequest;
pub use retry::{CancellationToken, DEFAULT_RETRY_DELAY_MS, Isolation, RetryPolicy, RetryingExecutor};
pub use transaction::Transaction;

#[cfg(feature = "sqlite")]
pub use driver::{SqliteConnection, SqliteDriver};
