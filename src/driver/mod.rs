//! Driver seam: how a [`SqlDatabase`](crate::database::SqlDatabase) gets
//! connections for a concrete engine

#[cfg(feature = "sqlite")]
pub mod sqlite;

use crate::connection::Connection;
use crate::connection::config::ConnectionConfig;
use crate::core::Result;

/// Factory for unopened connections to one database engine
pub trait Driver: Send + Sync {
    type Connection: Connection;

    /// Engine name used in logs
    fn name(&self) -> &'static str;

    /// A connection configured from `config`; call `open` before use
    fn create_connection(&self, config: &ConnectionConfig) -> Result<Self::Connection>;
}

#[cfg(feature = "sqlite")]
pub use sqlite::{SqliteConnection, SqliteDriver};
