use thiserror::Error;

/// Classification of a driver failure, decided at the driver boundary.
///
/// Retry logic only ever looks at this, never at raw error codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    /// Server-signalled contention (deadlock victim, busy/locked database)
    TransientConflict,
    /// Everything else
    Other,
}

#[derive(Error, Debug)]
pub enum DbError {
    #[error("Invalid operation: {0}")]
    InvalidOperation(String),

    #[error("Database error {code}: {message}")]
    Database {
        code: i32,
        message: String,
        kind: FailureKind,
    },

    #[error("Execution error: {0}")]
    ExecutionError(String),

    #[error("Connection error: {0}")]
    ConnectionError(String),

    #[error("Type mismatch: {0}")]
    TypeMismatch(String),

    #[error("Column '{0}' not found")]
    ColumnNotFound(String),

    #[error("Parameter '{0}' not found")]
    ParameterNotFound(String),

    #[error("Unsupported operation: {0}")]
    UnsupportedOperation(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Lock error: {0}")]
    LockError(String),

    #[error("Operation cancelled")]
    Cancelled,
}

pub type Result<T> = std::result::Result<T, DbError>;

impl DbError {
    /// Build a coded driver error
    pub fn database(code: i32, message: impl Into<String>, kind: FailureKind) -> Self {
        Self::Database {
            code,
            message: message.into(),
            kind,
        }
    }

    pub fn failure_kind(&self) -> FailureKind {
        match self {
            Self::Database { kind, .. } => *kind,
            _ => FailureKind::Other,
        }
    }

    pub fn is_transient_conflict(&self) -> bool {
        self.failure_kind() == FailureKind::TransientConflict
    }

    /// Native driver error code, if the failure came from the database
    pub fn code(&self) -> Option<i32> {
        match self {
            Self::Database { code, .. } => Some(*code),
            _ => None,
        }
    }
}

impl<T> From<std::sync::PoisonError<T>> for DbError {
    fn from(err: std::sync::PoisonError<T>) -> Self {
        Self::LockError(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_database_error_classification() {
        let err = DbError::database(1205, "chosen as deadlock victim", FailureKind::TransientConflict);
        assert!(err.is_transient_conflict());
        assert_eq!(err.code(), Some(1205));
        assert_eq!(err.to_string(), "Database error 1205: chosen as deadlock victim");
    }

    #[test]
    fn test_non_database_errors_are_other() {
        let err = DbError::InvalidOperation("bad".into());
        assert_eq!(err.failure_kind(), FailureKind::Other);
        assert_eq!(err.code(), None);

        let err = DbError::database(2627, "duplicate key", FailureKind::Other);
        assert!(!err.is_transient_conflict());
    }
}
