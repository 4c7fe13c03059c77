//! Error types for sqlroute.
//!
//! Every failure that leaves the facade is a [`DbError`]. Local driver failures
//! and failures reported by a remote backend share the `Database` variant, so a
//! caller only sees the difference in the message text.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum DbError {
    /// No connection could be obtained: pool exhausted within the acquisition
    /// timeout, or an ad-hoc open failed.
    #[error("Connection failed: {message}")]
    Connection { message: String, suggestion: String },

    /// A statement failed while preparing, binding or executing, locally or on
    /// the remote backend.
    #[error("Database error: {message}")]
    Database {
        message: String,
        /// e.g., "42P01" for undefined table
        sql_state: Option<String>,
        suggestion: String,
    },

    #[error("Invalid input: {message}")]
    InvalidInput { message: String },

    #[error("Transaction error: {message}")]
    Transaction { message: String },

    /// The unit of work failed and the transaction was rolled back.
    #[error("Transaction rolled back: {source}")]
    RolledBack {
        #[source]
        source: Box<DbError>,
    },

    #[error("Internal error: {message}")]
    Internal { message: String },
}

impl DbError {
    /// Create a connection error with a helpful suggestion.
    pub fn connection(message: impl Into<String>, suggestion: impl Into<String>) -> Self {
        Self::Connection {
            message: message.into(),
            suggestion: suggestion.into(),
        }
    }

    /// Create a database error with optional SQL state.
    pub fn database(
        message: impl Into<String>,
        sql_state: Option<String>,
        suggestion: impl Into<String>,
    ) -> Self {
        Self::Database {
            message: message.into(),
            sql_state,
            suggestion: suggestion.into(),
        }
    }

    /// Create a database error from a message reported by the remote backend.
    pub fn remote(message: impl Into<String>) -> Self {
        Self::database(
            message,
            None,
            "Check the SQL syntax and referenced objects",
        )
    }

    pub fn invalid_input(message: impl Into<String>) -> Self {
        Self::InvalidInput {
            message: message.into(),
        }
    }

    pub fn transaction(message: impl Into<String>) -> Self {
        Self::Transaction {
            message: message.into(),
        }
    }

    /// Wrap the failure that triggered a rollback.
    pub fn rolled_back(source: DbError) -> Self {
        Self::RolledBack {
            source: Box::new(source),
        }
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Get the suggestion for this error, if available.
    pub fn suggestion(&self) -> Option<&str> {
        match self {
            Self::Connection { suggestion, .. } => Some(suggestion),
            Self::Database { suggestion, .. } => Some(suggestion),
            Self::RolledBack { source } => source.suggestion(),
            _ => None,
        }
    }

    /// Whether the error means the underlying connection itself is unusable.
    ///
    /// Pools use this to close a connection instead of recycling it.
    pub fn is_connection_failure(&self) -> bool {
        match self {
            Self::Connection { .. } => true,
            Self::RolledBack { source } => source.is_connection_failure(),
            _ => false,
        }
    }
}

/// Convert sqlx errors to DbError.
impl From<sqlx::Error> for DbError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::Configuration(msg) => DbError::connection(
                msg.to_string(),
                "Check the connection string format and credentials",
            ),
            sqlx::Error::Database(db_err) => {
                let code = db_err.code().map(|c| c.to_string());
                DbError::database(
                    db_err.message(),
                    code,
                    "Check the SQL syntax and referenced objects",
                )
            }
            sqlx::Error::RowNotFound => DbError::database(
                "No rows returned",
                None,
                "Verify the query conditions match existing data",
            ),
            sqlx::Error::PoolTimedOut => DbError::connection(
                "Timed out waiting for a pooled connection",
                "The pool is exhausted; retry later or raise max_connections",
            ),
            sqlx::Error::PoolClosed => {
                DbError::connection("Connection pool is closed", "Reconnect to the database")
            }
            sqlx::Error::Io(io_err) => DbError::connection(
                format!("I/O error: {}", io_err),
                "Check network connectivity and database server status",
            ),
            sqlx::Error::Tls(tls_err) => DbError::connection(
                format!("TLS error: {}", tls_err),
                "Verify TLS configuration and certificates",
            ),
            sqlx::Error::Protocol(msg) => DbError::connection(
                format!("Protocol error: {}", msg),
                "Check database server compatibility",
            ),
            sqlx::Error::TypeNotFound { type_name } => DbError::database(
                format!("Type not found: {}", type_name),
                None,
                "Check the types referenced by the statement",
            ),
            sqlx::Error::ColumnNotFound(col) => DbError::database(
                format!("Column not found: {}", col),
                None,
                "Check the column names referenced by the statement",
            ),
            sqlx::Error::ColumnIndexOutOfBounds { index, len } => DbError::internal(format!(
                "Column index {} out of bounds (len: {})",
                index, len
            )),
            sqlx::Error::ColumnDecode { index, source } => {
                DbError::internal(format!("Failed to decode column {}: {}", index, source))
            }
            sqlx::Error::Decode(source) => DbError::internal(format!("Decode error: {}", source)),
            sqlx::Error::AnyDriverError(err) => DbError::connection(
                format!("Driver error: {}", err),
                "Check database driver configuration",
            ),
            sqlx::Error::WorkerCrashed => DbError::internal("Database worker crashed"),
            _ => DbError::internal(format!("Unknown database error: {}", err)),
        }
    }
}

impl From<std::io::Error> for DbError {
    fn from(err: std::io::Error) -> Self {
        DbError::connection(
            format!("I/O error: {}", err),
            "Check network connectivity and that the peer is running",
        )
    }
}

/// Result type alias for database operations.
pub type DbResult<T> = Result<T, DbError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = DbError::connection("Failed to connect", "Check credentials");
        assert!(err.to_string().contains("Connection failed"));
    }

    #[test]
    fn test_error_suggestion() {
        let err = DbError::database(
            "Syntax error",
            Some("42601".to_string()),
            "Check SQL syntax",
        );
        assert_eq!(err.suggestion(), Some("Check SQL syntax"));
    }

    #[test]
    fn test_remote_error_is_database_error() {
        let err = DbError::remote("syntax error near SELECT");
        assert!(matches!(err, DbError::Database { .. }));
        assert_eq!(err.to_string(), "Database error: syntax error near SELECT");
    }

    #[test]
    fn test_rolled_back_keeps_source_message() {
        let err = DbError::rolled_back(DbError::database("boom", None, "none"));
        assert!(err.to_string().contains("boom"));
        assert_eq!(err.suggestion(), Some("none"));
        assert!(std::error::Error::source(&err).is_some());
    }

    #[test]
    fn test_connection_failure_classification() {
        assert!(DbError::connection("err", "sugg").is_connection_failure());
        assert!(
            DbError::rolled_back(DbError::connection("gone", "reconnect")).is_connection_failure()
        );
        assert!(!DbError::invalid_input("bad").is_connection_failure());
        assert!(!DbError::database("bad sql", None, "fix it").is_connection_failure());
    }

    #[test]
    fn test_pool_timeout_maps_to_connection_error() {
        let err: DbError = sqlx::Error::PoolTimedOut.into();
        assert!(matches!(err, DbError::Connection { .. }));
    }
}
