//! # Storage Error Types
//!
//! Error types for storage port operations.
//!
//! ## Error Flow
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                    Error Propagation                                    │
//! │                                                                         │
//! │  SQLite Error (sqlx::Error)      Memory adapter state checks           │
//! │       │                                 │                               │
//! │       ▼                                 ▼                               │
//! │  DbError (this module) ← Adds context and categorization               │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  SyncError::Storage (tessera-sync) ← Returned to the operation caller  │
//! │                                                                         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use thiserror::Error;

/// Storage operation errors.
#[derive(Debug, Error)]
pub enum DbError {
    /// A port method was called before `initialize()`.
    ///
    /// ## When This Occurs
    /// - Repository or client used before `SyncClient::initialize`
    /// - Adapter re-used after `clear_all` without re-initializing
    ///
    /// Signals a usage bug; never retried.
    #[error("Storage not initialized")]
    NotInitialized,

    /// Row not found.
    ///
    /// ## When This Occurs
    /// - `update` on a record id that was never inserted
    #[error("{table} record not found: {id}")]
    NotFound { table: String, id: String },

    /// `ensure_schema` called with a different id field for a known table.
    #[error("Schema mismatch for {table}: {reason}")]
    SchemaMismatch { table: String, reason: String },

    /// Database connection failed.
    ///
    /// ## When This Occurs
    /// - Database file can't be created
    /// - File permissions issue
    /// - Disk full
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    /// Migration failed.
    #[error("Migration failed: {0}")]
    MigrationFailed(String),

    /// Query execution failed.
    #[error("Query failed: {0}")]
    QueryFailed(String),

    /// Stored payload or config value could not be encoded/decoded.
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// The adapter was closed.
    #[error("Storage closed")]
    Closed,

    /// Internal storage error.
    #[error("Internal storage error: {0}")]
    Internal(String),
}

impl DbError {
    /// Creates a NotFound error for a given table and record id.
    pub fn not_found(table: impl Into<String>, id: impl Into<String>) -> Self {
        DbError::NotFound {
            table: table.into(),
            id: id.into(),
        }
    }
}

/// Convert sqlx errors to DbError.
///
/// ## Error Mapping
/// ```text
/// sqlx::Error::Database       → DbError::QueryFailed
/// sqlx::Error::PoolClosed     → DbError::Closed
/// sqlx::Error::PoolTimedOut   → DbError::ConnectionFailed
/// sqlx::Error::ColumnDecode   → DbError::Serialization
/// Other                       → DbError::Internal
/// ```
impl From<sqlx::Error> for DbError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::Database(db_err) => DbError::QueryFailed(db_err.message().to_string()),
            sqlx::Error::PoolClosed => DbError::Closed,
            sqlx::Error::PoolTimedOut => {
                DbError::ConnectionFailed("Timed out acquiring a connection".to_string())
            }
            sqlx::Error::ColumnDecode { .. } | sqlx::Error::Decode(_) => {
                DbError::Serialization(err.to_string())
            }
            _ => DbError::Internal(err.to_string()),
        }
    }
}

impl From<sqlx::migrate::MigrateError> for DbError {
    fn from(err: sqlx::migrate::MigrateError) -> Self {
        DbError::MigrationFailed(err.to_string())
    }
}

impl From<serde_json::Error> for DbError {
    fn from(err: serde_json::Error) -> Self {
        DbError::Serialization(err.to_string())
    }
}

impl From<tessera_core::CoreError> for DbError {
    fn from(err: tessera_core::CoreError) -> Self {
        DbError::Serialization(err.to_string())
    }
}

/// Result type for storage operations.
pub type DbResult<T> = Result<T, DbError>;
