//! # Sync Error Types
//!
//! Error types for repositories, the client, and strategies.
//!
//! ## Error Hierarchy
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                       Sync Error Categories                             │
//! │                                                                         │
//! │  ┌─────────────────┐  ┌─────────────────┐  ┌─────────────────────────┐ │
//! │  │  Construction   │  │ Deserialization │  │      Transport          │ │
//! │  │                 │  │                 │  │                         │ │
//! │  │  Duplicate repo │  │  Deserialization│  │  Transport              │ │
//! │  │  MissingCallback│  │  PullFailed     │  │  Timeout                │ │
//! │  │  InvalidConfig  │  │  (aggregate)    │  │  (retried next tick)    │ │
//! │  └─────────────────┘  └─────────────────┘  └─────────────────────────┘ │
//! │                                                                         │
//! │  ┌─────────────────┐  ┌─────────────────┐  ┌─────────────────────────┐ │
//! │  │     Lookup      │  │ Not Initialized │  │      Lifecycle          │ │
//! │  │                 │  │                 │  │                         │ │
//! │  │  RepoNotFound   │  │  NotInitialized │  │  StrategyDisposed       │ │
//! │  │  TypeMismatch   │  │  Storage(..)    │  │  ClientDropped/Disposed │ │
//! │  └─────────────────┘  └─────────────────┘  └─────────────────────────┘ │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use serde_json::Value;
use tessera_db::DbError;
use thiserror::Error;

/// Result type alias for sync operations.
pub type SyncResult<T> = Result<T, SyncError>;

/// One item of a pulled batch that could not be applied.
#[derive(Debug, Clone, PartialEq)]
pub struct PullFailure {
    /// Position of the item inside the batch.
    pub index: usize,
    /// The raw item as it was received.
    pub payload: Value,
    pub reason: String,
}

/// Sync error type covering all possible sync failures.
///
/// ## Design Principles
/// - Each variant includes enough context for debugging
/// - Errors are categorized for different handling strategies
/// - All errors are `Send + Sync` for async compatibility
#[derive(Debug, Error)]
pub enum SyncError {
    // =========================================================================
    // Construction Errors
    // =========================================================================
    /// Two repositories registered under the same name.
    #[error("Duplicate repository name: {0}")]
    DuplicateRepository(String),

    /// A required builder callback was not supplied.
    #[error("{component} requires a '{callback}' callback")]
    MissingCallback {
        component: String,
        callback: &'static str,
    },

    /// Client built without a storage port.
    #[error("Sync client requires a storage port")]
    MissingStorage,

    /// Invalid engine configuration.
    #[error("Invalid sync configuration: {0}")]
    InvalidConfig(String),

    /// Failed to load config file.
    #[error("Failed to load config: {0}")]
    ConfigLoadFailed(String),

    /// Failed to save config file.
    #[error("Failed to save config: {0}")]
    ConfigSaveFailed(String),

    // =========================================================================
    // Deserialization Errors
    // =========================================================================
    /// A payload could not be decoded into the repository's type.
    #[error("Failed to decode {repository} payload: {reason}")]
    Deserialization {
        repository: String,
        payload: Value,
        reason: String,
    },

    /// Some items of a pulled batch failed; every other item was applied.
    #[error("Pull into {repository} failed for {} item(s), {applied} applied", .failures.len())]
    PullFailed {
        repository: String,
        applied: usize,
        failures: Vec<PullFailure>,
    },

    /// Failed to encode a payload.
    #[error("Serialization failed: {0}")]
    Serialization(String),

    // =========================================================================
    // Transport Errors
    // =========================================================================
    /// Push, fetch, or ping failed at the I/O layer.
    #[error("Transport error: {0}")]
    Transport(String),

    /// A remote call did not answer in time.
    #[error("Remote call timed out after {0} ms")]
    Timeout(u64),

    // =========================================================================
    // Lookup Errors
    // =========================================================================
    #[error("Repository not found: {0}")]
    RepositoryNotFound(String),

    /// Repository exists but holds a different payload type.
    #[error("Repository {name} is not a Repository<{expected}>")]
    RepositoryTypeMismatch { name: String, expected: &'static str },

    // =========================================================================
    // Lifecycle Errors
    // =========================================================================
    /// Storage or config used before `initialize()`.
    #[error("Sync client not initialized")]
    NotInitialized,

    /// Storage adapter failure.
    #[error("Storage error: {0}")]
    Storage(DbError),

    /// `start()` called after `dispose()`.
    #[error("Strategy {0} has been disposed")]
    StrategyDisposed(String),

    /// The strategy outlived its client.
    #[error("Sync client has been dropped")]
    ClientDropped,

    #[error("Sync client has been disposed")]
    Disposed,

    /// A gated client operation was called from inside a sync cycle, which
    /// would wait on itself.
    #[error("{operation} cannot be called from inside a {strategy} sync cycle")]
    CalledFromCycle {
        operation: &'static str,
        strategy: String,
    },
}

// =============================================================================
// Error Conversions
// =============================================================================

impl From<DbError> for SyncError {
    fn from(err: DbError) -> Self {
        match err {
            DbError::NotInitialized => SyncError::NotInitialized,
            other => SyncError::Storage(other),
        }
    }
}

impl From<serde_json::Error> for SyncError {
    fn from(err: serde_json::Error) -> Self {
        SyncError::Serialization(err.to_string())
    }
}

impl From<std::io::Error> for SyncError {
    fn from(err: std::io::Error) -> Self {
        SyncError::ConfigLoadFailed(err.to_string())
    }
}

impl From<toml::de::Error> for SyncError {
    fn from(err: toml::de::Error) -> Self {
        SyncError::ConfigLoadFailed(err.to_string())
    }
}

impl From<toml::ser::Error> for SyncError {
    fn from(err: toml::ser::Error) -> Self {
        SyncError::ConfigSaveFailed(err.to_string())
    }
}

// =============================================================================
// Error Categorization (for retry logic)
// =============================================================================

impl SyncError {
    /// Returns true if the next scheduled cycle may succeed where this one
    /// failed.
    ///
    /// ## Retryable Errors
    /// - Transport failures and timeouts
    /// - Storage connection hiccups
    ///
    /// ## Non-Retryable Errors
    /// - Construction and lookup errors
    /// - Malformed remote payloads
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            SyncError::Transport(_)
                | SyncError::Timeout(_)
                | SyncError::Storage(DbError::ConnectionFailed(_))
        )
    }

    /// Returns true if this error came from the I/O layer of a remote call.
    pub fn is_transport(&self) -> bool {
        matches!(self, SyncError::Transport(_) | SyncError::Timeout(_))
    }

    /// Returns true if this error is fatal at setup time.
    pub fn is_construction_error(&self) -> bool {
        matches!(
            self,
            SyncError::DuplicateRepository(_)
                | SyncError::MissingCallback { .. }
                | SyncError::MissingStorage
                | SyncError::InvalidConfig(_)
        )
    }

    /// The failed items of an aggregate pull error.
    pub fn pull_failures(&self) -> &[PullFailure] {
        match self {
            SyncError::PullFailed { failures, .. } => failures,
            _ => &[],
        }
    }
}
