//! # Error Types
//!
//! Pure-model errors for tessera-core.
//!
//! ## Error Hierarchy
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                         Error Types                                     │
//! │                                                                         │
//! │  tessera-core errors (this file)                                       │
//! │  └── CoreError        - Malformed ids, wire values, events             │
//! │                                                                         │
//! │  tessera-db errors (separate crate)                                    │
//! │  └── DbError          - Storage port failures                          │
//! │                                                                         │
//! │  tessera-sync errors (separate crate)                                  │
//! │  └── SyncError        - Construction, pull, transport, lookup          │
//! │                                                                         │
//! │  Flow: CoreError → DbError / SyncError → caller of the operation       │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use thiserror::Error;

/// Result type for core operations.
pub type CoreResult<T> = Result<T, CoreError>;

/// Errors raised while decoding or validating sync model values.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum CoreError {
    /// Identifier is not a valid hyphenated 128-bit id.
    #[error("Invalid identifier: {0}")]
    InvalidId(String),

    /// Operation is neither a known ordinal nor a known name.
    #[error("Invalid sync operation: {0}")]
    InvalidOperation(String),

    /// Timestamp is neither epoch millis nor RFC 3339.
    #[error("Invalid timestamp: {0}")]
    InvalidTimestamp(String),

    /// Wire event is structurally wrong (not an object, missing keys, ...).
    ///
    /// ## When This Occurs
    /// - Remote pull returned a non-object item
    /// - `recordId` absent and the payload has no id field either
    /// - A required key has the wrong JSON type
    #[error("Malformed event: {0}")]
    MalformedEvent(String),
}

impl From<serde_json::Error> for CoreError {
    fn from(err: serde_json::Error) -> Self {
        CoreError::MalformedEvent(err.to_string())
    }
}
