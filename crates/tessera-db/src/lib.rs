//! # tessera-db: Storage Layer for Tessera
//!
//! This crate defines the storage port the sync engine depends on and the
//! adapters that implement it.
//!
//! ## Architecture Position
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                        Tessera Data Flow                                │
//! │                                                                         │
//! │  Repository<T>::upsert / pull merge / watch                            │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  ┌─────────────────────────────────────────────────────────────────┐   │
//! │  │                     tessera-db (THIS CRATE)                     │   │
//! │  │                                                                 │   │
//! │  │   ┌───────────────┐    ┌───────────────┐    ┌──────────────┐  │   │
//! │  │   │  StoragePort  │    │   Adapters    │    │  Migrations  │  │   │
//! │  │   │  ConfigPort   │◄───│ MemoryStorage │    │  (embedded)  │  │   │
//! │  │   │   (port.rs)   │    │ SqliteStorage │    │ 001_init.sql │  │   │
//! │  │   └───────────────┘    └───────┬───────┘    └──────────────┘  │   │
//! │  │                                │                               │   │
//! │  │                        ┌───────▼───────┐                       │   │
//! │  │                        │ChangeNotifier │ ──► watch_query       │   │
//! │  │                        └───────────────┘                       │   │
//! │  └─────────────────────────────────────────────────────────────────┘   │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  SQLite file (WAL) or process memory                                   │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Module Organization
//!
//! - [`port`] - `StoragePort` / `ConfigPort` traits and table schemas
//! - [`notify`] - Change feed backing `watch_query`
//! - [`memory`] - In-memory adapter
//! - [`sqlite`] - SQLite adapter
//! - [`pool`] - Connection pool creation and configuration
//! - [`migrations`] - Embedded database migrations
//! - [`error`] - Storage error types
//!
//! ## Usage
//!
//! ```rust,ignore
//! use tessera_db::{ConfigPort, DbConfig, SqliteStorage, StoragePort};
//!
//! let storage = SqliteStorage::open(DbConfig::new("path/to/tessera.db")).await?;
//! storage.initialize().await?;
//! storage.use_namespace("alice").await?;
//! let users = storage.get_all("user").await?;
//! ```

// =============================================================================
// Module Declarations
// =============================================================================

pub mod error;
pub mod memory;
pub mod migrations;
pub mod notify;
pub mod pool;
pub mod port;
pub mod sqlite;

// =============================================================================
// Re-exports
// =============================================================================

pub use error::{DbError, DbResult};
pub use memory::MemoryStorage;
pub use notify::{Change, ChangeNotifier};
pub use pool::DbConfig;
pub use port::{ConfigPort, FieldType, StoragePort, TableSchema, WatchStream};
pub use sqlite::{SqliteStorage, TableStats};
