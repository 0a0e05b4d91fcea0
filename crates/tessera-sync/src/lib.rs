//! # tessera-sync: Sync Engine for Tessera
//!
//! This crate turns typed domain records into sync-tracked events, keeps
//! them in a local store and reconciles them with a remote authority.
//!
//! ## Architecture Overview
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                        Tessera Sync Engine                              │
//! │                                                                         │
//! │   Application                                                          │
//! │   repo.upsert(user) ──► Event { status: pending } ──► StoragePort      │
//! │                                                                         │
//! │   ┌──────────────────────┐         ┌──────────────────────────────┐    │
//! │   │      SyncClient      │◄────────│     SyncStrategy (1..n)      │    │
//! │   │                      │         │                              │    │
//! │   │ repositories by name │         │ Periodic: timer, busy skip   │    │
//! │   │ pending / confirm    │         │ Manual:   sync_now           │    │
//! │   │ pull_changes fanout  │         │                              │    │
//! │   │ namespace gate       │         │ push(repo, events) ──► remote│    │
//! │   │ ready / connection   │         │ fetch(repo, filter) ◄── remote    │
//! │   └──────────┬───────────┘         └──────────────────────────────┘    │
//! │              │                                                          │
//! │   ┌──────────▼───────────┐      conflict: last-write-wins              │
//! │   │     Repository<T>    │      (serverSequence, then syncCreatedAt)   │
//! │   └──────────┬───────────┘                                              │
//! │              ▼                                                          │
//! │   tessera-db: MemoryStorage | SqliteStorage                            │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Module Organization
//!
//! - [`repository`] - Typed `Repository<T>`, queries and remote merge
//! - [`client`] - `SyncClient` registry and lifecycle
//! - [`strategy`] - Periodic and manual sync strategies
//! - [`cursor`] - `serverSequence` cursor helpers
//! - [`protocol`] - Push batch shape
//! - [`config`] - TOML configuration with env overrides
//! - [`error`] - Sync error types
//!
//! ## Usage
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use tessera_sync::{
//!     config, EngineConfig, PeriodicSyncStrategy, Repository, SyncCallbacks, SyncClient,
//! };
//!
//! let settings = EngineConfig::load_or_default(None);
//! let storage = config::open_storage(&settings.storage).await?;
//!
//! let users = Arc::new(Repository::<User>::builder("user").id(|u| u.id.clone()).build()?);
//! let periodic = PeriodicSyncStrategy::builder()
//!     .period_from(&settings.sync)
//!     .callbacks(
//!         SyncCallbacks::new()
//!             .fetch(move |repo, filter| api.pull(repo, filter))
//!             .push(move |repo, events| api.push(repo, events))
//!             .with_sequence_cursor(),
//!     )
//!     .build()?;
//!
//! let client = SyncClient::builder()
//!     .storage(storage)
//!     .repository(Arc::clone(&users))
//!     .strategy(periodic)
//!     .build()?;
//!
//! client.initialize().await?;
//! client.use_namespace(&settings.sync.namespace).await?;
//! client.start_sync().await?;
//!
//! users.upsert(User { id: "u1".into(), name: "Ann".into() }).await?;
//! ```

// =============================================================================
// Module Declarations
// =============================================================================

pub mod client;
pub mod config;
pub mod cursor;
pub mod error;
pub mod protocol;
pub mod repository;
pub mod strategy;

// =============================================================================
// Re-exports
// =============================================================================

pub use client::{PullSummary, SyncClient, SyncClientBuilder};
pub use config::{EngineConfig, StorageBackend, StorageSettings, SyncSettings};
pub use error::{PullFailure, SyncError, SyncResult};
pub use protocol::ChangeBatch;
pub use repository::{
    CompactionPolicy, KeepAll, MergeOutcome, Payload, PruneSyncedTombstones, QueryBuilder,
    Repository, RepositoryBuilder, SyncRepository,
};
pub use strategy::{
    ManualSyncStrategy, ManualSyncStrategyBuilder, PeriodicSyncStrategy,
    PeriodicSyncStrategyBuilder, SyncCallbacks, SyncPhase, SyncStrategy, TickError, TickOutcome,
    TickReport,
};

// The model and storage types appear in most signatures of this crate.
pub use tessera_core::{Event, RawEvent, SyncOperation, SyncStatus};
pub use tessera_db::{MemoryStorage, SqliteStorage, StoragePort};
