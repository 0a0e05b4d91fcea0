//! # tessera-core: Pure Sync Model for Tessera
//!
//! This crate is the **heart** of the Tessera sync engine. It contains the
//! event model and the conflict algorithm as pure functions with zero I/O.
//!
//! ## Architecture Position
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                        Tessera Architecture                             │
//! │                                                                         │
//! │  ┌─────────────────────────────────────────────────────────────────┐   │
//! │  │                 Application (domain types)                      │   │
//! │  │       User ──► Repository<User>      Chat ──► Repository<Chat>  │   │
//! │  └─────────────────────────────┬───────────────────────────────────┘   │
//! │                                │                                        │
//! │  ┌─────────────────────────────▼───────────────────────────────────┐   │
//! │  │                 tessera-sync (Client, Strategies)               │   │
//! │  └─────────────────────────────┬───────────────────────────────────┘   │
//! │                                │                                        │
//! │  ┌─────────────────────────────▼───────────────────────────────────┐   │
//! │  │               ★ tessera-core (THIS CRATE) ★                     │   │
//! │  │                                                                 │   │
//! │  │   ┌───────────┐  ┌───────────┐  ┌───────────┐  ┌───────────┐  │   │
//! │  │   │    id     │  │   event   │  │ conflict  │  │   query   │  │   │
//! │  │   │  UUIDv7   │  │ Event<T>  │  │    LWW    │  │ QuerySpec │  │   │
//! │  │   └───────────┘  └───────────┘  └───────────┘  └───────────┘  │   │
//! │  │                                                                 │   │
//! │  │   NO I/O • NO DATABASE • NO NETWORK • PURE FUNCTIONS           │   │
//! │  └─────────────────────────────────────────────────────────────────┘   │
//! │                                │                                        │
//! │  ┌─────────────────────────────▼───────────────────────────────────┐   │
//! │  │                 tessera-db (Storage Port + Adapters)            │   │
//! │  └─────────────────────────────────────────────────────────────────┘   │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Modules
//!
//! - [`id`] - Time-ordered 128-bit identifiers (UUIDv7 layout)
//! - [`event`] - The `Event<T>` sync envelope and its wire codec
//! - [`conflict`] - Last-write-wins resolution
//! - [`query`] - Filter/sort/limit/offset specs evaluated over JSON payloads
//! - [`value`] - Scalar config values
//! - [`error`] - Core error types
//!
//! ## Example Usage
//!
//! ```rust
//! use tessera_core::{conflict, Event, EventParts, SyncOperation, SyncStatus};
//! use chrono::{Duration, Utc};
//!
//! let now = Utc::now();
//! let local = Event::from(EventParts {
//!     event_id: tessera_core::new_id(),
//!     repository_name: "user".into(),
//!     record_id: "u1".into(),
//!     operation: SyncOperation::Update,
//!     payload: Some("Ann"),
//!     sync_status: SyncStatus::Pending,
//!     sync_created_at: now,
//!     server_sequence: None,
//! });
//! let remote = Event::from(EventParts {
//!     payload: Some("Ann2"),
//!     sync_status: SyncStatus::Ok,
//!     sync_created_at: now - Duration::seconds(5),
//!     server_sequence: Some(5),
//!     ..local.clone().into_parts()
//! });
//!
//! // A server-sequenced event beats a local draft.
//! let winner = conflict::last_write_wins(&local, &remote);
//! assert_eq!(winner.payload(), Some(&"Ann2"));
//! ```

// =============================================================================
// Module Declarations
// =============================================================================

pub mod conflict;
pub mod error;
pub mod event;
pub mod id;
pub mod query;
pub mod value;

// =============================================================================
// Re-exports for Convenience
// =============================================================================

pub use conflict::{last_write_wins, Resolution, Side};
pub use error::{CoreError, CoreResult};
pub use event::{Event, EventParts, RawEvent, SyncOperation, SyncStatus};
pub use id::new_id;
pub use query::{Filter, FilterOp, QuerySpec, Sort, SortOrder};
pub use value::ConfigValue;

// =============================================================================
// Crate-Level Constants
// =============================================================================

/// Namespace used until the application selects one.
///
/// Storage and config ports start out in this partition.
pub const DEFAULT_NAMESPACE: &str = "default";

/// Default wire name of the primary key field inside a payload.
pub const DEFAULT_ID_FIELD: &str = "id";
