//! # Storage Port
//!
//! The interface the sync engine depends on. Adapters implement both traits;
//! the engine never sees SQL or maps directly.
//!
//! ## Port Surface
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                        Storage Port                                     │
//! │                                                                         │
//! │  ConfigPort (namespaced scalar key/value)                              │
//! │  ├── initialize / close / use_namespace                                │
//! │  └── get / set / remove / contains / list_keys                         │
//! │                                                                         │
//! │  StoragePort : ConfigPort (namespaced event rows)                      │
//! │  ├── ensure_schema(table schema)                                       │
//! │  ├── insert / update / delete / get_all / get_by_id                    │
//! │  ├── query(QuerySpec)                                                  │
//! │  ├── watch_query(QuerySpec) ──► snapshot, then one per change          │
//! │  └── clear_all                                                         │
//! │                                                                         │
//! │  Rows are the latest Event for each (namespace, table, record id).     │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Every method fails with [`DbError::NotInitialized`] before `initialize()`.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use futures_util::stream::BoxStream;
use serde::{Deserialize, Serialize};
use tessera_core::{ConfigValue, QuerySpec, RawEvent};

use crate::error::{DbError, DbResult};

/// Live result-set stream returned by [`StoragePort::watch_query`].
pub type WatchStream = BoxStream<'static, DbResult<Vec<RawEvent>>>;

// =============================================================================
// Table Schema
// =============================================================================

/// Declared type of a payload field.
///
/// Adapters that store JSON payloads keep this as metadata only.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldType {
    Text,
    Integer,
    Real,
    Bool,
    Timestamp,
    Json,
}

/// Table declaration passed to [`StoragePort::ensure_schema`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TableSchema {
    pub table: String,
    pub id_field: String,
    #[serde(default)]
    pub fields: BTreeMap<String, FieldType>,
}

impl TableSchema {
    pub fn new(table: impl Into<String>, id_field: impl Into<String>) -> Self {
        TableSchema {
            table: table.into(),
            id_field: id_field.into(),
            fields: BTreeMap::new(),
        }
    }

    pub fn field(mut self, name: impl Into<String>, field_type: FieldType) -> Self {
        self.fields.insert(name.into(), field_type);
        self
    }

    /// Combines a re-declared schema with the stored one.
    ///
    /// The id field is fixed once declared; new fields are added, existing
    /// fields take the newer type.
    pub fn merge(&self, newer: &TableSchema) -> DbResult<TableSchema> {
        if self.id_field != newer.id_field {
            return Err(DbError::SchemaMismatch {
                table: self.table.clone(),
                reason: format!(
                    "id field is '{}', cannot change to '{}'",
                    self.id_field, newer.id_field
                ),
            });
        }
        let mut merged = self.clone();
        merged.fields.extend(newer.fields.clone());
        Ok(merged)
    }
}

// =============================================================================
// Config Port
// =============================================================================

/// Namespaced scalar key/value store.
///
/// Keys are logically prefixed by the active namespace: a key set in one
/// namespace is invisible from every other.
#[async_trait]
pub trait ConfigPort: Send + Sync {
    async fn initialize(&self) -> DbResult<()>;

    async fn close(&self) -> DbResult<()>;

    /// Switches the active partition for all later calls.
    async fn use_namespace(&self, namespace: &str) -> DbResult<()>;

    async fn get(&self, key: &str) -> DbResult<Option<ConfigValue>>;

    async fn set(&self, key: &str, value: ConfigValue) -> DbResult<()>;

    async fn remove(&self, key: &str) -> DbResult<()>;

    async fn contains(&self, key: &str) -> DbResult<bool> {
        Ok(self.get(key).await?.is_some())
    }

    /// Keys of the active namespace, sorted.
    async fn list_keys(&self) -> DbResult<Vec<String>>;
}

// =============================================================================
// Storage Port
// =============================================================================

/// Namespaced event store.
#[async_trait]
pub trait StoragePort: ConfigPort {
    /// The same adapter viewed as its config port.
    fn config_port(self: Arc<Self>) -> Arc<dyn ConfigPort>;

    /// Name of the active namespace.
    async fn namespace(&self) -> String;

    /// Declares a table. Idempotent; see [`TableSchema::merge`].
    async fn ensure_schema(&self, schema: &TableSchema) -> DbResult<()>;

    /// Writes the event as the current row for its record id.
    ///
    /// Insert-or-replace: retrying with the same record id overwrites.
    async fn insert(&self, table: &str, event: &RawEvent) -> DbResult<()>;

    /// Replaces an existing row; [`DbError::NotFound`] if absent.
    async fn update(&self, table: &str, event: &RawEvent) -> DbResult<()>;

    /// Physically removes a row. Soft deletes are tombstone events written
    /// with `insert`, not this.
    async fn delete(&self, table: &str, record_id: &str) -> DbResult<()>;

    /// All rows of the table, tombstones included, ordered by record id.
    async fn get_all(&self, table: &str) -> DbResult<Vec<RawEvent>>;

    async fn get_by_id(&self, table: &str, record_id: &str) -> DbResult<Option<RawEvent>>;

    async fn query(&self, spec: &QuerySpec) -> DbResult<Vec<RawEvent>>;

    /// Emits the current result set immediately, then again after every
    /// change to `spec.table` (or namespace switch / clear).
    fn watch_query(&self, spec: QuerySpec) -> WatchStream;

    /// Wipes every namespace: rows, schemas, and config values.
    ///
    /// The adapter stays initialized and keeps its active namespace.
    async fn clear_all(&self) -> DbResult<()>;
}
