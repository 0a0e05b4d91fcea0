//! # In-Memory Adapter
//!
//! A complete [`StoragePort`] kept in process memory. Used by tests and by
//! applications that want an ephemeral local replica.
//!
//! ## Layout
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  MemoryStorage (Clone = shared handle)                                  │
//! │                                                                         │
//! │  rows:    namespace ─► table ─► record_id ─► RawEvent                  │
//! │  config:  namespace ─► key ─► ConfigValue                              │
//! │  schemas: table ─► TableSchema                                         │
//! │                                                                         │
//! │  notifier: ChangeNotifier ──► watch_query streams                      │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use async_trait::async_trait;
use tessera_core::{ConfigValue, QuerySpec, RawEvent, DEFAULT_NAMESPACE};
use tokio::sync::RwLock;
use tracing::{debug, info};

use crate::error::{DbError, DbResult};
use crate::notify::{Change, ChangeNotifier};
use crate::port::{ConfigPort, StoragePort, TableSchema, WatchStream};

type Rows = BTreeMap<String, RawEvent>;

#[derive(Debug)]
struct State {
    initialized: bool,
    closed: bool,
    namespace: String,
    rows: HashMap<String, HashMap<String, Rows>>,
    config: HashMap<String, BTreeMap<String, ConfigValue>>,
    schemas: HashMap<String, TableSchema>,
}

impl State {
    fn ready(&self) -> DbResult<()> {
        if self.closed {
            Err(DbError::Closed)
        } else if !self.initialized {
            Err(DbError::NotInitialized)
        } else {
            Ok(())
        }
    }

    fn table(&self, table: &str) -> Option<&Rows> {
        self.rows.get(&self.namespace).and_then(|t| t.get(table))
    }

    fn table_mut(&mut self, table: &str) -> &mut Rows {
        self.rows
            .entry(self.namespace.clone())
            .or_default()
            .entry(table.to_string())
            .or_default()
    }

    fn config(&self) -> Option<&BTreeMap<String, ConfigValue>> {
        self.config.get(&self.namespace)
    }
}

#[derive(Debug)]
struct Inner {
    state: RwLock<State>,
    notifier: ChangeNotifier,
}

/// In-memory storage and config adapter.
#[derive(Debug, Clone)]
pub struct MemoryStorage {
    inner: Arc<Inner>,
}

impl Default for MemoryStorage {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStorage {
    pub fn new() -> Self {
        MemoryStorage {
            inner: Arc::new(Inner {
                state: RwLock::new(State {
                    initialized: false,
                    closed: false,
                    namespace: DEFAULT_NAMESPACE.to_string(),
                    rows: HashMap::new(),
                    config: HashMap::new(),
                    schemas: HashMap::new(),
                }),
                notifier: ChangeNotifier::new(),
            }),
        }
    }

    /// Schema declared for a table, if any.
    pub async fn schema(&self, table: &str) -> Option<TableSchema> {
        self.inner.state.read().await.schemas.get(table).cloned()
    }
}

#[async_trait]
impl ConfigPort for MemoryStorage {
    async fn initialize(&self) -> DbResult<()> {
        let mut state = self.inner.state.write().await;
        if state.closed {
            return Err(DbError::Closed);
        }
        state.initialized = true;
        debug!(namespace = %state.namespace, "Memory storage initialized");
        Ok(())
    }

    async fn close(&self) -> DbResult<()> {
        let mut state = self.inner.state.write().await;
        state.closed = true;
        state.initialized = false;
        debug!("Memory storage closed");
        Ok(())
    }

    async fn use_namespace(&self, namespace: &str) -> DbResult<()> {
        {
            let mut state = self.inner.state.write().await;
            state.ready()?;
            if state.namespace == namespace {
                return Ok(());
            }
            info!(from = %state.namespace, to = %namespace, "Switching namespace");
            state.namespace = namespace.to_string();
        }
        self.inner.notifier.notify(Change::All);
        Ok(())
    }

    async fn get(&self, key: &str) -> DbResult<Option<ConfigValue>> {
        let state = self.inner.state.read().await;
        state.ready()?;
        Ok(state.config().and_then(|c| c.get(key)).cloned())
    }

    async fn set(&self, key: &str, value: ConfigValue) -> DbResult<()> {
        let mut state = self.inner.state.write().await;
        state.ready()?;
        let namespace = state.namespace.clone();
        state
            .config
            .entry(namespace)
            .or_default()
            .insert(key.to_string(), value);
        Ok(())
    }

    async fn remove(&self, key: &str) -> DbResult<()> {
        let mut state = self.inner.state.write().await;
        state.ready()?;
        let namespace = state.namespace.clone();
        if let Some(config) = state.config.get_mut(&namespace) {
            config.remove(key);
        }
        Ok(())
    }

    async fn list_keys(&self) -> DbResult<Vec<String>> {
        let state = self.inner.state.read().await;
        state.ready()?;
        Ok(state
            .config()
            .map(|c| c.keys().cloned().collect())
            .unwrap_or_default())
    }
}

#[async_trait]
impl StoragePort for MemoryStorage {
    fn config_port(self: Arc<Self>) -> Arc<dyn ConfigPort> {
        self
    }

    async fn namespace(&self) -> String {
        self.inner.state.read().await.namespace.clone()
    }

    async fn ensure_schema(&self, schema: &TableSchema) -> DbResult<()> {
        let mut state = self.inner.state.write().await;
        state.ready()?;
        let merged = match state.schemas.get(&schema.table) {
            Some(existing) => existing.merge(schema)?,
            None => schema.clone(),
        };
        state.schemas.insert(schema.table.clone(), merged);
        Ok(())
    }

    async fn insert(&self, table: &str, event: &RawEvent) -> DbResult<()> {
        {
            let mut state = self.inner.state.write().await;
            state.ready()?;
            state
                .table_mut(table)
                .insert(event.record_id().to_string(), event.clone());
        }
        self.inner.notifier.table_changed(table);
        Ok(())
    }

    async fn update(&self, table: &str, event: &RawEvent) -> DbResult<()> {
        {
            let mut state = self.inner.state.write().await;
            state.ready()?;
            let rows = state.table_mut(table);
            let slot = rows
                .get_mut(event.record_id())
                .ok_or_else(|| DbError::not_found(table, event.record_id()))?;
            *slot = event.clone();
        }
        self.inner.notifier.table_changed(table);
        Ok(())
    }

    async fn delete(&self, table: &str, record_id: &str) -> DbResult<()> {
        let removed = {
            let mut state = self.inner.state.write().await;
            state.ready()?;
            state.table_mut(table).remove(record_id).is_some()
        };
        if removed {
            self.inner.notifier.table_changed(table);
        }
        Ok(())
    }

    async fn get_all(&self, table: &str) -> DbResult<Vec<RawEvent>> {
        let state = self.inner.state.read().await;
        state.ready()?;
        Ok(state
            .table(table)
            .map(|rows| rows.values().cloned().collect())
            .unwrap_or_default())
    }

    async fn get_by_id(&self, table: &str, record_id: &str) -> DbResult<Option<RawEvent>> {
        let state = self.inner.state.read().await;
        state.ready()?;
        Ok(state.table(table).and_then(|rows| rows.get(record_id)).cloned())
    }

    async fn query(&self, spec: &QuerySpec) -> DbResult<Vec<RawEvent>> {
        let rows = self.get_all(&spec.table).await?;
        Ok(spec.apply(rows))
    }

    fn watch_query(&self, spec: QuerySpec) -> WatchStream {
        let storage = self.clone();
        let table = spec.table.clone();
        let spec = Arc::new(spec);
        self.inner.notifier.watch(table, move || {
            let storage = storage.clone();
            let spec = Arc::clone(&spec);
            async move { storage.query(&spec).await }
        })
    }

    async fn clear_all(&self) -> DbResult<()> {
        {
            let mut state = self.inner.state.write().await;
            state.ready()?;
            state.rows.clear();
            state.config.clear();
            state.schemas.clear();
        }
        info!("Memory storage cleared");
        self.inner.notifier.notify(Change::All);
        Ok(())
    }
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use futures_util::StreamExt;
    use serde_json::json;
    use tessera_core::{Event, FilterOp, SyncOperation};

    fn user(id: &str, name: &str) -> RawEvent {
        Event::new_local("user", id, SyncOperation::Insert, Some(json!({"id": id, "name": name})))
    }

    async fn ready() -> MemoryStorage {
        let storage = MemoryStorage::new();
        storage.initialize().await.unwrap();
        storage
    }

    #[tokio::test]
    async fn test_requires_initialize() {
        let storage = MemoryStorage::new();
        assert!(matches!(
            storage.get_all("user").await,
            Err(DbError::NotInitialized)
        ));
        assert!(matches!(storage.get("k").await, Err(DbError::NotInitialized)));
    }

    #[tokio::test]
    async fn test_insert_replaces_and_update_requires_row() {
        let storage = ready().await;
        storage.insert("user", &user("u1", "Ann")).await.unwrap();
        storage.insert("user", &user("u1", "Ann2")).await.unwrap();

        let rows = storage.get_all("user").await.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].payload().unwrap()["name"], "Ann2");

        let missing = storage.update("user", &user("u9", "Zed")).await;
        assert!(matches!(missing, Err(DbError::NotFound { .. })));
    }

    #[tokio::test]
    async fn test_namespaces_are_isolated() {
        let storage = ready().await;
        storage.insert("user", &user("u1", "Ann")).await.unwrap();
        storage.set("cursor", ConfigValue::Int(3)).await.unwrap();

        storage.use_namespace("bob").await.unwrap();
        assert!(storage.get_all("user").await.unwrap().is_empty());
        assert!(!storage.contains("cursor").await.unwrap());

        storage.use_namespace(DEFAULT_NAMESPACE).await.unwrap();
        assert_eq!(storage.get_all("user").await.unwrap().len(), 1);
        assert_eq!(storage.list_keys().await.unwrap(), vec!["cursor".to_string()]);
    }

    #[tokio::test]
    async fn test_schema_id_field_is_fixed() {
        let storage = ready().await;
        storage.ensure_schema(&TableSchema::new("user", "id")).await.unwrap();
        storage.ensure_schema(&TableSchema::new("user", "id")).await.unwrap();
        let changed = storage.ensure_schema(&TableSchema::new("user", "uid")).await;
        assert!(matches!(changed, Err(DbError::SchemaMismatch { .. })));
    }

    #[tokio::test]
    async fn test_query_and_watch() {
        let storage = ready().await;
        storage.insert("user", &user("u1", "Ann")).await.unwrap();

        let spec = QuerySpec::table("user").filter("name", FilterOp::Eq, json!("Bob"));
        let mut watch = storage.watch_query(spec.clone());
        assert!(watch.next().await.unwrap().unwrap().is_empty());

        storage.insert("user", &user("u2", "Bob")).await.unwrap();
        let rows = watch.next().await.unwrap().unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(storage.query(&spec).await.unwrap().len(), 1);

        storage.clear_all().await.unwrap();
        assert!(watch.next().await.unwrap().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_closed_storage_rejects_calls() {
        let storage = ready().await;
        storage.close().await.unwrap();
        assert!(matches!(storage.get_all("user").await, Err(DbError::Closed)));
        assert!(matches!(storage.initialize().await, Err(DbError::Closed)));
    }
}
