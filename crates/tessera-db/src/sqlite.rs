//! # SQLite Adapter
//!
//! [`StoragePort`] over a sqlx `SqlitePool`. One `sync_events` table holds
//! the latest event of every record across all namespaces and repository
//! tables; queries load the table's rows and evaluate the [`QuerySpec`]
//! in process, so filter semantics match every other adapter exactly.
//!
//! ## Row Mapping
//! ```text
//! Event field       column            encoding
//! ───────────────   ───────────────   ───────────────────────
//! eventId           event_id          TEXT
//! repositoryName    repository_name   TEXT
//! recordId          record_id         TEXT (part of PK)
//! operation         operation         'insert'|'update'|'delete'
//! payload           payload           JSON TEXT or NULL
//! syncStatus        sync_status       'pending'|'ok'|'failed'
//! syncCreatedAt     sync_created_at   INTEGER epoch millis
//! serverSequence    server_sequence   INTEGER or NULL
//! ```

use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use serde::Serialize;
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};
use tessera_core::event::wire_time;
use tessera_core::{ConfigValue, Event, EventParts, QuerySpec, RawEvent, DEFAULT_NAMESPACE};
use tokio::sync::RwLock;
use tracing::{debug, info};

use crate::error::{DbError, DbResult};
use crate::migrations;
use crate::notify::{Change, ChangeNotifier};
use crate::pool::{self, DbConfig};
use crate::port::{ConfigPort, StoragePort, TableSchema, WatchStream};

const EVENT_COLUMNS: &str = "record_id, event_id, repository_name, operation, sync_status, \
                             sync_created_at, server_sequence, payload";

#[derive(Debug)]
struct State {
    initialized: bool,
    closed: bool,
    namespace: String,
}

impl State {
    fn ready(&self) -> DbResult<&str> {
        if self.closed {
            Err(DbError::Closed)
        } else if !self.initialized {
            Err(DbError::NotInitialized)
        } else {
            Ok(&self.namespace)
        }
    }
}

#[derive(Debug)]
struct Inner {
    pool: SqlitePool,
    config: DbConfig,
    state: RwLock<State>,
    notifier: ChangeNotifier,
}

/// Row counts of one (namespace, table) pair.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TableStats {
    pub namespace: String,
    pub table: String,
    pub total: i64,
    pub pending: i64,
    pub tombstones: i64,
}

/// SQLite-backed storage and config adapter.
///
/// Clone is cheap: clones share the pool, namespace, and change feed.
#[derive(Debug, Clone)]
pub struct SqliteStorage {
    inner: Arc<Inner>,
}

impl SqliteStorage {
    /// Creates the connection pool. Call [`ConfigPort::initialize`] before use.
    pub async fn open(config: DbConfig) -> DbResult<Self> {
        let pool = pool::connect(&config).await?;
        Ok(SqliteStorage {
            inner: Arc::new(Inner {
                pool,
                config,
                state: RwLock::new(State {
                    initialized: false,
                    closed: false,
                    namespace: DEFAULT_NAMESPACE.to_string(),
                }),
                notifier: ChangeNotifier::new(),
            }),
        })
    }

    /// Returns a reference to the connection pool.
    pub fn pool(&self) -> &SqlitePool {
        &self.inner.pool
    }

    /// Checks if the database can execute queries.
    pub async fn health_check(&self) -> bool {
        sqlx::query("SELECT 1")
            .execute(&self.inner.pool)
            .await
            .is_ok()
    }

    /// Row counts for every (namespace, table) pair in the store.
    ///
    /// Works across namespaces, so it ignores the active one.
    pub async fn table_stats(&self) -> DbResult<Vec<TableStats>> {
        self.inner.state.read().await.ready()?;

        let rows = sqlx::query(
            r#"
            SELECT
                namespace,
                table_name,
                COUNT(*) AS total,
                SUM(CASE WHEN sync_status != 'ok' THEN 1 ELSE 0 END) AS pending,
                SUM(CASE WHEN operation = 'delete' THEN 1 ELSE 0 END) AS tombstones
            FROM sync_events
            GROUP BY namespace, table_name
            ORDER BY namespace, table_name
            "#,
        )
        .fetch_all(&self.inner.pool)
        .await?;

        rows.iter()
            .map(|row| -> DbResult<TableStats> {
                Ok(TableStats {
                    namespace: row.try_get("namespace")?,
                    table: row.try_get("table_name")?,
                    total: row.try_get("total")?,
                    pending: row.try_get("pending")?,
                    tombstones: row.try_get("tombstones")?,
                })
            })
            .collect()
    }

    /// Declared schemas, ordered by table name.
    pub async fn schemas(&self) -> DbResult<Vec<TableSchema>> {
        self.inner.state.read().await.ready()?;

        let rows = sqlx::query("SELECT table_name, id_field, fields FROM sync_schemas ORDER BY table_name")
            .fetch_all(&self.inner.pool)
            .await?;

        rows.iter().map(row_to_schema).collect()
    }

    async fn active_namespace(&self) -> DbResult<String> {
        let state = self.inner.state.read().await;
        let namespace = state.ready()?.to_string();
        Ok(namespace)
    }

    async fn load_schema(&self, table: &str) -> DbResult<Option<TableSchema>> {
        let row = sqlx::query("SELECT table_name, id_field, fields FROM sync_schemas WHERE table_name = ?1")
            .bind(table)
            .fetch_optional(&self.inner.pool)
            .await?;

        row.as_ref().map(row_to_schema).transpose()
    }
}

fn row_to_schema(row: &SqliteRow) -> DbResult<TableSchema> {
    let fields: String = row.try_get("fields")?;
    Ok(TableSchema {
        table: row.try_get("table_name")?,
        id_field: row.try_get("id_field")?,
        fields: serde_json::from_str(&fields)?,
    })
}

fn row_to_event(row: &SqliteRow) -> DbResult<RawEvent> {
    let operation: String = row.try_get("operation")?;
    let status: String = row.try_get("sync_status")?;
    let created: i64 = row.try_get("sync_created_at")?;
    let payload: Option<String> = row.try_get("payload")?;

    Ok(Event::from(EventParts {
        event_id: row.try_get("event_id")?,
        repository_name: row.try_get("repository_name")?,
        record_id: row.try_get("record_id")?,
        operation: operation.parse()?,
        payload: payload.map(|p| serde_json::from_str(&p)).transpose()?,
        sync_status: status.parse()?,
        sync_created_at: wire_time::from_millis(created)?,
        server_sequence: row.try_get("server_sequence")?,
    }))
}

fn encode_payload(event: &RawEvent) -> DbResult<Option<String>> {
    Ok(event.payload().map(serde_json::to_string).transpose()?)
}

#[async_trait]
impl ConfigPort for SqliteStorage {
    async fn initialize(&self) -> DbResult<()> {
        let mut state = self.inner.state.write().await;
        if state.closed {
            return Err(DbError::Closed);
        }
        if state.initialized {
            return Ok(());
        }
        if self.inner.config.run_migrations {
            migrations::run_migrations(&self.inner.pool).await?;
        }
        state.initialized = true;
        info!(
            path = %self.inner.config.database_path.display(),
            namespace = %state.namespace,
            "SQLite storage initialized"
        );
        Ok(())
    }

    async fn close(&self) -> DbResult<()> {
        {
            let mut state = self.inner.state.write().await;
            state.closed = true;
            state.initialized = false;
        }
        info!("Closing database connection pool");
        self.inner.pool.close().await;
        Ok(())
    }

    async fn use_namespace(&self, namespace: &str) -> DbResult<()> {
        {
            let mut state = self.inner.state.write().await;
            let current = state.ready()?;
            if current == namespace {
                return Ok(());
            }
            info!(from = %current, to = %namespace, "Switching namespace");
            state.namespace = namespace.to_string();
        }
        self.inner.notifier.notify(Change::All);
        Ok(())
    }

    async fn get(&self, key: &str) -> DbResult<Option<ConfigValue>> {
        let namespace = self.active_namespace().await?;
        let value: Option<String> =
            sqlx::query_scalar("SELECT value FROM sync_meta WHERE namespace = ?1 AND key = ?2")
                .bind(&namespace)
                .bind(key)
                .fetch_optional(&self.inner.pool)
                .await?;

        Ok(value.map(|v| serde_json::from_str(&v)).transpose()?)
    }

    async fn set(&self, key: &str, value: ConfigValue) -> DbResult<()> {
        let namespace = self.active_namespace().await?;
        let encoded = serde_json::to_string(&value)?;
        sqlx::query(
            r#"
            INSERT INTO sync_meta (namespace, key, value) VALUES (?1, ?2, ?3)
            ON CONFLICT(namespace, key) DO UPDATE SET value = excluded.value
            "#,
        )
        .bind(&namespace)
        .bind(key)
        .bind(encoded)
        .execute(&self.inner.pool)
        .await?;
        Ok(())
    }

    async fn remove(&self, key: &str) -> DbResult<()> {
        let namespace = self.active_namespace().await?;
        sqlx::query("DELETE FROM sync_meta WHERE namespace = ?1 AND key = ?2")
            .bind(&namespace)
            .bind(key)
            .execute(&self.inner.pool)
            .await?;
        Ok(())
    }

    async fn list_keys(&self) -> DbResult<Vec<String>> {
        let namespace = self.active_namespace().await?;
        let keys = sqlx::query_scalar("SELECT key FROM sync_meta WHERE namespace = ?1 ORDER BY key")
            .bind(&namespace)
            .fetch_all(&self.inner.pool)
            .await?;
        Ok(keys)
    }
}

#[async_trait]
impl StoragePort for SqliteStorage {
    fn config_port(self: Arc<Self>) -> Arc<dyn ConfigPort> {
        self
    }

    async fn namespace(&self) -> String {
        self.inner.state.read().await.namespace.clone()
    }

    async fn ensure_schema(&self, schema: &TableSchema) -> DbResult<()> {
        self.active_namespace().await?;

        let merged = match self.load_schema(&schema.table).await? {
            Some(existing) => existing.merge(schema)?,
            None => schema.clone(),
        };

        sqlx::query(
            r#"
            INSERT INTO sync_schemas (table_name, id_field, fields, updated_at)
            VALUES (?1, ?2, ?3, ?4)
            ON CONFLICT(table_name) DO UPDATE SET
                fields = excluded.fields,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(&merged.table)
        .bind(&merged.id_field)
        .bind(serde_json::to_string(&merged.fields)?)
        .bind(Utc::now().timestamp_millis())
        .execute(&self.inner.pool)
        .await?;

        debug!(table = %merged.table, fields = merged.fields.len(), "Schema ensured");
        Ok(())
    }

    async fn insert(&self, table: &str, event: &RawEvent) -> DbResult<()> {
        let namespace = self.active_namespace().await?;

        sqlx::query(
            r#"
            INSERT OR REPLACE INTO sync_events (
                namespace, table_name, record_id, event_id, repository_name,
                operation, sync_status, sync_created_at, server_sequence, payload
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
            "#,
        )
        .bind(&namespace)
        .bind(table)
        .bind(event.record_id())
        .bind(event.event_id())
        .bind(event.repository_name())
        .bind(event.operation().as_str())
        .bind(event.sync_status().as_str())
        .bind(event.sync_created_at().timestamp_millis())
        .bind(event.server_sequence())
        .bind(encode_payload(event)?)
        .execute(&self.inner.pool)
        .await?;

        self.inner.notifier.table_changed(table);
        Ok(())
    }

    async fn update(&self, table: &str, event: &RawEvent) -> DbResult<()> {
        let namespace = self.active_namespace().await?;

        let result = sqlx::query(
            r#"
            UPDATE sync_events SET
                event_id = ?4,
                repository_name = ?5,
                operation = ?6,
                sync_status = ?7,
                sync_created_at = ?8,
                server_sequence = ?9,
                payload = ?10
            WHERE namespace = ?1 AND table_name = ?2 AND record_id = ?3
            "#,
        )
        .bind(&namespace)
        .bind(table)
        .bind(event.record_id())
        .bind(event.event_id())
        .bind(event.repository_name())
        .bind(event.operation().as_str())
        .bind(event.sync_status().as_str())
        .bind(event.sync_created_at().timestamp_millis())
        .bind(event.server_sequence())
        .bind(encode_payload(event)?)
        .execute(&self.inner.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(DbError::not_found(table, event.record_id()));
        }

        self.inner.notifier.table_changed(table);
        Ok(())
    }

    async fn delete(&self, table: &str, record_id: &str) -> DbResult<()> {
        let namespace = self.active_namespace().await?;

        let result = sqlx::query(
            "DELETE FROM sync_events WHERE namespace = ?1 AND table_name = ?2 AND record_id = ?3",
        )
        .bind(&namespace)
        .bind(table)
        .bind(record_id)
        .execute(&self.inner.pool)
        .await?;

        if result.rows_affected() > 0 {
            self.inner.notifier.table_changed(table);
        }
        Ok(())
    }

    async fn get_all(&self, table: &str) -> DbResult<Vec<RawEvent>> {
        let namespace = self.active_namespace().await?;

        let sql = format!(
            "SELECT {EVENT_COLUMNS} FROM sync_events \
             WHERE namespace = ?1 AND table_name = ?2 ORDER BY record_id"
        );
        let rows = sqlx::query(&sql)
            .bind(&namespace)
            .bind(table)
            .fetch_all(&self.inner.pool)
            .await?;

        rows.iter().map(row_to_event).collect()
    }

    async fn get_by_id(&self, table: &str, record_id: &str) -> DbResult<Option<RawEvent>> {
        let namespace = self.active_namespace().await?;

        let sql = format!(
            "SELECT {EVENT_COLUMNS} FROM sync_events \
             WHERE namespace = ?1 AND table_name = ?2 AND record_id = ?3"
        );
        let row = sqlx::query(&sql)
            .bind(&namespace)
            .bind(table)
            .bind(record_id)
            .fetch_optional(&self.inner.pool)
            .await?;

        row.as_ref().map(row_to_event).transpose()
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
        self.active_namespace().await?;

        let mut tx = self.inner.pool.begin().await?;
        sqlx::query("DELETE FROM sync_events").execute(&mut *tx).await?;
        sqlx::query("DELETE FROM sync_meta").execute(&mut *tx).await?;
        sqlx::query("DELETE FROM sync_schemas").execute(&mut *tx).await?;
        tx.commit().await?;

        info!("SQLite storage cleared");
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
    use tessera_core::{FilterOp, SortOrder, SyncOperation, SyncStatus};

    async fn storage() -> SqliteStorage {
        let storage = SqliteStorage::open(DbConfig::in_memory()).await.unwrap();
        storage.initialize().await.unwrap();
        storage
    }

    fn user(id: &str, name: &str, age: i64) -> RawEvent {
        Event::new_local(
            "user",
            id,
            SyncOperation::Insert,
            Some(json!({"id": id, "name": name, "age": age})),
        )
    }

    #[tokio::test]
    async fn test_not_initialized() {
        let storage = SqliteStorage::open(DbConfig::in_memory()).await.unwrap();
        assert!(storage.health_check().await);
        assert!(matches!(
            storage.get_all("user").await,
            Err(DbError::NotInitialized)
        ));
    }

    #[tokio::test]
    async fn test_event_roundtrip() {
        let storage = storage().await;
        let event = Event::from(EventParts {
            sync_status: SyncStatus::Ok,
            server_sequence: Some(12),
            ..user("u1", "Ann", 31).into_parts()
        });
        storage.insert("user", &event).await.unwrap();

        let loaded = storage.get_by_id("user", "u1").await.unwrap().unwrap();
        assert_eq!(loaded.event_id(), event.event_id());
        assert_eq!(loaded.payload(), event.payload());
        assert_eq!(loaded.sync_status(), SyncStatus::Ok);
        assert_eq!(loaded.server_sequence(), Some(12));
        assert_eq!(
            loaded.sync_created_at().timestamp_millis(),
            event.sync_created_at().timestamp_millis()
        );
    }

    #[tokio::test]
    async fn test_update_missing_row() {
        let storage = storage().await;
        let result = storage.update("user", &user("u1", "Ann", 1)).await;
        assert!(matches!(result, Err(DbError::NotFound { .. })));
    }

    #[tokio::test]
    async fn test_query_filters_sorts_and_hides_tombstones() {
        let storage = storage().await;
        storage.insert("user", &user("u1", "Ann", 31)).await.unwrap();
        storage.insert("user", &user("u2", "Bob", 25)).await.unwrap();
        storage.insert("user", &user("u3", "Cid", 40)).await.unwrap();
        let tombstone = Event::new_local(
            "user",
            "u3",
            SyncOperation::Delete,
            Some(json!({"id": "u3", "name": "Cid", "age": 40})),
        );
        storage.insert("user", &tombstone).await.unwrap();

        let spec = QuerySpec::table("user")
            .filter("age", FilterOp::Gt, json!(20))
            .sort("age", SortOrder::Asc);
        let rows = storage.query(&spec).await.unwrap();
        let ids: Vec<_> = rows.iter().map(|r| r.record_id()).collect();
        assert_eq!(ids, vec!["u2", "u1"]);

        let all = storage.query(&spec.include_deleted(true)).await.unwrap();
        assert_eq!(all.len(), 3);
    }

    #[tokio::test]
    async fn test_namespaced_config() {
        let storage = storage().await;
        storage.set("lastSequence:user", ConfigValue::Int(7)).await.unwrap();
        storage
            .set("tags", ConfigValue::StringList(vec!["a".into(), "b".into()]))
            .await
            .unwrap();

        assert_eq!(
            storage.get("lastSequence:user").await.unwrap(),
            Some(ConfigValue::Int(7))
        );
        assert_eq!(storage.list_keys().await.unwrap().len(), 2);

        storage.use_namespace("other").await.unwrap();
        assert_eq!(storage.get("lastSequence:user").await.unwrap(), None);
        assert!(storage.list_keys().await.unwrap().is_empty());

        storage.use_namespace(DEFAULT_NAMESPACE).await.unwrap();
        storage.remove("tags").await.unwrap();
        assert!(!storage.contains("tags").await.unwrap());
    }

    #[tokio::test]
    async fn test_schema_and_stats() {
        let storage = storage().await;
        storage
            .ensure_schema(&TableSchema::new("user", "id").field("name", crate::FieldType::Text))
            .await
            .unwrap();
        storage.insert("user", &user("u1", "Ann", 31)).await.unwrap();

        let schemas = storage.schemas().await.unwrap();
        assert_eq!(schemas.len(), 1);
        assert_eq!(schemas[0].id_field, "id");

        let stats = storage.table_stats().await.unwrap();
        assert_eq!(stats.len(), 1);
        assert_eq!(stats[0].total, 1);
        assert_eq!(stats[0].pending, 1);
        assert_eq!(stats[0].tombstones, 0);
    }

    #[tokio::test]
    async fn test_watch_and_clear() {
        let storage = storage().await;
        let mut watch = storage.watch_query(QuerySpec::table("user"));
        assert!(watch.next().await.unwrap().unwrap().is_empty());

        storage.insert("user", &user("u1", "Ann", 31)).await.unwrap();
        assert_eq!(watch.next().await.unwrap().unwrap().len(), 1);

        storage.clear_all().await.unwrap();
        assert!(watch.next().await.unwrap().unwrap().is_empty());
        assert!(storage.get_all("user").await.unwrap().is_empty());
    }
}
