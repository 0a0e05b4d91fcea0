//! # Repository
//!
//! Binds one domain type to one storage table.
//!
//! ## Responsibilities
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                        Repository<T>                                    │
//! │                                                                         │
//! │  Local writes                      Remote pulls                        │
//! │  ────────────                      ────────────                        │
//! │  upsert(T) ──► Event(pending)      merge_remote_event(Event<T>)        │
//! │  delete(id) ──► tombstone            │                                 │
//! │       │                              ├─ no local row  → insert remote  │
//! │       ▼                              ├─ identical     → unchanged      │
//! │  storage.insert(table, raw)          └─ resolver: KeepLocal            │
//! │                                                   TakeRemote (ok)      │
//! │  Reads                                            Merged{base}         │
//! │  ─────                                                                 │
//! │  get_by_id / get_all / query() / watch()  (tombstones hidden)          │
//! │                                                                         │
//! │  Sync bookkeeping                                                       │
//! │  ────────────────                                                       │
//! │  pending_events (ascending eventId) ──► mark_events(ok | failed)       │
//! │  compact() ──► CompactionPolicy on synced tombstones                   │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! The table name is the repository name. Mutating methods hold the
//! repository's write lock for their whole read-resolve-write sequence.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use futures_util::stream::{BoxStream, StreamExt};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tessera_core::{
    Event, FilterOp, QuerySpec, RawEvent, Resolution, Side, SortOrder, SyncOperation, SyncStatus,
    DEFAULT_ID_FIELD,
};
use tessera_db::{FieldType, StoragePort, TableSchema};
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info, trace};

use crate::error::{SyncError, SyncResult};

// =============================================================================
// Payload Types
// =============================================================================

/// Domain types a repository can hold.
pub trait Payload: Serialize + DeserializeOwned + Clone + Send + Sync + 'static {}

impl<T> Payload for T where T: Serialize + DeserializeOwned + Clone + Send + Sync + 'static {}

type IdFn<T> = Arc<dyn Fn(&T) -> String + Send + Sync>;
type ToJsonFn<T> = Arc<dyn Fn(&T) -> Result<Value, String> + Send + Sync>;
type FromJsonFn<T> = Arc<dyn Fn(&Value) -> Result<T, String> + Send + Sync>;
type ConflictFn<T> = Arc<dyn Fn(&Event<T>, &Event<T>) -> Resolution<T> + Send + Sync>;

/// Result of applying one remote event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MergeOutcome {
    /// No local row existed.
    Inserted,
    /// Local version won and was left untouched.
    KeptLocal,
    /// Remote version replaced the local one.
    TookRemote,
    /// Resolver combined both payloads.
    Merged,
    /// Local row already equals the remote event.
    Unchanged,
}

impl MergeOutcome {
    /// Returns true if storage was written.
    pub fn wrote(&self) -> bool {
        matches!(
            self,
            MergeOutcome::Inserted | MergeOutcome::TookRemote | MergeOutcome::Merged
        )
    }
}

// =============================================================================
// Compaction
// =============================================================================

/// Decides which synced tombstones may be physically removed.
///
/// Only tombstones the remote has acknowledged are offered to the policy.
pub trait CompactionPolicy: Send + Sync {
    fn should_prune(&self, tombstone: &RawEvent, now: DateTime<Utc>) -> bool;
}

/// Never prunes.
#[derive(Debug, Clone, Copy, Default)]
pub struct KeepAll;

impl CompactionPolicy for KeepAll {
    fn should_prune(&self, _tombstone: &RawEvent, _now: DateTime<Utc>) -> bool {
        false
    }
}

/// Prunes synced tombstones once they are at least `min_age` old.
#[derive(Debug, Clone, Copy)]
pub struct PruneSyncedTombstones {
    pub min_age: Duration,
}

impl CompactionPolicy for PruneSyncedTombstones {
    fn should_prune(&self, tombstone: &RawEvent, now: DateTime<Utc>) -> bool {
        now - tombstone.sync_created_at() >= self.min_age
    }
}

// =============================================================================
// Builder
// =============================================================================

/// Builder for [`Repository`].
pub struct RepositoryBuilder<T: Payload> {
    name: String,
    id_field: String,
    fields: BTreeMap<String, FieldType>,
    id_of: Option<IdFn<T>>,
    to_json: ToJsonFn<T>,
    from_json: FromJsonFn<T>,
    on_conflict: Option<ConflictFn<T>>,
    compaction: Arc<dyn CompactionPolicy>,
}

impl<T: Payload> RepositoryBuilder<T> {
    /// Wire name of the primary key inside the payload (default `id`).
    pub fn id_field(mut self, field: impl Into<String>) -> Self {
        self.id_field = field.into();
        self
    }

    /// Extracts the record id from a payload. Required.
    pub fn id<F>(mut self, id_of: F) -> Self
    where
        F: Fn(&T) -> String + Send + Sync + 'static,
    {
        self.id_of = Some(Arc::new(id_of));
        self
    }

    /// Replaces the serde codec.
    pub fn codec<E, D>(mut self, to_json: E, from_json: D) -> Self
    where
        E: Fn(&T) -> Result<Value, String> + Send + Sync + 'static,
        D: Fn(&Value) -> Result<T, String> + Send + Sync + 'static,
    {
        self.to_json = Arc::new(to_json);
        self.from_json = Arc::new(from_json);
        self
    }

    /// Domain-specific resolver used instead of last-write-wins.
    pub fn on_conflict<F>(mut self, resolver: F) -> Self
    where
        F: Fn(&Event<T>, &Event<T>) -> Resolution<T> + Send + Sync + 'static,
    {
        self.on_conflict = Some(Arc::new(resolver));
        self
    }

    pub fn compaction(mut self, policy: impl CompactionPolicy + 'static) -> Self {
        self.compaction = Arc::new(policy);
        self
    }

    /// Declares a payload field type for `ensure_schema`.
    pub fn field(mut self, name: impl Into<String>, field_type: FieldType) -> Self {
        self.fields.insert(name.into(), field_type);
        self
    }

    pub fn build(self) -> SyncResult<Repository<T>> {
        let id_of = self.id_of.ok_or_else(|| SyncError::MissingCallback {
            component: format!("Repository {}", self.name),
            callback: "id",
        })?;

        let mut schema = TableSchema::new(self.name.clone(), self.id_field.clone());
        schema.fields = self.fields;

        Ok(Repository {
            name: self.name,
            id_field: self.id_field,
            schema,
            id_of,
            to_json: self.to_json,
            from_json: self.from_json,
            on_conflict: self.on_conflict,
            compaction: self.compaction,
            state: RwLock::new(RepoState::default()),
            write_lock: Mutex::new(()),
        })
    }
}

// =============================================================================
// Repository
// =============================================================================

#[derive(Default)]
struct RepoState {
    storage: Option<Arc<dyn StoragePort>>,
    initialized: bool,
}

/// Typed, sync-tracked access to one table.
pub struct Repository<T: Payload> {
    name: String,
    id_field: String,
    schema: TableSchema,
    id_of: IdFn<T>,
    to_json: ToJsonFn<T>,
    from_json: FromJsonFn<T>,
    on_conflict: Option<ConflictFn<T>>,
    compaction: Arc<dyn CompactionPolicy>,
    state: RwLock<RepoState>,
    write_lock: Mutex<()>,
}

impl<T: Payload> std::fmt::Debug for Repository<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Repository")
            .field("name", &self.name)
            .field("id_field", &self.id_field)
            .field("custom_resolver", &self.on_conflict.is_some())
            .finish()
    }
}

fn decode_payload<T>(repository: &str, from_json: &FromJsonFn<T>, value: Value) -> SyncResult<T> {
    from_json(&value).map_err(|reason| SyncError::Deserialization {
        repository: repository.to_string(),
        payload: value,
        reason,
    })
}

impl<T: Payload> Repository<T> {
    pub fn builder(name: impl Into<String>) -> RepositoryBuilder<T> {
        RepositoryBuilder {
            name: name.into(),
            id_field: DEFAULT_ID_FIELD.to_string(),
            fields: BTreeMap::new(),
            id_of: None,
            to_json: Arc::new(|value: &T| serde_json::to_value(value).map_err(|e| e.to_string())),
            from_json: Arc::new(|value: &Value| T::deserialize(value).map_err(|e| e.to_string())),
            on_conflict: None,
            compaction: Arc::new(KeepAll),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn id_field(&self) -> &str {
        &self.id_field
    }

    pub fn schema(&self) -> &TableSchema {
        &self.schema
    }

    /// Record id of a payload.
    pub fn id_of(&self, value: &T) -> String {
        (self.id_of)(value)
    }

    // =========================================================================
    // Lifecycle
    // =========================================================================

    /// Declares the table and binds the storage port. Idempotent.
    pub async fn initialize(&self, storage: Arc<dyn StoragePort>) -> SyncResult<()> {
        storage.ensure_schema(&self.schema).await?;
        let mut state = self.state.write().await;
        state.storage = Some(storage);
        state.initialized = true;
        debug!(repository = %self.name, "Repository initialized");
        Ok(())
    }

    /// Drops the storage binding so `initialize` can run again.
    pub async fn reset(&self) {
        let _guard = self.write_lock.lock().await;
        let mut state = self.state.write().await;
        state.storage = None;
        state.initialized = false;
        debug!(repository = %self.name, "Repository reset");
    }

    pub async fn is_initialized(&self) -> bool {
        self.state.read().await.initialized
    }

    async fn storage(&self) -> SyncResult<Arc<dyn StoragePort>> {
        let state = self.state.read().await;
        match (&state.storage, state.initialized) {
            (Some(storage), true) => Ok(Arc::clone(storage)),
            _ => Err(SyncError::NotInitialized),
        }
    }

    // =========================================================================
    // Codec
    // =========================================================================

    fn encode(&self, value: &T) -> SyncResult<Value> {
        (self.to_json)(value).map_err(|reason| {
            SyncError::Serialization(format!("{} payload: {}", self.name, reason))
        })
    }

    fn decode(&self, value: Value) -> SyncResult<T> {
        decode_payload(&self.name, &self.from_json, value)
    }

    fn decode_event(&self, raw: RawEvent) -> SyncResult<Event<T>> {
        raw.try_map_payload(|value| self.decode(value))
    }

    fn encode_event(&self, event: Event<T>) -> SyncResult<RawEvent> {
        event.try_map_payload(|value| self.encode(&value))
    }

    // =========================================================================
    // Local Writes
    // =========================================================================

    /// Stores a new pending version of the record.
    ///
    /// The operation is `update` when a live row with the same id exists,
    /// `insert` otherwise (including after a delete).
    pub async fn upsert(&self, value: T) -> SyncResult<Event<T>> {
        let _guard = self.write_lock.lock().await;
        let storage = self.storage().await?;

        let record_id = self.id_of(&value);
        let existing = storage.get_by_id(&self.name, &record_id).await?;
        let operation = match existing {
            Some(row) if !row.is_deleted() => SyncOperation::Update,
            _ => SyncOperation::Insert,
        };

        let raw = Event::new_local(
            self.name.as_str(),
            record_id,
            operation,
            Some(self.encode(&value)?),
        );
        storage.insert(&self.name, &raw).await?;

        debug!(
            repository = %self.name,
            record_id = %raw.record_id(),
            operation = %operation,
            "Record upserted"
        );
        Ok(raw.with_payload(Some(value)))
    }

    /// Writes a pending tombstone. The last payload is kept on it.
    pub async fn delete(&self, record_id: &str) -> SyncResult<Event<T>> {
        let _guard = self.write_lock.lock().await;
        let storage = self.storage().await?;

        let previous = storage
            .get_by_id(&self.name, record_id)
            .await?
            .and_then(|row| row.into_payload());
        let raw = Event::new_local(self.name.as_str(), record_id, SyncOperation::Delete, previous);
        storage.insert(&self.name, &raw).await?;

        debug!(repository = %self.name, record_id = %record_id, "Record deleted");
        self.decode_event(raw)
    }

    // =========================================================================
    // Reads
    // =========================================================================

    /// Live payload for a record id; `None` if absent or deleted.
    pub async fn get_by_id(&self, record_id: &str) -> SyncResult<Option<T>> {
        match self.get_event(record_id).await? {
            Some(event) if !event.is_deleted() => Ok(event.into_payload()),
            _ => Ok(None),
        }
    }

    /// Stored event for a record id, tombstones included.
    pub async fn get_event(&self, record_id: &str) -> SyncResult<Option<Event<T>>> {
        let storage = self.storage().await?;
        storage
            .get_by_id(&self.name, record_id)
            .await?
            .map(|raw| self.decode_event(raw))
            .transpose()
    }

    /// Every live payload, ordered by record id.
    pub async fn get_all(&self) -> SyncResult<Vec<T>> {
        self.fetch(&QuerySpec::table(self.name.as_str())).await
    }

    /// Number of live records.
    pub async fn count(&self) -> SyncResult<usize> {
        let storage = self.storage().await?;
        Ok(storage.query(&QuerySpec::table(self.name.as_str())).await?.len())
    }

    pub fn query(&self) -> QueryBuilder<'_, T> {
        QueryBuilder {
            repository: self,
            spec: QuerySpec::table(self.name.as_str()),
        }
    }

    /// Runs a query against this repository's table.
    pub async fn fetch(&self, spec: &QuerySpec) -> SyncResult<Vec<T>> {
        let storage = self.storage().await?;
        let spec = self.scoped(spec.clone());
        storage
            .query(&spec)
            .await?
            .into_iter()
            .filter_map(|row| row.into_payload())
            .map(|value| self.decode(value))
            .collect()
    }

    /// Live result set: the current snapshot first, then one per change.
    ///
    /// ## Stream Behavior
    /// - Never terminates on its own; drop it to unsubscribe
    /// - Calling again starts a fresh, independent stream
    pub async fn watch(&self, spec: QuerySpec) -> SyncResult<BoxStream<'static, SyncResult<Vec<T>>>> {
        let storage = self.storage().await?;
        let name = self.name.clone();
        let from_json = Arc::clone(&self.from_json);

        let stream = storage.watch_query(self.scoped(spec)).map(move |rows| {
            rows?
                .into_iter()
                .filter_map(|row| row.into_payload())
                .map(|value| decode_payload(&name, &from_json, value))
                .collect::<SyncResult<Vec<T>>>()
        });
        Ok(stream.boxed())
    }

    fn scoped(&self, mut spec: QuerySpec) -> QuerySpec {
        spec.table = self.name.clone();
        spec
    }

    // =========================================================================
    // Sync Bookkeeping
    // =========================================================================

    /// Events not yet acknowledged by the remote, ascending by `eventId`.
    pub async fn pending_events(&self) -> SyncResult<Vec<Event<T>>> {
        self.pending_raw()
            .await?
            .into_iter()
            .map(|raw| self.decode_event(raw))
            .collect()
    }

    async fn pending_raw(&self) -> SyncResult<Vec<RawEvent>> {
        let storage = self.storage().await?;
        let mut pending: Vec<RawEvent> = storage
            .get_all(&self.name)
            .await?
            .into_iter()
            .filter(|row| row.needs_sync())
            .collect();
        pending.sort_by(|a, b| a.event_id().cmp(b.event_id()));
        Ok(pending)
    }

    /// Applies one remote event against the local row. Idempotent.
    ///
    /// When the local row wins, it is left as it is. A pending local winner
    /// stays pending, so the next cycle pushes it again and the remote
    /// converges on it.
    pub async fn merge_remote_event(&self, remote: Event<T>) -> SyncResult<MergeOutcome> {
        let remote_raw = self.encode_event(remote.clone())?;
        self.merge(remote_raw, remote).await
    }

    async fn merge(&self, remote_raw: RawEvent, remote: Event<T>) -> SyncResult<MergeOutcome> {
        let _guard = self.write_lock.lock().await;
        let storage = self.storage().await?;

        let remote_raw = remote_raw.with_status(SyncStatus::Ok);
        let remote = remote.with_status(SyncStatus::Ok);
        let record_id = remote_raw.record_id().to_string();

        let local_raw = match storage.get_by_id(&self.name, &record_id).await? {
            Some(row) => row,
            None => {
                storage.insert(&self.name, &remote_raw).await?;
                trace!(repository = %self.name, record_id = %record_id, "Remote record inserted");
                return Ok(MergeOutcome::Inserted);
            }
        };

        if local_raw == remote_raw {
            return Ok(MergeOutcome::Unchanged);
        }

        let local = self.decode_event(local_raw.clone())?;
        let resolution = match &self.on_conflict {
            Some(resolver) => resolver(&local, &remote),
            None => Resolution::last_write_wins(&local, &remote),
        };

        let outcome = match resolution {
            // Status untouched: a pending winner goes out on the next push.
            Resolution::KeepLocal => MergeOutcome::KeptLocal,
            Resolution::TakeRemote => {
                storage.insert(&self.name, &remote_raw).await?;
                MergeOutcome::TookRemote
            }
            Resolution::Merged { base, payload } => {
                let payload = Some(self.encode(&payload)?);
                let merged = match base {
                    Side::Local => local_raw.clone().with_payload(payload),
                    Side::Remote => remote_raw.with_payload(payload),
                };
                if merged == local_raw {
                    MergeOutcome::Unchanged
                } else {
                    storage.insert(&self.name, &merged).await?;
                    MergeOutcome::Merged
                }
            }
        };

        trace!(repository = %self.name, record_id = %record_id, ?outcome, "Remote event merged");
        Ok(outcome)
    }

    /// Sets the status of stored events whose `eventId` still matches.
    ///
    /// A record edited again after the push keeps its newer pending event.
    pub async fn mark_events(&self, events: &[RawEvent], status: SyncStatus) -> SyncResult<usize> {
        let _guard = self.write_lock.lock().await;
        let storage = self.storage().await?;

        let mut changed = 0;
        for event in events {
            let Some(stored) = storage.get_by_id(&self.name, event.record_id()).await? else {
                continue;
            };
            if stored.event_id() != event.event_id() || stored.sync_status() == status {
                continue;
            }
            storage.insert(&self.name, &stored.with_status(status)).await?;
            changed += 1;
        }

        if changed > 0 {
            debug!(repository = %self.name, count = changed, status = %status, "Events marked");
        }
        Ok(changed)
    }

    /// Removes synced tombstones the compaction policy selects.
    pub async fn compact(&self) -> SyncResult<usize> {
        let _guard = self.write_lock.lock().await;
        let storage = self.storage().await?;
        let now = Utc::now();

        let mut pruned = 0;
        for row in storage.get_all(&self.name).await? {
            if row.is_deleted() && !row.needs_sync() && self.compaction.should_prune(&row, now) {
                storage.delete(&self.name, row.record_id()).await?;
                pruned += 1;
            }
        }

        if pruned > 0 {
            info!(repository = %self.name, count = pruned, "Tombstones compacted");
        }
        Ok(pruned)
    }
}

// =============================================================================
// Query Builder
// =============================================================================

/// Typed query over one repository.
///
/// ```rust,ignore
/// let adults = users
///     .query()
///     .where_gte("age", 18)
///     .order_by("name", SortOrder::Asc)
///     .limit(20)
///     .fetch()
///     .await?;
/// ```
pub struct QueryBuilder<'a, T: Payload> {
    repository: &'a Repository<T>,
    spec: QuerySpec,
}

impl<'a, T: Payload> QueryBuilder<'a, T> {
    fn filter(mut self, field: impl Into<String>, op: FilterOp, value: Value) -> Self {
        self.spec = self.spec.filter(field, op, value);
        self
    }

    pub fn where_eq(self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.filter(field, FilterOp::Eq, value.into())
    }

    pub fn where_ne(self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.filter(field, FilterOp::Ne, value.into())
    }

    pub fn where_gt(self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.filter(field, FilterOp::Gt, value.into())
    }

    pub fn where_gte(self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.filter(field, FilterOp::Gte, value.into())
    }

    pub fn where_lt(self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.filter(field, FilterOp::Lt, value.into())
    }

    pub fn where_lte(self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.filter(field, FilterOp::Lte, value.into())
    }

    pub fn where_in<V: Into<Value>>(
        self,
        field: impl Into<String>,
        values: impl IntoIterator<Item = V>,
    ) -> Self {
        let values = values.into_iter().map(Into::into).collect();
        self.filter(field, FilterOp::In, Value::Array(values))
    }

    pub fn where_null(self, field: impl Into<String>) -> Self {
        self.filter(field, FilterOp::IsNull, Value::Null)
    }

    pub fn where_not_null(self, field: impl Into<String>) -> Self {
        self.filter(field, FilterOp::IsNotNull, Value::Null)
    }

    /// Substring of a string field, or element of an array field.
    pub fn where_contains(self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.filter(field, FilterOp::Contains, value.into())
    }

    pub fn order_by(mut self, field: impl Into<String>, order: SortOrder) -> Self {
        self.spec = self.spec.sort(field, order);
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.spec = self.spec.limit(limit);
        self
    }

    pub fn offset(mut self, offset: usize) -> Self {
        self.spec = self.spec.offset(offset);
        self
    }

    pub fn include_deleted(mut self, include: bool) -> Self {
        self.spec = self.spec.include_deleted(include);
        self
    }

    pub fn spec(&self) -> &QuerySpec {
        &self.spec
    }

    pub async fn fetch(self) -> SyncResult<Vec<T>> {
        self.repository.fetch(&self.spec).await
    }

    pub async fn first(self) -> SyncResult<Option<T>> {
        let spec = self.spec.limit(1);
        Ok(self.repository.fetch(&spec).await?.into_iter().next())
    }

    /// Matching rows, ignoring limit and offset.
    pub async fn count(self) -> SyncResult<usize> {
        let mut spec = self.spec;
        spec.limit = None;
        spec.offset = None;
        let storage = self.repository.storage().await?;
        Ok(storage.query(&self.repository.scoped(spec)).await?.len())
    }

    pub async fn watch(self) -> SyncResult<BoxStream<'static, SyncResult<Vec<T>>>> {
        self.repository.watch(self.spec).await
    }
}

// =============================================================================
// Type-Erased Repository
// =============================================================================

/// The part of a repository the client and strategies drive without
/// knowing its payload type.
#[async_trait]
pub trait SyncRepository: Send + Sync {
    fn name(&self) -> &str;

    fn id_field(&self) -> &str;

    async fn initialize(&self, storage: Arc<dyn StoragePort>) -> SyncResult<()>;

    async fn reset(&self);

    async fn is_initialized(&self) -> bool;

    /// Pending events in wire form, ascending by `eventId`.
    async fn pending_raw_events(&self) -> SyncResult<Vec<RawEvent>>;

    /// Decodes one pulled wire item and merges it.
    async fn merge_remote_raw(&self, item: &Value) -> SyncResult<MergeOutcome>;

    async fn mark_events(&self, events: &[RawEvent], status: SyncStatus) -> SyncResult<usize>;

    async fn compact(&self) -> SyncResult<usize>;
}

#[async_trait]
impl<T: Payload> SyncRepository for Repository<T> {
    fn name(&self) -> &str {
        &self.name
    }

    fn id_field(&self) -> &str {
        &self.id_field
    }

    async fn initialize(&self, storage: Arc<dyn StoragePort>) -> SyncResult<()> {
        Repository::initialize(self, storage).await
    }

    async fn reset(&self) {
        Repository::reset(self).await
    }

    async fn is_initialized(&self) -> bool {
        Repository::is_initialized(self).await
    }

    async fn pending_raw_events(&self) -> SyncResult<Vec<RawEvent>> {
        self.pending_raw().await
    }

    async fn merge_remote_raw(&self, item: &Value) -> SyncResult<MergeOutcome> {
        let remote_raw = RawEvent::decode_remote(item, &self.name, &self.id_field).map_err(|e| {
            SyncError::Deserialization {
                repository: self.name.clone(),
                payload: item.clone(),
                reason: e.to_string(),
            }
        })?;

        let remote = remote_raw.clone().try_map_payload(|value| {
            (self.from_json)(&value).map_err(|reason| SyncError::Deserialization {
                repository: self.name.clone(),
                payload: item.clone(),
                reason,
            })
        })?;

        self.merge(remote_raw, remote).await
    }

    async fn mark_events(&self, events: &[RawEvent], status: SyncStatus) -> SyncResult<usize> {
        Repository::mark_events(self, events, status).await
    }

    async fn compact(&self) -> SyncResult<usize> {
        Repository::compact(self).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tessera_core::EventParts;
    use tessera_db::{ConfigPort, MemoryStorage};

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct User {
        id: String,
        name: String,
        age: u32,
    }

    fn user(id: &str, name: &str, age: u32) -> User {
        User {
            id: id.into(),
            name: name.into(),
            age,
        }
    }

    async fn users() -> Repository<User> {
        let storage = MemoryStorage::new();
        storage.initialize().await.unwrap();
        let repo = Repository::<User>::builder("user")
            .id(|u| u.id.clone())
            .field("name", FieldType::Text)
            .build()
            .unwrap();
        repo.initialize(Arc::new(storage)).await.unwrap();
        repo
    }

    fn remote(local: &Event<User>, value: User, seq: Option<i64>, offset_ms: i64) -> Event<User> {
        Event::from(EventParts {
            event_id: tessera_core::new_id(),
            payload: Some(value),
            sync_status: SyncStatus::Ok,
            sync_created_at: local.sync_created_at() + Duration::milliseconds(offset_ms),
            server_sequence: seq,
            ..local.clone().into_parts()
        })
    }

    #[test]
    fn test_builder_requires_id() {
        let result = Repository::<User>::builder("user").build();
        assert!(matches!(
            result,
            Err(SyncError::MissingCallback { callback: "id", .. })
        ));
    }

    #[tokio::test]
    async fn test_requires_initialize() {
        let repo = Repository::<User>::builder("user")
            .id(|u| u.id.clone())
            .build()
            .unwrap();
        assert!(matches!(
            repo.upsert(user("u1", "Ann", 30)).await,
            Err(SyncError::NotInitialized)
        ));
    }

    #[tokio::test]
    async fn test_upsert_insert_then_update() {
        let repo = users().await;
        let first = repo.upsert(user("u1", "Ann", 30)).await.unwrap();
        assert_eq!(first.operation(), SyncOperation::Insert);
        assert_eq!(first.sync_status(), SyncStatus::Pending);

        let second = repo.upsert(user("u1", "Ann B", 31)).await.unwrap();
        assert_eq!(second.operation(), SyncOperation::Update);
        assert_ne!(second.event_id(), first.event_id());

        assert_eq!(repo.get_by_id("u1").await.unwrap(), Some(user("u1", "Ann B", 31)));
        assert_eq!(repo.count().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_delete_is_soft() {
        let repo = users().await;
        repo.upsert(user("u1", "Ann", 30)).await.unwrap();
        let tombstone = repo.delete("u1").await.unwrap();

        assert!(tombstone.is_deleted());
        assert_eq!(tombstone.payload(), Some(&user("u1", "Ann", 30)));
        assert_eq!(repo.get_by_id("u1").await.unwrap(), None);
        assert!(repo.get_all().await.unwrap().is_empty());

        let stored = repo.get_event("u1").await.unwrap().unwrap();
        assert!(stored.is_deleted());
        assert!(stored.needs_sync());

        let with_deleted = repo.query().include_deleted(true).fetch().await.unwrap();
        assert_eq!(with_deleted.len(), 1);

        let again = repo.upsert(user("u1", "Ann", 30)).await.unwrap();
        assert_eq!(again.operation(), SyncOperation::Insert);
    }

    #[tokio::test]
    async fn test_query_builder() {
        let repo = users().await;
        repo.upsert(user("u1", "Ann", 30)).await.unwrap();
        repo.upsert(user("u2", "Bob", 17)).await.unwrap();
        repo.upsert(user("u3", "Cid", 45)).await.unwrap();

        let adults = repo
            .query()
            .where_gte("age", 18)
            .order_by("age", SortOrder::Desc)
            .fetch()
            .await
            .unwrap();
        assert_eq!(adults, vec![user("u3", "Cid", 45), user("u1", "Ann", 30)]);

        let named = repo.query().where_in("name", ["Bob", "Zed"]).first().await.unwrap();
        assert_eq!(named, Some(user("u2", "Bob", 17)));

        let count = repo.query().where_contains("name", "i").limit(0).count().await.unwrap();
        assert_eq!(count, 1);
    }

    #[tokio::test]
    async fn test_pending_events_in_event_order() {
        let repo = users().await;
        let a = repo.upsert(user("u2", "Bob", 17)).await.unwrap();
        let b = repo.upsert(user("u1", "Ann", 30)).await.unwrap();

        let pending = repo.pending_events().await.unwrap();
        let ids: Vec<&str> = pending.iter().map(|e| e.event_id()).collect();
        let mut expected = vec![a.event_id(), b.event_id()];
        expected.sort();
        assert_eq!(ids, expected);
    }

    #[tokio::test]
    async fn test_mark_events_requires_matching_event_id() {
        let repo = users().await;
        let first = repo.upsert(user("u1", "Ann", 30)).await.unwrap();
        let pushed = repo.pending_raw().await.unwrap();

        // Edited again while the push was in flight
        repo.upsert(user("u1", "Ann B", 31)).await.unwrap();

        let changed = repo.mark_events(&pushed, SyncStatus::Ok).await.unwrap();
        assert_eq!(changed, 0);
        let stored = repo.get_event("u1").await.unwrap().unwrap();
        assert!(stored.needs_sync());
        assert_ne!(stored.event_id(), first.event_id());

        let latest = repo.pending_raw().await.unwrap();
        assert_eq!(repo.mark_events(&latest, SyncStatus::Ok).await.unwrap(), 1);
        assert!(repo.pending_events().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_sequenced_remote_beats_newer_local() {
        let repo = users().await;
        let local = repo.upsert(user("u1", "Ann", 30)).await.unwrap();
        let incoming = remote(&local, user("u1", "Ann2", 30), Some(5), -1_000);

        let outcome = repo.merge_remote_event(incoming.clone()).await.unwrap();
        assert_eq!(outcome, MergeOutcome::TookRemote);

        let stored = repo.get_event("u1").await.unwrap().unwrap();
        assert_eq!(stored.payload().map(|u| u.name.as_str()), Some("Ann2"));
        assert_eq!(stored.sync_status(), SyncStatus::Ok);
        assert_eq!(stored.server_sequence(), Some(5));

        assert_eq!(
            repo.merge_remote_event(incoming).await.unwrap(),
            MergeOutcome::Unchanged
        );
    }

    #[tokio::test]
    async fn test_local_winner_stays_pending() {
        let repo = users().await;
        let local = repo.upsert(user("u1", "Ann", 30)).await.unwrap();
        let older = remote(&local, user("u1", "Old", 30), None, -5_000);

        assert_eq!(
            repo.merge_remote_event(older).await.unwrap(),
            MergeOutcome::KeptLocal
        );
        let stored = repo.get_event("u1").await.unwrap().unwrap();
        assert_eq!(stored.event_id(), local.event_id());
        assert!(stored.needs_sync());
    }

    #[tokio::test]
    async fn test_custom_resolver_merges_onto_base() {
        let storage = MemoryStorage::new();
        storage.initialize().await.unwrap();
        let repo = Repository::<User>::builder("user")
            .id(|u| u.id.clone())
            .on_conflict(|local, remote| {
                let age = local.payload().map(|u| u.age).unwrap_or_default();
                match remote.payload() {
                    Some(r) => Resolution::Merged {
                        base: Side::Remote,
                        payload: User { age, ..r.clone() },
                    },
                    None => Resolution::TakeRemote,
                }
            })
            .build()
            .unwrap();
        repo.initialize(Arc::new(storage)).await.unwrap();

        let local = repo.upsert(user("u1", "Ann", 41)).await.unwrap();
        let incoming = remote(&local, user("u1", "Ann2", 30), Some(9), 0);
        let event_id = incoming.event_id().to_string();

        assert_eq!(
            repo.merge_remote_event(incoming.clone()).await.unwrap(),
            MergeOutcome::Merged
        );
        let stored = repo.get_event("u1").await.unwrap().unwrap();
        assert_eq!(stored.payload(), Some(&user("u1", "Ann2", 41)));
        assert_eq!(stored.event_id(), event_id);
        assert_eq!(stored.server_sequence(), Some(9));
        assert_eq!(stored.sync_status(), SyncStatus::Ok);

        assert_eq!(
            repo.merge_remote_event(incoming).await.unwrap(),
            MergeOutcome::Unchanged
        );
    }

    #[tokio::test]
    async fn test_malformed_remote_payload() {
        let repo = users().await;
        let item = json!({
            "eventId": tessera_core::new_id(),
            "recordId": "u1",
            "operation": "insert",
            "payload": {"id": "u1", "name": 7},
            "syncCreatedAt": 1_700_000_000_000i64
        });

        let err = SyncRepository::merge_remote_raw(&repo, &item).await.unwrap_err();
        match err {
            SyncError::Deserialization { repository, payload, .. } => {
                assert_eq!(repository, "user");
                assert_eq!(payload, item);
            }
            other => panic!("unexpected error: {other}"),
        }
        assert_eq!(repo.count().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_watch_emits_snapshot_then_changes() {
        let repo = users().await;
        repo.upsert(user("u1", "Ann", 30)).await.unwrap();

        let mut stream = repo.query().where_gt("age", 20).watch().await.unwrap();
        assert_eq!(stream.next().await.unwrap().unwrap().len(), 1);

        repo.upsert(user("u2", "Bob", 25)).await.unwrap();
        assert_eq!(stream.next().await.unwrap().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_compaction_prunes_synced_tombstones_only() {
        let storage = MemoryStorage::new();
        storage.initialize().await.unwrap();
        let repo = Repository::<User>::builder("user")
            .id(|u| u.id.clone())
            .compaction(PruneSyncedTombstones {
                min_age: Duration::zero(),
            })
            .build()
            .unwrap();
        repo.initialize(Arc::new(storage)).await.unwrap();

        repo.upsert(user("u1", "Ann", 30)).await.unwrap();
        repo.upsert(user("u2", "Bob", 17)).await.unwrap();
        repo.delete("u1").await.unwrap();
        repo.delete("u2").await.unwrap();

        // Only u1's tombstone is acknowledged
        let acked: Vec<RawEvent> = repo
            .pending_raw()
            .await
            .unwrap()
            .into_iter()
            .filter(|e| e.record_id() == "u1")
            .collect();
        repo.mark_events(&acked, SyncStatus::Ok).await.unwrap();

        assert_eq!(repo.compact().await.unwrap(), 1);
        assert!(repo.get_event("u1").await.unwrap().is_none());
        assert!(repo.get_event("u2").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_reset_then_initialize() {
        let storage: Arc<dyn StoragePort> = Arc::new(MemoryStorage::new());
        storage.initialize().await.unwrap();
        let repo = Repository::<User>::builder("user")
            .id(|u| u.id.clone())
            .build()
            .unwrap();

        repo.initialize(Arc::clone(&storage)).await.unwrap();
        repo.reset().await;
        assert!(!repo.is_initialized().await);
        assert!(matches!(repo.get_all().await, Err(SyncError::NotInitialized)));

        repo.initialize(storage).await.unwrap();
        assert!(repo.is_initialized().await);
    }
}
