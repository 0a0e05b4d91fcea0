//! # Sync Client
//!
//! Owns the storage port, the repositories, and the strategies.
//!
//! ## Client Lifecycle
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                        SyncClient Lifecycle                             │
//! │                                                                         │
//! │   builder().storage(..).repository(..).strategy(..).build()            │
//! │        │   duplicate names / missing storage → construction error      │
//! │        │   every strategy attached                                     │
//! │        ▼                                                                │
//! │   initialize()                                                         │
//! │        │   storage → config port (if distinct) → each repository       │
//! │        │   ready signal completes (late ready() calls still return)    │
//! │        ▼                                                                │
//! │   ┌──────────────────────────────────────────────────────────────┐    │
//! │   │  READY                                                       │    │
//! │   │  get_all_pending_events / pull_changes / confirm_pushed      │    │
//! │   │  use_namespace (waits for in-flight cycles)                  │    │
//! │   │  report_connection_state ──► connection_changes (replaying)  │    │
//! │   │  clear_all_data (wipe, then reset + initialize repositories) │    │
//! │   └──────────────────────────────────────────────────────────────┘    │
//! │        │                                                                │
//! │        ▼                                                                │
//! │   dispose()  strategies disposed, ports closed, connection feed closed │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Namespace Gate
//!
//! Every sync cycle holds a shared guard on the client's gate for its whole
//! duration. `use_namespace` and `clear_all_data` take the gate exclusively,
//! so they wait for running cycles and no cycle sees two namespaces.
//! Called from inside a cycle they would wait on that cycle forever, so they
//! fail there with `SyncError::CalledFromCycle` instead.

use std::any::Any;
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use futures_util::stream::{BoxStream, StreamExt};
use serde_json::Value;
use tessera_core::{ConfigValue, RawEvent, SyncStatus};
use tessera_db::{ConfigPort, StoragePort};
use tokio::sync::{watch, OwnedRwLockReadGuard, RwLock};
use tracing::{debug, info, warn};

use crate::error::{PullFailure, SyncError, SyncResult};
use crate::repository::{Payload, Repository, SyncRepository};
use crate::strategy::{current_cycle, SyncStrategy};

/// Exclusive gate users cannot run on a task that already holds the gate
/// shared.
fn reject_inside_cycle(operation: &'static str) -> SyncResult<()> {
    match current_cycle() {
        Some(strategy) => Err(SyncError::CalledFromCycle {
            operation,
            strategy,
        }),
        None => Ok(()),
    }
}

/// Counts from one [`SyncClient::pull_changes`] call.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PullSummary {
    /// Items merged without error.
    pub applied: usize,
    /// Items that changed storage.
    pub written: usize,
    /// Greatest `serverSequence` among applied items.
    pub max_sequence: Option<i64>,
}

struct RepositoryEntry {
    name: String,
    erased: Arc<dyn SyncRepository>,
    typed: Arc<dyn Any + Send + Sync>,
}

// =============================================================================
// Builder
// =============================================================================

/// Builder for [`SyncClient`].
#[derive(Default)]
pub struct SyncClientBuilder {
    storage: Option<Arc<dyn StoragePort>>,
    config: Option<Arc<dyn ConfigPort>>,
    repositories: Vec<RepositoryEntry>,
    strategies: Vec<Arc<dyn SyncStrategy>>,
}

impl SyncClientBuilder {
    pub fn storage(mut self, storage: Arc<dyn StoragePort>) -> Self {
        self.storage = Some(storage);
        self
    }

    /// Separate config key/value port. Defaults to the storage adapter.
    pub fn config_port(mut self, config: Arc<dyn ConfigPort>) -> Self {
        self.config = Some(config);
        self
    }

    pub fn repository<T: Payload>(mut self, repository: Arc<Repository<T>>) -> Self {
        self.repositories.push(RepositoryEntry {
            name: repository.name().to_string(),
            erased: Arc::clone(&repository) as Arc<dyn SyncRepository>,
            typed: repository as Arc<dyn Any + Send + Sync>,
        });
        self
    }

    pub fn strategy<S: SyncStrategy + 'static>(mut self, strategy: S) -> Self {
        self.strategies.push(Arc::new(strategy));
        self
    }

    pub fn build(self) -> SyncResult<Arc<SyncClient>> {
        let storage = self.storage.ok_or(SyncError::MissingStorage)?;

        let mut seen = HashSet::new();
        for entry in &self.repositories {
            if !seen.insert(entry.name.as_str()) {
                return Err(SyncError::DuplicateRepository(entry.name.clone()));
            }
        }

        let (ready, _) = watch::channel(false);
        let (connection, _) = watch::channel(None);

        let client = Arc::new(SyncClient {
            storage,
            config: self.config,
            repositories: self.repositories,
            strategies: self.strategies,
            ready,
            connection: Mutex::new(Some(connection)),
            gate: Arc::new(RwLock::new(())),
            disposed: AtomicBool::new(false),
        });

        for strategy in &client.strategies {
            strategy.attach(&client)?;
        }

        debug!(
            repositories = client.repositories.len(),
            strategies = client.strategies.len(),
            "Sync client built"
        );
        Ok(client)
    }
}

// =============================================================================
// Client
// =============================================================================

/// Orchestrates repositories and strategies over one storage port.
pub struct SyncClient {
    storage: Arc<dyn StoragePort>,
    config: Option<Arc<dyn ConfigPort>>,
    repositories: Vec<RepositoryEntry>,
    strategies: Vec<Arc<dyn SyncStrategy>>,
    ready: watch::Sender<bool>,
    connection: Mutex<Option<watch::Sender<Option<bool>>>>,
    gate: Arc<RwLock<()>>,
    disposed: AtomicBool,
}

impl std::fmt::Debug for SyncClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SyncClient")
            .field("repositories", &self.repository_names())
            .field("strategies", &self.strategies.len())
            .field("ready", &self.is_ready())
            .finish()
    }
}

impl SyncClient {
    pub fn builder() -> SyncClientBuilder {
        SyncClientBuilder::default()
    }

    fn ensure_live(&self) -> SyncResult<()> {
        if self.disposed.load(Ordering::Acquire) {
            Err(SyncError::Disposed)
        } else {
            Ok(())
        }
    }

    // =========================================================================
    // Lifecycle
    // =========================================================================

    /// Initializes storage, the config port, then every repository in
    /// registration order, and completes the ready signal.
    pub async fn initialize(&self) -> SyncResult<()> {
        self.ensure_live()?;

        self.storage.initialize().await?;
        if let Some(config) = &self.config {
            config.initialize().await?;
        }
        for entry in &self.repositories {
            entry.erased.initialize(Arc::clone(&self.storage)).await?;
        }

        self.ready.send_replace(true);
        info!(repositories = self.repositories.len(), "Sync client ready");
        Ok(())
    }

    /// Resolves once `initialize` has completed, even if that was earlier.
    pub async fn ready(&self) -> SyncResult<()> {
        let mut rx = self.ready.subscribe();
        rx.wait_for(|ready| *ready)
            .await
            .map(|_| ())
            .map_err(|_| SyncError::Disposed)
    }

    pub fn is_ready(&self) -> bool {
        *self.ready.borrow()
    }

    /// Wipes every stored record and config value, then re-initializes each
    /// repository. Not reversible.
    pub async fn clear_all_data(&self) -> SyncResult<()> {
        reject_inside_cycle("clear_all_data")?;
        let _gate = self.gate.write().await;
        self.ensure_live()?;

        self.storage.clear_all().await?;
        if let Some(config) = &self.config {
            for key in config.list_keys().await? {
                config.remove(&key).await?;
            }
        }

        for entry in &self.repositories {
            entry.erased.reset().await;
            entry.erased.initialize(Arc::clone(&self.storage)).await?;
        }

        info!("All local data cleared");
        Ok(())
    }

    /// Disposes strategies, closes the ports, and ends the connection feed.
    /// Idempotent.
    pub async fn dispose(&self) -> SyncResult<()> {
        if self.disposed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }

        for strategy in &self.strategies {
            if let Err(e) = strategy.dispose().await {
                warn!(strategy = %strategy.name(), error = %e, "Strategy dispose failed");
            }
        }

        if let Some(config) = &self.config {
            config.close().await?;
        }
        self.storage.close().await?;

        self.connection
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .take();

        info!("Sync client disposed");
        Ok(())
    }

    // =========================================================================
    // Repositories
    // =========================================================================

    pub fn get_repository(&self, name: &str) -> SyncResult<Arc<dyn SyncRepository>> {
        self.entry(name).map(|entry| Arc::clone(&entry.erased))
    }

    /// Typed handle to a registered repository.
    pub fn typed_repository<T: Payload>(&self, name: &str) -> SyncResult<Arc<Repository<T>>> {
        let entry = self.entry(name)?;
        Arc::clone(&entry.typed)
            .downcast::<Repository<T>>()
            .map_err(|_| SyncError::RepositoryTypeMismatch {
                name: name.to_string(),
                expected: std::any::type_name::<T>(),
            })
    }

    pub fn has_repository(&self, name: &str) -> bool {
        self.repositories.iter().any(|entry| entry.name == name)
    }

    /// Names in registration order.
    pub fn repository_names(&self) -> Vec<String> {
        self.repositories.iter().map(|entry| entry.name.clone()).collect()
    }

    fn entry(&self, name: &str) -> SyncResult<&RepositoryEntry> {
        self.repositories
            .iter()
            .find(|entry| entry.name == name)
            .ok_or_else(|| SyncError::RepositoryNotFound(name.to_string()))
    }

    // =========================================================================
    // Push Side
    // =========================================================================

    /// Pending events of every repository, grouped in registration order.
    pub async fn get_all_pending_events(&self) -> SyncResult<Vec<RawEvent>> {
        let mut all = Vec::new();
        for entry in &self.repositories {
            all.extend(entry.erased.pending_raw_events().await?);
        }
        Ok(all)
    }

    pub async fn pending_events_for(&self, repository: &str) -> SyncResult<Vec<RawEvent>> {
        self.entry(repository)?.erased.pending_raw_events().await
    }

    /// Marks pushed events `ok`. Returns how many stored rows changed.
    pub async fn confirm_pushed(&self, events: &[RawEvent]) -> SyncResult<usize> {
        self.mark(events, SyncStatus::Ok).await
    }

    /// Marks events the remote rejected as `failed`.
    pub async fn mark_failed(&self, events: &[RawEvent]) -> SyncResult<usize> {
        self.mark(events, SyncStatus::Failed).await
    }

    async fn mark(&self, events: &[RawEvent], status: SyncStatus) -> SyncResult<usize> {
        for event in events {
            self.entry(event.repository_name())?;
        }

        let mut changed = 0;
        for entry in &self.repositories {
            let group: Vec<RawEvent> = events
                .iter()
                .filter(|event| event.repository_name() == entry.name)
                .cloned()
                .collect();
            if !group.is_empty() {
                changed += entry.erased.mark_events(&group, status).await?;
            }
        }
        Ok(changed)
    }

    // =========================================================================
    // Pull Side
    // =========================================================================

    /// Merges a pulled batch into one repository.
    ///
    /// Every decodable item is applied. Items that fail to decode, or that
    /// name another repository, are collected into one
    /// [`SyncError::PullFailed`] raised after the whole batch has run.
    pub async fn pull_changes(&self, repository: &str, changes: &[Value]) -> SyncResult<PullSummary> {
        let repo = self.get_repository(repository)?;

        let mut summary = PullSummary::default();
        let mut failures = Vec::new();

        for (index, item) in changes.iter().enumerate() {
            if let Some(other) = item.get("repositoryName").and_then(Value::as_str) {
                if other != repository {
                    failures.push(PullFailure {
                        index,
                        payload: item.clone(),
                        reason: format!("event belongs to repository {other}"),
                    });
                    continue;
                }
            }

            match repo.merge_remote_raw(item).await {
                Ok(outcome) => {
                    summary.applied += 1;
                    if outcome.wrote() {
                        summary.written += 1;
                    }
                    if let Some(seq) = item.get("serverSequence").and_then(Value::as_i64) {
                        summary.max_sequence = Some(summary.max_sequence.map_or(seq, |m| m.max(seq)));
                    }
                }
                Err(SyncError::Deserialization { reason, .. }) => {
                    failures.push(PullFailure {
                        index,
                        payload: item.clone(),
                        reason,
                    });
                }
                Err(other) => return Err(other),
            }
        }

        debug!(
            repository = %repository,
            applied = summary.applied,
            written = summary.written,
            failed = failures.len(),
            "Pulled changes applied"
        );

        if failures.is_empty() {
            Ok(summary)
        } else {
            warn!(repository = %repository, failed = failures.len(), "Pull batch had bad items");
            Err(SyncError::PullFailed {
                repository: repository.to_string(),
                applied: summary.applied,
                failures,
            })
        }
    }

    // =========================================================================
    // Namespaces
    // =========================================================================

    /// Switches storage and config to another partition.
    ///
    /// Waits until no sync cycle is running, and holds new cycles off until
    /// the switch is complete. Fails with [`SyncError::CalledFromCycle`]
    /// when called from a sync callback.
    pub async fn use_namespace(&self, namespace: &str) -> SyncResult<()> {
        reject_inside_cycle("use_namespace")?;
        let _gate = self.gate.write().await;
        self.ensure_live()?;

        self.storage.use_namespace(namespace).await?;
        if let Some(config) = &self.config {
            config.use_namespace(namespace).await?;
        }

        info!(namespace = %namespace, "Namespace selected");
        Ok(())
    }

    pub async fn namespace(&self) -> String {
        self.storage.namespace().await
    }

    /// Shared guard held by a sync cycle.
    pub(crate) async fn cycle_gate(&self) -> OwnedRwLockReadGuard<()> {
        Arc::clone(&self.gate).read_owned().await
    }

    // =========================================================================
    // Connection State
    // =========================================================================

    /// Records the latest connectivity and returns the previous value.
    ///
    /// Observers are only woken when the value changes.
    pub fn report_connection_state(&self, connected: bool) -> Option<bool> {
        let guard = self
            .connection
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        let sender = guard.as_ref()?;

        let mut previous = None;
        sender.send_if_modified(|state| {
            previous = *state;
            if *state == Some(connected) {
                false
            } else {
                *state = Some(connected);
                true
            }
        });
        previous
    }

    /// Latest known connectivity; `None` until a strategy reports.
    pub fn connection_state(&self) -> Option<bool> {
        self.connection
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .as_ref()
            .and_then(|sender| *sender.borrow())
    }

    /// Receiver that starts at the latest value and sees every change.
    ///
    /// After `dispose` the receiver is already closed.
    pub fn connection_changes(&self) -> watch::Receiver<Option<bool>> {
        match self
            .connection
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .as_ref()
        {
            Some(sender) => sender.subscribe(),
            None => watch::channel(None).1,
        }
    }

    /// Stream view of [`SyncClient::connection_changes`].
    pub fn connection_stream(&self) -> BoxStream<'static, Option<bool>> {
        tokio_stream::wrappers::WatchStream::new(self.connection_changes()).boxed()
    }

    // =========================================================================
    // Config Values
    // =========================================================================

    /// The distinct config port, or the storage adapter's own.
    pub fn config_port(&self) -> Arc<dyn ConfigPort> {
        match &self.config {
            Some(config) => Arc::clone(config),
            None => Arc::clone(&self.storage).config_port(),
        }
    }

    pub fn storage(&self) -> Arc<dyn StoragePort> {
        Arc::clone(&self.storage)
    }

    pub async fn get_config(&self, key: &str) -> SyncResult<Option<ConfigValue>> {
        Ok(self.config_port().get(key).await?)
    }

    pub async fn set_config(&self, key: &str, value: impl Into<ConfigValue>) -> SyncResult<()> {
        Ok(self.config_port().set(key, value.into()).await?)
    }

    pub async fn remove_config(&self, key: &str) -> SyncResult<()> {
        Ok(self.config_port().remove(key).await?)
    }

    pub async fn contains_config(&self, key: &str) -> SyncResult<bool> {
        Ok(self.config_port().contains(key).await?)
    }

    pub async fn config_keys(&self) -> SyncResult<Vec<String>> {
        Ok(self.config_port().list_keys().await?)
    }

    // =========================================================================
    // Strategies
    // =========================================================================

    pub fn strategies(&self) -> &[Arc<dyn SyncStrategy>] {
        &self.strategies
    }

    /// Starts every strategy in registration order.
    pub async fn start_sync(&self) -> SyncResult<()> {
        self.ensure_live()?;
        for strategy in &self.strategies {
            info!(strategy = %strategy.name(), "Starting strategy");
            strategy.start().await?;
        }
        Ok(())
    }

    pub async fn stop_sync(&self) -> SyncResult<()> {
        for strategy in &self.strategies {
            strategy.stop().await?;
            debug!(strategy = %strategy.name(), "Strategy stopped");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::{Deserialize, Serialize};
    use serde_json::json;
    use tessera_db::MemoryStorage;

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Note {
        id: String,
        text: String,
    }

    fn notes(name: &str) -> Arc<Repository<Note>> {
        Arc::new(
            Repository::<Note>::builder(name)
                .id(|n| n.id.clone())
                .build()
                .unwrap(),
        )
    }

    async fn client() -> Arc<SyncClient> {
        let client = SyncClient::builder()
            .storage(Arc::new(MemoryStorage::new()))
            .repository(notes("note"))
            .build()
            .unwrap();
        client.initialize().await.unwrap();
        client
    }

    fn wire(id: &str, text: &str, seq: i64) -> Value {
        json!({
            "eventId": tessera_core::new_id(),
            "repositoryName": "note",
            "recordId": id,
            "operation": 0,
            "payload": {"id": id, "text": text},
            "syncCreatedAt": 1_700_000_000_000i64,
            "serverSequence": seq
        })
    }

    #[test]
    fn test_construction_errors() {
        let missing = SyncClient::builder().repository(notes("note")).build();
        assert!(matches!(missing, Err(SyncError::MissingStorage)));

        let duplicate = SyncClient::builder()
            .storage(Arc::new(MemoryStorage::new()))
            .repository(notes("note"))
            .repository(notes("note"))
            .build();
        assert!(matches!(duplicate, Err(SyncError::DuplicateRepository(name)) if name == "note"));
    }

    #[tokio::test]
    async fn test_ready_replays_to_late_callers() {
        let client = client().await;
        assert!(client.is_ready());
        client.ready().await.unwrap();
    }

    #[tokio::test]
    async fn test_repository_lookup() {
        let client = client().await;
        assert!(client.get_repository("note").is_ok());
        assert!(matches!(
            client.get_repository("chat"),
            Err(SyncError::RepositoryNotFound(_))
        ));
        assert!(client.typed_repository::<Note>("note").is_ok());
        assert!(matches!(
            client.typed_repository::<String>("note"),
            Err(SyncError::RepositoryTypeMismatch { .. })
        ));
    }

    #[tokio::test]
    async fn test_pull_rejects_foreign_items() {
        let client = client().await;
        let mut foreign = wire("n2", "x", 2);
        foreign["repositoryName"] = json!("chat");

        let err = client
            .pull_changes("note", &[wire("n1", "a", 1), foreign])
            .await
            .unwrap_err();
        assert_eq!(err.pull_failures().len(), 1);
        assert_eq!(err.pull_failures()[0].index, 1);

        let repo = client.typed_repository::<Note>("note").unwrap();
        assert_eq!(repo.count().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_pull_summary() {
        let client = client().await;
        let batch = vec![wire("n1", "a", 4), wire("n2", "b", 9)];

        let summary = client.pull_changes("note", &batch).await.unwrap();
        assert_eq!(summary.applied, 2);
        assert_eq!(summary.written, 2);
        assert_eq!(summary.max_sequence, Some(9));

        let again = client.pull_changes("note", &batch).await.unwrap();
        assert_eq!(again.applied, 2);
        assert_eq!(again.written, 0);
    }

    #[tokio::test]
    async fn test_confirm_pushed() {
        let client = client().await;
        let repo = client.typed_repository::<Note>("note").unwrap();
        repo.upsert(Note { id: "n1".into(), text: "hi".into() }).await.unwrap();

        let pending = client.get_all_pending_events().await.unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(client.confirm_pushed(&pending).await.unwrap(), 1);
        assert!(client.get_all_pending_events().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_connection_state_replays_latest() {
        let client = client().await;
        assert_eq!(client.connection_state(), None);

        assert_eq!(client.report_connection_state(false), None);
        assert_eq!(client.report_connection_state(true), Some(false));

        let rx = client.connection_changes();
        assert_eq!(*rx.borrow(), Some(true));
    }

    #[tokio::test]
    async fn test_config_helpers_are_namespaced() {
        let client = client().await;
        client.set_config("theme", "dark").await.unwrap();
        assert!(client.contains_config("theme").await.unwrap());

        client.use_namespace("bob").await.unwrap();
        assert_eq!(client.namespace().await, "bob");
        assert!(client.get_config("theme").await.unwrap().is_none());
        assert!(client.config_keys().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_dispose_is_idempotent() {
        let client = client().await;
        let mut rx = client.connection_changes();

        client.dispose().await.unwrap();
        client.dispose().await.unwrap();

        assert!(rx.changed().await.is_err());
        assert_eq!(client.report_connection_state(true), None);
        assert!(matches!(client.use_namespace("x").await, Err(SyncError::Disposed)));
    }
}
