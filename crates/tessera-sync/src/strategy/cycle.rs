//! # Sync Cycle
//!
//! One push/pull pass over a strategy's repositories, shared by the periodic
//! and manual strategies.
//!
//! ## Tick Flow
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                            run_tick()                                   │
//! │                                                                         │
//! │  busy? ──yes──► Skipped (never queued)                                 │
//! │    │no                                                                  │
//! │  take shared namespace gate                                            │
//! │    │                                                                    │
//! │  ping configured and fails? ──► report disconnected, stop              │
//! │    │                                                                    │
//! │  for each repository:                                                  │
//! │    1. pending = client.pending_events_for(repo)                        │
//! │       non-empty → push(repo, pending)                                  │
//! │                   true  → confirm_pushed (ok)                          │
//! │                   false → stay pending until next tick                 │
//! │    2. filter = build_filter(client, repo)                              │
//! │       items  = fetch(repo, filter)                                     │
//! │       non-empty → pull_changes, then save_state(client, repo, items)   │
//! │       some items bad → save_state with the applied items, then error   │
//! │    error → on_tick_error(repo, err), continue with next repository     │
//! │    │                                                                    │
//! │  report connected (disconnected if no ping and a transport error)      │
//! │  disconnected → connected fires on_connection_restored                 │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock, Weak};

use futures_util::future::{BoxFuture, FutureExt};
use serde_json::Value;
use tessera_core::RawEvent;
use tracing::{debug, info, warn};

use crate::client::SyncClient;
use crate::cursor;
use crate::error::{SyncError, SyncResult};

pub type FetchFn = Arc<dyn Fn(String, Option<Value>) -> BoxFuture<'static, SyncResult<Vec<Value>>> + Send + Sync>;
pub type PushFn = Arc<dyn Fn(String, Vec<RawEvent>) -> BoxFuture<'static, SyncResult<bool>> + Send + Sync>;
pub type FilterFn =
    Arc<dyn Fn(Arc<SyncClient>, String) -> BoxFuture<'static, SyncResult<Option<Value>>> + Send + Sync>;
pub type SaveStateFn =
    Arc<dyn Fn(Arc<SyncClient>, String, Vec<Value>) -> BoxFuture<'static, SyncResult<()>> + Send + Sync>;
pub type PingFn = Arc<dyn Fn() -> BoxFuture<'static, bool> + Send + Sync>;
pub type SetupFn = Arc<dyn Fn(Arc<SyncClient>) -> BoxFuture<'static, SyncResult<()>> + Send + Sync>;
pub type TickErrorFn = Arc<dyn Fn(&str, &SyncError) + Send + Sync>;
pub type RestoredFn = Arc<dyn Fn() -> BoxFuture<'static, ()> + Send + Sync>;

// =============================================================================
// Callbacks
// =============================================================================

/// The remote side of a strategy.
///
/// `fetch` and `push` are required; the rest are optional.
///
/// Every callback except `setup` and `on_connection_restored` runs inside
/// a sync cycle, while the cycle holds the client's namespace gate. Calling
/// [`SyncClient::use_namespace`] or [`SyncClient::clear_all_data`] from one
/// of them fails with [`SyncError::CalledFromCycle`]. Spawning a task that
/// awaits them is allowed, but that task only proceeds once the cycle ends.
///
/// ```rust,ignore
/// let callbacks = SyncCallbacks::new()
///     .fetch(|repo, filter| async move { api.pull(&repo, filter).await })
///     .push(|repo, events| async move { api.push(&repo, ChangeBatch::from_events(&events)).await })
///     .with_sequence_cursor();
/// ```
#[derive(Clone, Default)]
pub struct SyncCallbacks {
    fetch: Option<FetchFn>,
    push: Option<PushFn>,
    build_filter: Option<FilterFn>,
    save_state: Option<SaveStateFn>,
    ping: Option<PingFn>,
    setup: Option<SetupFn>,
    on_tick_error: Option<TickErrorFn>,
    on_connection_restored: Option<RestoredFn>,
}

impl SyncCallbacks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fetches remote events for a repository, given an optional filter.
    pub fn fetch<F, Fut>(mut self, fetch: F) -> Self
    where
        F: Fn(String, Option<Value>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = SyncResult<Vec<Value>>> + Send + 'static,
    {
        self.fetch = Some(Arc::new(move |repo, filter| fetch(repo, filter).boxed()));
        self
    }

    /// Pushes a batch of local events; `Ok(false)` means the remote refused.
    pub fn push<F, Fut>(mut self, push: F) -> Self
    where
        F: Fn(String, Vec<RawEvent>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = SyncResult<bool>> + Send + 'static,
    {
        self.push = Some(Arc::new(move |repo, events| push(repo, events).boxed()));
        self
    }

    /// Builds the pull filter from persisted sync state.
    pub fn build_filter<F, Fut>(mut self, build: F) -> Self
    where
        F: Fn(Arc<SyncClient>, String) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = SyncResult<Option<Value>>> + Send + 'static,
    {
        self.build_filter = Some(Arc::new(move |client, repo| build(client, repo).boxed()));
        self
    }

    /// Persists sync state after a non-empty pull.
    pub fn save_state<F, Fut>(mut self, save: F) -> Self
    where
        F: Fn(Arc<SyncClient>, String, Vec<Value>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = SyncResult<()>> + Send + 'static,
    {
        self.save_state = Some(Arc::new(move |client, repo, items| save(client, repo, items).boxed()));
        self
    }

    /// Connectivity check run before each tick.
    pub fn ping<F, Fut>(mut self, ping: F) -> Self
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = bool> + Send + 'static,
    {
        self.ping = Some(Arc::new(move || ping().boxed()));
        self
    }

    /// Runs once in `start`, after the client is ready.
    pub fn setup<F, Fut>(mut self, setup: F) -> Self
    where
        F: Fn(Arc<SyncClient>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = SyncResult<()>> + Send + 'static,
    {
        self.setup = Some(Arc::new(move |client| setup(client).boxed()));
        self
    }

    pub fn on_tick_error<F>(mut self, hook: F) -> Self
    where
        F: Fn(&str, &SyncError) + Send + Sync + 'static,
    {
        self.on_tick_error = Some(Arc::new(hook));
        self
    }

    /// Spawned, not awaited, on a disconnected → connected transition.
    pub fn on_connection_restored<F, Fut>(mut self, hook: F) -> Self
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        self.on_connection_restored = Some(Arc::new(move || hook().boxed()));
        self
    }

    /// Pull only events newer than the highest `serverSequence` seen.
    ///
    /// Installs a filter of `{"afterSequence": n}` and a saver that records
    /// the batch maximum in the config port.
    pub fn with_sequence_cursor(self) -> Self {
        self.build_filter(|client: Arc<SyncClient>, repo: String| async move {
            let last = cursor::last_sequence(&client, &repo).await?;
            Ok::<_, SyncError>(cursor::sequence_filter(last))
        })
        .save_state(|client: Arc<SyncClient>, repo: String, items: Vec<Value>| async move {
            if let Some(max) = cursor::max_sequence(&items) {
                cursor::save_last_sequence(&client, &repo, max).await?;
            }
            Ok::<_, SyncError>(())
        })
    }
}

tokio::task_local! {
    /// Name of the strategy whose cycle is running on this task.
    static CURRENT_CYCLE: String;
}

/// Name of the strategy running a cycle on the current task, if any.
pub(crate) fn current_cycle() -> Option<String> {
    CURRENT_CYCLE.try_with(|name| name.clone()).ok()
}

// =============================================================================
// Tick Results
// =============================================================================

/// One repository failure inside a tick.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TickError {
    pub repository: String,
    pub message: String,
    pub retryable: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TickReport {
    /// Events the remote accepted.
    pub pushed: usize,
    /// Remote items applied locally.
    pub pulled: usize,
    pub connected: bool,
    pub errors: Vec<TickError>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TickOutcome {
    Completed(TickReport),
    /// A previous tick was still running.
    Skipped,
}

impl TickOutcome {
    pub fn report(&self) -> Option<&TickReport> {
        match self {
            TickOutcome::Completed(report) => Some(report),
            TickOutcome::Skipped => None,
        }
    }

    pub fn is_skipped(&self) -> bool {
        matches!(self, TickOutcome::Skipped)
    }
}

// =============================================================================
// Cycle Runner
// =============================================================================

/// Clears the busy flag when a tick ends, including on early return.
struct BusyGuard<'a>(&'a AtomicBool);

impl Drop for BusyGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

pub(crate) struct CycleRunner {
    name: String,
    repositories: Vec<String>,
    callbacks: SyncCallbacks,
    fetch: FetchFn,
    push: PushFn,
    busy: AtomicBool,
    client: OnceLock<Weak<SyncClient>>,
}

impl CycleRunner {
    /// An empty repository list means every repository of the client.
    pub(crate) fn new(
        name: String,
        repositories: Vec<String>,
        callbacks: SyncCallbacks,
    ) -> SyncResult<Self> {
        let fetch = callbacks.fetch.clone().ok_or_else(|| SyncError::MissingCallback {
            component: name.clone(),
            callback: "fetch",
        })?;
        let push = callbacks.push.clone().ok_or_else(|| SyncError::MissingCallback {
            component: name.clone(),
            callback: "push",
        })?;

        Ok(CycleRunner {
            name,
            repositories,
            callbacks,
            fetch,
            push,
            busy: AtomicBool::new(false),
            client: OnceLock::new(),
        })
    }

    pub(crate) fn name(&self) -> &str {
        &self.name
    }

    /// Runs the setup hook, if any.
    pub(crate) async fn run_setup(&self, client: Arc<SyncClient>) -> SyncResult<()> {
        match &self.callbacks.setup {
            Some(setup) => setup(client).await,
            None => Ok(()),
        }
    }

    /// Pushes one event outside of a tick.
    pub(crate) async fn push_one(&self, event: &RawEvent) -> SyncResult<bool> {
        (self.push)(event.repository_name().to_string(), vec![event.clone()]).await
    }

    pub(crate) fn attach(&self, client: &Arc<SyncClient>) -> SyncResult<()> {
        if let Some(missing) = self.repositories.iter().find(|r| !client.has_repository(r)) {
            return Err(SyncError::RepositoryNotFound(missing.clone()));
        }
        self.client
            .set(Arc::downgrade(client))
            .map_err(|_| SyncError::InvalidConfig(format!("{} is already attached", self.name)))
    }

    pub(crate) fn client(&self) -> SyncResult<Arc<SyncClient>> {
        let weak = self.client.get().ok_or_else(|| {
            SyncError::InvalidConfig(format!("{} is not attached to a client", self.name))
        })?;
        weak.upgrade().ok_or(SyncError::ClientDropped)
    }

    pub(crate) fn is_busy(&self) -> bool {
        self.busy.load(Ordering::Acquire)
    }

    /// Runs one cycle, or returns `Skipped` if one is already running.
    pub(crate) async fn run_tick(&self) -> SyncResult<TickOutcome> {
        if self
            .busy
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            debug!(strategy = %self.name, "Tick skipped, previous tick still running");
            return Ok(TickOutcome::Skipped);
        }
        let _busy = BusyGuard(&self.busy);

        CURRENT_CYCLE.scope(self.name.clone(), self.run_cycle()).await
    }

    async fn run_cycle(&self) -> SyncResult<TickOutcome> {
        let client = self.client()?;
        let _gate = client.cycle_gate().await;
        debug!(strategy = %self.name, "Tick started");

        let mut report = TickReport::default();

        if let Some(ping) = &self.callbacks.ping {
            if !ping().await {
                warn!(strategy = %self.name, "Connectivity check failed, skipping tick");
                self.report_connection(&client, false);
                return Ok(TickOutcome::Completed(report));
            }
        }

        let repositories = if self.repositories.is_empty() {
            client.repository_names()
        } else {
            self.repositories.clone()
        };

        let mut transport_failed = false;
        for repository in &repositories {
            if let Err(err) = self.sync_repository(&client, repository, &mut report).await {
                transport_failed |= err.is_transport();
                warn!(
                    strategy = %self.name,
                    repository = %repository,
                    error = %err,
                    "Repository sync failed"
                );
                if let Some(hook) = &self.callbacks.on_tick_error {
                    hook(repository, &err);
                }
                report.errors.push(TickError {
                    repository: repository.clone(),
                    message: err.to_string(),
                    retryable: err.is_retryable(),
                });
            }
        }

        report.connected = !(self.callbacks.ping.is_none() && transport_failed);
        self.report_connection(&client, report.connected);

        debug!(
            strategy = %self.name,
            pushed = report.pushed,
            pulled = report.pulled,
            errors = report.errors.len(),
            "Tick finished"
        );
        Ok(TickOutcome::Completed(report))
    }

    async fn sync_repository(
        &self,
        client: &Arc<SyncClient>,
        repository: &str,
        report: &mut TickReport,
    ) -> SyncResult<()> {
        let pending = client.pending_events_for(repository).await?;
        if !pending.is_empty() {
            let accepted = (self.push)(repository.to_string(), pending.clone()).await?;
            if accepted {
                client.confirm_pushed(&pending).await?;
                report.pushed += pending.len();
            } else {
                debug!(
                    repository = %repository,
                    count = pending.len(),
                    "Push refused, events stay pending"
                );
            }
        }

        let filter = match &self.callbacks.build_filter {
            Some(build) => build(Arc::clone(client), repository.to_string()).await?,
            None => None,
        };

        let items = (self.fetch)(repository.to_string(), filter).await?;
        if items.is_empty() {
            return Ok(());
        }

        // A partly failed batch still records the items it applied, so one
        // bad item does not hold sync state back on every later tick.
        let (applied, failed, outcome) = match client.pull_changes(repository, &items).await {
            Ok(summary) => (summary.applied, Vec::new(), Ok(())),
            Err(SyncError::PullFailed {
                repository: name,
                applied,
                failures,
            }) => {
                let failed: Vec<usize> = failures.iter().map(|f| f.index).collect();
                let err = SyncError::PullFailed {
                    repository: name,
                    applied,
                    failures,
                };
                (applied, failed, Err(err))
            }
            Err(other) => return Err(other),
        };
        report.pulled += applied;

        if applied > 0 {
            if let Some(save) = &self.callbacks.save_state {
                let kept: Vec<Value> = items
                    .into_iter()
                    .enumerate()
                    .filter(|(index, _)| !failed.contains(index))
                    .map(|(_, item)| item)
                    .collect();
                save(Arc::clone(client), repository.to_string(), kept).await?;
            }
        }

        outcome
    }

    fn report_connection(&self, client: &SyncClient, connected: bool) {
        let previous = client.report_connection_state(connected);
        if connected && previous == Some(false) {
            info!(strategy = %self.name, "Connection restored");
            if let Some(hook) = &self.callbacks.on_connection_restored {
                tokio::spawn(hook());
            }
        } else if !connected && previous != Some(false) {
            warn!(strategy = %self.name, "Connection lost");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repository::Repository;
    use serde::{Deserialize, Serialize};
    use serde_json::json;
    use std::sync::atomic::AtomicUsize;
    use tessera_db::MemoryStorage;

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Item {
        id: String,
    }

    async fn client() -> Arc<SyncClient> {
        let repo = Repository::<Item>::builder("item")
            .id(|i| i.id.clone())
            .build()
            .unwrap();
        let client = SyncClient::builder()
            .storage(Arc::new(MemoryStorage::new()))
            .repository(Arc::new(repo))
            .build()
            .unwrap();
        client.initialize().await.unwrap();
        client
    }

    fn runner(callbacks: SyncCallbacks) -> CycleRunner {
        CycleRunner::new("test".into(), vec!["item".into()], callbacks).unwrap()
    }

    #[test]
    fn test_fetch_and_push_required() {
        let no_fetch = CycleRunner::new("test".into(), vec![], SyncCallbacks::new());
        assert!(matches!(
            no_fetch,
            Err(SyncError::MissingCallback { callback: "fetch", .. })
        ));

        let no_push = CycleRunner::new(
            "test".into(),
            vec![],
            SyncCallbacks::new().fetch(|_, _| async { Ok(Vec::new()) }),
        );
        assert!(matches!(
            no_push,
            Err(SyncError::MissingCallback { callback: "push", .. })
        ));
    }

    #[tokio::test]
    async fn test_attach_validates_repositories() {
        let client = client().await;
        let callbacks = SyncCallbacks::new()
            .fetch(|_, _| async { Ok(Vec::new()) })
            .push(|_, _| async { Ok(true) });
        let runner = CycleRunner::new("test".into(), vec!["chat".into()], callbacks).unwrap();
        assert!(matches!(
            runner.attach(&client),
            Err(SyncError::RepositoryNotFound(name)) if name == "chat"
        ));
    }

    #[tokio::test]
    async fn test_failed_ping_skips_push_and_pull() {
        let client = client().await;
        let calls = Arc::new(AtomicUsize::new(0));
        let fetches = Arc::clone(&calls);

        let runner = runner(
            SyncCallbacks::new()
                .fetch(move |_, _| {
                    fetches.fetch_add(1, Ordering::SeqCst);
                    async { Ok(Vec::new()) }
                })
                .push(|_, _| async { Ok(true) })
                .ping(|| async { false }),
        );
        runner.attach(&client).unwrap();

        let outcome = runner.run_tick().await.unwrap();
        assert!(!outcome.report().unwrap().connected);
        assert_eq!(calls.load(Ordering::SeqCst), 0);
        assert_eq!(client.connection_state(), Some(false));
    }

    #[tokio::test]
    async fn test_transport_error_without_ping_reports_disconnected() {
        let client = client().await;
        let errors = Arc::new(AtomicUsize::new(0));
        let seen = Arc::clone(&errors);

        let runner = runner(
            SyncCallbacks::new()
                .fetch(|_, _| async { Err(SyncError::Transport("offline".into())) })
                .push(|_, _| async { Ok(true) })
                .on_tick_error(move |repo, _| {
                    assert_eq!(repo, "item");
                    seen.fetch_add(1, Ordering::SeqCst);
                }),
        );
        runner.attach(&client).unwrap();

        let outcome = runner.run_tick().await.unwrap();
        let report = outcome.report().unwrap();
        assert!(!report.connected);
        assert_eq!(report.errors.len(), 1);
        assert!(report.errors[0].retryable);
        assert_eq!(errors.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_refused_push_leaves_events_pending() {
        let client = client().await;
        let repo = client.typed_repository::<Item>("item").unwrap();
        repo.upsert(Item { id: "i1".into() }).await.unwrap();

        let runner = runner(
            SyncCallbacks::new()
                .fetch(|_, _| async { Ok(Vec::new()) })
                .push(|_, _| async { Ok(false) }),
        );
        runner.attach(&client).unwrap();

        let outcome = runner.run_tick().await.unwrap();
        assert_eq!(outcome.report().unwrap().pushed, 0);
        assert!(outcome.report().unwrap().connected);
        assert_eq!(client.get_all_pending_events().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_state_saved_only_after_non_empty_pull() {
        let client = client().await;
        let saves = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&saves);
        let round = Arc::new(AtomicUsize::new(0));

        let runner = runner(
            SyncCallbacks::new()
                .fetch(move |_, _| {
                    let first = round.fetch_add(1, Ordering::SeqCst) == 0;
                    async move {
                        if first {
                            Ok(vec![json!({
                                "eventId": tessera_core::new_id(),
                                "recordId": "i1",
                                "operation": "insert",
                                "payload": {"id": "i1"},
                                "syncCreatedAt": 1_700_000_000_000i64,
                                "serverSequence": 1
                            })])
                        } else {
                            Ok(Vec::new())
                        }
                    }
                })
                .push(|_, _| async { Ok(true) })
                .save_state(move |_, _, _| {
                    counter.fetch_add(1, Ordering::SeqCst);
                    async { Ok(()) }
                }),
        );
        runner.attach(&client).unwrap();

        runner.run_tick().await.unwrap();
        runner.run_tick().await.unwrap();
        assert_eq!(saves.load(Ordering::SeqCst), 1);
        assert!(!runner.is_busy());
    }

    #[tokio::test]
    async fn test_restored_hook_fires_on_reconnect() {
        let client = client().await;
        client.report_connection_state(false);

        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
        let runner = runner(
            SyncCallbacks::new()
                .fetch(|_, _| async { Ok(Vec::new()) })
                .push(|_, _| async { Ok(true) })
                .on_connection_restored(move || {
                    let tx = tx.clone();
                    async move {
                        let _ = tx.send(());
                    }
                }),
        );
        runner.attach(&client).unwrap();

        runner.run_tick().await.unwrap();
        assert!(rx.recv().await.is_some());
        assert_eq!(client.connection_state(), Some(true));
    }
    #[tokio::test]
    async fn test_partly_failed_pull_still_advances_cursor() {
        let client = client().await;
        let filters = Arc::new(std::sync::Mutex::new(Vec::new()));
        let seen = Arc::clone(&filters);
        let round = Arc::new(AtomicUsize::new(0));

        let item = |id: &str, seq: i64| {
            json!({
                "eventId": tessera_core::new_id(),
                "recordId": id,
                "operation": "insert",
                "payload": {"id": id},
                "syncCreatedAt": 1_700_000_000_000i64,
                "serverSequence": seq
            })
        };
        let mut broken = item("i2", 2);
        broken["payload"] = json!("not an item");
        let batch = vec![item("i1", 1), broken, item("i3", 3)];

        let runner = runner(
            SyncCallbacks::new()
                .fetch(move |_, filter| {
                    seen.lock().unwrap().push(filter);
                    let first = round.fetch_add(1, Ordering::SeqCst) == 0;
                    let batch = batch.clone();
                    async move { Ok(if first { batch } else { Vec::new() }) }
                })
                .push(|_, _| async { Ok(true) })
                .with_sequence_cursor(),
        );
        runner.attach(&client).unwrap();

        let outcome = runner.run_tick().await.unwrap();
        let report = outcome.report().unwrap();
        assert_eq!(report.pulled, 2);
        assert_eq!(report.errors.len(), 1);
        assert!(!report.errors[0].retryable);
        assert!(report.connected);
        assert_eq!(cursor::last_sequence(&client, "item").await.unwrap(), Some(3));

        runner.run_tick().await.unwrap();
        let filters = filters.lock().unwrap();
        assert_eq!(filters[0], None);
        assert_eq!(filters[1], Some(json!({"afterSequence": 3})));
    }

    #[tokio::test]
    async fn test_gated_calls_from_a_callback_fail_fast() {
        let client = client().await;
        let inner = Arc::clone(&client);
        let hook_errors = Arc::new(std::sync::Mutex::new(Vec::new()));
        let recorded = Arc::clone(&hook_errors);

        let runner = runner(
            SyncCallbacks::new()
                .fetch(move |_, _| {
                    let client = Arc::clone(&inner);
                    async move {
                        let cleared = client.clear_all_data().await;
                        assert!(matches!(
                            cleared,
                            Err(SyncError::CalledFromCycle { operation: "clear_all_data", .. })
                        ));
                        client.use_namespace("other").await?;
                        Ok::<_, SyncError>(Vec::new())
                    }
                })
                .push(|_, _| async { Ok(true) })
                .on_tick_error(move |_, err| {
                    recorded.lock().unwrap().push(err.to_string());
                }),
        );
        runner.attach(&client).unwrap();

        let outcome = tokio::time::timeout(std::time::Duration::from_secs(2), runner.run_tick())
            .await
            .expect("tick waited on its own gate")
            .unwrap();
        assert_eq!(outcome.report().unwrap().errors.len(), 1);

        let hook_errors = hook_errors.lock().unwrap();
        assert_eq!(hook_errors.len(), 1);
        assert!(hook_errors[0].contains("use_namespace cannot be called from inside a test"));
        assert_eq!(client.namespace().await, "default");

        // Outside a cycle the same call goes through.
        assert!(current_cycle().is_none());
        drop(hook_errors);
        client.use_namespace("other").await.unwrap();
        assert_eq!(client.namespace().await, "other");
    }
}
