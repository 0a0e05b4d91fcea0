//! On-demand sync: nothing runs until the application calls `sync_now`.
//!
//! Useful for pull-to-refresh screens and for tests that need to drive a
//! cycle deterministically.

use std::sync::Arc;

use async_trait::async_trait;
use tessera_core::{RawEvent, SyncStatus};
use tracing::debug;

use super::cycle::{CycleRunner, SyncCallbacks, TickOutcome};
use super::SyncStrategy;
use crate::client::SyncClient;
use crate::error::SyncResult;

pub struct ManualSyncStrategyBuilder {
    name: String,
    repositories: Vec<String>,
    callbacks: SyncCallbacks,
}

impl ManualSyncStrategyBuilder {
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Repositories this strategy syncs. Empty means all of the client's.
    pub fn repositories<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.repositories = names.into_iter().map(Into::into).collect();
        self
    }

    pub fn callbacks(mut self, callbacks: SyncCallbacks) -> Self {
        self.callbacks = callbacks;
        self
    }

    pub fn build(self) -> SyncResult<ManualSyncStrategy> {
        let runner = CycleRunner::new(self.name, self.repositories, self.callbacks)?;
        Ok(ManualSyncStrategy {
            runner: Arc::new(runner),
        })
    }
}

#[derive(Clone)]
pub struct ManualSyncStrategy {
    runner: Arc<CycleRunner>,
}

impl ManualSyncStrategy {
    pub fn builder() -> ManualSyncStrategyBuilder {
        ManualSyncStrategyBuilder {
            name: "manual".to_string(),
            repositories: Vec::new(),
            callbacks: SyncCallbacks::new(),
        }
    }

    /// Runs one push/pull cycle. Returns `Skipped` if one is in flight.
    pub async fn sync_now(&self) -> SyncResult<TickOutcome> {
        self.runner.run_tick().await
    }

    pub fn is_busy(&self) -> bool {
        self.runner.is_busy()
    }
}

#[async_trait]
impl SyncStrategy for ManualSyncStrategy {
    fn name(&self) -> &str {
        self.runner.name()
    }

    fn attach(&self, client: &Arc<SyncClient>) -> SyncResult<()> {
        self.runner.attach(client)
    }

    /// Pushes the event immediately and records the outcome locally.
    async fn on_push_to_remote(&self, event: &RawEvent) -> SyncResult<SyncStatus> {
        let client = self.runner.client()?;
        let events = std::slice::from_ref(event);

        if self.runner.push_one(event).await? {
            client.confirm_pushed(events).await?;
            Ok(SyncStatus::Ok)
        } else {
            debug!(event_id = %event.event_id(), "Direct push refused");
            client.mark_failed(events).await?;
            Ok(SyncStatus::Failed)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::SyncError;
    use crate::repository::Repository;
    use serde::{Deserialize, Serialize};
    use std::sync::atomic::{AtomicBool, Ordering};
    use tessera_db::MemoryStorage;

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Note {
        id: String,
        body: String,
    }

    async fn setup(accept: Arc<AtomicBool>) -> (Arc<SyncClient>, ManualSyncStrategy) {
        let strategy = ManualSyncStrategy::builder()
            .callbacks(
                SyncCallbacks::new()
                    .fetch(|_, _| async { Ok(Vec::new()) })
                    .push(move |_, _| {
                        let accepted = accept.load(Ordering::SeqCst);
                        async move { Ok(accepted) }
                    }),
            )
            .build()
            .unwrap();

        let notes = Repository::<Note>::builder("note")
            .id(|n| n.id.clone())
            .build()
            .unwrap();
        let client = SyncClient::builder()
            .storage(Arc::new(MemoryStorage::new()))
            .repository(Arc::new(notes))
            .strategy(strategy.clone())
            .build()
            .unwrap();
        client.initialize().await.unwrap();
        (client, strategy)
    }

    fn note(id: &str) -> Note {
        Note {
            id: id.into(),
            body: "hello".into(),
        }
    }

    #[tokio::test]
    async fn test_sync_now_pushes_pending() {
        let (client, strategy) = setup(Arc::new(AtomicBool::new(true))).await;
        let notes = client.typed_repository::<Note>("note").unwrap();
        notes.upsert(note("n1")).await.unwrap();
        notes.upsert(note("n2")).await.unwrap();

        let outcome = strategy.sync_now().await.unwrap();
        assert_eq!(outcome.report().unwrap().pushed, 2);
        assert!(client.get_all_pending_events().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_direct_push_records_status() {
        let accept = Arc::new(AtomicBool::new(true));
        let (client, strategy) = setup(Arc::clone(&accept)).await;
        let notes = client.typed_repository::<Note>("note").unwrap();

        notes.upsert(note("n1")).await.unwrap();
        let pending = client.get_all_pending_events().await.unwrap();
        let status = strategy.on_push_to_remote(&pending[0]).await.unwrap();
        assert_eq!(status, SyncStatus::Ok);

        accept.store(false, Ordering::SeqCst);
        notes.upsert(note("n2")).await.unwrap();
        let pending = client.get_all_pending_events().await.unwrap();
        assert_eq!(pending.len(), 1);
        let status = strategy.on_push_to_remote(&pending[0]).await.unwrap();
        assert_eq!(status, SyncStatus::Failed);

        let event = notes.get_event("n2").await.unwrap().unwrap();
        assert_eq!(event.sync_status(), SyncStatus::Failed);
    }

    #[tokio::test]
    async fn test_unattached_strategy_rejects_direct_push() {
        let strategy = ManualSyncStrategy::builder()
            .callbacks(
                SyncCallbacks::new()
                    .fetch(|_, _| async { Ok(Vec::new()) })
                    .push(|_, _| async { Ok(true) }),
            )
            .build()
            .unwrap();
        let event = RawEvent::new_local(
            "note",
            "n1",
            tessera_core::SyncOperation::Insert,
            Some(serde_json::json!({"id": "n1", "body": "x"})),
        );
        assert!(matches!(
            strategy.on_push_to_remote(&event).await,
            Err(SyncError::InvalidConfig(_))
        ));
    }
}
