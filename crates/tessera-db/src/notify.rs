//! # Change Notification
//!
//! Broadcast feed of table changes, and the generic `watch_query` stream
//! every adapter builds on.
//!
//! ## Watch Stream
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                        watch_query(spec)                                │
//! │                                                                         │
//! │  1. subscribe to ChangeNotifier    (before the first read, so no       │
//! │                                     write between read and subscribe   │
//! │                                     is missed)                         │
//! │  2. run query ──► emit snapshot                                        │
//! │  3. loop:                                                              │
//! │       Change::Table(t) where t == spec.table ──► re-run, emit          │
//! │       Change::All (namespace switch, clear)  ──► re-run, emit          │
//! │       lagged receiver                        ──► re-run, emit          │
//! │       other table                            ──► ignore                │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use std::future::Future;
use std::sync::Arc;

use futures_util::stream::{self, StreamExt};
use tessera_core::RawEvent;
use tokio::sync::broadcast;
use tokio_stream::wrappers::errors::BroadcastStreamRecvError;
use tokio_stream::wrappers::BroadcastStream;
use tracing::trace;

use crate::error::DbResult;
use crate::port::WatchStream;

/// Capacity of the change channel; slow watchers past this re-query.
const CHANNEL_CAPACITY: usize = 256;

/// What changed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Change {
    /// A row of this table was written or removed.
    Table(String),
    /// Every table is affected (namespace switch, clear).
    All,
}

impl Change {
    pub fn affects(&self, table: &str) -> bool {
        match self {
            Change::Table(t) => t == table,
            Change::All => true,
        }
    }
}

/// Fan-out of [`Change`]s to watchers.
#[derive(Debug, Clone)]
pub struct ChangeNotifier {
    sender: broadcast::Sender<Change>,
}

impl Default for ChangeNotifier {
    fn default() -> Self {
        let (sender, _) = broadcast::channel(CHANNEL_CAPACITY);
        ChangeNotifier { sender }
    }
}

impl ChangeNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn notify(&self, change: Change) {
        // No receivers is fine: nobody is watching.
        let _ = self.sender.send(change);
    }

    pub fn table_changed(&self, table: &str) {
        self.notify(Change::Table(table.to_string()));
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Change> {
        self.sender.subscribe()
    }

    /// Builds a live result-set stream over `table`.
    ///
    /// `run` is invoked for the initial snapshot and after each relevant
    /// change; its errors are emitted as stream items and the stream keeps
    /// going.
    pub fn watch<F, Fut>(&self, table: String, run: F) -> WatchStream
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = DbResult<Vec<RawEvent>>> + Send + 'static,
    {
        let changes = BroadcastStream::new(self.subscribe());
        let run = Arc::new(run);

        let state = (changes, true);
        stream::unfold(state, move |(mut changes, first)| {
            let run = Arc::clone(&run);
            let table = table.clone();
            async move {
                if first {
                    let snapshot = run().await;
                    return Some((snapshot, (changes, false)));
                }
                loop {
                    match changes.next().await? {
                        Ok(change) if change.affects(&table) => break,
                        Ok(_) => continue,
                        Err(BroadcastStreamRecvError::Lagged(skipped)) => {
                            trace!(table = %table, skipped, "Watcher lagged, re-querying");
                            break;
                        }
                    }
                }
                let snapshot = run().await;
                Some((snapshot, (changes, false)))
            }
        })
        .boxed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test]
    async fn test_watch_emits_snapshot_then_relevant_changes() {
        let notifier = ChangeNotifier::new();
        let runs = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&runs);

        let mut stream = notifier.watch("user".into(), move || {
            let counter = Arc::clone(&counter);
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(Vec::new())
            }
        });

        assert!(stream.next().await.unwrap().unwrap().is_empty());
        assert_eq!(runs.load(Ordering::SeqCst), 1);

        notifier.table_changed("chat");
        notifier.table_changed("user");
        stream.next().await.unwrap().unwrap();
        assert_eq!(runs.load(Ordering::SeqCst), 2);

        notifier.notify(Change::All);
        stream.next().await.unwrap().unwrap();
        assert_eq!(runs.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn test_change_affects() {
        assert!(Change::All.affects("user"));
        assert!(Change::Table("user".into()).affects("user"));
        assert!(!Change::Table("chat".into()).affects("user"));
    }
}
