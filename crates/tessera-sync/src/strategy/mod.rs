//! # Sync Strategies
//!
//! When and how pending events are pushed and remote events pulled.
//!
//! ## Strategy Contract
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                        SyncStrategy                                     │
//! │                                                                         │
//! │  attach(client)          once, from SyncClientBuilder::build           │
//! │  start() / stop()        default no-ops; client calls them blindly     │
//! │  dispose()               default = stop()                              │
//! │  on_push_to_remote(ev)   direct single-event push                      │
//! │                                                                         │
//! │  ┌──────────────────────┐  ┌──────────────────────┐                    │
//! │  │ PeriodicSyncStrategy │  │ ManualSyncStrategy   │   (a push-channel  │
//! │  │ timer + busy flag    │  │ sync_now()           │    strategy plugs  │
//! │  └──────────┬───────────┘  └──────────┬───────────┘    in the same way)│
//! │             └────────────┬────────────┘                                │
//! │                    CycleRunner (cycle.rs)                              │
//! │              push pending ─► fetch ─► pull_changes ─► save state       │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

pub mod cycle;
pub mod manual;
pub mod periodic;

use std::sync::Arc;

use async_trait::async_trait;
use tessera_core::{RawEvent, SyncStatus};

use crate::client::SyncClient;
use crate::error::SyncResult;

pub(crate) use cycle::current_cycle;
pub use cycle::{SyncCallbacks, TickError, TickOutcome, TickReport};
pub use manual::{ManualSyncStrategy, ManualSyncStrategyBuilder};
pub use periodic::{PeriodicSyncStrategy, PeriodicSyncStrategyBuilder, SyncPhase};

/// Pluggable push/pull orchestration.
#[async_trait]
pub trait SyncStrategy: Send + Sync {
    fn name(&self) -> &str;

    /// Binds the strategy to its client. Fails if it names a repository
    /// the client does not have, or is already attached.
    fn attach(&self, client: &Arc<SyncClient>) -> SyncResult<()>;

    async fn start(&self) -> SyncResult<()> {
        Ok(())
    }

    async fn stop(&self) -> SyncResult<()> {
        Ok(())
    }

    /// Stops the strategy for good.
    async fn dispose(&self) -> SyncResult<()> {
        self.stop().await
    }

    /// Pushes one event right away and reports its resulting status.
    async fn on_push_to_remote(&self, event: &RawEvent) -> SyncResult<SyncStatus>;
}
