//! # Periodic Sync Strategy
//!
//! Polls the remote on a fixed period.
//!
//! ## State Machine
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                      PeriodicSyncStrategy                               │
//! │                                                                         │
//! │   Idle ──start()──► Starting ──────────────────────────► Running        │
//! │    ▲                  │ wait for client ready             │  timer task │
//! │    │                  │ setup hook                        │  spawns one │
//! │    │                  │ one initial tick (awaited)        │  tick per   │
//! │    │                  │ arm timer at now + period         │  period     │
//! │    │                  ▼                                   │             │
//! │    │               Stopped ◄────────stop()────────────────┘             │
//! │    │                  │                                                 │
//! │    └──── start() ─────┘            dispose() ──► Disposed (inert)      │
//! │                                                                         │
//! │   A tick that fires while the previous one still runs is dropped.     │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use std::sync::{Arc, Weak};
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tessera_core::{RawEvent, SyncStatus};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

use super::cycle::{CycleRunner, SyncCallbacks, TickOutcome};
use super::SyncStrategy;
use crate::client::SyncClient;
use crate::config::SyncSettings;
use crate::error::{SyncError, SyncResult};

/// Default interval between ticks.
pub const DEFAULT_PERIOD: Duration = Duration::from_secs(30);

/// Lifecycle phase of a periodic strategy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncPhase {
    Idle,
    Starting,
    Running,
    Stopped,
    Disposed,
}

struct Control {
    phase: SyncPhase,
    timer: Option<JoinHandle<()>>,
}

struct Inner {
    runner: CycleRunner,
    period: Duration,
    control: Mutex<Control>,
}

// =============================================================================
// Builder
// =============================================================================

pub struct PeriodicSyncStrategyBuilder {
    name: String,
    period: Duration,
    repositories: Vec<String>,
    callbacks: SyncCallbacks,
}

impl PeriodicSyncStrategyBuilder {
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn period(mut self, period: Duration) -> Self {
        self.period = period;
        self
    }

    pub fn period_from(self, settings: &SyncSettings) -> Self {
        self.period(settings.period())
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

    pub fn build(self) -> SyncResult<PeriodicSyncStrategy> {
        if self.period.is_zero() {
            return Err(SyncError::InvalidConfig(format!(
                "{}: period must be greater than zero",
                self.name
            )));
        }

        let runner = CycleRunner::new(self.name, self.repositories, self.callbacks)?;
        Ok(PeriodicSyncStrategy {
            inner: Arc::new(Inner {
                runner,
                period: self.period,
                control: Mutex::new(Control {
                    phase: SyncPhase::Idle,
                    timer: None,
                }),
            }),
        })
    }
}

// =============================================================================
// Strategy
// =============================================================================

/// Push/pull on a fixed period with at most one tick in flight.
///
/// Clones share the same timer and state.
#[derive(Clone)]
pub struct PeriodicSyncStrategy {
    inner: Arc<Inner>,
}

impl PeriodicSyncStrategy {
    pub fn builder() -> PeriodicSyncStrategyBuilder {
        PeriodicSyncStrategyBuilder {
            name: "periodic".to_string(),
            period: DEFAULT_PERIOD,
            repositories: Vec::new(),
            callbacks: SyncCallbacks::new(),
        }
    }

    pub fn period(&self) -> Duration {
        self.inner.period
    }

    pub async fn phase(&self) -> SyncPhase {
        self.inner.control.lock().await.phase
    }

    /// Returns true while a tick is running.
    pub fn is_busy(&self) -> bool {
        self.inner.runner.is_busy()
    }

    /// Runs one tick now, under the same busy guard as the timer.
    pub async fn run_tick(&self) -> SyncResult<TickOutcome> {
        self.inner.runner.run_tick().await
    }

    fn spawn_timer(&self) -> JoinHandle<()> {
        let weak: Weak<Inner> = Arc::downgrade(&self.inner);
        let period = self.inner.period;

        tokio::spawn(async move {
            let mut ticker = interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

            loop {
                ticker.tick().await;

                let Some(inner) = weak.upgrade() else {
                    break;
                };
                if inner.runner.client().is_err() {
                    debug!(strategy = %inner.runner.name(), "Client gone, timer exiting");
                    break;
                }

                // Spawned so a slow tick never delays the timer
                tokio::spawn(async move {
                    if let Err(e) = inner.runner.run_tick().await {
                        warn!(strategy = %inner.runner.name(), error = %e, "Tick failed");
                    }
                });
            }
        })
    }

    async fn set_phase_if(&self, from: SyncPhase, to: SyncPhase) {
        let mut control = self.inner.control.lock().await;
        if control.phase == from {
            control.phase = to;
        }
    }
}

#[async_trait]
impl SyncStrategy for PeriodicSyncStrategy {
    fn name(&self) -> &str {
        self.inner.runner.name()
    }

    fn attach(&self, client: &Arc<SyncClient>) -> SyncResult<()> {
        self.inner.runner.attach(client)
    }

    /// Waits for the client, runs setup and one tick, then arms the timer.
    ///
    /// No-op while already starting or running.
    async fn start(&self) -> SyncResult<()> {
        {
            let mut control = self.inner.control.lock().await;
            match control.phase {
                SyncPhase::Disposed => {
                    return Err(SyncError::StrategyDisposed(self.name().to_string()));
                }
                SyncPhase::Starting | SyncPhase::Running => return Ok(()),
                SyncPhase::Idle | SyncPhase::Stopped => control.phase = SyncPhase::Starting,
            }
        }

        let client = match self.inner.runner.client() {
            Ok(client) => client,
            Err(e) => {
                self.set_phase_if(SyncPhase::Starting, SyncPhase::Idle).await;
                return Err(e);
            }
        };

        let prepared = async {
            client.ready().await?;
            self.inner.runner.run_setup(Arc::clone(&client)).await
        }
        .await;
        drop(client);
        if let Err(e) = prepared {
            self.set_phase_if(SyncPhase::Starting, SyncPhase::Idle).await;
            return Err(e);
        }

        if let Err(e) = self.inner.runner.run_tick().await {
            warn!(strategy = %self.name(), error = %e, "Initial tick failed");
        }

        let mut control = self.inner.control.lock().await;
        if control.phase != SyncPhase::Starting {
            // stop() or dispose() ran during the initial tick
            return Ok(());
        }
        control.timer = Some(self.spawn_timer());
        control.phase = SyncPhase::Running;

        info!(
            strategy = %self.name(),
            period_ms = self.inner.period.as_millis() as u64,
            "Periodic sync running"
        );
        Ok(())
    }

    /// Cancels the timer. A tick already in progress finishes.
    async fn stop(&self) -> SyncResult<()> {
        let mut control = self.inner.control.lock().await;
        if let Some(timer) = control.timer.take() {
            timer.abort();
        }
        if matches!(control.phase, SyncPhase::Starting | SyncPhase::Running) {
            control.phase = SyncPhase::Stopped;
            info!(strategy = %self.name(), "Periodic sync stopped");
        }
        Ok(())
    }

    async fn dispose(&self) -> SyncResult<()> {
        self.stop().await?;
        let mut control = self.inner.control.lock().await;
        if control.phase != SyncPhase::Disposed {
            control.phase = SyncPhase::Disposed;
            debug!(strategy = %self.name(), "Periodic sync disposed");
        }
        Ok(())
    }

    /// Always `pending`: this strategy only pushes from its ticks.
    async fn on_push_to_remote(&self, _event: &RawEvent) -> SyncResult<SyncStatus> {
        Ok(SyncStatus::Pending)
    }
}
