use scopeguard::guard;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::client::ApiClient;
use crate::error::StorageError;
use crate::models::SyncStatus;
use crate::queue::MutationQueue;
use crate::storage::SecureStore;

#[derive(Debug, Error)]
pub enum SyncError {
    #[error("queue storage: {0}")]
    Storage(#[from] StorageError),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DrainOutcome {
    /// Another drain was already running; this trigger did nothing.
    Skipped,
    /// The queue is empty.
    Completed { replayed: usize },
    /// The head failed and is still the head; nothing behind it was attempted.
    Halted {
        replayed: usize,
        remaining: usize,
        reason: String,
    },
}

impl DrainOutcome {
    pub fn replayed(&self) -> usize {
        match self {
            DrainOutcome::Skipped => 0,
            DrainOutcome::Completed { replayed } | DrainOutcome::Halted { replayed, .. } => {
                *replayed
            }
        }
    }
}

/// Replays the offline queue through the request client.
/// Single-flight: at most one drain runs at a time, extra triggers are skipped.
#[derive(Clone)]
pub struct ReplayCoordinator {
    client: Arc<ApiClient>,
    queue: Arc<MutationQueue>,
    store: SecureStore,
    last_drain_key: String,
    is_draining: Arc<AtomicBool>,
}

impl ReplayCoordinator {
    pub fn new(
        client: Arc<ApiClient>,
        queue: Arc<MutationQueue>,
        store: SecureStore,
        last_drain_key: impl Into<String>,
    ) -> Self {
        Self {
            client,
            queue,
            store,
            last_drain_key: last_drain_key.into(),
            is_draining: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn is_draining(&self) -> bool {
        self.is_draining.load(Ordering::Acquire)
    }

    /// Replay queued requests front to back until the queue is empty or one fails.
    /// `is_draining` is reset by a scopeguard, even if the drain future is dropped.
    pub async fn drain(&self) -> Result<DrainOutcome, SyncError> {
        if self
            .is_draining
            .compare_exchange(false, true, Ordering::Acquire, Ordering::Relaxed)
            .is_err()
        {
            debug!("[SYNC] Another drain already in progress, skipping");
            return Ok(DrainOutcome::Skipped);
        }

        let _guard = guard((), |_| {
            self.is_draining.store(false, Ordering::Release);
        });

        self.run_drain().await
    }

    async fn run_drain(&self) -> Result<DrainOutcome, SyncError> {
        let pending = self.queue.len()?;
        if pending == 0 {
            debug!("[SYNC] Queue empty, nothing to drain");
            return Ok(DrainOutcome::Completed { replayed: 0 });
        }
        info!("[SYNC] Draining {} queued requests", pending);

        let mut replayed = 0;
        while let Some(next) = self.queue.front()? {
            match self.client.replay(&next).await {
                Ok(response) => {
                    debug!(
                        "[SYNC] Replayed {} {} -> {}",
                        next.method, next.url, response.status
                    );
                    self.queue.remove_front(&next)?;
                    replayed += 1;
                }
                Err(e) => {
                    let remaining = self.queue.len()?;
                    warn!(
                        "[SYNC] Replay of {} {} failed ({}), stopping with {} still queued",
                        next.method, next.url, e, remaining
                    );
                    self.record_drain(replayed);
                    return Ok(DrainOutcome::Halted {
                        replayed,
                        remaining,
                        reason: e.to_string(),
                    });
                }
            }
        }

        info!("[SYNC] Drain completed: {} replayed", replayed);
        self.record_drain(replayed);
        Ok(DrainOutcome::Completed { replayed })
    }

    fn record_drain(&self, replayed: usize) {
        if replayed == 0 {
            return;
        }
        if let Err(e) = self.store.set(
            &self.last_drain_key,
            &chrono::Utc::now().timestamp().to_string(),
        ) {
            warn!("[SYNC] Failed to update last_drain_at: {}", e);
        }
    }

    pub fn status(&self) -> Result<SyncStatus, SyncError> {
        let last_drain_at = match self.store.get(&self.last_drain_key) {
            Ok(value) => value.and_then(|v| v.parse::<i64>().ok()),
            Err(e) => {
                warn!("[SYNC] Failed to read last_drain_at: {}", e);
                None
            }
        };
        Ok(SyncStatus {
            pending_count: self.queue.len()?,
            is_online: self.client.network().is_online(),
            last_drain_at,
        })
    }

    /// Drain once per observed offline -> online transition.
    pub fn spawn_online_listener(&self) -> JoinHandle<()> {
        let coordinator = self.clone();
        let mut rx = self.client.network().subscribe();
        tokio::spawn(async move {
            let mut was_online = *rx.borrow_and_update();
            while rx.changed().await.is_ok() {
                let online = *rx.borrow_and_update();
                if online && !was_online {
                    info!("[SYNC] Connectivity restored, draining queue");
                    coordinator.log_drain(coordinator.drain().await);
                }
                was_online = online;
            }
            debug!("[SYNC] Connectivity signal closed, listener exiting");
        })
    }

    /// Optional hardening: also drain on a timer while online.
    pub fn spawn_periodic_drain(&self, interval: Duration) -> JoinHandle<()> {
        let coordinator = self.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            // first tick fires immediately; startup drain is a separate option
            ticker.tick().await;
            loop {
                ticker.tick().await;
                if !coordinator.client.network().is_online() {
                    debug!("[SYNC] Periodic drain skipped (offline)");
                    continue;
                }
                coordinator.log_drain(coordinator.drain().await);
            }
        })
    }

    fn log_drain(&self, result: Result<DrainOutcome, SyncError>) {
        match result {
            Ok(DrainOutcome::Skipped) => debug!("[SYNC] Drain skipped (already running)"),
            Ok(DrainOutcome::Completed { replayed }) if replayed > 0 => {
                info!("[SYNC] Background drain: replayed {} requests", replayed)
            }
            Ok(DrainOutcome::Completed { .. }) => debug!("[SYNC] Background drain: queue empty"),
            Ok(DrainOutcome::Halted {
                replayed,
                remaining,
                reason,
            }) => warn!(
                "[SYNC] Background drain halted after {} ({} left): {}",
                replayed, remaining, reason
            ),
            Err(e) => error!("[SYNC] Background drain error: {}", e),
        }
    }
}
