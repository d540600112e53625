use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::task::{AbortHandle, JoinHandle};
use tracing::{debug, info, warn};

pub mod auth;
pub mod client;
pub mod config;
pub mod crypto;
pub mod database;
pub mod error;
pub mod guard;
pub mod models;
pub mod navigation;
pub mod network;
pub mod queue;
pub mod session;
pub mod storage;
pub mod sync;
pub mod transport;

#[cfg(test)]
mod test_support;

pub use auth::{AuthError, AuthService};
pub use client::{ApiClient, SendOutcome};
pub use config::ClientConfig;
pub use database::Database;
pub use error::{storage_error_to_user_message, ApiError, RefreshError, StorageError, TransportError};
pub use guard::{GuardDecision, RouteGuard};
pub use models::{ApiRequest, ApiResponse, Credentials, PendingRequest, SyncStatus, User};
pub use navigation::{BroadcastNavigator, Navigation, Navigator};
pub use network::{probe_online_status, NetworkMonitor};
pub use session::{Session, SessionState};
pub use sync::{DrainOutcome, ReplayCoordinator, SyncError};
pub use transport::{HttpTransport, Transport};

use crate::crypto::PayloadEncryption;
use crate::queue::MutationQueue;
use crate::storage::SecureStore;

const DATABASE_FILE: &str = "bizdesk.db";

#[derive(Debug, Error)]
pub enum StartupError {
    #[error("storage unavailable: {0}")]
    Storage(#[from] StorageError),
}

/// Default `info` unless RUST_LOG says otherwise, so `[AUTH]`/`[SYNC]` lines show up.
/// Safe to call more than once.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .try_init();
}

/// Everything a UI shell needs, wired once at startup. Background tasks stop
/// when the context is dropped.
///
/// `start` returns as soon as storage is open. A restored session stays
/// `loading` until its profile check finishes in the background; `ready()`
/// waits for that (and for the startup drain, when enabled).
pub struct AppContext {
    pub config: Arc<ClientConfig>,
    pub database: Arc<Database>,
    pub session: Arc<SessionState>,
    pub queue: Arc<MutationQueue>,
    pub network: NetworkMonitor,
    pub client: Arc<ApiClient>,
    pub auth: Arc<AuthService>,
    pub coordinator: ReplayCoordinator,
    startup: tokio::sync::Mutex<Option<JoinHandle<()>>>,
    tasks: Vec<AbortHandle>,
}

impl AppContext {
    pub async fn start(
        config: ClientConfig,
        data_dir: &Path,
        navigator: Arc<dyn Navigator>,
    ) -> Result<Self, StartupError> {
        let config = config.normalized();
        let transport = Arc::new(HttpTransport::new(config.http_timeout_secs));
        Self::start_with_transport(config, data_dir, navigator, transport).await
    }

    pub async fn start_with_transport(
        config: ClientConfig,
        data_dir: &Path,
        navigator: Arc<dyn Navigator>,
        transport: Arc<dyn Transport>,
    ) -> Result<Self, StartupError> {
        let config = Arc::new(config.normalized());
        let database = Arc::new(Database::open_or_recover(data_dir, DATABASE_FILE)?);
        info!("[STARTUP] Storage opened at {}", database.path().display());

        let encryption = Arc::new(PayloadEncryption::from_env_or_file(data_dir)?);
        let store = SecureStore::new(database.clone(), encryption);

        let session = Arc::new(SessionState::new(store.clone(), config.token_key.clone()));
        let queue = Arc::new(MutationQueue::new(store.clone(), config.queue_key.clone()));
        let network = NetworkMonitor::new(initial_connectivity(&config).await);

        let client = Arc::new(ApiClient::new(
            config.clone(),
            transport,
            session.clone(),
            queue.clone(),
            network.clone(),
            navigator.clone(),
        ));
        let coordinator = ReplayCoordinator::new(
            client.clone(),
            queue.clone(),
            store.clone(),
            config.last_drain_key.clone(),
        );
        let auth = Arc::new(AuthService::new(
            client.clone(),
            session.clone(),
            queue.clone(),
            store,
            navigator,
            config.clone(),
        ));

        let mut tasks = vec![coordinator.spawn_online_listener().abort_handle()];
        if let Some(secs) = config.probe_interval_secs.filter(|_| !config.probe_urls.is_empty()) {
            tasks.push(
                network::spawn_connectivity_probe(
                    network.clone(),
                    config.probe_urls.clone(),
                    Duration::from_secs(secs),
                )
                .abort_handle(),
            );
        }
        if let Some(secs) = config.drain_interval_secs {
            info!("[SYNC] Periodic drain every {}s", secs);
            tasks.push(
                coordinator
                    .spawn_periodic_drain(Duration::from_secs(secs))
                    .abort_handle(),
            );
        }

        // loading is set before start returns, so guards wait instead of redirecting
        let pending_profile = auth.begin_restore();
        let startup = spawn_startup(
            auth.clone(),
            coordinator.clone(),
            network.clone(),
            pending_profile,
            config.drain_on_start,
        );
        tasks.push(startup.abort_handle());

        Ok(Self {
            config,
            database,
            session,
            queue,
            network,
            client,
            auth,
            coordinator,
            startup: tokio::sync::Mutex::new(Some(startup)),
            tasks,
        })
    }

    /// Wait for the startup profile check (and startup drain) to finish.
    pub async fn ready(&self) {
        let startup = self.startup.lock().await.take();
        if let Some(handle) = startup {
            if let Err(e) = handle.await {
                warn!("[STARTUP] Startup task did not complete: {}", e);
            }
        }
    }

    pub fn sync_status(&self) -> Result<SyncStatus, SyncError> {
        self.coordinator.status()
    }
}

impl Drop for AppContext {
    fn drop(&mut self) {
        for task in &self.tasks {
            task.abort();
        }
    }
}

fn spawn_startup(
    auth: Arc<AuthService>,
    coordinator: ReplayCoordinator,
    network: NetworkMonitor,
    pending_profile: bool,
    drain_on_start: bool,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        if pending_profile {
            let restored = auth.complete_restore().await;
            debug!(
                "[STARTUP] Session restored: authenticated={}",
                restored.is_authenticated()
            );
        }
        if drain_on_start && network.is_online() {
            match coordinator.drain().await {
                Ok(outcome) => info!("[SYNC] Startup drain: {:?}", outcome),
                Err(e) => warn!("[SYNC] Startup drain failed: {}", e),
            }
        }
    })
}

/// One probe before anything is sent. Without a probe loop the shell is
/// expected to report connectivity, so start online.
async fn initial_connectivity(config: &ClientConfig) -> bool {
    if config.probe_interval_secs.is_none() || config.probe_urls.is_empty() {
        return true;
    }
    let online = probe_online_status(&reqwest::Client::new(), &config.probe_urls).await;
    info!(
        "[NET] Initial connectivity: {}",
        if online { "online" } else { "offline" }
    );
    online
}
