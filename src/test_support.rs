//! Shared fixtures for unit and scenario tests.

use async_trait::async_trait;
use serde_json::Value;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::auth::AuthService;
use crate::client::ApiClient;
use crate::config::ClientConfig;
use crate::crypto::PayloadEncryption;
use crate::error::TransportError;
use crate::models::{ApiRequest, ApiResponse};
use crate::navigation::{Navigation, Navigator};
use crate::network::NetworkMonitor;
use crate::queue::MutationQueue;
use crate::session::SessionState;
use crate::storage::{KeyValueStore, MemoryStore, SecureStore};
use crate::sync::ReplayCoordinator;
use crate::transport::Transport;

pub(crate) const TEST_BASE_URL: &str = "http://api.test";

pub(crate) struct MockReply {
    pub delay: Option<Duration>,
    pub result: Result<ApiResponse, TransportError>,
}

impl MockReply {
    pub fn delayed(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }
}

type Handler = dyn Fn(&ApiRequest) -> MockReply + Send + Sync;

/// Scripted transport that records every outbound request.
pub(crate) struct MockTransport {
    handler: Box<Handler>,
    calls: Mutex<Vec<ApiRequest>>,
}

impl MockTransport {
    pub fn new<F>(handler: F) -> Arc<Self>
    where
        F: Fn(&ApiRequest) -> MockReply + Send + Sync + 'static,
    {
        Arc::new(Self {
            handler: Box::new(handler),
            calls: Mutex::new(Vec::new()),
        })
    }

    pub fn ok(body: Value) -> MockReply {
        Self::status(200, body)
    }

    pub fn status(status: u16, body: Value) -> MockReply {
        MockReply {
            delay: None,
            result: Ok(ApiResponse::new(status, body.to_string())),
        }
    }

    pub fn network_error() -> MockReply {
        MockReply {
            delay: None,
            result: Err(TransportError::Network("connection refused".to_string())),
        }
    }

    pub fn calls(&self) -> Vec<ApiRequest> {
        self.calls.lock().unwrap().clone()
    }

    /// Number of recorded requests whose path ends with `suffix`.
    pub fn calls_to(&self, suffix: &str) -> usize {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter(|c| c.url.split('?').next().unwrap_or(&c.url).ends_with(suffix))
            .count()
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn execute(&self, request: &ApiRequest) -> Result<ApiResponse, TransportError> {
        self.calls.lock().unwrap().push(request.clone());
        let reply = (self.handler)(request);
        if let Some(delay) = reply.delay {
            tokio::time::sleep(delay).await;
        }
        reply.result
    }
}

#[derive(Default)]
pub(crate) struct RecordingNavigator {
    events: Mutex<Vec<Navigation>>,
}

impl RecordingNavigator {
    pub fn events(&self) -> Vec<Navigation> {
        self.events.lock().unwrap().clone()
    }
}

impl Navigator for RecordingNavigator {
    fn navigate(&self, target: Navigation) {
        self.events.lock().unwrap().push(target);
    }
}

pub(crate) fn test_config() -> ClientConfig {
    ClientConfig {
        api_base_url: TEST_BASE_URL.to_string(),
        app_version: "test".to_string(),
        probe_urls: Vec::new(),
        probe_interval_secs: None,
        ..ClientConfig::default()
    }
}

pub(crate) fn secure_store(inner: Arc<dyn KeyValueStore>) -> SecureStore {
    SecureStore::new(inner, Arc::new(PayloadEncryption::from_key([42u8; 32])))
}

pub(crate) struct Harness {
    pub config: Arc<ClientConfig>,
    pub store: SecureStore,
    pub session: Arc<SessionState>,
    pub queue: Arc<MutationQueue>,
    pub network: NetworkMonitor,
    pub navigator: Arc<RecordingNavigator>,
    pub client: Arc<ApiClient>,
}

impl Harness {
    pub fn coordinator(&self) -> ReplayCoordinator {
        ReplayCoordinator::new(
            self.client.clone(),
            self.queue.clone(),
            self.store.clone(),
            self.config.last_drain_key.clone(),
        )
    }

    pub fn auth(&self) -> AuthService {
        AuthService::new(
            self.client.clone(),
            self.session.clone(),
            self.queue.clone(),
            self.store.clone(),
            self.navigator.clone(),
            self.config.clone(),
        )
    }
}

pub(crate) fn harness(transport: Arc<MockTransport>, online: bool) -> Harness {
    harness_with_store(transport, online, MemoryStore::new())
}

/// Same wiring over caller-provided storage, for restart scenarios.
pub(crate) fn harness_with_store(
    transport: Arc<MockTransport>,
    online: bool,
    inner: Arc<dyn KeyValueStore>,
) -> Harness {
    let config = Arc::new(test_config());
    let store = secure_store(inner);
    let session = Arc::new(SessionState::new(store.clone(), config.token_key.clone()));
    let queue = Arc::new(MutationQueue::new(store.clone(), config.queue_key.clone()));
    let network = NetworkMonitor::new(online);
    let navigator = Arc::new(RecordingNavigator::default());
    let client = Arc::new(ApiClient::new(
        config.clone(),
        transport,
        session.clone(),
        queue.clone(),
        network.clone(),
        navigator.clone(),
    ));
    Harness {
        config,
        store,
        session,
        queue,
        network,
        navigator,
        client,
    }
}
