//! Authenticated request client.
//!
//! Every backend call passes through [`ApiClient`]: bearer token attachment,
//! offline detection with queueing of mutations, and refresh-then-replay on 401.
//! Concurrent 401s share one refresh: callers serialize on `refresh_lock` and
//! whoever gets it second finds the token already rotated and replays with it.

use std::sync::Arc;
use tracing::{debug, error, info, warn};

use crate::config::ClientConfig;
use crate::error::{ApiError, RefreshError, TransportError};
use crate::models::{ApiRequest, ApiResponse, PendingRequest, RefreshResponse, User};
use crate::navigation::{Navigation, Navigator};
use crate::network::NetworkMonitor;
use crate::queue::MutationQueue;
use crate::session::SessionState;
use crate::transport::Transport;

/// How a `send` ended when it did not fail.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SendOutcome {
    /// The server answered with a success status.
    Completed(ApiResponse),
    /// Offline: nothing was sent, the mutation waits in the queue.
    Queued,
    /// The network failed mid-flight: accepted for later delivery, no data yet.
    Deferred,
}

impl SendOutcome {
    /// `None` means "accepted for later delivery", never "succeeded with no data".
    pub fn payload(&self) -> Option<&ApiResponse> {
        match self {
            SendOutcome::Completed(response) => Some(response),
            SendOutcome::Queued | SendOutcome::Deferred => None,
        }
    }

    pub fn is_pending_delivery(&self) -> bool {
        !matches!(self, SendOutcome::Completed(_))
    }
}

/// Where a request is in its refresh cycle. A request gets at most one refresh.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Attempt {
    Initial,
    AfterRefresh,
}

impl Attempt {
    fn may_refresh(self) -> bool {
        self == Attempt::Initial
    }
}

pub struct ApiClient {
    config: Arc<ClientConfig>,
    transport: Arc<dyn Transport>,
    session: Arc<SessionState>,
    queue: Arc<MutationQueue>,
    network: NetworkMonitor,
    navigator: Arc<dyn Navigator>,
    refresh_lock: tokio::sync::Mutex<()>,
}

impl ApiClient {
    pub fn new(
        config: Arc<ClientConfig>,
        transport: Arc<dyn Transport>,
        session: Arc<SessionState>,
        queue: Arc<MutationQueue>,
        network: NetworkMonitor,
        navigator: Arc<dyn Navigator>,
    ) -> Self {
        Self {
            config,
            transport,
            session,
            queue,
            network,
            navigator,
            refresh_lock: tokio::sync::Mutex::new(()),
        }
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    pub fn session(&self) -> &Arc<SessionState> {
        &self.session
    }

    pub fn network(&self) -> &NetworkMonitor {
        &self.network
    }

    /// Everything but login/refresh: credentials are never persisted.
    fn is_queueable(&self, request: &ApiRequest) -> bool {
        !self.config.is_auth_endpoint(&request.url)
    }

    /// Entry point for UI code.
    ///
    /// Offline requests are queued without touching the network and resolve as
    /// `Queued`. Requests whose transport fails are queued and resolve as
    /// `Deferred`. Login and refresh calls are never queued and fail instead.
    pub async fn send(&self, request: ApiRequest) -> Result<SendOutcome, ApiError> {
        if !self.network.is_online() {
            if self.is_queueable(&request) {
                self.queue.enqueue(PendingRequest::from_request(&request))?;
                info!(
                    "[CLIENT] Offline, queued {} {}",
                    request.method, request.url
                );
                return Ok(SendOutcome::Queued);
            }
            debug!(
                "[CLIENT] Offline, refusing {} {}",
                request.method, request.url
            );
            return Err(ApiError::Offline);
        }

        match self.dispatch(&request).await {
            Ok(response) => Ok(SendOutcome::Completed(response)),
            Err(ApiError::Transport(e)) if e.is_retryable() && self.is_queueable(&request) => {
                warn!(
                    "[CLIENT] Transport failure for {} {} ({}), queued for replay",
                    request.method, request.url, e
                );
                self.queue.enqueue(PendingRequest::from_request(&request))?;
                Ok(SendOutcome::Deferred)
            }
            Err(e) => Err(e),
        }
    }

    /// Same auth pipeline as `send`, but never queues: offline and transport
    /// failures are returned as errors. Used for login, profile and replay.
    pub async fn execute(&self, request: ApiRequest) -> Result<ApiResponse, ApiError> {
        if !self.network.is_online() {
            return Err(ApiError::Offline);
        }
        self.dispatch(&request).await
    }

    /// Deliver a queued request.
    pub async fn replay(&self, pending: &PendingRequest) -> Result<ApiResponse, ApiError> {
        let request = pending.to_request().map_err(|e| {
            ApiError::Transport(TransportError::InvalidRequest(e))
        })?;
        self.execute(request).await
    }

    pub async fn fetch_profile(&self) -> Result<User, ApiError> {
        let response = self
            .execute(ApiRequest::get(self.config.profile_path.clone()))
            .await?;
        response
            .json::<User>()
            .map_err(|e| ApiError::Decode(format!("profile: {}", e)))
    }

    fn prepare(&self, request: &ApiRequest, token: Option<&str>) -> ApiRequest {
        let mut outbound = request.clone();
        outbound.url = self.config.resolve_url(&request.url);
        outbound.set_header("Accept", "application/json");
        outbound.set_header("X-App-Version", self.config.app_version.clone());
        if outbound.body.is_some() && outbound.header("Content-Type").is_none() {
            outbound.set_header("Content-Type", "application/json");
        }
        match token {
            Some(token) => outbound.set_header("Authorization", format!("Bearer {}", token)),
            None => debug!(
                "[CLIENT] No session token, sending {} {} unauthenticated",
                request.method, request.url
            ),
        }
        outbound
    }

    /// Send, and on a 401 from a non-auth endpoint refresh once and replay.
    async fn dispatch(&self, request: &ApiRequest) -> Result<ApiResponse, ApiError> {
        let auth_call = self.config.is_auth_endpoint(&request.url);
        let mut attempt = Attempt::Initial;
        let mut token = self.session.token();

        loop {
            let outbound = self.prepare(request, token.as_deref());
            let response = self.transport.execute(&outbound).await?;

            if response.status == 401 && !auth_call && attempt.may_refresh() {
                info!(
                    "[CLIENT] {} {} returned 401, refreshing session",
                    request.method, request.url
                );
                let fresh = self.refresh_after_unauthorized(token).await?;
                token = Some(fresh);
                attempt = Attempt::AfterRefresh;
                continue;
            }

            if response.is_success() {
                return Ok(response);
            }

            debug!(
                "[CLIENT] {} {} failed with HTTP {}",
                request.method, request.url, response.status
            );
            return Err(ApiError::Http {
                status: response.status,
                body: response.body,
            });
        }
    }

    /// Obtain a token newer than `stale`, refreshing at most once for all
    /// callers that saw a 401 under the same token.
    async fn refresh_after_unauthorized(&self, stale: Option<String>) -> Result<String, ApiError> {
        let _permit = self.refresh_lock.lock().await;

        let current = self.session.token();
        match (&stale, current) {
            (_, Some(current)) if stale.as_ref() != Some(&current) => {
                debug!("[CLIENT] Token already refreshed by a concurrent request, replaying");
                Ok(current)
            }
            (Some(_), None) => {
                // an earlier refresh in this wave failed and ended the session
                Err(ApiError::RefreshFailed(RefreshError::SessionEnded))
            }
            (None, None) => {
                self.end_session("401 without a session token");
                Err(ApiError::RefreshFailed(RefreshError::NoToken))
            }
            (_, Some(current)) => match self.request_refresh(&current).await {
                Ok(fresh) => {
                    info!("[CLIENT] Session refreshed");
                    self.session.replace_token(fresh.clone());
                    Ok(fresh)
                }
                Err(e) => {
                    error!("[CLIENT] Token refresh failed: {}", e);
                    self.end_session("refresh failed");
                    Err(ApiError::RefreshFailed(e))
                }
            },
        }
    }

    /// POST to the refresh endpoint presenting the stale token.
    async fn request_refresh(&self, stale: &str) -> Result<String, RefreshError> {
        let request = ApiRequest::new(reqwest::Method::POST, self.config.refresh_path.clone());
        let outbound = self.prepare(&request, Some(stale));
        let response = self.transport.execute(&outbound).await?;

        if !response.is_success() {
            return Err(RefreshError::Rejected(response.status));
        }
        let parsed: RefreshResponse = response
            .json()
            .map_err(|e| RefreshError::Malformed(e.to_string()))?;
        if parsed.access_token.is_empty() {
            return Err(RefreshError::Malformed("empty access_token".to_string()));
        }
        Ok(parsed.access_token)
    }

    fn end_session(&self, reason: &str) {
        warn!("[CLIENT] Ending session: {}", reason);
        self.session.terminate();
        self.navigator.navigate(Navigation::SignIn {
            route: self.config.sign_in_route.clone(),
            hard_reload: true,
        });
    }
}
