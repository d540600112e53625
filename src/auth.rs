use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::client::ApiClient;
use crate::config::ClientConfig;
use crate::error::ApiError;
use crate::models::{ApiRequest, Credentials, LoginResponse, User};
use crate::navigation::{Navigation, Navigator};
use crate::queue::MutationQueue;
use crate::session::{Session, SessionState};
use crate::storage::SecureStore;

#[derive(Debug, Error)]
pub enum AuthError {
    #[error("login failed: {0}")]
    Login(#[source] ApiError),
    #[error("unexpected login response: {0}")]
    MalformedLogin(String),
    #[error("could not load profile: {0}")]
    Profile(#[source] ApiError),
    #[error("invalid credentials payload: {0}")]
    Payload(#[from] serde_json::Error),
}

/// Session lifecycle: startup restore, login and logout.
pub struct AuthService {
    client: Arc<ApiClient>,
    session: Arc<SessionState>,
    queue: Arc<MutationQueue>,
    store: SecureStore,
    navigator: Arc<dyn Navigator>,
    config: Arc<ClientConfig>,
}

impl AuthService {
    pub fn new(
        client: Arc<ApiClient>,
        session: Arc<SessionState>,
        queue: Arc<MutationQueue>,
        store: SecureStore,
        navigator: Arc<dyn Navigator>,
        config: Arc<ClientConfig>,
    ) -> Self {
        Self {
            client,
            session,
            queue,
            store,
            navigator,
            config,
        }
    }

    /// Restore the persisted session.
    ///
    /// With a stored token the session stays `loading` until the profile call
    /// settles. A 401 there goes through the client's refresh path; any other
    /// failure drops the token. `loading` is false when this returns.
    pub async fn init(&self) -> Session {
        if !self.begin_restore() {
            return self.session.snapshot();
        }
        self.complete_restore().await
    }

    /// Synchronous half of `init`: load the persisted token and enter `loading`.
    /// Returns whether a profile check is pending.
    pub fn begin_restore(&self) -> bool {
        let restored = self.session.restore().is_some();
        if !restored {
            debug!("[AUTH] No persisted token, starting signed out");
        }
        restored
    }

    /// Asynchronous half of `init`: resolve the restored token into a user.
    pub async fn complete_restore(&self) -> Session {
        info!("[AUTH] Persisted token found, loading profile");
        match self.client.fetch_profile().await {
            Ok(user) => {
                self.remember_user(&user);
                self.session.establish(user);
            }
            Err(ApiError::RefreshFailed(e)) => {
                // client already tore the session down and navigated
                warn!("[AUTH] Session could not be refreshed at startup: {}", e);
                self.session.finish_loading();
            }
            Err(e) if e.is_unauthorized() => {
                warn!("[AUTH] Profile still unauthorized after refresh, signing out");
                self.logout();
            }
            Err(e) => {
                warn!("[AUTH] Profile fetch failed at startup, clearing token: {}", e);
                self.session.terminate();
            }
        }
        self.session.snapshot()
    }

    pub async fn login(&self, credentials: &Credentials) -> Result<User, AuthError> {
        let body = serde_json::to_value(credentials)?;
        let response = self
            .client
            .execute(ApiRequest::post(self.config.login_path.clone(), body))
            .await
            .map_err(AuthError::Login)?;
        let login: LoginResponse = response
            .json()
            .map_err(|e| AuthError::MalformedLogin(e.to_string()))?;
        if login.token.is_empty() {
            return Err(AuthError::MalformedLogin("empty token".to_string()));
        }

        self.session.replace_token(login.token);
        let user = self
            .client
            .fetch_profile()
            .await
            .map_err(AuthError::Profile)?;

        self.remember_user(&user);
        self.session.establish(user.clone());
        info!("[AUTH] Login completed for user {}", user.id);
        Ok(user)
    }

    pub fn logout(&self) {
        info!("[AUTH] Logout requested");
        self.session.terminate();
        self.navigator.navigate(Navigation::SignIn {
            route: self.config.sign_in_route.clone(),
            hard_reload: true,
        });
    }

    /// Queued writes belong to the user who made them. When a different user
    /// signs in on this device, whatever is still queued is dropped.
    fn remember_user(&self, user: &User) {
        let previous = match self.store.get(&self.config.last_user_key) {
            Ok(previous) => previous,
            Err(e) => {
                warn!("[AUTH] Failed to read last user id: {}", e);
                None
            }
        };

        match previous {
            Some(previous) if previous == user.id => return,
            Some(previous) => {
                warn!(
                    "[AUTH] User changed ({} -> {}), dropping queued writes",
                    previous, user.id
                );
                if let Err(e) = self.queue.clear() {
                    warn!("[AUTH] Failed to clear queue on user switch: {}", e);
                }
            }
            None => {}
        }

        if let Err(e) = self.store.set(&self.config.last_user_key, &user.id) {
            warn!("[AUTH] Failed to store last user id: {}", e);
        }
    }
}
