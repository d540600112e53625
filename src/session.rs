use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::models::User;
use crate::storage::SecureStore;

/// What route guards and UI components see.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Session {
    pub user: Option<User>,
    pub token: Option<String>,
    /// True while a restored token is being checked against the backend
    pub loading: bool,
}

impl Session {
    pub fn is_authenticated(&self) -> bool {
        self.user.is_some() && self.token.is_some()
    }
}

/// Process-wide session container, built once at startup and injected where needed.
///
/// Every change is a single `send_modify`, so observers never see a token
/// cleared without the user (or the reverse). The token is mirrored to durable
/// storage.
pub struct SessionState {
    tx: watch::Sender<Session>,
    store: SecureStore,
    token_key: String,
}

impl SessionState {
    pub fn new(store: SecureStore, token_key: impl Into<String>) -> Self {
        let (tx, _rx) = watch::channel(Session::default());
        Self {
            tx,
            store,
            token_key: token_key.into(),
        }
    }

    /// Load the persisted token, if any, and enter the loading state.
    /// An unreadable token is treated as absent and removed.
    pub fn restore(&self) -> Option<String> {
        let token = match self.store.get(&self.token_key) {
            Ok(token) => token,
            Err(e) => {
                warn!("[SESSION] Persisted token unreadable, discarding: {}", e);
                if let Err(e) = self.store.remove(&self.token_key) {
                    warn!("[SESSION] Failed to remove unreadable token: {}", e);
                }
                None
            }
        };

        self.tx.send_modify(|s| {
            s.user = None;
            s.loading = token.is_some();
            s.token = token.clone();
        });
        if let Some(t) = &token {
            debug!("[SESSION] Restored token, length: {}", t.len());
        }
        token
    }

    pub fn snapshot(&self) -> Session {
        self.tx.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<Session> {
        self.tx.subscribe()
    }

    pub fn token(&self) -> Option<String> {
        self.tx.borrow().token.clone()
    }

    /// Store a new token (login or refresh). The user, if any, is kept.
    pub fn replace_token(&self, token: String) {
        debug!("[SESSION] Storing token, length: {}", token.len());
        if let Err(e) = self.store.set(&self.token_key, &token) {
            warn!(
                "[SESSION] Failed to persist token (session stays in memory only): {}",
                e
            );
        }
        self.tx.send_modify(|s| s.token = Some(token));
    }

    /// Attach the authenticated user and leave the loading state.
    /// Refused when no token is held, since a user without a token is not a session.
    pub fn establish(&self, user: User) -> bool {
        let mut accepted = false;
        self.tx.send_modify(|s| {
            if s.token.is_some() {
                info!("[SESSION] Signed in as user {}", user.id);
                s.user = Some(user);
                accepted = true;
            }
            s.loading = false;
        });
        if !accepted {
            warn!("[SESSION] Refusing to set user without a token");
        }
        accepted
    }

    pub fn finish_loading(&self) {
        self.tx.send_if_modified(|s| std::mem::replace(&mut s.loading, false));
    }

    /// Clear token and user in one step and forget the persisted token.
    pub fn terminate(&self) {
        self.tx.send_modify(|s| {
            s.token = None;
            s.user = None;
            s.loading = false;
        });
        if let Err(e) = self.store.remove(&self.token_key) {
            warn!("[SESSION] Failed to remove persisted token: {}", e);
        }
        info!("[SESSION] Session terminated");
    }
}
