use tokio::sync::broadcast;
use tracing::{info, warn};

/// Navigation requested by the core. The UI shell performs it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Navigation {
    /// Go to the sign-in route. `hard_reload` means a full reload that discards
    /// every in-memory cache, not a client-side route change.
    SignIn { route: String, hard_reload: bool },
}

pub trait Navigator: Send + Sync {
    fn navigate(&self, target: Navigation);
}

/// Publishes navigation requests to any number of UI listeners.
pub struct BroadcastNavigator {
    tx: broadcast::Sender<Navigation>,
}

impl BroadcastNavigator {
    pub fn new() -> Self {
        let (tx, _rx) = broadcast::channel(16);
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Navigation> {
        self.tx.subscribe()
    }
}

impl Default for BroadcastNavigator {
    fn default() -> Self {
        Self::new()
    }
}

impl Navigator for BroadcastNavigator {
    fn navigate(&self, target: Navigation) {
        info!("[NAV] {:?}", target);
        if self.tx.send(target).is_err() {
            warn!("[NAV] No UI listener for navigation request");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_broadcast_reaches_listener() {
        let navigator = BroadcastNavigator::new();
        let mut rx = navigator.subscribe();
        navigator.navigate(Navigation::SignIn {
            route: "/signin".into(),
            hard_reload: true,
        });
        assert_eq!(
            rx.recv().await.unwrap(),
            Navigation::SignIn {
                route: "/signin".into(),
                hard_reload: true
            }
        );
    }

    #[test]
    fn test_navigate_without_listener_does_not_panic() {
        BroadcastNavigator::new().navigate(Navigation::SignIn {
            route: "/signin".into(),
            hard_reload: false,
        });
    }
}
