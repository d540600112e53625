use reqwest::Client;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info};

/// Process-wide connectivity flag. Receivers from `subscribe()` observe every
/// change; a `false -> true` change is the "connectivity restored" signal.
#[derive(Clone)]
pub struct NetworkMonitor {
    tx: Arc<watch::Sender<bool>>,
}

impl NetworkMonitor {
    pub fn new(initially_online: bool) -> Self {
        let (tx, _rx) = watch::channel(initially_online);
        Self { tx: Arc::new(tx) }
    }

    pub fn is_online(&self) -> bool {
        *self.tx.borrow()
    }

    /// Returns true when this call moved the state from offline to online.
    pub fn set_online(&self, online: bool) -> bool {
        let previous = self.tx.send_replace(online);
        if previous != online {
            info!(
                "[NET] Connectivity changed: {}",
                if online { "online" } else { "offline" }
            );
        }
        !previous && online
    }

    pub fn subscribe(&self) -> watch::Receiver<bool> {
        self.tx.subscribe()
    }
}

/// Lightweight HTTP probe: the first probe url that answers with 2xx means online.
pub async fn probe_online_status(client: &Client, probe_urls: &[String]) -> bool {
    for url in probe_urls {
        match client
            .get(url)
            .timeout(Duration::from_secs(2))
            .send()
            .await
        {
            Ok(response) if response.status().is_success() => return true,
            Ok(response) => {
                debug!("[NET] Probe {} answered {}", url, response.status());
            }
            Err(e) => {
                debug!("[NET] Probe {} failed: {}", url, e);
            }
        }
    }
    false
}

/// Poll the probe urls every `interval` and feed the result into `monitor`.
pub fn spawn_connectivity_probe(
    monitor: NetworkMonitor,
    probe_urls: Vec<String>,
    interval: Duration,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let client = match Client::builder().timeout(Duration::from_secs(2)).build() {
            Ok(client) => client,
            Err(_) => Client::new(),
        };
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        loop {
            ticker.tick().await;
            let online = probe_online_status(&client, &probe_urls).await;
            monitor.set_online(online);
        }
    })
}
