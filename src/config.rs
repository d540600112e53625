use tracing::warn;

/// Client configuration (api base url, endpoints, timeouts, drain policy)
#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub api_base_url: String,
    pub http_timeout_secs: u64,
    /// App version sent in X-App-Version header for debugging version skew
    pub app_version: String,
    pub login_path: String,
    pub refresh_path: String,
    pub profile_path: String,
    /// Route the UI shell shows when the session is gone
    pub sign_in_route: String,
    pub probe_urls: Vec<String>,
    /// None disables the connectivity probe loop (the shell drives `set_online` itself)
    pub probe_interval_secs: Option<u64>,
    /// Periodic drain in addition to online transitions. Off by default.
    pub drain_interval_secs: Option<u64>,
    pub drain_on_start: bool,
    pub token_key: String,
    pub queue_key: String,
    pub last_user_key: String,
    pub last_drain_key: String,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            api_base_url: "http://localhost:8080/api".to_string(),
            http_timeout_secs: 30,
            app_version: env!("CARGO_PKG_VERSION").to_string(),
            login_path: "/login".to_string(),
            refresh_path: "/refresh".to_string(),
            profile_path: "/me".to_string(),
            sign_in_route: "/signin".to_string(),
            probe_urls: vec![
                "https://www.cloudflare.com/cdn-cgi/trace".to_string(),
                "https://www.google.com/generate_204".to_string(),
            ],
            probe_interval_secs: Some(15),
            drain_interval_secs: None,
            drain_on_start: false,
            token_key: "token".to_string(),
            queue_key: "offline_queue".to_string(),
            last_user_key: "last_user_id".to_string(),
            last_drain_key: "last_drain_at".to_string(),
        }
    }
}

impl ClientConfig {
    /// Defaults overlaid with BIZDESK_* environment variables.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub(crate) fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();
        if let Some(url) = lookup("BIZDESK_API_URL") {
            config.api_base_url = url.trim_end_matches('/').to_string();
        }
        if let Some(secs) = parse_u64(&lookup, "BIZDESK_HTTP_TIMEOUT_SECS") {
            config.http_timeout_secs = secs;
        }
        if let Some(raw) = lookup("BIZDESK_PROBE_INTERVAL_SECS") {
            // 0 switches the probe off
            config.probe_interval_secs = match raw.trim().parse::<u64>() {
                Ok(0) => None,
                Ok(secs) => Some(secs),
                Err(e) => {
                    warn!("[CONFIG] Ignoring BIZDESK_PROBE_INTERVAL_SECS={:?}: {}", raw, e);
                    config.probe_interval_secs
                }
            };
        }
        if let Some(secs) = parse_u64(&lookup, "BIZDESK_DRAIN_INTERVAL_SECS") {
            config.drain_interval_secs = (secs > 0).then_some(secs);
        }
        if let Some(raw) = lookup("BIZDESK_DRAIN_ON_START") {
            config.drain_on_start = matches!(raw.trim(), "1" | "true" | "yes");
        }
        config
    }

    /// Zero intervals mean "off"; `tokio::time::interval` rejects them.
    pub fn normalized(mut self) -> Self {
        if self.probe_interval_secs == Some(0) {
            warn!("[CONFIG] probe_interval_secs = 0, connectivity probe disabled");
            self.probe_interval_secs = None;
        }
        if self.drain_interval_secs == Some(0) {
            warn!("[CONFIG] drain_interval_secs = 0, periodic drain disabled");
            self.drain_interval_secs = None;
        }
        if self.http_timeout_secs == 0 {
            warn!("[CONFIG] http_timeout_secs = 0, using default");
            self.http_timeout_secs = Self::default().http_timeout_secs;
        }
        self
    }

    /// Resolve a request url: absolute urls pass through, paths are joined to the base.
    pub fn resolve_url(&self, url: &str) -> String {
        if url.starts_with("http://") || url.starts_with("https://") {
            return url.to_string();
        }
        let base = self.api_base_url.trim_end_matches('/');
        if url.starts_with('/') {
            format!("{}{}", base, url)
        } else {
            format!("{}/{}", base, url)
        }
    }

    /// Path of a request relative to the API base, without query string.
    pub fn endpoint_path<'a>(&self, url: &'a str) -> &'a str {
        let base = self.api_base_url.trim_end_matches('/');
        let path = url.strip_prefix(base).unwrap_or(url);
        path.split('?').next().unwrap_or(path)
    }

    /// Login and refresh calls never trigger a refresh and are never queued.
    pub fn is_auth_endpoint(&self, url: &str) -> bool {
        let path = self.endpoint_path(url);
        path == self.login_path || path == self.refresh_path
    }
}

fn parse_u64<F>(lookup: &F, key: &str) -> Option<u64>
where
    F: Fn(&str) -> Option<String>,
{
    let raw = lookup(key)?;
    match raw.trim().parse::<u64>() {
        Ok(v) => Some(v),
        Err(e) => {
            warn!("[CONFIG] Ignoring {}={:?}: {}", key, raw, e);
            None
        }
    }
}
