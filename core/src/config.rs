use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

pub const DEFAULT_BASE_URL: &str = "/api";
pub const DEFAULT_TIMEOUT_MS: u64 = 10_000;
pub const DEFAULT_TOKEN_KEY: &str = "token";
pub const DEFAULT_LOGIN_PATH: &str = "/login";

/// Base configuration owned by one `ApiClient`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    pub base_url: String,
    pub timeout_ms: u64,
    /// Storage key holding the bearer token.
    pub token_key: String,
    /// Route the session handler redirects to on 401.
    pub login_path: String,
    pub download_dir: PathBuf,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            timeout_ms: DEFAULT_TIMEOUT_MS,
            token_key: DEFAULT_TOKEN_KEY.to_string(),
            login_path: DEFAULT_LOGIN_PATH.to_string(),
            download_dir: default_download_dir(),
        }
    }
}

impl ClientConfig {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            ..Self::default()
        }
    }

    /// Defaults overridden by `API_BASE_URL`, `API_TIMEOUT_MS`,
    /// `API_LOGIN_PATH` and `API_DOWNLOAD_DIR`.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Self::default();

        if let Some(base_url) = lookup("API_BASE_URL").filter(|v| !v.trim().is_empty()) {
            config.base_url = base_url.trim().to_string();
        }
        if let Some(timeout) = lookup("API_TIMEOUT_MS") {
            match timeout.trim().parse::<u64>() {
                Ok(ms) if ms > 0 => config.timeout_ms = ms,
                _ => tracing::warn!(value = %timeout, "ignoring invalid API_TIMEOUT_MS"),
            }
        }
        if let Some(login_path) = lookup("API_LOGIN_PATH").filter(|v| !v.trim().is_empty()) {
            config.login_path = login_path.trim().to_string();
        }
        if let Some(dir) = lookup("API_DOWNLOAD_DIR").filter(|v| !v.trim().is_empty()) {
            config.download_dir = PathBuf::from(dir.trim());
        }
        config
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout_ms = timeout.as_millis() as u64;
        self
    }

    pub fn with_download_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.download_dir = dir.into();
        self
    }
}

fn default_download_dir() -> PathBuf {
    dirs::download_dir().unwrap_or_else(|| PathBuf::from("."))
}
