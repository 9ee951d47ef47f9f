use std::path::PathBuf;
use std::time::Duration;

pub const DEFAULT_API_URL: &str = "http://localhost:8000";
pub const DEFAULT_AUTH_STORAGE: &str = "auth-storage.json";
pub const DEFAULT_PAGE_SIZE: usize = 10;
pub const DEFAULT_POLL_SECS: u64 = 30;
pub const DEFAULT_QR_TTL_MINUTES: i64 = 10;

/// Resolved runtime settings. Built by the CLI from flags and environment.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub api_url: String,
    pub auth_storage: PathBuf,
    pub timeout: Duration,
    pub page_size: usize,
    pub poll_interval: Duration,
    pub qr_secret: Option<String>,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            api_url: DEFAULT_API_URL.to_string(),
            auth_storage: PathBuf::from(DEFAULT_AUTH_STORAGE),
            timeout: Duration::from_secs(30),
            page_size: DEFAULT_PAGE_SIZE,
            poll_interval: Duration::from_secs(DEFAULT_POLL_SECS),
            qr_secret: None,
        }
    }
}

impl AppConfig {
    pub fn with_api_url(mut self, url: impl Into<String>) -> Self {
        self.api_url = url.into();
        self
    }

    pub fn with_timeout_secs(mut self, secs: u64) -> Self {
        // A zero timeout would fail every request immediately.
        self.timeout = Duration::from_secs(secs.max(1));
        self
    }
}
