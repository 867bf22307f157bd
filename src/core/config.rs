use crate::core::SyncError;
use dotenv::dotenv;
use std::env;
use std::time::Duration;
use tracing::info;

/// How the id of a locally authored message is chosen.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IdStrategy {
    /// The temporary id is globally unique and is reused as the real id.
    ClientAssigned,
    /// The store allocates the real id; the placeholder is replaced in place on confirm.
    StoreAssigned,
}

#[derive(Debug, Clone)]
pub struct Config {
    pub page_size: usize,
    pub typing_ttl: Duration,
    pub presence_timeout: Duration,
    pub read_timeout: Duration,
    pub write_timeout: Duration,
    pub id_strategy: IdStrategy,
    pub app_env: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            page_size: 20,
            typing_ttl: Duration::from_millis(2500),
            presence_timeout: Duration::from_millis(3000),
            read_timeout: Duration::from_millis(5000),
            write_timeout: Duration::from_millis(10_000),
            id_strategy: IdStrategy::ClientAssigned,
            app_env: "development".to_string(),
        }
    }
}

impl Config {
    /// Loads the configuration from environment variables.
    /// Calls dotenv() first, so a local `.env` file is honoured.
    pub fn from_env() -> Result<Self, SyncError> {
        dotenv().ok();
        let defaults = Self::default();

        let page_size = env::var("SYNC_PAGE_SIZE")
            .ok()
            .map(|v| v.parse::<usize>())
            .transpose()
            .map_err(|_| SyncError::config("Invalid SYNC_PAGE_SIZE: must be a positive number"))?
            .unwrap_or(defaults.page_size);

        if page_size == 0 {
            return Err(SyncError::config("Invalid SYNC_PAGE_SIZE: must be greater than zero"));
        }

        let typing_ttl = millis_var("TYPING_TTL_MS", defaults.typing_ttl, "Invalid TYPING_TTL_MS")?;
        let presence_timeout = millis_var(
            "PRESENCE_TIMEOUT_MS",
            defaults.presence_timeout,
            "Invalid PRESENCE_TIMEOUT_MS",
        )?;
        let read_timeout = millis_var("READ_TIMEOUT_MS", defaults.read_timeout, "Invalid READ_TIMEOUT_MS")?;
        let write_timeout =
            millis_var("WRITE_TIMEOUT_MS", defaults.write_timeout, "Invalid WRITE_TIMEOUT_MS")?;

        let id_strategy = match env::var("MESSAGE_ID_STRATEGY") {
            Err(_) => defaults.id_strategy,
            Ok(v) => match v.trim().to_ascii_lowercase().as_str() {
                "client" => IdStrategy::ClientAssigned,
                "store" => IdStrategy::StoreAssigned,
                _ => {
                    return Err(SyncError::config(
                        "Invalid MESSAGE_ID_STRATEGY: must be 'client' or 'store'",
                    )
                    .with_details(v));
                }
            },
        };

        let app_env = env::var("APP_ENV").unwrap_or(defaults.app_env);

        Ok(Config {
            page_size,
            typing_ttl,
            presence_timeout,
            read_timeout,
            write_timeout,
            id_strategy,
            app_env,
        })
    }

    /// Logs the effective configuration.
    pub fn log_summary(&self) {
        info!(
            app_env = %self.app_env,
            page_size = self.page_size,
            typing_ttl_ms = self.typing_ttl.as_millis() as u64,
            presence_timeout_ms = self.presence_timeout.as_millis() as u64,
            read_timeout_ms = self.read_timeout.as_millis() as u64,
            write_timeout_ms = self.write_timeout.as_millis() as u64,
            id_strategy = ?self.id_strategy,
            "Sync engine configuration"
        );
    }
}

fn millis_var(name: &str, default: Duration, message: &'static str) -> Result<Duration, SyncError> {
    match env::var(name) {
        Err(_) => Ok(default),
        Ok(raw) => raw
            .trim()
            .parse::<u64>()
            .map(Duration::from_millis)
            .map_err(|_| SyncError::config(message).with_details(raw)),
    }
}
