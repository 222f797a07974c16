use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use url::Url;

pub const APP_NAME: &str = "offsync";
pub const CONFIG_FILE_NAME: &str = "config.toml";
pub const CACHE_DB_FILE_NAME: &str = "cache.db";
pub const STORAGE_DB_FILE_NAME: &str = "storage.db";
pub const BLOBS_DIR_NAME: &str = "blobs";
pub const LOGS_DIR_NAME: &str = "logs";

/// Which backend holds the mutation queue
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum QueueBackend {
    /// One JSON list in the key-value store
    #[default]
    Kv,
    /// Rows of the cache's sync_queue table
    Sql,
}

impl std::fmt::Display for QueueBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            QueueBackend::Kv => write!(f, "kv"),
            QueueBackend::Sql => write!(f, "sql"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AppConfig {
    /// Base URL queued mutations are delivered against
    pub api_url: Url,
    /// Probed to decide whether the backend is reachable
    #[serde(default)]
    pub health_url: Option<Url>,
    #[serde(default)]
    pub queue_backend: QueueBackend,
    #[serde(default = "default_delivery_timeout_secs")]
    pub delivery_timeout_secs: u64,
    #[serde(default = "default_poll_interval_secs")]
    pub poll_interval_secs: u64,
    /// Periodic drain while watching; 0 disables it
    #[serde(default = "default_sync_interval_secs")]
    pub sync_interval_secs: u64,
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

fn default_delivery_timeout_secs() -> u64 {
    30
}

fn default_poll_interval_secs() -> u64 {
    15
}

fn default_sync_interval_secs() -> u64 {
    300
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            api_url: Url::parse("http://localhost:3000/api/").expect("valid default url"),
            health_url: None,
            queue_backend: QueueBackend::default(),
            delivery_timeout_secs: default_delivery_timeout_secs(),
            poll_interval_secs: default_poll_interval_secs(),
            sync_interval_secs: default_sync_interval_secs(),
            log_level: default_log_level(),
        }
    }
}

impl AppConfig {
    pub fn delivery_timeout(&self) -> Duration {
        Duration::from_secs(self.delivery_timeout_secs)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs.max(1))
    }

    pub fn sync_interval(&self) -> Option<Duration> {
        (self.sync_interval_secs > 0).then(|| Duration::from_secs(self.sync_interval_secs))
    }
}

/// On-disk layout of a state directory plus its loaded config.
#[derive(Debug, Clone)]
pub struct AppState {
    pub state_dir: PathBuf,
    pub config_path: PathBuf,
    pub cache_path: PathBuf,
    pub storage_path: PathBuf,
    pub blobs_path: PathBuf,
    pub logs_path: PathBuf,
    pub config: AppConfig,
}

#[derive(Debug, thiserror::Error)]
pub enum StateError {
    #[error("could not determine home directory")]
    NoHomeDir,

    #[error("not initialized: {0} (run `offsync init`)")]
    NotInitialized(PathBuf),

    #[error("already initialized: {0}")]
    AlreadyInitialized(PathBuf),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid config: {0}")]
    ConfigParse(#[from] toml::de::Error),

    #[error("failed to write config: {0}")]
    ConfigWrite(#[from] toml::ser::Error),
}

impl AppState {
    /// Resolve the state directory, defaulting to `~/.offsync`.
    pub fn state_dir(custom: Option<PathBuf>) -> Result<PathBuf, StateError> {
        match custom {
            Some(path) => Ok(path),
            None => {
                let home = dirs::home_dir().ok_or(StateError::NoHomeDir)?;
                Ok(home.join(format!(".{}", APP_NAME)))
            }
        }
    }

    fn layout(state_dir: PathBuf, config: AppConfig) -> Self {
        Self {
            config_path: state_dir.join(CONFIG_FILE_NAME),
            cache_path: state_dir.join(CACHE_DB_FILE_NAME),
            storage_path: state_dir.join(STORAGE_DB_FILE_NAME),
            blobs_path: state_dir.join(BLOBS_DIR_NAME),
            logs_path: state_dir.join(LOGS_DIR_NAME),
            state_dir,
            config,
        }
    }

    /// Create the state directory and write its config.
    pub fn init(custom: Option<PathBuf>, config: Option<AppConfig>) -> Result<Self, StateError> {
        let state_dir = Self::state_dir(custom)?;
        let state = Self::layout(state_dir, config.unwrap_or_default());

        if state.config_path.exists() {
            return Err(StateError::AlreadyInitialized(state.state_dir));
        }

        std::fs::create_dir_all(&state.state_dir)?;
        std::fs::create_dir_all(&state.blobs_path)?;
        std::fs::create_dir_all(&state.logs_path)?;
        state.save_config()?;

        tracing::info!(dir = %state.state_dir.display(), "state directory initialized");
        Ok(state)
    }

    /// Load an existing state directory.
    pub fn load(custom: Option<PathBuf>) -> Result<Self, StateError> {
        let state_dir = Self::state_dir(custom)?;
        let config_path = state_dir.join(CONFIG_FILE_NAME);
        if !config_path.exists() {
            return Err(StateError::NotInitialized(state_dir));
        }

        let config = read_config(&config_path)?;
        Ok(Self::layout(state_dir, config))
    }

    pub fn save_config(&self) -> Result<(), StateError> {
        let raw = toml::to_string_pretty(&self.config)?;
        std::fs::write(&self.config_path, raw)?;
        Ok(())
    }
}

fn read_config(path: &Path) -> Result<AppConfig, StateError> {
    let raw = std::fs::read_to_string(path)?;
    Ok(toml::from_str(&raw)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_init_then_load() {
        let temp = TempDir::new().unwrap();
        let dir = temp.path().join("state");

        let config = AppConfig {
            api_url: Url::parse("https://api.example.com/v2/").unwrap(),
            queue_backend: QueueBackend::Sql,
            ..Default::default()
        };
        let state = AppState::init(Some(dir.clone()), Some(config.clone())).unwrap();
        assert!(state.blobs_path.is_dir());
        assert!(state.config_path.is_file());

        let loaded = AppState::load(Some(dir)).unwrap();
        assert_eq!(loaded.config, config);
        assert_eq!(loaded.cache_path, state.cache_path);
    }

    #[test]
    fn test_init_twice_fails() {
        let temp = TempDir::new().unwrap();
        AppState::init(Some(temp.path().to_path_buf()), None).unwrap();
        assert!(matches!(
            AppState::init(Some(temp.path().to_path_buf()), None),
            Err(StateError::AlreadyInitialized(_))
        ));
    }

    #[test]
    fn test_load_uninitialized() {
        let temp = TempDir::new().unwrap();
        assert!(matches!(
            AppState::load(Some(temp.path().to_path_buf())),
            Err(StateError::NotInitialized(_))
        ));
    }

    #[test]
    fn test_minimal_config_uses_defaults() {
        let config: AppConfig = toml::from_str(r#"api_url = "http://10.0.0.2:8000/""#).unwrap();
        assert_eq!(config.queue_backend, QueueBackend::Kv);
        assert_eq!(config.delivery_timeout(), Duration::from_secs(30));
        assert_eq!(config.sync_interval(), Some(Duration::from_secs(300)));
        assert!(config.health_url.is_none());
    }
}
