use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub const APP_DIR_NAME: &str = "tabhop";
pub const HOME_ENV: &str = "TABHOP_HOME";
const CONFIG_FILE_NAME: &str = "config.toml";
const STORE_FILE_NAME: &str = "state.sqlite3";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("failed to write {path}: {source}")]
    Write {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("failed to parse {path}: {message}")]
    Parse { path: PathBuf, message: String },
    #[error("failed to serialize config: {0}")]
    Serialize(String),
    #[error("invalid config: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Location this config was loaded from; never written to the file.
    #[serde(skip)]
    pub config_path: PathBuf,
    pub store_path: PathBuf,
    pub log_level: String,
    pub history_max_results: usize,
    pub cache_long_window_ms: u64,
    pub cache_short_window_ms: u64,
    pub favicon_image_timeout_ms: u64,
    pub favicon_html_timeout_ms: u64,
    pub favicon_max_bytes: usize,
    pub favicon_service_url: String,
    pub bridge_max_retries: u32,
    pub bridge_retry_delay_ms: u64,
}

impl Default for Config {
    fn default() -> Self {
        let base = stable_app_data_dir();
        Self {
            config_path: base.join(CONFIG_FILE_NAME),
            store_path: base.join(STORE_FILE_NAME),
            log_level: "info".to_string(),
            history_max_results: 1000,
            cache_long_window_ms: 30_000,
            cache_short_window_ms: 5_000,
            favicon_image_timeout_ms: 10_000,
            favicon_html_timeout_ms: 5_000,
            favicon_max_bytes: 1024 * 1024,
            favicon_service_url: "https://www.google.com/s2/favicons?domain={domain}&sz=64"
                .to_string(),
            bridge_max_retries: 3,
            bridge_retry_delay_ms: 1_000,
        }
    }
}

/// `$TABHOP_HOME` when set, otherwise `<local data dir>/tabhop`.
pub fn stable_app_data_dir() -> PathBuf {
    if let Some(home) = std::env::var_os(HOME_ENV).filter(|v| !v.is_empty()) {
        return PathBuf::from(home);
    }
    dirs::data_local_dir()
        .unwrap_or_else(std::env::temp_dir)
        .join(APP_DIR_NAME)
}

pub fn default_config_path() -> PathBuf {
    stable_app_data_dir().join(CONFIG_FILE_NAME)
}

/// Missing file means defaults; missing keys take their default values.
pub fn load(path: Option<&Path>) -> Result<Config, ConfigError> {
    let path = path.map(Path::to_path_buf).unwrap_or_else(default_config_path);
    if !path.exists() {
        return Ok(Config {
            config_path: path,
            ..Config::default()
        });
    }

    let raw = fs::read_to_string(&path).map_err(|source| ConfigError::Read {
        path: path.clone(),
        source,
    })?;
    let mut config: Config = toml::from_str(&raw).map_err(|e| ConfigError::Parse {
        path: path.clone(),
        message: e.to_string(),
    })?;
    config.config_path = path;
    validate(&config)?;
    Ok(config)
}

pub fn save(config: &Config) -> Result<(), ConfigError> {
    validate(config)?;
    let raw = toml::to_string_pretty(config).map_err(|e| ConfigError::Serialize(e.to_string()))?;
    let write_error = |source| ConfigError::Write {
        path: config.config_path.clone(),
        source,
    };
    if let Some(parent) = config.config_path.parent() {
        fs::create_dir_all(parent).map_err(write_error)?;
    }
    fs::write(&config.config_path, raw).map_err(write_error)
}

pub fn validate(cfg: &Config) -> Result<(), ConfigError> {
    let invalid = |message: &str| Err(ConfigError::Invalid(message.to_string()));

    if cfg.store_path.as_os_str().is_empty() {
        return invalid("store_path is required");
    }
    if cfg.config_path.as_os_str().is_empty() {
        return invalid("config_path is required");
    }
    if cfg.history_max_results == 0 {
        return invalid("history_max_results must be positive");
    }
    if cfg.cache_short_window_ms == 0 || cfg.cache_long_window_ms == 0 {
        return invalid("cache windows must be positive");
    }
    if cfg.cache_short_window_ms >= cfg.cache_long_window_ms {
        return invalid("cache_short_window_ms must be below cache_long_window_ms");
    }
    if cfg.favicon_image_timeout_ms == 0 || cfg.favicon_html_timeout_ms == 0 {
        return invalid("favicon timeouts must be positive");
    }
    if cfg.favicon_max_bytes == 0 {
        return invalid("favicon_max_bytes must be positive");
    }
    if !cfg.favicon_service_url.contains("{domain}") {
        return invalid("favicon_service_url must contain {domain}");
    }
    if cfg.bridge_max_retries == 0 {
        return invalid("bridge_max_retries must be at least 1");
    }

    Ok(())
}
