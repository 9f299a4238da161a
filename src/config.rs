//! Configuration loader and validator for the Hydrus→Telegram bot.
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("YAML parse error: {0}")]
    Parse(#[from] serde_yaml::Error),
    #[error("Invalid configuration: {0}")]
    Invalid(&'static str),
}

/// Root configuration struct mirroring the YAML schema exactly.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Config {
    pub app: App,
    pub telegram: Telegram,
    pub hydrus: Hydrus,
    #[serde(default)]
    pub media: Media,
}

/// App-level settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct App {
    pub data_dir: String,
    /// Minutes between publishes.
    pub delay_minutes: u32,
    /// Offset in hours from UTC used to align the publish grid.
    #[serde(default)]
    pub timezone: i32,
    #[serde(default)]
    pub log_level: Option<String>,
}

/// Telegram bot settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Telegram {
    pub bot_token: String,
    pub channel: i64,
    #[serde(default)]
    pub admins: Vec<i64>,
}

/// Hydrus client API settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Hydrus {
    #[serde(default = "default_api_url")]
    pub api_url: String,
    pub api_key: String,
    pub queue_tag: String,
    pub posted_tag: String,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
}

/// Transport limits applied to images before upload.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Media {
    #[serde(default = "default_max_image_dimension")]
    pub max_image_dimension: u32,
    #[serde(default = "default_max_file_size")]
    pub max_file_size: u64,
}

impl Default for Media {
    fn default() -> Self {
        Self {
            max_image_dimension: default_max_image_dimension(),
            max_file_size: default_max_file_size(),
        }
    }
}

fn default_api_url() -> String {
    "http://127.0.0.1:45869/".to_string()
}

fn default_batch_size() -> usize {
    100
}

fn default_max_image_dimension() -> u32 {
    10_000
}

fn default_max_file_size() -> u64 {
    10_000_000
}

impl Config {
    /// Ensure required directories exist (`app.data_dir` and its `media/`).
    pub fn ensure_dirs(&self) -> Result<(), std::io::Error> {
        fs::create_dir_all(self.media_dir())
    }

    pub fn queue_file(&self) -> PathBuf {
        Path::new(&self.app.data_dir).join("queue.json")
    }

    pub fn media_dir(&self) -> PathBuf {
        Path::new(&self.app.data_dir).join("media")
    }

    /// Filter directive used when `RUST_LOG` is not set.
    pub fn log_filter(&self) -> &str {
        self.app
            .log_level
            .as_deref()
            .filter(|l| !l.trim().is_empty())
            .unwrap_or("info")
    }
}

/// `RUST_LOG` when set, otherwise `fallback`.
pub fn env_filter(fallback: &str) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(fallback))
}

/// Load configuration from a YAML file and validate it.
/// - If `path` is None, uses `config.yaml` in the current working directory.
pub fn load(path: Option<&Path>) -> Result<Config, ConfigError> {
    let path = path.unwrap_or_else(|| Path::new("config.yaml"));
    let content = fs::read_to_string(path)?;
    let cfg: Config = serde_yaml::from_str(&content)?;
    validate(&cfg)?;
    Ok(cfg)
}

/// Validate a configuration instance.
fn validate(cfg: &Config) -> Result<(), ConfigError> {
    if cfg.app.data_dir.trim().is_empty() {
        return Err(ConfigError::Invalid("app.data_dir must be non-empty"));
    }
    if cfg.app.delay_minutes == 0 {
        return Err(ConfigError::Invalid("app.delay_minutes must be > 0"));
    }
    if !(-12..=14).contains(&cfg.app.timezone) {
        return Err(ConfigError::Invalid("app.timezone must be within -12..=14"));
    }

    if cfg.telegram.bot_token.trim().is_empty() {
        return Err(ConfigError::Invalid("telegram.bot_token must be non-empty"));
    }
    if cfg.telegram.channel == 0 {
        return Err(ConfigError::Invalid("telegram.channel must be set"));
    }

    if reqwest::Url::parse(&cfg.hydrus.api_url).is_err() {
        return Err(ConfigError::Invalid("hydrus.api_url must be a valid URL"));
    }
    if cfg.hydrus.api_key.trim().is_empty() {
        return Err(ConfigError::Invalid("hydrus.api_key must be non-empty"));
    }
    if cfg.hydrus.queue_tag.trim().is_empty() {
        return Err(ConfigError::Invalid("hydrus.queue_tag must be non-empty"));
    }
    if cfg.hydrus.posted_tag.trim().is_empty() {
        return Err(ConfigError::Invalid("hydrus.posted_tag must be non-empty"));
    }
    if cfg.hydrus.queue_tag == cfg.hydrus.posted_tag {
        return Err(ConfigError::Invalid("hydrus.queue_tag and hydrus.posted_tag must differ"));
    }
    if cfg.hydrus.batch_size == 0 {
        return Err(ConfigError::Invalid("hydrus.batch_size must be > 0"));
    }

    if cfg.media.max_image_dimension == 0 {
        return Err(ConfigError::Invalid("media.max_image_dimension must be > 0"));
    }
    if cfg.media.max_file_size == 0 {
        return Err(ConfigError::Invalid("media.max_file_size must be > 0"));
    }

    Ok(())
}

/// Returns a complete example configuration.
pub fn example() -> &'static str {
    r#"app:
  data_dir: "./data"
  delay_minutes: 60
  timezone: 0
  log_level: "info"

telegram:
  bot_token: "YOUR_TELEGRAM_BOT_TOKEN"
  channel: -1001234567890
  admins:
    - 123456789

hydrus:
  api_url: "http://127.0.0.1:45869/"
  api_key: "YOUR_HYDRUS_API_KEY"
  queue_tag: "telegram:queue"
  posted_tag: "telegram:posted"
  batch_size: 100

media:
  max_image_dimension: 10000
  max_file_size: 10000000
"#
}
