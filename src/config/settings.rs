use std::fs;
use std::path::Path;
use std::time::Duration;

use serde::Deserialize;
use thiserror::Error;

use crate::autosave::DEFAULT_AUTOSAVE_INTERVAL;
use crate::chat::{ChatSettings, StreamMethod};
use crate::session::DEFAULT_TABLE_SOFT_LIMIT;
use crate::util::paths::config_path;

/// Example configuration file contents (bundled with the binary)
pub const EXAMPLE_CONFIG: &str = include_str!("config.toml.example");

pub const DEFAULT_BASE_URL: &str = "http://127.0.0.1:10821";
pub const DEFAULT_CREDENTIAL_HEADER: &str = "DBHUB";

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Read(#[from] std::io::Error),
    #[error("Failed to parse config file: {0}")]
    Parse(#[from] toml::de::Error),
}

/// Application configuration
#[derive(Debug, Clone)]
pub struct Config {
    pub server: ServerSettings,
    /// Login polling
    pub chat: ChatSettings,
    /// Tables selected before a warning is shown
    pub table_soft_limit: usize,
    /// Delay between draft autosaves
    pub autosave_interval: Duration,
}

#[derive(Debug, Clone)]
pub struct ServerSettings {
    /// Base URL of the AI service, without a trailing slash
    pub base_url: String,
    pub stream_method: StreamMethod,
    /// Header carrying the stored credential on stream requests
    pub credential_header: String,
    /// Timeout for QR / login status requests and for connecting streams
    pub request_timeout: Duration,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server: ServerSettings {
                base_url: DEFAULT_BASE_URL.to_string(),
                stream_method: StreamMethod::Get,
                credential_header: DEFAULT_CREDENTIAL_HEADER.to_string(),
                request_timeout: Duration::from_secs(30),
            },
            chat: ChatSettings::default(),
            table_soft_limit: DEFAULT_TABLE_SOFT_LIMIT,
            autosave_interval: DEFAULT_AUTOSAVE_INTERVAL,
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct TomlServerConfig {
    pub base_url: Option<String>,
    pub stream_method: Option<StreamMethod>,
    pub credential_header: Option<String>,
    pub request_timeout_secs: Option<u64>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct TomlChatConfig {
    pub poll_interval_ms: Option<u64>,
    pub poll_attempts: Option<u32>,
    pub table_soft_limit: Option<usize>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct TomlAutosaveConfig {
    pub interval_ms: Option<u64>,
}

/// TOML representation of the config file
#[derive(Debug, Clone, Default, Deserialize)]
pub struct TomlConfig {
    pub server: Option<TomlServerConfig>,
    pub chat: Option<TomlChatConfig>,
    pub autosave: Option<TomlAutosaveConfig>,
}

impl Config {
    /// Load configuration from the data directory, merging with defaults.
    ///
    /// The example file is written on first run. An unreadable or invalid
    /// file is logged and the defaults are used.
    pub fn load() -> Self {
        let config_file = config_path();

        // Create example config on first run
        if !config_file.exists() {
            Self::create_default_config(&config_file);
        }

        match Self::load_from(&config_file) {
            Ok(config) => config,
            Err(e) => {
                tracing::warn!(
                    path = %config_file.display(),
                    error = %e,
                    "Ignoring config file"
                );
                Config::default()
            }
        }
    }

    /// Load `path` merged over defaults. A missing file yields the defaults.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            return Ok(Config::default());
        }
        let contents = fs::read_to_string(path)?;
        Self::from_toml_str(&contents)
    }

    /// Parse TOML text merged over defaults
    pub fn from_toml_str(contents: &str) -> Result<Self, ConfigError> {
        let toml_config: TomlConfig = toml::from_str(contents)?;
        let mut config = Config::default();
        config.merge(toml_config);
        Ok(config)
    }

    fn merge(&mut self, toml_config: TomlConfig) {
        if let Some(server) = toml_config.server {
            if let Some(base_url) = server.base_url {
                self.server.base_url = base_url.trim_end_matches('/').to_string();
            }
            if let Some(method) = server.stream_method {
                self.server.stream_method = method;
            }
            if let Some(header) = server.credential_header {
                self.server.credential_header = header;
            }
            if let Some(secs) = server.request_timeout_secs {
                self.server.request_timeout = Duration::from_secs(secs);
            }
        }

        if let Some(chat) = toml_config.chat {
            match chat.poll_interval_ms {
                Some(0) => tracing::warn!("Ignoring zero chat.poll_interval_ms"),
                Some(ms) => self.chat.poll_interval = Duration::from_millis(ms),
                None => {}
            }
            if let Some(attempts) = chat.poll_attempts {
                self.chat.poll_attempts = attempts;
            }
            if let Some(limit) = chat.table_soft_limit {
                self.table_soft_limit = limit;
            }
        }

        if let Some(autosave) = toml_config.autosave {
            match autosave.interval_ms {
                Some(0) => tracing::warn!("Ignoring zero autosave.interval_ms"),
                Some(ms) => self.autosave_interval = Duration::from_millis(ms),
                None => {}
            }
        }
    }

    /// Create the default config file from the bundled example
    fn create_default_config(path: &Path) {
        if let Some(parent) = path.parent() {
            if !parent.exists() {
                if let Err(e) = fs::create_dir_all(parent) {
                    tracing::warn!(error = %e, "Failed to create config directory");
                    return;
                }
            }
        }

        if let Err(e) = fs::write(path, EXAMPLE_CONFIG) {
            tracing::warn!(error = %e, "Failed to write default config");
        }
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.server.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    pub fn with_stream_method(mut self, method: StreamMethod) -> Self {
        self.server.stream_method = method;
        self
    }
}
