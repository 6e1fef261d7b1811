use std::{
    env, fs,
    path::{Path, PathBuf},
    time::Duration,
};

use serde::Deserialize;

use crate::{DeepResearchError, SecretValue, require_env};

const DEFAULT_CONFIG_PATH: &str = "config.toml";
const CONFIG_PATH_ENV: &str = "DEEPRESEARCH_CONFIG";
const POLL_TIMEOUT_ENV: &str = "DEEPRESEARCH_POLL_TIMEOUT_SECS";
const POLL_INTERVAL_ENV: &str = "DEEPRESEARCH_POLL_INTERVAL_SECS";
const DEBUG_ENV: &str = "DEEPRESEARCH_DEBUG";
const AUDIT_DIR_ENV: &str = "DEEPRESEARCH_AUDIT_DIR";

/// Top-level configuration structure.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    pub provider: ProviderConfig,
    pub polling: PollingConfig,
    pub logging: LoggingConfig,
}

impl Config {
    /// Resolve the provider API key (from environment only).
    pub fn provider_api_key(&self) -> Result<SecretValue, DeepResearchError> {
        require_env(&self.provider.api_key_env)
    }

    /// Apply `DEEPRESEARCH_*` environment overrides on top of file values.
    pub fn apply_env_overrides(&mut self) -> Result<(), DeepResearchError> {
        self.apply_overrides(|key| env::var(key).ok())
    }

    fn apply_overrides(
        &mut self,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<(), DeepResearchError> {
        if let Some(value) = lookup(POLL_TIMEOUT_ENV) {
            self.polling.timeout_secs = parse_secs(POLL_TIMEOUT_ENV, &value)?;
        }
        if let Some(value) = lookup(POLL_INTERVAL_ENV) {
            self.polling.interval_secs = parse_secs(POLL_INTERVAL_ENV, &value)?;
        }
        if let Some(value) = lookup(DEBUG_ENV) {
            self.logging.debug = parse_bool(&value).ok_or_else(|| {
                DeepResearchError::InvalidConfiguration(format!(
                    "{DEBUG_ENV} must be true or false"
                ))
            })?;
        }
        if let Some(value) = lookup(AUDIT_DIR_ENV).filter(|value| !value.trim().is_empty()) {
            self.logging.audit_dir = Some(PathBuf::from(value.trim()));
        }
        Ok(())
    }
}

/// Helper to load configuration with guard rails.
pub struct ConfigLoader;

impl ConfigLoader {
    /// Load configuration from a provided path or discoverable defaults.
    ///
    /// Resolution order:
    /// 1. Explicit `path` argument.
    /// 2. `DEEPRESEARCH_CONFIG` environment variable.
    /// 3. `config.toml` in the current working directory, if it exists.
    /// 4. Built-in defaults.
    ///
    /// Environment overrides are applied last.
    pub fn load(path: Option<PathBuf>) -> Result<Config, DeepResearchError> {
        let mut config = match resolve_path(path) {
            Some(candidate) => Self::from_file(&candidate)?,
            None => Config::default(),
        };

        config.apply_env_overrides()?;
        Self::validate(&config)?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Config, DeepResearchError> {
        let raw = fs::read_to_string(path)
            .map_err(|err| DeepResearchError::config_io(path.to_path_buf(), err))?;
        Self::from_toml(&raw)
    }

    pub fn from_toml(raw: &str) -> Result<Config, DeepResearchError> {
        toml::from_str(raw).map_err(|err| DeepResearchError::InvalidConfiguration(err.to_string()))
    }

    pub fn validate(config: &Config) -> Result<(), DeepResearchError> {
        if config.provider.agent.trim().is_empty() {
            return Err(DeepResearchError::InvalidConfiguration(
                "provider.agent must name a research agent".into(),
            ));
        }
        if config.provider.request_timeout_ms == 0 {
            return Err(DeepResearchError::InvalidConfiguration(
                "provider.request_timeout_ms must be greater than zero".into(),
            ));
        }
        if config.provider.api_key_env.trim().is_empty() {
            return Err(DeepResearchError::InvalidConfiguration(
                "provider.api_key_env must reference an environment variable".into(),
            ));
        }

        let polling = &config.polling;
        if polling.timeout_secs == 0 {
            return Err(DeepResearchError::InvalidConfiguration(
                "polling.timeout_secs must be greater than zero".into(),
            ));
        }
        if polling.interval_secs == 0 {
            return Err(DeepResearchError::InvalidConfiguration(
                "polling.interval_secs must be greater than zero".into(),
            ));
        }
        if polling.interval_secs > polling.timeout_secs {
            return Err(DeepResearchError::InvalidConfiguration(format!(
                "polling.interval_secs ({}) exceeds polling.timeout_secs ({})",
                polling.interval_secs, polling.timeout_secs
            )));
        }
        Ok(())
    }
}

fn resolve_path(path: Option<PathBuf>) -> Option<PathBuf> {
    if let Some(path) = path {
        return Some(path);
    }

    if let Ok(from_env) = env::var(CONFIG_PATH_ENV) {
        if !from_env.trim().is_empty() {
            return Some(PathBuf::from(from_env));
        }
    }

    let default = Path::new(DEFAULT_CONFIG_PATH);
    default.exists().then(|| default.to_path_buf())
}

fn parse_secs(key: &str, value: &str) -> Result<u64, DeepResearchError> {
    value.trim().parse::<u64>().map_err(|_| {
        DeepResearchError::InvalidConfiguration(format!("{key} must be a whole number of seconds"))
    })
}

pub(crate) fn parse_bool(input: &str) -> Option<bool> {
    match input.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ProviderConfig {
    pub base_url: String,
    pub agent: String,
    pub api_key_env: String,
    pub request_timeout_ms: u64,
}

impl ProviderConfig {
    pub const DEFAULT_BASE_URL: &'static str = "https://generativelanguage.googleapis.com/v1beta";
    pub const DEFAULT_AGENT: &'static str = "deep-research-pro-preview-12-2025";
    pub const DEFAULT_API_KEY_ENV: &'static str = "GOOGLE_API_KEY";

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            base_url: Self::DEFAULT_BASE_URL.to_string(),
            agent: Self::DEFAULT_AGENT.to_string(),
            api_key_env: Self::DEFAULT_API_KEY_ENV.to_string(),
            request_timeout_ms: 30_000,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PollingConfig {
    pub timeout_secs: u64,
    pub interval_secs: u64,
}

impl PollingConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }
}

impl Default for PollingConfig {
    fn default() -> Self {
        Self {
            timeout_secs: 600,
            interval_secs: 10,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    pub debug: bool,
    pub audit_dir: Option<PathBuf>,
    pub retention_days: u64,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            debug: false,
            audit_dir: None,
            retention_days: 90,
        }
    }
}
