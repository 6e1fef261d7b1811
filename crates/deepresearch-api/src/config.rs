use anyhow::{Context, Result};
use crate::state::DEFAULT_TASK_RETENTION;
use deepresearch_core::{Config, ConfigLoader};
use std::env;
use std::path::PathBuf;

#[derive(Clone, Debug)]
pub struct AppConfig {
    pub listen_addr: String,
    /// Upper bound on research tasks polling at the same time.
    pub max_concurrency: usize,
    pub auth_token: Option<String>,
    /// Serve from the offline stub provider instead of the hosted API.
    pub offline: bool,
    /// Directory of per-conversation registry files; in-memory when unset.
    pub state_dir: Option<PathBuf>,
    /// Finished task records kept for status lookups.
    pub task_retention: usize,
    pub research: Config,
}

impl AppConfig {
    const DEFAULT_LISTEN_ADDR: &'static str = "0.0.0.0:8080";
    const DEFAULT_MAX_CONCURRENCY: usize = 4;

    pub fn from_env() -> Result<Self> {
        let listen_addr =
            env::var("API_LISTEN_ADDR").unwrap_or_else(|_| Self::DEFAULT_LISTEN_ADDR.to_string());

        let max_concurrency = env::var("API_MAX_CONCURRENCY")
            .ok()
            .and_then(|value| value.parse::<usize>().ok())
            .filter(|value| *value > 0)
            .unwrap_or(Self::DEFAULT_MAX_CONCURRENCY);

        let auth_token = non_empty_var("API_AUTH_TOKEN");

        let offline = env::var("API_OFFLINE")
            .ok()
            .map(|value| parse_bool(&value).context("API_OFFLINE must be true or false"))
            .transpose()?
            .unwrap_or(false);

        let state_dir = non_empty_var("API_STATE_DIR").map(PathBuf::from);

        let task_retention = non_empty_var("API_TASK_RETENTION")
            .map(|value| {
                value
                    .parse::<usize>()
                    .context("API_TASK_RETENTION must be a positive integer")
            })
            .transpose()?
            .filter(|value| *value > 0)
            .unwrap_or(DEFAULT_TASK_RETENTION);

        let research =
            ConfigLoader::load(None).context("failed to load research configuration")?;

        Ok(Self {
            listen_addr,
            max_concurrency,
            auth_token,
            offline,
            state_dir,
            task_retention,
            research,
        })
    }
}

fn non_empty_var(key: &str) -> Option<String> {
    env::var(key)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

fn parse_bool(input: &str) -> Option<bool> {
    match input.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}
