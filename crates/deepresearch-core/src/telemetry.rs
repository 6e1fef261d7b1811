use std::sync::OnceLock;

use tracing_subscriber::{EnvFilter, fmt};

use crate::DeepResearchError;

static TELEMETRY_GUARD: OnceLock<()> = OnceLock::new();

const DEBUG_FILTER: &str = "debug,deepresearch_core=trace";

/// Configuration options when initialising telemetry.
#[derive(Debug, Clone)]
pub struct TelemetryOptions {
    pub env_filter: Option<String>,
    pub with_ansi: bool,
    /// Verbose tracing of provider calls and poll iterations.
    pub debug: bool,
}

impl Default for TelemetryOptions {
    fn default() -> Self {
        Self {
            env_filter: None,
            with_ansi: true,
            debug: false,
        }
    }
}

impl TelemetryOptions {
    fn resolve_filter(self) -> String {
        if self.debug {
            return DEBUG_FILTER.to_string();
        }
        self.env_filter
            .or_else(|| std::env::var("RUST_LOG").ok())
            .unwrap_or_else(|| "info".to_string())
    }
}

/// Initialise the global tracing subscriber, writing to stderr.
///
/// Safe to call multiple times; only the first invocation installs the subscriber.
pub fn init_telemetry(options: TelemetryOptions) -> Result<(), DeepResearchError> {
    if TELEMETRY_GUARD.get().is_some() {
        return Ok(());
    }

    let with_ansi = options.with_ansi;
    let env_filter = options.resolve_filter();

    fmt::Subscriber::builder()
        .with_env_filter(EnvFilter::new(env_filter))
        .with_ansi(with_ansi)
        .with_target(false)
        .with_writer(std::io::stderr)
        .try_init()
        .map_err(|err| {
            DeepResearchError::InvalidConfiguration(format!("telemetry init failed: {err}"))
        })?;

    TELEMETRY_GUARD.get_or_init(|| ());
    Ok(())
}
