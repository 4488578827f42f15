use std::sync::OnceLock;

use tracing_subscriber::{EnvFilter, fmt};

use crate::ResearchError;
use crate::config::LoggingConfig;

static SUBSCRIBER_INSTALLED: OnceLock<()> = OnceLock::new();

/// Subscriber settings. Filter precedence: `env_filter`, then `RUST_LOG`,
/// then `default_level`.
#[derive(Debug, Clone)]
pub struct TelemetryOptions {
    pub env_filter: Option<String>,
    pub default_level: String,
    pub with_ansi: bool,
    pub with_target: bool,
}

impl Default for TelemetryOptions {
    fn default() -> Self {
        Self::from(&LoggingConfig::default())
    }
}

impl From<&LoggingConfig> for TelemetryOptions {
    fn from(logging: &LoggingConfig) -> Self {
        Self {
            env_filter: None,
            default_level: logging.level.clone(),
            with_ansi: true,
            with_target: false,
        }
    }
}

impl TelemetryOptions {
    fn resolved_filter(&self) -> String {
        self.env_filter
            .clone()
            .or_else(|| std::env::var("RUST_LOG").ok())
            .filter(|filter| !filter.trim().is_empty())
            .unwrap_or_else(|| self.default_level.clone())
    }
}

/// Install the global fmt subscriber on stderr; stdout stays free for run output.
///
/// Later calls are no-ops.
pub fn init_telemetry(options: TelemetryOptions) -> Result<(), ResearchError> {
    if SUBSCRIBER_INSTALLED.get().is_some() {
        return Ok(());
    }

    let filter = EnvFilter::try_new(options.resolved_filter())
        .map_err(|err| ResearchError::config(format!("invalid log filter: {err}")))?;

    fmt::Subscriber::builder()
        .with_env_filter(filter)
        .with_ansi(options.with_ansi)
        .with_target(options.with_target)
        .with_writer(std::io::stderr)
        .try_init()
        .map_err(|err| ResearchError::config(format!("telemetry init failed: {err}")))?;

    SUBSCRIBER_INSTALLED.get_or_init(|| ());
    Ok(())
}
