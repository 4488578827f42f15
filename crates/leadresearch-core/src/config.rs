use std::{
    env, fs,
    path::{Path, PathBuf},
    time::Duration,
};

use serde::Deserialize;

use crate::search::FailurePolicy;
use crate::{ResearchError, SecretValue, require_env};

const DEFAULT_CONFIG_PATH: &str = "leadresearch.toml";
const CONFIG_PATH_ENV: &str = "LEADRESEARCH_CONFIG";

/// Service-level configuration: clients, pipeline limits, retry policy.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ServiceConfig {
    pub llm: LlmConfig,
    pub search: SearchConfig,
    pub pipeline: PipelineConfig,
    pub orchestrator: OrchestratorConfig,
    pub logging: LoggingConfig,
}

impl ServiceConfig {
    /// Resolve the LLM API key (from environment only).
    pub fn llm_api_key(&self) -> Result<SecretValue, ResearchError> {
        require_env(&self.llm.api_key_env)
    }

    /// Resolve the search API key (from environment only).
    pub fn search_api_key(&self) -> Result<SecretValue, ResearchError> {
        require_env(&self.search.api_key_env)
    }
}

/// Helper to load configuration with guard rails.
pub struct ConfigLoader;

impl ConfigLoader {
    /// Load configuration from a provided path or discoverable defaults.
    ///
    /// Resolution order:
    /// 1. Explicit `path` argument.
    /// 2. `LEADRESEARCH_CONFIG` environment variable.
    /// 3. `leadresearch.toml` in the current working directory; when absent,
    ///    built-in defaults are used.
    pub fn load(path: Option<PathBuf>) -> Result<ServiceConfig, ResearchError> {
        let (candidate, explicit) = resolve_path(path);
        if !explicit && !candidate.exists() {
            tracing::debug!(path = %candidate.display(), "no config file found; using defaults");
            let config = ServiceConfig::default();
            Self::validate(&config)?;
            return Ok(config);
        }

        let raw = fs::read_to_string(&candidate)
            .map_err(|err| ResearchError::config_io(candidate.clone(), err))?;
        Self::from_toml(&raw)
    }

    pub fn from_toml(raw: &str) -> Result<ServiceConfig, ResearchError> {
        let config: ServiceConfig =
            toml::from_str(raw).map_err(|err| ResearchError::Config(err.to_string()))?;
        Self::validate(&config)?;
        Ok(config)
    }

    fn validate(config: &ServiceConfig) -> Result<(), ResearchError> {
        if config.llm.api_key_env.trim().is_empty() {
            return Err(ResearchError::config(
                "llm.api_key_env must reference an environment variable",
            ));
        }
        if config.search.api_key_env.trim().is_empty() {
            return Err(ResearchError::config(
                "search.api_key_env must reference an environment variable",
            ));
        }
        if config.search.max_concurrency == 0 {
            return Err(ResearchError::config("search.max_concurrency must be at least 1"));
        }
        if config.pipeline.max_chars_per_source == 0 {
            return Err(ResearchError::config(
                "pipeline.max_chars_per_source must be at least 1",
            ));
        }
        Ok(())
    }
}

fn resolve_path(path: Option<PathBuf>) -> (PathBuf, bool) {
    if let Some(path) = path {
        return (path, true);
    }

    if let Ok(from_env) = env::var(CONFIG_PATH_ENV) {
        if !from_env.trim().is_empty() {
            return (PathBuf::from(from_env), true);
        }
    }

    (Path::new(DEFAULT_CONFIG_PATH).to_path_buf(), false)
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LlmConfig {
    pub model: String,
    pub base_url: String,
    pub api_key_env: String,
    pub temperature: f32,
    pub timeout_secs: u64,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            model: "gpt-4o".into(),
            base_url: "https://api.openai.com/v1".into(),
            api_key_env: "OPENAI_API_KEY".into(),
            temperature: 0.0,
            timeout_secs: 60,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SearchTopic {
    #[default]
    General,
    News,
}

impl SearchTopic {
    pub fn as_str(&self) -> &'static str {
        match self {
            SearchTopic::General => "general",
            SearchTopic::News => "news",
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SearchConfig {
    pub base_url: String,
    pub api_key_env: String,
    pub topic: SearchTopic,
    pub max_concurrency: usize,
    pub timeout_secs: u64,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            base_url: "https://api.tavily.com".into(),
            api_key_env: "TAVILY_API_KEY".into(),
            topic: SearchTopic::General,
            max_concurrency: 8,
            timeout_secs: 30,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub max_chars_per_source: usize,
    pub prefer_raw_content: bool,
    pub failure_policy: FailurePolicy,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            max_chars_per_source: 1000,
            prefer_raw_content: true,
            failure_policy: FailurePolicy::PartialSuccess,
        }
    }
}

/// Retry and deadline policy for the research loop.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct OrchestratorConfig {
    /// Re-invocations with a corrective instruction after malformed output
    pub max_corrective_retries: usize,
    /// Re-invocations after transport failures
    pub max_transport_retries: usize,
    /// Initial backoff duration in milliseconds
    pub initial_backoff_ms: u64,
    /// Maximum backoff duration in milliseconds
    pub max_backoff_ms: u64,
    pub run_timeout_secs: Option<u64>,
}

impl OrchestratorConfig {
    pub fn run_timeout(&self) -> Option<Duration> {
        self.run_timeout_secs.map(Duration::from_secs)
    }
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            max_corrective_retries: 1,
            max_transport_retries: 2,
            initial_backoff_ms: 1000,
            max_backoff_ms: 30000,
            run_timeout_secs: None,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn partial_file_falls_back_to_defaults() {
        let config = ConfigLoader::from_toml(
            r#"
            [llm]
            model = "gpt-4o-mini"

            [pipeline]
            failure_policy = "fail_fast"
            "#,
        )
        .unwrap();

        assert_eq!(config.llm.model, "gpt-4o-mini");
        assert_eq!(config.llm.api_key_env, "OPENAI_API_KEY");
        assert_eq!(config.pipeline.failure_policy, FailurePolicy::FailFast);
        assert_eq!(config.pipeline.max_chars_per_source, 1000);
        assert_eq!(config.orchestrator.max_corrective_retries, 1);
        assert_eq!(config.search.topic, SearchTopic::General);
    }

    #[test]
    fn rejects_blank_key_names_and_zero_limits() {
        assert!(ConfigLoader::from_toml("[llm]\napi_key_env = \" \"").is_err());
        assert!(ConfigLoader::from_toml("[search]\nmax_concurrency = 0").is_err());
        assert!(ConfigLoader::from_toml("[pipeline]\nmax_chars_per_source = 0").is_err());
    }

    #[test]
    fn loads_explicit_path() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "[search]\ntopic = \"news\"\n[orchestrator]\nrun_timeout_secs = 90").unwrap();

        let config = ConfigLoader::load(Some(file.path().to_path_buf())).unwrap();
        assert_eq!(config.search.topic, SearchTopic::News);
        assert_eq!(config.orchestrator.run_timeout(), Some(Duration::from_secs(90)));
    }

    #[test]
    fn missing_explicit_path_is_an_io_error() {
        let err = ConfigLoader::load(Some(PathBuf::from("/definitely/not/here.toml"))).unwrap_err();
        assert!(matches!(err, ResearchError::ConfigIo { .. }));
    }
}
