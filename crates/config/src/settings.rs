//! Main settings module

use std::path::Path;
use std::time::Duration;

use config::{Config, Environment, File};
use serde::{Deserialize, Serialize};

use crate::constants::{endpoints, oracle, triage, EMERGENCY_LEXICON};
use crate::ConfigError;

/// Runtime environment
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum RuntimeEnvironment {
    /// Development mode - relaxed validation, warnings only
    #[default]
    Development,
    /// Staging mode - stricter validation
    Staging,
    /// Production mode - all validations enforced
    Production,
}

impl RuntimeEnvironment {
    pub fn is_production(&self) -> bool {
        matches!(self, Self::Production)
    }

    /// Check if strict validation should be applied
    pub fn is_strict(&self) -> bool {
        matches!(self, Self::Production | Self::Staging)
    }
}

/// Main application settings
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Settings {
    #[serde(default)]
    pub environment: RuntimeEnvironment,

    /// HTTP server configuration
    #[serde(default)]
    pub server: ServerConfig,

    /// Safety policy for the orchestrator
    #[serde(default)]
    pub triage: TriagePolicy,

    /// Reasoning oracle backend and timings
    #[serde(default)]
    pub oracle: OracleSettings,

    #[serde(default)]
    pub observability: ObservabilityConfig,
}

impl Settings {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load settings from a single YAML or TOML file, chosen by extension
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::FileNotFound(format!("{}: {}", path.display(), e)))?;

        let settings: Settings = match path.extension().and_then(|ext| ext.to_str()) {
            Some("yaml") | Some("yml") => serde_yaml::from_str(&content)
                .map_err(|e| ConfigError::ParseError(e.to_string()))?,
            Some("toml") => {
                toml::from_str(&content).map_err(|e| ConfigError::ParseError(e.to_string()))?
            }
            Some("json") => serde_json::from_str(&content)
                .map_err(|e| ConfigError::ParseError(e.to_string()))?,
            other => {
                return Err(ConfigError::ParseError(format!(
                    "Unsupported config format: {:?}",
                    other
                )))
            }
        };

        settings.validate()?;
        Ok(settings)
    }

    /// Validate settings. Any error here must stop the process from serving.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.validate_triage()?;
        self.validate_oracle()?;
        self.validate_server()?;
        Ok(())
    }

    fn validate_triage(&self) -> Result<(), ConfigError> {
        let policy = &self.triage;

        // NaN fails both comparisons
        if !(policy.confidence_threshold > 0.0 && policy.confidence_threshold <= 1.0) {
            return Err(ConfigError::invalid(
                "triage.confidence_threshold",
                format!(
                    "Must be in (0.0, 1.0], got {}",
                    policy.confidence_threshold
                ),
            ));
        }

        if policy.history_window == 0 {
            return Err(ConfigError::invalid(
                "triage.history_window",
                "Must be at least 1",
            ));
        }

        if policy.emergency_lexicon.is_empty() {
            return Err(ConfigError::invalid(
                "triage.emergency_lexicon",
                "Emergency lexicon cannot be empty",
            ));
        }

        if let Some(index) = policy
            .emergency_lexicon
            .iter()
            .position(|phrase| phrase.trim().is_empty())
        {
            return Err(ConfigError::invalid(
                "triage.emergency_lexicon",
                format!("Phrase at index {} is blank", index),
            ));
        }

        if policy.max_consecutive_follow_ups == 0 {
            return Err(ConfigError::invalid(
                "triage.max_consecutive_follow_ups",
                "Must be at least 1",
            ));
        }

        if policy.max_action_steps == 0 {
            return Err(ConfigError::invalid(
                "triage.max_action_steps",
                "Must be at least 1",
            ));
        }

        Ok(())
    }

    fn validate_oracle(&self) -> Result<(), ConfigError> {
        let oracle = &self.oracle;

        if !(oracle.endpoint.starts_with("http://") || oracle.endpoint.starts_with("https://")) {
            return Err(ConfigError::invalid(
                "oracle.endpoint",
                format!("Must be an http(s) URL, got '{}'", oracle.endpoint),
            ));
        }

        if oracle.model.trim().is_empty() {
            return Err(ConfigError::MissingField("oracle.model".to_string()));
        }

        if oracle.cold_timeout_ms == 0 || oracle.warm_timeout_ms == 0 {
            return Err(ConfigError::invalid(
                "oracle.timeouts",
                "Cold and warm timeouts must be at least 1ms",
            ));
        }

        if oracle.warm_timeout_ms > oracle.cold_timeout_ms {
            return Err(ConfigError::invalid(
                "oracle.warm_timeout_ms",
                format!(
                    "Cannot exceed cold_timeout_ms ({})",
                    oracle.cold_timeout_ms
                ),
            ));
        }

        if !(0.0..=2.0).contains(&oracle.temperature) {
            return Err(ConfigError::invalid(
                "oracle.temperature",
                format!("Must be between 0.0 and 2.0, got {}", oracle.temperature),
            ));
        }

        if oracle.max_tokens == 0 {
            return Err(ConfigError::invalid(
                "oracle.max_tokens",
                "Must be at least 1",
            ));
        }

        if oracle.provider == OracleProvider::OpenAi && oracle.api_key.is_none() {
            if self.environment.is_strict() {
                return Err(ConfigError::MissingField("oracle.api_key".to_string()));
            }
            tracing::warn!("oracle.api_key not set for the openai provider");
        }

        Ok(())
    }

    fn validate_server(&self) -> Result<(), ConfigError> {
        let server = &self.server;

        if server.port == 0 {
            return Err(ConfigError::invalid("server.port", "Port cannot be 0"));
        }

        if server.timeout_seconds == 0 {
            return Err(ConfigError::invalid(
                "server.timeout_seconds",
                "Timeout must be at least 1 second",
            ));
        }

        if server.max_body_bytes == 0 {
            return Err(ConfigError::invalid(
                "server.max_body_bytes",
                "Must be at least 1",
            ));
        }

        // Worst case for one turn: two stages, each with a retry
        let worst_case_ms = self
            .oracle
            .cold_timeout_ms
            .saturating_mul(2)
            .saturating_add(self.oracle.retry_backoff_ms)
            .saturating_mul(2);
        if server.timeout_seconds.saturating_mul(1000) < worst_case_ms {
            tracing::warn!(
                timeout_seconds = server.timeout_seconds,
                worst_case_ms,
                "server.timeout_seconds may cut off slow oracle calls"
            );
        }

        if self.environment.is_production() && server.cors_enabled && server.cors_origins.is_empty()
        {
            tracing::warn!(
                "CORS is enabled in production but no origins are configured. \
                 This may block legitimate requests."
            );
        }

        Ok(())
    }
}

/// HTTP server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,

    #[serde(default = "default_port")]
    pub port: u16,

    /// Request timeout in seconds
    #[serde(default = "default_timeout")]
    pub timeout_seconds: u64,

    /// Largest accepted request body
    #[serde(default = "default_max_body_bytes")]
    pub max_body_bytes: usize,

    #[serde(default = "default_true")]
    pub cors_enabled: bool,

    /// CORS allowed origins
    #[serde(default)]
    pub cors_origins: Vec<String>,
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}
fn default_port() -> u16 {
    8080
}
fn default_timeout() -> u64 {
    150
}
fn default_max_body_bytes() -> usize {
    256 * 1024
}
fn default_true() -> bool {
    true
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            timeout_seconds: default_timeout(),
            max_body_bytes: default_max_body_bytes(),
            cors_enabled: true,
            cors_origins: Vec::new(),
        }
    }
}

/// Safety policy applied by the orchestrator
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TriagePolicy {
    /// Assessments with lower confidence escalate
    #[serde(default = "default_confidence_threshold")]
    pub confidence_threshold: f32,

    /// Prior turns included in each reasoning call
    #[serde(default = "default_history_window")]
    pub history_window: usize,

    /// Phrases that escalate without consulting the oracle
    #[serde(default = "default_emergency_lexicon")]
    pub emergency_lexicon: Vec<String>,

    /// Consecutive clarifying questions before escalating
    #[serde(default = "default_max_follow_ups")]
    pub max_consecutive_follow_ups: usize,

    /// Action plan length cap, disclaimer excluded
    #[serde(default = "default_max_action_steps")]
    pub max_action_steps: usize,
}

fn default_confidence_threshold() -> f32 {
    triage::CONFIDENCE_THRESHOLD
}
fn default_history_window() -> usize {
    triage::HISTORY_WINDOW
}
fn default_emergency_lexicon() -> Vec<String> {
    EMERGENCY_LEXICON.iter().map(|p| p.to_string()).collect()
}
fn default_max_follow_ups() -> usize {
    triage::MAX_CONSECUTIVE_FOLLOW_UPS
}
fn default_max_action_steps() -> usize {
    triage::MAX_ACTION_STEPS
}

impl Default for TriagePolicy {
    fn default() -> Self {
        Self {
            confidence_threshold: default_confidence_threshold(),
            history_window: default_history_window(),
            emergency_lexicon: default_emergency_lexicon(),
            max_consecutive_follow_ups: default_max_follow_ups(),
            max_action_steps: default_max_action_steps(),
        }
    }
}

/// Oracle transport
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum OracleProvider {
    #[default]
    Ollama,
    #[serde(rename = "openai")]
    OpenAi,
}

impl std::str::FromStr for OracleProvider {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "ollama" => Ok(OracleProvider::Ollama),
            "openai" | "open_ai" | "vllm" => Ok(OracleProvider::OpenAi),
            other => Err(ConfigError::invalid(
                "oracle.provider",
                format!("Unknown provider '{}'", other),
            )),
        }
    }
}

/// Reasoning oracle settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OracleSettings {
    #[serde(default)]
    pub provider: OracleProvider,

    #[serde(default = "default_endpoint")]
    pub endpoint: String,

    #[serde(default = "default_model")]
    pub model: String,

    /// Bearer token for OpenAI-compatible providers
    #[serde(default, skip_serializing)]
    pub api_key: Option<String>,

    #[serde(default = "default_temperature")]
    pub temperature: f32,

    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,

    /// Timeout until the first successful call
    #[serde(default = "default_cold_timeout")]
    pub cold_timeout_ms: u64,

    /// Timeout once warm
    #[serde(default = "default_warm_timeout")]
    pub warm_timeout_ms: u64,

    #[serde(default = "default_retry_backoff")]
    pub retry_backoff_ms: u64,
}

fn default_endpoint() -> String {
    endpoints::OLLAMA_DEFAULT.to_string()
}
fn default_model() -> String {
    oracle::DEFAULT_MODEL.to_string()
}
fn default_temperature() -> f32 {
    oracle::TEMPERATURE
}
fn default_max_tokens() -> u32 {
    oracle::MAX_TOKENS
}
fn default_cold_timeout() -> u64 {
    oracle::COLD_TIMEOUT_MS
}
fn default_warm_timeout() -> u64 {
    oracle::WARM_TIMEOUT_MS
}
fn default_retry_backoff() -> u64 {
    oracle::RETRY_BACKOFF_MS
}

impl OracleSettings {
    pub fn cold_timeout(&self) -> Duration {
        Duration::from_millis(self.cold_timeout_ms)
    }

    pub fn warm_timeout(&self) -> Duration {
        Duration::from_millis(self.warm_timeout_ms)
    }

    pub fn retry_backoff(&self) -> Duration {
        Duration::from_millis(self.retry_backoff_ms)
    }
}

impl Default for OracleSettings {
    fn default() -> Self {
        Self {
            provider: OracleProvider::default(),
            endpoint: default_endpoint(),
            model: default_model(),
            api_key: None,
            temperature: default_temperature(),
            max_tokens: default_max_tokens(),
            cold_timeout_ms: default_cold_timeout(),
            warm_timeout_ms: default_warm_timeout(),
            retry_backoff_ms: default_retry_backoff(),
        }
    }
}

/// Observability configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObservabilityConfig {
    /// Log level filter used when RUST_LOG is unset
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Emit JSON log lines
    #[serde(default)]
    pub log_json: bool,

    /// Install the Prometheus recorder and serve /metrics
    #[serde(default = "default_true")]
    pub metrics_enabled: bool,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            log_json: false,
            metrics_enabled: true,
        }
    }
}

/// Load settings from files and environment
///
/// Priority (highest to lowest):
/// 1. Environment variables (TRIAGE__ prefix, `__` between sections)
/// 2. config/{env}.yaml (if env specified)
/// 3. config/default.yaml
pub fn load_settings(env: Option<&str>) -> Result<Settings, ConfigError> {
    let mut builder = Config::builder();

    builder = builder.add_source(File::with_name("config/default").required(false));

    if let Some(env_name) = env {
        builder =
            builder.add_source(File::with_name(&format!("config/{}", env_name)).required(false));
    }

    builder = builder.add_source(
        Environment::with_prefix("TRIAGE")
            .separator("__")
            .list_separator(",")
            .with_list_parse_key("triage.emergency_lexicon")
            .try_parsing(true),
    );

    let config = builder.build()?;
    let settings: Settings = config.try_deserialize()?;

    settings.validate()?;

    Ok(settings)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_default_settings() {
        let settings = Settings::default();
        assert_eq!(settings.server.port, 8080);
        assert_eq!(settings.triage.confidence_threshold, 0.6);
        assert_eq!(settings.triage.history_window, 5);
        assert_eq!(settings.triage.emergency_lexicon.len(), 14);
        assert_eq!(settings.oracle.provider, OracleProvider::Ollama);
        assert!(settings.validate().is_ok());
    }

    #[test]
    fn test_threshold_validation() {
        let mut settings = Settings::default();

        settings.triage.confidence_threshold = 0.0;
        assert!(settings.validate_triage().is_err());

        settings.triage.confidence_threshold = 1.5;
        assert!(settings.validate_triage().is_err());

        settings.triage.confidence_threshold = f32::NAN;
        assert!(settings.validate_triage().is_err());

        settings.triage.confidence_threshold = 1.0;
        assert!(settings.validate_triage().is_ok());
    }

    #[test]
    fn test_lexicon_validation() {
        let mut settings = Settings::default();

        settings.triage.emergency_lexicon.clear();
        let err = settings.validate().unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { ref field, .. } if field == "triage.emergency_lexicon"));

        settings.triage.emergency_lexicon = vec!["stroke".to_string(), "  ".to_string()];
        assert!(settings.validate_triage().is_err());
    }

    #[test]
    fn test_window_and_caps_validation() {
        let mut settings = Settings::default();
        settings.triage.history_window = 0;
        assert!(settings.validate_triage().is_err());
        settings.triage.history_window = 5;

        settings.triage.max_consecutive_follow_ups = 0;
        assert!(settings.validate_triage().is_err());
        settings.triage.max_consecutive_follow_ups = 3;

        settings.triage.max_action_steps = 0;
        assert!(settings.validate_triage().is_err());
    }

    #[test]
    fn test_oracle_validation() {
        let mut settings = Settings::default();

        settings.oracle.warm_timeout_ms = settings.oracle.cold_timeout_ms + 1;
        assert!(settings.validate_oracle().is_err());
        settings.oracle.warm_timeout_ms = 10_000;

        settings.oracle.endpoint = "localhost:11434".to_string();
        assert!(settings.validate_oracle().is_err());
        settings.oracle.endpoint = endpoints::OLLAMA_DEFAULT.to_string();

        settings.oracle.temperature = 3.0;
        assert!(settings.validate_oracle().is_err());
        settings.oracle.temperature = 0.3;

        assert!(settings.validate_oracle().is_ok());
    }

    #[test]
    fn test_huge_oracle_timeouts_do_not_overflow() {
        let mut settings = Settings::default();
        settings.oracle.cold_timeout_ms = u64::MAX;
        settings.oracle.warm_timeout_ms = u64::MAX;
        settings.oracle.retry_backoff_ms = u64::MAX;
        assert!(settings.validate_server().is_ok());
    }

    #[test]
    fn test_openai_key_required_in_production() {
        let mut settings = Settings::default();
        settings.oracle.provider = OracleProvider::OpenAi;
        settings.oracle.endpoint = endpoints::OPENAI_DEFAULT.to_string();

        // Development only warns
        assert!(settings.validate_oracle().is_ok());

        settings.environment = RuntimeEnvironment::Production;
        assert!(settings.validate_oracle().is_err());

        settings.oracle.api_key = Some("sk-test".to_string());
        assert!(settings.validate_oracle().is_ok());
    }

    #[test]
    fn test_provider_from_str() {
        assert_eq!("Ollama".parse::<OracleProvider>().unwrap(), OracleProvider::Ollama);
        assert_eq!("openai".parse::<OracleProvider>().unwrap(), OracleProvider::OpenAi);
        assert!("bard".parse::<OracleProvider>().is_err());
    }

    #[test]
    fn test_from_yaml_file() {
        let mut file = tempfile::Builder::new().suffix(".yaml").tempfile().unwrap();
        writeln!(
            file,
            "triage:\n  confidence_threshold: 0.75\n  emergency_lexicon: [\"chest pain\", \"stroke\"]\noracle:\n  model: llama3:8b"
        )
        .unwrap();

        let settings = Settings::from_file(file.path()).unwrap();
        assert_eq!(settings.triage.confidence_threshold, 0.75);
        assert_eq!(settings.triage.emergency_lexicon.len(), 2);
        assert_eq!(settings.triage.history_window, 5);
        assert_eq!(settings.oracle.model, "llama3:8b");
    }

    #[test]
    fn test_from_toml_file_rejects_invalid_policy() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(file, "[triage]\nconfidence_threshold = 1.2").unwrap();

        let err = Settings::from_file(file.path()).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { .. }));
    }

    #[test]
    fn test_missing_file() {
        let err = Settings::from_file("/nonexistent/triage.yaml").unwrap_err();
        assert!(matches!(err, ConfigError::FileNotFound(_)));
    }

    #[test]
    fn test_timeouts_as_durations() {
        let oracle = OracleSettings::default();
        assert_eq!(oracle.cold_timeout(), Duration::from_secs(30));
        assert_eq!(oracle.warm_timeout(), Duration::from_secs(10));
    }
}
