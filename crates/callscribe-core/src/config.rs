//! Configuration loading and validation.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Top-level callscribe configuration, loaded from a JSON5 file.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub gateway: Option<GatewayConfig>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub transcription: Option<TranscriptionConfig>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub relay: Option<RelayConfig>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub logging: Option<LoggingConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    #[serde(default = "default_port")]
    pub port: u16,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub bind: Option<String>,

    /// Externally reachable media-stream URL (e.g. `wss://example.com/media`).
    /// Derived from the request's `Host` header when absent.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub public_url: Option<String>,

    /// Text spoken to the caller before the stream is connected.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub greeting: Option<String>,
}

fn default_port() -> u16 {
    8000
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            port: default_port(),
            bind: None,
            public_url: None,
            greeting: None,
        }
    }
}

/// Streaming speech-to-text provider configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TranscriptionConfig {
    /// Provider id. Only "deepgram" is supported.
    #[serde(default = "default_transcription_provider")]
    pub provider: String,

    /// Listen endpoint (default: `wss://api.deepgram.com/v1/listen`).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,

    /// Env var holding the API key (default: `DEEPGRAM_API_KEY`).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_key_env: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub language: Option<String>,

    #[serde(default = "default_encoding")]
    pub encoding: String,

    #[serde(default = "default_sample_rate")]
    pub sample_rate: u32,

    #[serde(default = "default_channels")]
    pub channels: u16,

    #[serde(default = "default_true")]
    pub punctuate: bool,

    #[serde(default)]
    pub interim_results: bool,

    /// Seconds of outbound silence before a keepalive is sent (0 disables).
    #[serde(default = "default_keepalive_secs")]
    pub keepalive_secs: u64,

    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,
}

fn default_transcription_provider() -> String {
    "deepgram".into()
}

fn default_encoding() -> String {
    "mulaw".into()
}

fn default_sample_rate() -> u32 {
    8000
}

fn default_channels() -> u16 {
    1
}

fn default_true() -> bool {
    true
}

fn default_keepalive_secs() -> u64 {
    5
}

fn default_connect_timeout_secs() -> u64 {
    10
}

impl Default for TranscriptionConfig {
    fn default() -> Self {
        Self {
            provider: default_transcription_provider(),
            url: None,
            api_key: None,
            api_key_env: None,
            model: None,
            language: None,
            encoding: default_encoding(),
            sample_rate: default_sample_rate(),
            channels: default_channels(),
            punctuate: true,
            interim_results: false,
            keepalive_secs: default_keepalive_secs(),
            connect_timeout_secs: default_connect_timeout_secs(),
        }
    }
}

impl TranscriptionConfig {
    /// Resolve the API key: `api_key` first, then the `api_key_env` variable
    /// (falling back to `DEEPGRAM_API_KEY`).
    pub fn resolve_api_key(&self) -> Option<String> {
        let env = self
            .api_key_env
            .clone()
            .or_else(|| Some("DEEPGRAM_API_KEY".to_string()));
        resolve_secret_field(&self.api_key, &env)
    }

    pub fn url(&self) -> &str {
        self.url
            .as_deref()
            .unwrap_or("wss://api.deepgram.com/v1/listen")
    }

    pub fn model(&self) -> &str {
        self.model.as_deref().unwrap_or("nova-2-phonecall")
    }

    pub fn language(&self) -> &str {
        self.language.as_deref().unwrap_or("en")
    }

    pub fn keepalive_interval(&self) -> Option<Duration> {
        (self.keepalive_secs > 0).then(|| Duration::from_secs(self.keepalive_secs))
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs.max(1))
    }
}

/// Tuning for the per-call relay.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RelayConfig {
    /// Audio queue bound, in frames.
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,

    /// Bounded wait for the drain phase before tasks are aborted.
    #[serde(default = "default_shutdown_timeout_ms")]
    pub shutdown_timeout_ms: u64,

    /// How long a blocked enqueue may wait before a stall is reported.
    #[serde(default = "default_stall_warn_ms")]
    pub stall_warn_ms: u64,

    /// Only forward media on this track. Empty string forwards every track.
    #[serde(default = "default_media_track")]
    pub media_track: String,
}

fn default_queue_capacity() -> usize {
    200
}

fn default_shutdown_timeout_ms() -> u64 {
    5000
}

fn default_stall_warn_ms() -> u64 {
    500
}

fn default_media_track() -> String {
    "inbound".into()
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            queue_capacity: default_queue_capacity(),
            shutdown_timeout_ms: default_shutdown_timeout_ms(),
            stall_warn_ms: default_stall_warn_ms(),
            media_track: default_media_track(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log format: "plain" (default) or "json".
    #[serde(default = "default_log_format")]
    pub format: String,

    /// Log level override (trace/debug/info/warn/error).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub level: Option<String>,

    /// Per-crate log level overrides (e.g. "callscribe_relay=debug").
    #[serde(default)]
    pub filters: Vec<String>,

    /// Output target: "stderr" (default) or "stdout".
    #[serde(default = "default_log_output")]
    pub output: String,
}

fn default_log_format() -> String {
    "plain".into()
}

fn default_log_output() -> String {
    "stderr".into()
}

/// Resolve a secret: check the direct value first, then the env-var reference.
pub fn resolve_secret_field(direct: &Option<String>, env_var: &Option<String>) -> Option<String> {
    if let Some(val) = direct {
        if !val.is_empty() {
            return Some(val.clone());
        }
    }
    if let Some(env) = env_var {
        if let Ok(val) = std::env::var(env) {
            if !val.is_empty() {
                return Some(val);
            }
        }
    }
    None
}

/// Substitute `${ENV_VAR}` patterns in a string with their environment variable values.
fn substitute_env_vars(input: &str) -> String {
    let re = regex::Regex::new(r"\$\{([^}]+)\}").expect("static pattern");
    re.replace_all(input, |caps: &regex::Captures| {
        let var_name = &caps[1];
        std::env::var(var_name).unwrap_or_default()
    })
    .into_owned()
}

impl Config {
    /// Load config from a JSON5 file, substituting `${ENV_VAR}` references.
    /// A missing file yields the defaults.
    pub fn load(path: &Path) -> crate::error::Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }

        let raw = std::fs::read_to_string(path)?;
        Self::from_json5(&raw)
    }

    pub fn from_json5(raw: &str) -> crate::error::Result<Self> {
        let substituted = substitute_env_vars(raw);
        json5::from_str(&substituted)
            .map_err(|e| crate::error::CallScribeError::Config(e.to_string()))
    }

    /// Default config file location.
    pub fn config_path() -> PathBuf {
        data_dir().join("config.json")
    }

    pub fn gateway_port(&self) -> u16 {
        self.gateway.as_ref().map(|g| g.port).unwrap_or(8000)
    }

    pub fn gateway_bind(&self) -> String {
        self.gateway
            .as_ref()
            .and_then(|g| g.bind.clone())
            .unwrap_or_else(|| "0.0.0.0".to_string())
    }

    pub fn greeting(&self) -> String {
        self.gateway
            .as_ref()
            .and_then(|g| g.greeting.clone())
            .unwrap_or_else(|| "Hello! This call is being transcribed.".to_string())
    }

    pub fn transcription(&self) -> TranscriptionConfig {
        self.transcription.clone().unwrap_or_default()
    }

    pub fn relay(&self) -> RelayConfig {
        self.relay.clone().unwrap_or_default()
    }

    /// Get a config value by dotted path (e.g. "gateway.port", "relay.queue_capacity").
    pub fn get_path(&self, path: &str) -> Option<serde_json::Value> {
        let json = serde_json::to_value(self).ok()?;
        let mut current = &json;
        for segment in path.split('.') {
            current = current.get(segment)?;
        }
        Some(current.clone())
    }

    /// Validate config, returning (warnings, errors).
    pub fn validate(&self) -> (Vec<String>, Vec<String>) {
        let mut warnings = Vec::new();
        let mut errors = Vec::new();

        if let Some(gw) = &self.gateway {
            if gw.port == 0 {
                errors.push("Gateway port cannot be 0".to_string());
            }
        }

        let transcription = self.transcription();
        if transcription.provider != "deepgram" {
            errors.push(format!(
                "Unknown transcription provider '{}'",
                transcription.provider
            ));
        }
        if transcription.sample_rate == 0 {
            errors.push("Transcription sample_rate cannot be 0".to_string());
        }
        if transcription.channels == 0 {
            errors.push("Transcription channels cannot be 0".to_string());
        }
        if transcription.resolve_api_key().is_none() {
            warnings.push(format!(
                "Transcription provider '{}' has no API key configured",
                transcription.provider
            ));
        }

        let relay = self.relay();
        if relay.queue_capacity == 0 {
            errors.push("Relay queue_capacity must be at least 1".to_string());
        }
        if relay.shutdown_timeout_ms == 0 {
            errors.push("Relay shutdown_timeout_ms cannot be 0".to_string());
        }

        if let Some(logging) = &self.logging {
            if !matches!(logging.format.as_str(), "plain" | "json") {
                errors.push(format!("Unknown log format '{}'", logging.format));
            }
            if !matches!(logging.output.as_str(), "stderr" | "stdout") {
                errors.push(format!("Unknown log output '{}'", logging.output));
            }
        }

        (warnings, errors)
    }
}

/// Base directory for callscribe data: `~/.callscribe/`
pub fn data_dir() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".callscribe")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_env_var_substitution() {
        // SAFETY: test-only, no other test reads this variable
        unsafe { std::env::set_var("TEST_CS_KEY", "dg-test-123") };
        let input = r#"{"key": "${TEST_CS_KEY}", "other": "plain"}"#;
        let result = substitute_env_vars(input);
        assert!(result.contains("dg-test-123"));
        assert!(result.contains("plain"));
        unsafe { std::env::remove_var("TEST_CS_KEY") };
    }

    #[test]
    fn test_env_var_missing() {
        let input = r#"{"key": "${NONEXISTENT_VAR_CS_TEST}"}"#;
        let result = substitute_env_vars(input);
        assert!(result.contains(r#""""#));
    }

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.gateway_port(), 8000);
        assert_eq!(config.gateway_bind(), "0.0.0.0");

        let relay = config.relay();
        assert_eq!(relay.queue_capacity, 200);
        assert_eq!(relay.shutdown_timeout_ms, 5000);
        assert_eq!(relay.media_track, "inbound");

        let tr = config.transcription();
        assert_eq!(tr.url(), "wss://api.deepgram.com/v1/listen");
        assert_eq!(tr.model(), "nova-2-phonecall");
        assert_eq!(tr.encoding, "mulaw");
        assert_eq!(tr.sample_rate, 8000);
        assert_eq!(tr.channels, 1);
        assert!(tr.punctuate);
        assert_eq!(tr.keepalive_interval(), Some(Duration::from_secs(5)));
    }

    #[test]
    fn test_partial_sections_take_field_defaults() {
        let config = Config::from_json5(
            r#"{
                // comments are fine in JSON5
                relay: { queue_capacity: 16 },
                transcription: { model: "nova-3", keepalive_secs: 0 },
            }"#,
        )
        .unwrap();
        let relay = config.relay();
        assert_eq!(relay.queue_capacity, 16);
        assert_eq!(relay.stall_warn_ms, 500);

        let tr = config.transcription();
        assert_eq!(tr.model(), "nova-3");
        assert_eq!(tr.sample_rate, 8000);
        assert!(tr.keepalive_interval().is_none());
    }

    #[test]
    fn test_transcription_resolve_api_key() {
        // SAFETY: test-only, no other test reads this variable
        unsafe { std::env::set_var("TEST_CS_DG_KEY", "from-env") };
        let tr = TranscriptionConfig {
            api_key_env: Some("TEST_CS_DG_KEY".into()),
            ..TranscriptionConfig::default()
        };
        assert_eq!(tr.resolve_api_key(), Some("from-env".into()));

        let direct = TranscriptionConfig {
            api_key: Some("direct-key".into()),
            api_key_env: Some("TEST_CS_DG_KEY".into()),
            ..TranscriptionConfig::default()
        };
        assert_eq!(direct.resolve_api_key(), Some("direct-key".into()));
        unsafe { std::env::remove_var("TEST_CS_DG_KEY") };
    }

    #[test]
    fn test_load_missing_file_is_default() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config::load(&dir.path().join("absent.json")).unwrap();
        assert!(config.gateway.is_none());
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(&path, r#"{ gateway: { port: 9100, greeting: "Hi" } }"#).unwrap();
        let config = Config::load(&path).unwrap();
        assert_eq!(config.gateway_port(), 9100);
        assert_eq!(config.greeting(), "Hi");
    }

    #[test]
    fn test_invalid_json5_is_config_error() {
        let err = Config::from_json5("{ gateway: ").unwrap_err();
        assert!(matches!(err, crate::error::CallScribeError::Config(_)));
    }

    #[test]
    fn test_get_path() {
        let config = Config::from_json5(r#"{ relay: { queue_capacity: 32 } }"#).unwrap();
        assert_eq!(
            config.get_path("relay.queue_capacity"),
            Some(serde_json::json!(32))
        );
        assert!(config.get_path("relay.nope").is_none());
    }

    #[test]
    fn test_logging_config_defaults() {
        let config = Config::from_json5(r#"{ "logging": {} }"#).unwrap();
        let logging = config.logging.expect("logging should be present");
        assert_eq!(logging.format, "plain");
        assert!(logging.level.is_none());
        assert_eq!(logging.output, "stderr");
        assert!(logging.filters.is_empty());
    }

    #[test]
    fn test_validate_rejects_zero_capacity_and_port() {
        let config = Config::from_json5(
            r#"{ gateway: { port: 0 }, relay: { queue_capacity: 0 } }"#,
        )
        .unwrap();
        let (_warnings, errors) = config.validate();
        assert!(errors.iter().any(|e| e.contains("port")));
        assert!(errors.iter().any(|e| e.contains("queue_capacity")));
    }

    #[test]
    fn test_validate_unknown_provider_and_log_format() {
        let config = Config::from_json5(
            r#"{ transcription: { provider: "whisper", api_key: "k" }, logging: { format: "xml" } }"#,
        )
        .unwrap();
        let (warnings, errors) = config.validate();
        assert!(warnings.is_empty(), "unexpected warnings: {warnings:?}");
        assert!(errors.iter().any(|e| e.contains("whisper")));
        assert!(errors.iter().any(|e| e.contains("xml")));
    }

    #[test]
    fn test_validate_missing_api_key_warns() {
        let config = Config::from_json5(
            r#"{ transcription: { api_key_env: "NONEXISTENT_CS_KEY_VAR" } }"#,
        )
        .unwrap();
        let (warnings, errors) = config.validate();
        assert!(errors.is_empty(), "unexpected errors: {errors:?}");
        assert!(
            warnings.iter().any(|w| w.contains("deepgram") && w.contains("API key")),
            "Expected a warning about the missing API key, got: {warnings:?}"
        );
    }
}
