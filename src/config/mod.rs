pub mod validation;

use serde::{Deserialize, Serialize};
use std::time::Duration;

use self::validation::validate_config;

/// Error type for configuration loading and validation.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),
    #[error("Failed to parse YAML: {0}")]
    Yaml(#[from] serde_yaml::Error),
    #[error("Config validation error: {0}")]
    Validation(String),
}

/// Per-request transcoding settings, as persisted by the host application.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TranscodeConfig {
    /// Comma-separated substrings; any token containing one is dropped.
    #[serde(default)]
    pub filter_tags: String,
    #[serde(default)]
    pub thinking: bool,
    #[serde(default = "default_true")]
    pub show_tool_calls: bool,
    /// Seconds to wait for the first upstream record.
    #[serde(default = "default_first_response_timeout")]
    pub first_response_timeout: f64,
    /// Seconds allowed between two consecutive upstream records.
    #[serde(default = "default_stream_idle_timeout")]
    pub stream_idle_timeout: f64,
    /// Total seconds for the whole stream; `0` disables the cap.
    #[serde(default = "default_total_timeout")]
    pub total_timeout: f64,
    #[serde(default)]
    pub video_poster_preview: bool,
    #[serde(default)]
    pub asset_base_url: Option<String>,
    #[serde(default = "default_fallback_model")]
    pub fallback_model: String,
    #[serde(default)]
    pub trust_forwarded_headers: bool,
}

fn default_true() -> bool {
    true
}
fn default_first_response_timeout() -> f64 {
    30.0
}
fn default_stream_idle_timeout() -> f64 {
    120.0
}
fn default_total_timeout() -> f64 {
    600.0
}
fn default_fallback_model() -> String {
    "upstream-chat".to_string()
}

impl Default for TranscodeConfig {
    fn default() -> Self {
        Self {
            filter_tags: String::new(),
            thinking: false,
            show_tool_calls: true,
            first_response_timeout: default_first_response_timeout(),
            stream_idle_timeout: default_stream_idle_timeout(),
            total_timeout: default_total_timeout(),
            video_poster_preview: false,
            asset_base_url: None,
            fallback_model: default_fallback_model(),
            trust_forwarded_headers: false,
        }
    }
}

/// Feature flags and settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeaturesConfig {
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

fn default_log_level() -> String {
    "INFO".to_string()
}

impl Default for FeaturesConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
        }
    }
}

/// Top-level application configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub features: FeaturesConfig,
    #[serde(default)]
    pub transcode: TranscodeConfig,
}

/// Runtime view of [`TranscodeConfig`] consumed by the transcoder.
#[derive(Debug, Clone)]
pub struct TranscodeOptions {
    pub filter_tags: Vec<String>,
    pub show_thinking: bool,
    pub show_tool_calls: bool,
    pub first_record_timeout: Duration,
    pub idle_timeout: Duration,
    /// `None` when the total budget is disabled.
    pub total_timeout: Option<Duration>,
    pub video_poster_preview: bool,
    pub asset_base_url: Option<String>,
    pub fallback_model: String,
}

impl TranscodeOptions {
    #[must_use]
    pub fn from_config(config: &TranscodeConfig) -> Self {
        let filter_tags = config
            .filter_tags
            .split(',')
            .map(str::trim)
            .filter(|tag| !tag.is_empty())
            .map(str::to_owned)
            .collect();
        let asset_base_url = config
            .asset_base_url
            .as_deref()
            .map(str::trim)
            .filter(|url| !url.is_empty())
            .map(|url| url.trim_end_matches('/').to_owned());

        Self {
            filter_tags,
            show_thinking: config.thinking,
            show_tool_calls: config.show_tool_calls,
            first_record_timeout: secs_to_duration(config.first_response_timeout),
            idle_timeout: secs_to_duration(config.stream_idle_timeout),
            total_timeout: (config.total_timeout > 0.0)
                .then(|| secs_to_duration(config.total_timeout)),
            video_poster_preview: config.video_poster_preview,
            asset_base_url,
            fallback_model: config.fallback_model.clone(),
        }
    }
}

impl Default for TranscodeOptions {
    fn default() -> Self {
        Self::from_config(&TranscodeConfig::default())
    }
}

/// Seconds to a `Duration`, saturating at `Duration::MAX`. Negative and NaN
/// values map to zero.
fn secs_to_duration(secs: f64) -> Duration {
    if secs.is_nan() || secs <= 0.0 {
        return Duration::ZERO;
    }
    Duration::try_from_secs_f64(secs).unwrap_or(Duration::MAX)
}

/// Load configuration from a YAML file and validate it.
///
/// # Errors
///
/// Returns [`ConfigError::Io`] when reading the file fails, [`ConfigError::Yaml`]
/// when parsing fails, or [`ConfigError::Validation`] when semantic validation fails.
pub fn load_config(path: &str) -> Result<AppConfig, ConfigError> {
    let contents = std::fs::read_to_string(path)?;
    let config: AppConfig = serde_yaml::from_str(&contents)?;
    validate_config(&config)?;
    Ok(config)
}
