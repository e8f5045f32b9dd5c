use super::{AppConfig, ConfigError};

/// Validate the full application config, returning an error if any rule is violated.
///
/// # Errors
///
/// Returns [`ConfigError::Validation`] when any configuration invariant is violated.
pub fn validate_config(config: &AppConfig) -> Result<(), ConfigError> {
    validate_timeouts(config)?;
    validate_asset_base_url(config)?;
    validate_log_level(config)?;
    Ok(())
}

fn validation_err(msg: impl Into<String>) -> ConfigError {
    ConfigError::Validation(msg.into())
}

fn validate_timeouts(config: &AppConfig) -> Result<(), ConfigError> {
    let transcode = &config.transcode;
    let checks = [
        ("transcode.first_response_timeout", transcode.first_response_timeout),
        ("transcode.stream_idle_timeout", transcode.stream_idle_timeout),
        ("transcode.total_timeout", transcode.total_timeout),
    ];
    for (field, value) in checks {
        if !value.is_finite() || value < 0.0 {
            return Err(validation_err(format!(
                "{field} must be a finite, non-negative number of seconds"
            )));
        }
    }
    if transcode.first_response_timeout == 0.0 {
        return Err(validation_err(
            "transcode.first_response_timeout must be greater than 0",
        ));
    }
    if transcode.stream_idle_timeout == 0.0 {
        return Err(validation_err(
            "transcode.stream_idle_timeout must be greater than 0",
        ));
    }
    Ok(())
}

fn validate_asset_base_url(config: &AppConfig) -> Result<(), ConfigError> {
    let Some(base) = config.transcode.asset_base_url.as_deref().map(str::trim) else {
        return Ok(());
    };
    if base.is_empty() {
        return Ok(());
    }
    let parsed = url::Url::parse(base).map_err(|err| {
        validation_err(format!(
            "transcode.asset_base_url is not a valid URL: {err}"
        ))
    })?;
    if !matches!(parsed.scheme(), "http" | "https") {
        return Err(validation_err(
            "transcode.asset_base_url must use http:// or https://",
        ));
    }
    Ok(())
}

const VALID_LOG_LEVELS: &[&str] = &["DEBUG", "INFO", "WARNING", "ERROR", "CRITICAL", "DISABLED"];

fn validate_log_level(config: &AppConfig) -> Result<(), ConfigError> {
    let level = config.features.log_level.to_uppercase();
    if !VALID_LOG_LEVELS.contains(&level.as_str()) {
        return Err(validation_err(format!(
            "log_level must be one of: {}",
            VALID_LOG_LEVELS.join(", ")
        )));
    }
    Ok(())
}
