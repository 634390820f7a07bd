//! Configuration management for the insights pipeline.
//!
//! Configuration is sourced entirely from environment variables;
//! there is no file layer. `Config::load` reads the process environment
//! once at startup and validates required fields eagerly so a
//! misconfigured deployment fails at boot rather than on first request.

use crate::error::ConfigError;
use std::env;

/// Top-level configuration for the insights pipeline.
#[derive(Debug, Clone)]
pub struct Config {
    /// SQLite connection string (required).
    pub database_url: String,

    /// LLM provider API key (required).
    pub llm_api_key: String,

    /// LLM model identifier, e.g. `gpt-4o-mini`.
    pub llm_model: String,

    /// Base URL for the OpenAI-compatible chat completions endpoint.
    pub llm_base_url: String,

    /// Requests-per-minute budget for the rate limiter (C6).
    pub llm_rpm: u32,

    /// Tokens-per-minute budget for the rate limiter, if configured (C6).
    pub llm_tpm: Option<u32>,

    /// Maximum number of items the work queue holds before backpressure (C2).
    pub max_queue_depth: usize,

    /// Minimum distinct messages a thread must have to skip the pre-filter (C4).
    pub pre_filter_min_messages: usize,

    /// Minimum combined character count a thread must have to skip the pre-filter (C4).
    pub pre_filter_min_total_chars: usize,

    /// Consecutive LLM failures before the circuit breaker opens (C7).
    pub circuit_failure_threshold: u32,

    /// Seconds the breaker stays open before allowing a trial request (C7).
    pub circuit_cooldown_seconds: u64,

    /// Seconds the analyzer is given to drain the queue on shutdown.
    pub shutdown_grace_seconds: u64,

    /// Seconds between periodic sweeps for conversations stuck without
    /// an insight.
    pub sweep_interval_seconds: u64,
}

impl Config {
    /// Loads configuration from the process environment.
    ///
    /// `DATABASE_URL` and `LLM_API_KEY` are required; all other fields fall
    /// back to their documented defaults.
    pub fn load() -> Result<Config, ConfigError> {
        let database_url = require_env("DATABASE_URL")?;
        let llm_api_key = require_env("LLM_API_KEY")?;

        Ok(Config {
            database_url,
            llm_api_key,
            llm_model: env::var("LLM_MODEL").unwrap_or_else(|_| "gpt-4o-mini".to_string()),
            llm_base_url: env::var("LLM_BASE_URL")
                .unwrap_or_else(|_| "https://api.openai.com/v1".to_string()),
            llm_rpm: parse_env_or("LLM_RPM", 60)?,
            llm_tpm: parse_env_opt("LLM_TPM")?,
            max_queue_depth: parse_env_or("MAX_QUEUE_DEPTH", 1000)?,
            pre_filter_min_messages: parse_env_or("PRE_FILTER_MIN_MESSAGES", 2)?,
            pre_filter_min_total_chars: parse_env_or("PRE_FILTER_MIN_TOTAL_CHARS", 40)?,
            circuit_failure_threshold: parse_env_or("CIRCUIT_FAILURE_THRESHOLD", 5)?,
            circuit_cooldown_seconds: parse_env_or("CIRCUIT_COOLDOWN_SECONDS", 60)?,
            shutdown_grace_seconds: parse_env_or("SHUTDOWN_GRACE_SECONDS", 30)?,
            sweep_interval_seconds: parse_env_or("SWEEP_INTERVAL_SECONDS", 300)?,
        })
    }
}

fn require_env(name: &str) -> Result<String, ConfigError> {
    env::var(name).map_err(|_| ConfigError::MissingField {
        field: name.to_string(),
    })
}

fn parse_env_or<T>(name: &str, default: T) -> Result<T, ConfigError>
where
    T: std::str::FromStr,
{
    match env::var(name) {
        Ok(val) => val.parse::<T>().map_err(|_| ConfigError::InvalidValue {
            field: name.to_string(),
            message: format!("'{val}' is not a valid value for {name}"),
        }),
        Err(_) => Ok(default),
    }
}

fn parse_env_opt<T>(name: &str) -> Result<Option<T>, ConfigError>
where
    T: std::str::FromStr,
{
    match env::var(name) {
        Ok(val) => val
            .parse::<T>()
            .map(Some)
            .map_err(|_| ConfigError::InvalidValue {
                field: name.to_string(),
                message: format!("'{val}' is not a valid value for {name}"),
            }),
        Err(_) => Ok(None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    // Environment variables are process-global; serialize tests that touch them.
    static ENV_LOCK: Mutex<()> = Mutex::new(());

    fn clear_all() {
        for var in [
            "DATABASE_URL",
            "LLM_API_KEY",
            "LLM_MODEL",
            "LLM_BASE_URL",
            "LLM_RPM",
            "LLM_TPM",
            "MAX_QUEUE_DEPTH",
            "PRE_FILTER_MIN_MESSAGES",
            "PRE_FILTER_MIN_TOTAL_CHARS",
            "CIRCUIT_FAILURE_THRESHOLD",
            "CIRCUIT_COOLDOWN_SECONDS",
            "SHUTDOWN_GRACE_SECONDS",
            "SWEEP_INTERVAL_SECONDS",
        ] {
            env::remove_var(var);
        }
    }

    #[test]
    fn missing_database_url_is_an_error() {
        let _guard = ENV_LOCK.lock().unwrap();
        clear_all();
        env::set_var("LLM_API_KEY", "k");
        let err = Config::load().unwrap_err();
        assert!(matches!(err, ConfigError::MissingField { field } if field == "DATABASE_URL"));
        clear_all();
    }

    #[test]
    fn missing_llm_api_key_is_an_error() {
        let _guard = ENV_LOCK.lock().unwrap();
        clear_all();
        env::set_var("DATABASE_URL", "sqlite::memory:");
        let err = Config::load().unwrap_err();
        assert!(matches!(err, ConfigError::MissingField { field } if field == "LLM_API_KEY"));
        clear_all();
    }

    #[test]
    fn defaults_apply_when_optional_vars_absent() {
        let _guard = ENV_LOCK.lock().unwrap();
        clear_all();
        env::set_var("DATABASE_URL", "sqlite::memory:");
        env::set_var("LLM_API_KEY", "k");
        let config = Config::load().unwrap();
        assert_eq!(config.llm_model, "gpt-4o-mini");
        assert_eq!(config.max_queue_depth, 1000);
        assert_eq!(config.pre_filter_min_messages, 2);
        assert_eq!(config.pre_filter_min_total_chars, 40);
        assert_eq!(config.circuit_failure_threshold, 5);
        assert_eq!(config.circuit_cooldown_seconds, 60);
        assert_eq!(config.sweep_interval_seconds, 300);
        assert_eq!(config.llm_tpm, None);
        clear_all();
    }

    #[test]
    fn invalid_numeric_override_is_an_error() {
        let _guard = ENV_LOCK.lock().unwrap();
        clear_all();
        env::set_var("DATABASE_URL", "sqlite::memory:");
        env::set_var("LLM_API_KEY", "k");
        env::set_var("MAX_QUEUE_DEPTH", "not-a-number");
        let err = Config::load().unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { field, .. } if field == "MAX_QUEUE_DEPTH"));
        clear_all();
    }

    #[test]
    fn tpm_parses_when_present() {
        let _guard = ENV_LOCK.lock().unwrap();
        clear_all();
        env::set_var("DATABASE_URL", "sqlite::memory:");
        env::set_var("LLM_API_KEY", "k");
        env::set_var("LLM_TPM", "40000");
        let config = Config::load().unwrap();
        assert_eq!(config.llm_tpm, Some(40000));
        clear_all();
    }
}
