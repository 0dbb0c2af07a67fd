use crate::error::AgentError;

/// Immutable runtime parameters, validated at construction.
///
/// Built either explicitly via [`Config::new`] or from the process
/// environment via [`Config::from_env`]; both paths funnel through
/// [`Config::validate`] before a `Config` can exist.
#[derive(Debug, Clone)]
pub struct Config {
    pub api_key: String,
    pub backend_url: String,
    pub environment: String,
    pub application_name: Option<String>,
    pub sampling_rate: f64,
    pub max_variable_depth: u32,
    pub debug: bool,
    pub enable_breakpoints: bool,
    pub heartbeat_interval_ms: u64,
    pub max_reconnect_attempts: u32,
}

const DEFAULT_BACKEND_URL: &str = "wss://api.aivory.net/ws/monitor/agent";
const DEFAULT_ENVIRONMENT: &str = "production";
const DEFAULT_SAMPLING_RATE: f64 = 1.0;
const DEFAULT_MAX_DEPTH: u32 = 10;
const DEFAULT_HEARTBEAT_INTERVAL_MS: u64 = 60_000;
const DEFAULT_MAX_RECONNECT_ATTEMPTS: u32 = 10;

impl Config {
    /// Builds a config with every field at its documented default except
    /// the required API key and backend URL, then validates it.
    pub fn new(api_key: impl Into<String>, backend_url: impl Into<String>) -> Result<Self, AgentError> {
        let config = Self {
            api_key: api_key.into(),
            backend_url: backend_url.into(),
            environment: DEFAULT_ENVIRONMENT.to_string(),
            application_name: None,
            sampling_rate: DEFAULT_SAMPLING_RATE,
            max_variable_depth: DEFAULT_MAX_DEPTH,
            debug: false,
            enable_breakpoints: true,
            heartbeat_interval_ms: DEFAULT_HEARTBEAT_INTERVAL_MS,
            max_reconnect_attempts: DEFAULT_MAX_RECONNECT_ATTEMPTS,
        };
        config.validate()?;
        Ok(config)
    }

    /// Reads the `AIVORY_*` environment table, applying defaults for
    /// anything unset or unparseable, then validates.
    pub fn from_env() -> Result<Self, AgentError> {
        let api_key = std::env::var("AIVORY_API_KEY").unwrap_or_default();
        let backend_url = std::env::var("AIVORY_BACKEND_URL").unwrap_or_else(|_| DEFAULT_BACKEND_URL.to_string());
        let environment = std::env::var("AIVORY_ENVIRONMENT").unwrap_or_else(|_| DEFAULT_ENVIRONMENT.to_string());
        let application_name = std::env::var("AIVORY_APP_NAME").ok();
        let sampling_rate = std::env::var("AIVORY_SAMPLING_RATE")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(DEFAULT_SAMPLING_RATE);
        let max_variable_depth = std::env::var("AIVORY_MAX_DEPTH")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(DEFAULT_MAX_DEPTH);
        let debug = std::env::var("AIVORY_DEBUG")
            .ok()
            .map(|v| v == "1" || v.eq_ignore_ascii_case("true"))
            .unwrap_or(false);
        let enable_breakpoints = std::env::var("AIVORY_ENABLE_BREAKPOINTS")
            .ok()
            .map(|v| !(v == "0" || v.eq_ignore_ascii_case("false")))
            .unwrap_or(true);
        let heartbeat_interval_ms = std::env::var("AIVORY_HEARTBEAT_INTERVAL_MS")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(DEFAULT_HEARTBEAT_INTERVAL_MS);
        let max_reconnect_attempts = std::env::var("AIVORY_MAX_RECONNECT_ATTEMPTS")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(DEFAULT_MAX_RECONNECT_ATTEMPTS);

        let config = Self {
            api_key,
            backend_url,
            environment,
            application_name,
            sampling_rate,
            max_variable_depth,
            debug,
            enable_breakpoints,
            heartbeat_interval_ms,
            max_reconnect_attempts,
        };
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), AgentError> {
        if self.api_key.is_empty() {
            return Err(AgentError::ConfigInvalid {
                reason: "api_key must not be empty".to_string(),
            });
        }
        if !(0.0..=1.0).contains(&self.sampling_rate) {
            return Err(AgentError::ConfigInvalid {
                reason: format!("sampling_rate {} must be within [0,1]", self.sampling_rate),
            });
        }
        if self.max_variable_depth > 10 {
            return Err(AgentError::ConfigInvalid {
                reason: format!("max_variable_depth {} must be within [0,10]", self.max_variable_depth),
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_empty_api_key() {
        let err = Config::new("", "wss://x").unwrap_err();
        assert!(matches!(err, AgentError::ConfigInvalid { .. }));
    }

    #[test]
    fn rejects_out_of_range_sampling_rate() {
        let mut config = Config::new("k", "wss://x").unwrap();
        config.sampling_rate = 1.5;
        assert!(config.validate().is_err());
    }

    #[test]
    fn rejects_depth_over_ten() {
        let mut config = Config::new("k", "wss://x").unwrap();
        config.max_variable_depth = 11;
        assert!(config.validate().is_err());
    }

    #[test]
    fn defaults_are_applied() {
        let config = Config::new("k", "wss://x").unwrap();
        assert_eq!(config.environment, "production");
        assert_eq!(config.max_variable_depth, 10);
        assert_eq!(config.sampling_rate, 1.0);
        assert_eq!(config.max_reconnect_attempts, 10);
    }
}
