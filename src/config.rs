use crate::upload::{
    Credentials, PollSettings, RetryPolicy, TimestampUnit, DEFAULT_BASE_URL,
    DEFAULT_INTERVAL_MINUTES, DEFAULT_MAX_ATTEMPTS, DEFAULT_TIMEOUT,
};
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;
use tracing::debug;

pub const APP_KEY_VAR: &str = "COOHOM_APP_KEY";
pub const APP_SECRET_VAR: &str = "COOHOM_APP_SECRET";
pub const BASE_URL_VAR: &str = "COOHOM_BASE_URL";
pub const TIMEOUT_VAR: &str = "COOHOM_TIMEOUT_SECS";
pub const TIMESTAMP_UNIT_VAR: &str = "COOHOM_TIMESTAMP_UNIT";
pub const POLL_MAX_ATTEMPTS_VAR: &str = "COOHOM_POLL_MAX_ATTEMPTS";
pub const POLL_INTERVAL_VAR: &str = "COOHOM_POLL_INTERVAL_MINUTES";
pub const AUTO_POLL_VAR: &str = "COOHOM_AUTO_POLL";

/// Upper bound for the poll interval, one day.
pub const MAX_POLL_INTERVAL_MINUTES: u64 = 24 * 60;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{var}: invalid value '{value}': {reason}")]
    Invalid {
        var: &'static str,
        value: String,
        reason: String,
    },
}

/// Runtime settings. Credentials may be empty; the UI asks for them.
#[derive(Debug, Clone)]
pub struct Config {
    pub credentials: Credentials,
    pub base_url: String,
    pub timeout: Duration,
    pub timestamp_unit: TimestampUnit,
    pub retry: RetryPolicy,
    pub poll: PollSettings,
    pub auto_poll: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            credentials: Credentials::default(),
            base_url: DEFAULT_BASE_URL.to_string(),
            timeout: DEFAULT_TIMEOUT,
            timestamp_unit: TimestampUnit::default(),
            retry: RetryPolicy::default(),
            poll: PollSettings::default(),
            auto_poll: true,
        }
    }
}

impl Config {
    /// Reads the process environment, after loading `.env` if one exists.
    pub fn from_env() -> Result<Self, ConfigError> {
        if let Ok(path) = dotenv::dotenv() {
            debug!(path = %path.display(), "Loaded .env file");
        }
        Self::from_lookup(|var| std::env::var(var).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |var: &str| {
            lookup(var)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };

        let defaults = Config::default();
        let credentials = Credentials::new(
            get(APP_KEY_VAR).unwrap_or_default(),
            get(APP_SECRET_VAR).unwrap_or_default(),
        );
        let base_url = get(BASE_URL_VAR)
            .map(|url| url.trim_end_matches('/').to_string())
            .unwrap_or(defaults.base_url);

        let timeout = match get(TIMEOUT_VAR) {
            Some(raw) => Duration::from_secs(positive(TIMEOUT_VAR, &raw)?),
            None => defaults.timeout,
        };
        let timestamp_unit = match get(TIMESTAMP_UNIT_VAR) {
            Some(raw) => TimestampUnit::from_str(&raw).map_err(|reason| ConfigError::Invalid {
                var: TIMESTAMP_UNIT_VAR,
                value: raw.clone(),
                reason,
            })?,
            None => defaults.timestamp_unit,
        };
        let max_attempts = match get(POLL_MAX_ATTEMPTS_VAR) {
            Some(raw) => u32::try_from(positive(POLL_MAX_ATTEMPTS_VAR, &raw)?).map_err(|e| {
                ConfigError::Invalid {
                    var: POLL_MAX_ATTEMPTS_VAR,
                    value: raw.clone(),
                    reason: e.to_string(),
                }
            })?,
            None => DEFAULT_MAX_ATTEMPTS,
        };
        let interval_minutes = match get(POLL_INTERVAL_VAR) {
            Some(raw) => {
                let minutes = number(POLL_INTERVAL_VAR, &raw)?;
                if minutes > MAX_POLL_INTERVAL_MINUTES {
                    return Err(ConfigError::Invalid {
                        var: POLL_INTERVAL_VAR,
                        value: raw,
                        reason: format!("must be at most {} minutes", MAX_POLL_INTERVAL_MINUTES),
                    });
                }
                minutes
            }
            None => DEFAULT_INTERVAL_MINUTES,
        };
        let auto_poll = match get(AUTO_POLL_VAR) {
            Some(raw) => flag(AUTO_POLL_VAR, &raw)?,
            None => defaults.auto_poll,
        };

        Ok(Self {
            credentials,
            base_url,
            timeout,
            timestamp_unit,
            retry: defaults.retry,
            poll: PollSettings::from_minutes(max_attempts, interval_minutes),
            auto_poll,
        })
    }
}

fn number(var: &'static str, raw: &str) -> Result<u64, ConfigError> {
    raw.parse::<u64>().map_err(|e| ConfigError::Invalid {
        var,
        value: raw.to_string(),
        reason: e.to_string(),
    })
}

fn positive(var: &'static str, raw: &str) -> Result<u64, ConfigError> {
    match number(var, raw)? {
        0 => Err(ConfigError::Invalid {
            var,
            value: raw.to_string(),
            reason: "must be greater than zero".to_string(),
        }),
        n => Ok(n),
    }
}

fn flag(var: &'static str, raw: &str) -> Result<bool, ConfigError> {
    match raw.to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(ConfigError::Invalid {
            var,
            value: raw.to_string(),
            reason: "expected true or false".to_string(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn load(vars: &[(&str, &str)]) -> Result<Config, ConfigError> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Config::from_lookup(|var| vars.get(var).cloned())
    }

    #[test]
    fn empty_environment_gives_defaults() {
        let config = load(&[]).unwrap();
        assert_eq!(config.base_url, "https://api.coohom.com");
        assert_eq!(config.timeout, Duration::from_secs(30));
        assert_eq!(config.timestamp_unit, TimestampUnit::Millis);
        assert_eq!(config.poll.max_attempts, 5);
        assert_eq!(config.poll.interval, Duration::from_secs(120));
        assert!(config.auto_poll);
        assert!(!config.credentials.is_complete());
    }

    #[test]
    fn reads_every_variable() {
        let config = load(&[
            (APP_KEY_VAR, "key"),
            (APP_SECRET_VAR, "secret"),
            (BASE_URL_VAR, "http://localhost:8080/"),
            (TIMEOUT_VAR, "5"),
            (TIMESTAMP_UNIT_VAR, "seconds"),
            (POLL_MAX_ATTEMPTS_VAR, "3"),
            (POLL_INTERVAL_VAR, "0"),
            (AUTO_POLL_VAR, "false"),
        ])
        .unwrap();

        assert!(config.credentials.is_complete());
        assert_eq!(config.base_url, "http://localhost:8080");
        assert_eq!(config.timeout, Duration::from_secs(5));
        assert_eq!(config.timestamp_unit, TimestampUnit::Seconds);
        assert_eq!(config.poll.max_attempts, 3);
        assert_eq!(config.poll.interval, Duration::ZERO);
        assert!(!config.auto_poll);
    }

    #[test]
    fn invalid_value_names_the_variable() {
        let err = load(&[(TIMEOUT_VAR, "soon")]).unwrap_err();
        assert!(err.to_string().starts_with("COOHOM_TIMEOUT_SECS"));

        let err = load(&[(POLL_MAX_ATTEMPTS_VAR, "0")]).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { var: POLL_MAX_ATTEMPTS_VAR, .. }));

        let err = load(&[(POLL_INTERVAL_VAR, "3074457345618258603")]).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { var: POLL_INTERVAL_VAR, .. }));

        let err = load(&[(AUTO_POLL_VAR, "maybe")]).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { var: AUTO_POLL_VAR, .. }));
    }

    #[test]
    fn debug_output_hides_secret() {
        let config = load(&[(APP_KEY_VAR, "key"), (APP_SECRET_VAR, "top-secret")]).unwrap();
        assert!(!format!("{:?}", config).contains("top-secret"));
    }
}
