//! Runtime configuration resolved from the environment.

use std::time::Duration;

use strum::{Display, EnumString};

use crate::error::{Error, Result};
use crate::heartbeat::NotifierConfig;
use crate::supervisor::{FleetConfig, SupervisorConfig};

pub const ENV_PING_INTERVAL: &str = "PING_INTERVAL";
pub const ENV_PING_RETRIES: &str = "PING_RETRIES";
pub const ENV_PING_RETRY_DELAY: &str = "PING_RETRY_DELAY";
pub const ENV_PING_TIMEOUT: &str = "PING_TIMEOUT";
pub const ENV_LOG_LEVEL: &str = "LOG_LEVEL";
pub const ENV_DOCKER_PATH: &str = "DOCKER_PATH";
pub const ENV_HEALTHCHECKS_LABEL: &str = "HEALTHCHECKS_LABEL";
pub const ENV_SHUTDOWN_TIMEOUT: &str = "SHUTDOWN_TIMEOUT";
pub const ENV_FETCH_INTERVAL: &str = "FETCH_INTERVAL";
pub const ENV_FETCH_TIMEOUT: &str = "FETCH_TIMEOUT";

/// Upper bound for settings given in seconds (one year).
const MAX_SECONDS: u64 = 365 * 24 * 60 * 60;

/// Log verbosity accepted in `LOG_LEVEL`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Display, EnumString)]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
pub enum LogLevel {
    Trace,
    Debug,
    #[default]
    Info,
    #[strum(to_string = "warn", serialize = "warning")]
    Warn,
    Error,
}

/// Application configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    pub ping_interval: Duration,
    /// Attempts per heartbeat, at least 1.
    pub ping_retries: u32,
    pub ping_retry_delay: Duration,
    /// Per-attempt HTTP timeout.
    pub ping_timeout: Duration,
    pub log_level: LogLevel,
    pub docker_path: String,
    pub label: String,
    pub shutdown_timeout: Duration,
    /// Period of the full container listing.
    pub fetch_interval: Duration,
    /// Limit for a single state query or listing.
    pub fetch_timeout: Duration,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            ping_interval: Duration::from_secs(10),
            ping_retries: 3,
            ping_retry_delay: Duration::from_secs(2),
            ping_timeout: Duration::from_secs(10),
            log_level: LogLevel::Info,
            docker_path: "docker".to_string(),
            label: crate::supervisor::DEFAULT_LABEL.to_string(),
            shutdown_timeout: crate::supervisor::DEFAULT_SHUTDOWN_TIMEOUT,
            fetch_interval: crate::supervisor::DEFAULT_FETCH_INTERVAL,
            fetch_timeout: crate::runtime::DEFAULT_COMMAND_TIMEOUT,
        }
    }
}

impl Config {
    /// Load configuration from the process environment.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load configuration through `lookup`. Unset and blank values fall back
    /// to the defaults.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| {
            lookup(key)
                .map(|value| value.trim().to_string())
                .filter(|value| !value.is_empty())
        };
        let defaults = Self::default();

        let seconds = |key: &str, default: Duration| -> Result<Duration> {
            match get(key) {
                Some(value) => parse_positive(key, &value).map(Duration::from_secs),
                None => Ok(default),
            }
        };

        let ping_retries = match get(ENV_PING_RETRIES) {
            Some(value) => u32::try_from(parse_positive(ENV_PING_RETRIES, &value)?)
                .map_err(|_| Error::config(format!("{ENV_PING_RETRIES} is too large")))?,
            None => defaults.ping_retries,
        };

        let log_level = match get(ENV_LOG_LEVEL) {
            Some(value) => value.parse::<LogLevel>().map_err(|_| {
                Error::config(format!("{ENV_LOG_LEVEL} has an unknown level '{value}'"))
            })?,
            None => defaults.log_level,
        };

        Ok(Self {
            ping_interval: seconds(ENV_PING_INTERVAL, defaults.ping_interval)?,
            ping_retries,
            ping_retry_delay: seconds(ENV_PING_RETRY_DELAY, defaults.ping_retry_delay)?,
            ping_timeout: seconds(ENV_PING_TIMEOUT, defaults.ping_timeout)?,
            log_level,
            docker_path: get(ENV_DOCKER_PATH).unwrap_or(defaults.docker_path),
            label: get(ENV_HEALTHCHECKS_LABEL).unwrap_or(defaults.label),
            shutdown_timeout: seconds(ENV_SHUTDOWN_TIMEOUT, defaults.shutdown_timeout)?,
            fetch_interval: seconds(ENV_FETCH_INTERVAL, defaults.fetch_interval)?,
            fetch_timeout: seconds(ENV_FETCH_TIMEOUT, defaults.fetch_timeout)?,
        })
    }

    pub fn notifier_config(&self) -> NotifierConfig {
        NotifierConfig {
            max_retries: self.ping_retries,
            retry_delay: self.ping_retry_delay,
        }
    }

    pub fn fleet_config(&self) -> FleetConfig {
        FleetConfig {
            label: self.label.clone(),
            shutdown_timeout: self.shutdown_timeout,
            fetch_interval: self.fetch_interval,
            supervisor: SupervisorConfig {
                ping_interval: self.ping_interval,
                ..SupervisorConfig::default()
            },
        }
    }
}

fn parse_positive(key: &str, value: &str) -> Result<u64> {
    match value.parse::<u64>() {
        Ok(0) => Err(Error::config(format!("{key} must be greater than zero"))),
        Ok(parsed) if parsed > MAX_SECONDS => Err(Error::config(format!(
            "{key} must be at most {MAX_SECONDS}, got {parsed}"
        ))),
        Ok(parsed) => Ok(parsed),
        Err(_) => Err(Error::config(format!(
            "{key} must be a whole number, got '{value}'"
        ))),
    }
}
