//! Configuration for renewal, draining and outbound encoding.

use crate::serializer::EncodeOptions;
use std::env;
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

/// Configuration error type
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to parse environment variable '{key}': {details}")]
    ParseError { key: String, details: String },
}

/// Application environment, selects the log format.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Environment {
    Development,
    Production,
}

impl Environment {
    /// Read `APP_ENV`. Anything but `production` (any case) is development.
    pub fn from_env() -> Self {
        let app_env = env_or_default("APP_ENV", "development");

        if app_env.eq_ignore_ascii_case("production") {
            Environment::Production
        } else {
            Environment::Development
        }
    }

    pub fn is_production(&self) -> bool {
        matches!(self, Environment::Production)
    }
}

/// Configuration that can be loaded from environment variables
pub trait FromEnv: Sized {
    fn from_env() -> Result<Self, ConfigError>;
}

/// Load an environment variable, falling back to `default`
pub fn env_or_default(key: &str, default: &str) -> String {
    env::var(key).unwrap_or_else(|_| default.to_string())
}

/// Parse an environment variable, falling back to `default` when unset
pub fn env_parse<T>(key: &str, default: T) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match env::var(key) {
        Ok(raw) => raw.trim().parse().map_err(|e: T::Err| ConfigError::ParseError {
            key: key.to_string(),
            details: e.to_string(),
        }),
        Err(_) => Ok(default),
    }
}

/// Tuning knobs shared by the renewer, the drain loop, the listener and
/// outbound encoding.
#[derive(Debug, Clone, PartialEq)]
pub struct BrokeredConfig {
    /// Maximum messages per drain/listen receive
    pub batch_size: usize,

    /// How long a single drain receive waits for messages
    pub drain_wait: Duration,

    /// Lower bound for the wait between lock renewals
    pub min_renew_interval: Duration,

    /// Listener pause after a failed receive
    pub receive_error_backoff: Duration,

    /// Encode outbound payloads as JSON (otherwise binary)
    pub serialize_as_json: bool,

    /// Project payload attributes into outbound message properties
    pub project_properties: bool,
}

impl Default for BrokeredConfig {
    fn default() -> Self {
        Self {
            batch_size: 10,
            drain_wait: Duration::from_secs(1),
            min_renew_interval: Duration::from_millis(100),
            receive_error_backoff: Duration::from_secs(1),
            serialize_as_json: true,
            project_properties: false,
        }
    }
}

impl BrokeredConfig {
    /// Set the receive batch size.
    pub fn with_batch_size(mut self, size: usize) -> Self {
        self.batch_size = size;
        self
    }

    /// Set the drain receive wait.
    pub fn with_drain_wait(mut self, wait: Duration) -> Self {
        self.drain_wait = wait;
        self
    }

    /// Set the minimum renewal interval.
    pub fn with_min_renew_interval(mut self, interval: Duration) -> Self {
        self.min_renew_interval = interval;
        self
    }

    /// Set the listener pause after a failed receive.
    pub fn with_receive_error_backoff(mut self, backoff: Duration) -> Self {
        self.receive_error_backoff = backoff;
        self
    }

    /// Choose JSON or binary outbound encoding.
    pub fn with_json(mut self, as_json: bool) -> Self {
        self.serialize_as_json = as_json;
        self
    }

    /// Enable property projection on outbound messages.
    pub fn with_property_projection(mut self, enabled: bool) -> Self {
        self.project_properties = enabled;
        self
    }

    /// Encode options derived from this configuration.
    pub fn encode_options(&self) -> EncodeOptions {
        EncodeOptions {
            as_json: self.serialize_as_json,
            project_properties: self.project_properties,
        }
    }
}

impl FromEnv for BrokeredConfig {
    /// All variables are optional:
    /// - `BROKERED_BATCH_SIZE` (default 10)
    /// - `BROKERED_DRAIN_WAIT_MS` (default 1000)
    /// - `BROKERED_MIN_RENEW_INTERVAL_MS` (default 100)
    /// - `BROKERED_RECEIVE_ERROR_BACKOFF_MS` (default 1000)
    /// - `BROKERED_SERIALIZE_AS_JSON` (default true)
    /// - `BROKERED_PROJECT_PROPERTIES` (default false)
    fn from_env() -> Result<Self, ConfigError> {
        let defaults = Self::default();

        Ok(Self {
            batch_size: env_parse("BROKERED_BATCH_SIZE", defaults.batch_size)?,
            drain_wait: Duration::from_millis(env_parse("BROKERED_DRAIN_WAIT_MS", 1000u64)?),
            min_renew_interval: Duration::from_millis(env_parse(
                "BROKERED_MIN_RENEW_INTERVAL_MS",
                100u64,
            )?),
            receive_error_backoff: Duration::from_millis(env_parse(
                "BROKERED_RECEIVE_ERROR_BACKOFF_MS",
                1000u64,
            )?),
            serialize_as_json: env_parse(
                "BROKERED_SERIALIZE_AS_JSON",
                defaults.serialize_as_json,
            )?,
            project_properties: env_parse(
                "BROKERED_PROJECT_PROPERTIES",
                defaults.project_properties,
            )?,
        })
    }
}
