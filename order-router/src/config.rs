//! Router configuration

use std::fmt::Display;
use std::str::FromStr;
use std::time::Duration;

use thiserror::Error;

use crate::probe::ProbeSettings;
use crate::retry::RetryPolicy;
use crate::upstream::{UpstreamDescriptor, UpstreamSpecError};

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("{key} must be set in {environment} environment")]
    Missing {
        key: &'static str,
        environment: String,
    },

    #[error("invalid {key}='{value}': {reason}")]
    Invalid {
        key: &'static str,
        value: String,
        reason: String,
    },

    #[error("UPSTREAMS: {0}")]
    Upstreams(#[from] UpstreamSpecError),
}

/// Router configuration
#[derive(Debug, Clone)]
pub struct RouterConfig {
    /// Public listener port
    pub port: u16,
    /// Environment: development | staging | production
    pub environment: String,
    /// Fixed instance set
    pub upstreams: Vec<UpstreamDescriptor>,
    pub probe: ProbeSettings,
    pub retry: RetryPolicy,
}

/// Parse `key` when set. `min` bounds the accepted value from below.
fn parse_var<T>(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &'static str,
    min: T,
) -> Result<Option<T>, ConfigError>
where
    T: FromStr + PartialOrd + Display,
    T::Err: Display,
{
    let Some(raw) = lookup(key) else {
        return Ok(None);
    };
    let invalid = |reason: String| ConfigError::Invalid {
        key,
        value: raw.clone(),
        reason,
    };
    let value: T = raw.trim().parse().map_err(|e: T::Err| invalid(e.to_string()))?;
    if value < min {
        return Err(invalid(format!("must be at least {min}")));
    }
    Ok(Some(value))
}

impl RouterConfig {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Defaults, overridden by whatever `lookup` returns per key
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let environment = lookup("ENVIRONMENT").unwrap_or_else(|| "development".into());

        let upstreams = match lookup("UPSTREAMS") {
            Some(spec) => UpstreamDescriptor::parse_list(&spec)?,
            None if environment == "development" => {
                UpstreamDescriptor::parse_list("http://127.0.0.1:5000")?
            }
            None => {
                return Err(ConfigError::Missing {
                    key: "UPSTREAMS",
                    environment,
                });
            }
        };

        let probe_defaults = ProbeSettings::default();
        let probe = ProbeSettings {
            interval: parse_var(&lookup, "PROBE_INTERVAL_SECS", 1)?
                .map(Duration::from_secs)
                .unwrap_or(probe_defaults.interval),
            timeout: parse_var(&lookup, "PROBE_TIMEOUT_SECS", 1)?
                .map(Duration::from_secs)
                .unwrap_or(probe_defaults.timeout),
            unhealthy_threshold: parse_var(&lookup, "UNHEALTHY_THRESHOLD", 1)?
                .unwrap_or(probe_defaults.unhealthy_threshold),
        };

        let defaults = RetryPolicy::default();
        let max_attempts =
            parse_var(&lookup, "RETRY_MAX_ATTEMPTS", 1)?.unwrap_or(defaults.max_attempts);
        let retry = RetryPolicy::new(max_attempts)
            .with_backoff(
                parse_var(&lookup, "RETRY_BACKOFF_MS", 0)?
                    .map(Duration::from_millis)
                    .unwrap_or(defaults.base_delay),
                defaults.multiplier,
                defaults.max_delay,
            )
            .with_attempt_timeout(
                parse_var(&lookup, "ATTEMPT_TIMEOUT_SECS", 1)?
                    .map(Duration::from_secs)
                    .unwrap_or(defaults.attempt_timeout),
            );

        Ok(Self {
            port: parse_var(&lookup, "ROUTER_PORT", 0)?.unwrap_or(8080),
            environment,
            upstreams,
            probe,
            retry,
        })
    }
}
