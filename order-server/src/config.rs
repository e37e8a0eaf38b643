//! Instance configuration

use std::fmt::Display;
use std::str::FromStr;

use thiserror::Error;

use crate::auth::TokenConfig;
use crate::quota::{PolicyError, QuotaPolicy};

/// Minimum JWT secret length outside development
const MIN_SECRET_LEN: usize = 32;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("{key} must be set in {environment} environment")]
    Missing {
        key: &'static str,
        environment: String,
    },

    #[error("{key} must be at least {MIN_SECRET_LEN} characters in {environment} environment")]
    SecretTooShort {
        key: &'static str,
        environment: String,
    },

    #[error("invalid {key}='{value}': {reason}")]
    Invalid {
        key: &'static str,
        value: String,
        reason: String,
    },

    #[error(transparent)]
    Quota(#[from] PolicyError),
}

/// Instance configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// HTTP port
    pub http_port: u16,
    /// Instance name reported by /api/health
    pub instance_id: String,
    /// Environment: development | staging | production
    pub environment: String,
    /// PostgreSQL connection URL; in-process stores when unset
    pub database_url: Option<String>,
    /// Session token settings
    pub token: TokenConfig,
    /// Quota tiers per route
    pub quota: QuotaPolicy,
    /// Interval of the expired-ledger-entry sweep (seconds)
    pub ledger_sweep_secs: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            http_port: 5000,
            instance_id: "order-server".to_string(),
            environment: "development".to_string(),
            database_url: None,
            token: TokenConfig::default(),
            quota: QuotaPolicy::default(),
            ledger_sweep_secs: 300,
        }
    }
}

/// Parse `key` when set. A present but malformed value is an error.
fn parse_var<T>(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &'static str,
) -> Result<Option<T>, ConfigError>
where
    T: FromStr,
    T::Err: Display,
{
    match lookup(key) {
        None => Ok(None),
        Some(raw) => raw
            .trim()
            .parse()
            .map(Some)
            .map_err(|e: T::Err| ConfigError::Invalid {
                key,
                value: raw.clone(),
                reason: e.to_string(),
            }),
    }
}

/// Like [`parse_var`], rejecting zero
fn parse_positive<T>(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &'static str,
) -> Result<Option<T>, ConfigError>
where
    T: FromStr + PartialOrd + Default + Display,
    T::Err: Display,
{
    match parse_var::<T>(lookup, key)? {
        Some(v) if v <= T::default() => Err(ConfigError::Invalid {
            key,
            value: v.to_string(),
            reason: "must be greater than 0".into(),
        }),
        v => Ok(v),
    }
}

impl Config {
    /// Require a secret: must be set and long enough in non-development environments.
    fn require_secret(
        lookup: &impl Fn(&str) -> Option<String>,
        key: &'static str,
        environment: &str,
    ) -> Result<String, ConfigError> {
        let val = match lookup(key) {
            Some(v) => v,
            None => {
                if environment != "development" {
                    return Err(ConfigError::Missing {
                        key,
                        environment: environment.to_string(),
                    });
                }
                format!("dev-{key}-not-for-production")
            }
        };
        if environment != "development" && val.len() < MIN_SECRET_LEN {
            return Err(ConfigError::SecretTooShort {
                key,
                environment: environment.to_string(),
            });
        }
        Ok(val)
    }

    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Defaults, overridden by whatever `lookup` returns per key
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let environment = lookup("ENVIRONMENT").unwrap_or_else(|| "development".into());
        let http_port = parse_var(&lookup, "HTTP_PORT")?.unwrap_or(5000);
        let defaults = TokenConfig::default();

        Ok(Self {
            http_port,
            instance_id: lookup("INSTANCE_ID")
                .or_else(|| lookup("HOSTNAME"))
                .unwrap_or_else(|| format!("order-server-{http_port}")),
            environment: environment.clone(),
            database_url: lookup("DATABASE_URL").filter(|s| !s.is_empty()),
            token: TokenConfig {
                secret: Self::require_secret(&lookup, "JWT_SECRET", &environment)?,
                issuer: lookup("JWT_ISSUER").unwrap_or(defaults.issuer),
                audience: lookup("JWT_AUDIENCE").unwrap_or(defaults.audience),
                lifetime_secs: parse_positive(&lookup, "TOKEN_LIFETIME_SECS")?
                    .unwrap_or(defaults.lifetime_secs),
            },
            quota: QuotaPolicy::from_lookup(&lookup)?,
            ledger_sweep_secs: parse_positive(&lookup, "LEDGER_SWEEP_SECS")?.unwrap_or(300),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| vars.get(key).cloned()
    }

    #[test]
    fn test_development_defaults() {
        let config = Config::from_lookup(lookup(&[])).unwrap();
        assert_eq!(config.http_port, 5000);
        assert_eq!(config.instance_id, "order-server-5000");
        assert_eq!(config.token.lifetime_secs, 3600);
        assert_eq!(config.ledger_sweep_secs, 300);
        assert!(config.database_url.is_none());
    }

    #[test]
    fn test_overrides() {
        let config = Config::from_lookup(lookup(&[
            ("HTTP_PORT", "5001"),
            ("INSTANCE_ID", "east-1"),
            ("TOKEN_LIFETIME_SECS", "600"),
            ("DATABASE_URL", "postgres://localhost/orders"),
        ]))
        .unwrap();
        assert_eq!(config.http_port, 5001);
        assert_eq!(config.instance_id, "east-1");
        assert_eq!(config.token.lifetime_secs, 600);
        assert_eq!(
            config.database_url.as_deref(),
            Some("postgres://localhost/orders")
        );
    }

    #[test]
    fn test_malformed_values_are_rejected() {
        for (key, value) in [
            ("HTTP_PORT", "http"),
            ("HTTP_PORT", "70000"),
            ("TOKEN_LIFETIME_SECS", "soon"),
            ("TOKEN_LIFETIME_SECS", "0"),
            ("LEDGER_SWEEP_SECS", "-5"),
        ] {
            let err = Config::from_lookup(lookup(&[(key, value)])).unwrap_err();
            assert!(
                matches!(&err, ConfigError::Invalid { key: k, .. } if *k == key),
                "{key}={value} gave {err}"
            );
        }
    }

    #[test]
    fn test_bad_quota_rate_is_rejected() {
        let err = Config::from_lookup(lookup(&[("QUOTA_LOGIN", "lots")])).unwrap_err();
        assert!(matches!(err, ConfigError::Quota(_)));
    }

    #[test]
    fn test_secret_required_outside_development() {
        let err = Config::from_lookup(lookup(&[("ENVIRONMENT", "production")])).unwrap_err();
        assert!(matches!(err, ConfigError::Missing { key: "JWT_SECRET", .. }));

        let err = Config::from_lookup(lookup(&[
            ("ENVIRONMENT", "production"),
            ("JWT_SECRET", "short"),
        ]))
        .unwrap_err();
        assert!(matches!(err, ConfigError::SecretTooShort { .. }));

        let secret = "x".repeat(MIN_SECRET_LEN);
        let config = Config::from_lookup(lookup(&[
            ("ENVIRONMENT", "production"),
            ("JWT_SECRET", secret.as_str()),
        ]))
        .unwrap();
        assert_eq!(config.token.secret, secret);
    }
}
