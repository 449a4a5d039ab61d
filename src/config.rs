//! Service configuration loaded from the process environment.
//!
//! A `.env` file in the working directory is honoured through `dotenvy`, so
//! local development only needs `DATABASE_URL` set there.

use std::env;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use thiserror::Error;

/// Longest accepted session lifetime, in hours (one year).
pub const MAX_TTL_HOURS: u32 = 24 * 366;

/// Errors produced while reading configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// A required variable is not set.
    #[error("missing required environment variable `{0}`")]
    Missing(&'static str),

    /// A variable is set but cannot be parsed.
    #[error("invalid value `{value}` for `{key}`")]
    Invalid {
        /// Variable name.
        key: &'static str,
        /// Raw value as found in the environment.
        value: String,
    },
}

/// Limits applied to anonymous public document analysis.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PublicLimits {
    /// Analyses allowed per IP in the trailing hour.
    pub hourly: u64,
    /// Analyses allowed per IP in the trailing day.
    pub daily: u64,
    /// Lifetime of a public analysis session.
    pub session_ttl: chrono::Duration,
    /// Largest single document accepted.
    pub max_file_bytes: u64,
    /// Total bytes a session may hold at once.
    pub session_quota_bytes: u64,
}

impl Default for PublicLimits {
    fn default() -> Self {
        Self {
            hourly: 3,
            daily: 10,
            session_ttl: chrono::Duration::hours(24),
            max_file_bytes: 10 * 1024 * 1024,
            session_quota_bytes: 50 * 1024 * 1024,
        }
    }
}

/// Complete runtime configuration of the service.
#[derive(Debug, Clone)]
pub struct ServiceConfig {
    pub database_url: String,
    pub bind_addr: SocketAddr,
    pub storage_root: PathBuf,
    pub limits: PublicLimits,
    pub cleanup_interval: Duration,
    pub user_session_ttl: time::Duration,
    pub ai_monthly_token_limit: u64,
}

impl ServiceConfig {
    /// Reads the configuration, loading `.env` first when present.
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Builds the configuration from an arbitrary variable lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let database_url = lookup("DATABASE_URL").ok_or(ConfigError::Missing("DATABASE_URL"))?;
        let defaults = PublicLimits::default();

        let limits = PublicLimits {
            hourly: parse_or(&lookup, "PUBLIC_HOURLY_LIMIT", defaults.hourly)?,
            daily: parse_or(&lookup, "PUBLIC_DAILY_LIMIT", defaults.daily)?,
            session_ttl: chrono::Duration::try_hours(parse_hours(
                &lookup,
                "PUBLIC_SESSION_TTL_HOURS",
                24,
            )?)
            .ok_or_else(|| invalid(&lookup, "PUBLIC_SESSION_TTL_HOURS"))?,
            max_file_bytes: parse_or(&lookup, "PUBLIC_MAX_FILE_BYTES", defaults.max_file_bytes)?,
            session_quota_bytes: parse_or(
                &lookup,
                "PUBLIC_SESSION_QUOTA_BYTES",
                defaults.session_quota_bytes,
            )?,
        };

        Ok(Self {
            database_url,
            bind_addr: parse_or(&lookup, "BIND_ADDR", SocketAddr::from(([127, 0, 0, 1], 3000)))?,
            storage_root: lookup("STORAGE_ROOT")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from("./storage")),
            limits,
            cleanup_interval: Duration::from_secs(parse_positive(
                &lookup,
                "CLEANUP_INTERVAL_SECS",
                3600_u64,
            )?),
            user_session_ttl: time::Duration::hours(parse_hours(
                &lookup,
                "USER_SESSION_TTL_HOURS",
                24,
            )?),
            ai_monthly_token_limit: parse_or(&lookup, "AI_MONTHLY_TOKEN_LIMIT", 100_000_u64)?,
        })
    }
}

fn parse_or<F, T>(lookup: &F, key: &'static str, default: T) -> Result<T, ConfigError>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
{
    match lookup(key) {
        None => Ok(default),
        Some(raw) => raw
            .trim()
            .parse()
            .map_err(|_| ConfigError::Invalid { key, value: raw }),
    }
}

/// Like [`parse_or`], but zero is rejected.
fn parse_positive<F>(lookup: &F, key: &'static str, default: u64) -> Result<u64, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    match parse_or(lookup, key, default)? {
        0 => Err(invalid(lookup, key)),
        value => Ok(value),
    }
}

/// A lifetime in whole hours, between 1 and [`MAX_TTL_HOURS`].
fn parse_hours<F>(lookup: &F, key: &'static str, default: u32) -> Result<i64, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    let hours: u32 = parse_or(lookup, key, default)?;
    if hours == 0 || hours > MAX_TTL_HOURS {
        return Err(invalid(lookup, key));
    }
    Ok(i64::from(hours))
}

fn invalid<F>(lookup: &F, key: &'static str) -> ConfigError
where
    F: Fn(&str) -> Option<String>,
{
    ConfigError::Invalid {
        key,
        value: lookup(key).unwrap_or_default(),
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn defaults_apply_when_only_database_url_is_set() {
        let config = ServiceConfig::from_lookup(lookup_from(&[(
            "DATABASE_URL",
            "sqlite::memory:",
        )]))
        .unwrap();

        assert_eq!(config.limits, PublicLimits::default());
        assert_eq!(config.bind_addr.port(), 3000);
        assert_eq!(config.cleanup_interval, Duration::from_secs(3600));
        assert_eq!(config.ai_monthly_token_limit, 100_000);
    }

    #[test]
    fn overrides_are_parsed() {
        let config = ServiceConfig::from_lookup(lookup_from(&[
            ("DATABASE_URL", "sqlite::memory:"),
            ("PUBLIC_HOURLY_LIMIT", "7"),
            ("PUBLIC_SESSION_TTL_HOURS", "2"),
            ("BIND_ADDR", "0.0.0.0:8080"),
        ]))
        .unwrap();

        assert_eq!(config.limits.hourly, 7);
        assert_eq!(config.limits.session_ttl, chrono::Duration::hours(2));
        assert_eq!(config.bind_addr.port(), 8080);
    }

    #[test]
    fn missing_database_url_is_reported() {
        let err = ServiceConfig::from_lookup(lookup_from(&[])).unwrap_err();
        assert!(matches!(err, ConfigError::Missing("DATABASE_URL")));
    }

    fn invalid_key(pairs: &[(&str, &str)]) -> &'static str {
        let mut all = vec![("DATABASE_URL", "sqlite::memory:")];
        all.extend_from_slice(pairs);
        match ServiceConfig::from_lookup(lookup_from(&all)) {
            Err(ConfigError::Invalid { key, .. }) => key,
            other => panic!("expected invalid value, got {other:?}"),
        }
    }

    #[test]
    fn lifetimes_must_be_positive_and_bounded() {
        for raw in ["0", "-3", "9999999999", "876000"] {
            assert_eq!(
                invalid_key(&[("PUBLIC_SESSION_TTL_HOURS", raw)]),
                "PUBLIC_SESSION_TTL_HOURS",
                "value {raw}"
            );
            assert_eq!(
                invalid_key(&[("USER_SESSION_TTL_HOURS", raw)]),
                "USER_SESSION_TTL_HOURS",
                "value {raw}"
            );
        }
        assert_eq!(
            invalid_key(&[("CLEANUP_INTERVAL_SECS", "0")]),
            "CLEANUP_INTERVAL_SECS"
        );
    }

    #[test]
    fn longest_lifetime_is_accepted() {
        let max = MAX_TTL_HOURS.to_string();
        let config = ServiceConfig::from_lookup(lookup_from(&[
            ("DATABASE_URL", "sqlite::memory:"),
            ("PUBLIC_SESSION_TTL_HOURS", max.as_str()),
        ]))
        .unwrap();
        assert_eq!(
            config.limits.session_ttl,
            chrono::Duration::hours(i64::from(MAX_TTL_HOURS))
        );
    }

    #[test]
    fn malformed_number_is_reported() {
        let err = ServiceConfig::from_lookup(lookup_from(&[
            ("DATABASE_URL", "sqlite::memory:"),
            ("PUBLIC_DAILY_LIMIT", "lots"),
        ]))
        .unwrap_err();

        match err {
            ConfigError::Invalid { key, value } => {
                assert_eq!(key, "PUBLIC_DAILY_LIMIT");
                assert_eq!(value, "lots");
            }
            other => panic!("unexpected error: {other}"),
        }
    }
}
