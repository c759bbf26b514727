//! Common configuration types for Chatdesk components.
//!
//! Each binary owns its own `Config`, but the storage block and the parsing
//! helpers are shared so the server and the maintenance tool read the same
//! variables the same way.

use crate::secret::SecretString;
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Default maximum number of pooled storage connections.
pub const DEFAULT_MAX_CONNECTIONS: u32 = 20;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingEnvVar(String),

    #[error("Invalid value for {name}: {reason}")]
    InvalidValue { name: String, reason: String },
}

impl ConfigError {
    #[must_use]
    pub fn invalid(name: &str, reason: impl Into<String>) -> Self {
        Self::InvalidValue {
            name: name.to_string(),
            reason: reason.into(),
        }
    }
}

/// Database configuration
#[derive(Clone)]
pub struct DatabaseConfig {
    /// PostgreSQL connection string
    pub url: SecretString,
    /// Maximum number of connections in the pool
    pub max_connections: u32,
}

impl fmt::Debug for DatabaseConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DatabaseConfig")
            .field("url", &"[REDACTED]")
            .field("max_connections", &self.max_connections)
            .finish()
    }
}

impl DatabaseConfig {
    /// Read `DATABASE_URL` and `DATABASE_MAX_CONNECTIONS`.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::MissingEnvVar` when `DATABASE_URL` is absent and
    /// `ConfigError::InvalidValue` when the pool size is not a positive integer.
    pub fn from_vars(vars: &HashMap<String, String>) -> Result<Self, ConfigError> {
        let url = required(vars, "DATABASE_URL")?;
        let max_connections = parse_or(vars, "DATABASE_MAX_CONNECTIONS", DEFAULT_MAX_CONNECTIONS)?;
        if max_connections == 0 {
            return Err(ConfigError::invalid(
                "DATABASE_MAX_CONNECTIONS",
                "must be greater than 0",
            ));
        }

        Ok(Self {
            url: SecretString::from(url),
            max_connections,
        })
    }
}

/// Fetch a required, non-blank variable.
///
/// # Errors
///
/// Returns `ConfigError::MissingEnvVar` when the variable is absent or blank.
pub fn required(vars: &HashMap<String, String>, name: &str) -> Result<String, ConfigError> {
    vars.get(name)
        .filter(|value| !value.trim().is_empty())
        .cloned()
        .ok_or_else(|| ConfigError::MissingEnvVar(name.to_string()))
}

/// Parse an optional variable, falling back to `default` when it is unset.
///
/// # Errors
///
/// Returns `ConfigError::InvalidValue` when the variable is set but does not
/// parse as `T`.
pub fn parse_or<T>(vars: &HashMap<String, String>, name: &str, default: T) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: fmt::Display,
{
    match vars.get(name) {
        Some(raw) => raw.trim().parse::<T>().map_err(|e| {
            ConfigError::invalid(name, format!("could not parse '{raw}': {e}"))
        }),
        None => Ok(default),
    }
}

/// Split a comma-separated list, dropping blank entries.
#[must_use]
pub fn list(vars: &HashMap<String, String>, name: &str) -> Vec<String> {
    vars.get(name)
        .map(|raw| {
            raw.split(',')
                .map(str::trim)
                .filter(|item| !item.is_empty())
                .map(ToString::to_string)
                .collect()
        })
        .unwrap_or_default()
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use secrecy::ExposeSecret;

    fn vars(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect()
    }

    #[test]
    fn test_database_config_defaults() {
        let config = DatabaseConfig::from_vars(&vars(&[("DATABASE_URL", "postgres://db/chat")]))
            .expect("config should load");

        assert_eq!(config.url.expose_secret(), "postgres://db/chat");
        assert_eq!(config.max_connections, DEFAULT_MAX_CONNECTIONS);
    }

    #[test]
    fn test_database_config_requires_url() {
        let err = DatabaseConfig::from_vars(&HashMap::new()).unwrap_err();
        assert!(matches!(err, ConfigError::MissingEnvVar(name) if name == "DATABASE_URL"));
    }

    #[test]
    fn test_blank_required_value_is_missing() {
        let err = required(&vars(&[("DATABASE_URL", "   ")]), "DATABASE_URL").unwrap_err();
        assert!(matches!(err, ConfigError::MissingEnvVar(_)));
    }

    #[test]
    fn test_zero_pool_size_rejected() {
        let err = DatabaseConfig::from_vars(&vars(&[
            ("DATABASE_URL", "postgres://db/chat"),
            ("DATABASE_MAX_CONNECTIONS", "0"),
        ]))
        .unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { .. }));
    }

    #[test]
    fn test_debug_redacts_url() {
        let config = DatabaseConfig::from_vars(&vars(&[(
            "DATABASE_URL",
            "postgres://user:hunter2@db/chat",
        )]))
        .unwrap();
        let debug = format!("{config:?}");
        assert!(!debug.contains("hunter2"));
        assert!(debug.contains("[REDACTED]"));
    }

    #[test]
    fn test_parse_or_reports_bad_value() {
        let err = parse_or::<u64>(&vars(&[("N", "abc")]), "N", 5).unwrap_err();
        assert!(err.to_string().contains("Invalid value for N"));
        assert_eq!(parse_or::<u64>(&HashMap::new(), "N", 5).unwrap(), 5);
    }

    #[test]
    fn test_list_splits_and_trims() {
        let items = list(&vars(&[("L", " a, ,b ,c")]), "L");
        assert_eq!(items, vec!["a", "b", "c"]);
        assert!(list(&HashMap::new(), "L").is_empty());
    }
}
