// Configuration management

use std::env;
use std::str::FromStr;
use std::time::Duration;

use crate::authentication::TokenPolicy;
use crate::error::{Error, Result};

/// Application configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    pub bind_address: String,
    pub port: u16,

    pub database_url: String,
    /// In-memory session store when unset.
    pub redis_url: Option<String>,

    /// Browser origin allowed by CORS.
    pub cors_origin: String,

    pub token_ttl_secs: u64,
    pub token_secret_bytes: usize,

    pub log_level: String,
    pub log_format: String, // "json" or "text"
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0".into(),
            port: 8000,
            database_url: "sqlite:todo.db?mode=rwc".into(),
            redis_url: None,
            cors_origin: "http://localhost:5000".into(),
            token_ttl_secs: 60 * 60,
            token_secret_bytes: 20,
            log_level: "info".into(),
            log_format: "text".into(),
        }
    }
}

impl Config {
    /// Reads the environment, after loading `.env` if one exists.
    pub fn from_env() -> Result<Self> {
        dotenv::dotenv().ok();
        Self::from_lookup(|key| env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let defaults = Self::default();

        let config = Self {
            bind_address: lookup("BIND_ADDRESS").unwrap_or(defaults.bind_address),
            port: parse_or("PORT", &lookup, defaults.port)?,
            database_url: lookup("DATABASE_URL").unwrap_or(defaults.database_url),
            redis_url: lookup("REDIS_URL").filter(|url| !url.trim().is_empty()),
            cors_origin: lookup("CORS_ORIGIN").unwrap_or(defaults.cors_origin),
            token_ttl_secs: parse_or("TOKEN_TTL_SECS", &lookup, defaults.token_ttl_secs)?,
            token_secret_bytes: parse_or(
                "TOKEN_SECRET_BYTES",
                &lookup,
                defaults.token_secret_bytes,
            )?,
            log_level: lookup("LOG_LEVEL").unwrap_or(defaults.log_level),
            log_format: lookup("LOG_FORMAT").unwrap_or(defaults.log_format),
        };

        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        if self.token_ttl_secs == 0 {
            return Err(Error::Config("TOKEN_TTL_SECS must be positive".into()));
        }
        if self.token_secret_bytes < 16 {
            return Err(Error::Config("TOKEN_SECRET_BYTES must be at least 16".into()));
        }
        if !matches!(self.log_format.as_str(), "json" | "text") {
            return Err(Error::Config(format!(
                "LOG_FORMAT must be json or text, got {}",
                self.log_format
            )));
        }
        Ok(())
    }

    pub fn listen_address(&self) -> String {
        format!("{}:{}", self.bind_address, self.port)
    }

    pub fn token_policy(&self) -> TokenPolicy {
        TokenPolicy {
            ttl: Duration::from_secs(self.token_ttl_secs),
            secret_len: self.token_secret_bytes,
        }
    }
}

fn parse_or<T: FromStr>(key: &str, lookup: impl Fn(&str) -> Option<String>, default: T) -> Result<T> {
    match lookup(key) {
        Some(raw) => raw
            .trim()
            .parse()
            .map_err(|_| Error::Config(format!("{key} has an invalid value: {raw}"))),
        None => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn config_from(pairs: &[(&str, &str)]) -> Result<Config> {
        let vars: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Config::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn defaults_match_token_policy() {
        let config = config_from(&[]).unwrap();
        assert_eq!(config.listen_address(), "0.0.0.0:8000");
        assert!(config.redis_url.is_none());

        let policy = config.token_policy();
        assert_eq!(policy.ttl, Duration::from_secs(3600));
        assert_eq!(policy.secret_len, 20);
    }

    #[test]
    fn reads_overrides() {
        let config = config_from(&[
            ("PORT", "9100"),
            ("REDIS_URL", "redis://cache:6379/0"),
            ("TOKEN_TTL_SECS", "120"),
            ("LOG_FORMAT", "json"),
        ])
        .unwrap();
        assert_eq!(config.port, 9100);
        assert_eq!(config.redis_url.as_deref(), Some("redis://cache:6379/0"));
        assert_eq!(config.token_policy().ttl, Duration::from_secs(120));
    }

    #[test]
    fn rejects_bad_values() {
        assert!(matches!(config_from(&[("PORT", "http")]), Err(Error::Config(_))));
        assert!(matches!(config_from(&[("TOKEN_TTL_SECS", "0")]), Err(Error::Config(_))));
        assert!(matches!(config_from(&[("TOKEN_SECRET_BYTES", "4")]), Err(Error::Config(_))));
        assert!(matches!(config_from(&[("LOG_FORMAT", "xml")]), Err(Error::Config(_))));
    }

    #[test]
    fn blank_redis_url_means_memory_store() {
        let config = config_from(&[("REDIS_URL", "  ")]).unwrap();
        assert!(config.redis_url.is_none());
    }
}
