//! Server configuration, from serde sources or `OAUTH_*` environment
//! variables.

use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Deserializer};

use super::cache::{CacheBackend, CacheSettings, Cached};
use super::error::ConfigError;
use super::types::MacAlgorithm;

pub const DEFAULT_ACCESS_TOKEN_TTL: u64 = 3600;
/// Longest accepted access token lifetime, one year.
pub const MAX_ACCESS_TOKEN_TTL: u64 = 365 * 24 * 3600;

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// PEM private key used to sign access tokens.
    pub private_key_path: Option<PathBuf>,
    /// PEM public key used to verify access tokens.
    pub public_key_path: Option<PathBuf>,
    /// Secret for refresh token payloads.
    pub encryption_key: Option<String>,
    /// Access token lifetime in seconds.
    #[serde(deserialize_with = "deserialize_ttl")]
    pub access_token_ttl: u64,
    pub default_scope: String,
    pub mac_algorithm: MacAlgorithm,
    /// Exposes hints and internal messages in error responses.
    pub debug: bool,
    /// Applied to every repository wrapped through [`ServerConfig::cached`].
    pub cache: CacheSettings,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            private_key_path: None,
            public_key_path: None,
            encryption_key: None,
            access_token_ttl: DEFAULT_ACCESS_TOKEN_TTL,
            default_scope: String::new(),
            mac_algorithm: MacAlgorithm::default(),
            debug: false,
            cache: CacheSettings::default(),
        }
    }
}

impl ServerConfig {
    /// Reads the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds a config from `OAUTH_*` keys resolved by `lookup`. Unset keys
    /// keep their defaults.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();
        if let Some(path) = lookup("OAUTH_PRIVATE_KEY") {
            config.private_key_path = Some(PathBuf::from(path));
        }
        if let Some(path) = lookup("OAUTH_PUBLIC_KEY") {
            config.public_key_path = Some(PathBuf::from(path));
        }
        if let Some(key) = lookup("OAUTH_ENCRYPTION_KEY") {
            config.encryption_key = Some(key);
        }
        if let Some(ttl) = lookup("OAUTH_ACCESS_TOKEN_TTL") {
            config.access_token_ttl = parse("OAUTH_ACCESS_TOKEN_TTL", &ttl)?;
            check_ttl(config.access_token_ttl).map_err(|_| ConfigError::InvalidValue {
                key: "OAUTH_ACCESS_TOKEN_TTL".into(),
                value: ttl,
            })?;
        }
        if let Some(scope) = lookup("OAUTH_DEFAULT_SCOPE") {
            config.default_scope = scope;
        }
        if let Some(name) = lookup("OAUTH_MAC_ALGORITHM") {
            config.mac_algorithm = MacAlgorithm::from_name(&name).ok_or(ConfigError::InvalidValue {
                key: "OAUTH_MAC_ALGORITHM".into(),
                value: name,
            })?;
        }
        if let Some(debug) = lookup("OAUTH_DEBUG") {
            config.debug = parse("OAUTH_DEBUG", &debug)?;
        }
        if let Some(secs) = lookup("OAUTH_CACHE_DURATION") {
            config.cache.duration = Some(Duration::from_secs(parse("OAUTH_CACHE_DURATION", &secs)?));
        }
        Ok(config)
    }

    /// The access token lifetime, rejecting values outside
    /// `1..=MAX_ACCESS_TOKEN_TTL`.
    pub fn access_token_ttl(&self) -> Result<chrono::Duration, ConfigError> {
        check_ttl(self.access_token_ttl)
    }

    /// Wraps `repository` in a cache decorator carrying the configured
    /// duration and dependency tag.
    pub fn cached<R>(&self, repository: R, backend: Arc<dyn CacheBackend>) -> Cached<R> {
        Cached::new(repository, backend).with_settings(self.cache.clone())
    }
}

fn check_ttl(secs: u64) -> Result<chrono::Duration, ConfigError> {
    if !(1..=MAX_ACCESS_TOKEN_TTL).contains(&secs) {
        return Err(ConfigError::InvalidValue {
            key: "access_token_ttl".into(),
            value: secs.to_string(),
        });
    }
    i64::try_from(secs)
        .ok()
        .and_then(chrono::TimeDelta::try_seconds)
        .ok_or_else(|| ConfigError::InvalidValue {
            key: "access_token_ttl".into(),
            value: secs.to_string(),
        })
}

fn deserialize_ttl<'de, D: Deserializer<'de>>(d: D) -> Result<u64, D::Error> {
    let secs = u64::deserialize(d)?;
    check_ttl(secs).map_err(serde::de::Error::custom)?;
    Ok(secs)
}

fn parse<T: FromStr>(key: &str, value: &str) -> Result<T, ConfigError> {
    value.trim().parse().map_err(|_| ConfigError::InvalidValue {
        key: key.to_string(),
        value: value.to_string(),
    })
}
