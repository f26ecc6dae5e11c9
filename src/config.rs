use anyhow::{anyhow, Context, Result};
use std::env;
use std::str::FromStr;
use std::time::Duration;

use crate::cache::CacheConfig;
use crate::retry::RetryPolicy;

pub const DEFAULT_PLEX_TV_BASE: &str = "https://plex.tv/api/v2";
pub const DEFAULT_AUTH_APP_URL: &str = "https://app.plex.tv/auth";
pub const DEFAULT_IMDB_BASE: &str = "https://api.imdbapi.dev";
pub const DEFAULT_TMDB_BASE: &str = "https://api.themoviedb.org/3";
pub const PRODUCT_NAME: &str = "RoleCall";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProviderKind {
    Imdb,
    Tmdb,
}

impl FromStr for ProviderKind {
    type Err = anyhow::Error;
    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "imdb" => Ok(ProviderKind::Imdb),
            "tmdb" => Ok(ProviderKind::Tmdb),
            other => Err(anyhow!(
                "FILMOGRAPHY_PROVIDER must be 'imdb' or 'tmdb' (got '{}')",
                other
            )),
        }
    }
}

/// Everything the clients need, loaded once at startup and handed to each
/// component explicitly.
#[derive(Debug, Clone)]
pub struct Config {
    pub plex_server: Option<String>,
    pub plex_token: Option<String>,
    pub client_id: String,
    pub plex_tv_base: String,
    pub auth_app_url: String,
    pub allow_insecure_fallback: bool,
    pub local_timeout: Duration,
    pub secure_timeout: Duration,
    pub provider: ProviderKind,
    pub imdb_base: String,
    pub tmdb_base: String,
    pub tmdb_token: Option<String>,
    pub cache: CacheConfig,
    pub retry: RetryPolicy,
    pub pin_poll_interval: Duration,
    pub pin_max_attempts: u32,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            plex_server: None,
            plex_token: None,
            client_id: "rolecall".to_string(),
            plex_tv_base: DEFAULT_PLEX_TV_BASE.to_string(),
            auth_app_url: DEFAULT_AUTH_APP_URL.to_string(),
            allow_insecure_fallback: false,
            local_timeout: Duration::from_secs(10),
            secure_timeout: Duration::from_secs(30),
            provider: ProviderKind::Imdb,
            imdb_base: DEFAULT_IMDB_BASE.to_string(),
            tmdb_base: DEFAULT_TMDB_BASE.to_string(),
            tmdb_token: None,
            cache: CacheConfig::default(),
            retry: RetryPolicy::default(),
            pin_poll_interval: Duration::from_secs(1),
            pin_max_attempts: 300,
        }
    }
}

impl Config {
    /// Read configuration from the process environment. Call after
    /// `dotenvy::dotenv()` so a local `.env` is honoured.
    pub fn from_env() -> Result<Self> {
        let defaults = Config::default();
        let provider = match non_empty("FILMOGRAPHY_PROVIDER") {
            Some(v) => v.parse()?,
            None => defaults.provider,
        };
        let tmdb_token = non_empty("TMDB_ACCESS_TOKEN");
        if provider == ProviderKind::Tmdb && tmdb_token.is_none() {
            anyhow::bail!("TMDB_ACCESS_TOKEN must be set when FILMOGRAPHY_PROVIDER=tmdb");
        }

        let cache = CacheConfig {
            ttl: Duration::from_secs(parse_or("CACHE_TTL_SECS", defaults.cache.ttl.as_secs())?),
            max_entries: parse_or("CACHE_MAX_ENTRIES", defaults.cache.max_entries)?,
        };
        let retry = RetryPolicy {
            max_attempts: parse_or("RETRY_ATTEMPTS", defaults.retry.max_attempts)?,
            ..defaults.retry
        };

        Ok(Self {
            plex_server: non_empty("PLEX_SERVER"),
            plex_token: non_empty("PLEX_TOKEN"),
            client_id: non_empty("PLEX_CLIENT_ID").unwrap_or(defaults.client_id),
            plex_tv_base: non_empty("PLEX_TV_BASE").unwrap_or(defaults.plex_tv_base),
            auth_app_url: non_empty("PLEX_AUTH_APP_URL").unwrap_or(defaults.auth_app_url),
            allow_insecure_fallback: parse_or("PLEX_ALLOW_INSECURE", false)?,
            local_timeout: Duration::from_secs(parse_or(
                "LOCAL_TIMEOUT_SECS",
                defaults.local_timeout.as_secs(),
            )?),
            secure_timeout: Duration::from_secs(parse_or(
                "SECURE_TIMEOUT_SECS",
                defaults.secure_timeout.as_secs(),
            )?),
            provider,
            imdb_base: non_empty("IMDB_API_BASE").unwrap_or(defaults.imdb_base),
            tmdb_base: non_empty("TMDB_API_BASE").unwrap_or(defaults.tmdb_base),
            tmdb_token,
            cache,
            retry,
            pin_poll_interval: Duration::from_millis(parse_or(
                "PIN_POLL_INTERVAL_MS",
                defaults.pin_poll_interval.as_millis() as u64,
            )?),
            pin_max_attempts: parse_or("PIN_MAX_ATTEMPTS", defaults.pin_max_attempts)?,
        })
    }
}

fn non_empty(key: &str) -> Option<String> {
    env::var(key).ok().filter(|v| !v.trim().is_empty())
}

fn parse_or<T>(key: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match non_empty(key) {
        Some(raw) => raw
            .trim()
            .parse()
            .with_context(|| format!("Invalid value for {}: '{}'", key, raw)),
        None => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_observed_parameters() {
        let config = Config::default();
        assert_eq!(config.cache.ttl, Duration::from_secs(3600));
        assert_eq!(config.cache.max_entries, 50);
        assert_eq!(config.retry.max_attempts, 3);
        assert_eq!(config.pin_max_attempts, 300);
        assert_eq!(config.pin_poll_interval, Duration::from_secs(1));
        assert!(!config.allow_insecure_fallback);
    }

    #[test]
    fn parses_provider_kind() {
        assert_eq!("IMDb".parse::<ProviderKind>().unwrap(), ProviderKind::Imdb);
        assert_eq!(" tmdb ".parse::<ProviderKind>().unwrap(), ProviderKind::Tmdb);
        assert!("omdb".parse::<ProviderKind>().is_err());
    }
}
