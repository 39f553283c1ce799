//! QueueConfig - 実行時設定
//!
//! 環境変数から読む。パースは lookup 関数で抽象化してあるので、
//! テストでは process 環境を触らずに済む。

use std::str::FromStr;
use std::time::Duration;

pub const ENV_POLL_INTERVAL_MS: &str = "APOQ_POLL_INTERVAL_MS";
pub const ENV_CONCURRENCY: &str = "APOQ_CONCURRENCY";
pub const ENV_CLAIM_TIMEOUT_SECS: &str = "APOQ_CLAIM_TIMEOUT_SECS";
pub const ENV_DATABASE_URL: &str = "APOQ_DATABASE_URL";
pub const ENV_DATABASE_URL_FALLBACK: &str = "DATABASE_URL";

pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(2);
pub const DEFAULT_CONCURRENCY: usize = 1;
pub use crate::ports::DEFAULT_CLAIM_TIMEOUT;

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("invalid value for {key}: {value:?}")]
    Invalid { key: &'static str, value: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueConfig {
    /// Sleep between polls that found nothing.
    pub poll_interval: Duration,

    /// Worker loops started by `start_pool` when the caller has no preference.
    pub concurrency: usize,

    /// Claims older than this are considered abandoned. `None` keeps a claim
    /// until its terminal write.
    pub claim_timeout: Option<Duration>,

    pub database_url: Option<String>,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            poll_interval: DEFAULT_POLL_INTERVAL,
            concurrency: DEFAULT_CONCURRENCY,
            claim_timeout: Some(DEFAULT_CLAIM_TIMEOUT),
            database_url: None,
        }
    }
}

impl QueueConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_env_with(|key| std::env::var(key).ok())
    }

    /// Same as [`from_env`](Self::from_env) with a custom key lookup.
    pub fn from_env_with<F>(get_env: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();

        let poll_interval = parse_env::<u64, _>(&get_env, ENV_POLL_INTERVAL_MS)?
            .map(Duration::from_millis)
            .unwrap_or(defaults.poll_interval);

        let concurrency = match parse_env::<usize, _>(&get_env, ENV_CONCURRENCY)? {
            Some(0) => {
                return Err(ConfigError::Invalid {
                    key: ENV_CONCURRENCY,
                    value: "0".to_string(),
                });
            }
            Some(n) => n,
            None => defaults.concurrency,
        };

        let claim_timeout = match parse_env::<u64, _>(&get_env, ENV_CLAIM_TIMEOUT_SECS)? {
            Some(0) => None,
            Some(secs) => Some(Duration::from_secs(secs)),
            None => defaults.claim_timeout,
        };

        let database_url = get_env(ENV_DATABASE_URL)
            .or_else(|| get_env(ENV_DATABASE_URL_FALLBACK))
            .filter(|url| !url.trim().is_empty());

        Ok(Self {
            poll_interval,
            concurrency,
            claim_timeout,
            database_url,
        })
    }

    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency.max(1);
        self
    }

    pub fn with_claim_timeout(mut self, claim_timeout: Option<Duration>) -> Self {
        self.claim_timeout = claim_timeout;
        self
    }

    pub fn with_database_url(mut self, database_url: impl Into<String>) -> Self {
        self.database_url = Some(database_url.into());
        self
    }
}

fn parse_env<T, F>(get_env: &F, key: &'static str) -> Result<Option<T>, ConfigError>
where
    T: FromStr,
    F: Fn(&str) -> Option<String>,
{
    let Some(raw) = get_env(key) else {
        return Ok(None);
    };
    raw.trim()
        .parse()
        .map(Some)
        .map_err(|_| ConfigError::Invalid { key, value: raw })
}
