// Runtime configuration loaded from the environment

use anyhow::{anyhow, Result};
use std::str::FromStr;
use std::time::Duration;

/// Settings for the background badge evaluation
#[derive(Debug, Clone)]
pub struct BadgeWorkerConfig {
    /// Pending evaluations held before schedulers start waiting
    pub queue_capacity: usize,
    /// Evaluations allowed to run at once
    pub workers: usize,
    pub max_attempts: u32,
    pub retry_backoff: Duration,
}

impl Default for BadgeWorkerConfig {
    fn default() -> Self {
        Self {
            queue_capacity: 1024,
            workers: 4,
            max_attempts: 3,
            retry_backoff: Duration::from_millis(200),
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct PageLimits {
    pub default_page_size: i64,
    pub max_page_size: i64,
}

impl Default for PageLimits {
    fn default() -> Self {
        Self {
            default_page_size: 10,
            max_page_size: 100,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: String,
    pub db_max_connections: u32,
    pub server_port: u16,
    pub pages: PageLimits,
    pub badges: BadgeWorkerConfig,
}

impl Config {
    /// Read configuration from process environment variables.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build configuration from any key lookup; missing keys take defaults,
    /// present but unparsable values are an error.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let pages = PageLimits {
            default_page_size: parse_or(&lookup, "DEFAULT_PAGE_SIZE", 10)?,
            max_page_size: parse_or(&lookup, "MAX_PAGE_SIZE", 100)?,
        };
        if pages.max_page_size < 1 || pages.default_page_size < 1 {
            return Err(anyhow!("page sizes must be at least 1"));
        }

        let badges = BadgeWorkerConfig {
            queue_capacity: parse_or(&lookup, "BADGE_QUEUE_CAPACITY", 1024)?,
            workers: parse_or(&lookup, "BADGE_WORKERS", 4)?,
            max_attempts: parse_or(&lookup, "BADGE_MAX_ATTEMPTS", 3)?,
            retry_backoff: Duration::from_millis(parse_or(&lookup, "BADGE_RETRY_BACKOFF_MS", 200)?),
        };
        if badges.queue_capacity == 0 || badges.workers == 0 {
            return Err(anyhow!("BADGE_QUEUE_CAPACITY and BADGE_WORKERS must be at least 1"));
        }

        Ok(Self {
            database_url: lookup("DATABASE_URL").unwrap_or_else(|| "sqlite:ecoclub.db".to_string()),
            db_max_connections: parse_or(&lookup, "DB_MAX_CONNECTIONS", 5)?,
            server_port: parse_or(&lookup, "PORT", 8080)?,
            pages,
            badges,
        })
    }
}

fn parse_or<F, T>(lookup: &F, key: &str, default: T) -> Result<T>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match lookup(key) {
        Some(raw) => raw
            .trim()
            .parse::<T>()
            .map_err(|e| anyhow!("invalid value for {}: {} ({})", key, raw, e)),
        None => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn defaults_apply_when_unset() {
        let config = Config::from_lookup(lookup_from(&[])).unwrap();
        assert_eq!(config.database_url, "sqlite:ecoclub.db");
        assert_eq!(config.server_port, 8080);
        assert_eq!(config.pages.max_page_size, 100);
        assert_eq!(config.badges.workers, 4);
        assert_eq!(config.badges.retry_backoff, Duration::from_millis(200));
    }

    #[test]
    fn overrides_are_parsed() {
        let config = Config::from_lookup(lookup_from(&[
            ("PORT", "9000"),
            ("MAX_PAGE_SIZE", "25"),
            ("BADGE_MAX_ATTEMPTS", "5"),
        ]))
        .unwrap();
        assert_eq!(config.server_port, 9000);
        assert_eq!(config.pages.max_page_size, 25);
        assert_eq!(config.badges.max_attempts, 5);
    }

    #[test]
    fn garbage_is_rejected() {
        let err = Config::from_lookup(lookup_from(&[("PORT", "eighty")])).unwrap_err();
        assert!(err.to_string().contains("PORT"));

        assert!(Config::from_lookup(lookup_from(&[("BADGE_WORKERS", "0")])).is_err());
    }
}
