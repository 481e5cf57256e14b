use std::path::PathBuf;
use std::time::Duration;

use repomirror_ingest::{Credentials, RetryPolicy, DEFAULT_API_URL};
use repomirror_store::db_path_from_url;
use repomirror_types::{MirrorError, Result};

pub const DEFAULT_HTTP_TIMEOUT_SECS: u64 = 30;

/// Settings for a sync run. Built once in `main`; nothing below reads the
/// process environment.
#[derive(Debug, Clone)]
pub struct Config {
    pub credentials: Credentials,
    pub db_path: PathBuf,
    pub api_url: String,
    pub http_timeout: Duration,
    pub retry: RetryPolicy,
}

impl Config {
    pub fn from_env(db_flag: Option<PathBuf>) -> Result<Self> {
        Self::from_lookup(db_flag, |key| std::env::var(key).ok())
    }

    pub fn from_lookup<F>(db_flag: Option<PathBuf>, lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let token = lookup("GITHUB_TOKEN")
            .filter(|t| !t.trim().is_empty())
            .ok_or_else(|| MirrorError::Config("GITHUB_TOKEN is not set".into()))?;
        let db_path = resolve_db_path(db_flag, &lookup)?;
        let api_url = lookup("GITHUB_API_URL")
            .filter(|u| !u.trim().is_empty())
            .unwrap_or_else(|| DEFAULT_API_URL.to_string());

        let defaults = RetryPolicy::default();
        let timeout_secs = parse_var(
            &lookup,
            "REPOMIRROR_HTTP_TIMEOUT_SECS",
            DEFAULT_HTTP_TIMEOUT_SECS,
        )?;
        let retries = parse_var(&lookup, "REPOMIRROR_RETRIES", defaults.retries)?;
        let delay_secs = parse_var(
            &lookup,
            "REPOMIRROR_RETRY_DELAY_SECS",
            defaults.delay.as_secs(),
        )?;

        Ok(Self {
            credentials: Credentials::new(token),
            db_path,
            api_url,
            http_timeout: Duration::from_secs(timeout_secs),
            retry: RetryPolicy::new(retries, Duration::from_secs(delay_secs)),
        })
    }
}

/// `--db` wins; otherwise `DATABASE_URL`, as a path or `sqlite:` URL.
pub fn resolve_db_path<F>(flag: Option<PathBuf>, lookup: &F) -> Result<PathBuf>
where
    F: Fn(&str) -> Option<String>,
{
    if let Some(p) = flag {
        return Ok(p);
    }
    match lookup("DATABASE_URL") {
        Some(url) => db_path_from_url(url.trim()),
        None => Err(MirrorError::Config(
            "no store location: pass --db or set DATABASE_URL".into(),
        )),
    }
}

fn parse_var<F, T>(lookup: &F, key: &str, default: T) -> Result<T>
where
    F: Fn(&str) -> Option<String>,
    T: std::str::FromStr,
{
    match lookup(key) {
        None => Ok(default),
        Some(raw) => raw.trim().parse().map_err(|_| {
            MirrorError::Config(format!("{} must be a non-negative integer, got '{}'", key, raw))
        }),
    }
}
