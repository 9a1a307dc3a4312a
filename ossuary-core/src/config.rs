//! Runtime settings loaded from the environment.
//!
//! The scoring model's weights and thresholds are NOT here — they live in
//! [`crate::scoring::ScoreConfig`] and are passed to the engine by parameter
//! so tests can swap them. This module only covers where state lives and
//! which credentials are available.

use std::path::PathBuf;
use std::time::Duration;

use crate::error::{OssuaryError, Result};

/// Default cache freshness window in days.
pub const DEFAULT_CACHE_DAYS: u64 = 7;

/// Default per-package scoring deadline.
pub const DEFAULT_DEADLINE: Duration = Duration::from_secs(300);

/// Runtime settings.
#[derive(Debug, Clone)]
pub struct Settings {
    /// Directory holding bare blobless clones (`REPOS_PATH`, default `./repos`).
    pub repos_path: PathBuf,
    /// SQLite database file backing the score cache (`DATABASE_URL`,
    /// default `sqlite:///ossuary.db`).
    pub database_path: PathBuf,
    /// Optional GitHub token; raises the forge request rate (`GITHUB_TOKEN`).
    pub github_token: Option<String>,
    /// Cache freshness window (`OSSUARY_CACHE_DAYS`, default 7).
    pub cache_days: u64,
    /// Per-package deadline for the collector fan-out.
    pub deadline: Duration,
}

impl Settings {
    /// Load settings from the environment, applying defaults.
    pub fn from_env() -> Result<Settings> {
        let repos_path = std::env::var("REPOS_PATH")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("./repos"));

        let database_url = std::env::var("DATABASE_URL")
            .unwrap_or_else(|_| "sqlite:///ossuary.db".to_string());
        let database_path = parse_database_url(&database_url)?;

        let github_token = std::env::var("GITHUB_TOKEN")
            .ok()
            .filter(|t| !t.trim().is_empty());

        let cache_days = match std::env::var("OSSUARY_CACHE_DAYS") {
            Ok(raw) => raw.trim().parse::<u64>().map_err(|_| {
                OssuaryError::Input(format!("OSSUARY_CACHE_DAYS is not an integer: '{}'", raw))
            })?,
            Err(_) => DEFAULT_CACHE_DAYS,
        };

        Ok(Settings {
            repos_path,
            database_path,
            github_token,
            cache_days,
            deadline: DEFAULT_DEADLINE,
        })
    }

    pub fn max_age(&self) -> Duration {
        Duration::from_secs(self.cache_days * 24 * 60 * 60)
    }
}

/// Extract the filesystem path from a `sqlite://` URL, or accept a bare path.
///
/// Only the sqlite backend is supported; other schemes are an input error so
/// misconfiguration fails at startup, not mid-batch.
fn parse_database_url(url: &str) -> Result<PathBuf> {
    if let Some(rest) = url.strip_prefix("sqlite:///") {
        return Ok(PathBuf::from(rest));
    }
    if let Some(rest) = url.strip_prefix("sqlite://") {
        return Ok(PathBuf::from(rest));
    }
    if url.contains("://") {
        return Err(OssuaryError::Input(format!(
            "unsupported DATABASE_URL scheme: '{}' (only sqlite:/// is supported)",
            url
        )));
    }
    Ok(PathBuf::from(url))
}
