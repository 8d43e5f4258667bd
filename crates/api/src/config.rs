//! Process configuration, read from the environment once at startup.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, bail};

pub const DEFAULT_BIND: &str = "0.0.0.0:8080";
pub const DEFAULT_LOCK_TIMEOUT_MS: u64 = 5_000;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppConfig {
    pub bind: SocketAddr,
    /// Postgres connection string; `Some` selects the persistent stores.
    pub database_url: Option<String>,
    /// JSON product list for the in-memory catalog.
    pub catalog_seed: Option<PathBuf>,
    pub lock_timeout: Duration,
}

impl AppConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Same rules as [`from_env`](Self::from_env) over an arbitrary source.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> anyhow::Result<Self> {
        let bind_raw = lookup("PARTSLEDGER_BIND").unwrap_or_else(|| DEFAULT_BIND.to_string());
        let bind: SocketAddr = bind_raw
            .parse()
            .with_context(|| format!("PARTSLEDGER_BIND is not a socket address: {bind_raw}"))?;

        let use_persistent = match lookup("USE_PERSISTENT_STORES") {
            Some(raw) => raw
                .trim()
                .parse::<bool>()
                .with_context(|| format!("USE_PERSISTENT_STORES must be true or false, got {raw}"))?,
            None => false,
        };

        let database_url = if use_persistent {
            match lookup("DATABASE_URL") {
                Some(url) if !url.trim().is_empty() => Some(url),
                _ => bail!("DATABASE_URL must be set when USE_PERSISTENT_STORES=true"),
            }
        } else {
            None
        };

        let lock_timeout_ms = match lookup("PARTSLEDGER_LOCK_TIMEOUT_MS") {
            Some(raw) => raw
                .trim()
                .parse::<u64>()
                .with_context(|| format!("PARTSLEDGER_LOCK_TIMEOUT_MS must be milliseconds, got {raw}"))?,
            None => DEFAULT_LOCK_TIMEOUT_MS,
        };
        if lock_timeout_ms == 0 {
            bail!("PARTSLEDGER_LOCK_TIMEOUT_MS must be greater than zero");
        }

        Ok(Self {
            bind,
            database_url,
            catalog_seed: lookup("PARTSLEDGER_CATALOG_SEED").map(PathBuf::from),
            lock_timeout: Duration::from_millis(lock_timeout_ms),
        })
    }
}
