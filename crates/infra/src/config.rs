//! Runtime configuration from `MARKETSYNC_*` environment variables.
//!
//! A missing variable falls back to its default with a warning. A variable that
//! is set but unparsable is an error.

use anyhow::{Context, Result};
use sqlx::PgPool;
use sqlx::postgres::PgPoolOptions;
use std::str::FromStr;
use std::time::Duration;
use tracing::warn;

use crate::lease::LeaseTimings;
use crate::snapshot::SnapshotPolicy;
use crate::sync::RetryPolicy;

type Lookup<'a> = &'a dyn Fn(&str) -> Option<String>;

fn env_lookup(name: &str) -> Option<String> {
    std::env::var(name).ok()
}

fn read<T>(lookup: Lookup<'_>, name: &str, default: T) -> Result<T>
where
    T: FromStr + core::fmt::Debug,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match lookup(name) {
        Some(raw) => raw
            .trim()
            .parse()
            .with_context(|| format!("invalid value for {name}: {raw:?}")),
        None => {
            warn!(variable = name, default = ?default, "not set; using default");
            Ok(default)
        }
    }
}

fn read_millis(lookup: Lookup<'_>, name: &str, default: Duration) -> Result<Duration> {
    read(lookup, name, default.as_millis() as u64).map(Duration::from_millis)
}

#[derive(Debug, Clone, PartialEq)]
pub struct SyncConfig {
    pub consumer_name: String,
    pub lease_wait_timeout: Duration,
    pub lease_poll_interval: Duration,
    pub lease_ttl: Duration,
    /// Upper bound for one catch-up pass, lease wait excluded.
    pub trigger_timeout: Duration,
    pub retry: RetryPolicy,
}

impl Default for SyncConfig {
    fn default() -> Self {
        let lease = LeaseTimings::default();
        Self {
            consumer_name: "marketsync-consumer".to_string(),
            lease_wait_timeout: lease.wait_timeout,
            lease_poll_interval: lease.poll_interval,
            lease_ttl: lease.ttl,
            trigger_timeout: Duration::from_secs(30),
            retry: RetryPolicy::default(),
        }
    }
}

impl SyncConfig {
    pub fn for_consumer(consumer_name: impl Into<String>) -> Self {
        Self {
            consumer_name: consumer_name.into(),
            ..Default::default()
        }
    }

    pub fn from_env() -> Result<Self> {
        Self::from_lookup(&env_lookup)
    }

    pub fn from_lookup(lookup: Lookup<'_>) -> Result<Self> {
        let d = Self::default();
        Ok(Self {
            consumer_name: read(lookup, "MARKETSYNC_CONSUMER_NAME", d.consumer_name)?,
            lease_wait_timeout: read_millis(lookup, "MARKETSYNC_LEASE_WAIT_TIMEOUT_MS", d.lease_wait_timeout)?,
            lease_poll_interval: read_millis(lookup, "MARKETSYNC_LEASE_POLL_INTERVAL_MS", d.lease_poll_interval)?,
            lease_ttl: read_millis(lookup, "MARKETSYNC_LEASE_TTL_MS", d.lease_ttl)?,
            trigger_timeout: read_millis(lookup, "MARKETSYNC_TRIGGER_TIMEOUT_MS", d.trigger_timeout)?,
            retry: RetryPolicy {
                max_attempts: read(lookup, "MARKETSYNC_RETRY_MAX_ATTEMPTS", d.retry.max_attempts)?,
                base_delay: read_millis(lookup, "MARKETSYNC_RETRY_BASE_DELAY_MS", d.retry.base_delay)?,
                ..d.retry
            },
        })
    }

    pub fn lease_timings(&self) -> LeaseTimings {
        LeaseTimings {
            wait_timeout: self.lease_wait_timeout,
            poll_interval: self.lease_poll_interval,
            ttl: self.lease_ttl,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AuthoringConfig {
    /// Events between snapshots; 0 disables periodic snapshots.
    pub snapshot_interval: u64,
    pub snapshots_kept: usize,
}

impl Default for AuthoringConfig {
    fn default() -> Self {
        let policy = SnapshotPolicy::default();
        Self {
            snapshot_interval: policy.interval,
            snapshots_kept: policy.keep,
        }
    }
}

impl AuthoringConfig {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(&env_lookup)
    }

    pub fn from_lookup(lookup: Lookup<'_>) -> Result<Self> {
        let d = Self::default();
        Ok(Self {
            snapshot_interval: read(lookup, "MARKETSYNC_SNAPSHOT_INTERVAL", d.snapshot_interval)?,
            snapshots_kept: read(lookup, "MARKETSYNC_SNAPSHOTS_KEPT", d.snapshots_kept)?,
        })
    }

    pub fn snapshot_policy(&self) -> SnapshotPolicy {
        SnapshotPolicy {
            interval: self.snapshot_interval,
            keep: self.snapshots_kept,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DatabaseConfig {
    /// `None` runs on in-memory backends.
    pub database_url: Option<String>,
    pub max_connections: u32,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            database_url: None,
            max_connections: 10,
        }
    }
}

impl DatabaseConfig {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(&env_lookup)
    }

    pub fn from_lookup(lookup: Lookup<'_>) -> Result<Self> {
        let database_url = lookup("MARKETSYNC_DATABASE_URL").filter(|url| !url.trim().is_empty());
        if database_url.is_none() {
            warn!("MARKETSYNC_DATABASE_URL not set; using in-memory stores");
        }
        Ok(Self {
            database_url,
            max_connections: read(lookup, "MARKETSYNC_DATABASE_MAX_CONNECTIONS", 10)?,
        })
    }

    pub async fn connect(&self) -> Result<Option<PgPool>> {
        let Some(url) = self.database_url.as_deref() else {
            return Ok(None);
        };
        let pool = PgPoolOptions::new()
            .max_connections(self.max_connections)
            .connect(url)
            .await
            .context("failed to connect to Postgres")?;
        Ok(Some(pool))
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
        move |name| map.get(name).cloned()
    }

    #[test]
    fn missing_variables_fall_back_to_defaults() {
        let none = lookup_from(&[]);
        assert_eq!(SyncConfig::from_lookup(&none).unwrap(), SyncConfig::default());
        assert_eq!(AuthoringConfig::from_lookup(&none).unwrap(), AuthoringConfig::default());
        assert_eq!(DatabaseConfig::from_lookup(&none).unwrap(), DatabaseConfig::default());
    }

    #[test]
    fn set_variables_override_defaults() {
        let lookup = lookup_from(&[
            ("MARKETSYNC_CONSUMER_NAME", "gallery"),
            ("MARKETSYNC_LEASE_POLL_INTERVAL_MS", "25"),
            ("MARKETSYNC_RETRY_MAX_ATTEMPTS", "2"),
            ("MARKETSYNC_SNAPSHOT_INTERVAL", "0"),
        ]);
        let sync = SyncConfig::from_lookup(&lookup).unwrap();
        assert_eq!(sync.consumer_name, "gallery");
        assert_eq!(sync.lease_timings().poll_interval, Duration::from_millis(25));
        assert_eq!(sync.retry.max_attempts, 2);

        let authoring = AuthoringConfig::from_lookup(&lookup).unwrap();
        assert_eq!(authoring.snapshot_policy().interval, 0);
    }

    #[test]
    fn malformed_values_are_errors() {
        let lookup = lookup_from(&[("MARKETSYNC_TRIGGER_TIMEOUT_MS", "soon")]);
        let err = SyncConfig::from_lookup(&lookup).unwrap_err();
        assert!(format!("{err:#}").contains("MARKETSYNC_TRIGGER_TIMEOUT_MS"));
    }
}
