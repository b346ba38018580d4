//! Local cache of the last fetched changesets.
//!
//! The snapshot is two entries in a [`CacheStore`]:
//!
//! | Key | Value |
//! |-----|-------|
//! | `changesets` | JSON list of [`Changeset`] |
//! | `cachedTime` | capture time, epoch seconds (fractional) |
//!
//! The store knows nothing about expiry. [`is_fresh`] decides whether a
//! snapshot is still usable.

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;
use sqlx::{Row, SqlitePool};
use std::collections::HashMap;
use std::sync::RwLock;
use std::time::Duration;

use crate::config::Config;
use crate::db;
use crate::migrate;
use crate::models::Changeset;
use crate::traits::CacheStore;

pub const CHANGESETS_KEY: &str = "changesets";
pub const CACHED_TIME_KEY: &str = "cachedTime";

/// Epoch seconds with millisecond precision.
pub fn epoch_secs(t: DateTime<Utc>) -> f64 {
    t.timestamp_millis() as f64 / 1000.0
}

/// A snapshot captured at `cached_time` is usable while younger than `ttl`.
pub fn is_fresh(cached_time: f64, now: DateTime<Utc>, ttl: Duration) -> bool {
    epoch_secs(now) - cached_time < ttl.as_secs_f64()
}

pub async fn read_cached_time(store: &dyn CacheStore) -> Result<Option<f64>> {
    Ok(store.get(CACHED_TIME_KEY).await?.and_then(|v| v.as_f64()))
}

pub async fn read_changesets(store: &dyn CacheStore) -> Result<Option<Vec<Changeset>>> {
    match store.get(CHANGESETS_KEY).await? {
        Some(value) => {
            let csets: Vec<Changeset> =
                serde_json::from_value(value).context("cached changesets are malformed")?;
            Ok(Some(csets))
        }
        None => Ok(None),
    }
}

pub async fn write_snapshot(
    store: &dyn CacheStore,
    csets: &[Changeset],
    now: DateTime<Utc>,
) -> Result<()> {
    store
        .set(CHANGESETS_KEY, serde_json::to_value(csets)?)
        .await?;
    store
        .set(CACHED_TIME_KEY, serde_json::json!(epoch_secs(now)))
        .await?;
    Ok(())
}

pub async fn clear(store: &dyn CacheStore) -> Result<()> {
    store.remove(CHANGESETS_KEY).await?;
    store.remove(CACHED_TIME_KEY).await?;
    Ok(())
}

// ═══════════════════════════════════════════════════════════════════════
// SQLite store
// ═══════════════════════════════════════════════════════════════════════

/// [`CacheStore`] backed by the `cache_entries` table.
pub struct SqliteCache {
    pool: SqlitePool,
}

impl SqliteCache {
    /// Open the cache database, creating the schema if needed.
    pub async fn open(config: &Config) -> Result<Self> {
        let pool = db::connect(config).await?;
        migrate::create_schema(&pool).await?;
        Ok(Self { pool })
    }

    pub fn from_pool(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }
}

#[async_trait]
impl CacheStore for SqliteCache {
    async fn get(&self, key: &str) -> Result<Option<Value>> {
        let row = sqlx::query("SELECT value FROM cache_entries WHERE key = ?")
            .bind(key)
            .fetch_optional(&self.pool)
            .await?;
        match row {
            Some(row) => {
                let raw: String = row.get("value");
                let value = serde_json::from_str(&raw)
                    .with_context(|| format!("cache entry '{}' is not valid JSON", key))?;
                Ok(Some(value))
            }
            None => Ok(None),
        }
    }

    async fn set(&self, key: &str, value: Value) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO cache_entries (key, value, updated_at)
            VALUES (?, ?, ?)
            ON CONFLICT(key) DO UPDATE SET
                value = excluded.value,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(key)
        .bind(serde_json::to_string(&value)?)
        .bind(Utc::now().timestamp())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn remove(&self, key: &str) -> Result<()> {
        sqlx::query("DELETE FROM cache_entries WHERE key = ?")
            .bind(key)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}

// ═══════════════════════════════════════════════════════════════════════
// In-memory store
// ═══════════════════════════════════════════════════════════════════════

/// In-memory [`CacheStore`] for tests and ephemeral runs.
#[derive(Default)]
pub struct InMemoryCache {
    entries: RwLock<HashMap<String, Value>>,
}

impl InMemoryCache {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CacheStore for InMemoryCache {
    async fn get(&self, key: &str) -> Result<Option<Value>> {
        let entries = self
            .entries
            .read()
            .map_err(|_| anyhow::anyhow!("cache lock poisoned"))?;
        Ok(entries.get(key).cloned())
    }

    async fn set(&self, key: &str, value: Value) -> Result<()> {
        let mut entries = self
            .entries
            .write()
            .map_err(|_| anyhow::anyhow!("cache lock poisoned"))?;
        entries.insert(key.to_string(), value);
        Ok(())
    }

    async fn remove(&self, key: &str) -> Result<()> {
        let mut entries = self
            .entries
            .write()
            .map_err(|_| anyhow::anyhow!("cache lock poisoned"))?;
        entries.remove(key);
        Ok(())
    }
}
