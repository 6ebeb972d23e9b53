use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use rusqlite::{params, Connection, OptionalExtension};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use thiserror::Error;
use url::Url;

use crate::clock::Clock;
use crate::config::CacheSection;
use crate::sqlite;

use super::types::ContentKind;

pub type CacheResult<T> = Result<T, CacheError>;

#[derive(Debug, Error)]
pub enum CacheError {
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("failed to prepare cache directory {path}: {source}")]
    Io {
        source: std::io::Error,
        path: PathBuf,
    },
    #[error("corrupt cache entry {key}: {reason}")]
    Corrupt { key: String, reason: String },
}

/// Content-addressed cache key: SHA-256 over the normalized URL and the
/// sorted extraction parameters.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CacheKey(String);

impl CacheKey {
    pub fn derive(url: &Url, params: &BTreeMap<String, String>) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(normalize_url(url).as_bytes());
        for (name, value) in params {
            for part in [name, value] {
                hasher.update((part.len() as u64).to_le_bytes());
                hasher.update(part.as_bytes());
            }
        }
        CacheKey(hex::encode(hasher.finalize()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Lower-case scheme and host, no default port, no fragment, no trailing
/// slash. The query is kept verbatim.
pub fn normalize_url(url: &Url) -> String {
    let scheme = url.scheme().to_ascii_lowercase();
    let host = url.host_str().unwrap_or_default().to_ascii_lowercase();
    let mut normalized = format!("{scheme}://{host}");
    if let Some(port) = url.port() {
        if Some(port) != default_port(&scheme) {
            normalized.push_str(&format!(":{port}"));
        }
    }
    normalized.push_str(url.path().trim_end_matches('/'));
    if let Some(query) = url.query() {
        if !query.is_empty() {
            normalized.push('?');
            normalized.push_str(query);
        }
    }
    normalized
}

fn default_port(scheme: &str) -> Option<u16> {
    match scheme {
        "http" => Some(80),
        "https" => Some(443),
        _ => None,
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CachedPayload {
    pub content: String,
    pub kind: ContentKind,
    pub status: u16,
    pub final_url: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheEntry {
    pub key: CacheKey,
    pub payload: CachedPayload,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

/// Storage behind the response cache. Entries are addressed only by key.
pub trait CacheStore: Send + Sync {
    fn load(&self, key: &CacheKey) -> CacheResult<Option<CacheEntry>>;
    fn store(&self, entry: &CacheEntry) -> CacheResult<()>;
    /// Removes the entry only if it is still the one created at `created_at`.
    fn evict(&self, key: &CacheKey, created_at: DateTime<Utc>) -> CacheResult<()>;
}

#[derive(Debug, Default)]
pub struct MemoryCacheStore {
    entries: DashMap<CacheKey, CacheEntry>,
}

impl MemoryCacheStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl CacheStore for MemoryCacheStore {
    fn load(&self, key: &CacheKey) -> CacheResult<Option<CacheEntry>> {
        Ok(self.entries.get(key).map(|entry| entry.value().clone()))
    }

    fn store(&self, entry: &CacheEntry) -> CacheResult<()> {
        self.entries.insert(entry.key.clone(), entry.clone());
        Ok(())
    }

    fn evict(&self, key: &CacheKey, created_at: DateTime<Utc>) -> CacheResult<()> {
        self.entries
            .remove_if(key, |_, entry| entry.created_at == created_at);
        Ok(())
    }
}

#[derive(Debug)]
pub struct SqliteCacheStore {
    path: PathBuf,
    conn: Mutex<Connection>,
}

impl SqliteCacheStore {
    pub fn open<P: AsRef<Path>>(path: P) -> CacheResult<Self> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|source| CacheError::Io {
                source,
                path: parent.to_path_buf(),
            })?;
        }
        let conn = sqlite::open_connection(&path)?;
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS response_cache (
                cache_key TEXT PRIMARY KEY,
                created_at TEXT NOT NULL,
                expires_at TEXT NOT NULL,
                content_kind TEXT NOT NULL,
                status INTEGER NOT NULL,
                final_url TEXT NOT NULL,
                payload TEXT NOT NULL
            );",
        )?;
        Ok(Self {
            path,
            conn: Mutex::new(conn),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn connection(&self) -> std::sync::MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(|poison| poison.into_inner())
    }
}

impl CacheStore for SqliteCacheStore {
    fn load(&self, key: &CacheKey) -> CacheResult<Option<CacheEntry>> {
        let conn = self.connection();
        let row = conn
            .query_row(
                "SELECT created_at, expires_at, content_kind, status, final_url, payload
                 FROM response_cache WHERE cache_key = ?1",
                params![key.as_str()],
                |row| {
                    Ok((
                        row.get::<_, DateTime<Utc>>(0)?,
                        row.get::<_, DateTime<Utc>>(1)?,
                        row.get::<_, String>(2)?,
                        row.get::<_, i64>(3)?,
                        row.get::<_, String>(4)?,
                        row.get::<_, String>(5)?,
                    ))
                },
            )
            .optional()?;
        let Some((created_at, expires_at, kind, status, final_url, content)) = row else {
            return Ok(None);
        };
        let kind = kind.parse::<ContentKind>().map_err(|reason| CacheError::Corrupt {
            key: key.to_string(),
            reason,
        })?;
        let status = u16::try_from(status).map_err(|_| CacheError::Corrupt {
            key: key.to_string(),
            reason: format!("status {status} out of range"),
        })?;
        Ok(Some(CacheEntry {
            key: key.clone(),
            payload: CachedPayload {
                content,
                kind,
                status,
                final_url,
            },
            created_at,
            expires_at,
        }))
    }

    fn store(&self, entry: &CacheEntry) -> CacheResult<()> {
        let conn = self.connection();
        conn.execute(
            "INSERT INTO response_cache
                (cache_key, created_at, expires_at, content_kind, status, final_url, payload)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
             ON CONFLICT(cache_key) DO UPDATE SET
                created_at = excluded.created_at,
                expires_at = excluded.expires_at,
                content_kind = excluded.content_kind,
                status = excluded.status,
                final_url = excluded.final_url,
                payload = excluded.payload",
            params![
                entry.key.as_str(),
                entry.created_at,
                entry.expires_at,
                entry.payload.kind.as_str(),
                entry.payload.status as i64,
                entry.payload.final_url,
                entry.payload.content,
            ],
        )?;
        Ok(())
    }

    fn evict(&self, key: &CacheKey, created_at: DateTime<Utc>) -> CacheResult<()> {
        let conn = self.connection();
        conn.execute(
            "DELETE FROM response_cache WHERE cache_key = ?1 AND created_at = ?2",
            params![key.as_str(), created_at],
        )?;
        Ok(())
    }
}

/// Time-boxed response store. Stale entries are never returned.
pub struct ResponseCache {
    store: Arc<dyn CacheStore>,
    ttl: Duration,
    clock: Arc<dyn Clock>,
}

impl fmt::Debug for ResponseCache {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResponseCache")
            .field("ttl", &self.ttl)
            .finish_non_exhaustive()
    }
}

impl ResponseCache {
    pub fn new(store: Arc<dyn CacheStore>, ttl: Duration, clock: Arc<dyn Clock>) -> Self {
        Self { store, ttl, clock }
    }

    /// SQLite-backed when a cache directory is configured, in memory otherwise.
    pub fn from_config(config: &CacheSection, clock: Arc<dyn Clock>) -> CacheResult<Self> {
        let store: Arc<dyn CacheStore> = match config.database_path() {
            Some(path) => Arc::new(SqliteCacheStore::open(path)?),
            None => Arc::new(MemoryCacheStore::new()),
        };
        Ok(Self::new(store, config.ttl(), clock))
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    pub fn is_fresh(&self, entry: &CacheEntry) -> bool {
        let now = self.clock.now();
        now - entry.created_at < self.ttl && now < entry.expires_at
    }

    pub fn get(&self, key: &CacheKey) -> CacheResult<Option<CacheEntry>> {
        match self.store.load(key)? {
            Some(entry) if self.is_fresh(&entry) => Ok(Some(entry)),
            Some(stale) => {
                self.store.evict(key, stale.created_at)?;
                Ok(None)
            }
            None => Ok(None),
        }
    }

    pub fn put(&self, key: &CacheKey, payload: CachedPayload) -> CacheResult<CacheEntry> {
        let created_at = self.clock.now();
        let entry = CacheEntry {
            key: key.clone(),
            payload,
            created_at,
            expires_at: created_at + self.ttl,
        };
        self.store.store(&entry)?;
        Ok(entry)
    }
}
