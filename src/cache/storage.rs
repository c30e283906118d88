//! Cache storage trait with SQLite and in-memory implementations.

use chrono::{DateTime, Utc};
use color_eyre::{eyre::eyre, Result};
use rusqlite::{params, Connection, OptionalExtension};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tracing::warn;

use super::traits::{key_hash, CachedResponse};
use crate::gateway::{Pending, QueuedRequest, SyncQueue};
use crate::http::{Headers, Request};

/// Trait for cache storage backends.
///
/// A backend holds named buckets, each mapping request keys to response
/// snapshots. Buckets are listed in creation order.
pub trait CacheStorage: Send + Sync {
  /// Create a bucket if it does not exist yet.
  fn open_bucket(&self, name: &str) -> Result<()>;

  /// Names of all existing buckets.
  fn bucket_names(&self) -> Result<Vec<String>>;

  /// Delete a bucket and its entries. Returns whether it existed.
  fn delete_bucket(&self, name: &str) -> Result<bool>;

  /// Get an entry from one bucket.
  fn get(&self, bucket: &str, key: &str) -> Result<Option<CachedResponse>>;

  /// Store an entry, creating the bucket if needed.
  fn put(&self, bucket: &str, key: &str, response: &CachedResponse) -> Result<()>;

  /// Number of entries in a bucket.
  fn entry_count(&self, bucket: &str) -> Result<usize>;

  /// Find an entry in any bucket, searching in creation order.
  fn lookup(&self, key: &str) -> Result<Option<CachedResponse>> {
    for bucket in self.bucket_names()? {
      if let Some(found) = self.get(&bucket, key)? {
        return Ok(Some(found));
      }
    }
    Ok(None)
  }
}

/// Storage kept in process memory; contents vanish on drop.
#[derive(Default)]
pub struct MemoryStorage {
  buckets: Mutex<Vec<(String, HashMap<String, CachedResponse>)>>,
}

impl MemoryStorage {
  pub fn new() -> Self {
    Self::default()
  }

  fn with_buckets<R>(
    &self,
    f: impl FnOnce(&mut Vec<(String, HashMap<String, CachedResponse>)>) -> R,
  ) -> Result<R> {
    let mut buckets = self
      .buckets
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;
    Ok(f(&mut buckets))
  }
}

impl CacheStorage for MemoryStorage {
  fn open_bucket(&self, name: &str) -> Result<()> {
    self.with_buckets(|buckets| {
      if !buckets.iter().any(|(n, _)| n == name) {
        buckets.push((name.to_string(), HashMap::new()));
      }
    })
  }

  fn bucket_names(&self) -> Result<Vec<String>> {
    self.with_buckets(|buckets| buckets.iter().map(|(n, _)| n.clone()).collect())
  }

  fn delete_bucket(&self, name: &str) -> Result<bool> {
    self.with_buckets(|buckets| {
      let before = buckets.len();
      buckets.retain(|(n, _)| n != name);
      buckets.len() != before
    })
  }

  fn get(&self, bucket: &str, key: &str) -> Result<Option<CachedResponse>> {
    self.with_buckets(|buckets| {
      buckets
        .iter()
        .find(|(n, _)| n == bucket)
        .and_then(|(_, entries)| entries.get(key).cloned())
    })
  }

  fn put(&self, bucket: &str, key: &str, response: &CachedResponse) -> Result<()> {
    self.with_buckets(|buckets| {
      let index = match buckets.iter().position(|(n, _)| n == bucket) {
        Some(index) => index,
        None => {
          buckets.push((bucket.to_string(), HashMap::new()));
          buckets.len() - 1
        }
      };
      buckets[index].1.insert(key.to_string(), response.clone());
    })
  }

  fn entry_count(&self, bucket: &str) -> Result<usize> {
    self.with_buckets(|buckets| {
      buckets
        .iter()
        .find(|(n, _)| n == bucket)
        .map(|(_, entries)| entries.len())
        .unwrap_or(0)
    })
  }
}

/// SQLite-based cache storage implementation.
///
/// Also persists the background sync queue.
pub struct SqliteStorage {
  conn: Mutex<Connection>,
}

impl SqliteStorage {
  /// Create a new SQLite storage at the default location.
  pub fn open() -> Result<Self> {
    Self::open_at(&Self::default_path()?)
  }

  /// Open (or create) the database at `path`.
  pub fn open_at(path: &Path) -> Result<Self> {
    // Ensure parent directory exists
    if let Some(parent) = path.parent() {
      std::fs::create_dir_all(parent)
        .map_err(|e| eyre!("Failed to create cache directory: {}", e))?;
    }

    let conn = Connection::open(path)
      .map_err(|e| eyre!("Failed to open cache database at {}: {}", path.display(), e))?;

    Self::from_connection(conn)
  }

  /// Open a private in-memory database.
  pub fn open_in_memory() -> Result<Self> {
    let conn = Connection::open_in_memory()
      .map_err(|e| eyre!("Failed to open in-memory cache database: {}", e))?;
    Self::from_connection(conn)
  }

  fn from_connection(conn: Connection) -> Result<Self> {
    let storage = Self {
      conn: Mutex::new(conn),
    };
    storage.run_migrations()?;
    Ok(storage)
  }

  /// Get the default database path.
  pub fn default_path() -> Result<PathBuf> {
    let data_dir = dirs::data_dir()
      .or_else(|| dirs::home_dir().map(|p| p.join(".local/share")))
      .ok_or_else(|| eyre!("Could not determine data directory"))?;

    Ok(data_dir.join("omnix").join("cache.db"))
  }

  /// Run database migrations for cache tables.
  fn run_migrations(&self) -> Result<()> {
    let conn = self.lock()?;

    conn
      .execute_batch(CACHE_SCHEMA)
      .map_err(|e| eyre!("Failed to run cache migrations: {}", e))?;

    Ok(())
  }

  fn lock(&self) -> Result<std::sync::MutexGuard<'_, Connection>> {
    self.conn.lock().map_err(|e| eyre!("Lock poisoned: {}", e))
  }
}

/// Schema for cache tables.
const CACHE_SCHEMA: &str = r#"
-- Named buckets; rowid preserves creation order
CREATE TABLE IF NOT EXISTS cache_buckets (
    name TEXT PRIMARY KEY,
    created_at TEXT NOT NULL DEFAULT (datetime('now'))
);

-- Response snapshots keyed by hashed request key
CREATE TABLE IF NOT EXISTS cache_entries (
    bucket TEXT NOT NULL,
    key_hash TEXT NOT NULL,
    url TEXT NOT NULL,
    status INTEGER NOT NULL,
    headers TEXT NOT NULL,
    body BLOB NOT NULL,
    cached_at TEXT NOT NULL,
    PRIMARY KEY (bucket, key_hash)
);

-- Mutating requests waiting for background sync
CREATE TABLE IF NOT EXISTS sync_queue (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    request TEXT NOT NULL,
    queued_at TEXT NOT NULL DEFAULT (datetime('now'))
);
"#;

const DATETIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

impl CacheStorage for SqliteStorage {
  fn open_bucket(&self, name: &str) -> Result<()> {
    let conn = self.lock()?;
    conn
      .execute(
        "INSERT OR IGNORE INTO cache_buckets (name) VALUES (?)",
        params![name],
      )
      .map_err(|e| eyre!("Failed to create bucket {}: {}", name, e))?;
    Ok(())
  }

  fn bucket_names(&self) -> Result<Vec<String>> {
    let conn = self.lock()?;
    let mut stmt = conn
      .prepare("SELECT name FROM cache_buckets ORDER BY rowid")
      .map_err(|e| eyre!("Failed to prepare query: {}", e))?;

    let names = stmt
      .query_map([], |row| row.get(0))
      .map_err(|e| eyre!("Failed to list buckets: {}", e))?
      .collect::<rusqlite::Result<Vec<String>>>()
      .map_err(|e| eyre!("Failed to read bucket name: {}", e))?;

    Ok(names)
  }

  fn delete_bucket(&self, name: &str) -> Result<bool> {
    let conn = self.lock()?;

    conn
      .execute("BEGIN TRANSACTION", [])
      .map_err(|e| eyre!("Failed to begin transaction: {}", e))?;

    let result = conn
      .execute("DELETE FROM cache_entries WHERE bucket = ?", params![name])
      .and_then(|_| conn.execute("DELETE FROM cache_buckets WHERE name = ?", params![name]));

    match result {
      Ok(deleted) => {
        conn
          .execute("COMMIT", [])
          .map_err(|e| eyre!("Failed to commit transaction: {}", e))?;
        Ok(deleted > 0)
      }
      Err(e) => {
        let _ = conn.execute("ROLLBACK", []);
        Err(eyre!("Failed to delete bucket {}: {}", name, e))
      }
    }
  }

  fn get(&self, bucket: &str, key: &str) -> Result<Option<CachedResponse>> {
    let conn = self.lock()?;
    let row: Option<(String, u16, String, Vec<u8>, String)> = conn
      .query_row(
        "SELECT url, status, headers, body, cached_at FROM cache_entries
         WHERE bucket = ? AND key_hash = ?",
        params![bucket, key_hash(key)],
        |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?, row.get(4)?)),
      )
      .optional()
      .map_err(|e| eyre!("Failed to read cache entry: {}", e))?;

    let Some((url, status, headers, body, cached_at)) = row else {
      return Ok(None);
    };

    let headers: Headers = serde_json::from_str(&headers)
      .map_err(|e| eyre!("Failed to deserialize cached headers: {}", e))?;

    Ok(Some(CachedResponse {
      url,
      status,
      headers,
      body,
      cached_at: parse_datetime(&cached_at)?,
    }))
  }

  fn put(&self, bucket: &str, key: &str, response: &CachedResponse) -> Result<()> {
    let conn = self.lock()?;
    let headers = serde_json::to_string(&response.headers)
      .map_err(|e| eyre!("Failed to serialize headers: {}", e))?;

    conn
      .execute(
        "INSERT OR IGNORE INTO cache_buckets (name) VALUES (?)",
        params![bucket],
      )
      .map_err(|e| eyre!("Failed to create bucket {}: {}", bucket, e))?;

    conn
      .execute(
        "INSERT OR REPLACE INTO cache_entries (bucket, key_hash, url, status, headers, body, cached_at)
         VALUES (?, ?, ?, ?, ?, ?, ?)",
        params![
          bucket,
          key_hash(key),
          response.url,
          response.status,
          headers,
          response.body,
          response.cached_at.format(DATETIME_FORMAT).to_string(),
        ],
      )
      .map_err(|e| eyre!("Failed to store cache entry: {}", e))?;

    Ok(())
  }

  fn entry_count(&self, bucket: &str) -> Result<usize> {
    let conn = self.lock()?;
    let count: i64 = conn
      .query_row(
        "SELECT COUNT(*) FROM cache_entries WHERE bucket = ?",
        params![bucket],
        |row| row.get(0),
      )
      .map_err(|e| eyre!("Failed to count cache entries: {}", e))?;
    Ok(count as usize)
  }
}

impl SyncQueue for SqliteStorage {
  fn enqueue(&self, request: &Request) -> Result<()> {
    let conn = self.lock()?;
    let data =
      serde_json::to_string(request).map_err(|e| eyre!("Failed to serialize request: {}", e))?;
    conn
      .execute("INSERT INTO sync_queue (request) VALUES (?)", params![data])
      .map_err(|e| eyre!("Failed to queue request: {}", e))?;
    Ok(())
  }

  fn pending(&self) -> Result<Pending> {
    let conn = self.lock()?;
    let mut stmt = conn
      .prepare("SELECT id, request, queued_at FROM sync_queue ORDER BY id")
      .map_err(|e| eyre!("Failed to prepare query: {}", e))?;

    let rows = stmt
      .query_map([], |row| {
        Ok((
          row.get::<_, i64>(0)?,
          row.get::<_, String>(1)?,
          row.get::<_, String>(2)?,
        ))
      })
      .map_err(|e| eyre!("Failed to read sync queue: {}", e))?
      .collect::<rusqlite::Result<Vec<_>>>()
      .map_err(|e| eyre!("Failed to read sync queue row: {}", e))?;

    let mut pending = Pending::default();
    for (id, data, queued_at) in rows {
      let decoded = serde_json::from_str::<Request>(&data)
        .map_err(|e| eyre!("Failed to deserialize queued request {}: {}", id, e))
        .and_then(|request| {
          Ok(QueuedRequest {
            id,
            request,
            queued_at: parse_datetime(&queued_at)?,
          })
        });
      match decoded {
        Ok(queued) => pending.requests.push(queued),
        Err(e) => {
          warn!(id, error = %e, "skipping unreadable sync queue entry");
          pending.unreadable.push(id);
        }
      }
    }
    Ok(pending)
  }

  fn remove(&self, ids: &[i64]) -> Result<()> {
    let conn = self.lock()?;

    conn
      .execute("BEGIN TRANSACTION", [])
      .map_err(|e| eyre!("Failed to begin transaction: {}", e))?;

    let result = ids.iter().try_for_each(|id| {
      conn
        .execute("DELETE FROM sync_queue WHERE id = ?", params![id])
        .map(|_| ())
        .map_err(|e| (*id, e))
    });

    match result {
      Ok(()) => {
        conn
          .execute("COMMIT", [])
          .map_err(|e| eyre!("Failed to commit transaction: {}", e))?;
        Ok(())
      }
      Err((id, e)) => {
        let _ = conn.execute("ROLLBACK", []);
        Err(eyre!("Failed to remove queued request {}: {}", id, e))
      }
    }
  }
}

/// Parse a datetime string from SQLite format.
fn parse_datetime(s: &str) -> Result<DateTime<Utc>> {
  // SQLite stores as "YYYY-MM-DD HH:MM:SS"
  chrono::NaiveDateTime::parse_from_str(s, DATETIME_FORMAT)
    .map(|dt| dt.and_utc())
    .map_err(|e| eyre!("Failed to parse datetime '{}': {}", s, e))
}
