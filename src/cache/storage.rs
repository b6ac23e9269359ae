//! Cache storage trait and SQLite implementation.

use chrono::{DateTime, Utc};
use color_eyre::{eyre::eyre, Result};
use rusqlite::{params, Connection, OptionalExtension};
use std::path::Path;
use std::sync::Mutex;
use url::Url;

use super::traits::{CachedResponse, LifecycleState, RequestKey, ResponseSnapshot, ResponseType};
use crate::db::Database;

/// Trait for resource cache backends.
///
/// Entries are namespaced by generation. A generation exists once it has been
/// opened and until it is deleted.
pub trait CacheStorage: Send + Sync {
  /// Create the generation if it does not exist yet.
  fn open(&self, generation: &str) -> Result<()>;

  /// Look up a single request in a generation.
  fn match_request(&self, generation: &str, key: &RequestKey) -> Result<Option<CachedResponse>>;

  /// Store (or overwrite) a single entry.
  fn put(&self, generation: &str, key: &RequestKey, snapshot: &ResponseSnapshot) -> Result<()>;

  /// Store a batch of entries atomically: either all are written or none.
  fn put_all(&self, generation: &str, entries: &[(RequestKey, ResponseSnapshot)]) -> Result<()>;

  /// Request keys stored in a generation, sorted.
  #[cfg_attr(not(test), allow(dead_code))]
  fn keys(&self, generation: &str) -> Result<Vec<RequestKey>>;

  /// All known generation names, sorted.
  fn generations(&self) -> Result<Vec<String>>;

  /// Delete a generation and its entries. Returns whether it existed.
  fn delete(&self, generation: &str) -> Result<bool>;

  /// Persisted lifecycle state of a generation (`Uninstalled` if unknown).
  fn lifecycle_state(&self, generation: &str) -> Result<LifecycleState>;

  /// Persist the lifecycle state of a generation, opening it if needed.
  fn set_lifecycle_state(&self, generation: &str, state: LifecycleState) -> Result<()>;
}

/// SQLite-based cache storage implementation.
pub struct SqliteStorage {
  conn: Mutex<Connection>,
}

impl SqliteStorage {
  /// Open the cache database at `path`.
  pub fn open_at(path: &Path) -> Result<Self> {
    Self::from_database(Database::open(path)?)
  }

  /// Cache backed by a private in-memory database.
  #[cfg(test)]
  pub fn open_in_memory() -> Result<Self> {
    Self::from_database(Database::open_in_memory()?)
  }

  fn from_database(db: Database) -> Result<Self> {
    db.migrate(CACHE_SCHEMA)
      .map_err(|e| eyre!("Failed to run cache migrations: {}", e))?;
    Ok(Self {
      conn: Mutex::new(db.into_connection()),
    })
  }

  fn lock(&self) -> Result<std::sync::MutexGuard<'_, Connection>> {
    self.conn.lock().map_err(|e| eyre!("Lock poisoned: {}", e))
  }
}

/// Schema for cache tables.
const CACHE_SCHEMA: &str = r#"
-- One row per cache generation
CREATE TABLE IF NOT EXISTS cache_generations (
    generation TEXT PRIMARY KEY,
    state TEXT NOT NULL DEFAULT 'uninstalled',
    created_at TEXT NOT NULL DEFAULT (datetime('now'))
);

-- Response snapshots keyed by generation + request identity hash
CREATE TABLE IF NOT EXISTS cache_entries (
    generation TEXT NOT NULL,
    key_hash TEXT NOT NULL,
    request_key TEXT NOT NULL,
    status INTEGER NOT NULL,
    headers TEXT NOT NULL,
    body BLOB NOT NULL,
    url TEXT NOT NULL,
    response_type TEXT NOT NULL,
    cached_at TEXT NOT NULL DEFAULT (datetime('now')),
    PRIMARY KEY (generation, key_hash)
);

CREATE INDEX IF NOT EXISTS idx_cache_entries_generation ON cache_entries(generation);
"#;

fn ensure_generation(conn: &Connection, generation: &str) -> Result<()> {
  conn
    .execute(
      "INSERT OR IGNORE INTO cache_generations (generation) VALUES (?)",
      params![generation],
    )
    .map_err(|e| eyre!("Failed to open cache generation {}: {}", generation, e))?;
  Ok(())
}

fn insert_entry(
  conn: &Connection,
  generation: &str,
  key: &RequestKey,
  snapshot: &ResponseSnapshot,
) -> Result<()> {
  let headers = serde_json::to_string(&snapshot.headers)
    .map_err(|e| eyre!("Failed to serialize headers: {}", e))?;

  conn
    .execute(
      "INSERT OR REPLACE INTO cache_entries
         (generation, key_hash, request_key, status, headers, body, url, response_type, cached_at)
       VALUES (?, ?, ?, ?, ?, ?, ?, ?, datetime('now'))",
      params![
        generation,
        key.cache_hash(),
        key.as_str(),
        snapshot.status,
        headers,
        snapshot.body,
        snapshot.url.as_str(),
        snapshot.response_type.as_str(),
      ],
    )
    .map_err(|e| eyre!("Failed to store cache entry {}: {}", key, e))?;

  Ok(())
}

impl CacheStorage for SqliteStorage {
  fn open(&self, generation: &str) -> Result<()> {
    let conn = self.lock()?;
    ensure_generation(&conn, generation)
  }

  fn match_request(&self, generation: &str, key: &RequestKey) -> Result<Option<CachedResponse>> {
    let conn = self.lock()?;

    let row: Option<(u16, String, Vec<u8>, String, String, String)> = conn
      .query_row(
        "SELECT status, headers, body, url, response_type, cached_at FROM cache_entries
         WHERE generation = ? AND key_hash = ?",
        params![generation, key.cache_hash()],
        |row| {
          Ok((
            row.get(0)?,
            row.get(1)?,
            row.get(2)?,
            row.get(3)?,
            row.get(4)?,
            row.get(5)?,
          ))
        },
      )
      .optional()
      .map_err(|e| eyre!("Failed to look up cache entry {}: {}", key, e))?;

    let Some((status, headers, body, url, response_type, cached_at)) = row else {
      return Ok(None);
    };

    let snapshot = ResponseSnapshot {
      status,
      headers: serde_json::from_str(&headers)
        .map_err(|e| eyre!("Failed to deserialize headers: {}", e))?,
      body,
      url: Url::parse(&url).map_err(|e| eyre!("Invalid cached url '{}': {}", url, e))?,
      response_type: ResponseType::parse(&response_type)?,
    };

    Ok(Some(CachedResponse {
      snapshot,
      cached_at: parse_datetime(&cached_at)?,
    }))
  }

  fn put(&self, generation: &str, key: &RequestKey, snapshot: &ResponseSnapshot) -> Result<()> {
    let conn = self.lock()?;
    ensure_generation(&conn, generation)?;
    insert_entry(&conn, generation, key, snapshot)
  }

  fn put_all(&self, generation: &str, entries: &[(RequestKey, ResponseSnapshot)]) -> Result<()> {
    let mut conn = self.lock()?;

    let tx = conn
      .transaction()
      .map_err(|e| eyre!("Failed to begin transaction: {}", e))?;

    ensure_generation(&tx, generation)?;
    for (key, snapshot) in entries {
      insert_entry(&tx, generation, key, snapshot)?;
    }

    tx.commit()
      .map_err(|e| eyre!("Failed to commit transaction: {}", e))?;

    Ok(())
  }

  fn keys(&self, generation: &str) -> Result<Vec<RequestKey>> {
    let conn = self.lock()?;

    let mut stmt = conn
      .prepare("SELECT request_key FROM cache_entries WHERE generation = ? ORDER BY request_key")
      .map_err(|e| eyre!("Failed to prepare query: {}", e))?;

    let keys = stmt
      .query_map(params![generation], |row| row.get::<_, String>(0))
      .map_err(|e| eyre!("Failed to query cache keys: {}", e))?
      .collect::<rusqlite::Result<Vec<_>>>()
      .map_err(|e| eyre!("Failed to read cache keys: {}", e))?;

    Ok(keys.into_iter().map(RequestKey::from).collect())
  }

  fn generations(&self) -> Result<Vec<String>> {
    let conn = self.lock()?;

    // Entries written without an explicit open still count as a generation
    let mut stmt = conn
      .prepare(
        "SELECT generation FROM cache_generations
         UNION
         SELECT DISTINCT generation FROM cache_entries
         ORDER BY 1",
      )
      .map_err(|e| eyre!("Failed to prepare query: {}", e))?;

    let generations = stmt
      .query_map([], |row| row.get::<_, String>(0))
      .map_err(|e| eyre!("Failed to query generations: {}", e))?
      .collect::<rusqlite::Result<Vec<_>>>()
      .map_err(|e| eyre!("Failed to read generations: {}", e))?;

    Ok(generations)
  }

  fn delete(&self, generation: &str) -> Result<bool> {
    let mut conn = self.lock()?;

    let tx = conn
      .transaction()
      .map_err(|e| eyre!("Failed to begin transaction: {}", e))?;

    let entries = tx
      .execute(
        "DELETE FROM cache_entries WHERE generation = ?",
        params![generation],
      )
      .map_err(|e| eyre!("Failed to delete entries of {}: {}", generation, e))?;
    let rows = tx
      .execute(
        "DELETE FROM cache_generations WHERE generation = ?",
        params![generation],
      )
      .map_err(|e| eyre!("Failed to delete generation {}: {}", generation, e))?;

    tx.commit()
      .map_err(|e| eyre!("Failed to commit transaction: {}", e))?;

    Ok(entries > 0 || rows > 0)
  }

  fn lifecycle_state(&self, generation: &str) -> Result<LifecycleState> {
    let conn = self.lock()?;

    let state: Option<String> = conn
      .query_row(
        "SELECT state FROM cache_generations WHERE generation = ?",
        params![generation],
        |row| row.get(0),
      )
      .optional()
      .map_err(|e| eyre!("Failed to read lifecycle state: {}", e))?;

    match state {
      Some(s) => LifecycleState::parse(&s),
      None => Ok(LifecycleState::Uninstalled),
    }
  }

  fn set_lifecycle_state(&self, generation: &str, state: LifecycleState) -> Result<()> {
    let conn = self.lock()?;
    ensure_generation(&conn, generation)?;

    conn
      .execute(
        "UPDATE cache_generations SET state = ? WHERE generation = ?",
        params![state.as_str(), generation],
      )
      .map_err(|e| eyre!("Failed to store lifecycle state: {}", e))?;

    Ok(())
  }
}

/// Parse a datetime string from SQLite format.
fn parse_datetime(s: &str) -> Result<DateTime<Utc>> {
  // SQLite stores as "YYYY-MM-DD HH:MM:SS"
  chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S")
    .map(|dt| dt.and_utc())
    .map_err(|e| eyre!("Failed to parse datetime '{}': {}", s, e))
}
