//! Document persistence backend and its SQLite implementation.

use async_trait::async_trait;
use color_eyre::{eyre::eyre, Result};
use rusqlite::{params, Connection, OptionalExtension};
use serde_json::{Map, Value};
use std::path::Path;
use std::sync::Mutex;

use super::identity::DocumentKey;
use crate::db::Database;

/// JSON object stored under a document key.
pub type Document = Map<String, Value>;

/// Key/document store with merge writes.
#[async_trait]
pub trait PersistenceBackend: Send + Sync {
  /// Fetch a document, `None` if it does not exist.
  async fn get(&self, key: &DocumentKey) -> Result<Option<Document>>;

  /// Write `fields` into the document, creating it if needed. Fields not
  /// mentioned are left untouched.
  async fn set_merge(&self, key: &DocumentKey, fields: Document) -> Result<()>;
}

/// Overlay `fields` onto `existing` at the top level.
pub fn merge_fields(existing: &mut Document, fields: Document) {
  for (name, value) in fields {
    existing.insert(name, value);
  }
}

/// SQLite-backed document store.
pub struct SqliteDocumentStore {
  conn: Mutex<Connection>,
}

impl SqliteDocumentStore {
  pub fn open_at(path: &Path) -> Result<Self> {
    Self::from_database(Database::open(path)?)
  }

  #[cfg(test)]
  pub fn open_in_memory() -> Result<Self> {
    Self::from_database(Database::open_in_memory()?)
  }

  fn from_database(db: Database) -> Result<Self> {
    db.migrate(DOCUMENT_SCHEMA)
      .map_err(|e| eyre!("Failed to run document migrations: {}", e))?;
    Ok(Self {
      conn: Mutex::new(db.into_connection()),
    })
  }
}

const DOCUMENT_SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS documents (
    path TEXT PRIMARY KEY,
    data TEXT NOT NULL,
    updated_at TEXT NOT NULL DEFAULT (datetime('now'))
);
"#;

fn read_document(conn: &Connection, path: &str) -> Result<Option<Document>> {
  let data: Option<String> = conn
    .query_row(
      "SELECT data FROM documents WHERE path = ?",
      params![path],
      |row| row.get(0),
    )
    .optional()
    .map_err(|e| eyre!("Failed to read document {}: {}", path, e))?;

  data
    .map(|data| {
      serde_json::from_str(&data).map_err(|e| eyre!("Corrupt document {}: {}", path, e))
    })
    .transpose()
}

#[async_trait]
impl PersistenceBackend for SqliteDocumentStore {
  async fn get(&self, key: &DocumentKey) -> Result<Option<Document>> {
    let conn = self
      .conn
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;
    read_document(&conn, &key.path())
  }

  async fn set_merge(&self, key: &DocumentKey, fields: Document) -> Result<()> {
    let mut conn = self
      .conn
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;
    let path = key.path();

    let tx = conn
      .transaction()
      .map_err(|e| eyre!("Failed to begin transaction: {}", e))?;

    let mut document = read_document(&tx, &path)?.unwrap_or_default();
    merge_fields(&mut document, fields);
    let data = serde_json::to_string(&document)
      .map_err(|e| eyre!("Failed to serialize document: {}", e))?;

    tx.execute(
      "INSERT OR REPLACE INTO documents (path, data, updated_at) VALUES (?, ?, datetime('now'))",
      params![path, data],
    )
    .map_err(|e| eyre!("Failed to write document {}: {}", path, e))?;

    tx.commit()
      .map_err(|e| eyre!("Failed to commit transaction: {}", e))?;

    Ok(())
  }
}
