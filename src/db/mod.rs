use color_eyre::{eyre::eyre, Result};
use rusqlite::Connection;
use std::path::Path;

/// SQLite connection wrapper shared by the cache and conversation stores.
pub struct Database {
  conn: Connection,
}

impl Database {
  /// Open or create the database at `path`, creating parent directories.
  pub fn open(path: &Path) -> Result<Self> {
    if let Some(parent) = path.parent() {
      std::fs::create_dir_all(parent)
        .map_err(|e| eyre!("Failed to create database directory: {}", e))?;
    }

    let conn = Connection::open(path)
      .map_err(|e| eyre!("Failed to open database at {}: {}", path.display(), e))?;

    Ok(Self { conn })
  }

  /// Open a private in-memory database.
  #[cfg(test)]
  pub fn open_in_memory() -> Result<Self> {
    let conn =
      Connection::open_in_memory().map_err(|e| eyre!("Failed to open in-memory database: {}", e))?;
    Ok(Self { conn })
  }

  /// Run a migration script. Scripts must be idempotent (`IF NOT EXISTS`).
  pub fn migrate(&self, schema: &str) -> Result<()> {
    self
      .conn
      .execute_batch(schema)
      .map_err(|e| eyre!("Failed to run migrations: {}", e))?;
    Ok(())
  }

  pub fn into_connection(self) -> Connection {
    self.conn
  }
}
