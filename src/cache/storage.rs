//! Durable key/value storage backends for cache snapshots and view state.

use rusqlite::{params, Connection, OptionalExtension};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

use super::error::StorageError;

/// A small durable string store with a handful of well-known names.
pub trait DurableStorage: Send + Sync {
  fn get(&self, name: &str) -> Result<Option<String>, StorageError>;

  fn set(&self, name: &str, value: &str) -> Result<(), StorageError>;

  fn remove(&self, name: &str) -> Result<(), StorageError>;
}

/// In-process storage, optionally limited to a byte quota.
#[derive(Debug, Default)]
pub struct MemoryStorage {
  values: Mutex<HashMap<String, String>>,
  quota: Option<usize>,
}

impl MemoryStorage {
  pub fn new() -> Self {
    Self::default()
  }

  /// Reject writes that would push the total stored size past `bytes`.
  pub fn with_quota(bytes: usize) -> Self {
    Self {
      values: Mutex::default(),
      quota: Some(bytes),
    }
  }

  fn values(&self) -> Result<MutexGuard<'_, HashMap<String, String>>, StorageError> {
    self.values.lock().map_err(|_| StorageError::LockPoisoned)
  }
}

impl DurableStorage for MemoryStorage {
  fn get(&self, name: &str) -> Result<Option<String>, StorageError> {
    Ok(self.values()?.get(name).cloned())
  }

  fn set(&self, name: &str, value: &str) -> Result<(), StorageError> {
    let mut values = self.values()?;
    if let Some(quota) = self.quota {
      let others: usize = values
        .iter()
        .filter(|(k, _)| k.as_str() != name)
        .map(|(k, v)| k.len() + v.len())
        .sum();
      let needed = name.len() + value.len();
      let available = quota.saturating_sub(others);
      if needed > available {
        return Err(StorageError::QuotaExceeded { needed, available });
      }
    }
    values.insert(name.to_string(), value.to_string());
    Ok(())
  }

  fn remove(&self, name: &str) -> Result<(), StorageError> {
    self.values()?.remove(name);
    Ok(())
  }
}

/// SQLite-backed storage.
pub struct SqliteStorage {
  conn: Mutex<Connection>,
}

impl SqliteStorage {
  /// Open the database at `path`, or at the default location.
  pub fn open(path: Option<&Path>) -> Result<Self, StorageError> {
    let path = match path {
      Some(p) => p.to_path_buf(),
      None => Self::default_path()?,
    };

    // Ensure parent directory exists
    if let Some(parent) = path.parent() {
      std::fs::create_dir_all(parent)?;
    }

    let conn = Connection::open(&path)?;
    Self::from_connection(conn)
  }

  /// Throwaway database, used in tests.
  pub fn in_memory() -> Result<Self, StorageError> {
    Self::from_connection(Connection::open_in_memory()?)
  }

  fn from_connection(conn: Connection) -> Result<Self, StorageError> {
    conn.execute_batch(STORAGE_SCHEMA)?;
    Ok(Self {
      conn: Mutex::new(conn),
    })
  }

  /// `$XDG_DATA_HOME/issuedeck/cache.db`
  pub fn default_path() -> Result<PathBuf, StorageError> {
    crate::config::data_dir()
      .map(|dir| dir.join("cache.db"))
      .ok_or(StorageError::NoDataDir)
  }

  fn conn(&self) -> Result<MutexGuard<'_, Connection>, StorageError> {
    self.conn.lock().map_err(|_| StorageError::LockPoisoned)
  }
}

const STORAGE_SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS kv_store (
    name TEXT PRIMARY KEY,
    value TEXT NOT NULL,
    stored_at TEXT NOT NULL DEFAULT (datetime('now'))
);
"#;

impl DurableStorage for SqliteStorage {
  fn get(&self, name: &str) -> Result<Option<String>, StorageError> {
    let conn = self.conn()?;
    let value = conn
      .query_row(
        "SELECT value FROM kv_store WHERE name = ?",
        params![name],
        |row| row.get(0),
      )
      .optional()?;
    Ok(value)
  }

  fn set(&self, name: &str, value: &str) -> Result<(), StorageError> {
    self.conn()?.execute(
      "INSERT OR REPLACE INTO kv_store (name, value, stored_at)
       VALUES (?, ?, datetime('now'))",
      params![name, value],
    )?;
    Ok(())
  }

  fn remove(&self, name: &str) -> Result<(), StorageError> {
    self
      .conn()?
      .execute("DELETE FROM kv_store WHERE name = ?", params![name])?;
    Ok(())
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn exercise(storage: &dyn DurableStorage) {
    assert_eq!(storage.get("missing").unwrap(), None);
    storage.set("CACHE_SNAPSHOT", "{}").unwrap();
    assert_eq!(storage.get("CACHE_SNAPSHOT").unwrap().as_deref(), Some("{}"));
    storage.set("CACHE_SNAPSHOT", "[]").unwrap();
    assert_eq!(storage.get("CACHE_SNAPSHOT").unwrap().as_deref(), Some("[]"));
    storage.remove("CACHE_SNAPSHOT").unwrap();
    assert_eq!(storage.get("CACHE_SNAPSHOT").unwrap(), None);
    // Removing twice is fine
    storage.remove("CACHE_SNAPSHOT").unwrap();
  }

  #[test]
  fn test_memory_storage() {
    exercise(&MemoryStorage::new());
  }

  #[test]
  fn test_sqlite_storage() {
    exercise(&SqliteStorage::in_memory().unwrap());
  }

  #[test]
  fn test_memory_quota() {
    let storage = MemoryStorage::with_quota(16);
    storage.set("a", "0123456789").unwrap();
    let err = storage.set("b", "0123456789").unwrap_err();
    assert!(matches!(err, StorageError::QuotaExceeded { .. }));
    // Replacing a value only counts the new size
    storage.set("a", "01234567890123").unwrap();
  }
}
