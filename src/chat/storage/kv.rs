//! Key-value persistence backends.

use std::future::Future;
use std::pin::Pin;

use dashmap::DashMap;
use rusqlite::OptionalExtension;
use tokio_rusqlite::Connection;

use crate::chat::core::config::StorageConfig;
use crate::chat::core::errors::{ChatError, ChatResult};

/// Boxed future type for key-value operations.
pub type StoreFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Persisted storage collaborator.
pub trait KeyValueStore: Send + Sync {
    /// Read a value.
    ///
    /// # Errors
    /// Returns an error if storage access fails.
    fn get(&self, key: &str) -> StoreFuture<'_, ChatResult<Option<String>>>;

    /// Write a value, replacing any previous one.
    ///
    /// # Errors
    /// Returns an error if storage access fails.
    fn set(&self, key: &str, value: String) -> StoreFuture<'_, ChatResult<()>>;

    /// Delete a value; missing keys are not an error.
    ///
    /// # Errors
    /// Returns an error if storage access fails.
    fn remove(&self, key: &str) -> StoreFuture<'_, ChatResult<()>>;
}

/// Process-local store backed by a concurrent map.
#[derive(Debug, Default)]
pub struct InMemoryKeyValueStore {
    entries: DashMap<String, String>,
}

impl InMemoryKeyValueStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored keys.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether nothing is stored.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl KeyValueStore for InMemoryKeyValueStore {
    fn get(&self, key: &str) -> StoreFuture<'_, ChatResult<Option<String>>> {
        let value = self.entries.get(key).map(|entry| entry.value().clone());
        Box::pin(async move { Ok(value) })
    }

    fn set(&self, key: &str, value: String) -> StoreFuture<'_, ChatResult<()>> {
        self.entries.insert(key.to_string(), value);
        Box::pin(async { Ok(()) })
    }

    fn remove(&self, key: &str) -> StoreFuture<'_, ChatResult<()>> {
        self.entries.remove(key);
        Box::pin(async { Ok(()) })
    }
}

/// `SQLite` implementation of the key-value store.
pub struct SqliteKeyValueStore {
    conn: Connection,
    table: String,
}

impl SqliteKeyValueStore {
    /// Open (or create) the database and the key-value table.
    ///
    /// # Errors
    /// Returns an error if the table name is not a plain identifier or the
    /// database cannot be opened.
    pub async fn new(config: &StorageConfig) -> ChatResult<Self> {
        let table = config.table.clone();
        if !table.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
            return Err(ChatError::InvalidConfig(format!(
                "storage.table must be a plain identifier, got {table:?}"
            )));
        }

        let conn = Connection::open(&config.sqlite_path).await?;
        let table_name = table.clone();

        conn.call(move |conn| {
            conn.execute_batch(&format!(
                "CREATE TABLE IF NOT EXISTS {table_name} (
                    key TEXT PRIMARY KEY,
                    value TEXT NOT NULL,
                    updated_at INTEGER NOT NULL
                )"
            ))?;
            Ok(())
        })
        .await?;

        Ok(Self { conn, table })
    }
}

impl KeyValueStore for SqliteKeyValueStore {
    fn get(&self, key: &str) -> StoreFuture<'_, ChatResult<Option<String>>> {
        let key = key.to_string();
        Box::pin(async move {
            let table = self.table.clone();
            let value = self
                .conn
                .call(move |conn| {
                    let mut stmt =
                        conn.prepare(&format!("SELECT value FROM {table} WHERE key = ?1"))?;
                    let value: Option<String> = stmt
                        .query_row(rusqlite::params![key], |row| row.get(0))
                        .optional()?;
                    Ok(value)
                })
                .await?;
            Ok(value)
        })
    }

    fn set(&self, key: &str, value: String) -> StoreFuture<'_, ChatResult<()>> {
        let key = key.to_string();
        Box::pin(async move {
            let table = self.table.clone();
            let updated_at = chrono::Utc::now().timestamp_millis();

            self.conn
                .call(move |conn| {
                    conn.execute(
                        &format!(
                            "INSERT OR REPLACE INTO {table} (key, value, updated_at)
                             VALUES (?1, ?2, ?3)"
                        ),
                        rusqlite::params![key, value, updated_at],
                    )?;
                    Ok(())
                })
                .await?;

            Ok(())
        })
    }

    fn remove(&self, key: &str) -> StoreFuture<'_, ChatResult<()>> {
        let key = key.to_string();
        Box::pin(async move {
            let table = self.table.clone();

            self.conn
                .call(move |conn| {
                    conn.execute(
                        &format!("DELETE FROM {table} WHERE key = ?1"),
                        rusqlite::params![key],
                    )?;
                    Ok(())
                })
                .await?;

            Ok(())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_in_memory_set_get_remove() {
        let store = InMemoryKeyValueStore::new();
        assert!(store.get("a").await.unwrap().is_none());
        store.set("a", "1".to_string()).await.unwrap();
        store.set("a", "2".to_string()).await.unwrap();
        assert_eq!(store.get("a").await.unwrap().as_deref(), Some("2"));
        assert_eq!(store.len(), 1);
        store.remove("a").await.unwrap();
        store.remove("a").await.unwrap();
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn test_sqlite_rejects_unsafe_table_name() {
        let config = StorageConfig {
            sqlite_path: ":memory:".into(),
            table: "kv; DROP TABLE x".to_string(),
        };
        let result = SqliteKeyValueStore::new(&config).await;
        assert!(matches!(result, Err(ChatError::InvalidConfig(_))));
    }

    #[tokio::test]
    async fn test_sqlite_in_memory_database() {
        let config = StorageConfig {
            sqlite_path: ":memory:".into(),
            table: "chat_kv".to_string(),
        };
        let store = SqliteKeyValueStore::new(&config).await.unwrap();
        store.set("k", "v".to_string()).await.unwrap();
        assert_eq!(store.get("k").await.unwrap().as_deref(), Some("v"));
        store.remove("k").await.unwrap();
        assert!(store.get("k").await.unwrap().is_none());
    }
}
