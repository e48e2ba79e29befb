//! Key-value persistence for the document library.
//!
//! Records are JSON values grouped into named collections and keyed by id.
//! Records come back in insertion order; replacing a record keeps its place.
//! No cross-collection transactions are provided.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use rusqlite::{Connection, OpenFlags, params};
use serde_json::Value;
use thiserror::Error;

/// File name of the SQLite database inside a library directory.
pub const DATABASE_FILE: &str = "library.db";

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("store I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("store database error at {path}: {source}")]
    Sqlite {
        path: PathBuf,
        #[source]
        source: rusqlite::Error,
    },
    #[error("corrupt record {collection}/{id}: {source}")]
    Json {
        collection: String,
        id: String,
        #[source]
        source: serde_json::Error,
    },
}

pub trait KvStore {
    /// Insert or replace the record stored under `id`.
    fn put(&mut self, collection: &str, id: &str, record: Value) -> Result<(), StoreError>;

    /// Every record in the collection, in insertion order. A missing collection is empty.
    fn get_all(&self, collection: &str) -> Result<Vec<Value>, StoreError>;

    /// Returns whether a record was removed.
    fn delete(&mut self, collection: &str, id: &str) -> Result<bool, StoreError>;

    fn clear(&mut self, collection: &str) -> Result<(), StoreError>;
}

/// Volatile store, used in tests and when no library directory is available.
#[derive(Debug, Default)]
pub struct MemoryStore {
    collections: HashMap<String, Vec<(String, Value)>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl KvStore for MemoryStore {
    fn put(&mut self, collection: &str, id: &str, record: Value) -> Result<(), StoreError> {
        let records = self.collections.entry(collection.to_string()).or_default();
        match records.iter_mut().find(|(key, _)| key == id) {
            Some((_, existing)) => *existing = record,
            None => records.push((id.to_string(), record)),
        }
        Ok(())
    }

    fn get_all(&self, collection: &str) -> Result<Vec<Value>, StoreError> {
        Ok(self
            .collections
            .get(collection)
            .map(|c| c.iter().map(|(_, record)| record.clone()).collect())
            .unwrap_or_default())
    }

    fn delete(&mut self, collection: &str, id: &str) -> Result<bool, StoreError> {
        let Some(records) = self.collections.get_mut(collection) else {
            return Ok(false);
        };
        let before = records.len();
        records.retain(|(key, _)| key != id);
        Ok(records.len() != before)
    }

    fn clear(&mut self, collection: &str) -> Result<(), StoreError> {
        self.collections.remove(collection);
        Ok(())
    }
}

/// Open a SQLite connection with WAL mode and standard pragmas.
fn open_sqlite(path: &Path) -> Result<Connection, rusqlite::Error> {
    let flags = OpenFlags::SQLITE_OPEN_READ_WRITE
        | OpenFlags::SQLITE_OPEN_CREATE
        | OpenFlags::SQLITE_OPEN_NO_MUTEX;
    let conn = Connection::open_with_flags(path, flags)?;
    conn.execute_batch(
        "PRAGMA journal_mode = WAL;
         PRAGMA synchronous = NORMAL;
         PRAGMA busy_timeout = 5000;",
    )?;
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS records (
             seq        INTEGER PRIMARY KEY AUTOINCREMENT,
             collection TEXT NOT NULL,
             id         TEXT NOT NULL,
             record     TEXT NOT NULL,
             UNIQUE (collection, id)
         );",
    )?;
    Ok(conn)
}

/// SQLite-backed store: one row per record in `<dir>/library.db`.
///
/// Each write touches a single row, and concurrent writers from other
/// processes wait on SQLite's busy timeout instead of overwriting each other.
pub struct SqliteStore {
    path: PathBuf,
    conn: Connection,
}

impl SqliteStore {
    /// Open (and create if needed) a store in the library directory `dir`.
    pub fn open(dir: impl AsRef<Path>) -> Result<Self, StoreError> {
        let dir = dir.as_ref();
        std::fs::create_dir_all(dir).map_err(|source| StoreError::Io {
            path: dir.to_path_buf(),
            source,
        })?;
        let path = dir.join(DATABASE_FILE);
        let conn = open_sqlite(&path).map_err(|source| StoreError::Sqlite {
            path: path.clone(),
            source,
        })?;
        tracing::debug!(path = %path.display(), "store opened");
        Ok(Self { path, conn })
    }

    /// Path of the database file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn sqlite_err(&self, source: rusqlite::Error) -> StoreError {
        StoreError::Sqlite {
            path: self.path.clone(),
            source,
        }
    }
}

impl KvStore for SqliteStore {
    fn put(&mut self, collection: &str, id: &str, record: Value) -> Result<(), StoreError> {
        let text = serde_json::to_string(&record).map_err(|source| StoreError::Json {
            collection: collection.to_string(),
            id: id.to_string(),
            source,
        })?;
        self.conn
            .execute(
                "INSERT INTO records (collection, id, record) VALUES (?1, ?2, ?3)
                 ON CONFLICT (collection, id) DO UPDATE SET record = excluded.record",
                params![collection, id, text],
            )
            .map_err(|e| self.sqlite_err(e))?;
        Ok(())
    }

    fn get_all(&self, collection: &str) -> Result<Vec<Value>, StoreError> {
        let mut stmt = self
            .conn
            .prepare("SELECT id, record FROM records WHERE collection = ?1 ORDER BY seq")
            .map_err(|e| self.sqlite_err(e))?;
        let rows = stmt
            .query_map(params![collection], |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
            })
            .map_err(|e| self.sqlite_err(e))?;

        let mut records = Vec::new();
        for row in rows {
            let (id, text) = row.map_err(|e| self.sqlite_err(e))?;
            let record = serde_json::from_str(&text).map_err(|source| StoreError::Json {
                collection: collection.to_string(),
                id,
                source,
            })?;
            records.push(record);
        }
        Ok(records)
    }

    fn delete(&mut self, collection: &str, id: &str) -> Result<bool, StoreError> {
        let removed = self
            .conn
            .execute(
                "DELETE FROM records WHERE collection = ?1 AND id = ?2",
                params![collection, id],
            )
            .map_err(|e| self.sqlite_err(e))?;
        Ok(removed > 0)
    }

    fn clear(&mut self, collection: &str) -> Result<(), StoreError> {
        self.conn
            .execute(
                "DELETE FROM records WHERE collection = ?1",
                params![collection],
            )
            .map_err(|e| self.sqlite_err(e))?;
        Ok(())
    }
}
