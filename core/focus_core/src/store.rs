//! Persisted key/value document store and the serialized transaction wrapper.
//!
//! Every read-modify-write of `blockedSites`, `todayStats` and `dailyStats`
//! runs through [`SharedState::update`], which holds a single lock across the
//! read, the mutation and the write. Backends must apply one `set` call
//! all-or-nothing.

use std::{
    collections::{BTreeMap, BTreeSet},
    path::Path,
    sync::Arc,
};

use async_trait::async_trait;
use rusqlite::Connection;
use serde::{de::DeserializeOwned, Serialize};
use serde_json::{Map, Value};
use time::{format_description::well_known::Rfc3339, OffsetDateTime};
use tokio::sync::Mutex;

use crate::error::{CoreError, CoreResult};

pub const BLOCKED_SITES: &str = "blockedSites";
pub const TODAY_STATS: &str = "todayStats";
pub const DAILY_STATS: &str = "dailyStats";

/// A partial document: only the keys that were asked for (or written).
pub type Document = Map<String, Value>;

#[async_trait]
pub trait KvStore: Send + Sync {
    /// Returns the present subset of `keys`; absent keys are simply missing.
    async fn get(&self, keys: &[&str]) -> CoreResult<Document>;

    /// Writes every entry of `doc` atomically.
    async fn set(&self, doc: Document) -> CoreResult<()>;
}

#[async_trait]
impl<T: KvStore + ?Sized> KvStore for Arc<T> {
    async fn get(&self, keys: &[&str]) -> CoreResult<Document> {
        (**self).get(keys).await
    }

    async fn set(&self, doc: Document) -> CoreResult<()> {
        (**self).set(doc).await
    }
}

#[derive(Default)]
pub struct MemoryStore {
    data: Mutex<BTreeMap<String, Value>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl KvStore for MemoryStore {
    async fn get(&self, keys: &[&str]) -> CoreResult<Document> {
        let data = self.data.lock().await;
        let mut out = Document::new();
        for key in keys {
            if let Some(v) = data.get(*key) {
                out.insert((*key).to_string(), v.clone());
            }
        }
        Ok(out)
    }

    async fn set(&self, doc: Document) -> CoreResult<()> {
        let mut data = self.data.lock().await;
        data.extend(doc);
        Ok(())
    }
}

/// SQLite-backed store: one row per key, values kept as JSON text.
pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    pub fn open(path: &Path) -> CoreResult<Self> {
        let conn = Connection::open(path)?;
        init_db(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    pub fn open_in_memory() -> CoreResult<Self> {
        let conn = Connection::open_in_memory()?;
        init_db(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }
}

fn init_db(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute_batch(
        r#"
PRAGMA journal_mode = WAL;
PRAGMA synchronous = NORMAL;

CREATE TABLE IF NOT EXISTS kv (
  key TEXT PRIMARY KEY,
  value_json TEXT NOT NULL,
  updated_at TEXT NOT NULL
);
"#,
    )
}

#[async_trait]
impl KvStore for SqliteStore {
    async fn get(&self, keys: &[&str]) -> CoreResult<Document> {
        let conn = self.conn.lock().await;
        let mut stmt = conn.prepare("SELECT value_json FROM kv WHERE key = ?1")?;
        let mut out = Document::new();
        for key in keys {
            let mut rows = stmt.query([*key])?;
            if let Some(row) = rows.next()? {
                let raw: String = row.get(0)?;
                out.insert((*key).to_string(), serde_json::from_str(&raw)?);
            }
        }
        Ok(out)
    }

    async fn set(&self, doc: Document) -> CoreResult<()> {
        let mut conn = self.conn.lock().await;
        let updated_at = OffsetDateTime::now_utc().format(&Rfc3339).unwrap_or_default();
        let tx = conn.transaction()?;
        for (key, value) in &doc {
            tx.execute(
                r#"
INSERT INTO kv (key, value_json, updated_at)
VALUES (?1, ?2, ?3)
ON CONFLICT(key) DO UPDATE SET
  value_json=excluded.value_json,
  updated_at=excluded.updated_at
"#,
                (key, serde_json::to_string(value)?, &updated_at),
            )?;
        }
        tx.commit()?;
        Ok(())
    }
}

/// Working copy of the requested keys inside one transaction.
pub struct Txn {
    doc: Document,
    dirty: BTreeSet<String>,
}

impl Txn {
    /// Absent or `null` values read as `T::default()`.
    pub fn get<T: DeserializeOwned + Default>(&self, key: &str) -> CoreResult<T> {
        match self.doc.get(key) {
            None | Some(Value::Null) => Ok(T::default()),
            Some(v) => serde_json::from_value(v.clone())
                .map_err(|e| CoreError::Storage(format!("corrupt value for {key}: {e}"))),
        }
    }

    pub fn contains(&self, key: &str) -> bool {
        self.doc.contains_key(key)
    }

    pub fn put<T: Serialize>(&mut self, key: &str, value: &T) -> CoreResult<()> {
        self.doc.insert(key.to_string(), serde_json::to_value(value)?);
        self.dirty.insert(key.to_string());
        Ok(())
    }

    fn into_writes(mut self) -> Document {
        let mut out = Document::new();
        for key in self.dirty {
            if let Some(v) = self.doc.remove(&key) {
                out.insert(key, v);
            }
        }
        out
    }
}

/// Single owner of the persisted state: serializes all read-modify-write
/// sequences so concurrent updates apply one after another.
pub struct SharedState<S> {
    store: S,
    txn_lock: Mutex<()>,
}

impl<S: KvStore> SharedState<S> {
    pub fn new(store: S) -> Self {
        Self {
            store,
            txn_lock: Mutex::new(()),
        }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    /// Runs `f` against a fresh read of `keys` and writes back whatever it
    /// `put`, all under the transaction lock. Nothing is written if `f`
    /// fails.
    pub async fn update<T, F>(&self, keys: &[&str], f: F) -> CoreResult<T>
    where
        F: FnOnce(&mut Txn) -> CoreResult<T>,
    {
        let _guard = self.txn_lock.lock().await;
        let mut txn = Txn {
            doc: self.store.get(keys).await?,
            dirty: BTreeSet::new(),
        };
        let out = f(&mut txn)?;
        let writes = txn.into_writes();
        if !writes.is_empty() {
            self.store.set(writes).await?;
        }
        Ok(out)
    }

    /// Read-only snapshot; `set` is atomic so this never sees a partial
    /// write.
    pub async fn read<T, F>(&self, keys: &[&str], f: F) -> CoreResult<T>
    where
        F: FnOnce(&Txn) -> CoreResult<T>,
    {
        let txn = Txn {
            doc: self.store.get(keys).await?,
            dirty: BTreeSet::new(),
        };
        f(&txn)
    }
}
