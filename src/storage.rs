use std::path::Path;
use std::sync::{Arc, Mutex, Weak};

use rusqlite::{Connection, TransactionBehavior};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::sync::broadcast;
use tracing::debug;

use crate::db::{self, StorageError};

/// Key holding the array of collected records.
pub const COLLECTED_DATA: &str = "collectedData";
/// Key holding the collection on/off flag.
pub const IS_ENABLED: &str = "isEnabled";

const CHANGE_BUFFER: usize = 64;

/// Emitted after every successful write.
#[derive(Debug, Clone)]
pub struct StorageChange {
    pub key: String,
    pub new_value: serde_json::Value,
}

/// Local key-value store with JSON values and change notifications.
///
/// Clones share one connection and one change stream, so a write from any
/// clone is observed by every subscriber.
#[derive(Clone)]
pub struct LocalStorage {
    conn: Arc<Mutex<Connection>>,
    changes: broadcast::Sender<StorageChange>,
}

/// Read-only handle that does not keep the storage alive. Background
/// watchers hold one of these so the change stream closes once the last
/// `LocalStorage` clone is dropped.
#[derive(Clone)]
pub struct StorageReader {
    conn: Weak<Mutex<Connection>>,
}

impl StorageReader {
    pub fn get<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>, StorageError> {
        let conn = self.conn.upgrade().ok_or(StorageError::Closed)?;
        read(&conn, key)
    }
}

fn decode<T: DeserializeOwned>(key: &str, raw: Option<String>) -> Result<Option<T>, StorageError> {
    raw.map(|text| {
        serde_json::from_str(&text).map_err(|source| StorageError::Codec {
            key: key.to_string(),
            source,
        })
    })
    .transpose()
}

fn read<T: DeserializeOwned>(conn: &Mutex<Connection>, key: &str) -> Result<Option<T>, StorageError> {
    let raw = {
        let conn = conn.lock().map_err(|_| StorageError::Poisoned)?;
        db::get_value(&conn, key)?
    };
    decode(key, raw)
}

impl LocalStorage {
    pub fn open(path: &Path) -> Result<Self, StorageError> {
        let conn = db::connect(path)?;
        db::init_schema(&conn)?;
        Ok(Self::from_connection(conn))
    }

    #[cfg(test)]
    pub fn in_memory() -> Result<Self, StorageError> {
        let conn = db::connect_in_memory()?;
        db::init_schema(&conn)?;
        Ok(Self::from_connection(conn))
    }

    fn from_connection(conn: Connection) -> Self {
        let (changes, _) = broadcast::channel(CHANGE_BUFFER);
        Self {
            conn: Arc::new(Mutex::new(conn)),
            changes,
        }
    }

    pub fn get<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>, StorageError> {
        read(&self.conn, key)
    }

    pub fn reader(&self) -> StorageReader {
        StorageReader {
            conn: Arc::downgrade(&self.conn),
        }
    }

    /// Write `value` under `key`. Subscribers are notified only once the
    /// write has been committed.
    pub fn set<T: Serialize>(&self, key: &str, value: &T) -> Result<(), StorageError> {
        let codec = |source| StorageError::Codec {
            key: key.to_string(),
            source,
        };
        let new_value = serde_json::to_value(value).map_err(codec)?;
        let text = serde_json::to_string(&new_value).map_err(codec)?;
        {
            let conn = self.conn.lock().map_err(|_| StorageError::Poisoned)?;
            db::set_value(&conn, key, &text)?;
        }
        debug!(key, bytes = text.len(), "storage write committed");
        self.notify(key, new_value);
        Ok(())
    }

    /// Read-modify-write of one key under the database write lock.
    ///
    /// The current value is re-read inside a `BEGIN IMMEDIATE` transaction,
    /// so writers in other processes sharing the file are serialized and
    /// never overwrite each other's committed changes.
    pub fn update<T, R, F>(&self, key: &str, apply: F) -> Result<(T, R), StorageError>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce(Option<T>) -> (T, R),
    {
        let codec = |source| StorageError::Codec {
            key: key.to_string(),
            source,
        };
        let (next, out, new_value, bytes) = {
            let mut conn = self.conn.lock().map_err(|_| StorageError::Poisoned)?;
            let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
            let current = decode(key, db::get_value(&tx, key)?)?;
            let (next, out) = apply(current);
            let new_value = serde_json::to_value(&next).map_err(codec)?;
            let text = serde_json::to_string(&new_value).map_err(codec)?;
            db::set_value(&tx, key, &text)?;
            tx.commit()?;
            (next, out, new_value, text.len())
        };
        debug!(key, bytes, "storage update committed");
        self.notify(key, new_value);
        Ok((next, out))
    }

    fn notify(&self, key: &str, new_value: serde_json::Value) {
        // No subscribers is fine.
        let _ = self.changes.send(StorageChange {
            key: key.to_string(),
            new_value,
        });
    }

    pub fn subscribe(&self) -> broadcast::Receiver<StorageChange> {
        self.changes.subscribe()
    }

    #[cfg(test)]
    pub(crate) fn subscriber_count(&self) -> usize {
        self.changes.receiver_count()
    }

    /// Drop the backing table so every later read and write fails.
    #[cfg(test)]
    pub(crate) fn break_backend(&self) {
        let conn = self.conn.lock().unwrap();
        conn.execute_batch("DROP TABLE storage;").unwrap();
    }
}
