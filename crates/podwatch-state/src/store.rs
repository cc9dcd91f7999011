//! StateStore: redb-backed reality and health persistence.
//!
//! Provides typed CRUD operations over the `reality` and `health` tables.
//! All values are JSON-serialized into redb's `&[u8]` value columns. The
//! store supports both on-disk and in-memory backends (the latter for
//! testing).

use std::path::Path;
use std::sync::Arc;

use redb::{Database, ReadableDatabase, ReadableTable, TableDefinition};
use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::debug;

use crate::error::{StateError, StateResult};
use crate::tables::*;
use crate::types::*;

/// Convert any `Display` error into a `StateError` variant via a closure factory.
macro_rules! map_err {
    ($variant:ident) => {
        |e| StateError::$variant(e.to_string())
    };
}

type Table = TableDefinition<'static, NodeKey, &'static [u8]>;

/// Thread-safe state store backed by redb.
#[derive(Clone)]
pub struct StateStore {
    db: Arc<Database>,
}

impl StateStore {
    /// Open (or create) a persistent state store at the given path.
    pub fn open(path: &Path) -> StateResult<Self> {
        let db = Database::create(path).map_err(map_err!(Open))?;
        let store = Self { db: Arc::new(db) };
        store.ensure_tables()?;
        debug!(?path, "state store opened");
        Ok(store)
    }

    /// Create an ephemeral in-memory state store (for testing).
    pub fn open_in_memory() -> StateResult<Self> {
        let backend = redb::backends::InMemoryBackend::new();
        let db = Database::builder()
            .create_with_backend(backend)
            .map_err(map_err!(Open))?;
        let store = Self { db: Arc::new(db) };
        store.ensure_tables()?;
        debug!("in-memory state store opened");
        Ok(store)
    }

    /// Create all tables if they don't exist yet.
    fn ensure_tables(&self) -> StateResult<()> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        // Opening a table in a write transaction creates it if absent.
        txn.open_table(REALITY).map_err(map_err!(Table))?;
        txn.open_table(HEALTH).map_err(map_err!(Table))?;
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(())
    }

    // ── Reality ────────────────────────────────────────────────────

    /// Declare that `desc` should run on `node`, replacing any previous
    /// descriptor with the same id.
    pub fn put_reality(&self, node: &str, desc: &ServiceDescriptor) -> StateResult<()> {
        self.put_json(REALITY, (node, desc.id.as_str()), desc)?;
        debug!(%node, service = %desc.id, "reality entry stored");
        Ok(())
    }

    /// Get one desired service for a node.
    pub fn get_reality(&self, node: &str, service: &str) -> StateResult<Option<ServiceDescriptor>> {
        self.get_json(REALITY, (node, service))
    }

    /// List every service that should run on `node`.
    pub fn list_reality(&self, node: &str) -> StateResult<Vec<ServiceDescriptor>> {
        self.list_json(REALITY, node)
    }

    /// Remove a service from a node's reality. Returns true if it existed.
    pub fn delete_reality(&self, node: &str, service: &str) -> StateResult<bool> {
        let existed = self.remove(REALITY, (node, service))?;
        debug!(%node, %service, existed, "reality entry deleted");
        Ok(existed)
    }

    // ── Health ─────────────────────────────────────────────────────

    /// Insert or update the latest health result for a service.
    pub fn put_health(&self, result: &HealthResult) -> StateResult<()> {
        self.put_json(HEALTH, result.table_key(), result)
    }

    /// Get the latest health result for a service on a node.
    pub fn get_health(&self, node: &str, service: &str) -> StateResult<Option<HealthResult>> {
        self.get_json(HEALTH, (node, service))
    }

    /// List the latest health result of every service on `node`.
    pub fn list_health(&self, node: &str) -> StateResult<Vec<HealthResult>> {
        self.list_json(HEALTH, node)
    }

    /// Delete a health result. Returns true if it existed.
    pub fn delete_health(&self, node: &str, service: &str) -> StateResult<bool> {
        self.remove(HEALTH, (node, service))
    }

    // ── Helpers ────────────────────────────────────────────────────

    fn put_json<T: Serialize>(&self, table: Table, key: (&str, &str), value: &T) -> StateResult<()> {
        let value = serde_json::to_vec(value).map_err(map_err!(Serialize))?;
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        {
            let mut table = txn.open_table(table).map_err(map_err!(Table))?;
            table
                .insert(key, value.as_slice())
                .map_err(map_err!(Write))?;
        }
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(())
    }

    fn get_json<T: DeserializeOwned>(&self, table: Table, key: (&str, &str)) -> StateResult<Option<T>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(table).map_err(map_err!(Table))?;
        match table.get(key).map_err(map_err!(Read))? {
            Some(guard) => {
                let value: T =
                    serde_json::from_slice(guard.value()).map_err(map_err!(Deserialize))?;
                Ok(Some(value))
            }
            None => Ok(None),
        }
    }

    /// Every value stored under `node`, in service id order.
    fn list_json<T: DeserializeOwned>(&self, table: Table, node: &str) -> StateResult<Vec<T>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(table).map_err(map_err!(Table))?;
        let mut results = Vec::new();
        for entry in table.range((node, "")..).map_err(map_err!(Read))? {
            let (key, value) = entry.map_err(map_err!(Read))?;
            if key.value().0 != node {
                break;
            }
            let item: T = serde_json::from_slice(value.value()).map_err(map_err!(Deserialize))?;
            results.push(item);
        }
        Ok(results)
    }

    fn remove(&self, table: Table, key: (&str, &str)) -> StateResult<bool> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        let existed;
        {
            let mut table = txn.open_table(table).map_err(map_err!(Table))?;
            existed = table.remove(key).map_err(map_err!(Write))?.is_some();
        }
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(existed)
    }
}
