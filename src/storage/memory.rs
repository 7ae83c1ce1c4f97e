//! In-memory storage backend with optional JSON snapshot persistence

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info};

use crate::error::StorageError;

use super::{
    sort_rows, OrderByField, QueryParam, SearchQuery, StorableKey, StorageManager,
    StorageResult,
};

#[derive(Debug, Default, Serialize, Deserialize)]
struct Tables {
    #[serde(default)]
    rows: BTreeMap<String, BTreeMap<String, Value>>,
    #[serde(default)]
    sequences: BTreeMap<String, u64>,
}

/// Thread-safe row store.
///
/// Every operation takes the table lock once, so `add` is atomic with respect
/// to concurrent writers of the same key.
#[derive(Debug, Default)]
pub struct InMemoryStorage {
    tables: RwLock<Tables>,
    snapshot: Option<PathBuf>,
}

impl InMemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load from `path` if it exists; [`save`](Self::save) writes back to it
    pub fn open(path: impl AsRef<Path>) -> StorageResult<Self> {
        let path = path.as_ref().to_path_buf();
        let tables = if path.exists() {
            let content = fs::read_to_string(&path)?;
            let tables: Tables = serde_json::from_str(&content)?;
            info!(path = %path.display(), namespaces = tables.rows.len(), "loaded storage snapshot");
            tables
        } else {
            debug!(path = %path.display(), "no storage snapshot yet, starting empty");
            Tables::default()
        };
        Ok(Self {
            tables: RwLock::new(tables),
            snapshot: Some(path),
        })
    }

    pub fn snapshot_path(&self) -> Option<&Path> {
        self.snapshot.as_deref()
    }

    /// Write the current contents to the snapshot path. No-op without one.
    pub fn save(&self) -> StorageResult<()> {
        let Some(path) = &self.snapshot else {
            return Ok(());
        };
        self.save_to(path)
    }

    pub fn save_to(&self, path: impl AsRef<Path>) -> StorageResult<()> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }
        let content = {
            let tables = self.tables.read();
            serde_json::to_string_pretty(&*tables)?
        };
        fs::write(path, content)?;
        debug!(path = %path.display(), "saved storage snapshot");
        Ok(())
    }

    fn row_key(key: &StorableKey) -> StorageResult<String> {
        Ok(serde_json::to_string(&key.primary_key)?)
    }

    /// Number of rows in `namespace`
    pub fn count(&self, namespace: &str) -> usize {
        self.tables
            .read()
            .rows
            .get(namespace)
            .map(|t| t.len())
            .unwrap_or(0)
    }
}

impl StorageManager for InMemoryStorage {
    fn get(&self, key: &StorableKey) -> StorageResult<Option<Value>> {
        let row_key = Self::row_key(key)?;
        Ok(self
            .tables
            .read()
            .rows
            .get(&key.namespace)
            .and_then(|t| t.get(&row_key))
            .cloned())
    }

    fn find(
        &self,
        namespace: &str,
        params: &[QueryParam],
        order_by: &[OrderByField],
    ) -> StorageResult<Vec<Value>> {
        let mut rows: Vec<Value> = {
            let tables = self.tables.read();
            match tables.rows.get(namespace) {
                Some(table) => table
                    .values()
                    .filter(|row| params.iter().all(|p| p.matches(row)))
                    .cloned()
                    .collect(),
                None => Vec::new(),
            }
        };
        sort_rows(&mut rows, order_by);
        Ok(rows)
    }

    fn add(&self, key: StorableKey, row: Value) -> StorageResult<()> {
        let row_key = Self::row_key(&key)?;
        let mut tables = self.tables.write();
        let table = tables.rows.entry(key.namespace.clone()).or_default();
        if table.contains_key(&row_key) {
            return Err(StorageError::AlreadyExists {
                namespace: key.namespace,
                key: key.primary_key.to_string(),
            });
        }
        table.insert(row_key, row);
        Ok(())
    }

    fn add_or_update(&self, key: StorableKey, row: Value) -> StorageResult<()> {
        let row_key = Self::row_key(&key)?;
        self.tables
            .write()
            .rows
            .entry(key.namespace)
            .or_default()
            .insert(row_key, row);
        Ok(())
    }

    fn remove(&self, key: &StorableKey) -> StorageResult<Option<Value>> {
        let row_key = Self::row_key(key)?;
        Ok(self
            .tables
            .write()
            .rows
            .get_mut(&key.namespace)
            .and_then(|t| t.remove(&row_key)))
    }

    fn next_id(&self, namespace: &str) -> StorageResult<u64> {
        let mut tables = self.tables.write();
        let seq = tables.sequences.entry(namespace.to_string()).or_insert(0);
        *seq += 1;
        Ok(*seq)
    }

    fn search(&self, query: &SearchQuery) -> StorageResult<Vec<Value>> {
        let matcher = query.where_clause.compile()?;
        let mut rows: Vec<Value> = {
            let tables = self.tables.read();
            match tables.rows.get(&query.namespace) {
                Some(table) => table
                    .values()
                    .filter(|row| matcher.matches(row))
                    .cloned()
                    .collect(),
                None => Vec::new(),
            }
        };
        sort_rows(&mut rows, &query.order_by);
        Ok(rows)
    }
}
