//! In-memory batch-write store
//!
//! Behaves like a size-limited batch-write key-value store: deletes are
//! idempotent, calls above [`MAX_BATCH_SIZE`] are rejected, and key discovery
//! pages through each table in key order.

use async_trait::async_trait;
use parking_lot::RwLock;
use purge_core::{
    BatchWriteOutput, BatchWriter, Cursor, DeleteRequest, KeyPage, KeySelector, KeySource,
    StoreError, MAX_BATCH_SIZE,
};
use std::collections::{BTreeSet, HashMap};
use std::ops::Bound;
use std::sync::atomic::{AtomicUsize, Ordering};

/// Keys returned per discovery page unless overridden
pub const DEFAULT_PAGE_SIZE: usize = 100;

/// Tables of item keys
#[derive(Debug)]
pub struct MemoryStore {
    tables: RwLock<HashMap<String, BTreeSet<DeleteRequest>>>,
    page_size: usize,
    write_calls: AtomicUsize,
    page_calls: AtomicUsize,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    /// Empty store with no tables
    #[must_use]
    pub fn new() -> Self {
        Self {
            tables: RwLock::new(HashMap::new()),
            page_size: DEFAULT_PAGE_SIZE,
            write_calls: AtomicUsize::new(0),
            page_calls: AtomicUsize::new(0),
        }
    }

    /// With a discovery page size (at least 1)
    #[must_use]
    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size.max(1);
        self
    }

    /// Create `table` if it does not exist yet
    pub fn create_table(&self, table: &str) {
        self.tables.write().entry(table.to_string()).or_default();
    }

    /// Insert keys into `table`, creating it on demand
    pub fn insert(&self, table: &str, keys: impl IntoIterator<Item = DeleteRequest>) {
        self.tables
            .write()
            .entry(table.to_string())
            .or_default()
            .extend(keys);
    }

    /// Items currently in `table` (0 for an unknown table)
    #[must_use]
    pub fn len(&self, table: &str) -> usize {
        self.tables.read().get(table).map_or(0, BTreeSet::len)
    }

    /// Whether `table` holds no items
    #[must_use]
    pub fn is_empty(&self, table: &str) -> bool {
        self.len(table) == 0
    }

    #[must_use]
    pub fn contains(&self, table: &str, key: &DeleteRequest) -> bool {
        self.tables
            .read()
            .get(table)
            .is_some_and(|items| items.contains(key))
    }

    /// Snapshot of `table` in key order
    #[must_use]
    pub fn items(&self, table: &str) -> Vec<DeleteRequest> {
        self.tables
            .read()
            .get(table)
            .map(|items| items.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Batch-write calls received
    #[must_use]
    pub fn write_calls(&self) -> usize {
        self.write_calls.load(Ordering::Relaxed)
    }

    /// Discovery pages served
    #[must_use]
    pub fn page_calls(&self) -> usize {
        self.page_calls.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl BatchWriter for MemoryStore {
    async fn batch_delete(
        &self,
        table: &str,
        requests: &[DeleteRequest],
    ) -> Result<BatchWriteOutput, StoreError> {
        self.write_calls.fetch_add(1, Ordering::Relaxed);
        if requests.len() > MAX_BATCH_SIZE {
            return Err(StoreError::BatchTooLarge {
                size: requests.len(),
                limit: MAX_BATCH_SIZE,
            });
        }

        let mut tables = self.tables.write();
        let items = tables
            .get_mut(table)
            .ok_or_else(|| StoreError::TableNotFound(table.to_string()))?;
        for request in requests {
            items.remove(request);
        }
        Ok(BatchWriteOutput::applied())
    }
}

#[async_trait]
impl KeySource for MemoryStore {
    async fn fetch_page(
        &self,
        table: &str,
        selector: &KeySelector,
        cursor: Option<Cursor>,
    ) -> Result<KeyPage, StoreError> {
        self.page_calls.fetch_add(1, Ordering::Relaxed);
        let tables = self.tables.read();
        let items = tables
            .get(table)
            .ok_or_else(|| StoreError::TableNotFound(table.to_string()))?;

        let lower = cursor.map_or(Bound::Unbounded, |Cursor(last)| Bound::Excluded(last));
        let mut keys: Vec<_> = items
            .range((lower, Bound::Unbounded))
            .filter(|key| selector.matches(key))
            .take(self.page_size + 1)
            .cloned()
            .collect();

        let next = if keys.len() > self.page_size {
            keys.truncate(self.page_size);
            keys.last().cloned().map(Cursor)
        } else {
            None
        };
        Ok(KeyPage { keys, next })
    }
}
