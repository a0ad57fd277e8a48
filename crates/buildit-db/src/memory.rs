//! In-memory table shared by the memory repositories.

use buildit_core::ResourceId;
use parking_lot::RwLock;
use std::collections::HashMap;

/// A keyed set of rows guarded by one lock.
///
/// Rows are cloned in and out; no reference into the table escapes the lock.
#[derive(Debug)]
pub(crate) struct MemTable<T> {
    rows: RwLock<HashMap<ResourceId, T>>,
}

impl<T: Clone> MemTable<T> {
    pub(crate) fn new() -> Self {
        Self {
            rows: RwLock::new(HashMap::new()),
        }
    }

    pub(crate) fn get(&self, id: ResourceId) -> Option<T> {
        self.rows.read().get(&id).cloned()
    }

    pub(crate) fn upsert(&self, id: ResourceId, row: T) -> T {
        self.rows.write().insert(id, row.clone());
        row
    }

    pub(crate) fn filter(&self, predicate: impl Fn(&T) -> bool) -> Vec<T> {
        self.rows
            .read()
            .values()
            .filter(|row| predicate(row))
            .cloned()
            .collect()
    }

    pub(crate) fn len(&self) -> usize {
        self.rows.read().len()
    }
}
