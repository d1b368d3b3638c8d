// 🔒 Per-entity locks
//
// One mutex per account and per machine. Multi-entity operations lock in
// `EntityKey` order (accounts before machines, then by id), so two
// operations can never wait on each other in a cycle.
//
// An entry lives only while some `LockHandles` holds it: the last handle
// to drop removes it, so the table stays as small as the set of entities
// currently in use.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tracing::debug;

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum EntityKey {
    Account(String),
    Machine(String),
}

impl EntityKey {
    pub fn account(id: &str) -> Self {
        EntityKey::Account(id.to_string())
    }

    pub fn machine(id: &str) -> Self {
        EntityKey::Machine(id.to_string())
    }
}

#[derive(Default)]
pub struct LockTable {
    entries: Mutex<HashMap<EntityKey, Arc<Mutex<()>>>>,
}

impl LockTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Resolve the locks for `keys`, sorted and deduplicated.
    pub fn handles(&self, keys: &[EntityKey]) -> LockHandles<'_> {
        let mut keys = keys.to_vec();
        keys.sort();
        keys.dedup();

        let mut entries = self.entries();
        let handles = keys
            .iter()
            .map(|key| Arc::clone(entries.entry(key.clone()).or_default()))
            .collect();

        LockHandles {
            table: self,
            keys,
            handles,
        }
    }

    /// Number of entities with a live handle.
    pub fn len(&self) -> usize {
        self.entries().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    // The map itself guards no invariant, so a poisoned map is still usable
    fn entries(&self) -> MutexGuard<'_, HashMap<EntityKey, Arc<Mutex<()>>>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

pub struct LockHandles<'a> {
    table: &'a LockTable,
    keys: Vec<EntityKey>,
    handles: Vec<Arc<Mutex<()>>>,
}

impl LockHandles<'_> {
    /// Block until every lock is held. Guards release in reverse on drop.
    pub fn lock(&self) -> Vec<MutexGuard<'_, ()>> {
        debug!(keys = ?self.keys, "acquiring entity locks");
        // A panic while holding an entity lock cannot leave the store half
        // written (commits are atomic), so poisoning is ignored
        self.handles
            .iter()
            .map(|m| m.lock().unwrap_or_else(PoisonError::into_inner))
            .collect()
    }

    pub fn keys(&self) -> &[EntityKey] {
        &self.keys
    }
}

impl Drop for LockHandles<'_> {
    fn drop(&mut self) {
        // New handles are only cloned under the map lock, so a count of 2
        // (the map's and ours) means nobody else holds or waits on the entry
        let mut entries = self.table.entries();
        for (key, handle) in self.keys.iter().zip(&self.handles) {
            if Arc::strong_count(handle) == 2 {
                entries.remove(key);
            }
        }
    }
}
