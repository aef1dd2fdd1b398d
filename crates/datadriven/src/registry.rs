//! Per-observer table of live proxies.
//!
//! One mutex guards the map. It is held for map access only; factories run
//! outside it and may read the registry.

use std::collections::BTreeMap;
use std::collections::btree_map::Entry;
use std::sync::Arc;

use parking_lot::Mutex;

use ddbus::ObjectId;

pub struct ProxyRegistry<T> {
    entries: Mutex<BTreeMap<ObjectId, Arc<T>>>,
}

impl<T> Default for ProxyRegistry<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> ProxyRegistry<T> {
    pub fn new() -> Self {
        Self {
            entries: Mutex::new(BTreeMap::new()),
        }
    }

    pub fn resolve(&self, id: &ObjectId) -> Option<Arc<T>> {
        self.entries.lock().get(id).cloned()
    }

    /// Returns the entry for `id`, building it with `factory` if there is
    /// none. The flag tells whether the entry was created by this call.
    ///
    /// Nothing is inserted when the factory fails. If another caller
    /// inserts `id` while the factory runs, its entry wins and the freshly
    /// built one is dropped.
    pub fn get_or_create<E, F>(&self, id: &ObjectId, factory: F) -> Result<(Arc<T>, bool), E>
    where
        F: FnOnce() -> Result<T, E>,
    {
        if let Some(existing) = self.resolve(id) {
            return Ok((existing, false));
        }
        let built = Arc::new(factory()?);
        match self.entries.lock().entry(id.clone()) {
            Entry::Occupied(existing) => Ok((existing.get().clone(), false)),
            Entry::Vacant(slot) => Ok((slot.insert(built).clone(), true)),
        }
    }

    /// Unlinks the entry. Holders of the `Arc` keep a valid handle.
    pub fn remove(&self, id: &ObjectId) -> Option<Arc<T>> {
        self.entries.lock().remove(id)
    }

    /// Point-in-time copy of all entries, ordered by id.
    pub fn snapshot(&self) -> Arc<[Arc<T>]> {
        self.entries.lock().values().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }
}
