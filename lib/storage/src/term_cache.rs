use lru::LruCache;
use quadsql_model::{TermId, TermKey};
use rustc_hash::FxHashMap;
use std::num::NonZeroUsize;
use std::sync::{Mutex, PoisonError};

/// A bounded LRU cache over the term dictionary.
///
/// Only ids the database returned as authoritative are ever stored, so a hit
/// can be used without re-validation. The cache may be cleared at any time;
/// it is soft state.
pub struct TermCache {
    inner: Mutex<LruCache<TermKey, TermId>>,
}

impl TermCache {
    pub fn new(capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            inner: Mutex::new(LruCache::new(capacity)),
        }
    }

    pub fn get(&self, key: &TermKey) -> Option<TermId> {
        self.lock().get(key).copied()
    }

    /// Looks up many keys at once, returning only the hits.
    pub fn get_batch<'a>(
        &self,
        keys: impl IntoIterator<Item = &'a TermKey>,
    ) -> FxHashMap<TermKey, TermId> {
        let mut cache = self.lock();
        keys.into_iter()
            .filter_map(|key| cache.get(key).map(|id| (key.clone(), *id)))
            .collect()
    }

    pub fn put(&self, key: TermKey, id: TermId) {
        self.lock().put(key, id);
    }

    pub fn put_batch(&self, entries: impl IntoIterator<Item = (TermKey, TermId)>) {
        let mut cache = self.lock();
        for (key, id) in entries {
            cache.put(key, id);
        }
    }

    pub fn clear(&self) {
        self.lock().clear();
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, LruCache<TermKey, TermId>> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
