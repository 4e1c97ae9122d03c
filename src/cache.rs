//! Object cache: resolves `(oid, type, owning volume)` to a live, decoded
//! block exactly once per cache lifetime, and bounds memory with an LRU
//! policy that never evicts an object still in use.
//!
//! Grounded on `ApfsLib/ObjCache.cpp`'s hashtable-plus-dual-LRU design,
//! reimplemented with ordinary Rust collections rather than the original's
//! intrusive doubly-linked lists: a `HashMap` stands in for the chained
//! hashtable, and a `VecDeque` of keys stands in for each LRU list. An
//! object's refcount is modeled directly by `Rc::strong_count` - once the
//! cache's own clone is the last one standing, the object is evictable.

use std::collections::{HashMap, VecDeque};
use std::rc::Rc;

use crate::object::ObjectHeader;

/// Identifies a cached object. `fs` disambiguates oids that are only
/// unique within a given volume/snapshot scope (`None` for container-scoped
/// objects such as the container object map or spaceman).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CacheKey {
    pub oid: u64,
    pub otype: u32,
    pub fs: Option<u64>,
}

impl CacheKey {
    pub fn new(oid: u64, otype: u32, fs: Option<u64>) -> Self {
        CacheKey { oid, otype, fs }
    }
}

/// A cached, decoded block: raw bytes plus the identity it was resolved
/// under. `header` is `None` for NOHEADER objects, whose identity comes
/// from the request rather than from parsed header bytes.
#[derive(Debug)]
pub struct CachedObject {
    pub data: Vec<u8>,
    pub header: Option<ObjectHeader>,
    pub oid: u64,
    pub xid: u64,
    pub otype: u32,
    pub subtype: u32,
    pub paddr: i64,
}

pub const DEFAULT_LRU_LIMIT: usize = 4096;

pub struct ObjectCache {
    table: HashMap<CacheKey, Rc<CachedObject>>,
    lru: VecDeque<CacheKey>,
    ephemeral: VecDeque<CacheKey>,
    lru_limit: usize,
}

impl ObjectCache {
    pub fn new() -> Self {
        Self::with_limit(DEFAULT_LRU_LIMIT)
    }

    pub fn with_limit(lru_limit: usize) -> Self {
        ObjectCache {
            table: HashMap::new(),
            lru: VecDeque::new(),
            ephemeral: VecDeque::new(),
            lru_limit,
        }
    }

    /// Look up a cached object, touching its LRU position on hit.
    /// Ephemeral entries are never in the ordinary LRU so touching them
    /// is a no-op beyond the hashtable lookup.
    pub fn get(&mut self, key: &CacheKey) -> Option<Rc<CachedObject>> {
        let found = self.table.get(key).cloned();
        if found.is_some() && !self.ephemeral.contains(key) {
            self.touch(key);
        }
        found
    }

    /// Insert a freshly-read object into the cache. `ephemeral` objects
    /// join a list that `shrink` never visits.
    pub fn insert(&mut self, key: CacheKey, obj: CachedObject, ephemeral: bool) -> Rc<CachedObject> {
        let rc = Rc::new(obj);
        self.table.insert(key, rc.clone());
        if ephemeral {
            self.ephemeral.push_back(key);
        } else {
            self.lru.push_back(key);
            self.shrink();
        }
        rc
    }

    fn touch(&mut self, key: &CacheKey) {
        if let Some(pos) = self.lru.iter().position(|k| k == key) {
            self.lru.remove(pos);
            self.lru.push_back(*key);
        }
    }

    /// Evict ordinary objects with no outstanding external reference,
    /// walking from the least-recently-used end, until the list is back
    /// under the limit. An entry still referenced elsewhere (strong_count
    /// > 1, i.e. refcount > 0 in the grounding source's terms) is skipped,
    /// not a stopping point - the walk keeps looking for further
    /// evictable entries past it.
    fn shrink(&mut self) {
        let mut remaining = self.lru.len();
        let mut kept = VecDeque::with_capacity(self.lru.len());

        while let Some(key) = self.lru.pop_front() {
            if remaining > self.lru_limit {
                let evictable = self
                    .table
                    .get(&key)
                    .map(|rc| Rc::strong_count(rc) == 1)
                    .unwrap_or(true);
                if evictable {
                    self.table.remove(&key);
                    remaining -= 1;
                    continue;
                }
            }
            kept.push_back(key);
        }
        self.lru = kept;
    }

    pub fn len(&self) -> usize {
        self.table.len()
    }

    pub fn is_empty(&self) -> bool {
        self.table.is_empty()
    }
}

impl Default for ObjectCache {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dummy(oid: u64) -> CachedObject {
        CachedObject {
            data: vec![0u8; 8],
            header: None,
            oid,
            xid: 0,
            otype: 0,
            subtype: 0,
            paddr: oid as i64,
        }
    }

    #[test]
    fn insert_then_get_roundtrips() {
        let mut cache = ObjectCache::new();
        let key = CacheKey::new(5, 0, None);
        cache.insert(key, dummy(5), false);
        let got = cache.get(&key).unwrap();
        assert_eq!(got.oid, 5);
    }

    #[test]
    fn ephemeral_entries_survive_shrink_pressure() {
        let mut cache = ObjectCache::with_limit(2);
        let eph_key = CacheKey::new(1, 0, None);
        cache.insert(eph_key, dummy(1), true);

        for i in 2..10 {
            cache.insert(CacheKey::new(i, 0, None), dummy(i), false);
        }

        assert!(cache.get(&eph_key).is_some());
    }

    #[test]
    fn referenced_objects_are_not_evicted() {
        let mut cache = ObjectCache::with_limit(1);
        let key_a = CacheKey::new(1, 0, None);
        cache.insert(key_a, dummy(1), false);
        let held = cache.get(&key_a).unwrap();

        for i in 2..5 {
            cache.insert(CacheKey::new(i, 0, None), dummy(i), false);
        }

        // `held` keeps key_a's refcount above zero, so it must survive
        // even though the LRU limit was exceeded many times over.
        assert_eq!(held.oid, 1);
        assert!(cache.get(&key_a).is_some());
    }
}
