//! Block cache interface.
//!
//! The cache is an external collaborator: readers consult it on every data
//! block load and populate it on misses, but never depend on it — a cache
//! may evict anything at any time, and `None` simply means "read the disk".
//!
//! Cached blocks are shared immutable bytes ([`Block`] clones are `Arc`
//! bumps), so a hit hands every caller an independent view and no scanner
//! can disturb cached state.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use crate::block::Block;

/// Cache key: the owning file's name plus the data-block ordinal.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    pub file: Arc<str>,
    pub block: usize,
}

pub trait BlockCache: Send + Sync {
    fn get(&self, key: &CacheKey) -> Option<Block>;
    fn put(&self, key: CacheKey, block: Block);
}

/// Unbounded map-backed cache.  Suitable for tests and small tools; real
/// deployments plug in an evicting implementation behind the same trait.
#[derive(Default)]
pub struct SimpleBlockCache {
    map: Mutex<HashMap<CacheKey, Block>>,
}

impl SimpleBlockCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.map.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl BlockCache for SimpleBlockCache {
    fn get(&self, key: &CacheKey) -> Option<Block> {
        self.map
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(key)
            .cloned()
    }

    fn put(&self, key: CacheKey, block: Block) {
        self.map
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(key, block);
    }
}
