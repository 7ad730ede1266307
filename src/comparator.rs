//! Key comparators and the process-wide comparator registry.
//!
//! A file persists the identity of its key order as a short string in the
//! fileinfo map.  On read, that identity is resolved through the registry;
//! an unresolvable identity is a hard error — there is no fallback order,
//! because scanning with the wrong comparator silently returns wrong
//! entries.
//!
//! Custom comparators are registered once at process start, before any file
//! written with them is opened.

use std::cmp::Ordering;
use std::collections::HashMap;
use std::sync::{Arc, OnceLock, RwLock};

/// A total order over raw key bytes.
///
/// `id` is the stable textual identity written into every file produced
/// with this comparator.  Two comparators with the same id MUST implement
/// the same order.
pub trait Comparator: Send + Sync {
    fn id(&self) -> &str;
    fn compare(&self, a: &[u8], b: &[u8]) -> Ordering;
}

/// Identity of the built-in unsigned-byte lexicographic order.
pub const LEXICOGRAPHIC: &str = "lexicographic";

/// Plain memcmp order.  The default for new files.
#[derive(Debug, Default, Clone, Copy)]
pub struct LexicographicComparator;

impl Comparator for LexicographicComparator {
    fn id(&self) -> &str {
        LEXICOGRAPHIC
    }
    fn compare(&self, a: &[u8], b: &[u8]) -> Ordering {
        a.cmp(b)
    }
}

fn registry() -> &'static RwLock<HashMap<String, Arc<dyn Comparator>>> {
    static REGISTRY: OnceLock<RwLock<HashMap<String, Arc<dyn Comparator>>>> = OnceLock::new();
    REGISTRY.get_or_init(|| {
        let mut map: HashMap<String, Arc<dyn Comparator>> = HashMap::new();
        map.insert(LEXICOGRAPHIC.to_string(), Arc::new(LexicographicComparator));
        RwLock::new(map)
    })
}

/// Register a comparator under its identity.  A later registration with the
/// same id replaces the earlier one.
pub fn register(comparator: Arc<dyn Comparator>) {
    let id = comparator.id().to_string();
    registry()
        .write()
        .unwrap_or_else(|e| e.into_inner())
        .insert(id, comparator);
}

/// Resolve a persisted comparator identity.
pub fn resolve(id: &str) -> Option<Arc<dyn Comparator>> {
    registry()
        .read()
        .unwrap_or_else(|e| e.into_inner())
        .get(id)
        .cloned()
}

/// The built-in lexicographic order as a shared handle.
pub fn lexicographic() -> Arc<dyn Comparator> {
    Arc::new(LexicographicComparator)
}
