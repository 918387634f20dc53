//! The client-side per-key/per-dir cache (spec.md §4.13 "ClientCache",
//! C13): negative caches, default-value caching, and the bookkeeping
//! that lets [`crate::Client`] multiplex many `add_dir` subscriptions
//! onto as few server-side listeners as possible.

use std::collections::HashMap;

use listeners::ConnectionId;
use source::Entry;

/// How much of a directory to preload into the cache on `add_dir`
/// (spec.md §4.13 point 2).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PreloadKind {
    /// Do nothing.
    None,
    /// Populate `entry_cache` from `all_entries(prefix)` and flag
    /// `prefix` in `dir_cache`.
    OneLevel,
    /// `OneLevel`, recursing into every subdirectory via `all_dirs`.
    Recursive,
}

/// One `add_dir` subscription: a watched prefix, reference-counted
/// across repeated `add_dir` calls, plus the server-side connection id
/// actually covering it (`None` when an ancestor `Dir` already covers
/// this prefix, per spec.md §4.13 point 1).
pub(crate) struct DirSubscription {
    pub prefix: String,
    pub refcount: u32,
    pub cnxn_id: Option<ConnectionId>,
}

/// Per-key and per-prefix cache state (spec.md §3 "ClientCache").
#[derive(Default)]
pub struct ClientCache {
    /// Last observed value for keys fetched or notified about.
    /// `None` is a negative cache hit: the key is known absent.
    entry_cache: HashMap<String, Option<Entry>>,
    /// Prefixes for which `all_entries` returned exhaustively.
    dir_cache: HashMap<String, ()>,
}

impl ClientCache {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn get(&self, key: &str) -> Option<Option<&Entry>> {
        self.entry_cache.get(key).map(|v| v.as_ref())
    }

    pub(crate) fn put(&mut self, key: impl Into<String>, entry: Option<Entry>) {
        self.entry_cache.insert(key.into(), entry);
    }

    pub(crate) fn invalidate(&mut self, key: &str) {
        self.entry_cache.remove(key);
    }

    pub(crate) fn flag_dir_cached(&mut self, prefix: impl Into<String>) {
        self.dir_cache.insert(prefix.into(), ());
    }

    pub(crate) fn unflag_dir_cached(&mut self, prefix: &str) {
        self.dir_cache.remove(prefix);
    }

    /// True if `prefix` itself was flagged by a prior exhaustive
    /// `all_entries` (spec.md §4.13 point 3: "whether key's parent is
    /// in dir_cache").
    pub(crate) fn is_dir_cached(&self, prefix: &str) -> bool {
        self.dir_cache.contains_key(prefix)
    }

    /// Under test only: whether `key` is present at all (positive or
    /// negative), to assert cache population without peeking fields.
    #[cfg(test)]
    pub(crate) fn contains(&self, key: &str) -> bool {
        self.entry_cache.contains_key(key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn negative_hit_under_flagged_prefix() {
        let mut cache = ClientCache::new();
        cache.flag_dir_cached("/x");
        assert!(cache.is_dir_cached("/x"));
        assert!(!cache.is_dir_cached("/y"));
    }

    #[test]
    fn put_then_get_round_trips() {
        let mut cache = ClientCache::new();
        let entry = Entry {
            key: "/a".into(),
            value: Some(value::Value::Int(1)),
            schema_name: None,
            is_default: false,
            is_writable: true,
        };
        cache.put("/a", Some(entry.clone()));
        assert_eq!(cache.get("/a"), Some(Some(&entry)));
        assert!(cache.contains("/a"));
    }
}
