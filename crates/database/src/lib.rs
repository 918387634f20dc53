//! A database: one source stack plus one listener tree, bound to an
//! address, plus the access-timestamp bookkeeping the daemon uses for
//! idle eviction (spec.md §4.8).
//!
//! # Design
//!
//! `Database` is intentionally thin: it owns a [`source::SourceStack`]
//! and a [`listeners::ListenerTree`] and wires the two together so
//! that every mutation stamps `last_access` and fires the listener
//! tree *after* the store has been updated, per spec.md §4.8.

use std::time::{Duration, Instant};

use error::ConfResult;
use listeners::{ConnectionId, ListenerTree};
use source::{Entry, Source, SourceStack};
use value::Value;

/// Delivered to every listener on the path to a modified key.
#[derive(Debug, Clone)]
pub struct ChangeEvent {
    pub value: Option<Value>,
    pub is_default: bool,
}

/// One source stack + one listener tree + access bookkeeping.
pub struct Database {
    persistent_name: String,
    source_stack: SourceStack,
    listener_tree: ListenerTree<ChangeEvent>,
    last_access: Instant,
}

impl Database {
    #[must_use]
    pub fn new(persistent_name: impl Into<String>) -> Self {
        Database {
            persistent_name: persistent_name.into(),
            source_stack: SourceStack::new(),
            listener_tree: ListenerTree::new(),
            last_access: Instant::now(),
        }
    }

    #[must_use]
    pub fn persistent_name(&self) -> &str {
        &self.persistent_name
    }

    pub fn push_source(&mut self, source: Source) {
        self.source_stack.push(source);
    }

    fn touch(&mut self) {
        self.last_access = Instant::now();
    }

    /// True when no listener is registered and the last access was
    /// more than `idle_for` ago (spec.md §4.10's 20-minute threshold
    /// is applied by the daemon crate, not hardcoded here).
    #[must_use]
    pub fn is_idle(&self, idle_for: Duration) -> bool {
        self.listener_tree.listener_count() == 0 && self.last_access.elapsed() >= idle_for
    }

    #[must_use]
    pub fn listener_count(&self) -> usize {
        self.listener_tree.listener_count()
    }

    pub fn query_value(&mut self, key: &str, locales: &[String]) -> ConfResult<Entry> {
        self.touch();
        self.source_stack.query_value(key, locales)
    }

    pub fn set_value(&mut self, key: &str, value: Value) -> ConfResult<()> {
        self.touch();
        self.source_stack.set_value(key, value.clone())?;
        self.listener_tree.notify(
            key,
            &ChangeEvent {
                value: Some(value),
                is_default: false,
            },
        );
        Ok(())
    }

    pub fn unset_value(&mut self, key: &str, locale: Option<&str>) -> ConfResult<()> {
        self.touch();
        self.source_stack.unset_value(key, locale)?;
        self.listener_tree.notify(
            key,
            &ChangeEvent {
                value: None,
                is_default: false,
            },
        );
        Ok(())
    }

    pub fn set_schema(&mut self, key: &str, schema_key: &str) -> ConfResult<()> {
        self.touch();
        self.source_stack.set_schema(key, schema_key)?;
        let entry = self.source_stack.query_value(key, &[])?;
        self.listener_tree.notify(
            key,
            &ChangeEvent {
                value: entry.value,
                is_default: entry.is_default,
            },
        );
        Ok(())
    }

    pub fn remove_dir(&mut self, dir: &str) -> ConfResult<()> {
        self.touch();
        self.source_stack.remove_dir(dir)?;
        self.listener_tree.notify(dir, &ChangeEvent { value: None, is_default: false });
        Ok(())
    }

    pub fn all_entries(&mut self, dir: &str, locales: &[String]) -> ConfResult<Vec<Entry>> {
        self.touch();
        self.source_stack.all_entries(dir, locales)
    }

    pub fn all_dirs(&mut self, dir: &str) -> ConfResult<Vec<String>> {
        self.touch();
        self.source_stack.all_dirs(dir)
    }

    pub fn dir_exists(&mut self, dir: &str) -> bool {
        self.touch();
        self.source_stack.dir_exists(dir)
    }

    pub fn sync(&mut self) -> ConfResult<()> {
        self.source_stack.sync_all()
    }

    pub fn clear_cache(&mut self) {
        self.source_stack.clear_cache();
    }

    pub fn add_listener(
        &mut self,
        prefix: &str,
        callback: impl Fn(ConnectionId, &str, &ChangeEvent) + Send + Sync + 'static,
    ) -> ConnectionId {
        self.listener_tree.add(prefix, callback)
    }

    pub fn remove_listener(&mut self, id: ConnectionId) -> bool {
        self.listener_tree.remove(id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use backend::MemoryBackend;
    use source::SourceFlags;
    use std::sync::{Arc, Mutex};

    fn rw_source() -> Source {
        Source::new(
            "memory:readwrite:t",
            SourceFlags {
                all_readable: true,
                all_writable: true,
                never_writable: false,
            },
            Box::new(MemoryBackend::new()),
        )
    }

    #[test]
    fn set_then_get_round_trips_and_notifies() {
        let mut db = Database::new("def");
        db.push_source(rw_source());
        let fired = Arc::new(Mutex::new(Vec::new()));
        let f = Arc::clone(&fired);
        db.add_listener("/t", move |_id, key, ev| {
            f.lock().unwrap().push((key.to_string(), ev.value.clone()));
        });

        db.set_value("/t/int", Value::Int(42)).unwrap();
        let entry = db.query_value("/t/int", &[]).unwrap();
        assert_eq!(entry.value, Some(Value::Int(42)));
        assert_eq!(fired.lock().unwrap().len(), 1);

        db.unset_value("/t/int", None).unwrap();
        let entry = db.query_value("/t/int", &[]).unwrap();
        assert_eq!(entry.value, None);
    }

    #[test]
    fn idle_detection_requires_zero_listeners() {
        let mut db = Database::new("def");
        db.push_source(rw_source());
        let id = db.add_listener("/", |_, _, _| {});
        assert!(!db.is_idle(Duration::from_secs(0)));
        db.remove_listener(id);
        assert!(db.is_idle(Duration::from_secs(0)));
    }
}
