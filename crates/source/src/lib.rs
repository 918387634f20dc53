//! One backend instance bound to an address, and the ordered source
//! stack that merges many of them into a single logical database.
//!
//! # Design
//!
//! [`Source`] pairs a [`backend::Backend`] with the read/write flags
//! derived from its address. [`SourceStack`] layers sources
//! top-to-bottom: reads return the first hit; writes go to the first
//! writable layer *unless* a read-only layer above it already shadows
//! the key, in which case the write is refused as `overridden`
//! (spec.md §4.6, grounded on `gconf_sources_set_value`).
//!
//! # Errors
//!
//! See [`error::ConfError`] and the `overridden` / `no_writable_database`
//! kinds in particular.

use std::collections::HashMap;

use backend::{Address, Backend, BackendRegistry, MetaInfo};
use error::{ConfError, ConfResult, ErrorKind};
use keypath::parent_of;
use value::Value;

/// Observable state of a key: its value (or absence), schema
/// association, defaulted flag, and writability (spec.md §3 "Entry").
#[derive(Debug, Clone, PartialEq)]
pub struct Entry {
    pub key: String,
    pub value: Option<Value>,
    pub schema_name: Option<String>,
    pub is_default: bool,
    pub is_writable: bool,
}

/// Per-source read/write overrides, derived from the address flags.
#[derive(Debug, Clone, Copy, Default)]
pub struct SourceFlags {
    pub all_readable: bool,
    pub all_writable: bool,
    pub never_writable: bool,
}

impl From<&Address> for SourceFlags {
    fn from(addr: &Address) -> Self {
        if addr.readonly {
            SourceFlags {
                all_readable: true,
                all_writable: false,
                never_writable: true,
            }
        } else if addr.readwrite {
            SourceFlags {
                all_readable: true,
                all_writable: true,
                never_writable: false,
            }
        } else {
            SourceFlags::default()
        }
    }
}

/// One backend instance bound to one address inside a stack.
pub struct Source {
    pub address: String,
    pub flags: SourceFlags,
    backend: Box<dyn Backend>,
}

impl Source {
    pub fn new(address: impl Into<String>, flags: SourceFlags, backend: Box<dyn Backend>) -> Self {
        Source {
            address: address.into(),
            flags,
            backend,
        }
    }

    pub fn from_address(registry: &BackendRegistry, address: &str) -> ConfResult<Self> {
        let (parsed, backend) = registry.resolve(address)?;
        Ok(Source::new(address.to_string(), SourceFlags::from(&parsed), backend))
    }

    pub fn is_readable(&self, key: &str) -> bool {
        self.flags.all_readable || self.backend.readable(key)
    }

    pub fn is_writable(&self, key: &str) -> bool {
        !self.flags.never_writable && (self.flags.all_writable || self.backend.writable(key))
    }

    pub fn query_metainfo(&self, key: &str) -> ConfResult<Option<MetaInfo>> {
        self.backend.query_metainfo(key)
    }
}

/// An ordered list of [`Source`]s forming one logical database with
/// override semantics (spec.md §3/§4.6).
#[derive(Default)]
pub struct SourceStack {
    sources: Vec<Source>,
}

impl SourceStack {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, source: Source) {
        self.sources.push(source);
    }

    #[must_use]
    pub fn sources(&self) -> &[Source] {
        &self.sources
    }

    /// Walks the stack top-to-bottom, returning the first value
    /// found; on a total miss, falls back to the first-hit schema's
    /// default (spec.md §4.6 "Read").
    pub fn query_value(&self, key: &str, locales: &[String]) -> ConfResult<Entry> {
        let mut first_schema_name: Option<String> = None;
        for src in &self.sources {
            if !src.is_readable(key) {
                continue;
            }
            let (value, schema_name) = src.backend.query_value(key, locales)?;
            if let Some(schema_name) = &schema_name {
                if first_schema_name.is_none() {
                    first_schema_name = Some(schema_name.clone());
                }
            }
            if let Some(value) = value {
                return Ok(Entry {
                    key: key.to_string(),
                    value: Some(value),
                    schema_name,
                    is_default: false,
                    is_writable: src.is_writable(key),
                });
            }
        }

        let is_writable = self.sources.iter().any(|s| s.is_writable(key));

        if let Some(schema_name) = first_schema_name.clone() {
            if let Some(default) = self.default_from_schema(&schema_name, locales)? {
                return Ok(Entry {
                    key: key.to_string(),
                    value: Some(default),
                    schema_name: Some(schema_name),
                    is_default: true,
                    is_writable,
                });
            }
        }

        Ok(Entry {
            key: key.to_string(),
            value: None,
            schema_name: first_schema_name,
            is_default: false,
            is_writable,
        })
    }

    fn default_from_schema(&self, schema_key: &str, locales: &[String]) -> ConfResult<Option<Value>> {
        let schema_entry = self.query_value(schema_key, locales)?;
        let Some(Value::Schema(schema)) = schema_entry.value else {
            return Ok(None);
        };
        Ok(schema.default_value.map(|boxed| *boxed))
    }

    /// Walks the stack top-to-bottom: the first writable source takes
    /// the write and the walk stops there. A non-writable source
    /// above it that already holds a value for `key` blocks the write
    /// with `overridden` (probed via a real `query_value` call at
    /// every such layer, preserving the O(depth) cost noted as an
    /// open question in spec.md §9 rather than optimizing it away).
    pub fn set_value(&mut self, key: &str, value: Value) -> ConfResult<()> {
        value
            .validate()
            .map_err(|e| ConfError::new(ErrorKind::TypeMismatch, e.to_string()))?;
        for src in &mut self.sources {
            if src.is_writable(key) {
                src.backend.set_value(key, value)?;
                return Ok(());
            }
            let (existing, _) = src.backend.query_value(key, &[])?;
            if existing.is_some() {
                return Err(ConfError::overridden(format!(
                    "{key:?} is shadowed by a read-only layer at {:?}",
                    src.address
                )));
            }
        }
        Err(ConfError::new(
            ErrorKind::NoWritableDatabase,
            format!("no writable source accepted {key:?}"),
        ))
    }

    /// Unsets `key` in every writable layer of the stack.
    pub fn unset_value(&mut self, key: &str, locale: Option<&str>) -> ConfResult<()> {
        let mut errors = Vec::new();
        for src in &mut self.sources {
            if !src.is_writable(key) {
                continue;
            }
            if let Err(e) = src.backend.unset_value(key, locale) {
                errors.push(e);
            }
        }
        match ConfError::compose(errors) {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    /// Builds a merged child listing: the first source to report a
    /// value for a key wins that slot; later sources may fill an
    /// empty-valued slot but never overwrite it. Entries still
    /// lacking a value after the walk get their default synthesized
    /// from any schema they carry (spec.md §4.6).
    pub fn all_entries(&self, dir: &str, locales: &[String]) -> ConfResult<Vec<Entry>> {
        let mut merged: HashMap<String, Entry> = HashMap::new();
        let mut order = Vec::new();
        for src in &self.sources {
            for raw in src.backend.all_entries(dir, locales)? {
                match merged.get_mut(&raw.key) {
                    None => {
                        order.push(raw.key.clone());
                        merged.insert(
                            raw.key.clone(),
                            Entry {
                                key: raw.key.clone(),
                                value: raw.value,
                                schema_name: raw.schema_name,
                                is_default: false,
                                is_writable: src.is_writable(&raw.key),
                            },
                        );
                    }
                    Some(existing) => {
                        if existing.value.is_none() {
                            if raw.value.is_some() {
                                existing.value = raw.value;
                            }
                            if existing.schema_name.is_none() {
                                existing.schema_name = raw.schema_name;
                            }
                        }
                    }
                }
            }
        }

        for key in order {
            let entry = merged.get_mut(&key).expect("key present from first pass");
            if entry.value.is_none() {
                if let Some(schema_name) = entry.schema_name.clone() {
                    if let Some(default) = self.default_from_schema(&schema_name, locales)? {
                        entry.value = Some(default);
                        entry.is_default = true;
                    }
                }
            }
        }

        Ok(merged.into_values().collect())
    }

    /// Union of direct child subdirectory names across every source.
    pub fn all_dirs(&self, dir: &str) -> ConfResult<Vec<String>> {
        let mut seen = std::collections::HashSet::new();
        for src in &self.sources {
            for subdir in src.backend.all_subdirs(dir)? {
                seen.insert(subdir);
            }
        }
        Ok(seen.into_iter().collect())
    }

    pub fn dir_exists(&self, dir: &str) -> bool {
        self.sources.iter().any(|s| s.backend.dir_exists(dir))
    }

    pub fn remove_dir(&mut self, dir: &str) -> ConfResult<()> {
        let mut errors = Vec::new();
        for src in &mut self.sources {
            if src.is_writable(dir) {
                if let Err(e) = src.backend.remove_dir(dir) {
                    errors.push(e);
                }
            }
        }
        match ConfError::compose(errors) {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    /// Associates the schema at `schema_key` with `key`, using the
    /// same top-to-bottom writable-layer routing as `set_value`.
    pub fn set_schema(&mut self, key: &str, schema_key: &str) -> ConfResult<()> {
        for src in &mut self.sources {
            if src.is_writable(key) {
                return src.backend.set_schema(key, schema_key);
            }
        }
        Err(ConfError::new(
            ErrorKind::NoWritableDatabase,
            format!("no writable source accepted schema association for {key:?}"),
        ))
    }

    /// Flushes every source; composes individual failures into one
    /// error, succeeding overall only if every source succeeded.
    pub fn sync_all(&mut self) -> ConfResult<()> {
        let mut errors = Vec::new();
        for src in &mut self.sources {
            match src.backend.sync_all() {
                Ok(true) => {}
                Ok(false) => errors.push(ConfError::failed(format!("sync failed at {:?}", src.address))),
                Err(e) => errors.push(e),
            }
        }
        match ConfError::compose(errors) {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    pub fn clear_cache(&mut self) {
        for src in &mut self.sources {
            src.backend.clear_cache();
        }
    }
}

/// Helper retained for callers that want a directory's parent without
/// pulling in `keypath` directly.
#[must_use]
pub fn parent_dir(key: &str) -> Option<&str> {
    parent_of(key)
}

#[cfg(test)]
mod tests {
    use super::*;
    use backend::MemoryBackend;

    fn push_memory(stack: &mut SourceStack, address: &str, flags: SourceFlags) {
        stack.push(Source::new(address, flags, Box::new(MemoryBackend::new())));
    }

    #[test]
    fn readonly_layer_shadows_write_but_get_sees_it() {
        let mut stack = SourceStack::new();
        push_memory(
            &mut stack,
            "memory:readonly:ro",
            SourceFlags {
                all_readable: true,
                all_writable: false,
                never_writable: true,
            },
        );
        push_memory(
            &mut stack,
            "memory:readwrite:rw",
            SourceFlags {
                all_readable: true,
                all_writable: true,
                never_writable: false,
            },
        );
        stack.sources[0]
            .backend
            .set_value("/k", Value::String("a".into()))
            .unwrap();

        let err = stack.set_value("/k", Value::String("b".into())).unwrap_err();
        assert_eq!(err.kind, error::ErrorKind::Overridden);

        let entry = stack.query_value("/k", &[]).unwrap();
        assert_eq!(entry.value, Some(Value::String("a".into())));
    }

    #[test]
    fn two_writable_sources_first_wins_unset_clears_both() {
        let mut stack = SourceStack::new();
        push_memory(&mut stack, "memory:readwrite:rw1", SourceFlags {
            all_readable: true,
            all_writable: true,
            never_writable: false,
        });
        push_memory(&mut stack, "memory:readwrite:rw2", SourceFlags {
            all_readable: true,
            all_writable: true,
            never_writable: false,
        });

        stack.set_value("/k", Value::String("b".into())).unwrap();
        assert_eq!(
            stack.sources[0].backend.query_value("/k", &[]).unwrap().0,
            Some(Value::String("b".into()))
        );
        assert_eq!(stack.sources[1].backend.query_value("/k", &[]).unwrap().0, None);

        stack.unset_value("/k", None).unwrap();
        assert_eq!(stack.sources[0].backend.query_value("/k", &[]).unwrap().0, None);
        assert_eq!(stack.sources[1].backend.query_value("/k", &[]).unwrap().0, None);
    }

    #[test]
    fn schema_default_is_used_when_unset_and_not_when_set() {
        let mut stack = SourceStack::new();
        push_memory(&mut stack, "memory:readwrite:main", SourceFlags {
            all_readable: true,
            all_writable: true,
            never_writable: false,
        });

        let schema = value::Schema {
            value_type: value::ValueType::String,
            default_value: Some(Box::new(Value::String("red".into()))),
            ..Default::default()
        };
        stack.sources[0]
            .backend
            .set_value("/schemas/t/color", Value::Schema(Box::new(schema)))
            .unwrap();
        stack.sources[0].backend.set_schema("/t/color", "/schemas/t/color").unwrap();

        let entry = stack.query_value("/t/color", &[]).unwrap();
        assert_eq!(entry.value, Some(Value::String("red".into())));
        assert!(entry.is_default);

        stack.set_value("/t/color", Value::String("blue".into())).unwrap();
        let entry = stack.query_value("/t/color", &[]).unwrap();
        assert_eq!(entry.value, Some(Value::String("blue".into())));
        assert!(!entry.is_default);
    }
}
