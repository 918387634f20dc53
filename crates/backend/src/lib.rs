//! The backend plugin interface, its registry, and two concrete backends.
//!
//! # Design
//!
//! Spec.md §4.4's fixed operation set becomes a `Backend` trait object
//! (`Box<dyn Backend>`), matching the "no dynamic library loading
//! required; plugins may be statically linked" design note: a
//! [`BackendRegistry`] keyed by URI scheme string stands in for the
//! original's `dlopen`-based plugin loader.
//!
//! [`MemoryBackend`] and [`FileBackend`] are the two concrete backends
//! this workspace ships so the rest of the stack is runnable
//! end-to-end without an external XML/BerkeleyDB store (both remain
//! explicitly out of scope per spec.md §1).
//!
//! # Errors
//!
//! Every fallible operation returns [`error::ConfResult`].

use std::collections::{HashMap, HashSet};
use std::fs;
use std::path::PathBuf;
use std::time::{SystemTime, UNIX_EPOCH};

use error::{ConfError, ConfResult, ErrorKind};
use keypath::{is_below, is_valid, leaf_of, parent_of};
use serde::{Deserialize, Serialize};
use value::Value;

/// A parsed `scheme:<flags>:<location>` address (spec.md §6).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Address {
    pub scheme: String,
    pub readonly: bool,
    pub readwrite: bool,
    pub location: String,
}

impl Address {
    pub fn parse(addr: &str) -> ConfResult<Address> {
        let mut parts = addr.splitn(3, ':');
        let scheme = parts
            .next()
            .filter(|s| !s.is_empty())
            .ok_or_else(|| ConfError::new(ErrorKind::BadAddress, format!("{addr:?}: missing scheme")))?
            .to_string();
        let flags = parts.next().unwrap_or_default();
        let location = parts
            .next()
            .ok_or_else(|| ConfError::new(ErrorKind::BadAddress, format!("{addr:?}: missing location")))?
            .to_string();

        let mut readonly = false;
        let mut readwrite = false;
        for flag in flags.split(',').filter(|s| !s.is_empty()) {
            match flag {
                "readonly" => readonly = true,
                "readwrite" => readwrite = true,
                other => {
                    return Err(ConfError::new(
                        ErrorKind::BadAddress,
                        format!("{addr:?}: unrecognized flag {other:?}"),
                    ))
                }
            }
        }
        Ok(Address {
            scheme,
            readonly,
            readwrite,
            location,
        })
    }
}

/// Last-modified metadata for a key, as returned by `query_metainfo`.
#[derive(Debug, Clone, PartialEq)]
pub struct MetaInfo {
    pub mtime: u64,
    pub schema_name: Option<String>,
}

/// A single child entry as returned by `all_entries`.
#[derive(Debug, Clone, PartialEq)]
pub struct RawEntry {
    pub key: String,
    pub value: Option<Value>,
    pub schema_name: Option<String>,
}

/// The fixed backend operation set (spec.md §4.4).
///
/// A backend is bound to one storage location at [`resolve_address`]
/// time and is otherwise free-standing; the source stack (crate
/// `source`) is what layers many backend instances together.
///
/// [`resolve_address`]: BackendFactory
pub trait Backend: Send {
    fn readable(&self, key: &str) -> bool;
    fn writable(&self, key: &str) -> bool;
    /// Returns the locale-best value for `key`, plus the schema
    /// associated with it if any. `locales` is preference-ordered;
    /// `""`/`"C"` means the default (unlocalized) value.
    fn query_value(&self, key: &str, locales: &[String]) -> ConfResult<(Option<Value>, Option<String>)>;
    fn query_metainfo(&self, key: &str) -> ConfResult<Option<MetaInfo>>;
    fn set_value(&mut self, key: &str, value: Value) -> ConfResult<()>;
    /// `locale == None` removes every locale variant of `key`.
    fn unset_value(&mut self, key: &str, locale: Option<&str>) -> ConfResult<()>;
    fn all_entries(&self, dir: &str, locales: &[String]) -> ConfResult<Vec<RawEntry>>;
    fn all_subdirs(&self, dir: &str) -> ConfResult<Vec<String>>;
    fn dir_exists(&self, dir: &str) -> bool;
    fn remove_dir(&mut self, dir: &str) -> ConfResult<()>;
    fn set_schema(&mut self, key: &str, schema_key: &str) -> ConfResult<()>;
    fn sync_all(&mut self) -> ConfResult<bool>;
    fn clear_cache(&mut self);
}

/// Factory producing a fresh [`Backend`] for a resolved [`Address`].
pub type BackendFactory = fn(&Address) -> ConfResult<Box<dyn Backend>>;

/// Maps URI scheme strings to [`BackendFactory`]s, standing in for the
/// original's dynamic plugin loader (spec.md §9: "No dynamic library
/// loading is required; plugins may be statically linked").
#[derive(Default)]
pub struct BackendRegistry {
    factories: HashMap<String, BackendFactory>,
}

impl BackendRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// A registry pre-populated with the two backends this workspace ships.
    #[must_use]
    pub fn with_builtins() -> Self {
        let mut reg = Self::new();
        reg.register("memory", |_addr| Ok(Box::new(MemoryBackend::new())));
        reg.register("file", |addr| {
            Ok(Box::new(FileBackend::open(PathBuf::from(&addr.location))?))
        });
        reg
    }

    pub fn register(&mut self, scheme: impl Into<String>, factory: BackendFactory) {
        self.factories.insert(scheme.into(), factory);
    }

    pub fn resolve(&self, addr: &str) -> ConfResult<(Address, Box<dyn Backend>)> {
        let address = Address::parse(addr)?;
        let factory = self.factories.get(&address.scheme).ok_or_else(|| {
            ConfError::new(ErrorKind::BadAddress, format!("no backend registered for scheme {:?}", address.scheme))
        })?;
        let backend = factory(&address)?;
        Ok((address, backend))
    }
}

/// Computes the storage key for a locale variant, per spec.md §4.4: a
/// per-locale pseudo-subdirectory of the parent named `%locale%<tag>`.
fn locale_variant_key(key: &str, locale: &str) -> String {
    if locale.is_empty() || locale == "C" {
        return key.to_string();
    }
    let parent = parent_of(key).unwrap_or("/");
    let leaf = leaf_of(key);
    let pseudo_dir = keypath::concat(parent, &format!("%locale%{locale}"));
    keypath::concat(&pseudo_dir, leaf)
}

fn now_secs() -> u64 {
    SystemTime::now().duration_since(UNIX_EPOCH).map(|d| d.as_secs()).unwrap_or(0)
}

#[derive(Debug, Clone, Default)]
struct StoredKey {
    value: Option<Value>,
    schema_name: Option<String>,
    mtime: u64,
}

/// An authoritative, process-local, in-memory backend. The default
/// backend for tests and for a daemon run with no configured address
/// list.
#[derive(Default)]
pub struct MemoryBackend {
    entries: HashMap<String, StoredKey>,
}

impl MemoryBackend {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn ensure_valid(key: &str) -> ConfResult<()> {
        let (ok, reason) = is_valid(key);
        if ok {
            Ok(())
        } else {
            Err(ConfError::new(
                ErrorKind::BadKey,
                format!("{key:?}: {}", reason.map(|r| r.to_string()).unwrap_or_default()),
            ))
        }
    }
}

impl Backend for MemoryBackend {
    fn readable(&self, _key: &str) -> bool {
        true
    }

    fn writable(&self, _key: &str) -> bool {
        true
    }

    fn query_value(&self, key: &str, locales: &[String]) -> ConfResult<(Option<Value>, Option<String>)> {
        Self::ensure_valid(key)?;
        let base = self.entries.get(key);
        for locale in locales {
            let variant_key = locale_variant_key(key, locale);
            if let Some(stored) = self.entries.get(&variant_key) {
                if stored.value.is_some() {
                    return Ok((stored.value.clone(), stored.schema_name.clone()));
                }
            }
        }
        Ok((
            base.and_then(|s| s.value.clone()),
            base.and_then(|s| s.schema_name.clone()),
        ))
    }

    fn query_metainfo(&self, key: &str) -> ConfResult<Option<MetaInfo>> {
        Ok(self.entries.get(key).map(|s| MetaInfo {
            mtime: s.mtime,
            schema_name: s.schema_name.clone(),
        }))
    }

    fn set_value(&mut self, key: &str, value: Value) -> ConfResult<()> {
        Self::ensure_valid(key)?;
        value
            .validate()
            .map_err(|e| ConfError::new(ErrorKind::TypeMismatch, e.to_string()))?;
        let entry = self.entries.entry(key.to_string()).or_default();
        entry.value = Some(value);
        entry.mtime = now_secs();
        Ok(())
    }

    fn unset_value(&mut self, key: &str, locale: Option<&str>) -> ConfResult<()> {
        match locale {
            Some(locale) => {
                let variant_key = locale_variant_key(key, locale);
                self.entries.remove(&variant_key);
            }
            None => {
                let prefix = format!("{}/%locale%", parent_of(key).unwrap_or("/"));
                self.entries.remove(key);
                self.entries.retain(|k, _| {
                    !(k.starts_with(&prefix) && k.ends_with(&format!("/{}", leaf_of(key))))
                });
            }
        }
        Ok(())
    }

    fn all_entries(&self, dir: &str, locales: &[String]) -> ConfResult<Vec<RawEntry>> {
        let mut seen = HashSet::new();
        let mut out = Vec::new();
        for key in self.entries.keys() {
            if key.contains("%locale%") {
                continue;
            }
            if parent_of(key) != Some(dir) {
                continue;
            }
            if !seen.insert(key.clone()) {
                continue;
            }
            let (value, schema_name) = self.query_value(key, locales)?;
            out.push(RawEntry {
                key: key.clone(),
                value,
                schema_name,
            });
        }
        Ok(out)
    }

    fn all_subdirs(&self, dir: &str) -> ConfResult<Vec<String>> {
        let mut subdirs = HashSet::new();
        for key in self.entries.keys() {
            if key.contains("%locale%") {
                continue;
            }
            if !is_below(dir, key) || key == dir {
                continue;
            }
            let mut rest = key.strip_prefix(dir).unwrap_or(key);
            rest = rest.strip_prefix('/').unwrap_or(rest);
            if let Some((component, remainder)) = rest.split_once('/') {
                if !remainder.is_empty() {
                    subdirs.insert(keypath::concat(dir, component));
                }
            }
        }
        Ok(subdirs.into_iter().collect())
    }

    fn dir_exists(&self, dir: &str) -> bool {
        self.entries.keys().any(|k| is_below(dir, k) && k != dir)
    }

    fn remove_dir(&mut self, dir: &str) -> ConfResult<()> {
        self.entries.retain(|k, _| !is_below(dir, k));
        Ok(())
    }

    fn set_schema(&mut self, key: &str, schema_key: &str) -> ConfResult<()> {
        Self::ensure_valid(key)?;
        let entry = self.entries.entry(key.to_string()).or_default();
        entry.schema_name = Some(schema_key.to_string());
        Ok(())
    }

    fn sync_all(&mut self) -> ConfResult<bool> {
        Ok(true)
    }

    fn clear_cache(&mut self) {}
}

/// On-disk record shape persisted by [`FileBackend`]: one JSON object
/// per key, newline-delimited.
#[derive(Debug, Serialize, Deserialize)]
struct FileRecord {
    key: String,
    value: Option<Value>,
    schema_name: Option<String>,
}

/// A backend persisting entries as line-delimited JSON records. Not a
/// byte-compatible rendition of any original on-disk format (those
/// remain out of scope per spec.md §1); this exists so the rest of
/// the stack has a durable backend to exercise end-to-end.
pub struct FileBackend {
    path: PathBuf,
    memory: MemoryBackend,
    dirty: bool,
}

impl FileBackend {
    pub fn open(path: PathBuf) -> ConfResult<Self> {
        let mut memory = MemoryBackend::new();
        if path.exists() {
            let text = fs::read_to_string(&path)?;
            for line in text.lines().filter(|l| !l.trim().is_empty()) {
                let record: FileRecord = serde_json::from_str(line)
                    .map_err(|e| ConfError::new(ErrorKind::Corrupt, e.to_string()))?;
                let entry = memory.entries.entry(record.key).or_default();
                entry.value = record.value;
                entry.schema_name = record.schema_name;
            }
        }
        Ok(FileBackend {
            path,
            memory,
            dirty: false,
        })
    }

    fn persist(&mut self) -> ConfResult<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        let mut out = String::new();
        for (key, stored) in &self.memory.entries {
            let record = FileRecord {
                key: key.clone(),
                value: stored.value.clone(),
                schema_name: stored.schema_name.clone(),
            };
            out.push_str(&serde_json::to_string(&record).map_err(|e| ConfError::new(ErrorKind::Failed, e.to_string()))?);
            out.push('\n');
        }
        let tmp = self.path.with_extension("tmp");
        fs::write(&tmp, out)?;
        fs::rename(&tmp, &self.path)?;
        self.dirty = false;
        Ok(())
    }
}

impl Backend for FileBackend {
    fn readable(&self, key: &str) -> bool {
        self.memory.readable(key)
    }

    fn writable(&self, key: &str) -> bool {
        self.memory.writable(key)
    }

    fn query_value(&self, key: &str, locales: &[String]) -> ConfResult<(Option<Value>, Option<String>)> {
        self.memory.query_value(key, locales)
    }

    fn query_metainfo(&self, key: &str) -> ConfResult<Option<MetaInfo>> {
        self.memory.query_metainfo(key)
    }

    fn set_value(&mut self, key: &str, value: Value) -> ConfResult<()> {
        self.memory.set_value(key, value)?;
        self.dirty = true;
        Ok(())
    }

    fn unset_value(&mut self, key: &str, locale: Option<&str>) -> ConfResult<()> {
        self.memory.unset_value(key, locale)?;
        self.dirty = true;
        Ok(())
    }

    fn all_entries(&self, dir: &str, locales: &[String]) -> ConfResult<Vec<RawEntry>> {
        self.memory.all_entries(dir, locales)
    }

    fn all_subdirs(&self, dir: &str) -> ConfResult<Vec<String>> {
        self.memory.all_subdirs(dir)
    }

    fn dir_exists(&self, dir: &str) -> bool {
        self.memory.dir_exists(dir)
    }

    fn remove_dir(&mut self, dir: &str) -> ConfResult<()> {
        self.memory.remove_dir(dir)?;
        self.dirty = true;
        Ok(())
    }

    fn set_schema(&mut self, key: &str, schema_key: &str) -> ConfResult<()> {
        self.memory.set_schema(key, schema_key)?;
        self.dirty = true;
        Ok(())
    }

    fn sync_all(&mut self) -> ConfResult<bool> {
        if self.dirty {
            self.persist()?;
        }
        Ok(true)
    }

    fn clear_cache(&mut self) {}
}
