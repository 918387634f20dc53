//! The client engine (spec.md §4.12): a remote proxy over [`rpc::Transport`]
//! with one automatic reconnect-and-retry, or a local engine that owns a
//! [`source::SourceStack`] directly and never talks to a daemon.
//!
//! # Design
//!
//! Both modes implement [`EngineBackend`] so [`crate::Client`] can be
//! generic over which one backs it. `RemoteEngine` is grounded on
//! `gconf_engine_get_database`'s retry-once-on-CORBA-exception
//! behaviour; `LocalEngine` is grounded on `gconf_engine_get_local`,
//! which never notifies (`local_engine` on any listener attempt).

use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::sync::Mutex;

use error::{ConfError, ConfResult, ErrorKind};
use listeners::ConnectionId;
use rpc::{Dispatcher, Event, LineClient, LocalTransport, Reply, Request, Transport};
use source::{Entry, Source, SourceStack};
use value::Value;

/// Default database address on the wire (spec.md §4.9: `"def"`).
pub const DEFAULT_DB_ADDRESS: &str = listener_log::DEFAULT_DB_ADDRESS;

/// An event surfaced by an engine's `poll_event`, already stripped of
/// transport framing.
#[derive(Debug, Clone)]
pub enum EngineEvent {
    Notify {
        db: String,
        cnxn_id: ConnectionId,
        key: String,
        value: Option<Value>,
        is_default: bool,
    },
    ListenerRemapped {
        db: String,
        old_cnxn_id: ConnectionId,
        prefix: String,
        new_cnxn_id: ConnectionId,
    },
}

/// What [`crate::Client`] needs from either engine mode.
pub trait EngineBackend: Send {
    fn lookup(&mut self, db: &str, key: &str, locale: Option<&str>) -> ConfResult<Entry>;
    fn lookup_default_value(&mut self, db: &str, key: &str, locale: Option<&str>) -> ConfResult<Entry>;
    fn set(&mut self, db: &str, key: &str, value: Value) -> ConfResult<()>;
    fn unset(&mut self, db: &str, key: &str) -> ConfResult<()>;
    fn recursive_unset(&mut self, db: &str, dir: &str) -> ConfResult<()>;
    fn all_entries(&mut self, db: &str, dir: &str, locale: Option<&str>) -> ConfResult<Vec<Entry>>;
    fn all_dirs(&mut self, db: &str, dir: &str) -> ConfResult<Vec<String>>;
    fn dir_exists(&mut self, db: &str, dir: &str) -> bool;
    fn set_schema(&mut self, db: &str, key: &str, schema_key: &str) -> ConfResult<()>;
    fn sync(&mut self, db: &str) -> ConfResult<()>;
    fn add_listener(&mut self, db: &str, prefix: &str) -> ConfResult<ConnectionId>;
    fn remove_listener(&mut self, db: &str, cnxn_id: ConnectionId) -> ConfResult<()>;
    /// Non-blocking: the next queued daemon→client event, if any.
    fn poll_event(&mut self) -> Option<EngineEvent>;
}

fn locale_vec(locale: Option<&str>) -> Option<String> {
    locale.map(str::to_owned)
}

// ---------------------------------------------------------------------
// Remote engine
// ---------------------------------------------------------------------

/// How a [`RemoteEngine`] (re)establishes its transport after a
/// `no_server` failure.
#[derive(Clone)]
pub enum TransportFactory {
    /// Connects over a Unix domain socket (spec.md §4.11's line transport).
    Socket { path: PathBuf },
    /// Dispatches in-process against a shared [`Dispatcher`] (same-process
    /// embed, and what the test suite uses in place of a real socket).
    InProcess { dispatcher: Arc<Mutex<Dispatcher>> },
}

impl TransportFactory {
    fn connect(&self, client_ior: &str) -> ConfResult<Box<dyn Transport>> {
        match self {
            TransportFactory::Socket { path } => {
                let mut transport: Box<dyn Transport> = Box::new(LineClient::connect(path)?);
                transport
                    .call(Request::AddClient {
                        client_ior: client_ior.to_string(),
                    })
                    .map_err(ConfError::from)?;
                Ok(transport)
            }
            TransportFactory::InProcess { dispatcher } => {
                // LocalTransport::connect already issues AddClient.
                let transport = LocalTransport::connect(Arc::clone(dispatcher), client_ior)?;
                Ok(Box::new(transport))
            }
        }
    }
}

static NEXT_CLIENT_SEQ: AtomicU64 = AtomicU64::new(1);

/// Mints a process-unique client identity (spec.md §9: opaque client
/// handles become a reference-counted record with an `identity()`).
#[must_use]
pub fn new_client_ior() -> String {
    let seq = NEXT_CLIENT_SEQ.fetch_add(1, Ordering::Relaxed);
    format!("ior://client-{}-{seq}", std::process::id())
}

/// Proxy over [`rpc::Transport`]; on a `no_server` failure, drops the
/// transport, reconnects once, and retries the original call exactly
/// once before surfacing the error (spec.md §4.12 "Remote").
pub struct RemoteEngine {
    factory: TransportFactory,
    client_ior: String,
    transport: Option<Box<dyn Transport>>,
}

impl RemoteEngine {
    #[must_use]
    pub fn new(factory: TransportFactory) -> Self {
        RemoteEngine {
            factory,
            client_ior: new_client_ior(),
            transport: None,
        }
    }

    #[must_use]
    pub fn client_ior(&self) -> &str {
        &self.client_ior
    }

    fn connect(&mut self) -> ConfResult<()> {
        let transport = self.factory.connect(&self.client_ior)?;
        self.transport = Some(transport);
        Ok(())
    }

    fn call(&mut self, request: Request) -> ConfResult<Reply> {
        if self.transport.is_none() {
            self.connect()?;
        }
        let first = self
            .transport
            .as_mut()
            .expect("just connected")
            .call(request.clone());
        match first {
            Ok(reply) => Ok(reply),
            Err(fault) if fault.kind == ErrorKind::NoServer => {
                self.transport = None;
                self.connect()?;
                self.transport
                    .as_mut()
                    .expect("just reconnected")
                    .call(request)
                    .map_err(ConfError::from)
            }
            Err(fault) => Err(fault.into()),
        }
    }
}

impl EngineBackend for RemoteEngine {
    fn lookup(&mut self, db: &str, key: &str, locale: Option<&str>) -> ConfResult<Entry> {
        let reply = self.call(Request::LookupWithLocale {
            db: db.to_string(),
            key: key.to_string(),
            locale: locale_vec(locale),
            use_default: true,
        })?;
        let Reply::Value { value, is_default } = reply else {
            return Err(ConfError::failed("unexpected reply to LookupWithLocale"));
        };
        Ok(Entry {
            key: key.to_string(),
            value,
            schema_name: None,
            is_default,
            is_writable: true,
        })
    }

    fn lookup_default_value(&mut self, db: &str, key: &str, locale: Option<&str>) -> ConfResult<Entry> {
        let reply = self.call(Request::LookupDefaultValue {
            db: db.to_string(),
            key: key.to_string(),
            locale: locale_vec(locale),
        })?;
        let Reply::Value { value, is_default } = reply else {
            return Err(ConfError::failed("unexpected reply to LookupDefaultValue"));
        };
        Ok(Entry {
            key: key.to_string(),
            value,
            schema_name: None,
            is_default,
            is_writable: true,
        })
    }

    fn set(&mut self, db: &str, key: &str, value: Value) -> ConfResult<()> {
        self.call(Request::Set {
            db: db.to_string(),
            key: key.to_string(),
            value,
        })?;
        Ok(())
    }

    fn unset(&mut self, db: &str, key: &str) -> ConfResult<()> {
        self.call(Request::Unset {
            db: db.to_string(),
            key: key.to_string(),
        })?;
        Ok(())
    }

    fn recursive_unset(&mut self, db: &str, dir: &str) -> ConfResult<()> {
        self.call(Request::RecursiveUnset {
            db: db.to_string(),
            dir: dir.to_string(),
        })?;
        Ok(())
    }

    fn all_entries(&mut self, db: &str, dir: &str, locale: Option<&str>) -> ConfResult<Vec<Entry>> {
        let reply = self.call(Request::AllEntries {
            db: db.to_string(),
            dir: dir.to_string(),
            locale: locale_vec(locale),
        })?;
        let Reply::Entries { keys, values, is_defaults } = reply else {
            return Err(ConfError::failed("unexpected reply to AllEntries"));
        };
        Ok(keys
            .into_iter()
            .zip(values)
            .zip(is_defaults)
            .map(|((key, value), is_default)| Entry {
                key,
                value,
                schema_name: None,
                is_default,
                is_writable: true,
            })
            .collect())
    }

    fn all_dirs(&mut self, db: &str, dir: &str) -> ConfResult<Vec<String>> {
        let reply = self.call(Request::AllDirs {
            db: db.to_string(),
            dir: dir.to_string(),
        })?;
        let Reply::Dirs { keys } = reply else {
            return Err(ConfError::failed("unexpected reply to AllDirs"));
        };
        Ok(keys)
    }

    fn dir_exists(&mut self, db: &str, dir: &str) -> bool {
        matches!(
            self.call(Request::DirExists {
                db: db.to_string(),
                dir: dir.to_string(),
            }),
            Ok(Reply::Bool(true))
        )
    }

    fn set_schema(&mut self, db: &str, key: &str, schema_key: &str) -> ConfResult<()> {
        self.call(Request::SetSchema {
            db: db.to_string(),
            key: key.to_string(),
            schema_key: schema_key.to_string(),
        })?;
        Ok(())
    }

    fn sync(&mut self, db: &str) -> ConfResult<()> {
        self.call(Request::Sync { db: db.to_string() })?;
        Ok(())
    }

    fn add_listener(&mut self, db: &str, prefix: &str) -> ConfResult<ConnectionId> {
        let reply = self.call(Request::AddListener {
            db: db.to_string(),
            prefix: prefix.to_string(),
            client_ior: self.client_ior.clone(),
        })?;
        let Reply::ConnectionId(id) = reply else {
            return Err(ConfError::failed("unexpected reply to AddListener"));
        };
        Ok(id)
    }

    fn remove_listener(&mut self, db: &str, cnxn_id: ConnectionId) -> ConfResult<()> {
        self.call(Request::RemoveListener {
            db: db.to_string(),
            cnxn_id,
        })?;
        Ok(())
    }

    fn poll_event(&mut self) -> Option<EngineEvent> {
        let event = self.transport.as_mut()?.poll_event()?;
        Some(match event {
            Event::Notify { db, cnxn_id, key, value, is_default } => {
                EngineEvent::Notify { db, cnxn_id, key, value, is_default }
            }
            Event::UpdateListener { db, old_cnxn_id, prefix, new_cnxn_id, .. } => {
                EngineEvent::ListenerRemapped { db, old_cnxn_id, prefix, new_cnxn_id }
            }
            Event::Ping => return self.poll_event(),
        })
    }
}

// ---------------------------------------------------------------------
// Local engine
// ---------------------------------------------------------------------

/// Owns a [`SourceStack`] directly, bypassing any daemon. Never
/// notifies: `add_listener` always fails with `local_engine`
/// (spec.md §4.12 "Local").
pub struct LocalEngine {
    stack: SourceStack,
}

impl LocalEngine {
    #[must_use]
    pub fn new(stack: SourceStack) -> Self {
        LocalEngine { stack }
    }

    pub fn push_source(&mut self, source: Source) {
        self.stack.push(source);
    }
}

fn local_only(dir: &str) -> ConfError {
    ConfError::new(ErrorKind::LocalEngine, format!("{dir:?} requires a daemon; this engine is local"))
}

impl EngineBackend for LocalEngine {
    fn lookup(&mut self, _db: &str, key: &str, locale: Option<&str>) -> ConfResult<Entry> {
        let locales: Vec<String> = locale_vec(locale).into_iter().collect();
        self.stack.query_value(key, &locales)
    }

    fn lookup_default_value(&mut self, db: &str, key: &str, locale: Option<&str>) -> ConfResult<Entry> {
        self.lookup(db, key, locale)
    }

    fn set(&mut self, _db: &str, key: &str, value: Value) -> ConfResult<()> {
        self.stack.set_value(key, value)
    }

    fn unset(&mut self, _db: &str, key: &str) -> ConfResult<()> {
        self.stack.unset_value(key, None)
    }

    fn recursive_unset(&mut self, _db: &str, dir: &str) -> ConfResult<()> {
        self.stack.remove_dir(dir)
    }

    fn all_entries(&mut self, _db: &str, dir: &str, locale: Option<&str>) -> ConfResult<Vec<Entry>> {
        let locales: Vec<String> = locale_vec(locale).into_iter().collect();
        self.stack.all_entries(dir, &locales)
    }

    fn all_dirs(&mut self, _db: &str, dir: &str) -> ConfResult<Vec<String>> {
        self.stack.all_dirs(dir)
    }

    fn dir_exists(&mut self, _db: &str, dir: &str) -> bool {
        self.stack.dir_exists(dir)
    }

    fn set_schema(&mut self, _db: &str, key: &str, schema_key: &str) -> ConfResult<()> {
        self.stack.set_schema(key, schema_key)
    }

    fn sync(&mut self, _db: &str) -> ConfResult<()> {
        self.stack.sync_all()
    }

    fn add_listener(&mut self, _db: &str, prefix: &str) -> ConfResult<ConnectionId> {
        Err(local_only(prefix))
    }

    fn remove_listener(&mut self, _db: &str, _cnxn_id: ConnectionId) -> ConfResult<()> {
        Err(local_only("remove_listener"))
    }

    fn poll_event(&mut self) -> Option<EngineEvent> {
        None
    }
}
