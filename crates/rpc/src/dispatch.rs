//! Turns one [`Request`] into a [`Reply`] against a live [`Daemon`].

use std::collections::HashMap;
use std::sync::mpsc::Sender;

use daemon::Daemon;
use listeners::ConnectionId;

use crate::{Event, Reply, Request, RpcResult};

/// Owns the `Daemon` and the per-client event senders that
/// `add_listener`-installed callbacks deliver [`Event::Notify`] into.
pub struct Dispatcher {
    daemon: Daemon,
    event_senders: HashMap<String, Sender<Event>>,
}

impl Dispatcher {
    #[must_use]
    pub fn new(daemon: Daemon) -> Self {
        Dispatcher {
            daemon,
            event_senders: HashMap::new(),
        }
    }

    #[must_use]
    pub fn daemon(&self) -> &Daemon {
        &self.daemon
    }

    pub fn daemon_mut(&mut self) -> &mut Daemon {
        &mut self.daemon
    }

    /// Registers where `client_ior`'s events should land. Must be
    /// called before any `AddListener` request on its behalf.
    pub fn register_client(&mut self, client_ior: impl Into<String>, sender: Sender<Event>) {
        self.event_senders.insert(client_ior.into(), sender);
    }

    pub fn unregister_client(&mut self, client_ior: &str) {
        self.event_senders.remove(client_ior);
    }

    pub fn dispatch(&mut self, request: Request) -> RpcResult<Reply> {
        let reply = match request {
            Request::GetDefaultDatabase => Reply::Database {
                address: listener_log_default().to_string(),
            },
            Request::GetDatabase { address } => {
                self.daemon.get_database(&address)?;
                Reply::Database { address }
            }
            Request::AddClient { client_ior } => {
                self.daemon.add_client(&client_ior)?;
                Reply::Unit
            }
            Request::RemoveClient { client_ior } => {
                self.daemon.remove_client(&client_ior);
                self.event_senders.remove(&client_ior);
                Reply::Unit
            }
            Request::Ping => Reply::Bool(self.daemon.ping()),
            Request::Shutdown => {
                self.daemon.shutdown()?;
                Reply::Unit
            }
            Request::LookupWithLocale { db, key, locale, use_default: _ } => {
                let locales = locale.into_iter().collect::<Vec<_>>();
                let entry = self.daemon.get_database(&db)?.query_value(&key, &locales)?;
                Reply::Value {
                    value: entry.value,
                    is_default: entry.is_default,
                }
            }
            Request::LookupDefaultValue { db, key, locale } => {
                let locales = locale.into_iter().collect::<Vec<_>>();
                let entry = self.daemon.get_database(&db)?.query_value(&key, &locales)?;
                Reply::Value {
                    value: entry.value,
                    is_default: entry.is_default,
                }
            }
            Request::Set { db, key, value } => {
                self.daemon.get_database(&db)?.set_value(&key, value)?;
                Reply::Unit
            }
            Request::Unset { db, key } => {
                self.daemon.get_database(&db)?.unset_value(&key, None)?;
                Reply::Unit
            }
            Request::RecursiveUnset { db, dir } => {
                self.daemon.get_database(&db)?.remove_dir(&dir)?;
                Reply::Unit
            }
            Request::AllEntries { db, dir, locale } => {
                let locales = locale.into_iter().collect::<Vec<_>>();
                let entries = self.daemon.get_database(&db)?.all_entries(&dir, &locales)?;
                let mut keys = Vec::with_capacity(entries.len());
                let mut values = Vec::with_capacity(entries.len());
                let mut is_defaults = Vec::with_capacity(entries.len());
                for e in entries {
                    keys.push(e.key);
                    values.push(e.value);
                    is_defaults.push(e.is_default);
                }
                Reply::Entries { keys, values, is_defaults }
            }
            Request::AllDirs { db, dir } => {
                let keys = self.daemon.get_database(&db)?.all_dirs(&dir)?;
                Reply::Dirs { keys }
            }
            Request::DirExists { db, dir } => Reply::Bool(self.daemon.get_database(&db)?.dir_exists(&dir)),
            Request::SetSchema { db, key, schema_key } => {
                self.daemon.get_database(&db)?.set_schema(&key, &schema_key)?;
                Reply::Unit
            }
            Request::Sync { db } => {
                self.daemon.get_database(&db)?.sync()?;
                Reply::Unit
            }
            Request::AddListener { db, prefix, client_ior } => {
                let sender = self.event_senders.get(&client_ior).cloned().ok_or_else(|| {
                    error::ConfError::new(
                        error::ErrorKind::Failed,
                        format!("{client_ior:?} has no registered event channel"),
                    )
                })?;
                let db_for_event = db.clone();
                let id: ConnectionId = self.daemon.add_listener(&db, &prefix, &client_ior, move |cnxn_id, key, ev| {
                    let _ = sender.send(Event::Notify {
                        db: db_for_event.clone(),
                        cnxn_id,
                        key: key.to_string(),
                        value: ev.value.clone(),
                        is_default: ev.is_default,
                    });
                })?;
                Reply::ConnectionId(id)
            }
            Request::RemoveListener { db, cnxn_id } => {
                self.daemon.remove_listener(&db, cnxn_id)?;
                Reply::Unit
            }
        };
        Ok(reply)
    }
}

fn listener_log_default() -> &'static str {
    listener_log::DEFAULT_DB_ADDRESS
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::mpsc;
    use value::Value;

    fn dispatcher(dir: &std::path::Path) -> Dispatcher {
        let root = dir.join("root");
        std::fs::create_dir_all(&root).unwrap();
        let config = daemon::DaemonConfig::new(vec![format!("file:readwrite:{}", root.display())], dir.join("state"));
        Dispatcher::new(daemon::Daemon::new(config).unwrap())
    }

    #[test]
    fn set_then_lookup_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let mut d = dispatcher(dir.path());
        d.dispatch(Request::Set {
            db: "def".into(),
            key: "/a/b".into(),
            value: Value::Int(7),
        })
        .unwrap();
        let reply = d
            .dispatch(Request::LookupWithLocale {
                db: "def".into(),
                key: "/a/b".into(),
                locale: None,
                use_default: true,
            })
            .unwrap();
        assert!(matches!(reply, Reply::Value { value: Some(Value::Int(7)), is_default: false }));
    }

    #[test]
    fn add_listener_without_registered_client_fails() {
        let dir = tempfile::tempdir().unwrap();
        let mut d = dispatcher(dir.path());
        let err = d
            .dispatch(Request::AddListener {
                db: "def".into(),
                prefix: "/".into(),
                client_ior: "ior://ghost".into(),
            })
            .unwrap_err();
        assert_eq!(err.kind, error::ErrorKind::Failed);
    }

    #[test]
    fn add_listener_then_set_delivers_notify_event() {
        let dir = tempfile::tempdir().unwrap();
        let mut d = dispatcher(dir.path());
        let (tx, rx) = mpsc::channel();
        d.register_client("ior://c1", tx);
        d.dispatch(Request::AddListener {
            db: "def".into(),
            prefix: "/a".into(),
            client_ior: "ior://c1".into(),
        })
        .unwrap();

        d.dispatch(Request::Set {
            db: "def".into(),
            key: "/a/b".into(),
            value: Value::Bool(true),
        })
        .unwrap();

        let event = rx.recv().unwrap();
        assert!(matches!(event, Event::Notify { key, value: Some(Value::Bool(true)), .. } if key == "/a/b"));
    }
}
