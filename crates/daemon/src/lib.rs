//! The daemon: address→Database registry, listener-log lifecycle,
//! process lock, and signal-driven shutdown (spec.md §4.10).
//!
//! # Design
//!
//! `Daemon` owns every live [`Database`], the append-only
//! [`ListenerLog`], and (optionally) the process [`LockHandle`]. It
//! does not itself speak any RPC protocol — that dispatch lives one
//! layer up, in the crate that wraps a `Daemon` and answers spec.md
//! §4.11's abstract calls, so that this crate and that one don't form
//! a dependency cycle.
//!
//! A side table, `live_listeners`, tracks the `(prefix, client_ior)`
//! each connection id was registered with. [`ListenerTree`] itself is
//! payload-agnostic and has no notion of either, but the listener log
//! and compaction need both to reconstruct a record.

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::time::Duration;

pub mod source_path;

use backend::BackendRegistry;
use database::Database;
use error::{ConfError, ConfResult, ErrorKind};
use listener_log::{Record, DEFAULT_DB_ADDRESS};
use listeners::ConnectionId;
use lock::LockHandle;
use source::Source;

/// Static configuration a [`Daemon`] is built from.
pub struct DaemonConfig {
    /// Addresses making up the default database's source stack, in
    /// priority order (first pushed overrides later ones).
    pub default_source_addresses: Vec<String>,
    pub registry: BackendRegistry,
    /// Directory holding `saved_state` (the listener log) and `%lock`.
    pub state_dir: PathBuf,
    pub idle_threshold: Duration,
    pub sweep_interval: Duration,
}

impl DaemonConfig {
    #[must_use]
    pub fn new(default_source_addresses: Vec<String>, state_dir: impl Into<PathBuf>) -> Self {
        DaemonConfig {
            default_source_addresses,
            registry: BackendRegistry::with_builtins(),
            state_dir: state_dir.into(),
            idle_threshold: Duration::from_secs(20 * 60),
            sweep_interval: Duration::from_secs(30 * 60),
        }
    }

    #[must_use]
    pub fn listener_log_path(&self) -> PathBuf {
        self.state_dir.join("saved_state")
    }

    #[must_use]
    pub fn lock_dir(&self) -> PathBuf {
        self.state_dir.join("%lock")
    }
}

struct LiveListener {
    prefix: String,
    client_ior: String,
}

/// Database registry + lifecycle, per spec.md §4.10.
pub struct Daemon {
    default_db: Database,
    databases: HashMap<String, Database>,
    listener_log: listener_log::ListenerLog,
    lock: Option<LockHandle>,
    clients: HashSet<String>,
    live_listeners: HashMap<(String, ConnectionId), LiveListener>,
    config: DaemonConfig,
    shutdown_requested: bool,
}

impl Daemon {
    /// Builds the default database from `config.default_source_addresses`
    /// and opens the listener log, creating `state_dir` if needed.
    /// Does not replay the log or acquire the process lock; callers
    /// drive those explicitly so startup order stays visible.
    pub fn new(config: DaemonConfig) -> ConfResult<Daemon> {
        let mut default_db = Database::new(DEFAULT_DB_ADDRESS);
        for addr in &config.default_source_addresses {
            default_db.push_source(Source::from_address(&config.registry, addr)?);
        }
        let listener_log = listener_log::ListenerLog::open(config.listener_log_path())?;
        Ok(Daemon {
            default_db,
            databases: HashMap::new(),
            listener_log,
            lock: None,
            clients: HashSet::new(),
            live_listeners: HashMap::new(),
            config,
            shutdown_requested: false,
        })
    }

    #[must_use]
    pub fn config(&self) -> &DaemonConfig {
        &self.config
    }

    pub fn default_database(&mut self) -> &mut Database {
        &mut self.default_db
    }

    /// Returns the Database for `addr`, creating it (a single source
    /// resolved from `addr` itself) on first request.
    pub fn get_database(&mut self, addr: &str) -> ConfResult<&mut Database> {
        if addr == DEFAULT_DB_ADDRESS {
            return Ok(&mut self.default_db);
        }
        if !self.databases.contains_key(addr) {
            let source = Source::from_address(&self.config.registry, addr)?;
            let mut db = Database::new(addr.to_string());
            db.push_source(source);
            self.databases.insert(addr.to_string(), db);
            info(&format!("opened database {addr:?}"));
        }
        Ok(self.databases.get_mut(addr).expect("just inserted"))
    }

    fn database_mut(&mut self, db_address: &str) -> ConfResult<&mut Database> {
        self.get_database(db_address)
    }

    /// Registers `client_ior` and appends its `CLIENTADD` record.
    /// Rolls back on log-append failure, per spec.md §4.9's "failure
    /// to append is fatal to the operation".
    pub fn add_client(&mut self, client_ior: &str) -> ConfResult<()> {
        self.clients.insert(client_ior.to_string());
        if let Err(e) = self.listener_log.append(&Record::ClientAdd {
            client_ior: client_ior.to_string(),
        }) {
            self.clients.remove(client_ior);
            return Err(e);
        }
        Ok(())
    }

    /// Forgets `client_ior`. Spec.md §4.9 only defines a `CLIENTADD`
    /// record, so there is nothing to log on removal.
    pub fn remove_client(&mut self, client_ior: &str) {
        self.clients.remove(client_ior);
    }

    #[must_use]
    pub fn is_known_client(&self, client_ior: &str) -> bool {
        self.clients.contains(client_ior)
    }

    #[must_use]
    pub fn ping(&self) -> bool {
        true
    }

    /// Registers a listener on `db_address` at `prefix`, logs the
    /// `ADD` record, and returns the fresh connection id. If the log
    /// append fails the listener is torn back down and the failure
    /// surfaces to the caller.
    pub fn add_listener(
        &mut self,
        db_address: &str,
        prefix: &str,
        client_ior: &str,
        callback: impl Fn(ConnectionId, &str, &database::ChangeEvent) + Send + Sync + 'static,
    ) -> ConfResult<ConnectionId> {
        let id = self.database_mut(db_address)?.add_listener(prefix, callback);
        match self.listener_log.append(&Record::Add {
            cnxn_id: id,
            db_address: db_address.to_string(),
            prefix: prefix.to_string(),
            client_ior: client_ior.to_string(),
        }) {
            Ok(()) => {
                self.live_listeners.insert(
                    (db_address.to_string(), id),
                    LiveListener {
                        prefix: prefix.to_string(),
                        client_ior: client_ior.to_string(),
                    },
                );
                Ok(id)
            }
            Err(e) => {
                self.database_mut(db_address)?.remove_listener(id);
                Err(e)
            }
        }
    }

    /// Removes connection `id` from `db_address` and logs the
    /// corresponding `REMOVE` record.
    pub fn remove_listener(&mut self, db_address: &str, id: ConnectionId) -> ConfResult<()> {
        let live = self
            .live_listeners
            .remove(&(db_address.to_string(), id))
            .ok_or_else(|| ConfError::new(ErrorKind::Failed, format!("no such listener {id} on {db_address:?}")))?;
        self.database_mut(db_address)?.remove_listener(id);
        self.listener_log.append(&Record::Remove {
            cnxn_id: id,
            db_address: db_address.to_string(),
            prefix: live.prefix,
            client_ior: live.client_ior,
        })
    }

    /// Replays the listener log against the live registry, per
    /// spec.md §4.9's five-step algorithm. `client_is_live` resolves a
    /// client ior to liveness; `make_callback` builds the real
    /// notification callback for a surviving listener (the RPC layer
    /// supplies this, since only it knows how to reach that client);
    /// `notify_client` pushes the id remapping back out to the client.
    ///
    /// This re-implements spec.md §4.9's algorithm directly against
    /// `self` rather than delegating to [`listener_log::replay`],
    /// whose callback signature has no way to thread a `&mut Daemon`
    /// through to create databases and listener-tree entries.
    pub fn replay_listener_log(
        &mut self,
        mut client_is_live: impl FnMut(&str) -> bool,
        mut make_callback: impl FnMut(
            &str,
            &str,
            &str,
        ) -> Box<dyn Fn(ConnectionId, &str, &database::ChangeEvent) + Send + Sync>,
        mut notify_client: impl FnMut(&str, &str, u64, &str, u64),
    ) -> ConfResult<listener_log::ReplayOutcome> {
        let records = self.listener_log.read_all()?;
        let mut outcome = listener_log::ReplayOutcome::default();
        for add in listener_log::surviving_adds(&records) {
            if !client_is_live(&add.client_ior) {
                outcome.dropped.push(add);
                continue;
            }
            self.listener_log.append(&Record::Remove {
                cnxn_id: add.old_cnxn_id,
                db_address: add.db_address.clone(),
                prefix: add.prefix.clone(),
                client_ior: add.client_ior.clone(),
            })?;
            let callback = make_callback(&add.db_address, &add.prefix, &add.client_ior);
            let new_id = self
                .database_mut(&add.db_address)?
                .add_listener(&add.prefix, move |id, key, ev| callback(id, key, ev));
            notify_client(&add.client_ior, &add.db_address, add.old_cnxn_id, &add.prefix, new_id);
            self.listener_log.append(&Record::Add {
                cnxn_id: new_id,
                db_address: add.db_address.clone(),
                prefix: add.prefix.clone(),
                client_ior: add.client_ior.clone(),
            })?;
            self.live_listeners.insert(
                (add.db_address.clone(), new_id),
                LiveListener {
                    prefix: add.prefix.clone(),
                    client_ior: add.client_ior.clone(),
                },
            );
            outcome.remapped.push((add, new_id));
        }
        Ok(outcome)
    }

    /// Evicts non-default databases idle for `config.idle_threshold`
    /// with zero listeners, returning the addresses removed.
    pub fn idle_sweep(&mut self) -> Vec<String> {
        let threshold = self.config.idle_threshold;
        let evicted: Vec<String> = self
            .databases
            .iter()
            .filter(|(_, db)| db.is_idle(threshold))
            .map(|(addr, _)| addr.clone())
            .collect();
        for addr in &evicted {
            self.databases.remove(addr);
            self.live_listeners.retain(|(db, _), _| db != addr);
            info(&format!("evicted idle database {addr:?}"));
        }
        evicted
    }

    /// True once every non-default database is gone and the default
    /// has no listeners left (spec.md §4.10's idle exit condition,
    /// evaluated only at the periodic sweep, not on every request).
    #[must_use]
    pub fn should_exit(&self) -> bool {
        self.databases.is_empty() && self.default_db.listener_count() == 0
    }

    /// True once an explicit `Shutdown` request has been handled; an
    /// embedding event loop should exit as soon as it observes this,
    /// independent of the idle-sweep cadence [`Daemon::should_exit`]
    /// runs on.
    #[must_use]
    pub fn shutdown_requested(&self) -> bool {
        self.shutdown_requested
    }

    /// Rewrites the listener log from the live in-memory registry and
    /// reopens the handle (the old file descriptor would otherwise
    /// keep appending to the unlinked pre-compaction inode).
    pub fn compact_log(&mut self) -> ConfResult<()> {
        let live: Vec<Record> = self
            .live_listeners
            .iter()
            .map(|((db_address, cnxn_id), l)| Record::Add {
                cnxn_id: *cnxn_id,
                db_address: db_address.clone(),
                prefix: l.prefix.clone(),
                client_ior: l.client_ior.clone(),
            })
            .collect();
        listener_log::compact(self.listener_log.path(), &live)?;
        self.listener_log = listener_log::ListenerLog::open(self.config.listener_log_path())?;
        Ok(())
    }

    pub fn acquire_lock(&mut self, pid: u32, endpoint: Option<&str>, ping: impl FnOnce(&str) -> bool) -> ConfResult<()> {
        let handle = lock::acquire(&self.config.lock_dir(), true, pid, endpoint, ping)?;
        self.lock = Some(handle);
        Ok(())
    }

    pub fn release_lock(&mut self) -> ConfResult<()> {
        if let Some(handle) = self.lock.take() {
            handle.release()?;
        }
        Ok(())
    }

    /// Clean shutdown: compact the log, release the lock, and flag
    /// the embedding event loop to exit (spec.md §6 `--shutdown`).
    pub fn shutdown(&mut self) -> ConfResult<()> {
        self.compact_log()?;
        self.release_lock()?;
        self.shutdown_requested = true;
        Ok(())
    }

    /// Runs `action`, returning it, without attempting to clean up
    /// state first (used for best-effort shutdown paths that must not
    /// panic on the way out).
    pub fn handle_signal(&mut self, signal: Signal) -> SignalAction {
        let action = signal.action();
        match action {
            SignalAction::CrashAbort => {
                error(&format!("fatal signal {signal:?}, aborting without cleanup"));
            }
            SignalAction::CleanShutdown => {
                if let Err(e) = self.shutdown() {
                    error(&format!("clean shutdown after {signal:?} failed: {e}"));
                }
            }
            SignalAction::BestEffortShutdownThenExit1 => {
                let _ = self.compact_log();
                let _ = self.release_lock();
            }
            SignalAction::Ignored => {}
        }
        action
    }
}

/// A signal the daemon's handler distinguishes (spec.md §4.10).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Signal {
    Segv,
    Bus,
    Ill,
    Hup,
    Term,
    Pipe,
    Fpe,
    Int,
}

/// What the daemon does in response to a [`Signal`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignalAction {
    /// Write a crash notice, then abort; no cleanup is attempted.
    CrashAbort,
    /// Compact the log, release the lock, exit 0.
    CleanShutdown,
    /// Attempt cleanup but exit 1 regardless of its outcome.
    BestEffortShutdownThenExit1,
    /// No-op.
    Ignored,
}

impl Signal {
    #[must_use]
    pub fn action(self) -> SignalAction {
        match self {
            Signal::Segv | Signal::Bus | Signal::Ill => SignalAction::CrashAbort,
            Signal::Hup => SignalAction::CleanShutdown,
            Signal::Term | Signal::Pipe | Signal::Fpe => SignalAction::BestEffortShutdownThenExit1,
            Signal::Int => SignalAction::Ignored,
        }
    }
}

#[cfg(feature = "tracing")]
fn info(message: &str) {
    tracing::info!("{message}");
}

#[cfg(not(feature = "tracing"))]
fn info(_message: &str) {}

#[cfg(feature = "tracing")]
fn error(message: &str) {
    tracing::error!("{message}");
}

#[cfg(not(feature = "tracing"))]
fn error(_message: &str) {}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(dir: &Path) -> DaemonConfig {
        let mem_root = dir.join("default-root");
        std::fs::create_dir_all(&mem_root).unwrap();
        DaemonConfig::new(vec![format!("file:readwrite:{}", mem_root.display())], dir.join("state"))
    }

    #[test]
    fn get_database_creates_lazily_and_reuses() {
        let dir = tempfile::tempdir().unwrap();
        let mut daemon = Daemon::new(config(dir.path())).unwrap();
        let other_root = dir.path().join("other-root");
        std::fs::create_dir_all(&other_root).unwrap();
        let addr = format!("file:readwrite:{}", other_root.display());

        assert!(daemon.get_database(&addr).is_ok());
        assert_eq!(daemon.databases.len(), 1);
        assert!(daemon.get_database(&addr).is_ok());
        assert_eq!(daemon.databases.len(), 1, "second request must reuse the same Database");
    }

    #[test]
    fn add_listener_logs_and_remove_listener_logs() {
        let dir = tempfile::tempdir().unwrap();
        let mut daemon = Daemon::new(config(dir.path())).unwrap();
        let id = daemon.add_listener(DEFAULT_DB_ADDRESS, "/a", "ior://client", |_, _, _| {}).unwrap();

        let records = daemon.listener_log.read_all().unwrap();
        assert!(matches!(&records[0], Record::Add { cnxn_id, .. } if *cnxn_id == id));

        daemon.remove_listener(DEFAULT_DB_ADDRESS, id).unwrap();
        let records = daemon.listener_log.read_all().unwrap();
        assert!(matches!(&records[1], Record::Remove { cnxn_id, .. } if *cnxn_id == id));
    }

    #[test]
    fn idle_sweep_evicts_only_idle_non_default_databases() {
        let dir = tempfile::tempdir().unwrap();
        let mut cfg = config(dir.path());
        cfg.idle_threshold = Duration::from_secs(0);
        let mut daemon = Daemon::new(cfg).unwrap();
        let other_root = dir.path().join("other-root");
        std::fs::create_dir_all(&other_root).unwrap();
        let addr = format!("file:readwrite:{}", other_root.display());
        daemon.get_database(&addr).unwrap();

        let evicted = daemon.idle_sweep();
        assert_eq!(evicted, vec![addr]);
        assert!(daemon.databases.is_empty());
    }

    #[test]
    fn should_exit_once_only_default_remains_with_no_listeners() {
        let dir = tempfile::tempdir().unwrap();
        let mut daemon = Daemon::new(config(dir.path())).unwrap();
        assert!(daemon.should_exit());
        let id = daemon.add_listener(DEFAULT_DB_ADDRESS, "/", "ior://c", |_, _, _| {}).unwrap();
        assert!(!daemon.should_exit());
        daemon.remove_listener(DEFAULT_DB_ADDRESS, id).unwrap();
        assert!(daemon.should_exit());
    }

    #[test]
    fn signal_action_mapping_matches_the_documented_table() {
        assert_eq!(Signal::Segv.action(), SignalAction::CrashAbort);
        assert_eq!(Signal::Bus.action(), SignalAction::CrashAbort);
        assert_eq!(Signal::Ill.action(), SignalAction::CrashAbort);
        assert_eq!(Signal::Hup.action(), SignalAction::CleanShutdown);
        assert_eq!(Signal::Term.action(), SignalAction::BestEffortShutdownThenExit1);
        assert_eq!(Signal::Pipe.action(), SignalAction::BestEffortShutdownThenExit1);
        assert_eq!(Signal::Fpe.action(), SignalAction::BestEffortShutdownThenExit1);
        assert_eq!(Signal::Int.action(), SignalAction::Ignored);
    }

    #[test]
    fn compact_log_then_reopen_preserves_live_listeners() {
        let dir = tempfile::tempdir().unwrap();
        let mut daemon = Daemon::new(config(dir.path())).unwrap();
        let id = daemon.add_listener(DEFAULT_DB_ADDRESS, "/a", "ior://client", |_, _, _| {}).unwrap();
        daemon.compact_log().unwrap();

        let records = daemon.listener_log.read_all().unwrap();
        assert_eq!(records.len(), 1);
        assert!(matches!(&records[0], Record::Add { cnxn_id, .. } if *cnxn_id == id));
    }
}
