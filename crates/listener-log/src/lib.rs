//! The crash-resilient listener log (spec.md §4.9).
//!
//! # Design
//!
//! An append-only UTF-8 text file, one record per line. Every
//! `add`/`remove` on a [`database::Database`] — and every client-add —
//! must append the matching record and fsync before the caller-facing
//! operation returns success; a failed append is fatal to that
//! operation (enforced by the caller, since this crate only exposes
//! [`ListenerLog::append`]'s own `Result`).
//!
//! On startup the daemon reads the whole file, cancels matched
//! ADD/REMOVE pairs, and replays the survivors (see [`replay`]).
//! Periodically, and on clean shutdown, the live in-memory listener
//! set is written out fresh via [`compact`] using a tmp-file-then-rename
//! sequence so a crash mid-compaction cannot corrupt the log.

use std::collections::HashSet;
use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use error::{ConfError, ConfResult, ErrorKind};

/// One listener-log record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Record {
    Add {
        cnxn_id: u64,
        db_address: String,
        prefix: String,
        client_ior: String,
    },
    Remove {
        cnxn_id: u64,
        db_address: String,
        prefix: String,
        client_ior: String,
    },
    ClientAdd {
        client_ior: String,
    },
}

/// The `db_address` written for the default database (spec.md §4.9).
pub const DEFAULT_DB_ADDRESS: &str = "def";

impl Record {
    #[must_use]
    pub fn format(&self) -> String {
        match self {
            Record::Add {
                cnxn_id,
                db_address,
                prefix,
                client_ior,
            } => format!(
                "ADD {cnxn_id} {} {} {}",
                value::quote(db_address),
                value::quote(prefix),
                value::quote(client_ior)
            ),
            Record::Remove {
                cnxn_id,
                db_address,
                prefix,
                client_ior,
            } => format!(
                "REMOVE {cnxn_id} {} {} {}",
                value::quote(db_address),
                value::quote(prefix),
                value::quote(client_ior)
            ),
            Record::ClientAdd { client_ior } => format!("CLIENTADD {}", value::quote(client_ior)),
        }
    }

    pub fn parse(line: &str) -> ConfResult<Record> {
        let line = line.trim();
        if let Some(rest) = line.strip_prefix("ADD ") {
            let (cnxn_id, db_address, prefix, client_ior) = parse_id_and_fields(rest)?;
            Ok(Record::Add {
                cnxn_id,
                db_address,
                prefix,
                client_ior,
            })
        } else if let Some(rest) = line.strip_prefix("REMOVE ") {
            let (cnxn_id, db_address, prefix, client_ior) = parse_id_and_fields(rest)?;
            Ok(Record::Remove {
                cnxn_id,
                db_address,
                prefix,
                client_ior,
            })
        } else if let Some(rest) = line.strip_prefix("CLIENTADD ") {
            let (client_ior, _) = next_quoted(rest)?;
            Ok(Record::ClientAdd { client_ior })
        } else {
            Err(ConfError::new(ErrorKind::ParseError, format!("unrecognized listener-log record: {line:?}")))
        }
    }
}

fn next_quoted(s: &str) -> ConfResult<(String, &str)> {
    value::unquote(s.trim_start()).map_err(|e| ConfError::new(ErrorKind::ParseError, e.to_string()))
}

fn parse_id_and_fields(rest: &str) -> ConfResult<(u64, String, String, String)> {
    let rest = rest.trim_start();
    let (id_str, rest) = rest
        .split_once(' ')
        .ok_or_else(|| ConfError::new(ErrorKind::ParseError, "missing cnxn_id field"))?;
    let cnxn_id: u64 = id_str
        .parse()
        .map_err(|_| ConfError::new(ErrorKind::ParseError, format!("invalid cnxn_id {id_str:?}")))?;
    let (db_address, rest) = next_quoted(rest)?;
    let (prefix, rest) = next_quoted(rest)?;
    let (client_ior, rest) = next_quoted(rest)?;
    debug_assert!(rest.trim().is_empty());
    Ok((cnxn_id, db_address, prefix, client_ior))
}

/// An append-only, fsync-on-write handle to the listener log file.
pub struct ListenerLog {
    path: PathBuf,
    file: File,
}

impl ListenerLog {
    pub fn open(path: impl Into<PathBuf>) -> ConfResult<Self> {
        let path = path.into();
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let file = OpenOptions::new().create(true).append(true).open(&path)?;
        Ok(ListenerLog { path, file })
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Appends `record` and fsyncs before returning. Per spec.md §4.9
    /// this is the only place a failure is allowed to be fatal to the
    /// calling listener operation.
    pub fn append(&mut self, record: &Record) -> ConfResult<()> {
        writeln!(self.file, "{}", record.format())?;
        self.file.sync_data()?;
        Ok(())
    }

    pub fn read_all(&self) -> ConfResult<Vec<Record>> {
        read_all(&self.path)
    }
}

fn read_all(path: &Path) -> ConfResult<Vec<Record>> {
    if !path.exists() {
        return Ok(Vec::new());
    }
    let text = fs::read_to_string(path)?;
    text.lines()
        .filter(|l| !l.trim().is_empty())
        .map(Record::parse)
        .collect()
}

/// One surviving ADD after matched ADD/REMOVE pairs have cancelled.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SurvivingAdd {
    pub old_cnxn_id: u64,
    pub db_address: String,
    pub prefix: String,
    pub client_ior: String,
}

/// Cancels matched ADD/REMOVE pairs (keyed by `(db_address, cnxn_id)`,
/// since connection ids are only unique within one database) and
/// returns the surviving ADDs in file order.
#[must_use]
pub fn surviving_adds(records: &[Record]) -> Vec<SurvivingAdd> {
    let mut removed: HashSet<(String, u64)> = HashSet::new();
    for r in records {
        if let Record::Remove { cnxn_id, db_address, .. } = r {
            removed.insert((db_address.clone(), *cnxn_id));
        }
    }
    records
        .iter()
        .filter_map(|r| match r {
            Record::Add {
                cnxn_id,
                db_address,
                prefix,
                client_ior,
            } if !removed.contains(&(db_address.clone(), *cnxn_id)) => Some(SurvivingAdd {
                old_cnxn_id: *cnxn_id,
                db_address: db_address.clone(),
                prefix: prefix.clone(),
                client_ior: client_ior.clone(),
            }),
            _ => None,
        })
        .collect()
}

/// Outcome of [`replay`]: listeners that were remapped to a fresh
/// connection id, and ADDs dropped because their client is gone.
#[derive(Debug, Default)]
pub struct ReplayOutcome {
    pub remapped: Vec<(SurvivingAdd, u64)>,
    pub dropped: Vec<SurvivingAdd>,
}

/// Replays the surviving ADDs of `records` against `log`, per spec.md
/// §4.9's five-step algorithm. The three callbacks are the daemon's
/// hooks into the rest of the live system: resolving a client handle,
/// registering a fresh listener in the right database, and pushing
/// the id remapping back to the client.
pub fn replay(
    log: &mut ListenerLog,
    records: &[Record],
    mut client_is_live: impl FnMut(&str) -> bool,
    mut register: impl FnMut(&str, &str) -> u64,
    mut notify_client: impl FnMut(&str, &str, u64, &str, u64),
) -> ConfResult<ReplayOutcome> {
    let mut outcome = ReplayOutcome::default();
    for add in surviving_adds(records) {
        if !client_is_live(&add.client_ior) {
            outcome.dropped.push(add);
            continue;
        }
        log.append(&Record::Remove {
            cnxn_id: add.old_cnxn_id,
            db_address: add.db_address.clone(),
            prefix: add.prefix.clone(),
            client_ior: add.client_ior.clone(),
        })?;
        let new_id = register(&add.db_address, &add.prefix);
        notify_client(&add.client_ior, &add.db_address, add.old_cnxn_id, &add.prefix, new_id);
        log.append(&Record::Add {
            cnxn_id: new_id,
            db_address: add.db_address.clone(),
            prefix: add.prefix.clone(),
            client_ior: add.client_ior.clone(),
        })?;
        outcome.remapped.push((add, new_id));
    }
    Ok(outcome)
}

/// Rewrites the log from `live` (the current in-memory listener set)
/// via `log.tmp` → fsync → rename `log` to `log.orig` → rename
/// `log.tmp` to `log` → unlink `log.orig`. Any failure after the first
/// rename restores `log.orig`.
pub fn compact(path: &Path, live: &[Record]) -> ConfResult<()> {
    let tmp = path.with_extension("tmp");
    let orig = path.with_extension("orig");

    let mut body = String::new();
    for record in live {
        body.push_str(&record.format());
        body.push('\n');
    }
    {
        let mut f = File::create(&tmp)?;
        f.write_all(body.as_bytes())?;
        f.sync_all()?;
    }

    let had_original = path.exists();
    if had_original {
        fs::rename(path, &orig)?;
    }
    match fs::rename(&tmp, path) {
        Ok(()) => {
            if had_original {
                let _ = fs::remove_file(&orig);
            }
            Ok(())
        }
        Err(e) => {
            if had_original {
                let _ = fs::rename(&orig, path);
            }
            Err(e.into())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn add_record_round_trips_through_format_and_parse() {
        let record = Record::Add {
            cnxn_id: 7,
            db_address: "def".to_string(),
            prefix: "/a".to_string(),
            client_ior: "ior://client".to_string(),
        };
        let formatted = record.format();
        assert_eq!(Record::parse(&formatted).unwrap(), record);
    }

    #[test]
    fn matched_add_remove_pair_cancels() {
        let records = vec![
            Record::Add {
                cnxn_id: 1,
                db_address: "def".into(),
                prefix: "/a".into(),
                client_ior: "c1".into(),
            },
            Record::Remove {
                cnxn_id: 1,
                db_address: "def".into(),
                prefix: "/a".into(),
                client_ior: "c1".into(),
            },
            Record::Add {
                cnxn_id: 2,
                db_address: "def".into(),
                prefix: "/b".into(),
                client_ior: "c1".into(),
            },
        ];
        let surviving = surviving_adds(&records);
        assert_eq!(surviving.len(), 1);
        assert_eq!(surviving[0].old_cnxn_id, 2);
    }

    #[test]
    fn replay_remaps_live_clients_and_drops_gone_ones() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("saved_state");
        let mut log = ListenerLog::open(&path).unwrap();
        log.append(&Record::Add {
            cnxn_id: 1,
            db_address: "def".into(),
            prefix: "/a".into(),
            client_ior: "live-client".into(),
        })
        .unwrap();
        log.append(&Record::Add {
            cnxn_id: 2,
            db_address: "def".into(),
            prefix: "/b".into(),
            client_ior: "dead-client".into(),
        })
        .unwrap();

        let records = log.read_all().unwrap();
        let mut next_id = 100u64;
        let mut remapped_calls = Vec::new();
        let outcome = replay(
            &mut log,
            &records,
            |ior| ior == "live-client",
            |_db, _prefix| {
                next_id += 1;
                next_id
            },
            |ior, db, old, prefix, new| remapped_calls.push((ior.to_string(), db.to_string(), old, prefix.to_string(), new)),
        )
        .unwrap();

        assert_eq!(outcome.remapped.len(), 1);
        assert_eq!(outcome.dropped.len(), 1);
        assert_eq!(remapped_calls.len(), 1);
        assert_eq!(remapped_calls[0].0, "live-client");
    }

    #[test]
    fn compact_then_reread_matches_live_set() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("saved_state");
        fs::write(&path, "garbage that should be replaced\n").unwrap();

        let live = vec![Record::Add {
            cnxn_id: 9,
            db_address: "def".into(),
            prefix: "/x".into(),
            client_ior: "c".into(),
        }];
        compact(&path, &live).unwrap();

        let reread = read_all(&path).unwrap();
        assert_eq!(reread, live);
    }
}
