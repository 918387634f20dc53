//! The flag surface itself (spec.md §6 "CLI surface"): one `clap`
//! struct, no subcommands, mirroring `gconftool`'s single flat option
//! set where the *combination* of flags chosen picks the mode.

use std::path::PathBuf;

use clap::{Parser, ValueEnum};

/// The four scalar types `--set --type=` accepts (spec.md §6). List,
/// pair, and schema values are only ever written through
/// `--install-schema-file`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum ScalarType {
    Int,
    Float,
    Bool,
    String,
}

#[derive(Parser, Debug)]
#[command(name = "nconftool", about = "Inspect and modify the nconf configuration database")]
pub struct Args {
    /// Reads a value (repeatable).
    #[arg(long = "get", value_name = "KEY")]
    pub get: Vec<String>,

    /// Writes `VALUE` to `KEY`; requires `--type`.
    #[arg(long = "set", value_name = "KEY")]
    pub set: Option<String>,

    /// The literal value written by `--set`.
    #[arg(value_name = "VALUE", requires = "set")]
    pub set_value: Option<String>,

    /// The scalar type of the value given to `--set`.
    #[arg(long = "type", value_enum, requires = "set")]
    pub value_type: Option<ScalarType>,

    /// Removes a value (repeatable).
    #[arg(long = "unset", value_name = "KEY")]
    pub unset: Vec<String>,

    /// Lists every entry directly under `DIR`.
    #[arg(long = "all-entries", value_name = "DIR")]
    pub all_entries: Option<String>,

    /// Lists every subdirectory directly under `DIR`.
    #[arg(long = "all-dirs", value_name = "DIR")]
    pub all_dirs: Option<String>,

    /// Lists every entry under `DIR`, recursing into subdirectories.
    #[arg(long = "recursive-list", value_name = "DIR")]
    pub recursive_list: Option<String>,

    /// Exits 0 if `DIR` exists, 2 otherwise.
    #[arg(long = "dir-exists", value_name = "DIR")]
    pub dir_exists: Option<String>,

    /// Exits 0 if the daemon answers, 2 otherwise.
    #[arg(long = "ping")]
    pub ping: bool,

    /// Asks the daemon to shut down cleanly.
    #[arg(long = "shutdown")]
    pub shutdown: bool,

    /// Starts the daemon if it isn't already running.
    #[arg(long = "spawn")]
    pub spawn: bool,

    /// Installs every `<schema>` entry in `FILE` (spec.md §4.6).
    #[arg(long = "install-schema-file", value_name = "FILE")]
    pub install_schema_file: Option<PathBuf>,

    /// Like `--install-schema-file`, for each file, reporting failures
    /// the way a Makefile install rule expects (stops at the first).
    #[arg(long = "makefile-install-rule", value_name = "FILES", num_args = 1..)]
    pub makefile_install_rule: Vec<PathBuf>,

    /// Breaks each key (writes a value of the wrong type, spec.md
    /// §9's "corruption injection" test hook) directly through a
    /// local engine, bypassing the daemon.
    #[arg(long = "break-key", value_name = "KEYS", num_args = 1..)]
    pub break_key: Vec<String>,

    /// Like `--break-key`, for a whole directory tree.
    #[arg(long = "break-directory", value_name = "DIRS", num_args = 1..)]
    pub break_directory: Vec<String>,

    /// Locale used for `--get`/`--all-entries`/`--recursive-list`.
    #[arg(long = "locale", value_name = "LOCALE")]
    pub locale: Option<String>,

    /// Source addresses for the default database, overriding the
    /// source-path file (repeatable, priority order).
    #[arg(long = "source", value_name = "ADDRESS")]
    pub source: Vec<String>,

    /// Bypasses the daemon entirely and opens the sources directly in
    /// this process (spec.md §4.12 "Local"); listener-dependent flags
    /// are unavailable in this mode.
    #[arg(long = "direct")]
    pub direct: bool,

    /// Unix domain socket of the daemon to talk to.
    #[arg(long = "socket", value_name = "PATH")]
    pub socket: Option<PathBuf>,

    /// Directory holding the daemon's listener log and lock.
    #[arg(long = "state-dir", value_name = "PATH")]
    pub state_dir: Option<PathBuf>,
}
