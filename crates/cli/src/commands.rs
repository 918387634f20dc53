//! Implements each flag combination (spec.md §6), one function per
//! mode, dispatched by [`crate::run`].

use std::io::Write;
use std::path::Path;

use client::Client;
use error::ConfResult;
use rpc::{LineClient, Reply, Request, Transport};
use schema::{load_schema_file, InstalledSchema};
use value::{Value, ValueType};

use crate::args::{Args, ScalarType};
use crate::connection;

const EXIT_SUCCESS: i32 = 0;
const EXIT_ERROR: i32 = 1;
const EXIT_FALSE: i32 = 2;

fn parse_scalar(ty: ScalarType, raw: &str) -> Result<Value, error::ConfError> {
    match ty {
        ScalarType::Int => raw
            .trim()
            .parse::<i32>()
            .map(Value::Int)
            .map_err(|e| error::ConfError::new(error::ErrorKind::ParseError, e.to_string())),
        ScalarType::Float => raw
            .trim()
            .parse::<f64>()
            .map(Value::Float)
            .map_err(|e| error::ConfError::new(error::ErrorKind::ParseError, e.to_string())),
        ScalarType::Bool => match raw.trim() {
            "true" | "1" => Ok(Value::Bool(true)),
            "false" | "0" => Ok(Value::Bool(false)),
            other => Err(error::ConfError::new(
                error::ErrorKind::ParseError,
                format!("invalid boolean value {other:?}"),
            )),
        },
        ScalarType::String => Ok(Value::String(raw.to_string())),
    }
}

fn print_value(out: &mut impl Write, key: &str, value: &Option<Value>) {
    match value {
        Some(v) => {
            let _ = writeln!(out, "{key} = {}", v.to_human_string());
        }
        None => {
            let _ = writeln!(out, "{key} = (unset)");
        }
    }
}

/// How many of the mutually-exclusive "what to do" flags were given.
/// The CLI surface is a minimal one (spec.md §6): exactly one mode per
/// invocation, aside from `--spawn`/`--source`/`--locale`/`--socket`,
/// which modify how the chosen mode runs rather than selecting it.
pub fn requested_mode_count(args: &Args) -> usize {
    usize::from(!args.get.is_empty())
        + usize::from(args.set.is_some())
        + usize::from(!args.unset.is_empty())
        + usize::from(args.all_entries.is_some())
        + usize::from(args.all_dirs.is_some())
        + usize::from(args.recursive_list.is_some())
        + usize::from(args.dir_exists.is_some())
        + usize::from(args.ping)
        + usize::from(args.shutdown)
        + usize::from(args.install_schema_file.is_some())
        + usize::from(!args.makefile_install_rule.is_empty())
        + usize::from(!args.break_key.is_empty())
        + usize::from(!args.break_directory.is_empty())
}

pub fn execute(args: &Args, out: &mut impl Write, err: &mut impl Write) -> i32 {
    if args.spawn {
        if let Err(e) = connection::spawn_daemon(args) {
            let _ = writeln!(err, "nconftool: {e}");
        }
    }

    match requested_mode_count(args) {
        0 if args.spawn => return EXIT_SUCCESS,
        0 => {
            let _ = writeln!(err, "nconftool: no operation requested (try --get, --set, --help)");
            return EXIT_ERROR;
        }
        n if n > 1 => {
            let _ = writeln!(err, "nconftool: only one operation may be requested at a time");
            return EXIT_ERROR;
        }
        _ => {}
    }

    if args.ping {
        return if connection::ping(&connection::socket_path(args)) {
            EXIT_SUCCESS
        } else {
            EXIT_FALSE
        };
    }

    if args.shutdown {
        return shutdown_daemon(args, err);
    }

    if let Some(dir) = &args.dir_exists {
        let mut client = connection::remote_client(args);
        return if client.dir_exists(dir) { EXIT_SUCCESS } else { EXIT_FALSE };
    }

    if let Some(file) = &args.install_schema_file {
        return install_schema_file(args, file, err);
    }

    if !args.makefile_install_rule.is_empty() {
        for file in &args.makefile_install_rule {
            let code = install_schema_file(args, file, err);
            if code != EXIT_SUCCESS {
                return code;
            }
        }
        return EXIT_SUCCESS;
    }

    if !args.break_key.is_empty() {
        return break_keys(args, &args.break_key, err);
    }

    if !args.break_directory.is_empty() {
        return break_directories(args, &args.break_directory, err);
    }

    let mut client = if args.direct {
        match connection::local_client(args) {
            Ok(c) => c,
            Err(e) => {
                let _ = writeln!(err, "nconftool: {e}");
                return EXIT_ERROR;
            }
        }
    } else {
        connection::remote_client(args)
    };
    if let Some(locale) = &args.locale {
        client = client.with_locale(locale.clone());
    }

    if !args.get.is_empty() {
        return get_keys(&mut client, &args.get, out, err);
    }

    if let Some(key) = &args.set {
        return set_key(&mut client, key, args.set_value.as_deref(), args.value_type, err);
    }

    if !args.unset.is_empty() {
        return unset_keys(&mut client, &args.unset, err);
    }

    if let Some(dir) = &args.all_entries {
        return all_entries(&mut client, dir, out, err);
    }

    if let Some(dir) = &args.all_dirs {
        return all_dirs(&mut client, dir, out, err);
    }

    if let Some(dir) = &args.recursive_list {
        return recursive_list(&mut client, dir, out, err);
    }

    EXIT_ERROR
}

/// `--shutdown` has no `Client` counterpart (it asks the daemon
/// process itself to exit, not a per-database operation), so it talks
/// to the wire protocol directly rather than through an `EngineBackend`.
fn shutdown_daemon(args: &Args, err: &mut impl Write) -> i32 {
    let socket = connection::socket_path(args);
    let Ok(mut client) = LineClient::connect(&socket) else {
        let _ = writeln!(err, "nconftool: {}: no daemon running", socket.display());
        return EXIT_ERROR;
    };
    match client.call(Request::Shutdown) {
        Ok(Reply::Unit) => EXIT_SUCCESS,
        Ok(_) => EXIT_SUCCESS,
        Err(e) => {
            let _ = writeln!(err, "nconftool: {e}");
            EXIT_ERROR
        }
    }
}

fn run_unit(result: ConfResult<()>, err: &mut impl Write) -> i32 {
    match result {
        Ok(()) => EXIT_SUCCESS,
        Err(e) => {
            let _ = writeln!(err, "nconftool: {e}");
            EXIT_ERROR
        }
    }
}

fn get_keys(client: &mut Client, keys: &[String], out: &mut impl Write, err: &mut impl Write) -> i32 {
    let mut code = EXIT_SUCCESS;
    for key in keys {
        match client.get(key) {
            Ok(value) => print_value(out, key, &value),
            Err(e) => {
                let _ = writeln!(err, "nconftool: {key}: {e}");
                code = EXIT_ERROR;
            }
        }
    }
    code
}

fn set_key(client: &mut Client, key: &str, raw_value: Option<&str>, ty: Option<ScalarType>, err: &mut impl Write) -> i32 {
    let (Some(ty), Some(raw_value)) = (ty, raw_value) else {
        let _ = writeln!(err, "nconftool: --set requires --type and a value");
        return EXIT_ERROR;
    };
    let value = match parse_scalar(ty, raw_value) {
        Ok(v) => v,
        Err(e) => {
            let _ = writeln!(err, "nconftool: {e}");
            return EXIT_ERROR;
        }
    };
    run_unit(client.set(key, value), err)
}

fn unset_keys(client: &mut Client, keys: &[String], err: &mut impl Write) -> i32 {
    let mut code = EXIT_SUCCESS;
    for key in keys {
        if let Err(e) = client.unset(key) {
            let _ = writeln!(err, "nconftool: {key}: {e}");
            code = EXIT_ERROR;
        }
    }
    code
}

fn all_entries(client: &mut Client, dir: &str, out: &mut impl Write, err: &mut impl Write) -> i32 {
    match client.all_entries(dir) {
        Ok(entries) => {
            for entry in entries {
                print_value(out, &entry.key, &entry.value);
            }
            EXIT_SUCCESS
        }
        Err(e) => {
            let _ = writeln!(err, "nconftool: {e}");
            EXIT_ERROR
        }
    }
}

fn all_dirs(client: &mut Client, dir: &str, out: &mut impl Write, err: &mut impl Write) -> i32 {
    match client.all_dirs(dir) {
        Ok(dirs) => {
            for d in dirs {
                let _ = writeln!(out, "{d}");
            }
            EXIT_SUCCESS
        }
        Err(e) => {
            let _ = writeln!(err, "nconftool: {e}");
            EXIT_ERROR
        }
    }
}

fn recursive_list(client: &mut Client, dir: &str, out: &mut impl Write, err: &mut impl Write) -> i32 {
    fn walk(client: &mut Client, dir: &str, out: &mut impl Write) -> ConfResult<()> {
        for entry in client.all_entries(dir)? {
            print_value(out, &entry.key, &entry.value);
        }
        for sub in client.all_dirs(dir)? {
            walk(client, &sub, out)?;
        }
        Ok(())
    }
    match walk(client, dir, out) {
        Ok(()) => EXIT_SUCCESS,
        Err(e) => {
            let _ = writeln!(err, "nconftool: {e}");
            EXIT_ERROR
        }
    }
}

/// Picks the "C"/default-locale variant from a parsed schema element,
/// falling back to whichever variant came first; installing every
/// locale variant under its `%locale%` pseudo-subdirectory is out of
/// scope for this front-end (see DESIGN.md).
fn pick_variant(schema: &InstalledSchema) -> Option<value::Schema> {
    let variants = schema.per_locale();
    variants
        .iter()
        .find(|s| s.locale.is_empty() || s.locale == "C")
        .or_else(|| variants.first())
        .cloned()
}

fn install_schema_file(args: &Args, file: &Path, err: &mut impl Write) -> i32 {
    let schemas = match load_schema_file(file) {
        Ok(s) => s,
        Err(e) => {
            let _ = writeln!(err, "nconftool: {}: {e}", file.display());
            return EXIT_ERROR;
        }
    };

    let mut client = connection::remote_client(args);
    for schema in &schemas {
        let Some(variant) = pick_variant(schema) else {
            continue;
        };
        if let Err(e) = client.set(&schema.key, Value::Schema(Box::new(variant))) {
            let _ = writeln!(err, "nconftool: installing schema {:?}: {e}", schema.key);
            return EXIT_ERROR;
        }
        for target in &schema.applyto {
            if let Err(e) = client.set_schema(target, &schema.key) {
                let _ = writeln!(err, "nconftool: associating {target:?} with schema {:?}: {e}", schema.key);
                return EXIT_ERROR;
            }
        }
    }
    EXIT_SUCCESS
}

/// Writes a value of the wrong type directly at `key`, bypassing
/// `validate()` via the source stack's raw write path — a corruption
/// injection hook for the crash-resilience tests in spec.md §9, not a
/// capability a real application should have through the daemon.
fn break_keys(args: &Args, keys: &[String], err: &mut impl Write) -> i32 {
    let mut client = match connection::local_client(args) {
        Ok(c) => c,
        Err(e) => {
            let _ = writeln!(err, "nconftool: {e}");
            return EXIT_ERROR;
        }
    };
    for key in keys {
        if let Err(e) = client.set(key, Value::new(ValueType::Invalid)) {
            let _ = writeln!(err, "nconftool: {key}: {e}");
            return EXIT_ERROR;
        }
    }
    EXIT_SUCCESS
}

fn break_directories(args: &Args, dirs: &[String], out_err: &mut impl Write) -> i32 {
    let mut client = match connection::local_client(args) {
        Ok(c) => c,
        Err(e) => {
            let _ = writeln!(out_err, "nconftool: {e}");
            return EXIT_ERROR;
        }
    };
    for dir in dirs {
        let entries = match client.all_entries(dir) {
            Ok(entries) => entries,
            Err(e) => {
                let _ = writeln!(out_err, "nconftool: {dir}: {e}");
                return EXIT_ERROR;
            }
        };
        for entry in entries {
            if let Err(e) = client.set(&entry.key, Value::new(ValueType::Invalid)) {
                let _ = writeln!(out_err, "nconftool: {}: {e}", entry.key);
                return EXIT_ERROR;
            }
        }
    }
    EXIT_SUCCESS
}
