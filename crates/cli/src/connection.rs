//! Builds the [`client::Client`] a command runs against, and the
//! `--spawn`/`--ping` daemon-lifecycle helpers (spec.md §4.12, §6).

use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::time::{Duration, Instant};

use backend::BackendRegistry;
use client::{Client, LocalEngine, RemoteEngine, TransportFactory};
use error::{ConfError, ConfResult, ErrorKind};
use rpc::{LineClient, Reply, Request};
use source::{Source, SourceStack};

use crate::args::Args;

pub fn state_dir(args: &Args) -> PathBuf {
    args.state_dir.clone().unwrap_or_else(|| {
        let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
        PathBuf::from(home).join(".nconfd")
    })
}

pub fn socket_path(args: &Args) -> PathBuf {
    args.socket.clone().unwrap_or_else(|| state_dir(args).join("socket"))
}

/// `NCONF_CONFIG_SOURCE` (spec.md §6): non-empty overrides the
/// default source address for `--direct` operation; set but empty
/// means "use the default path" (same as unset).
fn config_source_env() -> Option<String> {
    std::env::var("NCONF_CONFIG_SOURCE")
        .ok()
        .filter(|v| !v.is_empty())
}

fn default_source_addresses(args: &Args, state_dir: &Path) -> Vec<String> {
    if !args.source.is_empty() {
        args.source.clone()
    } else if let Some(source) = config_source_env() {
        vec![source]
    } else {
        vec![format!("file:readwrite:{}", state_dir.join("config").display())]
    }
}

/// True if a daemon answers `ping` on `socket`.
pub fn ping(socket: &Path) -> bool {
    let Ok(mut client) = LineClient::connect(socket) else {
        return false;
    };
    matches!(client.call(Request::Ping), Ok(Reply::Bool(true)))
}

/// Builds a [`Client`] that talks to the daemon over `--socket` (or
/// its default location).
pub fn remote_client(args: &Args) -> Client {
    let factory = TransportFactory::Socket { path: socket_path(args) };
    Client::new(Box::new(RemoteEngine::new(factory)))
}

/// Builds a [`Client`] that opens `--source` (or the default root)
/// directly, per `--direct` (spec.md §4.12 "Local"); never notifies.
pub fn local_client(args: &Args) -> ConfResult<Client> {
    let registry = BackendRegistry::with_builtins();
    let mut stack = SourceStack::new();
    for address in default_source_addresses(args, &state_dir(args)) {
        stack.push(Source::from_address(&registry, &address)?);
    }
    Ok(Client::new(Box::new(LocalEngine::new(stack))))
}

/// Finds the `nconfd` binary: next to the running executable first
/// (the layout a workspace build produces), falling back to `PATH`.
fn nconfd_binary() -> PathBuf {
    std::env::current_exe()
        .ok()
        .and_then(|exe| exe.parent().map(|dir| dir.join("nconfd")))
        .filter(|path| path.is_file())
        .unwrap_or_else(|| PathBuf::from("nconfd"))
}

/// Starts `nconfd` detached from this process if `--ping` doesn't
/// already succeed, then waits (briefly) for it to come up (spec.md
/// §6 `--spawn`, grounded on `gconf_spawn_daemon`'s "start it if it
/// isn't already running").
pub fn spawn_daemon(args: &Args) -> ConfResult<()> {
    let socket = socket_path(args);
    if ping(&socket) {
        return Ok(());
    }

    let mut command = Command::new(nconfd_binary());
    command
        .arg("--state-dir")
        .arg(state_dir(args))
        .arg("--socket")
        .arg(&socket)
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null());
    for address in &args.source {
        command.arg("--source").arg(address);
    }

    command
        .spawn()
        .map_err(|e| ConfError::new(ErrorKind::Failed, format!("failed to spawn nconfd: {e}")))?;

    let deadline = Instant::now() + Duration::from_secs(5);
    while Instant::now() < deadline {
        if ping(&socket) {
            return Ok(());
        }
        std::thread::sleep(Duration::from_millis(50));
    }
    Err(ConfError::new(ErrorKind::NoServer, "nconfd did not come up within 5 seconds"))
}
