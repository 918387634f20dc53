//! The nconfd daemon binary: wires a [`daemon::Daemon`] to a
//! [`rpc::LineServer`] over a Unix domain socket, acquires the process
//! lock, and drives the idle-sweep/compaction timer and signal table
//! from spec.md §4.10.

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::atomic::{AtomicI32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use clap::Parser;
use daemon::{Daemon, DaemonConfig, Signal};
use rpc::{Dispatcher, LineClient, LineServer, Request};

#[derive(Parser)]
#[command(name = "nconfd", about = "Hierarchical configuration database daemon")]
struct Args {
    /// Directory holding the listener log and lock directory.
    #[arg(long)]
    state_dir: Option<PathBuf>,

    /// Unix domain socket to listen on.
    #[arg(long)]
    socket: Option<PathBuf>,

    /// A default-database source address, in priority order. May be
    /// repeated; overrides `--sources-file` when given.
    #[arg(long = "source")]
    sources: Vec<String>,

    /// A source-path file (spec.md §6) to read addresses from when
    /// `--source` isn't given.
    #[arg(long)]
    sources_file: Option<PathBuf>,
}

fn state_dir_default() -> PathBuf {
    let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
    PathBuf::from(home).join(".nconfd")
}

static RAISED_SIGNAL: AtomicI32 = AtomicI32::new(0);

extern "C" fn handle_raw_signal(signum: libc::c_int) {
    if signum == libc::SIGSEGV || signum == libc::SIGBUS || signum == libc::SIGILL {
        // Fatal corruption: abort immediately rather than risk running
        // more Rust on a broken stack or heap.
        unsafe { libc::abort() };
    }
    RAISED_SIGNAL.store(signum, Ordering::SeqCst);
}

fn install_signal_handlers() {
    unsafe {
        let mut mask: libc::sigset_t = std::mem::zeroed();
        libc::sigemptyset(&mut mask);
        let mut act: libc::sigaction = std::mem::zeroed();
        act.sa_sigaction = handle_raw_signal as usize;
        act.sa_mask = mask;
        act.sa_flags = 0;
        for signum in [
            libc::SIGSEGV,
            libc::SIGBUS,
            libc::SIGILL,
            libc::SIGHUP,
            libc::SIGTERM,
            libc::SIGPIPE,
            libc::SIGFPE,
        ] {
            libc::sigaction(signum, &act, std::ptr::null_mut());
        }

        let mut ignore: libc::sigaction = std::mem::zeroed();
        ignore.sa_sigaction = libc::SIG_IGN;
        libc::sigaction(libc::SIGINT, &ignore, std::ptr::null_mut());
    }
}

fn signal_from_raw(raw: i32) -> Option<Signal> {
    match raw {
        s if s == libc::SIGHUP => Some(Signal::Hup),
        s if s == libc::SIGTERM => Some(Signal::Term),
        s if s == libc::SIGPIPE => Some(Signal::Pipe),
        s if s == libc::SIGFPE => Some(Signal::Fpe),
        _ => None,
    }
}

/// Probes whether a prior daemon is still alive by asking it to `ping`
/// over the socket path recorded as its endpoint (spec.md §4.14 point
/// 3).
fn ping_endpoint(endpoint: &str) -> bool {
    let Ok(mut client) = LineClient::connect(endpoint) else {
        return false;
    };
    matches!(client.call(Request::Ping), Ok(rpc::Reply::Bool(true)))
}

fn main() -> ExitCode {
    let args = Args::parse();

    #[cfg(feature = "tracing")]
    {
        use tracing_subscriber::EnvFilter;
        tracing_subscriber::fmt()
            .with_env_filter(EnvFilter::from_default_env())
            .with_target(true)
            .init();
    }

    let state_dir = args.state_dir.unwrap_or_else(state_dir_default);
    let socket_path = args.socket.unwrap_or_else(|| state_dir.join("socket"));

    let config_source_env = std::env::var("NCONF_CONFIG_SOURCE")
        .ok()
        .filter(|v| !v.is_empty());

    let sources = if !args.sources.is_empty() {
        args.sources
    } else if let Some(file) = &args.sources_file {
        match daemon::source_path::parse_source_path_file(file) {
            Ok(sources) => sources,
            Err(e) => {
                eprintln!("nconfd: {}: {e}", file.display());
                return ExitCode::FAILURE;
            }
        }
    } else if let Some(source) = config_source_env {
        // spec.md §6: NCONF_CONFIG_SOURCE non-empty selects an
        // override source; empty (or unset) falls through to the
        // default path below.
        vec![source]
    } else {
        vec![format!("file:readwrite:{}", state_dir.join("config").display())]
    };

    let config = DaemonConfig::new(sources, &state_dir);
    let mut daemon = match Daemon::new(config) {
        Ok(d) => d,
        Err(e) => {
            eprintln!("nconfd: failed to start: {e}");
            return ExitCode::FAILURE;
        }
    };

    let our_pid = std::process::id();
    let endpoint = socket_path.to_string_lossy().into_owned();
    if let Err(e) = daemon.acquire_lock(our_pid, Some(&endpoint), ping_endpoint) {
        eprintln!("nconfd: {e}");
        return ExitCode::FAILURE;
    }

    // A restarted daemon cannot call back into a previous process's
    // client over this transport (no client-side listening endpoint
    // to dial); every surviving ADD is therefore dropped rather than
    // remapped, matching the "resolve to a live handle; if it fails,
    // drop silently" branch of spec.md §4.9's replay path.
    if let Err(e) = daemon.replay_listener_log(
        |_client_ior| false,
        |_db, _prefix, _client_ior| Box::new(|_, _, _| {}),
        |_client_ior, _db, _old_id, _prefix, _new_id| {},
    ) {
        eprintln!("nconfd: listener log replay failed: {e}");
        let _ = daemon.release_lock();
        return ExitCode::FAILURE;
    }

    let sweep_interval = daemon.config().sweep_interval;
    let dispatcher = Arc::new(Mutex::new(Dispatcher::new(daemon)));

    let server = match LineServer::bind(&socket_path, Arc::clone(&dispatcher)) {
        Ok(s) => s,
        Err(e) => {
            eprintln!("nconfd: failed to bind {}: {e}", socket_path.display());
            dispatcher.lock().expect("dispatcher mutex poisoned").daemon_mut().release_lock().ok();
            return ExitCode::FAILURE;
        }
    };
    std::thread::spawn(move || server.serve_forever());

    install_signal_handlers();

    let mut last_sweep = Instant::now();
    loop {
        std::thread::sleep(Duration::from_millis(200));

        let raised = RAISED_SIGNAL.swap(0, Ordering::SeqCst);
        if raised != 0 {
            if let Some(signal) = signal_from_raw(raised) {
                let mut guard = dispatcher.lock().expect("dispatcher mutex poisoned");
                let action = guard.daemon_mut().handle_signal(signal);
                drop(guard);
                match action {
                    daemon::SignalAction::CleanShutdown => {
                        let _ = std::fs::remove_file(&socket_path);
                        return ExitCode::SUCCESS;
                    }
                    daemon::SignalAction::BestEffortShutdownThenExit1 => {
                        let _ = std::fs::remove_file(&socket_path);
                        return ExitCode::FAILURE;
                    }
                    daemon::SignalAction::CrashAbort | daemon::SignalAction::Ignored => {}
                }
            }
        }

        if dispatcher.lock().expect("dispatcher mutex poisoned").daemon().shutdown_requested() {
            let _ = std::fs::remove_file(&socket_path);
            return ExitCode::SUCCESS;
        }

        if last_sweep.elapsed() >= sweep_interval {
            // Mirrors the original daemon's half-hour cleanup timeout:
            // evict idle databases, compact the log, and only then
            // check whether anything is still using us.
            let mut guard = dispatcher.lock().expect("dispatcher mutex poisoned");
            guard.daemon_mut().idle_sweep();
            let _ = guard.daemon_mut().compact_log();
            let exit = guard.daemon().should_exit();
            drop(guard);
            last_sweep = Instant::now();
            if exit {
                let _ = std::fs::remove_file(&socket_path);
                return ExitCode::SUCCESS;
            }
        }
    }
}
