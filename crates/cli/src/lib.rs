//! The `nconftool` command-line front-end: parses the flag surface in
//! [`args`], resolves a connection in [`connection`], and dispatches to
//! [`commands`].

pub mod args;
pub mod commands;
pub mod connection;

use std::ffi::OsString;
use std::io::Write;

use clap::Parser;

use args::Args;

/// Parses `arguments` and runs the selected operation, writing to
/// `stdout`/`stderr` instead of the process's real streams so callers
/// (and tests) can capture output. Returns the process exit code
/// (spec.md §6: 0 success, 1 error, 2 boolean-false).
pub fn run<I, S, Out, Err>(arguments: I, stdout: &mut Out, stderr: &mut Err) -> i32
where
    I: IntoIterator<Item = S>,
    S: Into<OsString> + Clone,
    Out: Write,
    Err: Write,
{
    let args = match Args::try_parse_from(arguments) {
        Ok(args) => args,
        Err(e) => {
            let code = e.exit_code();
            if code == 0 {
                let _ = write!(stdout, "{e}");
            } else {
                let _ = write!(stderr, "{e}");
            }
            return code;
        }
    };
    commands::execute(&args, stdout, stderr)
}

/// Maps [`run`]'s return value onto [`std::process::ExitCode`] for a
/// thin binary entry point.
#[must_use]
pub fn exit_code_from(status: i32) -> std::process::ExitCode {
    u8::try_from(status).map(std::process::ExitCode::from).unwrap_or(std::process::ExitCode::FAILURE)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn run_args(args: &[&str]) -> (i32, String, String) {
        let mut stdout = Vec::new();
        let mut stderr = Vec::new();
        let code = run(args.iter().copied(), &mut stdout, &mut stderr);
        (code, String::from_utf8(stdout).unwrap(), String::from_utf8(stderr).unwrap())
    }

    #[test]
    fn no_operation_requested_is_an_error() {
        let (code, _out, err) = run_args(&["nconftool"]);
        assert_eq!(code, 1);
        assert!(err.contains("no operation requested"));
    }

    #[test]
    fn conflicting_operations_are_rejected() {
        let (code, _out, err) = run_args(&["nconftool", "--get", "/t/k", "--ping"]);
        assert_eq!(code, 1);
        assert!(err.contains("only one operation"));
    }

    #[test]
    fn set_without_type_is_an_error() {
        let (code, _out, err) = run_args(&["nconftool", "--set", "/t/k", "red"]);
        assert_eq!(code, 1);
        assert!(err.contains("--type"));
    }

    #[test]
    fn get_set_unset_round_trip_direct() {
        let dir = tempfile::tempdir().unwrap();
        let source = format!("file:readwrite:{}", dir.path().join("config").display());

        let (code, _out, err) = run_args(&[
            "nconftool", "--direct", "--source", &source, "--set", "--type", "string", "/t/k", "red",
        ]);
        assert_eq!(code, 0, "stderr: {err}");

        let (code, out, _err) = run_args(&["nconftool", "--direct", "--source", &source, "--get", "/t/k"]);
        assert_eq!(code, 0);
        assert!(out.contains("red"), "unexpected output: {out}");

        let (code, _out, _err) = run_args(&["nconftool", "--direct", "--source", &source, "--unset", "/t/k"]);
        assert_eq!(code, 0);

        let (code, out, _err) = run_args(&["nconftool", "--direct", "--source", &source, "--get", "/t/k"]);
        assert_eq!(code, 0);
        assert!(out.contains("unset"), "unexpected output: {out}");
    }

    #[test]
    fn ping_without_daemon_is_boolean_false() {
        let dir = tempfile::tempdir().unwrap();
        let socket = dir.path().join("socket");
        let (code, _out, _err) = run_args(&["nconftool", "--socket", socket.to_str().unwrap(), "--ping"]);
        assert_eq!(code, 2);
    }

    #[test]
    fn dir_exists_without_daemon_is_boolean_false() {
        let dir = tempfile::tempdir().unwrap();
        let socket = dir.path().join("socket");
        let (code, _out, _err) = run_args(&[
            "nconftool", "--socket", socket.to_str().unwrap(), "--dir-exists", "/t",
        ]);
        assert_eq!(code, 2);
    }
}
