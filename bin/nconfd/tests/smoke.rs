//! Starts the real `nconfd` binary and talks to it over its socket,
//! the way a packaging test would (spec.md §6 `--ping`/`--shutdown`).

use std::time::{Duration, Instant};

use assert_cmd::prelude::*;
use rpc::{LineClient, Reply, Request, Transport};
use std::process::Command;

fn wait_for_socket(socket: &std::path::Path) {
    let deadline = Instant::now() + Duration::from_secs(5);
    while Instant::now() < deadline {
        if socket.exists() {
            return;
        }
        std::thread::sleep(Duration::from_millis(50));
    }
    panic!("nconfd did not create its socket in time");
}

#[test]
fn daemon_serves_a_client_over_its_socket_and_shuts_down_cleanly() {
    let dir = tempfile::tempdir().unwrap();
    let state_dir = dir.path().join("state");
    let socket = state_dir.join("socket");

    let mut cmd = Command::cargo_bin("nconfd").unwrap();
    cmd.arg("--state-dir").arg(&state_dir).arg("--socket").arg(&socket);
    let mut child = cmd.spawn().unwrap();

    wait_for_socket(&socket);

    let mut client = LineClient::connect(&socket).unwrap();
    assert!(matches!(client.call(Request::Ping), Ok(Reply::Bool(true))));

    let db = listener_log::DEFAULT_DB_ADDRESS.to_string();
    client
        .call(Request::Set {
            db: db.clone(),
            key: "/t/answer".to_string(),
            value: value::Value::Int(42),
        })
        .unwrap();

    let reply = client
        .call(Request::LookupWithLocale {
            db,
            key: "/t/answer".to_string(),
            locale: None,
            use_default: true,
        })
        .unwrap();
    assert!(matches!(reply, Reply::Value { value: Some(value::Value::Int(42)), .. }));

    client.call(Request::Shutdown).ok();
    let status = child.wait().unwrap();
    assert!(status.success());
}
