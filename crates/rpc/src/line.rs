//! A length-prefixed JSON framing of [`Request`]/[`Frame`] over a Unix
//! domain socket, for a client and daemon in separate processes.
//!
//! # Design
//!
//! Every frame is a 4-byte big-endian length followed by that many
//! bytes of `serde_json`. The client writes a bare [`Request`] and
//! then reads [`Frame`]s until it sees a `Frame::Reply`, queuing any
//! `Frame::Event` seen along the way — a client only ever has one
//! call outstanding at a time, so this keeps the protocol simple
//! without a correlation id. The server reads a `Request`, dispatches
//! it, and writes back exactly one `Frame::Reply`; listener callbacks
//! registered via `AddListener` push `Frame::Event`s onto the same
//! connection from whichever thread is dispatching the triggering
//! write, serialized by a per-connection write lock.

use std::collections::VecDeque;
use std::io::{self, Read, Write};
use std::os::unix::net::{UnixListener, UnixStream};
use std::path::Path;
use std::sync::{Arc, Mutex};

use error::{ConfError, ErrorKind};

use crate::{Dispatcher, Event, Frame, Reply, Request, RpcResult, Transport};

fn write_frame<T: serde::Serialize>(writer: &mut impl Write, value: &T) -> io::Result<()> {
    let body = serde_json::to_vec(value).map_err(io::Error::other)?;
    let len = u32::try_from(body.len()).map_err(io::Error::other)?;
    writer.write_all(&len.to_be_bytes())?;
    writer.write_all(&body)?;
    writer.flush()
}

fn read_frame<T: serde::de::DeserializeOwned>(reader: &mut impl Read) -> io::Result<Option<T>> {
    let mut len_buf = [0u8; 4];
    match reader.read_exact(&mut len_buf) {
        Ok(()) => {}
        Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(e),
    }
    let len = u32::from_be_bytes(len_buf) as usize;
    let mut body = vec![0u8; len];
    reader.read_exact(&mut body)?;
    serde_json::from_slice(&body).map(Some).map_err(io::Error::other)
}

fn io_fault(e: io::Error) -> error::ConfError {
    ConfError::new(ErrorKind::NoServer, e.to_string())
}

/// The client side of the Unix-domain-socket transport.
pub struct LineClient {
    stream: UnixStream,
    queued_events: VecDeque<Event>,
}

impl LineClient {
    pub fn connect(path: impl AsRef<Path>) -> RpcResult<Self> {
        let stream = UnixStream::connect(path.as_ref()).map_err(io_fault)?;
        Ok(LineClient {
            stream,
            queued_events: VecDeque::new(),
        })
    }
}

impl Transport for LineClient {
    fn call(&mut self, request: Request) -> RpcResult<Reply> {
        write_frame(&mut self.stream, &request).map_err(io_fault)?;
        loop {
            let frame: Frame = read_frame(&mut self.stream)
                .map_err(io_fault)?
                .ok_or_else(|| ConfError::new(ErrorKind::NoServer, "connection closed by daemon"))?;
            match frame {
                Frame::Reply(result) => return result,
                Frame::Event(event) => self.queued_events.push_back(event),
            }
        }
    }

    fn poll_event(&mut self) -> Option<Event> {
        self.queued_events.pop_front()
    }
}

/// The server side: accepts connections on a Unix socket at `path`
/// and dispatches every request against a shared [`Dispatcher`].
pub struct LineServer {
    listener: UnixListener,
    dispatcher: Arc<Mutex<Dispatcher>>,
}

impl LineServer {
    pub fn bind(path: impl AsRef<Path>, dispatcher: Arc<Mutex<Dispatcher>>) -> io::Result<Self> {
        let path = path.as_ref();
        let _ = std::fs::remove_file(path);
        let listener = UnixListener::bind(path)?;
        Ok(LineServer { listener, dispatcher })
    }

    /// Accepts and serves connections until the listener errors
    /// (typically because the socket file was removed on shutdown).
    pub fn serve_forever(&self) {
        for incoming in self.listener.incoming() {
            let Ok(stream) = incoming else { continue };
            let dispatcher = Arc::clone(&self.dispatcher);
            std::thread::spawn(move || serve_connection(stream, dispatcher));
        }
    }
}

fn serve_connection(stream: UnixStream, dispatcher: Arc<Mutex<Dispatcher>>) {
    let writer = Arc::new(Mutex::new(stream.try_clone().expect("duplicate unix stream handle")));
    let mut reader = stream;
    let mut registered_client: Option<String> = None;

    loop {
        let request: Request = match read_frame(&mut reader) {
            Ok(Some(r)) => r,
            Ok(None) | Err(_) => break,
        };

        if let Request::AddClient { client_ior } = &request {
            let (tx, rx) = std::sync::mpsc::channel::<Event>();
            {
                let mut d = dispatcher.lock().expect("dispatcher mutex poisoned");
                d.register_client(client_ior.clone(), tx);
            }
            registered_client = Some(client_ior.clone());
            let event_writer = Arc::clone(&writer);
            std::thread::spawn(move || {
                for event in rx {
                    let mut w = event_writer.lock().expect("event writer mutex poisoned");
                    if write_frame(&mut *w, &Frame::Event(event)).is_err() {
                        break;
                    }
                }
            });
        }

        let result = dispatcher.lock().expect("dispatcher mutex poisoned").dispatch(request);
        let mut w = writer.lock().expect("event writer mutex poisoned");
        if write_frame(&mut *w, &Frame::Reply(result)).is_err() {
            break;
        }
    }

    if let Some(client_ior) = registered_client {
        let mut d = dispatcher.lock().expect("dispatcher mutex poisoned");
        d.unregister_client(&client_ior);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use value::Value;

    fn dispatcher(dir: &std::path::Path) -> Arc<Mutex<Dispatcher>> {
        let root = dir.join("root");
        std::fs::create_dir_all(&root).unwrap();
        let config = daemon::DaemonConfig::new(vec![format!("file:readwrite:{}", root.display())], dir.join("state"));
        Arc::new(Mutex::new(Dispatcher::new(daemon::Daemon::new(config).unwrap())))
    }

    #[test]
    fn call_and_listener_notify_round_trip_over_the_socket() {
        let dir = tempfile::tempdir().unwrap();
        let socket_path = dir.path().join("nconfd.sock");
        let server = LineServer::bind(&socket_path, dispatcher(dir.path())).unwrap();
        std::thread::spawn(move || server.serve_forever());
        std::thread::sleep(std::time::Duration::from_millis(50));

        let mut client = LineClient::connect(&socket_path).unwrap();
        client
            .call(Request::AddClient {
                client_ior: "ior://line-client".into(),
            })
            .unwrap();
        client
            .call(Request::AddListener {
                db: "def".into(),
                prefix: "/".into(),
                client_ior: "ior://line-client".into(),
            })
            .unwrap();
        client
            .call(Request::Set {
                db: "def".into(),
                key: "/y".into(),
                value: Value::Int(5),
            })
            .unwrap();

        let deadline = std::time::Instant::now() + std::time::Duration::from_secs(2);
        let mut event = None;
        while event.is_none() && std::time::Instant::now() < deadline {
            event = client.poll_event();
            if event.is_none() {
                std::thread::sleep(std::time::Duration::from_millis(10));
            }
        }
        assert!(matches!(event, Some(Event::Notify { key, .. }) if key == "/y"));
    }
}
