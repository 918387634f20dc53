//! An in-process transport: calls go straight into a shared
//! [`Dispatcher`] behind a mutex, and events arrive on an `mpsc`
//! channel registered at connect time. This is what the client
//! engine's "Remote" mode uses in tests and for a same-process daemon
//! embed, without a socket in the loop.

use std::sync::mpsc::Receiver;
use std::sync::{Arc, Mutex};

use crate::{Dispatcher, Event, Reply, Request, RpcResult, Transport};

pub struct LocalTransport {
    dispatcher: Arc<Mutex<Dispatcher>>,
    client_ior: String,
    events: Receiver<Event>,
}

impl LocalTransport {
    /// Registers `client_ior` with `dispatcher` and sends the
    /// `AddClient` call that spec.md §4.9 requires before any
    /// listener can be installed on its behalf.
    pub fn connect(dispatcher: Arc<Mutex<Dispatcher>>, client_ior: impl Into<String>) -> RpcResult<Self> {
        let client_ior = client_ior.into();
        let (tx, rx) = std::sync::mpsc::channel();
        {
            let mut d = dispatcher.lock().expect("dispatcher mutex poisoned");
            d.register_client(client_ior.clone(), tx);
            d.dispatch(Request::AddClient {
                client_ior: client_ior.clone(),
            })?;
        }
        Ok(LocalTransport {
            dispatcher,
            client_ior,
            events: rx,
        })
    }
}

impl Transport for LocalTransport {
    fn call(&mut self, request: Request) -> RpcResult<Reply> {
        self.dispatcher.lock().expect("dispatcher mutex poisoned").dispatch(request)
    }

    fn poll_event(&mut self) -> Option<Event> {
        self.events.try_recv().ok()
    }
}

impl Drop for LocalTransport {
    fn drop(&mut self) {
        if let Ok(mut d) = self.dispatcher.lock() {
            d.unregister_client(&self.client_ior);
            let _ = d.dispatch(Request::RemoveClient {
                client_ior: self.client_ior.clone(),
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};
    use value::Value;

    fn dispatcher(dir: &std::path::Path) -> Arc<Mutex<Dispatcher>> {
        let root = dir.join("root");
        std::fs::create_dir_all(&root).unwrap();
        let config = daemon::DaemonConfig::new(vec![format!("file:readwrite:{}", root.display())], dir.join("state"));
        Arc::new(Mutex::new(Dispatcher::new(daemon::Daemon::new(config).unwrap())))
    }

    #[test]
    fn listener_delivers_event_through_local_transport() {
        let dir = tempfile::tempdir().unwrap();
        let d = dispatcher(dir.path());
        let mut client = LocalTransport::connect(Arc::clone(&d), "ior://local-client").unwrap();

        client
            .call(Request::AddListener {
                db: "def".into(),
                prefix: "/".into(),
                client_ior: "ior://local-client".into(),
            })
            .unwrap();

        client
            .call(Request::Set {
                db: "def".into(),
                key: "/x".into(),
                value: Value::Int(1),
            })
            .unwrap();

        let event = client.poll_event().expect("expected queued notify event");
        assert!(matches!(event, Event::Notify { key, .. } if key == "/x"));
    }
}
