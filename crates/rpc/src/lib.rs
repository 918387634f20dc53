//! The abstract request/reply call set between a client and the
//! daemon (spec.md §4.11), its serializable exception taxonomy, and
//! two concrete transports.
//!
//! # Design
//!
//! [`Request`]/[`Reply`]/[`Event`] are the wire vocabulary: every
//! client→daemon call in §4.11 is one `Request` variant with a
//! matching `Reply` variant, and the two daemon→client calls
//! (`notify`, `update_listener`) plus `ping` are `Event` variants.
//! [`Fault`] is `error::ErrorKind` plus a message, serializable so it
//! survives the wire the way `Value` and the listener-log records do.
//!
//! [`dispatch::Dispatcher`] is the only piece of code that actually
//! calls into a [`daemon::Daemon`]; both transports are thin framing
//! layers in front of it. [`local::LocalTransport`] dispatches
//! in-process (same semantics the client engine's "Remote" mode needs
//! for testing without a socket); [`line::LineTransport`] frames the
//! same messages as length-prefixed JSON over a Unix domain socket.

mod dispatch;
mod line;
mod local;

pub use dispatch::Dispatcher;
pub use line::{LineClient, LineServer};
pub use local::LocalTransport;

use error::{ConfError, ErrorKind};
use serde::{Deserialize, Serialize};
use value::Value;

/// A serializable projection of [`ConfError`], one-to-one with
/// spec.md §7's error kinds (spec.md §4.11 "Exception taxonomy maps
/// one-to-one with §7").
#[derive(Debug, Clone, Serialize, Deserialize, thiserror::Error)]
#[error("{kind}: {message}")]
pub struct Fault {
    pub kind: ErrorKind,
    pub message: String,
}

impl From<ConfError> for Fault {
    fn from(err: ConfError) -> Self {
        Fault {
            kind: err.kind,
            message: err.message,
        }
    }
}

impl From<Fault> for ConfError {
    fn from(fault: Fault) -> Self {
        ConfError::new(fault.kind, fault.message)
    }
}

/// A call-scoped result: the reply or a [`Fault`], both serializable.
pub type RpcResult<T> = Result<T, Fault>;

/// One client→daemon call (spec.md §4.11).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Request {
    GetDefaultDatabase,
    GetDatabase { address: String },
    AddClient { client_ior: String },
    RemoveClient { client_ior: String },
    Ping,
    Shutdown,
    LookupWithLocale { db: String, key: String, locale: Option<String>, use_default: bool },
    LookupDefaultValue { db: String, key: String, locale: Option<String> },
    Set { db: String, key: String, value: Value },
    Unset { db: String, key: String },
    RecursiveUnset { db: String, dir: String },
    AllEntries { db: String, dir: String, locale: Option<String> },
    AllDirs { db: String, dir: String },
    DirExists { db: String, dir: String },
    SetSchema { db: String, key: String, schema_key: String },
    Sync { db: String },
    AddListener { db: String, prefix: String, client_ior: String },
    RemoveListener { db: String, cnxn_id: u64 },
}

/// The reply matching a [`Request`] variant.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Reply {
    Database { address: String },
    Value { value: Option<Value>, is_default: bool },
    Entries { keys: Vec<String>, values: Vec<Option<Value>>, is_defaults: Vec<bool> },
    Dirs { keys: Vec<String> },
    Bool(bool),
    ConnectionId(u64),
    Unit,
}

/// One daemon→client call (spec.md §4.11).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Event {
    Notify {
        db: String,
        cnxn_id: u64,
        key: String,
        value: Option<Value>,
        is_default: bool,
    },
    UpdateListener {
        db: String,
        client_ior: String,
        old_cnxn_id: u64,
        prefix: String,
        new_cnxn_id: u64,
    },
    Ping,
}

/// A framed message on the wire: either the reply to an outstanding
/// call, or an unsolicited event. [`line::LineTransport`] needs this
/// discriminator since both travel the same socket; [`local::LocalTransport`]
/// keeps them on separate channels and doesn't need it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Frame {
    Reply(RpcResult<Reply>),
    Event(Event),
}

/// What a client implementation needs to drive one call/reply and
/// drain queued events. Both transports implement this.
pub trait Transport {
    fn call(&mut self, request: Request) -> RpcResult<Reply>;

    /// Non-blocking: returns the next queued event, if any.
    fn poll_event(&mut self) -> Option<Event>;
}
