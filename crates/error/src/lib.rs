//! Shared error taxonomy.
//!
//! # Design
//!
//! Every crate above the key/value layer returns [`ConfError`] so that
//! a single taxonomy survives crate boundaries, the RPC wire (as
//! `rpc::Fault`, a serializable projection of [`ErrorKind`]), and the
//! CLI's exit-code mapping. This mirrors the teacher's practice of a
//! single shared error enum per subsystem boundary rather than each
//! crate inventing its own.
//!
//! # Errors
//!
//! [`ErrorKind`] enumerates the distinct, mappable kinds from the
//! error handling design; [`ConfError`] pairs a kind with a free-text
//! context message.

use std::fmt;
use std::io;

/// One of the distinct, cross-boundary-mappable error kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum ErrorKind {
    /// Unrecoverable, unclassified failure.
    Failed,
    /// Transport to the daemon is unreachable.
    NoServer,
    /// Operation denied by source policy.
    NoPermission,
    /// Address could not be resolved to a backend.
    BadAddress,
    /// Key violates the key grammar.
    BadKey,
    /// A value string or schema file was syntactically invalid.
    ParseError,
    /// Backend found on-disk state unreadable.
    Corrupt,
    /// Value type does not match the requested or declared type.
    TypeMismatch,
    /// Operation applied to a directory where a key was expected.
    IsDir,
    /// Operation applied to a key where a directory was expected.
    IsKey,
    /// Write would be shadowed by a read-only layer above it.
    Overridden,
    /// No source in the stack accepted the write.
    NoWritableDatabase,
    /// Operation requires a daemon but the engine is local.
    LocalEngine,
    /// Lock directory is held by a live peer, or is unwritable.
    LockFailed,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Failed => "failed",
            Self::NoServer => "no_server",
            Self::NoPermission => "no_permission",
            Self::BadAddress => "bad_address",
            Self::BadKey => "bad_key",
            Self::ParseError => "parse_error",
            Self::Corrupt => "corrupt",
            Self::TypeMismatch => "type_mismatch",
            Self::IsDir => "is_dir",
            Self::IsKey => "is_key",
            Self::Overridden => "overridden",
            Self::NoWritableDatabase => "no_writable_database",
            Self::LocalEngine => "local_engine",
            Self::LockFailed => "lock_failed",
        };
        f.write_str(s)
    }
}

/// A [`ErrorKind`] paired with a human-readable context message.
#[derive(Debug, Clone, thiserror::Error)]
#[error("{kind}: {message}")]
pub struct ConfError {
    pub kind: ErrorKind,
    pub message: String,
}

impl ConfError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn failed(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Failed, message)
    }

    pub fn bad_key(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::BadKey, message)
    }

    pub fn overridden(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Overridden, message)
    }

    /// Composes zero or more errors encountered while calling an
    /// operation across several sources (e.g. `sync_all`) into a
    /// single error whose message concatenates every failure.
    ///
    /// Returns `None` if `errors` is empty (i.e. everything
    /// succeeded). The composed kind is the first error's kind.
    pub fn compose(errors: impl IntoIterator<Item = ConfError>) -> Option<ConfError> {
        let mut iter = errors.into_iter();
        let first = iter.next()?;
        let mut kind = first.kind;
        let mut message = first.message;
        for next in iter {
            if message.is_empty() {
                kind = next.kind;
            }
            message.push_str("; ");
            message.push_str(&next.message);
        }
        Some(ConfError { kind, message })
    }
}

impl From<io::Error> for ConfError {
    fn from(err: io::Error) -> Self {
        let kind = match err.kind() {
            io::ErrorKind::PermissionDenied => ErrorKind::NoPermission,
            io::ErrorKind::NotFound => ErrorKind::Corrupt,
            _ => ErrorKind::Failed,
        };
        ConfError::new(kind, err.to_string())
    }
}

/// The `Result` alias used throughout the configuration database crates.
pub type ConfResult<T> = Result<T, ConfError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_matches_kind_names() {
        assert_eq!(ErrorKind::Overridden.to_string(), "overridden");
        assert_eq!(ErrorKind::NoWritableDatabase.to_string(), "no_writable_database");
    }

    #[test]
    fn compose_of_empty_is_none() {
        assert!(ConfError::compose(std::iter::empty()).is_none());
    }

    #[test]
    fn compose_concatenates_messages() {
        let a = ConfError::new(ErrorKind::Failed, "first");
        let b = ConfError::new(ErrorKind::Corrupt, "second");
        let composed = ConfError::compose([a, b]).unwrap();
        assert_eq!(composed.kind, ErrorKind::Failed);
        assert_eq!(composed.message, "first; second");
    }

    #[test]
    fn io_not_found_maps_to_corrupt() {
        let io_err = io::Error::new(io::ErrorKind::NotFound, "missing");
        let err: ConfError = io_err.into();
        assert_eq!(err.kind, ErrorKind::Corrupt);
    }
}
