//! Error taxonomy and result codes shared by every component.

use std::io;
use std::time::Duration;

use thiserror::Error;

use crate::rdma::cq::WcStatus;

/// Coarse result code of a fallible operation.
///
/// Every [`Error`] maps to exactly one code via [`Error::code`], so that
/// callers that only care about the outcome class need not match on the
/// full error type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub enum IoCode {
    /// The operation succeeded.
    Ok,

    /// The operation definitely failed.
    Err,

    /// A bounded wait expired before the awaited event.
    Timeout,

    /// The operation succeeded partially; the caller may need to retry the
    /// remainder.
    NearOk,

    /// A prerequisite state has not been reached yet.
    NotReady,
}

impl IoCode {
    /// Classify a result.
    #[inline]
    pub fn of<T>(res: &Result<T>) -> Self {
        match res {
            Ok(_) => IoCode::Ok,
            Err(e) => e.code(),
        }
    }
}

/// Error type of this crate.
#[derive(Debug, Error)]
pub enum Error {
    /// A device, port, registry entry, or channel does not exist.
    #[error("not found: {0}")]
    NotFound(String),

    /// Resource allocation was refused by the provider or by a sanity check.
    #[error("creation error: {0}")]
    CreationError(String),

    /// A queue pair state transition was refused, or remote attributes are bad.
    #[error("connect error: {0}")]
    ConnectError(String),

    /// `connect` was called on a queue pair that is already connected.
    #[error("queue pair is already connected")]
    AlreadyConnected,

    /// The port a NIC handle is bound to is not active.
    #[error("link down: {0}")]
    LinkDown(String),

    /// Work request submission was refused.
    #[error("post failed: {0}")]
    PostFailed(String),

    /// A work completion carried a non-success status.
    #[error("work completion error: {0}")]
    PollError(#[from] WcStatus),

    /// A bounded wait expired.
    #[error("timed out after {0:?}")]
    Timeout(Duration),

    /// The operation was attempted before its prerequisite state.
    #[error("not ready: {0}")]
    NotReady(String),

    /// A bump allocator cannot satisfy the request.
    #[error("out of memory: {requested} bytes requested, {remaining} bytes remaining")]
    OutOfMemory { requested: usize, remaining: usize },

    /// An access falls outside a memory region.
    #[error("out of bounds: [{offset}, {offset}+{len}) exceeds region of {size} bytes")]
    OutOfBounds {
        offset: usize,
        len: usize,
        size: usize,
    },

    /// A registry already holds an entry under this key.
    #[error("duplicate key: {0}")]
    Duplicate(String),

    /// Configuration cannot be loaded or is invalid.
    #[error("configuration error: {0}")]
    Config(String),

    /// The control-plane peer sent something unexpected.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// Control-plane I/O failed.
    #[error("I/O error")]
    Io(#[from] io::Error),
}

impl Error {
    /// Get the coarse result code of this error.
    pub fn code(&self) -> IoCode {
        match self {
            Error::Timeout(_) => IoCode::Timeout,
            Error::NotReady(_) => IoCode::NotReady,
            _ => IoCode::Err,
        }
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Protocol(e.to_string())
    }
}

/// Result type of this crate.
pub type Result<T, E = Error> = std::result::Result<T, E>;
