//! Error types for the invocation core.

use core::fmt;

/// Transport-level errors surfaced through the [`Transport`](crate::Transport)
/// seam.
#[derive(Debug)]
pub enum TransportError {
    /// The transport is closed; no further messages can be exchanged.
    Closed,
    Io(std::io::Error),
}

impl fmt::Display for TransportError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Closed => write!(f, "transport closed"),
            Self::Io(e) => write!(f, "I/O error: {e}"),
        }
    }
}

impl std::error::Error for TransportError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl From<std::io::Error> for TransportError {
    fn from(e: std::io::Error) -> Self {
        Self::Io(e)
    }
}

/// Caller-facing invocation failures.
#[derive(Debug)]
pub enum InvocationError {
    /// The transport rejected the outbound message. Returned synchronously;
    /// no registration is left behind.
    SendFailed(TransportError),
    /// The connection dropped while the invocation was pending.
    ConnectionLost,
    /// The invocation was cancelled locally (caller- or timeout-initiated).
    Cancelled,
    /// The server reported a failure for this invocation.
    Remote(String),
    /// The in-flight cap was reached; the call was refused before send.
    TooManyInFlight,
    /// The invocation target name was empty.
    InvalidTarget,
}

impl fmt::Display for InvocationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::SendFailed(e) => write!(f, "sending invocation failed: {e}"),
            Self::ConnectionLost => write!(f, "connection lost while invocation was pending"),
            Self::Cancelled => write!(f, "invocation cancelled"),
            Self::Remote(message) => write!(f, "server returned error: {message}"),
            Self::TooManyInFlight => write!(f, "too many in-flight invocations"),
            Self::InvalidTarget => write!(f, "invocation target must not be empty"),
        }
    }
}

impl std::error::Error for InvocationError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::SendFailed(e) => Some(e),
            _ => None,
        }
    }
}

/// Failures registering a pending invocation.
///
/// `DuplicateId` is a consistency violation: the id generator never reuses
/// ids, so the tracker treats it as a fatal assertion rather than a
/// caller-facing error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegisterError {
    DuplicateId,
    /// The registry was drained by a disconnect.
    Closed,
    /// The in-flight cap was reached.
    AtCapacity,
}

impl fmt::Display for RegisterError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::DuplicateId => write!(f, "invocation id already registered"),
            Self::Closed => write!(f, "registry closed by disconnect"),
            Self::AtCapacity => write!(f, "registry at capacity"),
        }
    }
}

impl std::error::Error for RegisterError {}
