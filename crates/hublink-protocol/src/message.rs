//! Hub protocol messages, already decoded from the wire.

use serde::{Deserialize, Serialize};

use crate::InvocationId;

/// Dynamic argument/result representation.
pub use serde_json::Value;

/// Client-to-server messages.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum OutboundMessage {
    /// Invoke a hub method.
    ///
    /// `non_blocking` marks fire-and-forget calls: the receiver must not send
    /// a completion for them, and the sender registers no waiter.
    Invocation {
        invocation_id: InvocationId,
        target: String,
        arguments: Vec<Value>,
        non_blocking: bool,
    },
    /// Invoke a hub method that streams items before completing.
    StreamInvocation {
        invocation_id: InvocationId,
        target: String,
        arguments: Vec<Value>,
    },
    /// Advisory notice that the client stopped waiting on an invocation.
    ///
    /// The server may still deliver a late completion; receivers drop it as
    /// unknown.
    CancelInvocation { invocation_id: InvocationId },
}

/// Server-to-client messages.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum InboundMessage {
    /// The server invokes a method on the client side.
    Invocation {
        invocation_id: Option<InvocationId>,
        target: String,
        arguments: Vec<Value>,
    },
    /// Terminal result (or server-reported failure) for a pending invocation.
    /// `result` and `error` are mutually exclusive.
    Completion {
        invocation_id: InvocationId,
        result: Option<Value>,
        error: Option<String>,
    },
    /// One intermediate item of a streaming invocation.
    StreamItem {
        invocation_id: InvocationId,
        item: Value,
    },
    /// Acknowledgment of a `CancelInvocation` notice.
    CancelAck { invocation_id: InvocationId },
    /// The server is closing the connection.
    Close { error: Option<String> },
}
