//! Invocation lifecycle events.
//!
//! The connection reports a fixed set of structured events through
//! [`ClientEvents`]. The default sink forwards them to `tracing`; hosts that
//! aggregate diagnostics differently inject their own implementation. The
//! connection holds an `Arc<dyn ClientEvents>` — never a global.

use hublink_protocol::{InvocationId, Value};

use crate::TransportError;

/// Sink for invocation lifecycle events.
///
/// Implementations own severity filtering; in particular, any per-argument
/// formatting (see [`issue_invocation`](Self::issue_invocation)) should be
/// gated on the sink's own filter so disabled sinks cost nothing.
pub trait ClientEvents: Send + Sync {
    /// A fire-and-forget invocation is about to be sent.
    fn preparing_non_blocking_invocation(&self, target: &str, argument_count: usize);

    /// A blocking invocation is about to be issued.
    fn preparing_blocking_invocation(&self, target: &str, return_type: &str, argument_count: usize);

    /// A streaming invocation is about to be issued.
    fn preparing_streaming_invocation(&self, target: &str, item_type: &str, argument_count: usize);

    /// An invocation id was registered for completion tracking.
    fn register_invocation(&self, invocation_id: &InvocationId);

    /// Full signature of an invocation being issued.
    fn issue_invocation(
        &self,
        invocation_id: &InvocationId,
        return_type: &str,
        target: &str,
        arguments: &[Value],
    );

    /// The invocation message is being handed to the transport.
    fn send_invocation(&self, invocation_id: &InvocationId);

    /// The transport accepted the invocation message.
    fn send_invocation_completed(&self, invocation_id: &InvocationId);

    /// The transport rejected the invocation message.
    fn send_invocation_failed(&self, invocation_id: &InvocationId, error: &TransportError);

    /// An inbound invocation targeting the local side was received.
    fn received_invocation(
        &self,
        invocation_id: Option<&InvocationId>,
        target: &str,
        arguments: &[Value],
    );
}

/// Default sink: structured `tracing` events.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingEvents;

impl ClientEvents for TracingEvents {
    fn preparing_non_blocking_invocation(&self, target: &str, argument_count: usize) {
        tracing::trace!(
            method_name = target,
            argument_count,
            "preparing non-blocking invocation"
        );
    }

    fn preparing_blocking_invocation(
        &self,
        target: &str,
        return_type: &str,
        argument_count: usize,
    ) {
        tracing::trace!(
            method_name = target,
            return_type,
            argument_count,
            "preparing blocking invocation"
        );
    }

    fn preparing_streaming_invocation(&self, target: &str, item_type: &str, argument_count: usize) {
        tracing::trace!(
            method_name = target,
            item_type,
            argument_count,
            "preparing streaming invocation"
        );
    }

    fn register_invocation(&self, invocation_id: &InvocationId) {
        tracing::debug!(invocation_id = %invocation_id, "registering invocation for tracking");
    }

    fn issue_invocation(
        &self,
        invocation_id: &InvocationId,
        return_type: &str,
        target: &str,
        arguments: &[Value],
    ) {
        // The argument-type list is only worth computing when someone will
        // see it.
        if tracing::enabled!(tracing::Level::TRACE) {
            let args = argument_type_names(arguments);
            tracing::trace!(
                invocation_id = %invocation_id,
                return_type,
                method_name = target,
                args = args.as_str(),
                "issuing invocation"
            );
        }
    }

    fn send_invocation(&self, invocation_id: &InvocationId) {
        tracing::info!(invocation_id = %invocation_id, "sending invocation");
    }

    fn send_invocation_completed(&self, invocation_id: &InvocationId) {
        tracing::info!(invocation_id = %invocation_id, "sending invocation completed");
    }

    fn send_invocation_failed(&self, invocation_id: &InvocationId, error: &TransportError) {
        tracing::error!(invocation_id = %invocation_id, error = %error, "sending invocation failed");
    }

    fn received_invocation(
        &self,
        invocation_id: Option<&InvocationId>,
        target: &str,
        arguments: &[Value],
    ) {
        if tracing::enabled!(tracing::Level::TRACE) {
            let args = argument_type_names(arguments);
            match invocation_id {
                Some(id) => tracing::trace!(
                    invocation_id = %id,
                    method_name = target,
                    args = args.as_str(),
                    "received invocation"
                ),
                None => {
                    tracing::trace!(method_name = target, args = args.as_str(), "received invocation")
                }
            }
        }
    }
}

/// Comma-separated value-kind names for an argument list.
fn argument_type_names(arguments: &[Value]) -> String {
    let mut out = String::new();
    for (i, value) in arguments.iter().enumerate() {
        if i > 0 {
            out.push_str(", ");
        }
        out.push_str(value_type_name(value));
    }
    out
}

fn value_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
