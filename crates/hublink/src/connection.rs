//! Connection: the call-issuing surface and the inbound dispatch loop.
//!
//! A `Connection` owns the transport and multiplexes invocations over it. The
//! key insight is that only `Connection::run()` calls `transport.recv()` —
//! all inbound routing happens through the registry.
//!
//! # Architecture
//!
//! ```text
//!                  ┌──────────────────────────────────┐
//!                  │            Connection            │
//!                  ├──────────────────────────────────┤
//!                  │  transport: T                    │
//!                  │  registry: id → PendingInvocation│
//!                  │  handlers: target → callback     │
//!                  │  events: Arc<dyn ClientEvents>   │
//!                  └───────────────┬──────────────────┘
//!                                  │
//!                            dispatch loop
//!                                  │
//!        ┌─────────────────────────┼─────────────────────────┐
//!        │                         │                         │
//!  Completion(id)            StreamItem(id)          Invocation(target)
//!        │                         │                         │
//!  ┌─────▼──────┐         ┌────────▼────────┐      ┌─────────▼─────────┐
//!  │ take entry,│         │ deliver to the  │      │ call the local    │
//!  │ resolve it │         │ stream sink     │      │ handler, if any   │
//!  └────────────┘         └─────────────────┘      └───────────────────┘
//! ```
//!
//! Registration always happens *before* the invocation message is sent, so a
//! reply racing the send confirmation still finds its waiter. Completions and
//! stream items for a given id reach the caller in transport order; the
//! dispatch loop never suspends on a consumer (oneshot and unbounded sends
//! are non-blocking), so one slow stream cannot stall unrelated calls.

use std::collections::HashMap;
use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::task::{Context, Poll, ready};
use std::time::Duration;

use hublink_protocol::{InboundMessage, InvocationId, OutboundMessage, Value};
use parking_lot::Mutex;
use tokio::sync::{mpsc, oneshot};

use crate::events::{ClientEvents, TracingEvents};
use crate::registry::{InvocationRegistry, PendingInvocation};
use crate::{InvocationError, RegisterError, Transport, TransportError};

const DEFAULT_CALL_TIMEOUT_MS: u64 = 30_000;

fn default_call_timeout() -> Duration {
    let ms = std::env::var("HUBLINK_CALL_TIMEOUT_MS")
        .ok()
        .and_then(|v| v.parse::<u64>().ok())
        .filter(|v| *v > 0)
        .unwrap_or(DEFAULT_CALL_TIMEOUT_MS);
    Duration::from_millis(ms)
}

type InvocationHandler = Arc<dyn Fn(&[Value]) + Send + Sync>;

/// A hub connection: issues invocations and routes their completions.
///
/// Share it as `Arc<Connection<T>>`; callers invoke concurrently while one
/// spawned [`run`](Self::run) task feeds the dispatch loop.
pub struct Connection<T: Transport> {
    transport: T,
    registry: InvocationRegistry,
    handlers: Mutex<HashMap<String, InvocationHandler>>,
    events: Arc<dyn ClientEvents>,
    next_invocation_id: AtomicU64,
    call_timeout: Option<Duration>,
}

impl<T: Transport> Connection<T> {
    /// Create a connection reporting lifecycle events through `tracing`.
    pub fn new(transport: T) -> Self {
        Self::with_events(transport, Arc::new(TracingEvents))
    }

    /// Create a connection with an injected event sink.
    pub fn with_events(transport: T, events: Arc<dyn ClientEvents>) -> Self {
        Self {
            transport,
            registry: InvocationRegistry::new(),
            handlers: Mutex::new(HashMap::new()),
            events,
            next_invocation_id: AtomicU64::new(1),
            call_timeout: Some(default_call_timeout()),
        }
    }

    /// Override the blocking-call timeout. `None` disables the timer.
    pub fn with_call_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.call_timeout = timeout;
        self
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn is_connected(&self) -> bool {
        !self.transport.is_closed()
    }

    /// Signal the transport to shut down. The dispatch loop drains every
    /// pending invocation with `ConnectionLost` once the transport reports
    /// closure.
    pub fn close(&self) {
        self.transport.close();
    }

    fn next_invocation_id(&self) -> InvocationId {
        InvocationId::from(self.next_invocation_id.fetch_add(1, Ordering::Relaxed))
    }

    /// Ids of calls currently awaiting completion (for diagnostics).
    pub fn pending_invocations(&self) -> Vec<InvocationId> {
        self.registry.pending_ids()
    }

    /// Register a handler for server-to-client invocations of `target`.
    /// Handlers run on the dispatch loop and should return quickly.
    pub fn on(&self, target: impl Into<String>, handler: impl Fn(&[Value]) + Send + Sync + 'static) {
        self.handlers.lock().insert(target.into(), Arc::new(handler));
    }

    // ========================================================================
    // Call surface
    // ========================================================================

    /// Fire-and-forget invocation: no completion is awaited and no registry
    /// entry is created. Send failures surface synchronously; there is no
    /// later result to deliver.
    pub async fn invoke(&self, target: &str, arguments: Vec<Value>) -> Result<(), InvocationError> {
        if target.is_empty() {
            return Err(InvocationError::InvalidTarget);
        }
        self.events
            .preparing_non_blocking_invocation(target, arguments.len());

        let id = self.next_invocation_id();
        let message = OutboundMessage::Invocation {
            invocation_id: id.clone(),
            target: target.to_owned(),
            arguments,
            non_blocking: true,
        };
        self.send_invocation_message(&id, message).await
    }

    /// Invoke `target` and suspend until the server delivers a completion.
    ///
    /// `result_type` is the semantic descriptor of the expected result; it
    /// flows into the lifecycle events.
    pub async fn invoke_blocking(
        &self,
        target: &str,
        arguments: Vec<Value>,
        result_type: &str,
    ) -> Result<Value, InvocationError> {
        struct PendingGuard<'a> {
            registry: &'a InvocationRegistry,
            id: InvocationId,
            active: bool,
        }

        impl PendingGuard<'_> {
            fn disarm(&mut self) {
                self.active = false;
            }
        }

        impl Drop for PendingGuard<'_> {
            fn drop(&mut self) {
                if !self.active {
                    return;
                }
                if self.registry.remove(&self.id).is_some() {
                    tracing::debug!(
                        invocation_id = %self.id,
                        "call dropped: removed pending invocation"
                    );
                }
            }
        }

        if target.is_empty() {
            return Err(InvocationError::InvalidTarget);
        }
        self.events
            .preparing_blocking_invocation(target, result_type, arguments.len());

        let id = self.next_invocation_id();
        let (tx, mut rx) = oneshot::channel();
        self.register(PendingInvocation::call(id.clone(), result_type, tx))?;
        self.events.register_invocation(&id);
        self.events
            .issue_invocation(&id, result_type, target, &arguments);

        let mut guard = PendingGuard {
            registry: &self.registry,
            id: id.clone(),
            active: true,
        };

        let message = OutboundMessage::Invocation {
            invocation_id: id.clone(),
            target: target.to_owned(),
            arguments,
            non_blocking: false,
        };
        if let Err(e) = self.send_invocation_message(&id, message).await {
            guard.disarm();
            if self.registry.remove(&id).is_some() {
                return Err(e);
            }
            // A completion won the race against the failing send; prefer it.
            return match rx.try_recv() {
                Ok(outcome) => outcome,
                Err(_) => Err(e),
            };
        }

        let received = match self.call_timeout {
            Some(timeout) => match tokio::time::timeout(timeout, &mut rx).await {
                Ok(received) => received,
                Err(_elapsed) => {
                    guard.disarm();
                    tracing::warn!(
                        invocation_id = %id,
                        timeout_ms = timeout.as_millis() as u64,
                        "invocation timed out waiting for completion"
                    );
                    self.cancel_pending(&id).await;
                    return Err(InvocationError::Cancelled);
                }
            },
            None => (&mut rx).await,
        };
        guard.disarm();

        match received {
            Ok(outcome) => outcome,
            // The slot only drops unresolved if the registry was torn down.
            Err(_) => Err(InvocationError::ConnectionLost),
        }
    }

    /// Start a streaming invocation. Items arrive on the returned
    /// [`StreamingCall`] in transport order until the server completes or
    /// fails the stream. Not restartable.
    pub async fn invoke_streaming(
        self: &Arc<Self>,
        target: &str,
        arguments: Vec<Value>,
        item_type: &str,
    ) -> Result<StreamingCall<T>, InvocationError> {
        if target.is_empty() {
            return Err(InvocationError::InvalidTarget);
        }
        self.events
            .preparing_streaming_invocation(target, item_type, arguments.len());

        let id = self.next_invocation_id();
        let (tx, rx) = mpsc::unbounded_channel();
        self.register(PendingInvocation::stream(id.clone(), item_type, tx))?;
        self.events.register_invocation(&id);
        self.events
            .issue_invocation(&id, item_type, target, &arguments);

        let message = OutboundMessage::StreamInvocation {
            invocation_id: id.clone(),
            target: target.to_owned(),
            arguments,
        };
        if let Err(e) = self.send_invocation_message(&id, message).await {
            self.registry.remove(&id);
            return Err(e);
        }

        Ok(StreamingCall {
            connection: self.clone(),
            id,
            rx,
            finished: false,
        })
    }

    fn register(&self, pending: PendingInvocation) -> Result<(), InvocationError> {
        let id = pending.id.clone();
        match self.registry.register(pending) {
            Ok(()) => Ok(()),
            // The generator never reuses ids; a collision means the
            // registry's consistency is gone.
            Err(RegisterError::DuplicateId) => {
                panic!("invocation id {id} already registered")
            }
            Err(RegisterError::Closed) => Err(InvocationError::ConnectionLost),
            Err(RegisterError::AtCapacity) => Err(InvocationError::TooManyInFlight),
        }
    }

    /// Send with the Send* lifecycle events around the transport call.
    async fn send_invocation_message(
        &self,
        id: &InvocationId,
        message: OutboundMessage,
    ) -> Result<(), InvocationError> {
        self.events.send_invocation(id);
        match self.transport.send(message).await {
            Ok(()) => {
                self.events.send_invocation_completed(id);
                Ok(())
            }
            Err(e) => {
                self.events.send_invocation_failed(id, &e);
                Err(InvocationError::SendFailed(e))
            }
        }
    }

    /// Local-first cancellation: drop the registration, then send the
    /// advisory notice. The server may still deliver a late completion,
    /// which the dispatch loop discards as unknown.
    async fn cancel_pending(&self, id: &InvocationId) {
        if self.registry.remove(id).is_some() {
            let notice = OutboundMessage::CancelInvocation {
                invocation_id: id.clone(),
            };
            if let Err(e) = self.transport.send(notice).await {
                tracing::debug!(
                    invocation_id = %id,
                    error = %e,
                    "failed to send cancellation notice"
                );
            }
        }
    }

    // ========================================================================
    // Dispatch loop
    // ========================================================================

    /// Run the inbound dispatch loop.
    ///
    /// This is the single reader: no other code touches `transport.recv()`.
    /// Runs until the server sends `Close` or the transport closes or fails;
    /// on exit every still-pending invocation is resolved with
    /// `ConnectionLost` so no caller is left suspended.
    pub async fn run(self: Arc<Self>) -> Result<(), TransportError> {
        tracing::debug!("connection: starting inbound dispatch loop");
        let result = loop {
            let message = match self.transport.recv().await {
                Ok(message) => message,
                Err(TransportError::Closed) => {
                    tracing::debug!("connection: transport closed");
                    break Ok(());
                }
                Err(e) => {
                    tracing::error!(error = %e, "connection: transport error");
                    break Err(e);
                }
            };

            match message {
                InboundMessage::Completion {
                    invocation_id,
                    result,
                    error,
                } => self.handle_completion(invocation_id, result, error),
                InboundMessage::StreamItem {
                    invocation_id,
                    item,
                } => self.handle_stream_item(invocation_id, item).await,
                InboundMessage::Invocation {
                    invocation_id,
                    target,
                    arguments,
                } => self.handle_invocation(invocation_id, target, arguments),
                InboundMessage::CancelAck { invocation_id } => {
                    tracing::trace!(invocation_id = %invocation_id, "cancellation acknowledged");
                }
                InboundMessage::Close { error } => {
                    match &error {
                        Some(err) => tracing::warn!(error = %err, "server closed the connection"),
                        None => tracing::debug!("server closed the connection"),
                    }
                    break Ok(());
                }
            }
        };

        self.drain_pending();
        result
    }

    /// Resolve everything still in flight with `ConnectionLost`. One pass
    /// empties the registry and closes it; calls registered during the drain
    /// are refused rather than left suspended.
    fn drain_pending(&self) {
        let drained = self.registry.drain_all();
        if !drained.is_empty() {
            tracing::debug!(
                count = drained.len(),
                "resolving pending invocations after disconnect"
            );
        }
        for pending in drained {
            pending.resolve(Err(InvocationError::ConnectionLost));
        }
    }

    fn handle_completion(&self, id: InvocationId, result: Option<Value>, error: Option<String>) {
        match self.registry.remove(&id) {
            Some(pending) => {
                tracing::debug!(
                    invocation_id = %id,
                    result_type = pending.result_type.as_str(),
                    failed = error.is_some(),
                    "delivering completion to waiter"
                );
                let outcome = match error {
                    Some(message) => Err(InvocationError::Remote(message)),
                    None => Ok(result.unwrap_or(Value::Null)),
                };
                pending.resolve(outcome);
            }
            None => {
                // Benign race: the caller timed out or cancelled before the
                // server answered.
                tracing::debug!(
                    invocation_id = %id,
                    "dropping completion for unknown invocation"
                );
            }
        }
    }

    async fn handle_stream_item(&self, id: InvocationId, item: Value) {
        let Some(sink) = self.registry.stream_sink(&id) else {
            tracing::debug!(
                invocation_id = %id,
                "dropping stream item for unknown invocation"
            );
            return;
        };
        if sink.send(Ok(item)).is_err() {
            // Consumer dropped the stream without cancelling; stop tracking
            // the invocation and let the server know.
            tracing::debug!(invocation_id = %id, "stream consumer gone, cancelling invocation");
            self.cancel_pending(&id).await;
        }
    }

    fn handle_invocation(&self, id: Option<InvocationId>, target: String, arguments: Vec<Value>) {
        self.events
            .received_invocation(id.as_ref(), &target, &arguments);
        let handler = self.handlers.lock().get(&target).cloned();
        match handler {
            Some(handler) => handler(&arguments),
            None => tracing::warn!(
                method_name = %target,
                "no handler registered for inbound invocation; dropping"
            ),
        }
    }
}

/// Handle to a streaming invocation.
///
/// Yields items in the order the transport delivered them. The sequence ends
/// after the server's final completion (an error completion is yielded as a
/// final `Err` item) or after [`cancel`](Self::cancel).
pub struct StreamingCall<T: Transport> {
    connection: Arc<Connection<T>>,
    id: InvocationId,
    rx: mpsc::UnboundedReceiver<Result<Value, InvocationError>>,
    finished: bool,
}

impl<T: Transport> StreamingCall<T> {
    pub fn id(&self) -> &InvocationId {
        &self.id
    }

    /// Next item, or `None` once the stream has ended.
    pub async fn next_item(&mut self) -> Option<Result<Value, InvocationError>> {
        if self.finished {
            return None;
        }
        let item = self.rx.recv().await;
        match &item {
            Some(Err(_)) | None => self.finished = true,
            Some(Ok(_)) => {}
        }
        item
    }

    /// Stop consuming: remove the local registration and send a best-effort
    /// cancellation notice. The local sequence ends immediately; late items
    /// and the eventual completion are discarded as unknown and do not revive
    /// the invocation.
    pub async fn cancel(&mut self) {
        if self.finished {
            return;
        }
        self.finished = true;
        self.rx.close();
        self.connection.cancel_pending(&self.id).await;
    }
}

impl<T: Transport> tokio_stream::Stream for StreamingCall<T> {
    type Item = Result<Value, InvocationError>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        if self.finished {
            return Poll::Ready(None);
        }
        let item = ready!(self.rx.poll_recv(cx));
        if matches!(item, Some(Err(_)) | None) {
            self.finished = true;
        }
        Poll::Ready(item)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::MemTransport;

    #[tokio::test]
    async fn dropped_call_removes_its_registration() {
        let (transport, mut peer) = MemTransport::pair();
        let connection = Arc::new(Connection::new(transport).with_call_timeout(None));

        let call = tokio::spawn({
            let connection = connection.clone();
            async move {
                connection
                    .invoke_blocking("Echo", vec![Value::from("hi")], "string")
                    .await
            }
        });

        // Once the invocation reaches the peer, the waiter is registered.
        let message = peer.next_outbound().await.expect("invocation message");
        assert!(matches!(message, OutboundMessage::Invocation { .. }));
        assert_eq!(connection.pending_invocations().len(), 1);

        call.abort();
        let joined = call.await;
        assert!(joined.is_err());
        assert!(connection.pending_invocations().is_empty());
    }

    #[tokio::test]
    async fn empty_target_is_rejected_before_send() {
        let (transport, _peer) = MemTransport::pair();
        let connection = Arc::new(Connection::new(transport));

        let err = connection.invoke("", vec![]).await.unwrap_err();
        assert!(matches!(err, InvocationError::InvalidTarget));

        let err = connection.invoke_blocking("", vec![], "int").await.unwrap_err();
        assert!(matches!(err, InvocationError::InvalidTarget));

        let err = connection
            .invoke_streaming("", vec![], "int")
            .await
            .map(|_| ())
            .unwrap_err();
        assert!(matches!(err, InvocationError::InvalidTarget));

        assert!(connection.pending_invocations().is_empty());
    }
}
