//! Pending-invocation registry: the correlation table from invocation id to
//! in-flight call state.
//!
//! All mutation (register/remove/drain) is serialized under one lock.
//! `drain_all` closes the registry in the same critical section that empties
//! it, so no call registered after a drain begins can be left unresolved.

use std::collections::HashMap;
use std::collections::hash_map::Entry;

use hublink_protocol::{InvocationId, Value};
use parking_lot::Mutex;
use tokio::sync::{mpsc, oneshot};

use crate::{InvocationError, RegisterError};

const DEFAULT_MAX_PENDING: usize = 8192;

fn max_pending() -> usize {
    std::env::var("HUBLINK_MAX_PENDING")
        .ok()
        .and_then(|v| v.parse::<usize>().ok())
        .filter(|v| *v > 0)
        .unwrap_or(DEFAULT_MAX_PENDING)
}

/// Where a pending invocation's outcome is delivered.
#[derive(Debug)]
pub(crate) enum CompletionSlot {
    /// Blocking call. Resolution consumes the sender, so a slot can be
    /// resolved at most once.
    Call(oneshot::Sender<Result<Value, InvocationError>>),
    /// Streaming call. Items flow through the channel; dropping the sender
    /// ends the sequence.
    Stream(mpsc::UnboundedSender<Result<Value, InvocationError>>),
}

/// One in-flight call awaiting its completion.
#[derive(Debug)]
pub(crate) struct PendingInvocation {
    pub(crate) id: InvocationId,
    pub(crate) result_type: String,
    slot: CompletionSlot,
}

impl PendingInvocation {
    pub(crate) fn call(
        id: InvocationId,
        result_type: &str,
        tx: oneshot::Sender<Result<Value, InvocationError>>,
    ) -> Self {
        Self {
            id,
            result_type: result_type.to_owned(),
            slot: CompletionSlot::Call(tx),
        }
    }

    pub(crate) fn stream(
        id: InvocationId,
        item_type: &str,
        tx: mpsc::UnboundedSender<Result<Value, InvocationError>>,
    ) -> Self {
        Self {
            id,
            result_type: item_type.to_owned(),
            slot: CompletionSlot::Stream(tx),
        }
    }

    /// Deliver the terminal outcome. Streams receive errors as a final item;
    /// a successful stream completion just closes the channel.
    pub(crate) fn resolve(self, outcome: Result<Value, InvocationError>) {
        match self.slot {
            CompletionSlot::Call(tx) => {
                if tx.send(outcome).is_err() {
                    tracing::debug!(invocation_id = %self.id, "caller gone before resolution");
                }
            }
            CompletionSlot::Stream(tx) => {
                if let Err(e) = outcome {
                    let _ = tx.send(Err(e));
                }
            }
        }
    }
}

#[derive(Debug, Default)]
struct RegistryInner {
    pending: HashMap<InvocationId, PendingInvocation>,
    closed: bool,
}

/// Thread-safe correlation table for in-flight invocations.
#[derive(Debug, Default)]
pub(crate) struct InvocationRegistry {
    inner: Mutex<RegistryInner>,
}

impl InvocationRegistry {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn register(&self, pending: PendingInvocation) -> Result<(), RegisterError> {
        let mut inner = self.inner.lock();
        if inner.closed {
            return Err(RegisterError::Closed);
        }
        let max = max_pending();
        if inner.pending.len() >= max {
            tracing::warn!(
                pending = inner.pending.len(),
                max_pending = max,
                "too many in-flight invocations; refusing new call"
            );
            return Err(RegisterError::AtCapacity);
        }
        match inner.pending.entry(pending.id.clone()) {
            Entry::Occupied(_) => Err(RegisterError::DuplicateId),
            Entry::Vacant(slot) => {
                slot.insert(pending);
                Ok(())
            }
        }
    }

    /// Atomic take: after this, lookups for `id` find nothing.
    pub(crate) fn remove(&self, id: &InvocationId) -> Option<PendingInvocation> {
        self.inner.lock().pending.remove(id)
    }

    /// Clone out the stream sink for `id`, if the entry exists and is a
    /// streaming call. Non-mutating.
    pub(crate) fn stream_sink(
        &self,
        id: &InvocationId,
    ) -> Option<mpsc::UnboundedSender<Result<Value, InvocationError>>> {
        let inner = self.inner.lock();
        match &inner.pending.get(id)?.slot {
            CompletionSlot::Stream(tx) => Some(tx.clone()),
            CompletionSlot::Call(_) => None,
        }
    }

    /// Take every pending entry and close the registry in one critical
    /// section. Used on disconnect; registrations attempted afterwards are
    /// refused with [`RegisterError::Closed`].
    pub(crate) fn drain_all(&self) -> Vec<PendingInvocation> {
        let mut inner = self.inner.lock();
        inner.closed = true;
        inner.pending.drain().map(|(_, pending)| pending).collect()
    }

    /// Ids of calls currently awaiting completion (sorted, for diagnostics).
    pub(crate) fn pending_ids(&self) -> Vec<InvocationId> {
        let inner = self.inner.lock();
        let mut ids: Vec<InvocationId> = inner.pending.keys().cloned().collect();
        ids.sort_by_key(|id| id.as_str().parse::<u64>().ok());
        ids
    }
}
