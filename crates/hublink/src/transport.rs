//! Transport seam and the in-process test transport.

use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use hublink_protocol::{InboundMessage, OutboundMessage};
use tokio::sync::{Notify, mpsc};

use crate::TransportError;

/// Duplex message transport the connection drives.
///
/// Implementations own framing and serialization; the connection only
/// exchanges decoded messages. `recv` is called from exactly one task (the
/// connection's dispatch loop).
pub trait Transport: Send + Sync + 'static {
    fn send(
        &self,
        message: OutboundMessage,
    ) -> impl Future<Output = Result<(), TransportError>> + Send;

    fn recv(&self) -> impl Future<Output = Result<InboundMessage, TransportError>> + Send;

    /// Signal shutdown. A pending or subsequent `recv` resolves to
    /// [`TransportError::Closed`].
    fn close(&self);

    fn is_closed(&self) -> bool;
}

const CHANNEL_CAPACITY: usize = 64;

/// In-process transport backed by bounded channels.
///
/// The far end is a [`MemPeer`] that tests drive as the "server".
#[derive(Clone, Debug)]
pub struct MemTransport {
    inner: Arc<MemInner>,
}

#[derive(Debug)]
struct MemInner {
    tx: mpsc::Sender<OutboundMessage>,
    rx: tokio::sync::Mutex<mpsc::Receiver<InboundMessage>>,
    closed: AtomicBool,
    close_notify: Notify,
}

impl MemTransport {
    pub fn pair() -> (Self, MemPeer) {
        let (out_tx, out_rx) = mpsc::channel(CHANNEL_CAPACITY);
        let (in_tx, in_rx) = mpsc::channel(CHANNEL_CAPACITY);

        let transport = Self {
            inner: Arc::new(MemInner {
                tx: out_tx,
                rx: tokio::sync::Mutex::new(in_rx),
                closed: AtomicBool::new(false),
                close_notify: Notify::new(),
            }),
        };
        let peer = MemPeer {
            outbound: out_rx,
            inbound: Some(in_tx),
        };
        (transport, peer)
    }
}

impl Transport for MemTransport {
    async fn send(&self, message: OutboundMessage) -> Result<(), TransportError> {
        if self.inner.closed.load(Ordering::Acquire) {
            return Err(TransportError::Closed);
        }
        self.inner
            .tx
            .send(message)
            .await
            .map_err(|_| TransportError::Closed)
    }

    async fn recv(&self) -> Result<InboundMessage, TransportError> {
        let mut rx = self.inner.rx.lock().await;

        // Register for the close notification before re-checking the flag,
        // so a concurrent `close()` cannot slip between check and park.
        let notified = self.inner.close_notify.notified();
        tokio::pin!(notified);
        notified.as_mut().enable();
        if self.inner.closed.load(Ordering::Acquire) {
            return Err(TransportError::Closed);
        }

        tokio::select! {
            message = rx.recv() => message.ok_or(TransportError::Closed),
            _ = &mut notified => Err(TransportError::Closed),
        }
    }

    fn close(&self) {
        self.inner.closed.store(true, Ordering::Release);
        self.inner.close_notify.notify_waiters();
    }

    fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::Acquire)
    }
}

/// Test harness for the far side of a [`MemTransport`].
#[derive(Debug)]
pub struct MemPeer {
    outbound: mpsc::Receiver<OutboundMessage>,
    inbound: Option<mpsc::Sender<InboundMessage>>,
}

impl MemPeer {
    /// Next message the client sent, or `None` once the client is gone.
    pub async fn next_outbound(&mut self) -> Option<OutboundMessage> {
        self.outbound.recv().await
    }

    /// Deliver a message to the client.
    pub async fn push(&mut self, message: InboundMessage) {
        if let Some(tx) = &self.inbound {
            if tx.send(message).await.is_err() {
                self.inbound = None;
            }
        }
    }

    /// Drop the inbound side, making the client observe a closed transport.
    pub fn close(&mut self) {
        self.inbound = None;
    }
}
