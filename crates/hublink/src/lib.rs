//! hublink: invocation correlation and completion tracking for a hub-style
//! RPC client.
//!
//! A [`Connection`] owns the transport seam and multiplexes invocations over
//! it: callers issue blocking, streaming, or fire-and-forget invocations from
//! any task, while a single dispatch loop reads inbound messages and routes
//! completions and stream items back to the registered waiters.
//!
//! ```text
//! caller ──invoke_blocking──► Connection ──send──► transport
//!                                 │
//!                          registry: id → slot
//!                                 ▲
//! transport ──recv──► run() ──────┘  (completions, stream items)
//! ```
//!
//! # Usage
//!
//! ```ignore
//! let (transport, peer) = MemTransport::pair();
//! let connection = Arc::new(Connection::new(transport));
//! tokio::spawn(connection.clone().run());
//!
//! let result = connection
//!     .invoke_blocking("Add", vec![json!(2), json!(3)], "int")
//!     .await?;
//! ```
//!
//! Guarantees:
//! - A blocking call resolves exactly once, with the server's result, a
//!   server-reported error, or a local `Cancelled`/`ConnectionLost`.
//! - On disconnect every pending call (blocking or streaming) resolves with
//!   `ConnectionLost` in one drain pass; nothing stays suspended.
//! - Late completions and stream items for cancelled calls are discarded.

mod connection;
mod error;
mod events;
mod registry;
mod transport;

pub use connection::*;
pub use error::*;
pub use events::*;
pub use transport::*;

pub use hublink_protocol::{InboundMessage, InvocationId, OutboundMessage, Value};
