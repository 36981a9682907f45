//! hublink-protocol: the message model shared by hub clients and the
//! transports that carry them.
//!
//! This crate defines:
//! - Invocation identifiers ([`InvocationId`])
//! - Client-to-server messages ([`OutboundMessage`])
//! - Server-to-client messages ([`InboundMessage`])
//! - The dynamic argument/result representation ([`Value`])
//!
//! Serialization to a concrete wire format lives behind the transport seam;
//! the session layer only ever exchanges these decoded values.

mod id;
mod message;

pub use id::*;
pub use message::*;
