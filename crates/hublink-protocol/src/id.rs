//! Invocation identifiers.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Client-generated token correlating an invocation with its completion.
///
/// Ids are opaque strings, unique for the lifetime of one connection. The
/// connection mints them from a monotonically increasing counter, so an id is
/// never reused while a pending call still references it.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct InvocationId(String);

impl InvocationId {
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for InvocationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<u64> for InvocationId {
    fn from(seq: u64) -> Self {
        Self(seq.to_string())
    }
}
