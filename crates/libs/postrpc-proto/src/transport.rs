use std::fmt;
use std::io;

use serde::{Deserialize, Serialize};

use crate::envelope::Envelope;

/// Origin filter that lets a post reach a target of any origin.
pub const ANY_ORIGIN: &str = "*";

/// Identity of an execution context (a window, frame or worker) as known to
/// the transport.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ContextId(String);

impl ContextId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ContextId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ContextId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

impl From<String> for ContextId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

/// The raw cross-context channel.
///
/// Posting is fire-and-forget: `Ok` means the message was handed to the host
/// environment, not that it arrived. Inbound messages are pushed by the host
/// into `on_message` of the server or client that owns the receiving context.
pub trait Transport: Send + Sync {
    fn post(&self, target: &ContextId, envelope: &Envelope, target_origin: &str) -> io::Result<()>;

    /// Child contexts reachable from the posting context, for broadcasts.
    fn children(&self) -> Vec<ContextId> {
        Vec::new()
    }
}

/// Exact comparison of a sender's origin against the configured one.
pub fn origin_matches(expected: &str, actual: &str) -> bool {
    !expected.is_empty() && expected == actual
}
