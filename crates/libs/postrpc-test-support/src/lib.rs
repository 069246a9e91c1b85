//! In-memory stand-in for the host messaging surface.
//!
//! A [`MemoryHub`] knows a set of named contexts, each with an origin and an
//! optional parent. [`MemoryEndpoint`]s post into a FIFO queue on behalf of
//! one context; [`MemoryHub::pump`] delivers queued messages to whatever inbox
//! is attached to the target, applying the target-origin filter the way a
//! browser would.

use std::collections::{BTreeMap, VecDeque};
use std::io;
use std::sync::{Arc, Mutex};

use postrpc_proto::{ContextId, Envelope, Transport, ANY_ORIGIN};
use serde_json::Value as JsonValue;

/// Receives `(source, origin_of_sender, payload)` for a context.
pub type Inbox = Arc<dyn Fn(&ContextId, &str, &JsonValue) + Send + Sync>;

/// One message handed to the hub.
#[derive(Clone, Debug, PartialEq)]
pub struct Posted {
    pub from: ContextId,
    pub to: ContextId,
    pub target_origin: String,
    pub message: JsonValue,
}

struct Queued {
    posted: Posted,
    sender_origin: Option<String>,
}

struct ContextEntry {
    origin: String,
    parent: Option<ContextId>,
    inbox: Option<Inbox>,
}

#[derive(Default)]
struct HubState {
    contexts: BTreeMap<ContextId, ContextEntry>,
    queue: VecDeque<Queued>,
    log: Vec<Posted>,
    dropped: usize,
}

#[derive(Clone, Default)]
pub struct MemoryHub {
    state: Arc<Mutex<HubState>>,
}

impl MemoryHub {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_context(
        &self,
        id: impl Into<ContextId>,
        origin: impl Into<String>,
        parent: Option<ContextId>,
    ) {
        let mut state = self.state.lock().expect("hub mutex poisoned");
        state.contexts.insert(
            id.into(),
            ContextEntry { origin: origin.into(), parent, inbox: None },
        );
    }

    /// Attaches the inbound handler for `id`; the context must already exist.
    pub fn attach<F>(&self, id: &ContextId, inbox: F)
    where
        F: Fn(&ContextId, &str, &JsonValue) + Send + Sync + 'static,
    {
        let mut state = self.state.lock().expect("hub mutex poisoned");
        if let Some(entry) = state.contexts.get_mut(id) {
            entry.inbox = Some(Arc::new(inbox));
        } else {
            log::warn!(target: "postrpc::test_support", "attach to unknown context {id}");
        }
    }

    /// A transport that posts on behalf of `id`.
    pub fn endpoint(&self, id: impl Into<ContextId>) -> Arc<MemoryEndpoint> {
        Arc::new(MemoryEndpoint { hub: self.clone(), context: id.into() })
    }

    /// Queues a raw message, optionally claiming an origin other than the
    /// sender's own.
    pub fn inject(
        &self,
        from: &ContextId,
        to: &ContextId,
        message: JsonValue,
        claimed_origin: Option<&str>,
    ) {
        let posted = Posted {
            from: from.clone(),
            to: to.clone(),
            target_origin: ANY_ORIGIN.to_string(),
            message,
        };
        let mut state = self.state.lock().expect("hub mutex poisoned");
        state.log.push(posted.clone());
        state.queue.push_back(Queued { posted, sender_origin: claimed_origin.map(str::to_owned) });
    }

    /// Delivers queued messages, including any posted during delivery, until
    /// the queue is empty. Returns how many reached an inbox.
    pub fn pump(&self) -> usize {
        let mut delivered = 0;
        loop {
            let next = {
                let mut state = self.state.lock().expect("hub mutex poisoned");
                let Some(queued) = state.queue.pop_front() else {
                    break;
                };
                let route = Self::route(&state, &queued);
                if route.is_none() {
                    state.dropped += 1;
                }
                route.map(|(inbox, origin)| (inbox, origin, queued.posted))
            };
            if let Some((inbox, origin, posted)) = next {
                inbox(&posted.from, &origin, &posted.message);
                delivered += 1;
            }
        }
        delivered
    }

    fn route(state: &HubState, queued: &Queued) -> Option<(Inbox, String)> {
        let target = state.contexts.get(&queued.posted.to)?;
        let filter = queued.posted.target_origin.as_str();
        if filter != ANY_ORIGIN && filter != target.origin {
            log::debug!(
                target: "postrpc::test_support",
                "target origin {filter} does not match {}",
                target.origin
            );
            return None;
        }
        let inbox = target.inbox.clone()?;
        let origin = match &queued.sender_origin {
            Some(claimed) => claimed.clone(),
            None => state.contexts.get(&queued.posted.from)?.origin.clone(),
        };
        Some((inbox, origin))
    }

    pub fn posted(&self) -> Vec<Posted> {
        self.state.lock().expect("hub mutex poisoned").log.clone()
    }

    pub fn posted_to(&self, id: &ContextId) -> Vec<Posted> {
        self.posted().into_iter().filter(|posted| &posted.to == id).collect()
    }

    pub fn clear_log(&self) {
        self.state.lock().expect("hub mutex poisoned").log.clear();
    }

    pub fn queued(&self) -> usize {
        self.state.lock().expect("hub mutex poisoned").queue.len()
    }

    /// Messages discarded for an unknown target, an origin-filter mismatch or
    /// a missing inbox.
    pub fn dropped(&self) -> usize {
        self.state.lock().expect("hub mutex poisoned").dropped
    }

    fn enqueue(&self, from: &ContextId, to: &ContextId, message: JsonValue, target_origin: &str) -> io::Result<()> {
        let mut state = self.state.lock().expect("hub mutex poisoned");
        if !state.contexts.contains_key(to) {
            return Err(io::Error::new(io::ErrorKind::NotFound, format!("unknown context {to}")));
        }
        let posted = Posted {
            from: from.clone(),
            to: to.clone(),
            target_origin: target_origin.to_string(),
            message,
        };
        state.log.push(posted.clone());
        state.queue.push_back(Queued { posted, sender_origin: None });
        Ok(())
    }

    fn children_of(&self, id: &ContextId) -> Vec<ContextId> {
        let state = self.state.lock().expect("hub mutex poisoned");
        state
            .contexts
            .iter()
            .filter(|(_, entry)| entry.parent.as_ref() == Some(id))
            .map(|(child, _)| child.clone())
            .collect()
    }
}

/// [`Transport`] view of the hub for a single context.
pub struct MemoryEndpoint {
    hub: MemoryHub,
    context: ContextId,
}

impl MemoryEndpoint {
    pub fn context(&self) -> &ContextId {
        &self.context
    }
}

impl Transport for MemoryEndpoint {
    fn post(&self, target: &ContextId, envelope: &Envelope, target_origin: &str) -> io::Result<()> {
        let message = envelope
            .to_value()
            .map_err(|err| io::Error::new(io::ErrorKind::InvalidData, err))?;
        self.hub.enqueue(&self.context, target, message, target_origin)
    }

    fn children(&self) -> Vec<ContextId> {
        self.hub.children_of(&self.context)
    }
}
