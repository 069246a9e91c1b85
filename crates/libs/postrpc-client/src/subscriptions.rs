use std::collections::HashMap;
use std::sync::Arc;

use postrpc_proto::RpcError;
use serde_json::Value as JsonValue;

/// Receives the payload of a published event, or the error a peer attached.
pub type Subscriber = Arc<dyn Fn(Result<&JsonValue, &RpcError>) + Send + Sync + 'static>;

/// Event name to subscriber; one subscriber per name.
#[derive(Default)]
pub struct Subscriptions {
    subscribers: HashMap<String, Subscriber>,
}

impl Subscriptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replaces any earlier subscriber for `event`.
    pub fn subscribe(&mut self, event: impl Into<String>, subscriber: Subscriber) -> bool {
        self.subscribers.insert(event.into(), subscriber);
        true
    }

    pub fn unsubscribe(&mut self, event: &str) -> bool {
        self.subscribers.remove(event);
        true
    }

    /// The subscriber for `event`, cloned out so it can run without the table
    /// being borrowed.
    pub fn get(&self, event: &str) -> Option<Subscriber> {
        self.subscribers.get(event).cloned()
    }

    pub fn contains(&self, event: &str) -> bool {
        self.subscribers.contains_key(event)
    }

    pub fn len(&self) -> usize {
        self.subscribers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.subscribers.is_empty()
    }

    pub fn clear(&mut self) {
        self.subscribers.clear();
    }
}
