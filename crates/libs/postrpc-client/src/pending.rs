use std::collections::BTreeMap;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};

use postrpc_proto::{CallId, PostRpcError, RpcError};
use serde_json::Value as JsonValue;
use tokio::sync::oneshot;

/// Outcome delivered to whoever is waiting on a call.
pub type CallResult = Result<JsonValue, RpcError>;

pub type Callback = Box<dyn FnOnce(CallResult) + Send + 'static>;

/// How a pending call is completed: exactly one of the two paths.
pub enum Resolution {
    Callback(Callback),
    Future(oneshot::Sender<CallResult>),
}

impl Resolution {
    pub fn callback<F>(callback: F) -> Self
    where
        F: FnOnce(CallResult) + Send + 'static,
    {
        Self::Callback(Box::new(callback))
    }

    /// A future-backed resolution and the reply the caller awaits.
    pub fn future() -> (Self, PendingReply) {
        let (sender, receiver) = oneshot::channel();
        (Self::Future(sender), PendingReply { receiver })
    }

    pub fn resolve(self, outcome: CallResult) {
        match self {
            Self::Callback(callback) => callback(outcome),
            Self::Future(sender) => {
                if sender.send(outcome).is_err() {
                    log::debug!(target: "postrpc::client", "reply dropped before resolution");
                }
            }
        }
    }
}

impl fmt::Debug for Resolution {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Callback(_) => f.write_str("Callback(..)"),
            Self::Future(_) => f.write_str("Future(..)"),
        }
    }
}

/// Future side of [`Resolution::Future`].
#[derive(Debug)]
pub struct PendingReply {
    receiver: oneshot::Receiver<CallResult>,
}

impl Future for PendingReply {
    type Output = CallResult;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.receiver)
            .poll(cx)
            .map(|received| received.unwrap_or_else(|_| Err(RpcError::client_internal())))
    }
}

#[derive(Debug)]
pub struct PendingCall {
    pub id: CallId,
    pub method: String,
    pub args: Option<JsonValue>,
    pub sent_at_ms: u64,
    pub timeout_ms: u64,
    resolution: Resolution,
}

impl PendingCall {
    pub fn is_expired(&self, now_ms: u64) -> bool {
        now_ms.saturating_sub(self.sent_at_ms) > self.timeout_ms
    }

    /// Completes the call, consuming it so it can never complete twice.
    pub fn resolve(self, outcome: CallResult) {
        self.resolution.resolve(outcome);
    }
}

/// Pending-call table keyed by call id.
#[derive(Debug)]
pub struct CallRegistry {
    next_id: CallId,
    calls: BTreeMap<CallId, PendingCall>,
    running: bool,
}

impl Default for CallRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl CallRegistry {
    /// A stopped registry whose first id will be 1.
    pub fn new() -> Self {
        Self { next_id: 1, calls: BTreeMap::new(), running: false }
    }

    pub fn start(&mut self) {
        self.running = true;
    }

    pub fn stop(&mut self) {
        self.running = false;
    }

    pub fn is_running(&self) -> bool {
        self.running
    }

    /// Records a new pending call and returns its id.
    ///
    /// Fails with `NotRunning` when stopped; the resolution is dropped unused.
    pub fn issue(
        &mut self,
        method: impl Into<String>,
        args: Option<JsonValue>,
        resolution: Resolution,
        timeout_ms: u64,
        now_ms: u64,
    ) -> Result<CallId, PostRpcError> {
        if !self.running {
            return Err(PostRpcError::not_running(crate::CLIENT_NAME));
        }
        let id = self.next_id;
        self.next_id += 1;
        self.calls.insert(
            id,
            PendingCall {
                id,
                method: method.into(),
                args,
                sent_at_ms: now_ms,
                timeout_ms,
                resolution,
            },
        );
        Ok(id)
    }

    /// Removes and returns the call matching a response id, if still pending.
    pub fn take(&mut self, id: CallId) -> Option<PendingCall> {
        self.calls.remove(&id)
    }

    /// Removes and returns every call whose deadline has passed.
    pub fn take_expired(&mut self, now_ms: u64) -> Vec<PendingCall> {
        let expired: Vec<CallId> = self
            .calls
            .values()
            .filter(|call| call.is_expired(now_ms))
            .map(|call| call.id)
            .collect();
        expired.into_iter().filter_map(|id| self.calls.remove(&id)).collect()
    }

    pub fn contains(&self, id: CallId) -> bool {
        self.calls.contains_key(&id)
    }

    pub fn len(&self) -> usize {
        self.calls.len()
    }

    pub fn is_empty(&self) -> bool {
        self.calls.is_empty()
    }

    pub fn next_id(&self) -> CallId {
        self.next_id
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::{Arc, Mutex};

    fn started() -> CallRegistry {
        let mut registry = CallRegistry::new();
        registry.start();
        registry
    }

    fn recorder() -> (Resolution, Arc<Mutex<Vec<CallResult>>>) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let resolution = Resolution::callback(move |outcome| {
            sink.lock().expect("seen mutex poisoned").push(outcome);
        });
        (resolution, seen)
    }

    #[test]
    fn ids_are_strictly_monotonic_from_one() {
        let mut registry = started();
        let ids: Vec<CallId> = (0..3)
            .map(|_| {
                let (resolution, _) = recorder();
                registry.issue("add", None, resolution, 5_000, 0).expect("issue")
            })
            .collect();
        assert_eq!(ids, vec![1, 2, 3]);
        assert_eq!(registry.len(), 3);
    }

    #[test]
    fn stopped_registry_refuses_new_calls() {
        let mut registry = CallRegistry::new();
        let (resolution, seen) = recorder();
        let err = registry.issue("add", None, resolution, 5_000, 0).expect_err("stopped");
        assert!(matches!(err, PostRpcError::NotRunning { .. }));
        assert!(registry.is_empty());
        assert!(seen.lock().expect("seen mutex poisoned").is_empty());
        assert_eq!(registry.next_id(), 1);
    }

    #[test]
    fn take_removes_exactly_once() {
        let mut registry = started();
        let (resolution, seen) = recorder();
        let id = registry.issue("add", Some(json!([1, 2])), resolution, 5_000, 0).expect("issue");

        let call = registry.take(id).expect("pending");
        assert_eq!(call.method, "add");
        assert_eq!(call.args, Some(json!([1, 2])));
        call.resolve(Ok(json!(3)));

        assert!(registry.take(id).is_none());
        assert_eq!(*seen.lock().expect("seen mutex poisoned"), vec![Ok(json!(3))]);
    }

    #[test]
    fn expiry_is_strictly_after_the_timeout() {
        let mut registry = started();
        let (short, _) = recorder();
        let (long, _) = recorder();
        let short_id = registry.issue("a", None, short, 100, 1_000).expect("issue");
        let long_id = registry.issue("b", None, long, 1_000, 1_000).expect("issue");

        assert!(registry.take_expired(1_100).is_empty());
        let expired = registry.take_expired(1_101);
        assert_eq!(expired.iter().map(|call| call.id).collect::<Vec<_>>(), vec![short_id]);
        assert!(registry.contains(long_id));
        assert!(!registry.contains(short_id));
    }

    #[tokio::test]
    async fn future_resolution_delivers_errors() {
        let mut registry = started();
        let (resolution, reply) = Resolution::future();
        let id = registry.issue("slow", None, resolution, 10, 0).expect("issue");
        registry.take(id).expect("pending").resolve(Err(RpcError::timeout()));

        let err = reply.await.expect_err("timeout");
        assert_eq!(err.code, -32001);
    }

    #[tokio::test]
    async fn dropped_resolution_fails_the_reply() {
        let (resolution, reply) = Resolution::future();
        drop(resolution);
        let err = reply.await.expect_err("dropped");
        assert_eq!(err, RpcError::client_internal());
    }
}
