use std::sync::{Arc, Mutex};
use std::time::Duration;

use postrpc_proto::{
    origin_matches, CallId, ContextId, Envelope, Event, PostRpcError, RpcError, Transport,
};
use serde_json::Value as JsonValue;
use tokio::task::JoinHandle;

use crate::clock::Clock;
use crate::config::ClientConfig;
use crate::pending::{CallRegistry, CallResult, PendingReply, Resolution};
use crate::subscriptions::Subscriptions;
use crate::sweeper::{self, Sweep};

pub const CLIENT_NAME: &str = "PostRPC.Client";

const LOG_TARGET: &str = "postrpc::client";

struct Shared {
    config: ClientConfig,
    transport: Arc<dyn Transport>,
    clock: Arc<dyn Clock>,
    calls: Mutex<CallRegistry>,
    subscriptions: Mutex<Subscriptions>,
}

/// Guest-side endpoint: issues calls to the parent context, matches the
/// responses and delivers published events to subscribers.
///
/// Locks are released before any callback runs or any message is posted, so
/// callbacks may issue further calls.
pub struct Client {
    shared: Arc<Shared>,
    sweeper: Mutex<Option<JoinHandle<()>>>,
}

impl Client {
    pub fn new(config: ClientConfig, transport: Arc<dyn Transport>, clock: Arc<dyn Clock>) -> Self {
        Self {
            shared: Arc::new(Shared {
                config,
                transport,
                clock,
                calls: Mutex::new(CallRegistry::new()),
                subscriptions: Mutex::new(Subscriptions::new()),
            }),
            sweeper: Mutex::new(None),
        }
    }

    pub fn name(&self) -> &'static str {
        CLIENT_NAME
    }

    pub fn origin(&self) -> &str {
        &self.shared.config.origin
    }

    pub fn config(&self) -> &ClientConfig {
        &self.shared.config
    }

    /// Starts accepting calls and, when a tokio runtime is available, the
    /// periodic timeout sweep. Without a runtime, [`Client::sweep`] must be
    /// driven by the caller.
    pub fn start(&self) {
        self.shared.calls.lock().expect("calls mutex poisoned").start();
        let mut slot = self.sweeper.lock().expect("sweeper mutex poisoned");
        if slot.as_ref().is_some_and(|task| !task.is_finished()) {
            return;
        }
        match tokio::runtime::Handle::try_current() {
            Ok(runtime) => {
                let period = Duration::from_millis(self.shared.config.sweep_interval_ms);
                *slot = Some(sweeper::spawn(&runtime, Arc::downgrade(&self.shared), period));
                log::info!(
                    target: LOG_TARGET,
                    "client started parent={} sweep={}ms",
                    self.shared.config.parent,
                    self.shared.config.sweep_interval_ms
                );
            }
            Err(_) => {
                log::info!(target: LOG_TARGET, "client started without a runtime; sweeping is manual");
            }
        }
    }

    /// Stops accepting calls and messages. Calls already pending stay pending.
    pub fn stop(&self) {
        self.shared.calls.lock().expect("calls mutex poisoned").stop();
        if let Some(task) = self.sweeper.lock().expect("sweeper mutex poisoned").take() {
            task.abort();
        }
        log::info!(target: LOG_TARGET, "client stopped");
    }

    pub fn is_running(&self) -> bool {
        self.shared.is_running()
    }

    /// Calls `method` with the configured default timeout.
    pub fn call(&self, method: &str, args: Option<JsonValue>) -> Result<PendingReply, PostRpcError> {
        self.call_with_timeout(method, args, self.shared.config.default_timeout_ms)
    }

    pub fn call_with_timeout(
        &self,
        method: &str,
        args: Option<JsonValue>,
        timeout_ms: u64,
    ) -> Result<PendingReply, PostRpcError> {
        let (resolution, reply) = Resolution::future();
        self.issue(method, args, resolution, timeout_ms)?;
        Ok(reply)
    }

    /// Calls `method` and hands the outcome to `callback` exactly once.
    pub fn call_with_callback<F>(
        &self,
        method: &str,
        args: Option<JsonValue>,
        timeout_ms: u64,
        callback: F,
    ) -> Result<CallId, PostRpcError>
    where
        F: FnOnce(CallResult) + Send + 'static,
    {
        self.issue(method, args, Resolution::callback(callback), timeout_ms)
    }

    fn issue(
        &self,
        method: &str,
        args: Option<JsonValue>,
        resolution: Resolution,
        timeout_ms: u64,
    ) -> Result<CallId, PostRpcError> {
        if method.is_empty() {
            return Err(PostRpcError::invalid_call("method name must not be empty"));
        }
        let now = self.shared.clock.now_ms();
        let id = self.shared.calls.lock().expect("calls mutex poisoned").issue(
            method,
            args.clone(),
            resolution,
            timeout_ms,
            now,
        )?;
        log::debug!(target: LOG_TARGET, "call {method} id={id} timeout={timeout_ms}ms");

        let config = &self.shared.config;
        let request = Envelope::request(method, args, id);
        if let Err(err) = self.shared.transport.post(&config.parent, &request, &config.origin) {
            self.shared.calls.lock().expect("calls mutex poisoned").take(id);
            log::warn!(target: LOG_TARGET, "post {method} id={id} failed: {err}");
            return Err(PostRpcError::Transport { message: err.to_string() });
        }
        Ok(id)
    }

    /// Runs one timeout sweep now; returns how many calls timed out.
    pub fn sweep(&self) -> usize {
        self.shared.sweep()
    }

    pub fn pending_count(&self) -> usize {
        self.shared.calls.lock().expect("calls mutex poisoned").len()
    }

    pub fn subscribe<F>(&self, event: impl Into<String>, subscriber: F) -> bool
    where
        F: Fn(Result<&JsonValue, &RpcError>) + Send + Sync + 'static,
    {
        self.shared
            .subscriptions
            .lock()
            .expect("subscriptions mutex poisoned")
            .subscribe(event, Arc::new(subscriber))
    }

    pub fn unsubscribe(&self, event: &str) -> bool {
        self.shared.subscriptions.lock().expect("subscriptions mutex poisoned").unsubscribe(event)
    }

    /// Entry point for messages delivered by the host environment.
    ///
    /// Returns `false` when the message was filtered out: the client is
    /// stopped, the sender's origin differs from the configured one, or the
    /// sender is not the parent context.
    pub fn on_message(&self, source: &ContextId, origin: &str, payload: &JsonValue) -> bool {
        let config = &self.shared.config;
        if !self.is_running() {
            return false;
        }
        if !origin_matches(&config.origin, origin) {
            log::debug!(target: LOG_TARGET, "dropped message from origin {origin}");
            return false;
        }
        if source != &config.parent {
            log::debug!(target: LOG_TARGET, "dropped message from unexpected context {source}");
            return false;
        }

        match Envelope::from_value(payload) {
            Ok(Envelope::Success(success)) => {
                self.complete(success.id.as_call_id(), Ok(success.result));
            }
            Ok(Envelope::Failure(failure)) => {
                self.complete(failure.id.as_call_id(), Err(failure.error));
            }
            Ok(Envelope::Event(event)) => self.deliver(&event),
            Ok(Envelope::Request(request)) => {
                log::debug!(target: LOG_TARGET, "ignored request {} sent to client", request.method);
            }
            Err(malformed) => {
                log::debug!(target: LOG_TARGET, "malformed message from {source}: {malformed}");
            }
        }
        true
    }

    fn complete(&self, id: Option<CallId>, outcome: CallResult) {
        let Some(id) = id else {
            log::debug!(target: LOG_TARGET, "response without a usable id");
            return;
        };
        let call = self.shared.calls.lock().expect("calls mutex poisoned").take(id);
        match call {
            Some(call) => {
                log::debug!(target: LOG_TARGET, "resolved {} id={id}", call.method);
                call.resolve(outcome);
            }
            None => log::debug!(target: LOG_TARGET, "no pending call for id={id}"),
        }
    }

    fn deliver(&self, event: &Event) {
        let subscriber = self
            .shared
            .subscriptions
            .lock()
            .expect("subscriptions mutex poisoned")
            .get(&event.event);
        let Some(subscriber) = subscriber else {
            log::debug!(target: LOG_TARGET, "no subscriber for event {}", event.event);
            return;
        };
        match &event.error {
            Some(error) => subscriber(Err(error)),
            None => subscriber(Ok(&event.result)),
        }
    }
}

impl Drop for Client {
    fn drop(&mut self) {
        if let Ok(sweeper) = self.sweeper.get_mut() {
            if let Some(task) = sweeper.take() {
                task.abort();
            }
        }
    }
}

impl Shared {
    fn is_running(&self) -> bool {
        self.calls.lock().expect("calls mutex poisoned").is_running()
    }
}

impl Sweep for Shared {
    fn is_running(&self) -> bool {
        Shared::is_running(self)
    }

    fn sweep(&self) -> usize {
        let now = self.clock.now_ms();
        let expired = self.calls.lock().expect("calls mutex poisoned").take_expired(now);
        let count = expired.len();
        for call in expired {
            log::debug!(target: LOG_TARGET, "timeout {} id={}", call.method, call.id);
            call.resolve(Err(RpcError::timeout()));
        }
        count
    }
}
