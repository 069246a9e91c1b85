use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use postrpc_proto::{
    origin_matches, ContextId, Envelope, ErrorCode, Fault, Param, PostRpcError, Request,
    RequestId, Return, Transport, TypeTag, ANY_ORIGIN,
};
use serde_json::Value as JsonValue;

use crate::config::{PublishMode, ServerConfig};
use crate::dispatch::{dispatch, Dispatched};
use crate::registry::{Handler, MethodDescriptor, MethodRegistry};

pub const SERVER_NAME: &str = "PostRPC.Server";

const LOG_TARGET: &str = "postrpc::server";

/// Host-side endpoint: answers requests from the child context and publishes
/// events to it.
///
/// Inbound messages arrive through [`Server::on_message`]; nothing is
/// processed or posted while the server is stopped.
pub struct Server {
    config: ServerConfig,
    transport: Arc<dyn Transport>,
    methods: Mutex<MethodRegistry>,
    running: Arc<AtomicBool>,
}

impl Server {
    pub fn new(config: ServerConfig, transport: Arc<dyn Transport>) -> Self {
        Self {
            config,
            transport,
            methods: Mutex::new(MethodRegistry::new()),
            running: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn name(&self) -> &'static str {
        SERVER_NAME
    }

    pub fn origin(&self) -> &str {
        &self.config.origin
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    pub fn start(&self) {
        self.running.store(true, Ordering::SeqCst);
        log::info!(target: LOG_TARGET, "server started origin={}", self.config.origin);
    }

    pub fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
        log::info!(target: LOG_TARGET, "server stopped");
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Stops the server and drops every registration.
    pub fn reset(&self) {
        self.stop();
        self.methods.lock().expect("methods mutex poisoned").clear();
    }

    /// Registers a closure under `name`, replacing any earlier registration.
    pub fn register<P, F>(
        &self,
        name: impl Into<String>,
        params: P,
        returns: TypeTag,
        handler: F,
        description: impl Into<String>,
    ) -> bool
    where
        P: IntoIterator,
        P::Item: Into<Param>,
        F: Fn(Vec<JsonValue>) -> Result<Return, Fault> + Send + Sync + 'static,
    {
        self.register_handler(name, params, returns, Arc::new(handler), description)
    }

    pub fn register_handler<P>(
        &self,
        name: impl Into<String>,
        params: P,
        returns: TypeTag,
        handler: Arc<dyn Handler>,
        description: impl Into<String>,
    ) -> bool
    where
        P: IntoIterator,
        P::Item: Into<Param>,
    {
        let name = name.into();
        let params: Vec<Param> = params.into_iter().map(Into::into).collect();
        log::debug!(
            target: LOG_TARGET,
            "register {name} params={:?} returns={returns}",
            params.iter().map(|param| param.name.as_str()).collect::<Vec<_>>()
        );
        self.methods.lock().expect("methods mutex poisoned").register(
            name,
            params,
            returns,
            handler,
            description,
        )
    }

    pub fn unregister(&self, name: &str) -> bool {
        let removed = self.methods.lock().expect("methods mutex poisoned").unregister(name);
        log::debug!(target: LOG_TARGET, "unregister {name} removed={removed}");
        removed
    }

    pub fn is_registered(&self, name: &str) -> bool {
        self.methods.lock().expect("methods mutex poisoned").contains(name)
    }

    pub fn methods(&self) -> Vec<MethodDescriptor> {
        self.methods.lock().expect("methods mutex poisoned").descriptors()
    }

    /// Entry point for messages delivered by the host environment.
    ///
    /// Returns `false` when the message was filtered out: the server is
    /// stopped, the sender's origin differs from the configured one, or the
    /// sender is not the configured child (any child context the transport
    /// reports, when none is configured).
    pub fn on_message(&self, source: &ContextId, origin: &str, payload: &JsonValue) -> bool {
        if !self.accepts(source, origin) {
            return false;
        }
        match Request::from_value(payload) {
            Ok(request) => self.handle_request(source, &request),
            Err(malformed) => {
                log::debug!(target: LOG_TARGET, "malformed request from {source}: {malformed}");
                self.post(source, &Envelope::error_code(ErrorCode::InvalidRequest, malformed.id()));
            }
        }
        true
    }

    /// Like [`Server::on_message`] for peers that post serialized text.
    /// Unparseable text is answered with a parse error.
    pub fn on_text(&self, source: &ContextId, origin: &str, text: &str) -> bool {
        if !self.accepts(source, origin) {
            return false;
        }
        match serde_json::from_str::<JsonValue>(text) {
            Ok(payload) => self.on_message(source, origin, &payload),
            Err(err) => {
                log::debug!(target: LOG_TARGET, "unparseable message from {source}: {err}");
                self.post(source, &Envelope::error_code(ErrorCode::ParseError, RequestId::Null));
                true
            }
        }
    }

    /// Dispatches one request and posts the response back to `source`.
    ///
    /// Deferred results are awaited on the ambient tokio runtime; without one
    /// the caller is answered with an internal error.
    pub fn handle_request(&self, source: &ContextId, request: &Request) {
        if !self.is_running() {
            return;
        }
        let dispatched = dispatch(request, |name| {
            self.methods.lock().expect("methods mutex poisoned").lookup(name)
        });
        match dispatched {
            Dispatched::Immediate(envelope) => self.post(source, &envelope),
            Dispatched::Deferred(pending) => match tokio::runtime::Handle::try_current() {
                Ok(runtime) => {
                    let transport = Arc::clone(&self.transport);
                    let running = Arc::clone(&self.running);
                    let target = source.clone();
                    runtime.spawn(async move {
                        let envelope = pending.await;
                        if running.load(Ordering::SeqCst) {
                            post_envelope(transport.as_ref(), &target, &envelope, ANY_ORIGIN);
                        } else {
                            log::debug!(target: LOG_TARGET, "server stopped before deferred response");
                        }
                    });
                }
                Err(_) => {
                    log::warn!(target: LOG_TARGET, "deferred result without a runtime");
                    self.post(
                        source,
                        &Envelope::error_code(ErrorCode::InternalError, request.id.clone()),
                    );
                }
            },
        }
    }

    /// Sends an event to the configured child only.
    pub fn publish(&self, name: &str, payload: JsonValue) -> Result<(), PostRpcError> {
        self.ensure_running()?;
        let child = self.config.child.as_ref().ok_or_else(|| PostRpcError::Transport {
            message: "no child context configured".to_string(),
        })?;
        log::debug!(target: LOG_TARGET, "publish {name} to {child}");
        self.transport
            .post(child, &Envelope::event(name, payload), &self.config.origin)
            .map_err(|err| PostRpcError::Transport { message: err.to_string() })
    }

    /// Sends an event to every child context the transport knows; returns how
    /// many posts were attempted.
    pub fn broadcast(&self, name: &str, payload: JsonValue) -> Result<usize, PostRpcError> {
        self.ensure_running()?;
        let envelope = Envelope::event(name, payload);
        let children = self.transport.children();
        for child in &children {
            post_envelope(self.transport.as_ref(), child, &envelope, ANY_ORIGIN);
        }
        log::debug!(target: LOG_TARGET, "broadcast {name} to {} contexts", children.len());
        Ok(children.len())
    }

    /// Publishes or broadcasts according to the configured mode.
    pub fn notify(&self, name: &str, payload: JsonValue) -> Result<(), PostRpcError> {
        match self.config.publish {
            PublishMode::Child => self.publish(name, payload),
            PublishMode::Broadcast => self.broadcast(name, payload).map(|_| ()),
        }
    }

    fn accepts(&self, source: &ContextId, origin: &str) -> bool {
        if !self.is_running() {
            return false;
        }
        if !origin_matches(&self.config.origin, origin) {
            log::debug!(target: LOG_TARGET, "dropped message from origin {origin}");
            return false;
        }
        let expected = match &self.config.child {
            Some(child) => child == source,
            None => self.transport.children().contains(source),
        };
        if !expected {
            log::debug!(target: LOG_TARGET, "dropped message from unexpected context {source}");
            return false;
        }
        true
    }

    fn ensure_running(&self) -> Result<(), PostRpcError> {
        if self.is_running() {
            Ok(())
        } else {
            Err(PostRpcError::not_running(SERVER_NAME))
        }
    }

    fn post(&self, target: &ContextId, envelope: &Envelope) {
        if self.is_running() {
            post_envelope(self.transport.as_ref(), target, envelope, ANY_ORIGIN);
        }
    }
}

fn post_envelope(transport: &dyn Transport, target: &ContextId, envelope: &Envelope, origin: &str) {
    if let Err(err) = transport.post(target, envelope, origin) {
        log::warn!(target: LOG_TARGET, "post {} to {target} failed: {err}", envelope.kind());
    }
}
