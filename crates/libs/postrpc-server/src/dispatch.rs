//! Request handling: validate, resolve, map arguments, invoke, classify.

use std::future::Future;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::pin::Pin;
use std::sync::Arc;

use futures::FutureExt;
use postrpc_proto::{
    map_args, Deferred, Envelope, ErrorCode, Request, RequestId, Return, JSONRPC_VERSION,
};

use crate::registry::RegisteredMethod;

/// Method names under this prefix are never dispatchable.
pub const RESERVED_PREFIX: &str = "rpc.";

const LOG_TARGET: &str = "postrpc::server";

/// Result of dispatching one request.
pub enum Dispatched {
    /// The response is ready now.
    Immediate(Envelope),
    /// The handler returned a deferred value; the response is produced when it settles.
    Deferred(Pin<Box<dyn Future<Output = Envelope> + Send + 'static>>),
}

impl Dispatched {
    pub fn is_deferred(&self) -> bool {
        matches!(self, Self::Deferred(_))
    }

    /// Waits for the response, whichever way it is produced.
    pub async fn into_envelope(self) -> Envelope {
        match self {
            Self::Immediate(envelope) => envelope,
            Self::Deferred(pending) => pending.await,
        }
    }
}

/// Checks the protocol version, method presence and the reserved namespace.
pub fn validate(request: &Request) -> Result<(), ErrorCode> {
    if request.jsonrpc != JSONRPC_VERSION
        || request.method.is_empty()
        || request.method.starts_with(RESERVED_PREFIX)
    {
        return Err(ErrorCode::InvalidRequest);
    }
    Ok(())
}

/// Runs a request through the dispatch pipeline.
///
/// `lookup` resolves the method name; it is called at most once and only for
/// requests that passed validation. The handler runs on the calling thread.
pub fn dispatch<L>(request: &Request, lookup: L) -> Dispatched
where
    L: FnOnce(&str) -> Option<Arc<RegisteredMethod>>,
{
    let id = request.id.clone();

    if let Err(code) = validate(request) {
        log::debug!(target: LOG_TARGET, "invalid request method={:?} id={:?}", request.method, id);
        return Dispatched::Immediate(Envelope::error_code(code, id));
    }

    let Some(method) = lookup(&request.method) else {
        log::debug!(target: LOG_TARGET, "method not found: {}", request.method);
        return Dispatched::Immediate(Envelope::error_code(ErrorCode::MethodNotFound, id));
    };

    let args = map_args(request.args.as_ref(), &method.params);
    if args.len() != method.arity() {
        log::debug!(
            target: LOG_TARGET,
            "invalid args for {}: mapped {} of {}",
            method.name,
            args.len(),
            method.arity()
        );
        return Dispatched::Immediate(Envelope::error_code(ErrorCode::InvalidArgs, id));
    }

    log::debug!(target: LOG_TARGET, "call {}({} args) id={:?}", method.name, args.len(), id);
    let handler = Arc::clone(&method.handler);
    match catch_unwind(AssertUnwindSafe(move || handler.invoke(args))) {
        Ok(Ok(Return::Deferred(pending))) => {
            log::debug!(target: LOG_TARGET, "{} returned a deferred result", method.name);
            let name = method.name.clone();
            let fallback = id.clone();
            Dispatched::Deferred(Box::pin(async move {
                match AssertUnwindSafe(settle(pending, id)).catch_unwind().await {
                    Ok(envelope) => envelope,
                    Err(_) => {
                        log::warn!(target: LOG_TARGET, "deferred result of {name} panicked");
                        Envelope::error_code(ErrorCode::InternalError, fallback)
                    }
                }
            }))
        }
        Ok(Ok(value)) => Dispatched::Immediate(classify(value, id)),
        Ok(Err(fault)) => {
            log::debug!(target: LOG_TARGET, "{} raised {:?}", method.name, fault.as_value());
            Dispatched::Immediate(Envelope::failure(fault.to_rpc_error(), id))
        }
        Err(_) => {
            log::warn!(target: LOG_TARGET, "handler for {} panicked", method.name);
            Dispatched::Immediate(Envelope::error_code(ErrorCode::InternalError, id))
        }
    }
}

/// Waits out a deferred result, flattening deferreds that resolve to deferreds.
async fn settle(mut pending: Deferred, id: RequestId) -> Envelope {
    loop {
        match pending.await {
            Ok(Return::Deferred(next)) => pending = next,
            Ok(value) => return classify(value, id),
            Err(fault) => return Envelope::failure(fault.to_rpc_error(), id),
        }
    }
}

fn classify(value: Return, id: RequestId) -> Envelope {
    match value.into_wire() {
        Ok(result) => Envelope::success(result, id),
        Err(kind) => {
            log::warn!(target: LOG_TARGET, "handler returned non-wire kind {kind}");
            Envelope::error_code(ErrorCode::InvalidReturn, id)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::{handler_fn, Handler, MethodRegistry};
    use postrpc_proto::{Fault, Param, TypeTag};
    use serde_json::{json, Value as JsonValue};

    fn registry_with(name: &str, params: Vec<Param>, handler: Arc<dyn Handler>) -> MethodRegistry {
        let mut registry = MethodRegistry::new();
        registry.register(name, params, TypeTag::Any, handler, "");
        registry
    }

    fn request(value: JsonValue) -> Request {
        Request::from_value(&value).expect("object request")
    }

    fn immediate(dispatched: Dispatched) -> JsonValue {
        match dispatched {
            Dispatched::Immediate(envelope) => envelope.to_value().expect("serialize"),
            Dispatched::Deferred(_) => panic!("expected an immediate response"),
        }
    }

    fn ab_params() -> Vec<Param> {
        vec![Param::new("a", TypeTag::Number), Param::new("b", TypeTag::String)]
    }

    #[test]
    fn validation_rules() {
        assert!(validate(&request(json!({"jsonrpc": "2.0", "method": "add", "params": {"a": 2}}))).is_ok());
        assert_eq!(
            validate(&request(json!({"jsonrpc": "2.0", "params": {"a": 2}}))),
            Err(ErrorCode::InvalidRequest)
        );
        assert_eq!(
            validate(&request(json!({"jsonrpc": "2.0", "method": "rpc.add"}))),
            Err(ErrorCode::InvalidRequest)
        );
        assert_eq!(validate(&request(json!({"method": "add"}))), Err(ErrorCode::InvalidRequest));
        assert_eq!(
            validate(&request(json!({"jsonrpc": "1.0", "method": "add"}))),
            Err(ErrorCode::InvalidRequest)
        );
    }

    #[test]
    fn reserved_prefix_is_invalid_even_when_registered() {
        let registry = registry_with("rpc.secret", Vec::new(), handler_fn(|_| Ok(Return::Null)));
        let response = immediate(dispatch(
            &request(json!({"jsonrpc": "2.0", "method": "rpc.secret", "id": 11})),
            |name| registry.lookup(name),
        ));
        assert_eq!(response["error"]["code"], json!(-32600));
        assert_eq!(response["id"], json!(11));
    }

    #[test]
    fn invalid_request_keeps_whatever_id_it_had() {
        let response = immediate(dispatch(&request(json!({"id": "abc"})), |_| None));
        assert_eq!(response["error"]["code"], json!(-32600));
        assert_eq!(response["id"], json!("abc"));
    }

    #[test]
    fn unknown_method_is_not_found() {
        let response = immediate(dispatch(
            &request(json!({"jsonrpc": "2.0", "method": "missing", "id": 4})),
            |_| None,
        ));
        assert_eq!(
            response,
            json!({
                "jsonrpc": "2.0",
                "error": {
                    "code": -32601,
                    "message": "Method not found",
                    "data": "The method does not exist / is not available"
                },
                "id": 4
            })
        );
    }

    #[test]
    fn missing_named_argument_is_invalid_args() {
        let registry = registry_with("f", ab_params(), handler_fn(|_| Ok(Return::Null)));
        let response = immediate(dispatch(
            &request(json!({"jsonrpc": "2.0", "method": "f", "args": {"b": "x"}, "id": 2})),
            |name| registry.lookup(name),
        ));
        assert_eq!(response["error"]["code"], json!(-32602));
        assert_eq!(response["error"]["message"], json!("Invalid args"));
    }

    #[test]
    fn handler_receives_arguments_in_declared_order() {
        let registry = registry_with(
            "f",
            ab_params(),
            handler_fn(|args| Ok(Return::from(JsonValue::Array(args)))),
        );
        let response = immediate(dispatch(
            &request(json!({"jsonrpc": "2.0", "method": "f", "args": {"b": "x", "a": 3}, "id": 1})),
            |name| registry.lookup(name),
        ));
        assert_eq!(response, json!({"jsonrpc": "2.0", "result": [3, "x"], "id": 1}));
    }

    #[test]
    fn synchronous_object_result_is_success() {
        let registry = registry_with(
            "f",
            Vec::new(),
            handler_fn(|_| Ok(Return::from(json!({"c": 101, "d": 202})))),
        );
        let response = immediate(dispatch(
            &request(json!({"jsonrpc": "2.0", "method": "f", "args": [], "id": 9})),
            |name| registry.lookup(name),
        ));
        assert_eq!(response, json!({"jsonrpc": "2.0", "result": {"c": 101, "d": 202}, "id": 9}));
    }

    #[test]
    fn raised_fault_becomes_application_error() {
        let registry = registry_with(
            "f",
            Vec::new(),
            handler_fn(|_| Err(Fault::new("Failed", "oops"))),
        );
        let response = immediate(dispatch(
            &request(json!({"jsonrpc": "2.0", "method": "f", "id": 5})),
            |name| registry.lookup(name),
        ));
        assert_eq!(
            response,
            json!({
                "jsonrpc": "2.0",
                "error": {"code": -32000, "message": "Failed", "data": "oops"},
                "id": 5
            })
        );
    }

    #[test]
    fn opaque_result_is_invalid_return() {
        let registry = registry_with(
            "f",
            Vec::new(),
            handler_fn(|_| Ok(Return::Opaque("window handle"))),
        );
        let response = immediate(dispatch(
            &request(json!({"jsonrpc": "2.0", "method": "f", "id": 6})),
            |name| registry.lookup(name),
        ));
        assert_eq!(response["error"]["code"], json!(-32604));
        assert_eq!(response["id"], json!(6));
    }

    #[test]
    fn panicking_handler_is_internal_error() {
        let registry = registry_with(
            "f",
            Vec::new(),
            handler_fn(|_| { panic!("handler bug") }),
        );
        let response = immediate(dispatch(
            &request(json!({"jsonrpc": "2.0", "method": "f", "id": 8})),
            |name| registry.lookup(name),
        ));
        assert_eq!(response["error"]["code"], json!(-32603));
    }

    #[tokio::test]
    async fn panicking_deferred_is_internal_error() {
        let registry = registry_with(
            "f",
            Vec::new(),
            handler_fn(|_| {
                Ok(Return::deferred(async {
                    tokio::task::yield_now().await;
                    if true {
                        panic!("deferred bug");
                    }
                    Ok::<_, Fault>(Return::Null)
                }))
            }),
        );
        let response = dispatch(
            &request(json!({"jsonrpc": "2.0", "method": "f", "id": 9})),
            |name| registry.lookup(name),
        )
        .into_envelope()
        .await
        .to_value()
        .expect("serialize");
        assert_eq!(response["error"]["code"], json!(-32603));
        assert_eq!(response["id"], json!(9));
    }

    #[tokio::test]
    async fn deferred_success_and_failure() {
        let registry = registry_with(
            "later",
            vec![Param::new("ok", TypeTag::Boolean)],
            handler_fn(|args| {
                let ok = args[0].as_bool().unwrap_or(false);
                Ok(Return::deferred(async move {
                    if ok {
                        Ok(Return::deferred(async { Ok::<_, Fault>(Return::from("done")) }))
                    } else {
                        Err(Fault::value(json!({"error": "Rejected", "detail": "nope"})))
                    }
                }))
            }),
        );

        let dispatched = dispatch(
            &request(json!({"jsonrpc": "2.0", "method": "later", "args": [true], "id": 1})),
            |name| registry.lookup(name),
        );
        assert!(dispatched.is_deferred());
        let success = dispatched.into_envelope().await.to_value().expect("serialize");
        assert_eq!(success, json!({"jsonrpc": "2.0", "result": "done", "id": 1}));

        let failure = dispatch(
            &request(json!({"jsonrpc": "2.0", "method": "later", "args": {"ok": false}, "id": 2})),
            |name| registry.lookup(name),
        )
        .into_envelope()
        .await
        .to_value()
        .expect("serialize");
        assert_eq!(
            failure,
            json!({
                "jsonrpc": "2.0",
                "error": {"code": -32000, "message": "Rejected", "data": "nope"},
                "id": 2
            })
        );
    }

    #[test]
    fn lookup_is_skipped_for_invalid_requests() {
        let mut looked_up = false;
        let _ = dispatch(&request(json!({"jsonrpc": "2.0", "method": ""})), |_| {
            looked_up = true;
            None
        });
        assert!(!looked_up);
    }
}
