use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use postrpc_proto::{Fault, Param, Return, TypeTag};
use serde::Serialize;
use serde_json::Value as JsonValue;

/// The callable behind a registered method. Receives arguments already mapped
/// onto the declared parameter order.
pub trait Handler: Send + Sync {
    fn invoke(&self, args: Vec<JsonValue>) -> Result<Return, Fault>;
}

impl<F> Handler for F
where
    F: Fn(Vec<JsonValue>) -> Result<Return, Fault> + Send + Sync,
{
    fn invoke(&self, args: Vec<JsonValue>) -> Result<Return, Fault> {
        self(args)
    }
}

/// Wraps a closure as a shareable handler.
pub fn handler_fn<F>(handler: F) -> Arc<dyn Handler>
where
    F: Fn(Vec<JsonValue>) -> Result<Return, Fault> + Send + Sync + 'static,
{
    Arc::new(handler)
}

pub struct RegisteredMethod {
    pub name: String,
    pub params: Vec<Param>,
    pub returns: TypeTag,
    pub handler: Arc<dyn Handler>,
    pub description: String,
}

impl RegisteredMethod {
    pub fn arity(&self) -> usize {
        self.params.len()
    }

    pub fn descriptor(&self) -> MethodDescriptor {
        MethodDescriptor {
            name: self.name.clone(),
            params: self.params.clone(),
            returns: self.returns,
            description: self.description.clone(),
        }
    }
}

impl fmt::Debug for RegisteredMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RegisteredMethod")
            .field("name", &self.name)
            .field("params", &self.params)
            .field("returns", &self.returns)
            .field("description", &self.description)
            .finish_non_exhaustive()
    }
}

/// Registration metadata without the handler.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct MethodDescriptor {
    pub name: String,
    pub params: Vec<Param>,
    pub returns: TypeTag,
    pub description: String,
}

/// Name-keyed table of dispatchable methods.
#[derive(Default)]
pub struct MethodRegistry {
    methods: HashMap<String, Arc<RegisteredMethod>>,
}

impl MethodRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stores `name`, replacing any earlier registration.
    pub fn register(
        &mut self,
        name: impl Into<String>,
        params: Vec<Param>,
        returns: TypeTag,
        handler: Arc<dyn Handler>,
        description: impl Into<String>,
    ) -> bool {
        let name = name.into();
        let method = RegisteredMethod {
            name: name.clone(),
            params,
            returns,
            handler,
            description: description.into(),
        };
        if self.methods.insert(name, Arc::new(method)).is_some() {
            log::debug!(target: "postrpc::server", "replaced existing registration");
        }
        true
    }

    pub fn unregister(&mut self, name: &str) -> bool {
        self.methods.remove(name).is_some()
    }

    pub fn lookup(&self, name: &str) -> Option<Arc<RegisteredMethod>> {
        self.methods.get(name).cloned()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.methods.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.methods.len()
    }

    pub fn is_empty(&self) -> bool {
        self.methods.is_empty()
    }

    pub fn clear(&mut self) {
        self.methods.clear();
    }

    /// Descriptors sorted by method name.
    pub fn descriptors(&self) -> Vec<MethodDescriptor> {
        let mut descriptors: Vec<_> =
            self.methods.values().map(|method| method.descriptor()).collect();
        descriptors.sort_by(|left, right| left.name.cmp(&right.name));
        descriptors
    }
}
