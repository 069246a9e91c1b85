use std::fmt;
use std::future::Future;
use std::pin::Pin;

use serde_json::{json, Map as JsonMap, Number as JsonNumber, Value as JsonValue};

use crate::error::RpcError;

/// A handler result that completes later.
pub type Deferred = Pin<Box<dyn Future<Output = Result<Return, Fault>> + Send + 'static>>;

/// Closed set of shapes a handler can hand back.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ReturnKind {
    Boolean,
    Null,
    Absent,
    Number,
    String,
    Atom,
    Object,
    Array,
    Deferred,
    Opaque,
}

impl ReturnKind {
    /// Kinds that can be written into a success envelope as they are.
    pub const ALLOWABLE: [ReturnKind; 8] = [
        ReturnKind::Boolean,
        ReturnKind::Null,
        ReturnKind::Absent,
        ReturnKind::Number,
        ReturnKind::String,
        ReturnKind::Atom,
        ReturnKind::Object,
        ReturnKind::Array,
    ];

    pub const fn is_allowable(self) -> bool {
        match self {
            Self::Boolean
            | Self::Null
            | Self::Absent
            | Self::Number
            | Self::String
            | Self::Atom
            | Self::Object
            | Self::Array => true,
            Self::Deferred | Self::Opaque => false,
        }
    }

    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Boolean => "boolean",
            Self::Null => "null",
            Self::Absent => "absent",
            Self::Number => "number",
            Self::String => "string",
            Self::Atom => "atom",
            Self::Object => "object",
            Self::Array => "array",
            Self::Deferred => "deferred",
            Self::Opaque => "opaque",
        }
    }
}

impl fmt::Display for ReturnKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What a registered handler returns.
pub enum Return {
    Bool(bool),
    Null,
    /// No value at all; written as `null`.
    Absent,
    Number(JsonNumber),
    String(String),
    /// Symbol-like identifier; written as its name.
    Atom(String),
    Object(JsonMap<String, JsonValue>),
    Array(Vec<JsonValue>),
    Deferred(Deferred),
    /// A host-only value with no wire form, labelled for diagnostics.
    Opaque(&'static str),
}

impl Return {
    pub fn deferred<F>(future: F) -> Self
    where
        F: Future<Output = Result<Return, Fault>> + Send + 'static,
    {
        Self::Deferred(Box::pin(future))
    }

    pub fn atom(name: impl Into<String>) -> Self {
        Self::Atom(name.into())
    }

    pub fn kind(&self) -> ReturnKind {
        match self {
            Self::Bool(_) => ReturnKind::Boolean,
            Self::Null => ReturnKind::Null,
            Self::Absent => ReturnKind::Absent,
            Self::Number(_) => ReturnKind::Number,
            Self::String(_) => ReturnKind::String,
            Self::Atom(_) => ReturnKind::Atom,
            Self::Object(_) => ReturnKind::Object,
            Self::Array(_) => ReturnKind::Array,
            Self::Deferred(_) => ReturnKind::Deferred,
            Self::Opaque(_) => ReturnKind::Opaque,
        }
    }

    /// Converts an allowable value to its wire form, handing back the kind
    /// otherwise.
    pub fn into_wire(self) -> Result<JsonValue, ReturnKind> {
        match self {
            Self::Bool(value) => Ok(JsonValue::Bool(value)),
            Self::Null | Self::Absent => Ok(JsonValue::Null),
            Self::Number(number) => Ok(JsonValue::Number(number)),
            Self::String(text) | Self::Atom(text) => Ok(JsonValue::String(text)),
            Self::Object(map) => Ok(JsonValue::Object(map)),
            Self::Array(values) => Ok(JsonValue::Array(values)),
            other @ (Self::Deferred(_) | Self::Opaque(_)) => Err(other.kind()),
        }
    }
}

impl fmt::Debug for Return {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Bool(value) => f.debug_tuple("Bool").field(value).finish(),
            Self::Null => f.write_str("Null"),
            Self::Absent => f.write_str("Absent"),
            Self::Number(number) => f.debug_tuple("Number").field(number).finish(),
            Self::String(text) => f.debug_tuple("String").field(text).finish(),
            Self::Atom(name) => f.debug_tuple("Atom").field(name).finish(),
            Self::Object(map) => f.debug_tuple("Object").field(map).finish(),
            Self::Array(values) => f.debug_tuple("Array").field(values).finish(),
            Self::Deferred(_) => f.write_str("Deferred(..)"),
            Self::Opaque(label) => f.debug_tuple("Opaque").field(label).finish(),
        }
    }
}

impl From<JsonValue> for Return {
    fn from(value: JsonValue) -> Self {
        match value {
            JsonValue::Null => Self::Null,
            JsonValue::Bool(value) => Self::Bool(value),
            JsonValue::Number(number) => Self::Number(number),
            JsonValue::String(text) => Self::String(text),
            JsonValue::Array(values) => Self::Array(values),
            JsonValue::Object(map) => Self::Object(map),
        }
    }
}

impl From<()> for Return {
    fn from(_: ()) -> Self {
        Self::Absent
    }
}

impl From<bool> for Return {
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}

impl From<i64> for Return {
    fn from(value: i64) -> Self {
        Self::Number(value.into())
    }
}

impl From<u64> for Return {
    fn from(value: u64) -> Self {
        Self::Number(value.into())
    }
}

impl From<f64> for Return {
    fn from(value: f64) -> Self {
        JsonNumber::from_f64(value).map_or(Self::Opaque("non-finite number"), Self::Number)
    }
}

impl From<&str> for Return {
    fn from(value: &str) -> Self {
        Self::String(value.to_string())
    }
}

impl From<String> for Return {
    fn from(value: String) -> Self {
        Self::String(value)
    }
}

/// A value raised by a handler, synchronously or through a deferred result.
#[derive(Clone, Debug, PartialEq)]
pub struct Fault(JsonValue);

impl Fault {
    /// A structured error with a name and a message.
    pub fn new(name: impl Into<String>, message: impl Into<String>) -> Self {
        Self(json!({ "name": name.into(), "message": message.into() }))
    }

    /// Any raised value, structured or not.
    pub fn value(value: JsonValue) -> Self {
        Self(value)
    }

    pub fn as_value(&self) -> &JsonValue {
        &self.0
    }

    /// Normalizes the raised value into an application error.
    ///
    /// `message` comes from `name`, then `error`, then defaults to `"Error"`.
    /// `data` comes from `message`, then `detail`, then `data`, then the JSON
    /// text of the whole value. Non-object values keep `"Error"` as message
    /// and carry their text (strings as-is) as data.
    pub fn to_rpc_error(&self) -> RpcError {
        match &self.0 {
            JsonValue::Object(map) => {
                let message = first_present(map, &["name", "error"])
                    .map(text_of)
                    .unwrap_or_else(|| "Error".to_string());
                let data = first_present(map, &["message", "detail", "data"])
                    .cloned()
                    .unwrap_or_else(|| JsonValue::String(self.0.to_string()));
                RpcError::application(message, data)
            }
            other => RpcError::application("Error", JsonValue::String(text_of(other))),
        }
    }
}

impl<E: std::error::Error> From<E> for Fault {
    fn from(err: E) -> Self {
        Self::new("Error", err.to_string())
    }
}

fn first_present<'a>(map: &'a JsonMap<String, JsonValue>, keys: &[&str]) -> Option<&'a JsonValue> {
    keys.iter().find_map(|key| map.get(*key).filter(|value| !value.is_null()))
}

fn text_of(value: &JsonValue) -> String {
    match value {
        JsonValue::String(text) => text.clone(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn allowable_set_excludes_deferred_and_opaque() {
        for kind in ReturnKind::ALLOWABLE {
            assert!(kind.is_allowable(), "{kind} should be allowable");
        }
        assert!(!ReturnKind::Deferred.is_allowable());
        assert!(!ReturnKind::Opaque.is_allowable());
    }

    #[test]
    fn wire_conversion_per_kind() {
        assert_eq!(Return::from(true).into_wire(), Ok(JsonValue::Bool(true)));
        assert_eq!(Return::Absent.into_wire(), Ok(JsonValue::Null));
        assert_eq!(Return::atom("ready").into_wire(), Ok(json!("ready")));
        assert_eq!(Return::from(4_i64).into_wire(), Ok(json!(4)));
        assert_eq!(Return::from(json!({"c": 101, "d": 202})).into_wire(), Ok(json!({"c": 101, "d": 202})));
        assert_eq!(Return::Opaque("window handle").into_wire(), Err(ReturnKind::Opaque));
    }

    #[test]
    fn non_finite_floats_are_opaque() {
        assert_eq!(Return::from(f64::NAN).kind(), ReturnKind::Opaque);
        assert_eq!(Return::from(1.5_f64).kind(), ReturnKind::Number);
    }

    #[tokio::test]
    async fn deferred_is_not_directly_writable() {
        let deferred = Return::deferred(async { Ok(Return::from(1_i64)) });
        assert_eq!(deferred.kind(), ReturnKind::Deferred);
        match deferred {
            Return::Deferred(future) => {
                let resolved = future.await.expect("resolves");
                assert_eq!(resolved.into_wire(), Ok(json!(1)));
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn named_fault_maps_name_to_message_and_message_to_data() {
        let error = Fault::new("Failed", "oops").to_rpc_error();
        assert_eq!(error.code, -32000);
        assert_eq!(error.message, "Failed");
        assert_eq!(error.data, json!("oops"));
    }

    #[test]
    fn fault_precedence_falls_through_candidate_fields() {
        let error = Fault::value(json!({"error": "Denied", "detail": {"why": "policy"}})).to_rpc_error();
        assert_eq!(error.message, "Denied");
        assert_eq!(error.data, json!({"why": "policy"}));

        let error = Fault::value(json!({"data": 5})).to_rpc_error();
        assert_eq!(error.message, "Error");
        assert_eq!(error.data, json!(5));

        let error = Fault::value(json!({"code": 7})).to_rpc_error();
        assert_eq!(error.message, "Error");
        assert_eq!(error.data, json!("{\"code\":7}"));
    }

    #[test]
    fn unstructured_fault_is_stringified() {
        let error = Fault::value(json!("plain")).to_rpc_error();
        assert_eq!((error.message.as_str(), error.data), ("Error", json!("plain")));

        let error = Fault::value(json!(42)).to_rpc_error();
        assert_eq!(error.data, json!("42"));
    }

    #[test]
    fn std_errors_convert_into_faults() {
        let parse_err = "x".parse::<i32>().expect_err("not a number");
        let error = Fault::from(parse_err).to_rpc_error();
        assert_eq!(error.message, "Error");
        assert_eq!(error.data, json!("invalid digit found in string"));
    }
}
