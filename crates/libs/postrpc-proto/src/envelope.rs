use serde::{Deserialize, Serialize};
use serde_json::{Map as JsonMap, Value as JsonValue};

use crate::error::{ErrorCode, RpcError};

pub const JSONRPC_VERSION: &str = "2.0";

/// Correlation id allocated by the calling side.
pub type CallId = u64;

/// Id as it appears on the wire. Responses echo whatever the request carried;
/// pre-dispatch failures and events use `Null`.
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RequestId {
    Number(CallId),
    Text(String),
    #[default]
    Null,
}

impl RequestId {
    /// Lenient extraction from an arbitrary (possibly malformed) message.
    pub fn from_value(value: Option<&JsonValue>) -> Self {
        match value {
            Some(JsonValue::Number(number)) => number.as_u64().map_or(Self::Null, Self::Number),
            Some(JsonValue::String(text)) => Self::Text(text.clone()),
            _ => Self::Null,
        }
    }

    /// The id usable for correlation, if any. Zero never correlates.
    pub fn as_call_id(&self) -> Option<CallId> {
        match self {
            Self::Number(id) if *id != 0 => Some(*id),
            _ => None,
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }
}

impl From<CallId> for RequestId {
    fn from(id: CallId) -> Self {
        Self::Number(id)
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Request {
    pub jsonrpc: String,
    pub method: String,
    #[serde(default, alias = "params", skip_serializing_if = "Option::is_none")]
    pub args: Option<JsonValue>,
    #[serde(default)]
    pub id: RequestId,
}

impl Request {
    pub fn new(method: impl Into<String>, args: Option<JsonValue>, id: CallId) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            method: method.into(),
            args,
            id: RequestId::Number(id),
        }
    }

    /// Reads a request out of an arbitrary JSON value without judging it.
    ///
    /// Missing or non-string `jsonrpc`/`method` members become empty strings so
    /// that validation can report them with the original id attached.
    pub fn from_value(value: &JsonValue) -> Result<Self, Malformed> {
        let object = value.as_object().ok_or(Malformed::NotAnObject)?;
        Ok(Self {
            jsonrpc: string_member(object, "jsonrpc"),
            method: string_member(object, "method"),
            args: object.get("args").or_else(|| object.get("params")).cloned(),
            id: RequestId::from_value(object.get("id")),
        })
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Success {
    pub jsonrpc: String,
    pub result: JsonValue,
    pub id: RequestId,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Failure {
    pub jsonrpc: String,
    pub error: RpcError,
    pub id: RequestId,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Event {
    pub jsonrpc: String,
    pub result: JsonValue,
    pub event: String,
    /// Only ever populated on inbound events from peers that attach one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<RpcError>,
    pub id: RequestId,
}

/// One complete wire message.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Envelope {
    Request(Request),
    Success(Success),
    Failure(Failure),
    Event(Event),
}

/// Why an inbound message could not be classified as an envelope.
#[derive(Clone, Debug, PartialEq, thiserror::Error)]
pub enum Malformed {
    #[error("message is not a JSON object")]
    NotAnObject,
    #[error("message has no method, event, result or error member")]
    Unclassified { id: RequestId },
    #[error("error member is not a {{code, message, data}} object")]
    BadError { id: RequestId },
}

impl Malformed {
    pub fn id(&self) -> RequestId {
        match self {
            Self::NotAnObject => RequestId::Null,
            Self::Unclassified { id } | Self::BadError { id } => id.clone(),
        }
    }
}

impl Envelope {
    pub fn request(method: impl Into<String>, args: Option<JsonValue>, id: CallId) -> Self {
        Self::Request(Request::new(method, args, id))
    }

    pub fn success(result: JsonValue, id: RequestId) -> Self {
        Self::Success(Success { jsonrpc: JSONRPC_VERSION.to_string(), result, id })
    }

    pub fn failure(error: RpcError, id: RequestId) -> Self {
        Self::Failure(Failure { jsonrpc: JSONRPC_VERSION.to_string(), error, id })
    }

    /// Failure carrying the canonical message and data for `code`.
    pub fn error_code(code: ErrorCode, id: RequestId) -> Self {
        Self::failure(RpcError::from_code(code), id)
    }

    pub fn event(name: impl Into<String>, result: JsonValue) -> Self {
        Self::Event(Event {
            jsonrpc: JSONRPC_VERSION.to_string(),
            result,
            event: name.into(),
            error: None,
            id: RequestId::Null,
        })
    }

    pub fn id(&self) -> &RequestId {
        match self {
            Self::Request(request) => &request.id,
            Self::Success(success) => &success.id,
            Self::Failure(failure) => &failure.id,
            Self::Event(event) => &event.id,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Self::Request(_) => "request",
            Self::Success(_) => "success",
            Self::Failure(_) => "failure",
            Self::Event(_) => "event",
        }
    }

    /// Classifies an inbound JSON value.
    ///
    /// `method` wins over everything else, then `event`, then `error`; anything
    /// left with an `id` or `result` is a success. A terminal response with
    /// neither `result` nor `error` resolves with `null`.
    pub fn from_value(value: &JsonValue) -> Result<Self, Malformed> {
        let object = value.as_object().ok_or(Malformed::NotAnObject)?;
        let id = RequestId::from_value(object.get("id"));

        if object.contains_key("method") {
            return Request::from_value(value).map(Self::Request);
        }

        if let Some(JsonValue::String(name)) = object.get("event") {
            let error = match object.get("error") {
                None | Some(JsonValue::Null) => None,
                Some(raw) => Some(parse_error(raw, &id)?),
            };
            return Ok(Self::Event(Event {
                jsonrpc: string_member(object, "jsonrpc"),
                result: object.get("result").cloned().unwrap_or(JsonValue::Null),
                event: name.clone(),
                error,
                id,
            }));
        }

        match object.get("error") {
            None | Some(JsonValue::Null) => {}
            Some(raw) => {
                let error = parse_error(raw, &id)?;
                return Ok(Self::Failure(Failure {
                    jsonrpc: string_member(object, "jsonrpc"),
                    error,
                    id,
                }));
            }
        }

        if object.contains_key("result") || object.contains_key("id") {
            return Ok(Self::Success(Success {
                jsonrpc: string_member(object, "jsonrpc"),
                result: object.get("result").cloned().unwrap_or(JsonValue::Null),
                id,
            }));
        }

        Err(Malformed::Unclassified { id })
    }

    /// Parses and classifies raw text. Unparseable text is an `Err(Codec)`.
    pub fn from_text(text: &str) -> Result<Result<Self, Malformed>, serde_json::Error> {
        serde_json::from_str::<JsonValue>(text).map(|value| Self::from_value(&value))
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Result<Self, Malformed>, serde_json::Error> {
        serde_json::from_slice::<JsonValue>(bytes).map(|value| Self::from_value(&value))
    }

    pub fn to_value(&self) -> serde_json::Result<JsonValue> {
        serde_json::to_value(self)
    }

    pub fn to_vec(&self) -> serde_json::Result<Vec<u8>> {
        serde_json::to_vec(self)
    }
}

fn string_member(object: &JsonMap<String, JsonValue>, key: &str) -> String {
    object.get(key).and_then(JsonValue::as_str).unwrap_or_default().to_string()
}

fn parse_error(raw: &JsonValue, id: &RequestId) -> Result<RpcError, Malformed> {
    serde_json::from_value(raw.clone()).map_err(|_| Malformed::BadError { id: id.clone() })
}
