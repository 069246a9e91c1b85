use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

/// The fixed error-code table shared with every peer implementation.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ErrorCode {
    ParseError,
    InvalidRequest,
    MethodNotFound,
    InvalidArgs,
    InternalError,
    InvalidReturn,
    Timeout,
    Application,
}

impl ErrorCode {
    pub const ALL: [ErrorCode; 8] = [
        ErrorCode::ParseError,
        ErrorCode::InvalidRequest,
        ErrorCode::MethodNotFound,
        ErrorCode::InvalidArgs,
        ErrorCode::InternalError,
        ErrorCode::InvalidReturn,
        ErrorCode::Timeout,
        ErrorCode::Application,
    ];

    pub const fn code(self) -> i64 {
        match self {
            Self::ParseError => -32700,
            Self::InvalidRequest => -32600,
            Self::MethodNotFound => -32601,
            Self::InvalidArgs => -32602,
            Self::InternalError => -32603,
            Self::InvalidReturn => -32604,
            Self::Timeout => -32001,
            Self::Application => -32000,
        }
    }

    pub fn from_code(code: i64) -> Option<Self> {
        Self::ALL.into_iter().find(|candidate| candidate.code() == code)
    }

    pub const fn message(self) -> &'static str {
        match self {
            Self::ParseError => "Parse error",
            Self::InvalidRequest => "Invalid request",
            Self::MethodNotFound => "Method not found",
            Self::InvalidArgs => "Invalid args",
            Self::InternalError => "Internal error",
            Self::InvalidReturn => "Invalid return",
            Self::Timeout => "Timeout",
            Self::Application => "Error",
        }
    }

    /// Canonical `data` text. Application errors carry handler-provided data instead.
    pub const fn data(self) -> &'static str {
        match self {
            Self::ParseError => "Invalid JSON was received by the server",
            Self::InvalidRequest => "The JSON sent is not a valid request object",
            Self::MethodNotFound => "The method does not exist / is not available",
            Self::InvalidArgs => "Invalid method argument(s)",
            Self::InternalError => "Internal JSON-RPC server error",
            Self::InvalidReturn => "Invalid method return type",
            Self::Timeout => "The server didn't respond to request within timeframe allowed",
            Self::Application => "",
        }
    }
}

/// The `error` member of a failure envelope.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize, thiserror::Error)]
#[error("{message} ({code})")]
pub struct RpcError {
    pub code: i64,
    pub message: String,
    #[serde(default)]
    pub data: JsonValue,
}

impl RpcError {
    pub fn new(code: i64, message: impl Into<String>, data: JsonValue) -> Self {
        Self { code, message: message.into(), data }
    }

    /// Builds the canonical error for a table entry.
    pub fn from_code(code: ErrorCode) -> Self {
        Self::new(code.code(), code.message(), JsonValue::String(code.data().to_string()))
    }

    pub fn application(message: impl Into<String>, data: JsonValue) -> Self {
        Self::new(ErrorCode::Application.code(), message, data)
    }

    pub fn timeout() -> Self {
        Self::from_code(ErrorCode::Timeout)
    }

    /// Internal error raised on the calling side rather than by the server.
    pub fn client_internal() -> Self {
        Self::new(
            ErrorCode::InternalError.code(),
            ErrorCode::InternalError.message(),
            JsonValue::String("Internal JSON-RPC client error".to_string()),
        )
    }

    pub fn kind(&self) -> Option<ErrorCode> {
        ErrorCode::from_code(self.code)
    }

    pub fn is_timeout(&self) -> bool {
        self.code == ErrorCode::Timeout.code()
    }
}

impl From<ErrorCode> for RpcError {
    fn from(code: ErrorCode) -> Self {
        Self::from_code(code)
    }
}

/// Errors raised locally at a call site, never sent over the wire.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum PostRpcError {
    #[error("{role} is not running")]
    NotRunning { role: &'static str },

    #[error("invalid call: {message}")]
    InvalidCall { message: String },

    #[error("codec error: {0}")]
    Codec(#[from] serde_json::Error),

    #[error("transport error: {message}")]
    Transport { message: String },
}

impl PostRpcError {
    pub fn not_running(role: &'static str) -> Self {
        Self::NotRunning { role }
    }

    pub fn invalid_call(message: impl Into<String>) -> Self {
        Self::InvalidCall { message: message.into() }
    }
}

/// Errors loading or validating a server/client configuration.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum ConfigError {
    #[error("config io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("config parse error: {message}")]
    Parse { message: String },

    #[error("invalid config: {message}")]
    Invalid { message: String },
}

impl ConfigError {
    pub fn invalid(message: impl Into<String>) -> Self {
        Self::Invalid { message: message.into() }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn error_codes_match_the_interop_table() {
        let table: Vec<(i64, &str)> =
            ErrorCode::ALL.iter().map(|code| (code.code(), code.message())).collect();
        assert_eq!(
            table,
            vec![
                (-32700, "Parse error"),
                (-32600, "Invalid request"),
                (-32601, "Method not found"),
                (-32602, "Invalid args"),
                (-32603, "Internal error"),
                (-32604, "Invalid return"),
                (-32001, "Timeout"),
                (-32000, "Error"),
            ]
        );
        for code in ErrorCode::ALL {
            assert_eq!(ErrorCode::from_code(code.code()), Some(code));
        }
        assert_eq!(ErrorCode::from_code(-1), None);
    }

    #[test]
    fn canonical_error_serializes_code_message_data() {
        let value = serde_json::to_value(RpcError::from_code(ErrorCode::MethodNotFound))
            .expect("serialize");
        assert_eq!(
            value,
            json!({
                "code": -32601,
                "message": "Method not found",
                "data": "The method does not exist / is not available"
            })
        );
    }

    #[test]
    fn missing_data_deserializes_as_null() {
        let error: RpcError =
            serde_json::from_value(json!({"code": -32000, "message": "Failed"})).expect("parse");
        assert_eq!(error.data, JsonValue::Null);
        assert_eq!(error.kind(), Some(ErrorCode::Application));
    }

    #[test]
    fn timeout_error_is_flagged() {
        let error = RpcError::timeout();
        assert!(error.is_timeout());
        assert_eq!(error.to_string(), "Timeout (-32001)");
        assert!(!RpcError::client_internal().is_timeout());
    }
}
