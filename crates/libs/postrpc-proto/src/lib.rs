//! Wire-level building blocks shared by the PostRPC server and client.
//!
//! A privileged host context and a sandboxed guest context can only exchange
//! opaque messages. This crate defines what those messages look like and the
//! pure helpers both sides use to interpret them:
//!
//! - **Envelopes** ([`Envelope`]) for requests, successes, failures and events
//! - **Error codes** ([`ErrorCode`], [`RpcError`]) matching the JSON-RPC 2.0 table
//! - **Argument mapping** ([`map_args`]) from positional or named arguments
//! - **Return classification** ([`Return`], [`ReturnKind`]) and thrown-error
//!   normalization ([`Fault`])
//! - **Transport contract** ([`Transport`]) consumed as a black-box channel

pub mod args;
pub mod envelope;
pub mod error;
pub mod transport;
pub mod value;

pub use args::{map_args, Param, TypeTag};
pub use envelope::{
    CallId, Envelope, Event, Failure, Malformed, Request, RequestId, Success, JSONRPC_VERSION,
};
pub use error::{ConfigError, ErrorCode, PostRpcError, RpcError};
pub use transport::{origin_matches, ContextId, Transport, ANY_ORIGIN};
pub use value::{Deferred, Fault, Return, ReturnKind};
