//! Host-side PostRPC server.
//!
//! The server owns a table of named methods and answers JSON-RPC 2.0 style
//! requests from a sandboxed child context:
//!
//! - [`MethodRegistry`] stores methods with their declared parameters
//! - [`dispatch`] validates a request, maps its arguments, invokes the handler
//!   and shapes the response
//! - [`Server`] ties both to a [`Transport`](postrpc_proto::Transport), filters
//!   inbound messages by origin and sender, and publishes events

pub mod config;
pub mod dispatch;
pub mod registry;
mod server;

pub use config::{PublishMode, ServerConfig};
pub use dispatch::{dispatch, validate, Dispatched, RESERVED_PREFIX};
pub use registry::{handler_fn, Handler, MethodDescriptor, MethodRegistry, RegisteredMethod};
pub use server::{Server, SERVER_NAME};
