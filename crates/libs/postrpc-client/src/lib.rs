//! Guest-side PostRPC client.
//!
//! Calls are correlated by a monotonically increasing id. Each pending call
//! is completed exactly once: by the matching response, or by the timeout
//! sweep once its deadline has passed. Published events are routed to one
//! subscriber per event name.

pub mod clock;
pub mod config;
pub mod pending;
pub mod subscriptions;
mod client;
mod sweeper;

pub use client::{Client, CLIENT_NAME};
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{ClientConfig, DEFAULT_SWEEP_INTERVAL_MS, DEFAULT_TIMEOUT_MS};
pub use pending::{CallRegistry, CallResult, Callback, PendingCall, PendingReply, Resolution};
pub use subscriptions::{Subscriber, Subscriptions};
