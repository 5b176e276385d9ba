//! Connection layer of the driver.
//!
//! ```text
//! BoltConnection (handle)
//!   └── I/O task
//!         ├── Framed<S, BoltMessageCodec>
//!         └── InboundDispatcher
//!               └── FIFO of ResponseHandler (one per request)
//! ```
//!
//! The handle never touches the socket. It queues a request together with
//! the handler that will receive its responses, and the I/O task writes the
//! request and feeds every inbound message to the handler at the head of the
//! queue.

pub mod connection;
pub mod dispatcher;
pub mod handlers;

#[cfg(test)]
pub(crate) mod test_support;

pub use connection::{BoltConnection, ConnectionConfig, ConnectionContext, ConnectionState, ResponseFuture};
pub use dispatcher::{InboundDispatcher, ResponseHandler};
pub use handlers::{
    BeginResponse, CommitResponse, DiscardResponse, HelloResponse, LogoffResponse, LogonResponse,
    PullResponse, ResetResponse, RollbackResponse, RunResponse, StreamSummary,
};

use crate::bolt::message::BoltAgent;

/// Client user agent string
pub const CLIENT_USER_AGENT: &str = concat!("bolt-client/", env!("CARGO_PKG_VERSION"));

/// Bolt agent sent in HELLO from Bolt 5.3 on.
pub fn default_bolt_agent() -> BoltAgent {
    BoltAgent {
        product: CLIENT_USER_AGENT.to_string(),
        platform: Some(format!("{}; {}", std::env::consts::OS, std::env::consts::ARCH)),
        language: Some("Rust".to_string()),
        language_details: option_env!("CARGO_PKG_RUST_VERSION")
            .filter(|v| !v.is_empty())
            .map(|v| format!("rustc >= {}", v)),
    }
}
