//! # Bolt Protocol Implementation
//!
//! Low-level client side of the Bolt protocol.
//!
//! ## Overview
//!
//! - **PackStream** - Binary serialization format for all data types
//! - **Message Types** - Request packing and response decoding
//! - **Handshake** - Protocol version negotiation
//! - **Codec** - Chunked message framing for Tokio
//!
//! ## Protocol Versions
//!
//! Bolt 5.1 through 5.4 are negotiated. They share one message layout:
//! authentication is split from HELLO into LOGON/LOGOFF, and date-times are
//! transmitted UTC-based.
//!
//! ## Submodules
//!
//! - [`packstream`] - Binary serialization/deserialization
//! - [`message`] - Bolt message types (HELLO, RUN, PULL, etc.)
//! - [`handshake`] - Version negotiation
//! - [`codec`] - Tokio codec for async I/O
//! - [`error`] - Protocol error types
//!
//! ## Note
//!
//! Most users should use the high-level [`crate::driver`] module instead of
//! interacting with the Bolt protocol directly.

pub mod codec;
pub mod error;
pub mod handshake;
pub mod message;
pub mod packstream;

pub use codec::{BoltCodec, BoltMessageCodec, ChunkedOutput};
pub use error::{BoltError, BoltResult, HandshakeError};
pub use handshake::{BoltVersion, BOLT_MAGIC};
pub use message::{
    AccessMode, AuthToken, BoltAgent, BoltRequest, BoltResponse, FailureMessage, SuccessMessage,
    TransactionMetadataBuilder, TransactionType,
};
pub use packstream::{PackStreamDecoder, PackStreamEncoder, PackStreamError, PackStreamStructure, PackStreamValue};
