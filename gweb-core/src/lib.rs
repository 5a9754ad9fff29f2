//! # Gweb Core
//!
//! `gweb-core` lets a `tonic`-compatible HTTP stack speak gRPC-Web. It carries the
//! gRPC message framing over HTTP/1.1 or HTTP/2 bodies, including the base64
//! `grpc-web-text` variant, and drives RPC calls over any transport implementing
//! [`tonic::client::GrpcService`].
//!
//! ## Key Components
//!
//! * **[`framing`]:** The 5-byte gRPC message header (compression flag + big-endian length).
//! * **[`base64`]:** Streaming base64 encoder/decoder working on arbitrarily chunked input.
//! * **[`web`]:** The gRPC-Web response stream state machine, which separates data frames
//!   from the trailer frame, and the request/response content adapters.
//! * **[`call`]:** The call lifecycle driver ([`call::CallInvoker`]) with deadline and
//!   cancellation handling and the four RPC call shapes.
//! * **[`client::GrpcWebClient`]:** A dynamic client exchanging `serde_json::Value` payloads.
//! * **[`server::GrpcWebLayer`]:** A tower layer translating gRPC-Web requests for a native
//!   gRPC service.
//!
//! ## Data flow
//!
//! Outbound: message → [`codec::Codec`] → [`framing`] header → (text mode) base64 encoder → transport.
//!
//! Inbound: transport → (text mode) base64 decoder → response stream state machine →
//! [`framing::FrameDecoder`] → message, or parsed trailing metadata.
//!
//! ## Re-exports
//!
//! This crate re-exports `prost`, `prost-reflect`, and `tonic` to ensure that consumers
//! use compatible versions of these underlying dependencies.
pub mod base64;
pub mod call;
pub mod client;
pub mod codec;
pub mod compression;
pub mod error;
pub mod framing;
pub mod pool;
pub mod server;
pub mod web;

#[cfg(test)]
pub(crate) mod test_util;

// Re-exports
pub use prost;
pub use prost_reflect;
pub use tonic;

pub use call::{CallInvoker, CallOptions, ClientConfig};
pub use error::{CallError, ProtocolError};
pub use web::WireMode;

/// Type alias for the standard boxed error used in generic bounds.
pub(crate) type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;
