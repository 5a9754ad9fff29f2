//! # gRPC-Web Transcoding
//!
//! Everything needed to carry gRPC frames in an HTTP/1.1-compatible body:
//!
//! * [`WireMode`] / [`ContentKind`]: content-type negotiation between `application/grpc-web`
//!   and `application/grpc-web-text`.
//! * [`GrpcWebResponseStream`]: the response state machine separating data frames from the
//!   trailer frame.
//! * [`body`]: HTTP bodies applying the wire encoding in both directions.
//! * [`adapt_request`] / [`adapt_response`]: the content adapters used by the call driver.
mod adapter;
pub mod body;
mod mode;
pub mod response;

pub use adapter::{X_GRPC_WEB, adapt_request, adapt_response};
pub use body::{GrpcWebEncodeBody, ResponseBody, TextDecodeBody};
pub use mode::{ContentKind, WireMode};
pub(crate) use mode::content_types;
pub use response::{GrpcWebResponseStream, StreamState, encode_trailers, parse_trailers};
