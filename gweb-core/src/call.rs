//! # RPC Call Lifecycle
//!
//! A call moves through `Created → Sending → HeadersReceived → Streaming → Finished`, or ends
//! early as `Cancelled` / `DeadlineExceeded`, and is `Disposed` once dropped.
//!
//! * [`CallInvoker`] starts calls in the four RPC shapes over any
//!   [`tonic::client::GrpcService`].
//! * [`Call`] reads the response: headers, messages in order, then the cached final status
//!   and trailing metadata.
//! * [`RequestSink`] writes the request stream of client-streaming and duplex calls.
//! * [`CallState`] owns the deadline timer and the cancellation signal shared by both halves.
//!
//! ## Example
//!
//! ```rust,no_run
//! use gweb_core::call::{CallInvoker, CallOptions};
//! use gweb_core::codec::JsonCodec;
//! use http::uri::PathAndQuery;
//! use std::time::Duration;
//!
//! # async fn run(
//! #     channel: tonic::transport::Channel,
//! #     codec: JsonCodec,
//! # ) -> Result<(), Box<dyn std::error::Error>> {
//! let invoker = CallInvoker::new(channel);
//! let options = CallOptions::new().with_timeout(Duration::from_secs(5));
//! let path = PathAndQuery::from_static("/echo.EchoService/UnaryEcho");
//!
//! let mut call = invoker.unary(path, codec, serde_json::json!({ "message": "hi" }), options)?;
//! let reply = call.response().await?;
//! println!("{reply} ({:?})", call.status()?.code());
//! # Ok(())
//! # }
//! ```
mod invoker;
mod options;
mod state;
pub mod status;
mod streaming;

pub use invoker::CallInvoker;
pub use options::{CallOptions, ClientConfig, DEFAULT_MAX_RECEIVE_MESSAGE_SIZE};
pub use state::{CallPhase, CallState, Cancellation};
pub use streaming::{Call, RequestSink};
