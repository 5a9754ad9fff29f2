//! # gRPC-Web Server Layer
//!
//! [`GrpcWebLayer`] puts a native gRPC service (for example a `tonic` generated server) behind
//! the gRPC-Web wire format:
//!
//! 1. `application/grpc-web[-text][+proto]` requests are rewritten as `application/grpc`; text
//!    mode bodies are base64-decoded on the fly.
//! 2. The native response (data frames + HTTP trailers) is re-encoded with the trailers embedded
//!    as the final trailer frame, base64-encoded again for text mode clients.
//!
//! Requests that are not gRPC-Web pass through untouched.
//!
//! ```rust,no_run
//! # fn wrap<S>(inner: S) {
//! use gweb_core::server::GrpcWebLayer;
//! use tower::Layer;
//!
//! let service = GrpcWebLayer::new().layer(inner);
//! # }
//! ```
use crate::BoxError;
use crate::web::{ContentKind, GrpcWebEncodeBody, TextDecodeBody, WireMode, X_GRPC_WEB, content_types};
use bytes::Bytes;
use http::header::{CONTENT_LENGTH, CONTENT_TYPE};
use http::{HeaderValue, Request, Response, Version};
use http_body::Body;
use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};
use tower::{Layer, Service};

type BoxFuture<T, E> = Pin<Box<dyn Future<Output = Result<T, E>> + Send>>;

/// Layer applying [`GrpcWebService`].
#[derive(Debug, Clone, Copy, Default)]
pub struct GrpcWebLayer {
    _priv: (),
}

impl GrpcWebLayer {
    pub fn new() -> Self {
        Self::default()
    }
}

impl<S> Layer<S> for GrpcWebLayer {
    type Service = GrpcWebService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        GrpcWebService::new(inner)
    }
}

/// Translates gRPC-Web requests for a native gRPC service.
#[derive(Debug, Clone)]
pub struct GrpcWebService<S> {
    inner: S,
}

impl<S> GrpcWebService<S> {
    pub fn new(inner: S) -> Self {
        Self { inner }
    }

    pub fn get_ref(&self) -> &S {
        &self.inner
    }
}

impl<S, B, ResBody> Service<Request<B>> for GrpcWebService<S>
where
    S: Service<Request<tonic::body::Body>, Response = Response<ResBody>>,
    S::Future: Send + 'static,
    B: Body<Data = Bytes> + Send + 'static,
    B::Error: Into<BoxError>,
    ResBody: Body<Data = Bytes> + Send + 'static,
    ResBody::Error: Into<BoxError>,
{
    type Response = Response<tonic::body::Body>;
    type Error = S::Error;
    type Future = BoxFuture<Self::Response, Self::Error>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, request: Request<B>) -> Self::Future {
        let Some(mode) = ContentKind::from_headers(request.headers()).and_then(ContentKind::wire_mode)
        else {
            let future = self.inner.call(request.map(tonic::body::Body::new));
            return Box::pin(async move { Ok(future.await?.map(tonic::body::Body::new)) });
        };

        let (mut parts, body) = request.into_parts();
        tracing::debug!(path = parts.uri.path(), ?mode, "translating gRPC-Web request");

        parts
            .headers
            .insert(CONTENT_TYPE, HeaderValue::from_static(content_types::GRPC));
        parts.headers.remove(CONTENT_LENGTH);
        parts.headers.remove(X_GRPC_WEB);
        parts.version = Version::HTTP_2;

        let body = tonic::body::Body::new(body);
        let body = match mode {
            WireMode::Binary => body,
            WireMode::Text => tonic::body::Body::new(TextDecodeBody::new(body)),
        };

        let future = self.inner.call(Request::from_parts(parts, body));
        Box::pin(async move {
            let response = future.await?;
            Ok(encode_response(response, mode))
        })
    }
}

/// Re-encodes a native gRPC response for a gRPC-Web client.
fn encode_response<B>(response: Response<B>, mode: WireMode) -> Response<tonic::body::Body>
where
    B: Body<Data = Bytes> + Send + 'static,
    B::Error: Into<BoxError>,
{
    let (mut parts, body) = response.into_parts();
    let body = tonic::body::Body::new(body);

    // Anything that is not a gRPC response (e.g. a routing error) is forwarded as is.
    if ContentKind::from_headers(&parts.headers) != Some(ContentKind::Grpc) {
        return Response::from_parts(parts, body);
    }

    parts.headers.insert(CONTENT_TYPE, mode.content_type_header());
    parts.headers.remove(CONTENT_LENGTH);

    let body = GrpcWebEncodeBody::response(body, mode);
    Response::from_parts(parts, tonic::body::Body::new(body))
}
