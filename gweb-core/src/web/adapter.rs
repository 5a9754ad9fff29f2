use super::body::{GrpcWebEncodeBody, ResponseBody};
use super::mode::{ContentKind, WireMode};
use crate::pool::BufferPool;
use http::header::{CONTENT_LENGTH, CONTENT_TYPE};
use http::{HeaderValue, Request, Response, Version};
use http_body::Body;

/// Header announcing a gRPC-Web request to intermediaries.
pub const X_GRPC_WEB: &str = "x-grpc-web";

/// Prepares an outgoing request body of gRPC frames for the gRPC-Web wire.
///
/// Sets `content-type` for `mode`. `content-length` is set to the wire length when the body
/// length is known up front (base64-expanded in text mode) and removed otherwise.
pub fn adapt_request<B>(request: Request<B>, mode: WireMode) -> Request<tonic::body::Body>
where
    B: Body<Data = bytes::Bytes> + Unpin + Send + 'static,
    B::Error: Into<crate::BoxError>,
{
    let (mut parts, body) = request.into_parts();
    let body = GrpcWebEncodeBody::request(body, mode);

    parts.headers.insert(CONTENT_TYPE, mode.content_type_header());
    parts
        .headers
        .insert(X_GRPC_WEB, HeaderValue::from_static("1"));

    match body.size_hint().exact() {
        Some(len) => {
            parts.headers.insert(CONTENT_LENGTH, HeaderValue::from(len));
        }
        None => {
            parts.headers.remove(CONTENT_LENGTH);
        }
    }

    Request::from_parts(parts, tonic::body::Body::new(body))
}

/// Normalizes a response for the call driver.
///
/// gRPC-Web responses (by `content-type`) get their body wrapped in the base64 decoder (text
/// mode) and the response state machine, so that the trailer frame surfaces as HTTP trailers.
/// Their `content-length` no longer applies and is removed. Every response is reported as
/// `HTTP/2.0`. Other responses keep their body untouched. A gRPC-Web trailer frame longer than
/// `max_receive_message_size` fails the body with `RESOURCE_EXHAUSTED`.
pub fn adapt_response(
    response: Response<tonic::body::Body>,
    pool: &BufferPool,
    max_receive_message_size: usize,
) -> Response<ResponseBody> {
    let (mut parts, body) = response.into_parts();
    parts.version = Version::HTTP_2;

    let body = match ContentKind::from_headers(&parts.headers).and_then(ContentKind::wire_mode) {
        Some(mode) => {
            parts.headers.remove(CONTENT_LENGTH);
            ResponseBody::grpc_web(body, mode, pool, max_receive_message_size)
        }
        None => ResponseBody::grpc(body),
    };

    Response::from_parts(parts, body)
}
