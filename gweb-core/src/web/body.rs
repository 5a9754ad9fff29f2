use super::WireMode;
use super::response::{GrpcWebResponseStream, encode_trailers};
use crate::BoxError;
use crate::base64::{Base64Decoder, EncoderState, decode_groups, encoded_len};
use crate::error::ProtocolError;
use crate::framing::encode_trailer_frame;
use crate::pool::BufferPool;
use bytes::{Bytes, BytesMut};
use futures_util::{Stream, TryStreamExt};
use http_body::{Body, Frame, SizeHint};
use http_body_util::BodyExt;
use std::io;
use std::pin::Pin;
use std::task::{Context, Poll, ready};
use tokio::io::{AsyncRead, ReadBuf};
use tokio_util::io::{StreamReader, poll_read_buf};

/// Read size used when pulling data frames out of a gRPC-Web response.
const RESPONSE_CHUNK_SIZE: usize = 8 * 1024;

/// What [`GrpcWebEncodeBody`] does with the HTTP trailers of its inner body.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TrailerHandling {
    /// Requests carry no trailers.
    Drop,
    /// Responses embed them as the final trailer frame.
    Embed,
}

/// Encodes a body of gRPC frames for the gRPC-Web wire.
///
/// In [`WireMode::Binary`] data passes through untouched. In [`WireMode::Text`] the body is
/// base64-encoded. A body of known length is encoded as one stream, padded once at the end, so
/// its wire length is exactly [`encoded_len`]. Streamed bodies pad after every chunk: the peer
/// can then decode each message as soon as it arrives.
#[derive(Debug)]
pub struct GrpcWebEncodeBody<B> {
    inner: B,
    mode: WireMode,
    encoder: EncoderState,
    trailers: TrailerHandling,
    pad_each_chunk: bool,
    done: bool,
}

impl<B: Body> GrpcWebEncodeBody<B> {
    /// Wraps an outgoing request body. Trailers of the inner body are ignored.
    pub fn request(inner: B, mode: WireMode) -> Self {
        let pad_each_chunk = inner.size_hint().exact().is_none();
        Self::new(inner, mode, TrailerHandling::Drop, pad_each_chunk)
    }

    /// Wraps a native gRPC response body; its HTTP trailers become the trailer frame.
    pub fn response(inner: B, mode: WireMode) -> Self {
        Self::new(inner, mode, TrailerHandling::Embed, true)
    }
}

impl<B> GrpcWebEncodeBody<B> {
    fn new(inner: B, mode: WireMode, trailers: TrailerHandling, pad_each_chunk: bool) -> Self {
        Self {
            inner,
            mode,
            encoder: EncoderState::new(),
            trailers,
            pad_each_chunk,
            done: false,
        }
    }

    fn encode(&mut self, data: Bytes) -> Bytes {
        match self.mode {
            WireMode::Binary => data,
            WireMode::Text => {
                let mut out = BytesMut::with_capacity(encoded_len(data.len() as u64 + 2) as usize);
                self.encoder.encode(&data, &mut out);
                if self.pad_each_chunk {
                    self.encoder.finish(&mut out);
                }
                out.freeze()
            }
        }
    }

    fn finish(&mut self) -> Bytes {
        let mut out = BytesMut::new();
        self.encoder.finish(&mut out);
        out.freeze()
    }
}

impl<B> Body for GrpcWebEncodeBody<B>
where
    B: Body<Data = Bytes> + Unpin,
{
    type Data = Bytes;
    type Error = B::Error;

    fn poll_frame(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
    ) -> Poll<Option<Result<Frame<Self::Data>, Self::Error>>> {
        let this = self.get_mut();

        loop {
            if this.done {
                return Poll::Ready(None);
            }

            let frame = match ready!(Pin::new(&mut this.inner).poll_frame(cx)) {
                Some(Ok(frame)) => frame,
                Some(Err(err)) => return Poll::Ready(Some(Err(err))),
                None => {
                    this.done = true;
                    let tail = this.finish();
                    if tail.is_empty() {
                        return Poll::Ready(None);
                    }
                    return Poll::Ready(Some(Ok(Frame::data(tail))));
                }
            };

            let frame = match frame.into_data() {
                Ok(data) => {
                    let out = this.encode(data);
                    if out.is_empty() {
                        continue;
                    }
                    return Poll::Ready(Some(Ok(Frame::data(out))));
                }
                Err(frame) => frame,
            };

            let Ok(trailers) = frame.into_trailers() else {
                continue;
            };
            if this.trailers == TrailerHandling::Drop {
                continue;
            }

            let mut framed = BytesMut::new();
            encode_trailer_frame(&mut framed, &encode_trailers(&trailers));

            let encoded = this.encode(framed.freeze());
            let tail = this.finish();
            let mut out = BytesMut::with_capacity(encoded.len() + tail.len());
            out.extend_from_slice(&encoded);
            out.extend_from_slice(&tail);
            this.done = true;
            return Poll::Ready(Some(Ok(Frame::data(out.freeze()))));
        }
    }

    fn is_end_stream(&self) -> bool {
        self.done || (self.inner.is_end_stream() && self.encoder.residue().is_empty())
    }

    fn size_hint(&self) -> SizeHint {
        if self.trailers == TrailerHandling::Embed {
            return SizeHint::default();
        }
        let inner = self.inner.size_hint();
        match (self.mode, inner.exact()) {
            (WireMode::Binary, _) => inner,
            (WireMode::Text, Some(n)) => SizeHint::with_exact(encoded_len(n)),
            (WireMode::Text, None) => SizeHint::default(),
        }
    }
}

/// Decodes a `grpc-web-text` body back into binary frames.
///
/// Characters of an incomplete 4-character group are held until the next chunk. A body ending
/// with held characters is a [`ProtocolError::TruncatedBase64`].
#[derive(Debug)]
pub struct TextDecodeBody<B> {
    inner: B,
    held: BytesMut,
}

impl<B> TextDecodeBody<B> {
    pub fn new(inner: B) -> Self {
        Self {
            inner,
            held: BytesMut::new(),
        }
    }
}

impl<B> Body for TextDecodeBody<B>
where
    B: Body<Data = Bytes> + Unpin,
    B::Error: Into<BoxError>,
{
    type Data = Bytes;
    type Error = tonic::Status;

    fn poll_frame(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
    ) -> Poll<Option<Result<Frame<Self::Data>, Self::Error>>> {
        let this = self.get_mut();

        loop {
            let frame = match ready!(Pin::new(&mut this.inner).poll_frame(cx)) {
                Some(Ok(frame)) => frame,
                Some(Err(err)) => return Poll::Ready(Some(Err(tonic::Status::from_error(err.into())))),
                None if this.held.is_empty() => return Poll::Ready(None),
                None => {
                    let err = ProtocolError::TruncatedBase64(this.held.len());
                    this.held.clear();
                    return Poll::Ready(Some(Err(err.into())));
                }
            };

            let data = match frame.into_data() {
                Ok(data) => data,
                Err(frame) => return Poll::Ready(Some(Ok(frame))),
            };

            this.held.extend_from_slice(&data);
            let groups = this.held.len() / 4 * 4;
            if groups == 0 {
                continue;
            }

            let encoded = this.held.split_to(groups);
            let mut out = BytesMut::zeroed(groups / 4 * 3);
            let n = decode_groups(&encoded, &mut out)?;
            out.truncate(n);
            return Poll::Ready(Some(Ok(Frame::data(out.freeze()))));
        }
    }

    fn is_end_stream(&self) -> bool {
        self.inner.is_end_stream() && self.held.is_empty()
    }
}

type BodyStream = Pin<Box<dyn Stream<Item = io::Result<Bytes>> + Send>>;
type BodyReader = StreamReader<BodyStream, Bytes>;

/// The byte source under the response state machine: the raw body, base64-decoded in text mode.
enum Source {
    Binary(BodyReader),
    Text(Base64Decoder<BodyReader>),
}

impl AsyncRead for Source {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        match self.get_mut() {
            Source::Binary(reader) => Pin::new(reader).poll_read(cx, buf),
            Source::Text(reader) => Pin::new(reader).poll_read(cx, buf),
        }
    }
}

struct WebResponse {
    stream: GrpcWebResponseStream<Source>,
    buf: BytesMut,
    done: bool,
}

enum Kind {
    Grpc(tonic::body::Body),
    GrpcWeb(Box<WebResponse>),
}

/// A response body normalized to the native gRPC shape: data frames, then one trailers frame.
///
/// Native gRPC bodies pass through. gRPC-Web bodies run through the (text mode) base64 decoder
/// and the [`GrpcWebResponseStream`]; their embedded trailer frame comes out as HTTP trailers.
pub struct ResponseBody {
    kind: Kind,
}

impl ResponseBody {
    pub fn grpc(body: tonic::body::Body) -> Self {
        Self {
            kind: Kind::Grpc(body),
        }
    }

    /// Wraps a gRPC-Web body. Trailer frames longer than `max_trailer_size` fail the body.
    pub fn grpc_web(
        body: tonic::body::Body,
        mode: WireMode,
        pool: &BufferPool,
        max_trailer_size: usize,
    ) -> Self {
        let stream: BodyStream = Box::pin(body.into_data_stream().map_err(io::Error::other));
        let reader = StreamReader::new(stream);

        let source = match mode {
            WireMode::Binary => Source::Binary(reader),
            WireMode::Text => Source::Text(Base64Decoder::new(reader, pool)),
        };

        Self {
            kind: Kind::GrpcWeb(Box::new(WebResponse {
                stream: GrpcWebResponseStream::new(source).with_max_trailer_size(max_trailer_size),
                buf: BytesMut::new(),
                done: false,
            })),
        }
    }
}

impl std::fmt::Debug for ResponseBody {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let kind = match &self.kind {
            Kind::Grpc(_) => "grpc",
            Kind::GrpcWeb(_) => "grpc-web",
        };
        f.debug_struct("ResponseBody").field("kind", &kind).finish()
    }
}

impl Body for ResponseBody {
    type Data = Bytes;
    type Error = tonic::Status;

    fn poll_frame(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
    ) -> Poll<Option<Result<Frame<Self::Data>, Self::Error>>> {
        let web = match &mut self.get_mut().kind {
            Kind::Grpc(body) => return Pin::new(body).poll_frame(cx),
            Kind::GrpcWeb(web) => web,
        };

        if web.done {
            return Poll::Ready(None);
        }

        web.buf.reserve(RESPONSE_CHUNK_SIZE);
        match ready!(poll_read_buf(Pin::new(&mut web.stream), cx, &mut web.buf)) {
            Ok(0) => {
                web.done = true;
                let trailers = web.stream.take_trailers().unwrap_or_default();
                Poll::Ready(Some(Ok(Frame::trailers(trailers))))
            }
            Ok(_) => Poll::Ready(Some(Ok(Frame::data(web.buf.split().freeze())))),
            Err(err) => {
                web.done = true;
                Poll::Ready(Some(Err(io_to_status(err))))
            }
        }
    }

    fn is_end_stream(&self) -> bool {
        match &self.kind {
            Kind::Grpc(body) => body.is_end_stream(),
            Kind::GrpcWeb(web) => web.done,
        }
    }
}

/// Recovers the status of a failed transport body, or classifies a protocol violation.
fn io_to_status(err: io::Error) -> tonic::Status {
    if let Some(status) = err.get_ref().and_then(|e| e.downcast_ref::<tonic::Status>()) {
        return status.clone();
    }
    ProtocolError::from_io(err).to_status()
}
