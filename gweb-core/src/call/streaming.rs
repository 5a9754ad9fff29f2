use super::state::{CallPhase, CallState, Cancellation};
use super::status::{status_from_http, status_from_trailers};
use crate::codec::Codec;
use crate::compression::{Encoding, GRPC_ENCODING};
use crate::error::{CallError, ProtocolError};
use crate::framing::{Frame, FrameDecoder, FrameHeader, HEADER_SIZE};
use crate::web::{ContentKind, ResponseBody};
use bytes::{BufMut, Bytes, BytesMut};
use futures_util::Stream;
use http::header::CONTENT_TYPE;
use http::{HeaderMap, StatusCode};
use http_body_util::BodyExt;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tonic::metadata::MetadataMap;
use tonic::{Code, Status};

/// The transport task of a call: resolves once the response headers are in.
pub(crate) type PendingResponse = JoinHandle<Result<http::Response<ResponseBody>, Status>>;

/// Serializes `message` into a complete data frame.
///
/// The header is reserved up front and patched once the payload length is known, so the
/// payload is never copied.
pub(crate) fn encode_message<C: Codec>(
    codec: &mut C,
    message: C::Encode,
    limit: Option<usize>,
) -> Result<Bytes, Status> {
    let mut buf = BytesMut::with_capacity(HEADER_SIZE + 64);
    buf.put_bytes(0, HEADER_SIZE);
    codec.encode(message, &mut buf)?;

    let len = buf.len() - HEADER_SIZE;
    if let Some(limit) = limit.filter(|limit| len > *limit) {
        return Err(Status::resource_exhausted(format!(
            "Message of {len} bytes exceeds the send limit of {limit} bytes"
        )));
    }
    let length = u32::try_from(len).map_err(|_| {
        Status::resource_exhausted(format!("Message of {len} bytes cannot be framed"))
    })?;

    buf[..HEADER_SIZE].copy_from_slice(&FrameHeader::data(length, false).encode());
    Ok(buf.freeze())
}

fn cancellation_of(state: &CallState) -> Cancellation {
    state.cancellation().unwrap_or(Cancellation::Cancelled)
}

/// One step of reading the response body.
enum Step<T> {
    Message(T),
    Done(Status, MetadataMap),
    Failed(Status),
    Cancelled,
}

/// The response body once headers have been accepted.
struct ResponseStream {
    body: ResponseBody,
    decoder: FrameDecoder,
    encoding: Option<Encoding>,
    max_receive: usize,
}

impl ResponseStream {
    async fn next<C: Codec>(&mut self, codec: &mut C, state: &CallState) -> Step<C::Decode> {
        loop {
            match self.decoder.next_frame() {
                Ok(Some(frame)) => {
                    return match self.decode(frame, codec) {
                        Ok(message) => Step::Message(message),
                        Err(status) => Step::Failed(status),
                    };
                }
                Ok(None) => {}
                Err(err) => return Step::Failed(err.to_status()),
            }

            let frame = tokio::select! {
                biased;
                _ = state.cancelled() => return Step::Cancelled,
                frame = self.body.frame() => frame,
            };

            match frame {
                Some(Ok(frame)) => match frame.into_data() {
                    Ok(data) => self.decoder.push(data),
                    Err(frame) => {
                        if let Ok(trailers) = frame.into_trailers() {
                            return self.complete(trailers);
                        }
                    }
                },
                Some(Err(status)) => return Step::Failed(status),
                None => return self.complete(HeaderMap::new()),
            }
        }
    }

    fn decode<C: Codec>(&self, frame: Frame, codec: &mut C) -> Result<C::Decode, Status> {
        let payload = if frame.header.is_compressed() {
            let encoding = self.encoding.ok_or(ProtocolError::MissingEncoding)?;
            encoding.decompress(&frame.payload, self.max_receive)?
        } else {
            frame.payload
        };
        codec.decode(payload)
    }

    fn complete<T>(&self, trailers: HeaderMap) -> Step<T> {
        if let Err(err) = self.decoder.finish() {
            tracing::warn!(error = %err, "response ended inside a frame");
            return Step::Failed(err.to_status());
        }
        let status = status_from_trailers(&trailers);
        Step::Done(status, MetadataMap::from_headers(trailers))
    }
}

enum Phase {
    Pending(PendingResponse),
    Streaming(Box<ResponseStream>),
    Done,
}

#[derive(Debug)]
struct Outcome {
    status: Status,
    trailers: MetadataMap,
}

/// The response side of an RPC call.
///
/// Messages are read in order with [`Call::message`]. The final status and trailing metadata
/// become available once the response has been read to the end; they are cached from then on.
/// Dropping the call disposes it.
pub struct Call<C: Codec> {
    state: Arc<CallState>,
    phase: Phase,
    codec: C,
    max_receive: usize,
    headers: Option<MetadataMap>,
    outcome: Option<Outcome>,
    lifecycle: CallPhase,
    disposed: bool,
}

impl<C: Codec> Call<C> {
    pub(crate) fn new(
        state: Arc<CallState>,
        pending: PendingResponse,
        codec: C,
        max_receive: usize,
    ) -> Self {
        Self {
            state,
            phase: Phase::Pending(pending),
            codec,
            max_receive,
            headers: None,
            outcome: None,
            lifecycle: CallPhase::Created,
            disposed: false,
        }
    }

    pub fn phase(&self) -> CallPhase {
        self.lifecycle
    }

    /// Waits for the response headers.
    ///
    /// Fails with the call's status if it ended before headers were received.
    pub async fn headers(&mut self) -> Result<&MetadataMap, CallError> {
        if self.disposed {
            return Err(CallError::Disposed);
        }
        self.await_headers().await;

        match (&self.headers, &self.outcome) {
            (Some(headers), _) => Ok(headers),
            (None, Some(outcome)) => Err(outcome.status.clone().into()),
            (None, None) => Err(CallError::NotComplete),
        }
    }

    /// Reads the next response message.
    ///
    /// # Returns
    ///
    /// * `Ok(Some(message))` - The next message, in arrival order.
    /// * `Ok(None)` - The response ended with an `OK` status.
    /// * `Err(CallError::Status)` - The call failed. Every later read returns the same status.
    pub async fn message(&mut self) -> Result<Option<C::Decode>, CallError> {
        if self.disposed {
            return Err(CallError::Disposed);
        }
        self.await_headers().await;

        loop {
            if let Some(outcome) = &self.outcome {
                return match outcome.status.code() {
                    Code::Ok => Ok(None),
                    _ => Err(outcome.status.clone().into()),
                };
            }

            let step = match &mut self.phase {
                Phase::Streaming(stream) => stream.next(&mut self.codec, &self.state).await,
                _ => Step::Failed(Status::internal("Response stream is not available")),
            };

            match step {
                Step::Message(message) => {
                    self.lifecycle = CallPhase::Streaming;
                    return Ok(Some(message));
                }
                Step::Done(status, trailers) => self.finish(status, trailers, CallPhase::Finished),
                Step::Failed(status) => self.fail(status),
                Step::Cancelled => self.cancelled(),
            }
        }
    }

    /// Reads the single message of a unary or client-streaming response and drains the
    /// response up to its trailers.
    pub async fn response(&mut self) -> Result<C::Decode, CallError> {
        let Some(message) = self.message().await? else {
            return Err(self.reject(Status::internal("Missing response message")));
        };

        if self.message().await?.is_some() {
            return Err(self.reject(Status::internal(
                "Expected a single response message, received more",
            )));
        }
        Ok(message)
    }

    /// Turns the call into a stream of its response messages.
    ///
    /// The stream ends after the first error.
    pub fn into_stream(self) -> impl Stream<Item = Result<C::Decode, CallError>> + Send {
        futures_util::stream::unfold(Some(self), |call| async move {
            let mut call = call?;
            match call.message().await {
                Ok(Some(message)) => Some((Ok(message), Some(call))),
                Ok(None) => None,
                Err(err) => Some((Err(err), None)),
            }
        })
    }

    /// The final status. Fails with [`CallError::NotComplete`] until the response has been
    /// read to the end.
    pub fn status(&mut self) -> Result<&Status, CallError> {
        self.observe_cancellation();
        match &self.outcome {
            Some(outcome) => Ok(&outcome.status),
            None if self.disposed => Err(CallError::Disposed),
            None => Err(CallError::NotComplete),
        }
    }

    /// The trailing metadata. Same availability as [`Call::status`].
    pub fn trailers(&mut self) -> Result<&MetadataMap, CallError> {
        self.observe_cancellation();
        match &self.outcome {
            Some(outcome) => Ok(&outcome.trailers),
            None if self.disposed => Err(CallError::Disposed),
            None => Err(CallError::NotComplete),
        }
    }

    /// Cancels the call. Pending and later reads fail with `Cancelled`.
    pub fn cancel(&self) {
        self.state.cancel();
    }

    /// Cancels any in-flight operation and releases the deadline timer. Idempotent.
    pub fn dispose(&mut self) {
        if self.disposed {
            return;
        }
        self.disposed = true;

        if self.outcome.is_none() {
            self.state.cancel();
        }
        self.state.release();
        if let Phase::Pending(pending) = &self.phase {
            pending.abort();
        }
        self.phase = Phase::Done;
        self.lifecycle = CallPhase::Disposed;
    }

    async fn await_headers(&mut self) {
        let Phase::Pending(pending) = &mut self.phase else {
            return;
        };
        self.lifecycle = CallPhase::Sending;

        let result = tokio::select! {
            biased;
            _ = self.state.cancelled() => None,
            joined = pending => Some(joined.unwrap_or_else(|err| {
                Err(Status::internal(format!("Call task failed: {err}")))
            })),
        };

        match result {
            None => self.cancelled(),
            Some(Ok(response)) => self.accept(response),
            Some(Err(status)) => self.fail(status),
        }
    }

    /// Validates the response head and switches to streaming its body.
    fn accept(&mut self, response: http::Response<ResponseBody>) {
        let (parts, body) = response.into_parts();
        tracing::debug!(status = %parts.status, "response headers received");

        if parts.status != StatusCode::OK {
            return self.fail(status_from_http(parts.status));
        }

        let metadata = MetadataMap::from_headers(parts.headers.clone());

        // Trailers-only response: the status travels in the headers.
        if let Some(status) = Status::from_header_map(&parts.headers) {
            self.headers = Some(metadata.clone());
            return self.finish(status, metadata, CallPhase::Finished);
        }

        if ContentKind::from_headers(&parts.headers).is_none() {
            let content_type = parts
                .headers
                .get(CONTENT_TYPE)
                .and_then(|v| v.to_str().ok())
                .unwrap_or_default();
            return self.fail(Status::internal(format!(
                "Bad gRPC response: invalid content-type '{content_type}'"
            )));
        }

        let encoding = match parts.headers.get(GRPC_ENCODING) {
            None => None,
            Some(value) => {
                let name = value.to_str().unwrap_or_default();
                match Encoding::from_name(name) {
                    Ok(encoding) => encoding,
                    Err(err) => return self.fail(err.to_status()),
                }
            }
        };

        self.headers = Some(metadata);
        self.phase = Phase::Streaming(Box::new(ResponseStream {
            body,
            decoder: FrameDecoder::new(self.max_receive),
            encoding,
            max_receive: self.max_receive,
        }));
        self.lifecycle = CallPhase::HeadersReceived;
    }

    fn observe_cancellation(&mut self) {
        if self.outcome.is_none() && !self.disposed && self.state.is_cancelled() {
            self.cancelled();
        }
    }

    fn cancelled(&mut self) {
        let cancellation = cancellation_of(&self.state);
        let phase = match cancellation {
            Cancellation::Cancelled => CallPhase::Cancelled,
            Cancellation::DeadlineExceeded => CallPhase::DeadlineExceeded,
        };
        self.finish(cancellation.to_status(), MetadataMap::new(), phase);
    }

    /// Overrides the outcome of a response that broke the unary shape, keeping its trailers.
    fn reject(&mut self, status: Status) -> CallError {
        let trailers = self.outcome.take().map(|o| o.trailers).unwrap_or_default();
        self.finish(status.clone(), trailers, CallPhase::Finished);
        status.into()
    }

    fn fail(&mut self, status: Status) {
        self.finish(status, MetadataMap::new(), CallPhase::Finished);
    }

    fn finish(&mut self, status: Status, trailers: MetadataMap, phase: CallPhase) {
        if let Phase::Pending(pending) = &self.phase {
            pending.abort();
        }
        self.phase = Phase::Done;
        self.state.release();

        // Tear down the request side as well.
        if status.code() != Code::Ok {
            self.state.cancel();
        }

        tracing::debug!(code = ?status.code(), message = status.message(), "call finished");
        self.outcome = Some(Outcome { status, trailers });
        self.lifecycle = phase;
    }
}

impl<C: Codec> Drop for Call<C> {
    fn drop(&mut self) {
        self.dispose();
    }
}

impl<C: Codec> std::fmt::Debug for Call<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Call")
            .field("phase", &self.lifecycle)
            .field("outcome", &self.outcome)
            .finish()
    }
}

/// The request side of a client-streaming or duplex-streaming call.
///
/// Messages are handed to the transport through a channel of capacity 1, so `send` waits until
/// the transport has taken the previous message.
pub struct RequestSink<C: Codec> {
    sender: Option<mpsc::Sender<Bytes>>,
    codec: C,
    state: Arc<CallState>,
    max_send: Option<usize>,
}

impl<C: Codec> RequestSink<C> {
    pub(crate) fn new(
        sender: mpsc::Sender<Bytes>,
        codec: C,
        state: Arc<CallState>,
        max_send: Option<usize>,
    ) -> Self {
        Self {
            sender: Some(sender),
            codec,
            state,
            max_send,
        }
    }

    /// Sends one request message.
    pub async fn send(&mut self, message: C::Encode) -> Result<(), CallError> {
        let Some(sender) = &self.sender else {
            return Err(CallError::RequestStreamCompleted);
        };
        if let Some(cancellation) = self.state.cancellation() {
            return Err(cancellation.to_status().into());
        }

        let frame = encode_message(&mut self.codec, message, self.max_send)?;
        tracing::trace!(len = frame.len(), "sending request frame");

        tokio::select! {
            biased;
            _ = self.state.cancelled() => Err(CallError::from(cancellation_of(&self.state).to_status())),
            sent = sender.send(frame) => sent.map_err(|_| {
                CallError::from(Status::unavailable("The transport stopped accepting request messages"))
            }),
        }
    }

    /// Ends the request stream. Calling it again has no effect.
    pub fn complete(&mut self) {
        self.sender.take();
    }

    pub fn is_completed(&self) -> bool {
        self.sender.is_none()
    }
}

impl<C: Codec> std::fmt::Debug for RequestSink<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RequestSink")
            .field("completed", &self.is_completed())
            .finish()
    }
}
