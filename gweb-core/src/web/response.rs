//! # Response Stream State Machine
//!
//! A gRPC-Web response body is a sequence of data frames closed by one trailer frame carrying
//! the call's trailing metadata as an HTTP/1.1 header block. [`GrpcWebResponseStream`] reads
//! such a body and hands the data frames (header and payload, untouched) to its reader, while
//! the trailer frame is consumed internally and parsed into a [`HeaderMap`].
//!
//! ```text
//!   Ready ──► Header ──┬─► Content ──► Ready
//!                      ├─► Ready                (zero-length data frame)
//!                      └─► Trailer ──► Complete
//! ```
use crate::error::ProtocolError;
use crate::framing::{HEADER_SIZE, poll_read_frame_header};
use http::{HeaderMap, HeaderName, HeaderValue};
use std::io;
use std::pin::Pin;
use std::task::{Context, Poll, ready};
use tokio::io::{AsyncRead, ReadBuf};

/// Upper bound on the chunk read at once while collecting a trailer payload.
const TRAILER_READ_CHUNK: usize = 8 * 1024;

/// Observable progress through the current frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamState {
    Ready,
    Header,
    Content,
    Trailer,
    Complete,
    /// A read failed; every later read fails too.
    Failed,
}

#[derive(Debug)]
enum State {
    Ready,
    /// Collecting the 5 header bytes from the source.
    Header { raw: [u8; HEADER_SIZE], read: usize },
    /// Handing a data frame header to the reader.
    HeaderOut {
        raw: [u8; HEADER_SIZE],
        sent: usize,
        length: u32,
    },
    Content { length: u32, remaining: u32 },
    Trailer { payload: Vec<u8>, length: usize },
    /// Trailers parsed, checking that the source ends right after them.
    TrailerEnd,
    Complete,
    Failed,
}

/// Splits a gRPC-Web byte stream into data frames and trailing metadata.
///
/// Reads return the data frames byte for byte. Once the trailer frame has been read and the
/// source has confirmed its end, reads return 0 and [`GrpcWebResponseStream::trailers`] holds
/// the parsed metadata. A source ending cleanly between two frames without any trailer frame
/// completes with empty trailers.
#[derive(Debug)]
pub struct GrpcWebResponseStream<R> {
    inner: R,
    state: State,
    trailers: Option<HeaderMap>,
    max_trailer_size: usize,
}

impl<R> GrpcWebResponseStream<R>
where
    R: AsyncRead + Unpin,
{
    pub fn new(inner: R) -> Self {
        Self {
            inner,
            state: State::Ready,
            trailers: None,
            max_trailer_size: usize::MAX,
        }
    }

    /// Rejects trailer frames declaring more than `limit` payload bytes.
    pub fn with_max_trailer_size(mut self, limit: usize) -> Self {
        self.max_trailer_size = limit;
        self
    }

    pub fn state(&self) -> StreamState {
        match self.state {
            State::Ready => StreamState::Ready,
            State::Header { .. } | State::HeaderOut { .. } => StreamState::Header,
            State::Content { .. } => StreamState::Content,
            State::Trailer { .. } | State::TrailerEnd => StreamState::Trailer,
            State::Complete => StreamState::Complete,
            State::Failed => StreamState::Failed,
        }
    }

    pub fn is_complete(&self) -> bool {
        matches!(self.state, State::Complete)
    }

    /// Trailing metadata, available once the trailer frame has been parsed.
    pub fn trailers(&self) -> Option<&HeaderMap> {
        self.trailers.as_ref()
    }

    pub fn take_trailers(&mut self) -> Option<HeaderMap> {
        self.trailers.take()
    }

    pub fn get_ref(&self) -> &R {
        &self.inner
    }

    pub fn into_inner(self) -> R {
        self.inner
    }

    fn poll_trailer(
        &mut self,
        cx: &mut Context<'_>,
        payload: &mut Vec<u8>,
        length: usize,
    ) -> Poll<Result<(), ProtocolError>> {
        while payload.len() < length {
            let start = payload.len();
            let chunk = (length - start).min(TRAILER_READ_CHUNK);
            payload.resize(start + chunk, 0);

            let mut buf = ReadBuf::new(&mut payload[start..]);
            let polled = Pin::new(&mut self.inner).poll_read(cx, &mut buf);
            let n = buf.filled().len();
            payload.truncate(start + n);

            ready!(polled).map_err(ProtocolError::from_io)?;
            if n == 0 {
                return Poll::Ready(Err(ProtocolError::TruncatedFrame {
                    expected: length,
                    read: start,
                }));
            }
        }
        Poll::Ready(Ok(()))
    }

    fn poll_end(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), ProtocolError>> {
        let mut next = [0u8; 1];
        let mut buf = ReadBuf::new(&mut next);
        ready!(Pin::new(&mut self.inner).poll_read(cx, &mut buf)).map_err(ProtocolError::from_io)?;

        if !buf.filled().is_empty() {
            tracing::warn!("gRPC-Web response carries data after its trailer frame");
            return Poll::Ready(Err(ProtocolError::DataAfterTrailers));
        }
        Poll::Ready(Ok(()))
    }

    fn poll_step(
        &mut self,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<Result<(), ProtocolError>> {
        loop {
            // Any error leaves the stream failed.
            match std::mem::replace(&mut self.state, State::Failed) {
                State::Ready => {
                    self.state = State::Header {
                        raw: [0; HEADER_SIZE],
                        read: 0,
                    };
                }
                State::Header { mut raw, mut read } => {
                    let polled = poll_read_frame_header(Pin::new(&mut self.inner), cx, &mut raw, &mut read);
                    let header = match polled {
                        Poll::Pending => {
                            self.state = State::Header { raw, read };
                            return Poll::Pending;
                        }
                        Poll::Ready(result) => result?,
                    };

                    let Some(header) = header else {
                        // Clean end of stream between two frames.
                        self.trailers.get_or_insert_with(HeaderMap::new);
                        self.state = State::Complete;
                        return Poll::Ready(Ok(()));
                    };

                    if header.is_trailer() && header.length as usize > self.max_trailer_size {
                        return Poll::Ready(Err(ProtocolError::MessageTooLarge {
                            size: header.length as usize,
                            limit: self.max_trailer_size,
                        }));
                    }

                    self.state = if header.is_trailer() {
                        State::Trailer {
                            payload: Vec::new(),
                            length: header.length as usize,
                        }
                    } else {
                        State::HeaderOut {
                            raw,
                            sent: 0,
                            length: header.length,
                        }
                    };
                }
                State::HeaderOut { raw, sent, length } => {
                    let n = (HEADER_SIZE - sent).min(buf.remaining());
                    buf.put_slice(&raw[sent..sent + n]);

                    self.state = match sent + n {
                        HEADER_SIZE if length == 0 => State::Ready,
                        HEADER_SIZE => State::Content {
                            length,
                            remaining: length,
                        },
                        sent => State::HeaderOut { raw, sent, length },
                    };
                    return Poll::Ready(Ok(()));
                }
                State::Content { length, remaining } => {
                    let max = buf.remaining().min(remaining as usize);
                    let dst = buf.initialize_unfilled_to(max);
                    let mut content = ReadBuf::new(dst);

                    let polled = Pin::new(&mut self.inner).poll_read(cx, &mut content);
                    let n = content.filled().len();
                    match polled {
                        Poll::Pending => {
                            self.state = State::Content { length, remaining };
                            return Poll::Pending;
                        }
                        Poll::Ready(result) => result.map_err(ProtocolError::from_io)?,
                    }
                    if n == 0 {
                        return Poll::Ready(Err(ProtocolError::TruncatedFrame {
                            expected: length as usize,
                            read: (length - remaining) as usize,
                        }));
                    }

                    buf.advance(n);
                    let remaining = remaining - n as u32;
                    self.state = if remaining == 0 {
                        State::Ready
                    } else {
                        State::Content { length, remaining }
                    };
                    return Poll::Ready(Ok(()));
                }
                State::Trailer {
                    mut payload,
                    length,
                } => {
                    match self.poll_trailer(cx, &mut payload, length) {
                        Poll::Pending => {
                            self.state = State::Trailer { payload, length };
                            return Poll::Pending;
                        }
                        Poll::Ready(result) => result?,
                    }

                    let trailers = parse_trailers(&payload)?;
                    tracing::trace!(count = trailers.len(), "parsed gRPC-Web trailers");
                    self.trailers = Some(trailers);
                    self.state = State::TrailerEnd;
                }
                State::TrailerEnd => {
                    if self.poll_end(cx)?.is_pending() {
                        self.state = State::TrailerEnd;
                        return Poll::Pending;
                    }
                    self.state = State::Complete;
                    return Poll::Ready(Ok(()));
                }
                State::Complete => {
                    self.state = State::Complete;
                    return Poll::Ready(Ok(()));
                }
                State::Failed => return Poll::Ready(Err(ProtocolError::StreamFailed)),
            }
        }
    }
}

impl<R> AsyncRead for GrpcWebResponseStream<R>
where
    R: AsyncRead + Unpin,
{
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let this = self.get_mut();

        if this.is_complete() {
            return Poll::Ready(Ok(()));
        }

        // Zero-length reads go straight to the source and leave the state alone.
        if buf.remaining() == 0 {
            return Pin::new(&mut this.inner).poll_read(cx, buf);
        }

        this.poll_step(cx, buf).map_err(io::Error::from)
    }
}

/// Parses a trailer frame payload into trailing metadata.
///
/// The payload is a sequence of `name: value` lines separated by CRLF (a bare LF is accepted
/// too). Names and values are trimmed of surrounding whitespace and names are lowercased.
/// Blank lines are skipped, repeated names keep every value, and lines are never folded.
pub fn parse_trailers(payload: &[u8]) -> Result<HeaderMap, ProtocolError> {
    let mut trailers = HeaderMap::new();
    if payload.is_empty() {
        return Ok(trailers);
    }

    for line in payload.split(|&b| b == b'\n') {
        let line = line.strip_suffix(b"\r").unwrap_or(line);
        if line.trim_ascii().is_empty() {
            continue;
        }

        let Some(colon) = line.iter().position(|&b| b == b':') else {
            return Err(ProtocolError::MalformedTrailer(
                String::from_utf8_lossy(line).into_owned(),
            ));
        };

        let name = line[..colon].trim_ascii();
        let value = line[colon + 1..].trim_ascii();

        let name = HeaderName::from_bytes(name).map_err(|_| {
            ProtocolError::InvalidTrailerName(String::from_utf8_lossy(name).into_owned())
        })?;
        let value = HeaderValue::from_bytes(value)
            .map_err(|_| ProtocolError::InvalidTrailerValue(name.to_string()))?;

        trailers.append(name, value);
    }

    Ok(trailers)
}

/// Serializes trailing metadata into a trailer frame payload.
pub fn encode_trailers(trailers: &HeaderMap) -> Vec<u8> {
    let mut payload = Vec::new();
    for (name, value) in trailers {
        payload.extend_from_slice(name.as_str().as_bytes());
        payload.extend_from_slice(b": ");
        payload.extend_from_slice(value.as_bytes());
        payload.extend_from_slice(b"\r\n");
    }
    payload
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::framing::{encode_frame, encode_trailer_frame};
    use crate::test_util::ChunkedReader;
    use bytes::BytesMut;
    use std::future::poll_fn;
    use tokio::io::AsyncReadExt;

    fn wire(frames: &[&str], trailer: Option<&str>) -> Vec<u8> {
        let mut buf = BytesMut::new();
        for payload in frames {
            encode_frame(&mut buf, payload.as_bytes(), false);
        }
        if let Some(trailer) = trailer {
            encode_trailer_frame(&mut buf, trailer.as_bytes());
        }
        buf.to_vec()
    }

    async fn read_some<R: AsyncRead + Unpin>(
        stream: &mut GrpcWebResponseStream<R>,
        len: usize,
    ) -> io::Result<Vec<u8>> {
        let mut buf = vec![0u8; len];
        let n = stream.read(&mut buf).await?;
        buf.truncate(n);
        Ok(buf)
    }

    #[tokio::test]
    async fn walks_through_every_state() {
        let bytes = wire(&["hello"], Some("grpc-status: 0"));
        let mut stream = GrpcWebResponseStream::new(bytes.as_slice());
        assert_eq!(stream.state(), StreamState::Ready);

        let header = read_some(&mut stream, 64).await.unwrap();
        assert_eq!(header, vec![0, 0, 0, 0, 5]);
        assert_eq!(stream.state(), StreamState::Content);

        let content = read_some(&mut stream, 64).await.unwrap();
        assert_eq!(content, b"hello");
        assert_eq!(stream.state(), StreamState::Ready);
        assert!(stream.trailers().is_none());

        let end = read_some(&mut stream, 64).await.unwrap();
        assert!(end.is_empty());
        assert_eq!(stream.state(), StreamState::Complete);
        assert_eq!(stream.trailers().unwrap()["grpc-status"], "0");

        assert!(read_some(&mut stream, 64).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn stray_byte_after_trailers_is_an_error() {
        let mut bytes = wire(&["hello"], Some("grpc-status: 0"));
        bytes.push(0);

        let mut stream = GrpcWebResponseStream::new(bytes.as_slice());
        let mut out = Vec::new();
        let err = stream.read_to_end(&mut out).await.unwrap_err();

        assert!(matches!(
            ProtocolError::from_io(err),
            ProtocolError::DataAfterTrailers
        ));
    }

    #[tokio::test]
    async fn survives_tiny_reads_and_chunks() {
        let bytes = wire(&["first", "", "second"], Some("grpc-status: 0\r\ngrpc-message: ok\r\n"));
        let expected = wire(&["first", "", "second"], None);

        for chunk in [1, 2, 3, 7] {
            for read_size in [1, 2, 4, 5, 64] {
                let mut stream = GrpcWebResponseStream::new(ChunkedReader::new(bytes.clone(), chunk));
                let mut out = Vec::new();
                loop {
                    let piece = read_some(&mut stream, read_size).await.unwrap();
                    if piece.is_empty() {
                        break;
                    }
                    out.extend(piece);
                }

                assert_eq!(out, expected, "chunk = {chunk}, read_size = {read_size}");
                let trailers = stream.trailers().unwrap();
                assert_eq!(trailers["grpc-status"], "0");
                assert_eq!(trailers["grpc-message"], "ok");
            }
        }
    }

    #[tokio::test]
    async fn zero_length_reads_leave_the_state_alone() {
        let bytes = wire(&["hello"], Some(""));
        let mut stream = GrpcWebResponseStream::new(ChunkedReader::new(bytes, 64));

        read_some(&mut stream, 64).await.unwrap();
        assert_eq!(stream.state(), StreamState::Content);

        let mut empty = ReadBuf::new(&mut []);
        poll_fn(|cx| Pin::new(&mut stream).poll_read(cx, &mut empty))
            .await
            .unwrap();
        assert_eq!(stream.state(), StreamState::Content);
        assert_eq!(stream.get_ref().zero_reads, 1);

        assert_eq!(read_some(&mut stream, 64).await.unwrap(), b"hello");
    }

    #[tokio::test]
    async fn completion_does_not_touch_the_source() {
        let bytes = wire(&[], Some("grpc-status: 0"));
        let mut stream = GrpcWebResponseStream::new(ChunkedReader::new(bytes, 64));

        assert!(read_some(&mut stream, 16).await.unwrap().is_empty());
        assert!(stream.is_complete());

        let mut empty = ReadBuf::new(&mut []);
        poll_fn(|cx| Pin::new(&mut stream).poll_read(cx, &mut empty))
            .await
            .unwrap();
        assert_eq!(stream.get_ref().zero_reads, 0);
    }

    #[tokio::test]
    async fn missing_trailer_frame_completes_with_empty_trailers() {
        let bytes = wire(&["x"], None);
        let mut stream = GrpcWebResponseStream::new(bytes.as_slice());
        let mut out = Vec::new();

        stream.read_to_end(&mut out).await.unwrap();
        assert_eq!(out, vec![0, 0, 0, 0, 1, b'x']);
        assert!(stream.trailers().unwrap().is_empty());
    }

    #[tokio::test]
    async fn truncated_content_is_an_error() {
        let bytes = wire(&["hello"], None);
        let mut stream = GrpcWebResponseStream::new(&bytes[..bytes.len() - 1]);
        let mut out = Vec::new();

        let err = stream.read_to_end(&mut out).await.unwrap_err();
        assert!(matches!(
            ProtocolError::from_io(err),
            ProtocolError::TruncatedFrame {
                expected: 5,
                read: 4
            }
        ));
    }

    #[tokio::test]
    async fn truncated_trailer_is_an_error() {
        let bytes = wire(&[], Some("grpc-status: 0"));
        let mut stream = GrpcWebResponseStream::new(&bytes[..bytes.len() - 3]);
        let mut out = Vec::new();

        let err = stream.read_to_end(&mut out).await.unwrap_err();
        assert!(matches!(
            ProtocolError::from_io(err),
            ProtocolError::TruncatedFrame { .. }
        ));
    }

    #[tokio::test]
    async fn oversized_trailer_frame_is_rejected_before_buffering() {
        let bytes = wire(&["ok"], Some("grpc-status: 0\r\ngrpc-message: far too long"));
        let mut stream = GrpcWebResponseStream::new(bytes.as_slice()).with_max_trailer_size(16);
        let mut out = Vec::new();

        let err = stream.read_to_end(&mut out).await.unwrap_err();
        assert!(matches!(
            ProtocolError::from_io(err),
            ProtocolError::MessageTooLarge { size: 42, limit: 16 }
        ));
        assert!(stream.trailers().is_none());
    }

    #[tokio::test]
    async fn failed_stream_reports_failed_state() {
        let bytes = wire(&["hello"], None);
        let mut stream = GrpcWebResponseStream::new(&bytes[..bytes.len() - 1]);
        let mut out = Vec::new();

        stream.read_to_end(&mut out).await.unwrap_err();
        assert_eq!(stream.state(), StreamState::Failed);
        assert!(!stream.is_complete());

        let err = read_some(&mut stream, 16).await.unwrap_err();
        assert!(matches!(ProtocolError::from_io(err), ProtocolError::StreamFailed));
        assert_eq!(stream.state(), StreamState::Failed);
    }

    #[test]
    fn parses_trailer_block() {
        let trailers = parse_trailers(b"grpc-status: 0\r\ngrpc-message: ok\r\n").unwrap();

        assert_eq!(trailers.len(), 2);
        assert_eq!(trailers["grpc-status"], "0");
        assert_eq!(trailers["grpc-message"], "ok");
    }

    #[test]
    fn trailer_names_are_case_insensitive_and_trimmed() {
        let trailers = parse_trailers(b"Grpc-Status:   14  \r\nx-multi: a\r\nx-multi: b").unwrap();

        assert_eq!(trailers["grpc-status"], "14");
        let values: Vec<_> = trailers.get_all("x-multi").iter().collect();
        assert_eq!(values, ["a", "b"]);
    }

    #[test]
    fn trailer_line_without_colon_is_malformed() {
        assert!(matches!(
            parse_trailers(b"grpc-status: 0\r\nnonsense\r\n"),
            Err(ProtocolError::MalformedTrailer(line)) if line == "nonsense"
        ));
    }

    #[test]
    fn empty_trailer_payload_is_empty_metadata() {
        assert!(parse_trailers(b"").unwrap().is_empty());
    }

    #[test]
    fn encoded_trailers_parse_back() {
        let mut trailers = HeaderMap::new();
        trailers.insert("grpc-status", HeaderValue::from_static("3"));
        trailers.insert("grpc-message", HeaderValue::from_static("bad input"));

        let payload = encode_trailers(&trailers);
        assert_eq!(parse_trailers(&payload).unwrap(), trailers);
    }
}
