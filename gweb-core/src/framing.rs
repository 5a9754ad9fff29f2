//! # Message Framer
//!
//! Every gRPC message travels inside a length-prefixed frame:
//!
//! ```text
//! +-------+-------------+------------------+
//! | flags | length      | payload          |
//! | 1B    | 4B (BE u32) | `length` bytes   |
//! +-------+-------------+------------------+
//! ```
//!
//! - bit 0 of `flags` (`0x01`): the payload is compressed with the negotiated `grpc-encoding`.
//! - bit 7 of `flags` (`0x80`): gRPC-Web trailer frame, the payload is an HTTP/1.1 header block.
//!
//! Outgoing frames are appended to a buffer with [`encode_frame`]. Incoming frames are split
//! out of body chunks as they arrive by [`FrameDecoder`], or read header first from an
//! `AsyncRead` source with [`poll_read_frame_header`].
use crate::error::ProtocolError;
use bytes::{Buf, BufMut, Bytes, BytesMut};
use std::pin::Pin;
use std::task::{Context, Poll, ready};
use tokio::io::{AsyncRead, ReadBuf};

/// Size of the frame header: 1 flag byte + 4 length bytes.
pub const HEADER_SIZE: usize = 5;

/// Flag bit marking a compressed payload.
pub const COMPRESSED_FLAG: u8 = 0b0000_0001;

/// Flag bit marking a gRPC-Web trailer frame.
pub const TRAILER_FLAG: u8 = 0b1000_0000;

/// The fixed 5-byte header preceding every frame payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameHeader {
    pub flags: u8,
    pub length: u32,
}

impl FrameHeader {
    /// Header for a data frame carrying `length` payload bytes.
    pub fn data(length: u32, compressed: bool) -> Self {
        let flags = if compressed { COMPRESSED_FLAG } else { 0 };
        Self { flags, length }
    }

    /// Header for a gRPC-Web trailer frame carrying `length` payload bytes.
    pub fn trailer(length: u32) -> Self {
        Self {
            flags: TRAILER_FLAG,
            length,
        }
    }

    pub fn is_trailer(&self) -> bool {
        self.flags & TRAILER_FLAG != 0
    }

    pub fn is_compressed(&self) -> bool {
        self.flags & COMPRESSED_FLAG != 0
    }

    pub fn encode(&self) -> [u8; HEADER_SIZE] {
        let len = self.length.to_be_bytes();
        [self.flags, len[0], len[1], len[2], len[3]]
    }

    pub fn decode(bytes: &[u8; HEADER_SIZE]) -> Self {
        Self {
            flags: bytes[0],
            length: u32::from_be_bytes([bytes[1], bytes[2], bytes[3], bytes[4]]),
        }
    }
}

/// A complete frame: header plus exactly `header.length` payload bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub header: FrameHeader,
    pub payload: Bytes,
}

/// Appends a data frame wrapping `payload` to `dst`.
///
/// # Panics
///
/// Panics if `payload` is longer than `u32::MAX` bytes, which the wire format cannot express.
pub fn encode_frame(dst: &mut BytesMut, payload: &[u8], compressed: bool) {
    encode_with_header(dst, FrameHeader::data(frame_len(payload), compressed), payload);
}

/// Appends a gRPC-Web trailer frame wrapping the header block `payload` to `dst`.
pub fn encode_trailer_frame(dst: &mut BytesMut, payload: &[u8]) {
    encode_with_header(dst, FrameHeader::trailer(frame_len(payload)), payload);
}

fn encode_with_header(dst: &mut BytesMut, header: FrameHeader, payload: &[u8]) {
    dst.reserve(HEADER_SIZE + payload.len());
    dst.put_slice(&header.encode());
    dst.put_slice(payload);
}

fn frame_len(payload: &[u8]) -> u32 {
    u32::try_from(payload.len()).expect("gRPC frames cannot exceed u32::MAX bytes")
}

/// Reads one frame header from `source` into `raw`, resuming at `*read` bytes.
///
/// Short reads are retried until the header is complete or the source is exhausted. The
/// progress lives in `raw` and `read`, so a `Pending` source can be polled again later.
///
/// # Returns
///
/// * `Ok(Some(header))` - A complete header was read.
/// * `Ok(None)` - The source ended cleanly before the first header byte.
/// * `Err(ProtocolError::TruncatedHeader)` - The source ended after 1 to 4 header bytes.
pub fn poll_read_frame_header<R>(
    mut source: Pin<&mut R>,
    cx: &mut Context<'_>,
    raw: &mut [u8; HEADER_SIZE],
    read: &mut usize,
) -> Poll<Result<Option<FrameHeader>, ProtocolError>>
where
    R: AsyncRead + ?Sized,
{
    while *read < HEADER_SIZE {
        let mut buf = ReadBuf::new(&mut raw[*read..]);
        ready!(source.as_mut().poll_read(cx, &mut buf)).map_err(ProtocolError::from_io)?;
        let n = buf.filled().len();

        if n == 0 {
            return Poll::Ready(match *read {
                0 => Ok(None),
                read => Err(ProtocolError::TruncatedHeader { read }),
            });
        }
        *read += n;
    }
    Poll::Ready(Ok(Some(FrameHeader::decode(raw))))
}

/// Incremental frame splitter for chunked bodies.
///
/// Body chunks are pushed as they arrive; complete frames are popped out in arrival order.
/// A frame is only ever returned once all of its `length` bytes have been buffered.
#[derive(Debug)]
pub struct FrameDecoder {
    buffer: BytesMut,
    header: Option<FrameHeader>,
    max_frame_size: usize,
}

impl FrameDecoder {
    /// Creates a decoder rejecting frames whose declared length exceeds `max_frame_size`.
    pub fn new(max_frame_size: usize) -> Self {
        Self {
            buffer: BytesMut::new(),
            header: None,
            max_frame_size,
        }
    }

    pub fn push(&mut self, chunk: impl Buf) {
        self.buffer.put(chunk);
    }

    /// Pops the next complete frame, if one is fully buffered.
    pub fn next_frame(&mut self) -> Result<Option<Frame>, ProtocolError> {
        let header = match self.header {
            Some(header) => header,
            None => {
                if self.buffer.len() < HEADER_SIZE {
                    return Ok(None);
                }
                let mut raw = [0u8; HEADER_SIZE];
                self.buffer.copy_to_slice(&mut raw);
                let header = FrameHeader::decode(&raw);

                // Check the declared size before buffering the payload.
                if header.length as usize > self.max_frame_size {
                    return Err(ProtocolError::MessageTooLarge {
                        size: header.length as usize,
                        limit: self.max_frame_size,
                    });
                }
                self.header = Some(header);
                header
            }
        };

        if self.buffer.len() < header.length as usize {
            return Ok(None);
        }

        self.header = None;
        let payload = self.buffer.split_to(header.length as usize).freeze();
        Ok(Some(Frame { header, payload }))
    }

    /// Checks that the input ended on a frame boundary.
    pub fn finish(&self) -> Result<(), ProtocolError> {
        match self.header {
            Some(header) => Err(ProtocolError::TruncatedFrame {
                expected: header.length as usize,
                read: self.buffer.len(),
            }),
            None if self.buffer.is_empty() => Ok(()),
            None => Err(ProtocolError::TruncatedHeader {
                read: self.buffer.len(),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_util::ChunkedReader;
    use std::future::poll_fn;

    async fn read_header<R: AsyncRead + Unpin>(
        source: &mut R,
    ) -> Result<Option<FrameHeader>, ProtocolError> {
        let mut raw = [0u8; HEADER_SIZE];
        let mut read = 0;
        poll_fn(|cx| poll_read_frame_header(Pin::new(&mut *source), cx, &mut raw, &mut read)).await
    }

    fn framed(payload: &[u8], compressed: bool) -> Vec<u8> {
        let mut buf = BytesMut::new();
        encode_frame(&mut buf, payload, compressed);
        buf.to_vec()
    }

    #[test]
    fn header_layout_is_big_endian() {
        let bytes = framed(b"abc", false);
        assert_eq!(bytes, vec![0, 0, 0, 0, 3, b'a', b'b', b'c']);

        let header = FrameHeader::decode(&[0x81, 0x01, 0x02, 0x03, 0x04]);
        assert!(header.is_trailer());
        assert!(header.is_compressed());
        assert_eq!(header.length, 0x0102_0304);
    }

    #[tokio::test]
    async fn header_read_retries_short_reads() {
        let wire = framed(b"xy", true);
        let mut source = ChunkedReader::new(wire, 1);

        let header = read_header(&mut source).await.unwrap().unwrap();
        assert_eq!(header, FrameHeader::data(2, true));
    }

    #[tokio::test]
    async fn header_read_distinguishes_clean_end_from_truncation() {
        let mut empty: &[u8] = &[];
        assert!(read_header(&mut empty).await.unwrap().is_none());

        let mut partial: &[u8] = &[0, 0, 0];
        assert!(matches!(
            read_header(&mut partial).await,
            Err(ProtocolError::TruncatedHeader { read: 3 })
        ));
    }

    #[test]
    fn decoder_keeps_flags_and_stops_at_clean_end() {
        let mut decoder = FrameDecoder::new(1024);
        decoder.push(&framed(b"squeezed", true)[..]);
        let mut trailer = BytesMut::new();
        encode_trailer_frame(&mut trailer, b"grpc-status: 0\r\n");
        decoder.push(trailer);

        let data = decoder.next_frame().unwrap().unwrap();
        assert!(data.header.is_compressed());
        assert!(!data.header.is_trailer());
        assert_eq!(data.payload, &b"squeezed"[..]);

        let trailer = decoder.next_frame().unwrap().unwrap();
        assert!(trailer.header.is_trailer());
        assert_eq!(trailer.payload, &b"grpc-status: 0\r\n"[..]);

        assert!(decoder.next_frame().unwrap().is_none());
        decoder.finish().unwrap();
    }

    #[test]
    fn partial_header_is_reported_on_finish() {
        let mut decoder = FrameDecoder::new(1024);
        decoder.push(&[0u8, 0, 0][..]);

        assert!(decoder.next_frame().unwrap().is_none());
        assert!(matches!(
            decoder.finish(),
            Err(ProtocolError::TruncatedHeader { read: 3 })
        ));
    }

    #[test]
    fn decoder_waits_for_complete_frames() {
        let mut wire = framed(b"first", false);
        wire.extend(framed(b"", false));
        wire.extend(framed(b"second", true));

        let mut decoder = FrameDecoder::new(1024);
        let mut frames = Vec::new();

        for byte in wire {
            decoder.push(&[byte][..]);
            while let Some(frame) = decoder.next_frame().unwrap() {
                frames.push(frame);
            }
        }
        decoder.finish().unwrap();

        assert_eq!(frames.len(), 3);
        assert_eq!(frames[0].payload, &b"first"[..]);
        assert!(frames[1].payload.is_empty());
        assert_eq!(frames[2].payload, &b"second"[..]);
        assert!(frames[2].header.is_compressed());
    }

    #[test]
    fn decoder_rejects_oversized_frames() {
        let mut decoder = FrameDecoder::new(4);
        decoder.push(&framed(b"hello", false)[..]);

        assert!(matches!(
            decoder.next_frame(),
            Err(ProtocolError::MessageTooLarge { size: 5, limit: 4 })
        ));
    }

    #[test]
    fn decoder_reports_truncation_on_finish() {
        let mut decoder = FrameDecoder::new(1024);
        decoder.push(&framed(b"hello", false)[..7]);

        assert!(decoder.next_frame().unwrap().is_none());
        assert!(matches!(
            decoder.finish(),
            Err(ProtocolError::TruncatedFrame {
                expected: 5,
                read: 2
            })
        ));
    }
}
