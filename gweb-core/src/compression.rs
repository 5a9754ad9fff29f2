//! # Message Compression
//!
//! A compressed frame (flag bit 0 set) is decompressed with the algorithm named by the
//! response's `grpc-encoding` header. `gzip` and `deflate` are supported through `flate2`.
//!
//! Decompression is bounded: a message inflating past the receive limit is rejected with
//! [`ProtocolError::MessageTooLarge`] instead of being buffered in full.
use crate::error::ProtocolError;
use bytes::Bytes;
use flate2::read::{GzDecoder, ZlibDecoder};
use flate2::write::{GzEncoder, ZlibEncoder};
use http::HeaderValue;
use std::io::{self, Read, Write};

pub const GRPC_ENCODING: &str = "grpc-encoding";
pub const GRPC_ACCEPT_ENCODING: &str = "grpc-accept-encoding";

/// A message compression algorithm.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Encoding {
    Gzip,
    Deflate,
}

impl Encoding {
    pub fn as_str(self) -> &'static str {
        match self {
            Encoding::Gzip => "gzip",
            Encoding::Deflate => "deflate",
        }
    }

    /// Resolves a `grpc-encoding` value.
    ///
    /// # Returns
    ///
    /// * `Ok(None)` - `identity`: messages are not compressed.
    /// * `Ok(Some(encoding))` - A supported algorithm.
    /// * `Err(ProtocolError::UnsupportedEncoding)` - Anything else.
    pub fn from_name(name: &str) -> Result<Option<Self>, ProtocolError> {
        match name.trim() {
            "identity" => Ok(None),
            "gzip" => Ok(Some(Encoding::Gzip)),
            "deflate" => Ok(Some(Encoding::Deflate)),
            other => Err(ProtocolError::UnsupportedEncoding(other.to_string())),
        }
    }

    /// Builds the `grpc-accept-encoding` value advertising `encodings`.
    pub fn accept_header(encodings: &[Encoding]) -> Option<HeaderValue> {
        if encodings.is_empty() {
            return None;
        }
        let names: Vec<_> = encodings.iter().map(|e| e.as_str()).collect();
        HeaderValue::from_str(&names.join(",")).ok()
    }

    /// Inflates `payload`, refusing output larger than `limit` bytes.
    pub fn decompress(self, payload: &[u8], limit: usize) -> Result<Bytes, ProtocolError> {
        match self {
            Encoding::Gzip => read_bounded(GzDecoder::new(payload), limit),
            Encoding::Deflate => read_bounded(ZlibDecoder::new(payload), limit),
        }
    }

    pub fn compress(self, payload: &[u8]) -> io::Result<Bytes> {
        let out = Vec::with_capacity(payload.len() / 2);
        let out = match self {
            Encoding::Gzip => {
                let mut encoder = GzEncoder::new(out, flate2::Compression::default());
                encoder.write_all(payload)?;
                encoder.finish()?
            }
            Encoding::Deflate => {
                let mut encoder = ZlibEncoder::new(out, flate2::Compression::default());
                encoder.write_all(payload)?;
                encoder.finish()?
            }
        };
        Ok(Bytes::from(out))
    }
}

fn read_bounded<R: Read>(decoder: R, limit: usize) -> Result<Bytes, ProtocolError> {
    let mut out = Vec::new();
    // One byte past the limit is enough to tell an oversized message apart.
    let read = decoder
        .take(limit as u64 + 1)
        .read_to_end(&mut out)
        .map_err(ProtocolError::Decompress)?;

    if read > limit {
        return Err(ProtocolError::MessageTooLarge { size: read, limit });
    }
    Ok(Bytes::from(out))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn compressed_payloads_inflate_back() {
        let payload = b"hello hello hello hello hello hello".repeat(10);

        for encoding in [Encoding::Gzip, Encoding::Deflate] {
            let compressed = encoding.compress(&payload).unwrap();
            assert!(compressed.len() < payload.len());

            let inflated = encoding.decompress(&compressed, 4096).unwrap();
            assert_eq!(inflated, payload);
        }
    }

    #[test]
    fn inflation_past_the_limit_is_rejected() {
        let payload = vec![0u8; 10_000];
        let compressed = Encoding::Gzip.compress(&payload).unwrap();

        assert!(matches!(
            Encoding::Gzip.decompress(&compressed, 1000),
            Err(ProtocolError::MessageTooLarge { limit: 1000, .. })
        ));
    }

    #[test]
    fn corrupt_input_is_a_decompression_error() {
        assert!(matches!(
            Encoding::Deflate.decompress(b"definitely not zlib", 1024),
            Err(ProtocolError::Decompress(_))
        ));
    }

    #[test]
    fn encoding_names_are_resolved() {
        assert_eq!(Encoding::from_name("gzip").unwrap(), Some(Encoding::Gzip));
        assert_eq!(Encoding::from_name("identity").unwrap(), None);
        assert!(matches!(
            Encoding::from_name("br"),
            Err(ProtocolError::UnsupportedEncoding(name)) if name == "br"
        ));
    }

    #[test]
    fn accept_header_lists_every_encoding() {
        let value = Encoding::accept_header(&[Encoding::Gzip, Encoding::Deflate]).unwrap();
        assert_eq!(value, "gzip,deflate");
        assert!(Encoding::accept_header(&[]).is_none());
    }
}
