//! # Base64 Streaming Codec
//!
//! The `application/grpc-web-text` content type carries the whole gRPC-Web body (every frame,
//! trailer frame included) as base64 text. Bodies arrive and leave in arbitrary chunks, so the
//! codec works incrementally:
//!
//! * [`EncoderState`]: binary → base64. Bytes that do not complete a 3-byte quantum are held
//!   back as residue until more input arrives or the segment is finished with padding.
//! * [`Base64Decoder`]: base64 → binary. Incomplete 4-character groups are kept until the rest
//!   arrives, decoded bytes that do not fit the caller's buffer are handed out on the next read.
//!   Padding may appear in the middle of a stream when several padded segments were
//!   concatenated; each segment is decoded on its own.
//!
//! The async decoder takes its scratch space from a [`crate::pool::BufferPool`].
mod decoder;
mod encoder;

pub use decoder::{Base64Decoder, decode_groups};
pub use encoder::EncoderState;

/// Default scratch size, in base64 characters, for [`Base64Decoder`]. Multiple of 4.
pub const DEFAULT_SCRATCH_SIZE: usize = 4096;

/// Length of the padded base64 encoding of `n` input bytes, i.e. `ceil(n / 3) * 4`.
pub const fn encoded_len(n: u64) -> u64 {
    (4 * n / 3 + 3) & !3
}

#[cfg(test)]
mod tests {
    use super::*;
    use ::base64::{Engine, engine::general_purpose::STANDARD};

    #[test]
    fn encoded_len_matches_padded_output() {
        for n in [0usize, 1, 2, 3, 4, 5, 6, 100, 101, 102] {
            let input = vec![0xa5u8; n];
            let expected = STANDARD.encode(&input).len() as u64;
            assert_eq!(encoded_len(n as u64), expected, "n = {n}");
            assert_eq!(encoded_len(n as u64), (n as u64).div_ceil(3) * 4, "n = {n}");
        }
    }
}
