use ::base64::{Engine, engine::general_purpose::STANDARD};
use bytes::BytesMut;

/// Synchronous core of the streaming encoder.
///
/// Holds up to 2 bytes of residue between calls. Output is always a whole number of 4-character
/// groups; the padded final group is only produced by [`EncoderState::finish_into`].
#[derive(Debug, Default, Clone)]
pub struct EncoderState {
    residue: [u8; 2],
    residue_len: usize,
}

impl EncoderState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bytes waiting for a complete quantum.
    pub fn residue(&self) -> &[u8] {
        &self.residue[..self.residue_len]
    }

    /// Encodes as much of `input` as fits into `out`.
    ///
    /// Returns `(consumed, written)`. Trailing input bytes that do not complete a quantum are
    /// moved into the residue and count as consumed. Input left unconsumed only when `out`
    /// is full.
    pub fn encode_into(&mut self, input: &[u8], out: &mut [u8]) -> (usize, usize) {
        let mut consumed = 0;
        let mut written = 0;

        if self.residue_len > 0 {
            let need = 3 - self.residue_len;
            if input.len() < need {
                self.stash(input);
                return (input.len(), 0);
            }
            if out.len() < 4 {
                return (0, 0);
            }

            let mut quantum = [0u8; 3];
            quantum[..self.residue_len].copy_from_slice(self.residue());
            quantum[self.residue_len..].copy_from_slice(&input[..need]);
            written += encode_exact(&quantum, &mut out[..4]);
            consumed += need;
            self.residue_len = 0;
        }

        let rest = &input[consumed..];
        let available = rest.len() / 3;
        let quanta = available.min((out.len() - written) / 4);

        written += encode_exact(&rest[..quanta * 3], &mut out[written..written + quanta * 4]);
        consumed += quanta * 3;

        if quanta == available {
            self.stash(&input[consumed..]);
            consumed = input.len();
        }

        (consumed, written)
    }

    /// Encodes the residue as a final padded group into `out`.
    ///
    /// Returns the number of characters written: 0 when there is no residue, 4 otherwise.
    /// Calling it again right away writes nothing.
    pub fn finish_into(&mut self, out: &mut [u8; 4]) -> usize {
        if self.residue_len == 0 {
            return 0;
        }
        let written = encode_exact(&self.residue[..self.residue_len], out);
        self.residue_len = 0;
        written
    }

    /// Appends the encoding of `input` to `dst`, keeping incomplete quanta as residue.
    pub fn encode(&mut self, input: &[u8], dst: &mut BytesMut) {
        let start = dst.len();
        let max = ((self.residue_len + input.len()) / 3) * 4;
        dst.resize(start + max, 0);

        let (_, written) = self.encode_into(input, &mut dst[start..]);
        dst.truncate(start + written);
    }

    /// Appends the padded final group, if any, to `dst`.
    pub fn finish(&mut self, dst: &mut BytesMut) {
        let mut group = [0u8; 4];
        let written = self.finish_into(&mut group);
        dst.extend_from_slice(&group[..written]);
    }

    fn stash(&mut self, bytes: &[u8]) {
        debug_assert!(self.residue_len + bytes.len() <= 2);
        self.residue[self.residue_len..self.residue_len + bytes.len()].copy_from_slice(bytes);
        self.residue_len += bytes.len();
    }
}

fn encode_exact(input: &[u8], out: &mut [u8]) -> usize {
    STANDARD
        .encode_slice(input, out)
        .expect("output is sized for the padded encoding")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn encode_in_chunks(input: &[u8], chunk: usize) -> Vec<u8> {
        let mut state = EncoderState::new();
        let mut out = BytesMut::new();
        for piece in input.chunks(chunk.max(1)) {
            state.encode(piece, &mut out);
        }
        state.finish(&mut out);
        out.to_vec()
    }

    #[test]
    fn chunked_encoding_matches_one_shot() {
        let input: Vec<u8> = (0..=255u8).cycle().take(1000).collect();
        let expected = STANDARD.encode(&input);

        for chunk in [1, 2, 3, 4, 5, 7, 64, 1000] {
            assert_eq!(
                String::from_utf8(encode_in_chunks(&input, chunk)).unwrap(),
                expected,
                "chunk = {chunk}"
            );
        }
    }

    #[test]
    fn short_writes_are_held_back() {
        let mut state = EncoderState::new();
        let mut out = BytesMut::new();

        state.encode(b"a", &mut out);
        assert!(out.is_empty());
        state.encode(b"b", &mut out);
        assert!(out.is_empty());
        assert_eq!(state.residue(), b"ab");

        state.encode(b"c", &mut out);
        assert_eq!(&out[..], b"YWJj");
        assert!(state.residue().is_empty());
    }

    #[test]
    fn complete_quanta_are_emitted_immediately() {
        let mut state = EncoderState::new();
        let mut out = BytesMut::new();

        state.encode(b"abcdef", &mut out);
        assert_eq!(&out[..], b"YWJjZGVm");
    }

    #[test]
    fn finish_is_idempotent() {
        let mut state = EncoderState::new();
        let mut out = BytesMut::new();

        state.encode(b"abcd", &mut out);
        state.finish(&mut out);
        assert_eq!(&out[..], b"YWJjZA==");

        state.finish(&mut out);
        state.finish(&mut out);
        assert_eq!(&out[..], b"YWJjZA==");
    }

    #[test]
    fn encode_into_stops_when_output_is_full() {
        let mut state = EncoderState::new();
        let mut out = [0u8; 4];

        let (consumed, written) = state.encode_into(b"abcdef", &mut out);
        assert_eq!((consumed, written), (3, 4));
        assert_eq!(&out, b"YWJj");
        assert!(state.residue().is_empty());
    }
}
