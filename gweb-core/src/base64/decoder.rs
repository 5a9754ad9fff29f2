use super::DEFAULT_SCRATCH_SIZE;
use crate::error::ProtocolError;
use crate::pool::{BufferPool, PooledBuffer};
use ::base64::{Engine, engine::general_purpose::STANDARD};
use std::io;
use std::pin::Pin;
use std::task::{Context, Poll, ready};
use tokio::io::{AsyncRead, ReadBuf};

const PAD: u8 = b'=';

/// Decodes complete 4-character groups from `encoded` into `out`.
///
/// `encoded.len()` must be a multiple of 4 and `out` must hold `encoded.len() / 4 * 3` bytes.
/// Padding may close a segment anywhere in the input: the input is scanned for `=` and every
/// padded group ends one independently decoded segment. Returns the number of decoded bytes.
pub fn decode_groups(encoded: &[u8], out: &mut [u8]) -> Result<usize, ProtocolError> {
    debug_assert_eq!(encoded.len() % 4, 0);

    let mut pos = 0;
    let mut written = 0;

    while pos < encoded.len() {
        let Some(pad) = encoded[pos..].iter().position(|&c| c == PAD) else {
            let groups = &encoded[pos..];
            written += decode_slice(groups, &mut out[written..written + groups.len() / 4 * 3])?;
            break;
        };

        let group_start = pos + pad / 4 * 4;
        if group_start > pos {
            let groups = &encoded[pos..group_start];
            written += decode_slice(groups, &mut out[written..written + groups.len() / 4 * 3])?;
        }

        let mut last = [0u8; 3];
        let n = decode_slice(&encoded[group_start..group_start + 4], &mut last)?;
        out[written..written + n].copy_from_slice(&last[..n]);
        written += n;
        pos = group_start + 4;
    }

    Ok(written)
}

fn decode_slice(encoded: &[u8], out: &mut [u8]) -> Result<usize, ProtocolError> {
    STANDARD
        .decode_slice(encoded, out)
        .map_err(|err| ProtocolError::MalformedBase64(err.to_string()))
}

/// An [`AsyncRead`] adapter decoding base64 text read from the inner reader.
///
/// Reads from the inner reader in multiples of 4 characters sized after the caller's buffer.
/// Characters of an incomplete group are kept for the next read. When the caller's buffer
/// cannot hold a whole decoded group, the bytes that did not fit (at most 2) are returned by
/// the next read before anything else.
#[derive(Debug)]
pub struct Base64Decoder<R> {
    inner: R,
    scratch: PooledBuffer,
    /// Undecoded characters at the start of `scratch`.
    held: usize,
    residue: [u8; 2],
    residue_len: usize,
}

impl<R> Base64Decoder<R>
where
    R: AsyncRead + Unpin,
{
    pub fn new(inner: R, pool: &BufferPool) -> Self {
        Self::with_scratch_size(inner, pool, DEFAULT_SCRATCH_SIZE)
    }

    /// Creates a decoder reading at most `scratch_size` characters at a time (rounded down to
    /// a multiple of 4, at least 4).
    pub fn with_scratch_size(inner: R, pool: &BufferPool, scratch_size: usize) -> Self {
        let scratch_size = (scratch_size & !3).max(4);
        Self {
            inner,
            scratch: pool.checkout(scratch_size),
            held: 0,
            residue: [0; 2],
            residue_len: 0,
        }
    }

    pub fn get_ref(&self) -> &R {
        &self.inner
    }

    /// Releases the scratch buffer back to its pool and returns the inner reader.
    pub fn into_inner(self) -> R {
        self.inner
    }

    fn take_residue(&mut self, buf: &mut ReadBuf<'_>) {
        let n = self.residue_len.min(buf.remaining());
        buf.put_slice(&self.residue[..n]);
        self.residue.copy_within(n..self.residue_len, 0);
        self.residue_len -= n;
    }

    /// Decodes held groups into `buf`. Returns the number of bytes produced.
    fn decode_held(&mut self, buf: &mut ReadBuf<'_>) -> Result<usize, ProtocolError> {
        let groups_held = self.held / 4;
        let groups_fit = buf.remaining() / 3;

        let (consumed, produced) = if groups_fit == 0 {
            // The caller's buffer is smaller than one decoded group.
            let mut group = [0u8; 3];
            let n = decode_groups(&self.scratch[..4], &mut group)?;
            let fits = n.min(buf.remaining());
            buf.put_slice(&group[..fits]);
            self.residue[..n - fits].copy_from_slice(&group[fits..n]);
            self.residue_len = n - fits;
            (4, fits)
        } else {
            let groups = groups_held.min(groups_fit);
            let encoded = &self.scratch[..groups * 4];
            let out = buf.initialize_unfilled_to(groups * 3);
            let n = decode_groups(encoded, out)?;
            buf.advance(n);
            (groups * 4, n)
        };

        self.scratch.copy_within(consumed..self.held, 0);
        self.held -= consumed;
        Ok(produced)
    }
}

impl<R> AsyncRead for Base64Decoder<R>
where
    R: AsyncRead + Unpin,
{
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let this = self.get_mut();

        // Zero-length probes go straight to the source.
        if buf.remaining() == 0 {
            return Pin::new(&mut this.inner).poll_read(cx, buf);
        }

        if this.residue_len > 0 {
            this.take_residue(buf);
            return Poll::Ready(Ok(()));
        }

        loop {
            if this.held >= 4 {
                let produced = this.decode_held(buf)?;
                if produced > 0 {
                    return Poll::Ready(Ok(()));
                }
                continue;
            }

            // Ask for enough characters to fill the caller's buffer, in whole groups.
            let wanted = (buf.remaining() / 3 * 4).max(4);
            let limit = wanted.min(this.scratch.len());

            let mut read_buf = ReadBuf::new(&mut this.scratch[this.held..limit]);
            ready!(Pin::new(&mut this.inner).poll_read(cx, &mut read_buf))?;
            let n = read_buf.filled().len();

            if n == 0 {
                if this.held > 0 {
                    return Poll::Ready(Err(ProtocolError::TruncatedBase64(this.held).into()));
                }
                return Poll::Ready(Ok(()));
            }
            this.held += n;
        }
    }
}
