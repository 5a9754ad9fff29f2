//! A reader with adversarial chunking for exercising the stream adapters.
use std::io;
use std::pin::Pin;
use std::task::{Context, Poll};
use tokio::io::{AsyncRead, ReadBuf};

/// Serves `bytes` at most `chunk` bytes per read, yielding `Pending` before every chunk.
pub struct ChunkedReader {
    bytes: Vec<u8>,
    pos: usize,
    chunk: usize,
    yielded: bool,
    pub zero_reads: usize,
}

impl ChunkedReader {
    pub fn new(bytes: impl Into<Vec<u8>>, chunk: usize) -> Self {
        Self {
            bytes: bytes.into(),
            pos: 0,
            chunk: chunk.max(1),
            yielded: false,
            zero_reads: 0,
        }
    }
}

impl AsyncRead for ChunkedReader {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        if buf.remaining() == 0 {
            self.zero_reads += 1;
            return Poll::Ready(Ok(()));
        }

        if !self.yielded {
            self.yielded = true;
            cx.waker().wake_by_ref();
            return Poll::Pending;
        }
        self.yielded = false;

        let end = (self.pos + self.chunk.min(buf.remaining())).min(self.bytes.len());
        buf.put_slice(&self.bytes[self.pos..end]);
        self.pos = end;
        Poll::Ready(Ok(()))
    }
}
