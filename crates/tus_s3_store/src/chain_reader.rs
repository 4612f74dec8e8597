use std::io::Cursor;
use std::pin::Pin;
use std::task::{Context, Poll};

use tokio::io::{AsyncRead, ReadBuf};

/// Prepends buffered bytes (an incomplete part re-absorbed from a previous
/// `writeChunk`) in front of the client's streaming body, so the part
/// producer sees one logical, continuous byte stream.
pub struct ChainReader<R> {
    prefix: Cursor<Vec<u8>>,
    rest: R,
}

impl<R: AsyncRead + Unpin> ChainReader<R> {
    pub fn new(prefix: Vec<u8>, rest: R) -> Self {
        Self {
            prefix: Cursor::new(prefix),
            rest,
        }
    }
}

impl<R: AsyncRead + Unpin> AsyncRead for ChainReader<R> {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<std::io::Result<()>> {
        let prefix_remaining = self.prefix.get_ref().len() as u64 - self.prefix.position();
        if prefix_remaining > 0 {
            let before = buf.filled().len();
            std::io::Read::read(&mut self.prefix, buf.initialize_unfilled())
                .map(|n| buf.set_filled(before + n))?;
            if buf.filled().len() > before {
                return Poll::Ready(Ok(()));
            }
        }
        Pin::new(&mut self.rest).poll_read(cx, buf)
    }
}

#[cfg(test)]
mod tests {
    use tokio::io::AsyncReadExt;

    use super::*;

    #[tokio::test]
    async fn reads_prefix_then_rest() {
        let mut chained = ChainReader::new(b"hello".to_vec(), Cursor::new(b"world".to_vec()));
        let mut out = Vec::new();
        chained.read_to_end(&mut out).await.unwrap();
        assert_eq!(out, b"helloworld");
    }

    #[tokio::test]
    async fn empty_prefix_reads_rest_only() {
        let mut chained = ChainReader::new(Vec::new(), Cursor::new(b"world".to_vec()));
        let mut out = Vec::new();
        chained.read_to_end(&mut out).await.unwrap();
        assert_eq!(out, b"world");
    }
}
