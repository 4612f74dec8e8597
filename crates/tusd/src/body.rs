use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicI64, Ordering};
use std::task::{Context, Poll};
use std::time::{Duration, Instant};

use tokio::io::{AsyncRead, ReadBuf};
use tokio::sync::mpsc;

use crate::checksum::UploadChecksum;

/// Wraps the PATCH request body: counts bytes as they're read (so a
/// mid-stream disconnect still reports how much was durably seen by the
/// time the underlying store stops reading), optionally verifies a
/// checksum, and emits coalesced progress notifications no more than once
/// per `progress_interval`.
pub struct TrackedBody<R> {
    inner: R,
    checksum: Option<UploadChecksum>,
    count: Arc<AtomicI64>,
    progress: Option<ProgressEmitter>,
}

struct ProgressEmitter {
    tx: mpsc::Sender<i64>,
    interval: Duration,
    last_sent: Instant,
}

impl<R: AsyncRead + Unpin> TrackedBody<R> {
    pub fn new(inner: R) -> Self {
        Self {
            inner,
            checksum: None,
            count: Arc::new(AtomicI64::new(0)),
            progress: None,
        }
    }

    pub fn with_checksum(mut self, checksum: UploadChecksum) -> Self {
        self.checksum = Some(checksum);
        self
    }

    pub fn with_progress(mut self, tx: mpsc::Sender<i64>, interval: Duration) -> Self {
        self.progress = Some(ProgressEmitter {
            tx,
            interval,
            last_sent: Instant::now() - interval,
        });
        self
    }

    pub fn bytes_read(&self) -> i64 {
        self.count.load(Ordering::Relaxed)
    }

    /// Consumes the wrapper, returning the checksum verifier (if any) so
    /// the caller can validate it once the whole body has been read.
    pub fn into_checksum(self) -> Option<UploadChecksum> {
        self.checksum
    }
}

impl<R: AsyncRead + Unpin> AsyncRead for TrackedBody<R> {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<std::io::Result<()>> {
        let this = self.get_mut();
        let before = buf.filled().len();
        let poll = Pin::new(&mut this.inner).poll_read(cx, buf);
        if poll.is_ready() {
            let new_bytes = &buf.filled()[before..];
            if !new_bytes.is_empty() {
                this.count.fetch_add(new_bytes.len() as i64, Ordering::Relaxed);
                if let Some(checksum) = this.checksum.as_mut() {
                    checksum.update(new_bytes);
                }
                if let Some(progress) = this.progress.as_mut() {
                    if progress.last_sent.elapsed() >= progress.interval {
                        progress.last_sent = Instant::now();
                        let _ = progress.tx.try_send(this.count.load(Ordering::Relaxed));
                    }
                }
            }
        }
        poll
    }
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;

    use tokio::io::AsyncReadExt;

    use super::*;

    #[tokio::test]
    async fn counts_bytes_read() {
        let mut body = TrackedBody::new(Cursor::new(b"hello world".to_vec()));
        let mut out = Vec::new();
        body.read_to_end(&mut out).await.unwrap();
        assert_eq!(body.bytes_read(), 11);
    }
}
