//! Incremental read throttle.
//!
//! Wraps an [AsyncRead] and bounds how many bytes may arrive within any
//! rolling time window. A peer pushing more than the allowance has its read
//! terminated with an error, which bounds the size of a response the client
//! can be made to buffer per interval.

use std::collections::VecDeque;
use std::io;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::{Duration, Instant};

use tokio::io::{AsyncRead, ReadBuf};

use crate::clock::Clock;

pub struct ThrottledReader<R> {
    inner: R,
    clock: Arc<dyn Clock>,
    limit: usize,
    window: Duration,
    // (arrival instant, byte count) of reads still inside the window
    history: VecDeque<(Instant, usize)>,
}

impl<R> ThrottledReader<R> {
    pub fn new(
        inner: R,
        limit: usize,
        window: Duration,
        clock: Arc<dyn Clock>,
    ) -> ThrottledReader<R> {
        ThrottledReader { inner, clock, limit, window, history: VecDeque::new() }
    }

    fn bytes_in_window(&mut self, now: Instant) -> usize {
        while let Some((at, _)) = self.history.front() {
            if now.saturating_duration_since(*at) >= self.window {
                self.history.pop_front();
            } else {
                break;
            }
        }
        self.history.iter().map(|(_, n)| n).sum()
    }
}

impl<R: AsyncRead + Unpin> AsyncRead for ThrottledReader<R> {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let this = self.get_mut();
        let now = this.clock.now();
        let in_window = this.bytes_in_window(now);
        if in_window >= this.limit {
            return Poll::Ready(Err(io::Error::new(
                io::ErrorKind::Other,
                "read throttle exceeded: too many bytes within interval",
            )));
        }

        let allowed = (this.limit - in_window).min(buf.remaining());
        let slice = buf.initialize_unfilled_to(allowed);
        let mut limited = ReadBuf::new(slice);
        match Pin::new(&mut this.inner).poll_read(cx, &mut limited) {
            Poll::Ready(Ok(())) => {
                let n = limited.filled().len();
                if n > 0 {
                    this.history.push_back((now, n));
                }
                buf.advance(n);
                Poll::Ready(Ok(()))
            }
            other => other,
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::clock::test::ManualClock;
    use crate::clock::SystemClock;
    use tokio::io::AsyncReadExt;

    const LIMIT: usize = 50 << 10;
    const WINDOW: Duration = Duration::from_secs(5);

    #[tokio::test]
    async fn test_small_read_passes() {
        let data = vec![7u8; 1024];
        let mut reader =
            ThrottledReader::new(data.as_slice(), LIMIT, WINDOW, Arc::new(SystemClock));

        let mut out = Vec::new();
        reader.read_to_end(&mut out).await.unwrap();
        assert_eq!(out, data);
    }

    #[tokio::test]
    async fn test_burst_over_limit_errors() {
        let data = vec![7u8; LIMIT + 1];
        let clock = Arc::new(ManualClock::new());
        let mut reader = ThrottledReader::new(data.as_slice(), LIMIT, WINDOW, clock);

        let mut out = Vec::new();
        match reader.read_to_end(&mut out).await {
            Err(err) => assert_eq!(err.kind(), io::ErrorKind::Other),
            Ok(n) => panic!("unexpected: read {} bytes", n),
        }
    }

    #[tokio::test]
    async fn test_window_expiry_resets_allowance() {
        let data = vec![7u8; LIMIT + 1024];
        let clock = Arc::new(ManualClock::new());
        let mut reader = ThrottledReader::new(data.as_slice(), LIMIT, WINDOW, clock.clone());

        let mut head = vec![0u8; LIMIT];
        reader.read_exact(&mut head).await.unwrap();

        clock.advance(WINDOW);

        let mut tail = vec![0u8; 1024];
        reader.read_exact(&mut tail).await.unwrap();
        assert_eq!(tail, vec![7u8; 1024]);
    }
}
