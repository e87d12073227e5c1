//! Interval-based progress reporting for byte streams

use crate::events::{Event, EventSink};
use std::future::Future;
use std::io;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;
use tokio::io::{AsyncRead, ReadBuf};
use tokio::time::{sleep, Instant, Sleep};

/// Default interval between progress updates.
pub const DEFAULT_PROGRESS_INTERVAL: Duration = Duration::from_secs(5);

/// Highest percentage reported before the stream has ended.
const MAX_IN_FLIGHT_PERCENT: u64 = 99;

/// Reader that counts bytes and periodically reports them to an [`EventSink`].
///
/// Updates follow a wall-clock timer rather than reads, so a stalled stream
/// keeps reporting its byte count while the consumer is waiting on it. Must be
/// created inside a tokio runtime.
pub struct ProgressReader<R> {
    inner: R,
    operation: String,
    events: Arc<dyn EventSink>,
    size_hint: i64,
    interval: Duration,
    bytes: u64,
    ticker: Pin<Box<Sleep>>,
    finished: bool,
}

impl<R: AsyncRead + Unpin> ProgressReader<R> {
    pub fn new(
        inner: R,
        operation: impl Into<String>,
        events: Arc<dyn EventSink>,
        size_hint: i64,
        interval: Duration,
    ) -> Self {
        Self {
            inner,
            operation: operation.into(),
            events,
            size_hint,
            interval,
            bytes: 0,
            ticker: Box::pin(sleep(interval)),
            finished: false,
        }
    }

    /// Bytes read so far.
    pub fn bytes(&self) -> u64 {
        self.bytes
    }

    fn percent(&self) -> Option<u8> {
        if self.size_hint <= 0 {
            return None;
        }
        let percent = self.bytes.saturating_mul(100) / self.size_hint as u64;
        Some(percent.min(MAX_IN_FLIGHT_PERCENT) as u8)
    }
}

impl<R: AsyncRead + Unpin> AsyncRead for ProgressReader<R> {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let before = buf.filled().len();
        let this = &mut *self;

        let poll = Pin::new(&mut this.inner).poll_read(cx, buf);
        if let Poll::Ready(Ok(())) = &poll {
            let read = (buf.filled().len() - before) as u64;
            if read == 0 && buf.remaining() > 0 {
                if !this.finished {
                    this.finished = true;
                    this.events.emit(Event::finish(
                        this.operation.clone(),
                        format!("{} bytes transferred", this.bytes),
                    ));
                }
            } else {
                this.bytes += read;
            }
        }

        let due = this.ticker.deadline() <= Instant::now()
            || this.ticker.as_mut().poll(cx).is_ready();
        if !this.finished && due {
            this.events.emit(Event::update(
                this.operation.clone(),
                this.bytes,
                this.percent(),
            ));
            this.ticker.as_mut().reset(Instant::now() + this.interval);
            // registers the waker for the next tick
            let _ = this.ticker.as_mut().poll(cx);
        }

        poll
    }
}
