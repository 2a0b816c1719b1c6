//! Stream relay between a child's output pipe and its readers
//!
//! One drain worker moves bytes from the pipe into the relay as fast as the child writes them,
//! so the child never stalls on a full pipe buffer no matter how slowly the caller reads.
//! Readers either block (`std::io::Read`, for plain threads) or park a waker
//! (`tokio::io::AsyncRead`, inside a runtime).
//!
//! End-of-stream is only reported once the producer is closed AND the buffer is empty.

use std::collections::VecDeque;
use std::fmt;
use std::io::{self, Read};
use std::pin::Pin;
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::task::{Context, Poll, Waker};

use serde::Serialize;
use tokio::io::{AsyncRead, AsyncReadExt, ReadBuf};
use tokio::sync::watch;

use crate::error::ClosedRelayError;

/// Size of each read from the underlying pipe
const DRAIN_CHUNK_SIZE: usize = 8 * 1024;

/// Which output pipe a relay is attached to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum StreamKind {
    Stdout,
    Stderr,
}

impl fmt::Display for StreamKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StreamKind::Stdout => write!(f, "stdout"),
            StreamKind::Stderr => write!(f, "stderr"),
        }
    }
}

#[derive(Default)]
struct RelayState {
    buffer: VecDeque<u8>,
    producer_closed: bool,
    consumer_closed: bool,
    waiting_readers: usize,
    wakers: Vec<Waker>,
    error: Option<io::Error>,
}

impl RelayState {
    /// Move up to `dst.len()` buffered bytes into `dst`
    fn take_into(&mut self, dst: &mut [u8]) -> usize {
        let n = dst.len().min(self.buffer.len());
        for (slot, byte) in dst.iter_mut().zip(self.buffer.drain(..n)) {
            *slot = byte;
        }
        n
    }
}

struct Shared {
    kind: StreamKind,
    state: Mutex<RelayState>,
    /// Signalled on write, broadcast on producer/consumer close
    readable: Condvar,
    /// Broadcast once the producer is closed
    drained: Condvar,
    closed_tx: watch::Sender<bool>,
}

/// Concurrency-safe single-producer, multi-consumer byte relay
///
/// Cloning yields another handle to the same relay.
#[derive(Clone)]
pub struct StreamRelay {
    inner: Arc<Shared>,
}

impl fmt::Debug for StreamRelay {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.lock();
        f.debug_struct("StreamRelay")
            .field("kind", &self.inner.kind)
            .field("buffered", &state.buffer.len())
            .field("producer_closed", &state.producer_closed)
            .field("consumer_closed", &state.consumer_closed)
            .field("waiting_readers", &state.waiting_readers)
            .finish()
    }
}

impl StreamRelay {
    /// Create an empty, open relay
    pub fn new(kind: StreamKind) -> Self {
        let (closed_tx, _) = watch::channel(false);
        Self {
            inner: Arc::new(Shared {
                kind,
                state: Mutex::new(RelayState::default()),
                readable: Condvar::new(),
                drained: Condvar::new(),
                closed_tx,
            }),
        }
    }

    /// The pipe this relay carries
    pub fn kind(&self) -> StreamKind {
        self.inner.kind
    }

    // Every mutation completes before the guard drops, so a poisoned state is still consistent.
    fn lock(&self) -> MutexGuard<'_, RelayState> {
        self.inner.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Append bytes and wake a waiting reader
    ///
    /// # Errors
    /// * `ClosedRelayError` - the consumer side was closed with `close()`
    pub fn write(&self, bytes: &[u8]) -> Result<usize, ClosedRelayError> {
        let mut state = self.lock();
        if state.consumer_closed {
            return Err(ClosedRelayError);
        }
        if bytes.is_empty() {
            return Ok(0);
        }
        state.buffer.extend(bytes);
        let wakers = std::mem::take(&mut state.wakers);
        drop(state);

        self.inner.readable.notify_one();
        wakers.into_iter().for_each(Waker::wake);
        Ok(bytes.len())
    }

    /// Blocking read of up to `dst.len()` bytes
    ///
    /// Waits while the buffer is empty and the producer is still open. Returns 0 only at
    /// end-of-stream (or when `dst` is empty).
    pub fn read_chunk(&self, dst: &mut [u8]) -> usize {
        if dst.is_empty() {
            return 0;
        }

        let mut state = self.lock();
        while state.buffer.is_empty() && !state.producer_closed {
            state.waiting_readers += 1;
            state = self
                .inner
                .readable
                .wait(state)
                .unwrap_or_else(PoisonError::into_inner);
            state.waiting_readers -= 1;
        }
        state.take_into(dst)
    }

    /// Signal that no more bytes will be written
    ///
    /// Wakes every blocked reader and every `await_producer_closed` waiter. Idempotent.
    pub fn mark_producer_closed(&self) {
        let mut state = self.lock();
        if state.producer_closed {
            return;
        }
        state.producer_closed = true;
        let wakers = std::mem::take(&mut state.wakers);
        drop(state);

        self.inner.readable.notify_all();
        self.inner.drained.notify_all();
        wakers.into_iter().for_each(Waker::wake);
        self.inner.closed_tx.send_replace(true);
        tracing::trace!(stream = %self.inner.kind, "producer closed");
    }

    /// Record a drain failure, then close the producer side
    ///
    /// Only the first error is kept.
    pub fn fail(&self, error: io::Error) {
        {
            let mut state = self.lock();
            if state.error.is_none() {
                state.error = Some(error);
            }
        }
        self.mark_producer_closed();
    }

    /// Close the consumer side; later writes are rejected
    ///
    /// Already-buffered bytes stay readable and blocked readers keep waiting for the producer.
    pub fn close(&self) {
        self.lock().consumer_closed = true;
        self.inner.readable.notify_all();
    }

    /// Block the current thread until the producer side is closed
    pub fn await_producer_closed(&self) {
        let mut state = self.lock();
        while !state.producer_closed {
            state = self
                .inner
                .drained
                .wait(state)
                .unwrap_or_else(PoisonError::into_inner);
        }
    }

    /// Wait asynchronously until the producer side is closed
    pub async fn producer_closed(&self) {
        let mut rx = self.inner.closed_tx.subscribe();
        // The sender lives in `self`, so the channel cannot close under us
        let _ = rx.wait_for(|closed| *closed).await;
    }

    /// Take the drain error, if one was recorded
    pub fn take_error(&self) -> Option<io::Error> {
        self.lock().error.take()
    }

    pub fn is_producer_closed(&self) -> bool {
        self.lock().producer_closed
    }

    pub fn is_consumer_closed(&self) -> bool {
        self.lock().consumer_closed
    }

    /// Bytes written but not yet read
    pub fn buffered_len(&self) -> usize {
        self.lock().buffer.len()
    }

    /// Readers currently blocked in `read_chunk`
    pub fn waiting_readers(&self) -> usize {
        self.lock().waiting_readers
    }

    /// Drain worker: copy `reader` into the relay until EOF or an I/O error
    ///
    /// Keeps reading after `close()` so the writer on the other end of the pipe never blocks;
    /// those bytes are discarded. Always closes the producer side before returning.
    pub async fn drain_from<R>(self, mut reader: R)
    where
        R: AsyncRead + Unpin,
    {
        let mut chunk = vec![0u8; DRAIN_CHUNK_SIZE];
        let mut discarded = 0usize;

        loop {
            match reader.read(&mut chunk).await {
                Ok(0) => break,
                Ok(n) => {
                    if self.write(&chunk[..n]).is_err() {
                        discarded += n;
                    }
                }
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => {
                    tracing::debug!(stream = %self.inner.kind, error = %e, "drain failed");
                    self.fail(e);
                    return;
                }
            }
        }

        if discarded > 0 {
            tracing::trace!(stream = %self.inner.kind, discarded, "discarded output after close");
        }
        self.mark_producer_closed();
    }

    /// Read everything until end-of-stream
    pub async fn read_all(&self) -> Vec<u8> {
        let mut reader = self.clone();
        let mut out = Vec::new();
        // Reading a relay never fails
        let _ = AsyncReadExt::read_to_end(&mut reader, &mut out).await;
        out
    }

    /// Read everything until end-of-stream, decoding lossily as UTF-8
    pub async fn read_string(&self) -> String {
        String::from_utf8_lossy(&self.read_all().await).into_owned()
    }
}

impl Read for StreamRelay {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        Ok(self.read_chunk(buf))
    }
}

impl AsyncRead for StreamRelay {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        if buf.remaining() == 0 {
            return Poll::Ready(Ok(()));
        }

        let mut state = self.lock();
        if state.buffer.is_empty() {
            if state.producer_closed {
                return Poll::Ready(Ok(()));
            }
            if !state.wakers.iter().any(|w| w.will_wake(cx.waker())) {
                state.wakers.push(cx.waker().clone());
            }
            return Poll::Pending;
        }

        let n = state.buffer.len().min(buf.remaining());
        let filled = state.take_into(buf.initialize_unfilled_to(n));
        buf.advance(filled);
        Poll::Ready(Ok(()))
    }
}
