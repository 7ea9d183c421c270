//! Retrying body stream for ranged reads
//!
//! A read response body can end cleanly before the requested range has been
//! delivered. That kind of end carries no error, so a request-level retry
//! policy never sees it. [`RetriableStream`] notices the short body and asks
//! a [`RangeFetcher`] for a new body starting at the first byte the consumer
//! has not received yet.

use crate::abort::Aborter;
use crate::download::types::{ByteSource, DownloadProgress, ProgressCallback, DEFAULT_MAX_RETRIES};
use crate::error::{Result, StorageError};
use bytes::Bytes;
use futures::future::BoxFuture;
use futures::stream::{Stream, StreamExt, TryStreamExt};
use futures::FutureExt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use tokio_util::io::StreamReader;

/// Opens a new body starting at an absolute offset of the resource being read
///
/// Implementations must pin the read to the resource version that served the
/// first body, so a replacement never mixes bytes of two versions.
pub trait RangeFetcher: Send + Sync {
    fn fetch(&self, offset: u64) -> BoxFuture<'static, Result<ByteSource>>;
}

impl<F, Fut> RangeFetcher for F
where
    F: Fn(u64) -> Fut + Send + Sync,
    Fut: Future<Output = Result<ByteSource>> + Send + 'static,
{
    fn fetch(&self, offset: u64) -> BoxFuture<'static, Result<ByteSource>> {
        (self)(offset).boxed()
    }
}

enum State {
    Draining(ByteSource),
    AwaitingSource(BoxFuture<'static, Result<ByteSource>>),
    Completed,
    Failed,
}

/// Builder for [`RetriableStream`]
pub struct RetriableStreamBuilder {
    source: ByteSource,
    fetcher: Arc<dyn RangeFetcher>,
    start: u64,
    length: u64,
    aborter: Aborter,
    max_retries: i32,
    on_progress: Option<ProgressCallback>,
}

impl RetriableStreamBuilder {
    /// Cancellation signal observed by the stream
    pub fn aborter(mut self, aborter: Aborter) -> Self {
        self.aborter = aborter;
        self
    }

    /// Replacement reads allowed; negative values are treated as 0
    pub fn max_retries(mut self, max_retries: i32) -> Self {
        self.max_retries = max_retries;
        self
    }

    /// Progress callback invoked after every delivered chunk
    pub fn on_progress(mut self, callback: Option<ProgressCallback>) -> Self {
        self.on_progress = callback;
        self
    }

    pub fn build(self) -> RetriableStream {
        let abort = self.aborter.aborted();
        RetriableStream {
            state: State::Draining(self.source),
            fetcher: self.fetcher,
            abort,
            start: self.start,
            end_exclusive: self.start + self.length,
            offset: self.start,
            retries: 0,
            max_retries: self.max_retries.max(0) as u32,
            on_progress: self.on_progress,
        }
    }
}

/// In-order byte stream over `[start, end]` that survives early body ends
///
/// Polling drives the current body. Chunks are handed to the consumer as
/// they arrive and the body is only polled while the consumer polls, so
/// backpressure reaches the transport unchanged.
pub struct RetriableStream {
    state: State,
    fetcher: Arc<dyn RangeFetcher>,
    abort: BoxFuture<'static, ()>,
    start: u64,
    // One past the last byte of the range; equal to `start` for an empty range
    end_exclusive: u64,
    offset: u64,
    retries: u32,
    max_retries: u32,
    on_progress: Option<ProgressCallback>,
}

impl RetriableStream {
    /// Builder over the inclusive range `[start, end]`
    ///
    /// # Arguments
    ///
    /// * `source` - The first body, already positioned at `start`
    /// * `fetcher` - Opens replacement bodies when `source` ends early
    /// * `start` - First byte of the range
    /// * `end` - Last byte of the range, inclusive
    ///
    /// # Returns
    ///
    /// A `RetriableStreamBuilder` with no aborter, no progress callback and
    /// the default retry budget
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - `end` precedes `start`
    /// - The range length does not fit in 64 bits
    pub fn builder<F>(
        source: ByteSource,
        fetcher: F,
        start: u64,
        end: u64,
    ) -> Result<RetriableStreamBuilder>
    where
        F: RangeFetcher + 'static,
    {
        if end < start {
            return Err(StorageError::invalid_parameter(
                "end",
                format!("range end {} precedes range start {}", end, start),
            ));
        }
        let length = (end - start).checked_add(1).ok_or_else(|| {
            StorageError::invalid_parameter("end", "range length overflows a 64-bit count")
        })?;
        Self::builder_with_length(source, Arc::new(fetcher), start, length)
    }

    /// Builder over `length` bytes starting at `start`
    ///
    /// # Arguments
    ///
    /// * `source` - The first body, already positioned at `start`
    /// * `fetcher` - Opens replacement bodies when `source` ends early
    /// * `start` - First byte of the range
    /// * `length` - Number of bytes to deliver; 0 yields an empty stream
    ///
    /// # Returns
    ///
    /// A `RetriableStreamBuilder` with no aborter, no progress callback and
    /// the default retry budget
    ///
    /// # Errors
    ///
    /// Returns an error if `start + length` overflows a 64-bit offset
    pub fn builder_with_length(
        source: ByteSource,
        fetcher: Arc<dyn RangeFetcher>,
        start: u64,
        length: u64,
    ) -> Result<RetriableStreamBuilder> {
        if start.checked_add(length).is_none() {
            return Err(StorageError::invalid_parameter(
                "length",
                "range end overflows a 64-bit offset",
            ));
        }
        Ok(RetriableStreamBuilder {
            source,
            fetcher,
            start,
            length,
            aborter: Aborter::none(),
            max_retries: DEFAULT_MAX_RETRIES,
            on_progress: None,
        })
    }

    /// First byte of the range
    pub fn start(&self) -> u64 {
        self.start
    }

    /// Last byte of the range, or `None` for an empty range
    pub fn end(&self) -> Option<u64> {
        (self.end_exclusive > self.start).then(|| self.end_exclusive - 1)
    }

    /// Position of the next byte to deliver
    pub fn offset(&self) -> u64 {
        self.offset
    }

    /// Bytes delivered so far
    pub fn delivered(&self) -> u64 {
        self.offset - self.start
    }

    /// Replacement reads issued so far
    pub fn retries(&self) -> u32 {
        self.retries
    }

    pub fn max_retries(&self) -> u32 {
        self.max_retries
    }

    /// Whether the stream has completed or failed
    pub fn is_terminated(&self) -> bool {
        matches!(self.state, State::Completed | State::Failed)
    }

    /// Adapt the stream into an `AsyncRead`
    pub fn into_async_read(
        self,
    ) -> StreamReader<impl Stream<Item = std::io::Result<Bytes>>, Bytes> {
        StreamReader::new(self.map_err(std::io::Error::from))
    }

    fn fail(&mut self, err: StorageError) -> Poll<Option<Result<Bytes>>> {
        // Dropping the state releases the current body or pending fetch
        self.state = State::Failed;
        Poll::Ready(Some(Err(err)))
    }

    fn deliver(&mut self, chunk: Bytes) -> Poll<Option<Result<Bytes>>> {
        let len = chunk.len() as u64;
        let remaining = self.end_exclusive - self.offset;
        if len > remaining {
            let received = self.offset + len - 1;
            log::warn!(
                "read body overran its range: received offset {}, range ends before {}",
                received,
                self.end_exclusive
            );
            return self.fail(StorageError::OverRead {
                received,
                end: self.end_exclusive.saturating_sub(1),
            });
        }

        self.offset += len;
        log::trace!("delivered {} bytes, offset now {}", len, self.offset);
        if let Some(ref callback) = self.on_progress {
            callback(DownloadProgress::new(
                self.offset - self.start,
                Some(self.end_exclusive - self.start),
            ));
        }
        Poll::Ready(Some(Ok(chunk)))
    }

    /// Decide what follows a clean end of the current body
    fn source_ended(&mut self) -> Option<Poll<Option<Result<Bytes>>>> {
        // `deliver` rejects any chunk crossing the range end
        debug_assert!(self.offset <= self.end_exclusive);
        if self.offset == self.end_exclusive {
            self.state = State::Completed;
            return Some(Poll::Ready(None));
        }

        if self.retries < self.max_retries {
            self.retries += 1;
            log::debug!(
                "read body ended at offset {} before range end {}, fetching replacement ({}/{})",
                self.offset,
                self.end_exclusive - 1,
                self.retries,
                self.max_retries
            );
            self.state = State::AwaitingSource(self.fetcher.fetch(self.offset));
            return None;
        }

        log::warn!(
            "read body ended at offset {} before range end {} with no retries left",
            self.offset,
            self.end_exclusive - 1
        );
        Some(self.fail(StorageError::IncompleteRead {
            first_missing: self.offset,
            end: self.end_exclusive - 1,
            retries: self.retries,
            max_retries: self.max_retries,
        }))
    }
}

impl Stream for RetriableStream {
    type Item = Result<Bytes>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();

        loop {
            if this.is_terminated() {
                return Poll::Ready(None);
            }

            if this.abort.poll_unpin(cx).is_ready() {
                log::debug!("read aborted at offset {}", this.offset);
                return this.fail(StorageError::cancelled("read"));
            }

            match this.state {
                State::Draining(ref mut source) => match source.poll_next_unpin(cx) {
                    Poll::Pending => return Poll::Pending,
                    // Empty chunks carry no data and do not move the offset
                    Poll::Ready(Some(Ok(chunk))) if chunk.is_empty() => continue,
                    Poll::Ready(Some(Ok(chunk))) => return this.deliver(chunk),
                    Poll::Ready(Some(Err(err))) => return this.fail(err),
                    Poll::Ready(None) => {
                        if let Some(poll) = this.source_ended() {
                            return poll;
                        }
                    }
                },
                State::AwaitingSource(ref mut pending) => match pending.poll_unpin(cx) {
                    Poll::Pending => return Poll::Pending,
                    Poll::Ready(Ok(source)) => this.state = State::Draining(source),
                    Poll::Ready(Err(err)) => return this.fail(err),
                },
                State::Completed | State::Failed => return Poll::Ready(None),
            }
        }
    }
}

impl std::fmt::Debug for RetriableStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = match self.state {
            State::Draining(_) => "draining",
            State::AwaitingSource(_) => "awaiting-source",
            State::Completed => "completed",
            State::Failed => "failed",
        };
        f.debug_struct("RetriableStream")
            .field("state", &state)
            .field("start", &self.start)
            .field("end", &self.end())
            .field("offset", &self.offset)
            .field("retries", &self.retries)
            .field("max_retries", &self.max_retries)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::stream;

    fn source(chunks: Vec<&'static [u8]>) -> ByteSource {
        stream::iter(chunks.into_iter().map(|c| Ok(Bytes::from_static(c)))).boxed()
    }

    fn no_fetch(_offset: u64) -> futures::future::Ready<Result<ByteSource>> {
        futures::future::ready(Err(StorageError::transport("unexpected fetch")))
    }

    #[test]
    fn test_builder_rejects_inverted_range() {
        let err = RetriableStream::builder(source(vec![]), no_fetch, 10, 9)
            .err()
            .expect("inverted range accepted");
        assert!(matches!(err, StorageError::InvalidParameter { .. }));
    }

    #[test]
    fn test_negative_max_retries_clamped() {
        let stream = RetriableStream::builder(source(vec![]), no_fetch, 0, 9)
            .unwrap()
            .max_retries(-3)
            .build();
        assert_eq!(stream.max_retries(), 0);
        assert_eq!(stream.end(), Some(9));
        assert_eq!(stream.delivered(), 0);
    }

    #[tokio::test]
    async fn test_empty_range_completes() {
        let mut stream =
            RetriableStream::builder_with_length(source(vec![]), Arc::new(no_fetch), 5, 0)
                .unwrap()
                .build();
        assert_eq!(stream.end(), None);
        assert!(stream.next().await.is_none());
        assert!(stream.is_terminated());
    }

    #[tokio::test]
    async fn test_empty_chunks_skipped() {
        let chunks = vec![&b""[..], &b"ab"[..], &b""[..]];
        let mut stream = RetriableStream::builder(source(chunks), no_fetch, 0, 1)
            .unwrap()
            .build();
        assert_eq!(stream.next().await.unwrap().unwrap(), Bytes::from_static(b"ab"));
        assert!(stream.next().await.is_none());
    }
}
