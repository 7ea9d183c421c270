//! Read operations for storage paths
//!
//! [`read`] issues the first ranged read through a [`PathReader`] and wraps
//! the response body in a [`RetriableStream`]. Replacement reads are pinned
//! to the ETag of the first response with `If-Match`.

use crate::abort::Aborter;
use crate::download::retriable::{RangeFetcher, RetriableStream};
use crate::download::types::{
    AccessConditions, ByteSource, RawReadResponse, ReadOptions, ReadProperties, ReadRequest,
};
use crate::error::{Result, StorageError};
use crate::range::ByteRange;
use bytes::Bytes;
use futures::future::{BoxFuture, FutureExt};
use futures::stream::Stream;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

/// Transport capable of a single ranged read of one path
///
/// Implementations issue the request and return as soon as response headers
/// are available; the body is streamed afterwards. The aborter must cancel the
/// request when it fires.
pub trait PathReader: Send + Sync + 'static {
    fn read_raw(
        &self,
        request: ReadRequest,
        aborter: Aborter,
    ) -> BoxFuture<'static, Result<RawReadResponse>>;
}

impl<T: PathReader + ?Sized> PathReader for Arc<T> {
    fn read_raw(
        &self,
        request: ReadRequest,
        aborter: Aborter,
    ) -> BoxFuture<'static, Result<RawReadResponse>> {
        (**self).read_raw(request, aborter)
    }
}

/// Response of [`read`]: response headers plus a retrying body
#[derive(Debug)]
pub struct ReadResponse {
    properties: ReadProperties,
    body: RetriableStream,
}

impl ReadResponse {
    /// Headers of the first response
    pub fn properties(&self) -> &ReadProperties {
        &self.properties
    }

    pub fn etag(&self) -> Option<&str> {
        self.properties.etag.as_deref()
    }

    pub fn content_length(&self) -> Option<u64> {
        self.properties.content_length
    }

    pub fn content_range(&self) -> Option<&str> {
        self.properties.content_range.as_deref()
    }

    pub fn content_type(&self) -> Option<&str> {
        self.properties.content_type.as_deref()
    }

    /// Body stream
    pub fn body(&mut self) -> &mut RetriableStream {
        &mut self.body
    }

    pub fn into_body(self) -> RetriableStream {
        self.body
    }

    pub fn into_parts(self) -> (ReadProperties, RetriableStream) {
        (self.properties, self.body)
    }
}

impl Stream for ReadResponse {
    type Item = Result<Bytes>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        Pin::new(&mut self.get_mut().body).poll_next(cx)
    }
}

/// Re-reads the remainder of a range from a pinned resource version
struct PinnedRangeFetcher<C> {
    client: C,
    aborter: Aborter,
    conditions: AccessConditions,
    service_version: String,
    end: u64,
}

impl<C: PathReader> RangeFetcher for PinnedRangeFetcher<C> {
    fn fetch(&self, offset: u64) -> BoxFuture<'static, Result<ByteSource>> {
        let range = match ByteRange::inclusive(offset, self.end) {
            Ok(range) => range,
            Err(err) => return futures::future::ready(Err(err)).boxed(),
        };
        log::debug!(
            "re-reading {} with if-match {:?}",
            range,
            self.conditions.if_match
        );

        let request = ReadRequest {
            range: Some(range),
            conditions: self.conditions.clone(),
            service_version: self.service_version.clone(),
        };
        self.client
            .read_raw(request, self.aborter.clone())
            .map(|response| response.map(|response| response.body))
            .boxed()
    }
}

/// Read a path, retrying the body when it ends before the requested range
///
/// # Arguments
///
/// * `client` - The transport issuing ranged reads
/// * `aborter` - Cancels the first read, replacement reads and the body
/// * `options` - Range, access conditions, service version, retry budget and
///   progress callback
///
/// # Returns
///
/// A `ReadResponse` with the headers of the first response and a body that
/// re-reads the remainder of the range, pinned to the first ETag, whenever
/// it ends early
///
/// # Errors
///
/// Returns an error if:
/// - The options are invalid
/// - The aborter has fired or fires before the first response arrives
/// - The first read fails
/// - The response has no content length
pub async fn read<C>(client: C, aborter: &Aborter, options: ReadOptions) -> Result<ReadResponse>
where
    C: PathReader,
{
    options.validate()?;
    if aborter.is_aborted() {
        return Err(StorageError::cancelled("read"));
    }

    let request = ReadRequest {
        range: options.range,
        conditions: options.conditions.clone(),
        service_version: options.service_version.clone(),
    };

    let response = tokio::select! {
        response = client.read_raw(request, aborter.clone()) => response?,
        _ = aborter.aborted() => return Err(StorageError::cancelled("read")),
    };
    let RawReadResponse { properties, body } = response;

    let content_length = properties.content_length.ok_or_else(|| {
        StorageError::invalid_response("read response doesn't contain a valid content length")
    })?;

    let offset = options.range.map(|r| r.offset).unwrap_or(0);
    // A range running past the end of the resource is served truncated
    let count = options
        .range
        .and_then(|r| r.count)
        .map_or(content_length, |count| count.min(content_length));

    let mut conditions = options.conditions;
    match properties.etag {
        Some(ref etag) => conditions.if_match = Some(etag.clone()),
        None => log::warn!(
            "read response has no etag, replacement reads are not pinned to a version"
        ),
    }

    let end = offset.saturating_add(count).saturating_sub(1);
    let fetcher = PinnedRangeFetcher {
        client,
        aborter: aborter.clone(),
        conditions,
        service_version: options.service_version,
        end,
    };

    let body = RetriableStream::builder_with_length(body, Arc::new(fetcher), offset, count)?
        .aborter(aborter.clone())
        .max_retries(options.max_retries)
        .on_progress(options.on_progress)
        .build();

    Ok(ReadResponse { properties, body })
}
