//! Stream download operations
//!
//! High-level helpers that drain a retrying read into a file, a writer, or
//! memory, returning download statistics.

use crate::abort::Aborter;
use crate::download::operations::{read, PathReader};
use crate::download::types::{DownloadResult, ReadOptions};
use crate::error::{Result, StorageError};
use bytesize::ByteSize;
use futures::StreamExt;
use std::path::Path;
use tokio::io::{AsyncWrite, AsyncWriteExt};

/// Download content to any async writer
///
/// # Arguments
///
/// * `client` - The transport issuing ranged reads
/// * `aborter` - Cancels the read and any replacement reads
/// * `options` - Range, access conditions, retry budget and progress callback
/// * `writer` - Destination for the body bytes
///
/// # Returns
///
/// A `DownloadResult` with the delivered size, retries, duration and ETag
///
/// # Errors
///
/// Returns an error if:
/// - The read fails or is aborted
/// - The body cannot be completed within the retry budget
/// - Writing fails; bytes already written stay in the writer
pub async fn download_to_writer<C, W>(
    client: C,
    aborter: &Aborter,
    options: ReadOptions,
    writer: &mut W,
) -> Result<DownloadResult>
where
    C: PathReader,
    W: AsyncWrite + Unpin + ?Sized,
{
    let start_time = std::time::Instant::now();
    let mut response = read(client, aborter, options).await?;
    let etag = response.etag().map(str::to_string);

    let body = response.body();
    while let Some(chunk) = body.next().await {
        let chunk = chunk?;
        writer.write_all(&chunk).await?;
    }
    writer.flush().await?;

    let result = DownloadResult::new(body.delivered())
        .retries(body.retries())
        .duration_ms(start_time.elapsed().as_millis() as u64)
        .etag(etag);

    log::debug!(
        "downloaded {} with {} retries",
        ByteSize::b(result.size),
        result.retries
    );
    Ok(result)
}

/// Download content directly to a file
///
/// The file is created, or truncated if it exists.
///
/// # Arguments
///
/// * `client` - The transport issuing ranged reads
/// * `aborter` - Cancels the read and any replacement reads
/// * `options` - Range, access conditions, retry budget and progress callback
/// * `filepath` - Path of the file to write
///
/// # Returns
///
/// A `DownloadResult` with `filepath` set
///
/// # Errors
///
/// Returns an error if:
/// - The file cannot be created or synced
/// - The download fails for any reason listed on [`download_to_writer`]
pub async fn download_to_file<C>(
    client: C,
    aborter: &Aborter,
    options: ReadOptions,
    filepath: &Path,
) -> Result<DownloadResult>
where
    C: PathReader,
{
    let mut file = tokio::fs::File::create(filepath)
        .await
        .map_err(StorageError::Io)?;
    let result = download_to_writer(client, aborter, options, &mut file).await?;
    file.sync_all().await?;
    Ok(result.filepath(filepath))
}

/// Download content into memory
///
/// # Arguments
///
/// * `client` - The transport issuing ranged reads
/// * `aborter` - Cancels the read and any replacement reads
/// * `options` - Range, access conditions, retry budget and progress callback
///
/// # Returns
///
/// The body bytes together with the `DownloadResult`
///
/// # Errors
///
/// Returns an error if the read fails, is aborted, or cannot be completed
/// within the retry budget
pub async fn download_to_vec<C>(
    client: C,
    aborter: &Aborter,
    options: ReadOptions,
) -> Result<(Vec<u8>, DownloadResult)>
where
    C: PathReader,
{
    let mut buffer = Vec::new();
    let result = download_to_writer(client, aborter, options, &mut buffer).await?;
    Ok((buffer, result))
}
