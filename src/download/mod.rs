//! Download operations for storage paths
//!
//! This module provides ranged reads whose bodies survive early ends of the
//! underlying network stream, plus helpers that drain a read into a file,
//! a writer, or memory.

pub mod operations;
pub mod retriable;
pub mod stream;
pub mod types;

pub use operations::{read, PathReader, ReadResponse};
pub use retriable::{RangeFetcher, RetriableStream, RetriableStreamBuilder};
pub use stream::{download_to_file, download_to_vec, download_to_writer};
pub use types::{
    AccessConditions, ByteSource, DownloadProgress, DownloadResult, ProgressCallback,
    RawReadResponse, ReadOptions, ReadProperties, ReadRequest, DEFAULT_MAX_RETRIES,
};
