pub mod abort;
pub mod config;
pub mod download;
pub mod error;
pub mod range;

pub use abort::Aborter;

pub use config::{ClientConfig, SERVICE_VERSION};

pub use download::{
    download_to_file, download_to_vec, download_to_writer, read, AccessConditions, ByteSource,
    DownloadProgress, DownloadResult, PathReader, RangeFetcher, RawReadResponse, ReadOptions,
    ReadProperties, ReadRequest, ReadResponse, RetriableStream, RetriableStreamBuilder,
};

pub use error::{Result, StorageError};

pub use range::ByteRange;
