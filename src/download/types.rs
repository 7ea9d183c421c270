//! Types for download operations

use crate::config::SERVICE_VERSION;
use crate::error::Result;
use crate::range::ByteRange;
use bytesize::ByteSize;
use chrono::{DateTime, Utc};
use futures::stream::BoxStream;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

/// Default number of replacement reads a body stream may issue
pub const DEFAULT_MAX_RETRIES: i32 = 5;

/// Live body of a read response, yielding chunks in offset order
pub type ByteSource = BoxStream<'static, Result<bytes::Bytes>>;

/// Progress callback invoked with cumulative delivered bytes
pub type ProgressCallback = Arc<dyn Fn(DownloadProgress) + Send + Sync>;

/// Progress information for download operations
#[derive(Debug, Clone, PartialEq)]
pub struct DownloadProgress {
    /// Number of bytes delivered to the consumer so far
    pub loaded_bytes: u64,
    /// Total number of bytes to download (if known)
    pub total_bytes: Option<u64>,
    /// Progress percentage (0.0 to 1.0)
    pub percentage: f64,
}

impl DownloadProgress {
    /// Create new download progress
    pub fn new(loaded_bytes: u64, total_bytes: Option<u64>) -> Self {
        let percentage = match total_bytes {
            Some(total) if total > 0 => loaded_bytes as f64 / total as f64,
            _ => 0.0,
        };

        Self {
            loaded_bytes,
            total_bytes,
            percentage: percentage.min(1.0),
        }
    }
}

/// Conditional request headers for read operations
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct AccessConditions {
    /// Only read if the resource ETag matches
    #[serde(skip_serializing_if = "Option::is_none")]
    pub if_match: Option<String>,
    /// Only read if the resource ETag does not match (`*` for any)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub if_none_match: Option<String>,
    /// Only read if modified after this time
    #[serde(skip_serializing_if = "Option::is_none")]
    pub if_modified_since: Option<DateTime<Utc>>,
    /// Only read if not modified after this time
    #[serde(skip_serializing_if = "Option::is_none")]
    pub if_unmodified_since: Option<DateTime<Utc>>,
    /// Active lease on the resource
    #[serde(skip_serializing_if = "Option::is_none")]
    pub lease_id: Option<String>,
}

impl AccessConditions {
    /// Create empty access conditions
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the `If-Match` ETag
    pub fn if_match(mut self, etag: impl Into<String>) -> Self {
        self.if_match = Some(etag.into());
        self
    }

    /// Set the `If-None-Match` ETag
    pub fn if_none_match(mut self, etag: impl Into<String>) -> Self {
        self.if_none_match = Some(etag.into());
        self
    }

    /// Set the `If-Modified-Since` time
    pub fn if_modified_since(mut self, time: DateTime<Utc>) -> Self {
        self.if_modified_since = Some(time);
        self
    }

    /// Set the `If-Unmodified-Since` time
    pub fn if_unmodified_since(mut self, time: DateTime<Utc>) -> Self {
        self.if_unmodified_since = Some(time);
        self
    }

    /// Set the lease id
    pub fn lease_id(mut self, lease_id: impl Into<String>) -> Self {
        self.lease_id = Some(lease_id.into());
        self
    }

    /// Render the conditions as HTTP header pairs
    pub fn headers(&self) -> Vec<(&'static str, String)> {
        let mut headers = Vec::new();
        if let Some(ref etag) = self.if_match {
            headers.push(("if-match", etag.clone()));
        }
        if let Some(ref etag) = self.if_none_match {
            headers.push(("if-none-match", etag.clone()));
        }
        if let Some(time) = self.if_modified_since {
            headers.push(("if-modified-since", http_date(time)));
        }
        if let Some(time) = self.if_unmodified_since {
            headers.push(("if-unmodified-since", http_date(time)));
        }
        if let Some(ref lease) = self.lease_id {
            headers.push(("x-ms-lease-id", lease.clone()));
        }
        headers
    }
}

fn http_date(time: DateTime<Utc>) -> String {
    time.format("%a, %d %b %Y %H:%M:%S GMT").to_string()
}

/// Response headers of a read operation
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct ReadProperties {
    pub accept_ranges: Option<String>,
    pub cache_control: Option<String>,
    pub content_disposition: Option<String>,
    pub content_encoding: Option<String>,
    pub content_language: Option<String>,
    /// Number of bytes in this response body
    pub content_length: Option<u64>,
    pub content_range: Option<String>,
    pub content_type: Option<String>,
    pub date: Option<DateTime<Utc>>,
    /// Strong validator of the resource version that served the read
    pub etag: Option<String>,
    pub last_modified: Option<DateTime<Utc>>,
    pub request_id: Option<String>,
    pub version: Option<String>,
    pub resource_type: Option<String>,
    pub properties: Option<String>,
    pub lease_duration: Option<String>,
    pub lease_state: Option<String>,
    pub lease_status: Option<String>,
}

/// Options for read operations
#[derive(Clone)]
pub struct ReadOptions {
    /// Range to read, or the whole resource when unset
    pub range: Option<ByteRange>,
    /// Conditional headers for the first read
    pub conditions: AccessConditions,
    /// Service API version sent with the first read and every replacement read
    pub service_version: String,
    /// Replacement reads allowed when the body ends early; negative values act as 0
    pub max_retries: i32,
    /// Progress callback function
    pub on_progress: Option<ProgressCallback>,
}

impl fmt::Debug for ReadOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReadOptions")
            .field("range", &self.range)
            .field("conditions", &self.conditions)
            .field("service_version", &self.service_version)
            .field("max_retries", &self.max_retries)
            .field("on_progress", &self.on_progress.is_some())
            .finish()
    }
}

impl Default for ReadOptions {
    fn default() -> Self {
        Self::new()
    }
}

impl ReadOptions {
    /// Create new read options for the whole resource
    pub fn new() -> Self {
        Self {
            range: None,
            conditions: AccessConditions::default(),
            service_version: SERVICE_VERSION.to_string(),
            max_retries: DEFAULT_MAX_RETRIES,
            on_progress: None,
        }
    }

    /// Set the range to read
    pub fn range(mut self, range: ByteRange) -> Self {
        self.range = Some(range);
        self
    }

    /// Set the access conditions
    pub fn conditions(mut self, conditions: AccessConditions) -> Self {
        self.conditions = conditions;
        self
    }

    /// Set the service API version
    pub fn service_version(mut self, version: impl Into<String>) -> Self {
        self.service_version = version.into();
        self
    }

    /// Set the retry budget for early body ends
    pub fn max_retries(mut self, max_retries: i32) -> Self {
        self.max_retries = max_retries;
        self
    }

    /// Set the progress callback
    pub fn on_progress<F>(mut self, callback: F) -> Self
    where
        F: Fn(DownloadProgress) + Send + Sync + 'static,
    {
        self.on_progress = Some(Arc::new(callback));
        self
    }

    /// Validate the read options
    pub fn validate(&self) -> Result<()> {
        if let Some(ref range) = self.range {
            range.validate()?;
        }
        Ok(())
    }
}

/// Request handed to the transport for a single ranged read
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReadRequest {
    pub range: Option<ByteRange>,
    pub conditions: AccessConditions,
    /// Value for the service version header
    pub service_version: String,
}

impl Default for ReadRequest {
    fn default() -> Self {
        Self {
            range: None,
            conditions: AccessConditions::default(),
            service_version: SERVICE_VERSION.to_string(),
        }
    }
}

/// Unprocessed response from the transport
pub struct RawReadResponse {
    pub properties: ReadProperties,
    pub body: ByteSource,
}

impl fmt::Debug for RawReadResponse {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RawReadResponse")
            .field("properties", &self.properties)
            .finish_non_exhaustive()
    }
}

/// Result of a download operation
#[derive(Debug, Clone)]
pub struct DownloadResult {
    /// Size of the downloaded content in bytes
    pub size: u64,
    /// Replacement reads issued while downloading
    pub retries: u32,
    /// Time taken for the download (in milliseconds)
    pub duration_ms: u64,
    /// ETag of the version that was downloaded
    pub etag: Option<String>,
    /// Path where the file was saved (if applicable)
    pub filepath: Option<PathBuf>,
}

impl DownloadResult {
    /// Create a new download result
    pub fn new(size: u64) -> Self {
        Self {
            size,
            retries: 0,
            duration_ms: 0,
            etag: None,
            filepath: None,
        }
    }

    /// Set the number of replacement reads
    pub fn retries(mut self, retries: u32) -> Self {
        self.retries = retries;
        self
    }

    /// Set the duration
    pub fn duration_ms(mut self, duration_ms: u64) -> Self {
        self.duration_ms = duration_ms;
        self
    }

    /// Set the ETag
    pub fn etag(mut self, etag: Option<String>) -> Self {
        self.etag = etag;
        self
    }

    /// Set the file path
    pub fn filepath<P: Into<PathBuf>>(mut self, path: P) -> Self {
        self.filepath = Some(path.into());
        self
    }
}

impl fmt::Display for DownloadResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} in {} ms ({} retries)",
            ByteSize::b(self.size),
            self.duration_ms,
            self.retries
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_download_progress() {
        let progress = DownloadProgress::new(500, Some(1000));
        assert_eq!(progress.loaded_bytes, 500);
        assert_eq!(progress.total_bytes, Some(1000));
        assert_eq!(progress.percentage, 0.5);

        let unknown = DownloadProgress::new(500, None);
        assert_eq!(unknown.percentage, 0.0);
    }

    #[test]
    fn test_read_options() {
        let options = ReadOptions::new()
            .range(ByteRange::bounded(0, 512).unwrap())
            .max_retries(2)
            .conditions(AccessConditions::new().if_match("\"0x1\""));

        assert_eq!(options.max_retries, 2);
        assert_eq!(options.range.unwrap().count, Some(512));
        assert_eq!(options.conditions.if_match.as_deref(), Some("\"0x1\""));
        assert!(options.validate().is_ok());
        assert_eq!(ReadOptions::default().max_retries, DEFAULT_MAX_RETRIES);
        assert_eq!(ReadOptions::default().service_version, SERVICE_VERSION);
    }

    #[test]
    fn test_read_options_validation() {
        let mut options = ReadOptions::new();
        options.range = Some(ByteRange {
            offset: 0,
            count: Some(0),
        });
        assert!(options.validate().is_err());
    }

    #[test]
    fn test_access_condition_headers() {
        let time = Utc.with_ymd_and_hms(2018, 11, 9, 8, 30, 0).unwrap();
        let headers = AccessConditions::new()
            .if_match("\"etag\"")
            .if_unmodified_since(time)
            .headers();

        assert_eq!(
            headers,
            vec![
                ("if-match", "\"etag\"".to_string()),
                ("if-unmodified-since", "Fri, 09 Nov 2018 08:30:00 GMT".to_string()),
            ]
        );
    }

    #[test]
    fn test_download_result() {
        let result = DownloadResult::new(1024)
            .retries(1)
            .duration_ms(15)
            .etag(Some("\"v1\"".to_string()))
            .filepath("/tmp/out.bin");

        assert_eq!(result.size, 1024);
        assert_eq!(result.retries, 1);
        assert_eq!(result.filepath, Some(PathBuf::from("/tmp/out.bin")));
        assert!(result.to_string().contains("15 ms (1 retries)"));
    }
}
