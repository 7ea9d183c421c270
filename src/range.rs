//! Byte ranges for ranged read requests
//!
//! A [`ByteRange`] maps to the `Range` header used by read operations:
//! `bytes=<offset>-<offset+count-1>` for a closed range or `bytes=<offset>-`
//! for a range that runs to the end of the resource.

use crate::error::{Result, StorageError};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt::{self, Display, Formatter};
use std::str::FromStr;

const RANGE_PREFIX: &str = "bytes=";

/// Range of bytes within a stored resource
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ByteRange {
    /// First byte of the range
    pub offset: u64,
    /// Number of bytes, or `None` to read through the end of the resource
    pub count: Option<u64>,
}

impl ByteRange {
    /// Create a range, rejecting a zero count
    pub fn new(offset: u64, count: Option<u64>) -> Result<Self> {
        let range = Self { offset, count };
        range.validate()?;
        Ok(range)
    }

    /// Range from `offset` through the end of the resource
    pub fn from_offset(offset: u64) -> Self {
        Self {
            offset,
            count: None,
        }
    }

    /// Range covering exactly `count` bytes starting at `offset`
    pub fn bounded(offset: u64, count: u64) -> Result<Self> {
        Self::new(offset, Some(count))
    }

    /// Range covering the inclusive positions `[start, end]`
    pub fn inclusive(start: u64, end: u64) -> Result<Self> {
        if end < start {
            return Err(StorageError::invalid_range(format!(
                "range end {} is smaller than range start {}",
                end, start
            )));
        }
        let count = (end - start)
            .checked_add(1)
            .ok_or_else(|| StorageError::invalid_range("range length overflows a 64-bit count"))?;
        Self::bounded(start, count)
    }

    /// Inclusive position of the last byte, if the range is bounded
    pub fn end(&self) -> Option<u64> {
        self.count
            .and_then(|count| count.checked_sub(1))
            .map(|span| self.offset.saturating_add(span))
    }

    /// Validate the range values
    pub fn validate(&self) -> Result<()> {
        match self.count {
            Some(0) => Err(StorageError::invalid_range(
                "count must be larger than 0, leave it unset to read from offset to the end",
            )),
            Some(count) if self.offset.checked_add(count - 1).is_none() => Err(
                StorageError::invalid_range("range end overflows a 64-bit offset"),
            ),
            _ => Ok(()),
        }
    }

    /// Render the range as a `Range` header value
    pub fn to_header(&self) -> Result<String> {
        self.validate()?;
        Ok(self.to_string())
    }
}

impl Display for ByteRange {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self.end() {
            Some(end) => write!(f, "{}{}-{}", RANGE_PREFIX, self.offset, end),
            None => write!(f, "{}{}-", RANGE_PREFIX, self.offset),
        }
    }
}

impl FromStr for ByteRange {
    type Err = StorageError;

    fn from_str(s: &str) -> Result<Self> {
        let bounds = s.strip_prefix(RANGE_PREFIX).ok_or_else(|| {
            StorageError::invalid_range(format!(
                "invalid range string, {} doesn't start with {}",
                s, RANGE_PREFIX
            ))
        })?;

        let (start, end) = bounds.split_once('-').unwrap_or((bounds, ""));
        let offset: u64 = start.trim().parse().map_err(|_| {
            StorageError::invalid_range(format!("invalid range offset in {}", s))
        })?;

        let end = end.trim();
        if end.is_empty() {
            return Ok(Self::from_offset(offset));
        }

        let end: u64 = end
            .parse()
            .map_err(|_| StorageError::invalid_range(format!("invalid range end in {}", s)))?;
        Self::inclusive(offset, end)
    }
}

impl Serialize for ByteRange {
    fn serialize<S>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for ByteRange {
    fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_range_to_string() {
        assert_eq!(ByteRange::from_offset(255).to_string(), "bytes=255-");
        assert_eq!(
            ByteRange::bounded(0, 512).unwrap().to_string(),
            "bytes=0-511"
        );
        assert_eq!(
            ByteRange::bounded(1024, 1).unwrap().to_header().unwrap(),
            "bytes=1024-1024"
        );
    }

    #[test]
    fn test_string_to_range() {
        let range: ByteRange = "bytes=0-511".parse().unwrap();
        assert_eq!(range.offset, 0);
        assert_eq!(range.count, Some(512));

        let range: ByteRange = "bytes=255-".parse().unwrap();
        assert_eq!(range, ByteRange::from_offset(255));

        let range: ByteRange = "bytes=42".parse().unwrap();
        assert_eq!(range, ByteRange::from_offset(42));
    }

    #[test]
    fn test_round_trip() {
        for (offset, count) in [(0, 1), (0, 512), (7, 3), (1 << 40, 4096)] {
            let range = ByteRange::bounded(offset, count).unwrap();
            let parsed: ByteRange = range.to_string().parse().unwrap();
            assert_eq!(parsed, range);
        }
    }

    #[test]
    fn test_invalid_ranges() {
        assert!(ByteRange::bounded(0, 0).is_err());
        assert!(ByteRange::new(10, Some(0)).is_err());
        assert!(ByteRange::inclusive(10, 9).is_err());
        assert!(ByteRange::bounded(u64::MAX, 2).is_err());

        let unvalidated = ByteRange {
            offset: 3,
            count: Some(0),
        };
        assert!(unvalidated.to_header().is_err());
    }

    #[test]
    fn test_parse_rejects_malformed() {
        let err = "items=0-10".parse::<ByteRange>().unwrap_err();
        assert!(matches!(err, StorageError::InvalidRange { .. }));
        assert!("bytes=abc-10".parse::<ByteRange>().is_err());
        assert!("bytes=10-x".parse::<ByteRange>().is_err());
        assert!("bytes=10-5".parse::<ByteRange>().is_err());
        assert!("bytes=-10".parse::<ByteRange>().is_err());
    }

    #[test]
    fn test_end() {
        assert_eq!(ByteRange::bounded(100, 50).unwrap().end(), Some(149));
        assert_eq!(ByteRange::from_offset(100).end(), None);
    }

    #[test]
    fn test_serde_as_header_string() {
        let range = ByteRange::bounded(0, 512).unwrap();
        let json = serde_json::to_string(&range).unwrap();
        assert_eq!(json, "\"bytes=0-511\"");
        let parsed: ByteRange = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, range);
    }
}
