//! Client configuration

use crate::abort::Aborter;
use crate::download::types::{ReadOptions, DEFAULT_MAX_RETRIES};
use crate::error::{Result, StorageError};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Service API version sent with every request
pub const SERVICE_VERSION: &str = "2018-11-09";

/// Configuration shared by operations of one client
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct ClientConfig {
    /// Service API version (default: 2018-11-09)
    #[serde(default = "default_service_version")]
    pub service_version: String,

    /// Replacement reads allowed when a body ends early (default: 5, negative acts as 0)
    #[serde(default = "default_max_retries")]
    pub max_retries: i32,

    /// Per-operation timeout in seconds (default: none)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_secs: Option<u64>,
}

fn default_service_version() -> String {
    SERVICE_VERSION.to_string()
}

fn default_max_retries() -> i32 {
    DEFAULT_MAX_RETRIES
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            service_version: default_service_version(),
            max_retries: DEFAULT_MAX_RETRIES,
            timeout_secs: None,
        }
    }
}

impl ClientConfig {
    /// Create a new configuration with default values
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the service version
    pub fn service_version(mut self, version: impl Into<String>) -> Self {
        self.service_version = version.into();
        self
    }

    /// Set the retry budget for early body ends
    pub fn max_retries(mut self, max_retries: i32) -> Self {
        self.max_retries = max_retries;
        self
    }

    /// Set the per-operation timeout
    pub fn timeout_secs(mut self, timeout_secs: u64) -> Self {
        self.timeout_secs = Some(timeout_secs);
        self
    }

    /// Retry budget with negative values clamped to 0
    pub fn effective_max_retries(&self) -> u32 {
        self.max_retries.max(0) as u32
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        if self.service_version.trim().is_empty() {
            return Err(StorageError::config_error("service-version cannot be empty"));
        }
        if self.timeout_secs == Some(0) {
            return Err(StorageError::config_error("timeout-secs must be greater than 0"));
        }
        Ok(())
    }

    /// Read options seeded from this configuration
    ///
    /// The retry budget is clamped and the service version is carried into
    /// every request the read issues.
    pub fn read_options(&self) -> ReadOptions {
        ReadOptions::new()
            .max_retries(self.effective_max_retries() as i32)
            .service_version(self.service_version.clone())
    }

    /// Aborter for one operation, honoring the configured timeout
    pub fn operation_aborter(&self, parent: &Aborter) -> Aborter {
        match self.timeout_secs {
            Some(secs) => parent.with_timeout(Duration::from_secs(secs)),
            None => parent.child(),
        }
    }

    /// Convert the configuration to a JSON string
    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string(self).map_err(StorageError::from)
    }

    /// Create a configuration from a JSON string
    pub fn from_json(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }
}
