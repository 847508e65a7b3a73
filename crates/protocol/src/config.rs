//! Per-upload configuration.
//!
//! Every field has a serde default so a partial TOML or JSON document
//! deserializes into a complete config.

use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::constants::{
    DEFAULT_CHUNK_SIZE, DEFAULT_CHUNK_THRESHOLD, DEFAULT_MAX_RETRIES, DEFAULT_MAX_RETRY_DELAY,
    DEFAULT_RETRY_DELAY, DEFAULT_RETRY_JITTER, DEFAULT_TIMEOUT, FINALIZE_PATH, MAX_CHUNK_SIZE,
};

/// HTTP method used for the upload request.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum HttpMethod {
    #[default]
    Post,
    Put,
    Patch,
}

impl HttpMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Post => "POST",
            Self::Put => "PUT",
            Self::Patch => "PATCH",
        }
    }
}

impl fmt::Display for HttpMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Growth curve of the delay between retry attempts.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RetryStrategy {
    /// Same delay for every attempt.
    Fixed,
    /// `base * attempt`.
    Linear,
    /// `base * 2^(attempt - 1)`.
    #[default]
    Exponential,
}

/// Immutable configuration attached to a task when it is added.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadConfig {
    /// Destination address.
    #[serde(default)]
    pub url: String,

    #[serde(default)]
    pub method: HttpMethod,

    /// Multipart field carrying the file bytes.
    #[serde(default = "default_field_name")]
    pub field_name: String,

    /// Extra headers passed through verbatim on every request.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub headers: BTreeMap<String, String>,

    /// Extra multipart form fields.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub form_data: BTreeMap<String, String>,

    /// Send a multipart form (`true`) or the raw file bytes (`false`).
    #[serde(default = "default_true")]
    pub multipart: bool,

    /// Forces (`Some(true)`) or disables (`Some(false)`) the chunked path.
    /// `None` uses `chunk_threshold`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chunked: Option<bool>,

    #[serde(default = "default_chunk_size")]
    pub chunk_size: u64,

    /// Files strictly larger than this are uploaded in chunks.
    #[serde(default = "default_chunk_threshold")]
    pub chunk_threshold: u64,

    /// Commit endpoint for chunked uploads. Derived from `url` when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finalize_url: Option<String>,

    /// Per-attempt timeout in milliseconds.
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,

    #[serde(default = "default_true")]
    pub retry_enabled: bool,

    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    #[serde(default)]
    pub retry_delay_strategy: RetryStrategy,

    #[serde(default = "default_retry_delay_ms")]
    pub retry_delay_ms: u64,

    #[serde(default = "default_max_retry_delay_ms")]
    pub max_retry_delay_ms: u64,

    /// Jitter as a fraction of the computed delay, in `[0.0, 1.0]`.
    #[serde(default = "default_retry_jitter")]
    pub retry_jitter: f64,

    /// Whether the host may keep transferring after the client loses focus.
    #[serde(default)]
    pub background_upload: bool,
}

fn default_field_name() -> String {
    "file".into()
}

fn default_true() -> bool {
    true
}

fn default_chunk_size() -> u64 {
    DEFAULT_CHUNK_SIZE
}

fn default_chunk_threshold() -> u64 {
    DEFAULT_CHUNK_THRESHOLD
}

fn default_timeout_ms() -> u64 {
    DEFAULT_TIMEOUT.as_millis() as u64
}

fn default_max_retries() -> u32 {
    DEFAULT_MAX_RETRIES
}

fn default_retry_delay_ms() -> u64 {
    DEFAULT_RETRY_DELAY.as_millis() as u64
}

fn default_max_retry_delay_ms() -> u64 {
    DEFAULT_MAX_RETRY_DELAY.as_millis() as u64
}

fn default_retry_jitter() -> f64 {
    DEFAULT_RETRY_JITTER
}

impl Default for UploadConfig {
    fn default() -> Self {
        Self {
            url: String::new(),
            method: HttpMethod::default(),
            field_name: default_field_name(),
            headers: BTreeMap::new(),
            form_data: BTreeMap::new(),
            multipart: true,
            chunked: None,
            chunk_size: default_chunk_size(),
            chunk_threshold: default_chunk_threshold(),
            finalize_url: None,
            timeout_ms: default_timeout_ms(),
            retry_enabled: true,
            max_retries: default_max_retries(),
            retry_delay_strategy: RetryStrategy::default(),
            retry_delay_ms: default_retry_delay_ms(),
            max_retry_delay_ms: default_max_retry_delay_ms(),
            retry_jitter: default_retry_jitter(),
            background_upload: false,
        }
    }
}

impl UploadConfig {
    /// Default config targeting `url`.
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            ..Self::default()
        }
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }

    pub fn max_retry_delay(&self) -> Duration {
        Duration::from_millis(self.max_retry_delay_ms)
    }

    /// Retries allowed per request, honoring `retry_enabled`.
    pub fn effective_max_retries(&self) -> u32 {
        if self.retry_enabled {
            self.max_retries
        } else {
            0
        }
    }

    /// Chunk size with zero mapped to the default and capped at
    /// [`MAX_CHUNK_SIZE`]. Small sizes are kept as configured.
    pub fn effective_chunk_size(&self) -> u64 {
        match self.chunk_size {
            0 => DEFAULT_CHUNK_SIZE,
            size => size.min(MAX_CHUNK_SIZE),
        }
    }

    /// Commit endpoint: `finalize_url`, or `<url>/complete`.
    pub fn finalize_endpoint(&self) -> String {
        match &self.finalize_url {
            Some(url) if !url.is_empty() => url.clone(),
            _ => format!("{}/{FINALIZE_PATH}", self.url.trim_end_matches('/')),
        }
    }
}
