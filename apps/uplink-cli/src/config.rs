//! Upload profile.
//!
//! Profiles are TOML, read from `--config` or the platform location:
//! - Linux: `~/.config/uplink/uplink.toml`
//! - Windows: `%APPDATA%/uplink/uplink.toml`
//!
//! ```toml
//! concurrency = 2
//!
//! [upload]
//! url = "https://files.example.com/upload"
//! chunkSize = 8388608
//!
//! [upload.headers]
//! Authorization = "Bearer ..."
//! ```

use std::path::{Path, PathBuf};

use anyhow::Context;
use serde::{Deserialize, Serialize};
use uplink_protocol::UploadConfig;
use uplink_queue::QueueOptions;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Profile {
    /// Maximum simultaneous uploads.
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,

    /// Settings applied to every file of the run.
    #[serde(default)]
    pub upload: UploadConfig,
}

fn default_concurrency() -> usize {
    QueueOptions::default().concurrency
}

impl Default for Profile {
    fn default() -> Self {
        Self {
            concurrency: default_concurrency(),
            upload: UploadConfig::default(),
        }
    }
}

impl Profile {
    /// Loads `explicit`, or the platform profile when `None`.
    ///
    /// A missing platform profile yields defaults; a missing explicit one
    /// is an error.
    pub fn load(explicit: Option<&Path>) -> anyhow::Result<Self> {
        match explicit {
            Some(path) => Self::read(path),
            None => {
                let path = profile_path();
                if path.exists() {
                    Self::read(&path)
                } else {
                    tracing::debug!(path = %path.display(), "no profile, using defaults");
                    Ok(Self::default())
                }
            }
        }
    }

    fn read(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("reading profile {}", path.display()))?;
        let profile = toml::from_str(&content)
            .with_context(|| format!("parsing profile {}", path.display()))?;
        Ok(profile)
    }

    /// Applies command-line values on top of the profile.
    pub fn with_overrides(
        mut self,
        url: Option<String>,
        concurrency: Option<usize>,
        chunk_size: Option<u64>,
    ) -> Self {
        if let Some(url) = url {
            self.upload.url = url;
        }
        if let Some(concurrency) = concurrency {
            self.concurrency = concurrency;
        }
        if let Some(chunk_size) = chunk_size {
            self.upload.chunk_size = chunk_size;
        }
        self
    }
}

/// Returns the platform-specific profile path.
fn profile_path() -> PathBuf {
    #[cfg(target_os = "windows")]
    {
        let appdata =
            std::env::var("APPDATA").unwrap_or_else(|_| "C:\\Users\\Default\\AppData".into());
        PathBuf::from(appdata).join("uplink").join("uplink.toml")
    }

    #[cfg(not(target_os = "windows"))]
    {
        let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".into());
        PathBuf::from(home)
            .join(".config")
            .join("uplink")
            .join("uplink.toml")
    }
}
