//! Asset resolution and download.

pub mod downloader;
pub mod resolver;
pub mod retry;

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};

pub use downloader::{AssetDownloader, DownloadOutcome, FailedAsset};
pub use resolver::{AssetCatalog, AssetResolver, BaseUrlSigner, StaticAssetCatalog, UrlSigner};
pub use retry::{RetryPolicy, Retryable};

/// Failures while resolving or fetching an asset.
#[derive(Debug, thiserror::Error)]
pub enum AssetError {
    #[error("Asset {asset_id} not found in catalog")]
    NotFound { asset_id: String },

    #[error("Asset catalog unusable: {reason}")]
    Catalog { reason: String },

    #[error("Failed to sign storage key {key}: {reason}")]
    SigningFailed { key: String, reason: String },

    #[error("Invalid asset URL {url}: {reason}")]
    InvalidUrl { url: String, reason: String },

    #[error("HTTP {status} while fetching {url}")]
    HttpStatus { url: String, status: u16 },

    #[error("Timed out after {seconds}s fetching {url}")]
    Timeout { url: String, seconds: u64 },

    #[error("Transport error fetching {url}: {reason}")]
    Transport { url: String, reason: String },

    #[error("Empty response body from {url}")]
    EmptyBody { url: String },

    #[error("Asset at {url} exceeds the {limit} byte limit")]
    TooLarge { url: String, limit: u64 },

    #[error("Size mismatch for {path}: expected {expected} bytes, found {actual}")]
    SizeMismatch {
        path: PathBuf,
        expected: u64,
        actual: u64,
    },

    #[error("HTTP client setup failed: {reason}")]
    ClientSetup { reason: String },

    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl Retryable for AssetError {
    /// Client errors and unresolvable references fail immediately; anything
    /// that might be transient gets another attempt.
    fn is_retryable(&self) -> bool {
        match self {
            AssetError::HttpStatus { status, .. } => !(400..500).contains(status),
            AssetError::Timeout { .. }
            | AssetError::Transport { .. }
            | AssetError::EmptyBody { .. }
            | AssetError::SizeMismatch { .. } => true,
            AssetError::Io { source, .. } => source.kind() != std::io::ErrorKind::NotFound,
            AssetError::NotFound { .. }
            | AssetError::Catalog { .. }
            | AssetError::SigningFailed { .. }
            | AssetError::InvalidUrl { .. }
            | AssetError::TooLarge { .. }
            | AssetError::ClientSetup { .. } => false,
        }
    }
}

/// Local copies of a job's assets, keyed by [`AssetRef::key`](crate::timeline::AssetRef::key).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DownloadedAssetMap {
    paths: HashMap<String, PathBuf>,
    silent: HashSet<String>,
}

impl DownloadedAssetMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, key: impl Into<String>, path: impl Into<PathBuf>) {
        self.paths.insert(key.into(), path.into());
    }

    pub fn get(&self, key: &str) -> Option<&Path> {
        self.paths.get(key).map(PathBuf::as_path)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.paths.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.paths.len()
    }

    pub fn is_empty(&self) -> bool {
        self.paths.is_empty()
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.paths.keys().map(String::as_str)
    }

    /// Records that the file behind `key` carries no audio stream.
    pub fn mark_silent(&mut self, key: &str) {
        self.silent.insert(key.to_string());
    }

    pub fn has_audio(&self, key: &str) -> bool {
        self.contains(key) && !self.silent.contains(key)
    }
}
