//! Turns element asset references into fetchable URLs.
//!
//! Internal library assets go through two collaborators: a catalog that maps
//! an asset id to a storage key, and a signer that exchanges the key for a
//! short-lived read URL. External assets already carry their URL.

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use url::Url;

use super::AssetError;
use crate::timeline::AssetRef;

/// Asset metadata lookup.
#[async_trait]
pub trait AssetCatalog: Send + Sync {
    /// Storage key for an internal asset id.
    async fn storage_key(&self, asset_id: &str) -> Result<String, AssetError>;
}

/// Storage service issuing signed read URLs.
#[async_trait]
pub trait UrlSigner: Send + Sync {
    async fn signed_read_url(&self, storage_key: &str, ttl: Duration) -> Result<Url, AssetError>;
}

/// Catalog backed by a fixed id → key map.
///
/// With passthrough enabled, unknown ids resolve to themselves, which is
/// what a bucket laid out by asset id needs.
#[derive(Debug, Clone, Default)]
pub struct StaticAssetCatalog {
    keys: HashMap<String, String>,
    passthrough: bool,
}

impl StaticAssetCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn passthrough() -> Self {
        Self {
            keys: HashMap::new(),
            passthrough: true,
        }
    }

    pub fn with_asset(mut self, asset_id: impl Into<String>, key: impl Into<String>) -> Self {
        self.keys.insert(asset_id.into(), key.into());
        self
    }

    /// Loads a JSON object of `{"<asset id>": "<storage key>"}`.
    ///
    /// # Errors
    ///
    /// - `AssetError::Io` - File could not be read
    /// - `AssetError::Catalog` - File is not a JSON string map
    pub fn from_json_file(path: &Path) -> Result<Self, AssetError> {
        let raw = std::fs::read_to_string(path).map_err(|source| AssetError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let keys: HashMap<String, String> =
            serde_json::from_str(&raw).map_err(|e| AssetError::Catalog {
                reason: format!("{}: {e}", path.display()),
            })?;
        Ok(Self {
            keys,
            passthrough: false,
        })
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }
}

#[async_trait]
impl AssetCatalog for StaticAssetCatalog {
    async fn storage_key(&self, asset_id: &str) -> Result<String, AssetError> {
        match self.keys.get(asset_id) {
            Some(key) => Ok(key.clone()),
            None if self.passthrough => Ok(asset_id.to_string()),
            None => Err(AssetError::NotFound {
                asset_id: asset_id.to_string(),
            }),
        }
    }
}

/// Signer that joins keys onto a base URL and stamps an expiry.
#[derive(Debug, Clone)]
pub struct BaseUrlSigner {
    base: Url,
}

impl BaseUrlSigner {
    /// # Errors
    ///
    /// - `AssetError::InvalidUrl` - Base is not an absolute URL
    pub fn new(base: &str) -> Result<Self, AssetError> {
        // Url::join drops the last segment unless the base ends in a slash.
        let normalized = if base.ends_with('/') {
            base.to_string()
        } else {
            format!("{base}/")
        };
        let base = Url::parse(&normalized).map_err(|e| AssetError::InvalidUrl {
            url: base.to_string(),
            reason: e.to_string(),
        })?;
        Ok(Self { base })
    }
}

#[async_trait]
impl UrlSigner for BaseUrlSigner {
    async fn signed_read_url(&self, storage_key: &str, ttl: Duration) -> Result<Url, AssetError> {
        let mut url = self
            .base
            .join(storage_key.trim_start_matches('/'))
            .map_err(|e| AssetError::SigningFailed {
                key: storage_key.to_string(),
                reason: e.to_string(),
            })?;
        let expires = chrono::Utc::now().timestamp() + ttl.as_secs() as i64;
        url.query_pairs_mut()
            .append_pair("expires", &expires.to_string());
        Ok(url)
    }
}

/// Resolves asset references to URLs the downloader can fetch.
#[derive(Clone)]
pub struct AssetResolver {
    catalog: Arc<dyn AssetCatalog>,
    signer: Arc<dyn UrlSigner>,
    signed_url_ttl: Duration,
}

impl AssetResolver {
    pub fn new(
        catalog: Arc<dyn AssetCatalog>,
        signer: Arc<dyn UrlSigner>,
        signed_url_ttl: Duration,
    ) -> Self {
        Self {
            catalog,
            signer,
            signed_url_ttl,
        }
    }

    /// # Errors
    ///
    /// - `AssetError::NotFound` - Catalog has no entry for the internal id
    /// - `AssetError::SigningFailed` - Signer rejected the storage key
    /// - `AssetError::InvalidUrl` - External URL does not parse
    pub async fn resolve(&self, asset: &AssetRef) -> Result<Url, AssetError> {
        match asset {
            AssetRef::Internal { asset_id } => {
                let key = self.catalog.storage_key(asset_id).await?;
                tracing::debug!(asset = %asset_id, key = %key, "Signing internal asset");
                self.signer.signed_read_url(&key, self.signed_url_ttl).await
            }
            AssetRef::External { url } => Url::parse(url).map_err(|e| AssetError::InvalidUrl {
                url: url.clone(),
                reason: e.to_string(),
            }),
        }
    }
}

impl std::fmt::Debug for AssetResolver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AssetResolver")
            .field("signed_url_ttl", &self.signed_url_ttl)
            .finish_non_exhaustive()
    }
}
