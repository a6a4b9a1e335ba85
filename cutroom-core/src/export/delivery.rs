//! Artifact storage for finished renders.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use bytes::Bytes;
use futures::StreamExt;
use futures::stream::BoxStream;
use serde::{Deserialize, Serialize};
use tokio_util::io::ReaderStream;

use super::JobId;
use crate::config::StorageConfig;

#[derive(Debug, thiserror::Error)]
pub enum DeliveryError {
    #[error("Artifact {key} not found")]
    NotFound { key: String },

    #[error("Artifact I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Handle to an uploaded render.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoredArtifact {
    pub key: String,
    pub download_url: String,
    pub size: u64,
}

/// Byte stream of a stored artifact, for proxying to a client.
pub struct ArtifactBody {
    pub size: u64,
    pub stream: BoxStream<'static, std::io::Result<Bytes>>,
}

impl std::fmt::Debug for ArtifactBody {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ArtifactBody")
            .field("size", &self.size)
            .finish_non_exhaustive()
    }
}

/// Object storage for rendered files.
#[async_trait]
pub trait ArtifactStore: Send + Sync {
    /// Stores `local` for `job_id` and returns a download handle.
    async fn upload(&self, job_id: &JobId, local: &Path) -> Result<StoredArtifact, DeliveryError>;

    async fn open(&self, artifact: &StoredArtifact) -> Result<ArtifactBody, DeliveryError>;

    /// Removes an artifact. Missing artifacts are not an error.
    async fn delete(&self, artifact: &StoredArtifact) -> Result<(), DeliveryError>;
}

/// Keeps artifacts in a local directory and serves them through the
/// control plane's download route.
#[derive(Debug, Clone)]
pub struct LocalArtifactStore {
    output_dir: PathBuf,
    public_base_url: String,
}

impl LocalArtifactStore {
    pub fn new(config: &StorageConfig) -> Self {
        Self {
            output_dir: config.output_dir.clone(),
            public_base_url: config.public_base_url.trim_end_matches('/').to_string(),
        }
    }

    fn path_for(&self, key: &str) -> PathBuf {
        self.output_dir.join(key)
    }
}

#[async_trait]
impl ArtifactStore for LocalArtifactStore {
    async fn upload(&self, job_id: &JobId, local: &Path) -> Result<StoredArtifact, DeliveryError> {
        tokio::fs::create_dir_all(&self.output_dir)
            .await
            .map_err(|source| DeliveryError::Io {
                path: self.output_dir.clone(),
                source,
            })?;

        let key = format!("{job_id}.mp4");
        let destination = self.path_for(&key);
        let size = tokio::fs::copy(local, &destination)
            .await
            .map_err(|source| DeliveryError::Io {
                path: destination.clone(),
                source,
            })?;

        tracing::info!(
            job_id = %job_id,
            "Stored artifact {} ({} bytes)",
            destination.display(),
            size
        );

        Ok(StoredArtifact {
            download_url: format!("{}/export/download/{job_id}", self.public_base_url),
            key,
            size,
        })
    }

    async fn open(&self, artifact: &StoredArtifact) -> Result<ArtifactBody, DeliveryError> {
        let path = self.path_for(&artifact.key);
        let file = tokio::fs::File::open(&path).await.map_err(|source| {
            if source.kind() == std::io::ErrorKind::NotFound {
                DeliveryError::NotFound {
                    key: artifact.key.clone(),
                }
            } else {
                DeliveryError::Io {
                    path: path.clone(),
                    source,
                }
            }
        })?;
        let size = file
            .metadata()
            .await
            .map_err(|source| DeliveryError::Io {
                path: path.clone(),
                source,
            })?
            .len();

        Ok(ArtifactBody {
            size,
            stream: ReaderStream::new(file).boxed(),
        })
    }

    async fn delete(&self, artifact: &StoredArtifact) -> Result<(), DeliveryError> {
        let path = self.path_for(&artifact.key);
        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(source) => Err(DeliveryError::Io { path, source }),
        }
    }
}
