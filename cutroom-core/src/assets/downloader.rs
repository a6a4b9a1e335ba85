//! Concurrent, retried asset downloads into a job's scratch directory.

use std::fmt::Display;
use std::path::{Path, PathBuf};
use std::time::Duration;

use futures::StreamExt;
use futures::stream::FuturesUnordered;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use url::Url;

use super::{AssetError, AssetResolver, DownloadedAssetMap, RetryPolicy};
use crate::config::DownloadConfig;
use crate::timeline::{AssetRef, ElementKind, TimelineElement};

/// Result of the download phase. Failed assets never abort the job.
#[derive(Debug, Default)]
pub struct DownloadOutcome {
    pub assets: DownloadedAssetMap,
    pub failures: Vec<FailedAsset>,
}

impl DownloadOutcome {
    /// Ids of elements whose media could not be fetched.
    pub fn dropped_element_ids(&self) -> Vec<&str> {
        self.failures
            .iter()
            .flat_map(|f| f.element_ids.iter().map(String::as_str))
            .collect()
    }
}

#[derive(Debug)]
pub struct FailedAsset {
    pub key: String,
    pub element_ids: Vec<String>,
    pub error: AssetError,
}

/// One unique asset referenced by one or more elements.
#[derive(Debug)]
struct PlannedAsset {
    key: String,
    asset: AssetRef,
    kind: ElementKind,
    element_ids: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct AssetDownloader {
    client: reqwest::Client,
    resolver: AssetResolver,
    policy: RetryPolicy,
    attempt_timeout: Duration,
    max_bytes: u64,
    allow_local_files: bool,
}

impl AssetDownloader {
    /// # Errors
    ///
    /// - `AssetError::ClientSetup` - HTTP client could not be built
    pub fn new(config: &DownloadConfig, resolver: AssetResolver) -> Result<Self, AssetError> {
        let client = reqwest::Client::builder()
            .connect_timeout(config.attempt_timeout)
            .user_agent(config.user_agent)
            .build()
            .map_err(|e| AssetError::ClientSetup {
                reason: e.to_string(),
            })?;

        Ok(Self {
            client,
            resolver,
            policy: RetryPolicy::from_config(config),
            attempt_timeout: config.attempt_timeout,
            max_bytes: config.max_asset_bytes,
            allow_local_files: false,
        })
    }

    /// Permits `file://` assets to be copied from local disk.
    pub fn with_local_files(mut self, allow: bool) -> Self {
        self.allow_local_files = allow;
        self
    }

    /// Downloads every unique media asset referenced by `elements`.
    ///
    /// Files land in `scratch_dir` as `<job_id>_<n>.<ext>`. `on_progress` is
    /// called with `(finished, total)` as each asset settles.
    pub async fn download_all<F>(
        &self,
        job_id: impl Display,
        elements: &[TimelineElement],
        scratch_dir: &Path,
        mut on_progress: F,
    ) -> DownloadOutcome
    where
        F: FnMut(usize, usize),
    {
        let planned = plan_downloads(elements);
        let total = planned.len();
        let mut outcome = DownloadOutcome::default();

        if total == 0 {
            on_progress(0, 0);
            return outcome;
        }

        if let Err(source) = fs::create_dir_all(scratch_dir).await {
            let error_path = scratch_dir.to_path_buf();
            for asset in planned {
                outcome.failures.push(FailedAsset {
                    key: asset.key,
                    element_ids: asset.element_ids,
                    error: AssetError::Io {
                        path: error_path.clone(),
                        source: std::io::Error::new(source.kind(), source.to_string()),
                    },
                });
            }
            return outcome;
        }

        tracing::info!(job_id = %job_id, "Downloading {} unique assets", total);

        let job_prefix = job_id.to_string();
        let mut pending: FuturesUnordered<_> = planned
            .into_iter()
            .enumerate()
            .map(|(index, asset)| {
                let dest_stem = scratch_dir.join(format!("{job_prefix}_{index}"));
                async move {
                    let result = self.fetch_asset(&asset, &dest_stem).await;
                    (asset, result)
                }
            })
            .collect();

        let mut finished = 0;
        while let Some((asset, result)) = pending.next().await {
            finished += 1;
            match result {
                Ok(path) => {
                    tracing::debug!(asset = %asset.key, path = %path.display(), "Asset ready");
                    outcome.assets.insert(asset.key, path);
                }
                Err(error) => {
                    tracing::warn!(
                        asset = %asset.key,
                        elements = ?asset.element_ids,
                        "Dropping elements after failed download: {}",
                        error
                    );
                    outcome.failures.push(FailedAsset {
                        key: asset.key,
                        element_ids: asset.element_ids,
                        error,
                    });
                }
            }
            on_progress(finished, total);
        }

        outcome
    }

    async fn fetch_asset(&self, asset: &PlannedAsset, dest_stem: &Path) -> Result<PathBuf, AssetError> {
        let url = self.resolver.resolve(&asset.asset).await?;
        match url.scheme() {
            "http" | "https" => {}
            "file" if self.allow_local_files => {}
            scheme => {
                return Err(AssetError::InvalidUrl {
                    url: redacted(&url),
                    reason: format!("scheme '{scheme}' is not allowed"),
                });
            }
        }
        let dest = dest_stem.with_extension(extension_for(&url, asset.kind));

        self.policy
            .run(&asset.key, |attempt| {
                let url = url.clone();
                let dest = dest.clone();
                async move {
                    tracing::trace!(attempt, url = %redacted(&url), "Fetching asset");
                    self.fetch_once(&url, &dest).await
                }
            })
            .await?;

        Ok(dest)
    }

    async fn fetch_once(&self, url: &Url, dest: &Path) -> Result<u64, AssetError> {
        let result = if url.scheme() == "file" {
            self.copy_local(url, dest).await
        } else {
            match tokio::time::timeout(self.attempt_timeout, self.fetch_http(url, dest)).await {
                Ok(result) => result,
                Err(_) => Err(AssetError::Timeout {
                    url: redacted(url),
                    seconds: self.attempt_timeout.as_secs(),
                }),
            }
        };

        if result.is_err()
            && let Err(e) = fs::remove_file(dest).await
            && e.kind() != std::io::ErrorKind::NotFound
        {
            tracing::trace!(path = %dest.display(), "Could not remove partial download: {}", e);
        }
        result
    }

    async fn fetch_http(&self, url: &Url, dest: &Path) -> Result<u64, AssetError> {
        let response = self
            .client
            .get(url.clone())
            .send()
            .await
            .map_err(|e| self.transport_error(url, e))?;

        let status = response.status();
        if !status.is_success() {
            return Err(AssetError::HttpStatus {
                url: redacted(url),
                status: status.as_u16(),
            });
        }

        let expected = response.content_length();
        if let Some(length) = expected
            && length > self.max_bytes
        {
            return Err(AssetError::TooLarge {
                url: redacted(url),
                limit: self.max_bytes,
            });
        }

        let mut file = fs::File::create(dest).await.map_err(|source| AssetError::Io {
            path: dest.to_path_buf(),
            source,
        })?;

        let mut stream = response.bytes_stream();
        let mut written: u64 = 0;
        while let Some(chunk) = stream.next().await {
            let chunk = chunk.map_err(|e| self.transport_error(url, e))?;
            written += chunk.len() as u64;
            if written > self.max_bytes {
                return Err(AssetError::TooLarge {
                    url: redacted(url),
                    limit: self.max_bytes,
                });
            }
            file.write_all(&chunk)
                .await
                .map_err(|source| AssetError::Io {
                    path: dest.to_path_buf(),
                    source,
                })?;
        }
        file.flush().await.map_err(|source| AssetError::Io {
            path: dest.to_path_buf(),
            source,
        })?;
        drop(file);

        verify_download(url, dest, written, expected).await
    }

    async fn copy_local(&self, url: &Url, dest: &Path) -> Result<u64, AssetError> {
        let source = url.to_file_path().map_err(|_| AssetError::InvalidUrl {
            url: url.to_string(),
            reason: "not a local file path".to_string(),
        })?;

        let metadata = fs::metadata(&source)
            .await
            .map_err(|e| AssetError::Io {
                path: source.clone(),
                source: e,
            })?;
        if metadata.len() > self.max_bytes {
            return Err(AssetError::TooLarge {
                url: url.to_string(),
                limit: self.max_bytes,
            });
        }

        let copied = fs::copy(&source, dest).await.map_err(|e| AssetError::Io {
            path: dest.to_path_buf(),
            source: e,
        })?;

        verify_download(url, dest, copied, Some(metadata.len())).await
    }

    fn transport_error(&self, url: &Url, error: reqwest::Error) -> AssetError {
        if error.is_timeout() {
            AssetError::Timeout {
                url: redacted(url),
                seconds: self.attempt_timeout.as_secs(),
            }
        } else {
            AssetError::Transport {
                url: redacted(url),
                reason: error.to_string(),
            }
        }
    }
}

async fn verify_download(
    url: &Url,
    dest: &Path,
    written: u64,
    expected: Option<u64>,
) -> Result<u64, AssetError> {
    if written == 0 {
        return Err(AssetError::EmptyBody { url: redacted(url) });
    }

    if let Some(expected) = expected
        && expected != written
    {
        return Err(AssetError::SizeMismatch {
            path: dest.to_path_buf(),
            expected,
            actual: written,
        });
    }

    let on_disk = fs::metadata(dest)
        .await
        .map_err(|source| AssetError::Io {
            path: dest.to_path_buf(),
            source,
        })?
        .len();
    if on_disk != written {
        return Err(AssetError::SizeMismatch {
            path: dest.to_path_buf(),
            expected: written,
            actual: on_disk,
        });
    }

    Ok(written)
}

/// Unique media assets in first-seen order.
fn plan_downloads(elements: &[TimelineElement]) -> Vec<PlannedAsset> {
    let mut planned: Vec<PlannedAsset> = Vec::new();

    for element in elements.iter().filter(|e| e.kind.is_media()) {
        let Some(asset) = element.asset_ref() else {
            continue;
        };
        let key = asset.key();
        match planned.iter_mut().find(|p| p.key == key) {
            Some(existing) => existing.element_ids.push(element.id.clone()),
            None => planned.push(PlannedAsset {
                key,
                asset,
                kind: element.kind,
                element_ids: vec![element.id.clone()],
            }),
        }
    }

    planned
}

fn extension_for(url: &Url, kind: ElementKind) -> String {
    Path::new(url.path())
        .extension()
        .and_then(|ext| ext.to_str())
        .filter(|ext| !ext.is_empty() && ext.len() <= 5 && ext.chars().all(|c| c.is_ascii_alphanumeric()))
        .map(str::to_ascii_lowercase)
        .unwrap_or_else(|| kind.default_extension().to_string())
}

/// URL without its query string; signed URLs must not reach the logs.
fn redacted(url: &Url) -> String {
    let mut clean = url.clone();
    clean.set_query(None);
    clean.to_string()
}
