//! Centralized configuration for Cutroom.
//!
//! All tunable parameters and settings are defined here to avoid
//! hard-coded values scattered throughout the codebase.

use std::path::PathBuf;
use std::time::Duration;

/// Central configuration for all Cutroom components.
///
/// Groups related configuration settings into logical sections.
/// Supports environment variable overrides for runtime customization.
#[derive(Debug, Clone, Default)]
pub struct CutroomConfig {
    pub export: ExportConfig,
    pub download: DownloadConfig,
    pub ffmpeg: FfmpegConfig,
    pub storage: StorageConfig,
    pub server: ServerConfig,
}

/// Export job lifecycle configuration.
#[derive(Debug, Clone)]
pub struct ExportConfig {
    /// Age after which a job and its artifact are evicted, regardless of state
    pub job_retention: Duration,
    /// How often the eviction sweep runs
    pub eviction_interval: Duration,
    /// Lifetime of signed read URLs requested for internal assets
    pub signed_url_ttl: Duration,
}

impl Default for ExportConfig {
    fn default() -> Self {
        Self {
            job_retention: Duration::from_secs(3600),    // 1 hour
            eviction_interval: Duration::from_secs(300), // 5 minutes
            signed_url_ttl: Duration::from_secs(3600),
        }
    }
}

/// Asset download behavior.
///
/// Controls retry schedule, per-attempt timeout and the hard size ceiling
/// applied to every fetched asset.
#[derive(Debug, Clone)]
pub struct DownloadConfig {
    /// Total attempts per asset, including the first
    pub max_attempts: u32,
    /// Delay before the second attempt; doubles per attempt
    pub base_retry_delay: Duration,
    /// Upper bound for any single backoff delay
    pub max_retry_delay: Duration,
    /// Timeout for one complete attempt (connect + body)
    pub attempt_timeout: Duration,
    /// Assets larger than this are rejected
    pub max_asset_bytes: u64,
    /// User agent for HTTP requests
    pub user_agent: &'static str,
}

impl Default for DownloadConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_retry_delay: Duration::from_millis(1000),
            max_retry_delay: Duration::from_millis(8000),
            attempt_timeout: Duration::from_secs(60),
            max_asset_bytes: 500 * 1024 * 1024, // 500 MiB
            user_agent: "cutroom/0.1.0",
        }
    }
}

/// External transcoding engine configuration.
#[derive(Debug, Clone)]
pub struct FfmpegConfig {
    /// Encoder executable
    pub ffmpeg_path: PathBuf,
    /// Probe executable
    pub ffprobe_path: PathBuf,
    /// Number of trailing stderr lines kept for failure diagnostics
    pub stderr_tail_lines: usize,
}

impl Default for FfmpegConfig {
    fn default() -> Self {
        Self {
            ffmpeg_path: PathBuf::from("ffmpeg"),
            ffprobe_path: PathBuf::from("ffprobe"),
            stderr_tail_lines: 40,
        }
    }
}

/// Local storage and public URL configuration.
#[derive(Debug, Clone)]
pub struct StorageConfig {
    /// Scratch space; every job gets its own subdirectory
    pub work_dir: PathBuf,
    /// Where the local artifact store keeps rendered files
    pub output_dir: PathBuf,
    /// Base URL used when issuing download links
    pub public_base_url: String,
    /// Base URL the development signer resolves storage keys against
    pub asset_base_url: Option<String>,
    /// Accept `file://` assets and copy them from local disk. Off for the
    /// server; the CLI `render` command turns it on.
    pub allow_local_files: bool,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            work_dir: std::env::temp_dir().join("cutroom").join("work"),
            output_dir: PathBuf::from("exports"),
            public_base_url: "http://127.0.0.1:3000".to_string(),
            asset_base_url: None,
            allow_local_files: false,
        }
    }
}

/// HTTP control plane configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 3000,
        }
    }
}

impl ServerConfig {
    /// Address string suitable for `TcpListener::bind`.
    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

impl CutroomConfig {
    /// Creates configuration with environment variable overrides.
    ///
    /// Allows runtime configuration via environment variables while
    /// maintaining sensible defaults.
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(path) = std::env::var("CUTROOM_FFMPEG_PATH") {
            config.ffmpeg.ffmpeg_path = PathBuf::from(path);
        }

        if let Ok(path) = std::env::var("CUTROOM_FFPROBE_PATH") {
            config.ffmpeg.ffprobe_path = PathBuf::from(path);
        }

        if let Ok(dir) = std::env::var("CUTROOM_WORK_DIR") {
            config.storage.work_dir = PathBuf::from(dir);
        }

        if let Ok(dir) = std::env::var("CUTROOM_OUTPUT_DIR") {
            config.storage.output_dir = PathBuf::from(dir);
        }

        if let Ok(url) = std::env::var("CUTROOM_PUBLIC_BASE_URL") {
            config.storage.public_base_url = url.trim_end_matches('/').to_string();
        }

        if let Ok(url) = std::env::var("CUTROOM_ASSET_BASE_URL") {
            config.storage.asset_base_url = Some(url);
        }

        if let Ok(retention) = std::env::var("CUTROOM_JOB_RETENTION_SECS")
            && let Ok(seconds) = retention.parse::<u64>()
        {
            config.export.job_retention = Duration::from_secs(seconds);
        }

        if let Ok(timeout) = std::env::var("CUTROOM_DOWNLOAD_TIMEOUT_SECS")
            && let Ok(seconds) = timeout.parse::<u64>()
        {
            config.download.attempt_timeout = Duration::from_secs(seconds);
        }

        if let Ok(limit) = std::env::var("CUTROOM_MAX_ASSET_BYTES")
            && let Ok(bytes) = limit.parse::<u64>()
        {
            config.download.max_asset_bytes = bytes;
        }

        config
    }

    /// Creates a configuration optimized for testing.
    ///
    /// Retry delays are shrunk so exhausted downloads fail in milliseconds.
    pub fn for_testing() -> Self {
        Self {
            download: DownloadConfig {
                base_retry_delay: Duration::from_millis(5),
                max_retry_delay: Duration::from_millis(20),
                attempt_timeout: Duration::from_secs(5),
                ..Default::default()
            },
            ..Default::default()
        }
    }
}
