//! CLI command implementations

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, anyhow, bail};
use clap::Subcommand;
use cutroom_core::assets::StaticAssetCatalog;
use cutroom_core::render::renderer_for_mode;
use cutroom_core::{
    CutroomConfig, ExportOrchestrator, ExportRequest, JobStatus, RuntimeMode, ValidationOptions,
    resolve_output_profile, validate_timeline_with,
};
use futures::StreamExt;
use tokio::io::AsyncWriteExt;

/// Available CLI commands
#[derive(Subcommand)]
pub enum Commands {
    /// Start the export API server
    Server {
        /// Host to bind to
        #[arg(long, default_value = "127.0.0.1")]
        host: String,
        /// Port to bind to
        #[arg(short, long, default_value = "3000")]
        port: u16,
        /// production or development; defaults to CUTROOM_MODE
        #[arg(long)]
        mode: Option<RuntimeMode>,
        /// JSON map of asset id to storage key
        #[arg(long)]
        catalog: Option<PathBuf>,
    },
    /// Render an export request file to MP4 without the server
    Render {
        /// Export request JSON (clips, tracks, exportSettings)
        timeline: PathBuf,
        /// Where to write the finished MP4
        #[arg(short, long)]
        output: PathBuf,
        /// production or development; defaults to CUTROOM_MODE
        #[arg(long)]
        mode: Option<RuntimeMode>,
        /// JSON map of asset id to storage key
        #[arg(long)]
        catalog: Option<PathBuf>,
    },
    /// Validate an export request file and print the report
    Validate {
        /// Export request JSON (clips, tracks, exportSettings)
        timeline: PathBuf,
        /// Print the full report as JSON
        #[arg(long)]
        json: bool,
    },
    /// Show duration and streams of a media file
    Probe {
        /// Media file to inspect
        file: PathBuf,
    },
}

/// Handle the CLI command
///
/// # Errors
/// Returns appropriate error based on the command that fails
pub async fn handle_command(command: Commands) -> anyhow::Result<()> {
    match command {
        Commands::Server {
            host,
            port,
            mode,
            catalog,
        } => start_server(host, port, mode, catalog).await,
        Commands::Render {
            timeline,
            output,
            mode,
            catalog,
        } => render_timeline(&timeline, &output, mode, catalog).await,
        Commands::Validate { timeline, json } => validate(&timeline, json).await,
        Commands::Probe { file } => probe(&file).await,
    }
}

/// Start the export API server
///
/// # Errors
/// - Catalog file unreadable or malformed
/// - Address already in use
pub async fn start_server(
    host: String,
    port: u16,
    mode: Option<RuntimeMode>,
    catalog: Option<PathBuf>,
) -> anyhow::Result<()> {
    let mut config = CutroomConfig::from_env();
    config.server.host = host;
    config.server.port = port;

    let orchestrator = build_orchestrator(config, mode, catalog.as_deref())?;
    cutroom_web::run_server(orchestrator).await?;
    Ok(())
}

/// Render a timeline file and copy the artifact to `output`
///
/// # Errors
/// - Request file unreadable or rejected by validation
/// - Export job failed or was cancelled
/// - Output file could not be written
pub async fn render_timeline(
    timeline: &Path,
    output: &Path,
    mode: Option<RuntimeMode>,
    catalog: Option<PathBuf>,
) -> anyhow::Result<()> {
    let request = read_request(timeline).await?;
    let mut config = CutroomConfig::from_env();
    config.storage.allow_local_files = true;
    let orchestrator = build_orchestrator(config, mode, catalog.as_deref())?;

    let accepted = orchestrator
        .start_export(request)
        .await
        .map_err(|rejected| anyhow!(rejected.error))?;
    for warning in &accepted.warnings {
        println!("warning: {warning}");
    }
    println!("Export job {} started", accepted.job_id);

    let job = orchestrator
        .wait_for_completion(&accepted.job_id, Duration::from_millis(250))
        .await?;
    if job.status != JobStatus::Completed {
        bail!(
            "Export {}: {}",
            job.status,
            job.error.as_deref().unwrap_or("no details")
        );
    }

    let (_, mut body) = orchestrator.open_artifact(&job.id).await?;
    let mut file = tokio::fs::File::create(output)
        .await
        .with_context(|| format!("creating {}", output.display()))?;
    while let Some(chunk) = body.stream.next().await {
        file.write_all(&chunk?).await?;
    }
    file.flush().await?;

    println!("Wrote {} ({} bytes)", output.display(), body.size);
    Ok(())
}

/// Validate a timeline file without rendering, under the same rules as
/// `render`
///
/// # Errors
/// - Request file unreadable
/// - Timeline has hard errors
pub async fn validate(timeline: &Path, json: bool) -> anyhow::Result<()> {
    let request = read_request(timeline).await?;
    let report = validate_timeline_with(
        &request.tracks,
        &request.clips,
        &request.export_settings,
        ValidationOptions::local(),
    );

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        for issue in &report.errors {
            println!("error: {issue}");
        }
        for issue in &report.warnings {
            println!("warning: {issue}");
        }
    }

    if !report.valid {
        bail!(report.error_summary());
    }

    let profile = resolve_output_profile(&request.export_settings)?;
    println!(
        "Timeline OK: {} elements, {}@{}fps, crf {}",
        report.corrected_elements.len(),
        profile.size_arg(),
        profile.fps,
        profile.crf
    );
    Ok(())
}

/// Probe a media file with the configured ffprobe
///
/// # Errors
/// - ffprobe missing or unable to read the file
pub async fn probe(file: &Path) -> anyhow::Result<()> {
    let config = CutroomConfig::from_env();
    let renderer = renderer_for_mode(RuntimeMode::Production, &config.ffmpeg);
    let probe = renderer.probe(file).await?;

    match probe.duration_ms {
        Some(ms) => println!("duration: {:.3}s", ms as f64 / 1000.0),
        None => println!("duration: unknown"),
    }
    println!("video: {}", if probe.has_video { "yes" } else { "no" });
    println!("audio: {}", if probe.has_audio { "yes" } else { "no" });
    Ok(())
}

async fn read_request(path: &Path) -> anyhow::Result<ExportRequest> {
    let raw = tokio::fs::read_to_string(path)
        .await
        .with_context(|| format!("reading {}", path.display()))?;
    serde_json::from_str(&raw).with_context(|| format!("parsing {}", path.display()))
}

fn build_orchestrator(
    config: CutroomConfig,
    mode: Option<RuntimeMode>,
    catalog: Option<&Path>,
) -> anyhow::Result<ExportOrchestrator> {
    let mode = mode.unwrap_or_else(RuntimeMode::from_env);
    let catalog = match catalog {
        Some(path) => StaticAssetCatalog::from_json_file(path)?,
        None => StaticAssetCatalog::passthrough(),
    };
    let renderer = renderer_for_mode(mode, &config.ffmpeg);
    tracing::info!("Running in {} mode with the {} renderer", mode, renderer.name());

    Ok(ExportOrchestrator::from_config(config, renderer, Arc::new(catalog))?)
}
