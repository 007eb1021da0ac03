use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, level_filters::LevelFilter, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use track_archiver::acquisition::RunOutcome;
use track_archiver::config::{AppConfig, CliConfig, FileConfig};
use track_archiver::throttle::RandomDelayThrottle;
use track_archiver::{
    Archiver, HttpSession, RunSummary, SessionFile, SourceMode, SyncOptions, VerifyMode,
    VerifyReport,
};

/// Exit status when the circuit breaker stopped the run.
const EXIT_CIRCUIT_TRIPPED: u8 = 2;

fn parse_path(s: &str) -> Result<PathBuf> {
    let path_buf = PathBuf::from(s);
    if path_buf.is_absolute() {
        return Ok(path_buf);
    }
    let cwd = std::env::current_dir()?;
    Ok(cwd.join(path_buf))
}

#[derive(Parser, Debug)]
#[clap(about = "Keep a local archive of a remote track catalog in sync")]
struct CliArgs {
    /// Path to a TOML config file. Values in the file override CLI flags.
    #[clap(long, value_parser = parse_path)]
    pub config: Option<PathBuf>,

    /// Path to the manifest file. Defaults to <output-dir>/manifest.json.
    #[clap(long, value_parser = parse_path)]
    pub manifest: Option<PathBuf>,

    /// Directory the artifacts are archived into.
    #[clap(long, value_parser = parse_path)]
    pub output_dir: Option<PathBuf>,

    /// Directory downloads are staged in. Defaults to <output-dir>/.staging.
    #[clap(long, value_parser = parse_path)]
    pub staging_dir: Option<PathBuf>,

    /// JSON file holding the bearer token and owner id.
    #[clap(long, value_parser = parse_path)]
    pub session_file: Option<PathBuf>,

    /// Which remote listing to archive.
    #[clap(long, value_enum)]
    pub mode: Option<SourceMode>,

    /// Base URI of the remote service.
    #[clap(long)]
    pub base_uri: Option<String>,

    /// Fetch and merge the listing without downloading or writing the manifest.
    #[clap(long)]
    pub dry_run: bool,

    /// Verify acquired artifacts after the sync.
    #[clap(long)]
    pub verify: bool,

    /// Only verify acquired artifacts, without syncing. Combine with --dry-run to report only.
    #[clap(long, conflicts_with = "retry_failed")]
    pub verify_only: bool,

    /// Move failed items back to pending before syncing.
    #[clap(long)]
    pub retry_failed: bool,

    /// Promote staged artifacts in batches of this size. 0 promotes immediately.
    #[clap(long)]
    pub batch_size: Option<usize>,
}

/// Convert CLI args to CliConfig for config resolution
impl From<&CliArgs> for CliConfig {
    fn from(args: &CliArgs) -> Self {
        CliConfig {
            manifest_path: args.manifest.clone(),
            output_dir: args.output_dir.clone(),
            staging_dir: args.staging_dir.clone(),
            session_file: args.session_file.clone(),
            source_mode: args.mode,
            remote_base_uri: args.base_uri.clone(),
            promotion_batch_size: args.batch_size,
        }
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli_args = CliArgs::parse();

    if let Err(e) = tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(
            EnvFilter::builder()
                .with_default_directive(LevelFilter::INFO.into())
                .with_env_var("LOG_LEVEL")
                .from_env_lossy(),
        )
        .try_init()
    {
        eprintln!("Failed to initialize logging: {}", e);
    }

    match run(cli_args).await {
        Ok(code) => code,
        Err(e) => {
            error!("{:#}", e);
            ExitCode::FAILURE
        }
    }
}

async fn run(cli_args: CliArgs) -> Result<ExitCode> {
    let file_config = match &cli_args.config {
        Some(path) => {
            info!("Loading config from {:?}", path);
            Some(FileConfig::load(path)?)
        }
        None => None,
    };

    let cli_config: CliConfig = (&cli_args).into();
    let app_config = AppConfig::resolve(&cli_config, file_config)?;

    info!("Configuration loaded:");
    info!("  manifest: {:?}", app_config.manifest_path);
    info!("  output_dir: {:?}", app_config.output_dir);
    info!("  staging_dir: {:?}", app_config.staging_dir);
    info!("  source_mode: {}", app_config.source_mode.as_str());
    info!("  remote: {}", app_config.archiver.remote_base_uri);
    info!(
        "  throttle: {}-{} ms",
        app_config.archiver.throttle_min_ms, app_config.archiver.throttle_max_ms
    );

    let session = HttpSession::new(
        &app_config.archiver,
        SessionFile::new(app_config.session_file.clone()),
    )
    .context("Failed to create HTTP session")?;
    let throttle = RandomDelayThrottle::from_settings(&app_config.archiver);
    let archiver = Archiver::new(&app_config, Arc::new(session), Arc::new(throttle));

    if cli_args.verify_only {
        let mode = if cli_args.dry_run {
            VerifyMode::DryRun
        } else {
            VerifyMode::Apply
        };
        let report = archiver.verify(mode)?;
        print_verification(&report);
        return Ok(ExitCode::SUCCESS);
    }

    let shutdown = CancellationToken::new();
    let signal_token = shutdown.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupt received, stopping after the current item");
            signal_token.cancel();
        }
    });

    let options = SyncOptions {
        dry_run: cli_args.dry_run,
        verify_after: cli_args.verify,
        retry_failed: cli_args.retry_failed,
    };
    let summary = archiver.sync(options, &shutdown).await?;
    print_summary(&summary, cli_args.dry_run);

    if summary.circuit_tripped() {
        error!("Too many consecutive failures, the session may have expired. Refresh it and run again.");
        return Ok(ExitCode::from(EXIT_CIRCUIT_TRIPPED));
    }
    Ok(ExitCode::SUCCESS)
}

fn print_summary(summary: &RunSummary, dry_run: bool) {
    println!("Remote items fetched: {}", summary.fetched);
    println!(
        "New items: {} ({} already on disk)",
        summary.merge.created, summary.merge.recovered
    );
    if summary.reset_failed > 0 {
        println!("Failed items reset for retry: {}", summary.reset_failed);
    }
    if !summary.merge.collisions.is_empty() {
        println!(
            "Ambiguous file names ignored: {}",
            summary.merge.collisions.join(", ")
        );
    }

    if dry_run {
        println!("Would acquire {} items:", summary.planned.len());
        for id in &summary.planned {
            println!("  {}", id);
        }
    }

    if let Some(report) = &summary.acquisition {
        println!(
            "Acquired: {}, failed: {} (promotion failures: {})",
            report.acquired, report.failed, report.promotion_failures
        );
        match report.outcome {
            RunOutcome::Completed => {}
            RunOutcome::CircuitTripped => {
                println!("Stopped by circuit breaker, {} items left", report.remaining())
            }
            RunOutcome::Cancelled => println!("Interrupted, {} items left", report.remaining()),
        }
    }

    if let Some(report) = &summary.verification {
        print_verification(report);
    }

    println!(
        "Manifest: {} acquired, {} pending, {} failed",
        summary.stats.acquired, summary.stats.pending, summary.stats.failed
    );
}

fn print_verification(report: &VerifyReport) {
    println!(
        "Verified: {}, missing: {}{}",
        report.verified,
        report.missing,
        if report.mode == VerifyMode::DryRun {
            " (dry run, manifest unchanged)"
        } else {
            ""
        }
    );
    for missing in &report.missing_items {
        println!("  missing: {} \"{}\"", missing.id, missing.title);
    }
}
