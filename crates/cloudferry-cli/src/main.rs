mod cli;
mod progress;

use std::path::Path;
use std::sync::Arc;

use clap::Parser;
use cloudferry_core::config::{self, MigrationConfig};
use cloudferry_core::providers::{LocalDestination, LocalSource};
use cloudferry_core::{
    CheckpointStore, DestinationProvider, JsonReportWriter, JsonlCheckpointStore, MemoryCheckpointStore,
    MigrationOrchestrator, MigrationPhase, MigrationProgress, MigrationReport, SourceProvider,
};
use eyre::{bail, Context, Result};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::cli::Cli;
use crate::progress::{format_bytes, spawn_renderer};

const EXIT_FAILED: i32 = 1;
const EXIT_INTERRUPTED: i32 = 130;

#[tokio::main]
async fn main() -> Result<()> {
    color_eyre::install()?;
    let cli = Cli::parse();
    init_logging(cli.verbose);

    if let Some(dir) = &cli.config_dir {
        config::set_config_dir(dir);
    }

    let report = run(&cli).await?;
    print_summary(&report);
    match exit_code(&report) {
        0 => Ok(()),
        code => std::process::exit(code),
    }
}

fn init_logging(verbose: bool) {
    let default = if verbose { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default))
        .format_timestamp_secs()
        .init();
}

async fn run(cli: &Cli) -> Result<MigrationReport> {
    let config_path = match &cli.config {
        Some(path) => path.clone(),
        None => config::default_config_path()?,
    };
    let settings = MigrationConfig::load_or_create(&config_path)?;
    let mut options = settings
        .to_options()
        .wrap_err_with(|| format!("invalid configuration in {}", config_path.display()))?;
    options.dry_run = cli.dry_run;
    options.resume = cli.resume;
    if cli.test {
        options.test_mode = Some(settings.test_mode());
    }

    if !cli.source_dir.is_dir() {
        bail!("source directory does not exist: {}", cli.source_dir.display());
    }

    let checkpoint_path = match &cli.checkpoint {
        Some(path) => path.clone(),
        None => config::default_checkpoint_path()?,
    };
    let report_path = match &cli.report {
        Some(path) => path.clone(),
        None => config::default_report_path()?,
    };
    let checkpoint = open_checkpoint(&checkpoint_path, cli.resume, cli.dry_run)?;

    log::info!(
        "migrating {} -> {} (config {})",
        cli.source_dir.display(),
        cli.dest_dir.display(),
        config_path.display()
    );

    let orchestrator = MigrationOrchestrator::new(
        Arc::new(LocalSource::new(&cli.source_dir)) as Arc<dyn SourceProvider>,
        Arc::new(LocalDestination::new(&cli.dest_dir)) as Arc<dyn DestinationProvider>,
        checkpoint,
        options,
    )
    .with_report_sink(Arc::new(JsonReportWriter::new(report_path)));

    let cancel = CancellationToken::new();
    let interrupt = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            log::warn!("interrupt received; finishing in-flight files before exit");
            interrupt.cancel();
        }
    });

    let (progress, renderer) = if cli.no_progress {
        (None, None)
    } else {
        let (tx, rx) = mpsc::unbounded_channel();
        (Some(MigrationProgress::new(tx)), Some(spawn_renderer(rx)))
    };

    let outcome = orchestrator.run(cancel, progress).await;
    if let Some(renderer) = renderer {
        if let Err(err) = renderer.await {
            log::debug!("progress renderer stopped: {err}");
        }
    }
    outcome
}

/// Reuse the existing checkpoint when resuming or simulating; start fresh otherwise.
/// A dry run never creates the file.
fn open_checkpoint(path: &Path, resume: bool, dry_run: bool) -> Result<Arc<dyn CheckpointStore>> {
    if dry_run && !path.exists() {
        return Ok(Arc::new(MemoryCheckpointStore::new()));
    }
    let store = if resume || dry_run {
        JsonlCheckpointStore::open(path)
    } else {
        JsonlCheckpointStore::create(path)
    }
    .with_context(|| format!("failed to open checkpoint {}", path.display()))?;
    if let Some(summary) = store.last_summary() {
        log::info!(
            "previous run: {} files, {} transferred, {} failures",
            summary.files_processed,
            format_bytes(summary.bytes_transferred),
            summary.failures
        );
    }
    Ok(Arc::new(store))
}

fn exit_code(report: &MigrationReport) -> i32 {
    if report.interrupted {
        EXIT_INTERRUPTED
    } else if report.phase == MigrationPhase::Done {
        0
    } else {
        EXIT_FAILED
    }
}

fn print_summary(report: &MigrationReport) {
    let label = if report.dry_run { "Dry run" } else { "Migration" };
    let throughput = if report.elapsed_secs > 0.0 {
        report.bytes_transferred as f64 / report.elapsed_secs
    } else {
        0.0
    };

    println!("{label} {}", report.phase);
    println!(
        "  files:   {} migrated, {} skipped, {} failed, {} pending (of {})",
        report.files_migrated, report.files_skipped, report.files_failed, report.files_pending, report.files_scanned
    );
    println!("  folders: {} created", report.folders_created);
    println!(
        "  bytes:   {} in {:.2}s ({}/s)",
        format_bytes(report.bytes_transferred),
        report.elapsed_secs,
        format_bytes(throughput as u64)
    );
    if report.permissions_applied > 0 || report.permission_failures > 0 {
        println!(
            "  sharing: {} applied, {} failed",
            report.permissions_applied, report.permission_failures
        );
    }
    if report.interrupted {
        println!("  interrupted: re-run with --resume to continue");
    }
    if let Some(reason) = &report.failure {
        println!("  stopped: {reason}");
    }
    for err in &report.errors {
        println!(
            "  error: {} [{}] {} (retries: {})",
            err.source_path, err.kind, err.message, err.retry_count
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    #[test]
    fn exit_codes_follow_outcome() {
        let mut report = MigrationReport::new(Utc::now(), false);
        report.phase = MigrationPhase::Done;
        assert_eq!(exit_code(&report), 0);
        report.files_failed = 2;
        assert_eq!(exit_code(&report), 0);
        report.phase = MigrationPhase::Failed;
        assert_eq!(exit_code(&report), EXIT_FAILED);
        report.interrupted = true;
        assert_eq!(exit_code(&report), EXIT_INTERRUPTED);
    }

    #[test]
    fn fresh_runs_truncate_the_checkpoint() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("checkpoint.jsonl");
        std::fs::write(&path, "not json\n").expect("seed");
        let store = open_checkpoint(&path, true, false).expect("open");
        drop(store);
        assert!(!std::fs::read_to_string(&path).expect("read").is_empty());

        let store = open_checkpoint(&path, false, false).expect("create");
        assert!(store.load_all().expect("load").is_empty());
        drop(store);
        assert!(std::fs::read_to_string(&path).expect("read").is_empty());
    }

    #[test]
    fn dry_runs_leave_no_checkpoint_behind() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("checkpoint.jsonl");
        let store = open_checkpoint(&path, false, true).expect("open");
        assert!(store.load_all().expect("load").is_empty());
        drop(store);
        assert!(!path.exists());

        std::fs::write(&path, "").expect("seed");
        let store = open_checkpoint(&path, true, true).expect("reopen");
        drop(store);
        assert!(path.exists());
    }
}
