//! Drives one migration run through its phases.
//!
//! Initializing checks both providers, resolves the destination root and
//! loads the checkpoint. Scanning walks the source into an ordered plan.
//! Migrating feeds the plan to a bounded worker pool. Verifying compares what
//! was processed against the plan. Fatal-global problems surface as `Err`;
//! per-file problems end up in the report.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use eyre::{bail, eyre, Context, Result};
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::checkpoint::{spawn_checkpoint_writer, CheckpointSummary};
use crate::errors::{ErrorKind, ProviderResult};
use crate::folders::FolderCache;
use crate::metadata::MetadataTranslator;
use crate::path_map::{DestPath, ExcludeFilter, PathMapper};
use crate::progress::{report as notify, MigrationProgress};
use crate::provider::{CheckpointStore, DestinationProvider, SourceProvider};
use crate::report::{MigrationReport, ReportSink, Verification};
use crate::retry::with_retry;
use crate::transfer::TransferExecutor;

mod options;
mod phase;
mod scan;
mod worker;

pub use options::{MigrationOptions, TestMode};
pub use phase::MigrationPhase;
pub use scan::{PlannedEntry, ScanPlan};

use scan::Scanner;
use worker::{spawn_workers, Tally, WorkerContext};

struct Setup {
    filter: ExcludeFilter,
    folders: Arc<FolderCache>,
    completed: HashSet<String>,
}

/// Result of the Migrating phase.
struct MigrationTotals {
    tally: Tally,
    skipped: u64,
    bytes_skipped: u64,
}

pub struct MigrationOrchestrator {
    source: Arc<dyn SourceProvider>,
    dest: Arc<dyn DestinationProvider>,
    checkpoint: Arc<dyn CheckpointStore>,
    options: MigrationOptions,
    report_sink: Option<Arc<dyn ReportSink>>,
    phase: Mutex<MigrationPhase>,
}

impl MigrationOrchestrator {
    pub fn new(
        source: Arc<dyn SourceProvider>,
        dest: Arc<dyn DestinationProvider>,
        checkpoint: Arc<dyn CheckpointStore>,
        options: MigrationOptions,
    ) -> Self {
        Self {
            source,
            dest,
            checkpoint,
            options,
            report_sink: None,
            phase: Mutex::new(MigrationPhase::Initializing),
        }
    }

    /// Hand the final report to `sink` once a run finishes.
    pub fn with_report_sink(mut self, sink: Arc<dyn ReportSink>) -> Self {
        self.report_sink = Some(sink);
        self
    }

    pub fn options(&self) -> &MigrationOptions {
        &self.options
    }

    pub fn phase(&self) -> MigrationPhase {
        *self.phase.lock()
    }

    fn set_phase(&self, to: MigrationPhase) {
        let mut phase = self.phase.lock();
        if !phase.can_transition_to(to) {
            log::warn!("unexpected phase change {} -> {to}", *phase);
        }
        log::debug!("phase {} -> {to}", *phase);
        *phase = to;
    }

    fn fail(&self, err: eyre::Report) -> eyre::Report {
        let during = self.phase();
        self.set_phase(MigrationPhase::Failed);
        err.wrap_err(format!("migration failed during {during}"))
    }

    /// Execute a full run.
    ///
    /// Cancelling `cancel` stops dispatching new files; files already in
    /// flight finish and are checkpointed before this returns.
    pub async fn run(
        &self,
        cancel: CancellationToken,
        progress: Option<MigrationProgress>,
    ) -> Result<MigrationReport> {
        let clock = Instant::now();
        let mut report = MigrationReport::new(Utc::now(), self.options.dry_run);
        if self.options.dry_run {
            log::info!("[dry-run] no changes will be made to the destination");
        }

        let setup = self.initialize().await.map_err(|err| self.fail(err))?;

        self.set_phase(MigrationPhase::Scanning);
        let plan = match self.scan(&setup.filter, &cancel).await {
            Ok(plan) => plan,
            Err(err) if err.kind == ErrorKind::Cancelled => {
                log::warn!("interrupted while scanning");
                self.set_phase(MigrationPhase::Failed);
                report.interrupted = true;
                report.failure = Some("interrupted during scanning".into());
                return Ok(self.finish(report, clock));
            }
            Err(err) => return Err(self.fail(eyre!(err).wrap_err("source tree could not be listed"))),
        };
        report.files_scanned = plan.files;
        report.folders_scanned = plan.folders;
        report.bytes_scanned = plan.bytes;
        report.errors.extend(plan.errors.iter().cloned());
        notify(progress.as_ref(), |p| p.report_scan(plan.files, plan.folders, plan.bytes));

        if !self.options.continue_on_error && !plan.errors.is_empty() {
            self.set_phase(MigrationPhase::Failed);
            report.files_pending = plan.files;
            report.failure = Some(format!(
                "stopped after first error: {} could not be listed",
                plan.errors[0].source_path
            ));
            return Ok(self.finish(report, clock));
        }

        self.set_phase(MigrationPhase::Migrating);
        let totals = self
            .migrate(&setup, &plan, &cancel, progress)
            .await
            .map_err(|err| self.fail(err))?;
        let tally = totals.tally;

        report.interrupted = cancel.is_cancelled();
        report.files_migrated = tally.migrated;
        report.files_skipped = totals.skipped;
        report.bytes_skipped = totals.bytes_skipped;
        report.files_failed = tally.failed;
        report.files_pending = tally.pending;
        report.bytes_transferred = tally.bytes_transferred;
        report.permissions_applied = tally.permissions_applied;
        report.permission_failures = tally.permission_failures;
        report.folders_created = setup.folders.resolved_count();
        report.errors.extend(tally.errors);

        self.set_phase(MigrationPhase::Verifying);
        let verification = Verification {
            files_expected: plan.files,
            files_accounted: tally.migrated + totals.skipped,
            bytes_expected: plan.bytes,
            bytes_accounted: tally.bytes_transferred + totals.bytes_skipped,
        };
        if verification.is_consistent() {
            log::info!("verified {} files ({} bytes)", plan.files, plan.bytes);
        } else {
            log::warn!(
                "verification: {}/{} files and {}/{} bytes accounted for",
                verification.files_accounted,
                verification.files_expected,
                verification.bytes_accounted,
                verification.bytes_expected
            );
        }
        report.verification = Some(verification);

        match tally.stop_reason {
            Some(reason) => {
                self.set_phase(MigrationPhase::Failed);
                report.failure = Some(reason);
            }
            None => self.set_phase(MigrationPhase::Done),
        }

        if !self.options.dry_run {
            let summary = CheckpointSummary {
                files_processed: report.files_migrated,
                bytes_transferred: report.bytes_transferred,
                failures: report.files_failed,
                recorded_at: Utc::now(),
            };
            if let Err(err) = self.checkpoint.record_summary(&summary) {
                log::error!("failed to append run summary to checkpoint: {err:#}");
            }
        }

        Ok(self.finish(report, clock))
    }

    /// Scan the source without touching the destination.
    pub async fn plan(&self) -> Result<ScanPlan> {
        let filter = ExcludeFilter::new(&self.options.exclude_patterns)?;
        self.scan(&filter, &CancellationToken::new())
            .await
            .wrap_err("source tree could not be listed")
    }

    fn finish(&self, mut report: MigrationReport, clock: Instant) -> MigrationReport {
        report.phase = self.phase();
        report.finished_at = Utc::now();
        report.elapsed_secs = clock.elapsed().as_secs_f64();
        log::info!("{}", report.summary_line());
        if let Some(sink) = &self.report_sink {
            if let Err(err) = sink.deliver(&report) {
                log::error!("failed to deliver migration report: {err:#}");
            }
        }
        report
    }

    async fn initialize(&self) -> Result<Setup> {
        let opts = &self.options;
        opts.validate()?;
        let filter = ExcludeFilter::new(&opts.exclude_patterns)?;

        let account = with_retry(&opts.retry, "verify source access", || self.source.verify_access())
            .await
            .wrap_err("source provider is not accessible")?;
        log::info!("source: {}", account.display_name);
        let account = with_retry(&opts.retry, "verify destination access", || self.dest.verify_access())
            .await
            .wrap_err("destination provider is not accessible")?;
        log::info!("destination: {}", account.display_name);

        let base = if opts.use_shared_drive {
            let name = opts.shared_drive_name.as_deref().unwrap_or_default();
            let found = with_retry(&opts.retry, &format!("find shared drive {name}"), || {
                self.dest.find_named_container(name)
            })
            .await
            .wrap_err_with(|| format!("failed to look up shared drive {name:?}"))?;
            match found {
                Some(handle) => {
                    log::info!("using shared drive {name:?} ({handle})");
                    Some(handle)
                }
                None => bail!("shared drive {name:?} not found"),
            }
        } else {
            None
        };

        let completed = if opts.resume {
            let done = self
                .checkpoint
                .load_all()
                .wrap_err("failed to load checkpoint")?;
            log::info!("resuming: {} files already migrated", done.len());
            done
        } else {
            HashSet::new()
        };

        let dest_root = DestPath::parse(&opts.dest_root)?;
        let folders = Arc::new(FolderCache::new(
            Arc::clone(&self.dest),
            opts.retry,
            base,
            opts.dry_run,
        ));
        folders
            .resolve(&dest_root)
            .await
            .wrap_err_with(|| format!("destination root {dest_root} is unreachable"))?;

        Ok(Setup {
            filter,
            folders,
            completed,
        })
    }

    async fn scan(&self, filter: &ExcludeFilter, cancel: &CancellationToken) -> ProviderResult<ScanPlan> {
        let (root, file_limit) = self.scan_root().await?;
        let mapper = PathMapper::new(&self.options.source_root, &self.options.dest_root, filter.clone())?;
        Scanner {
            source: self.source.as_ref(),
            mapper: &mapper,
            root: &root,
            retry: &self.options.retry,
            file_limit,
        }
        .scan(cancel)
        .await
    }

    /// Folder to walk and the file cap, honouring test mode.
    async fn scan_root(&self) -> ProviderResult<(String, Option<usize>)> {
        let Some(test) = &self.options.test_mode else {
            return Ok((self.options.source_root.clone(), None));
        };
        let probe = with_retry(&self.options.retry, &format!("list {}", test.folder), || {
            self.source.list_folder(&test.folder)
        })
        .await;
        match probe {
            Ok(_) => {
                log::info!("test mode: migrating {}", test.folder);
                Ok((test.folder.clone(), None))
            }
            Err(err) if err.kind == ErrorKind::NotFound => {
                log::info!(
                    "test mode: {} not found, migrating the first {} files of {}",
                    test.folder,
                    test.limit,
                    self.options.source_root
                );
                Ok((self.options.source_root.clone(), Some(test.limit)))
            }
            Err(err) => Err(err.with_path(test.folder.clone())),
        }
    }

    async fn migrate(
        &self,
        setup: &Setup,
        plan: &ScanPlan,
        cancel: &CancellationToken,
        progress: Option<MigrationProgress>,
    ) -> Result<MigrationTotals> {
        let opts = &self.options;
        let halt = cancel.child_token();
        let (sink, writer) = if opts.dry_run {
            (None, None)
        } else {
            let (sink, handle) = spawn_checkpoint_writer(Arc::clone(&self.checkpoint), halt.clone());
            (Some(sink), Some(handle))
        };

        let ctx = Arc::new(WorkerContext {
            source: Arc::clone(&self.source),
            executor: TransferExecutor::new(
                Arc::clone(&self.source),
                Arc::clone(&self.dest),
                opts.chunk_size,
                opts.small_file_threshold,
                opts.retry,
                opts.dry_run,
            ),
            translator: MetadataTranslator::new(
                Arc::clone(&self.dest),
                opts.retry,
                opts.preserve_timestamps,
                opts.migrate_permissions,
            ),
            folders: Arc::clone(&setup.folders),
            retry: opts.retry,
            checkpoint: sink,
            progress: progress.clone(),
            halt: halt.clone(),
            continue_on_error: opts.continue_on_error,
            dry_run: opts.dry_run,
            tally: Default::default(),
        });

        let workers = opts.parallel_uploads.max(1);
        let (tx, rx) = mpsc::channel::<PlannedEntry>(workers * 2);
        let handles = spawn_workers(workers, &ctx, rx);

        let mut skipped = 0u64;
        let mut bytes_skipped = 0u64;
        let mut undispatched = 0u64;
        for item in &plan.entries {
            let is_file = item.entry.is_file();
            if halt.is_cancelled() {
                undispatched += u64::from(is_file);
                continue;
            }
            if is_file && setup.completed.contains(&item.entry.path) {
                log::info!("{}: already migrated, skipping", item.entry.path);
                skipped += 1;
                bytes_skipped += item.entry.size;
                notify(progress.as_ref(), |p| p.report_file_skipped(&item.entry.path, item.entry.size));
                continue;
            }
            tokio::select! {
                biased;
                _ = halt.cancelled() => undispatched += u64::from(is_file),
                sent = tx.send(item.clone()) => {
                    if sent.is_err() {
                        bail!("worker pool shut down unexpectedly");
                    }
                }
            }
        }
        drop(tx);

        for handle in handles {
            if let Err(err) = handle.await {
                log::error!("migration worker panicked: {err}");
            }
        }
        let mut tally = std::mem::take(&mut *ctx.tally.lock());
        tally.pending += undispatched;
        drop(ctx);

        if cancel.is_cancelled() {
            log::warn!("interrupted: {} files left for a resumed run", tally.pending);
        }

        if let Some(writer) = writer {
            let written = writer
                .await
                .map_err(|err| eyre!("checkpoint writer task failed: {err}"))?
                .wrap_err("checkpoint store is unwritable")?;
            log::debug!("checkpoint: {written} records appended");
        }

        Ok(MigrationTotals {
            tally,
            skipped,
            bytes_skipped,
        })
    }
}
