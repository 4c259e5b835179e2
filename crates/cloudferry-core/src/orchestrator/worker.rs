use std::sync::Arc;

use chrono::Utc;
use parking_lot::Mutex as SyncMutex;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::checkpoint::{CheckpointRecord, CheckpointSink};
use crate::entry::SharingDescriptor;
use crate::errors::{ProviderError, ProviderResult};
use crate::folders::FolderCache;
use crate::metadata::MetadataTranslator;
use crate::path_map::DestPath;
use crate::progress::{report, MigrationProgress};
use crate::provider::SourceProvider;
use crate::report::ErrorRecord;
use crate::retry::{with_retry, RetryPolicy};
use crate::transfer::TransferExecutor;

use super::scan::PlannedEntry;

/// Counters shared by the workers of one run.
#[derive(Debug, Default)]
pub(super) struct Tally {
    pub migrated: u64,
    pub failed: u64,
    pub pending: u64,
    pub bytes_transferred: u64,
    pub permissions_applied: u64,
    pub permission_failures: u64,
    pub errors: Vec<ErrorRecord>,
    /// First per-item failure when the run stops on error.
    pub stop_reason: Option<String>,
}

pub(super) struct WorkerContext {
    pub source: Arc<dyn SourceProvider>,
    pub executor: TransferExecutor,
    pub translator: MetadataTranslator,
    pub folders: Arc<FolderCache>,
    pub retry: RetryPolicy,
    pub checkpoint: Option<CheckpointSink>,
    pub progress: Option<MigrationProgress>,
    pub halt: CancellationToken,
    pub continue_on_error: bool,
    pub dry_run: bool,
    pub tally: SyncMutex<Tally>,
}

struct FileDone {
    file_id: String,
    bytes: u64,
    permissions_applied: u64,
    permission_failures: u64,
}

pub(super) fn spawn_workers(
    count: usize,
    ctx: &Arc<WorkerContext>,
    rx: mpsc::Receiver<PlannedEntry>,
) -> Vec<JoinHandle<()>> {
    let rx_shared = Arc::new(Mutex::new(rx));
    (0..count)
        .map(|idx| {
            let ctx = Arc::clone(ctx);
            let rx_shared = Arc::clone(&rx_shared);
            tokio::spawn(async move {
                loop {
                    let next = { rx_shared.lock().await.recv().await };
                    let Some(item) = next else {
                        break;
                    };
                    if ctx.halt.is_cancelled() {
                        if item.entry.is_file() {
                            ctx.tally.lock().pending += 1;
                        }
                        continue;
                    }
                    if item.entry.is_file() {
                        ctx.migrate_file(&item).await;
                    } else {
                        ctx.migrate_folder(&item).await;
                    }
                }
                log::debug!("worker {idx} finished");
            })
        })
        .collect()
}

impl WorkerContext {
    async fn migrate_folder(&self, item: &PlannedEntry) {
        if let Err(err) = self.folders.resolve(&item.dest).await {
            self.record_failure(item, err);
        }
    }

    async fn migrate_file(&self, item: &PlannedEntry) {
        let path = &item.entry.path;
        report(self.progress.as_ref(), |p| p.report_file_started(path, item.entry.size));

        match self.transfer(item).await {
            Ok(done) => {
                if self.dry_run {
                    log::info!("[dry-run] {path} -> {}", item.dest);
                } else {
                    log::info!("{path} -> {} ({} bytes)", item.dest, done.bytes);
                }
                if let Some(sink) = &self.checkpoint {
                    sink.submit(CheckpointRecord {
                        source_path: path.clone(),
                        dest_path: item.dest.to_string(),
                        dest_id: done.file_id,
                        bytes: done.bytes,
                        completed_at: Utc::now(),
                    });
                }
                {
                    let mut tally = self.tally.lock();
                    tally.migrated += 1;
                    tally.bytes_transferred += done.bytes;
                    tally.permissions_applied += done.permissions_applied;
                    tally.permission_failures += done.permission_failures;
                }
                report(self.progress.as_ref(), |p| p.report_file_complete(path, done.bytes));
            }
            Err(err) => self.record_failure(item, err),
        }
    }

    async fn transfer(&self, item: &PlannedEntry) -> ProviderResult<FileDone> {
        let entry = &item.entry;
        let parent_path = item.dest.parent().unwrap_or_else(DestPath::root);
        let parent = self.folders.resolve(&parent_path).await?;

        let (sharing, mut permission_failures) = self.fetch_sharing(item).await;
        let metadata = self.translator.upload_metadata(entry, item.dest.name());
        let outcome = self
            .executor
            .transfer_file(entry, parent.as_ref(), &metadata, self.progress.as_ref())
            .await?;

        let grants = self.translator.permissions_for(sharing.as_ref());
        let mut permissions_applied = 0;
        if !grants.is_empty() {
            if self.dry_run {
                for grant in &grants {
                    log::info!("[dry-run] would share {} with {} as {}", entry.path, grant.principal, grant.role);
                }
            } else {
                let outcome = self
                    .translator
                    .apply_permissions(&outcome.file_id, &entry.path, &grants)
                    .await;
                permissions_applied = outcome.applied as u64;
                permission_failures += outcome.failed.len() as u64;
            }
        }

        Ok(FileDone {
            file_id: outcome.file_id,
            bytes: outcome.bytes,
            permissions_applied,
            permission_failures,
        })
    }

    /// Sharing of `item`, fetched from the source when the listing lacked it.
    ///
    /// A failed fetch never fails the file; it counts as a permission failure.
    async fn fetch_sharing(&self, item: &PlannedEntry) -> (Option<SharingDescriptor>, u64) {
        if !self.translator.migrate_permissions() {
            return (None, 0);
        }
        if let Some(sharing) = &item.entry.sharing {
            return (Some(sharing.clone()), 0);
        }
        let label = format!("sharing of {}", item.entry.path);
        match with_retry(&self.retry, &label, || self.source.get_sharing(&item.entry.content_id)).await {
            Ok(sharing) => {
                if sharing.is_shared() {
                    for grant in &sharing.grants {
                        log::debug!(
                            "{}: shared with {} ({})",
                            item.entry.path,
                            grant.principal,
                            grant.access_level
                        );
                    }
                }
                (Some(sharing), 0)
            }
            Err(err) => {
                log::warn!("{}: could not read sharing, permissions skipped: {err}", item.entry.path);
                (None, 1)
            }
        }
    }

    fn record_failure(&self, item: &PlannedEntry, err: ProviderError) {
        let path = &item.entry.path;
        log::error!("failed to migrate {path}: {err}");
        let record = ErrorRecord::from_error(path, &err);
        {
            let mut tally = self.tally.lock();
            if item.entry.is_file() {
                tally.failed += 1;
            }
            tally.errors.push(record);
            if !self.continue_on_error && tally.stop_reason.is_none() {
                tally.stop_reason = Some(format!("stopped after first error: {path}: {}", err.message));
            }
        }
        if !self.continue_on_error {
            self.halt.cancel();
        }
        report(self.progress.as_ref(), |p| p.report_file_failed(path, err.to_string()));
    }
}
