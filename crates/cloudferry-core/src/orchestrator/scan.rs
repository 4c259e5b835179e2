use tokio_util::sync::CancellationToken;

use crate::entry::SourceEntry;
use crate::errors::{ErrorKind, ProviderError, ProviderResult};
use crate::path_map::{DestPath, MappedPath, PathMapper};
use crate::provider::SourceProvider;
use crate::report::ErrorRecord;
use crate::retry::{with_retry, RetryPolicy};

/// One source entry together with where it lands.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlannedEntry {
    pub entry: SourceEntry,
    pub dest: DestPath,
}

/// Flat, ordered result of walking the source tree.
///
/// Every folder precedes the entries it contains. Excluded entries (and the
/// contents of excluded folders) are absent.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScanPlan {
    pub entries: Vec<PlannedEntry>,
    pub files: u64,
    pub folders: u64,
    pub bytes: u64,
    pub excluded: u64,
    /// Folders whose listing failed; their subtrees are missing.
    pub errors: Vec<ErrorRecord>,
    /// Set when a file cap cut the walk short.
    pub truncated: bool,
}

impl ScanPlan {
    fn push(&mut self, entry: SourceEntry, dest: DestPath) {
        if entry.is_file() {
            self.files += 1;
            self.bytes += entry.size;
        } else {
            self.folders += 1;
        }
        self.entries.push(PlannedEntry { entry, dest });
    }

    /// Destination paths in plan order.
    pub fn dest_paths(&self) -> Vec<&str> {
        self.entries.iter().map(|p| p.dest.as_str()).collect()
    }
}

pub(crate) struct Scanner<'a> {
    pub source: &'a dyn SourceProvider,
    pub mapper: &'a PathMapper,
    /// Folder the walk starts from. Entries are still mapped relative to the
    /// mapper's source root, so a partial walk lands where a full one would.
    pub root: &'a str,
    pub retry: &'a RetryPolicy,
    /// Stop once this many files are planned.
    pub file_limit: Option<usize>,
}

impl Scanner<'_> {
    /// Walk the tree depth-first in listing order.
    ///
    /// A failure to list the root is returned as an error; failures below the
    /// root are recorded in the plan and the walk continues.
    pub async fn scan(&self, cancel: &CancellationToken) -> ProviderResult<ScanPlan> {
        let mut plan = ScanPlan::default();
        let mut stack: Vec<Vec<SourceEntry>> = vec![self.list(self.root).await?];

        while let Some(level) = stack.last_mut() {
            if cancel.is_cancelled() {
                return Err(ProviderError::new(ErrorKind::Cancelled, "scan interrupted"));
            }
            // levels are stored reversed so the next entry in listing order is last
            let Some(entry) = level.pop() else {
                stack.pop();
                continue;
            };

            let dest = match self.mapper.map(&entry.path)? {
                MappedPath::Excluded => {
                    log::debug!("excluded {}", entry.path);
                    plan.excluded += 1;
                    continue;
                }
                MappedPath::Mapped(dest) => dest,
            };

            if entry.is_file() {
                log::debug!(
                    "{}: {} bytes, modified {}, content id {}",
                    entry.path,
                    entry.size,
                    entry
                        .modified
                        .map(|m| m.to_rfc3339())
                        .unwrap_or_else(|| "unknown".into()),
                    entry.content_id
                );
                if let Some(sharing) = entry.sharing.as_ref().filter(|s| s.is_shared()) {
                    for grant in &sharing.grants {
                        log::debug!("{}: shared with {} ({})", entry.path, grant.principal, grant.access_level);
                    }
                }
                plan.push(entry, dest);
                if self
                    .file_limit
                    .is_some_and(|limit| plan.files >= limit as u64)
                {
                    plan.truncated = true;
                    break;
                }
                continue;
            }

            let path = entry.path.clone();
            plan.push(entry, dest);
            match self.list(&path).await {
                Ok(children) => stack.push(children),
                Err(err) => {
                    log::error!("failed to list {path}: {err}");
                    plan.errors.push(ErrorRecord::from_error(&path, &err));
                }
            }
        }

        log::info!(
            "scan found {} files in {} folders ({} bytes, {} excluded)",
            plan.files,
            plan.folders,
            plan.bytes,
            plan.excluded
        );
        Ok(plan)
    }

    async fn list(&self, path: &str) -> ProviderResult<Vec<SourceEntry>> {
        let mut entries = with_retry(self.retry, &format!("list {path}"), || self.source.list_folder(path))
            .await
            .map_err(|err| err.with_path(path))?;
        entries.sort_by(|a, b| a.path.cmp(&b.path));
        entries.reverse();
        Ok(entries)
    }
}
