//! Memoized destination folder resolution.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use futures::future::{BoxFuture, FutureExt};
use parking_lot::Mutex;
use tokio::sync::OnceCell;

use crate::entry::FolderHandle;
use crate::errors::ProviderResult;
use crate::path_map::DestPath;
use crate::provider::DestinationProvider;
use crate::retry::{with_retry, RetryPolicy};

/// Prefix of handles handed out instead of real folders in dry-run mode.
pub const DRY_RUN_FOLDER_PREFIX: &str = "dry-run-folder-";

/// Maps destination paths to folder handles, issuing at most one
/// `resolve_or_create_folder` call per path.
///
/// Concurrent callers for the same unresolved path wait on the same cell. A
/// failed resolution leaves the cell empty so a later caller can try again.
pub struct FolderCache {
    dest: Arc<dyn DestinationProvider>,
    retry: RetryPolicy,
    /// Handle standing for `/`; `None` is the provider's own root.
    base: Option<FolderHandle>,
    cells: Mutex<HashMap<DestPath, Arc<OnceCell<FolderHandle>>>>,
    resolved: AtomicU64,
    dry_run: bool,
}

impl FolderCache {
    pub fn new(
        dest: Arc<dyn DestinationProvider>,
        retry: RetryPolicy,
        base: Option<FolderHandle>,
        dry_run: bool,
    ) -> Self {
        Self {
            dest,
            retry,
            base,
            cells: Mutex::new(HashMap::new()),
            resolved: AtomicU64::new(0),
            dry_run,
        }
    }

    /// Number of folders resolved or created through the provider.
    pub fn resolved_count(&self) -> u64 {
        self.resolved.load(Ordering::Relaxed)
    }

    pub fn cached(&self, path: &DestPath) -> Option<FolderHandle> {
        self.cells.lock().get(path).and_then(|cell| cell.get().cloned())
    }

    /// Handle of the folder at `path`, resolving missing ancestors first.
    pub fn resolve<'a>(&'a self, path: &'a DestPath) -> BoxFuture<'a, ProviderResult<Option<FolderHandle>>> {
        async move {
            if path.is_root() {
                return Ok(self.base.clone());
            }
            let cell = {
                let mut cells = self.cells.lock();
                Arc::clone(cells.entry(path.clone()).or_default())
            };
            let handle = cell.get_or_try_init(|| self.create(path)).await?;
            Ok(Some(handle.clone()))
        }
        .boxed()
    }

    async fn create(&self, path: &DestPath) -> ProviderResult<FolderHandle> {
        let parent_path = path.parent().unwrap_or_else(DestPath::root);
        let parent = self.resolve(&parent_path).await?;
        let name = path.name();

        if self.dry_run {
            log::info!("[dry-run] would create folder {path}");
            return Ok(FolderHandle::new(format!("{DRY_RUN_FOLDER_PREFIX}{path}")));
        }

        let handle = with_retry(&self.retry, &format!("create folder {path}"), || {
            self.dest.resolve_or_create_folder(name, parent.as_ref())
        })
        .await
        .map_err(|err| err.with_path(path.to_string()))?;
        self.resolved.fetch_add(1, Ordering::Relaxed);
        log::debug!("folder {path} -> {handle}");
        Ok(handle)
    }
}
