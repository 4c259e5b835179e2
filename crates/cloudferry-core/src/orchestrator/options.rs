use eyre::{bail, Result};

use crate::retry::RetryPolicy;
use crate::transfer::DEFAULT_CHUNK_SIZE;

/// Bounded scan used to try a migration on a small subset.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TestMode {
    /// Scanned instead of the source root when it exists.
    pub folder: String,
    /// File cap applied when falling back to the source root.
    pub limit: usize,
}

impl Default for TestMode {
    fn default() -> Self {
        Self {
            folder: "/test".into(),
            limit: 10,
        }
    }
}

/// Everything a run needs to know besides its providers.
#[derive(Debug, Clone)]
pub struct MigrationOptions {
    pub source_root: String,
    /// Empty means the destination root itself.
    pub dest_root: String,
    pub exclude_patterns: Vec<String>,
    pub use_shared_drive: bool,
    pub shared_drive_name: Option<String>,
    pub chunk_size: u64,
    /// Files at or below this size are uploaded in one request.
    pub small_file_threshold: u64,
    pub parallel_uploads: usize,
    pub retry: RetryPolicy,
    pub continue_on_error: bool,
    pub preserve_timestamps: bool,
    pub migrate_permissions: bool,
    pub dry_run: bool,
    pub resume: bool,
    pub test_mode: Option<TestMode>,
}

impl Default for MigrationOptions {
    fn default() -> Self {
        Self {
            source_root: "/".into(),
            dest_root: "/Dropbox Migration".into(),
            exclude_patterns: Vec::new(),
            use_shared_drive: false,
            shared_drive_name: None,
            chunk_size: DEFAULT_CHUNK_SIZE,
            small_file_threshold: DEFAULT_CHUNK_SIZE,
            parallel_uploads: 3,
            retry: RetryPolicy::default(),
            continue_on_error: true,
            preserve_timestamps: true,
            migrate_permissions: true,
            dry_run: false,
            resume: false,
            test_mode: None,
        }
    }
}

impl MigrationOptions {
    pub fn validate(&self) -> Result<()> {
        if self.chunk_size == 0 {
            bail!("chunk size must be greater than zero");
        }
        if self.parallel_uploads == 0 {
            bail!("parallel_uploads must be at least 1");
        }
        if self.use_shared_drive
            && self
                .shared_drive_name
                .as_deref()
                .is_none_or(|name| name.trim().is_empty())
        {
            bail!("use_shared_drive is set but shared_drive_name is missing");
        }
        if let Some(test) = &self.test_mode {
            if test.limit == 0 {
                bail!("test mode limit must be at least 1");
            }
        }
        Ok(())
    }
}
