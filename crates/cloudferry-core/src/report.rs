//! Final run report and its JSON writer.

use std::fs;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use eyre::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::errors::{ErrorKind, ProviderError};
use crate::orchestrator::MigrationPhase;

/// A file that could not be migrated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorRecord {
    pub source_path: String,
    pub kind: ErrorKind,
    pub message: String,
    /// Retries spent after the initial attempt.
    pub retry_count: u32,
}

impl ErrorRecord {
    pub fn from_error(source_path: &str, err: &ProviderError) -> Self {
        Self {
            source_path: source_path.to_owned(),
            kind: err.kind,
            message: err.message.clone(),
            retry_count: err.attempts.saturating_sub(1),
        }
    }
}

/// Processed totals compared against what the scan found.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Verification {
    pub files_expected: u64,
    pub files_accounted: u64,
    pub bytes_expected: u64,
    pub bytes_accounted: u64,
}

impl Verification {
    pub fn is_consistent(&self) -> bool {
        self.files_expected == self.files_accounted && self.bytes_expected == self.bytes_accounted
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MigrationReport {
    pub phase: MigrationPhase,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub elapsed_secs: f64,
    pub dry_run: bool,
    pub interrupted: bool,
    pub files_scanned: u64,
    pub folders_scanned: u64,
    pub bytes_scanned: u64,
    pub files_migrated: u64,
    /// Files already present in the checkpoint.
    pub files_skipped: u64,
    pub files_failed: u64,
    /// Files never attempted because the run stopped early.
    pub files_pending: u64,
    pub folders_created: u64,
    pub bytes_transferred: u64,
    pub bytes_skipped: u64,
    pub permissions_applied: u64,
    pub permission_failures: u64,
    pub verification: Option<Verification>,
    pub errors: Vec<ErrorRecord>,
    /// Reason for a run that ended in `Failed`.
    pub failure: Option<String>,
}

impl MigrationReport {
    pub fn new(started_at: DateTime<Utc>, dry_run: bool) -> Self {
        Self {
            phase: MigrationPhase::Initializing,
            started_at,
            finished_at: started_at,
            elapsed_secs: 0.0,
            dry_run,
            interrupted: false,
            files_scanned: 0,
            folders_scanned: 0,
            bytes_scanned: 0,
            files_migrated: 0,
            files_skipped: 0,
            files_failed: 0,
            files_pending: 0,
            folders_created: 0,
            bytes_transferred: 0,
            bytes_skipped: 0,
            permissions_applied: 0,
            permission_failures: 0,
            verification: None,
            errors: Vec::new(),
            failure: None,
        }
    }

    pub fn is_success(&self) -> bool {
        self.phase == MigrationPhase::Done && !self.interrupted
    }

    pub fn summary_line(&self) -> String {
        format!(
            "{}: {} migrated, {} skipped, {} failed, {} bytes in {:.1}s",
            self.phase,
            self.files_migrated,
            self.files_skipped,
            self.files_failed,
            self.bytes_transferred,
            self.elapsed_secs
        )
    }
}

/// Receives the final report of a run.
pub trait ReportSink: Send + Sync {
    fn deliver(&self, report: &MigrationReport) -> Result<()>;
}

/// Writes the report as pretty JSON.
pub struct JsonReportWriter {
    path: PathBuf,
}

impl JsonReportWriter {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl ReportSink for JsonReportWriter {
    fn deliver(&self, report: &MigrationReport) -> Result<()> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)
                .with_context(|| format!("failed to create report directory {}", parent.display()))?;
        }
        let json = serde_json::to_string_pretty(report).context("serialize migration report")?;
        fs::write(&self.path, json)
            .with_context(|| format!("failed to write report {}", self.path.display()))?;
        log::info!("report written to {}", self.path.display());
        Ok(())
    }
}
