//! Resume checkpoint: an append-only JSONL log of migrated source paths.
//!
//! Each completed file appends one `file` line; a `summary` line with the run
//! counters is appended when a run finishes. Lines that fail to parse (for
//! example a record torn by a crash) are skipped on load.

use std::collections::HashSet;
use std::fs::{self, File, OpenOptions};
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use eyre::{Context, Result};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::provider::CheckpointStore;

/// One successfully migrated file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckpointRecord {
    pub source_path: String,
    pub dest_path: String,
    pub dest_id: String,
    pub bytes: u64,
    pub completed_at: DateTime<Utc>,
}

/// Counters of a finished run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckpointSummary {
    pub files_processed: u64,
    pub bytes_transferred: u64,
    pub failures: u64,
    pub recorded_at: DateTime<Utc>,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum CheckpointLine {
    File(CheckpointRecord),
    Summary(CheckpointSummary),
}

/// File-backed checkpoint store.
pub struct JsonlCheckpointStore {
    path: PathBuf,
    writer: Mutex<BufWriter<File>>,
    seen: Mutex<HashSet<String>>,
    last_summary: Option<CheckpointSummary>,
}

impl JsonlCheckpointStore {
    /// Open an existing checkpoint (or start one) and load its entries.
    pub fn open(path: &Path) -> Result<Self> {
        Self::open_with(path, false)
    }

    /// Start a new checkpoint, discarding any previous content.
    pub fn create(path: &Path) -> Result<Self> {
        Self::open_with(path, true)
    }

    fn open_with(path: &Path, truncate: bool) -> Result<Self> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).with_context(|| {
                format!("failed to create checkpoint directory {}", parent.display())
            })?;
        }

        let (seen, last_summary) = if truncate || !path.exists() {
            (HashSet::new(), None)
        } else {
            read_lines(path)?
        };

        let mut options = OpenOptions::new();
        options.create(true);
        if truncate {
            options.write(true).truncate(true);
        } else {
            options.append(true);
        }
        let file = options
            .open(path)
            .with_context(|| format!("failed to open checkpoint file {}", path.display()))?;

        Ok(Self {
            path: path.to_path_buf(),
            writer: Mutex::new(BufWriter::new(file)),
            seen: Mutex::new(seen),
            last_summary,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Summary line of the most recent finished run found at open time.
    pub fn last_summary(&self) -> Option<&CheckpointSummary> {
        self.last_summary.as_ref()
    }

    fn append(&self, line: &CheckpointLine) -> Result<()> {
        let encoded = serde_json::to_string(line).context("serialize checkpoint line")?;
        let mut writer = self.writer.lock();
        writeln!(writer, "{encoded}").context("write checkpoint line")?;
        // one durable line per completed file
        writer.flush().context("flush checkpoint file")?;
        Ok(())
    }
}

fn read_lines(path: &Path) -> Result<(HashSet<String>, Option<CheckpointSummary>)> {
    let file = File::open(path)
        .with_context(|| format!("failed to read checkpoint file {}", path.display()))?;
    let mut seen = HashSet::new();
    let mut last_summary = None;
    for (idx, line) in BufReader::new(file).lines().enumerate() {
        let line = line.with_context(|| format!("read checkpoint line {}", idx + 1))?;
        if line.trim().is_empty() {
            continue;
        }
        match serde_json::from_str::<CheckpointLine>(&line) {
            Ok(CheckpointLine::File(record)) => {
                seen.insert(record.source_path);
            }
            Ok(CheckpointLine::Summary(summary)) => last_summary = Some(summary),
            Err(err) => {
                log::warn!(
                    "skipping malformed checkpoint line {} in {}: {err}",
                    idx + 1,
                    path.display()
                );
            }
        }
    }
    Ok((seen, last_summary))
}

impl CheckpointStore for JsonlCheckpointStore {
    fn has(&self, source_path: &str) -> bool {
        self.seen.lock().contains(source_path)
    }

    fn record(&self, record: &CheckpointRecord) -> Result<()> {
        if self.has(&record.source_path) {
            return Ok(());
        }
        self.append(&CheckpointLine::File(record.clone()))?;
        self.seen.lock().insert(record.source_path.clone());
        Ok(())
    }

    fn load_all(&self) -> Result<HashSet<String>> {
        Ok(self.seen.lock().clone())
    }

    fn record_summary(&self, summary: &CheckpointSummary) -> Result<()> {
        self.append(&CheckpointLine::Summary(summary.clone()))
    }

    fn flush(&self) -> Result<()> {
        self.writer.lock().flush().context("flush checkpoint file")
    }
}

/// In-memory checkpoint store.
#[derive(Default)]
pub struct MemoryCheckpointStore {
    records: Mutex<Vec<CheckpointRecord>>,
    seen: Mutex<HashSet<String>>,
    summaries: Mutex<Vec<CheckpointSummary>>,
}

impl MemoryCheckpointStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Pre-populate with paths migrated by an earlier run.
    pub fn with_paths<I, S>(paths: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let store = Self::default();
        store.seen.lock().extend(paths.into_iter().map(Into::into));
        store
    }

    pub fn records(&self) -> Vec<CheckpointRecord> {
        self.records.lock().clone()
    }

    pub fn summaries(&self) -> Vec<CheckpointSummary> {
        self.summaries.lock().clone()
    }
}

impl CheckpointStore for MemoryCheckpointStore {
    fn has(&self, source_path: &str) -> bool {
        self.seen.lock().contains(source_path)
    }

    fn record(&self, record: &CheckpointRecord) -> Result<()> {
        if self.seen.lock().insert(record.source_path.clone()) {
            self.records.lock().push(record.clone());
        }
        Ok(())
    }

    fn load_all(&self) -> Result<HashSet<String>> {
        Ok(self.seen.lock().clone())
    }

    fn record_summary(&self, summary: &CheckpointSummary) -> Result<()> {
        self.summaries.lock().push(summary.clone());
        Ok(())
    }
}

/// Sending half of the single checkpoint writer.
#[derive(Clone)]
pub struct CheckpointSink {
    tx: mpsc::UnboundedSender<CheckpointRecord>,
}

impl CheckpointSink {
    pub fn submit(&self, record: CheckpointRecord) {
        if self.tx.send(record).is_err() {
            log::error!("checkpoint writer stopped; record dropped");
        }
    }
}

/// Spawn the task that serializes every checkpoint append.
///
/// Appends and the final flush run on the blocking pool. The task ends once
/// all sinks are dropped, flushing the store and yielding
/// the number of records written. A failing append cancels `stop` so no more
/// work is dispatched that could not be recorded.
pub fn spawn_checkpoint_writer(
    store: Arc<dyn CheckpointStore>,
    stop: CancellationToken,
) -> (CheckpointSink, JoinHandle<Result<usize>>) {
    let (tx, mut rx) = mpsc::unbounded_channel::<CheckpointRecord>();
    let handle = tokio::spawn(async move {
        let mut written = 0usize;
        let mut failure = None;
        while let Some(record) = rx.recv().await {
            if failure.is_some() {
                continue;
            }
            let source_path = record.source_path.clone();
            let appender = Arc::clone(&store);
            let appended = tokio::task::spawn_blocking(move || appender.record(&record))
                .await
                .wrap_err("checkpoint append task panicked")
                .and_then(|res| res);
            match appended {
                Ok(()) => written += 1,
                Err(err) => {
                    log::error!("checkpoint append failed for {source_path}: {err:#}");
                    stop.cancel();
                    failure = Some(err);
                }
            }
        }
        let flusher = Arc::clone(&store);
        tokio::task::spawn_blocking(move || flusher.flush())
            .await
            .wrap_err("checkpoint flush task panicked")??;
        match failure {
            Some(err) => Err(err.wrap_err("checkpoint store became unwritable")),
            None => Ok(written),
        }
    });
    (CheckpointSink { tx }, handle)
}
