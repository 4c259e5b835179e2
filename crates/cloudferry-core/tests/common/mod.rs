#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use cloudferry_core::providers::{MemoryDestination, MemorySource};
use cloudferry_core::{
    CheckpointStore, DestinationProvider, MemoryCheckpointStore, MigrationOptions,
    MigrationOrchestrator, MigrationReport, RetryPolicy, SourceProvider,
};
use tokio_util::sync::CancellationToken;

pub const DEST_ROOT: &str = "/Migration";

/// Providers and checkpoint wired into one orchestrator per run.
pub struct Harness {
    pub source: Arc<MemorySource>,
    pub dest: Arc<MemoryDestination>,
    pub checkpoint: Arc<MemoryCheckpointStore>,
}

impl Harness {
    pub fn new(source: MemorySource, dest: MemoryDestination) -> Self {
        Self::with_checkpoint(source, dest, MemoryCheckpointStore::new())
    }

    pub fn with_checkpoint(source: MemorySource, dest: MemoryDestination, checkpoint: MemoryCheckpointStore) -> Self {
        Self {
            source: Arc::new(source),
            dest: Arc::new(dest),
            checkpoint: Arc::new(checkpoint),
        }
    }

    pub fn orchestrator(&self, options: MigrationOptions) -> MigrationOrchestrator {
        MigrationOrchestrator::new(
            Arc::clone(&self.source) as Arc<dyn SourceProvider>,
            Arc::clone(&self.dest) as Arc<dyn DestinationProvider>,
            Arc::clone(&self.checkpoint) as Arc<dyn CheckpointStore>,
            options,
        )
    }

    pub async fn run(&self, options: MigrationOptions) -> MigrationReport {
        self.orchestrator(options)
            .run(CancellationToken::new(), None)
            .await
            .expect("migration run")
    }

    pub fn checkpointed_paths(&self) -> Vec<String> {
        let mut paths: Vec<String> = self
            .checkpoint
            .records()
            .into_iter()
            .map(|r| r.source_path)
            .collect();
        paths.sort();
        paths
    }
}

/// Options with no retry delay so failure tests stay fast.
pub fn options() -> MigrationOptions {
    MigrationOptions {
        source_root: "/".into(),
        dest_root: DEST_ROOT.into(),
        retry: RetryPolicy::new(2, Duration::ZERO),
        ..MigrationOptions::default()
    }
}

pub fn bytes(len: usize, seed: u8) -> Vec<u8> {
    (0..len).map(|i| seed.wrapping_add(i as u8)).collect()
}

/// A small tree with nesting, a shared file and some junk to exclude.
pub fn sample_tree() -> MemorySource {
    MemorySource::new()
        .with_file("/Projects/plan.docx", bytes(12, 1))
        .with_file("/Projects/2024/budget.xlsx", bytes(20, 2))
        .with_file("/Projects/2024/.DS_Store", bytes(1, 0))
        .with_file("/Photos/beach.jpg", bytes(33, 3))
        .with_file("/Photos/scratch.tmp", bytes(4, 0))
        .with_file("/node_modules/left-pad/index.js", bytes(8, 0))
        .with_file("/notes.txt", bytes(5, 4))
}
