pub mod checkpoint;
pub mod config;
pub mod entry;
pub mod errors;
pub mod folders;
pub mod metadata;
pub mod orchestrator;
pub mod path_map;
pub mod progress;
pub mod provider;
pub mod providers;
pub mod report;
pub mod retry;
pub mod transfer;

pub use checkpoint::{CheckpointRecord, JsonlCheckpointStore, MemoryCheckpointStore};
pub use errors::{ErrorKind, ProviderError, ProviderResult};
pub use orchestrator::{MigrationOptions, MigrationOrchestrator, MigrationPhase, ScanPlan, TestMode};
pub use progress::{MigrationProgress, ProgressEvent};
pub use provider::{CheckpointStore, DestinationProvider, SourceProvider};
pub use report::{JsonReportWriter, MigrationReport, ReportSink};
pub use retry::RetryPolicy;
