//! Capability interfaces the engine consumes.
//!
//! Provider clients are constructed by the caller and handed to the
//! orchestrator as `Arc<dyn ...>`; the engine never reaches for a global
//! client. Implementations translate their native failures into
//! [`ProviderError`](crate::errors::ProviderError) at this boundary.

use std::collections::HashSet;
use std::ops::Range;

use async_trait::async_trait;
use eyre::Result;

use crate::checkpoint::{CheckpointRecord, CheckpointSummary};
use crate::entry::{
    AccountInfo, ChunkAck, DestPermission, FolderHandle, SharingDescriptor, SourceEntry,
    UploadMetadata,
};
use crate::errors::ProviderResult;

#[async_trait]
pub trait SourceProvider: Send + Sync {
    /// Confirms the client is authenticated.
    async fn verify_access(&self) -> ProviderResult<AccountInfo>;

    /// Lists the direct children of the folder at `path`.
    async fn list_folder(&self, path: &str) -> ProviderResult<Vec<SourceEntry>>;

    /// Reads content, optionally restricted to a byte range.
    async fn get_content(&self, content_id: &str, range: Option<Range<u64>>) -> ProviderResult<Vec<u8>>;

    /// Fetches sharing info for an entry whose listing did not carry it.
    async fn get_sharing(&self, content_id: &str) -> ProviderResult<SharingDescriptor>;
}

#[async_trait]
pub trait DestinationProvider: Send + Sync {
    /// Confirms the client is authenticated.
    async fn verify_access(&self) -> ProviderResult<AccountInfo>;

    /// Returns the existing folder named `name` under `parent`, creating it
    /// when absent. `None` means the provider's root.
    async fn resolve_or_create_folder(
        &self,
        name: &str,
        parent: Option<&FolderHandle>,
    ) -> ProviderResult<FolderHandle>;

    /// Looks up a team-level container such as a shared drive.
    async fn find_named_container(&self, name: &str) -> ProviderResult<Option<FolderHandle>>;

    /// Creates a file in a single request and returns its identifier.
    async fn create_small(
        &self,
        data: Vec<u8>,
        metadata: &UploadMetadata,
        parent: Option<&FolderHandle>,
    ) -> ProviderResult<String>;

    /// Starts a resumable upload and returns the session token.
    async fn open_upload_session(
        &self,
        total_size: u64,
        metadata: &UploadMetadata,
        parent: Option<&FolderHandle>,
    ) -> ProviderResult<String>;

    /// Uploads bytes at `offset` within the session.
    async fn upload_chunk(&self, session: &str, offset: u64, data: Vec<u8>) -> ProviderResult<ChunkAck>;

    async fn apply_permissions(&self, file_id: &str, permissions: &[DestPermission]) -> ProviderResult<()>;
}

/// Durable record of already-migrated source paths.
///
/// Records are append-only; recording a path twice has no further effect.
pub trait CheckpointStore: Send + Sync {
    fn has(&self, source_path: &str) -> bool;

    fn record(&self, record: &CheckpointRecord) -> Result<()>;

    fn load_all(&self) -> Result<HashSet<String>>;

    /// Appends the counters of a finished run.
    fn record_summary(&self, _summary: &CheckpointSummary) -> Result<()> {
        Ok(())
    }

    /// Persists any buffered records.
    fn flush(&self) -> Result<()> {
        Ok(())
    }
}
