//! Content transfer for a single file.
//!
//! Small files go up in one request. Larger files stream through a
//! [`TransferSession`] in fixed-size chunks; a session that expires is
//! abandoned and the file restarts from byte zero in a fresh session.

pub mod session;

use std::sync::Arc;

pub use session::TransferSession;

use crate::entry::{FolderHandle, SourceEntry, UploadMetadata};
use crate::errors::{ErrorKind, ProviderError, ProviderResult};
use crate::progress::{report, MigrationProgress};
use crate::provider::{DestinationProvider, SourceProvider};
use crate::retry::{with_retry, with_retry_when, RetryPolicy};

/// Default chunk size: 50 MiB.
pub const DEFAULT_CHUNK_SIZE: u64 = 50 * 1024 * 1024;

/// Prefix of identifiers handed out instead of real uploads in dry-run mode.
pub const DRY_RUN_FILE_PREFIX: &str = "dry-run-file-";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferOutcome {
    pub file_id: String,
    pub bytes: u64,
}

pub struct TransferExecutor {
    source: Arc<dyn SourceProvider>,
    dest: Arc<dyn DestinationProvider>,
    chunk_size: u64,
    small_file_threshold: u64,
    retry: RetryPolicy,
    dry_run: bool,
}

impl TransferExecutor {
    pub fn new(
        source: Arc<dyn SourceProvider>,
        dest: Arc<dyn DestinationProvider>,
        chunk_size: u64,
        small_file_threshold: u64,
        retry: RetryPolicy,
        dry_run: bool,
    ) -> Self {
        Self {
            source,
            dest,
            chunk_size: chunk_size.max(1),
            small_file_threshold,
            retry,
            dry_run,
        }
    }

    pub fn chunk_size(&self) -> u64 {
        self.chunk_size
    }

    /// Move one file's content and return the destination identifier.
    ///
    /// Exactly one destination object is created on success. Byte counts that
    /// disagree with `entry.size` fail with [`ErrorKind::Integrity`].
    pub async fn transfer_file(
        &self,
        entry: &SourceEntry,
        parent: Option<&FolderHandle>,
        metadata: &UploadMetadata,
        progress: Option<&MigrationProgress>,
    ) -> ProviderResult<TransferOutcome> {
        if self.dry_run {
            log::info!("[dry-run] would upload {} ({} bytes)", entry.path, entry.size);
            return Ok(TransferOutcome {
                file_id: format!("{DRY_RUN_FILE_PREFIX}{}", entry.path),
                bytes: entry.size,
            });
        }

        let result = if entry.size <= self.small_file_threshold {
            self.transfer_small(entry, parent, metadata).await
        } else {
            self.transfer_chunked(entry, parent, metadata, progress).await
        };
        result.map_err(|err| err.with_path(entry.path.clone()))
    }

    async fn transfer_small(
        &self,
        entry: &SourceEntry,
        parent: Option<&FolderHandle>,
        metadata: &UploadMetadata,
    ) -> ProviderResult<TransferOutcome> {
        let data = with_retry(&self.retry, &format!("read {}", entry.path), || {
            self.source.get_content(&entry.content_id, None)
        })
        .await?;
        check_length(&entry.path, data.len() as u64, entry.size)?;

        let file_id = with_retry(&self.retry, &format!("upload {}", entry.path), || {
            self.dest.create_small(data.clone(), metadata, parent)
        })
        .await?;
        log::debug!("{}: uploaded in a single request", entry.path);
        Ok(TransferOutcome {
            file_id,
            bytes: entry.size,
        })
    }

    async fn transfer_chunked(
        &self,
        entry: &SourceEntry,
        parent: Option<&FolderHandle>,
        metadata: &UploadMetadata,
        progress: Option<&MigrationProgress>,
    ) -> ProviderResult<TransferOutcome> {
        let mut restarts = 0u32;
        loop {
            match self.run_session(entry, parent, metadata, progress).await {
                Err(err) if err.kind == ErrorKind::SessionExpired && restarts < self.retry.max_retries => {
                    restarts += 1;
                    log::warn!(
                        "{}: upload session expired, restarting from the beginning ({restarts}/{})",
                        entry.path,
                        self.retry.max_retries
                    );
                    tokio::time::sleep(self.retry.delay).await;
                }
                Err(err) if err.kind == ErrorKind::SessionExpired => {
                    return Err(err.with_attempts(restarts + 1));
                }
                other => return other,
            }
        }
    }

    async fn run_session(
        &self,
        entry: &SourceEntry,
        parent: Option<&FolderHandle>,
        metadata: &UploadMetadata,
        progress: Option<&MigrationProgress>,
    ) -> ProviderResult<TransferOutcome> {
        let token = with_retry(&self.retry, &format!("open session for {}", entry.path), || {
            self.dest.open_upload_session(entry.size, metadata, parent)
        })
        .await?;
        let mut session = TransferSession::new(token, entry.size, self.chunk_size);
        log::debug!(
            "{}: session opened for {} bytes in {}-byte chunks",
            entry.path,
            entry.size,
            self.chunk_size
        );

        while let Some(range) = session.next_range() {
            let expected = range.end - range.start;
            let data = with_retry(&self.retry, &format!("read {} @{}", entry.path, range.start), || {
                self.source.get_content(&entry.content_id, Some(range.clone()))
            })
            .await?;
            check_length(&entry.path, range.start + data.len() as u64, range.end)?;

            let ack = with_retry_when(
                &self.retry,
                &format!("upload {} @{}", entry.path, range.start),
                |err| err.is_retryable() && err.kind != ErrorKind::SessionExpired,
                || self.dest.upload_chunk(session.token(), range.start, data.clone()),
            )
            .await?;
            session.apply_ack(expected, ack)?;
            report(progress, |p| {
                p.report_chunk(&entry.path, session.bytes_committed(), session.total_size())
            });
        }

        let bytes = session.bytes_committed();
        let file_id = session.finish()?;
        Ok(TransferOutcome { file_id, bytes })
    }
}

fn check_length(path: &str, actual: u64, expected: u64) -> ProviderResult<()> {
    if actual != expected {
        return Err(ProviderError::integrity(format!(
            "read {actual} bytes of {path}, expected {expected}"
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::providers::memory::{DestCall, DestOp, MemoryDestination, MemorySource, SourceOp};
    use std::time::Duration;

    fn metadata(name: &str) -> UploadMetadata {
        UploadMetadata {
            name: name.into(),
            mime_type: "application/octet-stream".into(),
            modified_time: None,
        }
    }

    fn executor(
        source: &Arc<MemorySource>,
        dest: &Arc<MemoryDestination>,
        chunk: u64,
        threshold: u64,
    ) -> TransferExecutor {
        TransferExecutor::new(
            source.clone(),
            dest.clone(),
            chunk,
            threshold,
            RetryPolicy::new(2, Duration::from_millis(5)),
            false,
        )
    }

    fn payload(len: usize) -> Vec<u8> {
        (0..len).map(|i| (i % 251) as u8).collect()
    }

    #[tokio::test(start_paused = true)]
    async fn small_file_uses_single_request() {
        let source = Arc::new(MemorySource::new().with_file("/a.txt", b"hello".to_vec()));
        let dest = Arc::new(MemoryDestination::new());
        let entry = source.entry("/a.txt").unwrap();

        let outcome = executor(&source, &dest, 4, 10)
            .transfer_file(&entry, None, &metadata("a.txt"), None)
            .await
            .unwrap();

        assert_eq!(outcome.bytes, 5);
        assert_eq!(dest.file_content(&outcome.file_id).unwrap(), b"hello");
        assert_eq!(dest.count(DestOp::CreateSmall), 1);
        assert_eq!(dest.count(DestOp::UploadChunk), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn chunks_sum_to_file_size() {
        let data = payload(1000);
        let source = Arc::new(MemorySource::new().with_file("/big.bin", data.clone()));
        let dest = Arc::new(MemoryDestination::new());
        let entry = source.entry("/big.bin").unwrap();

        let outcome = executor(&source, &dest, 300, 100)
            .transfer_file(&entry, None, &metadata("big.bin"), None)
            .await
            .unwrap();

        let chunk_lens: Vec<u64> = dest
            .calls()
            .into_iter()
            .filter_map(|call| match call {
                DestCall::UploadChunk { len, .. } => Some(len),
                _ => None,
            })
            .collect();
        assert_eq!(chunk_lens, vec![300, 300, 300, 100]);
        assert_eq!(chunk_lens.iter().sum::<u64>(), 1000);
        assert_eq!(outcome.bytes, 1000);
        assert_eq!(dest.file_content(&outcome.file_id).unwrap(), data);
    }

    #[tokio::test(start_paused = true)]
    async fn truncated_read_is_an_integrity_error() {
        let source = Arc::new(
            MemorySource::new()
                .with_file("/big.bin", payload(999))
                .with_declared_size("/big.bin", 1000),
        );
        let dest = Arc::new(MemoryDestination::new());
        let entry = source.entry("/big.bin").unwrap();

        let err = executor(&source, &dest, 300, 100)
            .transfer_file(&entry, None, &metadata("big.bin"), None)
            .await
            .unwrap_err();
        assert_eq!(err.kind, ErrorKind::Integrity);
        assert_eq!(err.path.as_deref(), Some("/big.bin"));
        assert!(dest.files().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn truncated_small_read_is_an_integrity_error() {
        let source = Arc::new(
            MemorySource::new()
                .with_file("/a.txt", payload(9))
                .with_declared_size("/a.txt", 10),
        );
        let dest = Arc::new(MemoryDestination::new());
        let entry = source.entry("/a.txt").unwrap();

        let err = executor(&source, &dest, 300, 100)
            .transfer_file(&entry, None, &metadata("a.txt"), None)
            .await
            .unwrap_err();
        assert_eq!(err.kind, ErrorKind::Integrity);
        assert_eq!(dest.count(DestOp::CreateSmall), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn misreported_final_size_is_rejected() {
        let source = Arc::new(MemorySource::new().with_file("/big.bin", payload(500)));
        let dest = Arc::new(MemoryDestination::new().with_final_size_skew(-1));
        let entry = source.entry("/big.bin").unwrap();

        let err = executor(&source, &dest, 200, 100)
            .transfer_file(&entry, None, &metadata("big.bin"), None)
            .await
            .unwrap_err();
        assert_eq!(err.kind, ErrorKind::Integrity);
    }

    #[tokio::test(start_paused = true)]
    async fn transient_chunk_failure_is_retried_in_session() {
        let source = Arc::new(MemorySource::new().with_file("/big.bin", payload(500)));
        let dest = Arc::new(MemoryDestination::new());
        dest.fail_next(DestOp::UploadChunk, ErrorKind::ServerError, 2);
        let entry = source.entry("/big.bin").unwrap();

        executor(&source, &dest, 200, 100)
            .transfer_file(&entry, None, &metadata("big.bin"), None)
            .await
            .unwrap();
        assert_eq!(dest.count(DestOp::OpenSession), 1);
        assert_eq!(dest.count(DestOp::UploadChunk), 5);
    }

    #[tokio::test(start_paused = true)]
    async fn expired_session_restarts_file_in_fresh_session() {
        let data = payload(500);
        let source = Arc::new(MemorySource::new().with_file("/big.bin", data.clone()));
        let dest = Arc::new(MemoryDestination::new());
        dest.fail_next(DestOp::UploadChunk, ErrorKind::SessionExpired, 1);
        let entry = source.entry("/big.bin").unwrap();

        let outcome = executor(&source, &dest, 200, 100)
            .transfer_file(&entry, None, &metadata("big.bin"), None)
            .await
            .unwrap();
        assert_eq!(dest.count(DestOp::OpenSession), 2);
        assert_eq!(dest.files().len(), 1);
        assert_eq!(dest.file_content(&outcome.file_id).unwrap(), data);
    }

    #[tokio::test(start_paused = true)]
    async fn fatal_source_error_is_not_retried() {
        let source = Arc::new(MemorySource::new().with_file("/a.txt", payload(5)));
        source.fail_next(SourceOp::GetContent, ErrorKind::ContentRead, 1);
        let dest = Arc::new(MemoryDestination::new());
        let entry = source.entry("/a.txt").unwrap();

        let err = executor(&source, &dest, 300, 100)
            .transfer_file(&entry, None, &metadata("a.txt"), None)
            .await
            .unwrap_err();
        assert_eq!(err.kind, ErrorKind::ContentRead);
        assert_eq!(err.attempts, 1);
        assert!(dest.calls().is_empty());
    }

    #[tokio::test]
    async fn dry_run_touches_nothing() {
        let source = Arc::new(MemorySource::new().with_file("/a.txt", payload(5)));
        let dest = Arc::new(MemoryDestination::new());
        let entry = source.entry("/a.txt").unwrap();
        let exec = TransferExecutor::new(
            source.clone(),
            dest.clone(),
            10,
            10,
            RetryPolicy::default(),
            true,
        );

        let outcome = exec
            .transfer_file(&entry, None, &metadata("a.txt"), None)
            .await
            .unwrap();
        assert_eq!(outcome.file_id, "dry-run-file-/a.txt");
        assert!(dest.calls().is_empty());
        assert!(source.calls().is_empty());
    }
}
