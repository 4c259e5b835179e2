use std::ops::Range;

use crate::entry::ChunkAck;
use crate::errors::{ProviderError, ProviderResult};

/// State of one resumable upload. Owned by a single file transfer.
#[derive(Debug, Clone)]
pub struct TransferSession {
    token: String,
    total_size: u64,
    bytes_committed: u64,
    chunk_size: u64,
    file_id: Option<String>,
}

impl TransferSession {
    pub fn new(token: String, total_size: u64, chunk_size: u64) -> Self {
        Self {
            token,
            total_size,
            bytes_committed: 0,
            chunk_size: chunk_size.max(1),
            file_id: None,
        }
    }

    pub fn token(&self) -> &str {
        &self.token
    }

    pub fn total_size(&self) -> u64 {
        self.total_size
    }

    pub fn bytes_committed(&self) -> u64 {
        self.bytes_committed
    }

    /// Byte range of the next chunk, or `None` once every byte is committed.
    pub fn next_range(&self) -> Option<Range<u64>> {
        if self.bytes_committed >= self.total_size {
            return None;
        }
        let end = (self.bytes_committed + self.chunk_size).min(self.total_size);
        Some(self.bytes_committed..end)
    }

    /// Apply the destination's answer to a chunk of `len` bytes.
    ///
    /// The destination must acknowledge exactly the bytes sent, and may only
    /// finalize on the last chunk with the full expected size.
    pub fn apply_ack(&mut self, len: u64, ack: ChunkAck) -> ProviderResult<()> {
        let expected = self.bytes_committed + len;
        match ack {
            ChunkAck::Committed(committed) => {
                if committed != expected {
                    return Err(ProviderError::integrity(format!(
                        "destination committed {committed} bytes, expected {expected}"
                    )));
                }
                self.bytes_committed = committed;
            }
            ChunkAck::Complete { file_id, size } => {
                if expected != self.total_size {
                    return Err(ProviderError::integrity(format!(
                        "destination finalized after {expected} of {} bytes",
                        self.total_size
                    )));
                }
                if size != self.total_size {
                    return Err(ProviderError::integrity(format!(
                        "destination reports {size} bytes, expected {}",
                        self.total_size
                    )));
                }
                self.bytes_committed = expected;
                self.file_id = Some(file_id);
            }
        }
        Ok(())
    }

    /// Identifier of the finalized object.
    pub fn finish(self) -> ProviderResult<String> {
        self.file_id.ok_or_else(|| {
            ProviderError::integrity(format!(
                "upload session ended at {} of {} bytes without finalizing",
                self.bytes_committed, self.total_size
            ))
        })
    }
}
