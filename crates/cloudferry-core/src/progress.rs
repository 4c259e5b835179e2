use tokio::sync::mpsc::UnboundedSender;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProgressEvent {
    ScanComplete { files: u64, folders: u64, bytes: u64 },
    FileStarted { path: String, size: u64 },
    ChunkCommitted { path: String, committed: u64, total: u64 },
    FileComplete { path: String, bytes: u64 },
    FileSkipped { path: String, bytes: u64 },
    FileFailed { path: String, message: String },
}

#[derive(Clone)]
pub struct MigrationProgress {
    sender: UnboundedSender<ProgressEvent>,
}

impl MigrationProgress {
    pub fn new(sender: UnboundedSender<ProgressEvent>) -> Self {
        Self { sender }
    }

    pub fn report_scan(&self, files: u64, folders: u64, bytes: u64) {
        let _ = self.sender.send(ProgressEvent::ScanComplete {
            files,
            folders,
            bytes,
        });
    }

    pub fn report_file_started(&self, path: &str, size: u64) {
        let _ = self.sender.send(ProgressEvent::FileStarted {
            path: path.to_owned(),
            size,
        });
    }

    pub fn report_chunk(&self, path: &str, committed: u64, total: u64) {
        let _ = self.sender.send(ProgressEvent::ChunkCommitted {
            path: path.to_owned(),
            committed,
            total,
        });
    }

    pub fn report_file_complete(&self, path: &str, bytes: u64) {
        let _ = self.sender.send(ProgressEvent::FileComplete {
            path: path.to_owned(),
            bytes,
        });
    }

    pub fn report_file_skipped(&self, path: &str, bytes: u64) {
        let _ = self.sender.send(ProgressEvent::FileSkipped {
            path: path.to_owned(),
            bytes,
        });
    }

    pub fn report_file_failed(&self, path: &str, message: String) {
        let _ = self.sender.send(ProgressEvent::FileFailed {
            path: path.to_owned(),
            message,
        });
    }
}

/// Reports into an optional progress channel.
pub(crate) fn report(progress: Option<&MigrationProgress>, f: impl FnOnce(&MigrationProgress)) {
    if let Some(progress) = progress {
        f(progress);
    }
}
