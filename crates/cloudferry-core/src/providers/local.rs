//! Filesystem-backed providers.
//!
//! `LocalSource` serves a directory tree; `LocalDestination` emulates a drive
//! inside a directory. Folder handles and file ids of the destination are
//! `/`-separated paths relative to its root.

use std::collections::HashMap;
use std::io::SeekFrom;
use std::ops::Range;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::SystemTime;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use filetime::FileTime;
use parking_lot::Mutex;
use serde::Serialize;
use tokio::io::{AsyncReadExt, AsyncSeekExt, AsyncWriteExt};
use walkdir::WalkDir;

use crate::entry::{
    AccountInfo, ChunkAck, DestPermission, DestRole, FolderHandle, SharingDescriptor, SourceEntry,
    UploadMetadata,
};
use crate::errors::{categorize_io_error, ErrorKind, ProviderError, ProviderResult};
use crate::path_map::normalize_source;
use crate::provider::{DestinationProvider, SourceProvider};

const STATE_DIR: &str = ".cloudferry";
const SHARED_DRIVES_DIR: &str = "shared-drives";

fn io_error(context: &str, err: std::io::Error) -> ProviderError {
    ProviderError::new(categorize_io_error(&err), format!("{context}: {err}"))
}

fn walk_error(err: walkdir::Error) -> ProviderError {
    let message = err.to_string();
    match err.into_io_error() {
        Some(io) => ProviderError::new(categorize_io_error(&io), message),
        None => ProviderError::new(ErrorKind::Other, message),
    }
}

fn relative_of(root: &Path, path: &Path) -> String {
    path.strip_prefix(root)
        .unwrap_or(path)
        .components()
        .map(|c| c.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/")
}

/// Reads a local directory tree. Every entry is private.
pub struct LocalSource {
    root: PathBuf,
}

impl LocalSource {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn resolve(&self, source_path: &str) -> ProviderResult<PathBuf> {
        let normalized = normalize_source(source_path)?;
        Ok(self.root.join(normalized.trim_start_matches('/')))
    }
}

#[async_trait]
impl SourceProvider for LocalSource {
    async fn verify_access(&self) -> ProviderResult<AccountInfo> {
        let meta = tokio::fs::metadata(&self.root)
            .await
            .map_err(|err| io_error(&format!("source root {}", self.root.display()), err))?;
        if !meta.is_dir() {
            return Err(ProviderError::invalid(format!(
                "source root {} is not a directory",
                self.root.display()
            )));
        }
        Ok(AccountInfo {
            display_name: format!("local:{}", self.root.display()),
        })
    }

    async fn list_folder(&self, path: &str) -> ProviderResult<Vec<SourceEntry>> {
        let dir = self.resolve(path)?;
        let root = self.root.clone();
        let listed = tokio::task::spawn_blocking(move || -> ProviderResult<Vec<SourceEntry>> {
            let mut entries = Vec::new();
            let walker = WalkDir::new(&dir)
                .min_depth(1)
                .max_depth(1)
                .sort_by_file_name();
            for next in walker {
                let entry = next.map_err(walk_error)?;
                let path = format!("/{}", relative_of(&root, entry.path()));
                let file_type = entry.file_type();
                if file_type.is_dir() {
                    entries.push(SourceEntry::folder(path.as_str(), path.as_str()));
                } else if file_type.is_file() {
                    let meta = entry.metadata().map_err(walk_error)?;
                    let mut item = SourceEntry::file(path.as_str(), meta.len(), path.as_str());
                    if let Ok(modified) = meta.modified() {
                        item = item.with_modified(DateTime::<Utc>::from(modified));
                    }
                    entries.push(item);
                } else {
                    log::debug!("skipping special file {}", entry.path().display());
                }
            }
            Ok(entries)
        })
        .await
        .map_err(|err| ProviderError::new(ErrorKind::Other, format!("listing task failed: {err}")))??;
        Ok(listed)
    }

    async fn get_content(&self, content_id: &str, range: Option<Range<u64>>) -> ProviderResult<Vec<u8>> {
        let path = self.resolve(content_id)?;
        let context = format!("read {}", path.display());
        let mut file = tokio::fs::File::open(&path)
            .await
            .map_err(|err| io_error(&context, err))?;
        let mut buf = Vec::new();
        match range {
            Some(range) => {
                file.seek(SeekFrom::Start(range.start))
                    .await
                    .map_err(|err| io_error(&context, err))?;
                file.take(range.end.saturating_sub(range.start))
                    .read_to_end(&mut buf)
                    .await
                    .map_err(|err| io_error(&context, err))?;
            }
            None => {
                file.read_to_end(&mut buf)
                    .await
                    .map_err(|err| io_error(&context, err))?;
            }
        }
        Ok(buf)
    }

    async fn get_sharing(&self, _content_id: &str) -> ProviderResult<SharingDescriptor> {
        Ok(SharingDescriptor::private())
    }
}

struct LocalUpload {
    target: String,
    total: u64,
    modified_time: Option<String>,
}

#[derive(Serialize)]
struct PermissionLine<'a> {
    file_id: &'a str,
    principal: &'a str,
    role: DestRole,
    granted_at: DateTime<Utc>,
}

/// Emulates a cloud drive inside a local directory.
///
/// Named containers live under `shared-drives/<name>`. Session uploads stage
/// in `.cloudferry/uploads/<token>.part` and are renamed into place when the
/// last chunk lands. Granted permissions are appended to
/// `.cloudferry/permissions.jsonl`.
pub struct LocalDestination {
    root: PathBuf,
    sessions: Mutex<HashMap<String, LocalUpload>>,
    next_session: AtomicU64,
}

impl LocalDestination {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            sessions: Mutex::new(HashMap::new()),
            next_session: AtomicU64::new(1),
        }
    }

    fn uploads_dir(&self) -> PathBuf {
        self.root.join(STATE_DIR).join("uploads")
    }

    fn permissions_log(&self) -> PathBuf {
        self.root.join(STATE_DIR).join("permissions.jsonl")
    }

    fn child_id(parent: Option<&FolderHandle>, name: &str) -> ProviderResult<String> {
        let separator = name.contains('/') || (cfg!(windows) && name.contains('\\'));
        if name.is_empty() || name == "." || name == ".." || separator {
            return Err(ProviderError::invalid(format!("invalid object name {name:?}")));
        }
        Ok(match parent {
            Some(parent) if !parent.as_str().is_empty() => format!("{}/{name}", parent.as_str()),
            _ => name.to_owned(),
        })
    }

    fn path_of(&self, id: &str) -> PathBuf {
        self.root.join(id)
    }

    async fn ensure_parent_exists(&self, parent: Option<&FolderHandle>) -> ProviderResult<()> {
        if let Some(parent) = parent {
            let dir = self.path_of(parent.as_str());
            if !tokio::fs::metadata(&dir).await.map(|m| m.is_dir()).unwrap_or(false) {
                return Err(ProviderError::not_found(format!("folder {parent} does not exist")));
            }
        }
        Ok(())
    }

    fn apply_modified(path: &Path, modified_time: Option<&str>) {
        let Some(raw) = modified_time else {
            return;
        };
        match DateTime::parse_from_rfc3339(raw) {
            Ok(time) => {
                let ft = FileTime::from_system_time(SystemTime::from(time.with_timezone(&Utc)));
                if let Err(err) = filetime::set_file_mtime(path, ft) {
                    log::warn!("failed to set modified time on {}: {err}", path.display());
                }
            }
            Err(err) => log::warn!("ignoring unparsable modified time {raw:?}: {err}"),
        }
    }
}

#[async_trait]
impl DestinationProvider for LocalDestination {
    async fn verify_access(&self) -> ProviderResult<AccountInfo> {
        tokio::fs::create_dir_all(&self.root)
            .await
            .map_err(|err| io_error(&format!("destination root {}", self.root.display()), err))?;
        Ok(AccountInfo {
            display_name: format!("local:{}", self.root.display()),
        })
    }

    async fn resolve_or_create_folder(
        &self,
        name: &str,
        parent: Option<&FolderHandle>,
    ) -> ProviderResult<FolderHandle> {
        self.ensure_parent_exists(parent).await?;
        let id = Self::child_id(parent, name)?;
        let dir = self.path_of(&id);
        tokio::fs::create_dir_all(&dir)
            .await
            .map_err(|err| io_error(&format!("create folder {}", dir.display()), err))?;
        Ok(FolderHandle::new(id))
    }

    async fn find_named_container(&self, name: &str) -> ProviderResult<Option<FolderHandle>> {
        let id = Self::child_id(Some(&FolderHandle::new(SHARED_DRIVES_DIR)), name)?;
        match tokio::fs::metadata(self.path_of(&id)).await {
            Ok(meta) if meta.is_dir() => Ok(Some(FolderHandle::new(id))),
            Ok(_) => Ok(None),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(err) => Err(io_error(&format!("look up shared drive {name}"), err)),
        }
    }

    async fn create_small(
        &self,
        data: Vec<u8>,
        metadata: &UploadMetadata,
        parent: Option<&FolderHandle>,
    ) -> ProviderResult<String> {
        self.ensure_parent_exists(parent).await?;
        let id = Self::child_id(parent, &metadata.name)?;
        let path = self.path_of(&id);
        tokio::fs::write(&path, &data)
            .await
            .map_err(|err| io_error(&format!("write {}", path.display()), err))?;
        Self::apply_modified(&path, metadata.modified_time.as_deref());
        Ok(id)
    }

    async fn open_upload_session(
        &self,
        total_size: u64,
        metadata: &UploadMetadata,
        parent: Option<&FolderHandle>,
    ) -> ProviderResult<String> {
        self.ensure_parent_exists(parent).await?;
        let target = Self::child_id(parent, &metadata.name)?;
        let token = format!(
            "{:x}-{}",
            Utc::now().timestamp_millis(),
            self.next_session.fetch_add(1, Ordering::Relaxed)
        );
        let uploads = self.uploads_dir();
        tokio::fs::create_dir_all(&uploads)
            .await
            .map_err(|err| io_error(&format!("create {}", uploads.display()), err))?;
        let part = uploads.join(format!("{token}.part"));
        tokio::fs::File::create(&part)
            .await
            .map_err(|err| io_error(&format!("create {}", part.display()), err))?;
        self.sessions.lock().insert(
            token.clone(),
            LocalUpload {
                target,
                total: total_size,
                modified_time: metadata.modified_time.clone(),
            },
        );
        Ok(token)
    }

    async fn upload_chunk(&self, session: &str, offset: u64, data: Vec<u8>) -> ProviderResult<ChunkAck> {
        let (target, total, modified_time) = {
            let sessions = self.sessions.lock();
            let upload = sessions.get(session).ok_or_else(|| {
                ProviderError::new(ErrorKind::SessionExpired, format!("unknown upload session {session}"))
            })?;
            (upload.target.clone(), upload.total, upload.modified_time.clone())
        };

        let part = self.uploads_dir().join(format!("{session}.part"));
        let context = format!("append to {}", part.display());
        let mut file = tokio::fs::OpenOptions::new()
            .append(true)
            .open(&part)
            .await
            .map_err(|err| io_error(&context, err))?;
        let current = file.metadata().await.map_err(|err| io_error(&context, err))?.len();
        if current != offset {
            return Err(ProviderError::invalid(format!(
                "chunk offset {offset} does not match committed {current}"
            )));
        }
        if offset + data.len() as u64 > total {
            return Err(ProviderError::invalid("chunk overruns declared size"));
        }
        file.write_all(&data).await.map_err(|err| io_error(&context, err))?;
        file.flush().await.map_err(|err| io_error(&context, err))?;
        drop(file);

        let committed = offset + data.len() as u64;
        if committed < total {
            return Ok(ChunkAck::Committed(committed));
        }

        let dest = self.path_of(&target);
        tokio::fs::rename(&part, &dest)
            .await
            .map_err(|err| io_error(&format!("finalize {}", dest.display()), err))?;
        self.sessions.lock().remove(session);
        Self::apply_modified(&dest, modified_time.as_deref());
        let size = tokio::fs::metadata(&dest)
            .await
            .map_err(|err| io_error(&format!("stat {}", dest.display()), err))?
            .len();
        Ok(ChunkAck::Complete { file_id: target, size })
    }

    async fn apply_permissions(&self, file_id: &str, permissions: &[DestPermission]) -> ProviderResult<()> {
        let target = self.path_of(file_id);
        if !tokio::fs::try_exists(&target).await.unwrap_or(false) {
            return Err(ProviderError::not_found(format!("no file {file_id}")));
        }
        let log_path = self.permissions_log();
        if let Some(parent) = log_path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|err| io_error(&format!("create {}", parent.display()), err))?;
        }
        let mut lines = String::new();
        for perm in permissions {
            let line = PermissionLine {
                file_id,
                principal: &perm.principal,
                role: perm.role,
                granted_at: Utc::now(),
            };
            let encoded = serde_json::to_string(&line)
                .map_err(|err| ProviderError::new(ErrorKind::Other, err.to_string()))?;
            lines.push_str(&encoded);
            lines.push('\n');
        }
        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&log_path)
            .await
            .map_err(|err| io_error(&format!("open {}", log_path.display()), err))?;
        file.write_all(lines.as_bytes())
            .await
            .map_err(|err| io_error(&format!("append {}", log_path.display()), err))?;
        file.flush()
            .await
            .map_err(|err| io_error(&format!("flush {}", log_path.display()), err))?;
        Ok(())
    }
}
