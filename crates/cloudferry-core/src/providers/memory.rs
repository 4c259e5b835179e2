//! In-memory providers with a call log and scripted failures.

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::ops::Range;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;

use crate::entry::{
    AccountInfo, ChunkAck, DestPermission, FolderHandle, SharingDescriptor, SourceEntry,
    UploadMetadata,
};
use crate::errors::{ErrorKind, ProviderError, ProviderResult};
use crate::path_map::normalize_source;
use crate::provider::{DestinationProvider, SourceProvider};

struct FailureScript<Op> {
    queued: HashMap<Op, VecDeque<ErrorKind>>,
}

impl<Op> Default for FailureScript<Op> {
    fn default() -> Self {
        Self {
            queued: HashMap::new(),
        }
    }
}

impl<Op: Eq + std::hash::Hash> FailureScript<Op> {
    fn push(&mut self, op: Op, kind: ErrorKind, times: usize) {
        self.queued.entry(op).or_default().extend(std::iter::repeat_n(kind, times));
    }

    fn take(&mut self, op: &Op) -> Option<ErrorKind> {
        self.queued.get_mut(op).and_then(VecDeque::pop_front)
    }
}

fn injected<Op: std::fmt::Debug>(op: Op, kind: Option<ErrorKind>) -> ProviderResult<()> {
    match kind {
        Some(kind) => Err(ProviderError::new(kind, format!("injected {op:?} failure"))),
        None => Ok(()),
    }
}

fn parent_of(path: &str) -> &str {
    match path.rsplit_once('/') {
        Some(("", _)) | None => "/",
        Some((parent, _)) => parent,
    }
}

fn normalized(path: &str) -> String {
    normalize_source(path).unwrap_or_else(|_| path.to_owned())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SourceOp {
    VerifyAccess,
    ListFolder,
    GetContent,
    GetSharing,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SourceCall {
    VerifyAccess,
    ListFolder { path: String },
    GetContent { content_id: String, range: Option<Range<u64>> },
    GetSharing { content_id: String },
}

impl SourceCall {
    pub fn op(&self) -> SourceOp {
        match self {
            SourceCall::VerifyAccess => SourceOp::VerifyAccess,
            SourceCall::ListFolder { .. } => SourceOp::ListFolder,
            SourceCall::GetContent { .. } => SourceOp::GetContent,
            SourceCall::GetSharing { .. } => SourceOp::GetSharing,
        }
    }
}

#[derive(Default)]
struct SourceState {
    entries: BTreeMap<String, SourceEntry>,
    content: HashMap<String, Vec<u8>>,
    sharing: HashMap<String, SharingDescriptor>,
    broken_listings: HashMap<String, ErrorKind>,
    calls: Vec<SourceCall>,
    failures: FailureScript<SourceOp>,
}

impl SourceState {
    fn add_folder(&mut self, path: &str) {
        if path == "/" || self.entries.contains_key(path) {
            return;
        }
        self.add_folder(parent_of(path));
        self.entries
            .insert(path.to_owned(), SourceEntry::folder(path, format!("id:{path}")));
    }

    fn entry_mut(&mut self, path: &str) -> Option<&mut SourceEntry> {
        self.entries.get_mut(&normalized(path))
    }
}

/// Source tree held in memory. Content ids are `id:<path>`.
///
/// Listings never carry sharing; it is served by `get_sharing`.
#[derive(Default)]
pub struct MemorySource {
    state: Mutex<SourceState>,
}

impl MemorySource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_folder(mut self, path: &str) -> Self {
        self.state.get_mut().add_folder(&normalized(path));
        self
    }

    pub fn with_file(mut self, path: &str, content: Vec<u8>) -> Self {
        let path = normalized(path);
        let state = self.state.get_mut();
        state.add_folder(parent_of(&path));
        let id = format!("id:{path}");
        state.entries.insert(
            path.clone(),
            SourceEntry::file(path.as_str(), content.len() as u64, id.as_str()),
        );
        state.content.insert(id, content);
        self
    }

    /// Override the size reported by listings, independent of the content.
    pub fn with_declared_size(mut self, path: &str, size: u64) -> Self {
        if let Some(entry) = self.state.get_mut().entry_mut(path) {
            entry.size = size;
        }
        self
    }

    pub fn with_modified(mut self, path: &str, modified: DateTime<Utc>) -> Self {
        if let Some(entry) = self.state.get_mut().entry_mut(path) {
            entry.modified = Some(modified);
        }
        self
    }

    pub fn with_sharing(mut self, path: &str, sharing: SharingDescriptor) -> Self {
        let state = self.state.get_mut();
        if let Some(id) = state.entry_mut(path).map(|e| e.content_id.clone()) {
            state.sharing.insert(id, sharing);
        }
        self
    }

    /// Make every listing of `path` fail with `kind`.
    pub fn with_listing_failure(mut self, path: &str, kind: ErrorKind) -> Self {
        self.state.get_mut().broken_listings.insert(normalized(path), kind);
        self
    }

    /// Fail the next `times` calls of `op` with `kind`.
    pub fn fail_next(&self, op: SourceOp, kind: ErrorKind, times: usize) {
        self.state.lock().failures.push(op, kind, times);
    }

    pub fn entry(&self, path: &str) -> Option<SourceEntry> {
        self.state.lock().entries.get(&normalized(path)).cloned()
    }

    pub fn calls(&self) -> Vec<SourceCall> {
        self.state.lock().calls.clone()
    }

    fn enter(&self, call: SourceCall) -> ProviderResult<()> {
        let mut state = self.state.lock();
        let op = call.op();
        state.calls.push(call);
        let kind = state.failures.take(&op);
        injected(op, kind)
    }
}

#[async_trait]
impl SourceProvider for MemorySource {
    async fn verify_access(&self) -> ProviderResult<AccountInfo> {
        self.enter(SourceCall::VerifyAccess)?;
        Ok(AccountInfo {
            display_name: "memory source".into(),
        })
    }

    async fn list_folder(&self, path: &str) -> ProviderResult<Vec<SourceEntry>> {
        let path = normalized(path);
        self.enter(SourceCall::ListFolder { path: path.clone() })?;
        let state = self.state.lock();
        if let Some(kind) = state.broken_listings.get(&path) {
            return Err(ProviderError::new(*kind, format!("listing {path} is broken")));
        }
        if path != "/" && !state.entries.contains_key(&path) {
            return Err(ProviderError::not_found(format!("no folder at {path}")));
        }
        Ok(state
            .entries
            .values()
            .filter(|entry| parent_of(&entry.path) == path && entry.path != "/")
            .cloned()
            .collect())
    }

    async fn get_content(&self, content_id: &str, range: Option<Range<u64>>) -> ProviderResult<Vec<u8>> {
        self.enter(SourceCall::GetContent {
            content_id: content_id.to_owned(),
            range: range.clone(),
        })?;
        let state = self.state.lock();
        let data = state
            .content
            .get(content_id)
            .ok_or_else(|| ProviderError::not_found(format!("no content {content_id}")))?;
        let len = data.len() as u64;
        let range = range.unwrap_or(0..len);
        let start = range.start.min(len) as usize;
        let end = range.end.min(len) as usize;
        Ok(data[start..end].to_vec())
    }

    async fn get_sharing(&self, content_id: &str) -> ProviderResult<SharingDescriptor> {
        self.enter(SourceCall::GetSharing {
            content_id: content_id.to_owned(),
        })?;
        Ok(self
            .state
            .lock()
            .sharing
            .get(content_id)
            .cloned()
            .unwrap_or_else(SharingDescriptor::private))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DestOp {
    VerifyAccess,
    ResolveFolder,
    FindContainer,
    CreateSmall,
    OpenSession,
    UploadChunk,
    ApplyPermissions,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DestCall {
    VerifyAccess,
    ResolveFolder { name: String, parent: Option<String> },
    FindContainer { name: String },
    CreateSmall { name: String, len: u64 },
    OpenSession { name: String, total: u64 },
    UploadChunk { token: String, offset: u64, len: u64 },
    ApplyPermissions { file_id: String, principals: Vec<String> },
}

impl DestCall {
    pub fn op(&self) -> DestOp {
        match self {
            DestCall::VerifyAccess => DestOp::VerifyAccess,
            DestCall::ResolveFolder { .. } => DestOp::ResolveFolder,
            DestCall::FindContainer { .. } => DestOp::FindContainer,
            DestCall::CreateSmall { .. } => DestOp::CreateSmall,
            DestCall::OpenSession { .. } => DestOp::OpenSession,
            DestCall::UploadChunk { .. } => DestOp::UploadChunk,
            DestCall::ApplyPermissions { .. } => DestOp::ApplyPermissions,
        }
    }

    /// Whether the call can change destination state.
    pub fn is_mutation(&self) -> bool {
        !matches!(self, DestCall::VerifyAccess | DestCall::FindContainer { .. })
    }
}

#[derive(Debug, Clone)]
struct FolderNode {
    name: String,
    parent: Option<String>,
    container: bool,
}

/// A file held by [`MemoryDestination`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredFile {
    pub id: String,
    pub name: String,
    pub parent: Option<String>,
    pub data: Vec<u8>,
    pub metadata: UploadMetadata,
    pub permissions: Vec<DestPermission>,
}

struct UploadState {
    metadata: UploadMetadata,
    parent: Option<String>,
    total: u64,
    data: Vec<u8>,
}

#[derive(Default)]
struct DestState {
    next_id: u64,
    folders: BTreeMap<String, FolderNode>,
    files: BTreeMap<String, StoredFile>,
    sessions: HashMap<String, UploadState>,
    calls: Vec<DestCall>,
    failures: FailureScript<DestOp>,
}

impl DestState {
    fn next_id(&mut self, prefix: &str) -> String {
        self.next_id += 1;
        format!("{prefix}-{}", self.next_id)
    }

    fn check_parent(&self, parent: Option<&FolderHandle>) -> ProviderResult<Option<String>> {
        match parent {
            Some(handle) if !self.folders.contains_key(handle.as_str()) => Err(
                ProviderError::not_found(format!("parent folder {handle} does not exist")),
            ),
            other => Ok(other.map(|h| h.as_str().to_owned())),
        }
    }

    fn folder_path(&self, id: &str) -> String {
        let mut segments = Vec::new();
        let mut prefix = String::new();
        let mut cursor = Some(id.to_owned());
        while let Some(current) = cursor {
            let Some(node) = self.folders.get(&current) else {
                break;
            };
            if node.container {
                prefix = format!("{}:", node.name);
                break;
            }
            segments.push(node.name.clone());
            cursor = node.parent.clone();
        }
        segments.reverse();
        format!("{prefix}/{}", segments.join("/"))
    }

    fn child_path(&self, parent: Option<&str>, name: &str) -> String {
        let base = parent.map(|p| self.folder_path(p)).unwrap_or_else(|| "/".into());
        if base.ends_with('/') {
            format!("{base}{name}")
        } else {
            format!("{base}/{name}")
        }
    }

    fn insert_file(&mut self, name: String, parent: Option<String>, data: Vec<u8>, metadata: UploadMetadata) -> String {
        let id = self.next_id("file");
        self.files.insert(
            id.clone(),
            StoredFile {
                id: id.clone(),
                name,
                parent,
                data,
                metadata,
                permissions: Vec::new(),
            },
        );
        id
    }
}

/// Destination drive held in memory.
///
/// Folder paths render as `/a/b`; folders inside a named container render as
/// `Name:/a/b`.
#[derive(Default)]
pub struct MemoryDestination {
    state: Mutex<DestState>,
    latency: Duration,
    final_size_skew: i64,
}

impl MemoryDestination {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a named container such as a shared drive.
    pub fn with_container(mut self, name: &str) -> Self {
        let state = self.state.get_mut();
        let id = state.next_id("drive");
        state.folders.insert(
            id,
            FolderNode {
                name: name.to_owned(),
                parent: None,
                container: true,
            },
        );
        self
    }

    /// Delay every call, widening race windows in concurrency tests.
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    /// Misreport finalized session sizes by `skew` bytes.
    pub fn with_final_size_skew(mut self, skew: i64) -> Self {
        self.final_size_skew = skew;
        self
    }

    pub fn fail_next(&self, op: DestOp, kind: ErrorKind, times: usize) {
        self.state.lock().failures.push(op, kind, times);
    }

    pub fn calls(&self) -> Vec<DestCall> {
        self.state.lock().calls.clone()
    }

    pub fn count(&self, op: DestOp) -> usize {
        self.state.lock().calls.iter().filter(|c| c.op() == op).count()
    }

    pub fn mutation_calls(&self) -> Vec<DestCall> {
        self.state
            .lock()
            .calls
            .iter()
            .filter(|c| c.is_mutation())
            .cloned()
            .collect()
    }

    pub fn files(&self) -> Vec<StoredFile> {
        self.state.lock().files.values().cloned().collect()
    }

    pub fn file_content(&self, file_id: &str) -> Option<Vec<u8>> {
        self.state.lock().files.get(file_id).map(|f| f.data.clone())
    }

    /// Full path of every stored file, sorted.
    pub fn file_paths(&self) -> Vec<String> {
        let state = self.state.lock();
        let mut paths: Vec<String> = state
            .files
            .values()
            .map(|f| state.child_path(f.parent.as_deref(), &f.name))
            .collect();
        paths.sort();
        paths
    }

    pub fn file_at(&self, path: &str) -> Option<StoredFile> {
        let state = self.state.lock();
        state
            .files
            .values()
            .find(|f| state.child_path(f.parent.as_deref(), &f.name) == path)
            .cloned()
    }

    /// Path of every non-container folder, sorted.
    pub fn folder_paths(&self) -> Vec<String> {
        let state = self.state.lock();
        let mut paths: Vec<String> = state
            .folders
            .iter()
            .filter(|(_, node)| !node.container)
            .map(|(id, _)| state.folder_path(id))
            .collect();
        paths.sort();
        paths
    }

    async fn enter(&self, call: DestCall) -> ProviderResult<()> {
        let op = call.op();
        let kind = {
            let mut state = self.state.lock();
            state.calls.push(call);
            state.failures.take(&op)
        };
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }
        injected(op, kind)
    }
}

#[async_trait]
impl DestinationProvider for MemoryDestination {
    async fn verify_access(&self) -> ProviderResult<AccountInfo> {
        self.enter(DestCall::VerifyAccess).await?;
        Ok(AccountInfo {
            display_name: "memory destination".into(),
        })
    }

    async fn resolve_or_create_folder(
        &self,
        name: &str,
        parent: Option<&FolderHandle>,
    ) -> ProviderResult<FolderHandle> {
        self.enter(DestCall::ResolveFolder {
            name: name.to_owned(),
            parent: parent.map(|p| p.as_str().to_owned()),
        })
        .await?;
        let mut state = self.state.lock();
        let parent = state.check_parent(parent)?;
        let existing = state
            .folders
            .iter()
            .find(|(_, node)| !node.container && node.name == name && node.parent == parent)
            .map(|(id, _)| id.clone());
        if let Some(id) = existing {
            return Ok(FolderHandle::new(id));
        }
        let id = state.next_id("folder");
        state.folders.insert(
            id.clone(),
            FolderNode {
                name: name.to_owned(),
                parent,
                container: false,
            },
        );
        Ok(FolderHandle::new(id))
    }

    async fn find_named_container(&self, name: &str) -> ProviderResult<Option<FolderHandle>> {
        self.enter(DestCall::FindContainer { name: name.to_owned() })
            .await?;
        Ok(self
            .state
            .lock()
            .folders
            .iter()
            .find(|(_, node)| node.container && node.name == name)
            .map(|(id, _)| FolderHandle::new(id.clone())))
    }

    async fn create_small(
        &self,
        data: Vec<u8>,
        metadata: &UploadMetadata,
        parent: Option<&FolderHandle>,
    ) -> ProviderResult<String> {
        self.enter(DestCall::CreateSmall {
            name: metadata.name.clone(),
            len: data.len() as u64,
        })
        .await?;
        let mut state = self.state.lock();
        let parent = state.check_parent(parent)?;
        Ok(state.insert_file(metadata.name.clone(), parent, data, metadata.clone()))
    }

    async fn open_upload_session(
        &self,
        total_size: u64,
        metadata: &UploadMetadata,
        parent: Option<&FolderHandle>,
    ) -> ProviderResult<String> {
        self.enter(DestCall::OpenSession {
            name: metadata.name.clone(),
            total: total_size,
        })
        .await?;
        let mut state = self.state.lock();
        let parent = state.check_parent(parent)?;
        let token = state.next_id("session");
        state.sessions.insert(
            token.clone(),
            UploadState {
                metadata: metadata.clone(),
                parent,
                total: total_size,
                data: Vec::new(),
            },
        );
        Ok(token)
    }

    async fn upload_chunk(&self, session: &str, offset: u64, data: Vec<u8>) -> ProviderResult<ChunkAck> {
        self.enter(DestCall::UploadChunk {
            token: session.to_owned(),
            offset,
            len: data.len() as u64,
        })
        .await?;
        let mut state = self.state.lock();
        let upload = state.sessions.get_mut(session).ok_or_else(|| {
            ProviderError::new(ErrorKind::SessionExpired, format!("unknown session {session}"))
        })?;
        if offset != upload.data.len() as u64 {
            return Err(ProviderError::invalid(format!(
                "chunk offset {offset} does not match committed {}",
                upload.data.len()
            )));
        }
        if offset + data.len() as u64 > upload.total {
            return Err(ProviderError::invalid("chunk overruns declared size"));
        }
        upload.data.extend_from_slice(&data);
        let committed = upload.data.len() as u64;
        if committed < upload.total {
            return Ok(ChunkAck::Committed(committed));
        }

        let Some(upload) = state.sessions.remove(session) else {
            return Err(ProviderError::new(ErrorKind::SessionExpired, "session vanished"));
        };
        let size = committed.saturating_add_signed(self.final_size_skew);
        let file_id = state.insert_file(upload.metadata.name.clone(), upload.parent, upload.data, upload.metadata);
        Ok(ChunkAck::Complete { file_id, size })
    }

    async fn apply_permissions(&self, file_id: &str, permissions: &[DestPermission]) -> ProviderResult<()> {
        self.enter(DestCall::ApplyPermissions {
            file_id: file_id.to_owned(),
            principals: permissions.iter().map(|p| p.principal.clone()).collect(),
        })
        .await?;
        let mut state = self.state.lock();
        let file = state
            .files
            .get_mut(file_id)
            .ok_or_else(|| ProviderError::not_found(format!("no file {file_id}")))?;
        file.permissions.extend_from_slice(permissions);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn source_lists_direct_children_in_path_order() {
        let source = MemorySource::new()
            .with_file("/b.txt", vec![1])
            .with_file("/a/inner.txt", vec![2])
            .with_folder("/empty");
        let listed: Vec<String> = source
            .list_folder("/")
            .await
            .unwrap()
            .into_iter()
            .map(|e| e.path)
            .collect();
        assert_eq!(listed, vec!["/a", "/b.txt", "/empty"]);
        assert_eq!(source.list_folder("/missing").await.unwrap_err().kind, ErrorKind::NotFound);
    }

    #[tokio::test]
    async fn ranged_reads_clamp_to_content() {
        let source = MemorySource::new().with_file("/f", vec![0, 1, 2, 3]);
        assert_eq!(source.get_content("id:/f", Some(1..3)).await.unwrap(), vec![1, 2]);
        assert_eq!(source.get_content("id:/f", Some(2..10)).await.unwrap(), vec![2, 3]);
    }

    #[tokio::test]
    async fn destination_reuses_existing_folder() {
        let dest = MemoryDestination::new();
        let a = dest.resolve_or_create_folder("a", None).await.unwrap();
        let again = dest.resolve_or_create_folder("a", None).await.unwrap();
        assert_eq!(a, again);
        assert_eq!(dest.folder_paths(), vec!["/a"]);
    }

    #[tokio::test]
    async fn container_folders_render_with_prefix() {
        let dest = MemoryDestination::new().with_container("Team");
        let drive = dest.find_named_container("Team").await.unwrap().unwrap();
        let folder = dest.resolve_or_create_folder("Migration", Some(&drive)).await.unwrap();
        let meta = UploadMetadata {
            name: "x.txt".into(),
            mime_type: "text/plain".into(),
            modified_time: None,
        };
        dest.create_small(vec![1], &meta, Some(&folder)).await.unwrap();
        assert_eq!(dest.file_paths(), vec!["Team:/Migration/x.txt"]);
        assert!(dest.find_named_container("Other").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn injected_failures_are_consumed_in_order() {
        let dest = MemoryDestination::new();
        dest.fail_next(DestOp::ResolveFolder, ErrorKind::RateLimited, 1);
        assert_eq!(
            dest.resolve_or_create_folder("a", None).await.unwrap_err().kind,
            ErrorKind::RateLimited
        );
        assert!(dest.resolve_or_create_folder("a", None).await.is_ok());
        assert_eq!(dest.count(DestOp::ResolveFolder), 2);
    }
}
