//! Types exchanged between the engine and its providers.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Whether a source entry is a file or a folder.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntryKind {
    File,
    Folder,
}

/// One item discovered while listing the source tree.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceEntry {
    /// Absolute source path, `/`-separated.
    pub path: String,
    pub kind: EntryKind,
    /// Byte size; always 0 for folders.
    pub size: u64,
    pub modified: Option<DateTime<Utc>>,
    /// Opaque identifier used to fetch content and sharing info.
    pub content_id: String,
    pub sharing: Option<SharingDescriptor>,
}

impl SourceEntry {
    pub fn file(path: impl Into<String>, size: u64, content_id: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            kind: EntryKind::File,
            size,
            modified: None,
            content_id: content_id.into(),
            sharing: None,
        }
    }

    pub fn folder(path: impl Into<String>, content_id: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            kind: EntryKind::Folder,
            size: 0,
            modified: None,
            content_id: content_id.into(),
            sharing: None,
        }
    }

    pub fn with_modified(mut self, modified: DateTime<Utc>) -> Self {
        self.modified = Some(modified);
        self
    }

    pub fn with_sharing(mut self, sharing: SharingDescriptor) -> Self {
        self.sharing = Some(sharing);
        self
    }

    pub fn is_file(&self) -> bool {
        self.kind == EntryKind::File
    }

    /// Final path component.
    pub fn name(&self) -> &str {
        self.path
            .trim_end_matches('/')
            .rsplit('/')
            .next()
            .unwrap_or_default()
    }
}

/// Who may see an item on the source side.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Visibility {
    /// Only the owner has access.
    Private,
    Shared,
}

/// A single (principal, access level) pair as reported by the source.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccessGrant {
    /// Usually an email address.
    pub principal: String,
    /// Free-form level description from the source, e.g. `"editor"`.
    pub access_level: String,
}

impl AccessGrant {
    pub fn new(principal: impl Into<String>, access_level: impl Into<String>) -> Self {
        Self {
            principal: principal.into(),
            access_level: access_level.into(),
        }
    }
}

/// Normalized representation of who can access an item and at what level.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SharingDescriptor {
    pub visibility: Visibility,
    pub grants: Vec<AccessGrant>,
}

impl SharingDescriptor {
    pub fn private() -> Self {
        Self {
            visibility: Visibility::Private,
            grants: Vec::new(),
        }
    }

    pub fn shared(grants: Vec<AccessGrant>) -> Self {
        Self {
            visibility: Visibility::Shared,
            grants,
        }
    }

    pub fn is_shared(&self) -> bool {
        self.visibility == Visibility::Shared && !self.grants.is_empty()
    }
}

/// Destination-side role.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DestRole {
    Reader,
    Commenter,
    Writer,
}

impl DestRole {
    pub fn as_str(self) -> &'static str {
        match self {
            DestRole::Reader => "reader",
            DestRole::Commenter => "commenter",
            DestRole::Writer => "writer",
        }
    }
}

impl fmt::Display for DestRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A grant to apply on the destination.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DestPermission {
    pub principal: String,
    pub role: DestRole,
}

/// Opaque identifier of a folder-like container at the destination.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FolderHandle(pub String);

impl FolderHandle {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for FolderHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Metadata attached to a created destination object.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UploadMetadata {
    pub name: String,
    pub mime_type: String,
    /// RFC 3339 timestamp, absent when timestamps are not preserved.
    pub modified_time: Option<String>,
}

/// Response to one chunk of a session upload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChunkAck {
    /// Total bytes the destination holds for the session so far.
    Committed(u64),
    /// The object was finalized.
    Complete { file_id: String, size: u64 },
}

/// Identity reported by a provider once its client is authenticated.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccountInfo {
    pub display_name: String,
}
