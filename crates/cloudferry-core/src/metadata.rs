//! Translation of source metadata into destination-native metadata.
//!
//! Everything here is pure except [`MetadataTranslator::apply_permissions`],
//! which pushes already-translated grants through the retry controller.

use std::path::Path;
use std::sync::Arc;

use chrono::{DateTime, SecondsFormat, Utc};

use crate::entry::{DestPermission, DestRole, SharingDescriptor, SourceEntry, UploadMetadata};
use crate::errors::ProviderError;
use crate::provider::DestinationProvider;
use crate::retry::{with_retry, RetryPolicy};

/// Fallback MIME type for unknown extensions.
pub const DEFAULT_MIME_TYPE: &str = "application/octet-stream";

/// Map one source access-level description onto a destination role.
///
/// Matching is case-insensitive and checks "edit", then "comment", then
/// "view"/"read". Anything else becomes [`DestRole::Reader`]; write access is
/// never granted implicitly.
pub fn translate_role(access_level: &str) -> DestRole {
    let level = access_level.to_lowercase();
    if level.contains("edit") {
        DestRole::Writer
    } else if level.contains("comment") {
        DestRole::Commenter
    } else {
        // "view"/"read" and every unrecognized level
        DestRole::Reader
    }
}

/// Translate a sharing descriptor into destination grants.
///
/// Private descriptors produce no grants beyond the destination owner.
pub fn translate_sharing(descriptor: &SharingDescriptor) -> Vec<DestPermission> {
    if !descriptor.is_shared() {
        return Vec::new();
    }
    descriptor
        .grants
        .iter()
        .filter(|grant| !grant.principal.trim().is_empty())
        .map(|grant| DestPermission {
            principal: grant.principal.clone(),
            role: translate_role(&grant.access_level),
        })
        .collect()
}

/// Render a timestamp as RFC 3339 in UTC, keeping sub-second precision.
pub fn translate_timestamp(time: &DateTime<Utc>) -> String {
    time.to_rfc3339_opts(SecondsFormat::AutoSi, true)
}

/// Guess a MIME type from the file extension.
pub fn detect_mime_type(name: &str) -> &'static str {
    let ext = Path::new(name)
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_lowercase());

    match ext.as_deref() {
        Some("txt" | "log") => "text/plain",
        Some("md") => "text/markdown",
        Some("csv") => "text/csv",
        Some("html" | "htm") => "text/html",
        Some("json") => "application/json",
        Some("xml") => "application/xml",
        Some("pdf") => "application/pdf",
        Some("zip") => "application/zip",
        Some("gz") => "application/gzip",
        Some("doc") => "application/msword",
        Some("docx") => "application/vnd.openxmlformats-officedocument.wordprocessingml.document",
        Some("xls") => "application/vnd.ms-excel",
        Some("xlsx") => "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet",
        Some("ppt") => "application/vnd.ms-powerpoint",
        Some("pptx") => "application/vnd.openxmlformats-officedocument.presentationml.presentation",
        Some("png") => "image/png",
        Some("jpg" | "jpeg") => "image/jpeg",
        Some("gif") => "image/gif",
        Some("webp") => "image/webp",
        Some("svg") => "image/svg+xml",
        Some("heic") => "image/heic",
        Some("mp3") => "audio/mpeg",
        Some("wav") => "audio/wav",
        Some("mp4") => "video/mp4",
        Some("mov") => "video/quicktime",
        _ => DEFAULT_MIME_TYPE,
    }
}

/// Outcome of applying the grants of one file.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PermissionOutcome {
    pub applied: usize,
    pub failed: Vec<(String, ProviderError)>,
}

/// Converts per-file metadata and applies sharing on the destination.
pub struct MetadataTranslator {
    dest: Arc<dyn DestinationProvider>,
    retry: RetryPolicy,
    preserve_timestamps: bool,
    migrate_permissions: bool,
}

impl MetadataTranslator {
    pub fn new(
        dest: Arc<dyn DestinationProvider>,
        retry: RetryPolicy,
        preserve_timestamps: bool,
        migrate_permissions: bool,
    ) -> Self {
        Self {
            dest,
            retry,
            preserve_timestamps,
            migrate_permissions,
        }
    }

    pub fn migrate_permissions(&self) -> bool {
        self.migrate_permissions
    }

    /// Build the metadata a destination object is created with.
    pub fn upload_metadata(&self, entry: &SourceEntry, name: &str) -> UploadMetadata {
        UploadMetadata {
            name: name.to_owned(),
            mime_type: detect_mime_type(name).to_owned(),
            modified_time: if self.preserve_timestamps {
                entry.modified.as_ref().map(translate_timestamp)
            } else {
                None
            },
        }
    }

    /// Grants to apply for `descriptor`, honouring `migrate_permissions`.
    pub fn permissions_for(&self, descriptor: Option<&SharingDescriptor>) -> Vec<DestPermission> {
        match descriptor {
            Some(descriptor) if self.migrate_permissions => translate_sharing(descriptor),
            _ => Vec::new(),
        }
    }

    /// Apply each grant independently; one failing grant does not stop the rest.
    pub async fn apply_permissions(
        &self,
        file_id: &str,
        source_path: &str,
        permissions: &[DestPermission],
    ) -> PermissionOutcome {
        let mut outcome = PermissionOutcome::default();
        for perm in permissions {
            let label = format!("share {source_path} with {}", perm.principal);
            let dest = Arc::clone(&self.dest);
            let result = with_retry(&self.retry, &label, || {
                let dest = Arc::clone(&dest);
                let perm = perm.clone();
                let file_id = file_id.to_owned();
                async move { dest.apply_permissions(&file_id, &[perm]).await }
            })
            .await;
            match result {
                Ok(()) => {
                    log::info!("{source_path}: shared with {} as {}", perm.principal, perm.role);
                    outcome.applied += 1;
                }
                Err(err) => {
                    log::error!("{source_path}: failed to share with {}: {err}", perm.principal);
                    outcome.failed.push((perm.principal.clone(), err));
                }
            }
        }
        outcome
    }
}
