//! Read-only existence checks offered to the API layer so a client can skip
//! uploading content the server already holds.

use crate::error::Result;
use crate::repository::PhotoRepository;
use crate::upload::frame::relative_path;

/// What the caller's lookup key refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LookupKind {
    /// A storage-root-relative file path.
    Path,
    /// A client-local resource URI recorded at upload time.
    FileUri,
}

impl LookupKind {
    /// Wire form used by clients: `"1"` means a path, anything else a URI.
    pub fn from_wire(value: &str) -> Self {
        if value == "1" {
            LookupKind::Path
        } else {
            LookupKind::FileUri
        }
    }
}

/// Whether the server already has the content a client is about to send.
///
/// Checks the primary key first. When that misses and the client supplied a
/// pre-checksum, falls back to the partial-digest index.
pub fn exists(
    repo: &PhotoRepository,
    key: &str,
    kind: LookupKind,
    pre_checksum: Option<&str>,
) -> Result<bool> {
    let found = match kind {
        // Keys that leave the root are never answered from the filesystem.
        LookupKind::Path => match relative_path(key) {
            Ok(rel) => repo.full_path(&rel).exists(),
            Err(_) => false,
        },
        LookupKind::FileUri => match repo.get_by_file_uri(key) {
            Ok(_) => true,
            Err(e) if e.is_not_found() => false,
            Err(e) => return Err(e),
        },
    };
    if found {
        return Ok(true);
    }

    match pre_checksum {
        Some(pre) if !pre.trim().is_empty() => {
            let hit = repo.check_pre_checksum_exists(pre)?;
            tracing::debug!(pre_checksum = pre, hit, "pre-checksum lookup");
            Ok(hit)
        }
        _ => Ok(false),
    }
}

/// Whether a record with this whole-file checksum exists.
pub fn checksum_exists(repo: &PhotoRepository, checksum: &str) -> Result<bool> {
    repo.check_checksum_exists(checksum)
}
