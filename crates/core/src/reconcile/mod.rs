//! Converges the metadata store with what is actually on disk.
//!
//! A pass walks the storage root, records files nobody uploaded through the
//! protocol, repairs stale type/pairing/checksum fields, and drops records
//! whose file has disappeared. Hashing runs in parallel; store access stays
//! sequential and goes through the write queue.

pub mod classify;

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};

use rayon::prelude::*;
use walkdir::WalkDir;

pub use classify::{classify, Classification, MediaKind, SiblingIndex};

use crate::domain::NewPhoto;
use crate::error::Result;
use crate::hasher;
use crate::repository::PhotoRepository;
use crate::upload::is_temp_file;

/// Counters for one reconciliation pass.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ReconcileReport {
    /// Media files seen under the root.
    pub scanned: usize,
    pub inserted: usize,
    pub updated: usize,
    pub deleted: usize,
    /// Files left unindexed because their content is already recorded.
    pub duplicates: usize,
    pub errors: usize,
}

pub struct Reconciler {
    repo: PhotoRepository,
    running: AtomicBool,
}

/// Releases the pass guard when dropped.
struct PassGuard<'a>(&'a AtomicBool);

impl Drop for PassGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

enum Action {
    Insert,
    Repair { backfill: bool },
}

struct Candidate {
    rel_path: String,
    path: PathBuf,
    classification: Classification,
    action: Action,
}

impl Candidate {
    fn needs_hash(&self) -> bool {
        matches!(self.action, Action::Insert | Action::Repair { backfill: true })
    }
}

/// What the parallel phase learns about a file.
struct FileFacts {
    checksum: String,
    pre_checksum: String,
    size: i64,
    mtime: i64,
}

enum Outcome {
    Inserted,
    Updated,
    Duplicate,
    Unchanged,
}

impl Reconciler {
    pub fn new(repo: PhotoRepository) -> Self {
        Self {
            repo,
            running: AtomicBool::new(false),
        }
    }

    /// Run one pass, or return `None` if another pass is still running.
    pub fn run_pass(&self) -> Option<ReconcileReport> {
        if self
            .running
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            tracing::info!("reconciliation already running, skipping");
            return None;
        }
        let _guard = PassGuard(&self.running);

        let mut report = ReconcileReport::default();
        if let Err(e) = self.reconcile(&mut report) {
            tracing::error!(error = %e, "reconciliation pass aborted");
            report.errors += 1;
        }

        tracing::info!(
            scanned = report.scanned,
            inserted = report.inserted,
            updated = report.updated,
            deleted = report.deleted,
            duplicates = report.duplicates,
            errors = report.errors,
            "reconciliation pass finished"
        );
        Some(report)
    }

    fn reconcile(&self, report: &mut ReconcileReport) -> Result<()> {
        let root = self.repo.root();
        let mut snapshot = self.repo.snapshot()?;

        // ── Walk ─────────────────────────────────────────────────────

        let mut files = Vec::new();
        for entry in WalkDir::new(root).follow_links(false).sort_by_file_name() {
            let entry = match entry {
                Ok(entry) => entry,
                Err(e) => {
                    tracing::warn!(error = %e, "skipping unreadable entry");
                    report.errors += 1;
                    continue;
                }
            };
            if !entry.file_type().is_file() {
                continue;
            }
            if let Some(rel_path) = relative_slash_path(root, entry.path()) {
                files.push((rel_path, entry.into_path()));
            }
        }
        let siblings: SiblingIndex = files.iter().map(|(rel, _)| rel.as_str()).collect();

        let mut candidates = Vec::new();
        for (rel_path, path) in files {
            // A recorded file is live whatever its extension.
            let stored = snapshot.remove(&rel_path);
            let Some(classification) = classify(&rel_path, &siblings) else {
                continue;
            };
            report.scanned += 1;

            let action = match stored {
                None => Action::Insert,
                Some(stored) => {
                    let backfill = stored.checksum.trim().is_empty();
                    let stale = stored.photo_type != classification.photo_type
                        || stored.live_photo_video_path != classification.live_photo_video_path;
                    if !backfill && !stale {
                        continue;
                    }
                    Action::Repair { backfill }
                }
            };
            candidates.push(Candidate {
                rel_path,
                path,
                classification,
                action,
            });
        }

        // ── Hash (parallel, no store access) ─────────────────────────

        let inspected: Vec<(Candidate, std::io::Result<Option<FileFacts>>)> = candidates
            .into_par_iter()
            .map(|candidate| {
                let facts = if candidate.needs_hash() {
                    inspect(&candidate.path).map(Some)
                } else {
                    Ok(None)
                };
                (candidate, facts)
            })
            .collect();

        // ── Apply (sequential) ───────────────────────────────────────

        for (candidate, facts) in inspected {
            let facts = match facts {
                Ok(facts) => facts,
                Err(e) => {
                    tracing::warn!(path = %candidate.rel_path, error = %e, "could not hash file");
                    report.errors += 1;
                    continue;
                }
            };
            match self.apply(&candidate, facts) {
                Ok(Outcome::Inserted) => report.inserted += 1,
                Ok(Outcome::Updated) => report.updated += 1,
                Ok(Outcome::Duplicate) => report.duplicates += 1,
                Ok(Outcome::Unchanged) => {}
                Err(e) => {
                    tracing::warn!(path = %candidate.rel_path, error = %e, "could not reconcile file");
                    report.errors += 1;
                }
            }
        }

        // ── Orphaned records ─────────────────────────────────────────

        for path in snapshot.into_keys() {
            match self.repo.delete_record(&path) {
                Ok(()) => {
                    tracing::info!(%path, "record for missing file removed");
                    report.deleted += 1;
                }
                Err(e) => {
                    tracing::warn!(%path, error = %e, "could not remove orphaned record");
                    report.errors += 1;
                }
            }
        }

        Ok(())
    }

    fn apply(&self, candidate: &Candidate, facts: Option<FileFacts>) -> Result<Outcome> {
        let classification = &candidate.classification;
        match candidate.action {
            Action::Insert => {
                let Some(facts) = facts else {
                    return Ok(Outcome::Unchanged);
                };
                // An upload may have indexed this path after the snapshot.
                if self.repo.find_by_path(&candidate.rel_path)?.is_some() {
                    return Ok(Outcome::Unchanged);
                }
                if self.repo.check_checksum_exists(&facts.checksum)? {
                    tracing::debug!(path = %candidate.rel_path, "content already recorded, not indexing");
                    return Ok(Outcome::Duplicate);
                }
                let name = candidate
                    .rel_path
                    .rsplit('/')
                    .next()
                    .unwrap_or(&candidate.rel_path)
                    .to_string();
                self.repo.insert_photo(NewPhoto {
                    name,
                    path: candidate.rel_path.clone(),
                    size: facts.size,
                    photo_type: classification.photo_type,
                    live_photo_video_path: classification.live_photo_video_path.clone(),
                    file_uri: String::new(),
                    mtime: facts.mtime,
                    ctime: facts.mtime,
                    pre_checksum: facts.pre_checksum,
                    checksum: facts.checksum,
                    source_id: 0,
                })?;
                Ok(Outcome::Inserted)
            }
            Action::Repair { .. } => {
                let mut photo = self.repo.get_by_path(&candidate.rel_path)?;
                photo.photo_type = classification.photo_type;
                photo.live_photo_video_path = classification.live_photo_video_path.clone();
                if let Some(facts) = facts {
                    photo.checksum = facts.checksum;
                    photo.pre_checksum = facts.pre_checksum;
                    photo.size = facts.size;
                }
                self.repo.update(&photo)?;
                Ok(Outcome::Updated)
            }
        }
    }
}

fn inspect(path: &Path) -> std::io::Result<FileFacts> {
    let metadata = std::fs::metadata(path)?;
    let mtime = chrono::DateTime::<chrono::Utc>::from(metadata.modified()?).timestamp();
    Ok(FileFacts {
        checksum: hasher::compute_sha256(path)?,
        pre_checksum: hasher::compute_pre_checksum(path)?,
        size: metadata.len() as i64,
        mtime,
    })
}

fn relative_slash_path(root: &Path, path: &Path) -> Option<String> {
    let rel = path.strip_prefix(root).ok()?;
    let parts: Vec<_> = rel.iter().map(|part| part.to_string_lossy()).collect();
    if parts.is_empty() {
        return None;
    }
    Some(parts.join("/"))
}

/// Remove `*.uploading` leftovers from transfers that never finished.
///
/// Meant for startup, before any connection is accepted.
pub fn cleanup_partial_uploads(root: &Path) -> usize {
    let mut removed = 0;
    for entry in WalkDir::new(root).follow_links(false).into_iter().flatten() {
        if !entry.file_type().is_file() || !is_temp_file(entry.path()) {
            continue;
        }
        match std::fs::remove_file(entry.path()) {
            Ok(()) => removed += 1,
            Err(e) => {
                tracing::warn!(path = %entry.path().display(), error = %e, "could not remove partial upload")
            }
        }
    }
    if removed > 0 {
        tracing::info!(removed, "partial uploads cleaned up");
    }
    removed
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::Catalog;
    use crate::domain::PhotoType;
    use std::fs;
    use std::sync::Arc;

    fn make_reconciler() -> (Reconciler, PhotoRepository, tempfile::TempDir) {
        let tmp = tempfile::tempdir().unwrap();
        let root = tmp.path().join("upload");
        fs::create_dir_all(&root).unwrap();
        let catalog = Catalog::open(&tmp.path().join("config/master.db"), 16).unwrap();
        let repo = PhotoRepository::new(Arc::new(catalog), root);
        (Reconciler::new(repo.clone()), repo, tmp)
    }

    fn write_file(repo: &PhotoRepository, rel: &str, content: &[u8]) {
        let full = repo.full_path(rel);
        fs::create_dir_all(full.parent().unwrap()).unwrap();
        fs::write(full, content).unwrap();
    }

    fn record(rel: &str, photo_type: PhotoType, checksum: &str) -> NewPhoto {
        NewPhoto {
            name: rel.rsplit('/').next().unwrap().to_string(),
            path: rel.to_string(),
            size: 1,
            photo_type,
            live_photo_video_path: String::new(),
            file_uri: String::new(),
            mtime: 1,
            ctime: 1,
            pre_checksum: String::new(),
            checksum: checksum.to_string(),
            source_id: 0,
        }
    }

    fn recorded_paths(repo: &PhotoRepository) -> Vec<String> {
        let mut paths: Vec<_> = repo.list_all().unwrap().into_iter().map(|p| p.path).collect();
        paths.sort();
        paths
    }

    #[test]
    fn test_pass_converges_store_with_disk() {
        let (reconciler, repo, _tmp) = make_reconciler();
        write_file(&repo, "2025/a.jpg", b"aaa");
        write_file(&repo, "2025/b.jpg", b"bbb");
        reconciler.run_pass().unwrap();

        fs::remove_file(repo.full_path("2025/a.jpg")).unwrap();
        write_file(&repo, "2025/c.png", b"ccc");
        let report = reconciler.run_pass().unwrap();

        assert_eq!(report.deleted, 1);
        assert_eq!(report.inserted, 1);
        assert_eq!(recorded_paths(&repo), ["2025/b.jpg", "2025/c.png"]);

        let c = repo.get_by_path("2025/c.png").unwrap();
        assert_eq!(c.checksum, hasher::sha256_bytes(b"ccc"));
        assert_eq!(c.size, 3);
        assert_eq!(c.name, "c.png");
        assert_eq!(c.mtime, c.ctime);
    }

    #[test]
    fn test_second_pass_is_a_no_op() {
        let (reconciler, repo, _tmp) = make_reconciler();
        write_file(&repo, "a.jpg", b"aaa");
        write_file(&repo, "IMG_1.heic", b"still");
        write_file(&repo, "IMG_1.mov", b"motion");
        reconciler.run_pass().unwrap();

        let report = reconciler.run_pass().unwrap();
        assert_eq!(report.scanned, 3);
        assert_eq!(
            (report.inserted, report.updated, report.deleted, report.errors),
            (0, 0, 0, 0)
        );
    }

    #[test]
    fn test_live_photo_pairing() {
        let (reconciler, repo, _tmp) = make_reconciler();
        write_file(&repo, "IMG_1.heic", b"still");
        write_file(&repo, "IMG_1.mov", b"motion");

        let report = reconciler.run_pass().unwrap();
        assert_eq!(report.inserted, 2);

        let image = repo.get_by_path("IMG_1.heic").unwrap();
        assert_eq!(image.photo_type, PhotoType::LivePhoto);
        assert_eq!(image.live_photo_video_path, "IMG_1.mov");

        let video = repo.get_by_path("IMG_1.mov").unwrap();
        assert_eq!(video.photo_type, PhotoType::LivePhoto);
        assert_eq!(video.live_photo_video_path, "");
    }

    #[test]
    fn test_stale_type_is_repaired() {
        let (reconciler, repo, _tmp) = make_reconciler();
        write_file(&repo, "IMG_1.heic", b"still");
        repo.insert_photo(record("IMG_1.heic", PhotoType::Normal, "known"))
            .unwrap();
        write_file(&repo, "IMG_1.mov", b"motion");

        let report = reconciler.run_pass().unwrap();
        assert_eq!(report.updated, 1);
        assert_eq!(report.inserted, 1);

        let image = repo.get_by_path("IMG_1.heic").unwrap();
        assert_eq!(image.photo_type, PhotoType::LivePhoto);
        assert_eq!(image.live_photo_video_path, "IMG_1.mov");
        // Type repairs do not rehash.
        assert_eq!(image.checksum, "known");
    }

    #[test]
    fn test_blank_checksum_is_backfilled() {
        let (reconciler, repo, _tmp) = make_reconciler();
        write_file(&repo, "a.jpg", b"content");
        repo.insert_photo(record("a.jpg", PhotoType::Normal, "")).unwrap();

        let report = reconciler.run_pass().unwrap();
        assert_eq!(report.updated, 1);

        let photo = repo.get_by_path("a.jpg").unwrap();
        assert_eq!(photo.checksum, hasher::sha256_bytes(b"content"));
        assert!(!photo.pre_checksum.is_empty());
        assert_eq!(photo.size, 7);
    }

    #[test]
    fn test_duplicate_content_is_not_indexed_twice() {
        let (reconciler, repo, _tmp) = make_reconciler();
        write_file(&repo, "a.jpg", b"same");
        write_file(&repo, "b.jpg", b"same");

        let report = reconciler.run_pass().unwrap();

        assert_eq!(report.inserted, 1);
        assert_eq!(report.duplicates, 1);
        assert_eq!(recorded_paths(&repo), ["a.jpg"]);
        assert!(repo.full_path("b.jpg").exists());
    }

    #[test]
    fn test_non_media_and_temp_files_are_ignored() {
        let (reconciler, repo, _tmp) = make_reconciler();
        write_file(&repo, "a.jpg.uploading", b"partial");
        write_file(&repo, "notes.txt", b"text");

        let report = reconciler.run_pass().unwrap();
        assert_eq!(report.scanned, 0);
        assert_eq!(repo.count().unwrap(), 0);
    }

    #[test]
    fn test_recorded_non_media_file_is_kept() {
        let (reconciler, repo, _tmp) = make_reconciler();
        write_file(&repo, "scan.tiff", b"tiff");
        let mut scan = record("scan.tiff", PhotoType::Normal, "sum-scan");
        scan.file_uri = "content://scan".to_string();
        repo.insert_photo(scan).unwrap();

        let report = reconciler.run_pass().unwrap();
        assert_eq!(report.deleted, 0);
        assert_eq!(report.scanned, 0);

        let kept = repo.get_by_path("scan.tiff").unwrap();
        assert_eq!(kept.file_uri, "content://scan");
        assert_eq!(kept.checksum, "sum-scan");

        fs::remove_file(repo.full_path("scan.tiff")).unwrap();
        assert_eq!(reconciler.run_pass().unwrap().deleted, 1);
    }

    #[test]
    fn test_mixed_case_live_pair() {
        let (reconciler, repo, _tmp) = make_reconciler();
        write_file(&repo, "IMG_1.Heic", b"still");
        write_file(&repo, "IMG_1.mov", b"motion");

        reconciler.run_pass().unwrap();
        let image = repo.get_by_path("IMG_1.Heic").unwrap();
        assert_eq!(image.photo_type, PhotoType::LivePhoto);
        assert_eq!(image.live_photo_video_path, "IMG_1.mov");
        assert_eq!(
            repo.get_by_path("IMG_1.mov").unwrap().photo_type,
            PhotoType::LivePhoto
        );
    }

    #[test]
    fn test_overlapping_pass_is_skipped() {
        let (reconciler, repo, _tmp) = make_reconciler();
        write_file(&repo, "a.jpg", b"aaa");

        reconciler.running.store(true, Ordering::Release);
        assert!(reconciler.run_pass().is_none());
        assert_eq!(repo.count().unwrap(), 0);

        reconciler.running.store(false, Ordering::Release);
        assert!(reconciler.run_pass().is_some());
        assert!(!reconciler.running.load(Ordering::Acquire));
    }

    #[test]
    fn test_cleanup_partial_uploads() {
        let (_, repo, _tmp) = make_reconciler();
        write_file(&repo, "a.jpg.uploading", b"partial");
        write_file(&repo, "2025/8/b.mov.uploading", b"partial");
        write_file(&repo, "c.jpg", b"done");

        assert_eq!(cleanup_partial_uploads(repo.root()), 2);
        assert!(!repo.full_path("a.jpg.uploading").exists());
        assert!(!repo.full_path("2025/8/b.mov.uploading").exists());
        assert!(repo.full_path("c.jpg").exists());
    }

    #[test]
    fn test_relative_slash_path() {
        let root = Path::new("/srv/upload");
        assert_eq!(
            relative_slash_path(root, Path::new("/srv/upload/2025/8/a.jpg")).as_deref(),
            Some("2025/8/a.jpg")
        );
        assert_eq!(relative_slash_path(root, root), None);
    }
}
