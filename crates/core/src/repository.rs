use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::catalog::{self, Catalog};
use crate::domain::*;
use crate::error::{Error, Result};

/// Largest page `list_photos` will return.
pub const MAX_PAGE_SIZE: i64 = 500;

/// Domain API over the metadata store.
///
/// Reads go straight to the catalog's read connection; every write is a
/// synchronous submission to the write queue, so a call that returns `Ok` has
/// been applied.
#[derive(Clone)]
pub struct PhotoRepository {
    catalog: Arc<Catalog>,
    root: PathBuf,
}

impl PhotoRepository {
    pub fn new(catalog: Arc<Catalog>, root: impl Into<PathBuf>) -> Self {
        Self {
            catalog,
            root: root.into(),
        }
    }

    /// The storage root all record paths are relative to.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Absolute location of a record path.
    pub fn full_path(&self, rel: &str) -> PathBuf {
        self.root.join(normalize_path(rel))
    }

    // ── Writes ───────────────────────────────────────────────────────

    /// Insert a record for a file that already exists under the root.
    pub fn insert_photo(&self, mut photo: NewPhoto) -> Result<i64> {
        photo.path = normalize_path(&photo.path).to_string();
        photo.live_photo_video_path = normalize_path(&photo.live_photo_video_path).to_string();

        let full = self.full_path(&photo.path);
        if !full.exists() {
            return Err(Error::NotFound(full.display().to_string()));
        }

        let now = now();
        if photo.mtime == 0 {
            photo.mtime = now;
        }
        if photo.ctime == 0 {
            photo.ctime = now;
        }

        let id = self
            .catalog
            .queue()
            .submit_sync(move |conn| catalog::insert_photo(conn, &photo, now))?;
        tracing::debug!(id, "photo record inserted");
        Ok(id)
    }

    /// Persist the current field values of `photo`.
    ///
    /// No optimistic locking: fetch a fresh copy before mutating it.
    pub fn update(&self, photo: &Photo) -> Result<()> {
        let photo = photo.clone();
        self.catalog
            .queue()
            .submit_sync(move |conn| catalog::update_photo(conn, &photo, now()))
    }

    /// Copy `file_uri` onto every record derived from `source_id`.
    pub fn update_file_uri_by_source_id(&self, source_id: i64, file_uri: &str) -> Result<usize> {
        let file_uri = file_uri.to_string();
        self.catalog.queue().submit_sync(move |conn| {
            catalog::update_file_uri_by_source_id(conn, source_id, &file_uri, now())
        })
    }

    /// Delete the record and then its backing file.
    ///
    /// If the row delete fails the file is left alone. If the file removal
    /// fails after the row is gone the error is returned and the next
    /// reconciliation pass will pick the file back up.
    pub fn delete_by_path(&self, path: &str) -> Result<Photo> {
        let photo = self.get_by_path(path)?;
        let id = photo.id;
        self.catalog
            .queue()
            .submit_sync(move |conn| catalog::delete_photo(conn, id))?;

        std::fs::remove_file(self.full_path(&photo.path))?;
        tracing::info!(path = %photo.path, "photo deleted");
        Ok(photo)
    }

    /// Delete only the record. Used when the file is already gone.
    pub fn delete_record(&self, path: &str) -> Result<()> {
        let path = normalize_path(path).to_string();
        self.catalog
            .queue()
            .submit_sync(move |conn| catalog::delete_photo_by_path(conn, &path))
    }

    // ── Reads ────────────────────────────────────────────────────────

    pub fn get_by_path(&self, path: &str) -> Result<Photo> {
        self.find_by_path(path)?
            .ok_or_else(|| Error::NotFound(path.to_string()))
    }

    pub fn find_by_path(&self, path: &str) -> Result<Option<Photo>> {
        let path = normalize_path(path);
        self.catalog.read(|conn| catalog::find_by_path(conn, path))
    }

    pub fn get_by_id(&self, id: i64) -> Result<Photo> {
        self.catalog
            .read(|conn| catalog::find_by_id(conn, id))?
            .ok_or_else(|| Error::NotFound(format!("photo #{id}")))
    }

    pub fn get_by_file_uri(&self, file_uri: &str) -> Result<Photo> {
        self.catalog
            .read(|conn| catalog::find_by_file_uri(conn, file_uri))?
            .ok_or_else(|| Error::NotFound(file_uri.to_string()))
    }

    pub fn check_checksum_exists(&self, checksum: &str) -> Result<bool> {
        if checksum.trim().is_empty() {
            return Ok(false);
        }
        self.catalog
            .read(|conn| catalog::checksum_exists(conn, checksum))
    }

    pub fn check_pre_checksum_exists(&self, pre_checksum: &str) -> Result<bool> {
        if pre_checksum.trim().is_empty() {
            return Ok(false);
        }
        self.catalog
            .read(|conn| catalog::pre_checksum_exists(conn, pre_checksum))
    }

    /// One page of listable photos, newest first. `page` is 1-based.
    pub fn list_photos(&self, page: i64, page_size: i64) -> Result<PhotoPage> {
        let page = page.max(1);
        let page_size = page_size.clamp(1, MAX_PAGE_SIZE);
        // Past the last representable row is simply past the end.
        let offset = (page - 1).saturating_mul(page_size);
        self.catalog
            .read(|conn| catalog::list_photos(conn, offset, page_size))
    }

    pub fn count(&self) -> Result<i64> {
        self.catalog.read(catalog::count_photos)
    }

    pub fn list_all(&self) -> Result<Vec<Photo>> {
        self.catalog.read(catalog::list_all_photos)
    }

    pub fn snapshot(&self) -> Result<HashMap<String, SnapshotEntry>> {
        self.catalog.read(catalog::snapshot)
    }
}

/// Strip leading separators so every stored path is root-relative.
pub fn normalize_path(path: &str) -> &str {
    path.trim_start_matches(['/', '\\'])
}

fn now() -> i64 {
    chrono::Utc::now().timestamp()
}
