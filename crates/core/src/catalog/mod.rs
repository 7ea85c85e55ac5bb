pub mod schema;

use std::collections::HashMap;
use std::path::Path;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use rusqlite::{params, Connection, OptionalExtension, Row};

use crate::domain::*;
use crate::error::{Error, Result};
use crate::queue::WriteQueue;

const PHOTO_COLUMNS: &str = "id, name, path, size, type, live_photo_video_path, file_uri,
     mtime, ctime, pre_checksum, checksum, source_id, created_at, updated_at";

/// Rows that `list_photos` is allowed to show: originals only, and live photos
/// only from the image side once their pairing is known.
const LISTABLE: &str =
    "source_id = 0 AND (type <> 3 OR (type = 3 AND live_photo_video_path <> ''))";

/// SQLite-backed metadata store.
///
/// Owns one read connection for direct queries and hands the write connection
/// to a [`WriteQueue`] consumer, so every mutation is serialized.
pub struct Catalog {
    reader: Mutex<Connection>,
    queue: WriteQueue,
}

impl Catalog {
    /// Open or create a catalog at the given path with WAL mode and run
    /// pending schema migrations.
    pub fn open(path: &Path, queue_capacity: usize) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let writer = Connection::open(path)?;
        configure(&writer)?;
        schema::initialize(&writer)?;
        schema::migrate(&writer)?;

        let reader = Connection::open(path)?;
        configure(&reader)?;

        let queue = WriteQueue::start(writer, queue_capacity)?;
        tracing::info!(database = %path.display(), "metadata store opened");

        Ok(Self {
            reader: Mutex::new(reader),
            queue,
        })
    }

    pub fn queue(&self) -> &WriteQueue {
        &self.queue
    }

    /// Run a query against the read connection.
    pub fn read<T>(&self, f: impl FnOnce(&Connection) -> Result<T>) -> Result<T> {
        f(&self.lock_reader())
    }

    fn lock_reader(&self) -> MutexGuard<'_, Connection> {
        // A panic while holding the lock cannot leave the connection itself
        // in a torn state, so recover the guard.
        self.reader.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

fn configure(conn: &Connection) -> Result<()> {
    conn.pragma_update(None, "journal_mode", "WAL")?;
    conn.busy_timeout(Duration::from_secs(5))?;
    Ok(())
}

// ── Row functions ────────────────────────────────────────────────────
//
// These take a plain connection so they can run either on the reader or
// inside a queued write.

pub fn insert_photo(conn: &Connection, photo: &NewPhoto, now: i64) -> Result<i64> {
    conn.execute(
        "INSERT INTO photos (name, path, size, type, live_photo_video_path, file_uri,
         mtime, ctime, pre_checksum, checksum, source_id, created_at, updated_at)
         VALUES (?1,?2,?3,?4,?5,?6,?7,?8,?9,?10,?11,?12,?12)",
        params![
            photo.name,
            photo.path,
            photo.size,
            photo.photo_type.code(),
            photo.live_photo_video_path,
            photo.file_uri,
            photo.mtime,
            photo.ctime,
            photo.pre_checksum,
            photo.checksum,
            photo.source_id,
            now,
        ],
    )?;
    Ok(conn.last_insert_rowid())
}

/// Overwrite every mutable column of the row with `photo.id`.
pub fn update_photo(conn: &Connection, photo: &Photo, now: i64) -> Result<()> {
    let changed = conn.execute(
        "UPDATE photos SET name=?1, path=?2, size=?3, type=?4, live_photo_video_path=?5,
         file_uri=?6, mtime=?7, ctime=?8, pre_checksum=?9, checksum=?10, source_id=?11,
         updated_at=?12
         WHERE id=?13",
        params![
            photo.name,
            photo.path,
            photo.size,
            photo.photo_type.code(),
            photo.live_photo_video_path,
            photo.file_uri,
            photo.mtime,
            photo.ctime,
            photo.pre_checksum,
            photo.checksum,
            photo.source_id,
            now,
            photo.id,
        ],
    )?;
    if changed == 0 {
        return Err(Error::NotFound(format!("photo #{}", photo.id)));
    }
    Ok(())
}

pub fn update_file_uri_by_source_id(
    conn: &Connection,
    source_id: i64,
    file_uri: &str,
    now: i64,
) -> Result<usize> {
    let changed = conn.execute(
        "UPDATE photos SET file_uri = ?1, updated_at = ?2 WHERE source_id = ?3",
        params![file_uri, now, source_id],
    )?;
    Ok(changed)
}

pub fn delete_photo(conn: &Connection, id: i64) -> Result<()> {
    let removed = conn.execute("DELETE FROM photos WHERE id = ?1", params![id])?;
    if removed == 0 {
        return Err(Error::NotFound(format!("photo #{id}")));
    }
    Ok(())
}

pub fn delete_photo_by_path(conn: &Connection, path: &str) -> Result<()> {
    let removed = conn.execute("DELETE FROM photos WHERE path = ?1", params![path])?;
    if removed == 0 {
        return Err(Error::NotFound(path.to_string()));
    }
    Ok(())
}

pub fn find_by_path(conn: &Connection, path: &str) -> Result<Option<Photo>> {
    find_one(conn, "path = ?1", path)
}

pub fn find_by_id(conn: &Connection, id: i64) -> Result<Option<Photo>> {
    let sql = format!("SELECT {PHOTO_COLUMNS} FROM photos WHERE id = ?1");
    Ok(conn.query_row(&sql, params![id], photo_from_row).optional()?)
}

pub fn find_by_file_uri(conn: &Connection, file_uri: &str) -> Result<Option<Photo>> {
    find_one(conn, "file_uri = ?1", file_uri)
}

pub fn checksum_exists(conn: &Connection, checksum: &str) -> Result<bool> {
    exists_where(conn, "checksum = ?1", checksum)
}

pub fn pre_checksum_exists(conn: &Connection, pre_checksum: &str) -> Result<bool> {
    exists_where(conn, "pre_checksum = ?1", pre_checksum)
}

pub fn count_photos(conn: &Connection) -> Result<i64> {
    Ok(conn.query_row("SELECT COUNT(*) FROM photos", [], |row| row.get(0))?)
}

/// Total listable rows plus one page of them, newest first.
pub fn list_photos(conn: &Connection, offset: i64, limit: i64) -> Result<PhotoPage> {
    let total: i64 = conn.query_row(
        &format!("SELECT COUNT(*) FROM photos WHERE {LISTABLE}"),
        [],
        |row| row.get(0),
    )?;

    let mut stmt = conn.prepare(&format!(
        "SELECT {PHOTO_COLUMNS} FROM photos WHERE {LISTABLE}
         ORDER BY mtime DESC, id DESC LIMIT ?1 OFFSET ?2"
    ))?;
    let photos = stmt
        .query_map(params![limit, offset], photo_from_row)?
        .collect::<std::result::Result<Vec<_>, _>>()?;

    Ok(PhotoPage { total, photos })
}

pub fn list_all_photos(conn: &Connection) -> Result<Vec<Photo>> {
    let mut stmt = conn.prepare(&format!("SELECT {PHOTO_COLUMNS} FROM photos ORDER BY id"))?;
    let photos = stmt
        .query_map([], photo_from_row)?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(photos)
}

/// Load (path → checksum, type, pairing) for every record in one query.
pub fn snapshot(conn: &Connection) -> Result<HashMap<String, SnapshotEntry>> {
    let mut stmt = conn.prepare("SELECT path, checksum, type, live_photo_video_path FROM photos")?;
    let rows = stmt
        .query_map([], |row| {
            Ok((
                row.get::<_, String>(0)?,
                SnapshotEntry {
                    checksum: row.get(1)?,
                    photo_type: parse_type(row.get(2)?),
                    live_photo_video_path: row.get(3)?,
                },
            ))
        })?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(rows.into_iter().collect())
}

fn find_one(conn: &Connection, predicate: &str, value: &str) -> Result<Option<Photo>> {
    let sql = format!("SELECT {PHOTO_COLUMNS} FROM photos WHERE {predicate} LIMIT 1");
    Ok(conn.query_row(&sql, params![value], photo_from_row).optional()?)
}

fn exists_where(conn: &Connection, predicate: &str, value: &str) -> Result<bool> {
    let sql = format!("SELECT EXISTS(SELECT 1 FROM photos WHERE {predicate})");
    Ok(conn.query_row(&sql, params![value], |row| row.get(0))?)
}

fn photo_from_row(row: &Row<'_>) -> rusqlite::Result<Photo> {
    Ok(Photo {
        id: row.get(0)?,
        name: row.get(1)?,
        path: row.get(2)?,
        size: row.get(3)?,
        photo_type: parse_type(row.get(4)?),
        live_photo_video_path: row.get(5)?,
        file_uri: row.get(6)?,
        mtime: row.get(7)?,
        ctime: row.get(8)?,
        pre_checksum: row.get(9)?,
        checksum: row.get(10)?,
        source_id: row.get(11)?,
        created_at: row.get(12)?,
        updated_at: row.get(13)?,
    })
}

fn parse_type(code: i64) -> PhotoType {
    PhotoType::from_code(code).unwrap_or(PhotoType::Normal)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_catalog() -> (Catalog, tempfile::TempDir) {
        let tmp = tempfile::tempdir().unwrap();
        let catalog = Catalog::open(&tmp.path().join("config/master.db"), 8).unwrap();
        (catalog, tmp)
    }

    fn make_photo(path: &str, checksum: &str) -> NewPhoto {
        NewPhoto {
            name: path.rsplit('/').next().unwrap().to_string(),
            path: path.to_string(),
            size: 1024,
            photo_type: PhotoType::Normal,
            live_photo_video_path: String::new(),
            file_uri: String::new(),
            mtime: 1000,
            ctime: 1000,
            pre_checksum: String::new(),
            checksum: checksum.to_string(),
            source_id: 0,
        }
    }

    fn insert(catalog: &Catalog, photo: NewPhoto) -> i64 {
        catalog
            .queue()
            .submit_sync(move |conn| insert_photo(conn, &photo, 1))
            .unwrap()
    }

    #[test]
    fn test_open_creates_database_file() {
        let tmp = tempfile::tempdir().unwrap();
        let db_path = tmp.path().join("sub/dir/master.db");
        let _catalog = Catalog::open(&db_path, 8).unwrap();
        assert!(db_path.exists());
    }

    #[test]
    fn test_insert_and_read_back() {
        let (catalog, _tmp) = make_catalog();
        let id = insert(&catalog, make_photo("2025/8/a.jpg", "aaa"));

        let photo = catalog
            .read(|conn| find_by_path(conn, "2025/8/a.jpg"))
            .unwrap()
            .unwrap();
        assert_eq!(photo.id, id);
        assert_eq!(photo.name, "a.jpg");
        assert_eq!(photo.checksum, "aaa");
        assert_eq!(photo.created_at, 1);

        let by_id = catalog.read(|conn| find_by_id(conn, id)).unwrap().unwrap();
        assert_eq!(by_id, photo);
    }

    #[test]
    fn test_path_is_unique() {
        let (catalog, _tmp) = make_catalog();
        insert(&catalog, make_photo("a.jpg", "aaa"));
        let dup = make_photo("a.jpg", "bbb");
        let err = catalog
            .queue()
            .submit_sync(move |conn| insert_photo(conn, &dup, 1))
            .unwrap_err();
        assert!(matches!(err, Error::Database(_)));
    }

    #[test]
    fn test_checksum_predicates() {
        let (catalog, _tmp) = make_catalog();
        let mut photo = make_photo("a.jpg", "aaa");
        photo.pre_checksum = "pre".to_string();
        insert(&catalog, photo);

        assert!(catalog.read(|c| checksum_exists(c, "aaa")).unwrap());
        assert!(!catalog.read(|c| checksum_exists(c, "zzz")).unwrap());
        assert!(catalog.read(|c| pre_checksum_exists(c, "pre")).unwrap());
        assert!(!catalog.read(|c| pre_checksum_exists(c, "nope")).unwrap());
    }

    #[test]
    fn test_update_missing_row_is_not_found() {
        let (catalog, _tmp) = make_catalog();
        let id = insert(&catalog, make_photo("a.jpg", "aaa"));
        let mut photo = catalog.read(|c| find_by_id(c, id)).unwrap().unwrap();
        photo.id = 999;
        let err = catalog
            .queue()
            .submit_sync(move |conn| update_photo(conn, &photo, 2))
            .unwrap_err();
        assert!(err.is_not_found());
    }

    #[test]
    fn test_snapshot_contains_every_row() {
        let (catalog, _tmp) = make_catalog();
        insert(&catalog, make_photo("a.jpg", "aaa"));
        let mut live = make_photo("b.heic", "bbb");
        live.photo_type = PhotoType::LivePhoto;
        live.live_photo_video_path = "b.mov".to_string();
        insert(&catalog, live);

        let map = catalog.read(snapshot).unwrap();
        assert_eq!(map.len(), 2);
        assert_eq!(map["a.jpg"].checksum, "aaa");
        assert_eq!(map["b.heic"].photo_type, PhotoType::LivePhoto);
        assert_eq!(map["b.heic"].live_photo_video_path, "b.mov");
    }

    #[test]
    fn test_reads_see_committed_writes() {
        let (catalog, _tmp) = make_catalog();
        assert_eq!(catalog.read(count_photos).unwrap(), 0);
        insert(&catalog, make_photo("a.jpg", "aaa"));
        insert(&catalog, make_photo("b.jpg", "bbb"));
        assert_eq!(catalog.read(count_photos).unwrap(), 2);
    }

    // ── Schema versioning ───────────────────────────────────────

    #[test]
    fn test_schema_version_set_on_fresh_db() {
        let tmp = tempfile::tempdir().unwrap();
        let db_path = tmp.path().join("master.db");
        let _catalog = Catalog::open(&db_path, 8).unwrap();

        let conn = Connection::open(&db_path).unwrap();
        assert_eq!(schema::version(&conn).unwrap(), Some(schema::CURRENT_VERSION));
    }

    #[test]
    fn test_schema_version_persists_across_reopen() {
        let tmp = tempfile::tempdir().unwrap();
        let db_path = tmp.path().join("master.db");
        {
            let catalog = Catalog::open(&db_path, 8).unwrap();
            insert(&catalog, make_photo("a.jpg", "aaa"));
        }
        let catalog = Catalog::open(&db_path, 8).unwrap();
        assert_eq!(catalog.read(count_photos).unwrap(), 1);
    }

    #[test]
    fn test_version_one_db_is_upgraded() {
        let tmp = tempfile::tempdir().unwrap();
        let db_path = tmp.path().join("master.db");
        {
            let conn = Connection::open(&db_path).unwrap();
            schema::initialize(&conn).unwrap();
            conn.execute("INSERT INTO migrator (id, version_code) VALUES (1, 1)", [])
                .unwrap();
        }

        let catalog = Catalog::open(&db_path, 8).unwrap();
        assert_eq!(catalog.read(count_photos).unwrap(), 0);
        let conn = Connection::open(&db_path).unwrap();
        assert_eq!(schema::version(&conn).unwrap(), Some(2));
    }

    #[test]
    fn test_reject_future_schema_version() {
        let tmp = tempfile::tempdir().unwrap();
        let db_path = tmp.path().join("master.db");
        {
            let conn = Connection::open(&db_path).unwrap();
            schema::initialize(&conn).unwrap();
            conn.execute("INSERT INTO migrator (id, version_code) VALUES (1, 99)", [])
                .unwrap();
        }

        let err = Catalog::open(&db_path, 8).err().unwrap();
        assert!(matches!(
            err,
            Error::UnsupportedSchemaVersion {
                found: 99,
                supported: 2
            }
        ));
    }
}
