use rusqlite::{params, Connection, OptionalExtension};

use crate::error::{Error, Result};

/// Newest schema version this build knows how to use.
pub const CURRENT_VERSION: i64 = 2;

/// Create the version marker table if it is missing.
pub fn initialize(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS migrator (
            id           INTEGER PRIMARY KEY,
            version_code INTEGER NOT NULL
        );
        ",
    )?;
    Ok(())
}

/// Read the recorded schema version, if any.
pub fn version(conn: &Connection) -> Result<Option<i64>> {
    let version = conn
        .query_row("SELECT version_code FROM migrator WHERE id = 1", [], |row| {
            row.get(0)
        })
        .optional()?;
    Ok(version)
}

/// Bring the database up to `CURRENT_VERSION`, one step at a time.
pub fn migrate(conn: &Connection) -> Result<()> {
    let mut current = match version(conn)? {
        Some(v) => v,
        None => {
            conn.execute(
                "INSERT INTO migrator (id, version_code) VALUES (1, 1)",
                [],
            )?;
            tracing::info!("initialized schema version table");
            1
        }
    };

    if current > CURRENT_VERSION {
        return Err(Error::UnsupportedSchemaVersion {
            found: current,
            supported: CURRENT_VERSION,
        });
    }

    while current < CURRENT_VERSION {
        apply(conn, current)?;
        current += 1;
        conn.execute(
            "UPDATE migrator SET version_code = ?1 WHERE id = 1",
            params![current],
        )?;
        tracing::info!(version = current, "schema migrated");
    }

    Ok(())
}

fn apply(conn: &Connection, from: i64) -> Result<()> {
    if from == 1 {
        conn.execute_batch(
            "
            CREATE TABLE IF NOT EXISTS photos (
                id                    INTEGER PRIMARY KEY AUTOINCREMENT,
                name                  TEXT NOT NULL,
                path                  TEXT NOT NULL UNIQUE,
                size                  INTEGER NOT NULL,
                type                  INTEGER NOT NULL,
                live_photo_video_path TEXT NOT NULL DEFAULT '',
                file_uri              TEXT NOT NULL DEFAULT '',
                mtime                 INTEGER NOT NULL,
                ctime                 INTEGER NOT NULL,
                pre_checksum          TEXT NOT NULL DEFAULT '',
                checksum              TEXT NOT NULL DEFAULT '',
                source_id             INTEGER NOT NULL DEFAULT 0,
                created_at            INTEGER NOT NULL,
                updated_at            INTEGER NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_photos_checksum ON photos(checksum);
            CREATE INDEX IF NOT EXISTS idx_photos_pre_checksum ON photos(pre_checksum);
            CREATE INDEX IF NOT EXISTS idx_photos_file_uri ON photos(file_uri);
            CREATE INDEX IF NOT EXISTS idx_photos_source ON photos(source_id);
            CREATE INDEX IF NOT EXISTS idx_photos_listing ON photos(source_id, mtime);
            ",
        )?;
    }
    Ok(())
}
