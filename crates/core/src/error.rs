#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("walkdir error: {0}")]
    WalkDir(#[from] walkdir::Error),

    #[error("malformed JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("chunk {index} failed verification: expected {expected}, got {actual}")]
    IntegrityMismatch {
        index: u32,
        expected: String,
        actual: String,
    },

    #[error("protocol violation: {0}")]
    ProtocolViolation(String),

    #[error("invalid upload path: {0}")]
    InvalidPath(String),

    #[error("queued write failed: {0}")]
    StoreWrite(String),

    #[error("write queue is closed")]
    QueueClosed,

    #[error("timed out waiting for the next frame")]
    Timeout,

    #[error("transport error: {0}")]
    Transport(String),

    #[error("database schema version {found} is newer than supported version {supported}")]
    UnsupportedSchemaVersion { found: i64, supported: i64 },
}

impl Error {
    /// Whether this error means "no such record or file".
    pub fn is_not_found(&self) -> bool {
        match self {
            Error::NotFound(_) => true,
            Error::Io(e) => e.kind() == std::io::ErrorKind::NotFound,
            _ => false,
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
