use std::path::{Component, Path};

use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::domain::PhotoType;
use crate::error::{Error, Result};

/// One message read from the upload stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    /// A JSON chunk header.
    Text(String),
    /// The raw payload belonging to the preceding header.
    Binary(Vec<u8>),
}

/// Metadata frame sent before every payload frame.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChunkHeader {
    /// Root-relative target path, e.g. `2025/8/25/a.jpg`.
    #[serde(rename = "fileName")]
    pub file_name: String,
    #[serde(rename = "type", default = "default_type")]
    pub photo_type: PhotoType,
    #[serde(default)]
    pub live_photo_video_path: String,
    #[serde(default)]
    pub mtime: i64,
    #[serde(default)]
    pub ctime: i64,
    #[serde(rename = "fileUri", default)]
    pub file_uri: String,
    #[serde(default)]
    pub size: i64,
    #[serde(rename = "chunkIndex")]
    pub chunk_index: u32,
    #[serde(rename = "chunkCount")]
    pub chunk_count: u32,
    /// SHA-256 of this chunk's payload.
    #[serde(rename = "chunkHash", default, skip_serializing_if = "Option::is_none")]
    pub chunk_hash: Option<String>,
    /// SHA-256 of the whole file, when the client already knows it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub checksum: Option<String>,
}

fn default_type() -> PhotoType {
    PhotoType::Normal
}

impl ChunkHeader {
    /// Decode and validate a metadata frame.
    pub fn parse(text: &str) -> Result<Self> {
        let header: ChunkHeader = serde_json::from_str(text)?;
        if header.chunk_count == 0 {
            return Err(Error::ProtocolViolation("chunkCount must be positive".to_string()));
        }
        if header.chunk_index >= header.chunk_count {
            return Err(Error::ProtocolViolation(format!(
                "chunkIndex {} out of range for chunkCount {}",
                header.chunk_index, header.chunk_count
            )));
        }
        header.relative_path()?;
        Ok(header)
    }

    pub fn is_first(&self) -> bool {
        self.chunk_index == 0
    }

    pub fn is_last(&self) -> bool {
        self.chunk_index + 1 == self.chunk_count
    }

    pub fn chunk_digest(&self) -> Option<&str> {
        non_blank(self.chunk_hash.as_deref())
    }

    pub fn file_checksum(&self) -> Option<&str> {
        non_blank(self.checksum.as_deref())
    }

    /// The target path with separators normalized to `/`.
    ///
    /// Rejects absolute paths after the leading separator is stripped, `..`
    /// components, and names with nothing left in them.
    pub fn relative_path(&self) -> Result<String> {
        relative_path(&self.file_name)
    }
}

pub(crate) fn relative_path(raw: &str) -> Result<String> {
    let trimmed = raw.trim_start_matches(['/', '\\']);
    let mut parts = Vec::new();
    for component in Path::new(trimmed).components() {
        match component {
            Component::Normal(part) => parts.push(part.to_string_lossy().into_owned()),
            Component::CurDir => {}
            Component::ParentDir | Component::RootDir | Component::Prefix(_) => {
                return Err(Error::InvalidPath(raw.to_string()));
            }
        }
    }
    if parts.is_empty() {
        return Err(Error::InvalidPath(raw.to_string()));
    }
    Ok(parts.join("/"))
}

fn non_blank(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|v| !v.is_empty())
}

/// Status code carried by every reply.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(into = "u8")]
pub enum ReplyCode {
    Success,
    /// Recoverable; the client should resend the named chunk.
    BadRequest,
    /// Fatal; the server closes the connection after sending it.
    TerminalConnection,
}

impl From<ReplyCode> for u8 {
    fn from(code: ReplyCode) -> u8 {
        match code {
            ReplyCode::Success => 0,
            ReplyCode::BadRequest => 1,
            ReplyCode::TerminalConnection => 3,
        }
    }
}

/// Structured response written back to the client.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Reply {
    pub code: ReplyCode,
    pub message: String,
    pub data: serde_json::Value,
}

impl Reply {
    pub fn completed(file_name: &str) -> Self {
        Self {
            code: ReplyCode::Success,
            message: "upload complete".to_string(),
            data: json!({ "path": file_name }),
        }
    }

    pub fn chunk_rejected(index: u32) -> Self {
        Self {
            code: ReplyCode::BadRequest,
            message: "chunk checksum mismatch".to_string(),
            data: json!({ "index": index }),
        }
    }

    pub fn terminal(message: impl Into<String>) -> Self {
        Self {
            code: ReplyCode::TerminalConnection,
            message: message.into(),
            data: serde_json::Value::Null,
        }
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }
}
