use std::fmt;

use serde::{Deserialize, Serialize};

/// Classification of an indexed file.
///
/// Stored and transmitted as its numeric code: 1 = normal photo, 2 = video,
/// 3 = live photo (either side of an image/video pair).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(into = "u8", try_from = "u8")]
pub enum PhotoType {
    Normal,
    Video,
    LivePhoto,
}

impl PhotoType {
    pub fn code(self) -> u8 {
        match self {
            PhotoType::Normal => 1,
            PhotoType::Video => 2,
            PhotoType::LivePhoto => 3,
        }
    }

    pub fn from_code(code: i64) -> Option<Self> {
        match code {
            1 => Some(PhotoType::Normal),
            2 => Some(PhotoType::Video),
            3 => Some(PhotoType::LivePhoto),
            _ => None,
        }
    }
}

impl From<PhotoType> for u8 {
    fn from(t: PhotoType) -> u8 {
        t.code()
    }
}

impl TryFrom<u8> for PhotoType {
    type Error = String;

    fn try_from(code: u8) -> Result<Self, Self::Error> {
        PhotoType::from_code(code as i64).ok_or_else(|| format!("unknown photo type {code}"))
    }
}

impl fmt::Display for PhotoType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PhotoType::Normal => write!(f, "normal"),
            PhotoType::Video => write!(f, "video"),
            PhotoType::LivePhoto => write!(f, "live"),
        }
    }
}

/// A row of the `photos` table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Photo {
    pub id: i64,
    pub name: String,
    /// Relative to the storage root, no leading separator.
    pub path: String,
    pub size: i64,
    #[serde(rename = "type")]
    pub photo_type: PhotoType,
    /// Set on the image side of a live photo only.
    pub live_photo_video_path: String,
    #[serde(rename = "fileUri")]
    pub file_uri: String,
    pub mtime: i64,
    pub ctime: i64,
    pub pre_checksum: String,
    pub checksum: String,
    pub source_id: i64,
    pub created_at: i64,
    pub updated_at: i64,
}

/// Field values for a record that has not been inserted yet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewPhoto {
    pub name: String,
    pub path: String,
    pub size: i64,
    pub photo_type: PhotoType,
    pub live_photo_video_path: String,
    pub file_uri: String,
    pub mtime: i64,
    pub ctime: i64,
    pub pre_checksum: String,
    pub checksum: String,
    pub source_id: i64,
}

/// One page of the photo listing plus the total number of listable rows.
#[derive(Debug, Clone, Serialize)]
pub struct PhotoPage {
    pub total: i64,
    pub photos: Vec<Photo>,
}

/// What a reconciliation pass remembers about a record while walking the tree.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SnapshotEntry {
    pub checksum: String,
    pub photo_type: PhotoType,
    pub live_photo_video_path: String,
}
