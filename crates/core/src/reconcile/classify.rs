use std::collections::HashMap;
use std::path::Path;

use crate::domain::PhotoType;

const IMAGE_EXTENSIONS: &[&str] = &["jpg", "jpeg", "png", "gif", "bmp", "webp", "heic", "heif"];
const VIDEO_EXTENSIONS: &[&str] = &["mp4", "avi", "mov", "mkv", "wmv", "flv", "webm"];

/// Companion video extensions probed next to a still image, in preference order.
const LIVE_VIDEO_EXTENSIONS: &[&str] = &["mov", "mp4"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MediaKind {
    Image,
    Video,
}

impl MediaKind {
    /// Kind by extension, case-insensitive. `None` for anything else.
    pub fn of(path: &str) -> Option<Self> {
        let ext = Path::new(path).extension()?.to_str()?.to_ascii_lowercase();
        if IMAGE_EXTENSIONS.contains(&ext.as_str()) {
            Some(MediaKind::Image)
        } else if VIDEO_EXTENSIONS.contains(&ext.as_str()) {
            Some(MediaKind::Video)
        } else {
            None
        }
    }
}

/// What a file on disk should be recorded as.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Classification {
    pub photo_type: PhotoType,
    /// Root-relative path of the paired video, empty unless `LivePhoto`.
    pub live_photo_video_path: String,
}

/// Root-relative files grouped by extension-less path.
///
/// Stems compare exactly; extensions compare ignoring ASCII case, so
/// `IMG_1.Heic` finds `IMG_1.mov` and `IMG_1.MOV` alike.
#[derive(Debug, Default)]
pub struct SiblingIndex {
    by_stem: HashMap<String, Vec<String>>,
}

impl SiblingIndex {
    pub fn insert(&mut self, rel_path: &str) {
        if let Some((stem, ext)) = split_extension(rel_path) {
            self.by_stem
                .entry(stem.to_string())
                .or_default()
                .push(ext.to_string());
        }
    }

    /// Path of the first `stem.<ext>` on record, trying `extensions` in order.
    pub fn find(&self, stem: &str, extensions: &[&str]) -> Option<String> {
        let present = self.by_stem.get(stem)?;
        extensions
            .iter()
            .find_map(|wanted| present.iter().find(|ext| ext.eq_ignore_ascii_case(wanted)))
            .map(|ext| format!("{stem}.{ext}"))
    }
}

impl<'a> FromIterator<&'a str> for SiblingIndex {
    fn from_iter<I: IntoIterator<Item = &'a str>>(iter: I) -> Self {
        let mut index = SiblingIndex::default();
        for rel_path in iter {
            index.insert(rel_path);
        }
        index
    }
}

/// Classify a root-relative path against the files around it.
///
/// An image with a same-stem `.mov`/`.mp4` sibling is a live photo pointing at
/// that video. A video with a same-stem image sibling is the second half of
/// such a pair and is recorded as a live photo with no link of its own. A lone
/// image is `Normal`, a lone video `Video`.
pub fn classify(rel_path: &str, siblings: &SiblingIndex) -> Option<Classification> {
    let kind = MediaKind::of(rel_path)?;
    let (stem, _) = split_extension(rel_path)?;

    let classification = match kind {
        MediaKind::Image => match siblings.find(stem, LIVE_VIDEO_EXTENSIONS) {
            Some(video) => Classification {
                photo_type: PhotoType::LivePhoto,
                live_photo_video_path: video,
            },
            None => Classification {
                photo_type: PhotoType::Normal,
                live_photo_video_path: String::new(),
            },
        },
        MediaKind::Video => Classification {
            photo_type: if siblings.find(stem, IMAGE_EXTENSIONS).is_some() {
                PhotoType::LivePhoto
            } else {
                PhotoType::Video
            },
            live_photo_video_path: String::new(),
        },
    };
    Some(classification)
}

fn split_extension(path: &str) -> Option<(&str, &str)> {
    let dot = path.rfind('.')?;
    let ext = &path[dot + 1..];
    if ext.contains('/') {
        return None;
    }
    Some((&path[..dot], ext))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn index(files: &[&str]) -> SiblingIndex {
        files.iter().copied().collect()
    }

    #[test]
    fn test_media_kind_by_extension() {
        assert_eq!(MediaKind::of("a/b.JPG"), Some(MediaKind::Image));
        assert_eq!(MediaKind::of("b.heif"), Some(MediaKind::Image));
        assert_eq!(MediaKind::of("b.WebM"), Some(MediaKind::Video));
        assert_eq!(MediaKind::of("notes.txt"), None);
        assert_eq!(MediaKind::of("a.jpg.uploading"), None);
        assert_eq!(MediaKind::of("README"), None);
    }

    #[test]
    fn test_lone_image_is_normal() {
        let c = classify("2025/a.jpg", &index(&["2025/a.jpg"])).unwrap();
        assert_eq!(c.photo_type, PhotoType::Normal);
        assert!(c.live_photo_video_path.is_empty());
    }

    #[test]
    fn test_lone_video_is_video() {
        let c = classify("clip.mp4", &index(&["clip.mp4"])).unwrap();
        assert_eq!(c.photo_type, PhotoType::Video);
    }

    #[test]
    fn test_image_with_video_sibling_is_live() {
        let files = ["2025/IMG_1.heic", "2025/IMG_1.MOV"];
        let c = classify("2025/IMG_1.heic", &index(&files)).unwrap();
        assert_eq!(c.photo_type, PhotoType::LivePhoto);
        assert_eq!(c.live_photo_video_path, "2025/IMG_1.MOV");
    }

    #[test]
    fn test_video_with_image_sibling_is_live_without_link() {
        let files = ["IMG_1.HEIC", "IMG_1.mov"];
        let c = classify("IMG_1.mov", &index(&files)).unwrap();
        assert_eq!(c.photo_type, PhotoType::LivePhoto);
        assert!(c.live_photo_video_path.is_empty());
    }

    #[test]
    fn test_pairing_ignores_mixed_case_extensions() {
        let files = ["IMG_1.heic", "IMG_1.Mov", "IMG_2.Heic", "IMG_2.mp4"];
        let siblings = index(&files);

        let c = classify("IMG_1.heic", &siblings).unwrap();
        assert_eq!(c.photo_type, PhotoType::LivePhoto);
        assert_eq!(c.live_photo_video_path, "IMG_1.Mov");
        assert_eq!(
            classify("IMG_1.Mov", &siblings).unwrap().photo_type,
            PhotoType::LivePhoto
        );

        let c = classify("IMG_2.Heic", &siblings).unwrap();
        assert_eq!(c.live_photo_video_path, "IMG_2.mp4");
        assert_eq!(
            classify("IMG_2.mp4", &siblings).unwrap().photo_type,
            PhotoType::LivePhoto
        );
    }

    #[test]
    fn test_stems_must_match_exactly() {
        let siblings = index(&["img_1.heic", "IMG_1.mov", "2024/IMG_1.heic"]);
        assert_eq!(
            classify("img_1.heic", &siblings).unwrap().photo_type,
            PhotoType::Normal
        );
        assert_eq!(
            classify("IMG_1.mov", &siblings).unwrap().photo_type,
            PhotoType::Video
        );
    }

    #[test]
    fn test_mov_preferred_over_mp4() {
        let siblings = index(&["a.jpg", "a.mp4", "a.MOV"]);
        assert_eq!(classify("a.jpg", &siblings).unwrap().live_photo_video_path, "a.MOV");
    }

    #[test]
    fn test_unsupported_is_skipped() {
        assert!(classify("a.txt", &index(&["a.txt", "a.mov"])).is_none());
    }

    #[test]
    fn test_split_extension_ignores_dots_in_directories() {
        assert_eq!(split_extension("a.b/c"), None);
        assert_eq!(split_extension("a.b/c.jpg"), Some(("a.b/c", "jpg")));
        assert_eq!(split_extension("IMG_1.Mov"), Some(("IMG_1", "Mov")));
    }
}
