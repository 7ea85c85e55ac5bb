use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use std::path::Path;

use sha2::{Digest, Sha256};

/// Offset of the pre-checksum window in files large enough to contain it.
pub const PRE_CHECKSUM_OFFSET: u64 = 64 * 1024;
/// Length of the pre-checksum window.
pub const PRE_CHECKSUM_WINDOW: u64 = 1024;

/// Compute the SHA-256 hash of a file's contents using streaming I/O.
/// Reads in 64KB chunks to avoid loading large files entirely into memory.
pub fn compute_sha256(path: &Path) -> std::io::Result<String> {
    let file = File::open(path)?;
    let mut reader = std::io::BufReader::with_capacity(64 * 1024, file);
    let mut hasher = Sha256::new();
    let mut buf = [0u8; 64 * 1024];

    loop {
        let n = reader.read(&mut buf)?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }

    Ok(format!("{:x}", hasher.finalize()))
}

/// SHA-256 of an in-memory payload, lowercase hex.
pub fn sha256_bytes(data: &[u8]) -> String {
    format!("{:x}", Sha256::digest(data))
}

/// Cheap partial digest used as a dedup pre-filter.
///
/// Hashes the 1KB window starting at 64KB. Files shorter than 65KB hash their
/// last `min(size, 1KB)` bytes instead, so every file (even an empty one) gets
/// a well-defined value.
pub fn compute_pre_checksum(path: &Path) -> std::io::Result<String> {
    let mut file = File::open(path)?;
    let size = file.metadata()?.len();

    let (start, len) = if size >= PRE_CHECKSUM_OFFSET + PRE_CHECKSUM_WINDOW {
        (PRE_CHECKSUM_OFFSET, PRE_CHECKSUM_WINDOW)
    } else {
        let len = size.min(PRE_CHECKSUM_WINDOW);
        (size - len, len)
    };

    file.seek(SeekFrom::Start(start))?;
    let mut buf = Vec::with_capacity(len as usize);
    file.take(len).read_to_end(&mut buf)?;
    Ok(sha256_bytes(&buf))
}

/// Compare two hex digests, ignoring case and surrounding whitespace.
pub fn digests_match(expected: &str, actual: &str) -> bool {
    expected.trim().eq_ignore_ascii_case(actual.trim())
}
