pub mod frame;
pub mod session;
pub mod transport;

use std::ffi::OsString;
use std::fs::{File, FileTimes};
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

pub use frame::{ChunkHeader, Frame, Reply, ReplyCode};
pub use session::{CloseReason, ConnectionSummary, UploadHandler};
pub use transport::FrameTransport;

use crate::error::{Error, Result};

/// Extension appended to a target while its chunks are still arriving.
pub const TEMP_EXTENSION: &str = "uploading";

/// Where the bytes for `target` accumulate until the transfer completes.
pub fn temp_path_for(target: &Path) -> PathBuf {
    let mut name: OsString = target.as_os_str().to_owned();
    name.push(".");
    name.push(TEMP_EXTENSION);
    PathBuf::from(name)
}

pub fn is_temp_file(path: &Path) -> bool {
    path.extension().is_some_and(|ext| ext == TEMP_EXTENSION)
}

/// Stamp a finished upload with the client's timestamps.
///
/// Sets the modification time to `mtime` and the access time to `ctime`;
/// portable filesystems offer no way to set a creation time. Zero means now.
pub fn set_file_times(path: &Path, mtime: i64, ctime: i64) -> Result<()> {
    let file = File::options().write(true).open(path)?;
    file.set_times(
        FileTimes::new()
            .set_modified(unix_to_system_time(mtime))
            .set_accessed(unix_to_system_time(ctime)),
    )?;
    Ok(())
}

fn unix_to_system_time(secs: i64) -> SystemTime {
    match secs {
        0 => SystemTime::now(),
        s if s > 0 => UNIX_EPOCH + Duration::from_secs(s as u64),
        s => UNIX_EPOCH - Duration::from_secs(s.unsigned_abs()),
    }
}

/// Run blocking work (hashing, store access) off the async executor.
pub(crate) async fn blocking<T, F>(f: F) -> Result<T>
where
    T: Send + 'static,
    F: FnOnce() -> Result<T> + Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| Error::Io(std::io::Error::other(e)))?
}
