//! Crash-safe file replacement.
//!
//! Bytes go to a uniquely named temp file in the target's directory, are
//! flushed to disk, then renamed over the target. A crash at any point
//! leaves either the old or the new complete file behind.

use crate::errors::LicenseResult;
use crate::LicenseError;
use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};

/// Atomically replace `path` with `bytes`.
pub fn write_atomic(path: &Path, bytes: &[u8]) -> LicenseResult<()> {
    write_atomic_with(path, bytes, |_| Ok(()))
}

/// [`write_atomic`] with `before_commit` run once the temp file is durable
/// and before it is renamed over `path`. An error from the hook aborts the
/// replace and leaves `path` untouched.
pub(crate) fn write_atomic_with<F>(path: &Path, bytes: &[u8], before_commit: F) -> LicenseResult<()>
where
    F: FnOnce(&Path) -> std::io::Result<()>,
{
    let temp_path = temp_path_for(path)?;

    let result = (|| -> std::io::Result<()> {
        let mut file = File::create(&temp_path)?;
        file.write_all(bytes)?;
        file.sync_all()?;
        drop(file);
        before_commit(&temp_path)?;
        fs::rename(&temp_path, path)
    })();

    if let Err(e) = result {
        let _ = fs::remove_file(&temp_path);
        return Err(LicenseError::StorageIO(format!(
            "Failed to replace {}: {}",
            path.display(),
            e
        )));
    }

    Ok(())
}

/// Temp file next to `path`, unique per process and call.
fn temp_path_for(path: &Path) -> LicenseResult<PathBuf> {
    let dir = path
        .parent()
        .ok_or_else(|| LicenseError::StorageIO(format!("No parent dir: {}", path.display())))?;
    let name = path
        .file_name()
        .ok_or_else(|| LicenseError::StorageIO(format!("No file name: {}", path.display())))?
        .to_string_lossy();

    Ok(dir.join(format!(
        ".{}.{}.{:08x}.tmp",
        name,
        std::process::id(),
        rand::random::<u32>()
    )))
}
