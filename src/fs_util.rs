use std::fs;
use std::io::Write;

use camino::Utf8Path;
use tempfile::NamedTempFile;

use crate::error::FetchError;

/// Writes `content` next to `path` and renames it into place.
pub fn write_bytes_atomic(path: &Utf8Path, content: &[u8]) -> Result<(), FetchError> {
    let mut temp = temp_file_beside(path)?;
    temp.write_all(content)
        .map_err(|err| FetchError::Filesystem(err.to_string()))?;
    temp.flush()
        .map_err(|err| FetchError::Filesystem(err.to_string()))?;
    persist(temp, path)
}

/// Creates a temp file in the destination's directory so the final rename stays on one filesystem.
pub fn temp_file_beside(path: &Utf8Path) -> Result<NamedTempFile, FetchError> {
    let parent = path
        .parent()
        .filter(|parent| !parent.as_str().is_empty())
        .unwrap_or(Utf8Path::new("."));
    fs::create_dir_all(parent.as_std_path())
        .map_err(|err| FetchError::Filesystem(format!("create {parent}: {err}")))?;
    tempfile::Builder::new()
        .prefix(".paystub-fetch")
        .tempfile_in(parent.as_std_path())
        .map_err(|err| FetchError::Filesystem(err.to_string()))
}

pub fn persist(temp: NamedTempFile, path: &Utf8Path) -> Result<(), FetchError> {
    temp.persist(path.as_std_path())
        .map_err(|err| FetchError::Filesystem(format!("persist {path}: {}", err.error)))?;
    Ok(())
}
