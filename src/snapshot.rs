//! Whole-file JSON snapshots.
//!
//! The similarity index and the conversation history each persist to one
//! JSON file that is rewritten wholesale on every save and read wholesale
//! on start. Writes go to a sibling temp file that is then renamed over the
//! target, so a crash mid-write leaves the previous snapshot intact.

use serde::de::DeserializeOwned;
use serde::Serialize;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

/// Why a snapshot could not be read or written.
#[derive(Debug)]
pub enum SnapshotError {
    /// No snapshot exists yet. Expected on first start.
    NotFound(PathBuf),
    /// The file exists but does not hold the expected records.
    Corrupt { path: PathBuf, reason: String },
    /// Permission or other filesystem failure.
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
}

impl std::fmt::Display for SnapshotError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SnapshotError::NotFound(path) => write!(f, "snapshot not found: {}", path.display()),
            SnapshotError::Corrupt { path, reason } => {
                write!(f, "corrupt snapshot {}: {}", path.display(), reason)
            }
            SnapshotError::Io { path, source } => {
                write!(f, "snapshot I/O error on {}: {}", path.display(), source)
            }
        }
    }
}

impl std::error::Error for SnapshotError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            SnapshotError::Io { source, .. } => Some(source),
            _ => None,
        }
    }
}

fn io_error(path: &Path, source: std::io::Error) -> SnapshotError {
    if source.kind() == ErrorKind::NotFound {
        SnapshotError::NotFound(path.to_path_buf())
    } else {
        SnapshotError::Io {
            path: path.to_path_buf(),
            source,
        }
    }
}

/// Read and deserialize a snapshot.
pub fn read_json<T: DeserializeOwned>(path: &Path) -> Result<T, SnapshotError> {
    let content = std::fs::read_to_string(path).map_err(|e| match e.kind() {
        // Non-UTF-8 content is a corrupt file, not an I/O fault.
        ErrorKind::InvalidData => SnapshotError::Corrupt {
            path: path.to_path_buf(),
            reason: e.to_string(),
        },
        _ => io_error(path, e),
    })?;

    serde_json::from_str(&content).map_err(|e| SnapshotError::Corrupt {
        path: path.to_path_buf(),
        reason: e.to_string(),
    })
}

/// Serialize `value` and atomically replace the snapshot at `path`.
pub fn write_json<T: Serialize + ?Sized>(
    path: &Path,
    value: &T,
    pretty: bool,
) -> Result<(), SnapshotError> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent).map_err(|e| SnapshotError::Io {
                path: parent.to_path_buf(),
                source: e,
            })?;
        }
    }

    let encoded = if pretty {
        serde_json::to_vec_pretty(value)
    } else {
        serde_json::to_vec(value)
    }
    .map_err(|e| SnapshotError::Corrupt {
        path: path.to_path_buf(),
        reason: e.to_string(),
    })?;

    let tmp = temp_path(path);
    std::fs::write(&tmp, encoded).map_err(|e| SnapshotError::Io {
        path: tmp.clone(),
        source: e,
    })?;
    std::fs::rename(&tmp, path).map_err(|e| SnapshotError::Io {
        path: path.to_path_buf(),
        source: e,
    })
}

/// Delete a snapshot. A missing file is not an error.
pub fn remove(path: &Path) -> Result<(), SnapshotError> {
    match std::fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
        Err(e) => Err(SnapshotError::Io {
            path: path.to_path_buf(),
            source: e,
        }),
    }
}

fn temp_path(path: &Path) -> PathBuf {
    let mut name = path
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_default();
    name.push(".tmp");
    path.with_file_name(name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn missing_file_is_not_found() {
        let tmp = TempDir::new().unwrap();
        let err = read_json::<Vec<u32>>(&tmp.path().join("nope.json")).unwrap_err();
        assert!(matches!(err, SnapshotError::NotFound(_)));
    }

    #[test]
    fn garbage_is_corrupt() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("bad.json");
        std::fs::write(&path, "{not json").unwrap();
        let err = read_json::<Vec<u32>>(&path).unwrap_err();
        assert!(matches!(err, SnapshotError::Corrupt { .. }));
    }

    #[test]
    fn wrong_shape_is_corrupt() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("shape.json");
        std::fs::write(&path, r#"{"a": 1}"#).unwrap();
        let err = read_json::<Vec<u32>>(&path).unwrap_err();
        assert!(matches!(err, SnapshotError::Corrupt { .. }));
    }

    #[test]
    fn directory_in_place_of_file_is_io() {
        let tmp = TempDir::new().unwrap();
        let err = read_json::<Vec<u32>>(tmp.path()).unwrap_err();
        assert!(matches!(err, SnapshotError::Io { .. }));
    }

    #[test]
    fn write_creates_parents_and_leaves_no_temp_file() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("nested/dir/data.json");
        write_json(&path, &vec![1u32, 2, 3], false).unwrap();
        assert_eq!(read_json::<Vec<u32>>(&path).unwrap(), vec![1, 2, 3]);
        assert!(!tmp.path().join("nested/dir/data.json.tmp").exists());
    }

    #[test]
    fn remove_missing_is_ok() {
        let tmp = TempDir::new().unwrap();
        assert!(remove(&tmp.path().join("absent.json")).is_ok());
    }
}
