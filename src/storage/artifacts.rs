//! Write-once JSON artifact files.
//!
//! Outputs are staged in a temporary sibling, synced, made read-only and then
//! hard-linked into place. Linking fails if the target exists, so an artifact
//! is never overwritten and never observable half-written.

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use std::fs::{self, File, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

use crate::core::errors::{CustodyError, CustodyResult};

/// Refuse early if `path` already exists.
pub fn ensure_absent(path: &Path) -> CustodyResult<()> {
    match fs::symlink_metadata(path) {
        Ok(_) => Err(CustodyError::ArtifactExists(path.to_path_buf())),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
        Err(e) => Err(CustodyError::Io(e)),
    }
}

/// Read and parse a JSON artifact.
pub fn read_json<T: DeserializeOwned>(path: &Path) -> CustodyResult<T> {
    let data = fs::read_to_string(path)?;
    serde_json::from_str(&data)
        .map_err(|e| CustodyError::ValidationError(format!("{}: {}", path.display(), e)))
}

/// Read a JSON artifact without imposing a schema.
pub fn read_value(path: &Path) -> CustodyResult<Value> {
    read_json(path)
}

/// Create `path` holding `value` as pretty JSON, mode 0444.
///
/// Fails with `ArtifactExists` if the target is present, even when it
/// appeared after [`ensure_absent`] was checked.
pub fn write_new<T: Serialize + ?Sized>(path: &Path, value: &T) -> CustodyResult<()> {
    let mut data = serde_json::to_vec_pretty(value)?;
    data.push(b'\n');

    let tmp = temp_sibling(path)?;
    let result = stage_and_link(&tmp, path, &data);
    if let Err(e) = fs::remove_file(&tmp) {
        if e.kind() != ErrorKind::NotFound {
            warn!(path = %tmp.display(), error = %e, "failed to remove staging file");
        }
    }
    result?;

    info!(path = %path.display(), bytes = data.len(), "wrote artifact");
    Ok(())
}

fn temp_sibling(path: &Path) -> CustodyResult<PathBuf> {
    let name = path
        .file_name()
        .and_then(|n| n.to_str())
        .ok_or_else(|| CustodyError::ValidationError(format!("invalid output path {}", path.display())))?;
    let tmp_name = format!(".{}.{}.tmp", name, uuid::Uuid::new_v4().simple());
    Ok(match path.parent() {
        Some(dir) => dir.join(tmp_name),
        None => PathBuf::from(tmp_name),
    })
}

fn stage_and_link(tmp: &Path, target: &Path, data: &[u8]) -> CustodyResult<()> {
    {
        let mut file: File = OpenOptions::new().write(true).create_new(true).open(tmp)?;
        file.write_all(data)?;
        file.sync_all()?;
    }
    set_read_only(tmp)?;

    match fs::hard_link(tmp, target) {
        Ok(()) => {
            debug!(target = %target.display(), "linked artifact into place");
            Ok(())
        }
        Err(e) if e.kind() == ErrorKind::AlreadyExists => {
            Err(CustodyError::ArtifactExists(target.to_path_buf()))
        }
        Err(e) => Err(CustodyError::Io(e)),
    }
}

#[cfg(unix)]
fn set_read_only(path: &Path) -> CustodyResult<()> {
    use std::os::unix::fs::PermissionsExt;
    fs::set_permissions(path, fs::Permissions::from_mode(0o444))?;
    Ok(())
}

#[cfg(not(unix))]
fn set_read_only(path: &Path) -> CustodyResult<()> {
    let mut perms = fs::metadata(path)?.permissions();
    perms.set_readonly(true);
    fs::set_permissions(path, perms)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::tempdir;

    #[test]
    fn test_write_new_creates_read_only_pretty_json() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("wallet-a.json");
        write_new(&path, &json!({ "label": "a" })).unwrap();

        let text = fs::read_to_string(&path).unwrap();
        assert!(text.contains("\n  \"label\": \"a\""));
        assert!(fs::metadata(&path).unwrap().permissions().readonly());

        let leftovers: Vec<_> = fs::read_dir(dir.path())
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_name().to_string_lossy().ends_with(".tmp"))
            .collect();
        assert!(leftovers.is_empty());
    }

    #[test]
    fn test_write_new_refuses_existing_target() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("signed-a.json");
        fs::write(&path, b"original").unwrap();

        let err = write_new(&path, &json!({ "tx": "new" })).unwrap_err();
        assert!(matches!(err, CustodyError::ArtifactExists(ref p) if p == &path));
        assert_eq!(fs::read(&path).unwrap(), b"original");
        assert_eq!(fs::read_dir(dir.path()).unwrap().count(), 1);
    }

    #[test]
    fn test_ensure_absent() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("x.json");
        assert!(ensure_absent(&path).is_ok());
        fs::write(&path, b"{}").unwrap();
        assert!(matches!(ensure_absent(&path), Err(CustodyError::ArtifactExists(_))));
    }

    #[test]
    fn test_read_json_reports_file_on_parse_error() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("broken.json");
        fs::write(&path, b"{ not json").unwrap();
        match read_value(&path) {
            Err(CustodyError::ValidationError(msg)) => assert!(msg.contains("broken.json")),
            other => panic!("unexpected: {:?}", other),
        }
    }
}
