//! Artifact output.
//!
//! Artifacts are written atomically: the bytes go to a temporary file in the
//! target directory, which is then renamed over `<dir>/<file_name>`. A failed
//! or interrupted write never leaves a truncated artifact behind.

use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Write `bytes` to `dir/file_name`, creating `dir` if needed.
///
/// Returns the final path.
pub fn write_artifact(dir: &Path, file_name: &str, bytes: &[u8]) -> std::io::Result<PathBuf> {
    std::fs::create_dir_all(dir)?;
    let path = dir.join(file_name);

    let mut tmp = tempfile::NamedTempFile::new_in(dir)?;
    tmp.write_all(bytes)?;
    tmp.flush()?;

    // NamedTempFile is created 0600; artifacts are meant to be published.
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        tmp.as_file()
            .set_permissions(std::fs::Permissions::from_mode(0o644))?;
    }

    tmp.persist(&path).map_err(|e| e.error)?;
    debug!("Wrote {} ({} bytes)", path.display(), bytes.len());
    Ok(path)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn creates_directory_and_file() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("Online Pages");
        let path = write_artifact(&target, "Course.html", b"<html/>").unwrap();
        assert_eq!(path, target.join("Course.html"));
        assert_eq!(std::fs::read(&path).unwrap(), b"<html/>");
    }

    #[test]
    fn overwrites_existing_artifact() {
        let dir = tempfile::tempdir().unwrap();
        write_artifact(dir.path(), "Ex1.html", b"old").unwrap();
        write_artifact(dir.path(), "Ex1.html", b"new").unwrap();
        assert_eq!(std::fs::read(dir.path().join("Ex1.html")).unwrap(), b"new");
        // No temporary files are left behind.
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 1);
    }

    #[cfg(unix)]
    #[test]
    fn artifacts_are_world_readable() {
        use std::os::unix::fs::PermissionsExt;
        let dir = tempfile::tempdir().unwrap();
        let path = write_artifact(dir.path(), "Sol1.pdf", b"%PDF-1.4").unwrap();
        let mode = std::fs::metadata(path).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o644);
    }

    #[test]
    fn unwritable_target_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("not-a-dir");
        std::fs::write(&file, "x").unwrap();
        assert!(write_artifact(&file, "Ex1.html", b"x").is_err());
    }
}
