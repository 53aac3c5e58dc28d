//! Source resolution: find `<Name>.<ext>` in the input directory.
//!
//! A missing source is a document-local failure. As a diagnostic aid the
//! current contents of the input directory are logged, since the usual cause
//! is a build started from the wrong working directory or a misspelt name.

use crate::error::DocumentError;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// A document's source text, read from disk.
#[derive(Debug, Clone)]
pub struct SourceDocument {
    pub name: String,
    pub path: PathBuf,
    pub text: String,
}

/// Resolve and read the source of document `name`.
pub fn resolve_source(
    input_dir: &Path,
    name: &str,
    extension: &str,
) -> Result<SourceDocument, DocumentError> {
    let path = input_dir.join(format!("{name}.{extension}"));

    if !path.is_file() {
        log_directory_listing(input_dir);
        return Err(DocumentError::SourceNotFound {
            document: name.to_string(),
            path,
        });
    }

    let text = std::fs::read_to_string(&path).map_err(|e| DocumentError::SourceUnreadable {
        document: name.to_string(),
        path: path.clone(),
        detail: e.to_string(),
    })?;

    debug!("Resolved source: {} ({} bytes)", path.display(), text.len());
    Ok(SourceDocument {
        name: name.to_string(),
        path,
        text,
    })
}

fn log_directory_listing(dir: &Path) {
    match list_directory(dir) {
        Ok(entries) => info!("{}: {:?}", dir.display(), entries),
        Err(e) => info!("{}: cannot list directory: {}", dir.display(), e),
    }
}

/// Sorted entry names of `dir`.
pub fn list_directory(dir: &Path) -> std::io::Result<Vec<String>> {
    let mut names = std::fs::read_dir(dir)?
        .filter_map(Result::ok)
        .map(|e| e.file_name().to_string_lossy().into_owned())
        .collect::<Vec<_>>();
    names.sort();
    Ok(names)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reads_existing_source() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("Course.adoc"), "= Course\n").unwrap();

        let src = resolve_source(dir.path(), "Course", "adoc").unwrap();
        assert_eq!(src.name, "Course");
        assert_eq!(src.text, "= Course\n");
        assert_eq!(src.path, dir.path().join("Course.adoc"));
    }

    #[test]
    fn missing_source_is_reported_with_path() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("Ex1.adoc"), "= Ex1\n").unwrap();

        let err = resolve_source(dir.path(), "Ex2", "adoc").unwrap_err();
        assert_eq!(
            err,
            DocumentError::SourceNotFound {
                document: "Ex2".into(),
                path: dir.path().join("Ex2.adoc"),
            }
        );
    }

    #[test]
    fn missing_input_directory_is_a_missing_source() {
        let err = resolve_source(Path::new("/no/such/dir"), "Ex1", "adoc").unwrap_err();
        assert!(matches!(err, DocumentError::SourceNotFound { .. }));
    }

    #[test]
    fn directory_named_like_source_is_not_a_source() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir(dir.path().join("Sol1.adoc")).unwrap();
        let err = resolve_source(dir.path(), "Sol1", "adoc").unwrap_err();
        assert!(matches!(err, DocumentError::SourceNotFound { .. }));
    }

    #[test]
    fn non_utf8_source_is_unreadable() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("Bad.adoc"), [0xff, 0xfe, 0x00]).unwrap();
        let err = resolve_source(dir.path(), "Bad", "adoc").unwrap_err();
        assert!(matches!(err, DocumentError::SourceUnreadable { .. }));
    }

    #[test]
    fn listing_is_sorted() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("b.adoc"), "").unwrap();
        std::fs::write(dir.path().join("a.adoc"), "").unwrap();
        assert_eq!(list_directory(dir.path()).unwrap(), vec!["a.adoc", "b.adoc"]);
    }
}
