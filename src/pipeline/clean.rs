//! Output-directory cleanup, run once before any document is processed.
//!
//! Only what a build produces is removed: the copied `css/` and `js/`
//! directories and `<Name>.<ext>` for every declared document and every
//! extension the configuration can produce. Anything else in an output
//! directory is left alone.

use crate::error::BuildError;
use std::collections::BTreeSet;
use std::io::ErrorKind;
use std::path::Path;
use tracing::{debug, info};

/// Asset directories copied next to HTML output.
pub const ASSET_DIRS: &[&str] = &["css", "js"];

/// Remove stale build outputs from `dir`.
///
/// Absent entries (and an absent `dir`) are not an error. Returns the
/// number of entries removed.
///
/// # Errors
/// [`BuildError::CleanupFailed`] for any other I/O failure, which aborts the
/// run before a document is touched.
pub fn clean_output_dir<'a>(
    dir: &Path,
    documents: impl IntoIterator<Item = &'a str>,
    extensions: &BTreeSet<String>,
) -> Result<usize, BuildError> {
    if !dir.exists() {
        debug!("Nothing to clean: {} does not exist", dir.display());
        return Ok(0);
    }

    let mut removed = 0;
    for asset in ASSET_DIRS {
        let path = dir.join(asset);
        match std::fs::remove_dir_all(&path) {
            Ok(()) => removed += 1,
            Err(e) if e.kind() == ErrorKind::NotFound => {}
            Err(source) => return Err(BuildError::CleanupFailed { path, source }),
        }
    }

    for name in documents {
        for ext in extensions {
            let path = dir.join(format!("{name}.{ext}"));
            match std::fs::remove_file(&path) {
                Ok(()) => removed += 1,
                Err(e) if e.kind() == ErrorKind::NotFound => {}
                Err(source) => return Err(BuildError::CleanupFailed { path, source }),
            }
        }
    }

    info!("Cleaned {} ({} entries removed)", dir.display(), removed);
    Ok(removed)
}
