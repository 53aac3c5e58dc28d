//! Resources compiled into the binary.
//!
//! ```text
//! resources/
//! ├── xsl/          house stylesheets, addressed as
//! │                 https://resources.docbook-build.invalid/xsl/<file>
//! ├── schema/       RELAX NG schema for the relaxng validator
//! └── assets/
//!     ├── css/      copied to <output>/css
//!     └── js/       copied to <output>/js
//! ```
//!
//! Processors cannot read compiled-in bytes, so each run extracts the bundle
//! into a private [`Workspace`] at Init. The workspace also holds the XML
//! catalog that maps bundled and configured URIs onto local files, and is
//! removed when the run ends.

use crate::config::RewriteRule;
use crate::error::BuildError;
use crate::pipeline::resolve::UriResolver;
use include_dir::{include_dir, Dir};
use std::path::{Path, PathBuf};
use tempfile::TempDir;
use tracing::debug;

static BUNDLE: Dir<'static> = include_dir!("$CARGO_MANIFEST_DIR/resources");

/// Bundle path of the RELAX NG schema.
pub const SCHEMA_FILE: &str = "schema/docbook.rng";

const STYLESHEET_DIR: &str = "xsl";
const ASSET_ROOT: &str = "assets";

/// Every bundled file, as sorted `/`-separated paths.
pub fn list_resources() -> Vec<String> {
    let mut out = Vec::new();
    collect_files(&BUNDLE, &mut out);
    out.sort();
    out
}

fn collect_files(dir: &Dir<'_>, out: &mut Vec<String>) {
    for file in dir.files() {
        out.push(file.path().to_string_lossy().replace('\\', "/"));
    }
    for sub in dir.dirs() {
        collect_files(sub, out);
    }
}

/// Write every file below bundle directory `dir` into `dest`, keeping paths
/// relative to `strip`.
fn write_tree(dir: &Dir<'_>, strip: &Path, dest: &Path) -> std::io::Result<usize> {
    let mut written = 0;
    for file in dir.files() {
        let rel = file.path().strip_prefix(strip).unwrap_or(file.path());
        let target = dest.join(rel);
        if let Some(parent) = target.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(&target, file.contents())?;
        written += 1;
    }
    for sub in dir.dirs() {
        written += write_tree(sub, strip, dest)?;
    }
    Ok(written)
}

fn bundle_dir(path: &str) -> std::io::Result<&'static Dir<'static>> {
    BUNDLE.get_dir(path).ok_or_else(|| {
        std::io::Error::new(
            std::io::ErrorKind::NotFound,
            format!("bundled directory '{path}' is missing"),
        )
    })
}

/// Extract the bundled stylesheets to `<root>/xsl/`.
pub fn extract_stylesheets(root: &Path) -> std::io::Result<usize> {
    write_tree(bundle_dir(STYLESHEET_DIR)?, Path::new(""), root)
}

/// Extract the RELAX NG schema below `root` and return its path.
pub fn extract_schema(root: &Path) -> std::io::Result<PathBuf> {
    let file = BUNDLE.get_file(SCHEMA_FILE).ok_or_else(|| {
        std::io::Error::new(std::io::ErrorKind::NotFound, "bundled schema is missing")
    })?;
    let path = root.join(SCHEMA_FILE);
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(&path, file.contents())?;
    Ok(path)
}

/// Copy the css and js assets into `dest/css` and `dest/js`.
///
/// # Errors
/// [`BuildError::ResourceCopyFailed`] on any I/O failure.
pub fn copy_resources_to(dest: &Path) -> Result<usize, BuildError> {
    let fail = |source: std::io::Error| BuildError::ResourceCopyFailed {
        path: dest.to_path_buf(),
        source,
    };
    let assets = bundle_dir(ASSET_ROOT).map_err(fail)?;
    let n = write_tree(assets, Path::new(ASSET_ROOT), dest).map_err(fail)?;
    debug!("Copied {} resource files into {}", n, dest.display());
    Ok(n)
}

// ── Workspace ────────────────────────────────────────────────────────────

/// Per-run scratch directory holding the extracted bundle and XML catalog.
///
/// Removed on drop.
#[derive(Debug)]
pub struct Workspace {
    dir: TempDir,
    catalog: PathBuf,
    schema: PathBuf,
    resolver: UriResolver,
}

impl Workspace {
    /// Extract the bundle and write the catalog for `rules`.
    ///
    /// # Errors
    /// [`BuildError::EngineInit`] when the scratch directory cannot be prepared.
    pub fn create(rules: &[RewriteRule]) -> Result<Self, BuildError> {
        let init = |e: std::io::Error| BuildError::engine("resources", e.to_string());

        let dir = tempfile::Builder::new()
            .prefix("docbook-build-")
            .tempdir()
            .map_err(init)?;
        let n = extract_stylesheets(dir.path()).map_err(init)?;
        let schema = extract_schema(dir.path()).map_err(init)?;

        let resolver = UriResolver::new(rules.iter().cloned()).with_bundle(dir.path());
        let catalog = dir.path().join("catalog.xml");
        resolver.write_catalog(&catalog).map_err(init)?;

        debug!(
            "Workspace {}: {} stylesheets, catalog with {} rules",
            dir.path().display(),
            n,
            resolver.rules().len()
        );
        Ok(Self {
            dir,
            catalog,
            schema,
            resolver,
        })
    }

    pub fn root(&self) -> &Path {
        self.dir.path()
    }

    pub fn catalog_path(&self) -> &Path {
        &self.catalog
    }

    pub fn schema_path(&self) -> &Path {
        &self.schema
    }

    pub fn resolver(&self) -> &UriResolver {
        &self.resolver
    }
}
