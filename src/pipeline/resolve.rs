//! Stylesheet and URI resolution.
//!
//! Stylesheets import each other by URI (the DocBook XSL distribution is
//! addressed as `http://docbook.sourceforge.net/...`, bundled resources as
//! [`BUNDLED_URI_PREFIX`]). Those URIs are never fetched. A [`UriResolver`]
//! rewrites them to local files, both for the stage's own stylesheet and,
//! through an OASIS XML catalog handed to the processor, for every
//! `xsl:import` and `xsl:include` it follows.

use crate::config::{RewriteRule, StylesheetRef, BUNDLED_URI_PREFIX};
use crate::error::BuildError;
use quick_xml::escape::escape;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Prefix-rewrite table mapping URIs onto the local filesystem.
#[derive(Debug, Clone, Default)]
pub struct UriResolver {
    rules: Vec<RewriteRule>,
}

impl UriResolver {
    pub fn new(rules: impl IntoIterator<Item = RewriteRule>) -> Self {
        Self {
            rules: rules.into_iter().collect(),
        }
    }

    /// Add the rule that serves bundled resources from `root`.
    pub fn with_bundle(mut self, root: impl Into<PathBuf>) -> Self {
        self.rules.retain(|r| r.prefix != BUNDLED_URI_PREFIX);
        self.rules.push(RewriteRule {
            prefix: BUNDLED_URI_PREFIX.to_string(),
            path: root.into(),
        });
        self
    }

    pub fn rules(&self) -> &[RewriteRule] {
        &self.rules
    }

    /// Rewrite `uri` with the longest matching prefix.
    ///
    /// Returns `None` when no rule matches. The returned path is not checked
    /// for existence.
    pub fn resolve(&self, uri: &str) -> Option<PathBuf> {
        let rule = self
            .rules
            .iter()
            .filter(|r| uri.starts_with(&r.prefix))
            .max_by_key(|r| r.prefix.len())?;
        let rest = &uri[rule.prefix.len()..];
        let mut path = rule.path.clone();
        for segment in rest.split('/').filter(|s| !s.is_empty()) {
            path.push(segment);
        }
        Some(path)
    }

    /// The rules as an OASIS XML catalog.
    ///
    /// Each rule yields a `rewriteURI` entry (used for `xsl:import`) and a
    /// `rewriteSystem` entry (used for DTD and entity lookups).
    pub fn catalog_xml(&self) -> String {
        let mut xml = String::from(
            "<?xml version=\"1.0\"?>\n\
             <catalog xmlns=\"urn:oasis:names:tc:entity:xmlns:xml:catalog\" prefer=\"public\">\n",
        );
        for rule in &self.rules {
            let from = escape(rule.prefix.as_str());
            let mut to = file_uri(&rule.path);
            if rule.prefix.ends_with('/') && !to.ends_with('/') {
                to.push('/');
            }
            let to = escape(to.as_str());
            xml.push_str(&format!(
                "  <rewriteURI uriStartString=\"{from}\" rewritePrefix=\"{to}\"/>\n"
            ));
            xml.push_str(&format!(
                "  <rewriteSystem systemIdStartString=\"{from}\" rewritePrefix=\"{to}\"/>\n"
            ));
        }
        xml.push_str("</catalog>\n");
        xml
    }

    /// Write [`Self::catalog_xml`] to `path`.
    pub fn write_catalog(&self, path: &Path) -> std::io::Result<()> {
        std::fs::write(path, self.catalog_xml())?;
        debug!(
            "Wrote XML catalog with {} rules to {}",
            self.rules.len(),
            path.display()
        );
        Ok(())
    }
}

/// `file://` URI for a local path, percent-encoding the characters that
/// catalog resolvers reject.
pub fn file_uri(path: &Path) -> String {
    let raw = path.to_string_lossy().replace('\\', "/");
    let mut uri = String::from("file://");
    if !raw.starts_with('/') {
        uri.push('/');
    }
    for c in raw.chars() {
        match c {
            ' ' => uri.push_str("%20"),
            '#' => uri.push_str("%23"),
            '%' => uri.push_str("%25"),
            '?' => uri.push_str("%3F"),
            _ => uri.push(c),
        }
    }
    uri
}

/// Local path of a `file:` URI.
pub fn uri_path(uri: &str) -> Option<PathBuf> {
    let rest = uri.strip_prefix("file://").or_else(|| uri.strip_prefix("file:"))?;
    Some(PathBuf::from(percent_decode(rest)))
}

/// Undo `%XX` escapes. Malformed escapes are kept as written.
pub fn percent_decode(text: &str) -> String {
    let bytes = text.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'%' && i + 2 < bytes.len() {
            let decoded = std::str::from_utf8(&bytes[i + 1..i + 3])
                .ok()
                .and_then(|hex| u8::from_str_radix(hex, 16).ok());
            if let Some(b) = decoded {
                out.push(b);
                i += 3;
                continue;
            }
        }
        out.push(bytes[i]);
        i += 1;
    }
    String::from_utf8_lossy(&out).into_owned()
}

/// Resolve the stylesheet of stage `stage` to an existing local file.
///
/// # Errors
/// [`BuildError::StylesheetUnresolved`] when the reference matches no rule
/// or rewrites to a file that does not exist.
pub fn resolve_stylesheet(
    stage: &str,
    reference: &StylesheetRef,
    resolver: &UriResolver,
) -> Result<PathBuf, BuildError> {
    let unresolved = |detail: String| BuildError::StylesheetUnresolved {
        stage: stage.to_string(),
        reference: reference.to_string(),
        detail,
    };

    let path = match reference {
        StylesheetRef::Bundled(name) => {
            let uri = format!("{BUNDLED_URI_PREFIX}xsl/{name}");
            resolver
                .resolve(&uri)
                .ok_or_else(|| unresolved("bundled resources are not extracted".into()))?
        }
        StylesheetRef::Uri(uri) => resolver
            .resolve(uri)
            .ok_or_else(|| unresolved("no rewrite rule matches this URI".into()))?,
        StylesheetRef::File(path) => path.clone(),
    };

    if !path.is_file() {
        return Err(unresolved(format!("'{}' does not exist", path.display())));
    }
    debug!("Stage '{}' stylesheet: {}", stage, path.display());
    Ok(path)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rule(prefix: &str, path: &str) -> RewriteRule {
        RewriteRule {
            prefix: prefix.into(),
            path: PathBuf::from(path),
        }
    }

    #[test]
    fn longest_prefix_wins() {
        let r = UriResolver::new([
            rule("http://example.org/xsl/", "/a"),
            rule("http://example.org/xsl/fo/", "/b"),
        ]);
        assert_eq!(
            r.resolve("http://example.org/xsl/fo/docbook.xsl"),
            Some(PathBuf::from("/b/docbook.xsl"))
        );
        assert_eq!(
            r.resolve("http://example.org/xsl/html/docbook.xsl"),
            Some(PathBuf::from("/a/html/docbook.xsl"))
        );
        assert_eq!(r.resolve("http://other.org/x.xsl"), None);
    }

    #[test]
    fn bundle_rule_replaces_previous() {
        let r = UriResolver::default()
            .with_bundle("/old")
            .with_bundle("/new");
        assert_eq!(r.rules().len(), 1);
        assert_eq!(
            r.resolve(&format!("{BUNDLED_URI_PREFIX}xsl/common.xsl")),
            Some(PathBuf::from("/new/xsl/common.xsl"))
        );
    }

    #[test]
    fn catalog_lists_every_rule() {
        let r = UriResolver::new([rule(
            "http://docbook.sourceforge.net/release/xsl-ns/current/",
            "/usr/share/xml/docbook stylesheets",
        )]);
        let xml = r.catalog_xml();
        assert!(xml.contains("urn:oasis:names:tc:entity:xmlns:xml:catalog"));
        assert!(xml.contains(
            "<rewriteURI uriStartString=\"http://docbook.sourceforge.net/release/xsl-ns/current/\" \
             rewritePrefix=\"file:///usr/share/xml/docbook%20stylesheets/\"/>"
        ));
        assert!(xml.contains("<rewriteSystem "));
    }

    #[test]
    fn catalog_escapes_markup_characters() {
        let r = UriResolver::new([rule("urn:x&y/", "/tmp/x")]);
        assert!(r.catalog_xml().contains("urn:x&amp;y/"));
    }

    #[test]
    fn file_uri_percent_encodes_spaces() {
        assert_eq!(file_uri(Path::new("/a b/c")), "file:///a%20b/c");
    }

    #[test]
    fn uri_path_undoes_file_uri() {
        let path = Path::new("/Course material/#1 100%?.xsl");
        assert_eq!(uri_path(&file_uri(path)).unwrap(), path);
        assert_eq!(uri_path("file:/etc/x.xsl").unwrap(), Path::new("/etc/x.xsl"));
        assert!(uri_path("http://example.org/x.xsl").is_none());
        assert_eq!(percent_decode("50%-off%2"), "50%-off%2");
    }

    #[test]
    fn stylesheet_resolution() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("xsl")).unwrap();
        std::fs::write(dir.path().join("xsl/house.xsl"), "<x/>").unwrap();
        let r = UriResolver::new([rule("http://styles.test/", dir.path().to_str().unwrap())])
            .with_bundle(dir.path());

        let bundled = resolve_stylesheet("html", &StylesheetRef::Bundled("house.xsl".into()), &r);
        assert_eq!(bundled.unwrap(), dir.path().join("xsl/house.xsl"));

        let uri = resolve_stylesheet("html", &StylesheetRef::Uri("http://styles.test/xsl/house.xsl".into()), &r);
        assert_eq!(uri.unwrap(), dir.path().join("xsl/house.xsl"));

        let err = resolve_stylesheet("fo", &StylesheetRef::Uri("http://unknown.test/fo.xsl".into()), &r)
            .unwrap_err();
        assert!(matches!(err, BuildError::StylesheetUnresolved { ref stage, .. } if stage == "fo"));

        let err = resolve_stylesheet("exam", &StylesheetRef::File(dir.path().join("missing.xsl")), &r)
            .unwrap_err();
        assert!(err.to_string().contains("does not exist"));
    }
}
