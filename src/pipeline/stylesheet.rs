//! Stylesheet inspection and the batch driver.
//!
//! An `xslt` stage applies its stylesheet to every document of a run in one
//! processor invocation. For `xsltproc` that invocation runs a generated
//! driver stylesheet over a manifest listing the inputs:
//!
//! ```text
//! batch.xml ──▶ driver.xsl ──┬─ document(in-0.xml) ─▶ exsl:document out-0
//!               (imports the ├─ document(in-1.xml) ─▶ exsl:document out-1
//!                stage's     └─ ...
//!                stylesheet)
//! ```
//!
//! `exsl:document` does not inherit the imported stylesheet's `xsl:output`,
//! so the effective output properties are read once at Init with
//! [`output_properties`] and written onto the driver.

use crate::pipeline::resolve::{file_uri, percent_decode, uri_path, UriResolver};
use quick_xml::escape::escape;
use quick_xml::events::{BytesStart, Event};
use quick_xml::name::ResolveResult;
use quick_xml::NsReader;
use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};
use tracing::debug;

pub const XSLT_NS: &str = "http://www.w3.org/1999/XSL/Transform";

/// Namespace of the batch manifest.
pub const BATCH_NS: &str = "urn:docbook-build:batch";

/// `xsl:output` attributes that `exsl:document` also accepts.
const OUTPUT_ATTRIBUTES: &[&str] = &[
    "method",
    "version",
    "encoding",
    "omit-xml-declaration",
    "standalone",
    "doctype-public",
    "doctype-system",
    "cdata-section-elements",
    "indent",
    "media-type",
];

const MAX_IMPORT_DEPTH: usize = 64;

/// Effective `xsl:output` attributes, by name.
pub type OutputProperties = BTreeMap<String, String>;

/// Merge the `xsl:output` declarations of `stylesheet` and everything it
/// imports or includes.
///
/// Declarations with higher import precedence win. Imports that cannot be
/// located or read are skipped; the processor reports them when it runs.
pub fn output_properties(stylesheet: &Path, resolver: &UriResolver) -> OutputProperties {
    let mut props = OutputProperties::new();
    let mut seen = HashSet::new();
    collect(stylesheet, resolver, &mut seen, 0, &mut props);
    debug!("{}: output properties {:?}", stylesheet.display(), props);
    props
}

enum TopLevel {
    Import(String),
    Include(String),
    Output(Vec<(String, String)>),
}

fn collect(
    path: &Path,
    resolver: &UriResolver,
    seen: &mut HashSet<PathBuf>,
    depth: usize,
    props: &mut OutputProperties,
) {
    if depth > MAX_IMPORT_DEPTH || !seen.insert(path.to_path_buf()) {
        return;
    }
    let items = match std::fs::read_to_string(path) {
        Ok(text) => match top_level(&text) {
            Ok(items) => items,
            Err(e) => {
                debug!("Cannot parse {}: {}", path.display(), e);
                return;
            }
        },
        Err(e) => {
            debug!("Cannot read {}: {}", path.display(), e);
            return;
        }
    };

    // Imported modules rank below everything declared in this one.
    for item in &items {
        if let TopLevel::Import(href) = item {
            if let Some(target) = locate(href, path, resolver) {
                collect(&target, resolver, seen, depth + 1, props);
            }
        }
    }
    for item in items {
        match item {
            TopLevel::Output(attrs) => props.extend(attrs),
            TopLevel::Include(href) => {
                if let Some(target) = locate(&href, path, resolver) {
                    collect(&target, resolver, seen, depth + 1, props);
                }
            }
            TopLevel::Import(_) => {}
        }
    }
}

/// The `xsl:import`, `xsl:include` and `xsl:output` children of the root.
fn top_level(text: &str) -> Result<Vec<TopLevel>, quick_xml::Error> {
    let mut reader = NsReader::from_str(text);
    let mut depth = 0usize;
    let mut items = Vec::new();

    loop {
        let (ns, event) = reader.read_resolved_event()?;
        match event {
            Event::Start(ref e) | Event::Empty(ref e) => {
                let in_xslt =
                    matches!(ns, ResolveResult::Bound(n) if n.into_inner() == XSLT_NS.as_bytes());
                if depth == 1 && in_xslt {
                    match e.local_name().as_ref() {
                        b"import" => items.extend(href(e)?.map(TopLevel::Import)),
                        b"include" => items.extend(href(e)?.map(TopLevel::Include)),
                        b"output" => {
                            let mut attrs = Vec::new();
                            for attr in e.attributes() {
                                let attr = attr?;
                                let key = String::from_utf8_lossy(attr.key.as_ref()).into_owned();
                                if OUTPUT_ATTRIBUTES.contains(&key.as_str()) {
                                    attrs.push((key, attr.unescape_value()?.into_owned()));
                                }
                            }
                            items.push(TopLevel::Output(attrs));
                        }
                        _ => {}
                    }
                }
                if matches!(event, Event::Start(_)) {
                    depth += 1;
                }
            }
            Event::End(_) => depth = depth.saturating_sub(1),
            Event::Eof => break,
            _ => {}
        }
    }
    Ok(items)
}

fn href(e: &BytesStart<'_>) -> Result<Option<String>, quick_xml::Error> {
    match e.try_get_attribute("href")? {
        Some(attr) => Ok(Some(attr.unescape_value()?.into_owned())),
        None => Ok(None),
    }
}

/// Local file an `href` in `base` refers to.
fn locate(href: &str, base: &Path, resolver: &UriResolver) -> Option<PathBuf> {
    if href.starts_with("file:") {
        return uri_path(href);
    }
    if href.contains("://") || href.starts_with("urn:") {
        return resolver.resolve(href);
    }
    let dir = base.parent().unwrap_or_else(|| Path::new(""));
    Some(dir.join(percent_decode(href)))
}

// ── Driver ───────────────────────────────────────────────────────────────

/// A stylesheet that applies `stylesheet` to every item of a batch manifest.
///
/// Outside a manifest the driver behaves exactly like `stylesheet`.
pub fn batch_driver(stylesheet: &Path, output: &OutputProperties) -> String {
    let mut attrs = String::new();
    for (name, value) in output {
        // exsl:document attributes are attribute value templates.
        let literal = value.replace('{', "{{").replace('}', "}}");
        attrs.push_str(&format!(" {}=\"{}\"", name, escape(literal.as_str())));
    }
    let href = file_uri(stylesheet);
    format!(
        r#"<?xml version="1.0"?>
<xsl:stylesheet version="1.0"
    xmlns:xsl="{XSLT_NS}"
    xmlns:exsl="http://exslt.org/common"
    xmlns:batch="{BATCH_NS}"
    extension-element-prefixes="exsl"
    exclude-result-prefixes="batch">
  <xsl:import href="{href}"/>
  <xsl:template match="/">
    <xsl:choose>
      <xsl:when test="batch:batch">
        <xsl:for-each select="batch:batch/batch:item">
          <exsl:document href="{{@out}}"{attrs}>
            <xsl:apply-templates select="document(@src)"/>
          </exsl:document>
        </xsl:for-each>
      </xsl:when>
      <xsl:otherwise>
        <xsl:apply-imports/>
      </xsl:otherwise>
    </xsl:choose>
  </xsl:template>
</xsl:stylesheet>
"#,
        href = escape(href.as_str()),
    )
}

/// The manifest the driver reads: one `(input, output)` pair per document.
pub fn batch_manifest(items: &[(PathBuf, PathBuf)]) -> String {
    let mut xml = format!("<?xml version=\"1.0\"?>\n<batch:batch xmlns:batch=\"{BATCH_NS}\">\n");
    for (input, output) in items {
        let src = file_uri(input);
        let out = output.to_string_lossy();
        xml.push_str(&format!(
            "  <batch:item src=\"{}\" out=\"{}\"/>\n",
            escape(src.as_str()),
            escape(out.as_ref())
        ));
    }
    xml.push_str("</batch:batch>\n");
    xml
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resources::Workspace;

    fn write(dir: &Path, name: &str, text: &str) -> PathBuf {
        let path = dir.join(name);
        std::fs::write(&path, text).unwrap();
        path
    }

    #[test]
    fn house_stylesheet_outputs_html() {
        let ws = Workspace::create(&[]).unwrap();
        let props = output_properties(&ws.root().join("xsl/house-html.xsl"), ws.resolver());
        assert_eq!(props.get("method").map(String::as_str), Some("html"));
        assert_eq!(props.get("encoding").map(String::as_str), Some("UTF-8"));
        assert_eq!(
            props.get("doctype-system").map(String::as_str),
            Some("about:legacy-compat")
        );
    }

    #[test]
    fn importing_stylesheet_overrides_imported_output() {
        let dir = tempfile::tempdir().unwrap();
        write(
            dir.path(),
            "base.xsl",
            r#"<xsl:stylesheet version="1.0" xmlns:xsl="http://www.w3.org/1999/XSL/Transform">
  <xsl:output method="xml" indent="yes" encoding="ISO-8859-1"/>
</xsl:stylesheet>"#,
        );
        write(
            dir.path(),
            "part.xsl",
            r#"<t:stylesheet version="1.0" xmlns:t="http://www.w3.org/1999/XSL/Transform">
  <t:output media-type="text/x-course"/>
</t:stylesheet>"#,
        );
        let top = write(
            dir.path(),
            "top.xsl",
            r#"<xsl:stylesheet version="1.0" xmlns:xsl="http://www.w3.org/1999/XSL/Transform">
  <xsl:import href="base.xsl"/>
  <xsl:include href="part.xsl"/>
  <xsl:output indent="no"/>
  <xsl:template match="x"><xsl:output method="text"/></xsl:template>
</xsl:stylesheet>"#,
        );

        let props = output_properties(&top, &UriResolver::default());
        assert_eq!(props.get("method").map(String::as_str), Some("xml"));
        assert_eq!(props.get("indent").map(String::as_str), Some("no"));
        assert_eq!(props.get("encoding").map(String::as_str), Some("ISO-8859-1"));
        assert_eq!(props.get("media-type").map(String::as_str), Some("text/x-course"));
    }

    #[test]
    fn import_cycles_and_missing_files_are_tolerated() {
        let dir = tempfile::tempdir().unwrap();
        write(
            dir.path(),
            "a.xsl",
            r#"<xsl:stylesheet version="1.0" xmlns:xsl="http://www.w3.org/1999/XSL/Transform">
  <xsl:import href="b.xsl"/>
  <xsl:import href="missing.xsl"/>
  <xsl:output method="html"/>
</xsl:stylesheet>"#,
        );
        let b = write(
            dir.path(),
            "b.xsl",
            r#"<xsl:stylesheet version="1.0" xmlns:xsl="http://www.w3.org/1999/XSL/Transform">
  <xsl:import href="a.xsl"/>
</xsl:stylesheet>"#,
        );
        let props = output_properties(&b, &UriResolver::default());
        assert_eq!(props.get("method").map(String::as_str), Some("html"));
    }

    #[test]
    fn driver_imports_stage_stylesheet_and_carries_output() {
        let props = OutputProperties::from([
            ("method".to_string(), "html".to_string()),
            ("doctype-system".to_string(), "urn:{odd}".to_string()),
        ]);
        let driver = batch_driver(Path::new("/course/My Style.xsl"), &props);
        assert!(driver.contains(r#"<xsl:import href="file:///course/My%20Style.xsl"/>"#));
        assert!(driver.contains(r#"<exsl:document href="{@out}" doctype-system="urn:{{odd}}" method="html">"#));
        assert!(driver.contains("<xsl:apply-imports/>"));
    }

    #[test]
    fn manifest_lists_every_item() {
        let xml = batch_manifest(&[
            (PathBuf::from("/w/in-0.xml"), PathBuf::from("/w/out-0")),
            (PathBuf::from("/w/in-1.xml"), PathBuf::from("/w/out-1")),
        ]);
        assert_eq!(xml.matches("<batch:item ").count(), 2);
        assert!(xml.contains(r#"src="file:///w/in-1.xml" out="/w/out-1""#));
    }
}
