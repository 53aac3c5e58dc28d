//! Conformity gate between conversion and transformation.
//!
//! Downstream stylesheets assume schema-conformant DocBook, so a document
//! whose intermediate XML fails here never reaches a stylesheet and never
//! writes an artifact.
//!
//! Two checkers are provided:
//!
//! * [`RelaxNgChecker`] — the default. The bundled RELAX NG schema through
//!   `xmllint`, plus the [`DocBookChecker`] rules the schema cannot express.
//!   A batch of documents is one xmllint run, so the schema is compiled once.
//! * [`DocBookChecker`] — in-process structural rules for DocBook 5,
//!   built on `quick-xml`. The fallback when xmllint is not available.

use crate::error::{BuildError, SchemaViolation};
use crate::pipeline::tool;
use once_cell::sync::Lazy;
use quick_xml::events::Event;
use quick_xml::name::ResolveResult;
use quick_xml::NsReader;
use regex::Regex;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::process::Command;
use tracing::{debug, info, warn};

/// The DocBook 5 namespace.
pub const DOCBOOK_NS: &str = "http://docbook.org/ns/docbook";

/// Elements accepted as the root of a DocBook document.
pub const DOCUMENT_ROOTS: &[&str] = &[
    "article", "book", "part", "chapter", "section", "set", "refentry",
];

/// Validates intermediate XML against a fixed schema.
pub trait ConformityChecker {
    fn verify(&self, xml: &str) -> Result<(), SchemaViolation>;

    /// Verify several documents, one verdict per document in order.
    ///
    /// The default verifies them one at a time.
    fn verify_batch(&self, docs: &[&str]) -> Vec<Result<(), SchemaViolation>> {
        docs.iter().map(|xml| self.verify(xml)).collect()
    }
}

// ── In-process DocBook rules ─────────────────────────────────────────────

/// Structural DocBook 5 rules checked in a single streaming pass:
///
/// - the document is well-formed XML with exactly one root element;
/// - the root is in the DocBook namespace and is one of [`DOCUMENT_ROOTS`];
/// - the root carries a `version` starting with `5`;
/// - `xml:id` values are unique;
/// - every `linkend` (and each entry of `linkends`) names an existing `xml:id`.
#[derive(Debug, Clone, Copy, Default)]
pub struct DocBookChecker;

impl DocBookChecker {
    pub fn new() -> Self {
        Self
    }
}

impl ConformityChecker for DocBookChecker {
    fn verify(&self, xml: &str) -> Result<(), SchemaViolation> {
        let mut reader = NsReader::from_str(xml);
        let mut depth = 0usize;
        let mut seen_root = false;
        let mut ids: HashMap<String, usize> = HashMap::new();
        let mut links: Vec<(String, usize)> = Vec::new();

        loop {
            let offset = reader.buffer_position() as usize;
            let (resolved, event) = match reader.read_resolved_event() {
                Ok(pair) => pair,
                Err(e) => return Err(violation_at(xml, offset, format!("malformed XML: {e}"))),
            };
            let in_docbook_ns =
                matches!(resolved, ResolveResult::Bound(ns) if ns.into_inner() == DOCBOOK_NS.as_bytes());

            match event {
                Event::Start(ref e) | Event::Empty(ref e) => {
                    let is_start = matches!(event, Event::Start(_));
                    if depth == 0 {
                        if seen_root {
                            return Err(violation_at(xml, offset, "more than one root element"));
                        }
                        seen_root = true;
                        let local = String::from_utf8_lossy(e.local_name().as_ref()).into_owned();
                        if !in_docbook_ns {
                            return Err(violation_at(
                                xml,
                                offset,
                                format!("root element <{local}> is not in the DocBook namespace {DOCBOOK_NS}"),
                            ));
                        }
                        if !DOCUMENT_ROOTS.contains(&local.as_str()) {
                            return Err(violation_at(
                                xml,
                                offset,
                                format!("<{local}> is not a DocBook document element"),
                            ));
                        }
                        let version = e
                            .try_get_attribute("version")
                            .map_err(|err| violation_at(xml, offset, format!("malformed attribute: {err}")))?
                            .map(|a| String::from_utf8_lossy(&a.value).into_owned());
                        match version {
                            Some(v) if v.starts_with('5') => {}
                            Some(v) => {
                                return Err(violation_at(
                                    xml,
                                    offset,
                                    format!("DocBook version '{v}' is not 5.x"),
                                ))
                            }
                            None => {
                                return Err(violation_at(
                                    xml,
                                    offset,
                                    format!("root element <{local}> has no version attribute"),
                                ))
                            }
                        }
                    }

                    for attr in e.attributes() {
                        let attr = attr.map_err(|err| {
                            violation_at(xml, offset, format!("malformed attribute: {err}"))
                        })?;
                        let value = String::from_utf8_lossy(&attr.value).into_owned();
                        match attr.key.as_ref() {
                            b"xml:id" => {
                                if ids.insert(value.clone(), offset).is_some() {
                                    return Err(violation_at(
                                        xml,
                                        offset,
                                        format!("duplicate xml:id '{value}'"),
                                    ));
                                }
                            }
                            b"linkend" => links.push((value, offset)),
                            b"linkends" => links
                                .extend(value.split_whitespace().map(|v| (v.to_string(), offset))),
                            _ => {}
                        }
                    }

                    if is_start {
                        depth += 1;
                    }
                }
                Event::End(_) => {
                    depth = depth.saturating_sub(1);
                }
                Event::Text(ref t) => {
                    if depth == 0 && !t.iter().all(u8::is_ascii_whitespace) {
                        return Err(violation_at(xml, offset, "text outside the root element"));
                    }
                }
                Event::Eof => break,
                _ => {}
            }
        }

        if !seen_root {
            return Err(SchemaViolation::new("document has no root element"));
        }
        if depth > 0 {
            return Err(violation_at(xml, xml.len(), "unclosed element at end of document"));
        }
        if let Some((target, offset)) = links.iter().find(|(t, _)| !ids.contains_key(t)) {
            return Err(violation_at(
                xml,
                *offset,
                format!("linkend '{target}' does not match any xml:id"),
            ));
        }
        debug!("DocBook checks passed ({} ids, {} links)", ids.len(), links.len());
        Ok(())
    }
}

fn violation_at(xml: &str, offset: usize, message: impl Into<String>) -> SchemaViolation {
    let (line, column) = line_col(xml, offset);
    SchemaViolation::at(line, column, message)
}

/// 1-indexed line and byte column of `offset` in `text`.
fn line_col(text: &str, offset: usize) -> (usize, usize) {
    let before = &text.as_bytes()[..offset.min(text.len())];
    let line = before.iter().filter(|&&b| b == b'\n').count() + 1;
    let line_start = before
        .iter()
        .rposition(|&b| b == b'\n')
        .map_or(0, |p| p + 1);
    (line, before.len() - line_start + 1)
}

// ── RELAX NG via xmllint ─────────────────────────────────────────────────

/// `<line>: <message>` after the file name in an xmllint diagnostic.
static RE_XMLLINT_LOCATION: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^(?P<line>\d+): (?P<msg>.*)$").unwrap());

/// Validates with `xmllint --relaxng` against a schema file.
///
/// Documents are first held to the [`DocBookChecker`] rules (unique ids,
/// resolvable links); the ones that pass are validated together in one
/// xmllint run.
#[derive(Debug, Clone)]
pub struct RelaxNgChecker {
    xmllint: PathBuf,
    schema: PathBuf,
    rules: DocBookChecker,
}

impl RelaxNgChecker {
    /// Locate xmllint and check the schema file exists.
    pub fn new(explicit: Option<&Path>, schema: impl Into<PathBuf>) -> Result<Self, BuildError> {
        let xmllint = tool::locate("xmllint", explicit)?;
        let schema = schema.into();
        if !schema.is_file() {
            return Err(BuildError::engine(
                "xmllint",
                format!("schema '{}' does not exist", schema.display()),
            ));
        }
        info!("Validating with RELAX NG schema {}", schema.display());
        Ok(Self {
            xmllint,
            schema,
            rules: DocBookChecker::new(),
        })
    }

    fn command(&self, files: &[PathBuf]) -> Command {
        let mut cmd = Command::new(&self.xmllint);
        cmd.args(["--noout", "--nonet", "--relaxng"])
            .arg(&self.schema)
            .args(files);
        cmd
    }

    /// One xmllint run over `docs`.
    fn run_schema(&self, docs: &[&str]) -> Result<Vec<Result<(), SchemaViolation>>, SchemaViolation> {
        let io = |e: std::io::Error| SchemaViolation::new(format!("xmllint could not run: {e}"));

        let dir = tempfile::Builder::new()
            .prefix("docbook-build-xmllint-")
            .tempdir()
            .map_err(io)?;
        let mut files = Vec::with_capacity(docs.len());
        for (i, xml) in docs.iter().enumerate() {
            let file = dir.path().join(format!("doc-{i}.xml"));
            std::fs::write(&file, xml).map_err(io)?;
            files.push(file);
        }

        let out = tool::run(self.command(&files), &[]).map_err(io)?;
        debug!("xmllint checked {} documents (exit {:?})", docs.len(), out.code);
        let verdicts = xmllint_verdicts(&out.stderr, &files, &out.failure_detail());
        if !out.success && verdicts.iter().all(Result::is_ok) {
            warn!("xmllint failed without naming a document: {}", out.failure_detail());
            return Err(SchemaViolation::new(out.failure_detail()));
        }
        Ok(verdicts)
    }
}

impl ConformityChecker for RelaxNgChecker {
    fn verify(&self, xml: &str) -> Result<(), SchemaViolation> {
        self.verify_batch(&[xml])
            .pop()
            .unwrap_or_else(|| Err(SchemaViolation::new("xmllint produced no verdict")))
    }

    fn verify_batch(&self, docs: &[&str]) -> Vec<Result<(), SchemaViolation>> {
        let mut verdicts: Vec<Option<Result<(), SchemaViolation>>> = docs
            .iter()
            .map(|xml| self.rules.verify(xml).err().map(Err))
            .collect();
        let pending: Vec<usize> = (0..docs.len()).filter(|&i| verdicts[i].is_none()).collect();

        if !pending.is_empty() {
            let batch: Vec<&str> = pending.iter().map(|&i| docs[i]).collect();
            match self.run_schema(&batch) {
                Ok(results) => {
                    for (&i, result) in pending.iter().zip(results) {
                        verdicts[i] = Some(result);
                    }
                }
                Err(violation) => {
                    for &i in &pending {
                        verdicts[i] = Some(Err(violation.clone()));
                    }
                }
            }
        }

        verdicts
            .into_iter()
            .map(|v| v.unwrap_or_else(|| Err(SchemaViolation::new("xmllint produced no verdict"))))
            .collect()
    }
}

/// Attribute xmllint's stderr to each of `files`.
///
/// xmllint prefixes every diagnostic with the file name and ends each file
/// with `<file> validates` or `<file> fails to validate`. The first located
/// diagnostic of a file becomes its violation; a file xmllint never
/// mentions fails with `fallback`.
fn xmllint_verdicts(stderr: &str, files: &[PathBuf], fallback: &str) -> Vec<Result<(), SchemaViolation>> {
    files
        .iter()
        .map(|file| {
            let name = file.to_string_lossy();
            let mut located = None;
            let mut valid = false;
            let mut invalid = false;
            for line in stderr.lines().map(str::trim_end) {
                let Some(rest) = line.strip_prefix(name.as_ref()) else {
                    continue;
                };
                match rest {
                    " validates" => valid = true,
                    " fails to validate" => invalid = true,
                    _ => {
                        if let Some(diagnostic) = rest.strip_prefix(':') {
                            located.get_or_insert_with(|| parse_xmllint_violation(diagnostic));
                        }
                    }
                }
            }
            match located {
                Some(violation) => Err(violation),
                None if valid => Ok(()),
                None if invalid => Err(SchemaViolation::new("document does not match the schema")),
                None => Err(SchemaViolation::new(fallback)),
            }
        })
        .collect()
}

/// `7: element section: Relax-NG validity error : ...` as a violation.
fn parse_xmllint_violation(diagnostic: &str) -> SchemaViolation {
    match RE_XMLLINT_LOCATION.captures(diagnostic) {
        Some(caps) => SchemaViolation {
            line: caps["line"].parse().ok(),
            column: None,
            message: caps["msg"].to_string(),
        },
        None => SchemaViolation::new(diagnostic.trim()),
    }
}
