//! Configuration types for a build run.
//!
//! All build behaviour is controlled through [`BuildConfig`], built via its
//! [`BuildConfigBuilder`] or loaded from a TOML build plan with
//! [`BuildConfig::from_file`]. Directories, documents and their output
//! targets are explicit configuration handed to the run; nothing is
//! compiled in except the default stage table.
//!
//! # Build plan format
//!
//! ```toml
//! input_dir = ".."
//! resource_dirs = ["../../Local"]
//!
//! [converter]
//! relfilesuffix = ".html"
//!
//! [[documents]]
//! name = "Course"
//! targets = [{ dir = "../../Online Pages", stages = ["html"] }]
//! ```
//!
//! Relative paths in a plan resolve against the directory holding the plan.

use crate::error::BuildError;
use crate::progress::ProgressCallback;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

/// URI prefix under which bundled resources are addressed by stylesheets.
pub const BUNDLED_URI_PREFIX: &str = "https://resources.docbook-build.invalid/";

/// Extension of the intermediate DocBook file when it is written out.
pub const INTERMEDIATE_EXTENSION: &str = "dbk";

/// Configuration for a build run.
///
/// Built via [`BuildConfig::builder()`] or [`BuildConfig::from_file`].
///
/// # Example
/// ```rust
/// use docbook_build::{BuildConfig, DocumentSpec, OutputTarget};
///
/// let config = BuildConfig::builder()
///     .input_dir("course")
///     .document(DocumentSpec::new("Course").target(OutputTarget::html("out")))
///     .build()
///     .unwrap();
/// assert_eq!(config.documents.len(), 1);
/// ```
#[derive(Clone)]
pub struct BuildConfig {
    /// Directory holding the `<Name>.<source_extension>` sources. Default: `.`.
    pub input_dir: PathBuf,

    /// Extension of source files, without the dot. Default: `adoc`.
    pub source_extension: String,

    /// Options handed to the markup converter for every document.
    pub converter: ConverterOptions,

    /// Which conformity checker gates the pipeline. Default: embedded rules.
    pub validator: ValidatorKind,

    /// Which XSLT processor runs the `xslt` stages. Default: xsltproc.
    pub processor: ProcessorKind,

    /// Explicit executable paths; `None` means look the tool up on `PATH`.
    pub executables: Executables,

    /// URI rewrite rules forming the stylesheet resolution hook.
    pub resolver: Vec<RewriteRule>,

    /// Named stylesheet stages available to output targets.
    pub stages: BTreeMap<String, StageConfig>,

    /// Documents in build order.
    pub documents: Vec<DocumentSpec>,

    /// Directories cleaned before the run. Empty means every target directory
    /// and every resource directory.
    pub clean_dirs: Vec<PathBuf>,

    /// Directories that receive css/js even when no HTML is written into them.
    pub resource_dirs: Vec<PathBuf>,

    /// Skip the clean phase entirely. Default: false.
    pub skip_clean: bool,

    /// Also write `<Name>.dbk` next to every target that receives HTML. Default: false.
    pub write_intermediate: bool,

    /// Optional observer notified as documents are processed.
    pub progress_callback: Option<ProgressCallback>,
}

impl Default for BuildConfig {
    fn default() -> Self {
        Self {
            input_dir: PathBuf::from("."),
            source_extension: "adoc".to_string(),
            converter: ConverterOptions::default(),
            validator: ValidatorKind::default(),
            processor: ProcessorKind::default(),
            executables: Executables::default(),
            resolver: default_rewrite_rules(),
            stages: default_stages(),
            documents: Vec::new(),
            clean_dirs: Vec::new(),
            resource_dirs: Vec::new(),
            skip_clean: false,
            write_intermediate: false,
            progress_callback: None,
        }
    }
}

impl fmt::Debug for BuildConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BuildConfig")
            .field("input_dir", &self.input_dir)
            .field("source_extension", &self.source_extension)
            .field("converter", &self.converter)
            .field("validator", &self.validator)
            .field("processor", &self.processor)
            .field("executables", &self.executables)
            .field("resolver", &self.resolver)
            .field("stages", &self.stages)
            .field("documents", &self.documents)
            .field("clean_dirs", &self.clean_dirs)
            .field("resource_dirs", &self.resource_dirs)
            .field("skip_clean", &self.skip_clean)
            .field("write_intermediate", &self.write_intermediate)
            .field(
                "progress_callback",
                &self.progress_callback.as_ref().map(|_| "<dyn BuildProgressCallback>"),
            )
            .finish()
    }
}

impl BuildConfig {
    /// Create a new builder for `BuildConfig`.
    pub fn builder() -> BuildConfigBuilder {
        BuildConfigBuilder {
            config: Self::default(),
        }
    }

    /// Load and validate a TOML build plan.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, BuildError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| BuildError::ConfigRead {
            path: path.to_path_buf(),
            source,
        })?;
        let base = path.parent().unwrap_or_else(|| Path::new("."));
        let plan: BuildPlan = toml::from_str(&text).map_err(|e| BuildError::ConfigParse {
            path: path.to_path_buf(),
            detail: e.to_string(),
        })?;
        plan.into_builder(base).build()
    }

    /// Parse a TOML build plan whose relative paths resolve against `base_dir`.
    pub fn from_toml_str(text: &str, base_dir: impl AsRef<Path>) -> Result<Self, BuildError> {
        let plan: BuildPlan = toml::from_str(text).map_err(|e| BuildError::ConfigParse {
            path: PathBuf::from("<string>"),
            detail: e.to_string(),
        })?;
        plan.into_builder(base_dir.as_ref()).build()
    }

    /// Source file path for a document.
    pub fn source_path(&self, name: &str) -> PathBuf {
        self.input_dir
            .join(format!("{}.{}", name, self.source_extension))
    }

    /// Every distinct target directory, in first-declared order.
    pub fn target_dirs(&self) -> Vec<PathBuf> {
        let mut seen = BTreeSet::new();
        self.documents
            .iter()
            .flat_map(|d| d.targets.iter().map(|t| t.dir.clone()))
            .filter(|d| seen.insert(d.clone()))
            .collect()
    }

    /// Directories to clean before the run.
    pub fn dirs_to_clean(&self) -> Vec<PathBuf> {
        if self.skip_clean {
            return Vec::new();
        }
        if !self.clean_dirs.is_empty() {
            return self.clean_dirs.clone();
        }
        let mut dirs = self.target_dirs();
        for d in &self.resource_dirs {
            if !dirs.contains(d) {
                dirs.push(d.clone());
            }
        }
        dirs
    }

    /// Every file extension a run of this configuration may produce.
    pub fn produced_extensions(&self) -> BTreeSet<String> {
        let mut exts: BTreeSet<String> = ["html", "fo", "pdf", INTERMEDIATE_EXTENSION]
            .into_iter()
            .map(String::from)
            .collect();
        exts.extend(self.stages.values().map(|s| s.extension.clone()));
        exts
    }

    /// Names of the stages referenced by at least one output target.
    pub fn referenced_stages(&self) -> BTreeSet<&str> {
        self.documents
            .iter()
            .flat_map(|d| d.targets.iter())
            .flat_map(|t| t.stages.iter().map(String::as_str))
            .collect()
    }
}

/// Builder for [`BuildConfig`].
#[derive(Debug)]
pub struct BuildConfigBuilder {
    config: BuildConfig,
}

impl BuildConfigBuilder {
    pub fn input_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.config.input_dir = dir.into();
        self
    }

    pub fn source_extension(mut self, ext: impl Into<String>) -> Self {
        self.config.source_extension = ext.into().trim_start_matches('.').to_string();
        self
    }

    pub fn converter(mut self, options: ConverterOptions) -> Self {
        self.config.converter = options;
        self
    }

    pub fn standalone(mut self, v: bool) -> Self {
        self.config.converter.standalone = v;
        self
    }

    pub fn relfilesuffix(mut self, suffix: impl Into<String>) -> Self {
        self.config.converter.relfilesuffix = suffix.into();
        self
    }

    pub fn attribute(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.config
            .converter
            .attributes
            .insert(name.into(), value.into());
        self
    }

    pub fn validator(mut self, kind: ValidatorKind) -> Self {
        self.config.validator = kind;
        self
    }

    pub fn processor(mut self, kind: ProcessorKind) -> Self {
        self.config.processor = kind;
        self
    }

    pub fn executables(mut self, executables: Executables) -> Self {
        self.config.executables = executables;
        self
    }

    /// Add a rewrite rule; later rules with the same prefix replace earlier ones.
    pub fn rewrite(mut self, prefix: impl Into<String>, path: impl Into<PathBuf>) -> Self {
        let rule = RewriteRule {
            prefix: prefix.into(),
            path: path.into(),
        };
        self.config.resolver.retain(|r| r.prefix != rule.prefix);
        self.config.resolver.push(rule);
        self
    }

    pub fn stage(mut self, name: impl Into<String>, stage: StageConfig) -> Self {
        self.config.stages.insert(name.into(), stage);
        self
    }

    pub fn document(mut self, doc: DocumentSpec) -> Self {
        self.config.documents.push(doc);
        self
    }

    pub fn documents(mut self, docs: impl IntoIterator<Item = DocumentSpec>) -> Self {
        self.config.documents.extend(docs);
        self
    }

    pub fn clean_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.config.clean_dirs.push(dir.into());
        self
    }

    pub fn resource_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.config.resource_dirs.push(dir.into());
        self
    }

    pub fn skip_clean(mut self, v: bool) -> Self {
        self.config.skip_clean = v;
        self
    }

    pub fn write_intermediate(mut self, v: bool) -> Self {
        self.config.write_intermediate = v;
        self
    }

    pub fn progress_callback(mut self, cb: ProgressCallback) -> Self {
        self.config.progress_callback = Some(cb);
        self
    }

    /// Build the configuration, validating constraints.
    pub fn build(self) -> Result<BuildConfig, BuildError> {
        let c = &self.config;
        if c.documents.is_empty() {
            return Err(BuildError::InvalidConfig(
                "at least one document must be declared".into(),
            ));
        }
        if c.source_extension.is_empty() {
            return Err(BuildError::InvalidConfig(
                "source extension must not be empty".into(),
            ));
        }
        let mut names = BTreeSet::new();
        for doc in &c.documents {
            if doc.name.trim().is_empty() || doc.name.contains(['/', '\\']) {
                return Err(BuildError::InvalidConfig(format!(
                    "invalid document name '{}'",
                    doc.name
                )));
            }
            if !names.insert(doc.name.as_str()) {
                return Err(BuildError::InvalidConfig(format!(
                    "document '{}' is declared twice",
                    doc.name
                )));
            }
            if doc.targets.is_empty() {
                return Err(BuildError::InvalidConfig(format!(
                    "document '{}' has no output target",
                    doc.name
                )));
            }
            for target in &doc.targets {
                for stage in &target.stages {
                    if !c.stages.contains_key(stage) {
                        return Err(BuildError::InvalidConfig(format!(
                            "document '{}' references unknown stage '{}'",
                            doc.name, stage
                        )));
                    }
                }
            }
        }
        for (name, stage) in &c.stages {
            if stage.extension.trim().is_empty() {
                return Err(BuildError::InvalidConfig(format!(
                    "stage '{name}' has an empty output extension"
                )));
            }
            if stage.kind == StageKind::Xslt && stage.stylesheet.is_none() {
                return Err(BuildError::InvalidConfig(format!(
                    "xslt stage '{name}' needs a stylesheet"
                )));
            }
        }
        Ok(self.config)
    }
}

// ── Converter options ────────────────────────────────────────────────────

/// Options that parameterise the markup converter; immutable per run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ConverterOptions {
    /// Produce a complete standalone document (header and footer). Default: true.
    pub standalone: bool,
    /// Converter backend. Default: `docbook`.
    pub backend: String,
    /// Suffix appended to inter-document links. Default: `.html`.
    pub relfilesuffix: String,
    /// Extra document attributes, passed as `-a name=value`.
    pub attributes: BTreeMap<String, String>,
    /// Lowest diagnostic severity that fails the conversion. Default: error.
    pub failure_level: FailureLevel,
}

impl Default for ConverterOptions {
    fn default() -> Self {
        Self {
            standalone: true,
            backend: "docbook".to_string(),
            relfilesuffix: ".html".to_string(),
            attributes: BTreeMap::new(),
            failure_level: FailureLevel::default(),
        }
    }
}

/// Converter diagnostic severity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FailureLevel {
    Info,
    Warn,
    #[default]
    Error,
    Fatal,
}

impl FailureLevel {
    pub fn as_arg(self) -> &'static str {
        match self {
            FailureLevel::Info => "INFO",
            FailureLevel::Warn => "WARN",
            FailureLevel::Error => "ERROR",
            FailureLevel::Fatal => "FATAL",
        }
    }

    /// Parse a converter severity label such as `WARNING` or `ERROR`.
    pub fn from_label(label: &str) -> Option<Self> {
        match label.to_ascii_uppercase().as_str() {
            "INFO" | "DEBUG" => Some(FailureLevel::Info),
            "WARN" | "WARNING" => Some(FailureLevel::Warn),
            "ERROR" => Some(FailureLevel::Error),
            "FATAL" => Some(FailureLevel::Fatal),
            _ => None,
        }
    }
}

// ── Engines ──────────────────────────────────────────────────────────────

/// Which conformity checker gates the pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ValidatorKind {
    /// `xmllint --relaxng` against the bundled schema, plus the embedded
    /// rules. (default)
    #[default]
    #[serde(alias = "relax-ng")]
    Relaxng,
    /// In-process DocBook 5 structure rules only; needs no external tool.
    Embedded,
}

/// Which XSLT processor runs `xslt` stages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ProcessorKind {
    /// libxslt's `xsltproc`, XSLT 1.0. (default)
    #[default]
    Xsltproc,
    /// Saxon's command line, XSLT 2.0/3.0.
    Saxon,
}

/// Explicit paths for the external tools.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Executables {
    pub asciidoctor: Option<PathBuf>,
    pub xsltproc: Option<PathBuf>,
    pub saxon: Option<PathBuf>,
    pub fop: Option<PathBuf>,
    pub xmllint: Option<PathBuf>,
}

/// Map every URI starting with `prefix` to a file below `path`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RewriteRule {
    pub prefix: String,
    pub path: PathBuf,
}

fn default_rewrite_rules() -> Vec<RewriteRule> {
    vec![RewriteRule {
        prefix: "http://docbook.sourceforge.net/release/xsl-ns/current/".to_string(),
        path: PathBuf::from("/usr/share/xml/docbook/stylesheet/docbook-xsl-ns/"),
    }]
}

// ── Stages ───────────────────────────────────────────────────────────────

/// What a stage does with its input.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum StageKind {
    /// XML to text through a stylesheet.
    Xslt,
    /// XSL-FO to PDF bytes.
    FoToPdf,
}

/// Where a stylesheet comes from.
///
/// Written in a plan as `bundled:<file>`, an `http(s)://` or `file:` URI, or
/// a plain filesystem path.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum StylesheetRef {
    Bundled(String),
    Uri(String),
    File(PathBuf),
}

impl FromStr for StylesheetRef {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s.is_empty() {
            return Err("stylesheet reference is empty".to_string());
        }
        if let Some(name) = s.strip_prefix("bundled:") {
            return Ok(StylesheetRef::Bundled(name.to_string()));
        }
        if let Some(path) = s.strip_prefix("file://") {
            return Ok(StylesheetRef::File(PathBuf::from(path)));
        }
        if s.starts_with("http://") || s.starts_with("https://") || s.starts_with("urn:") {
            return Ok(StylesheetRef::Uri(s.to_string()));
        }
        Ok(StylesheetRef::File(PathBuf::from(s)))
    }
}

impl TryFrom<String> for StylesheetRef {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<StylesheetRef> for String {
    fn from(value: StylesheetRef) -> Self {
        value.to_string()
    }
}

impl fmt::Display for StylesheetRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StylesheetRef::Bundled(name) => write!(f, "bundled:{name}"),
            StylesheetRef::Uri(uri) => f.write_str(uri),
            StylesheetRef::File(path) => write!(f, "{}", path.display()),
        }
    }
}

/// One named transformation step.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct StageConfig {
    pub kind: StageKind,
    #[serde(default)]
    pub stylesheet: Option<StylesheetRef>,
    /// Extension of the artifact this stage produces, without the dot.
    pub extension: String,
    /// String parameters handed to the stylesheet.
    #[serde(default)]
    pub params: BTreeMap<String, String>,
}

impl StageConfig {
    pub fn xslt(stylesheet: StylesheetRef, extension: impl Into<String>) -> Self {
        Self {
            kind: StageKind::Xslt,
            stylesheet: Some(stylesheet),
            extension: extension.into(),
            params: BTreeMap::new(),
        }
    }

    pub fn fo_to_pdf() -> Self {
        Self {
            kind: StageKind::FoToPdf,
            stylesheet: None,
            extension: "pdf".to_string(),
            params: BTreeMap::new(),
        }
    }

    pub fn param(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.params.insert(name.into(), value.into());
        self
    }
}

/// The stage table every configuration starts from.
///
/// | Stage  | Kind      | Stylesheet                          | Output |
/// |--------|-----------|-------------------------------------|--------|
/// | `html` | xslt      | bundled house HTML stylesheet       | `.html` |
/// | `fo`   | xslt      | DocBook XSL (namespaced) FO         | `.fo`  |
/// | `pdf`  | fo-to-pdf | —                                   | `.pdf` |
pub fn default_stages() -> BTreeMap<String, StageConfig> {
    let mut stages = BTreeMap::new();
    stages.insert(
        "html".to_string(),
        StageConfig::xslt(StylesheetRef::Bundled("house-html.xsl".into()), "html"),
    );
    stages.insert(
        "fo".to_string(),
        StageConfig::xslt(
            StylesheetRef::Uri(
                "http://docbook.sourceforge.net/release/xsl-ns/current/fo/docbook.xsl".into(),
            ),
            "fo",
        ),
    );
    stages.insert("pdf".to_string(), StageConfig::fo_to_pdf());
    stages
}

// ── Documents ────────────────────────────────────────────────────────────

/// A `(directory, stage chain)` pair declaring one rendering of a document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct OutputTarget {
    pub dir: PathBuf,
    /// Stage names applied in order; empty writes the intermediate DocBook.
    #[serde(default)]
    pub stages: Vec<String>,
    /// Also write the output of every non-final stage (e.g. the `.fo` of a PDF chain).
    #[serde(default)]
    pub keep_intermediates: bool,
}

impl OutputTarget {
    pub fn new(dir: impl Into<PathBuf>, stages: impl IntoIterator<Item = impl Into<String>>) -> Self {
        Self {
            dir: dir.into(),
            stages: stages.into_iter().map(Into::into).collect(),
            keep_intermediates: false,
        }
    }

    /// HTML through the `html` stage.
    pub fn html(dir: impl Into<PathBuf>) -> Self {
        Self::new(dir, ["html"])
    }

    /// PDF through `fo` then `pdf`, keeping the `.fo` next to the `.pdf`.
    pub fn pdf(dir: impl Into<PathBuf>) -> Self {
        Self::new(dir, ["fo", "pdf"]).keep_intermediates(true)
    }

    /// The validated intermediate DocBook itself.
    pub fn intermediate(dir: impl Into<PathBuf>) -> Self {
        Self::new(dir, std::iter::empty::<String>())
    }

    pub fn keep_intermediates(mut self, v: bool) -> Self {
        self.keep_intermediates = v;
        self
    }
}

/// A document and the renderings declared for it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DocumentSpec {
    pub name: String,
    pub targets: Vec<OutputTarget>,
}

impl DocumentSpec {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            targets: Vec::new(),
        }
    }

    pub fn target(mut self, target: OutputTarget) -> Self {
        self.targets.push(target);
        self
    }
}

// ── Build plan (file format) ─────────────────────────────────────────────

/// On-disk form of a build plan.
#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
struct BuildPlan {
    input_dir: Option<PathBuf>,
    source_extension: Option<String>,
    converter: Option<ConverterOptions>,
    validator: Option<ValidatorKind>,
    processor: Option<ProcessorKind>,
    executables: Executables,
    resolver: Vec<RewriteRule>,
    stages: BTreeMap<String, StageConfig>,
    documents: Vec<DocumentSpec>,
    clean_dirs: Vec<PathBuf>,
    resource_dirs: Vec<PathBuf>,
    skip_clean: bool,
    write_intermediate: bool,
}

impl BuildPlan {
    fn into_builder(self, base: &Path) -> BuildConfigBuilder {
        let rel = |p: PathBuf| if p.is_absolute() { p } else { base.join(p) };

        let mut builder = BuildConfig::builder()
            .input_dir(rel(self.input_dir.unwrap_or_else(|| PathBuf::from("."))))
            .skip_clean(self.skip_clean)
            .write_intermediate(self.write_intermediate);

        if let Some(ext) = self.source_extension {
            builder = builder.source_extension(ext);
        }
        if let Some(converter) = self.converter {
            builder = builder.converter(converter);
        }
        if let Some(v) = self.validator {
            builder = builder.validator(v);
        }
        if let Some(p) = self.processor {
            builder = builder.processor(p);
        }

        let exe = self.executables;
        builder = builder.executables(Executables {
            asciidoctor: exe.asciidoctor.map(rel),
            xsltproc: exe.xsltproc.map(rel),
            saxon: exe.saxon.map(rel),
            fop: exe.fop.map(rel),
            xmllint: exe.xmllint.map(rel),
        });

        for rule in self.resolver {
            builder = builder.rewrite(rule.prefix, rel(rule.path));
        }
        for (name, mut stage) in self.stages {
            if let Some(StylesheetRef::File(path)) = &mut stage.stylesheet {
                *path = rel(std::mem::take(path));
            }
            builder = builder.stage(name, stage);
        }
        for mut doc in self.documents {
            for target in &mut doc.targets {
                target.dir = rel(std::mem::take(&mut target.dir));
            }
            builder = builder.document(doc);
        }
        for dir in self.clean_dirs {
            builder = builder.clean_dir(rel(dir));
        }
        for dir in self.resource_dirs {
            builder = builder.resource_dir(rel(dir));
        }
        builder
    }
}
