//! Error types for the docbook-build library.
//!
//! Two distinct error types reflect two distinct failure modes:
//!
//! * [`BuildError`] — **Fatal**: the build run cannot proceed at all
//!   (a processor is missing, the build plan is invalid, an output directory
//!   cannot be cleaned). Returned as `Err(BuildError)` from [`crate::build`]
//!   and [`crate::BuildRun`].
//!
//! * [`DocumentError`] — **Non-fatal**: a single document failed (missing
//!   source, conversion rejected, schema violation, stylesheet failure) but
//!   every other document is unaffected. Stored inside
//!   [`crate::output::DocumentReport`] so callers can inspect partial
//!   success rather than losing the whole run to one bad document.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use thiserror::Error;

/// All fatal errors returned by the docbook-build library.
///
/// Document-level failures use [`DocumentError`] and are stored in
/// [`crate::output::DocumentReport`] rather than propagated here.
#[derive(Debug, Error)]
pub enum BuildError {
    // ── Init errors ───────────────────────────────────────────────────────
    /// A conversion, validation or transformation engine could not be set up.
    #[error("Cannot initialise {engine}: {detail}")]
    EngineInit { engine: String, detail: String },

    /// A stylesheet reference could not be resolved to a local file.
    #[error("Stylesheet '{reference}' for stage '{stage}' cannot be resolved: {detail}")]
    StylesheetUnresolved {
        stage: String,
        reference: String,
        detail: String,
    },

    // ── Config errors ─────────────────────────────────────────────────────
    /// Builder validation failed.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// The build plan file could not be read.
    #[error("Failed to read build plan '{path}': {source}")]
    ConfigRead {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The build plan file is not valid TOML or does not match the schema.
    #[error("Failed to parse build plan '{path}': {detail}")]
    ConfigParse { path: PathBuf, detail: String },

    // ── Filesystem errors ─────────────────────────────────────────────────
    /// A stale output could not be removed before the run.
    #[error("Failed to clean '{path}': {source}")]
    CleanupFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Bundled css/js assets could not be copied into an output directory.
    #[error("Failed to copy resources into '{path}': {source}")]
    ResourceCopyFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    // ── Outcome errors ────────────────────────────────────────────────────
    /// Some documents succeeded but at least one failed.
    ///
    /// Returned by [`crate::output::BuildReport::into_result`] when the
    /// caller wants to treat any document failure as an error.
    #[error("{failed}/{total} documents failed during the build")]
    PartialFailure { failed: usize, total: usize },
}

impl BuildError {
    pub(crate) fn engine(engine: impl Into<String>, detail: impl Into<String>) -> Self {
        Self::EngineInit {
            engine: engine.into(),
            detail: detail.into(),
        }
    }
}

/// A schema conformity failure, located in the intermediate XML.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
#[error("{}", format_violation(.line, .column, .message))]
pub struct SchemaViolation {
    /// 1-indexed line, when the validator reports one.
    pub line: Option<usize>,
    /// 1-indexed column, when the validator reports one.
    pub column: Option<usize>,
    pub message: String,
}

impl SchemaViolation {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            line: None,
            column: None,
            message: message.into(),
        }
    }

    pub fn at(line: usize, column: usize, message: impl Into<String>) -> Self {
        Self {
            line: Some(line),
            column: Some(column),
            message: message.into(),
        }
    }
}

fn format_violation(line: &Option<usize>, column: &Option<usize>, message: &str) -> String {
    match (line, column) {
        (Some(l), Some(c)) => format!("line {l}, column {c}: {message}"),
        (Some(l), None) => format!("line {l}: {message}"),
        _ => message.to_string(),
    }
}

/// Why a single stylesheet stage rejected its input.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StageFailure {
    /// The stage received an artifact of the wrong kind (e.g. PDF bytes into XSLT).
    #[error("expected {expected} input")]
    WrongInput { expected: &'static str },

    /// The processor ran and reported a failure.
    #[error("{processor} failed: {detail}")]
    Processor { processor: String, detail: String },

    /// The processor could not be started or its I/O failed.
    #[error("{processor} could not run: {detail}")]
    Io { processor: String, detail: String },

    /// The chain names a stage the engine does not know.
    #[error("stage is not registered")]
    Unregistered,
}

/// Why the markup converter rejected a source.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{detail}")]
pub struct ConversionFailure {
    pub detail: String,
}

impl ConversionFailure {
    pub fn new(detail: impl Into<String>) -> Self {
        Self {
            detail: detail.into(),
        }
    }
}

/// A non-fatal error for a single document.
///
/// Stored alongside [`crate::output::DocumentReport`] when a document fails.
/// The build run continues with the next document.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum DocumentError {
    /// No `<name>.<ext>` file in the input directory.
    #[error("{document}: source not found at '{path}'")]
    SourceNotFound { document: String, path: PathBuf },

    /// The source exists but could not be read as UTF-8 text.
    #[error("{document}: cannot read '{path}': {detail}")]
    SourceUnreadable {
        document: String,
        path: PathBuf,
        detail: String,
    },

    /// The markup converter rejected the source.
    #[error("{document}: conversion to DocBook failed: {detail}")]
    Conversion { document: String, detail: String },

    /// The intermediate DocBook failed the conformity gate.
    #[error("{document}: DocBook is not valid: {violation}")]
    SchemaViolation {
        document: String,
        violation: SchemaViolation,
    },

    /// A stylesheet stage of one output target failed.
    #[error("{document}: stage '{stage}' failed for target '{target}': {detail}")]
    Transformation {
        document: String,
        target: PathBuf,
        stage: String,
        detail: String,
    },

    /// An artifact could not be written.
    #[error("{document}: failed to write '{path}': {detail}")]
    Write {
        document: String,
        path: PathBuf,
        detail: String,
    },
}

impl DocumentError {
    /// Name of the document this error belongs to.
    pub fn document(&self) -> &str {
        match self {
            Self::SourceNotFound { document, .. }
            | Self::SourceUnreadable { document, .. }
            | Self::Conversion { document, .. }
            | Self::SchemaViolation { document, .. }
            | Self::Transformation { document, .. }
            | Self::Write { document, .. } => document,
        }
    }

    /// Short label of the pipeline stage that failed, used in logs.
    pub fn stage(&self) -> &str {
        match self {
            Self::SourceNotFound { .. } | Self::SourceUnreadable { .. } => "resolve",
            Self::Conversion { .. } => "convert",
            Self::SchemaViolation { .. } => "validate",
            Self::Transformation { stage, .. } => stage,
            Self::Write { .. } => "write",
        }
    }
}
