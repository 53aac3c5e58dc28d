//! # docbook-build
//!
//! Build a set of AsciiDoc documents into HTML (and optionally PDF) through
//! DocBook.
//!
//! ## Why DocBook in the middle?
//!
//! AsciiDoc is pleasant to write but its HTML backends are hard to restyle
//! consistently across a course's worth of documents. Converting to DocBook 5
//! first gives a schema-checked intermediate form, and from there the same
//! document can go through any XSLT stylesheet: the house HTML style, a
//! per-document variant, or DocBook XSL's FO output for PDF.
//!
//! ## Pipeline Overview
//!
//! ```text
//! Name.adoc
//!  │
//!  ├─ 1. Clean     remove stale Name.html / .fo / .pdf, css/, js/
//!  ├─ 2. Resolve   find Name.adoc in the input directory
//!  ├─ 3. Convert   asciidoctor → DocBook 5
//!  ├─ 4. Validate  conformity gate (embedded rules or RELAX NG)
//!  ├─ 5. Transform stage chain per target: html | fo → pdf
//!  ├─ 6. Write     atomic write into the target directory
//!  └─ 7. Resources css/ and js/ next to every HTML output
//! ```
//!
//! A document that fails any step is reported and skipped; the others are
//! still built.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use docbook_build::{build, BuildConfig, DocumentSpec, OutputTarget};
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = BuildConfig::builder()
//!         .input_dir("..")
//!         .document(DocumentSpec::new("Course").target(OutputTarget::html("../../Online Pages")))
//!         .document(DocumentSpec::new("Ex1").target(OutputTarget::html("../../Online Pages")))
//!         .resource_dir("../../Local")
//!         .build()?;
//!     let report = build(config)?;
//!     eprintln!("{}/{} documents built",
//!         report.stats.succeeded,
//!         report.stats.total_documents);
//!     Ok(())
//! }
//! ```
//!
//! ## Feature Flags
//!
//! | Feature | Default | Description |
//! |---------|---------|-------------|
//! | `cli`   | on      | Enables the `docbook-build` binary (clap + anyhow + indicatif + tracing-subscriber) |
//!
//! Disable `cli` when using only the library:
//! ```toml
//! docbook-build = { version = "0.1", default-features = false }
//! ```
//!
//! ## External tools
//!
//! | Tool | Needed for |
//! |------|------------|
//! | `asciidoctor` | always |
//! | `xsltproc` or `saxon` | any `xslt` stage |
//! | `fop` | `fo-to-pdf` stages |
//! | `xmllint` | schema validation, unless `validator = "embedded"` |
//!
//! Each is looked up on `PATH` unless an explicit path is configured, and all
//! are located before anything is cleaned.

// ── Modules ──────────────────────────────────────────────────────────────

pub mod build;
pub mod config;
pub mod error;
pub mod output;
pub mod pipeline;
pub mod progress;
pub mod resources;

// ── Re-exports ───────────────────────────────────────────────────────────

pub use build::{build, BuildRun, Engines};
pub use config::{
    BuildConfig, BuildConfigBuilder, ConverterOptions, DocumentSpec, Executables, FailureLevel,
    OutputTarget, ProcessorKind, RewriteRule, StageConfig, StageKind, StylesheetRef, ValidatorKind,
};
pub use error::{BuildError, ConversionFailure, DocumentError, SchemaViolation, StageFailure};
pub use output::{ArtifactRecord, BuildReport, BuildStats, DocumentReport};
pub use pipeline::convert::MarkupConverter;
pub use pipeline::transform::{Artifact, StageProcessor, TransformationEngine};
pub use pipeline::validate::ConformityChecker;
pub use progress::{BuildProgressCallback, NoopProgressCallback, ProgressCallback};
