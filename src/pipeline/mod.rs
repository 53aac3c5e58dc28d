//! Pipeline stages for AsciiDoc-to-HTML/PDF builds.
//!
//! Each submodule implements one step. The orchestrator in [`crate::build`]
//! strings them together; every engine sits behind a trait so runs can be
//! driven by in-process doubles.
//!
//! ## Data Flow
//!
//! ```text
//! source ──▶ convert ──▶ validate ──▶ transform ──▶ write
//! (.adoc)   (DocBook)    (gate)      (XSLT, FOP)   (atomic)
//! ```
//!
//! 1. [`source`]    — find and read `<Name>.adoc` in the input directory
//! 2. [`convert`]   — AsciiDoc to DocBook 5 through asciidoctor
//! 3. [`validate`]  — conformity gate; nothing past here sees invalid DocBook
//! 4. [`transform`] — named stage chains (HTML, FO, PDF) per output target
//! 5. [`write`]     — temp file + rename into the target directory
//!
//! Supporting modules: [`clean`] removes stale outputs before the run,
//! [`resolve`] maps stylesheet URIs onto local files, [`stylesheet`] reads
//! output settings and writes the batch driver, [`tool`] locates and runs
//! the external processors.
//!
//! Engines are driven in batches: one converter run, one validator run and
//! one run per XSLT stage cover all the documents of a build. FOP formats
//! one document per run.

pub mod clean;
pub mod convert;
pub mod resolve;
pub mod source;
pub mod stylesheet;
pub mod tool;
pub mod transform;
pub mod validate;
pub mod write;
