//! The build orchestrator.
//!
//! A [`BuildRun`] moves through four phases:
//!
//! ```text
//! Init ──▶ Clean ──▶ Documents ──▶ Resources ──▶ Teardown
//!  │         │            │             │
//!  │         │            │             └─ css/js into every HTML directory
//!  │         │            └─ resolve → convert → validate → chains, each
//!  │         │               step one batch over the surviving documents;
//!  │         │               then per document, in order: write targets
//!  │         └─ stale outputs removed from every output directory
//!  └─ engines acquired, stylesheets resolved, bundle extracted
//! ```
//!
//! A fatal error in Init or Clean aborts the run before any document is
//! touched. A document-level failure drops that document from the later
//! batches and is recorded in its report; the other documents carry on. The
//! conversion engine is released exactly once whichever way the run ends.

use crate::config::{BuildConfig, DocumentSpec, OutputTarget, ValidatorKind, INTERMEDIATE_EXTENSION};
use crate::error::{BuildError, ConversionFailure, DocumentError, SchemaViolation};
use crate::output::{ArtifactRecord, BuildReport, BuildStats, DocumentReport};
use crate::pipeline::clean;
use crate::pipeline::convert::{AsciidoctorConverter, ConverterGuard, MarkupConverter};
use crate::pipeline::source::{self, SourceDocument};
use crate::pipeline::transform::{ChainJob, ChainResult, StageOutput, TransformationEngine};
use crate::pipeline::validate::{ConformityChecker, DocBookChecker, RelaxNgChecker};
use crate::pipeline::write;
use crate::progress::BuildProgressCallback;
use crate::resources::{self, Workspace};
use std::path::PathBuf;
use std::time::Instant;
use tracing::{debug, info, warn};

/// The three engines a run drives.
pub struct Engines {
    pub converter: Box<dyn MarkupConverter>,
    pub checker: Box<dyn ConformityChecker>,
    pub transformer: TransformationEngine,
}

/// One execution of the build over a fixed configuration.
pub struct BuildRun {
    config: BuildConfig,
    converter: ConverterGuard,
    checker: Box<dyn ConformityChecker>,
    transformer: TransformationEngine,
    // Held so the extracted stylesheets and catalog outlive every stage.
    _workspace: Option<Workspace>,
}

impl BuildRun {
    /// Init: acquire the production engines for `config`.
    ///
    /// # Errors
    /// [`BuildError::EngineInit`] when a processor is missing and
    /// [`BuildError::StylesheetUnresolved`] when a referenced stylesheet
    /// cannot be found. Nothing has been cleaned or written at that point.
    pub fn new(config: BuildConfig) -> Result<Self, BuildError> {
        let converter = AsciidoctorConverter::new(config.executables.asciidoctor.as_deref())?
            .with_base_dir(&config.input_dir);
        // From here on the guard releases the engine if a later step fails.
        let converter = ConverterGuard::new(Box::new(converter));

        let workspace = Workspace::create(&config.resolver)?;
        let checker: Box<dyn ConformityChecker> = match config.validator {
            ValidatorKind::Embedded => Box::new(DocBookChecker::new()),
            ValidatorKind::Relaxng => Box::new(RelaxNgChecker::new(
                config.executables.xmllint.as_deref(),
                workspace.schema_path(),
            )?),
        };
        let transformer = TransformationEngine::from_config(&config, &workspace)?;

        Ok(Self {
            config,
            converter,
            checker,
            transformer,
            _workspace: Some(workspace),
        })
    }

    /// Build a run around caller-supplied engines.
    pub fn with_engines(config: BuildConfig, engines: Engines) -> Self {
        Self {
            config,
            converter: ConverterGuard::new(engines.converter),
            checker: engines.checker,
            transformer: engines.transformer,
            _workspace: None,
        }
    }

    /// Run every phase and report per-document outcomes.
    ///
    /// # Errors
    /// Only fatal errors: a failed clean, or a failed resource copy.
    /// Document failures are in the returned report.
    pub fn run(mut self) -> Result<BuildReport, BuildError> {
        let start = Instant::now();
        let total = self.config.documents.len();
        info!("Starting build: {} documents", total);

        // ── Clean ────────────────────────────────────────────────────────
        info!("Clearing.");
        let extensions = self.config.produced_extensions();
        for dir in self.config.dirs_to_clean() {
            clean::clean_output_dir(
                &dir,
                self.config.documents.iter().map(|d| d.name.as_str()),
                &extensions,
            )?;
        }

        if let Some(cb) = self.progress() {
            cb.on_build_start(total);
        }

        // ── Documents ────────────────────────────────────────────────────
        let phase_start = Instant::now();
        let prepared = self.prepare_documents();

        let mut reports = Vec::with_capacity(total);
        let mut html_dirs: Vec<PathBuf> = Vec::new();
        for (i, (doc, prepared)) in self.config.documents.iter().zip(prepared).enumerate() {
            if let Some(cb) = self.progress() {
                cb.on_document_start(&doc.name, i + 1, total);
            }

            let mut artifacts = Vec::new();
            let error = prepared
                .and_then(|p| self.write_document(doc, p, &mut artifacts, &mut html_dirs))
                .err();
            let report = DocumentReport {
                name: doc.name.clone(),
                artifacts,
                error,
                duration_ms: phase_start.elapsed().as_millis() as u64,
            };

            match report.error {
                None => {
                    info!("{}: {} artifacts", doc.name, report.artifacts.len());
                    if let Some(cb) = self.progress() {
                        cb.on_document_complete(&doc.name, report.artifacts.len());
                    }
                }
                Some(ref e) => {
                    warn!("{} failed at {}: {}", doc.name, e.stage(), e);
                    if let Some(cb) = self.progress() {
                        cb.on_document_error(&doc.name, &e.to_string());
                    }
                }
            }
            reports.push(report);
        }

        // ── Resources ────────────────────────────────────────────────────
        debug!("Copying resources.");
        let mut resource_dirs = html_dirs;
        for dir in &self.config.resource_dirs {
            if !resource_dirs.contains(dir) {
                resource_dirs.push(dir.clone());
            }
        }
        for dir in &resource_dirs {
            resources::copy_resources_to(dir)?;
        }

        // ── Teardown ─────────────────────────────────────────────────────
        self.converter.release();

        let succeeded = reports.iter().filter(|r| r.is_success()).count();
        let stats = BuildStats {
            total_documents: total,
            succeeded,
            failed: total - succeeded,
            artifacts_written: reports.iter().map(|r| r.artifacts.len()).sum(),
            resource_dirs: resource_dirs.len(),
            duration_ms: start.elapsed().as_millis() as u64,
        };
        info!(
            "Build complete: {}/{} documents, {} artifacts, {}ms",
            stats.succeeded, stats.total_documents, stats.artifacts_written, stats.duration_ms
        );
        if let Some(cb) = self.progress() {
            cb.on_build_complete(total, succeeded);
        }

        Ok(BuildReport {
            documents: reports,
            stats,
        })
    }

    fn progress(&self) -> Option<&dyn BuildProgressCallback> {
        self.config.progress_callback.as_deref()
    }

    /// Resolve, convert, validate and transform every document.
    ///
    /// Each step is one batch over the documents still standing, so every
    /// engine starts once per run. The result is in declaration order.
    fn prepare_documents(&self) -> Vec<Result<Prepared, DocumentError>> {
        let cfg = &self.config;
        let docs = &cfg.documents;

        let sources: Vec<Result<SourceDocument, DocumentError>> = docs
            .iter()
            .map(|d| source::resolve_source(&cfg.input_dir, &d.name, &cfg.source_extension))
            .collect();

        // ── convert
        let converted: Vec<Result<String, DocumentError>> = {
            let ready: Vec<&SourceDocument> = sources.iter().filter_map(|s| s.as_ref().ok()).collect();
            info!("Converting {} documents to DocBook.", ready.len());
            let mut results = match self.converter.get() {
                Some(_) if ready.is_empty() => Vec::new(),
                Some(converter) => converter.convert_batch(&ready, &cfg.converter),
                None => ready
                    .iter()
                    .map(|_| Err(ConversionFailure::new("conversion engine already released")))
                    .collect(),
            }
            .into_iter();
            sources
                .into_iter()
                .map(|s| {
                    let source = s?;
                    match results.next() {
                        Some(Ok(xml)) => Ok(xml),
                        Some(Err(f)) => Err(DocumentError::Conversion {
                            document: source.name,
                            detail: f.detail,
                        }),
                        None => Err(DocumentError::Conversion {
                            document: source.name,
                            detail: "conversion engine produced no result".into(),
                        }),
                    }
                })
                .collect()
        };

        // ── validate
        let validated: Vec<Result<String, DocumentError>> = {
            let ready: Vec<&str> = converted
                .iter()
                .filter_map(|c| c.as_ref().ok().map(String::as_str))
                .collect();
            info!("Validating {} DocBook documents.", ready.len());
            let mut verdicts = if ready.is_empty() {
                Vec::new().into_iter()
            } else {
                self.checker.verify_batch(&ready).into_iter()
            };
            converted
                .into_iter()
                .zip(docs)
                .map(|(c, doc)| {
                    let xml = c?;
                    match verdicts.next() {
                        Some(Ok(())) => Ok(xml),
                        Some(Err(violation)) => Err(DocumentError::SchemaViolation {
                            document: doc.name.clone(),
                            violation,
                        }),
                        None => Err(DocumentError::SchemaViolation {
                            document: doc.name.clone(),
                            violation: SchemaViolation::new("validator produced no verdict"),
                        }),
                    }
                })
                .collect()
        };

        // ── transform
        let mut chains: Vec<ChainResult> = {
            let jobs: Vec<ChainJob<'_>> = validated
                .iter()
                .zip(docs)
                .filter_map(|(v, doc)| v.as_ref().ok().map(|xml| (xml, doc)))
                .flat_map(|(xml, doc)| {
                    doc.targets.iter().map(move |t| ChainJob {
                        input: xml,
                        chain: &t.stages,
                    })
                })
                .collect();
            info!("Transforming {} targets.", jobs.len());
            self.transformer.run_chains(&jobs)
        }
        .into_iter()
        .rev()
        .collect();

        validated
            .into_iter()
            .zip(docs)
            .map(|(v, doc)| {
                let xml = v?;
                let chains = doc
                    .targets
                    .iter()
                    .map(|_| chains.pop().unwrap_or_else(|| Ok(Vec::new())))
                    .collect();
                Ok(Prepared { xml, chains })
            })
            .collect()
    }

    /// Write every target of a prepared document in order.
    ///
    /// A failed chain stops the document: targets before it are written,
    /// later ones are not. A failed write is recorded and the remaining
    /// files are still attempted.
    fn write_document(
        &self,
        doc: &DocumentSpec,
        prepared: Prepared,
        artifacts: &mut Vec<ArtifactRecord>,
        html_dirs: &mut Vec<PathBuf>,
    ) -> Result<(), DocumentError> {
        let name = doc.name.as_str();
        let xml = prepared.xml.as_str();

        let mut first_write_error = None;
        for (target, chain) in doc.targets.iter().zip(prepared.chains) {
            let outputs = chain.map_err(|f| DocumentError::Transformation {
                document: name.to_string(),
                target: target.dir.clone(),
                stage: f.stage,
                detail: f.failure.to_string(),
            })?;
            debug!(
                "Writing {} [{}] into {}.",
                name,
                target.stages.join(" → "),
                target.dir.display()
            );

            for (ext, bytes) in files_for_target(target, xml, &outputs, self.config.write_intermediate) {
                let file_name = format!("{name}.{ext}");
                match write::write_artifact(&target.dir, &file_name, bytes) {
                    Ok(path) => {
                        artifacts.push(ArtifactRecord {
                            path,
                            bytes: bytes.len(),
                        });
                        if ext == "html" && !html_dirs.contains(&target.dir) {
                            html_dirs.push(target.dir.clone());
                        }
                    }
                    Err(e) => {
                        let path = target.dir.join(&file_name);
                        warn!("Cannot write {}: {}", path.display(), e);
                        first_write_error.get_or_insert(DocumentError::Write {
                            document: name.to_string(),
                            path,
                            detail: e.to_string(),
                        });
                    }
                }
            }
        }

        match first_write_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}

/// A validated document with one chain result per target.
struct Prepared {
    xml: String,
    chains: Vec<ChainResult>,
}

/// The `(extension, bytes)` files a finished chain writes into its target.
///
/// The final stage's output always; every earlier stage's output when the
/// target keeps intermediates; the DocBook itself for an empty chain, or
/// next to HTML when `write_intermediate` is set.
fn files_for_target<'a>(
    target: &OutputTarget,
    xml: &'a str,
    outputs: &'a [StageOutput],
    write_intermediate: bool,
) -> Vec<(&'a str, &'a [u8])> {
    let Some(last) = outputs.len().checked_sub(1) else {
        return vec![(INTERMEDIATE_EXTENSION, xml.as_bytes())];
    };

    let mut files: Vec<(&str, &[u8])> = outputs
        .iter()
        .enumerate()
        .filter(|(i, _)| *i == last || target.keep_intermediates)
        .map(|(_, o)| (o.extension.as_str(), o.artifact.as_bytes()))
        .collect();
    if write_intermediate && outputs[last].extension == "html" {
        files.push((INTERMEDIATE_EXTENSION, xml.as_bytes()));
    }
    files
}

/// Build `config` with the production engines.
///
/// Convenience for `BuildRun::new(config)?.run()`.
pub fn build(config: BuildConfig) -> Result<BuildReport, BuildError> {
    BuildRun::new(config)?.run()
}
