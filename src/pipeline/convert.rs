//! Markup-to-DocBook conversion.
//!
//! [`MarkupConverter`] is the seam between the orchestrator and the engine
//! that turns AsciiDoc into DocBook. The production engine is
//! [`AsciidoctorConverter`], which drives the `asciidoctor` command with the
//! run's [`ConverterOptions`]. The engine is acquired once at Init and owned
//! by a [`ConverterGuard`], which releases it exactly once: explicitly at
//! teardown, or on drop for every other exit path.
//!
//! A run converts all of its sources in one asciidoctor process
//! ([`MarkupConverter::convert_batch`]). When that process reports a failure,
//! the sources are converted again one per process so the failure is
//! attributed to the right document.

use crate::config::{ConverterOptions, FailureLevel};
use crate::error::{BuildError, ConversionFailure};
use crate::pipeline::source::SourceDocument;
use crate::pipeline::tool;
use once_cell::sync::Lazy;
use regex::Regex;
use std::path::{Path, PathBuf};
use std::process::Command;
use tracing::{debug, info, warn};

/// Converts lightweight-markup source text into intermediate DocBook XML.
///
/// Implementations must be deterministic: identical source and options give
/// identical output.
pub trait MarkupConverter {
    /// Short engine name used in logs.
    fn name(&self) -> &str;

    fn convert(&self, source: &str, options: &ConverterOptions)
        -> Result<String, ConversionFailure>;

    /// Convert several sources, one result per source in order.
    ///
    /// The default converts them one at a time.
    fn convert_batch(
        &self,
        sources: &[&SourceDocument],
        options: &ConverterOptions,
    ) -> Vec<Result<String, ConversionFailure>> {
        sources
            .iter()
            .map(|s| self.convert(&s.text, options))
            .collect()
    }

    /// Release the underlying engine. Called once by [`ConverterGuard`].
    fn close(&mut self) {}
}

// ── Asciidoctor ──────────────────────────────────────────────────────────

/// A diagnostic line emitted by asciidoctor on stderr.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Diagnostic {
    pub level: FailureLevel,
    pub line: Option<usize>,
    pub message: String,
}

static RE_DIAGNOSTIC: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^asciidoctor: (?P<level>[A-Z]+): (?:[^:]*: )?(?:line (?P<line>\d+): )?(?P<msg>.*)$")
        .unwrap()
});

/// Parse asciidoctor's stderr into structured diagnostics.
///
/// Lines that do not follow the `asciidoctor: LEVEL: ...` shape are kept as
/// error-level diagnostics so nothing the converter said is lost.
pub fn parse_diagnostics(stderr: &str) -> Vec<Diagnostic> {
    stderr
        .lines()
        .map(str::trim_end)
        .filter(|l| !l.is_empty())
        .map(|line| match RE_DIAGNOSTIC.captures(line) {
            Some(caps) => Diagnostic {
                level: FailureLevel::from_label(&caps["level"]).unwrap_or(FailureLevel::Error),
                line: caps.name("line").and_then(|m| m.as_str().parse().ok()),
                message: caps["msg"].to_string(),
            },
            None => Diagnostic {
                level: FailureLevel::Error,
                line: None,
                message: line.to_string(),
            },
        })
        .collect()
}

fn describe(diagnostics: &[Diagnostic]) -> String {
    diagnostics
        .iter()
        .map(|d| match d.line {
            Some(line) => format!("line {}: {}", line, d.message),
            None => d.message.clone(),
        })
        .collect::<Vec<_>>()
        .join("; ")
}

/// The `asciidoctor` command-line converter.
#[derive(Debug)]
pub struct AsciidoctorConverter {
    exe: PathBuf,
    base_dir: Option<PathBuf>,
    closed: bool,
}

impl AsciidoctorConverter {
    /// Locate and probe asciidoctor.
    ///
    /// # Errors
    /// [`BuildError::EngineInit`] when the executable is missing or does not
    /// answer `--version`.
    pub fn new(explicit: Option<&Path>) -> Result<Self, BuildError> {
        let exe = tool::locate("asciidoctor", explicit)?;
        let version = tool::probe_version(&exe, "--version").map_err(|e| {
            BuildError::engine("asciidoctor", format!("cannot run '{}': {e}", exe.display()))
        })?;
        if version.is_none() {
            return Err(BuildError::engine(
                "asciidoctor",
                format!("'{} --version' failed", exe.display()),
            ));
        }
        info!(
            "Conversion engine: {}",
            version.as_deref().unwrap_or("asciidoctor")
        );
        Ok(Self {
            exe,
            base_dir: None,
            closed: false,
        })
    }

    /// Resolve `include::` directives and images relative to `dir`.
    pub fn with_base_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.base_dir = Some(dir.into());
        self
    }

    /// The full command line for one conversion, reading stdin, writing stdout.
    pub fn command(&self, options: &ConverterOptions) -> Command {
        let mut cmd = self.base_command(options);
        cmd.args(["--out-file", "-", "-"]);
        cmd
    }

    /// The command line converting `files` into `<dest>/<stem>.xml`.
    pub fn batch_command(&self, options: &ConverterOptions, dest: &Path, files: &[&Path]) -> Command {
        let mut cmd = self.base_command(options);
        cmd.arg("--destination-dir").arg(dest).args(files);
        cmd
    }

    fn base_command(&self, options: &ConverterOptions) -> Command {
        let mut cmd = Command::new(&self.exe);
        cmd.arg("--backend").arg(&options.backend);
        if !options.standalone {
            cmd.arg("--no-header-footer");
        }
        cmd.arg("--attribute")
            .arg(format!("relfilesuffix={}", options.relfilesuffix));
        for (name, value) in &options.attributes {
            cmd.arg("--attribute").arg(format!("{name}={value}"));
        }
        cmd.arg("--failure-level").arg(options.failure_level.as_arg());
        if let Some(ref dir) = self.base_dir {
            cmd.arg("--base-dir").arg(dir);
        }
        cmd
    }

    /// One asciidoctor process over every source.
    ///
    /// `Err` when the process reports a failure. A source whose output is
    /// missing gets `None`.
    fn run_batch(
        &self,
        sources: &[&SourceDocument],
        options: &ConverterOptions,
    ) -> Result<Vec<Option<String>>, ConversionFailure> {
        let dest = tempfile::Builder::new()
            .prefix("docbook-build-adoc-")
            .tempdir()
            .map_err(|e| ConversionFailure::new(format!("cannot create output directory: {e}")))?;
        let files: Vec<&Path> = sources.iter().map(|s| s.path.as_path()).collect();

        let out = tool::run(self.batch_command(options, dest.path(), &files), &[])
            .map_err(|e| ConversionFailure::new(format!("cannot run asciidoctor: {e}")))?;
        let diagnostics = parse_diagnostics(&out.stderr);
        if !out.success {
            let detail = if diagnostics.is_empty() {
                out.failure_detail()
            } else {
                describe(&diagnostics)
            };
            return Err(ConversionFailure::new(detail));
        }
        for d in diagnostics.iter().filter(|d| d.level >= FailureLevel::Warn) {
            warn!("asciidoctor: {}", describe(std::slice::from_ref(d)));
        }
        debug!("asciidoctor converted {} sources in one run", sources.len());

        Ok(sources
            .iter()
            .map(|s| {
                let stem = s.path.file_stem()?.to_string_lossy();
                let xml = std::fs::read_to_string(dest.path().join(format!("{stem}.xml"))).ok()?;
                (!xml.trim().is_empty()).then_some(xml)
            })
            .collect())
    }
}

impl MarkupConverter for AsciidoctorConverter {
    fn name(&self) -> &str {
        "asciidoctor"
    }

    fn convert(
        &self,
        source: &str,
        options: &ConverterOptions,
    ) -> Result<String, ConversionFailure> {
        if self.closed {
            return Err(ConversionFailure::new("conversion engine is closed"));
        }

        let out = tool::run(self.command(options), source.as_bytes())
            .map_err(|e| ConversionFailure::new(format!("cannot run asciidoctor: {e}")))?;

        let diagnostics = parse_diagnostics(&out.stderr);
        if !out.success {
            let detail = if diagnostics.is_empty() {
                out.failure_detail()
            } else {
                describe(&diagnostics)
            };
            return Err(ConversionFailure::new(detail));
        }
        for d in diagnostics.iter().filter(|d| d.level >= FailureLevel::Warn) {
            warn!("asciidoctor: {}", describe(std::slice::from_ref(d)));
        }

        let xml = String::from_utf8(out.stdout)
            .map_err(|e| ConversionFailure::new(format!("output is not UTF-8: {e}")))?;
        if xml.trim().is_empty() {
            return Err(ConversionFailure::new("converter produced no output"));
        }
        Ok(xml)
    }

    fn convert_batch(
        &self,
        sources: &[&SourceDocument],
        options: &ConverterOptions,
    ) -> Vec<Result<String, ConversionFailure>> {
        let one_by_one = |sources: &[&SourceDocument]| -> Vec<Result<String, ConversionFailure>> {
            sources.iter().map(|s| self.convert(&s.text, options)).collect()
        };
        if self.closed || sources.len() < 2 {
            return one_by_one(sources);
        }

        match self.run_batch(sources, options) {
            Ok(outputs) => sources
                .iter()
                .zip(outputs)
                .map(|(source, xml)| match xml {
                    Some(xml) => Ok(xml),
                    None => self.convert(&source.text, options),
                })
                .collect(),
            Err(failure) => {
                warn!(
                    "asciidoctor failed on a batch of {} ({}); converting one source per run",
                    sources.len(),
                    failure
                );
                one_by_one(sources)
            }
        }
    }

    fn close(&mut self) {
        self.closed = true;
    }
}

// ── Scoped engine handle ─────────────────────────────────────────────────

/// Owns the conversion engine for the lifetime of a build run.
///
/// [`ConverterGuard::release`] closes the engine; dropping an unreleased
/// guard closes it too, so early returns, `?` and panics during the run all
/// release the engine exactly once.
pub struct ConverterGuard {
    inner: Option<Box<dyn MarkupConverter>>,
}

impl ConverterGuard {
    pub fn new(converter: Box<dyn MarkupConverter>) -> Self {
        Self {
            inner: Some(converter),
        }
    }

    /// The engine, or `None` once released.
    pub fn get(&self) -> Option<&dyn MarkupConverter> {
        self.inner.as_deref()
    }

    pub fn is_released(&self) -> bool {
        self.inner.is_none()
    }

    /// Close the engine. Later calls do nothing.
    pub fn release(&mut self) {
        if let Some(mut converter) = self.inner.take() {
            debug!("Releasing conversion engine {}", converter.name());
            converter.close();
        }
    }
}

impl Drop for ConverterGuard {
    fn drop(&mut self) {
        self.release();
    }
}
