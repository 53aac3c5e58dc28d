//! CLI binary for docbook-build.
//!
//! A thin shim over the library crate that maps CLI flags or a TOML build
//! plan to `BuildConfig`, runs the build and prints the outcome.

use anyhow::{Context, Result};
use clap::Parser;
use docbook_build::{
    build, resources, BuildConfig, BuildProgressCallback, BuildReport, DocumentSpec,
    OutputTarget, ProcessorKind, ProgressCallback, StageConfig, StylesheetRef, ValidatorKind,
};
use indicatif::{ProgressBar, ProgressStyle};
use std::io;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tracing_subscriber::EnvFilter;

// ── ANSI colour helpers (no extra deps) ──────────────────────────────────────

fn green(s: &str) -> String {
    format!("\x1b[32m{s}\x1b[0m")
}
fn red(s: &str) -> String {
    format!("\x1b[31m{s}\x1b[0m")
}
fn dim(s: &str) -> String {
    format!("\x1b[2m{s}\x1b[0m")
}
fn bold(s: &str) -> String {
    format!("\x1b[1m{s}\x1b[0m")
}
fn cyan(s: &str) -> String {
    format!("\x1b[36m{s}\x1b[0m")
}

// ── CLI progress callback using indicatif ────────────────────────────────────

/// Terminal progress callback: a bar over the document list plus one log
/// line per finished document.
struct CliProgressCallback {
    bar: ProgressBar,
    /// Start of the document currently being built.
    started: Mutex<Option<Instant>>,
}

impl CliProgressCallback {
    fn new() -> Arc<Self> {
        let bar = ProgressBar::new(0);
        let spinner_style = ProgressStyle::with_template("{spinner:.cyan} {prefix:.bold}  {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner())
            .tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏", "⠿"]);
        bar.set_style(spinner_style);
        bar.set_prefix("Preparing");
        bar.set_message("Locating processors and cleaning outputs…");
        bar.enable_steady_tick(Duration::from_millis(80));

        Arc::new(Self {
            bar,
            started: Mutex::new(None),
        })
    }

    fn elapsed_secs(&self) -> f64 {
        self.started
            .lock()
            .ok()
            .and_then(|mut s| s.take())
            .map(|t| t.elapsed().as_secs_f64())
            .unwrap_or(0.0)
    }
}

impl BuildProgressCallback for CliProgressCallback {
    fn on_build_start(&self, total_documents: usize) {
        let style = ProgressStyle::with_template(
            "{spinner:.cyan} {prefix:.bold}  \
             [{bar:42.green/238}] {pos:>3}/{len} documents  \
             ⏱ {elapsed_precise}  {msg}",
        )
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("█▉▊▋▌▍▎▏  ")
        .tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏", "⠿"]);

        self.bar.set_length(total_documents as u64);
        self.bar.set_style(style);
        self.bar.set_prefix("Building");
        self.bar.println(format!(
            "{} {}",
            cyan("◆"),
            bold(&format!("Building {total_documents} documents…"))
        ));
    }

    fn on_document_start(&self, name: &str, _index: usize, _total: usize) {
        if let Ok(mut s) = self.started.lock() {
            *s = Some(Instant::now());
        }
        self.bar.set_message(name.to_string());
    }

    fn on_document_complete(&self, name: &str, artifacts: usize) {
        let secs = self.elapsed_secs();
        self.bar.println(format!(
            "  {} {:<16}  {:<12}  {}",
            green("✓"),
            name,
            dim(&format!("{artifacts} artifacts")),
            dim(&format!("{secs:.1}s")),
        ));
        self.bar.inc(1);
    }

    fn on_document_error(&self, name: &str, error: &str) {
        let secs = self.elapsed_secs();

        // Keep the log line on one terminal row.
        let msg = match error.char_indices().nth(100) {
            Some((cut, _)) => format!("{}\u{2026}", &error[..cut]),
            None => error.to_string(),
        };
        self.bar.println(format!(
            "  {} {:<16}  {}  {}",
            red("✗"),
            name,
            red(&msg),
            dim(&format!("{secs:.1}s")),
        ));
        self.bar.inc(1);
    }

    fn on_build_complete(&self, total_documents: usize, succeeded: usize) {
        let failed = total_documents.saturating_sub(succeeded);
        self.bar.finish_and_clear();

        if failed == 0 {
            eprintln!(
                "{} {} documents built successfully",
                green("✔"),
                bold(&succeeded.to_string())
            );
        } else {
            eprintln!(
                "{} {}/{} documents built  ({} failed)",
                if failed == total_documents {
                    red("✘")
                } else {
                    cyan("⚠")
                },
                bold(&succeeded.to_string()),
                total_documents,
                red(&failed.to_string()),
            );
        }
    }
}

const AFTER_HELP: &str = r#"EXAMPLES:
  # Build documents from a plan
  docbook-build --config build.toml

  # Build two documents from the current directory into ./site
  docbook-build -o site Course Ex1

  # Same, plus PDF through DocBook XSL and Apache FOP
  docbook-build -o site --pdf Course

  # Rebuild one document of a plan, keeping the other outputs
  docbook-build --config build.toml --no-clean Exam1

  # Machine-readable report
  docbook-build --config build.toml --json > report.json

EXTERNAL TOOLS:
  asciidoctor      AsciiDoc → DocBook (always required)
  xsltproc/saxon   XSLT stages (--processor)
  fop              FO → PDF (--pdf, or fo-to-pdf stages in a plan)
  xmllint          RELAX NG validation (default; --validator embedded skips it)

  Tools are looked up on PATH unless the plan's [executables] table names
  them. All of them are located before any output is cleaned.

ENVIRONMENT VARIABLES:
  RUST_LOG                 Override the log filter (e.g. docbook_build=debug)
  DOCBOOK_BUILD_CONFIG     Default for --config
"#;

/// Build AsciiDoc documents to HTML and PDF through DocBook.
#[derive(Parser, Debug)]
#[command(
    name = "docbook-build",
    version,
    about = "Build AsciiDoc documents to HTML and PDF through DocBook",
    long_about = "Convert AsciiDoc sources to DocBook 5 with asciidoctor, validate the DocBook, \
and render it through XSLT stylesheets to HTML (and through XSL-FO to PDF). Output directories \
are cleaned of stale outputs first, and the bundled css/js are copied next to the HTML.",
    color = clap::ColorChoice::Auto,
    after_long_help = AFTER_HELP
)]
struct Cli {
    /// Document names to build (without extension).
    ///
    /// With --config, restricts the plan to these documents.
    #[arg(value_name = "DOC")]
    documents: Vec<String>,

    /// TOML build plan.
    #[arg(short, long, env = "DOCBOOK_BUILD_CONFIG")]
    config: Option<PathBuf>,

    /// Directory holding the .adoc sources.
    #[arg(short, long)]
    input: Option<PathBuf>,

    /// Output directory for HTML (repeatable). Default: current directory.
    ///
    /// A plan declares its own targets, so this cannot be combined with --config.
    #[arg(short, long = "output", value_name = "DIR", conflicts_with = "config")]
    outputs: Vec<PathBuf>,

    /// Extra directory receiving css/js (repeatable).
    #[arg(long = "resource-dir", value_name = "DIR")]
    resource_dirs: Vec<PathBuf>,

    /// Stylesheet for the html stage: bundled:<file>, a URI, or a path.
    #[arg(long)]
    stylesheet: Option<String>,

    /// Also produce <Name>.fo and <Name>.pdf in every output directory.
    ///
    /// Not available with --config; declare a pdf target in the plan instead.
    #[arg(long, conflicts_with = "config")]
    pdf: bool,

    /// XSLT processor.
    #[arg(long, value_enum)]
    processor: Option<ProcessorArg>,

    /// DocBook validator.
    #[arg(long, value_enum)]
    validator: Option<ValidatorArg>,

    /// Do not clean output directories before building.
    #[arg(long)]
    no_clean: bool,

    /// Also write <Name>.dbk next to the HTML.
    #[arg(long)]
    write_docbook: bool,

    /// Print the build report as JSON on stdout.
    #[arg(long)]
    json: bool,

    /// Disable progress bar.
    #[arg(long)]
    no_progress: bool,

    /// Exit non-zero if any document failed.
    #[arg(long)]
    strict: bool,

    /// List the bundled resources and exit.
    #[arg(long)]
    list_resources: bool,

    /// Enable DEBUG-level tracing logs.
    #[arg(short, long)]
    verbose: bool,

    /// Suppress all output except errors.
    #[arg(short, long)]
    quiet: bool,
}

#[derive(clap::ValueEnum, Clone, Copy, Debug)]
enum ProcessorArg {
    Xsltproc,
    Saxon,
}

impl From<ProcessorArg> for ProcessorKind {
    fn from(v: ProcessorArg) -> Self {
        match v {
            ProcessorArg::Xsltproc => ProcessorKind::Xsltproc,
            ProcessorArg::Saxon => ProcessorKind::Saxon,
        }
    }
}

#[derive(clap::ValueEnum, Clone, Copy, Debug)]
enum ValidatorArg {
    Embedded,
    Relaxng,
}

impl From<ValidatorArg> for ValidatorKind {
    fn from(v: ValidatorArg) -> Self {
        match v {
            ValidatorArg::Embedded => ValidatorKind::Embedded,
            ValidatorArg::Relaxng => ValidatorKind::Relaxng,
        }
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    // ── Logging setup ────────────────────────────────────────────────────
    // INFO-level library logs are suppressed while the progress bar is
    // active; the bar's per-document lines carry the same information.
    let show_progress = !cli.quiet && !cli.no_progress && !cli.json;
    let filter = if cli.verbose {
        "debug"
    } else if cli.quiet || show_progress {
        "error"
    } else {
        "info"
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)),
        )
        .with_writer(io::stderr)
        .init();

    // ── List-resources mode ──────────────────────────────────────────────
    if cli.list_resources {
        for path in resources::list_resources() {
            println!("{path}");
        }
        return Ok(());
    }

    // ── Build config ─────────────────────────────────────────────────────
    let mut config = build_config(&cli)?;

    if show_progress {
        let cb = CliProgressCallback::new();
        config.progress_callback = Some(cb as ProgressCallback);
    }

    // ── Run build ────────────────────────────────────────────────────────
    let report = build(config).context("Build failed")?;

    if cli.json {
        let json = serde_json::to_string_pretty(&report).context("Failed to serialise report")?;
        println!("{json}");
    } else if !cli.quiet {
        print_summary(&report, show_progress);
    }

    if cli.strict {
        report.into_result().context("Some documents failed")?;
    }
    Ok(())
}

/// Map CLI args (and the plan, if any) to `BuildConfig`.
fn build_config(cli: &Cli) -> Result<BuildConfig> {
    let mut config = match cli.config {
        Some(ref path) => {
            let mut config = BuildConfig::from_file(path)
                .with_context(|| format!("Failed to load build plan {}", path.display()))?;
            if !cli.documents.is_empty() {
                for name in &cli.documents {
                    if !config.documents.iter().any(|d| &d.name == name) {
                        anyhow::bail!("Document '{}' is not declared in {}", name, path.display());
                    }
                }
                config.documents.retain(|d| cli.documents.contains(&d.name));
            }
            if let Some(ref input) = cli.input {
                config.input_dir = input.clone();
            }
            config.resource_dirs.extend(cli.resource_dirs.iter().cloned());
            config
        }
        None => config_from_flags(cli)?,
    };

    if let Some(p) = cli.processor {
        config.processor = p.into();
    }
    if let Some(v) = cli.validator {
        config.validator = v.into();
    }
    if let Some(ref s) = cli.stylesheet {
        let reference: StylesheetRef = s
            .parse()
            .map_err(|e: String| anyhow::anyhow!(e))
            .context("Invalid --stylesheet")?;
        config.stages.insert(
            "html".to_string(),
            StageConfig::xslt(reference, "html"),
        );
    }
    config.skip_clean |= cli.no_clean;
    config.write_intermediate |= cli.write_docbook;
    Ok(config)
}

/// Assemble a plan from flags: every DOC gets an HTML target (and a PDF
/// target with `--pdf`) in every output directory.
fn config_from_flags(cli: &Cli) -> Result<BuildConfig> {
    if cli.documents.is_empty() {
        anyhow::bail!("No documents given. Name at least one DOC, or pass --config.");
    }
    let outputs = if cli.outputs.is_empty() {
        vec![PathBuf::from(".")]
    } else {
        cli.outputs.clone()
    };

    let documents = cli.documents.iter().map(|name| {
        let mut doc = DocumentSpec::new(name.as_str());
        for dir in &outputs {
            doc = doc.target(OutputTarget::html(dir));
            if cli.pdf {
                doc = doc.target(OutputTarget::pdf(dir));
            }
        }
        doc
    });

    let mut builder = BuildConfig::builder()
        .input_dir(cli.input.clone().unwrap_or_else(|| PathBuf::from(".")))
        .documents(documents);
    for dir in &cli.resource_dirs {
        builder = builder.resource_dir(dir);
    }
    builder.build().context("Invalid configuration")
}

fn print_summary(report: &BuildReport, progress_shown: bool) {
    let stats = &report.stats;
    if !progress_shown {
        eprintln!(
            "Built {}/{} documents, {} artifacts in {}ms",
            stats.succeeded, stats.total_documents, stats.artifacts_written, stats.duration_ms
        );
    }
    for error in report.errors() {
        eprintln!("  {} {}", red("✗"), error);
    }
    if progress_shown {
        eprintln!(
            "   {} artifacts  —  css/js in {} directories  —  {}ms total",
            dim(&stats.artifacts_written.to_string()),
            dim(&stats.resource_dirs.to_string()),
            stats.duration_ms,
        );
    }
}
