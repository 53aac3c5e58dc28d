//! Stylesheet transformation: the validated DocBook through a chain of stages.
//!
//! A stage is anything implementing [`StageProcessor`]. Two are provided:
//!
//! * [`XsltStage`] — an XSLT stylesheet run by `xsltproc` or Saxon. Imports
//!   are resolved through the run's XML catalog.
//! * [`FoToPdfStage`] — XSL-FO formatted to PDF by Apache FOP.
//!
//! [`TransformationEngine`] holds the stages a run references, each built and
//! resolved once at Init, and applies named chains of them. Chains of all
//! documents advance together, so a stage sees every document that needs it
//! in one [`StageProcessor::apply_batch`] call.

use crate::config::{BuildConfig, ProcessorKind, StageKind};
use crate::error::{BuildError, StageFailure};
use crate::pipeline::resolve::resolve_stylesheet;
use crate::pipeline::stylesheet::{batch_driver, batch_manifest, output_properties, OutputProperties};
use crate::pipeline::tool;
use crate::resources::Workspace;
use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::process::Command;
use tracing::{debug, info, warn};

/// Output of a stage: text for XML-producing stages, bytes for PDF.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Artifact {
    Text(String),
    Binary(Vec<u8>),
}

impl Artifact {
    pub fn as_bytes(&self) -> &[u8] {
        match self {
            Artifact::Text(s) => s.as_bytes(),
            Artifact::Binary(b) => b,
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            Artifact::Text(s) => Some(s),
            Artifact::Binary(_) => None,
        }
    }

    pub fn len(&self) -> usize {
        self.as_bytes().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// One transformation step.
pub trait StageProcessor {
    /// Stage name as declared in the configuration.
    fn name(&self) -> &str;

    /// Extension of the artifact this stage produces, without the dot.
    fn extension(&self) -> &str;

    fn apply(&self, input: &Artifact) -> Result<Artifact, StageFailure>;

    /// Apply the stage to several inputs, one result per input in order.
    ///
    /// The default applies them one at a time. Processors with a start-up
    /// cost override this to load once for the whole batch.
    fn apply_batch(&self, inputs: &[&Artifact]) -> Vec<Result<Artifact, StageFailure>> {
        inputs.iter().map(|input| self.apply(input)).collect()
    }
}

// ── XSLT ─────────────────────────────────────────────────────────────────

/// An XSLT stylesheet applied by an external processor.
///
/// A batch is one processor run: the stylesheet is loaded once and applied
/// to every input. If that run fails, the inputs are retried one per run so
/// a single bad document cannot fail the others.
#[derive(Debug, Clone)]
pub struct XsltStage {
    name: String,
    extension: String,
    processor: ProcessorKind,
    exe: PathBuf,
    stylesheet: PathBuf,
    catalog: Option<PathBuf>,
    params: BTreeMap<String, String>,
    output: OutputProperties,
}

impl XsltStage {
    pub fn new(
        name: impl Into<String>,
        extension: impl Into<String>,
        processor: ProcessorKind,
        exe: impl Into<PathBuf>,
        stylesheet: impl Into<PathBuf>,
    ) -> Self {
        Self {
            name: name.into(),
            extension: extension.into(),
            processor,
            exe: exe.into(),
            stylesheet: stylesheet.into(),
            catalog: None,
            params: BTreeMap::new(),
            output: OutputProperties::new(),
        }
    }

    /// Resolve imports through the OASIS catalog at `path`.
    pub fn with_catalog(mut self, path: impl Into<PathBuf>) -> Self {
        self.catalog = Some(path.into());
        self
    }

    pub fn with_params(mut self, params: BTreeMap<String, String>) -> Self {
        self.params = params;
        self
    }

    /// Serialization settings for `xsltproc` batch results, as read from
    /// the stylesheet's `xsl:output`.
    pub fn with_output(mut self, output: OutputProperties) -> Self {
        self.output = output;
        self
    }

    /// `xsltproc` runs the batch driver over the manifest.
    fn xsltproc_command(&self, driver: &Path, manifest: &Path) -> Command {
        let mut cmd = Command::new(&self.exe);
        cmd.arg("--nonet");
        for (name, value) in &self.params {
            cmd.arg("--stringparam").arg(name).arg(value);
        }
        cmd.arg(driver).arg(manifest);
        if let Some(ref catalog) = self.catalog {
            cmd.env("XML_CATALOG_FILES", catalog);
        }
        cmd
    }

    /// Saxon transforms a whole input directory into an output directory.
    fn saxon_command(&self, input_dir: &Path, output_dir: &Path) -> Command {
        let mut cmd = Command::new(&self.exe);
        cmd.arg(format!("-s:{}", input_dir.display()))
            .arg(format!("-o:{}", output_dir.display()))
            .arg(format!("-xsl:{}", self.stylesheet.display()));
        if let Some(ref catalog) = self.catalog {
            cmd.arg(format!("-catalog:{}", catalog.display()));
        }
        for (name, value) in &self.params {
            cmd.arg(format!("{name}={value}"));
        }
        cmd
    }

    /// Run the processor once over `xmls`.
    ///
    /// `Err` means the run as a whole failed. Otherwise there is one result
    /// per input.
    fn run_batch(&self, xmls: &[&str]) -> Result<Vec<Result<Artifact, StageFailure>>, StageFailure> {
        let io = |e: std::io::Error| self.io_failure(e);

        let dir = tempfile::Builder::new()
            .prefix("docbook-build-xslt-")
            .tempdir()
            .map_err(io)?;
        let input_dir = dir.path().join("in");
        let output_dir = dir.path().join("out");
        std::fs::create_dir_all(&input_dir)
            .and_then(|()| std::fs::create_dir_all(&output_dir))
            .map_err(io)?;

        let mut items = Vec::with_capacity(xmls.len());
        for (i, xml) in xmls.iter().enumerate() {
            let file_name = format!("doc-{i}.xml");
            let input = input_dir.join(&file_name);
            std::fs::write(&input, xml).map_err(io)?;
            items.push((input, output_dir.join(file_name)));
        }

        let cmd = match self.processor {
            ProcessorKind::Xsltproc => {
                let driver = dir.path().join("driver.xsl");
                let manifest = dir.path().join("batch.xml");
                std::fs::write(&driver, batch_driver(&self.stylesheet, &self.output)).map_err(io)?;
                std::fs::write(&manifest, batch_manifest(&items)).map_err(io)?;
                self.xsltproc_command(&driver, &manifest)
            }
            ProcessorKind::Saxon => self.saxon_command(&input_dir, &output_dir),
        };
        debug!(
            "Stage '{}': {} documents in one {} run",
            self.name,
            xmls.len(),
            self.processor_name()
        );

        // `dir` lives until every result has been read back.
        let out = tool::run(cmd, &[]).map_err(io)?;
        if !out.success {
            return Err(self.failure(out.failure_detail()));
        }
        Ok(items.iter().map(|(_, output)| self.read_result(output)).collect())
    }

    fn read_result(&self, path: &Path) -> Result<Artifact, StageFailure> {
        let bytes = match std::fs::read(path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(self.failure("stylesheet produced no output"))
            }
            Err(e) => return Err(self.io_failure(e)),
        };
        let text = String::from_utf8(bytes)
            .map_err(|e| self.failure(format!("output is not UTF-8: {e}")))?;
        if text.trim().is_empty() {
            return Err(self.failure("stylesheet produced no output"));
        }
        Ok(Artifact::Text(text))
    }

    fn failure(&self, detail: impl Into<String>) -> StageFailure {
        StageFailure::Processor {
            processor: self.processor_name().to_string(),
            detail: detail.into(),
        }
    }

    fn io_failure(&self, e: impl fmt::Display) -> StageFailure {
        StageFailure::Io {
            processor: self.processor_name().to_string(),
            detail: e.to_string(),
        }
    }

    fn processor_name(&self) -> &'static str {
        match self.processor {
            ProcessorKind::Xsltproc => "xsltproc",
            ProcessorKind::Saxon => "saxon",
        }
    }
}

impl StageProcessor for XsltStage {
    fn name(&self) -> &str {
        &self.name
    }

    fn extension(&self) -> &str {
        &self.extension
    }

    fn apply(&self, input: &Artifact) -> Result<Artifact, StageFailure> {
        self.apply_batch(&[input])
            .pop()
            .unwrap_or_else(|| Err(self.failure("no result")))
    }

    fn apply_batch(&self, inputs: &[&Artifact]) -> Vec<Result<Artifact, StageFailure>> {
        let mut results: Vec<Option<Result<Artifact, StageFailure>>> = vec![None; inputs.len()];
        let mut texts = Vec::with_capacity(inputs.len());
        let mut slots = Vec::with_capacity(inputs.len());
        for (i, input) in inputs.iter().enumerate() {
            match input.as_text() {
                Some(text) => {
                    texts.push(text);
                    slots.push(i);
                }
                None => results[i] = Some(Err(StageFailure::WrongInput { expected: "XML" })),
            }
        }

        if !texts.is_empty() {
            match self.run_batch(&texts) {
                Ok(outputs) => {
                    for (slot, output) in slots.iter().zip(outputs) {
                        results[*slot] = Some(output);
                    }
                }
                Err(failure) if texts.len() == 1 => results[slots[0]] = Some(Err(failure)),
                Err(failure) => {
                    warn!(
                        "Stage '{}': batch of {} failed ({}); retrying one document per run",
                        self.name,
                        texts.len(),
                        failure
                    );
                    for (slot, text) in slots.iter().zip(&texts) {
                        let single = self
                            .run_batch(std::slice::from_ref(text))
                            .and_then(|mut one| one.pop().ok_or_else(|| self.failure("no result")))
                            .and_then(|result| result);
                        results[*slot] = Some(single);
                    }
                }
            }
        }

        results
            .into_iter()
            .map(|r| r.unwrap_or_else(|| Err(self.failure("no result"))))
            .collect()
    }
}

// ── FO to PDF ────────────────────────────────────────────────────────────

/// XSL-FO formatted to PDF by Apache FOP.
#[derive(Debug, Clone)]
pub struct FoToPdfStage {
    name: String,
    exe: PathBuf,
}

impl FoToPdfStage {
    pub fn new(name: impl Into<String>, exe: impl Into<PathBuf>) -> Self {
        Self {
            name: name.into(),
            exe: exe.into(),
        }
    }

    fn command(&self) -> Command {
        let mut cmd = Command::new(&self.exe);
        cmd.args(["-q", "-fo", "-", "-pdf", "-"]);
        cmd
    }
}

impl StageProcessor for FoToPdfStage {
    fn name(&self) -> &str {
        &self.name
    }

    fn extension(&self) -> &str {
        "pdf"
    }

    fn apply(&self, input: &Artifact) -> Result<Artifact, StageFailure> {
        let fo = input
            .as_text()
            .ok_or(StageFailure::WrongInput { expected: "XSL-FO" })?;
        let out = tool::run(self.command(), fo.as_bytes()).map_err(|e| StageFailure::Io {
            processor: "fop".into(),
            detail: e.to_string(),
        })?;
        if !out.success {
            return Err(StageFailure::Processor {
                processor: "fop".into(),
                detail: out.failure_detail(),
            });
        }
        if !out.stdout.starts_with(b"%PDF") {
            return Err(StageFailure::Processor {
                processor: "fop".into(),
                detail: "output is not a PDF".into(),
            });
        }
        Ok(Artifact::Binary(out.stdout))
    }
}

// ── Engine ───────────────────────────────────────────────────────────────

/// One stage's output within a chain.
#[derive(Debug, Clone)]
pub struct StageOutput {
    pub stage: String,
    pub extension: String,
    pub artifact: Artifact,
}

/// A chain stopped at `stage`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChainFailure {
    pub stage: String,
    pub failure: StageFailure,
}

impl fmt::Display for ChainFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "stage '{}': {}", self.stage, self.failure)
    }
}

impl std::error::Error for ChainFailure {}

/// A chain of stages to apply to one DocBook input.
#[derive(Debug, Clone, Copy)]
pub struct ChainJob<'a> {
    pub input: &'a str,
    pub chain: &'a [String],
}

pub type ChainResult = Result<Vec<StageOutput>, ChainFailure>;

/// Registry of the stages available to a run.
#[derive(Default)]
pub struct TransformationEngine {
    stages: BTreeMap<String, Box<dyn StageProcessor>>,
}

impl fmt::Debug for TransformationEngine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TransformationEngine")
            .field("stages", &self.stages.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl TransformationEngine {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `stage` under its own name, replacing any previous stage of that name.
    pub fn register(&mut self, stage: Box<dyn StageProcessor>) {
        self.stages.insert(stage.name().to_string(), stage);
    }

    pub fn stage(&self, name: &str) -> Option<&dyn StageProcessor> {
        self.stages.get(name).map(|s| s.as_ref())
    }

    /// Build every stage the configuration's documents reference.
    ///
    /// Each stylesheet is resolved once here; a stage no document uses is
    /// never resolved, so an unused broken stylesheet does not abort the run.
    ///
    /// # Errors
    /// [`BuildError::EngineInit`] when a processor is missing,
    /// [`BuildError::StylesheetUnresolved`] when a stylesheet cannot be found.
    pub fn from_config(config: &BuildConfig, workspace: &Workspace) -> Result<Self, BuildError> {
        let mut engine = Self::new();
        let mut xslt_exe: Option<PathBuf> = None;
        let mut fop_exe: Option<PathBuf> = None;

        for name in config.referenced_stages() {
            let stage = config.stages.get(name).ok_or_else(|| {
                BuildError::InvalidConfig(format!("unknown stage '{name}'"))
            })?;

            match stage.kind {
                StageKind::Xslt => {
                    let reference = stage.stylesheet.as_ref().ok_or_else(|| {
                        BuildError::InvalidConfig(format!("xslt stage '{name}' needs a stylesheet"))
                    })?;
                    let stylesheet = resolve_stylesheet(name, reference, workspace.resolver())?;
                    let exe = match xslt_exe {
                        Some(ref exe) => exe.clone(),
                        None => {
                            let exe = locate_xslt(config)?;
                            xslt_exe = Some(exe.clone());
                            exe
                        }
                    };
                    let output = match config.processor {
                        ProcessorKind::Xsltproc => output_properties(&stylesheet, workspace.resolver()),
                        ProcessorKind::Saxon => OutputProperties::new(),
                    };
                    engine.register(Box::new(
                        XsltStage::new(name, &stage.extension, config.processor, exe, stylesheet)
                            .with_catalog(workspace.catalog_path())
                            .with_params(stage.params.clone())
                            .with_output(output),
                    ));
                }
                StageKind::FoToPdf => {
                    let exe = match fop_exe {
                        Some(ref exe) => exe.clone(),
                        None => {
                            let exe = tool::locate("fop", config.executables.fop.as_deref())?;
                            if let Ok(Some(v)) = tool::probe_version(&exe, "-version") {
                                info!("FO processor: {}", v);
                            }
                            fop_exe = Some(exe.clone());
                            exe
                        }
                    };
                    engine.register(Box::new(FoToPdfStage::new(name, exe)));
                }
            }
        }

        debug!("Transformation engine ready: {:?}", engine);
        Ok(engine)
    }

    /// Apply `chain` to `xml`, returning every stage's output in order.
    ///
    /// The input of each stage is the output of the one before it. An empty
    /// chain yields no outputs.
    pub fn run_chain(&self, xml: &str, chain: &[String]) -> ChainResult {
        self.run_chains(&[ChainJob { input: xml, chain }])
            .pop()
            .unwrap_or_else(|| Ok(Vec::new()))
    }

    /// Apply several chains at once, one result per job in order.
    ///
    /// Each result is what [`Self::run_chain`] gives for that job alone. The
    /// jobs waiting on a stage go through it in a single
    /// [`StageProcessor::apply_batch`] call; a stage runs once per build
    /// unless chains use stages in conflicting orders.
    pub fn run_chains(&self, jobs: &[ChainJob<'_>]) -> Vec<ChainResult> {
        let sources: Vec<Artifact> = jobs.iter().map(|j| Artifact::Text(j.input.to_string())).collect();
        let mut outputs: Vec<Vec<StageOutput>> = vec![Vec::new(); jobs.len()];
        let mut failures: Vec<Option<ChainFailure>> = vec![None; jobs.len()];

        loop {
            let pending: Vec<&[String]> = (0..jobs.len())
                .map(|i| {
                    let done = match failures[i] {
                        Some(_) => jobs[i].chain.len(),
                        None => outputs[i].len(),
                    };
                    jobs[i].chain.get(done..).unwrap_or(&[])
                })
                .collect();
            let Some(name) = next_stage(&pending) else {
                break;
            };
            let name = name.to_string();
            let members: Vec<usize> = (0..jobs.len())
                .filter(|&i| pending[i].first().map(String::as_str) == Some(name.as_str()))
                .collect();

            let Some(stage) = self.stage(&name) else {
                for i in members {
                    failures[i] = Some(ChainFailure {
                        stage: name.clone(),
                        failure: StageFailure::Unregistered,
                    });
                }
                continue;
            };

            let results = {
                let inputs: Vec<&Artifact> = members
                    .iter()
                    .map(|&i| outputs[i].last().map_or(&sources[i], |o| &o.artifact))
                    .collect();
                stage.apply_batch(&inputs)
            };
            let mut results = results.into_iter();
            for i in members {
                match results.next() {
                    Some(Ok(artifact)) => {
                        debug!("Stage '{}' produced {} bytes", name, artifact.len());
                        outputs[i].push(StageOutput {
                            stage: name.clone(),
                            extension: stage.extension().to_string(),
                            artifact,
                        });
                    }
                    Some(Err(failure)) => {
                        failures[i] = Some(ChainFailure {
                            stage: name.clone(),
                            failure,
                        })
                    }
                    None => {
                        failures[i] = Some(ChainFailure {
                            stage: name.clone(),
                            failure: StageFailure::Processor {
                                processor: name.clone(),
                                detail: "stage returned no result".into(),
                            },
                        })
                    }
                }
            }
        }

        outputs
            .into_iter()
            .zip(failures)
            .map(|(outputs, failure)| match failure {
                Some(failure) => Err(failure),
                None => Ok(outputs),
            })
            .collect()
    }
}

/// The stage to run next, given each job's remaining chain.
///
/// Prefers a stage no job needs again after its next step, so one batch
/// serves every job that uses it. Falls back to the first waiting job's
/// stage when chains order their stages inconsistently.
fn next_stage<'a>(pending: &[&'a [String]]) -> Option<&'a str> {
    let mut waiting = pending.iter().copied().filter_map(<[String]>::first);
    let first = waiting.next()?;
    let ready = std::iter::once(first).chain(waiting).find(|name| {
        pending
            .iter()
            .all(|chain| !chain.iter().skip(1).any(|s| s == *name))
    });
    Some(ready.unwrap_or(first).as_str())
}

fn locate_xslt(config: &BuildConfig) -> Result<PathBuf, BuildError> {
    let (tool_name, explicit, flag) = match config.processor {
        ProcessorKind::Xsltproc => ("xsltproc", config.executables.xsltproc.as_deref(), "--version"),
        ProcessorKind::Saxon => ("saxon", config.executables.saxon.as_deref(), "-?"),
    };
    let exe = tool::locate(tool_name, explicit)?;
    match tool::probe_version(&exe, flag) {
        Ok(Some(v)) => info!("XSLT processor: {}", v),
        Ok(None) => debug!("{} did not report a version", exe.display()),
        Err(e) => {
            return Err(BuildError::engine(
                tool_name,
                format!("cannot run '{}': {e}", exe.display()),
            ))
        }
    }
    Ok(exe)
}
