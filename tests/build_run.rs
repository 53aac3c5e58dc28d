//! Integration tests for the build orchestrator.
//!
//! Every engine is an in-process double, so these tests need no external
//! tools: the converter turns a tiny AsciiDoc subset into DocBook, the real
//! embedded checker gates it, and the stages wrap their input in markers
//! that make the applied chain visible in the written files.

use docbook_build::pipeline::validate::DocBookChecker;
use docbook_build::{
    Artifact, BuildConfig, BuildConfigBuilder, BuildError, BuildProgressCallback, BuildRun,
    ConversionFailure, ConverterOptions, DocumentError, DocumentSpec, Engines, MarkupConverter,
    OutputTarget, StageConfig, StageFailure, StageProcessor, StylesheetRef, TransformationEngine,
};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

// ── Test doubles ─────────────────────────────────────────────────────────────

/// Converts `= Title` plus body text into a DocBook article.
///
/// A source containing `BROKEN` is rejected; one containing `NOT-DOCBOOK`
/// converts to XML outside the DocBook namespace.
struct FakeConverter {
    closes: Arc<AtomicUsize>,
}

impl MarkupConverter for FakeConverter {
    fn name(&self) -> &str {
        "fake"
    }

    fn convert(&self, source: &str, options: &ConverterOptions) -> Result<String, ConversionFailure> {
        if source.contains("BROKEN") {
            return Err(ConversionFailure::new("line 1: unterminated block"));
        }
        let mut lines = source.lines();
        let title = lines
            .next()
            .and_then(|l| l.strip_prefix("= "))
            .unwrap_or("Untitled");
        let body: Vec<&str> = lines.filter(|l| !l.trim().is_empty()).collect();
        let ns = if source.contains("NOT-DOCBOOK") {
            "urn:not-docbook"
        } else {
            "http://docbook.org/ns/docbook"
        };
        Ok(format!(
            "<?xml version=\"1.0\"?>\n<article xmlns=\"{ns}\" version=\"5.0\" xml:lang=\"{}\">\n\
             <info><title>{}</title></info>\n<para>{}</para>\n</article>\n",
            options.attributes.get("lang").map(String::as_str).unwrap_or("en"),
            escape(title),
            escape(&body.join(" "))
        ))
    }

    fn close(&mut self) {
        self.closes.fetch_add(1, Ordering::SeqCst);
    }
}

fn escape(s: &str) -> String {
    s.replace('&', "&amp;").replace('<', "&lt;").replace('>', "&gt;")
}

/// Wraps its text input as `<tag>…</tag>`, counting applications and
/// logging each batch as `(stage, size)`.
struct MarkerStage {
    name: &'static str,
    extension: &'static str,
    calls: Arc<AtomicUsize>,
    batches: Arc<Mutex<Vec<(&'static str, usize)>>>,
}

impl StageProcessor for MarkerStage {
    fn name(&self) -> &str {
        self.name
    }

    fn extension(&self) -> &str {
        self.extension
    }

    fn apply(&self, input: &Artifact) -> Result<Artifact, StageFailure> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let text = input
            .as_text()
            .ok_or(StageFailure::WrongInput { expected: "XML" })?;
        Ok(Artifact::Text(format!("<{0}>{1}</{0}>", self.name, text)))
    }

    fn apply_batch(&self, inputs: &[&Artifact]) -> Vec<Result<Artifact, StageFailure>> {
        self.batches.lock().unwrap().push((self.name, inputs.len()));
        inputs.iter().map(|input| self.apply(input)).collect()
    }
}

/// Formats text into fake PDF bytes.
struct FakePdf;

impl StageProcessor for FakePdf {
    fn name(&self) -> &str {
        "pdf"
    }

    fn extension(&self) -> &str {
        "pdf"
    }

    fn apply(&self, input: &Artifact) -> Result<Artifact, StageFailure> {
        let text = input
            .as_text()
            .ok_or(StageFailure::WrongInput { expected: "XSL-FO" })?;
        let mut bytes = b"%PDF-1.4\n".to_vec();
        bytes.extend_from_slice(text.as_bytes());
        Ok(Artifact::Binary(bytes))
    }
}

/// Always fails, like a stylesheet with a runtime error.
struct BrokenStage;

impl StageProcessor for BrokenStage {
    fn name(&self) -> &str {
        "broken"
    }

    fn extension(&self) -> &str {
        "html"
    }

    fn apply(&self, _: &Artifact) -> Result<Artifact, StageFailure> {
        Err(StageFailure::Processor {
            processor: "xsltproc".into(),
            detail: "runtime error: template loop".into(),
        })
    }
}

// ── Fixture ──────────────────────────────────────────────────────────────────

struct Fixture {
    _root: tempfile::TempDir,
    input: PathBuf,
    online: PathBuf,
    local: PathBuf,
    closes: Arc<AtomicUsize>,
    stage_calls: Arc<AtomicUsize>,
    batches: Arc<Mutex<Vec<(&'static str, usize)>>>,
}

impl Fixture {
    /// Course, Ex1, Sol1 and Exam1 exist; Ex2 does not.
    fn new() -> Self {
        let root = tempfile::tempdir().unwrap();
        let input = root.path().join("Course material");
        let online = root.path().join("Online Pages");
        let local = root.path().join("Local");
        std::fs::create_dir_all(&input).unwrap();
        for (name, body) in [
            ("Course", "= Course\n\nWelcome to the course.\n"),
            ("Ex1", "= Exercise 1\n\nWrite a parser & test it.\n"),
            ("Sol1", "= Solution 1\n\nUse a <recursive> descent.\n"),
            ("Exam1", "= Exam 1\n\nAnswer every question.\n"),
        ] {
            std::fs::write(input.join(format!("{name}.adoc")), body).unwrap();
        }
        Self {
            _root: root,
            input,
            online,
            local,
            closes: Arc::new(AtomicUsize::new(0)),
            stage_calls: Arc::new(AtomicUsize::new(0)),
            batches: Arc::new(Mutex::new(Vec::new())),
        }
    }

    fn builder(&self) -> BuildConfigBuilder {
        BuildConfig::builder()
            .input_dir(&self.input)
            .resource_dir(&self.local)
            .stage(
                "house",
                StageConfig::xslt(StylesheetRef::File("MyStyle.xsl".into()), "html"),
            )
            .stage(
                "broken",
                StageConfig::xslt(StylesheetRef::Bundled("broken.xsl".into()), "html"),
            )
    }

    /// The course plan: four HTML documents plus Exam1 through its own style.
    fn course_config(&self) -> BuildConfig {
        let mut b = self.builder();
        for name in ["Course", "Ex1", "Ex2", "Sol1"] {
            b = b.document(DocumentSpec::new(name).target(OutputTarget::html(&self.online)));
        }
        b.document(
            DocumentSpec::new("Exam1").target(OutputTarget::new(&self.online, ["house"])),
        )
        .build()
        .unwrap()
    }

    fn engines(&self) -> Engines {
        let mut transformer = TransformationEngine::new();
        for (name, extension) in [("html", "html"), ("house", "html"), ("fo", "fo")] {
            transformer.register(Box::new(MarkerStage {
                name,
                extension,
                calls: Arc::clone(&self.stage_calls),
                batches: Arc::clone(&self.batches),
            }));
        }
        transformer.register(Box::new(FakePdf));
        transformer.register(Box::new(BrokenStage));
        Engines {
            converter: Box::new(FakeConverter {
                closes: Arc::clone(&self.closes),
            }),
            checker: Box::new(DocBookChecker::new()),
            transformer,
        }
    }

    fn run(&self, config: BuildConfig) -> Result<docbook_build::BuildReport, BuildError> {
        BuildRun::with_engines(config, self.engines()).run()
    }
}

fn read(path: &Path) -> String {
    std::fs::read_to_string(path).unwrap_or_else(|e| panic!("{}: {e}", path.display()))
}

fn listing(dir: &Path) -> Vec<String> {
    let mut names: Vec<String> = std::fs::read_dir(dir)
        .unwrap()
        .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
        .collect();
    names.sort();
    names
}

// ── Tests ────────────────────────────────────────────────────────────────────

#[test]
fn course_build_isolates_missing_source() {
    let fx = Fixture::new();
    let report = fx.run(fx.course_config()).unwrap();

    assert_eq!(report.stats.total_documents, 5);
    assert_eq!(report.stats.succeeded, 4);
    assert_eq!(report.stats.failed, 1);
    assert_eq!(report.stats.artifacts_written, 4);

    let ex2 = report.document("Ex2").unwrap();
    assert!(matches!(
        ex2.error,
        Some(DocumentError::SourceNotFound { ref path, .. }) if path.ends_with("Ex2.adoc")
    ));
    assert!(ex2.artifacts.is_empty());

    assert_eq!(
        listing(&fx.online),
        vec!["Course.html", "Ex1.html", "Exam1.html", "Sol1.html", "css", "js"]
    );
    assert!(read(&fx.online.join("Course.html")).starts_with("<html><?xml"));
    assert!(read(&fx.online.join("Exam1.html")).starts_with("<house><?xml"));
    assert!(read(&fx.online.join("Ex1.html")).contains("Write a parser &amp; test it."));
}

#[test]
fn resources_go_to_html_dirs_and_resource_dirs() {
    let fx = Fixture::new();
    let report = fx.run(fx.course_config()).unwrap();

    assert_eq!(report.stats.resource_dirs, 2);
    for dir in [&fx.online, &fx.local] {
        assert!(dir.join("css/docbook.css").is_file(), "{}", dir.display());
        assert!(dir.join("js/docbook.js").is_file(), "{}", dir.display());
    }
    // The resource-only directory receives no documents.
    assert_eq!(listing(&fx.local), vec!["css", "js"]);
}

#[test]
fn rebuilding_gives_identical_outputs() {
    let fx = Fixture::new();
    fx.run(fx.course_config()).unwrap();
    let first: Vec<(String, String)> = ["Course", "Ex1", "Sol1", "Exam1"]
        .iter()
        .map(|n| (n.to_string(), read(&fx.online.join(format!("{n}.html")))))
        .collect();
    let first_listing = listing(&fx.online);

    fx.run(fx.course_config()).unwrap();
    for (name, content) in &first {
        assert_eq!(&read(&fx.online.join(format!("{name}.html"))), content, "{name}");
    }
    assert_eq!(listing(&fx.online), first_listing);
}

#[test]
fn stale_outputs_are_removed_before_documents_run() {
    let fx = Fixture::new();
    std::fs::create_dir_all(fx.online.join("css")).unwrap();
    std::fs::write(fx.online.join("css/old-theme.css"), "stale").unwrap();
    std::fs::write(fx.online.join("Ex2.html"), "stale Ex2").unwrap();
    std::fs::write(fx.online.join("Ex2.fo"), "stale Ex2").unwrap();
    std::fs::write(fx.online.join("notes.txt"), "keep me").unwrap();

    fx.run(fx.course_config()).unwrap();

    // Ex2 failed, so its stale outputs must not survive as if they were current.
    assert!(!fx.online.join("Ex2.html").exists());
    assert!(!fx.online.join("Ex2.fo").exists());
    assert!(!fx.online.join("css/old-theme.css").exists());
    assert!(fx.online.join("css/docbook.css").exists());
    assert_eq!(read(&fx.online.join("notes.txt")), "keep me");
}

#[test]
fn no_clean_keeps_previous_outputs() {
    let fx = Fixture::new();
    std::fs::create_dir_all(&fx.online).unwrap();
    std::fs::write(fx.online.join("Ex2.html"), "previous Ex2").unwrap();

    let mut config = fx.course_config();
    config.skip_clean = true;
    fx.run(config).unwrap();
    assert_eq!(read(&fx.online.join("Ex2.html")), "previous Ex2");
}

#[test]
fn no_clean_keeps_output_of_an_invalid_document() {
    let fx = Fixture::new();
    std::fs::create_dir_all(&fx.online).unwrap();
    std::fs::write(fx.online.join("Ex1.html"), "previous Ex1").unwrap();
    std::fs::write(fx.input.join("Ex1.adoc"), "= Exercise 1\n\nNOT-DOCBOOK\n").unwrap();

    let mut config = fx.course_config();
    config.skip_clean = true;
    let report = fx.run(config).unwrap();

    assert!(matches!(
        report.document("Ex1").unwrap().error,
        Some(DocumentError::SchemaViolation { .. })
    ));
    assert_eq!(read(&fx.online.join("Ex1.html")), "previous Ex1");
    assert!(report.document("Course").unwrap().is_success());
}

#[test]
fn each_stage_runs_once_for_all_documents() {
    let fx = Fixture::new();
    fx.run(fx.course_config()).unwrap();

    let mut batches = fx.batches.lock().unwrap().clone();
    batches.sort();
    // Course, Ex1 and Sol1 share the html stage; Ex2 has no source.
    assert_eq!(batches, vec![("house", 1), ("html", 3)]);
    assert_eq!(fx.stage_calls.load(Ordering::SeqCst), 4);
}

#[test]
fn invalid_docbook_never_reaches_a_stylesheet() {
    let fx = Fixture::new();
    std::fs::write(fx.input.join("Ex1.adoc"), "= Exercise 1\n\nNOT-DOCBOOK\n").unwrap();

    let report = fx.run(fx.course_config()).unwrap();

    let ex1 = report.document("Ex1").unwrap();
    match ex1.error {
        Some(DocumentError::SchemaViolation { ref violation, .. }) => {
            assert!(violation.message.contains("DocBook namespace"), "{violation}");
            assert_eq!(violation.line, Some(2));
        }
        ref other => panic!("expected a schema violation, got {other:?}"),
    }
    assert!(!fx.online.join("Ex1.html").exists());
    // Course, Sol1 and Exam1 passed the gate; nothing else was transformed.
    assert_eq!(fx.stage_calls.load(Ordering::SeqCst), 3);
}

#[test]
fn conversion_failure_is_document_local() {
    let fx = Fixture::new();
    std::fs::write(fx.input.join("Sol1.adoc"), "= Solution 1\n\nBROKEN\n").unwrap();

    let report = fx.run(fx.course_config()).unwrap();
    assert!(matches!(
        report.document("Sol1").unwrap().error,
        Some(DocumentError::Conversion { ref detail, .. }) if detail.contains("unterminated")
    ));
    assert!(report.document("Exam1").unwrap().is_success());
    assert!(fx.online.join("Exam1.html").exists());
}

#[test]
fn pdf_chain_output_equals_sequential_stages() {
    let fx = Fixture::new();
    let pdf_dir = fx.online.join("pdf");
    let config = fx
        .builder()
        .document(
            DocumentSpec::new("Course")
                .target(OutputTarget::html(&fx.online))
                .target(OutputTarget::pdf(&pdf_dir)),
        )
        .build()
        .unwrap();

    let report = fx.run(config).unwrap();
    let course = report.document("Course").unwrap();
    assert!(course.is_success(), "{:?}", course.error);
    assert_eq!(course.artifacts.len(), 3);

    let fo = read(&pdf_dir.join("Course.fo"));
    assert!(fo.starts_with("<fo><?xml"));
    let pdf = std::fs::read(pdf_dir.join("Course.pdf")).unwrap();
    let expected = FakePdf.apply(&Artifact::Text(fo)).unwrap();
    assert_eq!(pdf, expected.as_bytes());

    // css/js follow HTML only.
    assert!(fx.online.join("css").is_dir());
    assert!(!pdf_dir.join("css").exists());
}

#[test]
fn failing_stage_reports_stage_and_target() {
    let fx = Fixture::new();
    let config = fx
        .builder()
        .document(DocumentSpec::new("Course").target(OutputTarget::html(&fx.online)))
        .document(DocumentSpec::new("Ex1").target(OutputTarget::new(&fx.online, ["broken"])))
        .build()
        .unwrap();

    let report = fx.run(config).unwrap();
    match report.document("Ex1").unwrap().error {
        Some(DocumentError::Transformation { ref stage, ref target, ref detail, .. }) => {
            assert_eq!(stage, "broken");
            assert_eq!(target, &fx.online);
            assert!(detail.contains("template loop"));
        }
        ref other => panic!("expected a transformation error, got {other:?}"),
    }
    assert!(!fx.online.join("Ex1.html").exists());
    assert!(fx.online.join("Course.html").exists());
}

#[test]
fn intermediate_target_writes_validated_docbook() {
    let fx = Fixture::new();
    let dbk_dir = fx.online.join("dbk");
    let config = fx
        .builder()
        .document(DocumentSpec::new("Sol1").target(OutputTarget::intermediate(&dbk_dir)))
        .build()
        .unwrap();

    fx.run(config).unwrap();
    let dbk = read(&dbk_dir.join("Sol1.dbk"));
    assert!(dbk.contains("<title>Solution 1</title>"));
    assert!(dbk.contains("Use a &lt;recursive&gt; descent."));
}

#[test]
fn write_failure_is_document_local() {
    let fx = Fixture::new();
    // A plain file where Ex1's output directory should be.
    let blocked = fx.online.join("blocked");
    std::fs::create_dir_all(&fx.online).unwrap();
    std::fs::write(&blocked, "not a directory").unwrap();

    let mut config = fx
        .builder()
        .document(DocumentSpec::new("Course").target(OutputTarget::html(&fx.online)))
        .document(
            DocumentSpec::new("Ex1")
                .target(OutputTarget::html(&blocked))
                .target(OutputTarget::html(&fx.online)),
        )
        .build()
        .unwrap();
    config.clean_dirs = vec![fx.online.clone()];

    let report = fx.run(config).unwrap();
    let ex1 = report.document("Ex1").unwrap();
    assert!(matches!(ex1.error, Some(DocumentError::Write { .. })));
    // The second target was still written.
    assert_eq!(ex1.artifacts.len(), 1);
    assert!(fx.online.join("Ex1.html").exists());
    assert!(report.document("Course").unwrap().is_success());
}

#[test]
fn converter_released_once_after_a_completed_run() {
    let fx = Fixture::new();
    fx.run(fx.course_config()).unwrap();
    assert_eq!(fx.closes.load(Ordering::SeqCst), 1);
}

#[test]
fn fatal_cleanup_aborts_before_any_document_and_releases_converter() {
    let fx = Fixture::new();
    // A directory where Course.html would be cannot be removed as a file.
    std::fs::create_dir_all(fx.online.join("Course.html")).unwrap();

    let err = fx.run(fx.course_config()).unwrap_err();
    assert!(matches!(err, BuildError::CleanupFailed { .. }), "{err}");
    assert_eq!(fx.stage_calls.load(Ordering::SeqCst), 0);
    assert!(!fx.online.join("Ex1.html").exists());
    assert_eq!(fx.closes.load(Ordering::SeqCst), 1);
}

#[test]
fn missing_converter_aborts_at_init_without_cleaning() {
    let fx = Fixture::new();
    std::fs::create_dir_all(&fx.online).unwrap();
    std::fs::write(fx.online.join("Course.html"), "previous").unwrap();

    let mut config = fx.course_config();
    config.executables.asciidoctor = Some(fx.input.join("no-such-asciidoctor"));
    let err = BuildRun::new(config).err().expect("init must fail");
    assert!(matches!(err, BuildError::EngineInit { ref engine, .. } if engine == "asciidoctor"));
    assert_eq!(read(&fx.online.join("Course.html")), "previous");
}

#[derive(Default)]
struct Recorder {
    events: Mutex<Vec<String>>,
}

impl BuildProgressCallback for Recorder {
    fn on_build_start(&self, total: usize) {
        self.events.lock().unwrap().push(format!("start {total}"));
    }
    fn on_document_start(&self, name: &str, index: usize, total: usize) {
        self.events.lock().unwrap().push(format!("doc {name} {index}/{total}"));
    }
    fn on_document_complete(&self, name: &str, artifacts: usize) {
        self.events.lock().unwrap().push(format!("ok {name} {artifacts}"));
    }
    fn on_document_error(&self, name: &str, _error: &str) {
        self.events.lock().unwrap().push(format!("err {name}"));
    }
    fn on_build_complete(&self, total: usize, succeeded: usize) {
        self.events.lock().unwrap().push(format!("done {succeeded}/{total}"));
    }
}

#[test]
fn progress_events_follow_build_order() {
    let fx = Fixture::new();
    let recorder = Arc::new(Recorder::default());
    let mut config = fx.course_config();
    config.progress_callback = Some(recorder.clone() as Arc<dyn BuildProgressCallback>);

    fx.run(config).unwrap();
    let events = recorder.events.lock().unwrap().clone();
    assert_eq!(
        events,
        vec![
            "start 5",
            "doc Course 1/5",
            "ok Course 1",
            "doc Ex1 2/5",
            "ok Ex1 1",
            "doc Ex2 3/5",
            "err Ex2",
            "doc Sol1 4/5",
            "ok Sol1 1",
            "doc Exam1 5/5",
            "ok Exam1 1",
            "done 4/5",
        ]
    );
}

#[test]
fn report_serialises_to_json() {
    let fx = Fixture::new();
    let report = fx.run(fx.course_config()).unwrap();
    let json = serde_json::to_value(&report).unwrap();
    assert_eq!(json["stats"]["succeeded"], 4);
    assert_eq!(json["documents"][2]["error"]["kind"], "source_not_found");

    let err = report.into_result().unwrap_err();
    assert!(matches!(err, BuildError::PartialFailure { failed: 1, total: 5 }));
}
