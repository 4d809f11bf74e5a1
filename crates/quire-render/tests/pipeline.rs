use quire_cache::{CacheLimits, DiskCache, ManualClock};
use quire_render::{
    CancellationToken, CommandConverter, FingerprintInputs, RenderContext, RenderError,
    RenderOptions, RenderPipeline, Renderable,
};
use std::{
    fs,
    path::{Path, PathBuf},
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc, Mutex,
    },
    time::Duration,
};
use tempfile::TempDir;

const SIX_HOURS: Duration = Duration::from_secs(6 * 60 * 60);

fn helper() -> PathBuf {
    PathBuf::from(env!("CARGO_BIN_EXE_quire_render_test_converter"))
}

/// In-memory renderable whose content can be changed between renders.
struct Report {
    id: u64,
    body: Mutex<String>,
    feedback: Mutex<Vec<u64>>,
    fail_view: bool,
    fail_inputs: bool,
    fingerprint_calls: AtomicUsize,
}

impl Report {
    fn new(id: u64, body: &str) -> Self {
        Self {
            id,
            body: Mutex::new(body.to_string()),
            feedback: Mutex::new(vec![1_700_000_000_000]),
            fail_view: false,
            fail_inputs: false,
            fingerprint_calls: AtomicUsize::new(0),
        }
    }

    fn add_feedback(&self, body: &str, at: u64) {
        *self.body.lock().unwrap() = body.to_string();
        self.feedback.lock().unwrap().push(at);
    }
}

impl Renderable for Report {
    fn cache_key(&self) -> String {
        format!("composite-report:{}", self.id)
    }

    fn fingerprint_inputs(&self) -> anyhow::Result<FingerprintInputs> {
        self.fingerprint_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_inputs {
            anyhow::bail!("survey record is unreadable");
        }
        let feedback = self.feedback.lock().unwrap().clone();
        Ok(FingerprintInputs::new("v2")
            .identity("response", Some(self.id))
            .identity("advisor", None)
            .collection_of("feedback", feedback)
            .flag("complete", true))
    }

    fn render_html(&self) -> anyhow::Result<String> {
        if self.fail_view {
            anyhow::bail!("template error: undefined variable `student`");
        }
        Ok(self.body.lock().unwrap().clone())
    }
}

struct Harness {
    tmp: TempDir,
    clock: Arc<ManualClock>,
    cache: Arc<DiskCache>,
}

impl Harness {
    fn new(limits: CacheLimits) -> Self {
        let tmp = TempDir::new().unwrap();
        let clock = Arc::new(ManualClock::new(1_700_000_000_000));
        let cache = Arc::new(
            DiskCache::new(tmp.path().join("cache"), limits)
                .unwrap()
                .with_clock(clock.clone()),
        );
        Self { tmp, clock, cache }
    }

    fn scratch(&self) -> PathBuf {
        self.tmp.path().join("scratch")
    }

    fn count_file(&self) -> PathBuf {
        self.tmp.path().join("conversions.log")
    }

    fn conversions(&self) -> usize {
        fs::read_to_string(self.count_file())
            .map(|s| s.lines().count())
            .unwrap_or(0)
    }

    fn converter(&self, extra: &[&str]) -> CommandConverter {
        let mut args = vec![
            "--count-file".to_string(),
            self.count_file().display().to_string(),
        ];
        args.extend(extra.iter().map(|s| s.to_string()));
        CommandConverter::new(helper()).with_args(args)
    }

    fn cached_pipeline(&self, extra: &[&str]) -> RenderPipeline {
        RenderPipeline::new(Arc::new(self.converter(extra)))
            .with_cache(self.cache.clone(), Some(SIX_HOURS))
            .with_scratch_dir(self.scratch())
    }

    fn uncached_pipeline(&self, extra: &[&str]) -> RenderPipeline {
        RenderPipeline::new(Arc::new(self.converter(extra))).with_scratch_dir(self.scratch())
    }
}

fn dir_entries(dir: &Path) -> Vec<PathBuf> {
    match fs::read_dir(dir) {
        Ok(entries) => entries.map(|e| e.unwrap().path()).collect(),
        Err(_) => Vec::new(),
    }
}

fn expect_generation(result: Result<quire_render::RenderOutput, RenderError>) -> String {
    match result {
        Err(RenderError::Generation { message }) => message,
        other => panic!("expected a generation error, got {other:?}"),
    }
}

#[test]
fn composite_report_is_generated_once_then_served_from_cache() {
    let h = Harness::new(CacheLimits::default());
    let pipeline = h.cached_pipeline(&[]);
    let report = Report::new(42, "hello");
    let ctx = RenderContext::new();

    let first = pipeline.render(&report, &ctx).unwrap();
    assert!(!first.cached);
    assert_eq!(first.size_bytes, 14);
    assert!(!first.needs_cleanup());
    assert_eq!(fs::read(&first.path).unwrap(), b"%PDF-1.4\nhello");
    assert!(first.path.starts_with(h.cache.root()));

    let second = pipeline.render(&report, &ctx).unwrap();
    assert!(second.cached);
    assert_eq!(second.path, first.path);
    assert_eq!(second.size_bytes, 14);
    assert_eq!(h.conversions(), 1);

    // New feedback changes the fingerprint; the stale artifact is replaced.
    report.add_feedback("new feedback!", 1_700_000_100_000);
    let third = pipeline.render(&report, &ctx).unwrap();
    assert!(!third.cached);
    assert_eq!(third.size_bytes, 22);
    assert_eq!(h.conversions(), 2);
    assert_eq!(h.cache.stats().entries, 1);

    assert!(dir_entries(&h.scratch()).is_empty());
}

#[test]
fn changed_page_layout_regenerates_the_artifact() {
    let h = Harness::new(CacheLimits::default());
    let report = Report::new(42, "hello");
    let ctx = RenderContext::new();

    assert!(!h.cached_pipeline(&[]).render(&report, &ctx).unwrap().cached);
    assert!(h.cached_pipeline(&[]).render(&report, &ctx).unwrap().cached);

    let high_dpi = h.converter(&[]).with_options(RenderOptions {
        dpi: 300,
        ..RenderOptions::default()
    });
    let pipeline = RenderPipeline::new(Arc::new(high_dpi))
        .with_cache(h.cache.clone(), Some(SIX_HOURS))
        .with_scratch_dir(h.scratch());
    let regenerated = pipeline.render(&report, &ctx).unwrap();
    assert!(!regenerated.cached);
    assert_eq!(h.conversions(), 2);
    assert_eq!(h.cache.stats().entries, 1);
}

#[test]
fn expired_artifact_is_regenerated() {
    let h = Harness::new(CacheLimits::default());
    let pipeline = h.cached_pipeline(&[]);
    let report = Report::new(7, "body");
    let ctx = RenderContext::new();

    assert!(!pipeline.render(&report, &ctx).unwrap().cached);
    h.clock.advance(SIX_HOURS - Duration::from_secs(1));
    assert!(pipeline.render(&report, &ctx).unwrap().cached);
    h.clock.advance(Duration::from_secs(2));
    assert!(!pipeline.render(&report, &ctx).unwrap().cached);
    assert_eq!(h.conversions(), 2);
}

#[test]
fn failing_converter_leaves_no_temporary_files() {
    let h = Harness::new(CacheLimits::default());
    let pipeline = h.cached_pipeline(&["--fail"]);
    let report = Report::new(1, "body");

    let message = expect_generation(pipeline.render(&report, &RenderContext::new()));
    assert!(message.contains("unsupported markup"), "{message}");
    assert!(dir_entries(&h.scratch()).is_empty());
    assert_eq!(h.cache.stats().entries, 0);
}

#[test]
fn empty_converter_output_is_a_generation_error() {
    let h = Harness::new(CacheLimits::default());
    let report = Report::new(1, "body");

    for flag in ["--empty", "--no-output"] {
        let pipeline = h.cached_pipeline(&[flag]);
        let message = expect_generation(pipeline.render(&report, &RenderContext::new()));
        assert!(message.contains("converter produced"), "{flag}: {message}");

        let pipeline = h.uncached_pipeline(&[flag]);
        expect_generation(pipeline.render(&report, &RenderContext::new()));
    }
    assert!(dir_entries(&h.scratch()).is_empty());
    assert_eq!(h.cache.stats().entries, 0);
}

#[test]
fn view_failure_keeps_original_message_and_skips_conversion() {
    let h = Harness::new(CacheLimits::default());
    let pipeline = h.cached_pipeline(&[]);
    let report = Report {
        fail_view: true,
        ..Report::new(3, "body")
    };

    let message = expect_generation(pipeline.render(&report, &RenderContext::new()));
    assert!(message.contains("undefined variable `student`"), "{message}");
    assert_eq!(h.conversions(), 0);
    assert!(dir_entries(&h.scratch()).is_empty());
}

#[test]
fn fingerprint_failure_is_a_generation_error() {
    let h = Harness::new(CacheLimits::default());
    let pipeline = h.cached_pipeline(&[]);
    let report = Report {
        fail_inputs: true,
        ..Report::new(3, "body")
    };

    let message = expect_generation(pipeline.render(&report, &RenderContext::new()));
    assert!(message.contains("survey record is unreadable"), "{message}");
    assert_eq!(h.conversions(), 0);
}

#[test]
fn missing_converter_is_reported_unchanged_before_any_work() {
    let h = Harness::new(CacheLimits::default());
    let missing = h.tmp.path().join("bin/wkhtmltopdf");
    let pipeline = RenderPipeline::new(Arc::new(CommandConverter::new(&missing)))
        .with_cache(h.cache.clone(), None)
        .with_scratch_dir(h.scratch());
    let report = Report::new(5, "body");

    let err = pipeline.render(&report, &RenderContext::new()).unwrap_err();
    match &err {
        RenderError::MissingDependency { dependency, reason } => {
            assert_eq!(dependency, &missing.display().to_string());
            assert_eq!(reason, "no such file");
        }
        other => panic!("expected MissingDependency, got {other:?}"),
    }
    assert!(err.is_unavailable());
    assert_eq!(report.fingerprint_calls.load(Ordering::SeqCst), 0);

    let unconfigured = RenderPipeline::new(Arc::new(CommandConverter::unconfigured()));
    let err = unconfigured
        .render(&report, &RenderContext::new())
        .unwrap_err();
    assert!(err.is_unavailable());
}

#[test]
fn uncached_render_hands_cleanup_to_the_caller() {
    let h = Harness::new(CacheLimits::default());
    let pipeline = h.uncached_pipeline(&[]);
    assert!(!pipeline.caching_enabled());
    let report = Report::new(9, "hello");
    let ctx = RenderContext::new();

    let first = pipeline.render(&report, &ctx).unwrap();
    let second = pipeline.render(&report, &ctx).unwrap();
    assert!(!first.cached && !second.cached);
    assert_ne!(first.path, second.path);
    assert_eq!(first.size_bytes, 14);
    assert!(first.needs_cleanup());
    assert_eq!(h.conversions(), 2);

    // Only the two artifacts remain; the intermediate HTML is gone.
    assert_eq!(dir_entries(&h.scratch()).len(), 2);
    first.finish().unwrap();
    drop(second);
    assert!(dir_entries(&h.scratch()).is_empty());
    assert_eq!(h.cache.stats().entries, 0);
}

#[test]
fn cancelled_render_fails_without_converting() {
    let h = Harness::new(CacheLimits::default());
    let pipeline = h.cached_pipeline(&[]);
    let token = CancellationToken::new();
    token.cancel();
    let ctx = RenderContext::new().with_cancellation(token);

    let message = expect_generation(pipeline.render(&Report::new(1, "body"), &ctx));
    assert!(message.contains("cancelled"), "{message}");
    assert_eq!(h.conversions(), 0);
}

#[test]
fn slow_converter_times_out_and_cleans_up() {
    let h = Harness::new(CacheLimits::default());
    let converter = h
        .converter(&["--sleep-ms", "5000"])
        .with_options(RenderOptions {
            timeout: Some(Duration::from_millis(100)),
            ..RenderOptions::default()
        });
    let pipeline = RenderPipeline::new(Arc::new(converter))
        .with_cache(h.cache.clone(), Some(SIX_HOURS))
        .with_scratch_dir(h.scratch());

    let message = expect_generation(pipeline.render(&Report::new(1, "body"), &RenderContext::new()));
    assert!(message.contains("timed out"), "{message}");
    assert!(dir_entries(&h.scratch()).is_empty());
    assert_eq!(h.cache.stats().entries, 0);
}

#[test]
fn artifact_larger_than_the_cache_is_a_generation_error() {
    let h = Harness::new(CacheLimits {
        max_entries: 10,
        max_bytes: 4,
    });
    let pipeline = h.cached_pipeline(&[]);

    let message = expect_generation(pipeline.render(&Report::new(1, "body"), &RenderContext::new()));
    assert!(message.contains("could not be stored"), "{message}");
    assert!(dir_entries(&h.scratch()).is_empty());
    assert_eq!(h.cache.stats().entries, 0);
}
