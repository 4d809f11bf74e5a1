use std::{
    env, fs,
    path::{Path, PathBuf},
    sync::Arc,
    time::Duration,
};

use anyhow::Context as _;
use quire_cache::DiskCache;

use crate::{
    Converter, FingerprintComputer, RenderContext, RenderError, RenderOutput, Renderable,
    TempArtifact,
};

const TEMP_PREFIX: &str = "quire-";
const MAX_LOGGED_CAUSES: usize = 4;
const MAX_LOGGED_CHARS: usize = 300;

/// Dependency check, fingerprint, cache lookup-or-generate, cleanup.
///
/// With a cache attached, artifacts are served from and stored into it and
/// belong to the cache. Without one, every call converts afresh and the
/// returned [`RenderOutput`] carries a cleanup action for the caller.
#[derive(Debug, Clone)]
pub struct RenderPipeline {
    converter: Arc<dyn Converter>,
    cache: Option<Arc<DiskCache>>,
    ttl: Option<Duration>,
    scratch_dir: PathBuf,
    computer: FingerprintComputer,
}

impl RenderPipeline {
    pub fn new(converter: Arc<dyn Converter>) -> Self {
        Self {
            converter,
            cache: None,
            ttl: None,
            scratch_dir: env::temp_dir(),
            computer: FingerprintComputer::new(),
        }
    }

    /// Serve and store artifacts through `cache`, expiring them after `ttl`.
    pub fn with_cache(mut self, cache: Arc<DiskCache>, ttl: Option<Duration>) -> Self {
        self.cache = Some(cache);
        self.ttl = ttl;
        self
    }

    /// Directory for intermediate HTML and uncached artifacts.
    pub fn with_scratch_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.scratch_dir = dir.into();
        self
    }

    pub fn caching_enabled(&self) -> bool {
        self.cache.is_some()
    }

    pub fn cache(&self) -> Option<&Arc<DiskCache>> {
        self.cache.as_ref()
    }

    pub fn scratch_dir(&self) -> &Path {
        &self.scratch_dir
    }

    pub fn render(
        &self,
        renderable: &dyn Renderable,
        ctx: &RenderContext,
    ) -> Result<RenderOutput, RenderError> {
        self.converter.check_available()?;

        let key = renderable.cache_key();
        self.render_checked(renderable, &key, ctx)
            .map_err(|err| self.escalate(renderable, &key, err))
    }

    fn render_checked(
        &self,
        renderable: &dyn Renderable,
        key: &str,
        ctx: &RenderContext,
    ) -> anyhow::Result<RenderOutput> {
        ctx.check()?;
        let fingerprint = self
            .computer
            .compute_with_settings(renderable, &self.converter.settings())?;

        let Some(cache) = &self.cache else {
            let pdf = self.scratch_file(".pdf")?;
            let size_bytes = self.generate(renderable, pdf.path(), ctx)?;
            return Ok(RenderOutput::uncached(pdf, size_bytes));
        };

        // The guard outlives the fetch: on success the cache has moved the file
        // away, on any failure it deletes what the converter left behind.
        let pdf = self.scratch_file(".pdf")?;
        let artifact = cache.fetch(key, fingerprint.as_str(), self.ttl, || {
            self.generate(renderable, pdf.path(), ctx)
                .map(|_| Some(pdf.path().to_path_buf()))
        })?;
        drop(pdf);

        let Some(artifact) = artifact else {
            anyhow::bail!("artifact for {key} could not be stored in the cache");
        };
        let size_bytes = verify_artifact(&artifact.path)?;
        tracing::debug!(
            target: "quire.render",
            key = %key,
            cached = artifact.cached,
            size_bytes,
            "artifact ready"
        );
        Ok(RenderOutput::from_cache(
            artifact.path,
            artifact.cached,
            size_bytes,
        ))
    }

    /// Render HTML and convert it into `output`; returns the artifact size.
    fn generate(
        &self,
        renderable: &dyn Renderable,
        output: &Path,
        ctx: &RenderContext,
    ) -> anyhow::Result<u64> {
        let html = renderable
            .render_html()
            .with_context(|| format!("rendering view for {}", renderable.cache_key()))?;
        let html_file = self.scratch_file(".html")?;
        fs::write(html_file.path(), html)
            .with_context(|| format!("writing {}", html_file.path().display()))?;

        ctx.check()?;
        self.converter.convert(html_file.path(), output, ctx)?;
        verify_artifact(output)
    }

    fn scratch_file(&self, suffix: &str) -> anyhow::Result<TempArtifact> {
        TempArtifact::create_in(&self.scratch_dir, TEMP_PREFIX, suffix).with_context(|| {
            format!(
                "creating temporary file in {}",
                self.scratch_dir.display()
            )
        })
    }

    fn escalate(&self, renderable: &dyn Renderable, key: &str, err: anyhow::Error) -> RenderError {
        // A converter that disappeared mid-call is still a missing dependency.
        if let Some(render_err) = err.downcast_ref::<RenderError>() {
            if render_err.is_unavailable() {
                return render_err.clone();
            }
        }

        let causes: Vec<String> = err
            .chain()
            .take(MAX_LOGGED_CAUSES)
            .map(|cause| truncate(&cause.to_string(), MAX_LOGGED_CHARS))
            .collect();
        tracing::error!(
            target: "quire.render",
            key = %key,
            renderable = %truncate(&renderable.describe(), MAX_LOGGED_CHARS),
            causes = ?causes,
            "artifact generation failed"
        );

        RenderError::generation(format!("{err:#}"))
    }
}

fn verify_artifact(path: &Path) -> anyhow::Result<u64> {
    let meta = fs::metadata(path)
        .with_context(|| format!("converter produced no file at {}", path.display()))?;
    if !meta.is_file() {
        anyhow::bail!("converter output {} is not a file", path.display());
    }
    if meta.len() == 0 {
        anyhow::bail!("converter produced an empty file at {}", path.display());
    }
    Ok(meta.len())
}

fn truncate(text: &str, max_chars: usize) -> String {
    match text.char_indices().nth(max_chars) {
        Some((end, _)) => format!("{}...", &text[..end]),
        None => text.to_string(),
    }
}
