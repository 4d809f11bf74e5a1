use std::{
    env, fmt, io,
    path::{Path, PathBuf},
    process::ExitStatus,
    time::{Duration, Instant},
};

use anyhow::Context as _;

use crate::{
    process::{run_bounded, CommandSpec, RunLimits},
    RenderContext, RenderError,
};

/// Name reported when no converter program has been configured at all.
pub const CONVERTER_DEPENDENCY: &str = "html-to-pdf converter";

pub const DEFAULT_PAGE_SIZE: &str = "A4";
pub const DEFAULT_MARGIN_MM: u32 = 10;
pub const DEFAULT_DPI: u32 = 96;
pub const DEFAULT_CONVERT_TIMEOUT: Duration = Duration::from_secs(60);
pub const DEFAULT_MAX_OUTPUT_BYTES: usize = 64 * 1024;

/// Turns an HTML file into a binary artifact.
pub trait Converter: Send + Sync + fmt::Debug {
    /// Fails with [`RenderError::MissingDependency`] when the converter cannot
    /// run in this environment.
    fn check_available(&self) -> Result<(), RenderError>;

    /// Convert `html` into `output`, overwriting whatever is there.
    fn convert(&self, html: &Path, output: &Path, ctx: &RenderContext) -> anyhow::Result<()>;

    /// Settings other than the HTML that shape the output (page layout, extra
    /// flags). Folded into every fingerprint, so changing them invalidates
    /// stored artifacts.
    fn settings(&self) -> String {
        String::new()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MediaType {
    #[default]
    Print,
    Screen,
}

/// Page layout passed to the converter on every call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderOptions {
    pub page_size: String,
    pub margin_mm: u32,
    pub dpi: u32,
    pub media: MediaType,
    pub timeout: Option<Duration>,
}

impl Default for RenderOptions {
    fn default() -> Self {
        Self {
            page_size: DEFAULT_PAGE_SIZE.to_string(),
            margin_mm: DEFAULT_MARGIN_MM,
            dpi: DEFAULT_DPI,
            media: MediaType::Print,
            timeout: Some(DEFAULT_CONVERT_TIMEOUT),
        }
    }
}

impl RenderOptions {
    /// Command-line flags in the wkhtmltopdf dialect.
    pub fn to_args(&self) -> Vec<String> {
        let margin = format!("{}mm", self.margin_mm);
        let mut args = vec!["--page-size".to_string(), self.page_size.clone()];
        for side in ["top", "bottom", "left", "right"] {
            args.push(format!("--margin-{side}"));
            args.push(margin.clone());
        }
        args.push("--dpi".to_string());
        args.push(self.dpi.to_string());
        args.push(
            match self.media {
                MediaType::Print => "--print-media-type",
                MediaType::Screen => "--no-print-media-type",
            }
            .to_string(),
        );
        args
    }
}

/// Non-zero exit from the converter process.
#[derive(Debug, thiserror::Error)]
#[error("`{command}` exited with {status}{}", stderr_suffix(.stderr, .truncated))]
pub struct ConversionFailure {
    pub command: String,
    pub status: ExitStatus,
    pub stderr: String,
    pub truncated: bool,
}

fn stderr_suffix(stderr: &str, truncated: &bool) -> String {
    let stderr = stderr.trim();
    match (stderr.is_empty(), *truncated) {
        (true, _) => String::new(),
        (false, false) => format!(": {stderr}"),
        (false, true) => format!(": {stderr} [truncated]"),
    }
}

/// Runs an external program as `<program> <args...> <option flags> <input> <output>`.
#[derive(Debug, Clone)]
pub struct CommandConverter {
    program: Option<PathBuf>,
    args: Vec<String>,
    options: RenderOptions,
    max_output_bytes: usize,
}

impl CommandConverter {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: Some(program.into()),
            args: Vec::new(),
            options: RenderOptions::default(),
            max_output_bytes: DEFAULT_MAX_OUTPUT_BYTES,
        }
    }

    /// A converter with no program; every render fails with `MissingDependency`.
    pub fn unconfigured() -> Self {
        Self {
            program: None,
            ..Self::new(PathBuf::new())
        }
    }

    /// Arguments inserted before the option flags.
    pub fn with_args(mut self, args: Vec<String>) -> Self {
        self.args = args;
        self
    }

    pub fn with_options(mut self, options: RenderOptions) -> Self {
        self.options = options;
        self
    }

    pub fn with_max_output_bytes(mut self, max_output_bytes: usize) -> Self {
        self.max_output_bytes = max_output_bytes;
        self
    }

    pub fn program(&self) -> Option<&Path> {
        self.program.as_deref()
    }

    pub fn options(&self) -> &RenderOptions {
        &self.options
    }

    /// Locate the configured program: explicit paths must be files, bare names
    /// are looked up on `PATH`.
    pub fn resolve_program(&self) -> Result<PathBuf, RenderError> {
        let Some(program) = self.program.as_deref().filter(|p| !p.as_os_str().is_empty()) else {
            return Err(RenderError::missing_dependency(
                CONVERTER_DEPENDENCY,
                "no converter program is configured",
            ));
        };
        find_program(program).ok_or_else(|| {
            let reason = if is_bare_name(program) {
                "not found on PATH"
            } else {
                "no such file"
            };
            RenderError::missing_dependency(program.display().to_string(), reason)
        })
    }

    fn command_for(&self, program: PathBuf, html: &Path, output: &Path) -> CommandSpec {
        let mut args = self.args.clone();
        args.extend(self.options.to_args());
        args.push(html.to_string_lossy().into_owned());
        args.push(output.to_string_lossy().into_owned());
        CommandSpec::new(program, args)
    }
}

impl Converter for CommandConverter {
    fn check_available(&self) -> Result<(), RenderError> {
        self.resolve_program().map(|_| ())
    }

    fn settings(&self) -> String {
        let flags: Vec<String> = self
            .args
            .iter()
            .cloned()
            .chain(self.options.to_args())
            .collect();
        format!("{flags:?}")
    }

    fn convert(&self, html: &Path, output: &Path, ctx: &RenderContext) -> anyhow::Result<()> {
        let program = self.resolve_program()?;
        let spec = self.command_for(program, html, output);
        let limits = RunLimits {
            timeout: self.options.timeout,
            deadline: ctx.deadline(),
            cancellation: ctx.cancellation().cloned(),
            max_output_bytes: self.max_output_bytes,
            ..RunLimits::default()
        };

        let started = Instant::now();
        let outcome = match run_bounded(&spec, &limits) {
            Ok(outcome) => outcome,
            Err(err) if err.kind() == io::ErrorKind::NotFound => {
                // Removed between the availability check and the spawn.
                return Err(RenderError::missing_dependency(
                    spec.program.display().to_string(),
                    err.to_string(),
                )
                .into());
            }
            Err(err) => {
                return Err(err).with_context(|| format!("failed to run `{spec}`"));
            }
        };
        let elapsed = started.elapsed();

        if outcome.cancelled {
            anyhow::bail!("conversion cancelled after {elapsed:?}");
        }
        if outcome.timed_out {
            anyhow::bail!("`{}` timed out after {elapsed:?}", spec.program.display());
        }
        if !outcome.status.success() {
            return Err(ConversionFailure {
                command: spec.to_string(),
                status: outcome.status,
                stderr: outcome.stderr,
                truncated: outcome.truncated,
            }
            .into());
        }

        tracing::debug!(
            target: "quire.render",
            program = %spec.program.display(),
            elapsed_ms = elapsed.as_millis() as u64,
            "converter finished"
        );
        Ok(())
    }
}

fn is_bare_name(program: &Path) -> bool {
    program.components().count() == 1 && !program.is_absolute()
}

fn find_program(program: &Path) -> Option<PathBuf> {
    if !is_bare_name(program) {
        return program.is_file().then(|| program.to_path_buf());
    }
    let path = env::var_os("PATH")?;
    env::split_paths(&path)
        .filter(|dir| !dir.as_os_str().is_empty())
        .flat_map(|dir| program_candidates(&dir, program))
        .find(|candidate| candidate.is_file())
}

#[cfg(windows)]
fn program_candidates(dir: &Path, program: &Path) -> Vec<PathBuf> {
    let base = dir.join(program);
    if program.extension().is_some() {
        vec![base]
    } else {
        vec![base.with_extension("exe"), base.with_extension("cmd"), base]
    }
}

#[cfg(not(windows))]
fn program_candidates(dir: &Path, program: &Path) -> Vec<PathBuf> {
    vec![dir.join(program)]
}
