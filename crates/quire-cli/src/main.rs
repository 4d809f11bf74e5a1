use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand};
use quire_cache::{CacheEntry, DiskCache, EvictionReport, SweepReport};
use quire_cli::CompositeReport;
use quire_config::{ConfigDiagnostics, ConfigWarning, QuireConfig, COMPOSITE_REPORT_CLASS};
use quire_render::{RenderContext, RenderError, RenderPipeline, Renderable};
use serde::Serialize;

const EXIT_GENERATION_FAILED: i32 = 1;
const EXIT_USAGE: i32 = 2;
const EXIT_MISSING_DEPENDENCY: i32 = 3;

#[derive(Parser)]
#[command(
    name = "quire",
    version,
    about = "Quire CLI (render cached documents, manage the artifact cache)",
    after_help = "Exit codes: 0 success, 1 generation failed, 2 usage or configuration error, 3 converter unavailable"
)]
struct Cli {
    /// Config file (defaults to `QUIRE_CONFIG`, then `quire.toml` in the current directory)
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Render a composite report snapshot to PDF, reusing the cached artifact when fresh
    Render(RenderArgs),
    /// Inspect and maintain the artifact cache
    Cache(CacheArgs),
}

#[derive(Args)]
struct RenderArgs {
    /// Snapshot JSON document (response plus related records)
    snapshot: PathBuf,
    /// Copy the artifact here
    #[arg(long)]
    out: Option<PathBuf>,
    /// Bypass the cache for this render
    #[arg(long)]
    no_cache: bool,
    /// Give up after this many milliseconds
    #[arg(long)]
    timeout_ms: Option<u64>,
    /// Emit JSON suitable for CI
    #[arg(long)]
    json: bool,
}

#[derive(Args)]
struct CacheArgs {
    #[command(subcommand)]
    command: CacheCommand,
    /// Emit JSON suitable for CI
    #[arg(long, global = true)]
    json: bool,
}

#[derive(Subcommand)]
enum CacheCommand {
    /// List stored entries and totals
    Status,
    /// Drop expired, corrupt and orphaned files
    Sweep,
    /// Evict least recently used entries until the limits hold
    Prune,
    /// Delete every entry
    Reset,
}

fn main() {
    let cli = Cli::parse();
    let exit_code = match run(cli) {
        Ok(code) => code,
        Err(err) => {
            eprintln!("{:#}", err);
            EXIT_USAGE
        }
    };

    std::process::exit(exit_code);
}

fn run(cli: Cli) -> Result<i32> {
    let (config, diagnostics, config_path) = load_config(cli.config.as_deref())?;
    quire_config::init_tracing(&config.logging);
    report_diagnostics(&config, &diagnostics, config_path.as_deref())?;

    match cli.command {
        Command::Render(args) => render(&config, args),
        Command::Cache(args) => {
            let cache = open_cache(&config)?;
            match args.command {
                CacheCommand::Status => {
                    let status = CacheStatus::collect(&config, &cache);
                    print_output(&status, args.json)?;
                }
                CacheCommand::Sweep => {
                    let report = cache.sweep_expired();
                    print_output(&report, args.json)?;
                }
                CacheCommand::Prune => {
                    let report = cache.enforce_limits();
                    print_output(&report, args.json)?;
                }
                CacheCommand::Reset => {
                    let removed_entries = cache.stats().entries;
                    cache.reset().context("failed to reset cache")?;
                    let summary = ResetSummary {
                        root: cache.root().to_path_buf(),
                        removed_entries,
                    };
                    print_output(&summary, args.json)?;
                }
            }
            Ok(0)
        }
    }
}

fn load_config(
    explicit: Option<&Path>,
) -> Result<(QuireConfig, ConfigDiagnostics, Option<PathBuf>)> {
    match explicit {
        Some(path) => {
            let (mut config, diagnostics) = QuireConfig::load_from_path_with_diagnostics(path)?;
            config.apply_env_overrides();
            Ok((config, diagnostics, Some(path.to_path_buf())))
        }
        None => {
            let cwd = std::env::current_dir().context("failed to resolve current directory")?;
            Ok(quire_config::load_for_dir(&cwd)?)
        }
    }
}

fn report_diagnostics(
    config: &QuireConfig,
    diagnostics: &ConfigDiagnostics,
    path: Option<&Path>,
) -> Result<()> {
    for key in &diagnostics.unknown_keys {
        tracing::warn!(target: "quire.cli", key = %key, "unknown config key");
    }
    for warning in &diagnostics.warnings {
        // `QUIRE_RENDERER` is applied after validation.
        if matches!(warning, ConfigWarning::RendererProgramUnset)
            && config.renderer.program.is_some()
        {
            continue;
        }
        tracing::warn!(target: "quire.cli", "{warning}");
    }

    if diagnostics.errors.is_empty() {
        return Ok(());
    }
    let location = path
        .map(|path| format!(" in {}", path.display()))
        .unwrap_or_default();
    let details = diagnostics
        .errors
        .iter()
        .map(|err| format!("  {err}"))
        .collect::<Vec<_>>()
        .join("\n");
    bail!("invalid configuration{location}:\n{details}")
}

fn open_cache(config: &QuireConfig) -> Result<DiskCache> {
    let root = config.cache.root();
    DiskCache::new(&root, config.cache.limits())
        .with_context(|| format!("failed to open cache at {}", root.display()))
}

fn build_pipeline(config: &QuireConfig, use_cache: bool) -> Result<RenderPipeline> {
    let mut pipeline = RenderPipeline::new(Arc::new(config.renderer.converter()));
    if let Some(dir) = &config.renderer.scratch_dir {
        std::fs::create_dir_all(dir)
            .with_context(|| format!("failed to create scratch dir {}", dir.display()))?;
        pipeline = pipeline.with_scratch_dir(dir.clone());
    }
    if use_cache && config.cache.enabled {
        let cache = open_cache(config)?;
        pipeline = pipeline.with_cache(
            Arc::new(cache),
            config.cache.ttl_for(COMPOSITE_REPORT_CLASS),
        );
    } else {
        tracing::debug!(target: "quire.cli", "artifact cache bypassed");
    }
    Ok(pipeline)
}

fn render(config: &QuireConfig, args: RenderArgs) -> Result<i32> {
    let report = CompositeReport::open(&args.snapshot, config.payload.max_evidence_history)?;
    let pipeline = build_pipeline(config, !args.no_cache)?;

    let mut ctx = RenderContext::new();
    if let Some(ms) = args.timeout_ms {
        ctx = ctx.with_timeout(Duration::from_millis(ms));
    }

    let output = match pipeline.render(&report, &ctx) {
        Ok(output) => output,
        Err(err) => return report_render_error(&report, &err, args.json),
    };

    let key = report.cache_key();
    let cached = output.cached;
    let size_bytes = output.size_bytes;
    let path = match &args.out {
        Some(out) => {
            output
                .copy_to(out)
                .with_context(|| format!("failed to copy artifact to {}", out.display()))?;
            output
                .finish()
                .context("failed to remove scratch artifact")?;
            out.clone()
        }
        None => output.into_path(),
    };

    let summary = RenderSummary {
        key,
        path,
        cached,
        size_bytes,
    };
    print_output(&summary, args.json)?;
    Ok(0)
}

fn report_render_error(report: &CompositeReport, err: &RenderError, json: bool) -> Result<i32> {
    eprintln!("{}: {err}", report.describe());
    if json {
        let failure = RenderFailure {
            key: report.cache_key(),
            kind: match err {
                RenderError::MissingDependency { .. } => "missing_dependency",
                RenderError::Generation { .. } => "generation",
            },
            message: err.user_message(),
        };
        println!("{}", serde_json::to_string_pretty(&failure)?);
    }
    Ok(if err.is_unavailable() {
        EXIT_MISSING_DEPENDENCY
    } else {
        EXIT_GENERATION_FAILED
    })
}

#[derive(Debug, Serialize)]
struct RenderSummary {
    key: String,
    path: PathBuf,
    cached: bool,
    size_bytes: u64,
}

#[derive(Debug, Serialize)]
struct RenderFailure {
    key: String,
    kind: &'static str,
    message: &'static str,
}

#[derive(Debug, Serialize)]
struct CacheStatus {
    root: PathBuf,
    enabled: bool,
    max_entries: usize,
    max_bytes: u64,
    entries: usize,
    total_bytes: u64,
    items: Vec<EntrySummary>,
}

impl CacheStatus {
    fn collect(config: &QuireConfig, cache: &DiskCache) -> Self {
        let limits = cache.limits();
        let items: Vec<EntrySummary> = cache.entries().iter().map(EntrySummary::from).collect();
        Self {
            root: cache.root().to_path_buf(),
            enabled: config.cache.enabled,
            max_entries: limits.max_entries,
            max_bytes: limits.max_bytes,
            entries: items.len(),
            total_bytes: items.iter().map(|item| item.size_bytes).sum(),
            items,
        }
    }
}

#[derive(Debug, Serialize)]
struct EntrySummary {
    name: String,
    fingerprint: String,
    size_bytes: u64,
    expires_at: Option<f64>,
    last_accessed_at: f64,
}

impl From<&CacheEntry> for EntrySummary {
    fn from(entry: &CacheEntry) -> Self {
        Self {
            name: entry.name.clone(),
            fingerprint: entry
                .fingerprint
                .get(..12)
                .unwrap_or(&entry.fingerprint)
                .to_string(),
            size_bytes: entry.size_bytes,
            expires_at: entry.expires_at,
            last_accessed_at: entry.last_accessed_at,
        }
    }
}

#[derive(Debug, Serialize)]
struct ResetSummary {
    root: PathBuf,
    removed_entries: usize,
}

fn print_output<T: Serialize + 'static>(value: &T, json: bool) -> Result<()> {
    if json {
        let out = serde_json::to_string_pretty(value)?;
        println!("{out}");
        return Ok(());
    }

    // Human output for key types. Everything else falls back to pretty JSON.
    let any = value as &dyn std::any::Any;
    if let Some(summary) = any.downcast_ref::<RenderSummary>() {
        println!(
            "{} {}: {} ({} bytes)",
            if summary.cached { "cached" } else { "rendered" },
            summary.key,
            summary.path.display(),
            summary.size_bytes
        );
    } else if let Some(status) = any.downcast_ref::<CacheStatus>() {
        println!("cache: {}", status.root.display());
        println!("  enabled: {}", status.enabled);
        println!("  entries: {} / {}", status.entries, status.max_entries);
        println!("  bytes: {} / {}", status.total_bytes, status.max_bytes);
        for item in &status.items {
            println!(
                "  {} {} {} bytes",
                item.name, item.fingerprint, item.size_bytes
            );
        }
    } else if let Some(report) = any.downcast_ref::<SweepReport>() {
        println!(
            "swept: {} expired, {} corrupt, {} orphaned",
            report.expired, report.corrupt, report.orphaned
        );
    } else if let Some(report) = any.downcast_ref::<EvictionReport>() {
        println!(
            "evicted: {} entries, {} bytes freed",
            report.evicted.len(),
            report.freed_bytes
        );
        for name in &report.evicted {
            println!("  {name}");
        }
    } else if let Some(summary) = any.downcast_ref::<ResetSummary>() {
        println!(
            "reset: {} ({} entries removed)",
            summary.root.display(),
            summary.removed_entries
        );
    } else {
        let out = serde_json::to_string_pretty(value)?;
        println!("{out}");
    }
    Ok(())
}
