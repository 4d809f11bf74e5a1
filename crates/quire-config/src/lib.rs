//! Configuration for the Quire artifact cache and render pipeline.
//!
//! Read once at startup from `quire.toml`. Every key has a default, so an
//! empty or missing file yields a working configuration (apart from the
//! converter program, which has to be installed and configured separately).

use std::collections::BTreeMap;
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;
use std::time::Duration;

use quire_cache::{CacheLimits, DEFAULT_MAX_BYTES, DEFAULT_MAX_ENTRIES};
use quire_render::{CommandConverter, MediaType, RenderOptions};
use serde::{Deserialize, Serialize};
use thiserror::Error;

mod diagnostics;
mod logging;
mod size;
mod validation;

pub use diagnostics::{
    ConfigDiagnostics, ConfigValidationError, ConfigWarning, ValidationDiagnostics,
};
pub use logging::{init_tracing, LoggingConfig};
pub use size::{parse_byte_size, ByteSize};

/// Points at an explicit config file, bypassing discovery.
pub const QUIRE_CONFIG_ENV_VAR: &str = "QUIRE_CONFIG";
/// Overrides `cache.root`.
pub const QUIRE_CACHE_DIR_ENV_VAR: &str = "QUIRE_CACHE_DIR";
/// Overrides `renderer.program`.
pub const QUIRE_RENDERER_ENV_VAR: &str = "QUIRE_RENDERER";

pub const CONFIG_FILE_NAMES: [&str; 2] = ["quire.toml", ".quire.toml"];

/// Artifact class rendered by the composite report export.
pub const COMPOSITE_REPORT_CLASS: &str = "composite_report";
const DEFAULT_TTLS: [(&str, u64); 1] = [(COMPOSITE_REPORT_CLASS, 6 * 60 * 60)];

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct QuireConfig {
    #[serde(default)]
    pub cache: CacheConfig,
    #[serde(default)]
    pub renderer: RendererConfig,
    #[serde(default)]
    pub payload: PayloadConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CacheConfig {
    /// Cache directory. Defaults to `~/.quire/cache`.
    #[serde(default)]
    pub root: Option<PathBuf>,

    #[serde(default = "default_max_entries")]
    pub max_entries: usize,

    /// Total payload budget; accepts `262144000` or `"250MiB"`.
    #[serde(default = "default_max_bytes")]
    pub max_bytes: ByteSize,

    /// When false every render converts afresh and hands cleanup to the caller.
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// TTL in seconds per artifact class. `0` stores entries without expiry.
    #[serde(default)]
    pub ttl: BTreeMap<String, u64>,
}

fn default_max_entries() -> usize {
    DEFAULT_MAX_ENTRIES
}

fn default_max_bytes() -> ByteSize {
    ByteSize(DEFAULT_MAX_BYTES)
}

fn default_true() -> bool {
    true
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            root: None,
            max_entries: default_max_entries(),
            max_bytes: default_max_bytes(),
            enabled: true,
            ttl: BTreeMap::new(),
        }
    }
}

impl CacheConfig {
    pub fn root(&self) -> PathBuf {
        self.root.clone().unwrap_or_else(default_cache_root)
    }

    pub fn limits(&self) -> CacheLimits {
        CacheLimits {
            max_entries: self.max_entries,
            max_bytes: self.max_bytes.0,
        }
    }

    /// TTL for an artifact class: the configured value, else the built-in
    /// default for known classes, else no expiry.
    pub fn ttl_for(&self, class: &str) -> Option<Duration> {
        let secs = self.ttl.get(class).copied().or_else(|| {
            DEFAULT_TTLS
                .iter()
                .find(|(name, _)| *name == class)
                .map(|(_, secs)| *secs)
        })?;
        (secs > 0).then(|| Duration::from_secs(secs))
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Media {
    #[default]
    Print,
    Screen,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RendererConfig {
    /// Converter executable: a bare name looked up on `PATH` or a path.
    #[serde(default)]
    pub program: Option<PathBuf>,

    /// Extra arguments placed before the layout flags.
    #[serde(default)]
    pub args: Vec<String>,

    /// `0` disables the timeout.
    #[serde(default = "RendererConfig::default_timeout_ms")]
    pub timeout_ms: u64,

    #[serde(default = "RendererConfig::default_page_size")]
    pub page_size: String,

    #[serde(default = "RendererConfig::default_margin_mm")]
    pub margin_mm: u32,

    #[serde(default = "RendererConfig::default_dpi")]
    pub dpi: u32,

    #[serde(default)]
    pub media: Media,

    /// Converter stdout/stderr kept per stream for diagnostics.
    #[serde(default = "RendererConfig::default_max_output_bytes")]
    pub max_output_bytes: ByteSize,

    /// Directory for intermediate files. Defaults to the system temp dir.
    #[serde(default)]
    pub scratch_dir: Option<PathBuf>,
}

impl RendererConfig {
    fn default_timeout_ms() -> u64 {
        quire_render::DEFAULT_CONVERT_TIMEOUT.as_millis() as u64
    }

    fn default_page_size() -> String {
        quire_render::DEFAULT_PAGE_SIZE.to_string()
    }

    fn default_margin_mm() -> u32 {
        quire_render::DEFAULT_MARGIN_MM
    }

    fn default_dpi() -> u32 {
        quire_render::DEFAULT_DPI
    }

    fn default_max_output_bytes() -> ByteSize {
        ByteSize(quire_render::DEFAULT_MAX_OUTPUT_BYTES as u64)
    }

    pub fn timeout(&self) -> Option<Duration> {
        (self.timeout_ms > 0).then(|| Duration::from_millis(self.timeout_ms))
    }

    pub fn render_options(&self) -> RenderOptions {
        RenderOptions {
            page_size: self.page_size.clone(),
            margin_mm: self.margin_mm,
            dpi: self.dpi,
            media: match self.media {
                Media::Print => MediaType::Print,
                Media::Screen => MediaType::Screen,
            },
            timeout: self.timeout(),
        }
    }

    pub fn converter(&self) -> CommandConverter {
        let converter = match &self.program {
            Some(program) => CommandConverter::new(program),
            None => CommandConverter::unconfigured(),
        };
        converter
            .with_args(self.args.clone())
            .with_options(self.render_options())
            .with_max_output_bytes(usize::try_from(self.max_output_bytes.0).unwrap_or(usize::MAX))
    }
}

impl Default for RendererConfig {
    fn default() -> Self {
        Self {
            program: None,
            args: Vec::new(),
            timeout_ms: Self::default_timeout_ms(),
            page_size: Self::default_page_size(),
            margin_mm: Self::default_margin_mm(),
            dpi: Self::default_dpi(),
            media: Media::Print,
            max_output_bytes: Self::default_max_output_bytes(),
            scratch_dir: None,
        }
    }
}

/// Settings owned by the document builders rather than the pipeline.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PayloadConfig {
    /// Feedback entries shown per report, most recent first.
    #[serde(default = "PayloadConfig::default_max_evidence_history")]
    pub max_evidence_history: usize,
}

impl PayloadConfig {
    fn default_max_evidence_history() -> usize {
        10
    }
}

impl Default for PayloadConfig {
    fn default() -> Self {
        Self {
            max_evidence_history: Self::default_max_evidence_history(),
        }
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse toml config: {0}")]
    Toml(String),
}

fn sanitize_toml_error_message(message: &str) -> String {
    // Parse errors end up in logs and CLI output; drop quoted user values so a
    // typo next to a secret does not echo it.
    static QUOTED_STRING_RE: OnceLock<Option<regex::Regex>> = OnceLock::new();
    let re = QUOTED_STRING_RE.get_or_init(|| regex::Regex::new(r#""(?:\\.|[^"\\])*""#).ok());
    match re {
        Some(re) => re.replace_all(message, r#""<redacted>""#).into_owned(),
        None => message.to_owned(),
    }
}

impl From<toml::de::Error> for ConfigError {
    fn from(err: toml::de::Error) -> Self {
        // `Display` includes a source snippet; keep only the message.
        ConfigError::Toml(sanitize_toml_error_message(err.message()))
    }
}

impl QuireConfig {
    /// Load a config file from TOML. Relative paths inside the file are
    /// resolved against the file's directory.
    pub fn load_from_path(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        Self::load_from_path_with_diagnostics(path).map(|(config, _)| config)
    }

    pub fn load_from_str(text: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(text)?)
    }

    /// Load a config file and report unknown keys and validation problems.
    pub fn load_from_path_with_diagnostics(
        path: impl AsRef<Path>,
    ) -> Result<(Self, ConfigDiagnostics), ConfigError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        let (mut config, diagnostics) = Self::load_from_str_with_diagnostics(&text)?;
        if let Some(dir) = path.parent().filter(|dir| !dir.as_os_str().is_empty()) {
            config.resolve_relative_paths(dir);
        }
        Ok((config, diagnostics))
    }

    pub fn load_from_str_with_diagnostics(
        text: &str,
    ) -> Result<(Self, ConfigDiagnostics), ConfigError> {
        let (config, unknown_keys) =
            diagnostics::deserialize_toml_with_unknown_keys::<QuireConfig>(text)?;

        let mut diagnostics = ConfigDiagnostics {
            unknown_keys,
            ..ConfigDiagnostics::default()
        };
        diagnostics.extend_validation(config.validate());
        Ok((config, diagnostics))
    }

    /// Apply `QUIRE_CACHE_DIR` and `QUIRE_RENDERER` from the process environment.
    pub fn apply_env_overrides(&mut self) {
        self.apply_env_overrides_from(|key| std::env::var_os(key));
    }

    /// Same as [`Self::apply_env_overrides`] with an explicit lookup.
    pub fn apply_env_overrides_from(&mut self, lookup: impl Fn(&str) -> Option<OsString>) {
        let non_empty = |key: &str| lookup(key).filter(|value| !value.is_empty());
        if let Some(dir) = non_empty(QUIRE_CACHE_DIR_ENV_VAR) {
            self.cache.root = Some(PathBuf::from(dir));
        }
        if let Some(program) = non_empty(QUIRE_RENDERER_ENV_VAR) {
            self.renderer.program = Some(PathBuf::from(program));
        }
    }

    fn resolve_relative_paths(&mut self, base: &Path) {
        let resolve = |path: &mut PathBuf| {
            if path.is_relative() {
                *path = base.join(&*path);
            }
        };
        if let Some(root) = self.cache.root.as_mut() {
            resolve(root);
        }
        if let Some(dir) = self.renderer.scratch_dir.as_mut() {
            resolve(dir);
        }
        if let Some(file) = self.logging.file.as_mut() {
            resolve(file);
        }
        // Bare program names are looked up on PATH; only paths with a
        // directory component are anchored.
        if let Some(program) = self.renderer.program.as_mut() {
            if program.components().count() > 1 {
                resolve(program);
            }
        }
    }
}

/// `~/.quire/cache`, or a directory under the system temp dir when no home
/// directory is known.
pub fn default_cache_root() -> PathBuf {
    default_cache_root_from(|key| std::env::var_os(key))
}

fn default_cache_root_from(lookup: impl Fn(&str) -> Option<OsString>) -> PathBuf {
    ["HOME", "USERPROFILE"]
        .into_iter()
        .find_map(|key| lookup(key).filter(|value| !value.is_empty()))
        .map(|home| PathBuf::from(home).join(".quire").join("cache"))
        .unwrap_or_else(|| std::env::temp_dir().join("quire-cache"))
}

/// Locate the config file for `dir`:
///
/// 1) `QUIRE_CONFIG` (absolute or relative to `dir`)
/// 2) `quire.toml` in `dir`
/// 3) `.quire.toml` in `dir`
pub fn discover_config_path(dir: &Path) -> Option<PathBuf> {
    discover_config_path_from(dir, |key| std::env::var_os(key))
}

fn discover_config_path_from(
    dir: &Path,
    lookup: impl Fn(&str) -> Option<OsString>,
) -> Option<PathBuf> {
    if let Some(value) = lookup(QUIRE_CONFIG_ENV_VAR).filter(|value| !value.is_empty()) {
        let candidate = PathBuf::from(value);
        return Some(if candidate.is_absolute() {
            candidate
        } else {
            dir.join(candidate)
        });
    }

    CONFIG_FILE_NAMES
        .into_iter()
        .map(|name| dir.join(name))
        .find(|path| path.is_file())
}

/// Load the configuration for `dir`, applying environment overrides.
///
/// Returns the defaults (with overrides) and `None` when no file is found.
pub fn load_for_dir(
    dir: &Path,
) -> Result<(QuireConfig, ConfigDiagnostics, Option<PathBuf>), ConfigError> {
    let (mut config, diagnostics, path) = match discover_config_path(dir) {
        Some(path) => {
            let (config, diagnostics) = QuireConfig::load_from_path_with_diagnostics(&path)?;
            (config, diagnostics, Some(path))
        }
        None => {
            let config = QuireConfig::default();
            let mut diagnostics = ConfigDiagnostics::default();
            diagnostics.extend_validation(config.validate());
            (config, diagnostics, None)
        }
    };
    config.apply_env_overrides();
    Ok((config, diagnostics, path))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<OsString> {
        let pairs: Vec<(String, OsString)> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), OsString::from(v)))
            .collect();
        move |key| {
            pairs
                .iter()
                .find(|(k, _)| k == key)
                .map(|(_, v)| v.clone())
        }
    }

    #[test]
    fn empty_config_uses_defaults() {
        let config = QuireConfig::load_from_str("").unwrap();
        assert_eq!(config, QuireConfig::default());
        assert_eq!(config.cache.limits(), CacheLimits::default());
        assert_eq!(config.payload.max_evidence_history, 10);
        assert_eq!(config.renderer.render_options(), RenderOptions::default());
        assert!(config.cache.enabled);
    }

    #[test]
    fn ttl_falls_back_to_builtin_class_defaults() {
        let mut cache = CacheConfig::default();
        assert_eq!(
            cache.ttl_for(COMPOSITE_REPORT_CLASS),
            Some(Duration::from_secs(21_600))
        );
        assert_eq!(cache.ttl_for("transcript"), None);

        cache.ttl.insert(COMPOSITE_REPORT_CLASS.to_string(), 0);
        cache.ttl.insert("transcript".to_string(), 60);
        assert_eq!(cache.ttl_for(COMPOSITE_REPORT_CLASS), None);
        assert_eq!(cache.ttl_for("transcript"), Some(Duration::from_secs(60)));
    }

    #[test]
    fn env_overrides_replace_cache_root_and_program() {
        let mut config = QuireConfig::default();
        config.apply_env_overrides_from(env(&[
            (QUIRE_CACHE_DIR_ENV_VAR, "/var/cache/quire"),
            (QUIRE_RENDERER_ENV_VAR, "wkhtmltopdf"),
        ]));
        assert_eq!(config.cache.root(), PathBuf::from("/var/cache/quire"));
        assert_eq!(config.renderer.program, Some(PathBuf::from("wkhtmltopdf")));

        let mut untouched = QuireConfig::default();
        untouched.apply_env_overrides_from(env(&[(QUIRE_CACHE_DIR_ENV_VAR, "")]));
        assert_eq!(untouched.cache.root, None);
    }

    #[test]
    fn default_root_lives_under_home() {
        assert_eq!(
            default_cache_root_from(env(&[("HOME", "/home/ada")])),
            PathBuf::from("/home/ada/.quire/cache")
        );
        assert_eq!(
            default_cache_root_from(env(&[("USERPROFILE", "C:\\Users\\ada")])),
            PathBuf::from("C:\\Users\\ada").join(".quire").join("cache")
        );
        assert_eq!(
            default_cache_root_from(env(&[])),
            std::env::temp_dir().join("quire-cache")
        );
    }

    #[test]
    fn discovery_prefers_env_then_files() {
        let dir = tempfile::tempdir().unwrap();
        assert_eq!(discover_config_path_from(dir.path(), env(&[])), None);

        std::fs::write(dir.path().join(".quire.toml"), "").unwrap();
        assert_eq!(
            discover_config_path_from(dir.path(), env(&[])),
            Some(dir.path().join(".quire.toml"))
        );

        std::fs::write(dir.path().join("quire.toml"), "").unwrap();
        assert_eq!(
            discover_config_path_from(dir.path(), env(&[])),
            Some(dir.path().join("quire.toml"))
        );

        assert_eq!(
            discover_config_path_from(dir.path(), env(&[(QUIRE_CONFIG_ENV_VAR, "custom.toml")])),
            Some(dir.path().join("custom.toml"))
        );
    }

    #[test]
    fn toml_errors_do_not_echo_values() {
        let err = QuireConfig::load_from_str("[cache]\nenabled = \"hunter2\"\n").unwrap_err();
        let message = err.to_string();
        assert!(!message.contains("hunter2"), "{message}");
    }
}
