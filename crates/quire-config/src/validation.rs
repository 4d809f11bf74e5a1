use crate::diagnostics::{ConfigValidationError, ConfigWarning, ValidationDiagnostics};
use crate::{LoggingConfig, QuireConfig};

impl QuireConfig {
    /// Validate semantic invariants.
    ///
    /// Best effort: reports as many problems as possible in one pass.
    #[must_use]
    pub fn validate(&self) -> ValidationDiagnostics {
        let mut out = ValidationDiagnostics::default();

        validate_cache(self, &mut out);
        validate_renderer(self, &mut out);
        validate_payload(self, &mut out);
        validate_logging(self, &mut out);

        out
    }
}

fn invalid(toml_path: &str, message: &str) -> ConfigValidationError {
    ConfigValidationError::InvalidValue {
        toml_path: toml_path.to_string(),
        message: message.to_string(),
    }
}

fn validate_cache(config: &QuireConfig, out: &mut ValidationDiagnostics) {
    if config.cache.max_entries == 0 {
        out.errors.push(invalid("cache.max_entries", "must be >= 1"));
    }
    if config.cache.max_bytes.0 == 0 {
        out.errors.push(invalid("cache.max_bytes", "must be >= 1"));
    }
    if matches!(&config.cache.root, Some(root) if root.as_os_str().is_empty()) {
        out.errors.push(invalid("cache.root", "must not be empty"));
    }
}

fn validate_renderer(config: &QuireConfig, out: &mut ValidationDiagnostics) {
    let renderer = &config.renderer;
    match &renderer.program {
        None => out.warnings.push(ConfigWarning::RendererProgramUnset),
        Some(program) if program.as_os_str().is_empty() => {
            out.errors.push(invalid("renderer.program", "must not be empty"));
        }
        Some(_) => {}
    }
    if renderer.page_size.trim().is_empty() {
        out.errors.push(invalid("renderer.page_size", "must not be empty"));
    }
    if renderer.dpi == 0 {
        out.errors.push(invalid("renderer.dpi", "must be >= 1"));
    }
    if renderer.timeout_ms == 0 {
        out.warnings.push(ConfigWarning::InvalidValue {
            toml_path: "renderer.timeout_ms".to_string(),
            message: "0 disables the timeout; a hung converter blocks its caller".to_string(),
        });
    }
    if renderer.max_output_bytes.0 == 0 {
        out.warnings.push(ConfigWarning::InvalidValue {
            toml_path: "renderer.max_output_bytes".to_string(),
            message: "converter diagnostics will be discarded".to_string(),
        });
    }
}

fn validate_payload(config: &QuireConfig, out: &mut ValidationDiagnostics) {
    if config.payload.max_evidence_history == 0 {
        out.warnings.push(ConfigWarning::InvalidValue {
            toml_path: "payload.max_evidence_history".to_string(),
            message: "reports will not list any feedback".to_string(),
        });
    }
}

fn validate_logging(config: &QuireConfig, out: &mut ValidationDiagnostics) {
    let normalized = LoggingConfig::normalize_level_directives(&config.logging.level);
    if !config.logging.level.trim().is_empty()
        && tracing_subscriber::EnvFilter::try_new(normalized.clone()).is_err()
    {
        out.warnings.push(ConfigWarning::LoggingLevelInvalid {
            value: config.logging.level.clone(),
            normalized,
        });
    }
}
