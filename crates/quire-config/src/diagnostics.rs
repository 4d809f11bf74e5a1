use serde::de::DeserializeOwned;

/// Combined diagnostics produced while loading and validating a Quire config.
///
/// Loading is best effort: callers always get a `QuireConfig` when
/// deserialization succeeds, plus whatever issues were found.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConfigDiagnostics {
    /// Keys in the input TOML that the schema does not recognize, as full
    /// dotted paths (for example `cache.max_entrys`).
    pub unknown_keys: Vec<String>,
    pub warnings: Vec<ConfigWarning>,
    /// Fatal semantic validation failures.
    pub errors: Vec<ConfigValidationError>,
}

impl ConfigDiagnostics {
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.unknown_keys.is_empty() && self.warnings.is_empty() && self.errors.is_empty()
    }

    #[must_use]
    pub fn is_ok(&self) -> bool {
        self.errors.is_empty()
    }

    pub(crate) fn extend_validation(&mut self, validation: ValidationDiagnostics) {
        self.warnings.extend(validation.warnings);
        self.errors.extend(validation.errors);
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ValidationDiagnostics {
    pub warnings: Vec<ConfigWarning>,
    pub errors: Vec<ConfigValidationError>,
}

#[non_exhaustive]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigWarning {
    InvalidValue { toml_path: String, message: String },
    RendererProgramUnset,
    LoggingLevelInvalid { value: String, normalized: String },
}

impl std::fmt::Display for ConfigWarning {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::InvalidValue { toml_path, message } => write!(f, "{toml_path}: {message}"),
            Self::RendererProgramUnset => write!(
                f,
                "renderer.program is not set; exports will report a missing dependency"
            ),
            Self::LoggingLevelInvalid { value, normalized } => write!(
                f,
                "logging.level `{value}` is not a valid filter (normalized to `{normalized}`); using info"
            ),
        }
    }
}

#[non_exhaustive]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigValidationError {
    InvalidValue { toml_path: String, message: String },
}

impl std::fmt::Display for ConfigValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::InvalidValue { toml_path, message } => write!(f, "{toml_path}: {message}"),
        }
    }
}

pub(crate) fn deserialize_toml_with_unknown_keys<T: DeserializeOwned>(
    text: &str,
) -> Result<(T, Vec<String>), toml::de::Error> {
    let mut unknown = Vec::<String>::new();
    let deserializer = toml::de::Deserializer::new(text);
    let value = serde_ignored::deserialize(deserializer, |path| {
        unknown.push(normalize_serde_ignored_path(path));
    })?;
    unknown.sort();
    unknown.dedup();
    Ok((value, unknown))
}

fn normalize_serde_ignored_path(path: serde_ignored::Path) -> String {
    // `serde_ignored` renders root paths with a leading `.`.
    path.to_string().trim_start_matches('.').to_string()
}
