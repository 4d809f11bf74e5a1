use quire_config::{ConfigValidationError, ConfigWarning, QuireConfig};

#[test]
fn reports_unknown_keys_with_full_paths() {
    let text = r#"
typo = 1

[cache]
max_entrys = 5

[renderer]
program = "wkhtmltopdf"
dpii = 300
"#;

    let (_config, diagnostics) =
        QuireConfig::load_from_str_with_diagnostics(text).expect("config should parse");

    assert_eq!(
        diagnostics.unknown_keys,
        vec!["cache.max_entrys", "renderer.dpii", "typo"]
    );
    assert!(diagnostics.is_ok());
}

#[test]
fn zero_limits_are_errors() {
    let text = r#"
[cache]
max_entries = 0
max_bytes = 0

[renderer]
program = "wkhtmltopdf"
dpi = 0
"#;

    let (_config, diagnostics) =
        QuireConfig::load_from_str_with_diagnostics(text).expect("config should parse");

    assert!(!diagnostics.is_ok());
    let paths: Vec<&str> = diagnostics
        .errors
        .iter()
        .map(|err| match err {
            ConfigValidationError::InvalidValue { toml_path, .. } => toml_path.as_str(),
            _ => "",
        })
        .collect();
    assert_eq!(paths, ["cache.max_entries", "cache.max_bytes", "renderer.dpi"]);
}

#[test]
fn unset_program_is_only_a_warning() {
    let (_config, diagnostics) =
        QuireConfig::load_from_str_with_diagnostics("").expect("config should parse");

    assert!(diagnostics.is_ok());
    assert_eq!(diagnostics.warnings, vec![ConfigWarning::RendererProgramUnset]);
}

#[test]
fn invalid_logging_level_warns() {
    let text = r#"
[renderer]
program = "wkhtmltopdf"

[logging]
level = "quire.cache=loud"
"#;

    let (_config, diagnostics) =
        QuireConfig::load_from_str_with_diagnostics(text).expect("config should parse");

    assert!(diagnostics.is_ok());
    assert!(matches!(
        diagnostics.warnings.as_slice(),
        [ConfigWarning::LoggingLevelInvalid { .. }]
    ));
}
