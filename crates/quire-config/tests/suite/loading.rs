use std::path::PathBuf;
use std::time::Duration;

use quire_config::{ByteSize, ConfigError, Media, QuireConfig, COMPOSITE_REPORT_CLASS};
use quire_render::MediaType;
use tempfile::tempdir;

#[test]
fn full_config_round_trips_into_runtime_types() {
    let text = r#"
[cache]
root = "/srv/quire/cache"
max_entries = 20
max_bytes = "64MiB"
enabled = false

[cache.ttl]
composite_report = 3600

[renderer]
program = "wkhtmltopdf"
args = ["--quiet"]
timeout_ms = 15000
page_size = "Letter"
margin_mm = 12
dpi = 300
media = "screen"
max_output_bytes = "16KiB"

[payload]
max_evidence_history = 3

[logging]
level = "debug"
json = true
"#;

    let config = QuireConfig::load_from_str(text).expect("config should parse");

    assert_eq!(config.cache.root(), PathBuf::from("/srv/quire/cache"));
    assert_eq!(config.cache.limits().max_entries, 20);
    assert_eq!(config.cache.limits().max_bytes, 64 * 1024 * 1024);
    assert!(!config.cache.enabled);
    assert_eq!(
        config.cache.ttl_for(COMPOSITE_REPORT_CLASS),
        Some(Duration::from_secs(3600))
    );

    assert_eq!(config.renderer.media, Media::Screen);
    assert_eq!(config.renderer.max_output_bytes, ByteSize::kib(16));
    let options = config.renderer.render_options();
    assert_eq!(options.page_size, "Letter");
    assert_eq!(options.margin_mm, 12);
    assert_eq!(options.dpi, 300);
    assert_eq!(options.media, MediaType::Screen);
    assert_eq!(options.timeout, Some(Duration::from_secs(15)));
    assert_eq!(
        config.renderer.converter().program(),
        Some(std::path::Path::new("wkhtmltopdf"))
    );

    assert_eq!(config.payload.max_evidence_history, 3);
    assert_eq!(config.logging.level, "debug");
    assert!(config.logging.json);
}

#[test]
fn max_bytes_accepts_raw_integers() {
    let config = QuireConfig::load_from_str("[cache]\nmax_bytes = 1024\n").unwrap();
    assert_eq!(config.cache.max_bytes, ByteSize(1024));
}

#[test]
fn zero_timeout_disables_the_converter_timeout() {
    let config = QuireConfig::load_from_str("[renderer]\ntimeout_ms = 0\n").unwrap();
    assert_eq!(config.renderer.render_options().timeout, None);
}

#[test]
fn relative_paths_resolve_against_the_config_file() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("quire.toml");
    std::fs::write(
        &path,
        r#"
[cache]
root = "var/cache"

[renderer]
program = "bin/convert"
scratch_dir = "tmp"

[logging]
file = "logs/quire.log"
"#,
    )
    .unwrap();

    let config = QuireConfig::load_from_path(&path).unwrap();
    assert_eq!(config.cache.root(), dir.path().join("var/cache"));
    assert_eq!(config.renderer.program, Some(dir.path().join("bin/convert")));
    assert_eq!(config.renderer.scratch_dir, Some(dir.path().join("tmp")));
    assert_eq!(config.logging.file, Some(dir.path().join("logs/quire.log")));
}

#[test]
fn bare_program_names_stay_on_path() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("quire.toml");
    std::fs::write(&path, "[renderer]\nprogram = \"wkhtmltopdf\"\n").unwrap();

    let config = QuireConfig::load_from_path(&path).unwrap();
    assert_eq!(config.renderer.program, Some(PathBuf::from("wkhtmltopdf")));
}

#[test]
fn missing_file_is_an_io_error() {
    let dir = tempdir().unwrap();
    let err = QuireConfig::load_from_path(dir.path().join("nope.toml")).unwrap_err();
    assert!(matches!(err, ConfigError::Io { .. }), "{err}");
}

#[test]
fn invalid_byte_size_is_a_parse_error() {
    let err = QuireConfig::load_from_str("[cache]\nmax_bytes = \"lots\"\n").unwrap_err();
    assert!(matches!(err, ConfigError::Toml(_)), "{err}");
}
