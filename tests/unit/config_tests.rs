use std::io::Write;
use std::path::Path;
use std::time::Duration;

use taqeem_bridge::{config::GlobalConfig, AppError};

fn sample_toml() -> &'static str {
    r#"
http_port = 8080
bind_address = "0.0.0.0"

[worker]
executable = ".venv/bin/python"
script = "scripts/estate/worker_taqeem.py"
args = ["--headless"]
close_timeout_seconds = 3
exit_grace_seconds = 7
spawn_on_start = false

[worker.env]
PORTAL_URL = "https://example.invalid"

[http]
command_timeout_seconds = 30
"#
}

#[test]
fn full_config_parses() {
    let config = GlobalConfig::from_toml_str(sample_toml()).expect("valid config");

    assert_eq!(config.http_port, 8080);
    assert_eq!(config.bind_address, "0.0.0.0");
    assert_eq!(config.worker.args, vec!["--headless".to_owned()]);
    assert_eq!(
        config.worker.env.get("PORTAL_URL").map(String::as_str),
        Some("https://example.invalid")
    );
    assert_eq!(config.worker.close_timeout(), Duration::from_secs(3));
    assert_eq!(config.worker.exit_grace(), Duration::from_secs(7));
    assert!(!config.worker.spawn_on_start);
    assert_eq!(config.http.command_timeout(), Some(Duration::from_secs(30)));
    assert_eq!(config.worker.working_dir(), Path::new("scripts/estate"));
}

#[test]
fn minimal_config_uses_defaults() {
    let config = GlobalConfig::from_toml_str(
        r#"
[worker]
executable = "/usr/bin/taqeem-worker"
"#,
    )
    .expect("valid config");

    assert_eq!(config.http_port, 5000);
    assert_eq!(config.bind_address, "127.0.0.1");
    assert!(config.worker.script.is_none());
    assert_eq!(config.worker.close_timeout(), Duration::from_secs(5));
    assert_eq!(config.worker.exit_grace(), Duration::from_secs(5));
    assert!(config.worker.spawn_on_start);
    assert_eq!(config.http.command_timeout(), None);
    assert_eq!(config.worker.working_dir(), Path::new("."));
}

#[test]
fn bare_script_name_runs_in_current_dir() {
    let config = GlobalConfig::from_toml_str(
        r#"
[worker]
executable = "python3"
script = "worker.py"
"#,
    )
    .expect("valid config");

    assert_eq!(config.worker.working_dir(), Path::new("."));
}

#[test]
fn missing_worker_table_is_rejected() {
    let err = GlobalConfig::from_toml_str("http_port = 1").expect_err("worker required");
    assert!(matches!(err, AppError::Config(ref m) if m.starts_with("invalid config")));
}

#[test]
fn empty_executable_is_rejected() {
    let err = GlobalConfig::from_toml_str(
        r#"
[worker]
executable = ""
"#,
    )
    .expect_err("empty executable");
    assert!(matches!(err, AppError::Config(ref m) if m.contains("executable")));
}

#[test]
fn empty_script_is_rejected() {
    let err = GlobalConfig::from_toml_str(
        r#"
[worker]
executable = "python3"
script = ""
"#,
    )
    .expect_err("empty script");
    assert!(matches!(err, AppError::Config(ref m) if m.contains("script")));
}

#[test]
fn load_from_path_reads_file() {
    let mut file = tempfile::NamedTempFile::new().expect("temp file");
    file.write_all(sample_toml().as_bytes()).expect("write config");

    let config = GlobalConfig::load_from_path(file.path()).expect("load");

    assert_eq!(config.http_port, 8080);
}

#[test]
fn load_from_missing_path_is_config_error() {
    let dir = tempfile::tempdir().expect("tempdir");
    let err = GlobalConfig::load_from_path(dir.path().join("absent.toml")).expect_err("missing");
    assert!(matches!(err, AppError::Config(ref m) if m.starts_with("failed to read config")));
}
