//! Unit tests for `AppError` display formats.

use taqeem_bridge::AppError;

#[test]
fn display_prefixes_identify_the_variant() {
    let cases = [
        (AppError::Config("x".into()), "config: x"),
        (AppError::Spawn("x".into()), "spawn: x"),
        (AppError::Write("x".into()), "write: x"),
        (AppError::Protocol("x".into()), "protocol: x"),
        (AppError::AlreadyActive("x".into()), "already active: x"),
        (AppError::NotFound("x".into()), "not found: x"),
        (AppError::Transport("x".into()), "transport: x"),
        (AppError::Io("x".into()), "io: x"),
    ];
    for (err, expected) in cases {
        assert_eq!(err.to_string(), expected);
    }
}

#[test]
fn worker_exited_reports_code_when_known() {
    assert_eq!(
        AppError::WorkerExited(Some(2)).to_string(),
        "worker exited with code 2"
    );
    assert_eq!(
        AppError::WorkerExited(None).to_string(),
        "worker exited without an exit code"
    );
}

#[test]
fn io_errors_convert() {
    let err: AppError = std::io::Error::new(std::io::ErrorKind::BrokenPipe, "pipe closed").into();
    assert!(matches!(err, AppError::Io(ref m) if m.contains("pipe closed")));
}

#[test]
fn error_message_has_no_trailing_period() {
    let err = AppError::Write("worker stdin is closed".into());
    assert!(!err.to_string().ends_with('.'));
}
