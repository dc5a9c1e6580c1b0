//! Tests for server-mode logging with a JSON file layer.

use modelgate::config::LoggingConfig;

#[test]
fn server_logging_with_logs_dir_installs_file_and_console_layers() {
    let tmp = tempfile::tempdir().expect("tempdir");
    let logs_dir = tmp.path().join("logs");
    let config = LoggingConfig {
        level: "info".to_owned(),
        logs_dir: Some(logs_dir.to_string_lossy().into_owned()),
    };

    let guard = modelgate::logging::init_server(&config).expect("logging should initialise");
    tracing::info!("logging initialised");
    drop(guard);

    assert!(logs_dir.is_dir());
    let files: Vec<_> = std::fs::read_dir(&logs_dir)
        .expect("read logs dir")
        .filter_map(Result::ok)
        .filter(|e| e.file_name().to_string_lossy().starts_with("modelgate.log"))
        .collect();
    assert_eq!(files.len(), 1);
}
