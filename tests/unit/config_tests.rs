use std::time::Duration;

use framed_rpc::config::SessionConfig;
use framed_rpc::orchestrator::ExitPolicy;
use framed_rpc::rpc::codec::DEFAULT_MAX_FRAME_BYTES;
use framed_rpc::AppError;

fn sample_toml(dir: &str) -> String {
    format!(
        r#"
[server]
path = "/usr/local/bin/rust-mcp-server"
args = ["--transport", "stdio"]
working_dir = '{dir}'
inherit_env = false

[server.env]
RUST_LOG = "debug"

[session]
timeout_ms = 5000
exit_policy = "fail_on_error"
terminate_grace_ms = 100
exit_drain_grace_ms = 50
max_frame_bytes = 1024
transcript = "logs/session.jsonl"
"#
    )
}

#[test]
fn parses_full_config() {
    let temp = tempfile::tempdir().expect("tempdir");
    let dir = temp.path().to_str().expect("utf8");
    let config = SessionConfig::from_toml_str(&sample_toml(dir)).expect("valid config");

    assert_eq!(config.server.args, vec!["--transport", "stdio"]);
    assert!(!config.server.inherit_env);
    assert_eq!(config.server.env.get("RUST_LOG").map(String::as_str), Some("debug"));
    assert_eq!(config.session.exit_policy, ExitPolicy::FailOnError);
    assert_eq!(config.timeout(), Duration::from_secs(5));
    assert_eq!(
        config.transcript().map(|p| p.to_string_lossy().into_owned()),
        Some("logs/session.jsonl".to_owned())
    );

    let canonical = temp.path().canonicalize().unwrap();
    assert_eq!(config.server.working_dir.as_deref(), Some(canonical.as_path()));
}

#[test]
fn session_table_is_optional() {
    let config = SessionConfig::from_toml_str("[server]\npath = \"cat\"\n").expect("minimal");

    assert!(config.server.inherit_env, "inherit_env defaults to true");
    assert!(config.server.args.is_empty());
    assert_eq!(config.session.timeout_ms, 30_000);
    assert_eq!(config.session.exit_policy, ExitPolicy::Tolerate);
    assert_eq!(config.session.terminate_grace_ms, 2_000);
    assert_eq!(config.session.exit_drain_grace_ms, 250);
    assert_eq!(config.session.max_frame_bytes, DEFAULT_MAX_FRAME_BYTES);
    assert!(config.transcript().is_none());
}

#[test]
fn converts_to_runtime_types() {
    let temp = tempfile::tempdir().expect("tempdir");
    let dir = temp.path().to_str().expect("utf8");
    let config = SessionConfig::from_toml_str(&sample_toml(dir)).expect("valid config");

    let spec = config.spawn_spec();
    assert_eq!(spec.program.to_str(), Some("/usr/local/bin/rust-mcp-server"));
    assert_eq!(spec.args, vec!["--transport", "stdio"]);
    assert_eq!(spec.env, vec![("RUST_LOG".to_owned(), "debug".to_owned())]);
    assert!(!spec.inherit_env);
    assert_eq!(spec.terminate_grace, Duration::from_millis(100));
    assert!(spec.working_dir.is_some());

    let options = config.session_options();
    assert_eq!(options.timeout, Duration::from_secs(5));
    assert_eq!(options.exit_policy, ExitPolicy::FailOnError);
    assert_eq!(options.max_frame_bytes, 1024);
    assert_eq!(options.exit_drain_grace, Duration::from_millis(50));
}

#[test]
fn zero_timeout_is_rejected() {
    let result = SessionConfig::from_toml_str("[server]\npath = \"cat\"\n[session]\ntimeout_ms = 0\n");
    assert!(matches!(result, Err(AppError::Config(msg)) if msg.contains("timeout_ms")));
}

#[test]
fn zero_max_frame_bytes_is_rejected() {
    let result =
        SessionConfig::from_toml_str("[server]\npath = \"cat\"\n[session]\nmax_frame_bytes = 0\n");
    assert!(matches!(result, Err(AppError::Config(msg)) if msg.contains("max_frame_bytes")));
}

#[test]
fn missing_working_dir_is_rejected() {
    let result = SessionConfig::from_toml_str(
        "[server]\npath = \"cat\"\nworking_dir = \"/definitely/not/a/real/dir\"\n",
    );
    assert!(matches!(result, Err(AppError::Config(msg)) if msg.contains("working_dir")));
}

#[test]
fn unknown_exit_policy_is_rejected() {
    let result =
        SessionConfig::from_toml_str("[server]\npath = \"cat\"\n[session]\nexit_policy = \"panic\"\n");
    assert!(matches!(result, Err(AppError::Config(_))));
}

#[test]
fn missing_server_table_is_rejected() {
    assert!(SessionConfig::from_toml_str("[session]\ntimeout_ms = 10\n").is_err());
}

#[test]
fn load_from_path_reads_file() {
    let temp = tempfile::tempdir().expect("tempdir");
    let path = temp.path().join("session.toml");
    std::fs::write(&path, "[server]\npath = \"cat\"\nargs = [\"-u\"]\n").unwrap();

    let config = SessionConfig::load_from_path(&path).expect("load");
    assert_eq!(config.server.args, vec!["-u"]);
}

#[test]
fn load_from_missing_path_is_config_error() {
    let result = SessionConfig::load_from_path("/definitely/not/here.toml");
    assert!(matches!(result, Err(AppError::Config(msg)) if msg.contains("failed to read config")));
}

#[test]
fn for_server_uses_defaults() {
    let config = SessionConfig::for_server("cat").expect("defaults are valid");
    assert_eq!(config.session_options().timeout, Duration::from_secs(30));
}
