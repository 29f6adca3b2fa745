use serial_test::serial;
use std::env;
use std::fs;
use std::io::Write;
use std::time::Duration;

use streamchat::config::AppConfig;

const TOUCHED_VARS: &[&str] = &[
    "CONFIG_FILE",
    "HOST",
    "PORT",
    "UPSTREAM_ENDPOINT",
    "STREAMCHAT_SERVER__PORT",
    "STREAMCHAT_UPSTREAM__ENDPOINT",
    "STREAMCHAT_UPSTREAM__BEARER_TOKEN",
    "STREAMCHAT_UPSTREAM__READ_TIMEOUT_SECS",
];

// Helper to clear environment variables that might interfere with tests
fn clear_env_vars() {
    for var in TOUCHED_VARS {
        unsafe {
            env::remove_var(var);
        }
    }
}

fn load(args: &[&str]) -> Result<AppConfig, config::ConfigError> {
    let mut argv = vec!["streamchat"];
    argv.extend_from_slice(args);
    AppConfig::load_from_args(argv)
}

fn yaml_file(content: &str) -> tempfile::NamedTempFile {
    let mut file = tempfile::Builder::new()
        .suffix(".yaml")
        .tempfile()
        .expect("Failed to create temp config");
    file.write_all(content.as_bytes()).unwrap();
    file
}

#[test]
#[serial]
fn test_default_config() {
    clear_env_vars();

    let config = load(&[]).expect("Defaults should load");
    assert_eq!(config.server.port, 3000);
    assert_eq!(config.server.host, "127.0.0.1");
    assert_eq!(config.upstream.endpoint, "http://127.0.0.1:8000/api/chat");
    assert_eq!(config.upstream.bearer_token, None);
    assert_eq!(config.upstream.read_options().read_timeout, Duration::from_secs(60));
    assert_eq!(config.sessions.ttl(), Duration::from_secs(30 * 60));
    assert_eq!(config.sessions.pending_timeout(), Duration::from_secs(60));
}

#[test]
#[serial]
fn test_env_override() {
    clear_env_vars();
    unsafe {
        env::set_var("STREAMCHAT_SERVER__PORT", "9090");
        env::set_var("STREAMCHAT_UPSTREAM__BEARER_TOKEN", "secret");
    }

    let config = load(&[]).expect("Failed to load config");
    assert_eq!(config.server.port, 9090);
    assert_eq!(config.upstream.bearer_token.as_deref(), Some("secret"));
    assert_eq!(
        config.upstream.settings().unwrap().bearer_token.as_deref(),
        Some("secret")
    );

    clear_env_vars();
}

#[test]
#[serial]
fn test_file_load() {
    clear_env_vars();

    let file = yaml_file(
        r#"
server:
  port: 7070
upstream:
  endpoint: "http://chat.internal/api/chat"
  read_timeout_secs: 5
"#,
    );
    let path = file.path().to_str().unwrap();

    let config = load(&["--config", path]).expect("Failed to load config from file");
    assert_eq!(config.server.port, 7070);
    assert_eq!(config.upstream.endpoint, "http://chat.internal/api/chat");
    assert_eq!(config.upstream.read_timeout_secs, 5);
    // Untouched keys keep their defaults.
    assert_eq!(config.server.host, "127.0.0.1");
}

#[test]
#[serial]
fn test_precedence_file_env_cli() {
    clear_env_vars();

    let file = yaml_file("server:\n  port: 7070\n");
    unsafe {
        env::set_var("CONFIG_FILE", file.path());
        env::set_var("STREAMCHAT_SERVER__PORT", "8080");
    }

    let config = load(&[]).unwrap();
    assert_eq!(config.server.port, 8080);

    let config = load(&["--port", "9191"]).unwrap();
    assert_eq!(config.server.port, 9191);

    clear_env_vars();
}

#[test]
#[serial]
fn test_cli_upstream_flags() {
    clear_env_vars();

    let config = load(&[
        "--upstream",
        "https://example.com/api/chat",
        "--read-timeout-secs",
        "12",
    ])
    .unwrap();
    assert_eq!(config.upstream.endpoint, "https://example.com/api/chat");
    assert_eq!(config.upstream.read_options().read_timeout, Duration::from_secs(12));
}

#[test]
#[serial]
fn test_invalid_values_are_rejected() {
    clear_env_vars();

    assert!(load(&["--upstream", "not a url"]).is_err());
    assert!(load(&["--read-timeout-secs", "0"]).is_err());
    assert!(load(&["--no-such-flag"]).is_err());
}

#[test]
#[serial]
fn test_cwd_config_fallback() {
    clear_env_vars();

    let cwd_path = "config.yaml";
    fs::write(cwd_path, "server:\n  port: 6060\n").expect("Failed to write ./config.yaml");

    let result = std::panic::catch_unwind(|| {
        let config = load(&[]).expect("Failed to load config");
        assert_eq!(config.server.port, 6060);
    });

    fs::remove_file(cwd_path).unwrap();

    if let Err(e) = result {
        std::panic::resume_unwind(e);
    }
}
