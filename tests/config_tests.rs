//! Configuration integration tests

use gitvault::config::{LogFormat, load_config, load_config_from_str};
use gitvault::model::BackendKind;
use gitvault::server::ServerState;

const FULL_CONFIG: &str = r#"
[server]
host = "0.0.0.0"
port = 9000

[protocol]
request_timeout_secs = 5

[crypto]
token_hash_seed = "hash-seed"
identity_secret = "identity-secret"

[github]
url = "https://github.example.com/api/v3"
owner = "my-org"
token = "file-token"
timeout_secs = 15
max_retries = 2

[notify]
webhook_url = "https://hooks.example.com/tokens"
timeout_secs = 3

[logging]
level = "debug"
format = "json"

[[tenants]]
name = "scenes"
repository = "scene-storage"
branch = "main"
element_pattern = "^a-"
attribute_pattern = "^(id|position)$"

[[tenants]]
name = "scratch"
backend = "memory"
element_pattern = ".*"
attribute_pattern = ".*"
"#;

#[test]
fn test_full_config_round_trip() {
    let config = load_config_from_str(FULL_CONFIG).unwrap();

    assert_eq!(config.server.host, "0.0.0.0");
    assert_eq!(config.server.port, 9000);
    assert_eq!(config.protocol.request_timeout_secs, 5);
    assert_eq!(config.github.api_url(), "https://github.example.com/api/v3");
    assert_eq!(config.github.max_retries, 2);
    assert_eq!(
        config.notify.webhook_url.as_deref(),
        Some("https://hooks.example.com/tokens")
    );
    assert_eq!(config.logging.level, "debug");
    assert_eq!(config.logging.format, LogFormat::Json);

    assert_eq!(config.tenants.len(), 2);
    assert_eq!(config.tenants[0].backend, BackendKind::Github);
    assert_eq!(config.tenants[0].branch, "main");
    assert_eq!(config.tenants[1].backend, BackendKind::Memory);
    // Branch defaults apply per tenant
    assert_eq!(config.tenants[1].branch, "master");
}

#[test]
fn test_secrets_do_not_leak_through_debug() {
    let config = load_config_from_str(FULL_CONFIG).unwrap();
    let debug = format!("{:?}", config);
    assert!(!debug.contains("hash-seed"));
    assert!(!debug.contains("identity-secret"));
    assert!(!debug.contains("file-token"));
}

#[test]
fn test_server_state_builds_all_tenants() {
    let config = load_config_from_str(FULL_CONFIG).unwrap();
    // Both backend kinds construct without touching the network
    ServerState::from_config(&config).unwrap();
}

#[test]
fn test_load_config_from_explicit_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("gitvault.toml");
    std::fs::write(&path, FULL_CONFIG).unwrap();

    let config = load_config(path.to_str()).unwrap();
    assert_eq!(config.server.port, 9000);
    assert_eq!(config.tenants.len(), 2);
}

#[test]
fn test_load_config_missing_file_fails() {
    let result = load_config(Some("/nonexistent/gitvault.toml"));
    assert!(result.is_err());
}

#[test]
fn test_minimal_memory_only_config() {
    let toml = r#"
[crypto]
token_hash_seed = "seed"
identity_secret = "secret"

[[tenants]]
name = "dev"
backend = "memory"
element_pattern = ".*"
attribute_pattern = ".*"
"#;
    let config = load_config_from_str(toml).unwrap();
    assert_eq!(config.server.port, 8980);
    assert!(config.github.token.is_none());
    ServerState::from_config(&config).unwrap();
}
