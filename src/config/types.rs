//! Configuration types for gitvault
//!
//! This module defines the configuration structure that can be loaded from
//! TOML files and/or environment variables.

use crate::model::StorageDescriptor;
use crate::util::SecretString;
use serde::Deserialize;

/// Root configuration structure
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// WebSocket server settings
    pub server: ServerConfig,

    /// Request/response protocol settings
    pub protocol: ProtocolConfig,

    /// Token hashing and identity encryption secrets
    pub crypto: CryptoConfig,

    /// GitHub backend connection settings (shared across github tenants)
    pub github: GithubConfig,

    /// Out-of-band token delivery
    pub notify: NotifyConfig,

    /// Logging configuration
    pub logging: LoggingConfig,

    /// Tenant descriptors; each tenant gets its own storage instance
    pub tenants: Vec<StorageDescriptor>,
}

/// WebSocket server configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Bind host
    pub host: String,

    /// Bind port
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8980,
        }
    }
}

/// Protocol-level knobs shared by client and server
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ProtocolConfig {
    /// Per-call timeout applied by the client to every outstanding request
    pub request_timeout_secs: u64,
}

impl Default for ProtocolConfig {
    fn default() -> Self {
        Self {
            request_timeout_secs: 10,
        }
    }
}

/// Secrets for the crypto primitives
///
/// Read once at startup, injected into the access control engine, immutable
/// thereafter.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct CryptoConfig {
    /// Seed of the keyed token hash (prefer env var GITVAULT_CRYPTO__TOKEN_HASH_SEED)
    pub token_hash_seed: SecretString,

    /// Secret keying the identity cipher
    pub identity_secret: SecretString,
}

/// GitHub API connection configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct GithubConfig {
    /// API base URL (overridable for GitHub Enterprise or tests)
    pub url: String,

    /// Repository owner for all github tenants
    pub owner: String,

    /// API token (prefer env var GITHUB_TOKEN)
    #[serde(default)]
    pub token: Option<SecretString>,

    /// Request timeout in seconds
    pub timeout_secs: u64,

    /// Maximum retries for failed requests
    pub max_retries: u32,

    /// Whether to verify SSL certificates
    pub verify_ssl: bool,
}

impl Default for GithubConfig {
    fn default() -> Self {
        Self {
            url: "https://api.github.com".to_string(),
            owner: String::new(),
            token: None,
            timeout_secs: 30,
            max_retries: 3,
            verify_ssl: true,
        }
    }
}

impl GithubConfig {
    /// Get the API base URL without a trailing slash
    pub fn api_url(&self) -> String {
        self.url.trim_end_matches('/').to_string()
    }
}

/// Out-of-band notification configuration
///
/// When `webhook_url` is unset, granted tokens are logged locally instead of
/// being delivered; the grant itself still succeeds.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct NotifyConfig {
    /// Endpoint receiving `{recipient, subject, body}` JSON posts
    pub webhook_url: Option<String>,

    /// Delivery timeout in seconds
    #[serde(default = "NotifyConfig::default_timeout")]
    pub timeout_secs: u64,
}

impl NotifyConfig {
    fn default_timeout() -> u64 {
        10
    }
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    pub level: String,

    /// Output format (pretty, json)
    pub format: LogFormat,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::Pretty,
        }
    }
}

/// Log output format
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Human-readable output
    #[default]
    Pretty,
    /// JSON structured output
    Json,
}
