//! Configuration loader with layered sources
//!
//! Loads configuration from multiple sources with the following precedence
//! (highest to lowest):
//! 1. Environment variables (GITVAULT_*)
//! 2. Configuration file (TOML)
//! 3. Default values

use crate::config::types::AppConfig;
use crate::error::ConfigError;
use crate::model::BackendKind;
use config::{Config, Environment, File, FileFormat};
use std::path::Path;

/// Default configuration file paths to check (in order)
const DEFAULT_CONFIG_PATHS: &[&str] = &[
    "gitvault.toml",
    ".gitvault.toml",
    "~/.config/gitvault/config.toml",
    "/etc/gitvault/config.toml",
];

/// Load configuration from a TOML string (useful for testing)
pub fn load_config_from_str(toml_str: &str) -> Result<AppConfig, ConfigError> {
    let config = Config::builder()
        .add_source(File::from_str(toml_str, FileFormat::Toml))
        .build()
        .map_err(|e| ConfigError::Load(e.to_string()))?;

    let app_config: AppConfig = config
        .try_deserialize()
        .map_err(|e| ConfigError::Load(e.to_string()))?;

    validate_config(&app_config)?;

    Ok(app_config)
}

/// Load configuration from files and environment
pub fn load_config(config_path: Option<&str>) -> Result<AppConfig, ConfigError> {
    let mut builder = Config::builder();

    // 1. Defaults come from serde defaults on AppConfig

    // 2. Configuration file
    if let Some(path) = config_path {
        // Explicit path provided - must exist
        if !Path::new(path).exists() {
            return Err(ConfigError::Load(format!(
                "Configuration file not found: {}",
                path
            )));
        }
        builder = builder.add_source(File::new(path, FileFormat::Toml));
    } else {
        // Try default paths (first existing one wins)
        for path in DEFAULT_CONFIG_PATHS {
            let expanded = shellexpand::tilde(path);
            if Path::new(expanded.as_ref()).exists() {
                builder = builder.add_source(File::new(&expanded, FileFormat::Toml));
                break;
            }
        }
    }

    // 3. Environment variables with GITVAULT_ prefix
    // e.g., GITVAULT_SERVER__PORT, GITVAULT_CRYPTO__TOKEN_HASH_SEED
    // Double underscore (__) maps to nested keys (server.port)
    builder = builder.add_source(
        Environment::with_prefix("GITVAULT")
            .separator("__")
            .try_parsing(true),
    );

    // 4. Common GitHub token environment variables, in order of precedence
    for env_var in &["GITHUB_TOKEN", "GH_TOKEN"] {
        if let Ok(token) = std::env::var(env_var) {
            builder = builder
                .set_override("github.token", token)
                .map_err(|e| ConfigError::Load(e.to_string()))?;
            break;
        }
    }

    let config = builder
        .build()
        .map_err(|e| ConfigError::Load(e.to_string()))?;

    let app_config: AppConfig = config
        .try_deserialize()
        .map_err(|e| ConfigError::Load(e.to_string()))?;

    validate_config(&app_config)?;

    Ok(app_config)
}

/// Validate configuration values
fn validate_config(config: &AppConfig) -> Result<(), ConfigError> {
    if config.server.port == 0 {
        return Err(ConfigError::Invalid {
            message: "server.port must be greater than 0".to_string(),
        });
    }

    if config.protocol.request_timeout_secs == 0 {
        return Err(ConfigError::Invalid {
            message: "protocol.request_timeout_secs must be greater than 0".to_string(),
        });
    }

    if config.crypto.token_hash_seed.is_empty() {
        return Err(ConfigError::Missing {
            field: "crypto.token_hash_seed".to_string(),
        });
    }

    if config.crypto.identity_secret.is_empty() {
        return Err(ConfigError::Missing {
            field: "crypto.identity_secret".to_string(),
        });
    }

    if config.tenants.is_empty() {
        return Err(ConfigError::Missing {
            field: "tenants (at least one [[tenants]] entry)".to_string(),
        });
    }

    let mut seen = std::collections::HashSet::new();
    for tenant in &config.tenants {
        if tenant.name.is_empty() {
            return Err(ConfigError::Missing {
                field: "tenants.name".to_string(),
            });
        }
        if !seen.insert(tenant.name.as_str()) {
            return Err(ConfigError::Invalid {
                message: format!("duplicate tenant name: {}", tenant.name),
            });
        }

        validate_pattern(
            &tenant.element_pattern,
            &format!("tenants.{}.element_pattern", tenant.name),
        )?;
        validate_pattern(
            &tenant.attribute_pattern,
            &format!("tenants.{}.attribute_pattern", tenant.name),
        )?;

        if tenant.backend == BackendKind::Github {
            if tenant.repository.is_empty() {
                return Err(ConfigError::Missing {
                    field: format!("tenants.{}.repository", tenant.name),
                });
            }
            if config.github.owner.is_empty() {
                return Err(ConfigError::Missing {
                    field: "github.owner".to_string(),
                });
            }
            if config.github.token.is_none() {
                return Err(ConfigError::Missing {
                    field: "github.token (set GITHUB_TOKEN environment variable)".to_string(),
                });
            }
            if !config.github.url.starts_with("http://")
                && !config.github.url.starts_with("https://")
            {
                return Err(ConfigError::Invalid {
                    message: format!(
                        "github.url must start with http:// or https://, got: {}",
                        config.github.url
                    ),
                });
            }
            if config.github.timeout_secs == 0 {
                return Err(ConfigError::Invalid {
                    message: "github.timeout_secs must be greater than 0".to_string(),
                });
            }
        }
    }

    Ok(())
}

/// Validate that a pattern is valid regex
fn validate_pattern(pattern: &str, field_path: &str) -> Result<(), ConfigError> {
    if let Err(e) = regex::Regex::new(pattern) {
        return Err(ConfigError::InvalidPattern {
            pattern: pattern.to_string(),
            reason: format!("in {}: {}", field_path, e),
        });
    }
    Ok(())
}
