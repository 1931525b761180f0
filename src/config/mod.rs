//! Configuration module
//!
//! Configuration loading and types for gitvault.

pub mod loader;
pub mod types;

pub use loader::{load_config, load_config_from_str};
pub use types::{
    AppConfig, CryptoConfig, GithubConfig, LogFormat, LoggingConfig, NotifyConfig, ProtocolConfig,
    ServerConfig,
};
