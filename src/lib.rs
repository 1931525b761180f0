//! gitvault
//!
//! Access-controlled remote storage over a Git hosting backend, exposed
//! through a multiplexed WebSocket RPC protocol.
//!
//! ## Features
//!
//! - **Per-path access control** with ADMIN and USER roles, stored next to
//!   the content in `.access` sidecar records
//! - **Identity privacy** - identities are deterministically encrypted and
//!   tokens keyed-hashed before anything reaches the backing repository
//! - **Versioned persistence** over the GitHub REST API, every save an
//!   attributable commit
//! - **Multi-tenant** - one server routes requests to independent storage
//!   instances by tenant name
//! - **Multiplexed protocol** - requests on one connection are handled
//!   concurrently and correlated back by request id
//!
//! ## Access Model
//!
//! ```text
//! unconfigured path → first ADMIN self-grants → ADMIN grants USER/ADMIN
//! ```
//!
//! Every grant generates a fresh bearer token; presenting the token with the
//! matching identity yields GRANTED when the entry holds a required role.
//!
//! ## Example Configuration
//!
//! ```toml
//! [server]
//! host = "127.0.0.1"
//! port = 8980
//!
//! [github]
//! owner = "my-org"
//! # token from GITHUB_TOKEN env var
//!
//! [[tenants]]
//! name = "scenes"
//! repository = "scene-storage"
//! element_pattern = "^a-"
//! attribute_pattern = "^(id|position|rotation)$"
//! ```

pub mod acl;
pub mod backend;
pub mod client;
pub mod config;
pub mod crypto;
pub mod error;
pub mod model;
pub mod notify;
pub mod server;
pub mod storage;
pub mod util;
pub mod validator;

// Re-export main types
pub use client::{ConnectionState, StorageClient};
pub use config::{AppConfig, load_config};
pub use error::{AppError, Result};
pub use model::{AccessEntry, AccessStatus, Credentials, Role};
pub use server::{ServerState, build_router, run};
pub use storage::Storage;
