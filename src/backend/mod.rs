//! File backend abstraction
//!
//! The storage core treats the versioned file store as an external
//! collaborator behind [`FileBackend`]. Implementations must distinguish
//! "not found" (`Ok(None)` from [`FileBackend::get_file`],
//! [`BackendError::NotFound`] from deletes) from other failures.
//!
//! Two implementations ship with the crate: [`GithubBackend`] talks to the
//! GitHub REST API, [`MemoryBackend`] keeps files in process for development
//! tenants and tests.

pub mod github;
pub mod memory;

pub use github::GithubBackend;
pub use memory::MemoryBackend;

use crate::error::BackendResult;
use async_trait::async_trait;
use std::sync::Arc;

/// One file in a batch commit
#[derive(Debug, Clone)]
pub struct FileChange {
    pub path: String,
    pub content: String,
}

/// Versioned file store collaborator
#[async_trait]
pub trait FileBackend: Send + Sync {
    /// Read a file; `Ok(None)` when the file does not exist.
    async fn get_file(&self, path: &str) -> BackendResult<Option<String>>;

    /// Create or overwrite a file with a change description.
    async fn write_file(
        &self,
        path: &str,
        content: &str,
        message: &str,
        author: Option<&str>,
    ) -> BackendResult<()>;

    /// Delete a file. Fails with [`crate::error::BackendError::NotFound`]
    /// when the file does not exist.
    async fn delete_file(&self, path: &str) -> BackendResult<()>;

    /// Commit several files atomically. Used by bulk operations, not by the
    /// per-path storage core.
    async fn write_files(&self, files: &[FileChange], message: &str) -> BackendResult<()>;

    /// Identifier of the current head revision.
    async fn head_revision(&self) -> BackendResult<String>;
}

/// Shared handle to a backend instance
pub type SharedBackend = Arc<dyn FileBackend>;
