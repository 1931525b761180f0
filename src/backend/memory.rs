//! In-memory file backend
//!
//! Keeps files in a process-local map with a monotonically increasing
//! revision counter. Selected with `backend = "memory"` on a tenant, used by
//! development setups and the integration tests. Like the GitHub backend it
//! has no atomic read-modify-write, so the documented access-list
//! lost-update window applies here too.

use crate::backend::{FileBackend, FileChange};
use crate::error::{BackendError, BackendResult};
use async_trait::async_trait;
use std::collections::HashMap;
use tokio::sync::RwLock;

#[derive(Default)]
struct State {
    files: HashMap<String, String>,
    revision: u64,
}

/// Process-local file backend
#[derive(Default)]
pub struct MemoryBackend {
    state: RwLock<State>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl FileBackend for MemoryBackend {
    async fn get_file(&self, path: &str) -> BackendResult<Option<String>> {
        let state = self.state.read().await;
        Ok(state.files.get(path).cloned())
    }

    async fn write_file(
        &self,
        path: &str,
        content: &str,
        _message: &str,
        _author: Option<&str>,
    ) -> BackendResult<()> {
        let mut state = self.state.write().await;
        state.files.insert(path.to_string(), content.to_string());
        state.revision += 1;
        Ok(())
    }

    async fn delete_file(&self, path: &str) -> BackendResult<()> {
        let mut state = self.state.write().await;
        if state.files.remove(path).is_none() {
            return Err(BackendError::NotFound {
                path: path.to_string(),
            });
        }
        state.revision += 1;
        Ok(())
    }

    async fn write_files(&self, files: &[FileChange], _message: &str) -> BackendResult<()> {
        let mut state = self.state.write().await;
        for file in files {
            state.files.insert(file.path.clone(), file.content.clone());
        }
        state.revision += 1;
        Ok(())
    }

    async fn head_revision(&self) -> BackendResult<String> {
        let state = self.state.read().await;
        Ok(format!("{:016x}", state.revision))
    }
}
