//! GitHub file backend
//!
//! Implements [`FileBackend`] over the GitHub REST API: the contents API for
//! single-file reads and writes, the git data API for atomic multi-file
//! commits, and the refs API for the head revision.

use crate::backend::{FileBackend, FileChange};
use crate::config::GithubConfig;
use crate::error::{BackendError, BackendResult};
use crate::model::StorageDescriptor;
use async_trait::async_trait;
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use reqwest::{Client, Method, RequestBuilder, Response, StatusCode};
use serde::Deserialize;
use serde_json::json;
use std::time::Duration;
use tracing::{debug, instrument, warn};

/// GitHub REST API backend for one repository and branch
pub struct GithubBackend {
    http: Client,
    base_url: String,
    owner: String,
    repository: String,
    branch: String,
    token: String,
    max_retries: u32,
}

#[derive(Debug, Deserialize)]
struct ContentsResponse {
    content: Option<String>,
    sha: String,
}

#[derive(Debug, Deserialize)]
struct RefResponse {
    object: RefObject,
}

#[derive(Debug, Deserialize)]
struct RefObject {
    sha: String,
}

#[derive(Debug, Deserialize)]
struct CommitResponse {
    sha: String,
    tree: TreeRef,
}

#[derive(Debug, Deserialize)]
struct TreeRef {
    sha: String,
}

#[derive(Debug, Deserialize)]
struct ShaOnly {
    sha: String,
}

impl GithubBackend {
    /// Create a backend for the repository/branch named by `descriptor`
    pub fn new(config: &GithubConfig, descriptor: &StorageDescriptor) -> BackendResult<Self> {
        let http = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .pool_max_idle_per_host(10)
            .pool_idle_timeout(Duration::from_secs(90))
            .danger_accept_invalid_certs(!config.verify_ssl)
            .user_agent(format!("gitvault/{}", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(BackendError::Request)?;

        Ok(Self {
            http,
            base_url: config.api_url(),
            owner: config.owner.clone(),
            repository: descriptor.repository.clone(),
            branch: descriptor.branch.clone(),
            token: config
                .token
                .as_ref()
                .map(|t| t.expose_secret().to_string())
                .unwrap_or_default(),
            max_retries: config.max_retries,
        })
    }

    fn repo_url(&self, suffix: &str) -> String {
        format!(
            "{}/repos/{}/{}{}",
            self.base_url, self.owner, self.repository, suffix
        )
    }

    fn contents_url(&self, path: &str) -> String {
        // Path segments are encoded, separators kept
        let encoded = path
            .split('/')
            .map(|segment| urlencoding::encode(segment).to_string())
            .collect::<Vec<_>>()
            .join("/");
        self.repo_url(&format!("/contents/{}", encoded))
    }

    fn authenticate(&self, request: RequestBuilder) -> RequestBuilder {
        request
            .header("Authorization", format!("Bearer {}", self.token))
            .header("Accept", "application/vnd.github+json")
    }

    /// Execute a request with bounded retries on transport-level failures
    async fn execute(&self, request: RequestBuilder) -> BackendResult<Response> {
        let mut last_error = None;

        for attempt in 0..=self.max_retries {
            if attempt > 0 {
                let delay = Duration::from_millis(100 * 2u64.pow(attempt - 1));
                tokio::time::sleep(delay).await;
                debug!("Retrying request (attempt {})", attempt + 1);
            }

            let req = request
                .try_clone()
                .ok_or_else(|| BackendError::InvalidResponse("Cannot clone request".to_string()))?;

            match req.send().await {
                Ok(response) => {
                    return self.handle_response(response).await;
                }
                Err(e) => {
                    warn!("Request failed: {}", e);
                    let retryable = e.is_timeout() || e.is_connect();
                    last_error = Some(BackendError::Request(e));
                    if !retryable {
                        break;
                    }
                }
            }
        }

        Err(last_error.unwrap_or_else(|| BackendError::InvalidResponse("Unknown error".to_string())))
    }

    async fn handle_response(&self, response: Response) -> BackendResult<Response> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = response.text().await.unwrap_or_default();
        Err(BackendError::from_response(status.as_u16(), &body))
    }

    async fn request_json<T: serde::de::DeserializeOwned>(
        &self,
        method: Method,
        url: &str,
        body: Option<serde_json::Value>,
    ) -> BackendResult<T> {
        let mut request = self.http.request(method, url);
        if let Some(body) = body {
            request = request.json(&body);
        }
        let response = self.execute(self.authenticate(request)).await?;
        response
            .json()
            .await
            .map_err(|e| BackendError::InvalidResponse(format!("Failed to parse response: {}", e)))
    }

    /// Blob sha of `path` on the branch, `None` when absent
    async fn file_sha(&self, path: &str) -> BackendResult<Option<String>> {
        match self.fetch_contents(path).await? {
            Some(contents) => Ok(Some(contents.sha)),
            None => Ok(None),
        }
    }

    async fn fetch_contents(&self, path: &str) -> BackendResult<Option<ContentsResponse>> {
        let url = format!("{}?ref={}", self.contents_url(path), self.branch);
        let request = self.authenticate(self.http.get(&url));
        let response = request.send().await.map_err(BackendError::Request)?;

        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        let response = self.handle_response(response).await?;
        let contents = response
            .json()
            .await
            .map_err(|e| BackendError::InvalidResponse(format!("Failed to parse response: {}", e)))?;
        Ok(Some(contents))
    }

    async fn head_commit(&self) -> BackendResult<CommitResponse> {
        let ref_url = self.repo_url(&format!("/git/ref/heads/{}", self.branch));
        let git_ref: RefResponse = self.request_json(Method::GET, &ref_url, None).await?;
        let commit_url = self.repo_url(&format!("/git/commits/{}", git_ref.object.sha));
        self.request_json(Method::GET, &commit_url, None).await
    }
}

#[async_trait]
impl FileBackend for GithubBackend {
    #[instrument(skip(self), fields(path = %path, repo = %self.repository))]
    async fn get_file(&self, path: &str) -> BackendResult<Option<String>> {
        let Some(contents) = self.fetch_contents(path).await? else {
            return Ok(None);
        };
        let encoded = contents
            .content
            .ok_or_else(|| BackendError::InvalidResponse("contents without content".to_string()))?;
        // GitHub wraps base64 bodies with newlines
        let stripped: String = encoded.chars().filter(|c| !c.is_whitespace()).collect();
        let raw = BASE64
            .decode(stripped)
            .map_err(|e| BackendError::InvalidResponse(format!("invalid base64 content: {}", e)))?;
        let text = String::from_utf8(raw)
            .map_err(|e| BackendError::InvalidResponse(format!("non-utf8 content: {}", e)))?;
        Ok(Some(text))
    }

    #[instrument(skip(self, content), fields(path = %path, repo = %self.repository))]
    async fn write_file(
        &self,
        path: &str,
        content: &str,
        message: &str,
        author: Option<&str>,
    ) -> BackendResult<()> {
        let mut body = json!({
            "message": message,
            "content": BASE64.encode(content.as_bytes()),
            "branch": self.branch,
        });
        // Updating an existing file requires its current blob sha
        if let Some(sha) = self.file_sha(path).await? {
            body["sha"] = json!(sha);
        }
        if let Some(author) = author {
            body["author"] = json!({ "name": author, "email": author });
        }
        let _: serde_json::Value = self
            .request_json(Method::PUT, &self.contents_url(path), Some(body))
            .await?;
        Ok(())
    }

    #[instrument(skip(self), fields(path = %path, repo = %self.repository))]
    async fn delete_file(&self, path: &str) -> BackendResult<()> {
        let sha = self
            .file_sha(path)
            .await?
            .ok_or_else(|| BackendError::NotFound {
                path: path.to_string(),
            })?;
        let body = json!({
            "message": format!("delete {}", path),
            "sha": sha,
            "branch": self.branch,
        });
        let _: serde_json::Value = self
            .request_json(Method::DELETE, &self.contents_url(path), Some(body))
            .await?;
        Ok(())
    }

    #[instrument(skip(self, files), fields(count = files.len(), repo = %self.repository))]
    async fn write_files(&self, files: &[FileChange], message: &str) -> BackendResult<()> {
        let head = self.head_commit().await?;

        // One blob per file, then a tree on top of the head tree
        let mut tree_entries = Vec::with_capacity(files.len());
        for file in files {
            let blob: ShaOnly = self
                .request_json(
                    Method::POST,
                    &self.repo_url("/git/blobs"),
                    Some(json!({ "content": file.content, "encoding": "utf-8" })),
                )
                .await?;
            tree_entries.push(json!({
                "path": file.path,
                "mode": "100644",
                "type": "blob",
                "sha": blob.sha,
            }));
        }

        let tree: ShaOnly = self
            .request_json(
                Method::POST,
                &self.repo_url("/git/trees"),
                Some(json!({ "base_tree": head.tree.sha, "tree": tree_entries })),
            )
            .await?;

        let commit: ShaOnly = self
            .request_json(
                Method::POST,
                &self.repo_url("/git/commits"),
                Some(json!({ "message": message, "tree": tree.sha, "parents": [head.sha] })),
            )
            .await?;

        let _: serde_json::Value = self
            .request_json(
                Method::PATCH,
                &self.repo_url(&format!("/git/refs/heads/{}", self.branch)),
                Some(json!({ "sha": commit.sha })),
            )
            .await?;
        Ok(())
    }

    #[instrument(skip(self), fields(repo = %self.repository))]
    async fn head_revision(&self) -> BackendResult<String> {
        Ok(self.head_commit().await?.sha)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::util::SecretString;

    fn backend() -> GithubBackend {
        let config = GithubConfig {
            owner: "octocat".to_string(),
            token: Some(SecretString::new("gh-token")),
            ..Default::default()
        };
        let descriptor = StorageDescriptor {
            name: "t1".to_string(),
            backend: crate::model::BackendKind::Github,
            repository: "vault".to_string(),
            branch: "master".to_string(),
            element_pattern: "^a-".to_string(),
            attribute_pattern: "^id$".to_string(),
        };
        GithubBackend::new(&config, &descriptor).unwrap()
    }

    #[test]
    fn test_contents_url_encodes_segments() {
        let backend = backend();
        assert_eq!(
            backend.contents_url("dir/file name.xml"),
            "https://api.github.com/repos/octocat/vault/contents/dir/file%20name.xml"
        );
    }

    #[test]
    fn test_repo_url() {
        let backend = backend();
        assert_eq!(
            backend.repo_url("/git/ref/heads/master"),
            "https://api.github.com/repos/octocat/vault/git/ref/heads/master"
        );
    }
}
