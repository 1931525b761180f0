//! Storage orchestrator
//!
//! The policy layer between the protocol and the file backend: decides which
//! roles each operation requires, sequences access checks with backend I/O,
//! and owns the non-obvious rules: first-admin self-bootstrap on an
//! unconfigured path, the cross-admin revocation guard, and the refusal to
//! treat `.access` sidecar records as ordinary content.

use crate::acl::AccessControl;
use crate::backend::{FileBackend as _, SharedBackend};
use crate::error::{BackendError, StorageError, StorageResult};
use crate::model::{ACCESS_SUFFIX, AccessEntry, AccessStatus, Credentials, Role};
use crate::notify::{Notifier as _, SharedNotifier};
use crate::validator::ContentValidator;
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use tracing::{info, warn};

/// Access-controlled storage for one tenant
pub struct Storage {
    backend: SharedBackend,
    access_control: AccessControl,
    validator: ContentValidator,
    notifier: SharedNotifier,
}

impl Storage {
    pub fn new(
        backend: SharedBackend,
        access_control: AccessControl,
        validator: ContentValidator,
        notifier: SharedNotifier,
    ) -> Self {
        Self {
            backend,
            access_control,
            validator,
            notifier,
        }
    }

    /// List a path's access entries. Requires ADMIN.
    ///
    /// An unconfigured path returns an empty list rather than failing, so a
    /// caller can discover "no restrictions yet" without an error.
    pub async fn access_list(
        &self,
        path: &str,
        credentials: &Credentials,
    ) -> StorageResult<Vec<AccessEntry>> {
        let status = self.check(path, credentials, &[Role::Admin]).await?;
        match status {
            AccessStatus::None => Ok(Vec::new()),
            AccessStatus::Granted => self.access_control.access_list(path).await,
            other => Err(denied(path, other)),
        }
    }

    /// Grant a role, generating and delivering a fresh bearer token.
    ///
    /// On an unconfigured path only the caller may grant, only to itself,
    /// and only ADMIN: the self-bootstrap of the first administrator.
    /// Returns the token so the grantor can relay it if delivery is
    /// unconfigured or failed.
    pub async fn grant(
        &self,
        path: &str,
        identity: &str,
        role: Role,
        credentials: &Credentials,
    ) -> StorageResult<String> {
        let status = self.check(path, credentials, &[Role::Admin]).await?;
        match status {
            AccessStatus::None => {
                if role == Role::Admin && identity == credentials.identity {
                    info!(identity, path, "self granting ADMIN role");
                } else {
                    return Err(StorageError::SelfGrantOnly);
                }
            }
            AccessStatus::Granted => {}
            other => return Err(denied(path, other)),
        }

        let token = generate_token();
        // Token before role: a concurrent check may see a token-only entry
        // (DENIED), never a role with no usable credential.
        self.access_control.set_token(path, identity, &token).await?;
        self.access_control.grant(path, identity, role).await?;

        let subject = format!("Storage access grant {}", path);
        let body = format!("Path: {}\nRole: {}\nToken:\n{}", path, role, token);
        if let Err(e) = self.notifier.send(identity, &subject, &body).await {
            warn!(error = %e, identity, "token delivery failed; grantor must relay the token");
        }

        info!(
            grantor = %credentials.identity,
            grantee = %identity,
            %role,
            path,
            "granted role"
        );
        Ok(token)
    }

    /// Revoke a role. Requires ADMIN.
    ///
    /// An ADMIN role can not be revoked from any identity other than the
    /// caller, so a single admin can not unilaterally depose another.
    pub async fn revoke(
        &self,
        path: &str,
        identity: &str,
        role: Role,
        credentials: &Credentials,
    ) -> StorageResult<()> {
        let status = self.check(path, credentials, &[Role::Admin]).await?;
        if status != AccessStatus::Granted {
            return Err(denied(path, status));
        }
        if identity != credentials.identity && role == Role::Admin {
            return Err(StorageError::AdminRevokeRestricted);
        }

        info!(
            revoker = %credentials.identity,
            target = %identity,
            %role,
            path,
            "revoked role"
        );
        // Revocation applies to the caller's own entry regardless of the
        // identity argument; see DESIGN.md before changing this.
        self.access_control
            .revoke(path, &credentials.identity, role)
            .await
    }

    /// Validate, canonicalize and persist content. Requires ADMIN or USER.
    pub async fn save(
        &self,
        path: &str,
        content: &str,
        credentials: &Credentials,
    ) -> StorageResult<()> {
        // Content storage and ACL storage share one namespace
        if path.ends_with(ACCESS_SUFFIX) {
            return Err(StorageError::ReservedPath {
                path: path.to_string(),
            });
        }
        let status = self.check(path, credentials, &[Role::Admin, Role::User]).await?;
        if status != AccessStatus::Granted {
            return Err(denied(path, status));
        }

        let errors = self.validator.validate(content);
        if !errors.is_empty() {
            return Err(StorageError::Validation(errors));
        }
        let canonical = self.validator.canonicalize(content)?;

        let author = self
            .access_control
            .encrypted_identity(path, &credentials.identity)?;
        info!(identity = %credentials.identity, path, "saved content");
        self.backend
            .write_file(
                path,
                &canonical,
                &format!("{} saved file: {}", author, path),
                Some(&author),
            )
            .await?;
        Ok(())
    }

    /// Load content. Requires ADMIN or USER.
    ///
    /// An unconfigured path returns `Ok(None)`, the same probe-without-error
    /// semantics as [`access_list`](Self::access_list).
    pub async fn load(
        &self,
        path: &str,
        credentials: &Credentials,
    ) -> StorageResult<Option<String>> {
        let status = self.check(path, credentials, &[Role::Admin, Role::User]).await?;
        match status {
            AccessStatus::None => Ok(None),
            AccessStatus::Granted => Ok(self.backend.get_file(path).await?),
            other => Err(denied(path, other)),
        }
    }

    /// Delete content and its ACL sidecar. Requires ADMIN or USER.
    pub async fn remove(&self, path: &str, credentials: &Credentials) -> StorageResult<()> {
        let status = self.check(path, credentials, &[Role::Admin, Role::User]).await?;
        if status != AccessStatus::Granted {
            return Err(denied(path, status));
        }

        info!(identity = %credentials.identity, path, "deleted content");
        // Content may never have been saved; the sidecar must exist for the
        // check above to have passed.
        match self.backend.delete_file(path).await {
            Ok(()) | Err(BackendError::NotFound { .. }) => {}
            Err(e) => return Err(e.into()),
        }
        self.backend
            .delete_file(&format!("{}{}", path, ACCESS_SUFFIX))
            .await?;
        Ok(())
    }

    /// Current backend head revision. Read-only metadata, no authorization.
    pub async fn head_revision(&self) -> StorageResult<String> {
        Ok(self.backend.head_revision().await?)
    }

    async fn check(
        &self,
        path: &str,
        credentials: &Credentials,
        required: &[Role],
    ) -> StorageResult<AccessStatus> {
        self.access_control
            .check(path, &credentials.identity, &credentials.token, required)
            .await
    }
}

fn denied(path: &str, status: AccessStatus) -> StorageError {
    StorageError::AccessDenied {
        path: path.to_string(),
        status,
    }
}

/// 32 random bytes, base64
fn generate_token() -> String {
    let bytes: [u8; 32] = rand::random();
    BASE64.encode(bytes)
}
