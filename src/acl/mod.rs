//! Access control engine
//!
//! Owns the per-path access-control list: a map from encrypted caller
//! identity to [`AccessEntry`], persisted as a single JSON sidecar record
//! under `path + ".access"` in the file backend. The engine decides
//! role-membership questions ([`AccessControl::check`]) but carries no
//! policy of its own; which roles an operation requires is the storage
//! orchestrator's business.
//!
//! # Concurrency
//!
//! Every mutating operation is load-full-list, mutate-in-memory,
//! store-full-list, with no compare-and-swap: the file backend is a
//! versioned store without atomic read-modify-write. Concurrent mutations
//! to the same path's list can lose an update. A deployment needing strict
//! consistency must add backend-side optimistic concurrency.

use crate::backend::{FileBackend as _, SharedBackend};
use crate::crypto::{IdentityCipher, TokenHasher};
use crate::error::StorageResult;
use crate::model::{ACCESS_SUFFIX, ANONYMOUS_IDENTITY, AccessEntry, AccessMap, AccessStatus, Role};
use tracing::debug;

/// Per-path ACL engine over a file backend
pub struct AccessControl {
    backend: SharedBackend,
    hasher: TokenHasher,
    cipher: IdentityCipher,
}

impl AccessControl {
    pub fn new(backend: SharedBackend, hasher: TokenHasher, cipher: IdentityCipher) -> Self {
        Self {
            backend,
            hasher,
            cipher,
        }
    }

    /// Set the caller's token hash for a path, creating the entry if absent.
    ///
    /// Never rejects based on prior state: an existing hash is overwritten.
    pub async fn set_token(&self, path: &str, identity: &str, token: &str) -> StorageResult<()> {
        let key = self.cipher.encrypt_identity(path, identity)?;
        let mut access_map = self.load_access_map(path).await?;
        access_map
            .entry(key.clone())
            .or_insert_with(|| AccessEntry {
                identity: key.clone(),
                ..Default::default()
            })
            .token_hash = self.hasher.hash(token);
        self.save_access_map(path, &key, &access_map).await
    }

    /// Add a role to the caller's entry (idempotent), creating it if absent.
    ///
    /// Does not set a token; a role without a credential is unusable until
    /// [`set_token`](Self::set_token) runs.
    pub async fn grant(&self, path: &str, identity: &str, role: Role) -> StorageResult<()> {
        let key = self.cipher.encrypt_identity(path, identity)?;
        let mut access_map = self.load_access_map(path).await?;
        let entry = access_map.entry(key.clone()).or_insert_with(|| AccessEntry {
            identity: key.clone(),
            ..Default::default()
        });
        if !entry.roles.contains(&role) {
            entry.roles.push(role);
        }
        self.save_access_map(path, &key, &access_map).await
    }

    /// Remove a role from the caller's entry; no-op if entry or role absent.
    pub async fn revoke(&self, path: &str, identity: &str, role: Role) -> StorageResult<()> {
        let key = self.cipher.encrypt_identity(path, identity)?;
        let mut access_map = self.load_access_map(path).await?;
        if let Some(entry) = access_map.get_mut(&key) {
            entry.roles.retain(|r| *r != role);
        }
        self.save_access_map(path, &key, &access_map).await
    }

    /// Delete the caller's entry entirely.
    pub async fn remove(&self, path: &str, identity: &str) -> StorageResult<()> {
        let key = self.cipher.encrypt_identity(path, identity)?;
        let mut access_map = self.load_access_map(path).await?;
        access_map.remove(&key);
        self.save_access_map(path, &key, &access_map).await
    }

    /// Check whether the caller holds any of `required_roles` on the path.
    pub async fn check(
        &self,
        path: &str,
        identity: &str,
        token: &str,
        required_roles: &[Role],
    ) -> StorageResult<AccessStatus> {
        let access_map = self.load_access_map(path).await?;
        if access_map.is_empty() {
            return Ok(AccessStatus::None);
        }

        // An anonymous grant satisfies any caller without a token check
        if let Some(anonymous) = access_map.get(ANONYMOUS_IDENTITY)
            && anonymous.holds_any(required_roles)
        {
            return Ok(AccessStatus::Granted);
        }

        let key = self.cipher.encrypt_identity(path, identity)?;
        let Some(entry) = access_map.get(&key) else {
            return Ok(AccessStatus::NotFound);
        };
        if token.is_empty() {
            return Ok(AccessStatus::NoToken);
        }
        if entry.token_hash != self.hasher.hash(token) {
            return Ok(AccessStatus::InvalidToken);
        }
        if entry.holds_any(required_roles) {
            Ok(AccessStatus::Granted)
        } else {
            Ok(AccessStatus::Denied)
        }
    }

    /// Ordered access entries with identities decrypted and token hashes
    /// stripped; hashes never cross this boundary.
    pub async fn access_list(&self, path: &str) -> StorageResult<Vec<AccessEntry>> {
        let access_map = self.load_access_map(path).await?;
        let mut entries = Vec::with_capacity(access_map.len());
        for (key, mut entry) in access_map {
            entry.identity = self.cipher.decrypt_identity(path, &key)?;
            entry.token_hash = String::new();
            entries.push(entry);
        }
        Ok(entries)
    }

    /// Encrypted form of an identity for a path, used by the orchestrator
    /// to author backend change descriptions without leaking identities.
    pub fn encrypted_identity(&self, path: &str, identity: &str) -> StorageResult<String> {
        Ok(self.cipher.encrypt_identity(path, identity)?)
    }

    async fn load_access_map(&self, path: &str) -> StorageResult<AccessMap> {
        let sidecar = format!("{}{}", path, ACCESS_SUFFIX);
        match self.backend.get_file(&sidecar).await? {
            Some(json) => Ok(serde_json::from_str(&json)?),
            None => Ok(AccessMap::new()),
        }
    }

    async fn save_access_map(
        &self,
        path: &str,
        author: &str,
        access_map: &AccessMap,
    ) -> StorageResult<()> {
        let sidecar = format!("{}{}", path, ACCESS_SUFFIX);
        let json = serde_json::to_string_pretty(access_map)?;
        debug!(path = %sidecar, entries = access_map.len(), "storing access list");
        self.backend
            .write_file(
                &sidecar,
                &json,
                &format!("{} saved file: {}", author, sidecar),
                None,
            )
            .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{FileBackend, MemoryBackend};
    use crate::util::SecretString;
    use std::sync::Arc;

    fn engine() -> AccessControl {
        let hasher = TokenHasher::new(SecretString::new("hash-seed"));
        let cipher = IdentityCipher::new(&SecretString::new("cipher-secret"), hasher.clone());
        AccessControl::new(Arc::new(MemoryBackend::new()), hasher, cipher)
    }

    #[tokio::test]
    async fn test_unconfigured_path_is_none() {
        let acl = engine();
        let status = acl
            .check("p", "alice@example.com", "any-token", &[Role::Admin])
            .await
            .unwrap();
        assert_eq!(status, AccessStatus::None);
    }

    #[tokio::test]
    async fn test_grant_and_check_granted_and_denied() {
        let acl = engine();
        acl.set_token("p", "alice@example.com", "tok").await.unwrap();
        acl.grant("p", "alice@example.com", Role::User).await.unwrap();

        let granted = acl
            .check("p", "alice@example.com", "tok", &[Role::Admin, Role::User])
            .await
            .unwrap();
        assert_eq!(granted, AccessStatus::Granted);

        let denied = acl
            .check("p", "alice@example.com", "tok", &[Role::Admin])
            .await
            .unwrap();
        assert_eq!(denied, AccessStatus::Denied);
    }

    #[tokio::test]
    async fn test_token_without_role_is_denied_not_not_found() {
        let acl = engine();
        acl.set_token("p", "alice@example.com", "tok").await.unwrap();

        let status = acl
            .check("p", "alice@example.com", "tok", &[Role::User])
            .await
            .unwrap();
        assert_eq!(status, AccessStatus::Denied);
    }

    #[tokio::test]
    async fn test_unknown_identity_is_not_found() {
        let acl = engine();
        acl.set_token("p", "alice@example.com", "tok").await.unwrap();

        let status = acl
            .check("p", "mallory@example.com", "tok", &[Role::User])
            .await
            .unwrap();
        assert_eq!(status, AccessStatus::NotFound);
    }

    #[tokio::test]
    async fn test_missing_token_is_no_token() {
        let acl = engine();
        acl.set_token("p", "alice@example.com", "tok").await.unwrap();
        acl.grant("p", "alice@example.com", Role::User).await.unwrap();

        let status = acl
            .check("p", "alice@example.com", "", &[Role::User])
            .await
            .unwrap();
        assert_eq!(status, AccessStatus::NoToken);
    }

    #[tokio::test]
    async fn test_wrong_token_is_invalid_even_with_role() {
        let acl = engine();
        acl.set_token("p", "alice@example.com", "tok").await.unwrap();
        acl.grant("p", "alice@example.com", Role::User).await.unwrap();

        let status = acl
            .check("p", "alice@example.com", "wrong", &[Role::User])
            .await
            .unwrap();
        assert_eq!(status, AccessStatus::InvalidToken);
    }

    #[tokio::test]
    async fn test_anonymous_grant_short_circuits() {
        let acl = engine();
        acl.grant("p", "anonymous", Role::User).await.unwrap();

        // No entry for bob, no valid token, still granted through anonymous
        let status = acl
            .check("p", "bob@example.com", "", &[Role::User])
            .await
            .unwrap();
        assert_eq!(status, AccessStatus::Granted);

        // Anonymous only covers the roles it holds
        let status = acl
            .check("p", "bob@example.com", "", &[Role::Admin])
            .await
            .unwrap();
        assert_eq!(status, AccessStatus::NotFound);
    }

    #[tokio::test]
    async fn test_grant_is_idempotent() {
        let acl = engine();
        acl.grant("p", "alice@example.com", Role::User).await.unwrap();
        acl.grant("p", "alice@example.com", Role::User).await.unwrap();

        let list = acl.access_list("p").await.unwrap();
        assert_eq!(list.len(), 1);
        assert_eq!(list[0].roles, vec![Role::User]);
    }

    #[tokio::test]
    async fn test_revoke_removes_role_and_tolerates_absent() {
        let acl = engine();
        acl.set_token("p", "alice@example.com", "tok").await.unwrap();
        acl.grant("p", "alice@example.com", Role::User).await.unwrap();
        acl.revoke("p", "alice@example.com", Role::User).await.unwrap();

        let status = acl
            .check("p", "alice@example.com", "tok", &[Role::User])
            .await
            .unwrap();
        assert_eq!(status, AccessStatus::Denied);

        // Revoking a role that is not held, or from an unknown identity, is a no-op
        acl.revoke("p", "alice@example.com", Role::Admin).await.unwrap();
        acl.revoke("p", "nobody@example.com", Role::User).await.unwrap();
    }

    #[tokio::test]
    async fn test_remove_deletes_entry() {
        let acl = engine();
        acl.set_token("p", "alice@example.com", "tok").await.unwrap();
        acl.grant("p", "alice@example.com", Role::User).await.unwrap();
        acl.set_token("p", "bob@example.com", "tok2").await.unwrap();
        acl.grant("p", "bob@example.com", Role::User).await.unwrap();

        acl.remove("p", "alice@example.com").await.unwrap();
        let status = acl
            .check("p", "alice@example.com", "tok", &[Role::User])
            .await
            .unwrap();
        assert_eq!(status, AccessStatus::NotFound);

        // Removing the last entry leaves an empty list, which reads as an
        // unconfigured path, not as a missing identity
        acl.remove("p", "bob@example.com").await.unwrap();
        let status = acl
            .check("p", "bob@example.com", "tok2", &[Role::User])
            .await
            .unwrap();
        assert_eq!(status, AccessStatus::None);
    }

    #[tokio::test]
    async fn test_access_list_decrypts_and_strips_hashes() {
        let acl = engine();
        acl.set_token("p", "alice@example.com", "tok").await.unwrap();
        acl.grant("p", "alice@example.com", Role::Admin).await.unwrap();
        acl.grant("p", "anonymous", Role::User).await.unwrap();

        let list = acl.access_list("p").await.unwrap();
        assert_eq!(list.len(), 2);
        let identities: Vec<&str> = list.iter().map(|e| e.identity.as_str()).collect();
        assert!(identities.contains(&"alice@example.com"));
        assert!(identities.contains(&"anonymous"));
        assert!(list.iter().all(|e| e.token_hash.is_empty()));
    }

    #[tokio::test]
    async fn test_identities_are_encrypted_at_rest() {
        let acl = engine();
        let backend = Arc::clone(&acl.backend);
        acl.set_token("p", "alice@example.com", "tok").await.unwrap();

        let raw = backend.get_file("p.access").await.unwrap().unwrap();
        assert!(!raw.contains("alice@example.com"));
    }
}
