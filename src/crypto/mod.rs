//! Crypto primitives
//!
//! Two pure, stateless primitives over configured secrets:
//!
//! - [`TokenHasher`]: keyed HMAC-SHA256 of bearer tokens, base64-encoded.
//!   Only this hash is ever persisted; the engine compares hashes, never
//!   tokens.
//! - [`IdentityCipher`]: AES-256-GCM over caller identities before they
//!   become access-list keys. The nonce is derived from both the path and
//!   the identity and prepended to the ciphertext, so the same
//!   (path, identity) pair always encrypts to the same ciphertext (lookups
//!   stay map-key equality checks), the same identity yields unlinkable
//!   ciphertexts across different paths, and no two identities on one path
//!   ever share a (key, nonce) pair.
//!
//! Secrets are injected at construction and immutable thereafter.

use crate::error::CryptoError;
use crate::model::ANONYMOUS_IDENTITY;
use crate::util::SecretString;
use aes_gcm::{
    Aes256Gcm, Nonce,
    aead::{Aead, KeyInit},
};
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use hmac::{Hmac, Mac};
use sha2::{Digest, Sha256};

type HmacSha256 = Hmac<Sha256>;

/// Keyed hash for bearer-token verification
#[derive(Clone)]
pub struct TokenHasher {
    seed: SecretString,
}

impl TokenHasher {
    pub fn new(seed: SecretString) -> Self {
        Self { seed }
    }

    /// base64(HMAC-SHA256(seed, content))
    pub fn hash(&self, content: &str) -> String {
        let mut mac = <HmacSha256 as Mac>::new_from_slice(self.seed.expose_secret().as_bytes())
            .expect("HMAC can take key of any size");
        mac.update(content.as_bytes());
        BASE64.encode(mac.finalize().into_bytes())
    }
}

/// Symmetric cipher for identity privacy in persisted access lists
#[derive(Clone)]
pub struct IdentityCipher {
    key: [u8; 32],
    hasher: TokenHasher,
}

impl IdentityCipher {
    /// Key is SHA-256 of the configured secret; `hasher` supplies the
    /// keyed nonce material.
    pub fn new(secret: &SecretString, hasher: TokenHasher) -> Self {
        let key = Sha256::digest(secret.expose_secret().as_bytes()).into();
        Self { key, hasher }
    }

    /// Encrypt an identity for use as an access-list key.
    ///
    /// The anonymous sentinel passes through untouched so anonymous grants
    /// stay recognizable without a decryption pass.
    pub fn encrypt_identity(&self, path: &str, identity: &str) -> Result<String, CryptoError> {
        if identity == ANONYMOUS_IDENTITY {
            return Ok(identity.to_string());
        }
        self.encrypt(path, identity)
    }

    /// Decrypt an access-list key back to the caller identity.
    ///
    /// The nonce travels with the ciphertext, so the path is not needed to
    /// decrypt; the parameter is kept so both directions read the same.
    pub fn decrypt_identity(&self, _path: &str, ciphertext: &str) -> Result<String, CryptoError> {
        if ciphertext == ANONYMOUS_IDENTITY {
            return Ok(ciphertext.to_string());
        }
        self.decrypt(ciphertext)
    }

    fn encrypt(&self, path: &str, plaintext: &str) -> Result<String, CryptoError> {
        let cipher = Aes256Gcm::new_from_slice(&self.key)
            .map_err(|e| CryptoError::Encrypt(format!("failed to create cipher: {}", e)))?;
        let nonce_bytes = self.nonce_for(path, plaintext);
        let nonce = Nonce::from(nonce_bytes);
        let ciphertext = cipher
            .encrypt(&nonce, plaintext.as_bytes())
            .map_err(|e| CryptoError::Encrypt(e.to_string()))?;
        let mut out = Vec::with_capacity(nonce_bytes.len() + ciphertext.len());
        out.extend_from_slice(&nonce_bytes);
        out.extend_from_slice(&ciphertext);
        Ok(BASE64.encode(out))
    }

    fn decrypt(&self, ciphertext: &str) -> Result<String, CryptoError> {
        let cipher = Aes256Gcm::new_from_slice(&self.key)
            .map_err(|e| CryptoError::Decrypt(format!("failed to create cipher: {}", e)))?;
        let raw = BASE64.decode(ciphertext)?;
        if raw.len() <= 12 {
            return Err(CryptoError::Decrypt("ciphertext too short".to_string()));
        }
        let (nonce_bytes, body) = raw.split_at(12);
        let nonce = Nonce::from_slice(nonce_bytes);
        let plaintext = cipher
            .decrypt(nonce, body)
            .map_err(|e| CryptoError::Decrypt(e.to_string()))?;
        String::from_utf8(plaintext).map_err(|e| CryptoError::Decrypt(e.to_string()))
    }

    /// Deterministic nonce, unique per (path, identity): truncated keyed
    /// HMAC over both, NUL-separated.
    fn nonce_for(&self, path: &str, identity: &str) -> [u8; 12] {
        let mut mac =
            <HmacSha256 as Mac>::new_from_slice(self.hasher.seed.expose_secret().as_bytes())
                .expect("HMAC can take key of any size");
        mac.update(path.as_bytes());
        mac.update(b"\0");
        mac.update(identity.as_bytes());
        let digest = mac.finalize().into_bytes();
        let mut nonce = [0u8; 12];
        nonce.copy_from_slice(&digest[..12]);
        nonce
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cipher() -> IdentityCipher {
        let hasher = TokenHasher::new(SecretString::new("hash-seed"));
        IdentityCipher::new(&SecretString::new("cipher-secret"), hasher)
    }

    #[test]
    fn test_hash_is_deterministic_and_keyed() {
        let a = TokenHasher::new(SecretString::new("seed-a"));
        let b = TokenHasher::new(SecretString::new("seed-b"));

        assert_eq!(a.hash("token"), a.hash("token"));
        assert_ne!(a.hash("token"), a.hash("other"));
        assert_ne!(a.hash("token"), b.hash("token"));
    }

    #[test]
    fn test_hash_is_base64() {
        let hasher = TokenHasher::new(SecretString::new("seed"));
        assert!(BASE64.decode(hasher.hash("token")).is_ok());
    }

    #[test]
    fn test_identity_round_trip() {
        let cipher = cipher();
        let encrypted = cipher
            .encrypt_identity("world/region", "alice@example.com")
            .unwrap();
        assert_ne!(encrypted, "alice@example.com");
        let decrypted = cipher.decrypt_identity("world/region", &encrypted).unwrap();
        assert_eq!(decrypted, "alice@example.com");
    }

    #[test]
    fn test_same_path_same_ciphertext() {
        let cipher = cipher();
        let first = cipher.encrypt_identity("p", "alice@example.com").unwrap();
        let second = cipher.encrypt_identity("p", "alice@example.com").unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn test_ciphertext_differs_across_paths() {
        let cipher = cipher();
        let on_p = cipher.encrypt_identity("p", "alice@example.com").unwrap();
        let on_q = cipher.encrypt_identity("q", "alice@example.com").unwrap();
        assert_ne!(on_p, on_q);
    }

    #[test]
    fn test_identities_on_one_path_do_not_share_keystream() {
        let cipher = cipher();
        let a = BASE64
            .decode(cipher.encrypt_identity("p", "alice").unwrap())
            .unwrap();
        let b = BASE64
            .decode(cipher.encrypt_identity("p", "carol").unwrap())
            .unwrap();

        // Distinct identities must get distinct nonces
        assert_ne!(a[..12], b[..12]);

        // With a shared keystream, XORing the two bodies with one known
        // plaintext would recover the other. It must not.
        let recovered: Vec<u8> = a[12..17]
            .iter()
            .zip(&b[12..17])
            .zip(b"alice")
            .map(|((x, y), p)| x ^ y ^ p)
            .collect();
        assert_ne!(recovered, b"carol");
    }

    #[test]
    fn test_anonymous_passes_through() {
        let cipher = cipher();
        assert_eq!(
            cipher.encrypt_identity("p", "anonymous").unwrap(),
            "anonymous"
        );
        assert_eq!(
            cipher.decrypt_identity("p", "anonymous").unwrap(),
            "anonymous"
        );
    }

    #[test]
    fn test_decrypt_rejects_garbage() {
        let cipher = cipher();
        assert!(cipher.decrypt_identity("p", "not-base64!!").is_err());
        // Valid base64, wrong ciphertext
        assert!(cipher.decrypt_identity("p", &BASE64.encode(b"junk")).is_err());
    }
}
