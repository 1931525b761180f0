//! Redacting wrapper for configured secrets.
//!
//! The hash seed, the identity cipher secret and the backend token all pass
//! through configuration structs that derive `Debug`; wrapping them keeps
//! the values out of logs and error messages.

use serde::Deserialize;
use std::fmt;

/// A configuration secret that renders as `[REDACTED]`.
///
/// Access to the underlying value requires an explicit
/// [`expose_secret`](SecretString::expose_secret) call at the point of use,
/// such as keying the token hasher or building an Authorization header.
#[derive(Clone, Default)]
pub struct SecretString(String);

impl SecretString {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    /// Explicitly expose the secret value.
    #[inline]
    pub fn expose_secret(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Debug for SecretString {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("[REDACTED]")
    }
}

impl fmt::Display for SecretString {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("[REDACTED]")
    }
}

impl Drop for SecretString {
    fn drop(&mut self) {
        // Best effort only; the compiler may elide this and copies may exist.
        self.0.clear();
        self.0.shrink_to_fit();
    }
}

impl<'de> Deserialize<'de> for SecretString {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        String::deserialize(deserializer).map(SecretString::new)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_debug_and_display_redacted() {
        let secret = SecretString::new("hash-seed-value");
        assert_eq!(format!("{:?}", secret), "[REDACTED]");
        assert_eq!(format!("{}", secret), "[REDACTED]");
    }

    #[test]
    fn test_expose_secret() {
        let secret = SecretString::new("hash-seed-value");
        assert_eq!(secret.expose_secret(), "hash-seed-value");
    }

    #[test]
    fn test_deserialize_from_plain_string() {
        let secret: SecretString = serde_json::from_str(r#""s3cr3t""#).unwrap();
        assert_eq!(secret.expose_secret(), "s3cr3t");
    }
}
