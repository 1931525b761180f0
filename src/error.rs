//! Error types for gitvault
//!
//! This module defines the error hierarchy used throughout the application.
//! We use `thiserror` for library-style errors that are part of the API,
//! and convert to protocol-level error responses at the server boundary.

use crate::model::AccessStatus;
use thiserror::Error;

/// Top-level application error
#[derive(Error, Debug)]
pub enum AppError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Backend error: {0}")]
    Backend(#[from] BackendError),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    #[error("Client error: {0}")]
    Client(#[from] ClientError),
}

/// Configuration-related errors
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to load configuration: {0}")]
    Load(String),

    #[error("Invalid configuration: {message}")]
    Invalid { message: String },

    #[error("Missing required configuration: {field}")]
    Missing { field: String },

    #[error("Invalid regex pattern '{pattern}': {reason}")]
    InvalidPattern { pattern: String, reason: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// File backend errors
#[derive(Error, Debug)]
pub enum BackendError {
    #[error("HTTP request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("Backend API error (HTTP {status}): {message}")]
    Api { status: u16, message: String },

    #[error("File not found: {path}")]
    NotFound { path: String },

    #[error("Unauthorized: invalid or expired backend token")]
    Unauthorized,

    #[error("Invalid response from backend: {0}")]
    InvalidResponse(String),

    #[error("Request timeout after {timeout_secs} seconds")]
    Timeout { timeout_secs: u64 },
}

impl BackendError {
    /// Create an appropriate error from an HTTP status code and response body
    pub fn from_response(status: u16, body: &str) -> Self {
        match status {
            401 => BackendError::Unauthorized,
            _ => BackendError::Api {
                status,
                message: if body.is_empty() {
                    format!("HTTP {}", status)
                } else {
                    body.to_string()
                },
            },
        }
    }
}

/// Identity encryption and token hashing errors
#[derive(Error, Debug)]
pub enum CryptoError {
    #[error("Encryption failed: {0}")]
    Encrypt(String),

    #[error("Decryption failed: {0}")]
    Decrypt(String),

    #[error("Invalid base64 ciphertext: {0}")]
    Encoding(#[from] base64::DecodeError),
}

/// Content shape validation errors
#[derive(Error, Debug)]
pub enum ValidatorError {
    #[error("Malformed content: {0}")]
    Malformed(String),

    #[error("Failed to canonicalize content: {0}")]
    Canonicalize(String),
}

/// Notification delivery errors
#[derive(Error, Debug)]
pub enum NotifyError {
    #[error("Notification request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("Notification endpoint returned HTTP {status}")]
    Status { status: u16 },
}

/// Storage orchestrator errors
///
/// Authorization failures carry the [`AccessStatus`] verbatim so the protocol
/// layer can surface the status name to the caller.
#[derive(Error, Debug)]
pub enum StorageError {
    #[error("{status}")]
    AccessDenied { path: String, status: AccessStatus },

    #[error(".access files can not be used as storage paths: {path}")]
    ReservedPath { path: String },

    #[error("Self grant of ADMIN role only allowed.")]
    SelfGrantOnly,

    #[error("ADMIN role can not be revoked from other users.")]
    AdminRevokeRestricted,

    #[error("Validation failed: {0:?}")]
    Validation(Vec<String>),

    #[error("Backend error: {0}")]
    Backend(#[from] BackendError),

    #[error("Crypto error: {0}")]
    Crypto(#[from] CryptoError),

    #[error("Malformed access list record: {0}")]
    CorruptAccessList(#[from] serde_json::Error),

    #[error("Content error: {0}")]
    Content(#[from] ValidatorError),
}

/// Server-side protocol errors
///
/// Each variant produces a distinct diagnostic in the ERROR_RESPONSE sent
/// back to the client; none of them closes the connection.
#[derive(Error, Debug)]
pub enum ProtocolError {
    #[error("envelope is not valid JSON: {0}")]
    MalformedEnvelope(String),

    #[error("envelope does not contain message")]
    MissingMessage,

    #[error("envelope.message does not contain messageType")]
    MissingMessageType,

    #[error("unknown message type: {0}")]
    UnknownMessageType(String),

    #[error("envelope does not contain credentials")]
    MissingCredentials,

    #[error("unknown tenant: {0}")]
    UnknownTenant(String),
}

/// Client-side errors
#[derive(Error, Debug)]
pub enum ClientError {
    #[error("connect() called while in state {state}")]
    InvalidConnectState { state: String },

    #[error("send() called while in state {state}")]
    NotConnected { state: String },

    #[error("request {request_id} ({message_type}) timed out")]
    Timeout {
        request_id: String,
        message_type: String,
    },

    #[error("server error: {0}")]
    Server(String),

    #[error("unexpected response kind: {0}")]
    UnexpectedResponse(String),

    #[error("no credentials configured for tenant: {0}")]
    UnknownTenant(String),

    #[error("WebSocket error: {0}")]
    Transport(#[from] tokio_tungstenite::tungstenite::Error),

    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("connection closed before the response arrived")]
    ConnectionClosed,
}

/// Result type alias for the application
pub type Result<T> = std::result::Result<T, AppError>;

/// Result type alias for backend operations
pub type BackendResult<T> = std::result::Result<T, BackendError>;

/// Result type alias for storage operations
pub type StorageResult<T> = std::result::Result<T, StorageError>;

/// Result type alias for client operations
pub type ClientResult<T> = std::result::Result<T, ClientError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backend_error_from_response() {
        assert!(matches!(
            BackendError::from_response(401, ""),
            BackendError::Unauthorized
        ));

        let api_err = BackendError::from_response(500, "Internal server error");
        assert!(matches!(api_err, BackendError::Api { status: 500, .. }));

        let empty_body = BackendError::from_response(502, "");
        assert_eq!(
            empty_body.to_string(),
            "Backend API error (HTTP 502): HTTP 502"
        );
    }

    #[test]
    fn test_access_denied_message_is_status_name() {
        let err = StorageError::AccessDenied {
            path: "design/doc".into(),
            status: AccessStatus::InvalidToken,
        };
        assert_eq!(err.to_string(), "INVALID_TOKEN");
    }

    #[test]
    fn test_protocol_diagnostics_are_distinct() {
        let diagnostics = [
            ProtocolError::MissingMessage.to_string(),
            ProtocolError::MissingMessageType.to_string(),
            ProtocolError::UnknownMessageType("BOGUS".into()).to_string(),
            ProtocolError::MissingCredentials.to_string(),
            ProtocolError::UnknownTenant("t9".into()).to_string(),
        ];
        for (i, a) in diagnostics.iter().enumerate() {
            for b in diagnostics.iter().skip(i + 1) {
                assert_ne!(a, b);
            }
        }
    }
}
