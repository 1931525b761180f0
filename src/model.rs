//! Domain and wire model
//!
//! Defines the access-control domain types (roles, access status, access
//! entries, credentials) and the tagged message envelope exchanged between
//! client and server. Every request/response kind carries a distinct
//! `messageType` discriminant on the wire; dispatch on both sides is an
//! exhaustive match over the closed sum type.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// The identity sentinel that bypasses encryption and token checks.
pub const ANONYMOUS_IDENTITY: &str = "anonymous";

/// Suffix under which a path's access list is persisted.
pub const ACCESS_SUFFIX: &str = ".access";

/// Access role for a path
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Role {
    /// Administrative operations: grant, revoke, list access
    Admin,
    /// Content operations: save, load, remove
    User,
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Role::Admin => f.write_str("ADMIN"),
            Role::User => f.write_str("USER"),
        }
    }
}

/// Outcome of an authorization check
///
/// `None` means no access list exists for the path at all, which callers use
/// to distinguish "create your own access list" from "ask an admin".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AccessStatus {
    /// No access list configured for the path
    None,
    /// Access list exists but the caller has no entry
    NotFound,
    /// Caller has an entry but supplied no token
    NoToken,
    /// Supplied token does not match the stored hash
    InvalidToken,
    /// Token valid but none of the requested roles are held
    Denied,
    /// Token valid and at least one requested role is held
    Granted,
}

impl fmt::Display for AccessStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            AccessStatus::None => "NONE",
            AccessStatus::NotFound => "NOT_FOUND",
            AccessStatus::NoToken => "NO_TOKEN",
            AccessStatus::InvalidToken => "INVALID_TOKEN",
            AccessStatus::Denied => "DENIED",
            AccessStatus::Granted => "GRANTED",
        };
        f.write_str(name)
    }
}

/// One caller's standing for one path
///
/// The `identity` field holds the encrypted identity while the entry is at
/// rest; [`crate::acl::AccessControl::access_list`] decrypts it and strips
/// the token hash before the entry crosses the engine boundary.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AccessEntry {
    #[serde(default)]
    pub identity: String,

    /// HMAC of the bearer token; empty means no credential set yet.
    /// Never serialized once emptied by the access-list read path.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub token_hash: String,

    #[serde(default)]
    pub roles: Vec<Role>,
}

impl AccessEntry {
    /// Whether any of `required` is held by this entry
    pub fn holds_any(&self, required: &[Role]) -> bool {
        required.iter().any(|role| self.roles.contains(role))
    }
}

/// Mapping from encrypted identity to access entry for exactly one path
///
/// An empty map is "no restrictions configured" (status NONE), not "nobody
/// allowed". BTreeMap keeps `access_list` output deterministically ordered.
pub type AccessMap = BTreeMap<String, AccessEntry>;

/// Caller credentials attached to every request envelope
///
/// Never persisted as-is; only the token's keyed hash is stored, and only
/// inside an [`AccessEntry`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Credentials {
    pub identity: String,
    pub token: String,
    /// Target tenant, resolved server-side to a storage instance
    pub tenant: String,
}

impl Credentials {
    pub fn new(
        identity: impl Into<String>,
        token: impl Into<String>,
        tenant: impl Into<String>,
    ) -> Self {
        Self {
            identity: identity.into(),
            token: token.into(),
            tenant: tenant.into(),
        }
    }
}

/// Request kinds, discriminated by `messageType`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "messageType")]
pub enum RequestMessage {
    #[serde(rename = "GET_ACCESS_LIST_REQUEST")]
    GetAccessList { path: String },

    #[serde(rename = "GRANT_REQUEST")]
    Grant {
        path: String,
        identity: String,
        role: Role,
    },

    #[serde(rename = "REVOKE_REQUEST")]
    Revoke {
        path: String,
        identity: String,
        role: Role,
    },

    #[serde(rename = "SAVE_REQUEST")]
    Save { path: String, content: String },

    #[serde(rename = "LOAD_REQUEST")]
    Load { path: String },

    #[serde(rename = "REMOVE_REQUEST")]
    Remove { path: String },

    #[serde(rename = "GET_HEAD_REVISION_REQUEST")]
    GetHeadRevision,
}

impl RequestMessage {
    /// Wire discriminant, used in timeout diagnostics
    pub fn message_type(&self) -> &'static str {
        match self {
            RequestMessage::GetAccessList { .. } => "GET_ACCESS_LIST_REQUEST",
            RequestMessage::Grant { .. } => "GRANT_REQUEST",
            RequestMessage::Revoke { .. } => "REVOKE_REQUEST",
            RequestMessage::Save { .. } => "SAVE_REQUEST",
            RequestMessage::Load { .. } => "LOAD_REQUEST",
            RequestMessage::Remove { .. } => "REMOVE_REQUEST",
            RequestMessage::GetHeadRevision => "GET_HEAD_REVISION_REQUEST",
        }
    }
}

/// Response kinds, discriminated by `messageType`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "messageType")]
pub enum ResponseMessage {
    #[serde(rename = "GET_ACCESS_LIST_RESPONSE")]
    GetAccessList {
        #[serde(rename = "accessList")]
        access_list: Vec<AccessEntry>,
    },

    /// Carries the generated bearer token back to the grantor so it can be
    /// relayed out-of-band when notification delivery is unavailable.
    #[serde(rename = "GRANT_RESPONSE")]
    Grant { token: String },

    #[serde(rename = "REVOKE_RESPONSE")]
    Revoke,

    #[serde(rename = "SAVE_RESPONSE")]
    Save,

    #[serde(rename = "LOAD_RESPONSE")]
    Load { content: Option<String> },

    #[serde(rename = "REMOVE_RESPONSE")]
    Remove,

    #[serde(rename = "GET_HEAD_REVISION_RESPONSE")]
    GetHeadRevision { revision: String },

    #[serde(rename = "ERROR_RESPONSE")]
    Error { error: String },
}

/// One envelope = one logical call
///
/// A request and its eventual response share the same `requestId`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Envelope<M> {
    pub request_id: String,
    pub message: M,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub credentials: Option<Credentials>,
}

impl<M> Envelope<M> {
    pub fn new(request_id: impl Into<String>, message: M) -> Self {
        Self {
            request_id: request_id.into(),
            message,
            credentials: None,
        }
    }

    pub fn with_credentials(mut self, credentials: Credentials) -> Self {
        self.credentials = Some(credentials);
        self
    }
}

/// Envelope carrying a typed request
pub type RequestEnvelope = Envelope<RequestMessage>;

/// Envelope carrying a typed response
pub type ResponseEnvelope = Envelope<ResponseMessage>;

/// Static binding of a tenant identifier to backend coordinates and
/// shape-validation rules. Loaded once at startup, read-only thereafter.
#[derive(Debug, Clone, Deserialize)]
pub struct StorageDescriptor {
    /// Tenant identifier carried in [`Credentials::tenant`]
    pub name: String,

    /// Backend kind for this tenant
    #[serde(default)]
    pub backend: BackendKind,

    /// Repository name (github backend)
    #[serde(default)]
    pub repository: String,

    /// Branch to read and write (github backend)
    #[serde(default = "StorageDescriptor::default_branch")]
    pub branch: String,

    /// Regex that element names of saved content must match
    pub element_pattern: String,

    /// Regex that attribute names of saved content must match
    pub attribute_pattern: String,
}

impl StorageDescriptor {
    fn default_branch() -> String {
        "master".to_string()
    }
}

/// Backend selection for a tenant
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    /// GitHub repository over the REST API
    #[default]
    Github,
    /// In-process map, for development and tests
    Memory,
}
