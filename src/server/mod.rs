//! WebSocket RPC server
//!
//! Serves the storage protocol over a single multiplexed WebSocket per
//! client, plus a plain HTTP health check. Every text frame is one request
//! envelope; each is handled in its own task so a slow backend call never
//! blocks the frames behind it, and responses go out in completion order.
//! Failures of any kind become a correlated ERROR_RESPONSE on the same
//! connection; the server never closes a connection in response to a bad
//! envelope.

use crate::acl::AccessControl;
use crate::backend::{GithubBackend, MemoryBackend, SharedBackend};
use crate::config::AppConfig;
use crate::crypto::{IdentityCipher, TokenHasher};
use crate::error::{AppError, ConfigError, ProtocolError, StorageError};
use crate::model::{
    BackendKind, Credentials, RequestMessage, ResponseEnvelope, ResponseMessage,
};
use crate::notify::create_notifier;
use crate::storage::Storage;
use crate::validator::ContentValidator;
use axum::{
    Router,
    extract::{
        State,
        ws::{Message, WebSocket, WebSocketUpgrade},
    },
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
};
use futures::stream::{SplitSink, StreamExt};
use futures::SinkExt;
use serde::Deserialize;
use std::collections::HashMap;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::Mutex;
use tower::ServiceBuilder;
use tower_http::trace::TraceLayer;
use tracing::{debug, error, info, warn};

/// Shared server state for axum handlers
#[derive(Clone)]
pub struct ServerState {
    storages: Arc<HashMap<String, Arc<Storage>>>,
}

impl ServerState {
    pub fn new(storages: HashMap<String, Arc<Storage>>) -> Self {
        Self {
            storages: Arc::new(storages),
        }
    }

    /// Build one storage instance per configured tenant
    pub fn from_config(config: &AppConfig) -> crate::error::Result<Self> {
        let mut storages = HashMap::new();
        for descriptor in &config.tenants {
            let backend: SharedBackend = match descriptor.backend {
                BackendKind::Github => {
                    Arc::new(GithubBackend::new(&config.github, descriptor)?)
                }
                BackendKind::Memory => Arc::new(MemoryBackend::new()),
            };
            let hasher = TokenHasher::new(config.crypto.token_hash_seed.clone());
            let cipher = IdentityCipher::new(&config.crypto.identity_secret, hasher.clone());
            let access_control = AccessControl::new(Arc::clone(&backend), hasher, cipher);
            let validator = ContentValidator::new(
                &descriptor.element_pattern,
                &descriptor.attribute_pattern,
            )
            .map_err(|e| {
                AppError::Config(ConfigError::InvalidPattern {
                    pattern: descriptor.element_pattern.clone(),
                    reason: e.to_string(),
                })
            })?;
            let notifier = create_notifier(&config.notify)
                .map_err(|e| AppError::Config(ConfigError::Invalid {
                    message: format!("notify: {e}"),
                }))?;

            info!(tenant = %descriptor.name, backend = ?descriptor.backend, "configured tenant");
            storages.insert(
                descriptor.name.clone(),
                Arc::new(Storage::new(backend, access_control, validator, notifier)),
            );
        }
        Ok(Self::new(storages))
    }

    fn storage(&self, tenant: &str) -> Option<Arc<Storage>> {
        self.storages.get(tenant).cloned()
    }
}

/// Build the protocol router
pub fn build_router(state: ServerState) -> Router {
    Router::new()
        .route("/ws", get(websocket_handler))
        .route("/health-check", get(health_check))
        .layer(ServiceBuilder::new().layer(TraceLayer::new_for_http()))
        .with_state(state)
}

/// Run the server until the shutdown future resolves
pub async fn run(
    bind: SocketAddr,
    state: ServerState,
    shutdown: impl Future<Output = ()> + Send + 'static,
) -> crate::error::Result<()> {
    let app = build_router(state);
    let listener = TcpListener::bind(bind)
        .await
        .map_err(|e| AppError::Config(ConfigError::Io(e)))?;
    info!("storage server listening on ws://{}/ws", bind);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown)
        .await
        .map_err(|e| AppError::Config(ConfigError::Io(e)))?;
    Ok(())
}

async fn health_check() -> impl IntoResponse {
    (StatusCode::OK, "OK")
}

async fn websocket_handler(ws: WebSocketUpgrade, State(state): State<ServerState>) -> Response {
    ws.on_upgrade(|socket| handle_connection(socket, state))
}

/// Pump one client connection
///
/// The write half is shared behind a mutex so concurrently completing
/// request tasks can interleave whole frames without tearing them.
async fn handle_connection(socket: WebSocket, state: ServerState) {
    info!("client connected");
    let (sink, mut stream) = socket.split();
    let sink = Arc::new(Mutex::new(sink));

    while let Some(frame) = stream.next().await {
        let frame = match frame {
            Ok(frame) => frame,
            Err(e) => {
                debug!(error = %e, "read error, dropping connection");
                break;
            }
        };
        match frame {
            Message::Text(text) => {
                let state = state.clone();
                let sink = Arc::clone(&sink);
                tokio::spawn(async move {
                    let response = process_envelope(&state, text.as_str()).await;
                    send_envelope(&sink, &response).await;
                });
            }
            Message::Close(_) => break,
            // Pings are answered by axum itself
            _ => {}
        }
    }
    info!("client disconnected");
}

async fn send_envelope(
    sink: &Mutex<SplitSink<WebSocket, Message>>,
    envelope: &ResponseEnvelope,
) {
    let text = match serde_json::to_string(envelope) {
        Ok(text) => text,
        Err(e) => {
            error!(error = %e, "failed to serialize response envelope");
            return;
        }
    };
    if let Err(e) = sink.lock().await.send(Message::Text(text.into())).await {
        debug!(error = %e, "failed to deliver response, client gone");
    }
}

/// Structural view of an incoming envelope, before the message is typed
///
/// Parsing in two stages keeps the diagnostics precise: a missing `message`,
/// a message without `messageType` and an unrecognized `messageType` each
/// produce their own error text.
#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawEnvelope {
    #[serde(default)]
    request_id: Option<String>,
    #[serde(default)]
    message: Option<serde_json::Value>,
    #[serde(default)]
    credentials: Option<Credentials>,
}

async fn process_envelope(state: &ServerState, text: &str) -> ResponseEnvelope {
    let (request_id, result) = parse_envelope(text);
    let message = match result {
        Ok((message, credentials)) => dispatch(state, message, credentials).await,
        Err(e) => {
            warn!(request_id, error = %e, "rejected envelope");
            ResponseMessage::Error {
                error: e.to_string(),
            }
        }
    };
    ResponseEnvelope::new(request_id, message)
}

/// Parse the raw text into a typed request
///
/// The request id is recovered on a best-effort basis so even structural
/// failures can be correlated by the caller.
fn parse_envelope(
    text: &str,
) -> (
    String,
    Result<(RequestMessage, Option<Credentials>), ProtocolError>,
) {
    let raw: RawEnvelope = match serde_json::from_str(text) {
        Ok(raw) => raw,
        Err(e) => {
            return (
                String::new(),
                Err(ProtocolError::MalformedEnvelope(e.to_string())),
            );
        }
    };
    let request_id = raw.request_id.unwrap_or_default();

    let Some(message) = raw.message else {
        return (request_id, Err(ProtocolError::MissingMessage));
    };
    let Some(message_type) = message.get("messageType").and_then(|v| v.as_str()) else {
        return (request_id, Err(ProtocolError::MissingMessageType));
    };
    let message_type = message_type.to_string();

    match serde_json::from_value::<RequestMessage>(message) {
        Ok(typed) => (request_id, Ok((typed, raw.credentials))),
        Err(e) => {
            let err = if e.to_string().contains("unknown variant") {
                ProtocolError::UnknownMessageType(message_type)
            } else {
                ProtocolError::MalformedEnvelope(e.to_string())
            };
            (request_id, Err(err))
        }
    }
}

/// Route a typed request to its tenant's storage and run it
async fn dispatch(
    state: &ServerState,
    message: RequestMessage,
    credentials: Option<Credentials>,
) -> ResponseMessage {
    let Some(credentials) = credentials else {
        return ResponseMessage::Error {
            error: ProtocolError::MissingCredentials.to_string(),
        };
    };
    let Some(storage) = state.storage(&credentials.tenant) else {
        return ResponseMessage::Error {
            error: ProtocolError::UnknownTenant(credentials.tenant.clone()).to_string(),
        };
    };

    let result = execute(&storage, &message, &credentials).await;
    match result {
        Ok(response) => response,
        Err(e) => {
            warn!(
                message_type = message.message_type(),
                identity = %credentials.identity,
                tenant = %credentials.tenant,
                error = %e,
                "request failed"
            );
            ResponseMessage::Error {
                error: e.to_string(),
            }
        }
    }
}

async fn execute(
    storage: &Storage,
    message: &RequestMessage,
    credentials: &Credentials,
) -> Result<ResponseMessage, StorageError> {
    match message {
        RequestMessage::GetAccessList { path } => {
            let access_list = storage.access_list(path, credentials).await?;
            Ok(ResponseMessage::GetAccessList { access_list })
        }
        RequestMessage::Grant {
            path,
            identity,
            role,
        } => {
            let token = storage.grant(path, identity, *role, credentials).await?;
            Ok(ResponseMessage::Grant { token })
        }
        RequestMessage::Revoke {
            path,
            identity,
            role,
        } => {
            storage.revoke(path, identity, *role, credentials).await?;
            Ok(ResponseMessage::Revoke)
        }
        RequestMessage::Save { path, content } => {
            storage.save(path, content, credentials).await?;
            Ok(ResponseMessage::Save)
        }
        RequestMessage::Load { path } => {
            let content = storage.load(path, credentials).await?;
            Ok(ResponseMessage::Load { content })
        }
        RequestMessage::Remove { path } => {
            storage.remove(path, credentials).await?;
            Ok(ResponseMessage::Remove)
        }
        RequestMessage::GetHeadRevision => {
            let revision = storage.head_revision().await?;
            Ok(ResponseMessage::GetHeadRevision { revision })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Role;
    use crate::notify::LogNotifier;

    fn test_state() -> ServerState {
        let backend: SharedBackend = Arc::new(MemoryBackend::new());
        let hasher = TokenHasher::new(crate::util::SecretString::new("seed"));
        let cipher =
            IdentityCipher::new(&crate::util::SecretString::new("secret"), hasher.clone());
        let access_control = AccessControl::new(Arc::clone(&backend), hasher, cipher);
        let storage = Storage::new(
            backend,
            access_control,
            ContentValidator::new("^a-", "^id$").unwrap(),
            Arc::new(LogNotifier),
        );
        let mut storages = HashMap::new();
        storages.insert("t1".to_string(), Arc::new(storage));
        ServerState::new(storages)
    }

    fn envelope(request_id: &str, message: serde_json::Value) -> String {
        serde_json::json!({
            "requestId": request_id,
            "message": message,
            "credentials": {
                "identity": "a@example.com",
                "token": "",
                "tenant": "t1",
            },
        })
        .to_string()
    }

    #[tokio::test]
    async fn test_malformed_json_yields_error_response() {
        let state = test_state();
        let response = process_envelope(&state, "{not json").await;
        assert_eq!(response.request_id, "");
        match response.message {
            ResponseMessage::Error { error } => {
                assert!(error.starts_with("envelope is not valid JSON"), "{error}");
            }
            other => panic!("unexpected response: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_missing_message_diagnostic() {
        let state = test_state();
        let response = process_envelope(&state, r#"{"requestId":"r1"}"#).await;
        assert_eq!(response.request_id, "r1");
        assert_eq!(
            response.message,
            ResponseMessage::Error {
                error: "envelope does not contain message".to_string()
            }
        );
    }

    #[tokio::test]
    async fn test_missing_message_type_diagnostic() {
        let state = test_state();
        let response =
            process_envelope(&state, r#"{"requestId":"r1","message":{"path":"p"}}"#).await;
        assert_eq!(
            response.message,
            ResponseMessage::Error {
                error: "envelope.message does not contain messageType".to_string()
            }
        );
    }

    #[tokio::test]
    async fn test_unknown_message_type_diagnostic() {
        let state = test_state();
        let response = process_envelope(
            &state,
            r#"{"requestId":"r1","message":{"messageType":"EXPLODE_REQUEST"}}"#,
        )
        .await;
        assert_eq!(
            response.message,
            ResponseMessage::Error {
                error: "unknown message type: EXPLODE_REQUEST".to_string()
            }
        );
    }

    #[tokio::test]
    async fn test_missing_credentials_diagnostic() {
        let state = test_state();
        let response = process_envelope(
            &state,
            r#"{"requestId":"r1","message":{"messageType":"LOAD_REQUEST","path":"p"}}"#,
        )
        .await;
        assert_eq!(
            response.message,
            ResponseMessage::Error {
                error: "envelope does not contain credentials".to_string()
            }
        );
    }

    #[tokio::test]
    async fn test_unknown_tenant_diagnostic() {
        let state = test_state();
        let text = serde_json::json!({
            "requestId": "r1",
            "message": {"messageType": "LOAD_REQUEST", "path": "p"},
            "credentials": {"identity": "a@example.com", "token": "", "tenant": "t9"},
        })
        .to_string();
        let response = process_envelope(&state, &text).await;
        assert_eq!(
            response.message,
            ResponseMessage::Error {
                error: "unknown tenant: t9".to_string()
            }
        );
    }

    #[tokio::test]
    async fn test_grant_and_load_round_trip() {
        let state = test_state();

        let grant = envelope(
            "r1",
            serde_json::json!({
                "messageType": "GRANT_REQUEST",
                "path": "p",
                "identity": "a@example.com",
                "role": "ADMIN",
            }),
        );
        let response = process_envelope(&state, &grant).await;
        assert_eq!(response.request_id, "r1");
        let token = match response.message {
            ResponseMessage::Grant { token } => token,
            other => panic!("unexpected response: {other:?}"),
        };

        let load = serde_json::json!({
            "requestId": "r2",
            "message": {"messageType": "LOAD_REQUEST", "path": "p"},
            "credentials": {"identity": "a@example.com", "token": token, "tenant": "t1"},
        })
        .to_string();
        let response = process_envelope(&state, &load).await;
        assert_eq!(response.request_id, "r2");
        assert_eq!(response.message, ResponseMessage::Load { content: None });
    }

    #[tokio::test]
    async fn test_storage_failure_surfaces_status_name() {
        let state = test_state();
        let storage = state.storage("t1").unwrap();
        storage
            .grant(
                "p",
                "a@example.com",
                Role::Admin,
                &Credentials::new("a@example.com", "", "t1"),
            )
            .await
            .unwrap();

        let load = serde_json::json!({
            "requestId": "r1",
            "message": {"messageType": "LOAD_REQUEST", "path": "p"},
            "credentials": {"identity": "a@example.com", "token": "bogus", "tenant": "t1"},
        })
        .to_string();
        let response = process_envelope(&state, &load).await;
        assert_eq!(
            response.message,
            ResponseMessage::Error {
                error: "INVALID_TOKEN".to_string()
            }
        );
    }

    #[test]
    fn test_parse_recovers_request_id_on_structural_failure() {
        let (request_id, result) =
            parse_envelope(r#"{"requestId":"abc","message":{"messageType":17}}"#);
        assert_eq!(request_id, "abc");
        assert!(matches!(result, Err(ProtocolError::MissingMessageType)));
    }
}
