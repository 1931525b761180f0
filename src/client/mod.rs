//! WebSocket RPC client
//!
//! A thin typed facade over the storage protocol. One connection multiplexes
//! any number of in-flight calls; responses are correlated back to callers by
//! `requestId` through a pending map, so calls may complete in any order.
//!
//! Every call carries the credentials configured for its tenant and is
//! bounded by the protocol timeout; a timed-out call abandons its pending
//! slot and a response arriving later is dropped silently.

use crate::config::ProtocolConfig;
use crate::error::{ClientError, ClientResult};
use crate::model::{
    AccessEntry, Credentials, RequestEnvelope, RequestMessage, ResponseEnvelope,
    ResponseMessage, Role,
};
use futures::stream::SplitSink;
use futures::{SinkExt, StreamExt};
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::{Mutex as AsyncMutex, oneshot};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};
use tracing::{debug, warn};
use uuid::Uuid;

type WsSink = SplitSink<WebSocketStream<MaybeTlsStream<TcpStream>>, Message>;
type PendingMap = HashMap<String, oneshot::Sender<ResponseMessage>>;

/// Connection lifecycle states
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    ConnectionFailed,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ConnectionState::Disconnected => "DISCONNECTED",
            ConnectionState::Connecting => "CONNECTING",
            ConnectionState::Connected => "CONNECTED",
            ConnectionState::ConnectionFailed => "CONNECTION_FAILED",
        };
        f.write_str(name)
    }
}

/// Handler invoked for envelopes with no pending caller
pub type UnsolicitedHandler = Box<dyn Fn(ResponseEnvelope) + Send + Sync>;

/// Handler invoked once when the connection ends, however it ends
pub type DisconnectHandler = Box<dyn Fn() + Send + Sync>;

/// Handler invoked when a transport error is observed while connected,
/// before the connection is torn down
pub type ErrorHandler = Box<dyn Fn(String) + Send + Sync>;

/// Storage protocol client
pub struct StorageClient {
    url: String,
    timeout: Duration,
    credentials: HashMap<String, Credentials>,
    state: Arc<Mutex<ConnectionState>>,
    pending: Arc<Mutex<PendingMap>>,
    sink: Arc<AsyncMutex<Option<WsSink>>>,
    reader: Mutex<Option<JoinHandle<()>>>,
    unsolicited: Arc<Mutex<Option<UnsolicitedHandler>>>,
    on_disconnect: Arc<Mutex<Option<DisconnectHandler>>>,
    on_error: Arc<Mutex<Option<ErrorHandler>>>,
}

impl StorageClient {
    /// Create a client for `url` (e.g. `ws://localhost:8980/ws`)
    pub fn new(url: impl Into<String>, protocol: &ProtocolConfig) -> Self {
        Self {
            url: url.into(),
            timeout: Duration::from_secs(protocol.request_timeout_secs),
            credentials: HashMap::new(),
            state: Arc::new(Mutex::new(ConnectionState::Disconnected)),
            pending: Arc::new(Mutex::new(HashMap::new())),
            sink: Arc::new(AsyncMutex::new(None)),
            reader: Mutex::new(None),
            unsolicited: Arc::new(Mutex::new(None)),
            on_disconnect: Arc::new(Mutex::new(None)),
            on_error: Arc::new(Mutex::new(None)),
        }
    }

    /// Register credentials used for every call against `tenant`
    pub fn set_credentials(&mut self, credentials: Credentials) {
        self.credentials
            .insert(credentials.tenant.clone(), credentials);
    }

    /// Register a handler for envelopes that match no pending request
    pub fn set_unsolicited_handler(&self, handler: UnsolicitedHandler) {
        *self.unsolicited.lock().unwrap() = Some(handler);
    }

    /// Register a handler invoked when the connection ends, whether through
    /// [`disconnect`](Self::disconnect) or a remote close
    pub fn set_disconnect_handler(&self, handler: DisconnectHandler) {
        *self.on_disconnect.lock().unwrap() = Some(handler);
    }

    /// Register a handler invoked when a transport error drops the
    /// connection; the disconnect handler still fires afterwards
    pub fn set_error_handler(&self, handler: ErrorHandler) {
        *self.on_error.lock().unwrap() = Some(handler);
    }

    pub fn state(&self) -> ConnectionState {
        *self.state.lock().unwrap()
    }

    /// Open the connection and start the reader task
    ///
    /// Valid only from DISCONNECTED or CONNECTION_FAILED; a failed attempt
    /// leaves the client in CONNECTION_FAILED, from which connect may be
    /// retried.
    pub async fn connect(&self) -> ClientResult<()> {
        {
            let mut state = self.state.lock().unwrap();
            match *state {
                ConnectionState::Disconnected | ConnectionState::ConnectionFailed => {
                    *state = ConnectionState::Connecting;
                }
                other => {
                    return Err(ClientError::InvalidConnectState {
                        state: other.to_string(),
                    });
                }
            }
        }

        let (ws, _) = match connect_async(self.url.as_str()).await {
            Ok(ok) => ok,
            Err(e) => {
                *self.state.lock().unwrap() = ConnectionState::ConnectionFailed;
                return Err(ClientError::Transport(e));
            }
        };
        let (sink, stream) = ws.split();
        *self.sink.lock().await = Some(sink);

        let handle = tokio::spawn(read_loop(
            stream,
            Arc::clone(&self.pending),
            Arc::clone(&self.state),
            Arc::clone(&self.unsolicited),
            Arc::clone(&self.on_disconnect),
            Arc::clone(&self.on_error),
        ));
        *self.reader.lock().unwrap() = Some(handle);
        *self.state.lock().unwrap() = ConnectionState::Connected;
        debug!(url = %self.url, "connected");
        Ok(())
    }

    /// Close the connection and fail all in-flight calls
    pub async fn disconnect(&self) {
        if let Some(mut sink) = self.sink.lock().await.take() {
            let _ = sink.close().await;
        }
        if let Some(handle) = self.reader.lock().unwrap().take() {
            handle.abort();
        }
        self.pending.lock().unwrap().clear();
        *self.state.lock().unwrap() = ConnectionState::Disconnected;
        // The reader is aborted, so its own notification will not run
        if let Some(handler) = self.on_disconnect.lock().unwrap().as_ref() {
            handler();
        }
        debug!("disconnected");
    }

    /// List access entries for `path`
    pub async fn get_access_list(
        &self,
        tenant: &str,
        path: &str,
    ) -> ClientResult<Vec<AccessEntry>> {
        let response = self
            .request(
                tenant,
                RequestMessage::GetAccessList {
                    path: path.to_string(),
                },
            )
            .await?;
        match response {
            ResponseMessage::GetAccessList { access_list } => Ok(access_list),
            other => Err(unexpected(other)),
        }
    }

    /// Grant `role` on `path` to `identity`, returning the generated token
    pub async fn grant(
        &self,
        tenant: &str,
        path: &str,
        identity: &str,
        role: Role,
    ) -> ClientResult<String> {
        let response = self
            .request(
                tenant,
                RequestMessage::Grant {
                    path: path.to_string(),
                    identity: identity.to_string(),
                    role,
                },
            )
            .await?;
        match response {
            ResponseMessage::Grant { token } => Ok(token),
            other => Err(unexpected(other)),
        }
    }

    /// Revoke `role` on `path`
    pub async fn revoke(
        &self,
        tenant: &str,
        path: &str,
        identity: &str,
        role: Role,
    ) -> ClientResult<()> {
        let response = self
            .request(
                tenant,
                RequestMessage::Revoke {
                    path: path.to_string(),
                    identity: identity.to_string(),
                    role,
                },
            )
            .await?;
        match response {
            ResponseMessage::Revoke => Ok(()),
            other => Err(unexpected(other)),
        }
    }

    /// Save `content` at `path`
    pub async fn save(&self, tenant: &str, path: &str, content: &str) -> ClientResult<()> {
        let response = self
            .request(
                tenant,
                RequestMessage::Save {
                    path: path.to_string(),
                    content: content.to_string(),
                },
            )
            .await?;
        match response {
            ResponseMessage::Save => Ok(()),
            other => Err(unexpected(other)),
        }
    }

    /// Load the content at `path`, `None` when nothing is stored there
    pub async fn load(&self, tenant: &str, path: &str) -> ClientResult<Option<String>> {
        let response = self
            .request(
                tenant,
                RequestMessage::Load {
                    path: path.to_string(),
                },
            )
            .await?;
        match response {
            ResponseMessage::Load { content } => Ok(content),
            other => Err(unexpected(other)),
        }
    }

    /// Remove the content and access list at `path`
    pub async fn remove(&self, tenant: &str, path: &str) -> ClientResult<()> {
        let response = self
            .request(
                tenant,
                RequestMessage::Remove {
                    path: path.to_string(),
                },
            )
            .await?;
        match response {
            ResponseMessage::Remove => Ok(()),
            other => Err(unexpected(other)),
        }
    }

    /// Current head revision of the tenant's backend
    pub async fn get_head_revision(&self, tenant: &str) -> ClientResult<String> {
        let response = self.request(tenant, RequestMessage::GetHeadRevision).await?;
        match response {
            ResponseMessage::GetHeadRevision { revision } => Ok(revision),
            other => Err(unexpected(other)),
        }
    }

    /// Send one request and wait for its correlated response
    async fn request(&self, tenant: &str, message: RequestMessage) -> ClientResult<ResponseMessage> {
        {
            let state = self.state.lock().unwrap();
            if *state != ConnectionState::Connected {
                return Err(ClientError::NotConnected {
                    state: state.to_string(),
                });
            }
        }
        let credentials = self
            .credentials
            .get(tenant)
            .ok_or_else(|| ClientError::UnknownTenant(tenant.to_string()))?;

        let request_id = Uuid::new_v4().to_string();
        let message_type = message.message_type();
        let envelope = RequestEnvelope::new(request_id.clone(), message)
            .with_credentials(credentials.clone());
        let text = serde_json::to_string(&envelope)?;

        let (tx, rx) = oneshot::channel();
        self.pending.lock().unwrap().insert(request_id.clone(), tx);

        {
            let mut sink = self.sink.lock().await;
            let Some(sink) = sink.as_mut() else {
                self.pending.lock().unwrap().remove(&request_id);
                return Err(ClientError::ConnectionClosed);
            };
            if let Err(e) = sink.send(Message::Text(text)).await {
                self.pending.lock().unwrap().remove(&request_id);
                return Err(ClientError::Transport(e));
            }
        }

        let response = match tokio::time::timeout(self.timeout, rx).await {
            Ok(Ok(response)) => response,
            // Sender dropped: reader task ended with the call in flight
            Ok(Err(_)) => return Err(ClientError::ConnectionClosed),
            Err(_) => {
                // Abandon the slot so a late response is dropped on arrival
                self.pending.lock().unwrap().remove(&request_id);
                return Err(ClientError::Timeout {
                    request_id,
                    message_type: message_type.to_string(),
                });
            }
        };

        match response {
            ResponseMessage::Error { error } => Err(ClientError::Server(error)),
            other => Ok(other),
        }
    }
}

fn unexpected(response: ResponseMessage) -> ClientError {
    ClientError::UnexpectedResponse(format!("{response:?}"))
}

/// Pump inbound frames, completing pending calls by request id
///
/// Removal from the pending map is first-wins: a duplicate envelope for an
/// already-answered request id finds no sender and falls through to the
/// unsolicited path.
async fn read_loop(
    mut stream: futures::stream::SplitStream<WebSocketStream<MaybeTlsStream<TcpStream>>>,
    pending: Arc<Mutex<PendingMap>>,
    state: Arc<Mutex<ConnectionState>>,
    unsolicited: Arc<Mutex<Option<UnsolicitedHandler>>>,
    on_disconnect: Arc<Mutex<Option<DisconnectHandler>>>,
    on_error: Arc<Mutex<Option<ErrorHandler>>>,
) {
    while let Some(frame) = stream.next().await {
        let text = match frame {
            Ok(Message::Text(text)) => text,
            Ok(Message::Close(_)) => break,
            Ok(_) => continue,
            Err(e) => {
                warn!(error = %e, "read error, closing connection");
                if let Some(handler) = on_error.lock().unwrap().as_ref() {
                    handler(e.to_string());
                }
                break;
            }
        };
        let envelope: ResponseEnvelope = match serde_json::from_str(&text) {
            Ok(envelope) => envelope,
            Err(e) => {
                warn!(error = %e, "discarding unparseable envelope");
                continue;
            }
        };

        let sender = pending.lock().unwrap().remove(&envelope.request_id);
        match sender {
            // A dead receiver means the caller already timed out
            Some(tx) => {
                if tx.send(envelope.message).is_err() {
                    debug!(request_id = %envelope.request_id, "response arrived after timeout");
                }
            }
            None => {
                let handler = unsolicited.lock().unwrap();
                if let Some(handler) = handler.as_ref() {
                    handler(envelope);
                } else {
                    debug!(request_id = %envelope.request_id, "unsolicited envelope ignored");
                }
            }
        }
    }

    // Dropping the map drops the senders; in-flight calls observe closure
    pending.lock().unwrap().clear();
    *state.lock().unwrap() = ConnectionState::Disconnected;
    if let Some(handler) = on_disconnect.lock().unwrap().as_ref() {
        handler();
    }
    debug!("reader stopped");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_request_requires_connected_state() {
        let client = StorageClient::new("ws://127.0.0.1:1/ws", &ProtocolConfig::default());
        let err = client.load("t1", "p").await.unwrap_err();
        assert!(matches!(
            err,
            ClientError::NotConnected { ref state } if state == "DISCONNECTED"
        ));
    }

    #[tokio::test]
    async fn test_failed_connect_enters_connection_failed_and_allows_retry() {
        let client = StorageClient::new("ws://127.0.0.1:1/ws", &ProtocolConfig::default());
        // First attempt fails (nothing listens on port 1) and moves the
        // client to CONNECTION_FAILED, from which retry is allowed
        assert!(client.connect().await.is_err());
        assert_eq!(client.state(), ConnectionState::ConnectionFailed);
        assert!(client.connect().await.is_err());
    }

    #[tokio::test]
    async fn test_unknown_tenant_is_rejected_before_send() {
        let client = StorageClient::new("ws://127.0.0.1:1/ws", &ProtocolConfig::default());
        *client.state.lock().unwrap() = ConnectionState::Connected;
        let err = client.load("t9", "p").await.unwrap_err();
        assert!(matches!(err, ClientError::UnknownTenant(t) if t == "t9"));
    }

    #[test]
    fn test_state_names() {
        assert_eq!(ConnectionState::Disconnected.to_string(), "DISCONNECTED");
        assert_eq!(
            ConnectionState::ConnectionFailed.to_string(),
            "CONNECTION_FAILED"
        );
    }
}
