//! Out-of-band token delivery
//!
//! When a grant succeeds the generated bearer token has to reach the grantee
//! somehow. The [`Notifier`] trait abstracts that channel; the webhook
//! implementation posts to a configured endpoint, and the unconfigured mode
//! logs the token locally so an operator can relay it by hand. A delivery
//! failure never fails the grant itself.

use crate::config::NotifyConfig;
use crate::error::NotifyError;
use async_trait::async_trait;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

/// Notification collaborator
#[async_trait]
pub trait Notifier: Send + Sync {
    /// Deliver a message to an identity.
    async fn send(&self, recipient: &str, subject: &str, body: &str) -> Result<(), NotifyError>;

    /// Whether a real delivery channel is configured.
    fn is_configured(&self) -> bool;
}

/// Shared handle to a notifier
pub type SharedNotifier = Arc<dyn Notifier>;

/// Create a notifier from configuration
pub fn create_notifier(config: &NotifyConfig) -> Result<SharedNotifier, NotifyError> {
    match &config.webhook_url {
        Some(url) => Ok(Arc::new(WebhookNotifier::new(url, config.timeout_secs)?)),
        None => Ok(Arc::new(LogNotifier)),
    }
}

/// Posts `{recipient, subject, body}` JSON to a configured endpoint
pub struct WebhookNotifier {
    http: reqwest::Client,
    url: String,
}

impl WebhookNotifier {
    pub fn new(url: impl Into<String>, timeout_secs: u64) -> Result<Self, NotifyError> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .user_agent(format!("gitvault/{}", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self {
            http,
            url: url.into(),
        })
    }
}

#[async_trait]
impl Notifier for WebhookNotifier {
    async fn send(&self, recipient: &str, subject: &str, body: &str) -> Result<(), NotifyError> {
        let response = self
            .http
            .post(&self.url)
            .json(&json!({
                "recipient": recipient,
                "subject": subject,
                "body": body,
            }))
            .send()
            .await?;
        let status = response.status();
        if !status.is_success() {
            return Err(NotifyError::Status {
                status: status.as_u16(),
            });
        }
        Ok(())
    }

    fn is_configured(&self) -> bool {
        true
    }
}

/// Fallback when no delivery channel is configured; logs locally
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn send(&self, recipient: &str, subject: &str, body: &str) -> Result<(), NotifyError> {
        info!(recipient, subject, body, "notification (delivery not configured)");
        Ok(())
    }

    fn is_configured(&self) -> bool {
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_create_notifier_without_webhook_is_log() {
        let notifier = create_notifier(&NotifyConfig::default()).unwrap();
        assert!(!notifier.is_configured());
    }

    #[test]
    fn test_create_notifier_with_webhook() {
        let config = NotifyConfig {
            webhook_url: Some("http://127.0.0.1:9/notify".to_string()),
            timeout_secs: 5,
        };
        let notifier = create_notifier(&config).unwrap();
        assert!(notifier.is_configured());
    }

    #[tokio::test]
    async fn test_log_notifier_always_succeeds() {
        let notifier = LogNotifier;
        notifier
            .send("alice@example.com", "subject", "body")
            .await
            .unwrap();
    }
}
