use anyhow::{Context, Result};
use reqwest::Client;
use serde_json::json;
use tracing::{debug, info, warn};

use crate::config::NotifyConfig;

/// Trait for delivering a run summary to a list of recipients
#[async_trait::async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, subject: &str, body: &str) -> Result<()>;

    /// Get the notifier type name for display purposes
    fn notifier_type(&self) -> &'static str;
}

/// Posts `{recipients, subject, body}` as JSON to a webhook that relays mail
pub struct WebhookNotifier {
    client: Client,
    url: String,
    recipients: Vec<String>,
    auth_header: Option<String>,
}

impl WebhookNotifier {
    pub fn new(config: &NotifyConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(std::time::Duration::from_secs(config.timeout_seconds))
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self {
            client,
            url: config.webhook_url.clone(),
            recipients: config.recipients.clone(),
            auth_header: config.auth_header.clone(),
        })
    }
}

#[async_trait::async_trait]
impl Notifier for WebhookNotifier {
    async fn notify(&self, subject: &str, body: &str) -> Result<()> {
        debug!("Sending notification to {}", self.url);

        let payload = json!({
            "recipients": self.recipients,
            "subject": subject,
            "body": body,
        });

        let mut request = self.client.post(&self.url).json(&payload);
        if let Some(ref auth_header) = self.auth_header {
            request = request.header("Authorization", auth_header);
        }

        let response = request
            .send()
            .await
            .context("Failed to send notification")?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            anyhow::bail!("Notification failed with status {}: {}", status, error_text);
        }

        info!("Notified {} recipient(s)", self.recipients.len());
        Ok(())
    }

    fn notifier_type(&self) -> &'static str {
        "webhook"
    }
}

/// Send a notification, logging instead of failing
pub async fn notify_quietly(notifier: &dyn Notifier, subject: &str, body: &str) {
    if let Err(e) = notifier.notify(subject, body).await {
        warn!("{} notification failed: {:#}", notifier.notifier_type(), e);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mockito::Matcher;

    fn config(url: String) -> NotifyConfig {
        NotifyConfig {
            webhook_url: url,
            recipients: vec!["ops@example.com".to_string()],
            auth_header: Some("Bearer hook-token".to_string()),
            timeout_seconds: 5,
        }
    }

    #[tokio::test]
    async fn test_webhook_payload() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/hook")
            .match_header("authorization", "Bearer hook-token")
            .match_body(Matcher::Json(json!({
                "recipients": ["ops@example.com"],
                "subject": "Key rotation",
                "body": "1 rotated"
            })))
            .with_status(202)
            .create_async()
            .await;

        let notifier = WebhookNotifier::new(&config(format!("{}/hook", server.url()))).unwrap();
        notifier.notify("Key rotation", "1 rotated").await.unwrap();
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_webhook_failure_status() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/hook")
            .with_status(500)
            .with_body("down")
            .create_async()
            .await;

        let notifier = WebhookNotifier::new(&config(format!("{}/hook", server.url()))).unwrap();
        let err = notifier.notify("s", "b").await.unwrap_err();
        assert!(err.to_string().contains("500"));

        // never propagates
        notify_quietly(&notifier, "s", "b").await;
    }
}
