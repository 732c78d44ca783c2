use std::sync::Mutex;
use std::time::Duration;

use thiserror::Error;
use tracing::info;

use classbook_events::Message;

use super::NotificationEnvelope;

#[derive(Debug, Error)]
pub enum NotifyError {
    #[error("transport error: {0}")]
    Transport(String),

    #[error("receiver rejected notification with status {status}")]
    Rejected { status: u16 },
}

/// Outbound collaborator (e-mail relay, push service, webhook).
#[async_trait::async_trait]
pub trait Notifier: Send + Sync {
    async fn deliver(&self, envelope: &NotificationEnvelope) -> Result<(), NotifyError>;
}

#[async_trait::async_trait]
impl<N> Notifier for std::sync::Arc<N>
where
    N: Notifier + ?Sized,
{
    async fn deliver(&self, envelope: &NotificationEnvelope) -> Result<(), NotifyError> {
        (**self).deliver(envelope).await
    }
}

/// Writes one structured log line per recipient.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogNotifier;

#[async_trait::async_trait]
impl Notifier for LogNotifier {
    async fn deliver(&self, envelope: &NotificationEnvelope) -> Result<(), NotifyError> {
        let notification = envelope.payload();
        for customer in notification.recipients() {
            info!(
                topic = notification.topic(),
                message_id = %envelope.message_id(),
                recipient = %customer.email,
                customer = %customer.name,
                "notification dispatched"
            );
        }
        Ok(())
    }
}

/// POSTs the envelope as JSON to a fixed URL.
#[derive(Debug, Clone)]
pub struct WebhookNotifier {
    client: reqwest::Client,
    url: String,
}

impl WebhookNotifier {
    pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5);

    pub fn new(url: impl Into<String>, timeout: Duration) -> Result<Self, NotifyError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| NotifyError::Transport(e.to_string()))?;
        Ok(Self {
            client,
            url: url.into(),
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

#[async_trait::async_trait]
impl Notifier for WebhookNotifier {
    async fn deliver(&self, envelope: &NotificationEnvelope) -> Result<(), NotifyError> {
        let response = self
            .client
            .post(&self.url)
            .json(envelope)
            .send()
            .await
            .map_err(|e| NotifyError::Transport(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(NotifyError::Rejected {
                status: status.as_u16(),
            });
        }
        Ok(())
    }
}

/// Collects envelopes in memory (tests).
#[derive(Debug, Default)]
pub struct RecordingNotifier {
    delivered: Mutex<Vec<NotificationEnvelope>>,
}

impl RecordingNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn delivered(&self) -> Vec<NotificationEnvelope> {
        self.delivered.lock().map(|d| d.clone()).unwrap_or_default()
    }

    pub fn topics(&self) -> Vec<String> {
        self.delivered()
            .iter()
            .map(|e| e.topic().to_string())
            .collect()
    }
}

#[async_trait::async_trait]
impl Notifier for RecordingNotifier {
    async fn deliver(&self, envelope: &NotificationEnvelope) -> Result<(), NotifyError> {
        self.delivered
            .lock()
            .map_err(|_| NotifyError::Transport("recorder lock poisoned".to_string()))?
            .push(envelope.clone());
        Ok(())
    }
}
