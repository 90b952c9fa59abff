/// Anomaly notifications
///
/// When a refresh token comes back from a new IP, an alert is queued for
/// the webhook worker. Delivery is best-effort and at-most-once: the queue
/// is bounded, a full queue drops the event, and failed POSTs are not
/// retried. Queuing never blocks and never fails the caller.

use std::time::Duration;

use chrono::{SecondsFormat, Utc};
use serde::Serialize;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::task::JoinHandle;

use crate::configuration::WebhookSettings;

/// Webhook payload
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AnomalyEvent {
    pub user_id: i64,
    pub new_ip: String,
    /// RFC 3339
    pub time: String,
}

impl AnomalyEvent {
    pub fn new(user_id: i64, new_ip: &str) -> Self {
        Self {
            user_id,
            new_ip: new_ip.to_string(),
            time: Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true),
        }
    }
}

#[derive(Clone)]
pub struct AnomalyNotifier {
    sender: mpsc::Sender<AnomalyEvent>,
}

impl AnomalyNotifier {
    /// A notifier and the receiving end of its queue
    pub fn channel(capacity: usize) -> (Self, mpsc::Receiver<AnomalyEvent>) {
        let (sender, receiver) = mpsc::channel(capacity.max(1));
        (Self { sender }, receiver)
    }

    /// Queue an alert for `user_id` seen at `observed_ip`
    pub fn notify(&self, user_id: i64, observed_ip: &str) {
        match self.sender.try_send(AnomalyEvent::new(user_id, observed_ip)) {
            Ok(()) => {
                tracing::info!(user_id = user_id, new_ip = observed_ip, "Anomaly alert queued");
            }
            Err(TrySendError::Full(_)) => {
                tracing::warn!(user_id = user_id, "Anomaly alert queue full, dropping alert");
            }
            Err(TrySendError::Closed(_)) => {
                tracing::debug!(user_id = user_id, "Anomaly alert worker gone, dropping alert");
            }
        }
    }
}

#[derive(Clone)]
pub struct WebhookClient {
    http_client: reqwest::Client,
    url: String,
}

impl WebhookClient {
    pub fn new(url: String, http_client: reqwest::Client) -> Self {
        Self { http_client, url }
    }

    pub fn from_settings(config: &WebhookSettings) -> Result<Self, reqwest::Error> {
        let http_client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_seconds))
            .build()?;
        Ok(Self::new(config.url.clone(), http_client))
    }

    pub async fn deliver(&self, event: &AnomalyEvent) -> Result<(), String> {
        self.http_client
            .post(&self.url)
            .json(event)
            .send()
            .await
            .map_err(|e| format!("Failed to deliver anomaly alert: {}", e))?
            .error_for_status()
            .map_err(|e| format!("Alert endpoint returned error: {}", e))?;

        Ok(())
    }
}

/// Detached worker draining the alert queue until every notifier is dropped
pub fn spawn_webhook_worker(
    mut receiver: mpsc::Receiver<AnomalyEvent>,
    client: WebhookClient,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(event) = receiver.recv().await {
            match client.deliver(&event).await {
                Ok(()) => tracing::debug!(user_id = event.user_id, "Anomaly alert delivered"),
                Err(e) => tracing::warn!(user_id = event.user_id, error = %e, "Anomaly alert lost"),
            }
        }
        tracing::debug!("Anomaly alert worker stopped");
    })
}
