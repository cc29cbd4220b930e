//! Operator alerting with per-key cooldowns
//!
//! Alerts are purely observational: sends are best-effort and never surface
//! an error to the caller, so a broken alert channel can never stall a poll
//! loop or a worker.

use std::{
    collections::HashMap,
    sync::Arc,
    time::{Duration, Instant},
};

use async_trait::async_trait;
use tokio::sync::Mutex;
use tracing::{error, warn};

// -------------
// | Constants |
// -------------

/// The minimum interval between repeated alerts for the same key
const ALERT_COOLDOWN: Duration = Duration::from_secs(300);

// ---------------
// | Alert Sinks |
// ---------------

/// An outbound alert channel
#[async_trait]
pub trait AlertSink: Send + Sync {
    /// Deliver one alert message. Failures are handled internally.
    async fn send_alert(&self, message: &str);
}

/// An alert sink that only writes to the process log
pub struct LogAlertSink;

#[async_trait]
impl AlertSink for LogAlertSink {
    async fn send_alert(&self, message: &str) {
        error!("ALERT: {message}");
    }
}

/// An alert sink posting messages to a webhook endpoint
pub struct WebhookAlertSink {
    /// The HTTP client
    client: reqwest::Client,
    /// The webhook URL
    url: String,
}

impl WebhookAlertSink {
    /// Create a new webhook alert sink
    pub fn new(url: String) -> Self {
        Self { client: reqwest::Client::new(), url }
    }
}

#[async_trait]
impl AlertSink for WebhookAlertSink {
    async fn send_alert(&self, message: &str) {
        let body = serde_json::json!({ "text": message });
        if let Err(e) = self.client.post(&self.url).json(&body).send().await {
            warn!("failed to deliver alert to webhook: {e}");
        }
    }
}

// -----------------
// | Alert Manager |
// -----------------

/// Applies a per-key cooldown in front of an alert sink, so a persistent
/// condition (e.g. a chain that stays stalled) cannot storm the channel
pub struct AlertManager {
    /// The underlying sink
    sink: Arc<dyn AlertSink>,
    /// The cooldown between repeated alerts for a key
    cooldown: Duration,
    /// When each key last alerted
    last_sent: Mutex<HashMap<String, Instant>>,
}

impl AlertManager {
    /// Create a manager with the default cooldown
    pub fn new(sink: Arc<dyn AlertSink>) -> Self {
        Self::with_cooldown(sink, ALERT_COOLDOWN)
    }

    /// Create a manager with a custom cooldown
    pub fn with_cooldown(sink: Arc<dyn AlertSink>, cooldown: Duration) -> Self {
        Self { sink, cooldown, last_sent: Mutex::new(HashMap::new()) }
    }

    /// Send an alert for the given key, unless the key alerted within the
    /// cooldown window
    pub async fn alert(&self, key: &str, message: &str) {
        if self.should_send(key).await {
            self.sink.send_alert(message).await;
        }
    }

    /// Whether an alert for the key may be sent, recording the send if so
    async fn should_send(&self, key: &str) -> bool {
        let mut last_sent = self.last_sent.lock().await;
        let now = Instant::now();

        match last_sent.get(key) {
            Some(last) if now.duration_since(*last) < self.cooldown => false,
            _ => {
                last_sent.insert(key.to_string(), now);
                true
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// A sink that counts deliveries
    #[derive(Default)]
    struct CountingSink {
        /// The number of alerts delivered
        sent: Mutex<u32>,
    }

    #[async_trait]
    impl AlertSink for CountingSink {
        async fn send_alert(&self, _message: &str) {
            *self.sent.lock().await += 1;
        }
    }

    /// Repeated alerts within the cooldown are suppressed
    #[tokio::test]
    async fn test_cooldown_suppresses_repeats() {
        let sink = Arc::new(CountingSink::default());
        let manager = AlertManager::with_cooldown(sink.clone(), Duration::from_millis(50));

        manager.alert("chain-1", "stalled").await;
        manager.alert("chain-1", "stalled").await;
        assert_eq!(*sink.sent.lock().await, 1);

        tokio::time::sleep(Duration::from_millis(60)).await;
        manager.alert("chain-1", "stalled").await;
        assert_eq!(*sink.sent.lock().await, 2);
    }

    /// Cooldowns are tracked independently per key
    #[tokio::test]
    async fn test_cooldown_is_per_key() {
        let sink = Arc::new(CountingSink::default());
        let manager = AlertManager::with_cooldown(sink.clone(), Duration::from_secs(300));

        manager.alert("chain-1", "stalled").await;
        manager.alert("chain-2", "stalled").await;
        assert_eq!(*sink.sent.lock().await, 2);
    }
}
