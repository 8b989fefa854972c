//! Channels that never leave the process.

use tokio::sync::Mutex;

use crate::traits::{Notification, Notifier, NotifyError};

/// Writes the notification to the tracing log instead of sending it.
#[derive(Debug, Default)]
pub struct LogNotifier;

#[async_trait::async_trait]
impl Notifier for LogNotifier {
    async fn send(&self, notification: &Notification) -> Result<(), NotifyError> {
        tracing::info!(
            channel = "log",
            subject = %notification.subject,
            body = %notification.text,
            "notification (not sent)"
        );
        Ok(())
    }

    fn channel_name(&self) -> &str {
        "log"
    }
}

/// Keeps every notification it is given.
#[derive(Debug, Default)]
pub struct MemoryNotifier {
    sent: Mutex<Vec<Notification>>,
}

impl MemoryNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn sent(&self) -> Vec<Notification> {
        self.sent.lock().await.clone()
    }
}

#[async_trait::async_trait]
impl Notifier for MemoryNotifier {
    async fn send(&self, notification: &Notification) -> Result<(), NotifyError> {
        self.sent.lock().await.push(notification.clone());
        Ok(())
    }

    fn channel_name(&self) -> &str {
        "memory"
    }
}
