//! Outbound push notifications.
//!
//! Producers enqueue on a [`PushQueue`] and return immediately; a worker task
//! owns delivery and retries, so a failing push service never blocks the
//! membership change that triggered it.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;
use serde_json::Value;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::util::id::UserId;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PushNotification {
    pub user_id: UserId,
    pub title: String,
    pub body: String,
    pub data: Value,
}

#[derive(thiserror::Error, Debug)]
pub enum PushError {
    #[error("push provider rejected notification: {0}")]
    Rejected(String),
    #[error("push provider unreachable: {0}")]
    Unreachable(String),
}

/// Delivers one notification to a user's registered devices.
#[async_trait]
pub trait PushSender: Send + Sync {
    async fn send(&self, notification: &PushNotification) -> Result<(), PushError>;
}

/// Stand-in sender that only logs. Used until a provider is configured.
pub struct LogPushSender;

#[async_trait]
impl PushSender for LogPushSender {
    async fn send(&self, n: &PushNotification) -> Result<(), PushError> {
        tracing::info!(user_id = %n.user_id, title = %n.title, "push notification");
        Ok(())
    }
}

#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    /// Doubled after every failed attempt.
    pub backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self { max_attempts: 3, backoff: Duration::from_millis(500) }
    }
}

#[derive(Clone)]
pub struct PushQueue {
    tx: mpsc::UnboundedSender<PushNotification>,
}

impl PushQueue {
    /// Start the delivery worker. It stops once every queue handle is dropped.
    pub fn spawn(sender: Arc<dyn PushSender>, policy: RetryPolicy) -> (Self, JoinHandle<()>) {
        let (tx, mut rx) = mpsc::unbounded_channel::<PushNotification>();
        let worker = tokio::spawn(async move {
            while let Some(notification) = rx.recv().await {
                deliver(sender.as_ref(), &notification, policy).await;
            }
        });
        (Self { tx }, worker)
    }

    pub fn enqueue(&self, notification: PushNotification) {
        if self.tx.send(notification).is_err() {
            tracing::warn!("push worker stopped, notification dropped");
        }
    }
}

async fn deliver(sender: &dyn PushSender, n: &PushNotification, policy: RetryPolicy) {
    let mut backoff = policy.backoff;
    for attempt in 1..=policy.max_attempts {
        match sender.send(n).await {
            Ok(()) => return,
            Err(e) if attempt < policy.max_attempts => {
                tracing::debug!(user_id = %n.user_id, attempt, error = %e, "push failed, retrying");
                tokio::time::sleep(backoff).await;
                backoff *= 2;
            }
            Err(e) => {
                tracing::warn!(user_id = %n.user_id, attempts = attempt, error = %e, "push dropped");
            }
        }
    }
}
