//! Fire-and-forget notifications for observers (UI, logs).
//!
//! Nothing in the sync engine waits on a sink or depends on delivery.

use std::sync::Arc;

use serde::Serialize;
use tokio::sync::broadcast;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Notification {
    LocalFileChanged { path: String },
    RemoteFileProcessed { path: String },
    Error { message: String },
}

impl Notification {
    pub fn kind(&self) -> &'static str {
        match self {
            Notification::LocalFileChanged { .. } => "local_file_changed",
            Notification::RemoteFileProcessed { .. } => "remote_file_processed",
            Notification::Error { .. } => "error",
        }
    }
}

pub trait NotificationSink: Send + Sync {
    fn notify(&self, notification: Notification);
}

#[derive(Debug, Default, Clone, Copy)]
pub struct NoopSink;

impl NotificationSink for NoopSink {
    fn notify(&self, _notification: Notification) {}
}

/// Logs every notification at debug level.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingSink;

impl NotificationSink for TracingSink {
    fn notify(&self, notification: Notification) {
        match &notification {
            Notification::LocalFileChanged { path } | Notification::RemoteFileProcessed { path } => {
                tracing::debug!(kind = notification.kind(), path = %path, "notification");
            }
            Notification::Error { message } => {
                tracing::debug!(kind = notification.kind(), message = %message, "notification");
            }
        }
    }
}

/// Fans notifications out to in-process subscribers, and optionally to one
/// more sink.
#[derive(Clone)]
pub struct BroadcastSink {
    tx: broadcast::Sender<Notification>,
    forward: Option<Arc<dyn NotificationSink>>,
}

impl BroadcastSink {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx, forward: None }
    }

    pub fn forward_to(mut self, sink: Arc<dyn NotificationSink>) -> Self {
        self.forward = Some(sink);
        self
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Notification> {
        self.tx.subscribe()
    }
}

impl NotificationSink for BroadcastSink {
    fn notify(&self, notification: Notification) {
        if let Some(forward) = &self.forward {
            forward.notify(notification.clone());
        }
        // No subscribers is fine.
        let _ = self.tx.send(notification);
    }
}
