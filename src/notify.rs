//! Out-of-band notifications pushed by endpoints
//!
//! Transports hand notifications to a [`NotificationSink`] from their own tasks.
//! The sink never blocks: when the bounded queue is full the notification is
//! dropped with a warning. A separate consumer drains the [`NotificationStream`].

use crate::error::{OrchestratorError, Result};
use serde::Deserialize;
use serde_json::{Map, Value};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Default queue depth between transports and the consumer
pub const DEFAULT_CAPACITY: usize = 64;

/// A raw notification tagged with the endpoint that pushed it
#[derive(Debug, Clone, PartialEq)]
pub struct Notification {
    pub endpoint: String,
    pub method: String,
    pub payload: Value,
}

/// Decoded payload of a tool progress/output notification
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ToolNotification {
    pub name: String,
    #[serde(default)]
    pub output: Map<String, Value>,
}

impl ToolNotification {
    pub fn decode(payload: &Value) -> Result<Self> {
        Self::deserialize(payload).map_err(|e| OrchestratorError::Decode(e.to_string()))
    }
}

/// Producer half, one clone per session
#[derive(Debug, Clone)]
pub struct NotificationSink {
    endpoint: String,
    tx: mpsc::Sender<Notification>,
}

impl NotificationSink {
    /// Rebind this sink to another endpoint alias
    pub fn for_endpoint(&self, endpoint: &str) -> Self {
        Self {
            endpoint: endpoint.to_string(),
            tx: self.tx.clone(),
        }
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// Enqueue without waiting; returns false if the notification was dropped
    pub fn push(&self, method: &str, payload: Value) -> bool {
        let notification = Notification {
            endpoint: self.endpoint.clone(),
            method: method.to_string(),
            payload,
        };
        match self.tx.try_send(notification) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(dropped)) => {
                warn!(
                    endpoint = %dropped.endpoint,
                    method = %dropped.method,
                    "Notification queue full, dropping notification"
                );
                false
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                debug!(endpoint = %self.endpoint, "Notification consumer gone, dropping notification");
                false
            }
        }
    }
}

/// Consumer half
pub type NotificationStream = mpsc::Receiver<Notification>;

/// Create a bounded notification channel
pub fn channel(capacity: usize) -> (NotificationSink, NotificationStream) {
    let (tx, rx) = mpsc::channel(capacity.max(1));
    let sink = NotificationSink {
        endpoint: String::new(),
        tx,
    };
    (sink, rx)
}

/// Log one notification; purely observational
pub fn log_notification(notification: &Notification) {
    match ToolNotification::decode(&notification.payload) {
        Ok(decoded) => {
            info!(
                endpoint = %notification.endpoint,
                name = %decoded.name,
                output = %serde_json::Value::Object(decoded.output),
                "Received notification"
            );
        }
        Err(e) => {
            warn!(
                endpoint = %notification.endpoint,
                method = %notification.method,
                error = %e,
                "Dropping undecodable notification"
            );
        }
    }
}

/// Drain `stream` on its own task with the default logging consumer
///
/// The task ends once every sink has been dropped.
pub fn spawn_logger(mut stream: NotificationStream) -> JoinHandle<usize> {
    tokio::spawn(async move {
        let mut seen = 0;
        while let Some(notification) = stream.recv().await {
            log_notification(&notification);
            seen += 1;
        }
        seen
    })
}

/// Wait up to `grace` for the logger to drain what is still queued
///
/// Returns how many notifications it handled, or `None` if it had to be aborted.
pub async fn drain_logger(handle: JoinHandle<usize>, grace: Duration) -> Option<usize> {
    let abort = handle.abort_handle();
    match tokio::time::timeout(grace, handle).await {
        Ok(Ok(seen)) => Some(seen),
        Ok(Err(e)) => {
            warn!(error = %e, "Notification logger failed");
            None
        }
        Err(_) => {
            abort.abort();
            warn!("Notification sinks still open, abandoning queued notifications");
            None
        }
    }
}
