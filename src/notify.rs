use std::sync::Arc;

use async_trait::async_trait;
use serde::Serialize;
use tokio::sync::broadcast;
use tracing::{info, warn};

use crate::model::Appointment;

const CHANNEL_CAPACITY: usize = 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum NotificationKind {
    Created,
    Canceled,
    Deleted,
}

/// Outbound event for mail/push/webhook collaborators.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Notification {
    pub kind: NotificationKind,
    pub appointment: Appointment,
}

pub type SinkError = Box<dyn std::error::Error + Send + Sync>;

/// A notification collaborator. Failures are logged by the dispatcher and
/// never reach the booking path.
#[async_trait]
pub trait NotificationSink: Send + Sync {
    fn name(&self) -> &str;

    async fn deliver(&self, notification: &Notification) -> Result<(), SinkError>;
}

/// Broadcast hub for appointment lifecycle events.
pub struct NotifyHub {
    sender: broadcast::Sender<Notification>,
}

impl Default for NotifyHub {
    fn default() -> Self {
        Self::new()
    }
}

impl NotifyHub {
    pub fn new() -> Self {
        Self {
            sender: broadcast::channel(CHANNEL_CAPACITY).0,
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Notification> {
        self.sender.subscribe()
    }

    /// Send a notification. No-op if nobody is listening.
    pub fn send(&self, kind: NotificationKind, appointment: &Appointment) {
        let _ = self.sender.send(Notification {
            kind,
            appointment: appointment.clone(),
        });
    }
}

/// Drain the hub into `sink` until the hub is dropped.
pub async fn run_dispatcher(mut rx: broadcast::Receiver<Notification>, sink: Arc<dyn NotificationSink>) {
    loop {
        match rx.recv().await {
            Ok(notification) => {
                if let Err(e) = sink.deliver(&notification).await {
                    warn!(
                        "notification sink {} failed for appointment {}: {e}",
                        sink.name(),
                        notification.appointment.id
                    );
                    metrics::counter!(crate::observability::NOTIFICATION_FAILURES_TOTAL)
                        .increment(1);
                }
            }
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                warn!("notification sink {} lagged, skipped {skipped} events", sink.name());
            }
            Err(broadcast::error::RecvError::Closed) => break,
        }
    }
}

/// Sink that writes every notification to the log.
pub struct LogSink;

#[async_trait]
impl NotificationSink for LogSink {
    fn name(&self) -> &str {
        "log"
    }

    async fn deliver(&self, n: &Notification) -> Result<(), SinkError> {
        info!(
            kind = ?n.kind,
            appointment = %n.appointment.id,
            slot = %n.appointment.slot_id,
            start = n.appointment.span.start,
            end = n.appointment.span.end,
            "appointment notification"
        );
        Ok(())
    }
}
