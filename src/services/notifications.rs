//! User-facing notifications.
//!
//! The state machines never surface failures by unwinding; they publish a
//! notification instead and the UI drains [`Notifier::subscribe`].

use async_channel::{Receiver, Sender};
use chrono::{DateTime, Utc};

use crate::error::Error;

/// Number of notifications kept when nobody is draining; older ones are
/// dropped first.
const NOTIFICATION_BUFFER: usize = 256;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NotificationLevel {
    Info,
    Warning,
    Error,
}

#[derive(Debug, Clone)]
pub struct Notification {
    pub level: NotificationLevel,
    pub message: String,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct Notifier {
    sender: Sender<Notification>,
    receiver: Receiver<Notification>,
}

impl Default for Notifier {
    fn default() -> Self {
        Self::new()
    }
}

impl Notifier {
    pub fn new() -> Self {
        let (sender, receiver) = async_channel::bounded(NOTIFICATION_BUFFER);
        Self { sender, receiver }
    }

    pub fn subscribe(&self) -> Receiver<Notification> {
        self.receiver.clone()
    }

    pub fn info(&self, message: impl Into<String>) {
        let message = message.into();
        tracing::info!("{}", message);
        self.publish(NotificationLevel::Info, message);
    }

    pub fn warning(&self, message: impl Into<String>) {
        let message = message.into();
        tracing::warn!("{}", message);
        self.publish(NotificationLevel::Warning, message);
    }

    pub fn error(&self, message: impl Into<String>) {
        let message = message.into();
        tracing::error!("{}", message);
        self.publish(NotificationLevel::Error, message);
    }

    /// Generic notice for failures nobody anticipated (panics in background work).
    pub fn unexpected(&self, error: &Error) {
        self.error(format!("An unexpected error occurred: {}", error));
    }

    fn publish(&self, level: NotificationLevel, message: String) {
        let notification = Notification {
            level,
            message,
            timestamp: Utc::now(),
        };
        if let Ok(Some(dropped)) = self.sender.force_send(notification) {
            tracing::debug!("notification buffer full, dropped: {}", dropped.message);
        }
    }
}
