//! Notification sinks for classified outcomes.

use crate::error::OutcomeKind;
use std::sync::{Mutex, PoisonError};
use tracing::warn;

/// A user-facing notification emitted for a failed call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notification {
    pub kind: OutcomeKind,
    pub title: String,
    pub message: String,
}

/// Receives one notification per surfaced failure.
///
/// Calls are fire-and-forget: implementations must not block or panic.
pub trait NotificationSink: Send + Sync {
    fn notify(&self, kind: OutcomeKind, title: &str, message: &str);
}

/// Logs notifications through `tracing`.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingSink;

impl NotificationSink for TracingSink {
    fn notify(&self, kind: OutcomeKind, title: &str, message: &str) {
        warn!(kind = %kind, title = %title, "{}", message);
    }
}

/// Discards notifications.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullSink;

impl NotificationSink for NullSink {
    fn notify(&self, _kind: OutcomeKind, _title: &str, _message: &str) {}
}

/// Keeps every notification in memory, for embedders that render them later.
#[derive(Debug, Default)]
pub struct RecordingSink {
    events: Mutex<Vec<Notification>>,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Notifications received so far, oldest first.
    pub fn notifications(&self) -> Vec<Notification> {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Remove and return all recorded notifications.
    pub fn take(&self) -> Vec<Notification> {
        std::mem::take(&mut *self.events.lock().unwrap_or_else(PoisonError::into_inner))
    }
}

impl NotificationSink for RecordingSink {
    fn notify(&self, kind: OutcomeKind, title: &str, message: &str) {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(Notification {
                kind,
                title: title.to_string(),
                message: message.to_string(),
            });
    }
}
