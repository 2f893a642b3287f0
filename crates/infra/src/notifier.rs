//! Outbound notification boundary.
//!
//! Mail delivery is an external collaborator: `send` is fire-and-forget from
//! the system's point of view, and callers other than the milestone watcher
//! log failures instead of propagating them.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use thiserror::Error;

#[derive(Debug, Error)]
#[error("notification failed: {0}")]
pub struct NotifyError(pub String);

/// Best-effort message dispatch (email-like), no delivery guarantee.
pub trait Notifier: Send + Sync {
    fn send(&self, to: &str, subject: &str, body: &str) -> Result<(), NotifyError>;
}

/// Destination addresses for operational mail.
#[derive(Debug, Clone)]
pub struct Contacts {
    /// Receives low-stock notices.
    pub ops: String,
    /// Receives the one-time wallet milestone alert.
    pub management: String,
}

impl Default for Contacts {
    fn default() -> Self {
        Self {
            ops: "ops@library.org".to_string(),
            management: "management@dummy-library.com".to_string(),
        }
    }
}

/// Notifier that only writes structured logs. The default in deployments
/// where no mail relay is wired up.
#[derive(Debug, Default)]
pub struct LogNotifier;

impl Notifier for LogNotifier {
    fn send(&self, to: &str, subject: &str, _body: &str) -> Result<(), NotifyError> {
        tracing::info!(to, subject, "notification dispatched");
        Ok(())
    }
}

/// A dispatched notification, as captured by [`RecordingNotifier`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notification {
    pub to: String,
    pub subject: String,
    pub body: String,
}

/// Test double that records every send and can be switched into a failing
/// mode to exercise retry/flag-untouched paths.
#[derive(Debug, Default)]
pub struct RecordingNotifier {
    sent: Mutex<Vec<Notification>>,
    failing: AtomicBool,
}

impl RecordingNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn arc() -> Arc<Self> {
        Arc::new(Self::new())
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub fn sent(&self) -> Vec<Notification> {
        self.sent.lock().unwrap().clone()
    }
}

impl Notifier for RecordingNotifier {
    fn send(&self, to: &str, subject: &str, body: &str) -> Result<(), NotifyError> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(NotifyError("relay offline".to_string()));
        }
        self.sent.lock().unwrap().push(Notification {
            to: to.to_string(),
            subject: subject.to_string(),
            body: body.to_string(),
        });
        Ok(())
    }
}
