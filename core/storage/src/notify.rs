//! User-facing notices.

use std::fmt;
use std::sync::Mutex;
use tracing::{info, warn};

/// A message meant for the person using the application.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Notice {
    /// Neutral confirmation.
    Info(String),
    /// The user dismissed a prompt or it timed out.
    Cancelled,
    /// The named account must be reconnected before it can be used again.
    ReconnectNeeded {
        /// Label of the account.
        account: String,
    },
    /// A secondary step failed but the main operation succeeded.
    Warning(String),
    /// The operation failed.
    Failure(String),
}

impl fmt::Display for Notice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Notice::Info(msg) => write!(f, "{}", msg),
            Notice::Cancelled => write!(f, "Action cancelled."),
            Notice::ReconnectNeeded { account } => {
                write!(f, "Session expired for {}. Run `reconnect` for this account.", account)
            }
            Notice::Warning(msg) => write!(f, "Warning: {}", msg),
            Notice::Failure(msg) => write!(f, "Error: {}", msg),
        }
    }
}

/// Sink for notices.
pub trait Notifier: Send + Sync {
    /// Surface a notice to the user.
    fn notify(&self, notice: Notice);
}

/// Writes notices to the tracing log.
#[derive(Debug, Default)]
pub struct TracingNotifier;

impl Notifier for TracingNotifier {
    fn notify(&self, notice: Notice) {
        match &notice {
            Notice::Info(_) | Notice::Cancelled => info!("{}", notice),
            _ => warn!("{}", notice),
        }
    }
}

/// Keeps every notice in memory, for tests and batch reporting.
#[derive(Debug, Default)]
pub struct CollectingNotifier {
    notices: Mutex<Vec<Notice>>,
}

impl CollectingNotifier {
    /// Create an empty collector.
    pub fn new() -> Self {
        Self::default()
    }

    /// Notices received so far.
    pub fn notices(&self) -> Vec<Notice> {
        match self.notices.lock() {
            Ok(notices) => notices.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }
}

impl Notifier for CollectingNotifier {
    fn notify(&self, notice: Notice) {
        match self.notices.lock() {
            Ok(mut notices) => notices.push(notice),
            Err(poisoned) => poisoned.into_inner().push(notice),
        }
    }
}
