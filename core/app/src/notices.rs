//! Error to notice mapping.
//!
//! The only place where errors become user-facing text. Matching is on the
//! error kind, never on message contents.

use drivehub_common::Error;
use drivehub_storage::Notice;

/// Notice to show for a failed operation.
pub fn notice_for(error: &Error) -> Notice {
    match error {
        Error::UserCancelled => Notice::Cancelled,
        Error::ReauthRequired { account } => Notice::ReconnectNeeded {
            account: account.clone(),
        },
        Error::RequestFailed { status, body } => {
            Notice::Failure(format!("Drive answered {}: {}", status, summarize(body)))
        }
        other => Notice::Failure(other.to_string()),
    }
}

/// First line of a response body, shortened for display.
fn summarize(body: &str) -> String {
    const MAX: usize = 200;

    let line = body.lines().map(str::trim).find(|l| !l.is_empty()).unwrap_or("");
    if line.chars().count() <= MAX {
        return line.to_string();
    }
    let mut short: String = line.chars().take(MAX).collect();
    short.push_str("...");
    short
}
