//! Aggregate quota across accounts.

use tracing::warn;

use crate::account::Account;

/// Summed storage figures for a set of accounts.
///
/// Quota values arrive as decimal strings that may exceed 2^53, so they are
/// accumulated as `u128` rather than floating point.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct UsageTotals {
    /// Sum of every account's limit.
    pub limit: u128,
    /// Sum of every account's Drive usage.
    pub usage_in_drive: u128,
}

impl UsageTotals {
    /// Sum the last quota snapshot of each account.
    ///
    /// Accounts without a snapshot or with an unparseable value contribute nothing.
    pub fn from_accounts<'a>(accounts: impl IntoIterator<Item = &'a Account>) -> Self {
        let mut totals = Self::default();
        for account in accounts {
            let Some(quota) = &account.storage else {
                continue;
            };
            totals.limit = totals
                .limit
                .saturating_add(parse_amount(&account.label, quota.limit.as_deref()));
            totals.usage_in_drive = totals
                .usage_in_drive
                .saturating_add(parse_amount(&account.label, quota.usage_in_drive.as_deref()));
        }
        totals
    }

    /// Free space, never negative.
    pub fn free(&self) -> u128 {
        self.limit.saturating_sub(self.usage_in_drive)
    }
}

/// Parse a decimal byte count. Empty or missing values count as zero.
pub fn parse_amount(label: &str, value: Option<&str>) -> u128 {
    let Some(value) = value.map(str::trim).filter(|v| !v.is_empty()) else {
        return 0;
    };
    match value.parse::<u128>() {
        Ok(n) => n,
        Err(_) => {
            warn!(account = label, value, "Ignoring unparseable quota value");
            0
        }
    }
}
