//! Merged file catalog across accounts.
//!
//! Pure functions over the accounts' cached listings: merging, filtering by
//! type and name, grouping, and human-readable sizes.

use std::fmt;
use std::str::FromStr;

use drivehub_common::{AccountId, Error};
use drivehub_storage::gdrive::DriveFile;
use drivehub_storage::Account;

const FOLDER: &str = "application/vnd.google-apps.folder";
const GDOC: &str = "application/vnd.google-apps.document";
const GSHEET: &str = "application/vnd.google-apps.spreadsheet";
const GSLIDE: &str = "application/vnd.google-apps.presentation";
const PDF: &str = "application/pdf";

/// File type filter.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum TypeFilter {
    #[default]
    All,
    Folders,
    Pdf,
    Images,
    GoogleDocs,
    GoogleSheets,
    GoogleSlides,
    /// Anything that is not a folder, PDF, image, or native document.
    Other,
}

impl TypeFilter {
    /// Every filter, in display order.
    pub const ALL: [TypeFilter; 8] = [
        TypeFilter::All,
        TypeFilter::Folders,
        TypeFilter::Pdf,
        TypeFilter::Images,
        TypeFilter::GoogleDocs,
        TypeFilter::GoogleSheets,
        TypeFilter::GoogleSlides,
        TypeFilter::Other,
    ];

    /// Short name used on the command line.
    pub fn as_str(&self) -> &'static str {
        match self {
            TypeFilter::All => "all",
            TypeFilter::Folders => "folders",
            TypeFilter::Pdf => "pdf",
            TypeFilter::Images => "images",
            TypeFilter::GoogleDocs => "gdoc",
            TypeFilter::GoogleSheets => "gsheet",
            TypeFilter::GoogleSlides => "gslide",
            TypeFilter::Other => "other",
        }
    }

    /// Check whether a MIME type passes the filter.
    pub fn matches(&self, mime_type: &str) -> bool {
        let is_folder = mime_type == FOLDER;
        match self {
            TypeFilter::All => true,
            TypeFilter::Folders => is_folder,
            TypeFilter::Pdf => mime_type == PDF,
            TypeFilter::Images => mime_type.starts_with("image/"),
            TypeFilter::GoogleDocs => mime_type == GDOC,
            TypeFilter::GoogleSheets => mime_type == GSHEET,
            TypeFilter::GoogleSlides => mime_type == GSLIDE,
            TypeFilter::Other => {
                !is_folder
                    && mime_type != PDF
                    && !mime_type.starts_with("image/")
                    && !mime_type.starts_with("application/vnd.google-apps.")
            }
        }
    }
}

impl fmt::Display for TypeFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TypeFilter {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim().to_ascii_lowercase();
        TypeFilter::ALL
            .into_iter()
            .find(|f| f.as_str() == wanted)
            .ok_or_else(|| {
                Error::InvalidInput(format!(
                    "Unknown type filter '{}'. Use one of: all, folders, pdf, images, gdoc, gsheet, gslide, other",
                    s
                ))
            })
    }
}

/// How merged files are presented.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum ViewMode {
    /// All accounts, grouped by account.
    #[default]
    Grouped,
    /// All accounts in one list.
    Flat,
    /// One account only.
    Single(AccountId),
}

/// A file together with the account it lives in.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CatalogEntry {
    pub account_id: AccountId,
    pub account_label: String,
    pub file: DriveFile,
}

/// Filters applied to the merged listing.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FileQuery {
    pub view: ViewMode,
    pub type_filter: TypeFilter,
    /// Case-insensitive substring of the file name. Blank matches everything.
    pub search: String,
}

impl FileQuery {
    /// Check whether one entry passes every filter.
    pub fn matches(&self, entry: &CatalogEntry) -> bool {
        if let ViewMode::Single(id) = &self.view {
            if &entry.account_id != id {
                return false;
            }
        }

        if !self.type_filter.matches(&entry.file.mime_type) {
            return false;
        }

        let needle = self.search.trim().to_lowercase();
        needle.is_empty() || entry.file.name.to_lowercase().contains(&needle)
    }
}

/// Every cached file of every account, in account order.
///
/// Accounts that were never listed contribute nothing.
pub fn merge(accounts: &[Account]) -> Vec<CatalogEntry> {
    accounts
        .iter()
        .flat_map(|account| {
            account
                .files_cache
                .iter()
                .flatten()
                .map(move |file| CatalogEntry {
                    account_id: account.id.clone(),
                    account_label: account.label.clone(),
                    file: file.clone(),
                })
        })
        .collect()
}

/// Merged entries that pass `query`.
pub fn apply(accounts: &[Account], query: &FileQuery) -> Vec<CatalogEntry> {
    merge(accounts)
        .into_iter()
        .filter(|entry| query.matches(entry))
        .collect()
}

/// Group entries by account, keeping account order.
pub fn group_by_account(entries: Vec<CatalogEntry>) -> Vec<(String, Vec<CatalogEntry>)> {
    let mut groups: Vec<(AccountId, String, Vec<CatalogEntry>)> = Vec::new();
    for entry in entries {
        match groups.iter_mut().find(|(id, _, _)| id == &entry.account_id) {
            Some((_, _, items)) => items.push(entry),
            None => groups.push((
                entry.account_id.clone(),
                entry.account_label.clone(),
                vec![entry],
            )),
        }
    }
    groups
        .into_iter()
        .map(|(_, label, items)| (label, items))
        .collect()
}

/// Format a byte count with binary units and two decimals.
pub fn format_bytes(bytes: u128) -> String {
    const UNITS: [&str; 5] = ["B", "KB", "MB", "GB", "TB"];

    if bytes == 0 {
        return "0 B".to_string();
    }

    let mut value = bytes as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    format!("{:.2} {}", value, UNITS[unit])
}

/// Format an optional decimal byte string from the API.
pub fn format_byte_str(value: Option<&str>) -> String {
    match value.map(str::trim).filter(|v| !v.is_empty()) {
        None => "0 B".to_string(),
        Some(v) => match v.parse::<u128>() {
            Ok(n) => format_bytes(n),
            Err(_) => "-".to_string(),
        },
    }
}
