//! Application configuration.
//!
//! Read from `<config_dir>/drivehub/config.json` unless another path is
//! given. A missing file means defaults; a malformed one is an error.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::debug;

use drivehub_common::{Error, Result};
use drivehub_storage::gdrive::{OAuthConfig, TokenPolicy};

/// Name of the per-user application directory.
const APP_DIR: &str = "drivehub";
/// Name of the configuration file.
const CONFIG_FILE: &str = "config.json";

/// Token timing, in whole seconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TokenSettings {
    /// Tokens this close to expiry are renewed before use.
    pub expiry_margin_secs: u64,
    /// Upper bound for one token acquisition.
    pub acquisition_timeout_secs: u64,
}

impl Default for TokenSettings {
    fn default() -> Self {
        Self {
            expiry_margin_secs: 30,
            acquisition_timeout_secs: 45,
        }
    }
}

impl TokenSettings {
    /// Convert to the token manager's policy.
    pub fn policy(&self) -> TokenPolicy {
        TokenPolicy {
            // Capped at one day.
            expiry_margin: chrono::Duration::seconds(self.expiry_margin_secs.min(86_400) as i64),
            acquisition_timeout: std::time::Duration::from_secs(self.acquisition_timeout_secs),
        }
    }
}

/// Everything the application reads at startup.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// OAuth client registration.
    pub oauth: OAuthConfig,
    /// Where the account record is kept.
    pub accounts_path: PathBuf,
    /// Where preview bytes are kept.
    pub previews_dir: PathBuf,
    /// Endpoint receiving upload log entries. `None` disables logging.
    pub upload_log_endpoint: Option<String>,
    /// Token timing.
    pub token: TokenSettings,
    /// Files requested per listing page.
    pub page_size: u32,
    /// Format native documents are exported to.
    pub export_mime_type: String,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            oauth: OAuthConfig::default(),
            accounts_path: app_dir(dirs::data_dir()).join("accounts.json"),
            previews_dir: app_dir(dirs::cache_dir()).join("previews"),
            upload_log_endpoint: None,
            token: TokenSettings::default(),
            page_size: 1000,
            export_mime_type: "application/pdf".to_string(),
        }
    }
}

fn app_dir(base: Option<PathBuf>) -> PathBuf {
    base.unwrap_or_else(|| PathBuf::from(".")).join(APP_DIR)
}

impl AppConfig {
    /// Default location of the configuration file.
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|p| p.join(APP_DIR).join(CONFIG_FILE))
    }

    /// Load from `path`, or from the default location when `None`.
    ///
    /// # Errors
    /// - The file exists but cannot be read or parsed
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let path = match path {
            Some(p) => p.to_path_buf(),
            None => match Self::default_path() {
                Some(p) => p,
                None => {
                    debug!("No config directory on this platform, using defaults");
                    return Ok(Self::default());
                }
            },
        };

        if !path.exists() {
            debug!(path = %path.display(), "Config file not found, using defaults");
            return Ok(Self::default());
        }

        Self::load_file(&path)
    }

    /// Load and parse a specific file.
    pub fn load_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Self = serde_json::from_str(&content).map_err(|e| {
            Error::InvalidInput(format!(
                "Failed to parse config file {}: {}",
                path.display(),
                e
            ))
        })?;
        config.validate()?;
        debug!(path = %path.display(), "Loaded config");
        Ok(config)
    }

    /// Write the configuration as pretty JSON, creating parent directories.
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = serde_json::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Check values that serde cannot.
    pub fn validate(&self) -> Result<()> {
        if self.page_size == 0 || self.page_size > 1000 {
            return Err(Error::InvalidInput(format!(
                "page_size must be between 1 and 1000, got {}",
                self.page_size
            )));
        }
        if self.token.acquisition_timeout_secs == 0 {
            return Err(Error::InvalidInput(
                "token.acquisition_timeout_secs must be positive".to_string(),
            ));
        }
        if self.export_mime_type.trim().is_empty() {
            return Err(Error::InvalidInput(
                "export_mime_type must not be empty".to_string(),
            ));
        }
        Ok(())
    }

    /// Upload log endpoint, ignoring blank values.
    pub fn upload_log_endpoint(&self) -> Option<&str> {
        self.upload_log_endpoint
            .as_deref()
            .map(str::trim)
            .filter(|e| !e.is_empty())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_defaults() {
        let config = AppConfig::default();
        assert_eq!(config.page_size, 1000);
        assert_eq!(config.export_mime_type, "application/pdf");
        assert_eq!(config.token.expiry_margin_secs, 30);
        assert_eq!(config.token.acquisition_timeout_secs, 45);
        assert!(config.accounts_path.ends_with("drivehub/accounts.json"));
        assert!(config.upload_log_endpoint().is_none());
    }

    #[test]
    fn test_missing_file_gives_defaults() {
        let temp = TempDir::new().unwrap();
        let config = AppConfig::load(Some(&temp.path().join("config.json"))).unwrap();
        assert_eq!(config, AppConfig::default());
    }

    #[test]
    fn test_partial_file_keeps_other_defaults() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("config.json");
        std::fs::write(
            &path,
            r#"{"oauth": {"client_id": "abc"}, "upload_log_endpoint": "https://log.example.com"}"#,
        )
        .unwrap();

        let config = AppConfig::load(Some(&path)).unwrap();
        assert_eq!(config.oauth.client_id, "abc");
        assert_eq!(config.oauth.redirect_port, 8765);
        assert_eq!(config.upload_log_endpoint(), Some("https://log.example.com"));
        assert_eq!(config.page_size, 1000);
    }

    #[test]
    fn test_malformed_file_is_an_error() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("config.json");
        std::fs::write(&path, "{oops").unwrap();
        assert!(AppConfig::load(Some(&path)).is_err());
    }

    #[test]
    fn test_out_of_range_page_size_is_rejected() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("config.json");
        std::fs::write(&path, r#"{"page_size": 5000}"#).unwrap();
        assert!(AppConfig::load(Some(&path)).is_err());
    }

    #[test]
    fn test_save_and_reload() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("nested/config.json");
        let mut config = AppConfig::default();
        config.page_size = 200;

        config.save(&path).unwrap();
        assert_eq!(AppConfig::load_file(&path).unwrap(), config);
    }

    #[test]
    fn test_token_policy_conversion() {
        let policy = TokenSettings::default().policy();
        assert_eq!(policy.expiry_margin, chrono::Duration::seconds(30));
        assert_eq!(policy.acquisition_timeout, std::time::Duration::from_secs(45));
    }
}
