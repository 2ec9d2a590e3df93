//! DriveHub CLI - One view over several Google Drive accounts.
//!
//! Link accounts, refresh their listings, search the merged catalog, and
//! move files in and out from the command line.

use anyhow::{Context, Result};
use bytes::Bytes;
use clap::{Parser, Subcommand, ValueEnum};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::EnvFilter;

use drivehub_app::catalog::{self, format_byte_str};
use drivehub_app::{
    format_bytes, notice_for, AppConfig, DriveHub, FileQuery, TypeFilter, UploadTags, ViewMode,
};
use drivehub_storage::{Notifier, TracingNotifier};

#[derive(Parser)]
#[command(name = "drivehub")]
#[command(about = "DriveHub - Several Google Drive accounts, one catalog")]
#[command(version)]
struct Cli {
    /// Enable verbose logging.
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Configuration file (default: <config dir>/drivehub/config.json).
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, ValueEnum)]
enum Layout {
    /// Group files under their account.
    Grouped,
    /// One list for all accounts.
    Flat,
}

#[derive(Subcommand)]
enum Commands {
    /// Link a new account through the browser.
    Add,

    /// Renew an account's session through the consent screen.
    Reconnect {
        /// Account id, label, or position.
        account: String,
    },

    /// Unlink an account.
    Remove {
        /// Account id, label, or position.
        account: String,
    },

    /// Fetch quota and file listings.
    Refresh {
        /// Only this account (default: all).
        account: Option<String>,

        /// Never open a consent screen.
        #[arg(long)]
        no_prompt: bool,
    },

    /// Show linked accounts.
    Accounts,

    /// Show combined storage usage.
    Usage,

    /// List files from the last refresh.
    Files {
        /// Layout when listing all accounts.
        #[arg(long, value_enum, default_value = "grouped")]
        view: Layout,

        /// Only this account.
        #[arg(short, long)]
        account: Option<String>,

        /// Type filter: all, folders, pdf, images, gdoc, gsheet, gslide, other.
        #[arg(short = 't', long = "type", default_value = "all")]
        type_filter: String,

        /// Case-insensitive name search.
        #[arg(short, long, default_value = "")]
        search: String,
    },

    /// Download or export a file.
    Download {
        /// Account id, label, or position.
        account: String,

        /// Drive file id.
        file_id: String,

        /// Destination directory.
        #[arg(short, long, default_value = ".")]
        dest: PathBuf,
    },

    /// Upload a file, make it public, and log it.
    Upload {
        /// Account id, label, or position.
        account: String,

        /// Local file to upload.
        path: PathBuf,

        /// Destination folder id.
        #[arg(short, long)]
        folder: Option<String>,

        /// Content type (default: guessed from the extension).
        #[arg(long)]
        mime_type: Option<String>,

        #[arg(long, default_value = "")]
        category: String,

        #[arg(long, default_value = "")]
        saga: String,

        #[arg(long, default_value = "")]
        series: String,

        #[arg(long, default_value = "")]
        season: String,

        #[arg(long, default_value = "")]
        episode: String,

        /// Comma-separated tags.
        #[arg(long, default_value = "")]
        tags: String,
    },

    /// Fetch previews for every image of an account.
    Thumbs {
        /// Account id, label, or position.
        account: String,
    },

    /// Print the effective configuration.
    Config {
        /// Also write it to the configuration file.
        #[arg(long)]
        write: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Setup logging
    let default_level = if cli.verbose { "debug" } else { "info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .compact()
        .init();

    let config = AppConfig::load(cli.config.as_deref()).context("Failed to load configuration")?;

    if let Commands::Config { write } = cli.command {
        return cmd_config(&config, cli.config.as_deref(), write);
    }

    let notifier: Arc<dyn Notifier> = Arc::new(TracingNotifier);
    let hub = DriveHub::open(config, notifier.clone())
        .await
        .context("Failed to start DriveHub")?;

    let result = run(&hub, cli.command).await;

    if let Err(e) = &result {
        if let Some(error) = e.downcast_ref::<drivehub_common::Error>() {
            notifier.notify(notice_for(error));
            std::process::exit(1);
        }
    }
    result
}

async fn run(hub: &DriveHub, command: Commands) -> Result<()> {
    match command {
        Commands::Add => cmd_add(hub).await,
        Commands::Reconnect { account } => cmd_reconnect(hub, &account).await,
        Commands::Remove { account } => cmd_remove(hub, &account).await,
        Commands::Refresh { account, no_prompt } => {
            cmd_refresh(hub, account.as_deref(), !no_prompt).await
        }
        Commands::Accounts => cmd_accounts(hub).await,
        Commands::Usage => cmd_usage(hub).await,
        Commands::Files {
            view,
            account,
            type_filter,
            search,
        } => cmd_files(hub, view, account.as_deref(), &type_filter, search).await,
        Commands::Download {
            account,
            file_id,
            dest,
        } => cmd_download(hub, &account, &file_id, &dest).await,
        Commands::Upload {
            account,
            path,
            folder,
            mime_type,
            category,
            saga,
            series,
            season,
            episode,
            tags,
        } => {
            let tags = UploadTags {
                category,
                saga,
                series,
                season,
                episode,
                tags,
            };
            cmd_upload(hub, &account, &path, folder.as_deref(), mime_type, &tags).await
        }
        Commands::Thumbs { account } => cmd_thumbs(hub, &account).await,
        Commands::Config { .. } => Ok(()),
    }
}

/// Print (and optionally save) the configuration.
fn cmd_config(config: &AppConfig, path: Option<&Path>, write: bool) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(config)?);

    if write {
        let path = match path {
            Some(p) => p.to_path_buf(),
            None => AppConfig::default_path().context("No configuration directory on this platform")?,
        };
        config.save(&path)?;
        println!("Written to {}", path.display());
    }
    Ok(())
}

/// Link a new account.
async fn cmd_add(hub: &DriveHub) -> Result<()> {
    info!("Opening the browser to link an account");
    let account = hub.add_account().await?;

    println!("Account linked: {}", account.label);
    println!("  ID: {}", account.id);
    if let Some(quota) = &account.storage {
        println!(
            "  Storage: {} of {}",
            format_byte_str(quota.usage_in_drive.as_deref()),
            format_byte_str(quota.limit.as_deref())
        );
    }
    Ok(())
}

/// Renew an account's session.
async fn cmd_reconnect(hub: &DriveHub, key: &str) -> Result<()> {
    let account = hub.resolve_account(key).await?;
    let account = hub.reconnect_account(&account.id).await?;
    println!("Reconnected: {}", account.label);
    Ok(())
}

/// Unlink an account.
async fn cmd_remove(hub: &DriveHub, key: &str) -> Result<()> {
    let account = hub.resolve_account(key).await?;
    let released = hub.remove_account(&account.id).await?;
    println!("Removed {} ({} previews released)", account.label, released);
    Ok(())
}

/// Refresh one or all accounts.
async fn cmd_refresh(hub: &DriveHub, key: Option<&str>, allow_interactive: bool) -> Result<()> {
    if let Some(key) = key {
        let account = hub.resolve_account(key).await?;
        let refreshed = hub.refresh_account(&account.id, allow_interactive).await?;
        let count = refreshed.files_cache.as_ref().map_or(0, Vec::len);
        println!("Updated {}: {} files", refreshed.label, count);
        return Ok(());
    }

    let outcomes = hub.refresh_all(allow_interactive).await;
    if outcomes.is_empty() {
        println!("No accounts to refresh. Run `drivehub add` first.");
        return Ok(());
    }

    let mut failed = 0;
    for outcome in &outcomes {
        match &outcome.result {
            Ok(count) => println!("  [OK]   {}: {} files", outcome.label, count),
            Err(e) => {
                failed += 1;
                println!("  [FAIL] {}: {}", outcome.label, e);
            }
        }
    }

    if failed > 0 {
        anyhow::bail!("{} of {} accounts failed to refresh", failed, outcomes.len());
    }
    println!("All accounts refreshed.");
    Ok(())
}

/// List linked accounts.
async fn cmd_accounts(hub: &DriveHub) -> Result<()> {
    let accounts = hub.accounts().await;
    if accounts.is_empty() {
        println!("No accounts linked.");
        return Ok(());
    }

    for (i, account) in accounts.iter().enumerate() {
        let status = if account.needs_reconnect {
            "reconnect needed"
        } else {
            "ok"
        };
        let files = account
            .files_cache
            .as_ref()
            .map(|f| f.len().to_string())
            .unwrap_or_else(|| "-".to_string());
        let (used, limit) = match &account.storage {
            Some(q) => (
                format_byte_str(q.usage_in_drive.as_deref()),
                format_byte_str(q.limit.as_deref()),
            ),
            None => ("-".to_string(), "-".to_string()),
        };

        println!("{}. {} [{}]", i + 1, account.label, status);
        println!("     ID: {}", account.id);
        println!("     Storage: {} of {}, files: {}", used, limit, files);
    }
    Ok(())
}

/// Show combined usage.
async fn cmd_usage(hub: &DriveHub) -> Result<()> {
    let totals = hub.usage().await;
    println!("Total:  {}", format_bytes(totals.limit));
    println!("Used:   {}", format_bytes(totals.usage_in_drive));
    println!("Free:   {}", format_bytes(totals.free()));
    Ok(())
}

/// List cached files.
async fn cmd_files(
    hub: &DriveHub,
    layout: Layout,
    account: Option<&str>,
    type_filter: &str,
    search: String,
) -> Result<()> {
    let accounts = hub.accounts().await;
    if accounts.is_empty() {
        println!("Link at least one account first.");
        return Ok(());
    }

    let view = match (account, layout) {
        (Some(key), _) => ViewMode::Single(hub.resolve_account(key).await?.id),
        (None, Layout::Grouped) => ViewMode::Grouped,
        (None, Layout::Flat) => ViewMode::Flat,
    };
    let query = FileQuery {
        view: view.clone(),
        type_filter: type_filter.parse::<TypeFilter>()?,
        search,
    };

    let entries = catalog::apply(&accounts, &query);
    if entries.is_empty() {
        println!("No results. Run `drivehub refresh` or loosen the filters.");
        return Ok(());
    }

    match view {
        ViewMode::Grouped => {
            for (label, items) in catalog::group_by_account(entries) {
                println!("{} ({} files)", label, items.len());
                for entry in items {
                    println!("  {}", file_line(&entry.file));
                }
            }
        }
        _ => {
            for entry in entries {
                println!("{}  [{}]", file_line(&entry.file), entry.account_label);
            }
        }
    }
    Ok(())
}

fn file_line(file: &drivehub_storage::gdrive::DriveFile) -> String {
    let kind = if file.is_folder() {
        "[DIR] "
    } else if file.is_native_document() {
        "[DOC] "
    } else {
        "[FILE]"
    };
    let size = file
        .size
        .as_deref()
        .map(|s| format!(" ({})", format_byte_str(Some(s))))
        .unwrap_or_default();
    format!("{} {}{}  {}", kind, file.name, size, file.id)
}

/// Download or export a file.
async fn cmd_download(hub: &DriveHub, key: &str, file_id: &str, dest: &Path) -> Result<()> {
    let account = hub.resolve_account(key).await?;
    let path = hub.download(&account.id, file_id, dest).await?;
    println!("Saved {}", path.display());
    Ok(())
}

/// Upload a local file.
async fn cmd_upload(
    hub: &DriveHub,
    key: &str,
    path: &Path,
    folder: Option<&str>,
    mime_type: Option<String>,
    tags: &UploadTags,
) -> Result<()> {
    let account = hub.resolve_account(key).await?;

    let data = tokio::fs::read(path)
        .await
        .with_context(|| format!("Failed to read {}", path.display()))?;
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .context("Upload path has no file name")?;
    let mime_type = mime_type.or_else(|| guess_mime_type(path).map(str::to_string));

    info!("Uploading {} ({} bytes) to {}", name, data.len(), account.label);
    let outcome = hub
        .upload(
            &account.id,
            &name,
            mime_type.as_deref(),
            folder,
            Bytes::from(data),
            tags,
        )
        .await?;

    println!("Uploaded {}", outcome.file.name);
    println!("  ID: {}", outcome.file.id);
    println!("  Link: {}", outcome.public_link);
    println!("  Public: {}", if outcome.shared { "yes" } else { "no" });
    if hub.config().upload_log_endpoint().is_some() {
        println!("  Logged: {}", if outcome.logged { "yes" } else { "no" });
    }
    Ok(())
}

/// Fetch previews for an account's images.
async fn cmd_thumbs(hub: &DriveHub, key: &str) -> Result<()> {
    let account = hub.resolve_account(key).await?;
    let live = hub.prefetch_thumbnails(&account.id).await?;
    println!(
        "{} previews cached for {} in {}",
        live,
        account.label,
        hub.previews().dir().display()
    );
    Ok(())
}

/// Content type guessed from the file extension.
fn guess_mime_type(path: &Path) -> Option<&'static str> {
    mime_guess::from_path(path).first_raw()
}
