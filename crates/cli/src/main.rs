//! formsync command-line tool.
//!
//! Checks web pages that are only editable through an HTML form out into
//! local files, and keeps them in sync: status, update (with three-way
//! merge), commit, and diff.

mod style;

use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing::debug;
use tracing_subscriber::EnvFilter;
use url::Url;

use formsync_core::config::Config;
use formsync_core::errors::WorkAreaError;
use formsync_core::keyring::KeyRing;
use formsync_core::repo::RepositoryRegistry;
use formsync_core::web::WebClient;
use formsync_core::workarea::{CommitOutcome, ItemState, SyncSession, UpdateOutcome};

// ---------------------------------------------------------------------------
// CLI argument definitions
// ---------------------------------------------------------------------------

/// Edit wiki pages and blog entries as local files.
#[derive(Parser, Debug)]
#[command(
    name = "formsync",
    version,
    about = "Check out, update and commit web pages through their edit forms"
)]
struct Cli {
    /// Path to the TOML configuration file.
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Log at debug level unless RUST_LOG is set.
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Check a page out into a local file.
    #[command(visible_alias = "co")]
    Checkout {
        /// Repository type (see `formsync types`).
        #[arg(short = 't', long = "type")]
        repo_type: Option<String>,

        /// Page URL.
        url: String,

        /// Local file name, or an extension starting with '.'.
        local: Option<String>,
    },

    /// Show which files have local or remote changes.
    #[command(visible_aliases = ["st", "stat"])]
    Status {
        /// Also compare with the current server text.
        #[arg(short = 'u')]
        remote: bool,

        files: Vec<PathBuf>,
    },

    /// Bring files up to date with the server.
    #[command(visible_alias = "up")]
    Update { files: Vec<PathBuf> },

    /// Send locally modified files to the server.
    #[command(visible_aliases = ["ci", "checkin"])]
    Commit { files: Vec<PathBuf> },

    /// Show local changes as a unified diff.
    #[command(visible_alias = "di")]
    Diff {
        /// Compare with the current server text instead of the original.
        #[arg(short = 'u')]
        remote: bool,

        files: Vec<PathBuf>,
    },

    /// Print the stored record of checked-out files.
    Workdump { files: Vec<PathBuf> },

    /// List the known repository types.
    Types,

    /// Generate a default configuration file.
    Init {
        /// Output path; defaults to the standard configuration location.
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
}

// ---------------------------------------------------------------------------
// Main
// ---------------------------------------------------------------------------

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    let config = Config::load_or_default(cli.config.as_deref());

    let level = match (&config, cli.verbose) {
        (_, true) => "debug",
        (Ok(config), false) => config.log_level.as_str(),
        (Err(_), false) => "warn",
    };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level)))
        .with_target(false)
        .without_time()
        .with_writer(std::io::stderr)
        .init();

    let result = match config {
        Ok(config) => run(cli.command, config).await,
        Err(e) => Err(anyhow::Error::new(e).context("failed to load configuration")),
    };
    match result {
        Ok(code) => code,
        Err(e) => {
            eprintln!("Error: {:#}", e);
            ExitCode::FAILURE
        }
    }
}

async fn run(command: Commands, config: Config) -> Result<ExitCode> {
    let cwd = Path::new(".");
    match command {
        Commands::Init { output } => cmd_init(output),
        Commands::Types => cmd_types(),
        Commands::Workdump { files } => cmd_workdump(&SyncSession::select_items(cwd, &files)?),
        command => {
            let mut session = open_session(&config)?;
            match command {
                Commands::Checkout { repo_type, url, local } => {
                    cmd_checkout(&mut session, &url, local.as_deref(), repo_type.as_deref()).await
                }
                Commands::Status { remote, files } => {
                    cmd_status(&mut session, &SyncSession::select_items(cwd, &files)?, remote).await
                }
                Commands::Update { files } => {
                    cmd_update(&mut session, &SyncSession::select_items(cwd, &files)?).await
                }
                Commands::Commit { files } => {
                    cmd_commit(&mut session, &SyncSession::select_items(cwd, &files)?).await
                }
                Commands::Diff { remote, files } => {
                    cmd_diff(&mut session, &SyncSession::select_items(cwd, &files)?, remote).await
                }
                Commands::Init { .. } | Commands::Types | Commands::Workdump { .. } => unreachable!(),
            }
        }
    }
}

fn open_session(config: &Config) -> Result<SyncSession> {
    let keyring = KeyRing::new(config.keyring.resolved_dir(), &config.tools.gpg);
    debug!(dir = %keyring.dir().display(), "using keyring");
    let client = WebClient::from_config(&config.http, Arc::new(keyring))
        .context("failed to create web client")?;
    Ok(SyncSession::new(client, RepositoryRegistry::with_builtin(), &config.tools))
}

fn report_failure(path: &Path, err: &WorkAreaError) {
    eprintln!("{}", style::error(&format!("{}: {}", path.display(), err)));
}

fn exit_code(failed: bool) -> ExitCode {
    if failed {
        ExitCode::FAILURE
    } else {
        ExitCode::SUCCESS
    }
}

// ---------------------------------------------------------------------------
// Subcommand implementations
// ---------------------------------------------------------------------------

async fn cmd_checkout(
    session: &mut SyncSession,
    url: &str,
    local: Option<&str>,
    repo_type: Option<&str>,
) -> Result<ExitCode> {
    let url = Url::parse(url).with_context(|| format!("invalid URL: {}", url))?;
    let path = session
        .checkout(Path::new("."), &url, local, repo_type)
        .await
        .with_context(|| format!("checkout of {} failed", url))?;
    println!("{}", path.display());
    Ok(ExitCode::SUCCESS)
}

async fn cmd_status(session: &mut SyncSession, items: &[PathBuf], remote: bool) -> Result<ExitCode> {
    let mut failed = false;
    for item in items {
        match session.status(item, remote).await {
            Ok(ItemState::Clean) => {}
            Ok(state) => println!("{}: {}", item.display(), style::item_state(state)),
            Err(e) => {
                report_failure(item, &e);
                failed = true;
            }
        }
    }
    Ok(exit_code(failed))
}

async fn cmd_update(session: &mut SyncSession, items: &[PathBuf]) -> Result<ExitCode> {
    let mut failed = false;
    for item in items {
        match session.update(item).await {
            Ok(UpdateOutcome::Unchanged) => {}
            Ok(outcome) => println!("{}: {}", item.display(), style::update_outcome(&outcome)),
            Err(e) => {
                report_failure(item, &e);
                failed = true;
            }
        }
    }
    Ok(exit_code(failed))
}

async fn cmd_commit(session: &mut SyncSession, items: &[PathBuf]) -> Result<ExitCode> {
    let results = match session.commit(items).await {
        Ok(results) => results,
        Err(WorkAreaError::NotUpToDate { files }) => {
            for file in files {
                println!("not up-to-date : {}", file.display());
            }
            return Ok(ExitCode::FAILURE);
        }
        Err(e) => return Err(e).context("commit failed"),
    };

    let mut failed = false;
    for (path, outcome) in results {
        match outcome {
            Ok(CommitOutcome::Committed) => println!("{}", path.display()),
            Ok(CommitOutcome::CommittedInexactly { backup }) => {
                println!(
                    "{}",
                    style::warn(&format!("commited not exactly.  local file backup: {}", backup.display()))
                );
                println!("{}", path.display());
            }
            Err(e) => {
                report_failure(&path, &e);
                failed = true;
            }
        }
    }
    Ok(exit_code(failed))
}

async fn cmd_diff(session: &mut SyncSession, items: &[PathBuf], remote: bool) -> Result<ExitCode> {
    let mut differs = false;
    let mut failed = false;
    for item in items {
        match session.diff(item, remote).await {
            Ok(Some(diff)) => {
                print!("{}", diff);
                differs = true;
            }
            Ok(None) => {}
            Err(e) => {
                report_failure(item, &e);
                failed = true;
            }
        }
    }
    Ok(exit_code(differs || failed))
}

fn cmd_workdump(items: &[PathBuf]) -> Result<ExitCode> {
    for item in items {
        let dump = SyncSession::workdump(item)
            .with_context(|| format!("cannot read record of {}", item.display()))?;
        println!("{}", style::header(&format!("{} :", item.display())));
        println!("{}", dump);
    }
    Ok(ExitCode::SUCCESS)
}

fn cmd_types() -> Result<ExitCode> {
    let registry = RepositoryRegistry::with_builtin();
    for name in registry.available_types() {
        println!("{}", name);
    }
    Ok(ExitCode::SUCCESS)
}

fn cmd_init(output: Option<PathBuf>) -> Result<ExitCode> {
    let output = match output {
        Some(path) => path,
        None => Config::default_path().context("no configuration directory on this platform")?,
    };
    if output.exists() {
        anyhow::bail!(
            "file already exists: {}. Use a different path or remove the existing file.",
            output.display()
        );
    }
    if let Some(parent) = output.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent).context("failed to create configuration directory")?;
    }
    std::fs::write(&output, Config::default_template()).context("failed to write config file")?;

    println!("Default configuration written to {}", output.display());
    println!("{}", style::dim("Credentials are read from gpg-encrypted *.asc files in the keyring directory."));
    Ok(ExitCode::SUCCESS)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_aliases_parse() {
        let cli = Cli::try_parse_from(["formsync", "co", "-t", "textarea", "http://w/p", "p.txt"]).unwrap();
        match cli.command {
            Commands::Checkout { repo_type, url, local } => {
                assert_eq!(repo_type.as_deref(), Some("textarea"));
                assert_eq!(url, "http://w/p");
                assert_eq!(local.as_deref(), Some("p.txt"));
            }
            other => panic!("unexpected command: {other:?}"),
        }

        let cli = Cli::try_parse_from(["formsync", "stat", "-u", "a.txt", "b.txt"]).unwrap();
        assert!(matches!(cli.command, Commands::Status { remote: true, ref files } if files.len() == 2));

        let cli = Cli::try_parse_from(["formsync", "--verbose", "checkin"]).unwrap();
        assert!(cli.verbose);
        assert!(matches!(cli.command, Commands::Commit { ref files } if files.is_empty()));

        assert!(Cli::try_parse_from(["formsync", "di", "-u"]).is_ok());
        assert!(Cli::try_parse_from(["formsync", "up", "x.txt"]).is_ok());
    }

    #[test]
    fn test_init_refuses_to_overwrite() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("config.toml");
        cmd_init(Some(path.clone())).unwrap();
        assert!(Config::load_or_default(Some(&path)).is_ok());
        assert!(cmd_init(Some(path)).is_err());
    }
}
