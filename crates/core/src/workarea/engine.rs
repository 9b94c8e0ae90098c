//! The synchronization engine: checkout, status, update, commit and diff
//! over tracked files.
//!
//! Items are processed strictly one after another through a single
//! [`WebClient`], so cookie and Digest nonce-count state stays linear.

use std::fmt;
use std::path::{Path, PathBuf};

use tracing::{info, instrument, warn};
use url::Url;

use super::record::{in_dir, WorkArea};
use super::tools::{Diff3MergeTool, DiffTool};
use crate::config::ToolsConfig;
use crate::errors::WorkAreaError;
use crate::repo::{RepositoryAccessor, RepositoryRegistry};
use crate::web::WebClient;

const DEFAULT_EXTENSION: &str = ".txt";
const EMPTY_FILENAME: &str = "empty-filename";

/// Relation between the local, original and remote texts of one item.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ItemState {
    Clean,
    LocallyModified,
    NeedsUpdate,
    NeedsMerge,
}

impl ItemState {
    /// Classify an item; without a remote text only local edits are seen.
    pub fn classify(local: &str, original: &str, remote: Option<&str>) -> Self {
        let local_changed = local != original;
        let remote_changed = remote.is_some_and(|r| r != original);
        match (local_changed, remote_changed) {
            (false, false) => ItemState::Clean,
            (true, false) => ItemState::LocallyModified,
            (false, true) => ItemState::NeedsUpdate,
            (true, true) => ItemState::NeedsMerge,
        }
    }
}

impl fmt::Display for ItemState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ItemState::Clean => "clean",
            ItemState::LocallyModified => "localy-modified",
            ItemState::NeedsUpdate => "needs-update",
            ItemState::NeedsMerge => "needs-merge",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UpdateOutcome {
    /// The server text did not move.
    Unchanged,
    /// Local had no edits and now equals the server text.
    Updated,
    Merged { backup: PathBuf },
    Conflict { backup: PathBuf },
}

impl fmt::Display for UpdateOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UpdateOutcome::Unchanged => f.write_str("unchanged"),
            UpdateOutcome::Updated => f.write_str("updated"),
            UpdateOutcome::Merged { backup } => write!(f, "merged (backup: {})", backup.display()),
            UpdateOutcome::Conflict { backup } => write!(f, "conflict (backup: {})", backup.display()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommitOutcome {
    Committed,
    /// The server stored something other than what was sent. The sent text
    /// is in `backup` and the local file now holds the server's version.
    CommittedInexactly { backup: PathBuf },
}

/// One synchronization run: a web client, the known repository types and
/// the external tools.
pub struct SyncSession {
    client: WebClient,
    registry: RepositoryRegistry,
    merge_tool: Diff3MergeTool,
    diff_tool: DiffTool,
}

impl SyncSession {
    /// Installs every repository type's auth handlers into `client`.
    pub fn new(mut client: WebClient, registry: RepositoryRegistry, tools: &ToolsConfig) -> Self {
        registry.install_auth(&mut client);
        Self {
            client,
            registry,
            merge_tool: Diff3MergeTool::new(&tools.diff3),
            diff_tool: DiffTool::new(&tools.diff),
        }
    }

    pub fn client(&self) -> &WebClient {
        &self.client
    }

    pub fn registry(&self) -> &RepositoryRegistry {
        &self.registry
    }

    /// The named files, or every tracked file of `dir` when none are named.
    pub fn select_items(dir: &Path, items: &[PathBuf]) -> Result<Vec<PathBuf>, WorkAreaError> {
        if items.is_empty() {
            WorkArea::each_filename(dir)
        } else {
            Ok(items.to_vec())
        }
    }

    async fn fetch_remote(&mut self, area: &WorkArea) -> Result<Box<dyn RepositoryAccessor>, WorkAreaError> {
        let repo_type = self.registry.find(area.repository_type())?;
        let url = area.url()?;
        Ok(repo_type.make_accessor(&mut self.client, &url).await?)
    }

    /// Check out `url` into `dir` and return the new file's path.
    #[instrument(skip(self, dir))]
    pub async fn checkout(
        &mut self,
        dir: &Path,
        url: &Url,
        local_hint: Option<&str>,
        type_hint: Option<&str>,
    ) -> Result<PathBuf, WorkAreaError> {
        let naming = LocalName::from_hint(local_hint);
        if let LocalName::Explicit(name) = &naming {
            let path = in_dir(dir, name);
            if WorkArea::has(&path) {
                return Err(WorkAreaError::AlreadyCheckedOut(path));
            }
        }

        let (repo_type, stable_uri) = self.registry.detect(&mut self.client, url, type_hint).await?;
        let accessor = repo_type.make_accessor(&mut self.client, &stable_uri).await?;

        let path = match naming {
            LocalName::Explicit(name) => in_dir(dir, &name),
            LocalName::Extension(ext) => unused_filename(dir, &accessor.recommended_filename(), &ext),
        };
        let area = WorkArea::create(&path, &stable_uri, repo_type.name(), accessor.as_ref())?;
        area.store()?;
        info!(path = %path.display(), uri = %stable_uri, "checked out");
        Ok(path)
    }

    /// Local-only status, or the full four-way state with `check_remote`.
    #[instrument(skip(self))]
    pub async fn status(&mut self, path: &Path, check_remote: bool) -> Result<ItemState, WorkAreaError> {
        let area = WorkArea::open(path)?;
        let local = area.local_text()?;
        let remote = if check_remote {
            Some(self.fetch_remote(&area).await?.current_text().to_string())
        } else {
            None
        };
        Ok(ItemState::classify(&local, area.original_text(), remote.as_deref()))
    }

    /// Bring one item up to date with the server, merging when both sides
    /// changed. A failing merge tool leaves every file untouched.
    #[instrument(skip(self))]
    pub async fn update(&mut self, path: &Path) -> Result<UpdateOutcome, WorkAreaError> {
        let mut area = WorkArea::open(path)?;
        let accessor = self.fetch_remote(&area).await?;
        let remote = accessor.current_text();
        let local = area.local_text()?;

        match ItemState::classify(&local, area.original_text(), Some(remote)) {
            ItemState::Clean | ItemState::LocallyModified => Ok(UpdateOutcome::Unchanged),
            ItemState::NeedsUpdate => {
                area.set_local_text(remote)?;
                area.set_original_text(remote);
                area.set_accessor_state(accessor.as_ref())?;
                area.store_info()?;
                Ok(UpdateOutcome::Updated)
            }
            ItemState::NeedsMerge => {
                let merged = self.merge_tool.merge(&local, area.original_text(), remote).await?;
                let backup = area.make_backup(&local)?;
                area.set_local_text(&merged.text)?;
                area.set_original_text(remote);
                area.set_accessor_state(accessor.as_ref())?;
                area.store_info()?;
                if merged.conflict {
                    warn!(path = %path.display(), "merge left conflict markers");
                    Ok(UpdateOutcome::Conflict { backup })
                } else {
                    Ok(UpdateOutcome::Merged { backup })
                }
            }
        }
    }

    /// Commit every locally modified item among `paths`.
    ///
    /// All items are checked against the server first; if any is stale the
    /// whole batch fails with [`WorkAreaError::NotUpToDate`] and nothing is
    /// sent or written. After that, items succeed or fail independently.
    #[instrument(skip(self))]
    pub async fn commit(
        &mut self,
        paths: &[PathBuf],
    ) -> Result<Vec<(PathBuf, Result<CommitOutcome, WorkAreaError>)>, WorkAreaError> {
        let mut pending = Vec::new();
        let mut stale = Vec::new();
        for path in paths {
            let area = WorkArea::open(path)?;
            let local = area.local_text()?;
            if local == area.original_text() {
                continue;
            }
            let accessor = self.fetch_remote(&area).await?;
            if accessor.current_text() != area.original_text() {
                stale.push(path.clone());
            }
            pending.push((area, accessor, local));
        }
        if !stale.is_empty() {
            return Err(WorkAreaError::NotUpToDate { files: stale });
        }

        let mut results = Vec::with_capacity(pending.len());
        for (mut area, accessor, local) in pending {
            let path = area.path().to_path_buf();
            let outcome = self.commit_one(&mut area, accessor, &local).await;
            results.push((path, outcome));
        }
        Ok(results)
    }

    async fn commit_one(
        &mut self,
        area: &mut WorkArea,
        mut accessor: Box<dyn RepositoryAccessor>,
        local: &str,
    ) -> Result<CommitOutcome, WorkAreaError> {
        accessor.replace_text(local);
        accessor.commit(&mut self.client).await?;
        let reloaded = accessor.reload(&mut self.client).await?;
        area.set_accessor_state(reloaded.as_ref())?;

        if reloaded.current_text() == local {
            area.set_original_text(local);
            area.store_info()?;
            info!(path = %area.path().display(), "committed");
            return Ok(CommitOutcome::Committed);
        }

        let backup = area.make_backup(local)?;
        warn!(path = %area.path().display(), backup = %backup.display(), "server text differs from committed text");
        area.set_original_text(reloaded.current_text());
        area.store()?;
        Ok(CommitOutcome::CommittedInexactly { backup })
    }

    /// Unified diff of the local text against the original, or against the
    /// current server text with `use_remote`. `None` when they are equal.
    #[instrument(skip(self))]
    pub async fn diff(&mut self, path: &Path, use_remote: bool) -> Result<Option<String>, WorkAreaError> {
        let area = WorkArea::open(path)?;
        let local = area.local_text()?;
        let name = path.display().to_string();
        let (other, other_label) = if use_remote {
            let accessor = self.fetch_remote(&area).await?;
            (accessor.current_text().to_string(), format!("{} (remote)", name))
        } else {
            (area.original_text().to_string(), format!("{} (original)", name))
        };
        if other == local {
            return Ok(None);
        }
        let diff = self.diff_tool.unified(&other_label, &other, &name, &local).await?;
        Ok(Some(diff))
    }

    /// The decoded record of `path` as pretty JSON.
    pub fn workdump(path: &Path) -> Result<String, WorkAreaError> {
        WorkArea::open(path)?.dump()
    }
}

/// How the local file name of a checkout is chosen.
#[derive(Debug, Clone, PartialEq, Eq)]
enum LocalName {
    Explicit(String),
    /// Derive the name from the accessor, with this extension.
    Extension(String),
}

impl LocalName {
    fn from_hint(hint: Option<&str>) -> Self {
        match hint {
            None => LocalName::Extension(DEFAULT_EXTENSION.into()),
            Some(ext) if ext.starts_with('.') => LocalName::Extension(ext.into()),
            Some(name) if name.contains('.') => LocalName::Explicit(name.into()),
            Some(name) => LocalName::Explicit(format!("{}{}", name, DEFAULT_EXTENSION)),
        }
    }
}

/// `recommended + ext` in `dir`, or `recommended_N + ext` for the first
/// untracked N.
fn unused_filename(dir: &Path, recommended: &str, ext: &str) -> PathBuf {
    let base = match recommended.rsplit('/').next() {
        Some(b) if !b.is_empty() => b,
        _ => EMPTY_FILENAME,
    };
    let first = in_dir(dir, &format!("{}{}", base, ext));
    if !WorkArea::has(&first) {
        return first;
    }
    (1..)
        .map(|n| in_dir(dir, &format!("{}_{}{}", base, n, ext)))
        .find(|p| !WorkArea::has(p))
        .unwrap_or(first)
}
