//! End-to-end working-area tests: checkout, status, update, commit and diff
//! against an in-process wiki serving textarea edit forms.
//!
//! Tests that need `diff3` or `diff` skip gracefully if they are not
//! installed.

mod common;

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tempfile::TempDir;

use formsync_core::config::ToolsConfig;
use formsync_core::errors::{RepoError, WorkAreaError};
use formsync_core::workarea::{CommitOutcome, ItemState, SyncSession, UpdateOutcome, WorkArea};
use formsync_core::RepositoryRegistry;

use common::{tool_available, wiki_client, FakeWiki};

// ===========================================================================
// Helpers
// ===========================================================================

fn session(wiki: &Arc<FakeWiki>) -> SyncSession {
    SyncSession::new(wiki_client(wiki), RepositoryRegistry::with_builtin(), &ToolsConfig::default())
}

async fn checkout(session: &mut SyncSession, dir: &Path, page: &str) -> PathBuf {
    session.checkout(dir, &FakeWiki::page_url(page), None, None).await.unwrap()
}

fn snapshot(dir: &Path) -> Vec<(PathBuf, Vec<u8>)> {
    let mut files = Vec::new();
    let mut stack = vec![dir.to_path_buf()];
    while let Some(d) = stack.pop() {
        for entry in fs::read_dir(d).unwrap() {
            let path = entry.unwrap().path();
            if path.is_dir() {
                stack.push(path);
            } else {
                let bytes = fs::read(&path).unwrap();
                files.push((path, bytes));
            }
        }
    }
    files.sort();
    files
}

// ===========================================================================
// Checkout
// ===========================================================================

#[tokio::test]
async fn test_checkout_names_files() {
    let wiki = FakeWiki::new();
    wiki.set("FrontPage", "Hello & <welcome>\n");
    let dir = TempDir::new().unwrap();
    let mut session = session(&wiki);

    let first = checkout(&mut session, dir.path(), "FrontPage").await;
    assert_eq!(first, dir.path().join("FrontPage.txt"));
    assert_eq!(fs::read_to_string(&first).unwrap(), "Hello & <welcome>\n");
    assert!(WorkArea::has(&first));

    let second = checkout(&mut session, dir.path(), "FrontPage").await;
    assert_eq!(second, dir.path().join("FrontPage_1.txt"));

    let wiki_ext = session
        .checkout(dir.path(), &FakeWiki::page_url("FrontPage"), Some(".wiki"), None)
        .await
        .unwrap();
    assert_eq!(wiki_ext, dir.path().join("FrontPage.wiki"));

    let named = session
        .checkout(dir.path(), &FakeWiki::page_url("FrontPage"), Some("home"), Some("textarea"))
        .await
        .unwrap();
    assert_eq!(named, dir.path().join("home.txt"));

    let again = session
        .checkout(dir.path(), &FakeWiki::page_url("FrontPage"), Some("home"), None)
        .await;
    assert!(matches!(again, Err(WorkAreaError::AlreadyCheckedOut(_))));

    let tracked = SyncSession::select_items(dir.path(), &[]).unwrap();
    assert_eq!(tracked.len(), 4);

    let dump = SyncSession::workdump(&first).unwrap();
    assert!(dump.contains("\"repository_type\": \"textarea\""));
    assert!(dump.contains("http://wiki.test/edit/FrontPage"));
}

#[tokio::test]
async fn test_checkout_unknown_type_and_missing_page() {
    let wiki = FakeWiki::new();
    wiki.set("Page", "x\n");
    let dir = TempDir::new().unwrap();
    let mut session = session(&wiki);

    let err = session
        .checkout(dir.path(), &FakeWiki::page_url("Page"), None, Some("pukiwiki"))
        .await
        .unwrap_err();
    assert!(matches!(err, WorkAreaError::Repo(RepoError::UnknownType(_))));

    let err = session
        .checkout(dir.path(), &FakeWiki::page_url("Missing"), None, None)
        .await
        .unwrap_err();
    assert!(matches!(err, WorkAreaError::Repo(RepoError::Web(_))));
    assert!(SyncSession::select_items(dir.path(), &[]).unwrap().is_empty());
}

// ===========================================================================
// Status & update
// ===========================================================================

#[tokio::test]
async fn test_update_clean_item_writes_nothing() {
    let wiki = FakeWiki::new();
    wiki.set("Page", "A\nB\nC\n");
    let dir = TempDir::new().unwrap();
    let mut session = session(&wiki);
    let path = checkout(&mut session, dir.path(), "Page").await;

    let before = snapshot(dir.path());
    assert_eq!(session.status(&path, true).await.unwrap(), ItemState::Clean);
    assert_eq!(session.update(&path).await.unwrap(), UpdateOutcome::Unchanged);
    assert_eq!(snapshot(dir.path()), before);
}

#[tokio::test]
async fn test_update_takes_remote_text_without_backup() {
    let wiki = FakeWiki::new();
    wiki.set("Page", "A\nB\nC\n");
    let dir = TempDir::new().unwrap();
    let mut session = session(&wiki);
    let path = checkout(&mut session, dir.path(), "Page").await;

    wiki.set("Page", "A\nX\nC\n");
    assert_eq!(session.status(&path, false).await.unwrap(), ItemState::Clean);
    assert_eq!(session.status(&path, true).await.unwrap(), ItemState::NeedsUpdate);

    assert_eq!(session.update(&path).await.unwrap(), UpdateOutcome::Updated);
    assert_eq!(fs::read_to_string(&path).unwrap(), "A\nX\nC\n");
    assert!(!dir.path().join(".~Page.txt").exists());
    assert_eq!(session.status(&path, true).await.unwrap(), ItemState::Clean);
}

#[tokio::test]
async fn test_local_edits_survive_update() {
    let wiki = FakeWiki::new();
    wiki.set("Page", "A\nB\nC\n");
    let dir = TempDir::new().unwrap();
    let mut session = session(&wiki);
    let path = checkout(&mut session, dir.path(), "Page").await;

    fs::write(&path, "A\nB\nC\nD\n").unwrap();
    assert_eq!(session.status(&path, false).await.unwrap(), ItemState::LocallyModified);
    assert_eq!(session.status(&path, true).await.unwrap(), ItemState::LocallyModified);
    assert_eq!(session.update(&path).await.unwrap(), UpdateOutcome::Unchanged);
    assert_eq!(fs::read_to_string(&path).unwrap(), "A\nB\nC\nD\n");
}

#[tokio::test]
async fn test_update_conflict_keeps_backup() {
    if !tool_available("diff3") {
        eprintln!("diff3 not installed, skipping");
        return;
    }
    let wiki = FakeWiki::new();
    wiki.set("Page", "A\nB\nC\n");
    let dir = TempDir::new().unwrap();
    let mut session = session(&wiki);
    let path = checkout(&mut session, dir.path(), "Page").await;

    fs::write(&path, "A\nZ\nC\n").unwrap();
    wiki.set("Page", "A\nX\nC\n");
    assert_eq!(session.status(&path, true).await.unwrap(), ItemState::NeedsMerge);

    let backup = dir.path().join(".~Page.txt");
    assert_eq!(
        session.update(&path).await.unwrap(),
        UpdateOutcome::Conflict { backup: backup.clone() }
    );
    assert_eq!(fs::read_to_string(&backup).unwrap(), "A\nZ\nC\n");
    let merged = fs::read_to_string(&path).unwrap();
    assert!(merged.contains("edited by you"));
    assert!(merged.contains("edited by others"));
    assert_eq!(WorkArea::open(&path).unwrap().original_text(), "A\nX\nC\n");
}

#[tokio::test]
async fn test_update_clean_merge() {
    if !tool_available("diff3") {
        eprintln!("diff3 not installed, skipping");
        return;
    }
    let wiki = FakeWiki::new();
    wiki.set("Page", "A\nB\nC\nD\n");
    let dir = TempDir::new().unwrap();
    let mut session = session(&wiki);
    let path = checkout(&mut session, dir.path(), "Page").await;

    fs::write(&path, "A\nZ\nC\nD\n").unwrap();
    wiki.set("Page", "A\nB\nC\nY\n");

    let outcome = session.update(&path).await.unwrap();
    assert!(matches!(outcome, UpdateOutcome::Merged { .. }));
    assert_eq!(fs::read_to_string(&path).unwrap(), "A\nZ\nC\nY\n");
    assert_eq!(session.status(&path, true).await.unwrap(), ItemState::LocallyModified);
}

#[tokio::test]
async fn test_missing_merge_tool_modifies_nothing() {
    let wiki = FakeWiki::new();
    wiki.set("Page", "A\nB\nC\n");
    let dir = TempDir::new().unwrap();
    let tools = ToolsConfig { diff3: "formsync-no-such-diff3".into(), ..ToolsConfig::default() };
    let mut session = SyncSession::new(wiki_client(&wiki), RepositoryRegistry::with_builtin(), &tools);
    let path = checkout(&mut session, dir.path(), "Page").await;

    fs::write(&path, "A\nZ\nC\n").unwrap();
    wiki.set("Page", "A\nX\nC\n");
    let before = snapshot(dir.path());

    let err = session.update(&path).await.unwrap_err();
    assert!(matches!(err, WorkAreaError::ToolNotFound(_)));
    assert_eq!(snapshot(dir.path()), before);
}

#[cfg(unix)]
#[tokio::test]
async fn test_failing_merge_tool_modifies_nothing() {
    use std::os::unix::fs::PermissionsExt;

    let bin = TempDir::new().unwrap();
    let script = bin.path().join("broken-diff3");
    fs::write(&script, "#!/bin/sh\necho 'diff3: broken' >&2\nexit 2\n").unwrap();
    fs::set_permissions(&script, fs::Permissions::from_mode(0o755)).unwrap();

    let wiki = FakeWiki::new();
    wiki.set("Page", "A\nB\nC\n");
    let dir = TempDir::new().unwrap();
    let tools = ToolsConfig { diff3: script.to_string_lossy().into_owned(), ..ToolsConfig::default() };
    let mut session = SyncSession::new(wiki_client(&wiki), RepositoryRegistry::with_builtin(), &tools);
    let path = checkout(&mut session, dir.path(), "Page").await;

    fs::write(&path, "A\nZ\nC\n").unwrap();
    wiki.set("Page", "A\nX\nC\n");
    assert_eq!(session.status(&path, true).await.unwrap(), ItemState::NeedsMerge);
    let before = snapshot(dir.path());

    match session.update(&path).await.unwrap_err() {
        WorkAreaError::MergeToolFailure { exit_code, stderr } => {
            assert_eq!(exit_code, 2);
            assert_eq!(stderr, "diff3: broken");
        }
        other => panic!("unexpected error: {other:?}"),
    }
    assert_eq!(snapshot(dir.path()), before);
    assert!(!dir.path().join(".~Page.txt").exists());
    assert_eq!(WorkArea::open(&path).unwrap().original_text(), "A\nB\nC\n");
}

// ===========================================================================
// Commit
// ===========================================================================

#[tokio::test]
async fn test_commit_pushes_local_text() {
    let wiki = FakeWiki::new();
    wiki.set("Page", "A\nB\n");
    wiki.set("Other", "untouched\n");
    let dir = TempDir::new().unwrap();
    let mut session = session(&wiki);
    let path = checkout(&mut session, dir.path(), "Page").await;
    checkout(&mut session, dir.path(), "Other").await;

    fs::write(&path, "A\nB\nC & D\n").unwrap();
    let items = SyncSession::select_items(dir.path(), &[]).unwrap();
    let results = session.commit(&items).await.unwrap();

    assert_eq!(results.len(), 1);
    assert_eq!(results[0].0, path);
    assert!(matches!(results[0].1, Ok(CommitOutcome::Committed)));
    assert_eq!(wiki.get("Page").as_deref(), Some("A\nB\nC & D\n"));
    assert_eq!(wiki.saves(), 1);
    assert_eq!(session.status(&path, true).await.unwrap(), ItemState::Clean);
}

#[tokio::test]
async fn test_commit_aborts_when_any_item_is_stale() {
    let wiki = FakeWiki::new();
    wiki.set("Fresh", "1\n");
    wiki.set("Stale", "2\n");
    let dir = TempDir::new().unwrap();
    let mut session = session(&wiki);
    let fresh = checkout(&mut session, dir.path(), "Fresh").await;
    let stale = checkout(&mut session, dir.path(), "Stale").await;

    fs::write(&fresh, "1 edited\n").unwrap();
    fs::write(&stale, "2 edited\n").unwrap();
    wiki.set("Stale", "2 changed on server\n");
    let before = snapshot(dir.path());

    let err = session.commit(&[fresh.clone(), stale.clone()]).await.unwrap_err();
    match err {
        WorkAreaError::NotUpToDate { files } => assert_eq!(files, vec![stale]),
        other => panic!("unexpected error: {other}"),
    }
    assert_eq!(wiki.saves(), 0);
    assert_eq!(wiki.get("Fresh").as_deref(), Some("1\n"));
    assert_eq!(snapshot(dir.path()), before);
}

#[tokio::test]
async fn test_commit_inexact_resyncs_to_server() {
    let wiki = FakeWiki::new();
    wiki.set("Page", "A\n");
    let dir = TempDir::new().unwrap();
    let mut session = session(&wiki);
    let path = checkout(&mut session, dir.path(), "Page").await;

    wiki.rewrite_on_save(|text| format!("{}-- signed\n", text));
    fs::write(&path, "A\nB\n").unwrap();

    let results = session.commit(&[path.clone()]).await.unwrap();
    let backup = dir.path().join(".~Page.txt");
    match &results[0].1 {
        Ok(CommitOutcome::CommittedInexactly { backup: b }) => assert_eq!(b, &backup),
        other => panic!("unexpected outcome: {other:?}"),
    }
    assert_eq!(fs::read_to_string(&backup).unwrap(), "A\nB\n");
    assert_eq!(fs::read_to_string(&path).unwrap(), "A\nB\n-- signed\n");
    let area = WorkArea::open(&path).unwrap();
    assert_eq!(area.original_text(), "A\nB\n-- signed\n");
    assert!(!area.is_modified().unwrap());
}

#[tokio::test]
async fn test_commit_untracked_file_fails() {
    let wiki = FakeWiki::new();
    let dir = TempDir::new().unwrap();
    let mut session = session(&wiki);

    let err = session.commit(&[dir.path().join("nope.txt")]).await.unwrap_err();
    assert!(matches!(err, WorkAreaError::NotCheckedOut(_)));
}

// ===========================================================================
// Diff
// ===========================================================================

#[tokio::test]
async fn test_diff_against_original_and_remote() {
    let wiki = FakeWiki::new();
    wiki.set("Page", "A\nB\n");
    let dir = TempDir::new().unwrap();
    let mut session = session(&wiki);
    let path = checkout(&mut session, dir.path(), "Page").await;

    assert_eq!(session.diff(&path, false).await.unwrap(), None);
    assert_eq!(session.diff(&path, true).await.unwrap(), None);

    if !tool_available("diff") {
        eprintln!("diff not installed, skipping");
        return;
    }
    fs::write(&path, "A\nC\n").unwrap();
    let before = snapshot(dir.path());

    let out = session.diff(&path, false).await.unwrap().unwrap();
    assert!(out.contains(&format!("--- {} (original)", path.display())));
    assert!(out.contains("-B\n+C\n"));

    wiki.set("Page", "A\nC\n");
    assert_eq!(session.diff(&path, true).await.unwrap(), None);
    assert_eq!(snapshot(dir.path()), before);
}
