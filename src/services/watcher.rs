use anyhow::{anyhow, Result};
use notify::{recommended_watcher, Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

use crate::models::Owner;
use crate::services::batch::run_job;
use crate::services::intake::{create_job, IncomingFile};
use crate::services::state::AppState;

/// Keeps the OS watcher alive; dropping it stops delivery.
pub struct InboxWatcher {
    _watcher: RecommendedWatcher,
}

impl InboxWatcher {
    pub fn start(folder: &Path, extensions: Vec<String>, tx: mpsc::UnboundedSender<PathBuf>) -> Result<Self> {
        let mut watcher = recommended_watcher(move |res: notify::Result<Event>| {
            let Ok(event) = res else {
                return;
            };
            if !matches!(event.kind, EventKind::Create(_) | EventKind::Modify(_)) {
                return;
            }
            for path in event.paths {
                if has_extension(&path, &extensions) {
                    let _ = tx.send(path);
                }
            }
        })?;
        watcher.watch(folder, RecursiveMode::NonRecursive)?;
        Ok(InboxWatcher { _watcher: watcher })
    }
}

/// Files already lying in the folder at startup.
pub fn scan_folder(folder: &Path, extensions: &[String]) -> Vec<PathBuf> {
    walkdir::WalkDir::new(folder)
        .max_depth(1)
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.path().is_file())
        .filter(|e| has_extension(e.path(), extensions))
        .map(|e| e.path().to_path_buf())
        .collect()
}

fn has_extension(path: &Path, extensions: &[String]) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| extensions.iter().any(|allowed| allowed.eq_ignore_ascii_case(ext)))
        .unwrap_or(false)
}

/// Waits until the file size is the same on two consecutive polls, so half
/// written files are not picked up. Blocking.
pub fn debounce_file_event(path: &Path, debounce_ms: u64) -> bool {
    let mut last_size = None;
    for _ in 0..3 {
        std::thread::sleep(Duration::from_millis(debounce_ms));
        if let Ok(metadata) = std::fs::metadata(path) {
            let size = metadata.len();
            if Some(size) == last_size {
                return size > 0;
            }
            last_size = Some(size);
        } else {
            return false;
        }
    }
    last_size.unwrap_or(0) > 0
}

/// Starts watching the configured inbox, if any. The returned watcher must be
/// kept alive for as long as the folder should be watched.
pub fn spawn_inbox(state: Arc<AppState>) -> Result<Option<InboxWatcher>> {
    let config = &state.config.watcher;
    let (Some(folder), Some(email)) = (config.inbox_dir.clone(), config.owner_email.clone()) else {
        return Ok(None);
    };
    let user = state
        .db()?
        .get_user_by_email(&email)?
        .ok_or_else(|| anyhow!("Inbox owner {} does not exist", email))?;
    let owner = Owner {
        user_id: user.id,
        org_id: user.org_id,
    };

    std::fs::create_dir_all(&folder)?;
    let extensions = state.config.limits.allowed_extensions.clone();
    let (tx, mut rx) = mpsc::unbounded_channel();
    for path in scan_folder(&folder, &extensions) {
        let _ = tx.send(path);
    }
    let watcher = InboxWatcher::start(&folder, extensions, tx)?;
    tracing::info!(folder = %folder.display(), owner = %owner.key(), "Watching inbox folder");

    let poll_ms = config.poll_ms;
    tokio::spawn(async move {
        let mut seen: HashSet<PathBuf> = HashSet::new();
        while let Some(path) = rx.recv().await {
            if seen.contains(&path) {
                continue;
            }
            let candidate = path.clone();
            let stable = tokio::task::spawn_blocking(move || debounce_file_event(&candidate, poll_ms))
                .await
                .unwrap_or(false);
            if !stable {
                continue;
            }
            seen.insert(path.clone());
            ingest(Arc::clone(&state), &owner, &path).await;
        }
    });
    Ok(Some(watcher))
}

async fn ingest(state: Arc<AppState>, owner: &Owner, path: &Path) {
    let job = IncomingFile::read(path).and_then(|file| create_job(&state, owner, vec![file]));
    match job {
        Ok(job) => {
            tracing::info!(job_id = %job.id, file = %path.display(), "Inbox document queued");
            if let Err(err) = run_job(state, job.id).await {
                tracing::error!(file = %path.display(), error = %err, "Inbox job failed");
            }
        }
        Err(err) => {
            tracing::warn!(file = %path.display(), kind = %err.kind(), error = %err, "Inbox document rejected")
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn extensions() -> Vec<String> {
        vec!["pdf".into(), "png".into()]
    }

    #[test]
    fn scan_picks_allowed_files_only() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("a.PDF"), b"%PDF-1.4").unwrap();
        std::fs::write(dir.path().join("b.png"), b"png").unwrap();
        std::fs::write(dir.path().join("c.txt"), b"text").unwrap();
        std::fs::create_dir(dir.path().join("nested.pdf")).unwrap();

        let mut found = scan_folder(dir.path(), &extensions());
        found.sort();
        assert_eq!(found.len(), 2);
        assert!(found[0].ends_with("a.PDF"));
    }

    #[test]
    fn stable_files_pass_the_debounce() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("a.pdf");
        std::fs::write(&path, b"%PDF-1.4").unwrap();
        assert!(debounce_file_event(&path, 5));
        assert!(!debounce_file_event(&dir.path().join("missing.pdf"), 5));
    }
}
