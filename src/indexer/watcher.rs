use std::path::{Path, PathBuf};
use std::time::Duration;

use ignore::gitignore::{Gitignore, GitignoreBuilder};
use notify::{EventKind, RecursiveMode, Watcher};
use tokio::sync::mpsc;

const IGNORED_PATH_FRAGMENTS: &[&str] = &["/target/", "/.git/", "/.oak/", "/node_modules/"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileChangeKind {
    CreatedOrModified,
    Removed,
}

#[derive(Debug, Clone)]
pub struct FileChangeEvent {
    pub path: PathBuf,
    pub kind: FileChangeKind,
}

fn load_gitignore(root: &Path) -> Gitignore {
    let mut builder = GitignoreBuilder::new(root);
    let root_gitignore = root.join(".gitignore");
    if root_gitignore.exists() {
        if let Some(path_str) = root_gitignore.to_str() {
            if let Some(err) = builder.add(path_str) {
                tracing::warn!("failed to load .gitignore: {err}");
            }
        }
    }
    builder.build().unwrap_or_else(|_| Gitignore::empty())
}

/// Spawns a debounced filesystem watcher rooted at `root`. Raw `notify`
/// events are coalesced on a fixed interval so a burst of writes (a build,
/// a git checkout) produces one batch of `FileChangeEvent`s instead of
/// hundreds. The returned receiver is closed when the watcher (held by the
/// caller) is dropped.
pub fn spawn_watcher(
    root: PathBuf,
    debounce: Duration,
) -> notify::Result<(notify::RecommendedWatcher, mpsc::UnboundedReceiver<FileChangeEvent>)> {
    let (raw_tx, mut raw_rx) = mpsc::unbounded_channel::<notify::Event>();
    let (debounced_tx, debounced_rx) = mpsc::unbounded_channel::<FileChangeEvent>();

    let mut watcher = notify::recommended_watcher(move |res: notify::Result<notify::Event>| {
        if let Ok(event) = res {
            let _ = raw_tx.send(event);
        }
    })?;
    watcher.watch(&root, RecursiveMode::Recursive)?;

    tokio::spawn(async move {
        let gitignore = load_gitignore(&root);
        let is_ignored = |path: &Path| -> bool {
            let s = path.to_string_lossy();
            if IGNORED_PATH_FRAGMENTS.iter().any(|frag| s.contains(frag)) {
                return true;
            }
            match path.strip_prefix(&root) {
                Ok(rel) => gitignore.matched_path_or_any_parents(rel, false).is_ignore(),
                Err(_) => false,
            }
        };

        let mut pending: std::collections::HashMap<PathBuf, FileChangeKind> =
            std::collections::HashMap::new();
        let mut tick = tokio::time::interval(debounce);
        tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                maybe_event = raw_rx.recv() => {
                    let Some(event) = maybe_event else { break };
                    let kind = match event.kind {
                        EventKind::Remove(_) => FileChangeKind::Removed,
                        EventKind::Create(_) | EventKind::Modify(_) => FileChangeKind::CreatedOrModified,
                        _ => continue,
                    };
                    for path in event.paths {
                        if is_ignored(&path) {
                            continue;
                        }
                        pending.insert(path, kind);
                    }
                }
                _ = tick.tick() => {
                    if pending.is_empty() {
                        continue;
                    }
                    for (path, kind) in pending.drain() {
                        if debounced_tx.send(FileChangeEvent { path, kind }).is_err() {
                            return;
                        }
                    }
                }
            }
        }
    });

    Ok((watcher, debounced_rx))
}
