//! File-system watcher feeding a [`WatchSession`].
//!
//! notify delivers events on a std channel; a dedicated thread forwards the
//! interesting paths into the tokio channel the session reads from. Debouncing
//! and filtering against the build's watch set happen in the session.

use miette::{IntoDiagnostic, Result};
use notify::{Config, RecommendedWatcher, RecursiveMode, Watcher};
use std::path::{Path, PathBuf};
use stylepipe_core::engine::WatchSession;
use tokio::sync::mpsc;
use tracing::{trace, warn};

/// Directories whose contents never feed a build.
const IGNORED_DIRS: &[&str] = &["node_modules", ".git", "target"];

/// Keeps the OS watcher alive for as long as the session is in use.
pub struct WatchHandle {
    _watcher: RecommendedWatcher,
}

/// Watch `root` recursively, skipping ignored directories and the absolute `outdir`.
pub fn start(root: &Path, outdir: &Path) -> Result<(WatchHandle, WatchSession)> {
    let (event_tx, event_rx) = std::sync::mpsc::channel();
    let mut watcher = RecommendedWatcher::new(event_tx, Config::default()).into_diagnostic()?;
    watcher
        .watch(root, RecursiveMode::Recursive)
        .into_diagnostic()?;

    let (tx, rx) = mpsc::channel(256);
    let outdir: PathBuf = dunce::canonicalize(outdir).unwrap_or_else(|_| outdir.to_path_buf());

    std::thread::spawn(move || {
        for event in event_rx {
            match event {
                Ok(event) => {
                    for path in event.paths {
                        if should_ignore(&path, &outdir) {
                            continue;
                        }
                        trace!(path = %path.display(), "file changed");
                        if tx.blocking_send(path).is_err() {
                            return;
                        }
                    }
                }
                Err(e) => warn!(error = %e, "watch error"),
            }
        }
    });

    Ok((WatchHandle { _watcher: watcher }, WatchSession::new(rx)))
}

/// Check if a path should be ignored by the file watcher.
fn should_ignore(path: &Path, outdir: &Path) -> bool {
    if path.starts_with(outdir) {
        return true;
    }

    let in_ignored_dir = path.components().any(|c| {
        let part = c.as_os_str().to_string_lossy();
        IGNORED_DIRS.contains(&part.as_ref())
    });
    if in_ignored_dir {
        return true;
    }

    path.file_name()
        .is_some_and(|name| name.to_string_lossy().starts_with('.'))
}
