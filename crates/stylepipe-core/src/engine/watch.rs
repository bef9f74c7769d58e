//! Change batching for watch mode.
//!
//! The file watcher itself lives in the CLI; this side only consumes the
//! stream of changed paths, debounces bursts (editors often write a file in
//! several steps), and drops changes to files the last build never read.

use std::collections::BTreeSet;
use std::path::PathBuf;
use std::time::Duration;
use tokio::sync::mpsc;

/// Default quiet period before a batch is released.
pub const DEBOUNCE: Duration = Duration::from_millis(50);

/// Receives changed paths and hands out relevant batches.
#[derive(Debug)]
pub struct WatchSession {
    rx: mpsc::Receiver<PathBuf>,
    debounce: Duration,
}

impl WatchSession {
    #[must_use]
    pub fn new(rx: mpsc::Receiver<PathBuf>) -> Self {
        Self {
            rx,
            debounce: DEBOUNCE,
        }
    }

    #[must_use]
    pub fn with_debounce(mut self, debounce: Duration) -> Self {
        self.debounce = debounce;
        self
    }

    /// Wait for the next burst of changes touching `watched`.
    ///
    /// Returns `None` once the sending side is gone.
    pub async fn next_batch(&mut self, watched: &BTreeSet<PathBuf>) -> Option<Vec<PathBuf>> {
        loop {
            let first = self.rx.recv().await?;
            let mut batch = BTreeSet::from([first]);
            let mut closed = false;

            let quiet = tokio::time::sleep(self.debounce);
            tokio::pin!(quiet);
            loop {
                tokio::select! {
                    () = &mut quiet => break,
                    next = self.rx.recv() => match next {
                        Some(path) => {
                            batch.insert(path);
                        }
                        None => {
                            closed = true;
                            break;
                        }
                    },
                }
            }

            let relevant = relevant_changes(batch, watched);
            if !relevant.is_empty() {
                return Some(relevant);
            }
            if closed {
                return None;
            }
        }
    }
}

/// The changed paths that `watched` covers, tolerant of symlinked and
/// non-canonical paths on either side.
///
/// The canonical form of the watch set is computed at most once per batch,
/// and only when some path misses the direct lookup.
fn relevant_changes(batch: BTreeSet<PathBuf>, watched: &BTreeSet<PathBuf>) -> Vec<PathBuf> {
    let mut canonical: Option<BTreeSet<PathBuf>> = None;
    batch
        .into_iter()
        .filter(|path| {
            if watched.contains(path) {
                return true;
            }
            let Ok(real) = dunce::canonicalize(path) else {
                return false;
            };
            canonical
                .get_or_insert_with(|| canonicalize_all(watched))
                .contains(&real)
        })
        .collect()
}

fn canonicalize_all(paths: &BTreeSet<PathBuf>) -> BTreeSet<PathBuf> {
    paths
        .iter()
        .map(|p| dunce::canonicalize(p).unwrap_or_else(|_| p.clone()))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn watched(paths: &[&str]) -> BTreeSet<PathBuf> {
        paths.iter().map(PathBuf::from).collect()
    }

    #[tokio::test]
    async fn test_burst_is_one_batch() {
        let (tx, rx) = mpsc::channel(16);
        let mut session = WatchSession::new(rx);
        for _ in 0..3 {
            tx.send(PathBuf::from("/p/a.scss")).await.unwrap();
        }
        tx.send(PathBuf::from("/p/b.scss")).await.unwrap();

        let batch = session
            .next_batch(&watched(&["/p/a.scss", "/p/b.scss"]))
            .await
            .unwrap();
        assert_eq!(batch, vec![PathBuf::from("/p/a.scss"), PathBuf::from("/p/b.scss")]);
    }

    #[tokio::test]
    async fn test_irrelevant_changes_are_skipped() {
        let (tx, rx) = mpsc::channel(16);
        let mut session = WatchSession::new(rx).with_debounce(Duration::from_millis(10));

        tx.send(PathBuf::from("/p/unrelated.txt")).await.unwrap();
        let sender = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(40)).await;
            tx.send(PathBuf::from("/p/a.scss")).await.unwrap();
        });

        let batch = session.next_batch(&watched(&["/p/a.scss"])).await.unwrap();
        assert_eq!(batch, vec![PathBuf::from("/p/a.scss")]);
        sender.await.unwrap();
    }

    #[cfg(unix)]
    #[test]
    fn test_changes_match_through_symlinks() {
        let dir = tempfile::tempdir().unwrap();
        let real = dunce::canonicalize(dir.path()).unwrap();
        std::fs::create_dir(real.join("styles")).unwrap();
        std::fs::write(real.join("styles/a.scss"), "").unwrap();
        std::fs::write(real.join("styles/b.scss"), "").unwrap();
        std::os::unix::fs::symlink(real.join("styles"), real.join("linked")).unwrap();

        let watched: BTreeSet<PathBuf> = [real.join("linked/a.scss"), real.join("gone.scss")]
            .into_iter()
            .collect();
        let batch = [
            real.join("styles/a.scss"),
            real.join("styles/b.scss"),
            real.join("gone.scss"),
        ]
        .into_iter()
        .collect();

        assert_eq!(
            relevant_changes(batch, &watched),
            vec![real.join("gone.scss"), real.join("styles/a.scss")]
        );
    }

    #[tokio::test]
    async fn test_closed_channel_ends_session() {
        let (tx, rx) = mpsc::channel::<PathBuf>(1);
        drop(tx);
        let mut session = WatchSession::new(rx);
        assert!(session.next_batch(&watched(&["/x"])).await.is_none());
    }
}
