//! Content-keyed memoization of [`StyleEngine::render`].

use super::render::{RenderOutput, StyleEngine};
use crate::cache::{CachePolicy, MemoCache};
use crate::error::Result;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use stylepipe_util::hash::blake3_bytes;
use tracing::{debug, trace};

#[derive(Debug)]
struct Entry {
    /// Source text the output was rendered from.
    content: Arc<str>,
    output: RenderOutput,
}

/// Counters for [`RenderCache`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RenderStats {
    pub hits: u64,
    pub misses: u64,
    pub entries: usize,
}

/// Render memo keyed by source path, valid while the source text and every
/// nested dependency are unchanged.
///
/// Lookups compare the stored content with the caller's content byte for
/// byte and re-hash each dependency the preprocessor read; any difference
/// re-renders and replaces the entry. Renders of one path are serialized so
/// concurrent first requests render once and share the result; different
/// paths render in parallel.
#[derive(Debug)]
pub struct RenderCache {
    engine: Arc<StyleEngine>,
    entries: MemoCache<PathBuf, Arc<Entry>>,
    locks: Mutex<HashMap<PathBuf, Arc<tokio::sync::Mutex<()>>>>,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl RenderCache {
    #[must_use]
    pub fn new(engine: Arc<StyleEngine>, policy: CachePolicy) -> Self {
        Self {
            engine,
            entries: MemoCache::new(policy),
            locks: Mutex::new(HashMap::new()),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    #[must_use]
    pub fn engine(&self) -> &Arc<StyleEngine> {
        &self.engine
    }

    fn path_lock(&self, path: &Path) -> Arc<tokio::sync::Mutex<()>> {
        let mut locks = self.locks.lock().unwrap_or_else(|p| p.into_inner());
        Arc::clone(locks.entry(path.to_path_buf()).or_default())
    }

    /// Forget `path`'s lock once nobody else holds or waits on it.
    fn release_lock(&self, path: &Path, lock: &Arc<tokio::sync::Mutex<()>>) {
        let mut locks = self.locks.lock().unwrap_or_else(|p| p.into_inner());
        // One reference in the map, one in `lock`.
        if Arc::strong_count(lock) == 2 {
            locks.remove(path);
        }
    }

    /// Render `path` with its freshly read `content`, reusing the previous
    /// output when neither the content nor any dependency changed.
    pub async fn render(&self, path: &Path, content: &str) -> Result<RenderOutput> {
        let lock = self.path_lock(path);
        let result = {
            let _guard = lock.lock().await;
            self.render_locked(path, content).await
        };
        self.release_lock(path, &lock);
        result
    }

    async fn render_locked(&self, path: &Path, content: &str) -> Result<RenderOutput> {
        if let Some(entry) = self.entries.get(path) {
            if *entry.content != *content {
                debug!(path = %path.display(), "content changed, re-rendering");
            } else if let Some(dep) = changed_dependency(&entry.output).await {
                debug!(
                    path = %path.display(),
                    dependency = %dep.display(),
                    "dependency changed, re-rendering"
                );
            } else {
                self.hits.fetch_add(1, Ordering::Relaxed);
                trace!(path = %path.display(), "render cache hit");
                return Ok(entry.output.clone());
            }
        }

        self.misses.fetch_add(1, Ordering::Relaxed);
        let output = self.engine.render(path, content).await?;
        self.entries.insert(
            path.to_path_buf(),
            Arc::new(Entry {
                content: Arc::from(content),
                output: output.clone(),
            }),
        );
        Ok(output)
    }

    #[cfg(test)]
    fn lock_count(&self) -> usize {
        self.locks.lock().unwrap_or_else(|p| p.into_inner()).len()
    }

    #[must_use]
    pub fn stats(&self) -> RenderStats {
        RenderStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            entries: self.entries.len(),
        }
    }
}

/// First dependency whose bytes no longer match the digest taken at render
/// time. A dependency that cannot be read counts as changed.
async fn changed_dependency(output: &RenderOutput) -> Option<&Path> {
    for (dep, digest) in output.dependencies.iter().zip(&output.dependency_digests) {
        match tokio::fs::read(dep).await {
            Ok(bytes) if blake3_bytes(&bytes) == *digest => {}
            _ => return Some(dep),
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PipelineConfig;
    use crate::resolver::{PathResolver, ResolutionCache};
    use tempfile::{tempdir, TempDir};

    fn cache(project: &TempDir, temp: &TempDir) -> RenderCache {
        let config = PipelineConfig::new(project.path());
        let resolutions = Arc::new(ResolutionCache::new(
            PathResolver::new(&config),
            CachePolicy::Unbounded,
        ));
        let engine = Arc::new(StyleEngine::new(&config, temp.path(), resolutions));
        RenderCache::new(engine, CachePolicy::Unbounded)
    }

    #[tokio::test]
    async fn test_identical_content_hits() {
        let (project, temp) = (tempdir().unwrap(), tempdir().unwrap());
        let cache = cache(&project, &temp);
        let path = project.path().join("a.module.css");

        let first = cache.render(&path, ".a { color: red; }").await.unwrap();
        let second = cache.render(&path, ".a { color: red; }").await.unwrap();
        assert_eq!(first, second);
        assert_eq!(
            cache.stats(),
            RenderStats {
                hits: 1,
                misses: 1,
                entries: 1
            }
        );
    }

    #[tokio::test]
    async fn test_changed_content_rerenders() {
        let (project, temp) = (tempdir().unwrap(), tempdir().unwrap());
        let cache = cache(&project, &temp);
        let path = project.path().join("a.css");

        let first = cache.render(&path, ".a { margin: 1px; }").await.unwrap();
        let css1 = std::fs::read_to_string(&first.output_path).unwrap();
        let second = cache.render(&path, ".a { margin: 2px; }").await.unwrap();
        let css2 = std::fs::read_to_string(&second.output_path).unwrap();

        assert_ne!(css1, css2);
        assert!(css2.contains("2px"));
        assert_eq!(cache.stats().misses, 2);
        assert_eq!(cache.stats().entries, 1);
    }

    #[tokio::test]
    async fn test_failed_render_is_not_cached() {
        let (project, temp) = (tempdir().unwrap(), tempdir().unwrap());
        let cache = cache(&project, &temp);
        let path = project.path().join("a.scss");

        assert!(cache.render(&path, ".a { color: $x; }").await.is_err());
        assert_eq!(cache.stats().entries, 0);
        assert!(cache.render(&path, "$x: red; .a { color: $x; }").await.is_ok());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_first_renders_share_one_render() {
        let (project, temp) = (tempdir().unwrap(), tempdir().unwrap());
        let cache = Arc::new(cache(&project, &temp));
        let path = project.path().join("src/shared.module.scss");
        let source = "$c: red;\n.title { color: $c; }\n.body { margin: 0; }";

        let tasks: Vec<_> = (0..8)
            .map(|_| {
                let cache = Arc::clone(&cache);
                let path = path.clone();
                tokio::spawn(async move { cache.render(&path, source).await })
            })
            .collect();

        let mut outputs = Vec::new();
        for task in tasks {
            outputs.push(task.await.unwrap().unwrap());
        }
        assert!(outputs.windows(2).all(|w| w[0] == w[1]));
        assert_eq!(cache.stats().misses, 1);
        assert_eq!(cache.stats().hits, 7);

        let css = std::fs::read_to_string(&outputs[0].output_path).unwrap();
        assert!(css.contains(&outputs[0].class_map.as_ref().unwrap()["title"]));
        assert_eq!(cache.lock_count(), 0);
    }

    #[tokio::test]
    async fn test_partial_change_rerenders_unchanged_importer() {
        let (project, temp) = (tempdir().unwrap(), tempdir().unwrap());
        let cache = cache(&project, &temp);
        let root = project.path();
        std::fs::write(root.join("_vars.scss"), "$m: 1px;").unwrap();
        let path = root.join("main.scss");
        let source = "@import './vars';\n.a { margin: $m; }";

        let first = cache.render(&path, source).await.unwrap();
        assert_eq!(first.dependencies.len(), 1);
        let again = cache.render(&path, source).await.unwrap();
        assert_eq!(first, again);
        assert_eq!(cache.stats().hits, 1);

        std::fs::write(root.join("_vars.scss"), "$m: 2px;").unwrap();
        let second = cache.render(&path, source).await.unwrap();
        let css = std::fs::read_to_string(&second.output_path).unwrap();
        assert!(css.contains("2px"), "got {css}");
        assert_eq!(cache.stats().misses, 2);
    }

    #[tokio::test]
    async fn test_deleted_partial_is_a_miss() {
        let (project, temp) = (tempdir().unwrap(), tempdir().unwrap());
        let cache = cache(&project, &temp);
        let root = project.path();
        std::fs::write(root.join("_vars.scss"), "$m: 1px;").unwrap();
        let path = root.join("main.scss");
        let source = "@import './vars';\n.a { margin: $m; }";

        cache.render(&path, source).await.unwrap();
        std::fs::remove_file(root.join("_vars.scss")).unwrap();
        assert!(cache.render(&path, source).await.is_err());
        assert_eq!(cache.stats().hits, 0);
    }

    #[tokio::test]
    async fn test_locks_are_released_after_render() {
        let (project, temp) = (tempdir().unwrap(), tempdir().unwrap());
        let cache = cache(&project, &temp);

        for name in ["a.css", "b.css", "c.scss"] {
            let path = project.path().join(name);
            cache.render(&path, ".a { color: red; }").await.unwrap();
        }
        assert!(cache.render(&project.path().join("d.scss"), ".a { color: $x; }").await.is_err());
        assert_eq!(cache.lock_count(), 0);
    }
}
