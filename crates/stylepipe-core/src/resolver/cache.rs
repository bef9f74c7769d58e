//! Memoized resolution keyed by `(specifier, requesting directory)`.

use super::PathResolver;
use crate::cache::{CachePolicy, MemoCache};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::trace;

/// Cache key for a resolution request.
///
/// The two parts are joined with a NUL byte, which cannot appear in a path
/// component, so distinct pairs never collide.
#[must_use]
pub fn resolution_key(specifier: &str, from_dir: &Path) -> String {
    format!("{specifier}\0{}", from_dir.display())
}

/// Hit/miss counters, mainly for logging and tests.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ResolutionStats {
    pub hits: u64,
    pub misses: u64,
    pub entries: usize,
}

/// Resolver front-end that remembers every answer it gives.
///
/// Shared across all builds in a process. A cached answer is never
/// recomputed, so a path that later starts or stops existing keeps its first
/// resolution until [`ResolutionCache::clear`] is called.
#[derive(Debug)]
pub struct ResolutionCache {
    resolver: PathResolver,
    entries: MemoCache<String, PathBuf>,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl ResolutionCache {
    #[must_use]
    pub fn new(resolver: PathResolver, policy: CachePolicy) -> Self {
        Self {
            resolver,
            entries: MemoCache::new(policy),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    /// Resolve through the cache. Same answer as [`PathResolver::resolve`].
    pub fn get(&self, specifier: &str, from_dir: &Path) -> PathBuf {
        let key = resolution_key(specifier, from_dir);
        if let Some(hit) = self.entries.get(key.as_str()) {
            self.hits.fetch_add(1, Ordering::Relaxed);
            return hit;
        }

        self.misses.fetch_add(1, Ordering::Relaxed);
        let resolved = self.resolver.resolve(specifier, from_dir);
        trace!(specifier, from = %from_dir.display(), resolved = %resolved.display(), "resolved");
        self.entries.insert(key, resolved.clone());
        resolved
    }

    #[must_use]
    pub fn resolver(&self) -> &PathResolver {
        &self.resolver
    }

    #[must_use]
    pub fn stats(&self) -> ResolutionStats {
        ResolutionStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            entries: self.entries.len(),
        }
    }

    pub fn clear(&self) {
        self.entries.clear();
    }
}
