//! Wiring: configuration to resolver, caches, style engine, plugin, and
//! build engine.
//!
//! A [`Pipeline`] lives for the whole process. Its caches persist across
//! rebuilds, and rendered stylesheets go to a private temporary directory
//! that is removed when the pipeline is dropped.

use crate::adapter::StylePlugin;
use crate::config::PipelineConfig;
use crate::css::{RenderCache, RenderOutput, StyleEngine};
use crate::engine::{BuildEngine, BuildMessage, BuildOptions, BuildReport, WatchSession};
use crate::error::{Error, Result};
use crate::plugin::PluginContainer;
use crate::resolver::{normalize, PathResolver, ResolutionCache};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tempfile::TempDir;
use tracing::{debug, info, warn};

/// Prefix of the temporary directory holding rendered stylesheets.
pub const TEMP_PREFIX: &str = "stylepipe-";

#[derive(Debug)]
pub struct Pipeline {
    config: PipelineConfig,
    temp_dir: TempDir,
    resolutions: Arc<ResolutionCache>,
    renders: Arc<RenderCache>,
    engine: BuildEngine,
}

impl Pipeline {
    /// Set up a pipeline for `config`.
    ///
    /// The project root is canonicalized so that rendered outputs mirror the
    /// source tree even when the root is reached through a symlink.
    pub fn new(mut config: PipelineConfig) -> Result<Self> {
        config.root = dunce::canonicalize(&config.root).unwrap_or_else(|_| normalize(&config.root));

        let temp_dir = tempfile::Builder::new().prefix(TEMP_PREFIX).tempdir()?;
        let temp_root =
            dunce::canonicalize(temp_dir.path()).unwrap_or_else(|_| temp_dir.path().to_path_buf());

        let resolver = PathResolver::new(&config);
        let resolutions = Arc::new(ResolutionCache::new(resolver.clone(), config.cache));
        let styles = Arc::new(StyleEngine::new(
            &config,
            temp_root,
            Arc::clone(&resolutions),
        ));
        let renders = Arc::new(RenderCache::new(styles, config.cache));

        let mut plugins = PluginContainer::new();
        plugins.add(Arc::new(StylePlugin::new(
            &config,
            Arc::clone(&resolutions),
            Arc::clone(&renders),
        )));

        let engine = BuildEngine::new(BuildOptions::from_config(&config), plugins, resolver);

        debug!(
            root = %config.root.display(),
            temp = %temp_dir.path().display(),
            "pipeline ready"
        );

        Ok(Self {
            config,
            temp_dir,
            resolutions,
            renders,
            engine,
        })
    }

    #[must_use]
    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Directory holding rendered stylesheets.
    #[must_use]
    pub fn temp_dir(&self) -> &Path {
        self.temp_dir.path()
    }

    #[must_use]
    pub fn resolutions(&self) -> &Arc<ResolutionCache> {
        &self.resolutions
    }

    #[must_use]
    pub fn renders(&self) -> &Arc<RenderCache> {
        &self.renders
    }

    /// Build once, keeping outputs in memory.
    pub async fn build(&self) -> BuildReport {
        self.engine.build().await
    }

    /// Build once and write the outputs to the output directory.
    ///
    /// A failed write is reported like any other build error.
    pub async fn build_and_write(&self) -> BuildReport {
        let mut report = self.build().await;
        if report.is_ok() {
            if let Err(err) = report.write() {
                report.errors.push(BuildMessage::from_error(&err, None, None));
            }
        }
        report
    }

    /// Build, then rebuild whenever a watched file changes.
    ///
    /// `on_report` sees every build, failed ones included; a failure never
    /// ends the loop. Returns when the session's channel closes.
    pub async fn watch<F>(&self, session: &mut WatchSession, mut on_report: F)
    where
        F: FnMut(&BuildReport),
    {
        let mut report = self.build_and_write().await;
        on_report(&report);

        while let Some(changed) = session.next_batch(&report.watch_files).await {
            info!(changed = changed.len(), "rebuilding");
            report = self.build_and_write().await;
            if !report.is_ok() {
                warn!(errors = report.errors.len(), "rebuild failed");
            }
            on_report(&report);
        }
    }

    /// Render a single stylesheet through the caches.
    pub async fn render_file(&self, path: &Path) -> Result<RenderOutput> {
        let path = self.config.abs(path);
        let path = dunce::canonicalize(&path).map_err(|source| match source.kind() {
            std::io::ErrorKind::NotFound => Error::ResolutionNotFound {
                specifier: path.display().to_string(),
                from: self.config.root.clone(),
                candidate: Some(path.clone()),
            },
            _ => Error::Io(source),
        })?;
        let content = tokio::fs::read_to_string(&path).await?;
        self.renders.render(&path, &content).await
    }

    /// Resolve `specifier` as if imported from `from_dir`.
    #[must_use]
    pub fn resolve(&self, specifier: &str, from_dir: &Path) -> PathBuf {
        self.resolutions.get(specifier, &self.config.abs(from_dir))
    }
}
