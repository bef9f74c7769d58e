//! Reference build engine.
//!
//! Walks the module graph from the entry points, asking the plugins to
//! resolve and load each module before falling back to plain file
//! resolution and extension-based loaders. Each wave of newly discovered
//! modules is loaded concurrently.
//!
//! The engine does not transpile, link, or tree-shake. Script modules are
//! concatenated in dependency order into `<entry>.js` and stylesheets into
//! `<entry>.css`; `file`-loader assets are copied under a content-hashed name.
//!
//! Every error is attached to the importing file and line, and traversal
//! continues so a single build reports all of them. Nothing is written
//! unless the build is error-free.

mod emit;
mod loader;
mod resolve;
mod watch;

pub use emit::OutputFile;
pub use loader::{apply_define, builtin_loaders, loader_for, Loader};
pub use resolve::{resolve_file, strip_query, RESOLVE_EXTENSIONS};
pub use watch::WatchSession;

use crate::config::PipelineConfig;
use crate::error::{Error, Result};
use crate::imports::{scan_css, scan_js, ImportKind, ImportRecord};
use crate::plugin::{LoadArgs, LoadResult, PluginContainer, ResolveArgs, ResolveResult, FILE_NAMESPACE};
use crate::resolver::{normalize, PathResolver};
use futures::future::join_all;
use serde::Serialize;
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use stylepipe_util::fs::atomic_write;
use tracing::{debug, info};

/// What to build.
#[derive(Debug, Clone)]
pub struct BuildOptions {
    pub root: PathBuf,
    pub entry_points: Vec<PathBuf>,
    pub outdir: PathBuf,
    pub define: BTreeMap<String, String>,
    /// Built-in loaders merged with configured ones (configured wins).
    pub loaders: BTreeMap<String, Loader>,
}

impl BuildOptions {
    #[must_use]
    pub fn from_config(config: &PipelineConfig) -> Self {
        let mut loaders = builtin_loaders();
        loaders.extend(config.loaders.iter().map(|(k, v)| (k.clone(), *v)));
        Self {
            root: config.root.clone(),
            entry_points: config.entry_points.iter().map(|e| config.abs(e)).collect(),
            outdir: config.outdir_abs(),
            define: config.define.clone(),
            loaders,
        }
    }
}

/// A diagnostic tied to the import that caused it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BuildMessage {
    /// Stable error code (see [`crate::error::codes`]).
    pub code: String,
    pub text: String,
    /// File containing the failing import.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub importer: Option<PathBuf>,
    /// 1-indexed line of the failing import.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub line: Option<u32>,
}

impl BuildMessage {
    #[must_use]
    pub fn from_error(err: &Error, importer: Option<&Path>, line: Option<u32>) -> Self {
        Self {
            code: err.code().to_string(),
            text: err.to_string(),
            importer: importer.map(Path::to_path_buf),
            line,
        }
    }
}

impl std::fmt::Display for BuildMessage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match (&self.importer, self.line) {
            (Some(importer), Some(line)) => {
                write!(f, "{}:{line}: {} [{}]", importer.display(), self.text, self.code)
            }
            (Some(importer), None) => {
                write!(f, "{}: {} [{}]", importer.display(), self.text, self.code)
            }
            _ => write!(f, "{} [{}]", self.text, self.code),
        }
    }
}

/// Outcome of one build.
#[derive(Debug, Clone, Default)]
pub struct BuildReport {
    /// Output files, in memory. Empty when there are errors.
    pub outputs: Vec<OutputFile>,
    pub errors: Vec<BuildMessage>,
    pub warnings: Vec<BuildMessage>,
    /// Every file the build read or depends on.
    pub watch_files: BTreeSet<PathBuf>,
    pub duration: Duration,
}

impl BuildReport {
    #[must_use]
    pub fn is_ok(&self) -> bool {
        self.errors.is_empty()
    }

    /// Output whose file name is `name`.
    #[must_use]
    pub fn output(&self, name: &str) -> Option<&OutputFile> {
        self.outputs
            .iter()
            .find(|o| o.path.file_name().is_some_and(|n| n == name))
    }

    /// Write every output to disk.
    pub fn write(&self) -> Result<()> {
        for output in &self.outputs {
            atomic_write(&output.path, &output.contents)?;
        }
        Ok(())
    }
}

/// Identity of a module in the graph.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ModuleKey {
    pub namespace: String,
    pub path: PathBuf,
}

impl ModuleKey {
    #[must_use]
    pub fn file(path: impl Into<PathBuf>) -> Self {
        Self {
            namespace: FILE_NAMESPACE.to_string(),
            path: path.into(),
        }
    }

    fn from_resolved(result: &ResolveResult) -> Self {
        Self {
            namespace: result.namespace.clone(),
            path: result.path.clone(),
        }
    }

    /// `path` for file modules, `namespace:path` otherwise.
    #[must_use]
    pub fn display(&self, root: &Path) -> String {
        let rel = self.path.strip_prefix(root).unwrap_or(&self.path);
        let rel = rel.to_string_lossy().replace('\\', "/");
        if self.namespace == FILE_NAMESPACE {
            rel
        } else {
            format!("{}:{rel}", self.namespace)
        }
    }
}

/// An import and the module it resolved to.
#[derive(Debug, Clone)]
pub(crate) struct Edge {
    pub record: ImportRecord,
    /// `None` when resolution failed (the error is in the report).
    pub target: Option<ModuleKey>,
}

/// A loaded module.
#[derive(Debug, Clone)]
pub(crate) struct Module {
    pub key: ModuleKey,
    pub loader: Loader,
    pub contents: String,
    pub edges: Vec<Edge>,
    /// Generated-from file reported by the loading plugin.
    pub source_path: Option<PathBuf>,
}

impl Module {
    /// Name used in output comments, relative to `root`.
    pub fn label(&self, root: &Path) -> String {
        match &self.source_path {
            Some(source) => ModuleKey::file(source.as_path()).display(root),
            None => self.key.display(root),
        }
    }
}

/// A module waiting to be loaded, with where it was first seen.
#[derive(Debug, Clone)]
struct Pending {
    key: ModuleKey,
    plugin_data: Option<Value>,
    importer: Option<PathBuf>,
    line: Option<u32>,
}

/// Everything learned from loading one module.
#[derive(Debug, Default)]
struct Visit {
    module: Option<Module>,
    discovered: Vec<Pending>,
    errors: Vec<BuildMessage>,
    watch_files: Vec<PathBuf>,
}

impl Visit {
    fn fail(err: &Error, importer: Option<&Path>, line: Option<u32>) -> Self {
        let mut visit = Self::default();
        visit.record_error(err, importer, line);
        visit
    }

    fn record_error(&mut self, err: &Error, importer: Option<&Path>, line: Option<u32>) {
        if let Some(path) = err.path() {
            // Keep watching a file that failed so fixing it triggers a rebuild.
            self.watch_files.push(path.to_path_buf());
        }
        self.errors.push(BuildMessage::from_error(err, importer, line));
    }
}

/// The reference engine.
#[derive(Debug)]
pub struct BuildEngine {
    options: BuildOptions,
    plugins: PluginContainer,
    resolver: PathResolver,
}

impl BuildEngine {
    #[must_use]
    pub fn new(options: BuildOptions, plugins: PluginContainer, resolver: PathResolver) -> Self {
        Self {
            options,
            plugins,
            resolver,
        }
    }

    #[must_use]
    pub fn options(&self) -> &BuildOptions {
        &self.options
    }

    /// Run one build. Outputs are returned in memory.
    pub async fn build(&self) -> BuildReport {
        let started = Instant::now();
        let mut report = BuildReport::default();
        let mut modules: BTreeMap<ModuleKey, Module> = BTreeMap::new();
        let mut entries = Vec::new();
        let mut pending = Vec::new();

        // Entries go through the plugins too, so a stylesheet can be an entry.
        for entry in &self.options.entry_points {
            let args = ResolveArgs {
                path: normalize(entry).to_string_lossy().into_owned(),
                importer: self.options.root.clone(),
                namespace: FILE_NAMESPACE.to_string(),
                resolve_dir: self.options.root.clone(),
                kind: ImportKind::EntryPoint,
                plugin_data: None,
            };
            match self.resolve(args).await {
                Ok(resolved) => {
                    let key = ModuleKey::from_resolved(&resolved);
                    report.watch_files.extend(resolved.watch_files);
                    entries.push(key.clone());
                    pending.push(Pending {
                        key,
                        plugin_data: resolved.plugin_data,
                        importer: None,
                        line: None,
                    });
                }
                Err(err) => {
                    if let Some(path) = err.path() {
                        report.watch_files.insert(path.to_path_buf());
                    }
                    report.errors.push(BuildMessage::from_error(&err, None, None));
                }
            }
        }

        let mut seen: HashSet<ModuleKey> = pending.iter().map(|p| p.key.clone()).collect();

        while !pending.is_empty() {
            let wave = std::mem::take(&mut pending);
            debug!(modules = wave.len(), "loading wave");
            let visits = join_all(wave.into_iter().map(|p| self.visit(p))).await;

            for visit in visits {
                report.errors.extend(visit.errors);
                report.watch_files.extend(visit.watch_files);
                for next in visit.discovered {
                    if seen.insert(next.key.clone()) {
                        pending.push(next);
                    }
                }
                if let Some(module) = visit.module {
                    modules.insert(module.key.clone(), module);
                }
            }
        }

        if report.errors.is_empty() {
            match emit::emit(&self.options, &entries, &modules) {
                Ok(outputs) => report.outputs = outputs,
                Err(err) => report.errors.push(BuildMessage::from_error(&err, None, None)),
            }
        }

        report.duration = started.elapsed();
        info!(
            modules = modules.len(),
            outputs = report.outputs.len(),
            errors = report.errors.len(),
            elapsed_ms = u64::try_from(report.duration.as_millis()).unwrap_or(u64::MAX),
            "build finished"
        );
        report
    }

    /// Load one module and resolve all of its imports.
    async fn visit(&self, pending: Pending) -> Visit {
        let Pending {
            key,
            plugin_data,
            importer,
            line,
        } = pending;

        let loaded = match self.load(&key, plugin_data.clone()).await {
            Ok(loaded) => loaded,
            Err(err) => return Visit::fail(&err, importer.as_deref(), line),
        };

        let mut visit = Visit::default();
        if key.namespace == FILE_NAMESPACE {
            visit.watch_files.push(key.path.clone());
        }
        visit.watch_files.extend(loaded.watch_files.iter().cloned());

        let resolve_dir = loaded
            .resolve_dir
            .clone()
            .or_else(|| key.path.parent().map(Path::to_path_buf))
            .unwrap_or_else(|| self.options.root.clone());

        let records = match loaded.loader {
            Loader::Js => scan_js(&loaded.contents),
            Loader::Css => scan_css(&loaded.contents),
            Loader::Json | Loader::Text | Loader::File => Vec::new(),
        };

        let resolutions = join_all(records.iter().map(|record| {
            let args = ResolveArgs {
                path: record.specifier.clone(),
                importer: key.path.clone(),
                namespace: key.namespace.clone(),
                resolve_dir: resolve_dir.clone(),
                kind: record.kind,
                plugin_data: plugin_data.clone(),
            };
            async move { self.resolve(args).await }
        }))
        .await;

        let mut edges = Vec::with_capacity(records.len());
        for (record, resolution) in records.into_iter().zip(resolutions) {
            match resolution {
                Ok(resolved) => {
                    let target = ModuleKey::from_resolved(&resolved);
                    visit.watch_files.extend(resolved.watch_files);
                    visit.discovered.push(Pending {
                        key: target.clone(),
                        plugin_data: resolved.plugin_data,
                        importer: Some(key.path.clone()),
                        line: Some(record.line),
                    });
                    edges.push(Edge {
                        record,
                        target: Some(target),
                    });
                }
                Err(err) => {
                    visit.record_error(&err, Some(&key.path), Some(record.line));
                    edges.push(Edge {
                        record,
                        target: None,
                    });
                }
            }
        }

        visit.module = Some(Module {
            key,
            loader: loaded.loader,
            contents: loaded.contents,
            edges,
            source_path: loaded.source_path,
        });
        visit
    }

    async fn resolve(&self, args: ResolveArgs) -> Result<ResolveResult> {
        if let Some(result) = self.plugins.resolve(&args).await? {
            return Ok(result);
        }

        resolve_file(&self.resolver, &args.path, &args.resolve_dir)
            .map(ResolveResult::file)
            .ok_or_else(|| Error::ResolutionNotFound {
                specifier: args.path.clone(),
                from: args.importer.clone(),
                candidate: Some(
                    self.resolver
                        .resolve(strip_query(&args.path), &args.resolve_dir),
                ),
            })
    }

    async fn load(&self, key: &ModuleKey, plugin_data: Option<Value>) -> Result<LoadResult> {
        let args = LoadArgs {
            path: key.path.clone(),
            namespace: key.namespace.clone(),
            plugin_data,
        };
        if let Some(result) = self.plugins.load(&args).await? {
            return Ok(result);
        }

        if key.namespace != FILE_NAMESPACE {
            return Err(Error::other(format!(
                "no plugin loaded '{}' in namespace '{}'",
                key.path.display(),
                key.namespace
            )));
        }

        let loader = loader_for(&key.path, &self.options.loaders).ok_or_else(|| {
            Error::LoaderMissing {
                path: key.path.clone(),
            }
        })?;

        let contents = if loader.is_textual() {
            let bytes = tokio::fs::read(&key.path).await?;
            String::from_utf8_lossy(&bytes).into_owned()
        } else {
            String::new()
        };

        Ok(LoadResult::new(contents, loader))
    }
}
