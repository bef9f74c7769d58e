//! Plugin hooks for the build engine.
//!
//! A plugin can answer two questions for the engine:
//! - **resolve**: where does this import point, and in which namespace?
//! - **load**: what are the contents of this module, and how are they parsed?
//!
//! Hooks run in registration order; the first plugin returning `Some` wins,
//! and `None` falls through to the next plugin and finally to the engine's
//! built-in file resolution and loaders.
//!
//! ## Example
//!
//! ```ignore
//! use stylepipe_core::plugin::{Plugin, ResolveArgs, ResolveResult, HookFuture};
//!
//! struct Externals;
//!
//! impl Plugin for Externals {
//!     fn name(&self) -> &str { "externals" }
//!
//!     fn resolve<'a>(&'a self, args: &'a ResolveArgs) -> HookFuture<'a, Option<ResolveResult>> {
//!         Box::pin(async move {
//!             Ok((args.path == "react").then(|| ResolveResult::file("/vendor/react.js")))
//!         })
//!     }
//! }
//! ```

use crate::engine::Loader;
use crate::error::Result;
use crate::imports::ImportKind;
use futures::future::BoxFuture;
use serde_json::Value;
use std::path::PathBuf;
use std::sync::Arc;

/// Namespace of modules backed by real files.
pub const FILE_NAMESPACE: &str = "file";

/// Namespace of synthetic modules generated for module stylesheets.
pub const STYLE_MODULE_NAMESPACE: &str = "style-module";

/// Future returned by a hook.
pub type HookFuture<'a, T> = BoxFuture<'a, Result<T>>;

/// Input to a resolve hook.
#[derive(Debug, Clone)]
pub struct ResolveArgs {
    /// The specifier as written in the importing module.
    pub path: String,
    /// Module containing the import.
    pub importer: PathBuf,
    /// Namespace of the importing module.
    pub namespace: String,
    /// Directory relative specifiers resolve against.
    pub resolve_dir: PathBuf,
    pub kind: ImportKind,
    /// Data attached to the importing module by the plugin that resolved it.
    pub plugin_data: Option<Value>,
}

/// Output of a resolve hook.
#[derive(Debug, Clone, PartialEq)]
pub struct ResolveResult {
    pub path: PathBuf,
    pub namespace: String,
    /// Passed back verbatim to the load hook of this module.
    pub plugin_data: Option<Value>,
    /// Extra files whose change should trigger a rebuild.
    pub watch_files: Vec<PathBuf>,
}

impl ResolveResult {
    /// A plain file-namespace result.
    pub fn file(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            namespace: FILE_NAMESPACE.to_string(),
            plugin_data: None,
            watch_files: Vec::new(),
        }
    }

    #[must_use]
    pub fn with_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = namespace.into();
        self
    }

    #[must_use]
    pub fn with_plugin_data(mut self, data: Value) -> Self {
        self.plugin_data = Some(data);
        self
    }

    #[must_use]
    pub fn with_watch_files(mut self, files: Vec<PathBuf>) -> Self {
        self.watch_files = files;
        self
    }
}

/// Input to a load hook.
#[derive(Debug, Clone)]
pub struct LoadArgs {
    pub path: PathBuf,
    pub namespace: String,
    pub plugin_data: Option<Value>,
}

/// Output of a load hook.
#[derive(Debug, Clone, PartialEq)]
pub struct LoadResult {
    pub contents: String,
    pub loader: Loader,
    /// Directory the module's own imports resolve against. Defaults to the
    /// module path's parent.
    pub resolve_dir: Option<PathBuf>,
    /// File the contents were generated from, when that is not the module
    /// path itself. Output comments name this file instead.
    pub source_path: Option<PathBuf>,
    pub watch_files: Vec<PathBuf>,
}

impl LoadResult {
    pub fn new(contents: impl Into<String>, loader: Loader) -> Self {
        Self {
            contents: contents.into(),
            loader,
            resolve_dir: None,
            source_path: None,
            watch_files: Vec::new(),
        }
    }

    #[must_use]
    pub fn with_resolve_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.resolve_dir = Some(dir.into());
        self
    }

    #[must_use]
    pub fn with_source_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.source_path = Some(path.into());
        self
    }
}

/// The plugin trait. Both hooks default to "not mine".
pub trait Plugin: Send + Sync {
    /// Plugin name for logging and error messages.
    fn name(&self) -> &str;

    /// Resolve an import. Return `Ok(None)` to let the next plugin try.
    fn resolve<'a>(&'a self, _args: &'a ResolveArgs) -> HookFuture<'a, Option<ResolveResult>> {
        Box::pin(async { Ok(None) })
    }

    /// Load a module. Return `Ok(None)` to let the next plugin try.
    fn load<'a>(&'a self, _args: &'a LoadArgs) -> HookFuture<'a, Option<LoadResult>> {
        Box::pin(async { Ok(None) })
    }
}

/// Ordered list of plugins with first-match dispatch.
#[derive(Clone, Default)]
pub struct PluginContainer {
    plugins: Vec<Arc<dyn Plugin>>,
}

impl std::fmt::Debug for PluginContainer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list()
            .entries(self.plugins.iter().map(|p| p.name()))
            .finish()
    }
}

impl PluginContainer {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, plugin: Arc<dyn Plugin>) {
        self.plugins.push(plugin);
    }

    /// Ask each plugin in turn to resolve `args`.
    pub async fn resolve(&self, args: &ResolveArgs) -> Result<Option<ResolveResult>> {
        for plugin in &self.plugins {
            if let Some(result) = plugin.resolve(args).await? {
                return Ok(Some(result));
            }
        }
        Ok(None)
    }

    /// Ask each plugin in turn to load `args`.
    pub async fn load(&self, args: &LoadArgs) -> Result<Option<LoadResult>> {
        for plugin in &self.plugins {
            if let Some(result) = plugin.load(args).await? {
                return Ok(Some(result));
            }
        }
        Ok(None)
    }
}
