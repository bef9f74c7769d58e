//! Configuration for stylepipe.
//!
//! Two layers:
//! - [`Config`]: process-level settings owned by the CLI (cwd, logging).
//! - [`PipelineConfig`]: what to build and how to resolve/render it. Defaults
//!   reproduce the project's stock build; a `stylepipe.json` in the project
//!   root (or an explicit `--config` file) overrides any subset of fields.
//!
//! ```json
//! {
//!   "entryPoints": ["src/main.tsx"],
//!   "outdir": "dist",
//!   "aliases": { "wildcard/": "client/wildcard" },
//!   "loaders": { ".yaml": "text", ".png": "file" },
//!   "cache": { "kind": "lru", "capacity": 4096 }
//! }
//! ```

use crate::cache::CachePolicy;
use crate::engine::Loader;
use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

/// Config file looked up in the project root when no explicit path is given.
pub const CONFIG_FILE: &str = "stylepipe.json";

/// Port used by serve mode unless overridden.
pub const DEFAULT_PORT: u16 = 3099;

/// Define key that receives the external API base URL.
pub const API_URL_DEFINE: &str = "process.env.API_URL";

/// Runtime configuration for the stylepipe CLI.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Current working directory.
    pub cwd: PathBuf,

    /// Whether to emit JSON logs.
    pub json_logs: bool,

    /// Verbosity level (0 = INFO, 1 = DEBUG, 2+ = TRACE).
    pub verbosity: u8,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            cwd: std::env::current_dir().unwrap_or_else(|_| PathBuf::from(".")),
            json_logs: false,
            verbosity: 0,
        }
    }
}

impl Config {
    /// Create a new config with the given working directory.
    #[must_use]
    pub fn new(cwd: PathBuf) -> Self {
        Self {
            cwd,
            ..Default::default()
        }
    }

    /// Set verbosity level.
    #[must_use]
    pub fn with_verbosity(mut self, verbosity: u8) -> Self {
        self.verbosity = verbosity;
        self
    }

    /// Set JSON log output.
    #[must_use]
    pub fn with_json_logs(mut self, json: bool) -> Self {
        self.json_logs = json;
        self
    }
}

/// How a build is driven once configured.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BuildMode {
    /// Build once, write outputs, exit.
    Once,
    /// Build, then rebuild whenever a watched file changes.
    Watch,
    /// Serve outputs over HTTP, rebuilding on each request.
    Serve { port: u16 },
}

impl BuildMode {
    /// Pick a mode from the serve/watch toggles. Serving takes precedence.
    #[must_use]
    pub fn from_flags(serve: bool, watch: bool, port: u16) -> Self {
        if serve {
            Self::Serve { port }
        } else if watch {
            Self::Watch
        } else {
            Self::Once
        }
    }

    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Once => "once",
            Self::Watch => "watch",
            Self::Serve { .. } => "serve",
        }
    }
}

/// How local class names are exported from module stylesheets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum LocalsConvention {
    /// Export each class under its name as written.
    #[default]
    AsIs,
    /// Also export a camelCased alias for dashed names (`my-title` → `myTitle`).
    CamelCase,
}

/// A fixed redirect for an asset import whose natural resolution fails.
///
/// An import of exactly `specifier` resolves to `<root>/<directory>/<specifier>`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssetOverride {
    pub specifier: String,
    pub directory: PathBuf,
}

/// Build pipeline configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PipelineConfig {
    /// Project root. Every relative path below is resolved against it.
    #[serde(skip)]
    pub root: PathBuf,
    /// Entry points, one output bundle each.
    pub entry_points: Vec<PathBuf>,
    /// Output directory for bundles and copied assets.
    pub outdir: PathBuf,
    /// Internal source-tree prefixes and the directories they map to.
    pub aliases: BTreeMap<String, PathBuf>,
    /// Where external packages are installed.
    pub packages_dir: PathBuf,
    /// Build-time constant replacements for script modules.
    pub define: BTreeMap<String, String>,
    /// Loader per file extension (with leading dot).
    pub loaders: BTreeMap<String, Loader>,
    /// Fixed asset redirects.
    pub asset_overrides: Vec<AssetOverride>,
    /// Extensions (without dot) routed through the style pipeline.
    pub stylesheet_extensions: Vec<String>,
    /// Stem suffix that flags a stylesheet as a CSS module.
    pub module_marker: String,
    /// Pattern for scoped class names.
    pub scoped_name_pattern: String,
    /// Export naming for module class maps.
    pub locals_convention: LocalsConvention,
    /// Minify rendered CSS.
    pub minify: bool,
    /// Eviction policy for the resolution and render caches.
    pub cache: CachePolicy,
    /// Port for serve mode.
    pub port: u16,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        let mut aliases = BTreeMap::new();
        aliases.insert("wildcard/".to_string(), PathBuf::from("client/wildcard"));
        aliases.insert("shared/".to_string(), PathBuf::from("client/shared"));

        let mut define = BTreeMap::new();
        define.insert(
            "process.env.NODE_ENV".to_string(),
            "\"development\"".to_string(),
        );
        define.insert("global".to_string(), "window".to_string());
        define.insert(API_URL_DEFINE.to_string(), "undefined".to_string());

        let mut loaders = BTreeMap::new();
        loaders.insert(".yaml".to_string(), Loader::Text);
        loaders.insert(".ttf".to_string(), Loader::File);
        loaders.insert(".png".to_string(), Loader::File);

        Self {
            root: std::env::current_dir().unwrap_or_else(|_| PathBuf::from(".")),
            entry_points: vec![
                PathBuf::from("client/web/src/enterprise/main.tsx"),
                PathBuf::from("client/shared/src/api/extension/main.worker.ts"),
            ],
            outdir: PathBuf::from("ui/assets/esbuild"),
            aliases,
            packages_dir: PathBuf::from("node_modules"),
            define,
            loaders,
            asset_overrides: vec![
                AssetOverride {
                    specifier: "./codicon.ttf".to_string(),
                    directory: PathBuf::from(
                        "node_modules/monaco-editor/esm/vs/base/browser/ui/codicons/codicon",
                    ),
                },
                AssetOverride {
                    specifier: "img/bg-sprinkles-2x.png".to_string(),
                    directory: PathBuf::from("ui/assets"),
                },
            ],
            stylesheet_extensions: vec!["css".to_string(), "scss".to_string(), "sass".to_string()],
            module_marker: ".module".to_string(),
            scoped_name_pattern: "[local]__[hash]".to_string(),
            locals_convention: LocalsConvention::AsIs,
            minify: false,
            cache: CachePolicy::Unbounded,
            port: DEFAULT_PORT,
        }
    }
}

impl PipelineConfig {
    /// Default configuration rooted at `root`.
    #[must_use]
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            ..Default::default()
        }
    }

    /// Load configuration for `root`.
    ///
    /// If `config_path` is `Some`, that file must exist. Otherwise
    /// `stylepipe.json` is used when present, and defaults when not.
    pub fn load(root: &Path, config_path: Option<&Path>) -> Result<Self> {
        let path = match config_path {
            Some(p) => {
                let abs = if p.is_absolute() {
                    p.to_path_buf()
                } else {
                    root.join(p)
                };
                Some(abs)
            }
            None => Some(root.join(CONFIG_FILE)).filter(|p| p.is_file()),
        };

        let mut config = match path {
            Some(path) => {
                let source = std::fs::read_to_string(&path).map_err(|source| {
                    Error::ConfigRead {
                        path: path.clone(),
                        source,
                    }
                })?;
                serde_json::from_str::<Self>(&source)
                    .map_err(|source| Error::ConfigParse { path, source })?
            }
            None => Self::default(),
        };
        config.root = root.to_path_buf();
        Ok(config)
    }

    /// Inject the external API base URL as a build-time constant.
    #[must_use]
    pub fn with_api_url(mut self, url: Option<&str>) -> Self {
        let value = match url {
            Some(url) => serde_json::Value::String(url.to_string()).to_string(),
            None => "undefined".to_string(),
        };
        self.define.insert(API_URL_DEFINE.to_string(), value);
        self
    }

    /// Replace the entry points (ignored when `entries` is empty).
    #[must_use]
    pub fn with_entry_points(mut self, entries: Vec<PathBuf>) -> Self {
        if !entries.is_empty() {
            self.entry_points = entries;
        }
        self
    }

    /// Absolute form of a root-relative path.
    #[must_use]
    pub fn abs(&self, path: &Path) -> PathBuf {
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.root.join(path)
        }
    }

    /// Absolute output directory.
    #[must_use]
    pub fn outdir_abs(&self) -> PathBuf {
        self.abs(&self.outdir)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_mode_from_flags_serve_wins() {
        assert_eq!(
            BuildMode::from_flags(true, true, 3099),
            BuildMode::Serve { port: 3099 }
        );
        assert_eq!(BuildMode::from_flags(false, true, 1), BuildMode::Watch);
        assert_eq!(BuildMode::from_flags(false, false, 1), BuildMode::Once);
    }

    #[test]
    fn test_defaults_match_stock_build() {
        let config = PipelineConfig::new("/project");
        assert_eq!(config.port, DEFAULT_PORT);
        assert_eq!(config.outdir, PathBuf::from("ui/assets/esbuild"));
        assert_eq!(config.entry_points.len(), 2);
        assert_eq!(config.loaders.get(".yaml"), Some(&Loader::Text));
        assert_eq!(config.loaders.get(".ttf"), Some(&Loader::File));
        assert_eq!(
            config.aliases.get("wildcard/"),
            Some(&PathBuf::from("client/wildcard"))
        );
    }

    #[test]
    fn test_load_partial_file_keeps_defaults() {
        let dir = tempdir().unwrap();
        std::fs::write(
            dir.path().join(CONFIG_FILE),
            r#"{"outdir": "dist", "cache": {"kind": "lru", "capacity": 8}}"#,
        )
        .unwrap();

        let config = PipelineConfig::load(dir.path(), None).unwrap();
        assert_eq!(config.root, dir.path());
        assert_eq!(config.outdir, PathBuf::from("dist"));
        assert_eq!(config.cache, CachePolicy::Lru { capacity: 8 });
        assert_eq!(config.module_marker, ".module");
    }

    #[test]
    fn test_load_missing_explicit_file_errors() {
        let dir = tempdir().unwrap();
        let err = PipelineConfig::load(dir.path(), Some(Path::new("nope.json"))).unwrap_err();
        assert!(matches!(err, Error::ConfigRead { .. }));
    }

    #[test]
    fn test_load_malformed_file_errors() {
        let dir = tempdir().unwrap();
        std::fs::write(dir.path().join(CONFIG_FILE), "{ not json").unwrap();
        let err = PipelineConfig::load(dir.path(), None).unwrap_err();
        assert!(matches!(err, Error::ConfigParse { .. }));
    }

    #[test]
    fn test_api_url_is_json_encoded() {
        let config = PipelineConfig::new("/p").with_api_url(Some("https://api.example.com"));
        assert_eq!(
            config.define.get(API_URL_DEFINE).map(String::as_str),
            Some("\"https://api.example.com\"")
        );
    }
}
