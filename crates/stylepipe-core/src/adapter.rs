//! The stylesheet plugin: bridges the build engine's hooks to the
//! resolution cache, the render cache, and the synthetic module generator.
//!
//! For an import of a stylesheet the plugin resolves it, reads the current
//! source, and renders it through the cache. Module stylesheets come back as
//! a synthetic script in the `style-module` namespace; plain ones come back
//! as the rendered CSS file for the engine's own CSS loader.

use crate::config::{AssetOverride, PipelineConfig};
use crate::css::{synthesize, ClassMap, RenderCache};
use crate::engine::{strip_query, Loader};
use crate::error::{Error, Result};
use crate::plugin::{
    HookFuture, LoadArgs, LoadResult, Plugin, ResolveArgs, ResolveResult, FILE_NAMESPACE,
    STYLE_MODULE_NAMESPACE,
};
use crate::resolver::{normalize, ResolutionCache};
use serde_json::{json, Value};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::debug;

const ORIGINAL_PATH: &str = "originalPath";
const CLASSES: &str = "classes";

/// Resolve/load hooks for stylesheets and fixed asset locations.
#[derive(Debug)]
pub struct StylePlugin {
    resolutions: Arc<ResolutionCache>,
    renders: Arc<RenderCache>,
    extensions: Vec<String>,
    /// `(specifier, absolute target)` pairs.
    overrides: Vec<(String, PathBuf)>,
}

impl StylePlugin {
    #[must_use]
    pub fn new(
        config: &PipelineConfig,
        resolutions: Arc<ResolutionCache>,
        renders: Arc<RenderCache>,
    ) -> Self {
        let extensions = config
            .stylesheet_extensions
            .iter()
            .map(|ext| ext.trim_start_matches('.').to_ascii_lowercase())
            .collect();
        let overrides = config
            .asset_overrides
            .iter()
            .map(|AssetOverride { specifier, directory }| {
                let target = normalize(&config.abs(directory).join(specifier));
                (specifier.clone(), target)
            })
            .collect();

        Self {
            resolutions,
            renders,
            extensions,
            overrides,
        }
    }

    /// Whether `specifier` names a stylesheet this plugin handles.
    #[must_use]
    pub fn is_stylesheet(&self, specifier: &str) -> bool {
        Path::new(strip_query(specifier))
            .extension()
            .and_then(|e| e.to_str())
            .is_some_and(|ext| {
                self.extensions
                    .iter()
                    .any(|known| known.eq_ignore_ascii_case(ext))
            })
    }

    fn asset_override(&self, specifier: &str) -> Option<&Path> {
        self.overrides
            .iter()
            .find(|(spec, _)| spec == specifier)
            .map(|(_, target)| target.as_path())
    }

    async fn resolve_stylesheet(&self, args: &ResolveArgs) -> Result<ResolveResult> {
        let source = self
            .resolutions
            .get(strip_query(&args.path), &args.resolve_dir);

        let content = match tokio::fs::read_to_string(&source).await {
            Ok(content) => content,
            Err(err) if err.kind() == ErrorKind::NotFound => {
                return Err(Error::ResolutionNotFound {
                    specifier: args.path.clone(),
                    from: args.importer.clone(),
                    candidate: Some(source),
                });
            }
            Err(err) => return Err(err.into()),
        };

        let output = self.renders.render(&source, &content).await?;

        let mut watch_files = Vec::with_capacity(output.dependencies.len() + 1);
        watch_files.push(source.clone());
        watch_files.extend(output.dependencies.iter().cloned());

        let result = match &output.class_map {
            Some(classes) => ResolveResult::file(&output.output_path)
                .with_namespace(STYLE_MODULE_NAMESPACE)
                .with_plugin_data(json!({
                    "originalPath": source.to_string_lossy(),
                    "classes": classes,
                })),
            None => ResolveResult::file(&output.output_path)
                .with_plugin_data(json!({ "originalPath": source.to_string_lossy() })),
        };

        debug!(
            specifier = %args.path,
            source = %source.display(),
            namespace = %result.namespace,
            "resolved stylesheet"
        );
        Ok(result.with_watch_files(watch_files))
    }
}

/// `originalPath` from plugin data, if present.
fn original_path(data: Option<&Value>) -> Option<PathBuf> {
    data?.get(ORIGINAL_PATH)?.as_str().map(PathBuf::from)
}

impl Plugin for StylePlugin {
    fn name(&self) -> &str {
        "stylepipe"
    }

    fn resolve<'a>(&'a self, args: &'a ResolveArgs) -> HookFuture<'a, Option<ResolveResult>> {
        Box::pin(async move {
            if args.namespace == STYLE_MODULE_NAMESPACE {
                // The only import inside a synthetic module is its rendered CSS.
                let path = Path::new(&args.path);
                let path = if path.is_absolute() {
                    path.to_path_buf()
                } else {
                    normalize(&args.resolve_dir.join(path))
                };
                let mut result = ResolveResult::file(path);
                if let Some(original) = original_path(args.plugin_data.as_ref()) {
                    result = result
                        .with_plugin_data(json!({ "originalPath": original.to_string_lossy() }));
                }
                return Ok(Some(result));
            }

            if args.namespace != FILE_NAMESPACE {
                return Ok(None);
            }

            if let Some(target) = self.asset_override(&args.path) {
                return Ok(Some(ResolveResult::file(target)));
            }

            if self.is_stylesheet(&args.path) {
                return self.resolve_stylesheet(args).await.map(Some);
            }

            Ok(None)
        })
    }

    fn load<'a>(&'a self, args: &'a LoadArgs) -> HookFuture<'a, Option<LoadResult>> {
        Box::pin(async move {
            if args.namespace == STYLE_MODULE_NAMESPACE {
                let classes: ClassMap = args
                    .plugin_data
                    .as_ref()
                    .and_then(|data| data.get(CLASSES))
                    .map(|v| serde_json::from_value(v.clone()))
                    .transpose()
                    .map_err(|e| Error::other(format!("invalid class map: {e}")))?
                    .unwrap_or_default();
                let module = synthesize(&args.path, &classes);
                let mut result =
                    LoadResult::new(module.contents, Loader::Js).with_resolve_dir(module.resolve_dir);
                if let Some(original) = original_path(args.plugin_data.as_ref()) {
                    result = result.with_source_path(original);
                }
                return Ok(Some(result));
            }

            // Rendered CSS: keep its relative references pointing next to the
            // original source, not into the temp directory.
            if args.namespace == FILE_NAMESPACE {
                if let Some(original) = original_path(args.plugin_data.as_ref()) {
                    let contents = tokio::fs::read_to_string(&args.path).await?;
                    let dir = original.parent().map(Path::to_path_buf).unwrap_or_default();
                    return Ok(Some(
                        LoadResult::new(contents, Loader::Css)
                            .with_resolve_dir(dir)
                            .with_source_path(original),
                    ));
                }
            }

            Ok(None)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::CachePolicy;
    use crate::css::StyleEngine;
    use crate::error::codes;
    use crate::imports::ImportKind;
    use crate::resolver::PathResolver;
    use tempfile::{tempdir, TempDir};

    struct Fixture {
        root: PathBuf,
        _project: TempDir,
        _temp: TempDir,
        plugin: StylePlugin,
    }

    fn write(path: &Path, contents: &str) {
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(path, contents).unwrap();
    }

    fn fixture(extensions: &[&str]) -> Fixture {
        let project = tempdir().unwrap();
        let temp = tempdir().unwrap();
        let root = dunce::canonicalize(project.path()).unwrap();
        let mut config = PipelineConfig::new(&root);
        config.stylesheet_extensions = extensions.iter().map(|e| (*e).to_string()).collect();

        let resolutions = Arc::new(ResolutionCache::new(
            PathResolver::new(&config),
            CachePolicy::Unbounded,
        ));
        let engine = Arc::new(StyleEngine::new(&config, temp.path(), Arc::clone(&resolutions)));
        let renders = Arc::new(RenderCache::new(engine, CachePolicy::Unbounded));
        let plugin = StylePlugin::new(&config, resolutions, renders);

        Fixture {
            root,
            _project: project,
            _temp: temp,
            plugin,
        }
    }

    fn args(specifier: &str, importer: &Path) -> ResolveArgs {
        ResolveArgs {
            path: specifier.to_string(),
            importer: importer.to_path_buf(),
            namespace: FILE_NAMESPACE.to_string(),
            resolve_dir: importer.parent().unwrap().to_path_buf(),
            kind: ImportKind::Import,
            plugin_data: None,
        }
    }

    #[tokio::test]
    async fn test_module_stylesheet_becomes_synthetic_module() {
        let fx = fixture(&["css", "scss"]);
        let components = fx.root.join("src/components");
        write(
            &components.join("foo.module.scss"),
            "$c: red;\n.title { color: $c; }\n",
        );
        let importer = components.join("Foo.tsx");

        let resolved = fx
            .plugin
            .resolve(&args("./foo.module.scss", &importer))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(resolved.namespace, STYLE_MODULE_NAMESPACE);
        assert!(resolved
            .watch_files
            .contains(&components.join("foo.module.scss")));

        let loaded = fx
            .plugin
            .load(&LoadArgs {
                path: resolved.path.clone(),
                namespace: resolved.namespace.clone(),
                plugin_data: resolved.plugin_data.clone(),
            })
            .await
            .unwrap()
            .unwrap();
        assert_eq!(loaded.loader, Loader::Js);
        assert_eq!(loaded.resolve_dir.as_deref(), resolved.path.parent());

        let start = loaded.contents.find("export default ").unwrap() + "export default ".len();
        let json = loaded.contents[start..].trim_end().trim_end_matches(';');
        let classes: ClassMap = serde_json::from_str(json).unwrap();
        let scoped = &classes["title"];
        assert!(scoped.starts_with("title__"), "{scoped}");
        assert_ne!(scoped, "title__");

        let css = std::fs::read_to_string(&resolved.path).unwrap();
        assert!(css.contains(&format!(".{scoped}")), "{css}");
    }

    #[tokio::test]
    async fn test_alias_resolves_from_any_directory() {
        let fx = fixture(&["css", "scss"]);
        write(
            &fx.root.join("client/wildcard/components/Button.scss"),
            ".btn { margin: 1px; }\n",
        );

        let from_a = fx.root.join("client/web/src/a/A.tsx");
        let from_b = fx.root.join("client/shared/src/deep/nested/B.tsx");
        let a = fx
            .plugin
            .resolve(&args("wildcard/components/Button.scss", &from_a))
            .await
            .unwrap()
            .unwrap();
        let b = fx
            .plugin
            .resolve(&args("wildcard/components/Button.scss", &from_b))
            .await
            .unwrap()
            .unwrap();

        assert_eq!(a.namespace, FILE_NAMESPACE);
        assert_eq!(a.path, b.path);
        assert_eq!(
            original_path(a.plugin_data.as_ref()),
            Some(fx.root.join("client/wildcard/components/Button.scss"))
        );
    }

    #[tokio::test]
    async fn test_plain_stylesheet_loads_against_source_dir() {
        let fx = fixture(&["css", "scss"]);
        let src = fx.root.join("src");
        write(&src.join("app.css"), ".app { margin: 0; }\n");

        let resolved = fx
            .plugin
            .resolve(&args("./app.css", &src.join("main.tsx")))
            .await
            .unwrap()
            .unwrap();
        let loaded = fx
            .plugin
            .load(&LoadArgs {
                path: resolved.path.clone(),
                namespace: resolved.namespace.clone(),
                plugin_data: resolved.plugin_data.clone(),
            })
            .await
            .unwrap()
            .unwrap();
        assert_eq!(loaded.loader, Loader::Css);
        assert_eq!(loaded.resolve_dir, Some(src));
        assert!(loaded.contents.contains(".app"));
    }

    #[tokio::test]
    async fn test_unknown_extension_is_unsupported() {
        let fx = fixture(&["css", "scss", "xyz"]);
        let src = fx.root.join("src");
        write(&src.join("weird.xyz"), "whatever");

        let err = fx
            .plugin
            .resolve(&args("./weird.xyz", &src.join("main.tsx")))
            .await
            .unwrap_err();
        assert_eq!(err.code(), codes::UNSUPPORTED_FORMAT);
        assert_eq!(err.path(), Some(src.join("weird.xyz").as_path()));
    }

    #[tokio::test]
    async fn test_missing_stylesheet_is_not_found() {
        let fx = fixture(&["css", "scss"]);
        let importer = fx.root.join("src/main.tsx");
        let err = fx
            .plugin
            .resolve(&args("./gone.scss", &importer))
            .await
            .unwrap_err();
        assert_eq!(err.code(), codes::RESOLUTION_NOT_FOUND);
        assert_eq!(err.path(), Some(fx.root.join("src/gone.scss").as_path()));
    }

    #[tokio::test]
    async fn test_asset_overrides_and_passthrough() {
        let fx = fixture(&["css", "scss"]);
        let importer = fx.root.join("client/web/src/global.scss");

        let font = fx
            .plugin
            .resolve(&args("./codicon.ttf", &importer))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(
            font.path,
            fx.root
                .join("node_modules/monaco-editor/esm/vs/base/browser/ui/codicons/codicon/codicon.ttf")
        );

        let sprite = fx
            .plugin
            .resolve(&args("img/bg-sprinkles-2x.png", &importer))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(sprite.path, fx.root.join("ui/assets/img/bg-sprinkles-2x.png"));

        assert!(fx
            .plugin
            .resolve(&args("./other.ttf", &importer))
            .await
            .unwrap()
            .is_none());
        assert!(fx
            .plugin
            .resolve(&args("./util.ts", &importer))
            .await
            .unwrap()
            .is_none());
    }

    #[test]
    fn test_is_stylesheet_ignores_query_and_case() {
        let fx = fixture(&[".css", "SCSS"]);
        assert!(fx.plugin.is_stylesheet("./a.css?inline"));
        assert!(fx.plugin.is_stylesheet("./b.Scss"));
        assert!(!fx.plugin.is_stylesheet("./c.sass"));
        assert!(!fx.plugin.is_stylesheet("./scss"));
    }
}
