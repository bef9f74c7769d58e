//! The style transform engine: preprocess, post-process, write.

use super::sass::{self, SassOptions};
use super::{process_css, ClassMap, CssOptions};
use crate::config::{LocalsConvention, PipelineConfig};
use crate::error::{Error, Result};
use crate::resolver::ResolutionCache;
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;
use stylepipe_util::fs::atomic_write;
use tracing::debug;

/// Directory under the temp root for sources outside the project root.
const EXTERNAL_DIR: &str = "__external__";

/// Supported stylesheet dialects.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StyleKind {
    /// Plain CSS, post-processed only.
    Css,
    /// SCSS syntax.
    Scss,
    /// Indented Sass syntax.
    Sass,
}

impl StyleKind {
    #[must_use]
    pub fn from_path(path: &Path) -> Option<Self> {
        match path.extension()?.to_str()?.to_ascii_lowercase().as_str() {
            "css" => Some(Self::Css),
            "scss" => Some(Self::Scss),
            "sass" => Some(Self::Sass),
            _ => None,
        }
    }

    #[must_use]
    pub fn needs_preprocess(self) -> bool {
        !matches!(self, Self::Css)
    }
}

/// Whether `path` is flagged for class-name scoping: its stem (name minus
/// the last extension) ends with `marker`.
#[must_use]
pub fn is_module_stylesheet(path: &Path, marker: &str) -> bool {
    path.file_stem()
        .and_then(|s| s.to_str())
        .is_some_and(|stem| stem.ends_with(marker) && stem.len() > marker.len())
}

/// A rendered stylesheet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderOutput {
    /// The stylesheet that was rendered.
    pub source_path: PathBuf,
    /// The rendered CSS file in the temp directory.
    pub output_path: PathBuf,
    /// Local → scoped class names. `Some` exactly for module stylesheets.
    pub class_map: Option<ClassMap>,
    /// Nested files read by the preprocessor.
    pub dependencies: Vec<PathBuf>,
    /// BLAKE3 digest of each dependency as it was read, same order.
    pub dependency_digests: Vec<String>,
}

/// Turns one stylesheet into a plain CSS file.
#[derive(Debug)]
pub struct StyleEngine {
    root: PathBuf,
    temp_root: PathBuf,
    resolutions: Arc<ResolutionCache>,
    module_marker: String,
    scoped_name_pattern: String,
    locals_convention: LocalsConvention,
    minify: bool,
}

impl StyleEngine {
    #[must_use]
    pub fn new(
        config: &PipelineConfig,
        temp_root: impl Into<PathBuf>,
        resolutions: Arc<ResolutionCache>,
    ) -> Self {
        Self {
            root: config.root.clone(),
            temp_root: temp_root.into(),
            resolutions,
            module_marker: config.module_marker.clone(),
            scoped_name_pattern: config.scoped_name_pattern.clone(),
            locals_convention: config.locals_convention,
            minify: config.minify,
        }
    }

    #[must_use]
    pub fn temp_root(&self) -> &Path {
        &self.temp_root
    }

    #[must_use]
    pub fn is_module(&self, path: &Path) -> bool {
        is_module_stylesheet(path, &self.module_marker)
    }

    /// Where the rendered CSS for `source` is written:
    /// `<temp>/<dir relative to root>/<stem>.css`.
    #[must_use]
    pub fn output_path_for(&self, source: &Path) -> PathBuf {
        let stem = source
            .file_stem()
            .map_or_else(|| "index".into(), |s| s.to_string_lossy());
        let file_name = format!("{stem}.css");

        let parent = source.parent().unwrap_or_else(|| Path::new(""));
        match parent.strip_prefix(&self.root) {
            Ok(rel) => self.temp_root.join(rel).join(file_name),
            Err(_) => {
                let mut out = self.temp_root.join(EXTERNAL_DIR);
                for component in parent.components() {
                    if let Component::Normal(part) = component {
                        out.push(part);
                    }
                }
                out.join(file_name)
            }
        }
    }

    /// File identity fed to the scoped-name hash: the project-relative path
    /// with forward slashes, or the absolute path for external files.
    fn identity(&self, source: &Path) -> String {
        let rel = source.strip_prefix(&self.root).unwrap_or(source);
        rel.to_string_lossy().replace('\\', "/")
    }

    /// Render `path`, whose current content is `content`.
    ///
    /// # Errors
    /// - [`Error::UnsupportedFormat`] for extensions other than css/scss/sass.
    /// - [`Error::TransformFailure`] when grass or lightningcss rejects the input.
    /// - [`Error::Io`] when the output cannot be written.
    pub async fn render(&self, path: &Path, content: &str) -> Result<RenderOutput> {
        let started = Instant::now();
        let kind = StyleKind::from_path(path).ok_or_else(|| Error::UnsupportedFormat {
            path: path.to_path_buf(),
            extension: path
                .extension()
                .map(|e| e.to_string_lossy().into_owned())
                .unwrap_or_default(),
        })?;

        let (css, dependencies, dependency_digests) = if kind.needs_preprocess() {
            let owned_path = path.to_path_buf();
            let owned_source = content.to_string();
            let resolutions = Arc::clone(&self.resolutions);
            let options = SassOptions {
                include_paths: Vec::new(),
                minify: false,
            };
            let compiled = tokio::task::spawn_blocking(move || {
                sass::compile(&owned_path, &owned_source, &resolutions, &options)
            })
            .await
            .map_err(|e| Error::other(format!("preprocessor task failed: {e}")))?
            .map_err(|message| Error::transform(path, message))?;
            (compiled.css, compiled.dependencies, compiled.digests)
        } else {
            (content.to_string(), Vec::new(), Vec::new())
        };

        let is_module = self.is_module(path);
        let processed = process_css(
            &css,
            &CssOptions {
                minify: self.minify,
                css_modules: is_module,
                pattern: self.scoped_name_pattern.clone(),
                filename: self.identity(path),
                locals_convention: self.locals_convention,
                targets: None,
            },
        )
        .map_err(|e| Error::transform(path, e))?;

        let output_path = self.output_path_for(path);
        atomic_write(&output_path, processed.code.as_bytes())?;

        debug!(
            source = %path.display(),
            output = %output_path.display(),
            module = is_module,
            deps = dependencies.len(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "rendered stylesheet"
        );

        Ok(RenderOutput {
            source_path: path.to_path_buf(),
            output_path,
            class_map: is_module.then_some(processed.exports),
            dependencies,
            dependency_digests,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::CachePolicy;
    use crate::resolver::PathResolver;
    use tempfile::{tempdir, TempDir};

    struct Fixture {
        project: TempDir,
        temp: TempDir,
        engine: StyleEngine,
    }

    fn fixture() -> Fixture {
        let project = tempdir().unwrap();
        let temp = tempdir().unwrap();
        let config = PipelineConfig::new(project.path());
        let resolutions = Arc::new(ResolutionCache::new(
            PathResolver::new(&config),
            CachePolicy::Unbounded,
        ));
        let engine = StyleEngine::new(&config, temp.path(), resolutions);
        Fixture {
            project,
            temp,
            engine,
        }
    }

    #[test]
    fn test_style_kind() {
        assert_eq!(StyleKind::from_path(Path::new("a.css")), Some(StyleKind::Css));
        assert_eq!(StyleKind::from_path(Path::new("a.scss")), Some(StyleKind::Scss));
        assert_eq!(StyleKind::from_path(Path::new("a.sass")), Some(StyleKind::Sass));
        assert_eq!(StyleKind::from_path(Path::new("theme.xyz")), None);
        assert_eq!(StyleKind::from_path(Path::new("Makefile")), None);
    }

    #[test]
    fn test_module_marker() {
        assert!(is_module_stylesheet(Path::new("foo.module.scss"), ".module"));
        assert!(is_module_stylesheet(Path::new("a/b/x.module.css"), ".module"));
        assert!(!is_module_stylesheet(Path::new("foo.scss"), ".module"));
        assert!(!is_module_stylesheet(Path::new("module.css"), ".module"));
        assert!(!is_module_stylesheet(Path::new(".module.css"), ".module"));
    }

    #[test]
    fn test_output_path_mirrors_source_tree() {
        let f = fixture();
        let source = f.project.path().join("src/components/foo.module.scss");
        assert_eq!(
            f.engine.output_path_for(&source),
            f.temp.path().join("src/components/foo.module.css")
        );
    }

    #[test]
    fn test_output_path_for_external_source() {
        let f = fixture();
        let out = f.engine.output_path_for(Path::new("/opt/theme/base.scss"));
        assert_eq!(out, f.temp.path().join("__external__/opt/theme/base.css"));
    }

    #[tokio::test]
    async fn test_render_module_scss() {
        let f = fixture();
        let path = f.project.path().join("src/components/foo.module.scss");
        let out = f
            .engine
            .render(&path, "$c: red;\n.title { color: $c; }")
            .await
            .unwrap();

        let classes = out.class_map.as_ref().unwrap();
        let scoped = &classes["title"];
        assert!(scoped.starts_with("title__"));

        let css = std::fs::read_to_string(&out.output_path).unwrap();
        assert!(css.contains(&format!(".{scoped}")));
        assert!(css.contains("red"));
        assert_eq!(out.source_path, path);
    }

    #[tokio::test]
    async fn test_render_module_exports_all_classes() {
        let f = fixture();
        let path = f.project.path().join("src/nav.module.scss");
        let source = "\
.nav {
  &:hover .item { color: red; }
  .item.active::after { content: ''; }
  > .brand-logo:first-child { margin: 0; }
}
";
        let out = f.engine.render(&path, source).await.unwrap();

        let classes = out.class_map.unwrap();
        let keys: Vec<&str> = classes.keys().map(String::as_str).collect();
        assert_eq!(keys, ["active", "brand-logo", "item", "nav"]);
        let css = std::fs::read_to_string(&out.output_path).unwrap();
        for scoped in classes.values() {
            assert!(css.contains(&format!(".{scoped}")), "{scoped} missing from {css}");
        }
    }

    #[tokio::test]
    async fn test_render_plain_css_has_no_class_map() {
        let f = fixture();
        let path = f.project.path().join("src/app.css");
        let out = f.engine.render(&path, ".title { color: blue; }").await.unwrap();
        assert!(out.class_map.is_none());
        assert!(out.dependencies.is_empty());
        let css = std::fs::read_to_string(&out.output_path).unwrap();
        assert!(css.contains(".title"));
    }

    #[tokio::test]
    async fn test_unsupported_extension() {
        let f = fixture();
        let path = f.project.path().join("theme.xyz");
        let err = f.engine.render(&path, "whatever").await.unwrap_err();
        match err {
            Error::UnsupportedFormat { extension, .. } => assert_eq!(extension, "xyz"),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn test_preprocessor_failure_names_the_file() {
        let f = fixture();
        let path = f.project.path().join("broken.scss");
        let err = f.engine.render(&path, ".a { color: $nope; }").await.unwrap_err();
        assert!(matches!(err, Error::TransformFailure { .. }));
        assert_eq!(err.path(), Some(path.as_path()));
    }

    #[tokio::test]
    async fn test_same_class_in_two_modules_is_distinct() {
        let f = fixture();
        let a = f
            .engine
            .render(&f.project.path().join("a/x.module.css"), ".title { color: red; }")
            .await
            .unwrap();
        let b = f
            .engine
            .render(&f.project.path().join("b/x.module.css"), ".title { color: red; }")
            .await
            .unwrap();
        assert_ne!(
            a.class_map.unwrap()["title"],
            b.class_map.unwrap()["title"]
        );
    }
}
