//! Stylesheet transformation.
//!
//! Two passes, always in this order:
//! - **preprocess** (`.scss`/`.sass` only): [`sass::compile`] via grass, with
//!   nested imports routed through the resolution cache.
//! - **post-process** (every stylesheet): [`process_css`] via lightningcss,
//!   which applies vendor prefixes, lowers nesting, and for module
//!   stylesheets scopes class names and captures the class map.
//!
//! [`StyleEngine`] ties the two passes together and writes the result to the
//! pipeline's temp directory; [`RenderCache`] memoizes it by content.

mod cache;
pub mod module_js;
mod render;
pub mod sass;

pub use cache::{RenderCache, RenderStats};
pub use module_js::{synthesize, VirtualModule};
pub use render::{is_module_stylesheet, RenderOutput, StyleEngine, StyleKind};

use crate::config::LocalsConvention;
use lightningcss::css_modules::{CssModuleReference, Pattern};
use lightningcss::printer::PrinterOptions;
use lightningcss::stylesheet::{MinifyOptions, ParserOptions, StyleSheet};
use lightningcss::targets::{Browsers, Targets};
use std::collections::BTreeMap;
use thiserror::Error;

/// Local class name → scoped class name(s).
pub type ClassMap = BTreeMap<String, String>;

/// Post-processing options.
#[derive(Debug, Clone)]
pub struct CssOptions {
    /// Collapse whitespace in the output.
    pub minify: bool,
    /// Scope class names and capture the class map.
    pub css_modules: bool,
    /// Scoped name pattern (`[local]`, `[hash]`, `[name]`).
    pub pattern: String,
    /// File identity. Feeds the `[hash]` segment, so it must be stable
    /// across runs and distinct per file.
    pub filename: String,
    /// Export naming for the class map.
    pub locals_convention: LocalsConvention,
    /// Browser targets for prefixing (defaults to [`default_browser_targets`]).
    pub targets: Option<Browsers>,
}

impl Default for CssOptions {
    fn default() -> Self {
        Self {
            minify: false,
            css_modules: false,
            pattern: "[local]__[hash]".to_string(),
            filename: "input.css".to_string(),
            locals_convention: LocalsConvention::AsIs,
            targets: None,
        }
    }
}

/// Result of post-processing.
#[derive(Debug, Clone)]
pub struct CssResult {
    pub code: String,
    /// Empty unless `css_modules` was set.
    pub exports: ClassMap,
}

/// Post-processing error. The message carries the lightningcss location.
#[derive(Debug, Error)]
pub enum CssError {
    #[error("invalid scoped name pattern: {0}")]
    Pattern(String),
    #[error("{0}")]
    Parse(String),
    #[error("{0}")]
    Transform(String),
    #[error("{0}")]
    Print(String),
}

/// Run the post-processing pass over plain CSS.
///
/// # Example
/// ```ignore
/// let options = CssOptions { css_modules: true, filename: "src/a.module.css".into(), ..Default::default() };
/// let result = process_css(".title { color: red }", &options)?;
/// assert!(result.exports["title"].starts_with("title__"));
/// ```
pub fn process_css(source: &str, options: &CssOptions) -> Result<CssResult, CssError> {
    let mut parser_options = ParserOptions {
        filename: options.filename.clone(),
        ..ParserOptions::default()
    };

    if options.css_modules {
        parser_options.css_modules = Some(lightningcss::css_modules::Config {
            pattern: Pattern::parse(&options.pattern)
                .map_err(|e| CssError::Pattern(e.to_string()))?,
            dashed_idents: false,
            animation: Default::default(),
            grid: Default::default(),
            container: Default::default(),
            custom_idents: Default::default(),
            pure: false,
        });
    }

    let mut stylesheet = StyleSheet::parse(source, parser_options)
        .map_err(|e| CssError::Parse(e.to_string()))?;

    let browsers = options.targets.unwrap_or_else(default_browser_targets);

    stylesheet
        .minify(MinifyOptions {
            targets: Targets::from(browsers),
            ..Default::default()
        })
        .map_err(|e| CssError::Transform(e.to_string()))?;

    let output = stylesheet
        .to_css(PrinterOptions {
            minify: options.minify,
            targets: Targets::from(browsers),
            ..Default::default()
        })
        .map_err(|e| CssError::Print(e.to_string()))?;

    let mut exports = ClassMap::new();
    if let Some(module_exports) = output.exports {
        for (local, export) in module_exports {
            let mut scoped = export.name;
            for composed in &export.composes {
                match composed {
                    CssModuleReference::Local { name } | CssModuleReference::Global { name } => {
                        scoped.push(' ');
                        scoped.push_str(name);
                    }
                    CssModuleReference::Dependency { .. } => {}
                }
            }
            exports.insert(local, scoped);
        }
    }

    if options.locals_convention == LocalsConvention::CamelCase {
        add_camel_case_aliases(&mut exports);
    }

    Ok(CssResult {
        code: output.code,
        exports,
    })
}

/// Add a camelCased key next to every dashed or underscored local name.
/// An existing key is never overwritten.
fn add_camel_case_aliases(exports: &mut ClassMap) {
    let aliases: Vec<(String, String)> = exports
        .iter()
        .map(|(local, scoped)| (camel_case(local), scoped.clone()))
        .filter(|(alias, _)| !exports.contains_key(alias))
        .collect();
    exports.extend(aliases);
}

/// `my-title` → `myTitle`, `nav_item` → `navItem`.
#[must_use]
pub fn camel_case(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    let mut upper_next = false;
    for c in name.chars() {
        if c == '-' || c == '_' {
            upper_next = !out.is_empty();
            continue;
        }
        if upper_next {
            out.extend(c.to_uppercase());
            upper_next = false;
        } else {
            out.push(c);
        }
    }
    out
}

/// Browser targets for vendor prefixing: Chrome 80+, Firefox 75+, Safari 13+, Edge 80+.
#[must_use]
pub fn default_browser_targets() -> Browsers {
    Browsers {
        chrome: Some(80 << 16),
        firefox: Some(75 << 16),
        safari: Some(13 << 16),
        edge: Some(80 << 16),
        ..Default::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn module_options(filename: &str) -> CssOptions {
        CssOptions {
            css_modules: true,
            filename: filename.to_string(),
            ..Default::default()
        }
    }

    #[test]
    fn test_plain_css_passes_through() {
        let result = process_css(".foo { color: red; }", &CssOptions::default()).unwrap();
        assert!(result.code.contains(".foo"));
        assert!(result.code.contains("red"));
        assert!(result.exports.is_empty());
    }

    #[test]
    fn test_vendor_prefixes_added() {
        let css = ".box { user-select: none; }";
        let result = process_css(css, &CssOptions::default()).unwrap();
        assert!(result.code.contains("-webkit-user-select"));
    }

    #[test]
    fn test_module_scopes_class_names() {
        let result =
            process_css(".title { color: red; }", &module_options("src/a.module.css")).unwrap();
        let scoped = &result.exports["title"];
        assert!(scoped.starts_with("title__"), "got {scoped}");
        assert!(result.code.contains(&format!(".{scoped}")));
        assert!(!result.code.contains(".title "));
    }

    #[test]
    fn test_module_exports_every_local_class() {
        let css = r#"
.card .title, .card:hover > .icon-large { color: red; }
a.link::before { content: "x"; }
.btn.is-active:not(.disabled) { margin: 0; }
:global(.theme) .plain { padding: 0; }
"#;
        let result = process_css(css, &module_options("src/card.module.css")).unwrap();

        let keys: Vec<&str> = result.exports.keys().map(String::as_str).collect();
        assert_eq!(
            keys,
            ["btn", "card", "disabled", "icon-large", "is-active", "link", "plain", "title"]
        );
        for (local, scoped) in &result.exports {
            assert!(scoped.starts_with(&format!("{local}__")), "{local} -> {scoped}");
            assert!(result.code.contains(&format!(".{scoped}")), "{local} missing");
        }
        assert!(result.code.contains(".theme"));
    }

    #[test]
    fn test_same_local_in_different_files_gets_distinct_names() {
        let a = process_css(".title { color: red; }", &module_options("src/a.module.css")).unwrap();
        let b = process_css(".title { color: red; }", &module_options("src/b.module.css")).unwrap();
        assert_ne!(a.exports["title"], b.exports["title"]);
    }

    #[test]
    fn test_scoping_is_stable_for_same_file() {
        let a = process_css(".x { color: red; }", &module_options("src/a.module.css")).unwrap();
        let b = process_css(".x { color: red; }", &module_options("src/a.module.css")).unwrap();
        assert_eq!(a.exports, b.exports);
        assert_eq!(a.code, b.code);
    }

    #[test]
    fn test_camel_case_convention() {
        let options = CssOptions {
            locals_convention: LocalsConvention::CamelCase,
            ..module_options("src/a.module.css")
        };
        let result = process_css(".my-title { color: red; }", &options).unwrap();
        assert_eq!(result.exports["myTitle"], result.exports["my-title"]);
    }

    #[test]
    fn test_invalid_selector_is_rejected() {
        let err = process_css(".a..b { color: red; }", &CssOptions::default()).unwrap_err();
        assert!(matches!(err, CssError::Parse(_)));
    }

    #[test]
    fn test_invalid_pattern() {
        let options = CssOptions {
            pattern: "[nope]".to_string(),
            ..module_options("a.module.css")
        };
        assert!(matches!(
            process_css(".a {}", &options),
            Err(CssError::Pattern(_))
        ));
    }

    #[test]
    fn test_camel_case() {
        assert_eq!(camel_case("my-title"), "myTitle");
        assert_eq!(camel_case("nav_item-active"), "navItemActive");
        assert_eq!(camel_case("plain"), "plain");
        assert_eq!(camel_case("-leading"), "leading");
    }
}
