//! Built-in file resolution for imports no plugin claimed.
//!
//! The base path comes from [`PathResolver`] (relative, alias, absolute,
//! package), then the usual probing applies: exact file, implicit
//! extensions, `package.json` entry fields, directory index files.

use crate::resolver::PathResolver;
use serde::Deserialize;
use std::path::{Path, PathBuf};

/// Extensions tried, in order, when the specifier omits one.
pub const RESOLVE_EXTENSIONS: &[&str] = &[".tsx", ".ts", ".jsx", ".js", ".mjs", ".json", ".css"];

#[derive(Debug, Default, Deserialize)]
struct PackageJson {
    module: Option<String>,
    main: Option<String>,
}

/// Resolve `specifier` from `resolve_dir` to an existing file.
#[must_use]
pub fn resolve_file(resolver: &PathResolver, specifier: &str, resolve_dir: &Path) -> Option<PathBuf> {
    let specifier = strip_query(specifier);
    let base = resolver.resolve(specifier, resolve_dir);
    probe(&base)
}

/// Drop `?query` and `#fragment` suffixes (common on font URLs).
#[must_use]
pub fn strip_query(specifier: &str) -> &str {
    let end = specifier.find(['?', '#']).unwrap_or(specifier.len());
    &specifier[..end]
}

fn probe(base: &Path) -> Option<PathBuf> {
    if base.is_file() {
        return Some(base.to_path_buf());
    }

    if let Some(found) = with_extensions(base) {
        return Some(found);
    }

    if base.is_dir() {
        if let Some(entry) = package_entry(base) {
            let entry = base.join(entry);
            if let Some(found) = entry
                .is_file()
                .then(|| entry.clone())
                .or_else(|| with_extensions(&entry))
            {
                return Some(found);
            }
        }
        return with_extensions(&base.join("index"));
    }

    None
}

fn with_extensions(base: &Path) -> Option<PathBuf> {
    let name = base.file_name()?.to_string_lossy();
    RESOLVE_EXTENSIONS
        .iter()
        .map(|ext| base.with_file_name(format!("{name}{ext}")))
        .find(|candidate| candidate.is_file())
}

fn package_entry(dir: &Path) -> Option<String> {
    let source = std::fs::read_to_string(dir.join("package.json")).ok()?;
    let pkg: PackageJson = serde_json::from_str(&source).ok()?;
    pkg.module.or(pkg.main)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PipelineConfig;
    use tempfile::tempdir;

    fn write(path: &Path, contents: &str) {
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(path, contents).unwrap();
    }

    #[test]
    fn test_exact_and_extension_probe() {
        let dir = tempdir().unwrap();
        let root = dir.path();
        write(&root.join("src/app.tsx"), "");
        write(&root.join("src/data.json"), "{}");
        let resolver = PathResolver::new(&PipelineConfig::new(root));

        let src = root.join("src");
        assert_eq!(
            resolve_file(&resolver, "./app", &src),
            Some(src.join("app.tsx"))
        );
        assert_eq!(
            resolve_file(&resolver, "./data.json", &src),
            Some(src.join("data.json"))
        );
        assert_eq!(resolve_file(&resolver, "./missing", &src), None);
    }

    #[test]
    fn test_directory_index() {
        let dir = tempdir().unwrap();
        let root = dir.path();
        write(&root.join("src/components/index.ts"), "");
        let resolver = PathResolver::new(&PipelineConfig::new(root));
        assert_eq!(
            resolve_file(&resolver, "./components", &root.join("src")),
            Some(root.join("src/components/index.ts"))
        );
    }

    #[test]
    fn test_package_entry_fields() {
        let dir = tempdir().unwrap();
        let root = dir.path().canonicalize().unwrap();
        write(
            &root.join("node_modules/lib/package.json"),
            r#"{"main": "dist/cjs.js", "module": "dist/esm"}"#,
        );
        write(&root.join("node_modules/lib/dist/esm.js"), "");
        write(&root.join("node_modules/lib/dist/cjs.js"), "");
        let resolver = PathResolver::new(&PipelineConfig::new(&root));
        assert_eq!(
            resolve_file(&resolver, "lib", &root),
            Some(root.join("node_modules/lib/dist/esm.js"))
        );
    }

    #[test]
    fn test_strip_query() {
        assert_eq!(strip_query("./font.woff2?v=3"), "./font.woff2");
        assert_eq!(strip_query("./icons.svg#home"), "./icons.svg");
        assert_eq!(strip_query("./plain.png"), "./plain.png");
    }
}
