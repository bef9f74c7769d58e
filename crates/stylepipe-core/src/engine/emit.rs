//! Output generation for the reference engine.

use super::{apply_define, BuildOptions, Loader, Module, ModuleKey};
use crate::error::Result;
use crate::imports::ImportKind;
use serde::Serialize;
use serde_json::Value;
use std::borrow::Cow;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::fmt::Write;
use std::path::{Path, PathBuf};
use stylepipe_util::hash::short_hash;

/// A file produced by a build.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OutputFile {
    pub path: PathBuf,
    #[serde(skip)]
    pub contents: Vec<u8>,
}

impl OutputFile {
    #[must_use]
    pub fn text(&self) -> Cow<'_, str> {
        String::from_utf8_lossy(&self.contents)
    }
}

/// Produce every output for the given entries.
pub(super) fn emit(
    options: &BuildOptions,
    entries: &[ModuleKey],
    modules: &BTreeMap<ModuleKey, Module>,
) -> Result<Vec<OutputFile>> {
    let mut outputs = Vec::new();
    let mut assets: HashMap<&ModuleKey, String> = HashMap::new();

    for module in modules.values().filter(|m| m.loader == Loader::File) {
        let bytes = std::fs::read(&module.key.path)?;
        let name = asset_name(&module.key.path, &bytes);
        outputs.push(OutputFile {
            path: options.outdir.join(&name),
            contents: bytes,
        });
        assets.insert(&module.key, name);
    }

    for entry in entries {
        let stem = entry
            .path
            .file_stem()
            .map_or_else(|| "out".into(), |s| s.to_string_lossy());

        let mut js = String::new();
        let mut css = String::new();

        for (key, reached_by) in dependency_order(entry, modules) {
            let Some(module) = modules.get(key) else {
                continue;
            };
            let label = module.label(&options.root);
            match module.loader {
                Loader::Js => {
                    let _ = writeln!(js, "// {label}");
                    js.push_str(&apply_define(&module.contents, &options.define));
                    if !js.ends_with('\n') {
                        js.push('\n');
                    }
                }
                Loader::Json => {
                    let _ = writeln!(js, "// {label}\nexport default {};", module.contents.trim());
                }
                Loader::Text => {
                    let literal = Value::String(module.contents.clone());
                    let _ = writeln!(js, "// {label}\nexport default {literal};");
                }
                Loader::File => {
                    if reached_by != ImportKind::CssUrl {
                        let name = assets.get(key).map_or("", String::as_str);
                        let _ = writeln!(js, "// {label}\nexport default \"./{name}\";");
                    }
                }
                Loader::Css => {
                    let _ = writeln!(css, "/* {label} */");
                    css.push_str(&rewrite_css(module, &assets));
                    if !css.ends_with('\n') {
                        css.push('\n');
                    }
                }
            }
        }

        if !js.is_empty() {
            outputs.push(OutputFile {
                path: options.outdir.join(format!("{stem}.js")),
                contents: js.into_bytes(),
            });
        }
        if !css.is_empty() {
            outputs.push(OutputFile {
                path: options.outdir.join(format!("{stem}.css")),
                contents: css.into_bytes(),
            });
        }
    }

    Ok(outputs)
}

/// `<stem>-<hash8>.<ext>`, stable for identical bytes.
fn asset_name(path: &Path, bytes: &[u8]) -> String {
    let stem = path.file_stem().map_or_else(|| "asset".into(), |s| s.to_string_lossy());
    let hash = short_hash(bytes, 8);
    match path.extension() {
        Some(ext) => format!("{stem}-{hash}.{}", ext.to_string_lossy()),
        None => format!("{stem}-{hash}"),
    }
}

/// Post-order walk from `entry`: dependencies before dependents, each
/// module once. Also returns the kind of import that first reached it.
fn dependency_order<'a>(
    entry: &'a ModuleKey,
    modules: &'a BTreeMap<ModuleKey, Module>,
) -> Vec<(&'a ModuleKey, ImportKind)> {
    let mut order = Vec::new();
    let mut visited: HashSet<&ModuleKey> = HashSet::new();
    // (key, kind, children pushed)
    let mut stack: Vec<(&ModuleKey, ImportKind, bool)> = vec![(entry, ImportKind::EntryPoint, false)];

    while let Some((key, kind, expanded)) = stack.pop() {
        if expanded {
            order.push((key, kind));
            continue;
        }
        if !visited.insert(key) {
            continue;
        }
        stack.push((key, kind, true));
        if let Some(module) = modules.get(key) {
            for edge in module.edges.iter().rev() {
                if let Some(target) = &edge.target {
                    if !visited.contains(target) {
                        stack.push((target, edge.record.kind, false));
                    }
                }
            }
        }
    }
    order
}

/// Drop `@import` statements (their targets are emitted separately, before
/// this sheet) and point `url()` references at copied assets.
fn rewrite_css(module: &Module, assets: &HashMap<&ModuleKey, String>) -> String {
    let mut out = module.contents.clone();
    let mut edges: Vec<_> = module.edges.iter().collect();
    edges.sort_by_key(|e| std::cmp::Reverse(e.record.span.start));

    for edge in edges {
        let Some(target) = &edge.target else { continue };
        match edge.record.kind {
            ImportKind::CssImport => out.replace_range(edge.record.statement.clone(), ""),
            ImportKind::CssUrl => {
                if let Some(name) = assets.get(target) {
                    out.replace_range(edge.record.span.clone(), &format!("./{name}"));
                }
            }
            _ => {}
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::Edge;
    use crate::imports::scan_css;

    #[test]
    fn test_asset_name_is_content_hashed() {
        let a = asset_name(Path::new("/p/codicon.ttf"), b"font-bytes");
        let b = asset_name(Path::new("/q/codicon.ttf"), b"font-bytes");
        let c = asset_name(Path::new("/p/codicon.ttf"), b"other");
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert!(a.starts_with("codicon-") && a.ends_with(".ttf"));
        assert_eq!(a.len(), "codicon-".len() + 8 + ".ttf".len());
    }

    #[test]
    fn test_rewrite_css_drops_imports_and_maps_urls() {
        let contents = "@import './base.css';\n.i { src: url(./codicon.ttf); }\n".to_string();
        let records = scan_css(&contents);
        let base = ModuleKey::file("/p/base.css");
        let font = ModuleKey::file("/p/codicon.ttf");
        let module = Module {
            key: ModuleKey::file("/p/app.css"),
            loader: Loader::Css,
            contents,
            source_path: None,
            edges: vec![
                Edge {
                    record: records[0].clone(),
                    target: Some(base),
                },
                Edge {
                    record: records[1].clone(),
                    target: Some(font.clone()),
                },
            ],
        };
        let mut assets = HashMap::new();
        assets.insert(&font, "codicon-12345678.ttf".to_string());

        let css = rewrite_css(&module, &assets);
        assert!(!css.contains("@import"));
        assert!(css.contains("url(./codicon-12345678.ttf)"));
    }

    #[test]
    fn test_dependency_order_handles_cycles() {
        let a = ModuleKey::file("/a.js");
        let b = ModuleKey::file("/b.js");
        let record = crate::imports::scan_js("import './x';")[0].clone();
        let mut modules = BTreeMap::new();
        modules.insert(
            a.clone(),
            Module {
                key: a.clone(),
                loader: Loader::Js,
                contents: String::new(),
                source_path: None,
                edges: vec![Edge {
                    record: record.clone(),
                    target: Some(b.clone()),
                }],
            },
        );
        modules.insert(
            b.clone(),
            Module {
                key: b.clone(),
                loader: Loader::Js,
                contents: String::new(),
                source_path: None,
                edges: vec![Edge {
                    record,
                    target: Some(a.clone()),
                }],
            },
        );

        let order: Vec<_> = dependency_order(&a, &modules)
            .into_iter()
            .map(|(k, _)| k.clone())
            .collect();
        assert_eq!(order, vec![b, a]);
    }
}
