//! Loaders: how a module's bytes become part of the output.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;

/// How a module's contents are interpreted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Loader {
    /// Script source, scanned for imports and included in the JS bundle.
    Js,
    /// Stylesheet, scanned for `@import`/`url()` and included in the CSS bundle.
    Css,
    /// JSON document, exported as the default export.
    Json,
    /// Arbitrary text, exported as a string.
    Text,
    /// Copied to the output directory; importers get its public name.
    File,
}

impl Loader {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Js => "js",
            Self::Css => "css",
            Self::Json => "json",
            Self::Text => "text",
            Self::File => "file",
        }
    }

    /// Whether the contents are read as text (everything except `File`).
    #[must_use]
    pub fn is_textual(self) -> bool {
        !matches!(self, Self::File)
    }
}

/// Extensions every build understands without configuration.
#[must_use]
pub fn builtin_loaders() -> BTreeMap<String, Loader> {
    let mut map = BTreeMap::new();
    for ext in [".js", ".mjs", ".cjs", ".jsx", ".ts", ".mts", ".cts", ".tsx"] {
        map.insert(ext.to_string(), Loader::Js);
    }
    map.insert(".css".to_string(), Loader::Css);
    map.insert(".json".to_string(), Loader::Json);
    map
}

/// Loader for `path` by its extension, configured loaders taking precedence.
#[must_use]
pub fn loader_for(path: &Path, loaders: &BTreeMap<String, Loader>) -> Option<Loader> {
    let ext = format!(".{}", path.extension()?.to_str()?);
    loaders.get(&ext).copied()
}

/// Replace build-time constants in script source.
///
/// Keys match only at identifier boundaries (`process.env.NODE_ENV` does not
/// match inside `myprocess.env.NODE_ENV` or `process.env.NODE_ENVX`).
/// Longer keys win over their prefixes. String literals and comments are
/// left alone; template literals are skipped whole, substitutions included.
#[must_use]
pub fn apply_define(source: &str, define: &BTreeMap<String, String>) -> String {
    if define.is_empty() {
        return source.to_string();
    }

    let mut keys: Vec<(&str, &str)> = define
        .iter()
        .map(|(k, v)| (k.as_str(), v.as_str()))
        .collect();
    keys.sort_by(|a, b| b.0.len().cmp(&a.0.len()));

    let bytes = source.as_bytes();
    let mut out = String::with_capacity(source.len());
    let mut i = 0;
    let mut copied = 0;

    while i < bytes.len() {
        if let Some(end) = skip_non_code(bytes, i) {
            i = end;
            continue;
        }
        let boundary_before = i == 0 || (!is_ident_byte(bytes[i - 1]) && bytes[i - 1] != b'.');
        if boundary_before {
            let hit = keys.iter().find(|(key, _)| {
                bytes[i..].starts_with(key.as_bytes())
                    && bytes
                        .get(i + key.len())
                        .map_or(true, |b| !is_ident_byte(*b))
            });
            if let Some((key, value)) = hit {
                out.push_str(&source[copied..i]);
                out.push_str(value);
                i += key.len();
                copied = i;
                continue;
            }
        }
        i += 1;
    }

    out.push_str(&source[copied..]);
    out
}

/// End of the string literal, template literal or comment starting at `i`.
fn skip_non_code(bytes: &[u8], i: usize) -> Option<usize> {
    let len = bytes.len();
    match bytes[i] {
        quote @ (b'"' | b'\'' | b'`') => {
            let mut j = i + 1;
            while j < len && bytes[j] != quote {
                if bytes[j] == b'\\' {
                    j += 1;
                } else if bytes[j] == b'\n' && quote != b'`' {
                    break;
                }
                j += 1;
            }
            Some((j + 1).min(len))
        }
        b'/' if bytes.get(i + 1) == Some(&b'/') => Some(
            bytes[i..]
                .iter()
                .position(|&b| b == b'\n')
                .map_or(len, |p| i + p),
        ),
        b'/' if bytes.get(i + 1) == Some(&b'*') => Some(
            bytes[i + 2..]
                .windows(2)
                .position(|w| w == b"*/")
                .map_or(len, |p| i + 2 + p + 2),
        ),
        _ => None,
    }
}

fn is_ident_byte(b: u8) -> bool {
    b.is_ascii_alphanumeric() || b == b'_' || b == b'$'
}
