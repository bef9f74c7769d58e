//! Import specifier scanner.
//!
//! Comments are blanked out first (same byte length, newlines kept) so
//! offsets and line numbers in the results refer to the original source.

use regex_lite::Regex;
use serde::Serialize;
use std::ops::Range;
use std::sync::OnceLock;

/// How a module refers to its dependency.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum ImportKind {
    EntryPoint,
    /// `import … from "x"`, `import "x"`, `export … from "x"`.
    Import,
    /// `import("x")`.
    DynamicImport,
    /// `require("x")`.
    Require,
    /// `@import "x"` in a stylesheet.
    CssImport,
    /// `url(x)` in a stylesheet.
    CssUrl,
}

impl ImportKind {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::EntryPoint => "entry-point",
            Self::Import => "import",
            Self::DynamicImport => "dynamic-import",
            Self::Require => "require",
            Self::CssImport => "css-import",
            Self::CssUrl => "css-url",
        }
    }
}

/// One import found in a source file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImportRecord {
    /// Specifier exactly as written, without quotes.
    pub specifier: String,
    pub kind: ImportKind,
    /// 1-indexed line of the specifier.
    pub line: u32,
    /// Byte range of the specifier text.
    pub span: Range<usize>,
    /// Byte range of the whole statement or `url(…)` token.
    pub statement: Range<usize>,
}

static JS_STATIC: OnceLock<Option<Regex>> = OnceLock::new();
static JS_DYNAMIC: OnceLock<Option<Regex>> = OnceLock::new();
static JS_REQUIRE: OnceLock<Option<Regex>> = OnceLock::new();
static CSS_IMPORT: OnceLock<Option<Regex>> = OnceLock::new();
static CSS_URL: OnceLock<Option<Regex>> = OnceLock::new();

fn cached(cell: &'static OnceLock<Option<Regex>>, pattern: &str) -> Option<&'static Regex> {
    cell.get_or_init(|| Regex::new(pattern).ok()).as_ref()
}

/// Scan script source for static, dynamic, and `require` imports, in source order.
#[must_use]
pub fn scan_js(source: &str) -> Vec<ImportRecord> {
    let blanked = blank_comments(source, CommentStyle::Script);
    let patterns = [
        (
            cached(
                &JS_STATIC,
                r#"(?:^|[^\w$.])(?:import|export)\s+(?:[\w$*{}\s,]+?\s+from\s*)?["']([^"'\n]+)["']"#,
            ),
            ImportKind::Import,
        ),
        (
            cached(
                &JS_DYNAMIC,
                r#"(?:^|[^\w$.])import\s*\(\s*["']([^"'\n]+)["']\s*\)"#,
            ),
            ImportKind::DynamicImport,
        ),
        (
            cached(
                &JS_REQUIRE,
                r#"(?:^|[^\w$.])require\s*\(\s*["']([^"'\n]+)["']\s*\)"#,
            ),
            ImportKind::Require,
        ),
    ];

    let mut records = Vec::new();
    for (re, kind) in patterns {
        let Some(re) = re else { continue };
        for caps in re.captures_iter(&blanked) {
            if let (Some(whole), Some(spec)) = (caps.get(0), caps.get(1)) {
                records.push(record(source, kind, spec.range(), whole.range()));
            }
        }
    }
    records.sort_by_key(|r| r.span.start);
    records
}

/// Scan stylesheet source for `@import` and `url()` references, in source order.
///
/// Remote URLs, `data:` URIs, and fragment-only references are skipped.
#[must_use]
pub fn scan_css(source: &str) -> Vec<ImportRecord> {
    let blanked = blank_comments(source, CommentStyle::Css);
    let mut records = Vec::new();

    if let Some(re) = cached(
        &CSS_IMPORT,
        r#"@import\s+(?:url\(\s*)?["']?([^"')\s;]+)["']?\s*\)?[^;\n]*;?"#,
    ) {
        for caps in re.captures_iter(&blanked) {
            if let (Some(whole), Some(spec)) = (caps.get(0), caps.get(1)) {
                if !is_external_url(spec.as_str()) {
                    records.push(record(source, ImportKind::CssImport, spec.range(), whole.range()));
                }
            }
        }
    }

    if let Some(re) = cached(&CSS_URL, r#"url\(\s*["']?([^"')\s]+)["']?\s*\)"#) {
        for caps in re.captures_iter(&blanked) {
            if let (Some(whole), Some(spec)) = (caps.get(0), caps.get(1)) {
                let inside_import = records
                    .iter()
                    .any(|r| r.statement.start <= whole.start() && whole.end() <= r.statement.end);
                if !inside_import && !is_external_url(spec.as_str()) {
                    records.push(record(source, ImportKind::CssUrl, spec.range(), whole.range()));
                }
            }
        }
    }

    records.sort_by_key(|r| r.span.start);
    records
}

/// References the build never resolves.
#[must_use]
pub fn is_external_url(specifier: &str) -> bool {
    specifier.starts_with("data:")
        || specifier.starts_with("http:")
        || specifier.starts_with("https:")
        || specifier.starts_with("//")
        || specifier.starts_with('#')
}

fn record(source: &str, kind: ImportKind, span: Range<usize>, statement: Range<usize>) -> ImportRecord {
    let line = source[..span.start].bytes().filter(|b| *b == b'\n').count() + 1;
    ImportRecord {
        specifier: source[span.clone()].to_string(),
        kind,
        line: u32::try_from(line).unwrap_or(u32::MAX),
        span,
        statement,
    }
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum CommentStyle {
    /// `//` and `/* */`, with string and template literals skipped.
    Script,
    /// `/* */` only.
    Css,
}

/// Replace comment bytes with spaces, keeping newlines and overall length.
fn blank_comments(source: &str, style: CommentStyle) -> String {
    let mut bytes = source.as_bytes().to_vec();
    let len = bytes.len();
    let mut i = 0;

    while i < len {
        match bytes[i] {
            b'"' | b'\'' | b'`' if style == CommentStyle::Script => {
                let quote = bytes[i];
                i += 1;
                while i < len && bytes[i] != quote {
                    if bytes[i] == b'\\' {
                        i += 1;
                    }
                    if bytes[i.min(len - 1)] == b'\n' && quote != b'`' {
                        break;
                    }
                    i += 1;
                }
                i += 1;
            }
            b'/' if i + 1 < len && bytes[i + 1] == b'*' => {
                let end = source[i + 2..].find("*/").map_or(len, |p| i + 2 + p + 2);
                blank(&mut bytes[i..end]);
                i = end;
            }
            b'/' if style == CommentStyle::Script && i + 1 < len && bytes[i + 1] == b'/' => {
                let end = source[i..].find('\n').map_or(len, |p| i + p);
                blank(&mut bytes[i..end]);
                i = end;
            }
            _ => i += 1,
        }
    }

    String::from_utf8_lossy(&bytes).into_owned()
}

fn blank(range: &mut [u8]) {
    for b in range {
        if *b != b'\n' {
            *b = b' ';
        }
    }
}
