//! Sass/SCSS preprocessing using grass.
//!
//! Every `@import`, `@use` and `@forward` target is rewritten to an absolute
//! path through the [`ResolutionCache`] before grass sees it, so partials can
//! come from the internal aliases or the package directory exactly like
//! top-level imports. Rewriting happens for the entry source here and for
//! each nested file inside [`ResolvingFs::read`].

use crate::resolver::ResolutionCache;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, OnceLock};
use stylepipe_util::hash::blake3_bytes;

/// Sass compilation options.
#[derive(Debug, Clone, Default)]
pub struct SassOptions {
    /// Extra include paths tried by grass after the rewritten path.
    pub include_paths: Vec<PathBuf>,
    /// Compressed output.
    pub minify: bool,
}

/// Output of a successful compile.
#[derive(Debug, Clone)]
pub struct SassOutput {
    pub css: String,
    /// Every nested file grass read, in read order, without duplicates.
    pub dependencies: Vec<PathBuf>,
    /// BLAKE3 digest of each dependency's bytes as read, same order.
    pub digests: Vec<String>,
}

/// Compile `source`, the content of the file at `path`.
///
/// `.sass` files use the indented syntax; anything else is parsed as SCSS.
/// Errors are grass's formatted message (with line and column).
pub fn compile(
    path: &Path,
    source: &str,
    resolutions: &Arc<ResolutionCache>,
    options: &SassOptions,
) -> Result<SassOutput, String> {
    let dir = path.parent().unwrap_or_else(|| Path::new("."));
    let fs = ResolvingFs::new(Arc::clone(resolutions));

    let mut grass_options = grass::Options::default()
        .fs(&fs)
        .quiet(true)
        .style(if options.minify {
            grass::OutputStyle::Compressed
        } else {
            grass::OutputStyle::Expanded
        })
        .load_path(dir);

    for include in &options.include_paths {
        grass_options = grass_options.load_path(include);
    }

    if is_indented(path) {
        grass_options = grass_options.input_syntax(grass::InputSyntax::Sass);
    }

    let rewritten = rewrite_imports(source, dir, resolutions);
    let css = grass::from_string(rewritten, &grass_options).map_err(|e| e.to_string())?;

    let (dependencies, digests) = fs.into_dependencies().into_iter().unzip();
    Ok(SassOutput {
        css,
        dependencies,
        digests,
    })
}

fn is_indented(path: &Path) -> bool {
    path.extension()
        .is_some_and(|ext| ext.eq_ignore_ascii_case("sass"))
}

/// Filesystem seen by grass: the real one, except that stylesheet contents
/// have their import targets rewritten and every read is recorded.
#[derive(Debug)]
pub struct ResolvingFs {
    resolutions: Arc<ResolutionCache>,
    read: Mutex<Vec<(PathBuf, String)>>,
}

impl ResolvingFs {
    #[must_use]
    pub fn new(resolutions: Arc<ResolutionCache>) -> Self {
        Self {
            resolutions,
            read: Mutex::new(Vec::new()),
        }
    }

    /// Files read so far, each with the digest of the bytes grass saw.
    #[must_use]
    pub fn into_dependencies(self) -> Vec<(PathBuf, String)> {
        self.read.into_inner().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl grass::Fs for ResolvingFs {
    fn is_dir(&self, path: &Path) -> bool {
        path.is_dir()
    }

    fn is_file(&self, path: &Path) -> bool {
        path.is_file()
    }

    fn read(&self, path: &Path) -> std::io::Result<Vec<u8>> {
        let bytes = std::fs::read(path)?;
        {
            let mut read = self.read.lock().unwrap_or_else(|p| p.into_inner());
            if !read.iter().any(|(p, _)| p == path) {
                read.push((path.to_path_buf(), blake3_bytes(&bytes)));
            }
        }

        if path.extension().is_some_and(|e| e == "css") {
            return Ok(bytes);
        }

        let source = String::from_utf8_lossy(&bytes);
        let dir = path.parent().unwrap_or_else(|| Path::new("."));
        Ok(rewrite_imports(&source, dir, &self.resolutions).into_bytes())
    }
}

fn directive_regex() -> Option<&'static regex_lite::Regex> {
    static RE: OnceLock<Option<regex_lite::Regex>> = OnceLock::new();
    RE.get_or_init(|| regex_lite::Regex::new(r"@(import|use|forward)\b").ok())
        .as_ref()
}

/// Rewrite the targets of `@import`/`@use`/`@forward` in `source` to
/// absolute, forward-slash paths resolved from `dir`.
///
/// `@use` and `@forward` take one target (the first string); `@import` may
/// list several, separated by commas. Targets grass handles natively are
/// left as written (see [`should_rewrite`]). A bare target that exists next
/// to the importing file keeps sass's own relative lookup.
#[must_use]
pub fn rewrite_imports(source: &str, dir: &Path, resolutions: &ResolutionCache) -> String {
    let Some(re) = directive_regex() else {
        return source.to_string();
    };
    let mut out = String::with_capacity(source.len());
    let mut cursor = 0;

    for caps in re.captures_iter(source) {
        let (Some(whole), Some(keyword)) = (caps.get(0), caps.get(1)) else {
            continue;
        };
        if whole.start() < cursor {
            continue;
        }

        let args_start = whole.end();
        let args_end = statement_end(source, args_start);
        let single = keyword.as_str() != "import";

        out.push_str(&source[cursor..args_start]);
        out.push_str(&rewrite_arguments(
            &source[args_start..args_end],
            single,
            dir,
            resolutions,
        ));
        cursor = args_end;
    }

    out.push_str(&source[cursor..]);
    out
}

/// End of the directive's arguments: `;`, `{`, or end of line (indented syntax).
fn statement_end(source: &str, from: usize) -> usize {
    let mut quote: Option<char> = None;
    for (offset, c) in source[from..].char_indices() {
        match (quote, c) {
            (Some(q), c) if c == q => quote = None,
            (Some(_), _) => {}
            (None, '"' | '\'') => quote = Some(c),
            (None, ';' | '{' | '\n') => return from + offset,
            (None, _) => {}
        }
    }
    source.len()
}

fn rewrite_arguments(args: &str, single: bool, dir: &Path, resolutions: &ResolutionCache) -> String {
    let mut out = String::with_capacity(args.len());
    let mut chars = args.char_indices();
    let mut depth = 0usize;
    let mut rewritten_any = false;

    while let Some((i, c)) = chars.next() {
        match c {
            '(' => {
                depth += 1;
                out.push(c);
            }
            ')' => {
                depth = depth.saturating_sub(1);
                out.push(c);
            }
            '"' | '\'' => {
                let start = i + 1;
                let mut end = args.len();
                for (j, d) in chars.by_ref() {
                    if d == c {
                        end = j;
                        break;
                    }
                }
                let target = &args[start..end];
                let eligible = depth == 0 && !(single && rewritten_any);
                let replacement = if eligible && should_rewrite(target) {
                    resolve_target(target, dir, resolutions)
                } else {
                    None
                };
                if depth == 0 {
                    rewritten_any = true;
                }
                out.push(c);
                out.push_str(replacement.as_deref().unwrap_or(target));
                if end < args.len() {
                    out.push(c);
                }
            }
            _ => out.push(c),
        }
    }
    out
}

/// Targets grass handles natively: built-in modules, remote and protocol-relative URLs,
/// and plain CSS imports.
#[must_use]
pub fn should_rewrite(target: &str) -> bool {
    !(target.is_empty()
        || target.starts_with("sass:")
        || target.starts_with("//")
        || target.contains("://")
        || target.starts_with("url(")
        || Path::new(target).extension().is_some_and(|e| e == "css"))
}

fn resolve_target(target: &str, dir: &Path, resolutions: &ResolutionCache) -> Option<String> {
    let is_bare = !target.starts_with('.') && !Path::new(target).is_absolute();
    if is_bare && sibling_exists(&dir.join(target)) {
        return None;
    }
    let resolved = resolutions.get(target, dir);
    Some(resolved.to_string_lossy().replace('\\', "/"))
}

/// Whether sass would find `base` relative to the importing file.
fn sibling_exists(base: &Path) -> bool {
    let Some(name) = base.file_name().and_then(|n| n.to_str()) else {
        return false;
    };
    let parent = base.parent().unwrap_or_else(|| Path::new("."));
    let candidates = [
        base.to_path_buf(),
        parent.join(format!("{name}.scss")),
        parent.join(format!("{name}.sass")),
        parent.join(format!("_{name}.scss")),
        parent.join(format!("_{name}.sass")),
        base.join("_index.scss"),
        base.join("index.scss"),
    ];
    candidates.iter().any(|c| c.is_file())
}
