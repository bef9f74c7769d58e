//! Import specifier resolution for stylesheets and their nested imports.
//!
//! ## Rules, in order
//!
//! 1. Relative (`./x`, `../x`): joined onto the requesting directory.
//! 2. Internal source-tree alias (`wildcard/…`, `shared/…`): the prefix is
//!    swapped for its directory under the project root, regardless of where
//!    the import came from.
//! 3. Absolute (`/abs/x`): used as-is.
//! 4. Anything else is a package: `<root>/node_modules/<specifier>`, with
//!    symlinks followed on a best-effort basis.
//!
//! Resolution is local path arithmetic. It never touches the network and
//! never fails; a path that does not exist surfaces when the caller reads it.

mod cache;

pub use cache::{resolution_key, ResolutionCache, ResolutionStats};

use crate::config::PipelineConfig;
use std::path::{Component, Path, PathBuf};
use tracing::trace;

/// Maps `(specifier, directory)` to an absolute path.
#[derive(Debug, Clone)]
pub struct PathResolver {
    /// Alias prefixes with their absolute target directories, longest prefix first.
    aliases: Vec<(String, PathBuf)>,
    /// Absolute package installation directory.
    packages_dir: PathBuf,
}

impl PathResolver {
    /// Build a resolver from pipeline configuration.
    #[must_use]
    pub fn new(config: &PipelineConfig) -> Self {
        let mut aliases: Vec<(String, PathBuf)> = config
            .aliases
            .iter()
            .map(|(prefix, dir)| (prefix.clone(), normalize(&config.abs(dir))))
            .collect();
        aliases.sort_by(|a, b| b.0.len().cmp(&a.0.len()).then_with(|| a.0.cmp(&b.0)));

        Self {
            aliases,
            packages_dir: normalize(&config.abs(&config.packages_dir)),
        }
    }

    /// Resolve `specifier` as imported from `from_dir`.
    #[must_use]
    pub fn resolve(&self, specifier: &str, from_dir: &Path) -> PathBuf {
        if specifier.starts_with('.') {
            return canonicalize_best_effort(normalize(&from_dir.join(specifier)));
        }

        if let Some((dir, rest)) = self.match_alias(specifier) {
            return canonicalize_best_effort(normalize(&dir.join(rest)));
        }

        if Path::new(specifier).is_absolute() {
            return canonicalize_best_effort(normalize(Path::new(specifier)));
        }

        let candidate = normalize(&self.packages_dir.join(specifier));
        canonicalize_best_effort(candidate)
    }

    /// Find the alias whose prefix starts `specifier`, returning its directory
    /// and the remainder after the prefix.
    fn match_alias<'s>(&self, specifier: &'s str) -> Option<(&Path, &'s str)> {
        self.aliases.iter().find_map(|(prefix, dir)| {
            specifier
                .strip_prefix(prefix.as_str())
                .map(|rest| (dir.as_path(), rest.trim_start_matches('/')))
        })
    }
}

/// Follow symlinks when the path exists; otherwise keep the lexical path.
///
/// A broken or dangling link is not an error here: later lookups (extension
/// probing, partial lookup in the preprocessor) may still succeed on the
/// unresolved path.
fn canonicalize_best_effort(path: PathBuf) -> PathBuf {
    match dunce::canonicalize(&path) {
        Ok(real) => real,
        Err(e) => {
            trace!(path = %path.display(), error = %e, "symlink follow failed, keeping unresolved path");
            path
        }
    }
}

/// Lexically normalize a path: drop `.` components and fold `..` into the parent.
///
/// Does not touch the filesystem. `..` at the root is discarded, matching
/// how absolute paths behave on POSIX; leading `..` of a relative path is kept.
#[must_use]
pub fn normalize(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => match out.components().next_back() {
                Some(Component::Normal(_)) => {
                    out.pop();
                }
                Some(Component::RootDir | Component::Prefix(_)) => {}
                Some(Component::ParentDir | Component::CurDir) | None => out.push(".."),
            },
            Component::Prefix(_) | Component::RootDir | Component::Normal(_) => {
                out.push(component.as_os_str());
            }
        }
    }
    out
}
