//! Synthetic script modules standing in for module stylesheets.
//!
//! Importing `foo.module.scss` from script code yields a module that
//! side-effect imports the rendered CSS and default-exports the class map:
//!
//! ```js
//! import "/tmp/stylepipe-x/src/foo.module.css";
//! export default {"title":"title__a1b2c3"};
//! ```

use super::ClassMap;
use serde_json::Value;
use std::path::{Path, PathBuf};

/// Contents and resolve directory of a synthetic module.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VirtualModule {
    pub contents: String,
    /// Directory relative imports inside `contents` resolve against.
    pub resolve_dir: PathBuf,
}

/// Build the synthetic module for a rendered stylesheet.
///
/// Keys are emitted in sorted order, so identical maps give identical bytes.
#[must_use]
pub fn synthesize(output_path: &Path, class_map: &ClassMap) -> VirtualModule {
    let import = Value::String(output_path.to_string_lossy().replace('\\', "/"));
    let classes = Value::Object(
        class_map
            .iter()
            .map(|(local, scoped)| (local.clone(), Value::String(scoped.clone())))
            .collect(),
    );

    VirtualModule {
        contents: format!("import {import};\nexport default {classes};\n"),
        resolve_dir: output_path
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_default(),
    }
}
