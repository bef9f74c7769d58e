//! `stylepipe resolve` command implementation.

use miette::{IntoDiagnostic, Result};
use serde::Serialize;
use std::path::{Path, PathBuf};
use stylepipe_core::version::SCHEMA_VERSION;
use stylepipe_core::{Pipeline, PipelineConfig};

#[derive(Serialize)]
struct ResolveJson {
    schema_version: u32,
    specifier: String,
    from: String,
    resolved: String,
    exists: bool,
}

pub fn run(
    cwd: &Path,
    config: Option<&Path>,
    specifier: &str,
    from: Option<PathBuf>,
    json: bool,
) -> Result<()> {
    let config = PipelineConfig::load(cwd, config).into_diagnostic()?;
    let pipeline = Pipeline::new(config).into_diagnostic()?;

    let from = from.unwrap_or_else(|| PathBuf::from("."));
    let from = pipeline.config().abs(&from);
    let resolved = pipeline.resolve(specifier, &from);

    if json {
        let result = ResolveJson {
            schema_version: SCHEMA_VERSION,
            specifier: specifier.to_string(),
            from: from.display().to_string(),
            resolved: resolved.display().to_string(),
            exists: resolved.exists(),
        };
        println!("{}", serde_json::to_string(&result).into_diagnostic()?);
    } else {
        println!("{}", resolved.display());
    }
    Ok(())
}
