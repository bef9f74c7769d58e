//! `stylepipe render` command implementation.
//!
//! Renders one stylesheet the way a build would and prints the CSS (and the
//! class map for module stylesheets). The rendered file itself lives in the
//! pipeline's temp directory and is gone when the command exits.

use miette::{IntoDiagnostic, Result};
use serde::Serialize;
use std::path::{Path, PathBuf};
use stylepipe_core::version::SCHEMA_VERSION;
use stylepipe_core::{BuildMessage, ClassMap, Pipeline, PipelineConfig};

#[derive(Serialize)]
struct RenderJson {
    schema_version: u32,
    ok: bool,
    source: String,
    css: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    class_map: Option<ClassMap>,
    dependencies: Vec<PathBuf>,
}

#[derive(Serialize)]
struct RenderErrorJson {
    schema_version: u32,
    ok: bool,
    error: BuildMessage,
}

pub fn run(cwd: &Path, config: Option<&Path>, file: &Path, json: bool) -> Result<()> {
    let config = PipelineConfig::load(cwd, config).into_diagnostic()?;
    let pipeline = Pipeline::new(config).into_diagnostic()?;
    let runtime = tokio::runtime::Runtime::new().into_diagnostic()?;

    let output = match runtime.block_on(pipeline.render_file(file)) {
        Ok(output) => output,
        Err(err) => {
            if json {
                let result = RenderErrorJson {
                    schema_version: SCHEMA_VERSION,
                    ok: false,
                    error: BuildMessage::from_error(&err, None, None),
                };
                println!("{}", serde_json::to_string(&result).into_diagnostic()?);
                std::process::exit(1);
            }
            return Err(err).into_diagnostic();
        }
    };

    let css = std::fs::read_to_string(&output.output_path).into_diagnostic()?;

    if json {
        let result = RenderJson {
            schema_version: SCHEMA_VERSION,
            ok: true,
            source: output.source_path.display().to_string(),
            css,
            class_map: output.class_map,
            dependencies: output.dependencies,
        };
        println!("{}", serde_json::to_string(&result).into_diagnostic()?);
        return Ok(());
    }

    print!("{css}");
    if !css.ends_with('\n') {
        println!();
    }
    if let Some(classes) = &output.class_map {
        println!();
        for (local, scoped) in classes {
            println!("  .{local} -> .{scoped}");
        }
    }
    Ok(())
}
