//! `stylepipe build` command implementation.

use super::{serve, watch};
use miette::{IntoDiagnostic, Result};
use serde::Serialize;
use std::path::{Path, PathBuf};
use stylepipe_core::version::SCHEMA_VERSION;
use stylepipe_core::{BuildMessage, BuildMode, BuildReport, Pipeline, PipelineConfig};
use tracing::{error, info};

/// Build command action.
#[derive(Debug, Clone)]
pub struct BuildAction {
    pub cwd: PathBuf,
    pub config: Option<PathBuf>,
    /// Entry points. Empty = use the configured ones.
    pub entries: Vec<PathBuf>,
    pub outdir: Option<PathBuf>,
    pub watch: bool,
    pub serve: bool,
    pub port: Option<u16>,
    pub api_url: Option<String>,
}

/// Build result for JSON output.
#[derive(Serialize)]
struct BuildResultJson<'a> {
    schema_version: u32,
    cwd: String,
    mode: &'static str,
    ok: bool,
    duration_ms: u64,
    outputs: Vec<String>,
    errors: &'a [BuildMessage],
    warnings: &'a [BuildMessage],
    watch_files: usize,
}

/// Error result for JSON output when no build could run at all.
#[derive(Serialize)]
struct BuildErrorJson {
    schema_version: u32,
    ok: bool,
    error: BuildMessage,
}

/// Run the build command.
pub fn run(action: BuildAction, json: bool) -> Result<()> {
    let pipeline = match load_pipeline(&action) {
        Ok(pipeline) => pipeline,
        Err(err) => {
            if json {
                let result = BuildErrorJson {
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

    let port = action.port.unwrap_or(pipeline.config().port);
    let mode = BuildMode::from_flags(action.serve, action.watch, port);
    info!(mode = mode.as_str(), "starting");

    let runtime = tokio::runtime::Runtime::new().into_diagnostic()?;

    match mode {
        BuildMode::Once => {
            let report = runtime.block_on(pipeline.build_and_write());
            print_report(&report, &pipeline, mode, json)?;
            if !report.is_ok() {
                std::process::exit(1);
            }
            Ok(())
        }
        BuildMode::Watch => runtime.block_on(async {
            let (_handle, mut session) =
                watch::start(&pipeline.config().root, &pipeline.config().outdir_abs())?;
            pipeline
                .watch(&mut session, |report| {
                    if let Err(e) = print_report(report, &pipeline, mode, json) {
                        error!(error = %e, "failed to print build result");
                    }
                })
                .await;
            Ok::<(), miette::Report>(())
        }),
        BuildMode::Serve { port } => runtime.block_on(serve::run(pipeline, port)),
    }
}

fn load_pipeline(action: &BuildAction) -> stylepipe_core::Result<Pipeline> {
    let mut config = PipelineConfig::load(&action.cwd, action.config.as_deref())?
        .with_entry_points(action.entries.clone());
    if let Some(url) = action.api_url.as_deref() {
        config = config.with_api_url(Some(url));
    }
    if let Some(outdir) = &action.outdir {
        config.outdir.clone_from(outdir);
    }
    Pipeline::new(config)
}

fn print_report(report: &BuildReport, pipeline: &Pipeline, mode: BuildMode, json: bool) -> Result<()> {
    let duration_ms = u64::try_from(report.duration.as_millis()).unwrap_or(u64::MAX);
    let root = &pipeline.config().root;

    if json {
        let result = BuildResultJson {
            schema_version: SCHEMA_VERSION,
            cwd: root.display().to_string(),
            mode: mode.as_str(),
            ok: report.is_ok(),
            duration_ms,
            outputs: report.outputs.iter().map(|o| relative(&o.path, root)).collect(),
            errors: &report.errors,
            warnings: &report.warnings,
            watch_files: report.watch_files.len(),
        };
        println!("{}", serde_json::to_string(&result).into_diagnostic()?);
        return Ok(());
    }

    for warning in &report.warnings {
        eprintln!("warning: {warning}");
    }
    for err in &report.errors {
        eprintln!("error: {err}");
    }
    if report.is_ok() {
        for output in &report.outputs {
            println!("  {}", relative(&output.path, root));
        }
        println!("> {duration_ms}ms");
    } else {
        eprintln!(
            "> build failed with {} error{}",
            report.errors.len(),
            if report.errors.len() == 1 { "" } else { "s" }
        );
    }
    Ok(())
}

fn relative(path: &Path, root: &Path) -> String {
    path.strip_prefix(root)
        .unwrap_or(path)
        .to_string_lossy()
        .replace('\\', "/")
}
