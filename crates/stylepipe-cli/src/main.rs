#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::struct_excessive_bools)]
#![allow(clippy::needless_pass_by_value)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::missing_panics_doc)]
#![allow(clippy::doc_markdown)]

mod commands;
mod logging;

use clap::builder::FalseyValueParser;
use clap::Parser;
use miette::Result;
use std::path::PathBuf;
use stylepipe_core::Config;

#[derive(Parser, Debug)]
#[command(name = "stylepipe")]
#[command(author, version, about = "Build-time stylesheet transformation for bundlers", long_about = None)]
struct Cli {
    /// Increase logging verbosity (-v for DEBUG, -vv for TRACE)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Emit JSON formatted output (stable, machine-readable)
    #[arg(long, global = true)]
    json: bool,

    /// Override the working directory (the project root)
    #[arg(long, global = true, value_name = "PATH")]
    cwd: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(clap::Subcommand, Debug)]
enum Commands {
    /// Print version information
    Version,

    /// Build the entry points, optionally watching or serving
    Build {
        /// Entry points (defaults to the configured ones)
        entries: Vec<PathBuf>,

        /// Output directory
        #[arg(long, value_name = "DIR")]
        outdir: Option<PathBuf>,

        /// Config file (defaults to stylepipe.json in the project root)
        #[arg(long, value_name = "FILE")]
        config: Option<PathBuf>,

        /// Rebuild when watched files change
        #[arg(long, env = "WATCH", value_parser = FalseyValueParser::new())]
        watch: bool,

        /// Serve outputs over HTTP, rebuilding on each request (wins over --watch)
        #[arg(long, env = "SERVE", value_parser = FalseyValueParser::new())]
        serve: bool,

        /// Port for --serve
        #[arg(long)]
        port: Option<u16>,

        /// Value injected as process.env.API_URL
        #[arg(long, env = "API_URL", value_name = "URL")]
        api_url: Option<String>,
    },

    /// Print where a specifier resolves to
    Resolve {
        /// The import specifier
        specifier: String,

        /// Directory the import is written in (defaults to the project root)
        #[arg(long, value_name = "DIR")]
        from: Option<PathBuf>,

        /// Config file (defaults to stylepipe.json in the project root)
        #[arg(long, value_name = "FILE")]
        config: Option<PathBuf>,
    },

    /// Render a single stylesheet and print the result
    Render {
        /// Stylesheet to render
        file: PathBuf,

        /// Config file (defaults to stylepipe.json in the project root)
        #[arg(long, value_name = "FILE")]
        config: Option<PathBuf>,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let cwd = cli
        .cwd
        .or_else(|| std::env::current_dir().ok())
        .unwrap_or_else(|| PathBuf::from("."));

    let config = Config::new(cwd.clone())
        .with_verbosity(cli.verbose)
        .with_json_logs(cli.json);

    logging::init(config.verbosity, config.json_logs);

    match cli.command {
        Some(Commands::Version) | None => commands::version::run(),
        Some(Commands::Build {
            entries,
            outdir,
            config: config_path,
            watch,
            serve,
            port,
            api_url,
        }) => {
            let span = tracing::info_span!("build", cmd = "build", cwd = %cwd.display());
            let _guard = span.enter();
            commands::build::run(
                commands::build::BuildAction {
                    cwd,
                    config: config_path,
                    entries,
                    outdir,
                    watch,
                    serve,
                    port,
                    api_url,
                },
                cli.json,
            )
        }
        Some(Commands::Resolve {
            specifier,
            from,
            config: config_path,
        }) => commands::resolve::run(&cwd, config_path.as_deref(), &specifier, from, cli.json),
        Some(Commands::Render {
            file,
            config: config_path,
        }) => commands::render::run(&cwd, config_path.as_deref(), &file, cli.json),
    }
}
