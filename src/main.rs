use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

use coderef_scan::config::ScanConfig;

mod cmd;

#[derive(Parser)]
#[command(name = "coderef-scan")]
#[command(version, about = "Run scaffold, scan and generate phases across projects")]
pub struct Cli {
    /// Debug logging and full job output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Emit process logs as JSON
    #[arg(long, global = true)]
    pub log_json: bool,

    /// Directory holding coderef-scan.toml (defaults to the current directory)
    #[arg(long, global = true)]
    pub work_dir: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Start the HTTP and WebSocket server
    Serve {
        #[arg(long)]
        host: Option<String>,

        #[arg(short, long)]
        port: Option<u16>,

        /// Enable dev mode (CORS permissive for a local front-end)
        #[arg(long)]
        dev: bool,
    },
    /// Run a scan job in-process and render its progress
    Run {
        /// Project directories to process, in order
        #[arg(required = true)]
        paths: Vec<PathBuf>,

        /// Run the scaffold script before scanning
        #[arg(long)]
        scaffold: bool,

        /// Skip the scan phase
        #[arg(long)]
        no_scan: bool,

        /// Generate artifacts from the scan result
        #[arg(long)]
        generate: bool,

        /// Run every phase
        #[arg(long)]
        all: bool,

        /// Job id (defaults to a random UUID)
        #[arg(long)]
        job_id: Option<String>,
    },
    /// View or initialise configuration
    Config {
        #[command(subcommand)]
        command: Option<ConfigCommands>,
    },
}

#[derive(Subcommand, Clone)]
pub enum ConfigCommands {
    /// Show the effective configuration
    Show,
    /// Write a default coderef-scan.toml
    Init,
}

fn init_tracing(verbose: bool, json: bool) {
    let default_level = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();
    init_tracing(cli.verbose, cli.log_json);

    let work_dir = match cli.work_dir.clone() {
        Some(dir) => dir,
        None => std::env::current_dir().context("Failed to get current directory")?,
    };
    let config = ScanConfig::load_or_default(&work_dir)?.with_env();

    match cli.command {
        Commands::Serve { host, port, dev } => {
            cmd::cmd_serve(config, host, port, dev).await?;
        }
        Commands::Run {
            paths,
            scaffold,
            no_scan,
            generate,
            all,
            job_id,
        } => {
            let selection = cmd::run::selection_from_flags(scaffold, no_scan, generate, all);
            cmd::cmd_run(config, paths, selection, job_id, cli.verbose).await?;
        }
        Commands::Config { command } => cmd::cmd_config(&work_dir, &config, command)?,
    }

    Ok(())
}
