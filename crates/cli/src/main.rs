//! xfer - copy objects between local paths and S3-compatible storage

mod commands;
mod exit_code;
mod output;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use crate::exit_code::ExitCode;
use crate::output::OutputConfig;

#[derive(Parser, Debug)]
#[command(name = "xfer", version, about, long_about = None)]
struct Cli {
    /// Output strict JSON
    #[arg(long, global = true)]
    json: bool,

    /// Disable colored output
    #[arg(long, global = true)]
    no_color: bool,

    /// Only print errors
    #[arg(short, long, global = true)]
    quiet: bool,

    /// Enable debug logging (overridden by RUST_LOG)
    #[arg(long, global = true)]
    debug: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Copy an object or a prefix
    Cp(commands::cp::CpArgs),
    /// List objects
    Ls(commands::ls::LsArgs),
    /// Show backend capabilities
    Features(commands::features::FeaturesArgs),
}

fn init_tracing(debug: bool) -> anyhow::Result<()> {
    let default = if debug { "xfer=debug,xfer_core=debug,xfer_s3=debug" } else { "warn" };
    let filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => EnvFilter::try_new(default)?,
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .try_init()
        .map_err(|e| anyhow::anyhow!(e))
}

#[tokio::main]
async fn main() -> std::process::ExitCode {
    let cli = Cli::parse();

    if let Err(e) = init_tracing(cli.debug) {
        eprintln!("Failed to initialize logging: {e}");
    }

    let output_config = OutputConfig {
        json: cli.json,
        no_color: cli.no_color,
        quiet: cli.quiet,
    };

    let code = match cli.command {
        Commands::Cp(args) => commands::cp::execute(args, output_config).await,
        Commands::Ls(args) => commands::ls::execute(args, output_config).await,
        Commands::Features(args) => commands::features::execute(args, output_config).await,
    };

    code.into()
}
