//! argotmpl - render and diff the Helm chart behind an Argo CD Application

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

mod commands;
mod error;
mod exit_codes;
mod settings;

use argotmpl_repo::backend::git::INDEX_REF;
use commands::{CommonArgs, GlobalArgs, Workspace};
use error::Result;

#[derive(Parser)]
#[command(name = "argotmpl")]
#[command(version)]
#[command(
    about = "Render the Helm chart of an Argo CD Application locally, and diff it against git",
    long_about = None
)]
#[command(propagate_version = true)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    #[command(flatten)]
    global: GlobalArgs,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Render the application's chart into .manifest.yaml and print it
    Render {
        #[command(flatten)]
        common: CommonArgs,
    },

    /// Diff the rendered manifest against the one rendered at a git ref
    Diff {
        /// Git ref to compare against (e.g. origin/main)
        #[arg(default_value = "HEAD")]
        base_ref: String,

        /// Compare against the index instead of a commit
        #[arg(long)]
        cached: bool,

        /// Sort YAML keys alphabetically before diffing
        #[arg(long)]
        sort: bool,

        #[command(flatten)]
        common: CommonArgs,
    },
}

fn init_tracing(verbose: bool) {
    let default_level = if verbose { "debug" } else { "warn" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

#[tokio::main]
async fn run(cli: Cli) -> Result<()> {
    match cli.command {
        Commands::Render { common } => {
            let workspace = Workspace::prepare(&cli.global, &common)?;
            commands::render::run(&workspace).await
        }

        Commands::Diff {
            base_ref,
            cached,
            sort,
            common,
        } => {
            let base_ref = if cached { INDEX_REF.to_string() } else { base_ref };
            let workspace = Workspace::prepare(&cli.global, &common)?;
            commands::diff::run(workspace, &base_ref, sort).await
        }
    }
}

fn main() {
    // Setup miette for nice error display
    miette::set_panic_hook();

    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let code = match run(cli) {
        Ok(()) => exit_codes::SUCCESS,
        Err(err) => {
            let code = err.exit_code();
            eprintln!("{:?}", miette::Report::new(err));
            code
        }
    };

    std::process::exit(code);
}
