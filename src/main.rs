//! Arbor CLI entry point

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod commands;

#[derive(Parser)]
#[command(name = "arbor")]
#[command(about = "Lazily built, cached source structure with live change deltas", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    /// Project directory (defaults to current directory)
    #[arg(short, long, default_value = ".")]
    root: PathBuf,
}

#[derive(Subcommand)]
enum Commands {
    /// Print the structure of a source file
    Outline {
        /// Source file, relative to the project directory or absolute
        file: PathBuf,

        /// Print the outline as JSON
        #[arg(long)]
        json: bool,
    },
    /// Watch the project and print element deltas as files change
    Watch,
    /// Show version
    Version,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Logs go to stderr so outlines can be piped
    let log_level = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(format!("arbor={}", log_level)))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    tracing::debug!("Arbor v{}", env!("CARGO_PKG_VERSION"));
    tracing::debug!("Project directory: {}", cli.root.display());

    match cli.command {
        Commands::Outline { file, json } => commands::outline(cli.root, file, json),
        Commands::Watch => commands::watch(cli.root).await,
        Commands::Version => {
            println!("Arbor v{}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
    }
}
