//! ember command-line interface.
//!
//! # Quick Start
//!
//! ```bash
//! # Serve ./resources on port 9006 using ./ember.toml if present
//! ember serve
//!
//! # Override the port and document root
//! ember serve --port 8080 --doc-root ./public
//!
//! # Print the effective configuration
//! ember config
//! ```

mod commands;
mod logging;

use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};

/// ember - a small event-driven HTTP/1.1 server.
#[derive(Parser)]
#[command(name = "ember")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the HTTP server.
    Serve {
        /// Directory containing ember.toml and ember.local.toml.
        #[arg(long, default_value = ".")]
        project_dir: PathBuf,

        /// Port to listen on, replacing the configured one.
        #[arg(short, long)]
        port: Option<u16>,

        /// Directory to serve files from.
        #[arg(long)]
        doc_root: Option<PathBuf>,

        /// Number of worker threads.
        #[arg(short, long)]
        threads: Option<usize>,
    },

    /// Print the effective configuration as TOML.
    Config {
        /// Directory containing ember.toml and ember.local.toml.
        #[arg(long, default_value = ".")]
        project_dir: PathBuf,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Serve {
            project_dir,
            port,
            doc_root,
            threads,
        } => commands::serve::run(
            &project_dir,
            &commands::serve::Overrides {
                port,
                doc_root,
                threads,
            },
        ),
        Commands::Config { project_dir } => commands::config::show(&project_dir),
    }
}
