use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "libre-convert")]
#[command(author, version, about = "HTTP document conversion service backed by LibreOffice")]
pub struct Cli {
    /// Path to config file (JSON, or TOML with a .toml extension)
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Start the conversion server
    Start {
        /// Host to bind to (overrides config and API_HOST)
        #[arg(long)]
        host: Option<String>,

        /// Port to listen on (overrides config and API_PORT)
        #[arg(short, long)]
        port: Option<u16>,
    },

    /// Check that the conversion engine is available
    CheckEngine,

    /// Print the supported conversion table
    Formats {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// Validate configuration and print the effective settings
    Validate,

    /// Display version information
    Version,
}
