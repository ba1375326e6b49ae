//! KvSave CLI
//!
//! Command-line tools for looking inside save archives.
//!
//! # Commands
//!
//! - `inspect` - Print a group file's frame fields and entries
//! - `verify` - Check every group file in a directory
//! - `version` - Print version information

mod commands;

use clap::{Parser, Subcommand};
use commands::CodecArgs;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

/// KvSave archive tools.
#[derive(Parser)]
#[command(name = "kvsave")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Enable verbose output
    #[arg(global = true, short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Print a group file's frame fields and entries
    Inspect {
        /// Group file to read
        file: PathBuf,

        /// Output format (text, json)
        #[arg(short, long, default_value = "text")]
        format: String,

        #[command(flatten)]
        codec: CodecArgs,
    },

    /// Check every group file in a directory
    Verify {
        /// Directory to scan
        dir: PathBuf,

        /// Group file extension
        #[arg(short, long, default_value = kvsave_core::DEFAULT_FILE_EXTENSION)]
        extension: String,

        #[command(flatten)]
        codec: CodecArgs,
    },

    /// Show version information
    Version,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        if cli.verbose {
            EnvFilter::new("debug")
        } else {
            EnvFilter::new("warn")
        }
    });
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    match cli.command {
        Commands::Inspect {
            file,
            format,
            codec,
        } => {
            let codec = codec.build()?;
            commands::inspect::run(&file, &codec, &format)?;
        }
        Commands::Verify {
            dir,
            extension,
            codec,
        } => {
            let codec = codec.build()?;
            commands::verify::run(&dir, &extension, &codec)?;
        }
        Commands::Version => {
            println!("KvSave CLI v{}", env!("CARGO_PKG_VERSION"));
            println!("KvSave Core v{}", kvsave_core::VERSION);
            println!("Archive format v{}", kvsave_core::archive::FORMAT_VERSION);
        }
    }

    Ok(())
}
